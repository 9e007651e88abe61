//! The mutable rendering state that one replay drives.
//!
//! Commands only write fields here and raise dirty flags; `emit` turns dirty
//! groups into pipe calls right before a draw or dispatch.

use std::sync::Arc;

use aero_pipe::state::{
    BlendColor, BlendState, ColorMask, ConstantBuffer, DepthStencilAlphaState, FramebufferState,
    RasterizerState, ScissorState, ShaderStage, StencilRef, VertexBuffer, VertexElement,
    ViewportState, MAX_SO_BUFFERS, MAX_VERTEX_BUFFERS, MAX_VERTEX_ELEMENTS, MAX_VIEWPORTS,
};
use aero_pipe::{CsoHandle, DrawInfo, Resource, StreamOutputTarget};

use crate::cmd::{ClearValue, LoadOp, Rect2D, ResolveMode, StoreOp};
use crate::descriptor::{DescriptorSet, DescriptorSetLayout, MAX_SETS};
use crate::graphics::DepthBiasFactors;
use crate::objects::{ImageView, Pipeline, PipelineLayout, Shader};

pub const MAX_PUSH_CONSTANTS_SIZE: usize = 256;
pub const STAGES: usize = ShaderStage::COUNT;

/// Index into per-bind-point push-constant sizes.
pub const PUSH_GRAPHICS: usize = 0;
pub const PUSH_COMPUTE: usize = 1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GsOutput {
    #[default]
    None,
    Lines,
    Other,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DepthBias {
    pub enabled: bool,
    pub factors: DepthBiasFactors,
}

/// One attachment of the current render pass.
#[derive(Clone, Debug, Default)]
pub struct RenderAttachment {
    pub view: Option<Arc<ImageView>>,
    /// Multisampled stand-in rendered to instead of `view`.
    pub shadow: Option<Arc<ImageView>>,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub clear_value: ClearValue,
    pub resolve_mode: ResolveMode,
    pub resolve_view: Option<Arc<ImageView>>,
    pub read_only: bool,
}

impl RenderAttachment {
    /// The view draws and clears actually target.
    pub fn target(&self) -> Option<&Arc<ImageView>> {
        self.shadow.as_ref().or(self.view.as_ref())
    }
}

/// Bound offsets of one set slot in descriptor-buffer mode.
#[derive(Clone, Debug, Default)]
pub struct DescriptorBufferBinding {
    /// Pipeline layout the offsets were set with.
    pub layout: Option<Arc<PipelineLayout>>,
    pub buffer_index: Option<u32>,
    pub offset: u64,
    /// Layout whose immutable samplers were bound for this slot.
    pub sampler_layout: Option<Arc<DescriptorSetLayout>>,
}

#[derive(Debug)]
pub struct RenderingState {
    pub blend_dirty: bool,
    pub rs_dirty: bool,
    pub dsa_dirty: bool,
    pub stencil_ref_dirty: bool,
    pub blend_color_dirty: bool,
    pub ve_dirty: bool,
    pub vb_dirty: bool,
    pub vb_strides_dirty: bool,
    pub vp_dirty: bool,
    pub scissor_dirty: bool,
    pub sample_mask_dirty: bool,
    pub min_samples_dirty: bool,
    pub constbuf_dirty: [bool; STAGES],
    pub pcbuf_dirty: [bool; STAGES],
    pub inlines_dirty: [bool; STAGES],
    pub has_pcbuf: [bool; STAGES],

    pub noop_fs_bound: bool,
    pub shaders: [Option<Arc<Shader>>; STAGES],
    pub tess_states: [Option<CsoHandle>; 2],
    pub tess_ccw: bool,
    pub gs_output: GsOutput,
    pub dispatch_block: [u32; 3],
    pub exec_graph: Option<Arc<Pipeline>>,

    pub info: DrawInfo,
    pub index_size: u8,
    pub index_offset: u64,
    pub index_buffer_size: u64,
    pub index_buffer: Arc<Resource>,
    pub patch_vertices: u32,

    pub blend_state: BlendState,
    pub color_write_disables: u8,
    pub rs_state: RasterizerState,
    pub depth_bias: DepthBias,
    pub disable_multisample: bool,
    pub depth_clamp_sets_clip: bool,
    pub dsa_state: DepthStencilAlphaState,
    pub stencil_ref: StencilRef,
    pub blend_color: BlendColor,

    pub sample_mask: u32,
    pub min_samples: u32,
    pub min_sample_shading: f32,
    pub sample_shading: bool,
    pub force_min_sample: bool,
    pub rast_samples: u32,

    pub num_viewports: u32,
    pub viewports: [ViewportState; MAX_VIEWPORTS],
    pub depth: [(f32, f32); MAX_VIEWPORTS],
    pub num_scissors: u32,
    pub scissors: [ScissorState; MAX_VIEWPORTS],

    pub velem: [VertexElement; MAX_VERTEX_ELEMENTS],
    pub velem_count: u32,
    /// Vertex binding of each element before rebasing by `start_vb`.
    pub vertex_binding: [u32; MAX_VERTEX_ELEMENTS],
    pub vb: [VertexBuffer; MAX_VERTEX_BUFFERS],
    /// Size of the sub-range wrapper bound in each slot, if any.
    pub vb_sizes: [Option<u64>; MAX_VERTEX_BUFFERS],
    pub vb_strides: [u32; MAX_VERTEX_BUFFERS],
    pub start_vb: u32,
    pub num_vb: u32,

    pub const_buffer: [[ConstantBuffer; MAX_SETS]; STAGES],
    pub num_const_bufs: [u32; STAGES],
    pub push_constants: [u8; MAX_PUSH_CONSTANTS_SIZE],
    /// Push-constant block size of the bound graphics and compute layouts.
    pub push_size: [u32; 2],

    pub desc_sets: [[Option<Arc<DescriptorSet>>; MAX_SETS]; 3],
    pub desc_buffers: [Option<Arc<Resource>>; MAX_SETS],
    pub desc_buffer_addrs: [u64; MAX_SETS],
    pub desc_buffer_offsets: [[DescriptorBufferBinding; MAX_SETS]; 3],
    pub push_layouts: [Option<Arc<PipelineLayout>>; 3],

    pub framebuffer: FramebufferState,
    pub render_area: Rect2D,
    pub color_att: Vec<RenderAttachment>,
    pub depth_att: RenderAttachment,
    pub stencil_att: RenderAttachment,
    pub ds_view: Option<Arc<ImageView>>,
    pub ds_shadow: Option<Arc<ImageView>>,
    pub forced_sample_count: u32,
    pub forced_depth_resolve_mode: ResolveMode,
    pub forced_stencil_resolve_mode: ResolveMode,
    pub suspending: bool,
    pub render_cond: bool,

    pub so_targets: [Option<Arc<StreamOutputTarget>>; MAX_SO_BUFFERS],
    pub num_so_targets: u32,
    pub so_offsets: [u32; MAX_SO_BUFFERS],
}

impl RenderingState {
    pub fn new(zero_buffer: Arc<Resource>) -> Self {
        let rs_state = RasterizerState {
            line_width: 1.0,
            flatshade_first: true,
            clip_halfz: true,
            front_ccw: true,
            half_pixel_center: true,
            scissor: true,
            depth_clip_near: true,
            depth_clip_far: true,
            ..RasterizerState::default()
        };
        let index_buffer_size = zero_buffer.size();
        Self {
            blend_dirty: true,
            rs_dirty: true,
            dsa_dirty: true,
            stencil_ref_dirty: false,
            blend_color_dirty: false,
            ve_dirty: false,
            vb_dirty: false,
            vb_strides_dirty: false,
            vp_dirty: true,
            scissor_dirty: false,
            sample_mask_dirty: true,
            min_samples_dirty: true,
            constbuf_dirty: [false; STAGES],
            pcbuf_dirty: [false; STAGES],
            inlines_dirty: [false; STAGES],
            has_pcbuf: [false; STAGES],

            noop_fs_bound: false,
            shaders: Default::default(),
            tess_states: [None; 2],
            tess_ccw: false,
            gs_output: GsOutput::None,
            dispatch_block: [1; 3],
            exec_graph: None,

            info: DrawInfo::default(),
            index_size: 4,
            index_offset: 0,
            index_buffer_size,
            index_buffer: zero_buffer,
            patch_vertices: 0,

            blend_state: BlendState::default(),
            color_write_disables: 0,
            rs_state,
            depth_bias: DepthBias::default(),
            disable_multisample: false,
            depth_clamp_sets_clip: false,
            dsa_state: DepthStencilAlphaState::default(),
            stencil_ref: StencilRef::default(),
            blend_color: BlendColor::default(),

            sample_mask: !0,
            min_samples: 0,
            min_sample_shading: 0.0,
            sample_shading: false,
            force_min_sample: false,
            rast_samples: 0,

            num_viewports: 1,
            viewports: [ViewportState::default(); MAX_VIEWPORTS],
            depth: [(0.0, 1.0); MAX_VIEWPORTS],
            num_scissors: 1,
            scissors: [ScissorState::default(); MAX_VIEWPORTS],

            velem: [VertexElement::default(); MAX_VERTEX_ELEMENTS],
            velem_count: 0,
            vertex_binding: [0; MAX_VERTEX_ELEMENTS],
            vb: std::array::from_fn(|_| VertexBuffer::default()),
            vb_sizes: [None; MAX_VERTEX_BUFFERS],
            vb_strides: [0; MAX_VERTEX_BUFFERS],
            start_vb: u32::MAX,
            num_vb: 0,

            const_buffer: std::array::from_fn(|_| std::array::from_fn(|_| ConstantBuffer::default())),
            num_const_bufs: [0; STAGES],
            push_constants: [0; MAX_PUSH_CONSTANTS_SIZE],
            push_size: [0; 2],

            desc_sets: Default::default(),
            desc_buffers: Default::default(),
            desc_buffer_addrs: [0; MAX_SETS],
            desc_buffer_offsets: Default::default(),
            push_layouts: Default::default(),

            framebuffer: FramebufferState::default(),
            render_area: Rect2D::default(),
            color_att: Vec::new(),
            depth_att: RenderAttachment::default(),
            stencil_att: RenderAttachment::default(),
            ds_view: None,
            ds_shadow: None,
            forced_sample_count: 0,
            forced_depth_resolve_mode: ResolveMode::None,
            forced_stencil_resolve_mode: ResolveMode::None,
            suspending: false,
            render_cond: false,

            so_targets: Default::default(),
            num_so_targets: 0,
            so_offsets: [0; MAX_SO_BUFFERS],
        }
    }

    /// Whether any graphics state group resolved by a flush is dirty.
    pub fn any_dirty(&self) -> bool {
        self.blend_dirty
            || self.rs_dirty
            || self.dsa_dirty
            || self.stencil_ref_dirty
            || self.blend_color_dirty
            || self.ve_dirty
            || self.vb_dirty
            || self.vb_strides_dirty
            || self.vp_dirty
            || self.scissor_dirty
            || self.sample_mask_dirty
            || self.min_samples_dirty
            || ShaderStage::GRAPHICS.iter().any(|stage| {
                let i = stage.index();
                self.constbuf_dirty[i] || self.pcbuf_dirty[i] || self.inlines_dirty[i]
            })
    }

    /// Push-constant bytes a stage sees, zero when its layout exposes none.
    pub fn pcbuf_size(&self, stage: ShaderStage) -> u32 {
        if !self.has_pcbuf[stage.index()] {
            return 0;
        }
        let point = if stage == ShaderStage::Compute {
            PUSH_COMPUTE
        } else {
            PUSH_GRAPHICS
        };
        self.push_size[point]
    }

    /// Record a rasterization sample count.
    pub fn update_samples(&mut self, samples: u32) {
        self.rast_samples = samples;
        let multisample = samples > 1;
        self.rs_dirty |= self.rs_state.multisample != multisample;
        self.rs_state.multisample = multisample;
        self.min_samples_dirty = true;
    }

    /// Recompute the depth half of viewport `i` from its stored range.
    pub fn set_viewport_depth_xform(&mut self, i: usize) {
        let (n, f) = self.depth[i];
        let vp = &mut self.viewports[i];
        if self.rs_state.clip_halfz {
            vp.scale[2] = f - n;
            vp.translate[2] = n;
        } else {
            vp.scale[2] = (f - n) * 0.5;
            vp.translate[2] = (n + f) * 0.5;
        }
    }

    pub fn set_viewport(&mut self, i: usize, vp: &crate::cmd::Viewport) {
        let scale_x = vp.width * 0.5;
        let scale_y = vp.height * 0.5;
        self.viewports[i].scale[0] = scale_x;
        self.viewports[i].scale[1] = scale_y;
        self.viewports[i].translate[0] = vp.x + scale_x;
        self.viewports[i].translate[1] = vp.y + scale_y;
        self.depth[i] = (vp.min_depth, vp.max_depth);
        self.set_viewport_depth_xform(i);
    }

    pub fn set_scissor(&mut self, i: usize, rect: &Rect2D) {
        let minx = rect.offset.x.max(0) as u32;
        let miny = rect.offset.y.max(0) as u32;
        self.scissors[i] = ScissorState {
            minx,
            miny,
            maxx: (rect.offset.x as i64 + i64::from(rect.extent.width)).max(0) as u32,
            maxy: (rect.offset.y as i64 + i64::from(rect.extent.height)).max(0) as u32,
        };
    }

    /// Colormask of every attachment with a disabled color write zeroed.
    pub fn effective_blend(&self) -> BlendState {
        let mut blend = self.blend_state;
        for (i, rt) in blend.rt.iter_mut().enumerate() {
            if self.color_write_disables & (1 << i) != 0 {
                rt.colormask = ColorMask::empty();
            }
        }
        blend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::Viewport;
    use aero_pipe::Screen;

    #[test]
    fn viewport_transform_follows_clip_convention() {
        let screen = Screen::new();
        let mut state = RenderingState::new(screen.buffer_create(4));
        let vp = Viewport {
            x: 10.0,
            y: 20.0,
            width: 100.0,
            height: 50.0,
            min_depth: 0.25,
            max_depth: 0.75,
        };
        state.set_viewport(0, &vp);
        assert_eq!(state.viewports[0].scale, [50.0, 25.0, 0.5]);
        assert_eq!(state.viewports[0].translate, [60.0, 45.0, 0.25]);

        state.rs_state.clip_halfz = false;
        state.set_viewport_depth_xform(0);
        assert_eq!(state.viewports[0].scale[2], 0.25);
        assert_eq!(state.viewports[0].translate[2], 0.5);
    }

    #[test]
    fn fresh_state_needs_a_flush() {
        let screen = Screen::new();
        let state = RenderingState::new(screen.buffer_create(4));
        assert!(state.any_dirty());
        assert_eq!(state.index_size, 4);
        assert_eq!(state.sample_mask, !0);
        assert!(state.rs_state.scissor);
    }
}
