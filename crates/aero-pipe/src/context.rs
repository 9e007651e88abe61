use std::sync::Arc;

use bitflags::bitflags;

use crate::blit::BlitInfo;
use crate::draw::{DrawIndirectInfo, DrawInfo, DrawStartCountBias, GridInfo};
use crate::error::PipeError;
use crate::format::ColorUnion;
use crate::resource::{
    Resource, SamplerView, SamplerViewTemplate, StreamOutputTarget, Surface, SurfaceTemplate,
};
use crate::screen::Screen;
use crate::state::{
    BlendColor, BlendState, ClipState, ConstantBuffer, DepthStencilAlphaState, FramebufferState,
    RasterizerState, ScissorState, ShaderStage, ShaderState, StencilRef, VertexBuffer,
    VertexElements, ViewportState,
};

/// Backend handle of a created state object (blend, rasterizer, shader, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CsoHandle(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryHandle(pub u32);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fence(pub u64);

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ClearFlags: u32 {
        const DEPTH = 1 << 0;
        const STENCIL = 1 << 1;
        const COLOR0 = 1 << 2;
        const DEPTHSTENCIL = Self::DEPTH.bits() | Self::STENCIL.bits();
    }
}

impl ClearFlags {
    pub const fn color(index: u32) -> Self {
        Self::from_bits_retain(Self::COLOR0.bits() << index)
    }

    /// Indices of the color buffers named by this mask.
    pub fn colors(self) -> impl Iterator<Item = u32> {
        (0..8).filter(move |&i| self.contains(Self::color(i)))
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct MapFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const DISCARD_RANGE = 1 << 2;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct QueryResultFlags: u32 {
        const WAIT = 1 << 0;
        const PARTIAL = 1 << 1;
    }
}

/// A 3D region. Signed so that mirrored blits can be expressed with negative
/// extents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PipeBox {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub width: i32,
    pub height: i32,
    pub depth: i32,
}

impl PipeBox {
    pub fn new_1d(x: i32, width: i32) -> Self {
        Self {
            x,
            y: 0,
            z: 0,
            width,
            height: 1,
            depth: 1,
        }
    }

    pub fn new_2d(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            z: 0,
            width,
            height,
            depth: 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.depth == 0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryType {
    OcclusionCounter,
    OcclusionPredicate,
    OcclusionPredicateConservative,
    Timestamp,
    TimeElapsed,
    PrimitivesGenerated,
    PrimitivesEmitted,
    SoStatistics,
    PipelineStatistics,
    MeshPrimitivesGenerated,
}

/// Width of a query value written by [`PipeContext::get_query_result_resource`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryValueType {
    U32,
    U64,
}

/// Result index requesting query availability instead of a value.
pub const QUERY_AVAILABILITY_INDEX: i32 = -1;

/// A CPU view of a mapped range.
///
/// The data is a copy; writes reach the resource on unmap when the transfer
/// was mapped with [`MapFlags::WRITE`].
#[derive(Debug)]
pub struct Transfer {
    pub resource: Arc<Resource>,
    pub usage: MapFlags,
    pub layout: TransferLayout,
    pub data: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferLayout {
    Buffer { offset: u64 },
    Texture {
        level: u32,
        region: PipeBox,
        stride: u64,
        layer_stride: u64,
    },
}

/// Per-context half of the pipe layer.
///
/// This is the only surface the frontends talk to. State objects are created
/// once and bound by handle; all other calls act immediately on the bound
/// state. Object creation reports failure with `None` and the caller skips the
/// operation that needed the object.
pub trait PipeContext {
    fn screen(&self) -> &Arc<Screen>;

    /// Draw `draws` with the shared `info`. With `indirect`, arguments come
    /// from GPU memory and `draws` holds exactly one entry whose `index_bias`
    /// is ignored.
    fn draw_vbo(
        &mut self,
        info: &DrawInfo,
        drawid_offset: u32,
        indirect: Option<&DrawIndirectInfo>,
        draws: &[DrawStartCountBias],
    );
    fn draw_mesh_tasks(&mut self, drawid_offset: u32, grid: &GridInfo);
    fn launch_grid(&mut self, grid: &GridInfo);

    fn blit(&mut self, info: &BlitInfo);
    #[allow(clippy::too_many_arguments)]
    fn resource_copy_region(
        &mut self,
        dst: &Arc<Resource>,
        dst_level: u32,
        dstx: u32,
        dsty: u32,
        dstz: u32,
        src: &Arc<Resource>,
        src_level: u32,
        src_box: &PipeBox,
    );
    /// Clear the bound framebuffer.
    fn clear(
        &mut self,
        buffers: ClearFlags,
        scissor: Option<&ScissorState>,
        color: &ColorUnion,
        depth: f64,
        stencil: u8,
    );
    fn clear_render_target(
        &mut self,
        dst: &Arc<Surface>,
        color: &ColorUnion,
        rect: Rect,
        render_condition_enabled: bool,
    );
    #[allow(clippy::too_many_arguments)]
    fn clear_depth_stencil(
        &mut self,
        dst: &Arc<Surface>,
        flags: ClearFlags,
        depth: f64,
        stencil: u8,
        rect: Rect,
        render_condition_enabled: bool,
    );
    fn clear_buffer(&mut self, res: &Arc<Resource>, offset: u64, size: u64, pattern: &[u8]);
    /// Fill `region` of `level` with one packed texel.
    fn clear_texture(&mut self, res: &Arc<Resource>, level: u32, region: &PipeBox, texel: &[u8]);

    fn buffer_map(
        &mut self,
        res: &Arc<Resource>,
        offset: u64,
        len: u64,
        usage: MapFlags,
    ) -> Result<Transfer, PipeError>;
    fn buffer_unmap(&mut self, transfer: Transfer);
    fn texture_map(
        &mut self,
        res: &Arc<Resource>,
        level: u32,
        region: &PipeBox,
        usage: MapFlags,
    ) -> Result<Transfer, PipeError>;
    fn texture_unmap(&mut self, transfer: Transfer);

    fn create_blend_state(&mut self, state: &BlendState) -> Option<CsoHandle>;
    fn bind_blend_state(&mut self, handle: Option<CsoHandle>);
    fn delete_blend_state(&mut self, handle: CsoHandle);
    fn create_rasterizer_state(&mut self, state: &RasterizerState) -> Option<CsoHandle>;
    fn bind_rasterizer_state(&mut self, handle: Option<CsoHandle>);
    fn delete_rasterizer_state(&mut self, handle: CsoHandle);
    fn create_depth_stencil_alpha_state(
        &mut self,
        state: &DepthStencilAlphaState,
    ) -> Option<CsoHandle>;
    fn bind_depth_stencil_alpha_state(&mut self, handle: Option<CsoHandle>);
    fn delete_depth_stencil_alpha_state(&mut self, handle: CsoHandle);
    fn create_vertex_elements_state(&mut self, state: &VertexElements) -> Option<CsoHandle>;
    fn bind_vertex_elements_state(&mut self, handle: Option<CsoHandle>);
    fn delete_vertex_elements_state(&mut self, handle: CsoHandle);
    fn create_shader_state(&mut self, state: &ShaderState) -> Option<CsoHandle>;
    fn bind_shader_state(&mut self, stage: ShaderStage, handle: Option<CsoHandle>);
    fn delete_shader_state(&mut self, stage: ShaderStage, handle: CsoHandle);

    fn set_constant_buffer(&mut self, stage: ShaderStage, index: u32, cb: Option<&ConstantBuffer>);
    fn set_vertex_buffers(&mut self, buffers: &[VertexBuffer]);
    fn set_viewport_states(&mut self, start: u32, viewports: &[ViewportState]);
    fn set_scissor_states(&mut self, start: u32, scissors: &[ScissorState]);
    fn set_blend_color(&mut self, color: &BlendColor);
    fn set_stencil_ref(&mut self, stencil_ref: StencilRef);
    fn set_sample_mask(&mut self, mask: u32);
    fn set_min_samples(&mut self, min_samples: u32);
    fn set_clip_state(&mut self, clip: &ClipState);
    fn set_patch_vertices(&mut self, vertices: u8);
    fn set_framebuffer_state(&mut self, fb: &FramebufferState);
    fn set_sampler_views(
        &mut self,
        stage: ShaderStage,
        start: u32,
        views: &[Option<Arc<SamplerView>>],
    );

    fn create_surface(&mut self, res: &Arc<Resource>, templ: &SurfaceTemplate)
        -> Option<Arc<Surface>>;
    /// Release a surface reference. The surface is destroyed with its last
    /// reference.
    fn surface_destroy(&mut self, surface: Arc<Surface>) {
        drop(surface);
    }
    fn create_sampler_view(
        &mut self,
        res: &Arc<Resource>,
        templ: &SamplerViewTemplate,
    ) -> Option<Arc<SamplerView>>;
    fn render_condition_mem(&mut self, buffer: Option<&Arc<Resource>>, offset: u32, inverted: bool);

    fn create_stream_output_target(
        &mut self,
        buffer: &Arc<Resource>,
        offset: u32,
        size: u32,
    ) -> Option<Arc<StreamOutputTarget>>;
    fn stream_output_target_destroy(&mut self, target: Arc<StreamOutputTarget>) {
        drop(target);
    }
    /// Bind transform-feedback targets; `offsets[i] == u32::MAX` appends.
    fn set_stream_output_targets(&mut self, targets: &[Arc<StreamOutputTarget>], offsets: &[u32]);
    fn stream_output_target_offset(&mut self, target: &Arc<StreamOutputTarget>) -> u32 {
        target.filled()
    }

    fn create_query(&mut self, ty: QueryType, index: u32) -> Option<QueryHandle>;
    fn destroy_query(&mut self, query: QueryHandle);
    fn begin_query(&mut self, query: QueryHandle) -> bool;
    fn end_query(&mut self, query: QueryHandle) -> bool;
    #[allow(clippy::too_many_arguments)]
    fn get_query_result_resource(
        &mut self,
        query: QueryHandle,
        flags: QueryResultFlags,
        result_type: QueryValueType,
        index: i32,
        res: &Arc<Resource>,
        offset: u32,
    );

    fn flush(&mut self) -> Fence;
    fn fence_finish(&mut self, fence: Fence) -> bool;
}

/// Map, copy out and unmap a buffer range.
pub fn pipe_buffer_read<C: PipeContext + ?Sized>(
    ctx: &mut C,
    res: &Arc<Resource>,
    offset: u64,
    len: u64,
) -> Result<Vec<u8>, PipeError> {
    let mut transfer = ctx.buffer_map(res, offset, len, MapFlags::READ)?;
    let data = std::mem::take(&mut transfer.data);
    ctx.buffer_unmap(transfer);
    Ok(data)
}

/// Map a buffer range for writing, fill it from `data` and unmap.
pub fn pipe_buffer_write<C: PipeContext + ?Sized>(
    ctx: &mut C,
    res: &Arc<Resource>,
    offset: u64,
    data: &[u8],
) -> Result<(), PipeError> {
    let mut transfer = ctx.buffer_map(
        res,
        offset,
        data.len() as u64,
        MapFlags::WRITE | MapFlags::DISCARD_RANGE,
    )?;
    transfer.data.copy_from_slice(data);
    ctx.buffer_unmap(transfer);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_flags_color_bits() {
        let flags = ClearFlags::color(0) | ClearFlags::color(3) | ClearFlags::DEPTH;
        assert_eq!(flags.colors().collect::<Vec<_>>(), vec![0, 3]);
        assert!(flags.contains(ClearFlags::COLOR0));
    }
}
