//! Pipeline state objects exchanged with a [`crate::PipeContext`].
//!
//! Float-carrying states cannot derive `Hash`; [`StateKey`] hashes them by bit
//! pattern so the validator can key its caches by semantic value.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use bitflags::bitflags;

use crate::format::Format;
use crate::resource::Resource;

pub const MAX_COLOR_BUFS: usize = 8;
pub const MAX_VIEWPORTS: usize = 16;
pub const MAX_VERTEX_BUFFERS: usize = 32;
pub const MAX_VERTEX_ELEMENTS: usize = 32;
pub const MAX_CONSTANT_BUFFERS: usize = 16;
pub const MAX_SO_BUFFERS: usize = 4;

/// Programmable pipeline stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex,
    TessCtrl,
    TessEval,
    Geometry,
    Fragment,
    Compute,
    Task,
    Mesh,
}

impl ShaderStage {
    pub const COUNT: usize = 8;

    pub const ALL: [ShaderStage; Self::COUNT] = [
        ShaderStage::Vertex,
        ShaderStage::TessCtrl,
        ShaderStage::TessEval,
        ShaderStage::Geometry,
        ShaderStage::Fragment,
        ShaderStage::Compute,
        ShaderStage::Task,
        ShaderStage::Mesh,
    ];

    /// Stages fed by the graphics pipeline, in binding order.
    pub const GRAPHICS: [ShaderStage; 7] = [
        ShaderStage::Vertex,
        ShaderStage::TessCtrl,
        ShaderStage::TessEval,
        ShaderStage::Geometry,
        ShaderStage::Fragment,
        ShaderStage::Task,
        ShaderStage::Mesh,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn bit(self) -> ShaderStages {
        ShaderStages::from_bits_truncate(1 << self as u32)
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const TESS_CTRL = 1 << 1;
        const TESS_EVAL = 1 << 2;
        const GEOMETRY = 1 << 3;
        const FRAGMENT = 1 << 4;
        const COMPUTE = 1 << 5;
        const TASK = 1 << 6;
        const MESH = 1 << 7;

        const ALL_GRAPHICS = Self::VERTEX.bits()
            | Self::TESS_CTRL.bits()
            | Self::TESS_EVAL.bits()
            | Self::GEOMETRY.bits()
            | Self::FRAGMENT.bits()
            | Self::TASK.bits()
            | Self::MESH.bits();
    }
}

impl ShaderStages {
    pub fn stages(self) -> impl Iterator<Item = ShaderStage> {
        ShaderStage::ALL
            .into_iter()
            .filter(move |s| self.contains(s.bit()))
    }
}

/// Values that can key a state-object cache.
pub trait StateKey: Clone + PartialEq + std::fmt::Debug {
    fn hash_key<H: Hasher>(&self, state: &mut H);
}

fn hash_f32<H: Hasher>(v: f32, state: &mut H) {
    v.to_bits().hash(state);
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlendFunc {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    #[default]
    One,
    Zero,
    SrcColor,
    SrcAlpha,
    DstColor,
    DstAlpha,
    InvSrcColor,
    InvSrcAlpha,
    InvDstColor,
    InvDstAlpha,
    ConstColor,
    ConstAlpha,
    InvConstColor,
    InvConstAlpha,
    SrcAlphaSaturate,
    Src1Color,
    Src1Alpha,
    InvSrc1Color,
    InvSrc1Alpha,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LogicOp {
    Clear,
    And,
    AndReverse,
    #[default]
    Copy,
    AndInverted,
    Noop,
    Xor,
    Or,
    Nor,
    Equiv,
    Invert,
    OrReverse,
    CopyInverted,
    OrInverted,
    Nand,
    Set,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ColorMask: u8 {
        const R = 1 << 0;
        const G = 1 << 1;
        const B = 1 << 2;
        const A = 1 << 3;
        const RGBA = 0xf;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RtBlendState {
    pub blend_enable: bool,
    pub rgb_func: BlendFunc,
    pub rgb_src_factor: BlendFactor,
    pub rgb_dst_factor: BlendFactor,
    pub alpha_func: BlendFunc,
    pub alpha_src_factor: BlendFactor,
    pub alpha_dst_factor: BlendFactor,
    pub colormask: ColorMask,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub independent_blend_enable: bool,
    pub logicop_enable: bool,
    pub logicop_func: LogicOp,
    pub alpha_to_coverage: bool,
    pub alpha_to_one: bool,
    pub max_rt: u8,
    pub rt: [RtBlendState; MAX_COLOR_BUFS],
}

impl BlendState {
    /// Blending off, all channels written on render target 0.
    pub fn disabled() -> Self {
        let mut state = Self::default();
        state.rt[0].colormask = ColorMask::RGBA;
        state
    }
}

impl StateKey for BlendState {
    fn hash_key<H: Hasher>(&self, state: &mut H) {
        self.hash(state);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CullFace {
    #[default]
    None,
    Front,
    Back,
    FrontAndBack,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PolygonMode {
    #[default]
    Fill,
    Line,
    Point,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RasterizerState {
    pub flatshade_first: bool,
    pub front_ccw: bool,
    pub cull_face: CullFace,
    pub fill_front: PolygonMode,
    pub fill_back: PolygonMode,
    pub offset_point: bool,
    pub offset_line: bool,
    pub offset_tri: bool,
    pub offset_units: f32,
    pub offset_scale: f32,
    pub offset_clamp: f32,
    pub line_width: f32,
    pub line_smooth: bool,
    pub line_rectangular: bool,
    pub line_stipple_enable: bool,
    pub line_stipple_factor: u32,
    pub line_stipple_pattern: u16,
    pub depth_clamp: bool,
    pub depth_clip_near: bool,
    pub depth_clip_far: bool,
    pub clip_halfz: bool,
    pub rasterizer_discard: bool,
    pub multisample: bool,
    pub scissor: bool,
    pub half_pixel_center: bool,
    pub tess_ccw: bool,
}

impl RasterizerState {
    /// Fill, no culling, no offset; used as the baseline for internal blits.
    pub fn disabled() -> Self {
        Self {
            line_width: 1.0,
            depth_clip_near: true,
            depth_clip_far: true,
            half_pixel_center: true,
            ..Self::default()
        }
    }
}

impl StateKey for RasterizerState {
    fn hash_key<H: Hasher>(&self, state: &mut H) {
        (
            self.flatshade_first,
            self.front_ccw,
            self.cull_face,
            self.fill_front,
            self.fill_back,
            self.offset_point,
            self.offset_line,
            self.offset_tri,
        )
            .hash(state);
        hash_f32(self.offset_units, state);
        hash_f32(self.offset_scale, state);
        hash_f32(self.offset_clamp, state);
        hash_f32(self.line_width, state);
        (
            self.line_smooth,
            self.line_rectangular,
            self.line_stipple_enable,
            self.line_stipple_factor,
            self.line_stipple_pattern,
            self.depth_clamp,
            self.depth_clip_near,
            self.depth_clip_far,
            self.clip_halfz,
            self.rasterizer_discard,
            self.multisample,
            self.scissor,
        )
            .hash(state);
        (self.half_pixel_center, self.tess_ccw).hash(state);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CompareFunc {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    #[default]
    Always,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StencilOp {
    #[default]
    Keep,
    Zero,
    Replace,
    IncrClamp,
    DecrClamp,
    Invert,
    IncrWrap,
    DecrWrap,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct StencilState {
    pub enabled: bool,
    pub func: CompareFunc,
    pub fail_op: StencilOp,
    pub zpass_op: StencilOp,
    pub zfail_op: StencilOp,
    pub valuemask: u8,
    pub writemask: u8,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DepthStencilAlphaState {
    pub depth_enabled: bool,
    pub depth_writemask: bool,
    pub depth_func: CompareFunc,
    pub depth_bounds_test: bool,
    pub depth_bounds_min: f64,
    pub depth_bounds_max: f64,
    pub stencil: [StencilState; 2],
}

impl StateKey for DepthStencilAlphaState {
    fn hash_key<H: Hasher>(&self, state: &mut H) {
        (
            self.depth_enabled,
            self.depth_writemask,
            self.depth_func,
            self.depth_bounds_test,
            self.depth_bounds_min.to_bits(),
            self.depth_bounds_max.to_bits(),
            self.stencil,
        )
            .hash(state);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct VertexElement {
    pub src_offset: u32,
    pub src_stride: u32,
    pub instance_divisor: u32,
    pub vertex_buffer_index: u32,
    pub src_format: Format,
    pub dual_slot: bool,
}

/// A complete vertex layout, bound as one state object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct VertexElements {
    pub elements: Vec<VertexElement>,
}

impl StateKey for VertexElements {
    fn hash_key<H: Hasher>(&self, state: &mut H) {
        self.hash(state);
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct VertexBuffer {
    pub buffer: Option<Arc<Resource>>,
    pub buffer_offset: u32,
}

impl VertexBuffer {
    pub fn new(buffer: &Arc<Resource>, buffer_offset: u32) -> Self {
        Self {
            buffer: Some(buffer.clone()),
            buffer_offset,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ViewportState {
    pub scale: [f32; 3],
    pub translate: [f32; 3],
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ScissorState {
    pub minx: u32,
    pub miny: u32,
    pub maxx: u32,
    pub maxy: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BlendColor {
    pub color: [f32; 4],
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct StencilRef {
    pub ref_value: [u8; 2],
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ClipState {
    pub ucp_enables: u8,
}

/// A constant buffer binding. `buffer == None` with `user_buffer` set binds
/// CPU-side bytes directly.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConstantBuffer {
    pub buffer: Option<Arc<Resource>>,
    pub buffer_offset: u32,
    pub buffer_size: u32,
    pub user_buffer: Option<Arc<[u8]>>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FramebufferState {
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub samples: u32,
    pub cbufs: Vec<Option<Arc<crate::Surface>>>,
    pub zsbuf: Option<Arc<crate::Surface>>,
    pub resolve: Option<Arc<Resource>>,
    pub viewmask: u32,
}

/// A shader as handed to the backend. The IR itself is opaque to the pipe
/// layer; `inline_values` carries constant-folded uniform values for
/// specialized variants.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShaderState {
    pub stage: ShaderStage,
    pub ir: Arc<[u32]>,
    pub inline_values: Option<Vec<u32>>,
    /// Tessellation-evaluation variant with flipped output winding.
    pub tess_ccw: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn key_hash<T: StateKey>(v: &T) -> u64 {
        let mut h = DefaultHasher::new();
        v.hash_key(&mut h);
        h.finish()
    }

    #[test]
    fn stage_bits_round_trip() {
        for stage in ShaderStage::ALL {
            assert_eq!(stage.bit().stages().collect::<Vec<_>>(), vec![stage]);
        }
        assert!(!ShaderStages::ALL_GRAPHICS.contains(ShaderStages::COMPUTE));
    }

    #[test]
    fn float_states_hash_by_value() {
        let a = RasterizerState {
            line_width: 2.0,
            ..RasterizerState::disabled()
        };
        let b = a;
        let c = RasterizerState {
            line_width: 3.0,
            ..a
        };
        assert_eq!(key_hash(&a), key_hash(&b));
        assert_ne!(key_hash(&a), key_hash(&c));
    }
}
