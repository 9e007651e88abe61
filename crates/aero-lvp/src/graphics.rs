//! Fixed-function state baked into a graphics pipeline.
//!
//! Each group is optional; a missing group leaves the corresponding replay
//! state untouched when the pipeline is bound, and a bit in
//! [`DynamicStates`] excludes that value from the bind.

use aero_pipe::state::{
    BlendFactor, BlendFunc, ColorMask, CompareFunc, CullFace, LogicOp, PolygonMode,
};
use aero_pipe::{Format, PrimType};
use bitflags::bitflags;

use crate::cmd::{
    ColorBlendEquation, FrontFace, LineRasterizationMode, ProvokingVertex, Rect2D,
    StencilOpState, Viewport,
};

bitflags! {
    /// Pipeline state that is taken from dynamic-state commands instead of
    /// the pipeline.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct DynamicStates: u64 {
        const RS_DEPTH_CLAMP_ENABLE = 1 << 0;
        const RS_DEPTH_CLIP_ENABLE = 1 << 1;
        const RS_RASTERIZER_DISCARD_ENABLE = 1 << 2;
        const RS_LINE_MODE = 1 << 3;
        const RS_LINE_STIPPLE_ENABLE = 1 << 4;
        const RS_POLYGON_MODE = 1 << 5;
        const RS_PROVOKING_VERTEX = 1 << 6;
        const RS_LINE_WIDTH = 1 << 7;
        const RS_LINE_STIPPLE = 1 << 8;
        const RS_DEPTH_BIAS_ENABLE = 1 << 9;
        const RS_DEPTH_BIAS_FACTORS = 1 << 10;
        const RS_CULL_MODE = 1 << 11;
        const RS_FRONT_FACE = 1 << 12;
        const DS_DEPTH_TEST_ENABLE = 1 << 13;
        const DS_DEPTH_WRITE_ENABLE = 1 << 14;
        const DS_DEPTH_COMPARE_OP = 1 << 15;
        const DS_DEPTH_BOUNDS_TEST_ENABLE = 1 << 16;
        const DS_DEPTH_BOUNDS_TEST_BOUNDS = 1 << 17;
        const DS_STENCIL_TEST_ENABLE = 1 << 18;
        const DS_STENCIL_OP = 1 << 19;
        const DS_STENCIL_COMPARE_MASK = 1 << 20;
        const DS_STENCIL_WRITE_MASK = 1 << 21;
        const DS_STENCIL_REFERENCE = 1 << 22;
        const CB_LOGIC_OP_ENABLE = 1 << 23;
        const CB_LOGIC_OP = 1 << 24;
        const CB_COLOR_WRITE_ENABLES = 1 << 25;
        const CB_WRITE_MASKS = 1 << 26;
        const CB_BLEND_ENABLES = 1 << 27;
        const CB_BLEND_EQUATIONS = 1 << 28;
        const CB_BLEND_CONSTANTS = 1 << 29;
        const MS_SAMPLE_MASK = 1 << 30;
        const MS_ALPHA_TO_COVERAGE_ENABLE = 1 << 31;
        const MS_ALPHA_TO_ONE_ENABLE = 1 << 32;
        const MS_RASTERIZATION_SAMPLES = 1 << 33;
        const VI = 1 << 34;
        const VI_BINDING_STRIDES = 1 << 35;
        const IA_PRIMITIVE_TOPOLOGY = 1 << 36;
        const IA_PRIMITIVE_RESTART_ENABLE = 1 << 37;
        const TS_PATCH_CONTROL_POINTS = 1 << 38;
        const TS_DOMAIN_ORIGIN = 1 << 39;
        const VP_VIEWPORT_COUNT = 1 << 40;
        const VP_SCISSOR_COUNT = 1 << 41;
        const VP_VIEWPORTS = 1 << 42;
        const VP_SCISSORS = 1 << 43;
        const VP_DEPTH_CLIP_NEGATIVE_ONE_TO_ONE = 1 << 44;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DepthBiasFactors {
    pub constant: f32,
    pub clamp: f32,
    pub slope: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RasterizationState {
    pub depth_clamp_enable: bool,
    /// `None` derives clipping from the clamp enable.
    pub depth_clip_enable: Option<bool>,
    pub rasterizer_discard_enable: bool,
    pub line_mode: LineRasterizationMode,
    pub line_stipple_enable: bool,
    pub polygon_mode: PolygonMode,
    pub provoking_vertex: ProvokingVertex,
    pub line_width: f32,
    pub line_stipple_factor: u32,
    pub line_stipple_pattern: u16,
    pub depth_bias_enable: bool,
    pub depth_bias: DepthBiasFactors,
    pub cull_mode: CullFace,
    pub front_face: FrontFace,
}

impl Default for RasterizationState {
    fn default() -> Self {
        Self {
            depth_clamp_enable: false,
            depth_clip_enable: None,
            rasterizer_discard_enable: false,
            line_mode: LineRasterizationMode::Default,
            line_stipple_enable: false,
            polygon_mode: PolygonMode::Fill,
            provoking_vertex: ProvokingVertex::FirstVertex,
            line_width: 1.0,
            line_stipple_factor: 1,
            line_stipple_pattern: 0xffff,
            depth_bias_enable: false,
            depth_bias: DepthBiasFactors {
                constant: 0.0,
                clamp: 0.0,
                slope: 0.0,
            },
            cull_mode: CullFace::None,
            front_face: FrontFace::CounterClockwise,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DepthStencilState {
    pub depth_test_enable: bool,
    pub depth_write_enable: bool,
    pub depth_compare_op: CompareFunc,
    pub depth_bounds_test_enable: bool,
    pub min_depth_bounds: f32,
    pub max_depth_bounds: f32,
    pub stencil_test_enable: bool,
    pub front: StencilOpState,
    pub back: StencilOpState,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorBlendAttachment {
    pub blend_enable: bool,
    pub equation: ColorBlendEquation,
    pub write_mask: ColorMask,
}

impl Default for ColorBlendAttachment {
    fn default() -> Self {
        Self {
            blend_enable: false,
            equation: ColorBlendEquation {
                src_color: BlendFactor::One,
                dst_color: BlendFactor::Zero,
                color_op: BlendFunc::Add,
                src_alpha: BlendFactor::One,
                dst_alpha: BlendFactor::Zero,
                alpha_op: BlendFunc::Add,
            },
            write_mask: ColorMask::RGBA,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColorBlendState {
    pub logic_op_enable: bool,
    pub logic_op: LogicOp,
    /// Bit `i` set when attachment `i` may be written.
    pub color_write_enables: u8,
    pub attachments: Vec<ColorBlendAttachment>,
    pub blend_constants: [f32; 4],
}

impl Default for ColorBlendState {
    fn default() -> Self {
        Self {
            logic_op_enable: false,
            logic_op: LogicOp::Copy,
            color_write_enables: 0xff,
            attachments: Vec::new(),
            blend_constants: [0.0; 4],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MultisampleState {
    pub rasterization_samples: u32,
    pub sample_shading_enable: bool,
    pub min_sample_shading: f32,
    pub sample_mask: u32,
    pub alpha_to_coverage_enable: bool,
    pub alpha_to_one_enable: bool,
}

impl Default for MultisampleState {
    fn default() -> Self {
        Self {
            rasterization_samples: 1,
            sample_shading_enable: false,
            min_sample_shading: 0.0,
            sample_mask: !0,
            alpha_to_coverage_enable: false,
            alpha_to_one_enable: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VertexInputRate {
    Vertex,
    Instance,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexBindingDescription {
    pub binding: u32,
    pub stride: u32,
    pub input_rate: VertexInputRate,
    pub divisor: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexAttributeDescription {
    pub location: u32,
    pub binding: u32,
    pub format: Format,
    pub offset: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VertexInputState {
    pub bindings: Vec<VertexBindingDescription>,
    pub attributes: Vec<VertexAttributeDescription>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InputAssemblyState {
    pub topology: PrimType,
    pub primitive_restart_enable: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TessellationState {
    pub patch_control_points: u32,
    pub domain_origin_lower_left: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ViewportStateInfo {
    pub viewport_count: u32,
    pub scissor_count: u32,
    pub viewports: Vec<Viewport>,
    pub scissors: Vec<Rect2D>,
    pub depth_clip_negative_one_to_one: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GraphicsPipelineState {
    pub dynamic: DynamicStates,
    pub rs: Option<RasterizationState>,
    pub ds: Option<DepthStencilState>,
    pub cb: Option<ColorBlendState>,
    pub ms: Option<MultisampleState>,
    pub vi: Option<VertexInputState>,
    pub ia: Option<InputAssemblyState>,
    pub ts: Option<TessellationState>,
    pub vp: Option<ViewportStateInfo>,
    pub color_attachment_count: u32,
    /// Turn multisampling off while drawing lines.
    pub disable_multisample: bool,
    pub force_min_sample: bool,
}

impl GraphicsPipelineState {
    pub fn is_dynamic(&self, state: DynamicStates) -> bool {
        self.dynamic.contains(state)
    }
}
