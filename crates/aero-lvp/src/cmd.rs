//! The recorded command model: one [`Cmd`] variant per command kind.

use std::sync::Arc;

use aero_pipe::state::{
    BlendFactor, BlendFunc, ColorMask, CompareFunc, CullFace, LogicOp, PolygonMode, ShaderStage,
    ShaderStages, StencilOp,
};
use aero_pipe::PrimType;
use bitflags::bitflags;

use crate::descriptor::{DescriptorData, DescriptorUpdateTemplate, DescriptorWrite};
use crate::generated::GeneratedCommandsInfo;
use crate::graphics::{VertexAttributeDescription, VertexBindingDescription};
use crate::objects::{Buffer, CommandBuffer, Event, Image, ImageView, Pipeline, PipelineLayout, QueryPool, Shader};

/// "Rest of the buffer" size marker.
pub const WHOLE_SIZE: u64 = u64::MAX;
/// "Remaining levels/layers" count marker.
pub const REMAINING: u32 = u32::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineBindPoint {
    Graphics,
    Compute,
    ExecGraph,
}

impl PipelineBindPoint {
    pub const COUNT: usize = 3;

    pub const fn index(self) -> usize {
        self as usize
    }

    /// Bind point whose descriptor sets feed the stages in `stages`.
    pub fn from_stages(stages: ShaderStages) -> Vec<Self> {
        let mut points = Vec::with_capacity(2);
        if stages.intersects(ShaderStages::ALL_GRAPHICS) {
            points.push(Self::Graphics);
        }
        if stages.contains(ShaderStages::COMPUTE) {
            points.push(Self::Compute);
        }
        points
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum IndexType {
    U8,
    U16,
    #[default]
    U32,
}

impl IndexType {
    pub const fn size(self) -> u8 {
        match self {
            IndexType::U8 => 1,
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }

    /// Decode the raw index-type value stored in indirect token streams.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(IndexType::U16),
            1 => Some(IndexType::U32),
            1_000_265_000 => Some(IndexType::U8),
            _ => None,
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PipelineStageFlags: u32 {
        const TOP_OF_PIPE = 1 << 0;
        const DRAW_INDIRECT = 1 << 1;
        const VERTEX_INPUT = 1 << 2;
        const VERTEX_SHADER = 1 << 3;
        const FRAGMENT_SHADER = 1 << 7;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 10;
        const COMPUTE_SHADER = 1 << 11;
        const TRANSFER = 1 << 12;
        const BOTTOM_OF_PIPE = 1 << 13;
        const ALL_GRAPHICS = 1 << 15;
        const ALL_COMMANDS = 1 << 16;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ImageAspects: u32 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct QueryResultFlags: u32 {
        const RESULT_64 = 1 << 0;
        const WAIT = 1 << 1;
        const WITH_AVAILABILITY = 1 << 2;
        const PARTIAL = 1 << 3;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct QueryControlFlags: u32 {
        const PRECISE = 1 << 0;
    }
}

bitflags! {
    /// Counters selected by a pipeline-statistics query pool, in result order.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct QueryPipelineStatistics: u32 {
        const INPUT_ASSEMBLY_VERTICES = 1 << 0;
        const INPUT_ASSEMBLY_PRIMITIVES = 1 << 1;
        const VERTEX_SHADER_INVOCATIONS = 1 << 2;
        const GEOMETRY_SHADER_INVOCATIONS = 1 << 3;
        const GEOMETRY_SHADER_PRIMITIVES = 1 << 4;
        const CLIPPING_INVOCATIONS = 1 << 5;
        const CLIPPING_PRIMITIVES = 1 << 6;
        const FRAGMENT_SHADER_INVOCATIONS = 1 << 7;
        const TESS_CONTROL_PATCHES = 1 << 8;
        const TESS_EVALUATION_INVOCATIONS = 1 << 9;
        const COMPUTE_SHADER_INVOCATIONS = 1 << 10;
        const TASK_SHADER_INVOCATIONS = 1 << 11;
        const MESH_SHADER_INVOCATIONS = 1 << 12;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct StencilFaces: u32 {
        const FRONT = 1 << 0;
        const BACK = 1 << 1;
        const FRONT_AND_BACK = Self::FRONT.bits() | Self::BACK.bits();
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct RenderingFlags: u32 {
        const SUSPENDING = 1 << 1;
        const RESUMING = 1 << 2;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FrontFace {
    #[default]
    CounterClockwise,
    Clockwise,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ProvokingVertex {
    #[default]
    FirstVertex,
    LastVertex,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LineRasterizationMode {
    #[default]
    Default,
    Rectangular,
    Bresenham,
    RectangularSmooth,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TessDomainOrigin {
    #[default]
    UpperLeft,
    LowerLeft,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StencilOpState {
    pub fail_op: StencilOp,
    pub pass_op: StencilOp,
    pub depth_fail_op: StencilOp,
    pub compare_op: CompareFunc,
    pub compare_mask: u32,
    pub write_mask: u32,
    pub reference: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColorBlendEquation {
    pub src_color: BlendFactor,
    pub dst_color: BlendFactor,
    pub color_op: BlendFunc,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
    pub alpha_op: BlendFunc,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Offset2D {
    pub x: i32,
    pub y: i32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Extent2D {
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rect2D {
    pub offset: Offset2D,
    pub extent: Extent2D,
}

impl Rect2D {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            offset: Offset2D { x, y },
            extent: Extent2D { width, height },
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Offset3D {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Extent3D {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageSubresourceLayers {
    pub aspects: ImageAspects,
    pub mip_level: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageSubresourceRange {
    pub aspects: ImageAspects,
    pub base_mip_level: u32,
    pub level_count: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

/// A clear color as raw bits; float colors go through [`ClearValue::color_f32`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClearValue {
    Color([u32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

impl Default for ClearValue {
    fn default() -> Self {
        ClearValue::Color([0; 4])
    }
}

impl ClearValue {
    pub fn color_f32(c: [f32; 4]) -> Self {
        ClearValue::Color(c.map(f32::to_bits))
    }

    pub fn color_bits(&self) -> [u32; 4] {
        match *self {
            ClearValue::Color(bits) => bits,
            ClearValue::DepthStencil { .. } => [0; 4],
        }
    }

    pub fn depth(&self) -> f32 {
        match *self {
            ClearValue::DepthStencil { depth, .. } => depth,
            ClearValue::Color(_) => 0.0,
        }
    }

    pub fn stencil(&self) -> u32 {
        match *self {
            ClearValue::DepthStencil { stencil, .. } => stencil,
            ClearValue::Color(_) => 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ImageLayout {
    #[default]
    General,
    ColorAttachment,
    DepthStencilAttachment,
    DepthStencilReadOnly,
    DepthReadOnlyStencilAttachment,
    DepthAttachmentStencilReadOnly,
    DepthReadOnly,
    StencilReadOnly,
}

impl ImageLayout {
    pub fn depth_read_only(self) -> bool {
        matches!(
            self,
            ImageLayout::DepthStencilReadOnly
                | ImageLayout::DepthReadOnlyStencilAttachment
                | ImageLayout::DepthReadOnly
        )
    }

    pub fn stencil_read_only(self) -> bool {
        matches!(
            self,
            ImageLayout::DepthStencilReadOnly
                | ImageLayout::DepthAttachmentStencilReadOnly
                | ImageLayout::StencilReadOnly
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoadOp {
    Load,
    Clear,
    #[default]
    DontCare,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StoreOp {
    #[default]
    Store,
    DontCare,
    None,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResolveMode {
    #[default]
    None,
    SampleZero,
    Average,
    Min,
    Max,
}

#[derive(Clone, Debug, Default)]
pub struct RenderingAttachmentInfo {
    pub view: Option<Arc<ImageView>>,
    pub layout: ImageLayout,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub clear_value: ClearValue,
    pub resolve_mode: ResolveMode,
    pub resolve_view: Option<Arc<ImageView>>,
}

#[derive(Clone, Debug, Default)]
pub struct RenderingInfo {
    pub flags: RenderingFlags,
    pub render_area: Rect2D,
    pub layer_count: u32,
    pub view_mask: u32,
    pub color_attachments: Vec<RenderingAttachmentInfo>,
    pub depth_attachment: Option<RenderingAttachmentInfo>,
    pub stencil_attachment: Option<RenderingAttachmentInfo>,
    /// Render single-sampled attachments through hidden multisampled
    /// shadows with this many samples.
    pub multisampled_render_to_single_sampled: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct VertexBinding {
    pub buffer: Option<Arc<Buffer>>,
    pub offset: u64,
    /// `None` binds the rest of the buffer without a sub-range wrapper.
    pub size: Option<u64>,
    /// `None` keeps the stride from the pipeline.
    pub stride: Option<u32>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MultiDrawInfo {
    pub first_vertex: u32,
    pub vertex_count: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MultiDrawIndexedInfo {
    pub first_index: u32,
    pub index_count: u32,
    pub vertex_offset: i32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferCopy {
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageCopy {
    pub src_subresource: ImageSubresourceLayers,
    pub src_offset: Offset3D,
    pub dst_subresource: ImageSubresourceLayers,
    pub dst_offset: Offset3D,
    pub extent: Extent3D,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferImageCopy {
    pub buffer_offset: u64,
    /// Texels per row in the buffer; 0 means tightly packed.
    pub buffer_row_length: u32,
    /// Rows per image in the buffer; 0 means tightly packed.
    pub buffer_image_height: u32,
    pub image_subresource: ImageSubresourceLayers,
    pub image_offset: Offset3D,
    pub image_extent: Extent3D,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageBlit {
    pub src_subresource: ImageSubresourceLayers,
    pub src_offsets: [Offset3D; 2],
    pub dst_subresource: ImageSubresourceLayers,
    pub dst_offsets: [Offset3D; 2],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageResolve {
    pub src_subresource: ImageSubresourceLayers,
    pub src_offset: Offset3D,
    pub dst_subresource: ImageSubresourceLayers,
    pub dst_offset: Offset3D,
    pub extent: Extent3D,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Filter {
    #[default]
    Nearest,
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClearAttachment {
    pub aspects: ImageAspects,
    pub color_attachment: u32,
    pub value: ClearValue,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClearRect {
    pub rect: Rect2D,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

#[derive(Clone, Debug)]
pub struct XfbBuffer {
    pub buffer: Arc<Buffer>,
    pub offset: u64,
    pub size: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct XfbCounter {
    pub buffer: Arc<Buffer>,
    pub offset: u64,
}

#[derive(Clone, Debug)]
pub struct IndirectBuffer {
    pub buffer: Arc<Buffer>,
    pub offset: u64,
}

impl IndirectBuffer {
    pub fn new(buffer: &Arc<Buffer>, offset: u64) -> Self {
        Self {
            buffer: buffer.clone(),
            offset,
        }
    }
}

/// One recorded command.
#[derive(Clone, Debug)]
pub enum Cmd {
    BindPipeline {
        bind_point: PipelineBindPoint,
        pipeline: Arc<Pipeline>,
    },
    BindPipelineShaderGroup {
        bind_point: PipelineBindPoint,
        pipeline: Arc<Pipeline>,
        group: u32,
    },
    BindShaders {
        shaders: Vec<(ShaderStage, Option<Arc<Shader>>)>,
    },

    SetViewport { first: u32, viewports: Vec<Viewport> },
    SetViewportWithCount(Vec<Viewport>),
    SetScissor { first: u32, scissors: Vec<Rect2D> },
    SetScissorWithCount(Vec<Rect2D>),
    SetLineWidth(f32),
    SetDepthBias { constant: f32, clamp: f32, slope: f32 },
    SetBlendConstants([f32; 4]),
    SetDepthBounds { min: f32, max: f32 },
    SetStencilCompareMask { faces: StencilFaces, mask: u32 },
    SetStencilWriteMask { faces: StencilFaces, mask: u32 },
    SetStencilReference { faces: StencilFaces, reference: u32 },
    SetCullMode(CullFace),
    SetFrontFace(FrontFace),
    SetPrimitiveTopology(PrimType),
    SetDepthTestEnable(bool),
    SetDepthWriteEnable(bool),
    SetDepthCompareOp(CompareFunc),
    SetDepthBoundsTestEnable(bool),
    SetStencilTestEnable(bool),
    SetStencilOp {
        faces: StencilFaces,
        fail_op: StencilOp,
        pass_op: StencilOp,
        depth_fail_op: StencilOp,
        compare_op: CompareFunc,
    },
    SetLineStipple { factor: u32, pattern: u16 },
    SetLineStippleEnable(bool),
    SetDepthBiasEnable(bool),
    SetLogicOp(LogicOp),
    SetLogicOpEnable(bool),
    SetPatchControlPoints(u32),
    SetPrimitiveRestartEnable(bool),
    SetRasterizerDiscardEnable(bool),
    SetColorWriteEnable(Vec<bool>),
    SetPolygonMode(PolygonMode),
    SetTessellationDomainOrigin(TessDomainOrigin),
    SetDepthClampEnable(bool),
    SetDepthClipEnable(bool),
    SetSampleMask(u32),
    SetRasterizationSamples(u32),
    SetAlphaToCoverageEnable(bool),
    SetAlphaToOneEnable(bool),
    SetDepthClipNegativeOneToOne(bool),
    SetLineRasterizationMode(LineRasterizationMode),
    SetProvokingVertexMode(ProvokingVertex),
    SetColorBlendEnable { first: u32, enables: Vec<bool> },
    SetColorBlendEquation { first: u32, equations: Vec<ColorBlendEquation> },
    SetColorWriteMask { first: u32, masks: Vec<ColorMask> },
    SetVertexInput {
        bindings: Vec<VertexBindingDescription>,
        attributes: Vec<VertexAttributeDescription>,
    },
    SetAttachmentFeedbackLoopEnable(bool),
    SetDeviceMask(u32),

    BindVertexBuffers { first: u32, bindings: Vec<VertexBinding> },
    BindIndexBuffer {
        buffer: Option<Arc<Buffer>>,
        offset: u64,
        size: Option<u64>,
        index_type: IndexType,
    },
    BindDescriptorSets {
        stages: ShaderStages,
        layout: Arc<PipelineLayout>,
        first_set: u32,
        sets: Vec<Option<Arc<crate::descriptor::DescriptorSet>>>,
        dynamic_offsets: Vec<u32>,
    },
    PushDescriptorSet {
        stages: ShaderStages,
        layout: Arc<PipelineLayout>,
        set: u32,
        writes: Vec<DescriptorWrite>,
    },
    PushDescriptorSetWithTemplate {
        template: Arc<DescriptorUpdateTemplate>,
        layout: Arc<PipelineLayout>,
        set: u32,
        data: Vec<DescriptorData>,
    },
    BindDescriptorBuffers { addresses: Vec<u64> },
    SetDescriptorBufferOffsets {
        stages: ShaderStages,
        layout: Arc<PipelineLayout>,
        first_set: u32,
        buffer_indices: Vec<u32>,
        offsets: Vec<u64>,
    },
    BindDescriptorBufferEmbeddedSamplers {
        stages: ShaderStages,
        layout: Arc<PipelineLayout>,
        set: u32,
    },
    PushConstants {
        stages: ShaderStages,
        offset: u32,
        values: Vec<u8>,
    },

    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    DrawMulti {
        draws: Vec<MultiDrawInfo>,
        instance_count: u32,
        first_instance: u32,
    },
    DrawMultiIndexed {
        draws: Vec<MultiDrawIndexedInfo>,
        instance_count: u32,
        first_instance: u32,
        /// Overrides every draw's vertex offset when set.
        vertex_offset: Option<i32>,
    },
    DrawIndirect {
        indirect: IndirectBuffer,
        draw_count: u32,
        stride: u32,
    },
    DrawIndexedIndirect {
        indirect: IndirectBuffer,
        draw_count: u32,
        stride: u32,
    },
    DrawIndirectCount {
        indirect: IndirectBuffer,
        count: IndirectBuffer,
        max_draw_count: u32,
        stride: u32,
    },
    DrawIndexedIndirectCount {
        indirect: IndirectBuffer,
        count: IndirectBuffer,
        max_draw_count: u32,
        stride: u32,
    },
    DrawIndirectByteCount {
        instance_count: u32,
        first_instance: u32,
        counter: IndirectBuffer,
        counter_offset: u32,
        vertex_stride: u32,
    },
    DrawMeshTasks { x: u32, y: u32, z: u32 },
    DrawMeshTasksIndirect {
        indirect: IndirectBuffer,
        draw_count: u32,
        stride: u32,
    },
    DrawMeshTasksIndirectCount {
        indirect: IndirectBuffer,
        count: IndirectBuffer,
        max_draw_count: u32,
        stride: u32,
    },
    Dispatch { x: u32, y: u32, z: u32 },
    DispatchBase { base: [u32; 3], groups: [u32; 3] },
    DispatchIndirect { indirect: IndirectBuffer },

    BeginRendering(Box<RenderingInfo>),
    EndRendering,

    CopyBuffer {
        src: Arc<Buffer>,
        dst: Arc<Buffer>,
        regions: Vec<BufferCopy>,
    },
    CopyImage {
        src: Arc<Image>,
        dst: Arc<Image>,
        regions: Vec<ImageCopy>,
    },
    CopyBufferToImage {
        src: Arc<Buffer>,
        dst: Arc<Image>,
        regions: Vec<BufferImageCopy>,
    },
    CopyImageToBuffer {
        src: Arc<Image>,
        dst: Arc<Buffer>,
        regions: Vec<BufferImageCopy>,
    },
    BlitImage {
        src: Arc<Image>,
        dst: Arc<Image>,
        regions: Vec<ImageBlit>,
        filter: Filter,
    },
    ResolveImage {
        src: Arc<Image>,
        dst: Arc<Image>,
        regions: Vec<ImageResolve>,
    },
    FillBuffer {
        dst: Arc<Buffer>,
        offset: u64,
        size: u64,
        data: u32,
    },
    UpdateBuffer {
        dst: Arc<Buffer>,
        offset: u64,
        data: Vec<u8>,
    },
    ClearColorImage {
        image: Arc<Image>,
        color: ClearValue,
        ranges: Vec<ImageSubresourceRange>,
    },
    ClearDepthStencilImage {
        image: Arc<Image>,
        depth: f32,
        stencil: u32,
        ranges: Vec<ImageSubresourceRange>,
    },
    ClearAttachments {
        attachments: Vec<ClearAttachment>,
        rects: Vec<ClearRect>,
    },

    PipelineBarrier,
    SetEvent { event: Arc<Event>, stages: PipelineStageFlags },
    ResetEvent { event: Arc<Event>, stages: PipelineStageFlags },
    WaitEvents { events: Vec<Arc<Event>> },

    BeginQuery {
        pool: Arc<QueryPool>,
        query: u32,
        index: u32,
        flags: QueryControlFlags,
    },
    EndQuery {
        pool: Arc<QueryPool>,
        query: u32,
        index: u32,
    },
    ResetQueryPool {
        pool: Arc<QueryPool>,
        first: u32,
        count: u32,
    },
    WriteTimestamp {
        pool: Arc<QueryPool>,
        query: u32,
        stage: PipelineStageFlags,
    },
    CopyQueryPoolResults {
        pool: Arc<QueryPool>,
        first: u32,
        count: u32,
        dst: Arc<Buffer>,
        dst_offset: u64,
        stride: u64,
        flags: QueryResultFlags,
    },

    BindTransformFeedbackBuffers { first: u32, buffers: Vec<XfbBuffer> },
    BeginTransformFeedback {
        first_counter: u32,
        counters: Vec<Option<XfbCounter>>,
    },
    EndTransformFeedback {
        first_counter: u32,
        counters: Vec<Option<XfbCounter>>,
    },

    BeginConditionalRendering {
        buffer: Arc<Buffer>,
        offset: u64,
        inverted: bool,
    },
    EndConditionalRendering,

    ExecuteCommands(Vec<Arc<CommandBuffer>>),
    PreprocessGeneratedCommands(Arc<GeneratedCommandsInfo>),
    ExecuteGeneratedCommands {
        info: Arc<GeneratedCommandsInfo>,
        is_preprocessed: bool,
    },
}

impl Cmd {
    /// Short command name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Cmd::BindPipeline { .. } => "bind_pipeline",
            Cmd::BindPipelineShaderGroup { .. } => "bind_pipeline_shader_group",
            Cmd::BindShaders { .. } => "bind_shaders",
            Cmd::SetViewport { .. } => "set_viewport",
            Cmd::SetViewportWithCount(_) => "set_viewport_with_count",
            Cmd::SetScissor { .. } => "set_scissor",
            Cmd::SetScissorWithCount(_) => "set_scissor_with_count",
            Cmd::SetLineWidth(_) => "set_line_width",
            Cmd::SetDepthBias { .. } => "set_depth_bias",
            Cmd::SetBlendConstants(_) => "set_blend_constants",
            Cmd::SetDepthBounds { .. } => "set_depth_bounds",
            Cmd::SetStencilCompareMask { .. } => "set_stencil_compare_mask",
            Cmd::SetStencilWriteMask { .. } => "set_stencil_write_mask",
            Cmd::SetStencilReference { .. } => "set_stencil_reference",
            Cmd::SetCullMode(_) => "set_cull_mode",
            Cmd::SetFrontFace(_) => "set_front_face",
            Cmd::SetPrimitiveTopology(_) => "set_primitive_topology",
            Cmd::SetDepthTestEnable(_) => "set_depth_test_enable",
            Cmd::SetDepthWriteEnable(_) => "set_depth_write_enable",
            Cmd::SetDepthCompareOp(_) => "set_depth_compare_op",
            Cmd::SetDepthBoundsTestEnable(_) => "set_depth_bounds_test_enable",
            Cmd::SetStencilTestEnable(_) => "set_stencil_test_enable",
            Cmd::SetStencilOp { .. } => "set_stencil_op",
            Cmd::SetLineStipple { .. } => "set_line_stipple",
            Cmd::SetLineStippleEnable(_) => "set_line_stipple_enable",
            Cmd::SetDepthBiasEnable(_) => "set_depth_bias_enable",
            Cmd::SetLogicOp(_) => "set_logic_op",
            Cmd::SetLogicOpEnable(_) => "set_logic_op_enable",
            Cmd::SetPatchControlPoints(_) => "set_patch_control_points",
            Cmd::SetPrimitiveRestartEnable(_) => "set_primitive_restart_enable",
            Cmd::SetRasterizerDiscardEnable(_) => "set_rasterizer_discard_enable",
            Cmd::SetColorWriteEnable(_) => "set_color_write_enable",
            Cmd::SetPolygonMode(_) => "set_polygon_mode",
            Cmd::SetTessellationDomainOrigin(_) => "set_tessellation_domain_origin",
            Cmd::SetDepthClampEnable(_) => "set_depth_clamp_enable",
            Cmd::SetDepthClipEnable(_) => "set_depth_clip_enable",
            Cmd::SetSampleMask(_) => "set_sample_mask",
            Cmd::SetRasterizationSamples(_) => "set_rasterization_samples",
            Cmd::SetAlphaToCoverageEnable(_) => "set_alpha_to_coverage_enable",
            Cmd::SetAlphaToOneEnable(_) => "set_alpha_to_one_enable",
            Cmd::SetDepthClipNegativeOneToOne(_) => "set_depth_clip_negative_one_to_one",
            Cmd::SetLineRasterizationMode(_) => "set_line_rasterization_mode",
            Cmd::SetProvokingVertexMode(_) => "set_provoking_vertex_mode",
            Cmd::SetColorBlendEnable { .. } => "set_color_blend_enable",
            Cmd::SetColorBlendEquation { .. } => "set_color_blend_equation",
            Cmd::SetColorWriteMask { .. } => "set_color_write_mask",
            Cmd::SetVertexInput { .. } => "set_vertex_input",
            Cmd::SetAttachmentFeedbackLoopEnable(_) => "set_attachment_feedback_loop_enable",
            Cmd::SetDeviceMask(_) => "set_device_mask",
            Cmd::BindVertexBuffers { .. } => "bind_vertex_buffers",
            Cmd::BindIndexBuffer { .. } => "bind_index_buffer",
            Cmd::BindDescriptorSets { .. } => "bind_descriptor_sets",
            Cmd::PushDescriptorSet { .. } => "push_descriptor_set",
            Cmd::PushDescriptorSetWithTemplate { .. } => "push_descriptor_set_with_template",
            Cmd::BindDescriptorBuffers { .. } => "bind_descriptor_buffers",
            Cmd::SetDescriptorBufferOffsets { .. } => "set_descriptor_buffer_offsets",
            Cmd::BindDescriptorBufferEmbeddedSamplers { .. } => {
                "bind_descriptor_buffer_embedded_samplers"
            }
            Cmd::PushConstants { .. } => "push_constants",
            Cmd::Draw { .. } => "draw",
            Cmd::DrawIndexed { .. } => "draw_indexed",
            Cmd::DrawMulti { .. } => "draw_multi",
            Cmd::DrawMultiIndexed { .. } => "draw_multi_indexed",
            Cmd::DrawIndirect { .. } => "draw_indirect",
            Cmd::DrawIndexedIndirect { .. } => "draw_indexed_indirect",
            Cmd::DrawIndirectCount { .. } => "draw_indirect_count",
            Cmd::DrawIndexedIndirectCount { .. } => "draw_indexed_indirect_count",
            Cmd::DrawIndirectByteCount { .. } => "draw_indirect_byte_count",
            Cmd::DrawMeshTasks { .. } => "draw_mesh_tasks",
            Cmd::DrawMeshTasksIndirect { .. } => "draw_mesh_tasks_indirect",
            Cmd::DrawMeshTasksIndirectCount { .. } => "draw_mesh_tasks_indirect_count",
            Cmd::Dispatch { .. } => "dispatch",
            Cmd::DispatchBase { .. } => "dispatch_base",
            Cmd::DispatchIndirect { .. } => "dispatch_indirect",
            Cmd::BeginRendering(_) => "begin_rendering",
            Cmd::EndRendering => "end_rendering",
            Cmd::CopyBuffer { .. } => "copy_buffer",
            Cmd::CopyImage { .. } => "copy_image",
            Cmd::CopyBufferToImage { .. } => "copy_buffer_to_image",
            Cmd::CopyImageToBuffer { .. } => "copy_image_to_buffer",
            Cmd::BlitImage { .. } => "blit_image",
            Cmd::ResolveImage { .. } => "resolve_image",
            Cmd::FillBuffer { .. } => "fill_buffer",
            Cmd::UpdateBuffer { .. } => "update_buffer",
            Cmd::ClearColorImage { .. } => "clear_color_image",
            Cmd::ClearDepthStencilImage { .. } => "clear_depth_stencil_image",
            Cmd::ClearAttachments { .. } => "clear_attachments",
            Cmd::PipelineBarrier => "pipeline_barrier",
            Cmd::SetEvent { .. } => "set_event",
            Cmd::ResetEvent { .. } => "reset_event",
            Cmd::WaitEvents { .. } => "wait_events",
            Cmd::BeginQuery { .. } => "begin_query",
            Cmd::EndQuery { .. } => "end_query",
            Cmd::ResetQueryPool { .. } => "reset_query_pool",
            Cmd::WriteTimestamp { .. } => "write_timestamp",
            Cmd::CopyQueryPoolResults { .. } => "copy_query_pool_results",
            Cmd::BindTransformFeedbackBuffers { .. } => "bind_transform_feedback_buffers",
            Cmd::BeginTransformFeedback { .. } => "begin_transform_feedback",
            Cmd::EndTransformFeedback { .. } => "end_transform_feedback",
            Cmd::BeginConditionalRendering { .. } => "begin_conditional_rendering",
            Cmd::EndConditionalRendering => "end_conditional_rendering",
            Cmd::ExecuteCommands(_) => "execute_commands",
            Cmd::PreprocessGeneratedCommands(_) => "preprocess_generated_commands",
            Cmd::ExecuteGeneratedCommands { .. } => "execute_generated_commands",
        }
    }
}
