//! Blit path selection and the shader-based blit fallback.
//!
//! A blit takes the fixed-function copy engine only when no disqualifier in
//! [`select_blit_path`] applies. Every disqualifier is checked in a fixed
//! order and the first hit is reported, so callers and logs can tell why a
//! blit went through the 3D pipeline.

use std::sync::Arc;

use bitflags::bitflags;
use tracing::{debug, warn};

use crate::cache::{CacheStats, SlotCache};
use crate::context::{CsoHandle, PipeBox, PipeContext};
use crate::draw::{DrawInfo, DrawStartCountBias, PrimType};
use crate::format::{Format, TextureTarget};
use crate::resource::{Resource, SamplerView, SamplerViewTemplate, SurfaceTemplate};
use crate::state::{
    BlendState, ColorMask, CompareFunc, DepthStencilAlphaState, FramebufferState, RasterizerState,
    ScissorState, ShaderStage, ShaderState, StencilOp, StencilState, VertexBuffer, VertexElement,
    VertexElements, ViewportState,
};

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct BlitMask: u32 {
        const R = 1 << 0;
        const G = 1 << 1;
        const B = 1 << 2;
        const A = 1 << 3;
        const Z = 1 << 4;
        const S = 1 << 5;
        const RGBA = Self::R.bits() | Self::G.bits() | Self::B.bits() | Self::A.bits();
        const ZS = Self::Z.bits() | Self::S.bits();
    }
}

impl BlitMask {
    /// Channels present in `format`.
    pub fn of_format(format: Format) -> Self {
        let mut mask = BlitMask::empty();
        if format.has_depth() {
            mask |= BlitMask::Z;
        }
        if format.has_stencil() {
            mask |= BlitMask::S;
        }
        if mask.is_empty() {
            mask = BlitMask::RGBA;
        }
        mask
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlitFilter {
    #[default]
    Nearest,
    Linear,
}

/// One side of a blit.
#[derive(Clone, Debug, PartialEq)]
pub struct BlitSurface {
    pub resource: Arc<Resource>,
    pub level: u32,
    pub region: PipeBox,
    pub format: Format,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BlitInfo {
    pub dst: BlitSurface,
    pub src: BlitSurface,
    pub mask: BlitMask,
    pub filter: BlitFilter,
    pub scissor_enable: bool,
    pub scissor: ScissorState,
    pub num_window_rectangles: u8,
    pub render_condition_enable: bool,
    /// Resolve from sample 0 instead of averaging.
    pub sample0_only: bool,
}

/// Per-format capability bits of a fixed-function copy engine.
///
/// Each field is a bitset indexed by [`Format::index`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineFormatTable {
    pub supported: u32,
    pub faithful_dst: u32,
    pub faithful_src: u32,
    pub luminance: u32,
    pub intensity: u32,
}

const fn format_bits(formats: &[Format]) -> u32 {
    let mut bits = 0;
    let mut i = 0;
    while i < formats.len() {
        bits |= 1 << formats[i].index();
        i += 1;
    }
    bits
}

impl EngineFormatTable {
    /// Capabilities of the reference copy engine.
    pub const DEFAULT: Self = Self {
        supported: format_bits(&[
            Format::R8Unorm,
            Format::R8G8Unorm,
            Format::R8G8B8A8Unorm,
            Format::R8G8B8A8Srgb,
            Format::B8G8R8A8Unorm,
            Format::R8G8B8A8Uint,
            Format::R16Uint,
            Format::R32Uint,
            Format::R32Float,
            Format::R32G32Float,
            Format::R32G32B32A32Float,
            Format::R32G32B32A32Uint,
            Format::L8Unorm,
            Format::I8Unorm,
            Format::A8Unorm,
        ]),
        faithful_dst: format_bits(&[
            Format::R8G8B8A8Unorm,
            Format::B8G8R8A8Unorm,
            Format::R8G8B8A8Srgb,
            Format::R32G32B32A32Float,
            Format::R32Float,
            Format::R8Unorm,
        ]),
        faithful_src: format_bits(&[
            Format::R8G8B8A8Unorm,
            Format::B8G8R8A8Unorm,
            Format::R8G8B8A8Srgb,
            Format::R32G32B32A32Float,
            Format::R32Float,
            Format::R8Unorm,
            Format::L8Unorm,
        ]),
        luminance: format_bits(&[Format::L8Unorm]),
        intensity: format_bits(&[Format::I8Unorm]),
    };

    fn has(bits: u32, format: Format) -> bool {
        bits & (1 << format.index()) != 0
    }

    pub fn is_supported(&self, format: Format) -> bool {
        Self::has(self.supported, format)
    }

    /// Whether the engine can convert `src` into `dst` without loss.
    pub fn can_convert(&self, src: Format, dst: Format) -> bool {
        if src == dst {
            return self.is_supported(src);
        }
        self.is_supported(src)
            && self.is_supported(dst)
            && Self::has(self.faithful_dst, dst)
            && Self::has(self.faithful_src, src)
            && Self::has(self.luminance, src) == Self::has(self.luminance, dst)
            && Self::has(self.intensity, src) == Self::has(self.intensity, dst)
    }
}

impl Default for EngineFormatTable {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Reason a blit cannot use the fixed-function copy engine, in check order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlitDisqualifier {
    PartialDepthStencilMask,
    FloatDepth,
    FilteredDepthStencil,
    SampleCountMismatch,
    Layout3D,
    DepthMismatch,
    FormatConversion,
    PartialColorMask,
    WindowRectangles,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlitPath {
    /// Nothing to do: empty region or no channel selected.
    Skip,
    Engine2D,
    Shader3D(BlitDisqualifier),
}

/// Decide how `info` is carried out.
pub fn select_blit_path(info: &BlitInfo, table: &EngineFormatTable) -> BlitPath {
    if info.dst.region.is_empty() || info.src.region.is_empty() || info.mask.is_empty() {
        return BlitPath::Skip;
    }
    match first_disqualifier(info, table) {
        Some(reason) => BlitPath::Shader3D(reason),
        None => BlitPath::Engine2D,
    }
}

fn first_disqualifier(info: &BlitInfo, table: &EngineFormatTable) -> Option<BlitDisqualifier> {
    let dst_format = info.dst.format;
    let src_res = info.src.resource.template();
    let dst_res = info.dst.resource.template();

    if dst_format.is_depth_or_stencil() {
        if (info.mask & BlitMask::ZS) != BlitMask::of_format(dst_format) {
            return Some(BlitDisqualifier::PartialDepthStencilMask);
        }
        if dst_format.is_float_depth() {
            return Some(BlitDisqualifier::FloatDepth);
        }
        if info.filter != BlitFilter::Nearest {
            return Some(BlitDisqualifier::FilteredDepthStencil);
        }
    }

    if src_res.samples() > dst_res.samples() {
        return Some(BlitDisqualifier::SampleCountMismatch);
    }
    if src_res.target.is_layout_3d() || dst_res.target.is_layout_3d() {
        return Some(BlitDisqualifier::Layout3D);
    }

    if info.src.region.depth != info.dst.region.depth {
        return Some(BlitDisqualifier::DepthMismatch);
    }

    if !dst_format.is_depth_or_stencil() {
        if !table.can_convert(info.src.format, dst_format) {
            return Some(BlitDisqualifier::FormatConversion);
        }
        if !info.mask.contains(BlitMask::RGBA) {
            return Some(BlitDisqualifier::PartialColorMask);
        }
    }

    if info.num_window_rectangles > 0 {
        return Some(BlitDisqualifier::WindowRectangles);
    }
    None
}

/// What the blit fragment program outputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlitProgramMode {
    Color,
    ColorUint,
    Depth,
    Stencil,
    DepthStencil,
}

impl BlitProgramMode {
    const COUNT: usize = 5;

    pub fn for_blit(info: &BlitInfo) -> Self {
        let zs = info.mask & BlitMask::ZS;
        if zs == BlitMask::ZS {
            BlitProgramMode::DepthStencil
        } else if zs == BlitMask::Z {
            BlitProgramMode::Depth
        } else if zs == BlitMask::S {
            BlitProgramMode::Stencil
        } else if info.dst.format.is_pure_integer() {
            BlitProgramMode::ColorUint
        } else {
            BlitProgramMode::Color
        }
    }
}

/// Sampler dimensionality classes the blit program is specialized for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TargetClass {
    OneD,
    TwoD,
    TwoDArray,
    ThreeD,
    Multisample,
}

impl TargetClass {
    const COUNT: usize = 5;

    pub fn of(res: &Resource) -> Self {
        if res.nr_samples() > 1 {
            return TargetClass::Multisample;
        }
        match res.target() {
            TextureTarget::Buffer | TextureTarget::Texture1D | TextureTarget::Texture1DArray => {
                TargetClass::OneD
            }
            TextureTarget::Texture3D => TargetClass::ThreeD,
            TextureTarget::Texture2DArray
            | TextureTarget::TextureCube
            | TextureTarget::TextureCubeArray => TargetClass::TwoDArray,
            TextureTarget::Texture2D | TextureTarget::TextureRect => TargetClass::TwoD,
        }
    }
}

const PASSTHROUGH_VS_SLOT: usize = BlitProgramMode::COUNT * TargetClass::COUNT;

/// Screen-lifetime table of blit programs keyed by mode × target class.
#[derive(Debug)]
pub struct BlitProgramCache {
    programs: SlotCache<CsoHandle>,
}

impl Default for BlitProgramCache {
    fn default() -> Self {
        Self {
            programs: SlotCache::new(PASSTHROUGH_VS_SLOT + 1),
        }
    }
}

impl BlitProgramCache {
    fn slot(mode: BlitProgramMode, class: TargetClass) -> usize {
        mode as usize * TargetClass::COUNT + class as usize
    }

    pub fn fragment(
        &self,
        mode: BlitProgramMode,
        class: TargetClass,
        create: impl FnOnce() -> Option<CsoHandle>,
    ) -> Option<CsoHandle> {
        self.programs
            .get_or_create(Self::slot(mode, class), create)
            .copied()
    }

    pub fn passthrough_vertex(&self, create: impl FnOnce() -> Option<CsoHandle>) -> Option<CsoHandle> {
        self.programs
            .get_or_create(PASSTHROUGH_VS_SLOT, create)
            .copied()
    }

    pub fn stats(&self) -> CacheStats {
        self.programs.stats()
    }
}

/// Opaque program words for the generated blit shaders.
fn blit_program_ir(mode: BlitProgramMode, class: TargetClass) -> Arc<[u32]> {
    Arc::from(vec![0xb117_0000, mode as u32, class as u32])
}

fn passthrough_vs_ir() -> Arc<[u32]> {
    Arc::from(vec![0xb117_0001])
}

/// Pipeline state a backend hands to the blitter so it can be restored.
#[derive(Clone, Debug, Default)]
pub struct SavedPipeState {
    pub blend: Option<CsoHandle>,
    pub rasterizer: Option<CsoHandle>,
    pub depth_stencil_alpha: Option<CsoHandle>,
    pub vertex_elements: Option<CsoHandle>,
    pub vertex_shader: Option<CsoHandle>,
    pub fragment_shader: Option<CsoHandle>,
    pub framebuffer: FramebufferState,
    pub viewport: ViewportState,
    pub scissor: ScissorState,
    pub vertex_buffers: Vec<VertexBuffer>,
    pub fragment_views: Vec<Option<Arc<SamplerView>>>,
}

/// Run `info` as a full-screen-triangle draw.
///
/// Blend, rasterizer and depth-stencil state are forced to a disabled baseline
/// for the draw and `saved` is re-bound afterwards. Returns `false` when an
/// object needed for the blit could not be created; the blit is then skipped.
pub fn shader_blit<C: PipeContext + ?Sized>(ctx: &mut C, info: &BlitInfo, saved: &SavedPipeState) -> bool {
    let screen = ctx.screen().clone();
    let mode = BlitProgramMode::for_blit(info);
    let class = TargetClass::of(&info.src.resource);

    let Some(fs) = screen.blit_programs().fragment(mode, class, || {
        ctx.create_shader_state(&ShaderState {
            stage: ShaderStage::Fragment,
            ir: blit_program_ir(mode, class),
            inline_values: None,
            tess_ccw: false,
        })
    }) else {
        warn!(?mode, ?class, "failed to create blit fragment program");
        return false;
    };
    let Some(vs) = screen.blit_programs().passthrough_vertex(|| {
        ctx.create_shader_state(&ShaderState {
            stage: ShaderStage::Vertex,
            ir: passthrough_vs_ir(),
            inline_values: None,
            tess_ccw: false,
        })
    }) else {
        warn!("failed to create blit vertex program");
        return false;
    };

    let writes_color = mode == BlitProgramMode::Color || mode == BlitProgramMode::ColorUint;
    let mut blend = BlendState::disabled();
    blend.rt[0].colormask = if writes_color {
        ColorMask::from_bits_truncate((info.mask & BlitMask::RGBA).bits() as u8)
    } else {
        ColorMask::empty()
    };
    let rasterizer = RasterizerState {
        scissor: info.scissor_enable,
        ..RasterizerState::disabled()
    };
    let mut dsa = DepthStencilAlphaState::default();
    if info.mask.contains(BlitMask::Z) {
        dsa.depth_enabled = true;
        dsa.depth_writemask = true;
        dsa.depth_func = CompareFunc::Always;
    }
    if info.mask.contains(BlitMask::S) {
        dsa.stencil[0] = StencilState {
            enabled: true,
            func: CompareFunc::Always,
            fail_op: StencilOp::Replace,
            zpass_op: StencilOp::Replace,
            zfail_op: StencilOp::Replace,
            valuemask: 0xff,
            writemask: 0xff,
        };
    }
    let velems = VertexElements {
        elements: vec![
            VertexElement {
                src_offset: 0,
                src_stride: 20,
                src_format: Format::R32G32Float,
                ..VertexElement::default()
            },
            VertexElement {
                src_offset: 8,
                src_stride: 20,
                src_format: Format::R32G32B32Float,
                ..VertexElement::default()
            },
        ],
    };

    let cache = screen.state_cache();
    let handles = (
        cache.blend(ctx, &blend),
        cache.rasterizer(ctx, &rasterizer),
        cache.depth_stencil_alpha(ctx, &dsa),
        cache.vertex_elements(ctx, &velems),
    );
    let (Some(blend_h), Some(rs_h), Some(dsa_h), Some(ve_h)) = handles else {
        warn!("failed to create blit baseline state");
        return false;
    };

    let dst = &info.dst;
    let surf_templ = SurfaceTemplate {
        format: dst.format,
        level: dst.level,
        first_layer: dst.region.z as u32,
        last_layer: (dst.region.z + dst.region.depth.abs() - 1).max(dst.region.z) as u32,
    };
    let Some(surface) = ctx.create_surface(&dst.resource, &surf_templ) else {
        warn!("failed to create blit destination surface");
        return false;
    };
    let Some(view) = ctx.create_sampler_view(
        &info.src.resource,
        &SamplerViewTemplate {
            format: info.src.format,
            target: info.src.resource.target(),
            first_level: info.src.level,
            last_level: info.src.level,
            first_layer: 0,
            last_layer: info.src.resource.template().array_size.saturating_sub(1),
        },
    ) else {
        warn!("failed to create blit source view");
        return false;
    };

    let level_extent = dst.resource.template().level_extent(dst.level);
    let mut fb = FramebufferState {
        width: level_extent[0],
        height: level_extent[1],
        layers: surf_templ.last_layer - surf_templ.first_layer + 1,
        samples: dst.resource.nr_samples(),
        ..FramebufferState::default()
    };
    if dst.format.is_depth_or_stencil() {
        fb.zsbuf = Some(surface.clone());
    } else {
        fb.cbufs = vec![Some(surface.clone())];
    }

    let (x0, x1) = ordered(dst.region.x, dst.region.width);
    let (y0, y1) = ordered(dst.region.y, dst.region.height);
    let viewport = ViewportState {
        scale: [(x1 - x0) as f32 * 0.5, (y1 - y0) as f32 * 0.5, 1.0],
        translate: [(x0 + x1) as f32 * 0.5, (y0 + y1) as f32 * 0.5, 0.0],
    };
    let vertices = blit_vertices(info);
    let vbuf = screen.buffer_from_bytes(bytemuck::cast_slice(&vertices));

    ctx.bind_blend_state(Some(blend_h));
    ctx.bind_rasterizer_state(Some(rs_h));
    ctx.bind_depth_stencil_alpha_state(Some(dsa_h));
    ctx.bind_vertex_elements_state(Some(ve_h));
    ctx.bind_shader_state(ShaderStage::Vertex, Some(vs));
    ctx.bind_shader_state(ShaderStage::Fragment, Some(fs));
    ctx.set_framebuffer_state(&fb);
    ctx.set_viewport_states(0, &[viewport]);
    if info.scissor_enable {
        ctx.set_scissor_states(0, &[info.scissor]);
    }
    ctx.set_vertex_buffers(&[VertexBuffer::new(&vbuf, 0)]);
    ctx.set_sampler_views(ShaderStage::Fragment, 0, &[Some(view)]);

    let draw_info = DrawInfo {
        mode: PrimType::Triangles,
        instance_count: dst.region.depth.unsigned_abs().max(1),
        ..DrawInfo::default()
    };
    debug!(?mode, ?class, "shader blit");
    ctx.draw_vbo(
        &draw_info,
        0,
        None,
        &[DrawStartCountBias {
            start: 0,
            count: 3,
            index_bias: 0,
        }],
    );

    ctx.bind_blend_state(saved.blend);
    ctx.bind_rasterizer_state(saved.rasterizer);
    ctx.bind_depth_stencil_alpha_state(saved.depth_stencil_alpha);
    ctx.bind_vertex_elements_state(saved.vertex_elements);
    ctx.bind_shader_state(ShaderStage::Vertex, saved.vertex_shader);
    ctx.bind_shader_state(ShaderStage::Fragment, saved.fragment_shader);
    ctx.set_framebuffer_state(&saved.framebuffer);
    ctx.set_viewport_states(0, &[saved.viewport]);
    if info.scissor_enable {
        ctx.set_scissor_states(0, &[saved.scissor]);
    }
    ctx.set_vertex_buffers(&saved.vertex_buffers);
    let views = if saved.fragment_views.is_empty() {
        vec![None]
    } else {
        saved.fragment_views.clone()
    };
    ctx.set_sampler_views(ShaderStage::Fragment, 0, &views);
    ctx.surface_destroy(surface);
    true
}

fn ordered(start: i32, extent: i32) -> (i32, i32) {
    let end = start + extent;
    (start.min(end), start.max(end))
}

/// Oversized triangle covering the viewport: `[x, y, s, t, layer]` per vertex.
/// Source coordinates carry the (possibly mirrored) source region.
#[rustfmt::skip]
fn blit_vertices(info: &BlitInfo) -> [f32; 15] {
    let src = &info.src.region;
    let (s0, s1) = (src.x as f32, (src.x + src.width) as f32);
    let (t0, t1) = (src.y as f32, (src.y + src.height) as f32);
    let mirror_x = (info.dst.region.width < 0) != (src.width < 0);
    let mirror_y = (info.dst.region.height < 0) != (src.height < 0);
    let (s0, s1) = if mirror_x { (s1, s0) } else { (s0, s1) };
    let (t0, t1) = if mirror_y { (t1, t0) } else { (t0, t1) };
    let layer = src.z as f32;
    [
        -1.0, -1.0, s0, t0, layer,
        3.0, -1.0, s0 + 2.0 * (s1 - s0), t0, layer,
        -1.0, 3.0, s0, t0 + 2.0 * (t1 - t0), layer,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::Screen;

    fn color_blit(screen: &Screen, src: Format, dst: Format) -> BlitInfo {
        let s = screen.texture_create(TextureTarget::Texture2D, src, [8, 8, 1], 1, 0);
        let d = screen.texture_create(TextureTarget::Texture2D, dst, [8, 8, 1], 1, 0);
        BlitInfo {
            dst: BlitSurface {
                resource: d,
                level: 0,
                region: PipeBox::new_2d(0, 0, 8, 8),
                format: dst,
            },
            src: BlitSurface {
                resource: s,
                level: 0,
                region: PipeBox::new_2d(0, 0, 8, 8),
                format: src,
            },
            mask: BlitMask::RGBA,
            filter: BlitFilter::Nearest,
            scissor_enable: false,
            scissor: ScissorState::default(),
            num_window_rectangles: 0,
            render_condition_enable: true,
            sample0_only: false,
        }
    }

    #[test]
    fn same_format_copy_uses_engine() {
        let screen = Screen::new();
        let info = color_blit(&screen, Format::R8G8B8A8Unorm, Format::R8G8B8A8Unorm);
        assert_eq!(
            select_blit_path(&info, &EngineFormatTable::DEFAULT),
            BlitPath::Engine2D
        );
    }

    #[test]
    fn empty_region_is_skipped() {
        let screen = Screen::new();
        let mut info = color_blit(&screen, Format::R8G8B8A8Unorm, Format::R8G8B8A8Unorm);
        info.dst.region.width = 0;
        assert_eq!(
            select_blit_path(&info, &EngineFormatTable::DEFAULT),
            BlitPath::Skip
        );
    }

    #[test]
    fn luminance_to_rgba_needs_shader() {
        let screen = Screen::new();
        let info = color_blit(&screen, Format::L8Unorm, Format::R8G8B8A8Unorm);
        assert_eq!(
            select_blit_path(&info, &EngineFormatTable::DEFAULT),
            BlitPath::Shader3D(BlitDisqualifier::FormatConversion)
        );
    }

    #[test]
    fn disqualifiers_are_reported_in_order() {
        let screen = Screen::new();
        let mut info = color_blit(&screen, Format::Z32Float, Format::Z32Float);
        info.mask = BlitMask::Z;
        info.filter = BlitFilter::Linear;
        info.num_window_rectangles = 1;
        // Float depth is checked before filtering and window rectangles.
        assert_eq!(
            select_blit_path(&info, &EngineFormatTable::DEFAULT),
            BlitPath::Shader3D(BlitDisqualifier::FloatDepth)
        );

        let mut info = color_blit(&screen, Format::R8G8B8A8Unorm, Format::R8G8B8A8Unorm);
        info.src.region.depth = 2;
        info.num_window_rectangles = 2;
        assert_eq!(
            select_blit_path(&info, &EngineFormatTable::DEFAULT),
            BlitPath::Shader3D(BlitDisqualifier::DepthMismatch)
        );
    }

    #[test]
    fn partial_depth_stencil_mask_needs_shader() {
        let screen = Screen::new();
        let mut info = color_blit(&screen, Format::Z24UnormS8Uint, Format::Z24UnormS8Uint);
        info.mask = BlitMask::Z;
        assert_eq!(
            select_blit_path(&info, &EngineFormatTable::DEFAULT),
            BlitPath::Shader3D(BlitDisqualifier::PartialDepthStencilMask)
        );
        info.mask = BlitMask::ZS;
        assert_eq!(
            select_blit_path(&info, &EngineFormatTable::DEFAULT),
            BlitPath::Engine2D
        );
    }

    #[test]
    fn multisample_resolve_needs_shader() {
        let screen = Screen::new();
        let mut info = color_blit(&screen, Format::R8G8B8A8Unorm, Format::R8G8B8A8Unorm);
        info.src.resource = screen.texture_create(
            TextureTarget::Texture2D,
            Format::R8G8B8A8Unorm,
            [8, 8, 1],
            1,
            4,
        );
        assert_eq!(
            select_blit_path(&info, &EngineFormatTable::DEFAULT),
            BlitPath::Shader3D(BlitDisqualifier::SampleCountMismatch)
        );
    }

    #[test]
    fn program_slots_are_distinct() {
        let mut seen = std::collections::HashSet::new();
        for mode in [
            BlitProgramMode::Color,
            BlitProgramMode::ColorUint,
            BlitProgramMode::Depth,
            BlitProgramMode::Stencil,
            BlitProgramMode::DepthStencil,
        ] {
            for class in [
                TargetClass::OneD,
                TargetClass::TwoD,
                TargetClass::TwoDArray,
                TargetClass::ThreeD,
                TargetClass::Multisample,
            ] {
                assert!(seen.insert(BlitProgramCache::slot(mode, class)));
            }
        }
        assert!(!seen.contains(&PASSTHROUGH_VS_SLOT));
    }
}
