//! A recording software backend.
//!
//! `TraceContext` implements [`PipeContext`] on the CPU: clears, copies and
//! blits write real texels into resource storage, while draws and dispatches
//! are recorded without rasterization. Every call lands in a [`PipeCall`] log
//! that callers can inspect. Multi-draws and indirect draws are reduced with
//! the normalizer, so the log only ever contains single direct draws.

use std::sync::Arc;

use hashbrown::HashMap;
use tracing::{debug, trace, warn};

use crate::blit::{
    select_blit_path, shader_blit, BlitInfo, BlitMask, BlitPath, EngineFormatTable, SavedPipeState,
};
use crate::context::{
    ClearFlags, CsoHandle, Fence, MapFlags, PipeBox, PipeContext, QueryHandle, QueryResultFlags,
    QueryType, QueryValueType, Rect, Transfer, TransferLayout, QUERY_AVAILABILITY_INDEX,
};
use crate::draw::{DrawIndirectInfo, DrawInfo, DrawStartCountBias, GridInfo, PrimType};
use crate::error::PipeError;
use crate::format::{ColorUnion, Format};
use crate::normalize::{draw_indirect, draw_multi, split_negative_index_bias, IndexBiasSplit};
use crate::resource::{
    Resource, SamplerView, SamplerViewTemplate, StreamOutputTarget, Surface, SurfaceTemplate,
};
use crate::screen::Screen;
use crate::state::{
    BlendColor, BlendState, ClipState, ConstantBuffer, DepthStencilAlphaState, FramebufferState,
    RasterizerState, ScissorState, ShaderStage, ShaderState, StencilRef, VertexBuffer,
    VertexElements, ViewportState, MAX_VIEWPORTS,
};
use crate::upload::BufferArena;
use crate::validate::{ensure_command_space, CommandSpace};

/// Command words charged per recorded operation.
const DRAW_WORDS: u64 = 16;
const CLEAR_WORDS: u64 = 8;
const BLIT_WORDS: u64 = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CsoKind {
    Blend,
    Rasterizer,
    DepthStencilAlpha,
    VertexElements,
    Shader(ShaderStage),
}

/// One direct draw as seen by the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrawCall {
    pub mode: PrimType,
    pub drawid: u32,
    pub index_size: u8,
    pub start: u32,
    pub count: u32,
    pub index_bias: i32,
    pub instance_count: u32,
    pub start_instance: u32,
    pub restart_index: Option<u32>,
    pub bias_split: Option<IndexBiasSplit>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PipeCall {
    Draw(DrawCall),
    DrawMeshTasks { grid: [u32; 3], indirect: bool },
    LaunchGrid { block: [u32; 3], grid: [u32; 3], indirect: bool },
    Blit { path: BlitPath },
    ResourceCopyRegion { dst: u32, src: u32, src_box: PipeBox },
    Clear { buffers: ClearFlags, color: ColorUnion, depth: f64, stencil: u8 },
    ClearRenderTarget { surface: u32, color: ColorUnion, rect: Rect },
    ClearDepthStencil { surface: u32, flags: ClearFlags, depth: f64, stencil: u8, rect: Rect },
    ClearBuffer { resource: u32, offset: u64, size: u64 },
    ClearTexture { resource: u32, level: u32, region: PipeBox },
    BufferMap { resource: u32, offset: u64, len: u64 },
    TextureMap { resource: u32, level: u32 },
    Create(CsoKind),
    Bind(CsoKind, Option<CsoHandle>),
    Delete(CsoKind),
    SetConstantBuffer { stage: ShaderStage, index: u32, bound: bool },
    SetVertexBuffers { count: usize },
    SetViewports { start: u32, viewports: Vec<ViewportState> },
    SetScissors { start: u32, scissors: Vec<ScissorState> },
    SetFramebuffer { width: u32, height: u32, layers: u32, cbufs: usize, zsbuf: bool },
    SetBlendColor([f32; 4]),
    SetStencilRef([u8; 2]),
    SetSampleMask(u32),
    SetMinSamples(u32),
    SetClipState(u8),
    SetPatchVertices(u8),
    SetSamplerViews { stage: ShaderStage, count: usize },
    CreateSurface { resource: u32, surface: u32 },
    CreateSamplerView { resource: u32 },
    RenderCondition { buffer: Option<u32>, offset: u32, inverted: bool },
    CreateStreamOutputTarget { buffer: u32 },
    SetStreamOutputTargets { count: usize },
    CreateQuery(QueryType),
    DestroyQuery(QueryHandle),
    BeginQuery(QueryHandle),
    EndQuery(QueryHandle),
    GetQueryResult { query: QueryHandle, index: i32 },
    Flush,
    FenceFinish(Fence),
}

impl PipeCall {
    pub fn is_draw(&self) -> bool {
        matches!(self, PipeCall::Draw(_))
    }

    pub fn is_state_creation(&self) -> bool {
        matches!(self, PipeCall::Create(_))
    }

    pub fn is_clear(&self) -> bool {
        matches!(
            self,
            PipeCall::Clear { .. }
                | PipeCall::ClearRenderTarget { .. }
                | PipeCall::ClearDepthStencil { .. }
        )
    }
}

#[derive(Debug)]
struct QueryState {
    ty: QueryType,
    active: bool,
    ended: bool,
    value: u64,
}

/// Knobs for exercising failure paths.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceOptions {
    /// Command buffer size in words.
    pub command_words: u64,
    pub fail_maps: bool,
    pub fail_creates: bool,
    pub engine_formats: EngineFormatTable,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            command_words: 64 * 1024,
            fail_maps: false,
            fail_creates: false,
            engine_formats: EngineFormatTable::DEFAULT,
        }
    }
}

pub struct TraceContext {
    screen: Arc<Screen>,
    options: TraceOptions,
    calls: Vec<PipeCall>,
    pushbuf: BufferArena,
    next_fence: u64,

    objects: HashMap<CsoHandle, CsoKind>,
    vertex_layouts: HashMap<CsoHandle, VertexElements>,
    blend: Option<CsoHandle>,
    rasterizer: Option<CsoHandle>,
    depth_stencil_alpha: Option<CsoHandle>,
    vertex_elements: Option<CsoHandle>,
    shaders: [Option<CsoHandle>; ShaderStage::COUNT],

    framebuffer: FramebufferState,
    viewports: [ViewportState; MAX_VIEWPORTS],
    scissors: [ScissorState; MAX_VIEWPORTS],
    vertex_buffers: Vec<VertexBuffer>,
    constant_buffers: HashMap<(ShaderStage, u32), ConstantBuffer>,
    fragment_views: Vec<Option<Arc<SamplerView>>>,
    so_targets: Vec<Arc<StreamOutputTarget>>,
    render_condition: Option<(Arc<Resource>, u32, bool)>,
    queries: HashMap<QueryHandle, QueryState>,
}

impl TraceContext {
    pub fn new(screen: Arc<Screen>) -> Self {
        Self::with_options(screen, TraceOptions::default())
    }

    pub fn with_options(screen: Arc<Screen>, options: TraceOptions) -> Self {
        Self {
            screen,
            options,
            calls: Vec::new(),
            pushbuf: BufferArena::new(0, options.command_words),
            next_fence: 1,
            objects: HashMap::new(),
            vertex_layouts: HashMap::new(),
            blend: None,
            rasterizer: None,
            depth_stencil_alpha: None,
            vertex_elements: None,
            shaders: [None; ShaderStage::COUNT],
            framebuffer: FramebufferState::default(),
            viewports: [ViewportState::default(); MAX_VIEWPORTS],
            scissors: [ScissorState::default(); MAX_VIEWPORTS],
            vertex_buffers: Vec::new(),
            constant_buffers: HashMap::new(),
            fragment_views: Vec::new(),
            so_targets: Vec::new(),
            render_condition: None,
            queries: HashMap::new(),
        }
    }

    pub fn options_mut(&mut self) -> &mut TraceOptions {
        &mut self.options
    }

    pub fn calls(&self) -> &[PipeCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<PipeCall> {
        std::mem::take(&mut self.calls)
    }

    pub fn count(&self, pred: impl Fn(&PipeCall) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    pub fn draws(&self) -> Vec<DrawCall> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                PipeCall::Draw(d) => Some(d.clone()),
                _ => None,
            })
            .collect()
    }

    /// Live state objects created through this context.
    pub fn live_objects(&self) -> usize {
        self.objects.len()
    }

    pub fn framebuffer(&self) -> &FramebufferState {
        &self.framebuffer
    }

    pub fn viewport(&self, index: usize) -> ViewportState {
        self.viewports[index]
    }

    pub fn scissor(&self, index: usize) -> ScissorState {
        self.scissors[index]
    }

    pub fn vertex_buffers(&self) -> &[VertexBuffer] {
        &self.vertex_buffers
    }

    pub fn constant_buffer(&self, stage: ShaderStage, index: u32) -> Option<&ConstantBuffer> {
        self.constant_buffers.get(&(stage, index))
    }

    pub fn bound_shader(&self, stage: ShaderStage) -> Option<CsoHandle> {
        self.shaders[stage.index()]
    }

    pub fn stream_output_targets(&self) -> &[Arc<StreamOutputTarget>] {
        &self.so_targets
    }

    pub fn render_condition_active(&self) -> bool {
        self.render_condition.is_some()
    }

    fn record(&mut self, call: PipeCall) {
        trace!(?call, "pipe call");
        self.calls.push(call);
    }

    fn create_object(&mut self, kind: CsoKind) -> Option<CsoHandle> {
        if self.options.fail_creates {
            warn!(?kind, "state object creation failed");
            return None;
        }
        let handle = CsoHandle(self.screen.alloc_id());
        self.objects.insert(handle, kind);
        self.record(PipeCall::Create(kind));
        Some(handle)
    }

    fn delete_object(&mut self, kind: CsoKind, handle: CsoHandle) {
        if self.objects.remove(&handle).is_none() {
            warn!(?kind, ?handle, "deleting unknown state object");
        }
        self.vertex_layouts.remove(&handle);
        self.record(PipeCall::Delete(kind));
    }

    fn bind_object(&mut self, kind: CsoKind, handle: Option<CsoHandle>) {
        if let Some(known) = handle.and_then(|h| self.objects.get(&h)) {
            assert_eq!(*known, kind, "binding a state object as the wrong kind");
        }
        self.record(PipeCall::Bind(kind, handle));
    }

    fn saved_state(&self) -> SavedPipeState {
        SavedPipeState {
            blend: self.blend,
            rasterizer: self.rasterizer,
            depth_stencil_alpha: self.depth_stencil_alpha,
            vertex_elements: self.vertex_elements,
            vertex_shader: self.shaders[ShaderStage::Vertex.index()],
            fragment_shader: self.shaders[ShaderStage::Fragment.index()],
            framebuffer: self.framebuffer.clone(),
            viewport: self.viewports[0],
            scissor: self.scissors[0],
            vertex_buffers: self.vertex_buffers.clone(),
            fragment_views: self.fragment_views.clone(),
        }
    }

    fn note_draw_for_queries(&mut self, primitives: u64) {
        for q in self.queries.values_mut().filter(|q| q.active) {
            q.value += match q.ty {
                QueryType::OcclusionPredicate | QueryType::OcclusionPredicateConservative => 1,
                _ => primitives,
            };
        }
    }

    fn draw_single(&mut self, info: &DrawInfo, drawid: u32, draw: &DrawStartCountBias) {
        if draw.count == 0 || info.instance_count == 0 {
            debug!(count = draw.count, instances = info.instance_count, "skipping empty draw");
            return;
        }
        if !ensure_command_space(self, DRAW_WORDS) {
            return;
        }
        let bias_split = (info.is_indexed() && draw.index_bias < 0).then(|| {
            let layout = self
                .vertex_elements
                .and_then(|h| self.vertex_layouts.get(&h))
                .map(|ve| ve.elements.as_slice())
                .unwrap_or(&[]);
            split_negative_index_bias(draw.index_bias, layout, &self.vertex_buffers)
        });
        self.record(PipeCall::Draw(DrawCall {
            mode: info.mode,
            drawid,
            index_size: info.index_size,
            start: draw.start,
            count: draw.count,
            index_bias: if info.is_indexed() { draw.index_bias } else { 0 },
            instance_count: info.instance_count,
            start_instance: info.start_instance,
            restart_index: info.primitive_restart.then_some(info.restart_index),
            bias_split,
        }));
        self.note_draw_for_queries(u64::from(draw.count) * u64::from(info.instance_count));
    }

    /// Write `texel` (one sample) into every sample of a rectangle of layers.
    fn fill_rect(res: &Resource, level: u32, layers: std::ops::RangeInclusive<u32>, rect: Rect, texel: &[u8], merge: Option<&dyn Fn(&mut [u8])>) {
        let templ = *res.template();
        let ext = templ.level_extent(level);
        let x_end = (rect.x + rect.width).min(ext[0]);
        let y_end = (rect.y + rect.height).min(ext[1]);
        let block = templ.format.block_size() as usize;
        let samples = templ.samples() as usize;
        if merge.is_none() && texel.len() < block {
            warn!(len = texel.len(), block, "clear texel smaller than the format block");
            return;
        }
        for z in layers {
            for y in rect.y..y_end {
                for x in rect.x..x_end {
                    let off = templ.texel_offset(level, x, y, z);
                    res.modify(off, templ.texel_size(), |bytes| {
                        for s in 0..samples {
                            let sample = &mut bytes[s * block..(s + 1) * block];
                            match merge {
                                Some(f) => f(sample),
                                None => sample.copy_from_slice(&texel[..block]),
                            }
                        }
                    });
                }
            }
        }
    }

    fn clear_surface_color(surface: &Surface, color: &ColorUnion, rect: Rect) {
        let texel = surface.format().pack_color(color);
        Self::fill_rect(
            surface.texture(),
            surface.level(),
            surface.first_layer()..=surface.last_layer(),
            rect,
            &texel,
            None,
        );
    }

    fn clear_surface_depth_stencil(surface: &Surface, flags: ClearFlags, depth: f64, stencil: u8, rect: Rect) {
        let format = surface.format();
        let depth = flags.contains(ClearFlags::DEPTH).then_some(depth);
        let stencil = flags.contains(ClearFlags::STENCIL).then_some(stencil);
        let merge = move |texel: &mut [u8]| format.pack_depth_stencil(texel, depth, stencil);
        Self::fill_rect(
            surface.texture(),
            surface.level(),
            surface.first_layer()..=surface.last_layer(),
            rect,
            &[],
            Some(&merge),
        );
    }

    /// Nearest-filtered texel transfer shared by both blit paths.
    fn blit_texels(info: &BlitInfo) {
        let src = &info.src;
        let dst = &info.dst;
        let st = *src.resource.template();
        let dt = *dst.resource.template();
        let block = dt.format.block_size() as usize;
        if st.format.block_size() as usize != block {
            warn!(src = ?st.format, dst = ?dt.format, "unsupported blit conversion");
            return;
        }
        let swizzle = matches!(
            (st.format, dt.format),
            (Format::R8G8B8A8Unorm, Format::B8G8R8A8Unorm) | (Format::B8G8R8A8Unorm, Format::R8G8B8A8Unorm)
        );
        let dw = dst.region.width.unsigned_abs();
        let dh = dst.region.height.unsigned_abs();
        let dd = dst.region.depth.unsigned_abs().max(1);
        for k in 0..dd {
            for j in 0..dh {
                for i in 0..dw {
                    let map = |d: u32, dext: u32, s0: i32, sext: i32, d_neg: bool| -> i64 {
                        let d = if d_neg { dext - 1 - d } else { d };
                        let scaled = (i64::from(d) * i64::from(sext.abs())) / i64::from(dext.max(1));
                        if sext < 0 {
                            i64::from(s0) - 1 - scaled
                        } else {
                            i64::from(s0) + scaled
                        }
                    };
                    let sx = map(i, dw, src.region.x, src.region.width, dst.region.width < 0);
                    let sy = map(j, dh, src.region.y, src.region.height, dst.region.height < 0);
                    let sz = i64::from(src.region.z) + i64::from(k);
                    let dx = dst.region.x.min(dst.region.x + dst.region.width) as u32 + i;
                    let dy = dst.region.y.min(dst.region.y + dst.region.height) as u32 + j;
                    let dz = dst.region.z as u32 + k;
                    if sx < 0 || sy < 0 || sz < 0 {
                        continue;
                    }
                    let soff = st.texel_offset(src.level, sx as u32, sy as u32, sz as u32);
                    let Some(mut texel) = src.resource.read(soff, block as u64) else {
                        continue;
                    };
                    if swizzle {
                        texel.swap(0, 2);
                    }
                    let doff = dt.texel_offset(dst.level, dx, dy, dz);
                    let mask = info.mask;
                    dst.resource.modify(doff, dt.texel_size(), |bytes| {
                        for sample in bytes.chunks_exact_mut(block) {
                            if dt.format.is_depth_or_stencil() && mask.contains(BlitMask::ZS) {
                                sample.copy_from_slice(&texel);
                            } else if dt.format.is_depth_or_stencil() {
                                let mut tmp = texel.clone();
                                // Keep the channel that is not being written.
                                let keep_stencil = !mask.contains(BlitMask::S);
                                merge_depth_stencil(dt.format, sample, &mut tmp, keep_stencil);
                                sample.copy_from_slice(&tmp);
                            } else {
                                for (b, (dst_byte, src_byte)) in sample.iter_mut().zip(&texel).enumerate() {
                                    if channel_written(dt.format, mask, b) {
                                        *dst_byte = *src_byte;
                                    }
                                }
                            }
                        }
                    });
                }
            }
        }
    }
}

/// Whether byte `b` of a color texel belongs to a channel selected by `mask`.
/// Only 8-bit four-channel layouts are split per channel.
fn channel_written(format: Format, mask: BlitMask, b: usize) -> bool {
    let channels = match format {
        Format::R8G8B8A8Unorm | Format::R8G8B8A8Srgb | Format::R8G8B8A8Uint => {
            [BlitMask::R, BlitMask::G, BlitMask::B, BlitMask::A]
        }
        Format::B8G8R8A8Unorm => [BlitMask::B, BlitMask::G, BlitMask::R, BlitMask::A],
        _ => return true,
    };
    mask.contains(channels[b])
}

fn merge_depth_stencil(format: Format, old: &[u8], new: &mut [u8], keep_stencil: bool) {
    match format {
        Format::Z24UnormS8Uint => {
            if keep_stencil {
                new[3] = old[3];
            } else {
                new[..3].copy_from_slice(&old[..3]);
            }
        }
        Format::Z32FloatS8X24Uint => {
            if keep_stencil {
                new[4..].copy_from_slice(&old[4..]);
            } else {
                new[..4].copy_from_slice(&old[..4]);
            }
        }
        _ => {}
    }
}

impl CommandSpace for TraceContext {
    fn reserve(&mut self, words: u64) -> Result<(), PipeError> {
        match self.pushbuf.alloc(words, 1) {
            Some(_) => Ok(()),
            None => Err(PipeError::OutOfCommandSpace {
                needed: words,
                available: self.pushbuf.remaining(),
            }),
        }
    }
}

impl PipeContext for TraceContext {
    fn screen(&self) -> &Arc<Screen> {
        &self.screen
    }

    fn draw_vbo(
        &mut self,
        info: &DrawInfo,
        drawid_offset: u32,
        indirect: Option<&DrawIndirectInfo>,
        draws: &[DrawStartCountBias],
    ) {
        if let Some(indirect) = indirect {
            if let Err(err) = draw_indirect(self, info, drawid_offset, indirect) {
                warn!(%err, "indirect draw skipped");
            }
            return;
        }
        match draws {
            [] => {}
            [draw] => self.draw_single(info, drawid_offset, draw),
            _ => {
                draw_multi(self, info, drawid_offset, None, draws);
            }
        }
    }

    fn draw_mesh_tasks(&mut self, _drawid_offset: u32, grid: &GridInfo) {
        if !ensure_command_space(self, DRAW_WORDS) {
            return;
        }
        self.record(PipeCall::DrawMeshTasks {
            grid: grid.grid,
            indirect: grid.indirect.is_some(),
        });
    }

    fn launch_grid(&mut self, grid: &GridInfo) {
        if !ensure_command_space(self, DRAW_WORDS) {
            return;
        }
        self.record(PipeCall::LaunchGrid {
            block: grid.block,
            grid: grid.grid,
            indirect: grid.indirect.is_some(),
        });
    }

    fn blit(&mut self, info: &BlitInfo) {
        let path = select_blit_path(info, &self.options.engine_formats);
        self.record(PipeCall::Blit { path });
        match path {
            BlitPath::Skip => debug!("skipping empty blit"),
            BlitPath::Engine2D => {
                if ensure_command_space(self, BLIT_WORDS) {
                    Self::blit_texels(info);
                }
            }
            BlitPath::Shader3D(reason) => {
                debug!(?reason, "blit needs the 3D pipeline");
                let saved = self.saved_state();
                if shader_blit(self, info, &saved) {
                    Self::blit_texels(info);
                }
            }
        }
    }

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
    ) {
        self.record(PipeCall::ResourceCopyRegion {
            dst: dst.id(),
            src: src.id(),
            src_box: *src_box,
        });
        if src_box.is_empty() {
            return;
        }
        if dst.is_buffer() {
            let Some(bytes) = src.read(src_box.x as u64, src_box.width as u64) else {
                warn!("copy source out of bounds");
                return;
            };
            if !dst.write(u64::from(dstx), &bytes) {
                warn!("copy destination out of bounds");
            }
            return;
        }
        let st = *src.template();
        let dt = *dst.template();
        let row = u64::from(src_box.width as u32) * st.texel_size();
        for z in 0..src_box.depth as u32 {
            for y in 0..src_box.height as u32 {
                let soff = st.texel_offset(src_level, src_box.x as u32, src_box.y as u32 + y, src_box.z as u32 + z);
                let doff = dt.texel_offset(dst_level, dstx, dsty + y, dstz + z);
                if let Some(bytes) = src.read(soff, row) {
                    dst.write(doff, &bytes);
                }
            }
        }
    }

    fn clear(
        &mut self,
        buffers: ClearFlags,
        scissor: Option<&ScissorState>,
        color: &ColorUnion,
        depth: f64,
        stencil: u8,
    ) {
        if !ensure_command_space(self, CLEAR_WORDS) {
            return;
        }
        self.record(PipeCall::Clear {
            buffers,
            color: *color,
            depth,
            stencil,
        });
        let rect = match scissor {
            Some(s) => Rect {
                x: s.minx,
                y: s.miny,
                width: s.maxx.saturating_sub(s.minx),
                height: s.maxy.saturating_sub(s.miny),
            },
            None => Rect {
                x: 0,
                y: 0,
                width: self.framebuffer.width,
                height: self.framebuffer.height,
            },
        };
        for i in buffers.colors() {
            if let Some(Some(surf)) = self.framebuffer.cbufs.get(i as usize) {
                Self::clear_surface_color(surf, color, rect);
            }
        }
        if buffers.intersects(ClearFlags::DEPTHSTENCIL) {
            if let Some(zs) = &self.framebuffer.zsbuf {
                Self::clear_surface_depth_stencil(zs, buffers, depth, stencil, rect);
            }
        }
    }

    fn clear_render_target(
        &mut self,
        dst: &Arc<Surface>,
        color: &ColorUnion,
        rect: Rect,
        _render_condition_enabled: bool,
    ) {
        if !ensure_command_space(self, CLEAR_WORDS) {
            return;
        }
        self.record(PipeCall::ClearRenderTarget {
            surface: dst.id(),
            color: *color,
            rect,
        });
        Self::clear_surface_color(dst, color, rect);
    }

    fn clear_depth_stencil(
        &mut self,
        dst: &Arc<Surface>,
        flags: ClearFlags,
        depth: f64,
        stencil: u8,
        rect: Rect,
        _render_condition_enabled: bool,
    ) {
        if !ensure_command_space(self, CLEAR_WORDS) {
            return;
        }
        self.record(PipeCall::ClearDepthStencil {
            surface: dst.id(),
            flags,
            depth,
            stencil,
            rect,
        });
        Self::clear_surface_depth_stencil(dst, flags, depth, stencil, rect);
    }

    fn clear_buffer(&mut self, res: &Arc<Resource>, offset: u64, size: u64, pattern: &[u8]) {
        self.record(PipeCall::ClearBuffer {
            resource: res.id(),
            offset,
            size,
        });
        if pattern.is_empty() {
            return;
        }
        let filled = res.modify(offset, size, |bytes| {
            for (i, b) in bytes.iter_mut().enumerate() {
                *b = pattern[i % pattern.len()];
            }
        });
        if filled.is_none() {
            warn!(resource = res.id(), offset, size, "clear_buffer out of bounds");
        }
    }

    fn clear_texture(&mut self, res: &Arc<Resource>, level: u32, region: &PipeBox, texel: &[u8]) {
        self.record(PipeCall::ClearTexture {
            resource: res.id(),
            level,
            region: *region,
        });
        let rect = Rect {
            x: region.x as u32,
            y: region.y as u32,
            width: region.width as u32,
            height: region.height as u32,
        };
        let first = region.z as u32;
        let last = first + (region.depth as u32).max(1) - 1;
        Self::fill_rect(res, level, first..=last, rect, texel, None);
    }

    fn buffer_map(
        &mut self,
        res: &Arc<Resource>,
        offset: u64,
        len: u64,
        usage: MapFlags,
    ) -> Result<Transfer, PipeError> {
        self.record(PipeCall::BufferMap {
            resource: res.id(),
            offset,
            len,
        });
        let err = PipeError::MapFailed {
            resource: res.id(),
            offset,
            len,
        };
        if self.options.fail_maps {
            return Err(err);
        }
        let data = res.read(offset, len).ok_or(err)?;
        Ok(Transfer {
            resource: res.clone(),
            usage,
            layout: TransferLayout::Buffer { offset },
            data,
        })
    }

    fn buffer_unmap(&mut self, transfer: Transfer) {
        if let (true, TransferLayout::Buffer { offset }) =
            (transfer.usage.contains(MapFlags::WRITE), transfer.layout)
        {
            transfer.resource.write(offset, &transfer.data);
        }
    }

    fn texture_map(
        &mut self,
        res: &Arc<Resource>,
        level: u32,
        region: &PipeBox,
        usage: MapFlags,
    ) -> Result<Transfer, PipeError> {
        self.record(PipeCall::TextureMap {
            resource: res.id(),
            level,
        });
        let templ = *res.template();
        let block = u64::from(templ.format.block_size());
        let stride = region.width as u64 * block;
        let layer_stride = stride * region.height as u64;
        if self.options.fail_maps {
            return Err(PipeError::MapFailed {
                resource: res.id(),
                offset: templ.level_offset(level),
                len: layer_stride * region.depth as u64,
            });
        }
        let mut data = Vec::with_capacity((layer_stride * region.depth as u64) as usize);
        for z in 0..region.depth as u32 {
            for y in 0..region.height as u32 {
                for x in 0..region.width as u32 {
                    let off = templ.texel_offset(level, region.x as u32 + x, region.y as u32 + y, region.z as u32 + z);
                    match res.read(off, block) {
                        Some(texel) => data.extend_from_slice(&texel),
                        None => data.extend(std::iter::repeat(0).take(block as usize)),
                    }
                }
            }
        }
        Ok(Transfer {
            resource: res.clone(),
            usage,
            layout: TransferLayout::Texture {
                level,
                region: *region,
                stride,
                layer_stride,
            },
            data,
        })
    }

    fn texture_unmap(&mut self, transfer: Transfer) {
        let TransferLayout::Texture {
            level,
            region,
            stride,
            layer_stride,
        } = transfer.layout
        else {
            return;
        };
        if !transfer.usage.contains(MapFlags::WRITE) {
            return;
        }
        let templ = *transfer.resource.template();
        let block = u64::from(templ.format.block_size());
        for z in 0..region.depth as u32 {
            for y in 0..region.height as u32 {
                for x in 0..region.width as u32 {
                    let src = (u64::from(z) * layer_stride + u64::from(y) * stride + u64::from(x) * block) as usize;
                    let texel = &transfer.data[src..src + block as usize];
                    let off = templ.texel_offset(level, region.x as u32 + x, region.y as u32 + y, region.z as u32 + z);
                    transfer.resource.modify(off, templ.texel_size(), |bytes| {
                        for sample in bytes.chunks_exact_mut(block as usize) {
                            sample.copy_from_slice(texel);
                        }
                    });
                }
            }
        }
    }

    fn create_blend_state(&mut self, _state: &BlendState) -> Option<CsoHandle> {
        self.create_object(CsoKind::Blend)
    }

    fn bind_blend_state(&mut self, handle: Option<CsoHandle>) {
        self.bind_object(CsoKind::Blend, handle);
        self.blend = handle;
    }

    fn delete_blend_state(&mut self, handle: CsoHandle) {
        self.delete_object(CsoKind::Blend, handle);
    }

    fn create_rasterizer_state(&mut self, _state: &RasterizerState) -> Option<CsoHandle> {
        self.create_object(CsoKind::Rasterizer)
    }

    fn bind_rasterizer_state(&mut self, handle: Option<CsoHandle>) {
        self.bind_object(CsoKind::Rasterizer, handle);
        self.rasterizer = handle;
    }

    fn delete_rasterizer_state(&mut self, handle: CsoHandle) {
        self.delete_object(CsoKind::Rasterizer, handle);
    }

    fn create_depth_stencil_alpha_state(
        &mut self,
        _state: &DepthStencilAlphaState,
    ) -> Option<CsoHandle> {
        self.create_object(CsoKind::DepthStencilAlpha)
    }

    fn bind_depth_stencil_alpha_state(&mut self, handle: Option<CsoHandle>) {
        self.bind_object(CsoKind::DepthStencilAlpha, handle);
        self.depth_stencil_alpha = handle;
    }

    fn delete_depth_stencil_alpha_state(&mut self, handle: CsoHandle) {
        self.delete_object(CsoKind::DepthStencilAlpha, handle);
    }

    fn create_vertex_elements_state(&mut self, state: &VertexElements) -> Option<CsoHandle> {
        let handle = self.create_object(CsoKind::VertexElements)?;
        self.vertex_layouts.insert(handle, state.clone());
        Some(handle)
    }

    fn bind_vertex_elements_state(&mut self, handle: Option<CsoHandle>) {
        self.bind_object(CsoKind::VertexElements, handle);
        self.vertex_elements = handle;
    }

    fn delete_vertex_elements_state(&mut self, handle: CsoHandle) {
        self.delete_object(CsoKind::VertexElements, handle);
    }

    fn create_shader_state(&mut self, state: &ShaderState) -> Option<CsoHandle> {
        self.create_object(CsoKind::Shader(state.stage))
    }

    fn bind_shader_state(&mut self, stage: ShaderStage, handle: Option<CsoHandle>) {
        self.bind_object(CsoKind::Shader(stage), handle);
        self.shaders[stage.index()] = handle;
    }

    fn delete_shader_state(&mut self, stage: ShaderStage, handle: CsoHandle) {
        self.delete_object(CsoKind::Shader(stage), handle);
    }

    fn set_constant_buffer(&mut self, stage: ShaderStage, index: u32, cb: Option<&ConstantBuffer>) {
        self.record(PipeCall::SetConstantBuffer {
            stage,
            index,
            bound: cb.is_some(),
        });
        match cb {
            Some(cb) => {
                self.constant_buffers.insert((stage, index), cb.clone());
            }
            None => {
                self.constant_buffers.remove(&(stage, index));
            }
        }
    }

    fn set_vertex_buffers(&mut self, buffers: &[VertexBuffer]) {
        self.record(PipeCall::SetVertexBuffers {
            count: buffers.len(),
        });
        self.vertex_buffers = buffers.to_vec();
    }

    fn set_viewport_states(&mut self, start: u32, viewports: &[ViewportState]) {
        self.record(PipeCall::SetViewports {
            start,
            viewports: viewports.to_vec(),
        });
        for (i, vp) in viewports.iter().enumerate() {
            if let Some(slot) = self.viewports.get_mut(start as usize + i) {
                *slot = *vp;
            }
        }
    }

    fn set_scissor_states(&mut self, start: u32, scissors: &[ScissorState]) {
        self.record(PipeCall::SetScissors {
            start,
            scissors: scissors.to_vec(),
        });
        for (i, s) in scissors.iter().enumerate() {
            if let Some(slot) = self.scissors.get_mut(start as usize + i) {
                *slot = *s;
            }
        }
    }

    fn set_blend_color(&mut self, color: &BlendColor) {
        self.record(PipeCall::SetBlendColor(color.color));
    }

    fn set_stencil_ref(&mut self, stencil_ref: StencilRef) {
        self.record(PipeCall::SetStencilRef(stencil_ref.ref_value));
    }

    fn set_sample_mask(&mut self, mask: u32) {
        self.record(PipeCall::SetSampleMask(mask));
    }

    fn set_min_samples(&mut self, min_samples: u32) {
        self.record(PipeCall::SetMinSamples(min_samples));
    }

    fn set_clip_state(&mut self, clip: &ClipState) {
        self.record(PipeCall::SetClipState(clip.ucp_enables));
    }

    fn set_patch_vertices(&mut self, vertices: u8) {
        self.record(PipeCall::SetPatchVertices(vertices));
    }

    fn set_framebuffer_state(&mut self, fb: &FramebufferState) {
        self.record(PipeCall::SetFramebuffer {
            width: fb.width,
            height: fb.height,
            layers: fb.layers,
            cbufs: fb.cbufs.len(),
            zsbuf: fb.zsbuf.is_some(),
        });
        self.framebuffer = fb.clone();
    }

    fn set_sampler_views(
        &mut self,
        stage: ShaderStage,
        start: u32,
        views: &[Option<Arc<SamplerView>>],
    ) {
        self.record(PipeCall::SetSamplerViews {
            stage,
            count: views.len(),
        });
        if stage == ShaderStage::Fragment {
            let end = start as usize + views.len();
            if self.fragment_views.len() < end {
                self.fragment_views.resize(end, None);
            }
            self.fragment_views[start as usize..end].clone_from_slice(views);
        }
    }

    fn create_surface(
        &mut self,
        res: &Arc<Resource>,
        templ: &SurfaceTemplate,
    ) -> Option<Arc<Surface>> {
        if self.options.fail_creates {
            return None;
        }
        let surface = Arc::new(Surface::new(
            self.screen.alloc_id(),
            res.clone(),
            *templ,
            self.screen.counters().clone(),
        ));
        self.record(PipeCall::CreateSurface {
            resource: res.id(),
            surface: surface.id(),
        });
        Some(surface)
    }

    fn create_sampler_view(
        &mut self,
        res: &Arc<Resource>,
        templ: &SamplerViewTemplate,
    ) -> Option<Arc<SamplerView>> {
        if self.options.fail_creates {
            return None;
        }
        self.record(PipeCall::CreateSamplerView { resource: res.id() });
        Some(Arc::new(SamplerView::new(
            self.screen.alloc_id(),
            res.clone(),
            *templ,
            self.screen.counters().clone(),
        )))
    }

    fn render_condition_mem(&mut self, buffer: Option<&Arc<Resource>>, offset: u32, inverted: bool) {
        self.record(PipeCall::RenderCondition {
            buffer: buffer.map(|b| b.id()),
            offset,
            inverted,
        });
        self.render_condition = buffer.map(|b| (b.clone(), offset, inverted));
    }

    fn create_stream_output_target(
        &mut self,
        buffer: &Arc<Resource>,
        offset: u32,
        size: u32,
    ) -> Option<Arc<StreamOutputTarget>> {
        if self.options.fail_creates {
            return None;
        }
        self.record(PipeCall::CreateStreamOutputTarget { buffer: buffer.id() });
        Some(Arc::new(StreamOutputTarget::new(
            self.screen.alloc_id(),
            buffer.clone(),
            offset,
            size,
            self.screen.counters().clone(),
        )))
    }

    fn set_stream_output_targets(&mut self, targets: &[Arc<StreamOutputTarget>], offsets: &[u32]) {
        self.record(PipeCall::SetStreamOutputTargets {
            count: targets.len(),
        });
        for (target, &offset) in targets.iter().zip(offsets) {
            if offset != u32::MAX {
                target.set_filled(offset);
            }
        }
        self.so_targets = targets.to_vec();
    }

    fn create_query(&mut self, ty: QueryType, _index: u32) -> Option<QueryHandle> {
        if self.options.fail_creates {
            return None;
        }
        let handle = QueryHandle(self.screen.alloc_id());
        self.queries.insert(
            handle,
            QueryState {
                ty,
                active: false,
                ended: false,
                value: 0,
            },
        );
        self.record(PipeCall::CreateQuery(ty));
        Some(handle)
    }

    fn destroy_query(&mut self, query: QueryHandle) {
        self.queries.remove(&query);
        self.record(PipeCall::DestroyQuery(query));
    }

    fn begin_query(&mut self, query: QueryHandle) -> bool {
        self.record(PipeCall::BeginQuery(query));
        match self.queries.get_mut(&query) {
            Some(q) => {
                q.active = true;
                q.ended = false;
                q.value = 0;
                true
            }
            None => false,
        }
    }

    fn end_query(&mut self, query: QueryHandle) -> bool {
        self.record(PipeCall::EndQuery(query));
        let fence = self.next_fence;
        match self.queries.get_mut(&query) {
            Some(q) => {
                q.active = false;
                q.ended = true;
                if q.ty == QueryType::Timestamp {
                    q.value = fence;
                }
                true
            }
            None => false,
        }
    }

    fn get_query_result_resource(
        &mut self,
        query: QueryHandle,
        _flags: QueryResultFlags,
        result_type: QueryValueType,
        index: i32,
        res: &Arc<Resource>,
        offset: u32,
    ) {
        self.record(PipeCall::GetQueryResult { query, index });
        let Some(q) = self.queries.get(&query) else {
            return;
        };
        let value = if index == QUERY_AVAILABILITY_INDEX {
            u64::from(q.ended)
        } else {
            q.value
        };
        let offset = u64::from(offset);
        match result_type {
            QueryValueType::U32 => res.write(offset, &(value.min(u64::from(u32::MAX)) as u32).to_le_bytes()),
            QueryValueType::U64 => res.write(offset, &value.to_le_bytes()),
        };
    }

    fn flush(&mut self) -> Fence {
        self.record(PipeCall::Flush);
        self.pushbuf.reset();
        let fence = Fence(self.next_fence);
        self.next_fence += 1;
        fence
    }

    fn fence_finish(&mut self, fence: Fence) -> bool {
        self.record(PipeCall::FenceFinish(fence));
        fence.0 < self.next_fence
    }
}

impl std::fmt::Debug for TraceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceContext")
            .field("calls", &self.calls.len())
            .field("objects", &self.objects.len())
            .field("pushbuf", &self.pushbuf)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::TextureTarget;

    fn rgba_surface(ctx: &mut TraceContext, w: u32, h: u32) -> Arc<Surface> {
        let tex = ctx
            .screen()
            .texture_create(TextureTarget::Texture2D, Format::R8G8B8A8Unorm, [w, h, 1], 1, 4);
        let templ = SurfaceTemplate {
            format: Format::R8G8B8A8Unorm,
            ..SurfaceTemplate::default()
        };
        ctx.create_surface(&tex, &templ).unwrap()
    }

    #[test]
    fn clear_render_target_fills_every_sample_in_rect() {
        let mut ctx = TraceContext::new(Screen::new());
        let surf = rgba_surface(&mut ctx, 4, 4);
        let rect = Rect {
            x: 1,
            y: 1,
            width: 2,
            height: 8,
        };
        ctx.clear_render_target(&surf, &ColorUnion::from_f32([1.0, 0.0, 0.0, 1.0]), rect, false);

        let templ = *surf.texture().template();
        let inside = surf.texture().read(templ.texel_offset(0, 2, 3, 0), templ.texel_size()).unwrap();
        assert_eq!(inside, [255, 0, 0, 255].repeat(4));
        let outside = surf.texture().read(templ.texel_offset(0, 0, 0, 0), 4).unwrap();
        assert_eq!(outside, vec![0; 4]);
    }

    #[test]
    fn occlusion_query_counts_draws_and_writes_result() {
        let mut ctx = TraceContext::new(Screen::new());
        let q = ctx.create_query(QueryType::OcclusionCounter, 0).unwrap();
        assert!(ctx.begin_query(q));
        let info = DrawInfo {
            instance_count: 2,
            ..DrawInfo::default()
        };
        let draw = DrawStartCountBias {
            start: 0,
            count: 3,
            index_bias: 0,
        };
        ctx.draw_vbo(&info, 0, None, &[draw]);
        assert!(ctx.end_query(q));

        let dst = ctx.screen().buffer_create(16);
        ctx.get_query_result_resource(q, QueryResultFlags::WAIT, QueryValueType::U64, 0, &dst, 0);
        ctx.get_query_result_resource(
            q,
            QueryResultFlags::empty(),
            QueryValueType::U32,
            QUERY_AVAILABILITY_INDEX,
            &dst,
            8,
        );
        assert_eq!(dst.read(0, 8).unwrap(), 6u64.to_le_bytes());
        assert_eq!(dst.read_u32(8), Some(1));
    }

    #[test]
    fn texture_map_round_trips_a_region() {
        let mut ctx = TraceContext::new(Screen::new());
        let tex = ctx
            .screen()
            .texture_create(TextureTarget::Texture2D, Format::R32Uint, [4, 4, 1], 1, 0);
        let region = PipeBox::new_2d(1, 1, 2, 2);
        let mut t = ctx.texture_map(&tex, 0, &region, MapFlags::WRITE).unwrap();
        t.data.copy_from_slice(&[1u8; 16]);
        ctx.texture_unmap(t);

        assert_eq!(tex.read_u32(tex.template().texel_offset(0, 2, 2, 0)), Some(0x0101_0101));
        assert_eq!(tex.read_u32(0), Some(0));
    }
}
