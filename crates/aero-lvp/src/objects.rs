//! Device-level objects referenced by recorded commands.
//!
//! Everything here is immutable after creation (apart from interior caches)
//! and shared through `Arc`, so a command buffer can be replayed any number
//! of times while the objects it names stay alive.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use aero_pipe::cache::{CacheStats, KeyedCache, SlotCache};
use aero_pipe::context::QueryHandle;
use aero_pipe::resource::{SurfaceTemplate, Surface};
use aero_pipe::state::{ShaderStage, ShaderStages, ShaderState, StateKey};
use aero_pipe::{CsoHandle, Format, PipeContext, QueryType, Resource, Screen, TextureTarget};

use crate::cmd::{ImageAspects, PipelineBindPoint, QueryPipelineStatistics};
use crate::descriptor::{DescriptorSetLayout, SamplerDesc};
use crate::graphics::GraphicsPipelineState;

/// Device addresses are handed out on this alignment.
pub const ADDRESS_ALIGNMENT: u64 = 256;

/// Owns the screen and the device-address table.
pub struct Device {
    screen: Arc<Screen>,
    addresses: RwLock<BTreeMap<u64, Arc<Buffer>>>,
    next_address: AtomicU64,
    noop_fs: SlotCache<CsoHandle>,
    zero_buffer: Arc<Resource>,
}

impl Device {
    pub fn new(screen: Arc<Screen>) -> Arc<Self> {
        let zero_buffer = screen.buffer_create(4);
        Arc::new(Self {
            screen,
            addresses: RwLock::new(BTreeMap::new()),
            next_address: AtomicU64::new(0x1_0000),
            noop_fs: SlotCache::new(1),
            zero_buffer,
        })
    }

    pub fn screen(&self) -> &Arc<Screen> {
        &self.screen
    }

    /// Four zero bytes, bound as the index buffer when nothing else is.
    pub fn zero_buffer(&self) -> &Arc<Resource> {
        &self.zero_buffer
    }

    /// Create a buffer with a device address.
    pub fn create_buffer(&self, size: u32) -> Arc<Buffer> {
        self.import_buffer(self.screen.buffer_create(size))
    }

    /// Give an existing buffer resource a device address.
    pub fn import_buffer(&self, resource: Arc<Resource>) -> Arc<Buffer> {
        let size = resource.size();
        let span = size.max(1).div_ceil(ADDRESS_ALIGNMENT) * ADDRESS_ALIGNMENT;
        let address = self.next_address.fetch_add(span, Ordering::Relaxed);
        let buffer = Arc::new(Buffer {
            resource,
            address,
            size,
        });
        self.addresses
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(address, buffer.clone());
        buffer
    }

    /// Drop the address mapping of `buffer`. The buffer itself lives on
    /// while commands still reference it.
    pub fn destroy_buffer(&self, buffer: &Buffer) {
        self.addresses
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&buffer.address);
    }

    /// Resolve a device address to its buffer and the offset inside it.
    pub fn buffer_at(&self, address: u64) -> Option<(Arc<Buffer>, u64)> {
        let table = self
            .addresses
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let (base, buffer) = table.range(..=address).next_back()?;
        let offset = address - base;
        (offset < buffer.size.max(1)).then(|| (buffer.clone(), offset))
    }

    pub fn create_image(&self, info: &ImageCreateInfo) -> Arc<Image> {
        let resource = self.screen.resource_create(&aero_pipe::ResourceTemplate {
            target: info.target,
            format: info.format,
            width0: info.extent[0],
            height0: info.extent[1],
            depth0: info.extent[2],
            array_size: info.array_layers,
            last_level: info.mip_levels.saturating_sub(1),
            nr_samples: info.samples,
        });
        Arc::new(Image {
            resource,
            levels: info.mip_levels.max(1),
            layers: info.array_layers.max(1),
        })
    }

    pub fn create_image_view(&self, image: &Arc<Image>, info: &ImageViewCreateInfo) -> Arc<ImageView> {
        Arc::new(ImageView {
            id: self.screen.alloc_id(),
            image: image.clone(),
            format: info.format,
            aspects: info.aspects,
            base_level: info.base_level,
            base_layer: info.base_layer,
            layer_count: info.layer_count,
            surface: Mutex::new(None),
        })
    }

    pub fn create_sampler(&self, desc: SamplerDesc) -> Arc<Sampler> {
        Arc::new(Sampler {
            id: self.screen.alloc_id(),
            desc,
        })
    }

    pub fn create_shader(&self, info: ShaderCreateInfo) -> Arc<Shader> {
        Arc::new(Shader {
            id: self.screen.alloc_id(),
            stage: info.stage,
            ir: info.ir,
            push_constant_size: info.push_constant_size,
            workgroup_size: info.workgroup_size,
            inline: info.inline,
            gs_output_lines: info.gs_output_lines,
            csos: SlotCache::new(2),
            variants: KeyedCache::default(),
        })
    }

    pub fn create_query_pool(&self, ty: QueryPoolType, count: u32) -> Arc<QueryPool> {
        Arc::new(QueryPool {
            id: self.screen.alloc_id(),
            ty,
            queries: Mutex::new(vec![None; count as usize]),
        })
    }

    pub fn create_event(&self) -> Arc<Event> {
        Arc::new(Event {
            id: self.screen.alloc_id(),
            signalled: AtomicBool::new(false),
        })
    }

    /// The fragment shader bound when no fragment stage is bound.
    pub fn noop_fs<C: PipeContext + ?Sized>(&self, ctx: &mut C) -> Option<CsoHandle> {
        self.noop_fs
            .get_or_create(0, || {
                ctx.create_shader_state(&ShaderState {
                    stage: ShaderStage::Fragment,
                    ir: Arc::from(Vec::new()),
                    inline_values: None,
                    tess_ccw: false,
                })
            })
            .copied()
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mapped = self
            .addresses
            .read()
            .map(|t| t.len())
            .unwrap_or_default();
        f.debug_struct("Device")
            .field("mapped_buffers", &mapped)
            .field("next_address", &self.next_address.load(Ordering::Relaxed))
            .finish()
    }
}

#[derive(Debug)]
pub struct Buffer {
    pub resource: Arc<Resource>,
    pub address: u64,
    pub size: u64,
}

#[derive(Clone, Copy, Debug)]
pub struct ImageCreateInfo {
    pub target: TextureTarget,
    pub format: Format,
    pub extent: [u32; 3],
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: u32,
}

impl ImageCreateInfo {
    pub fn new_2d(format: Format, width: u32, height: u32) -> Self {
        Self {
            target: TextureTarget::Texture2D,
            format,
            extent: [width, height, 1],
            mip_levels: 1,
            array_layers: 1,
            samples: 0,
        }
    }
}

#[derive(Debug)]
pub struct Image {
    pub resource: Arc<Resource>,
    pub levels: u32,
    pub layers: u32,
}

impl Image {
    pub fn format(&self) -> Format {
        self.resource.format()
    }

    pub fn samples(&self) -> u32 {
        self.resource.template().samples()
    }

    /// Layer count of a subresource range, resolving the "remaining" marker.
    pub fn layer_count(&self, base: u32, count: u32) -> u32 {
        if count == crate::cmd::REMAINING {
            let layers = if self.resource.target().is_layout_3d() {
                self.resource.template().depth0
            } else {
                self.layers
            };
            layers.saturating_sub(base)
        } else {
            count
        }
    }

    pub fn level_count(&self, base: u32, count: u32) -> u32 {
        if count == crate::cmd::REMAINING {
            self.levels.saturating_sub(base)
        } else {
            count
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ImageViewCreateInfo {
    pub format: Format,
    pub aspects: ImageAspects,
    pub base_level: u32,
    pub base_layer: u32,
    pub layer_count: u32,
}

impl ImageViewCreateInfo {
    pub fn whole(image: &Image) -> Self {
        let format = image.format();
        let mut aspects = ImageAspects::empty();
        if format.has_depth() {
            aspects |= ImageAspects::DEPTH;
        }
        if format.has_stencil() {
            aspects |= ImageAspects::STENCIL;
        }
        if aspects.is_empty() {
            aspects = ImageAspects::COLOR;
        }
        Self {
            format,
            aspects,
            base_level: 0,
            base_layer: 0,
            layer_count: image.layers,
        }
    }
}

/// A view of one level of an image, renderable through a cached surface.
pub struct ImageView {
    pub id: u32,
    pub image: Arc<Image>,
    pub format: Format,
    pub aspects: ImageAspects,
    pub base_level: u32,
    pub base_layer: u32,
    pub layer_count: u32,
    surface: Mutex<Option<Arc<Surface>>>,
}

impl ImageView {
    /// Surface covering `layer_count` layers from the base layer, recreated
    /// when the cached one covers a different layer count.
    pub fn surface<C: PipeContext + ?Sized>(&self, ctx: &mut C, layer_count: u32) -> Option<Arc<Surface>> {
        let mut slot = self
            .surface
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(surface) = slot.as_ref() {
            if surface.last_layer() - surface.first_layer() + 1 == layer_count.max(1) {
                return Some(surface.clone());
            }
        }
        if let Some(old) = slot.take() {
            ctx.surface_destroy(old);
        }
        let surface = self.create_surface(ctx, self.base_layer, layer_count)?;
        *slot = Some(surface.clone());
        Some(surface)
    }

    /// An uncached surface, for one-off clears and resolves.
    pub fn create_surface<C: PipeContext + ?Sized>(
        &self,
        ctx: &mut C,
        first_layer: u32,
        layer_count: u32,
    ) -> Option<Arc<Surface>> {
        ctx.create_surface(
            &self.image.resource,
            &SurfaceTemplate {
                format: self.format,
                level: self.base_level,
                first_layer,
                last_layer: first_layer + layer_count.max(1) - 1,
            },
        )
    }

    pub fn release_surface<C: PipeContext + ?Sized>(&self, ctx: &mut C) {
        let taken = self
            .surface
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(surface) = taken {
            ctx.surface_destroy(surface);
        }
    }

    pub fn has_surface(&self) -> bool {
        self.surface
            .lock()
            .map(|s| s.is_some())
            .unwrap_or_default()
    }
}

impl fmt::Debug for ImageView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageView")
            .field("id", &self.id)
            .field("resource", &self.image.resource.id())
            .field("format", &self.format)
            .field("level", &self.base_level)
            .field("layers", &(self.base_layer, self.layer_count))
            .finish()
    }
}

#[derive(Debug)]
pub struct Sampler {
    pub id: u32,
    pub desc: SamplerDesc,
}

/// Uniform offsets a shader can have constant-folded from push constants.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InlineUniforms {
    /// Bit `i` set when slot `i` of `offsets` is used.
    pub mask: u32,
    /// Byte offsets into the push-constant block.
    pub offsets: Vec<u32>,
}

#[derive(Clone, Debug)]
pub struct ShaderCreateInfo {
    pub stage: ShaderStage,
    pub ir: Arc<[u32]>,
    pub push_constant_size: u32,
    pub workgroup_size: [u32; 3],
    pub inline: Option<InlineUniforms>,
    pub gs_output_lines: bool,
}

impl ShaderCreateInfo {
    pub fn new(stage: ShaderStage, ir: &[u32]) -> Self {
        Self {
            stage,
            ir: Arc::from(ir),
            push_constant_size: 0,
            workgroup_size: [1, 1, 1],
            inline: None,
            gs_output_lines: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineKey {
    pub mask: u32,
    pub values: Vec<u32>,
    pub tess_ccw: bool,
}

impl StateKey for InlineKey {
    fn hash_key<H: std::hash::Hasher>(&self, state: &mut H) {
        use std::hash::Hash;
        self.mask.hash(state);
        self.values.hash(state);
        self.tess_ccw.hash(state);
    }
}

/// A compiled shader stage.
///
/// The base backend object is created lazily, once per winding; inline
/// variants are cached by the uniform values they were folded with.
pub struct Shader {
    pub id: u32,
    pub stage: ShaderStage,
    pub ir: Arc<[u32]>,
    pub push_constant_size: u32,
    pub workgroup_size: [u32; 3],
    pub inline: Option<InlineUniforms>,
    pub gs_output_lines: bool,
    csos: SlotCache<CsoHandle>,
    variants: KeyedCache<InlineKey, CsoHandle>,
}

impl Shader {
    pub fn can_inline(&self) -> bool {
        self.inline.as_ref().is_some_and(|i| i.mask != 0)
    }

    pub fn cso<C: PipeContext + ?Sized>(&self, ctx: &mut C, tess_ccw: bool) -> Option<CsoHandle> {
        self.csos
            .get_or_create(usize::from(tess_ccw), || {
                ctx.create_shader_state(&ShaderState {
                    stage: self.stage,
                    ir: self.ir.clone(),
                    inline_values: None,
                    tess_ccw,
                })
            })
            .copied()
    }

    pub fn variant<C: PipeContext + ?Sized>(
        &self,
        ctx: &mut C,
        values: Vec<u32>,
        tess_ccw: bool,
    ) -> Option<CsoHandle> {
        let key = InlineKey {
            mask: self.inline.as_ref().map_or(0, |i| i.mask),
            values,
            tess_ccw,
        };
        self.variants.get_or_create(&key, || {
            ctx.create_shader_state(&ShaderState {
                stage: self.stage,
                ir: self.ir.clone(),
                inline_values: Some(key.values.clone()),
                tess_ccw,
            })
        })
    }

    pub fn variant_stats(&self) -> CacheStats {
        self.variants.stats()
    }
}

impl fmt::Debug for Shader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shader")
            .field("id", &self.id)
            .field("stage", &self.stage)
            .field("inline", &self.inline)
            .finish()
    }
}

#[derive(Clone, Debug, Default)]
pub struct PipelineLayout {
    pub set_layouts: Vec<Option<Arc<DescriptorSetLayout>>>,
    pub push_constant_size: u32,
    pub push_constant_stages: ShaderStages,
    pub independent_sets: bool,
}

impl PipelineLayout {
    pub fn set_layout(&self, set: usize) -> Option<&Arc<DescriptorSetLayout>> {
        self.set_layouts.get(set)?.as_ref()
    }
}

#[derive(Debug)]
pub struct Pipeline {
    pub bind_point: PipelineBindPoint,
    pub layout: Arc<PipelineLayout>,
    pub shaders: [Option<Arc<Shader>>; ShaderStage::COUNT],
    pub graphics: GraphicsPipelineState,
    /// Extra shader groups; group 0 is the pipeline itself.
    pub groups: Vec<Arc<Pipeline>>,
}

impl Pipeline {
    pub fn compute(layout: Arc<PipelineLayout>, shader: Arc<Shader>) -> Arc<Self> {
        let mut shaders: [Option<Arc<Shader>>; ShaderStage::COUNT] = Default::default();
        shaders[ShaderStage::Compute.index()] = Some(shader);
        Arc::new(Self {
            bind_point: PipelineBindPoint::Compute,
            layout,
            shaders,
            graphics: GraphicsPipelineState::default(),
            groups: Vec::new(),
        })
    }

    pub fn graphics(
        layout: Arc<PipelineLayout>,
        shaders: Vec<Arc<Shader>>,
        graphics: GraphicsPipelineState,
    ) -> Arc<Self> {
        let mut slots: [Option<Arc<Shader>>; ShaderStage::COUNT] = Default::default();
        for shader in shaders {
            let stage = shader.stage;
            slots[stage.index()] = Some(shader);
        }
        Arc::new(Self {
            bind_point: PipelineBindPoint::Graphics,
            layout,
            shaders: slots,
            graphics,
            groups: Vec::new(),
        })
    }

    pub fn with_groups(self: Arc<Self>, groups: Vec<Arc<Pipeline>>) -> Arc<Self> {
        Arc::new(Self {
            bind_point: self.bind_point,
            layout: self.layout.clone(),
            shaders: self.shaders.clone(),
            graphics: self.graphics.clone(),
            groups,
        })
    }

    pub fn graphics_stages(&self) -> ShaderStages {
        ShaderStage::GRAPHICS
            .iter()
            .filter(|s| self.shaders[s.index()].is_some())
            .fold(ShaderStages::empty(), |acc, s| acc | s.bit())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryPoolType {
    Occlusion,
    Timestamp,
    PipelineStatistics(QueryPipelineStatistics),
    TransformFeedback,
    PrimitivesGenerated,
    MeshPrimitivesGenerated,
}

impl QueryPoolType {
    /// Backend query type for `index` within a query. Only pipeline
    /// statistics fan out to more than one value.
    pub fn pipe_type(self, precise: bool) -> QueryType {
        match self {
            QueryPoolType::Occlusion if precise => QueryType::OcclusionCounter,
            QueryPoolType::Occlusion => QueryType::OcclusionPredicate,
            QueryPoolType::Timestamp => QueryType::Timestamp,
            QueryPoolType::PipelineStatistics(_) => QueryType::PipelineStatistics,
            QueryPoolType::TransformFeedback => QueryType::SoStatistics,
            QueryPoolType::PrimitivesGenerated => QueryType::PrimitivesGenerated,
            QueryPoolType::MeshPrimitivesGenerated => QueryType::MeshPrimitivesGenerated,
        }
    }
}

pub struct QueryPool {
    pub id: u32,
    pub ty: QueryPoolType,
    queries: Mutex<Vec<Option<QueryHandle>>>,
}

impl QueryPool {
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, query: u32) -> Option<QueryHandle> {
        self.lock().get(query as usize).copied().flatten()
    }

    /// Backend query for `query`, created on first use.
    pub fn get_or_create<C: PipeContext + ?Sized>(
        &self,
        ctx: &mut C,
        query: u32,
        index: u32,
        precise: bool,
    ) -> Option<QueryHandle> {
        let mut queries = self.lock();
        let slot = queries.get_mut(query as usize)?;
        if slot.is_none() {
            *slot = ctx.create_query(self.ty.pipe_type(precise), index);
        }
        *slot
    }

    /// Destroy backend queries in `[first, first + count)`.
    pub fn reset<C: PipeContext + ?Sized>(&self, ctx: &mut C, first: u32, count: u32) {
        let mut queries = self.lock();
        for slot in queries.iter_mut().skip(first as usize).take(count as usize) {
            if let Some(handle) = slot.take() {
                ctx.destroy_query(handle);
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Option<QueryHandle>>> {
        self.queries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for QueryPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryPool")
            .field("id", &self.id)
            .field("ty", &self.ty)
            .field("len", &self.len())
            .finish()
    }
}

#[derive(Debug)]
pub struct Event {
    pub id: u32,
    signalled: AtomicBool,
}

impl Event {
    pub fn is_set(&self) -> bool {
        self.signalled.load(Ordering::Acquire)
    }

    pub fn set(&self, value: bool) {
        self.signalled.store(value, Ordering::Release);
    }
}

/// A recorded command list.
#[derive(Debug, Default)]
pub struct CommandBuffer {
    pub cmds: Vec<crate::cmd::Cmd>,
}

impl CommandBuffer {
    pub fn new(cmds: Vec<crate::cmd::Cmd>) -> Arc<Self> {
        Arc::new(Self { cmds })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_addresses_resolve_inside_their_buffer_only() {
        let device = Device::new(Screen::new());
        let a = device.create_buffer(100);
        let b = device.create_buffer(600);
        assert_eq!(a.address % ADDRESS_ALIGNMENT, 0);
        assert!(b.address >= a.address + 256);

        let (hit, off) = device.buffer_at(b.address + 17).unwrap();
        assert_eq!(hit.resource.id(), b.resource.id());
        assert_eq!(off, 17);
        assert!(device.buffer_at(a.address + 100).is_none());
        assert!(device.buffer_at(a.address - 1).is_none());

        device.destroy_buffer(&b);
        assert!(device.buffer_at(b.address).is_none());
    }

    #[test]
    fn whole_view_aspects_follow_format() {
        let device = Device::new(Screen::new());
        let ds = device.create_image(&ImageCreateInfo::new_2d(Format::Z24UnormS8Uint, 4, 4));
        let info = ImageViewCreateInfo::whole(&ds);
        assert_eq!(info.aspects, ImageAspects::DEPTH | ImageAspects::STENCIL);
        let color = device.create_image(&ImageCreateInfo::new_2d(Format::R8G8B8A8Unorm, 4, 4));
        assert_eq!(ImageViewCreateInfo::whole(&color).aspects, ImageAspects::COLOR);
    }
}
