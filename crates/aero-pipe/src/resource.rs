use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::format::{Format, TextureTarget};
use crate::screen::ObjectCounters;

/// Creation parameters of a [`Resource`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ResourceTemplate {
    pub target: TextureTarget,
    pub format: Format,
    pub width0: u32,
    pub height0: u32,
    pub depth0: u32,
    pub array_size: u32,
    pub last_level: u32,
    pub nr_samples: u32,
}

impl ResourceTemplate {
    pub fn buffer(size: u32) -> Self {
        Self {
            target: TextureTarget::Buffer,
            format: Format::R8Unorm,
            width0: size,
            height0: 1,
            depth0: 1,
            array_size: 1,
            last_level: 0,
            nr_samples: 0,
        }
    }

    pub fn samples(&self) -> u32 {
        self.nr_samples.max(1)
    }

    pub fn level_extent(&self, level: u32) -> [u32; 3] {
        [
            (self.width0 >> level).max(1),
            (self.height0 >> level).max(1),
            if self.target.is_layout_3d() {
                (self.depth0 >> level).max(1)
            } else {
                1
            },
        ]
    }

    /// Bytes per texel including every sample.
    pub fn texel_size(&self) -> u64 {
        u64::from(self.format.block_size()) * u64::from(self.samples())
    }

    pub fn row_stride(&self, level: u32) -> u64 {
        u64::from(self.level_extent(level)[0]) * self.texel_size()
    }

    /// Stride between consecutive layers (or 3D slices) of `level`.
    pub fn layer_stride(&self, level: u32) -> u64 {
        self.row_stride(level) * u64::from(self.level_extent(level)[1])
    }

    fn layers(&self) -> u64 {
        u64::from(self.array_size.max(1))
    }

    pub fn level_offset(&self, level: u32) -> u64 {
        (0..level)
            .map(|l| self.level_size(l))
            .sum()
    }

    fn level_size(&self, level: u32) -> u64 {
        let ext = self.level_extent(level);
        self.layer_stride(level) * u64::from(ext[2]) * self.layers()
    }

    pub fn total_size(&self) -> u64 {
        if self.target == TextureTarget::Buffer {
            return u64::from(self.width0);
        }
        self.level_offset(self.last_level + 1)
    }

    /// Byte offset of texel `(x, y, layer_or_slice)` in `level`.
    pub fn texel_offset(&self, level: u32, x: u32, y: u32, z: u32) -> u64 {
        self.level_offset(level)
            + u64::from(z) * self.layer_stride(level)
            + u64::from(y) * self.row_stride(level)
            + u64::from(x) * self.texel_size()
    }
}

enum Backing {
    Owned(Mutex<Vec<u8>>),
    /// Sub-range of another resource.
    View { parent: Arc<Resource>, offset: u64 },
}

/// A GPU-visible buffer or texture.
///
/// Shared ownership is expressed with `Arc<Resource>`; see [`crate::retain`].
/// Dropping the last reference destroys the resource and is reported to the
/// owning screen's counters.
pub struct Resource {
    id: u32,
    template: ResourceTemplate,
    backing: Backing,
    counters: Arc<ObjectCounters>,
}

impl Resource {
    pub(crate) fn new(id: u32, template: ResourceTemplate, counters: Arc<ObjectCounters>) -> Self {
        let size = usize::try_from(template.total_size()).unwrap_or(0);
        counters.inc_resources_created();
        Self {
            id,
            template,
            backing: Backing::Owned(Mutex::new(vec![0u8; size])),
            counters,
        }
    }

    pub(crate) fn new_view(
        id: u32,
        parent: Arc<Resource>,
        offset: u64,
        size: u32,
        counters: Arc<ObjectCounters>,
    ) -> Self {
        counters.inc_resources_created();
        Self {
            id,
            template: ResourceTemplate::buffer(size),
            backing: Backing::View { parent, offset },
            counters,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn template(&self) -> &ResourceTemplate {
        &self.template
    }

    pub fn format(&self) -> Format {
        self.template.format
    }

    pub fn target(&self) -> TextureTarget {
        self.template.target
    }

    pub fn width0(&self) -> u32 {
        self.template.width0
    }

    pub fn nr_samples(&self) -> u32 {
        self.template.nr_samples
    }

    pub fn is_buffer(&self) -> bool {
        self.template.target == TextureTarget::Buffer
    }

    /// Size in bytes of the resource's storage.
    pub fn size(&self) -> u64 {
        self.template.total_size()
    }

    /// The resource this one aliases, if it is a sub-range wrapper.
    pub fn parent(&self) -> Option<(&Arc<Resource>, u64)> {
        match &self.backing {
            Backing::Owned(_) => None,
            Backing::View { parent, offset } => Some((parent, *offset)),
        }
    }

    /// Walk wrapper chains to the owning storage and run `f` on
    /// `[offset, offset + len)` of it. Returns `None` when out of bounds.
    fn with_range<R>(&self, offset: u64, len: u64, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        let end = offset.checked_add(len)?;
        if end > self.size() {
            return None;
        }
        match &self.backing {
            Backing::Owned(data) => {
                let mut data = lock(data);
                let start = usize::try_from(offset).ok()?;
                let end = usize::try_from(end).ok()?;
                Some(f(data.get_mut(start..end)?))
            }
            Backing::View { parent, offset: base } => parent.with_range(base + offset, len, f),
        }
    }

    pub fn read(&self, offset: u64, len: u64) -> Option<Vec<u8>> {
        self.with_range(offset, len, |bytes| bytes.to_vec())
    }

    pub fn read_u32(&self, offset: u64) -> Option<u32> {
        let bytes = self.read(offset, 4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn write(&self, offset: u64, data: &[u8]) -> bool {
        self.with_range(offset, data.len() as u64, |bytes| bytes.copy_from_slice(data))
            .is_some()
    }

    pub fn write_u32(&self, offset: u64, value: u32) -> bool {
        self.write(offset, &value.to_le_bytes())
    }

    /// Run `f` over a mutable view of `[offset, offset + len)`.
    pub fn modify<R>(&self, offset: u64, len: u64, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        self.with_range(offset, len, f)
    }
}

fn lock(data: &Mutex<Vec<u8>>) -> MutexGuard<'_, Vec<u8>> {
    data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Drop for Resource {
    fn drop(&mut self) {
        tracing::trace!(id = self.id, "resource destroyed");
        self.counters.inc_resources_destroyed();
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.id)
            .field("template", &self.template)
            .field("view_of", &self.parent().map(|(p, off)| (p.id, off)))
            .finish()
    }
}

/// Creation parameters of a [`Surface`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SurfaceTemplate {
    pub format: Format,
    pub level: u32,
    pub first_layer: u32,
    pub last_layer: u32,
}

/// A renderable view of one level and a layer range of a texture.
pub struct Surface {
    id: u32,
    texture: Arc<Resource>,
    templ: SurfaceTemplate,
    counters: Arc<ObjectCounters>,
}

impl Surface {
    pub fn new(id: u32, texture: Arc<Resource>, templ: SurfaceTemplate, counters: Arc<ObjectCounters>) -> Self {
        counters.inc_surfaces_created();
        Self {
            id,
            texture,
            templ,
            counters,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn texture(&self) -> &Arc<Resource> {
        &self.texture
    }

    pub fn format(&self) -> Format {
        self.templ.format
    }

    pub fn level(&self) -> u32 {
        self.templ.level
    }

    pub fn first_layer(&self) -> u32 {
        self.templ.first_layer
    }

    pub fn last_layer(&self) -> u32 {
        self.templ.last_layer
    }

    pub fn width(&self) -> u32 {
        self.texture.template().level_extent(self.templ.level)[0]
    }

    pub fn height(&self) -> u32 {
        self.texture.template().level_extent(self.templ.level)[1]
    }

    pub fn nr_samples(&self) -> u32 {
        self.texture.nr_samples()
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        self.counters.inc_surfaces_destroyed();
    }
}

impl fmt::Debug for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surface")
            .field("id", &self.id)
            .field("texture", &self.texture.id())
            .field("templ", &self.templ)
            .finish()
    }
}

/// Creation parameters of a [`SamplerView`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SamplerViewTemplate {
    pub format: Format,
    pub target: TextureTarget,
    pub first_level: u32,
    pub last_level: u32,
    pub first_layer: u32,
    pub last_layer: u32,
}

pub struct SamplerView {
    id: u32,
    texture: Arc<Resource>,
    templ: SamplerViewTemplate,
    counters: Arc<ObjectCounters>,
}

impl SamplerView {
    pub fn new(
        id: u32,
        texture: Arc<Resource>,
        templ: SamplerViewTemplate,
        counters: Arc<ObjectCounters>,
    ) -> Self {
        counters.inc_sampler_views_created();
        Self {
            id,
            texture,
            templ,
            counters,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn texture(&self) -> &Arc<Resource> {
        &self.texture
    }

    pub fn template(&self) -> &SamplerViewTemplate {
        &self.templ
    }
}

impl Drop for SamplerView {
    fn drop(&mut self) {
        self.counters.inc_sampler_views_destroyed();
    }
}

impl fmt::Debug for SamplerView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SamplerView")
            .field("id", &self.id)
            .field("texture", &self.texture.id())
            .field("templ", &self.templ)
            .finish()
    }
}

/// A transform-feedback destination range inside a buffer.
pub struct StreamOutputTarget {
    id: u32,
    buffer: Arc<Resource>,
    buffer_offset: u32,
    buffer_size: u32,
    /// Bytes written so far.
    filled: AtomicU32,
    counters: Arc<ObjectCounters>,
}

impl StreamOutputTarget {
    pub fn new(
        id: u32,
        buffer: Arc<Resource>,
        buffer_offset: u32,
        buffer_size: u32,
        counters: Arc<ObjectCounters>,
    ) -> Self {
        counters.inc_so_targets_created();
        Self {
            id,
            buffer,
            buffer_offset,
            buffer_size,
            filled: AtomicU32::new(0),
            counters,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn buffer(&self) -> &Arc<Resource> {
        &self.buffer
    }

    pub fn buffer_offset(&self) -> u32 {
        self.buffer_offset
    }

    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    pub fn filled(&self) -> u32 {
        self.filled.load(Ordering::Relaxed)
    }

    pub fn set_filled(&self, bytes: u32) {
        self.filled.store(bytes, Ordering::Relaxed);
    }
}

impl Drop for StreamOutputTarget {
    fn drop(&mut self) {
        self.counters.inc_so_targets_destroyed();
    }
}

impl fmt::Debug for StreamOutputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamOutputTarget")
            .field("id", &self.id)
            .field("buffer", &self.buffer.id())
            .field("buffer_offset", &self.buffer_offset)
            .field("buffer_size", &self.buffer_size)
            .field("filled", &self.filled())
            .finish()
    }
}

/// Resources, views and targets compare by identity.
macro_rules! identity_eq {
    ($($ty:ty),*) => {$(
        impl PartialEq for $ty {
            fn eq(&self, other: &Self) -> bool {
                std::ptr::eq(self, other)
            }
        }

        impl Eq for $ty {}
    )*};
}

identity_eq!(Resource, Surface, SamplerView, StreamOutputTarget);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::Screen;

    #[test]
    fn views_alias_parent_storage() {
        let screen = Screen::new();
        let parent = screen.buffer_from_bytes(&[0, 1, 2, 3, 4, 5, 6, 7]);
        let view = screen.buffer_wrap(&parent, 4, 4);
        assert_eq!(view.read(0, 4).unwrap(), vec![4, 5, 6, 7]);
        assert!(view.write(1, &[9]));
        assert_eq!(parent.read(5, 1).unwrap(), vec![9]);
        assert!(view.read(2, 4).is_none());
    }

    #[test]
    fn texture_offsets_walk_levels_and_layers() {
        let templ = ResourceTemplate {
            target: TextureTarget::Texture2DArray,
            format: Format::R8G8B8A8Unorm,
            width0: 4,
            height0: 4,
            depth0: 1,
            array_size: 2,
            last_level: 1,
            nr_samples: 0,
        };
        assert_eq!(templ.layer_stride(0), 64);
        assert_eq!(templ.level_offset(1), 128);
        assert_eq!(templ.texel_offset(1, 1, 1, 1), 128 + 16 + 8 + 4);
        assert_eq!(templ.total_size(), 128 + 32);
    }

    #[test]
    fn dropping_resources_updates_counters() {
        let screen = Screen::new();
        let a = screen.buffer_create(16);
        let b = screen.buffer_wrap(&a, 0, 8);
        assert_eq!(screen.counters().snapshot().live_resources(), 2);
        drop(a);
        // The wrapper keeps its parent alive.
        assert_eq!(screen.counters().snapshot().live_resources(), 2);
        drop(b);
        assert_eq!(screen.counters().snapshot().live_resources(), 0);
    }
}
