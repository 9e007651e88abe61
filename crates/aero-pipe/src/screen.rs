use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::blit::BlitProgramCache;
use crate::format::{Format, TextureTarget};
use crate::resource::{Resource, ResourceTemplate};
use crate::validate::StateCache;

/// Snapshot of the live-object counters of a [`Screen`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ObjectCountersSnapshot {
    pub resources_created: u64,
    pub resources_destroyed: u64,
    pub surfaces_created: u64,
    pub surfaces_destroyed: u64,
    pub sampler_views_created: u64,
    pub sampler_views_destroyed: u64,
    pub so_targets_created: u64,
    pub so_targets_destroyed: u64,
}

impl ObjectCountersSnapshot {
    pub fn live_resources(&self) -> u64 {
        self.resources_created - self.resources_destroyed
    }

    pub fn live_surfaces(&self) -> u64 {
        self.surfaces_created - self.surfaces_destroyed
    }

    pub fn live_sampler_views(&self) -> u64 {
        self.sampler_views_created - self.sampler_views_destroyed
    }

    pub fn live_so_targets(&self) -> u64 {
        self.so_targets_created - self.so_targets_destroyed
    }
}

/// Creation/destruction counters shared by every object a screen hands out.
///
/// Objects keep an `Arc` to this instead of to the screen itself so that
/// screen-owned caches holding objects never form a cycle.
#[derive(Debug, Default)]
pub struct ObjectCounters {
    resources_created: AtomicU64,
    resources_destroyed: AtomicU64,
    surfaces_created: AtomicU64,
    surfaces_destroyed: AtomicU64,
    sampler_views_created: AtomicU64,
    sampler_views_destroyed: AtomicU64,
    so_targets_created: AtomicU64,
    so_targets_destroyed: AtomicU64,
}

impl ObjectCounters {
    pub(crate) fn inc_resources_created(&self) {
        self.resources_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_resources_destroyed(&self) {
        self.resources_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_surfaces_created(&self) {
        self.surfaces_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_surfaces_destroyed(&self) {
        self.surfaces_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_sampler_views_created(&self) {
        self.sampler_views_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_sampler_views_destroyed(&self) {
        self.sampler_views_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_so_targets_created(&self) {
        self.so_targets_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_so_targets_destroyed(&self) {
        self.so_targets_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ObjectCountersSnapshot {
        ObjectCountersSnapshot {
            resources_created: self.resources_created.load(Ordering::Relaxed),
            resources_destroyed: self.resources_destroyed.load(Ordering::Relaxed),
            surfaces_created: self.surfaces_created.load(Ordering::Relaxed),
            surfaces_destroyed: self.surfaces_destroyed.load(Ordering::Relaxed),
            sampler_views_created: self.sampler_views_created.load(Ordering::Relaxed),
            sampler_views_destroyed: self.sampler_views_destroyed.load(Ordering::Relaxed),
            so_targets_created: self.so_targets_created.load(Ordering::Relaxed),
            so_targets_destroyed: self.so_targets_destroyed.load(Ordering::Relaxed),
        }
    }
}

/// The device-wide half of the pipe layer.
///
/// A screen creates resources and owns every cache that is shared between the
/// contexts created from it (state objects, blit programs).
#[derive(Debug)]
pub struct Screen {
    counters: Arc<ObjectCounters>,
    next_id: AtomicU32,
    state_cache: StateCache,
    blit_programs: BlitProgramCache,
}

impl Screen {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            counters: Arc::new(ObjectCounters::default()),
            next_id: AtomicU32::new(1),
            state_cache: StateCache::default(),
            blit_programs: BlitProgramCache::default(),
        })
    }

    /// Allocate a screen-unique object id. Ids are never reused.
    pub fn alloc_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn counters(&self) -> &Arc<ObjectCounters> {
        &self.counters
    }

    pub fn state_cache(&self) -> &StateCache {
        &self.state_cache
    }

    pub fn blit_programs(&self) -> &BlitProgramCache {
        &self.blit_programs
    }

    pub fn resource_create(&self, templ: &ResourceTemplate) -> Arc<Resource> {
        Arc::new(Resource::new(self.alloc_id(), *templ, self.counters.clone()))
    }

    /// Create a linear buffer of `size` bytes.
    pub fn buffer_create(&self, size: u32) -> Arc<Resource> {
        self.resource_create(&ResourceTemplate::buffer(size))
    }

    /// Create a buffer resource initialized from `data`.
    pub fn buffer_from_bytes(&self, data: &[u8]) -> Arc<Resource> {
        let size = u32::try_from(data.len()).unwrap_or(u32::MAX);
        let res = self.buffer_create(size);
        res.write(0, data);
        res
    }

    /// Create a sub-range wrapper that aliases `[offset, offset + size)` of
    /// `parent`. The wrapper keeps `parent` alive.
    pub fn buffer_wrap(&self, parent: &Arc<Resource>, offset: u64, size: u32) -> Arc<Resource> {
        Arc::new(Resource::new_view(
            self.alloc_id(),
            parent.clone(),
            offset,
            size,
            self.counters.clone(),
        ))
    }

    pub fn texture_create(
        &self,
        target: TextureTarget,
        format: Format,
        extent: [u32; 3],
        array_size: u32,
        nr_samples: u32,
    ) -> Arc<Resource> {
        self.resource_create(&ResourceTemplate {
            target,
            format,
            width0: extent[0],
            height0: extent[1],
            depth0: extent[2],
            array_size,
            last_level: 0,
            nr_samples,
        })
    }
}
