//! State-object validation: mapping semantic pipeline state to bound backend
//! objects.
//!
//! [`StateCache`] lives on the screen and owns one backend object per distinct
//! state value. [`StateBinder`] lives with each context and skips re-binding
//! the handle that is already bound.

use tracing::{debug, warn};

use crate::cache::{CacheStats, KeyedCache};
use crate::context::{CsoHandle, PipeContext};
use crate::error::PipeError;
use crate::state::{
    BlendState, DepthStencilAlphaState, RasterizerState, ShaderStage, VertexElements,
};

/// Backend state objects keyed by value, shared by every context of a screen.
#[derive(Debug, Default)]
pub struct StateCache {
    blend: KeyedCache<BlendState, CsoHandle>,
    rasterizer: KeyedCache<RasterizerState, CsoHandle>,
    depth_stencil_alpha: KeyedCache<DepthStencilAlphaState, CsoHandle>,
    vertex_elements: KeyedCache<VertexElements, CsoHandle>,
}

/// Hit/miss counters for each state category.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StateCacheStats {
    pub blend: CacheStats,
    pub rasterizer: CacheStats,
    pub depth_stencil_alpha: CacheStats,
    pub vertex_elements: CacheStats,
}

impl StateCache {
    pub fn blend<C: PipeContext + ?Sized>(&self, ctx: &mut C, state: &BlendState) -> Option<CsoHandle> {
        self.blend
            .get_or_create(state, || ctx.create_blend_state(state))
    }

    pub fn rasterizer<C: PipeContext + ?Sized>(
        &self,
        ctx: &mut C,
        state: &RasterizerState,
    ) -> Option<CsoHandle> {
        self.rasterizer
            .get_or_create(state, || ctx.create_rasterizer_state(state))
    }

    pub fn depth_stencil_alpha<C: PipeContext + ?Sized>(
        &self,
        ctx: &mut C,
        state: &DepthStencilAlphaState,
    ) -> Option<CsoHandle> {
        self.depth_stencil_alpha
            .get_or_create(state, || ctx.create_depth_stencil_alpha_state(state))
    }

    pub fn vertex_elements<C: PipeContext + ?Sized>(
        &self,
        ctx: &mut C,
        state: &VertexElements,
    ) -> Option<CsoHandle> {
        self.vertex_elements
            .get_or_create(state, || ctx.create_vertex_elements_state(state))
    }

    pub fn stats(&self) -> StateCacheStats {
        StateCacheStats {
            blend: self.blend.stats(),
            rasterizer: self.rasterizer.stats(),
            depth_stencil_alpha: self.depth_stencil_alpha.stats(),
            vertex_elements: self.vertex_elements.stats(),
        }
    }

    /// Delete every cached object through `ctx`.
    pub fn destroy<C: PipeContext + ?Sized>(&self, ctx: &mut C) {
        for h in self.blend.drain() {
            ctx.delete_blend_state(h);
        }
        for h in self.rasterizer.drain() {
            ctx.delete_rasterizer_state(h);
        }
        for h in self.depth_stencil_alpha.drain() {
            ctx.delete_depth_stencil_alpha_state(h);
        }
        for h in self.vertex_elements.drain() {
            ctx.delete_vertex_elements_state(h);
        }
    }
}

/// Per-context record of what is currently bound.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateBinder {
    blend: Option<CsoHandle>,
    rasterizer: Option<CsoHandle>,
    depth_stencil_alpha: Option<CsoHandle>,
    vertex_elements: Option<CsoHandle>,
    shaders: [Option<CsoHandle>; ShaderStage::COUNT],
}

macro_rules! cso_setter {
    ($name:ident, $field:ident, $state:ty, $cache:ident, $bind:ident) => {
        /// Resolve `state` through the screen cache and bind it. Returns
        /// `false` when the backend could not create the object; the previous
        /// binding is left in place.
        pub fn $name<C: PipeContext + ?Sized>(&mut self, ctx: &mut C, state: &$state) -> bool {
            let screen = ctx.screen().clone();
            let Some(handle) = screen.state_cache().$cache(ctx, state) else {
                warn!(state = stringify!($field), "failed to create state object");
                return false;
            };
            if self.$field != Some(handle) {
                ctx.$bind(Some(handle));
                self.$field = Some(handle);
            }
            true
        }
    };
}

impl StateBinder {
    cso_setter!(set_blend, blend, BlendState, blend, bind_blend_state);
    cso_setter!(set_rasterizer, rasterizer, RasterizerState, rasterizer, bind_rasterizer_state);
    cso_setter!(
        set_depth_stencil_alpha,
        depth_stencil_alpha,
        DepthStencilAlphaState,
        depth_stencil_alpha,
        bind_depth_stencil_alpha_state
    );
    cso_setter!(
        set_vertex_elements,
        vertex_elements,
        VertexElements,
        vertex_elements,
        bind_vertex_elements_state
    );

    pub fn bind_shader<C: PipeContext + ?Sized>(
        &mut self,
        ctx: &mut C,
        stage: ShaderStage,
        handle: Option<CsoHandle>,
    ) {
        let slot = &mut self.shaders[stage.index()];
        if *slot != handle {
            ctx.bind_shader_state(stage, handle);
            *slot = handle;
        }
    }

    pub fn shader(&self, stage: ShaderStage) -> Option<CsoHandle> {
        self.shaders[stage.index()]
    }

    pub fn blend(&self) -> Option<CsoHandle> {
        self.blend
    }

    pub fn rasterizer(&self) -> Option<CsoHandle> {
        self.rasterizer
    }

    pub fn depth_stencil_alpha(&self) -> Option<CsoHandle> {
        self.depth_stencil_alpha
    }

    pub fn vertex_elements(&self) -> Option<CsoHandle> {
        self.vertex_elements
    }

    /// Forget all bindings, e.g. after the backend state was clobbered.
    pub fn invalidate(&mut self) {
        *self = Self::default();
    }
}

/// Backends with a finite command buffer.
pub trait CommandSpace {
    /// Reserve `words` of command space for the next operation.
    fn reserve(&mut self, words: u64) -> Result<(), PipeError>;
}

/// Reserve `words` for one operation, flushing and retrying exactly once when
/// the command buffer is full. Returns `false` when the operation must be
/// skipped.
pub fn ensure_command_space<C: PipeContext + CommandSpace + ?Sized>(ctx: &mut C, words: u64) -> bool {
    match ctx.reserve(words) {
        Ok(()) => true,
        Err(err) => {
            debug!(%err, "flushing to make command space");
            let _fence = ctx.flush();
            match ctx.reserve(words) {
                Ok(()) => true,
                Err(err) => {
                    warn!(%err, "skipping operation after flush");
                    false
                }
            }
        }
    }
}
