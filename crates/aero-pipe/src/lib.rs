//! Gallium-style pipe layer: resources, state objects and the per-context
//! command interface that command-stream frontends drive.
//!
//! Besides the [`PipeContext`] trait this crate carries the helpers shared by
//! every backend: the draw normalizer ([`normalize`]), state-object caches
//! ([`validate`]), blit path selection and the shader blitter ([`blit`]), and
//! [`TraceContext`], a CPU backend that records every call.

pub mod blit;
pub mod cache;
pub mod context;
pub mod draw;
pub mod error;
pub mod format;
pub mod normalize;
pub mod reference;
pub mod resource;
pub mod screen;
pub mod state;
pub mod trace;
pub mod upload;
pub mod validate;

pub use blit::{BlitInfo, BlitMask, BlitPath, BlitSurface};
pub use context::{
    pipe_buffer_read, pipe_buffer_write, ClearFlags, CsoHandle, Fence, MapFlags, PipeBox,
    PipeContext, QueryHandle, QueryType, Rect,
};
pub use draw::{DrawIndirectInfo, DrawInfo, DrawStartCountBias, GridInfo, PrimType};
pub use error::PipeError;
pub use format::{ColorUnion, Format, TextureTarget};
pub use reference::{release, retain};
pub use resource::{Resource, ResourceTemplate, SamplerView, StreamOutputTarget, Surface};
pub use screen::Screen;
pub use trace::{PipeCall, TraceContext};
pub use upload::UploadArena;
