//! Command-buffer replay on top of the pipe layer.
//!
//! A recorded [`CommandBuffer`] is a flat list of [`Cmd`]s, the way a
//! Vulkan-style frontend captures them. [`Executor`] replays it against any
//! [`aero_pipe::PipeContext`]: state commands accumulate in a shadow copy of
//! the bound state with per-group dirty flags, and draws, dispatches and
//! clears push only what changed since the last flush.
//!
//! Secondary command buffers and device-generated command lists replay
//! recursively over the same state, bounded by
//! [`ReplayConfig::max_replay_depth`].

pub mod cmd;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod generated;
pub mod graphics;
pub mod objects;
pub mod stats;

mod binding;
mod draw;
mod dynamic;
mod emit;
mod execute;
mod pipeline;
mod query;
mod rendering;
mod state;
mod transfer;

pub use cmd::Cmd;
pub use config::ReplayConfig;
pub use error::{ExecutionReport, ExecutorError, ExecutorEvent};
pub use execute::Executor;
pub use objects::{CommandBuffer, Device};
pub use stats::{ReplayStats, ReplayStatsSnapshot};
