//! Umbrella crate for the command-buffer replay stack.
//!
//! [`pipe`] is the backend-facing layer and [`lvp`] replays recorded command
//! buffers on top of it.

pub use aero_lvp as lvp;
pub use aero_pipe as pipe;
