//! # Core Thread Commands
//!
//! The sim thread talks to the core thread by queueing closures.
//!
//! ```text
//! Sim thread                       Core thread
//! ──────────                       ───────────
//! queue_command(f1) ──┐
//! queue_command(f2) ──┼──▶ FIFO ──▶ f1(), f2(), f3() ...
//! queue_command(f3) ──┘
//! ```
//!
//! Commands run one at a time, in submission order. Nothing is cancelled:
//! a command that was accepted always runs before the thread stops.

mod command_buffer;
mod core_thread;

pub use command_buffer::CommandBuffer;
pub use core_thread::{queue_with_result, AsyncOp, CoreThread};

use crate::error::SyncResult;

/// A unit of work for the core thread.
pub type Command = Box<dyn FnOnce() + Send + 'static>;

/// Anything that can run [`Command`]s in submission order.
pub trait CommandQueue {
    /// Queues `command` behind every previously queued one.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::CoreThreadStopped`](crate::SyncError::CoreThreadStopped)
    /// if the queue no longer accepts commands.
    fn queue_command(&self, command: Command) -> SyncResult<()>;
}
