//! # DUPLEX Core
//!
//! Sim-to-core object synchronization for a dual-threaded engine:
//! - The sim thread mutates resources and never waits on the core thread
//! - The core thread owns the render-facing copies and applies deltas
//! - Deltas are applied dependencies first, in frame order
//!
//! ## Architecture Rules
//!
//! 1. **No shared mutable state across threads** - Only serialized deltas cross
//! 2. **Only dirty objects pay** - Clean objects cost nothing per frame
//! 3. **Weak everywhere but the owner** - A destroyed resource is never touched
//!
//! ## Example
//!
//! ```rust,ignore
//! use duplex_core::{CoreObjectManager, CoreThread, SyncConfig};
//!
//! let config = SyncConfig::default();
//! let manager = CoreObjectManager::new(config.clone());
//! let core_thread = CoreThread::spawn(&config)?;
//!
//! // each frame
//! manager.sync_to_core(&core_thread)?;
//! manager.end_frame();
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;
pub mod memory;
pub mod object;
pub mod sync;
pub mod thread;

pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use memory::{CoreSyncData, FrameAlloc, FrameAllocators, SyncReader, SyncWriter};
pub use object::{
    CoreObject, CoreObjectCore, CoreObjectExt, CoreObjectId, CoreObjectState, DirtyState,
    ALL_DIRTY_FLAGS,
};
pub use sync::{CoreObjectManager, PendingBatches, SyncBatch, SyncStats, UploadReport};
pub use thread::{queue_with_result, AsyncOp, Command, CommandBuffer, CommandQueue, CoreThread};
