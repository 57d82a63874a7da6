//! # Frame Memory
//!
//! Per-frame scratch memory for sync payloads.
//!
//! ## Design Philosophy
//!
//! Every payload is produced on the sim thread during a sync pass and
//! released on the core thread after it has been applied:
//! - Allocation and release are counted against the allocator that produced it
//! - An allocator is only recycled once every payload came back
//! - Two allocators alternate, one per frame

mod frame_alloc;
mod sync_data;

pub use frame_alloc::{FrameAlloc, FrameAllocators};
pub use sync_data::{CoreSyncData, SyncReader, SyncWriter};
