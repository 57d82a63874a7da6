//! # Sim-to-Core Synchronization
//!
//! ## The Problem
//!
//! ```text
//! Sim thread:   mutates Texture, Material, Camera ...
//! Core thread:  owns the GPU-facing state of the same resources
//!
//! Sharing the objects directly: DATA RACE
//! Locking every object:         CONTENTION ON EVERY MUTATION
//! ```
//!
//! ## The Solution: Dirty Tracking + Two-Phase Sync
//!
//! ```text
//! Frame N (sim thread):
//!   mutate objects  → mark dirty (and their dependants)
//!   sync_download   → serialize dirty deltas, dependencies first,
//!                     into one batch; push batch on a FIFO
//!   queue closure   → core thread
//!
//! Later (core thread):
//!   sync_upload     → pop the oldest batch, apply each delta to its
//!                     core object if it is still alive, free payloads
//! ```
//!
//! The sim thread never waits for the core thread. FIFO order of batches
//! keeps frame N's effects visible before frame N+1's.

mod batch;
mod dirty;
mod graph;
mod manager;

pub use batch::{PendingBatches, SyncBatch, SyncEntry, UploadReport};
pub use dirty::{DirtyEntry, DirtySet, RetainedSync};
pub use graph::DependencyGraph;
pub use manager::{CoreObjectManager, SyncStats};
