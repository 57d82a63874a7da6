//! # Sync Error Types
//!
//! Errors surfaced on the sim-side API. Nothing in here ever crosses to the
//! core thread: the core side only sees sync payloads and liveness checks.

use thiserror::Error;

use crate::object::CoreObjectId;

/// Errors that can occur while driving core object synchronization.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Declaring these dependencies would close a cycle in the graph.
    #[error("dependency cycle detected at object {object}: {path:?}")]
    DependencyCycle {
        /// The object whose declaration was rejected.
        object: CoreObjectId,
        /// The cycle, starting and ending at `object`.
        path: Vec<CoreObjectId>,
    },

    /// The object has no id assigned (never registered, or already unregistered).
    #[error("object {0} is not registered")]
    NotRegistered(CoreObjectId),

    /// The object was already registered with a manager.
    #[error("object {0} is already registered")]
    AlreadyRegistered(CoreObjectId),

    /// A payload was read past its end.
    #[error("truncated sync data: need {needed} bytes, {remaining} remaining")]
    TruncatedSyncData {
        /// Bytes requested by the read.
        needed: usize,
        /// Bytes left in the payload.
        remaining: usize,
    },

    /// The core thread no longer accepts commands.
    #[error("core thread has stopped")]
    CoreThreadStopped,

    /// The core thread could not be started.
    #[error("failed to spawn core thread: {0}")]
    ThreadSpawn(String),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    ConfigIo(String),
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
