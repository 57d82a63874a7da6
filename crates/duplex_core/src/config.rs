//! # Sync Configuration
//!
//! Loaded once at startup, from TOML or defaults.
//!
//! ```toml
//! frame_alloc_capacity = 1048576
//! command_queue_capacity = 0
//! core_thread_name = "core"
//! max_dependency_depth = 64
//! detect_cycles = true
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Default soft budget of a single frame allocator (1MB).
pub const DEFAULT_FRAME_ALLOC_CAPACITY: usize = 1024 * 1024;

/// Default recursion cap for the dependency-first walk.
pub const DEFAULT_MAX_DEPENDENCY_DEPTH: usize = 64;

/// Configuration for the manager and the core thread.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Soft byte budget per frame allocator. Exceeding it is logged, not fatal.
    pub frame_alloc_capacity: usize,
    /// Capacity of the core thread command channel. 0 means unbounded.
    pub command_queue_capacity: usize,
    /// Name given to the core thread.
    pub core_thread_name: String,
    /// Maximum depth of the dependency-first walk.
    pub max_dependency_depth: usize,
    /// Reject dependency declarations that would form a cycle.
    pub detect_cycles: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            frame_alloc_capacity: DEFAULT_FRAME_ALLOC_CAPACITY,
            command_queue_capacity: 0,
            core_thread_name: "core".to_string(),
            max_dependency_depth: DEFAULT_MAX_DEPENDENCY_DEPTH,
            detect_cycles: true,
        }
    }
}

impl SyncConfig {
    /// Parses a configuration from TOML text. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] if the text does not parse or
    /// fails validation.
    pub fn from_toml_str(text: &str) -> SyncResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| SyncError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ConfigIo`] if the file cannot be read, or
    /// [`SyncError::InvalidConfig`] if its contents are invalid.
    pub fn from_toml_file(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SyncError::ConfigIo(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] naming the offending key.
    pub fn validate(&self) -> SyncResult<()> {
        if self.frame_alloc_capacity == 0 {
            return Err(SyncError::InvalidConfig(
                "frame_alloc_capacity must be greater than zero".to_string(),
            ));
        }
        if self.max_dependency_depth == 0 {
            return Err(SyncError::InvalidConfig(
                "max_dependency_depth must be greater than zero".to_string(),
            ));
        }
        if self.core_thread_name.is_empty() {
            return Err(SyncError::InvalidConfig(
                "core_thread_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
