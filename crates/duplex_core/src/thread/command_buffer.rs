//! A deferred queue run by hand.

use std::collections::VecDeque;

use parking_lot::Mutex;

use super::{Command, CommandQueue};
use crate::error::SyncResult;

/// Collects commands and runs them when asked.
///
/// Stands in for the core thread when everything runs on one thread:
/// tools, headless runs and deterministic tests.
#[derive(Default)]
pub struct CommandBuffer {
    commands: Mutex<VecDeque<Command>>,
}

impl CommandBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of queued commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.lock().len()
    }

    /// Checks if no commands are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.lock().is_empty()
    }

    /// Runs queued commands in order until the buffer is empty.
    ///
    /// Commands queued while running are run too. Returns how many ran.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        loop {
            // Lock released before running so commands may queue more.
            let Some(command) = self.commands.lock().pop_front() else {
                break;
            };
            command();
            ran += 1;
        }
        ran
    }
}

impl CommandQueue for CommandBuffer {
    fn queue_command(&self, command: Command) -> SyncResult<()> {
        self.commands.lock().push_back(command);
        Ok(())
    }
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("queued", &self.len())
            .finish()
    }
}
