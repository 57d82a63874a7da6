//! # Core Thread
//!
//! A dedicated OS thread draining a command channel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError};
use parking_lot::{Mutex, RwLock};

use super::{Command, CommandQueue};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};

/// The thread that owns core-side state.
///
/// Commands run in submission order. Shutting down drains every accepted
/// command before the thread exits. A panicking command takes the thread
/// down with it.
pub struct CoreThread {
    /// Taken on shutdown. The thread exits once the channel is drained.
    sender: RwLock<Option<Sender<Command>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
    name: String,
    stopped: AtomicBool,
    executed: Arc<AtomicU64>,
}

impl CoreThread {
    /// Spawns the core thread.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ThreadSpawn`] if the OS refuses the thread.
    pub fn spawn(config: &SyncConfig) -> SyncResult<Self> {
        let (sender, receiver) = if config.command_queue_capacity == 0 {
            unbounded()
        } else {
            bounded(config.command_queue_capacity)
        };

        let executed = Arc::new(AtomicU64::new(0));
        let thread_executed = Arc::clone(&executed);
        let handle = std::thread::Builder::new()
            .name(config.core_thread_name.clone())
            .spawn(move || run_commands(&receiver, &thread_executed))
            .map_err(|err| SyncError::ThreadSpawn(err.to_string()))?;

        let thread_id = handle.thread().id();
        tracing::debug!(name = %config.core_thread_name, "core thread started");

        Ok(Self {
            sender: RwLock::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
            thread_id,
            name: config.core_thread_name.clone(),
            stopped: AtomicBool::new(false),
            executed,
        })
    }

    /// Returns the thread name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Checks if the caller is running on the core thread.
    #[must_use]
    pub fn is_core_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Checks if the thread still accepts commands.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::Acquire)
    }

    /// Returns the number of commands run so far.
    #[must_use]
    pub fn commands_executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    /// Queues `f` and returns a handle to its result.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::CoreThreadStopped`] after shutdown.
    pub fn queue_return_command<T, F>(&self, f: F) -> SyncResult<AsyncOp<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        queue_with_result(self, f)
    }

    /// Blocks until every command queued before this call has run.
    ///
    /// Returns immediately when called on the core thread itself.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::CoreThreadStopped`] after shutdown.
    pub fn flush(&self) -> SyncResult<()> {
        if self.is_core_thread() {
            return Ok(());
        }
        self.queue_return_command(|| ())?.wait()
    }

    /// Stops accepting commands, runs the ones already queued and joins.
    ///
    /// Idempotent. Calling it from the core thread does not join.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::Release);

        if self.is_core_thread() {
            tracing::warn!(name = %self.name, "core thread shutdown requested from itself");
            // A sender blocked on a full queue holds the read lock until this
            // thread drains it, so waiting here could deadlock.
            match self.sender.try_write() {
                Some(mut intake) => drop(intake.take()),
                None => tracing::warn!(name = %self.name, "core thread intake still busy"),
            }
            return;
        }

        // Waits for in-flight sends. They complete because the thread keeps
        // draining.
        drop(self.sender.write().take());

        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if handle.join().is_err() {
            tracing::error!(name = %self.name, "core thread panicked");
        } else {
            tracing::debug!(
                name = %self.name,
                executed = self.commands_executed(),
                "core thread stopped"
            );
        }
    }
}

impl CommandQueue for CoreThread {
    /// Commands queued from the core thread itself run immediately.
    fn queue_command(&self, command: Command) -> SyncResult<()> {
        if self.is_core_thread() {
            if self.stopped.load(Ordering::Acquire) {
                return Err(SyncError::CoreThreadStopped);
            }
            command();
            self.executed.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        // Held across the send so shutdown cannot disconnect in between.
        let intake = self.sender.read();
        let Some(sender) = intake.as_ref() else {
            return Err(SyncError::CoreThreadStopped);
        };
        sender.send(command).map_err(|_| SyncError::CoreThreadStopped)
    }
}

impl Drop for CoreThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for CoreThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreThread")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .field("executed", &self.commands_executed())
            .finish_non_exhaustive()
    }
}

/// Runs commands until the sender is gone and the channel is empty.
fn run_commands(receiver: &Receiver<Command>, executed: &AtomicU64) {
    for command in receiver {
        command();
        executed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Queues `f` on `queue` and returns a handle to its result.
///
/// # Errors
///
/// Returns [`SyncError::CoreThreadStopped`] if `queue` rejects the command.
pub fn queue_with_result<T, F>(queue: &dyn CommandQueue, f: F) -> SyncResult<AsyncOp<T>>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (result_tx, result_rx) = bounded(1);
    queue.queue_command(Box::new(move || {
        // The caller may have dropped the handle.
        let _ = result_tx.send(f());
    }))?;
    Ok(AsyncOp {
        receiver: result_rx,
    })
}

/// The pending result of [`CoreThread::queue_return_command`].
#[derive(Debug)]
pub struct AsyncOp<T> {
    receiver: Receiver<T>,
}

impl<T> AsyncOp<T> {
    /// Blocks until the command has run and returns its result.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::CoreThreadStopped`] if the thread went away
    /// without running the command.
    pub fn wait(self) -> SyncResult<T> {
        self.receiver.recv().map_err(|_| SyncError::CoreThreadStopped)
    }

    /// Returns the result if the command has already run.
    ///
    /// The result is handed out once.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::CoreThreadStopped`] if the thread went away
    /// without running the command.
    pub fn try_get(&self) -> SyncResult<Option<T>> {
        match self.receiver.try_recv() {
            Ok(value) => Ok(Some(value)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(SyncError::CoreThreadStopped),
        }
    }
}
