//! # Sync Batches
//!
//! One batch per download pass, applied on the core thread in FIFO order.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::dirty::RetainedSync;
use crate::memory::{CoreSyncData, FrameAlloc};
use crate::object::{CoreObjectCore, CoreObjectId};

/// One captured delta.
pub struct SyncEntry {
    /// The core object to apply to. Observed, never owned.
    pub core: Weak<dyn CoreObjectCore>,
    /// Id of the sim object that produced the delta.
    pub id: CoreObjectId,
    /// The delta itself.
    pub data: CoreSyncData,
    /// Initialize the core side before applying.
    pub initialize: bool,
}

impl fmt::Debug for SyncEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEntry")
            .field("id", &self.id)
            .field("alive", &(self.core.strong_count() > 0))
            .field("data", &self.data)
            .field("initialize", &self.initialize)
            .finish()
    }
}

/// Result of applying one batch on the core thread.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UploadReport {
    /// Sequence number of the applied batch.
    pub sequence: u64,
    /// Deltas applied to live core objects.
    pub applied: usize,
    /// Deltas whose core object was already gone.
    pub skipped: usize,
    /// Core objects initialized.
    pub initialized: usize,
    /// Core objects destroyed.
    pub destroyed: usize,
}

/// All deltas captured by one sync pass, in application order.
pub struct SyncBatch {
    sequence: u64,
    allocator: Arc<FrameAlloc>,
    entries: Vec<SyncEntry>,
    /// Final deltas of destroyed objects among `entries`.
    retained: usize,
    /// Core objects of destroyed sim objects, kept alive until applied.
    destroyed: Vec<(CoreObjectId, Arc<dyn CoreObjectCore>)>,
    /// Core objects of sim objects destroyed while clean. Observed only.
    released: Vec<(CoreObjectId, Weak<dyn CoreObjectCore>)>,
}

impl SyncBatch {
    /// Creates an empty batch whose payloads come from `allocator`.
    #[must_use]
    pub fn new(sequence: u64, allocator: Arc<FrameAlloc>) -> Self {
        Self {
            sequence,
            allocator,
            entries: Vec::new(),
            retained: 0,
            destroyed: Vec::new(),
            released: Vec::new(),
        }
    }

    /// Appends a delta for a live object.
    ///
    /// With `initialize` set, the core side is initialized first.
    pub fn push(
        &mut self,
        core: &Arc<dyn CoreObjectCore>,
        id: CoreObjectId,
        data: CoreSyncData,
        initialize: bool,
    ) {
        self.entries.push(SyncEntry {
            core: Arc::downgrade(core),
            id,
            data,
            initialize,
        });
    }

    /// Appends the final delta of a destroyed object, then its destruction.
    pub fn push_retained(&mut self, retained: RetainedSync) {
        let RetainedSync {
            core,
            id,
            data,
            initialize,
        } = retained;
        self.push(&core, id, data, initialize);
        self.retained += 1;
        self.destroyed.push((id, core));
    }

    /// Schedules the destruction of a core object that has no final delta.
    ///
    /// It only runs if something else kept the core object alive.
    pub fn push_destroy(&mut self, id: CoreObjectId, core: Weak<dyn CoreObjectCore>) {
        self.released.push((id, core));
    }

    /// Returns the sequence number of the pass that produced this batch.
    #[inline]
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns the frame allocator this batch was tagged with.
    #[must_use]
    pub fn allocator(&self) -> &Arc<FrameAlloc> {
        &self.allocator
    }

    /// Returns the captured deltas in application order.
    #[must_use]
    pub fn entries(&self) -> &[SyncEntry] {
        &self.entries
    }

    /// Returns the ids in application order.
    #[must_use]
    pub fn ids(&self) -> Vec<CoreObjectId> {
        self.entries.iter().map(|e| e.id).collect()
    }

    /// Returns the number of deltas.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Checks if the batch holds no deltas.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns how many deltas belong to destroyed objects.
    #[must_use]
    pub fn retained_count(&self) -> usize {
        self.retained
    }

    /// Returns how many core objects this batch is asked to destroy.
    #[must_use]
    pub fn destroy_count(&self) -> usize {
        self.destroyed.len() + self.released.len()
    }

    /// Returns the total payload size in bytes.
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.entries.iter().map(|e| e.data.size()).sum()
    }

    /// Applies every delta whose core object is still alive, in order,
    /// then destroys the core objects of destroyed sim objects.
    ///
    /// Consumes the batch: payloads go back to their allocators and the
    /// destroyed core objects are released afterwards.
    pub fn apply(self) -> UploadReport {
        let mut report = UploadReport {
            sequence: self.sequence,
            ..UploadReport::default()
        };

        for entry in &self.entries {
            match entry.core.upgrade() {
                Some(core) => {
                    if entry.initialize {
                        core.initialize(entry.id);
                        report.initialized += 1;
                    }
                    core.sync_to_core(&entry.data);
                    report.applied += 1;
                }
                None => report.skipped += 1,
            }
        }

        for (id, core) in &self.destroyed {
            core.destroy(*id);
            report.destroyed += 1;
        }
        for (id, core) in &self.released {
            if let Some(core) = core.upgrade() {
                core.destroy(*id);
                report.destroyed += 1;
            }
        }

        report
    }
}

impl fmt::Debug for SyncBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncBatch")
            .field("sequence", &self.sequence)
            .field("entries", &self.entries)
            .field("retained", &self.retained)
            .field("destroyed", &self.destroyed.len())
            .field("released", &self.released.len())
            .finish()
    }
}

/// FIFO of batches waiting for the core thread.
///
/// Cloning shares the same queue.
#[derive(Clone, Debug, Default)]
pub struct PendingBatches {
    queue: Arc<Mutex<VecDeque<SyncBatch>>>,
}

impl PendingBatches {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a batch behind every earlier one.
    pub fn push(&self, batch: SyncBatch) {
        self.queue.lock().push_back(batch);
    }

    /// Pops and applies the oldest batch.
    ///
    /// The queue lock is released before any delta is applied.
    pub fn apply_next(&self) -> Option<UploadReport> {
        let batch = self.queue.lock().pop_front()?;
        let report = batch.apply();
        tracing::trace!(
            sequence = report.sequence,
            applied = report.applied,
            skipped = report.skipped,
            destroyed = report.destroyed,
            "sync batch applied"
        );
        Some(report)
    }

    /// Returns the number of queued batches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Checks if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}
