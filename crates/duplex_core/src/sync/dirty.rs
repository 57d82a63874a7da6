//! # Dirty Set
//!
//! Which objects need syncing, in ascending id order.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::memory::CoreSyncData;
use crate::object::{CoreObjectCore, CoreObjectId};

/// What the dirty set knows about one dirty id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirtyEntry {
    /// The object is alive. Its delta is captured during the next pass.
    Live,
    /// The object was destroyed while dirty. Its last delta sits in the
    /// retained side table at this index.
    Retained(usize),
    /// The object was pushed by an eager sync with this sequence number.
    /// It stays listed so its dependants are still refreshed.
    Synced(u64),
}

/// Final delta of an object unregistered while dirty.
///
/// Holds a strong reference so the core object outlives the sim object
/// until this delta has been applied.
pub struct RetainedSync {
    /// The core object the delta belongs to.
    pub core: Arc<dyn CoreObjectCore>,
    /// Id of the destroyed sim object.
    pub id: CoreObjectId,
    /// The captured delta.
    pub data: CoreSyncData,
    /// The core side was never initialized.
    pub initialize: bool,
}

impl fmt::Debug for RetainedSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetainedSync")
            .field("id", &self.id)
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}

/// Dirty ids plus the retained payloads of destroyed objects.
#[derive(Debug, Default)]
pub struct DirtySet {
    entries: BTreeMap<CoreObjectId, DirtyEntry>,
    retained: Vec<Option<RetainedSync>>,
}

impl DirtySet {
    /// Creates an empty dirty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a live object dirty, replacing any retained payload reference.
    pub fn mark_live(&mut self, id: CoreObjectId) {
        self.entries.insert(id, DirtyEntry::Live);
    }

    /// Records that a live entry went out with eager sync `sequence`.
    ///
    /// Other entries are left alone.
    pub fn mark_synced(&mut self, id: CoreObjectId, sequence: u64) {
        if let Some(entry @ DirtyEntry::Live) = self.entries.get_mut(&id) {
            *entry = DirtyEntry::Synced(sequence);
        }
    }

    /// Stores the final delta of a destroyed object under its id.
    pub fn retain(&mut self, retained: RetainedSync) {
        let index = self.retained.len();
        let id = retained.id;
        self.retained.push(Some(retained));
        self.entries.insert(id, DirtyEntry::Retained(index));
    }

    /// Drops the entry for `id`.
    pub fn remove(&mut self, id: CoreObjectId) {
        self.entries.remove(&id);
    }

    /// Returns the entry for `id`.
    #[must_use]
    pub fn get(&self, id: CoreObjectId) -> Option<DirtyEntry> {
        self.entries.get(&id).copied()
    }

    /// Checks if `id` is in the set.
    #[must_use]
    pub fn contains(&self, id: CoreObjectId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Takes a retained payload out of the side table.
    pub fn take_retained(&mut self, index: usize) -> Option<RetainedSync> {
        self.retained.get_mut(index)?.take()
    }

    /// Returns every dirty id in ascending order.
    #[must_use]
    pub fn ids(&self) -> Vec<CoreObjectId> {
        self.entries.keys().copied().collect()
    }

    /// Returns every entry in ascending id order.
    #[must_use]
    pub fn entries(&self) -> Vec<(CoreObjectId, DirtyEntry)> {
        self.entries.iter().map(|(&id, &entry)| (id, entry)).collect()
    }

    /// Returns the number of dirty ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Checks if nothing is dirty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clears entries and the retained side table.
    ///
    /// Retained payloads still in the table are dropped, which releases
    /// them to their frame allocators.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.retained.clear();
    }
}
