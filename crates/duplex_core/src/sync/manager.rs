//! # Core Object Manager
//!
//! The registry and sync engine shared by every core object.
//!
//! ## Architecture
//!
//! ```text
//!                  ┌──────────────────────────────────┐
//!                  │        CoreObjectManager         │
//!                  │  ┌────────────┐ ┌─────────────┐  │
//!   register  ───▶ │  │  registry  │ │ dependency  │  │
//!   unregister ──▶ │  │ id → Weak  │ │    graph    │  │
//!   notify_*  ───▶ │  └────────────┘ └─────────────┘  │
//!                  │  ┌────────────────────────────┐  │
//!                  │  │ dirty set (ascending ids)  │  │
//!                  │  └────────────────────────────┘  │
//!                  └──────────────┬───────────────────┘
//!                                 │ sync_download (sim thread)
//!                                 ▼
//!                  ┌──────────────────────────────────┐
//!                  │     PendingBatches (FIFO)        │
//!                  └──────────────┬───────────────────┘
//!                                 │ sync_upload (core thread)
//!                                 ▼
//!                       CoreObjectCore::sync_to_core
//! ```
//!
//! ## Thread Safety
//!
//! Registry, dependency graph and dirty set sit behind one mutex: a single
//! dirty notification touches both the dirty set and the graph. The FIFO
//! has its own lock so the core thread never contends with a download pass
//! longer than a pop.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::batch::{PendingBatches, SyncBatch, UploadReport};
use super::dirty::{DirtyEntry, DirtySet, RetainedSync};
use super::graph::DependencyGraph;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::memory::{FrameAlloc, FrameAllocators};
use crate::object::{CoreObject, CoreObjectCore, CoreObjectId, ALL_DIRTY_FLAGS};
use crate::thread::{queue_with_result, AsyncOp, CommandQueue};

/// Statistics of one download pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Sequence number of the produced batch.
    pub sequence: u64,
    /// Deltas in the batch.
    pub objects_synced: usize,
    /// Dependants pulled in because a dependency was dirty.
    pub forced_dependants: usize,
    /// Final deltas of destroyed objects.
    pub retained_flushed: usize,
    /// Core objects destroyed by the batch.
    pub cores_destroyed: usize,
    /// Total payload bytes.
    pub bytes: usize,
}

/// Everything guarded by the manager mutex.
struct ManagerState {
    /// Next id to hand out. Starts at 1.
    next_id: u64,
    /// Next batch sequence number.
    next_batch: u64,
    /// Next eager sync sequence number.
    next_eager: u64,
    /// Live registered objects.
    objects: HashMap<CoreObjectId, Weak<dyn CoreObject>>,
    /// Registered objects whose core side has not been sent yet.
    uninitialized: HashSet<CoreObjectId>,
    /// Core objects of objects destroyed while clean, for the next pass.
    doomed: Vec<(CoreObjectId, Weak<dyn CoreObjectCore>)>,
    graph: DependencyGraph,
    dirty: DirtySet,
    last_stats: SyncStats,
}

/// Sim objects touched during a pass. Dropped after the manager lock is
/// released so that a last reference going away cannot re-enter the manager.
type KeepAlive = Vec<Arc<dyn CoreObject>>;

/// Registry and synchronization engine for core objects.
///
/// Constructed once and handed to every resource constructor.
///
/// ## Usage
///
/// ```rust,ignore
/// let manager = CoreObjectManager::new(SyncConfig::default());
/// let core_thread = CoreThread::spawn(manager.config())?;
///
/// let texture = Texture::new(&manager, 256, 256);
/// manager.register(&texture);
///
/// loop {
///     texture.set_size(512, 512);           // marks dirty
///     manager.sync_to_core(&core_thread)?;  // download now, upload later
///     manager.end_frame();
/// }
/// ```
pub struct CoreObjectManager {
    config: SyncConfig,
    state: Mutex<ManagerState>,
    pending: PendingBatches,
    frame_allocs: FrameAllocators,
    batches_produced: AtomicU64,
}

impl CoreObjectManager {
    /// Creates a manager.
    #[must_use]
    pub fn new(config: SyncConfig) -> Arc<Self> {
        let frame_allocs = FrameAllocators::new(config.frame_alloc_capacity);
        Arc::new(Self {
            config,
            state: Mutex::new(ManagerState {
                next_id: 1,
                next_batch: 0,
                next_eager: 0,
                objects: HashMap::new(),
                uninitialized: HashSet::new(),
                doomed: Vec::new(),
                graph: DependencyGraph::new(),
                dirty: DirtySet::new(),
                last_stats: SyncStats::default(),
            }),
            pending: PendingBatches::new(),
            frame_allocs,
            batches_produced: AtomicU64::new(0),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the frame allocators payloads are drawn from.
    #[must_use]
    pub fn frame_allocators(&self) -> &FrameAllocators {
        &self.frame_allocs
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Assigns the next id to `object`, stores it and marks it dirty.
    ///
    /// The object's first delta goes out with the next sync pass, preceded
    /// by the initialization of its core side. Its current dependencies are
    /// recorded as well. Registering an object
    /// twice is a programming error and returns the existing id.
    pub fn register<T: CoreObject>(&self, object: &Arc<T>) -> CoreObjectId {
        let as_dyn: Arc<dyn CoreObject> = Arc::clone(object) as Arc<dyn CoreObject>;
        let object_state = object.core_state();

        let mut dependencies = Vec::new();
        object.core_dependencies(&mut dependencies);

        let mut guard = self.state.lock();
        let state = &mut *guard;

        let id = CoreObjectId::new(state.next_id);
        if let Err(err) = object_state.assign(id) {
            tracing::error!(%err, "core object registered twice");
            debug_assert!(false, "core object registered twice: {err}");
            return object_state.id();
        }
        state.next_id += 1;

        state.objects.insert(id, Arc::downgrade(&as_dyn));
        state.uninitialized.insert(id);
        object_state.set_dirty_flags(ALL_DIRTY_FLAGS);
        state.dirty.mark_live(id);

        // A new object has no dependants yet, so this cannot form a cycle.
        dependencies.retain(|dep| state.objects.contains_key(dep));
        state.graph.update(id, Some(&dependencies));

        tracing::trace!(%id, dependencies = dependencies.len(), "core object registered");
        id
    }

    /// Removes `object` from the manager.
    ///
    /// If it is dirty and has a core side, its final delta is captured now
    /// and flushed by the next sync pass, which then destroys the core side.
    /// The retained delta keeps the core side alive until then. A clean
    /// object's core side is only observed: the next pass destroys it if
    /// something else still holds it. Every dependency edge touching the
    /// object is dropped.
    pub fn unregister(&self, object: &dyn CoreObject) {
        let object_state = object.core_state();
        if !object_state.retire() {
            return;
        }
        let id = object_state.id();
        let allocator = self.frame_allocs.current();

        let mut guard = self.state.lock();
        let state = &mut *guard;

        let initialize = state.uninitialized.remove(&id);
        let queued = matches!(state.dirty.get(id), Some(DirtyEntry::Live));
        match object.core() {
            Some(core) if object_state.is_dirty() || queued => {
                let data = object.sync_to_core(&allocator);
                tracing::trace!(%id, bytes = data.size(), "retained final delta");
                state.dirty.retain(RetainedSync {
                    core,
                    id,
                    data,
                    initialize,
                });
            }
            Some(core) => {
                state.dirty.remove(id);
                if !initialize {
                    state.doomed.push((id, Arc::downgrade(&core)));
                }
            }
            None => state.dirty.remove(id),
        }
        object_state.mark_clean();

        state.objects.remove(&id);
        let former_dependants = state.graph.remove_object(id);

        tracing::trace!(
            %id,
            dependants = former_dependants.len(),
            "core object unregistered"
        );
    }

    // =========================================================================
    // Dirty propagation
    // =========================================================================

    /// Queues a registered object for the next sync pass.
    ///
    /// Idempotent. Unknown ids are ignored so a stale id can never replace
    /// the retained final delta of a destroyed object.
    pub fn notify_core_dirty(&self, id: CoreObjectId) {
        let mut state = self.state.lock();
        if state.objects.contains_key(&id) {
            state.dirty.mark_live(id);
        } else {
            tracing::trace!(%id, "dirty notification for unregistered object ignored");
        }
    }

    /// Re-reads the dependencies `object` reports and updates the graph.
    ///
    /// # Errors
    ///
    /// See [`update_dependencies`](Self::update_dependencies).
    pub fn notify_dependencies_dirty(&self, object: &dyn CoreObject) -> SyncResult<()> {
        let mut dependencies = Vec::new();
        object.core_dependencies(&mut dependencies);
        self.update_dependencies(object.core_state().id(), Some(&dependencies))
    }

    /// Replaces the dependency list of `id`. `None` removes all of them.
    ///
    /// Dependencies that are not registered, and `id` itself, are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotRegistered`] if `id` is not registered, and
    /// [`SyncError::DependencyCycle`] if cycle detection is on and the new
    /// list closes a cycle. The graph is unchanged on error.
    pub fn update_dependencies(
        &self,
        id: CoreObjectId,
        dependencies: Option<&[CoreObjectId]>,
    ) -> SyncResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if !state.objects.contains_key(&id) {
            return Err(SyncError::NotRegistered(id));
        }

        let Some(dependencies) = dependencies else {
            state.graph.update(id, None);
            return Ok(());
        };

        let known: Vec<CoreObjectId> = dependencies
            .iter()
            .copied()
            .filter(|dep| *dep != id && state.objects.contains_key(dep))
            .collect();

        if self.config.detect_cycles {
            if let Some(path) = state.graph.find_cycle(id, &known) {
                tracing::warn!(%id, ?path, "rejected cyclic dependency declaration");
                return Err(SyncError::DependencyCycle { object: id, path });
            }
        }

        state.graph.update(id, Some(&known));
        Ok(())
    }

    // =========================================================================
    // Two-phase sync
    // =========================================================================

    /// Runs a full sync: download now, upload queued on `queue`.
    ///
    /// Call once per frame from the sim thread. Does not wait for the core
    /// thread.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::CoreThreadStopped`] if `queue` no longer accepts
    /// commands. The batch then stays pending.
    pub fn sync_to_core(&self, queue: &dyn CommandQueue) -> SyncResult<SyncStats> {
        let stats = self.sync_download();
        let pending = self.pending.clone();
        queue.queue_command(Box::new(move || {
            pending.apply_next();
        }))?;
        Ok(stats)
    }

    /// Phase 1: captures every dirty delta into a new pending batch.
    ///
    /// Dirty objects pull in their transitive dependants, then every dirty
    /// id is visited in ascending order with its dirty dependencies
    /// serialized first.
    pub fn sync_download(&self) -> SyncStats {
        let allocator = self.frame_allocs.current();
        let mut keep_alive = KeepAlive::new();

        let mut guard = self.state.lock();
        let state = &mut *guard;

        let sequence = state.next_batch;
        state.next_batch += 1;

        let forced_dependants = Self::expand_dependants(state, &mut keep_alive);

        let mut batch = SyncBatch::new(sequence, Arc::clone(&allocator));
        let mut visited = HashSet::new();
        for id in state.dirty.ids() {
            self.visit(state, id, 0, &allocator, &mut batch, &mut visited, &mut keep_alive);
        }
        for (id, core) in state.doomed.drain(..) {
            batch.push_destroy(id, core);
        }

        state.dirty.clear();

        let stats = SyncStats {
            sequence,
            objects_synced: batch.len(),
            forced_dependants,
            retained_flushed: batch.retained_count(),
            cores_destroyed: batch.destroy_count(),
            bytes: batch.bytes(),
        };
        state.last_stats = stats;

        // Pushed under the lock so FIFO order always matches sequence order.
        self.pending.push(batch);
        drop(guard);

        self.batches_produced.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            sequence,
            objects = stats.objects_synced,
            forced = stats.forced_dependants,
            retained = stats.retained_flushed,
            destroyed = stats.cores_destroyed,
            bytes = stats.bytes,
            "sync batch captured"
        );
        stats
    }

    /// Phase 2: applies the oldest pending batch. Runs on the core thread.
    pub fn sync_upload(&self) -> Option<UploadReport> {
        self.pending.apply_next()
    }

    /// Pushes one object and its dirty dependencies to the core thread now.
    ///
    /// The sub-batch goes straight onto `queue` as its own command,
    /// dependencies first. The objects stay in the dirty set, tagged with
    /// this eager sync, so the next full pass still refreshes dependants
    /// that were not part of it.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotRegistered`] for unknown ids and
    /// [`SyncError::CoreThreadStopped`] if `queue` rejects the command.
    pub fn sync_object(&self, id: CoreObjectId, queue: &dyn CommandQueue) -> SyncResult<()> {
        let allocator = self.frame_allocs.current();
        let mut keep_alive = KeepAlive::new();

        let mut guard = self.state.lock();
        let state = &mut *guard;

        if !state.objects.contains_key(&id) {
            return Err(SyncError::NotRegistered(id));
        }

        let mut batch = SyncBatch::new(u64::MAX, Arc::clone(&allocator));
        let mut visited = HashSet::new();
        self.visit(state, id, 0, &allocator, &mut batch, &mut visited, &mut keep_alive);

        let eager = state.next_eager;
        state.next_eager += 1;
        for entry in batch.entries() {
            state.dirty.mark_synced(entry.id, eager);
        }
        drop(guard);

        if batch.is_empty() {
            return Ok(());
        }

        tracing::debug!(%id, objects = batch.len(), "eager sync queued");
        queue.queue_command(Box::new(move || {
            batch.apply();
        }))
    }

    /// Makes sure the core side of `id` gets initialized and returns an op
    /// that completes once it has been.
    ///
    /// An object whose first delta has not gone out yet is synced eagerly
    /// through `queue`. The op completes after everything queued on `queue`
    /// so far, which covers batches queued by [`sync_to_core`](Self::sync_to_core).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotRegistered`] for unknown ids and
    /// [`SyncError::CoreThreadStopped`] if `queue` rejects the command.
    pub fn initialize_now(
        &self,
        id: CoreObjectId,
        queue: &dyn CommandQueue,
    ) -> SyncResult<AsyncOp<()>> {
        let first_sync_pending = {
            let state = self.state.lock();
            if !state.objects.contains_key(&id) {
                return Err(SyncError::NotRegistered(id));
            }
            state.uninitialized.contains(&id)
        };
        if first_sync_pending {
            self.sync_object(id, queue)?;
        }
        queue_with_result(queue, || ())
    }

    /// Advances the frame allocators. Call once per frame after syncing.
    pub fn end_frame(&self) {
        self.frame_allocs.swap();
    }

    /// Force-dirties every dependant whose core side is stale.
    ///
    /// A dependant is stale unless it is dirty itself, or it went out with
    /// an eager sync no older than the one that carried its dependency.
    /// Forced dependants are stale roots in turn, so the walk covers the
    /// whole transitive closure and visits each object at most twice.
    ///
    /// Returns how many were forced.
    fn expand_dependants(state: &mut ManagerState, keep_alive: &mut KeepAlive) -> usize {
        // `None` marks a change that goes out with this pass.
        let mut worklist: Vec<(CoreObjectId, Option<u64>)> = state
            .dirty
            .entries()
            .into_iter()
            .map(|(id, entry)| match entry {
                DirtyEntry::Synced(eager) => (id, Some(eager)),
                DirtyEntry::Live | DirtyEntry::Retained(_) => (id, None),
            })
            .collect();
        let mut forced = 0;

        while let Some((id, changed_at)) = worklist.pop() {
            let dependants = state.graph.dependants(id).to_vec();
            for dependant in dependants {
                let stale = match (state.dirty.get(dependant), changed_at) {
                    (Some(DirtyEntry::Live | DirtyEntry::Retained(_)), _) => false,
                    (Some(DirtyEntry::Synced(synced)), Some(changed)) => synced < changed,
                    (Some(DirtyEntry::Synced(_)), None) | (None, _) => true,
                };
                if !stale {
                    continue;
                }
                let Some(object) = state.objects.get(&dependant).and_then(Weak::upgrade) else {
                    continue;
                };
                object.core_state().force_dependency_dirty();
                state.dirty.mark_live(dependant);
                keep_alive.push(object);
                worklist.push((dependant, None));
                forced += 1;
            }
        }

        forced
    }

    /// Serializes `id` into `batch`, dirty dependencies first.
    ///
    /// Past `max_dependency_depth` the walk gives up on the deeper
    /// dependency. A full pass still serializes it when its own id comes up,
    /// which is after the dependants that were waiting on it.
    #[allow(clippy::too_many_arguments)]
    fn visit(
        &self,
        state: &mut ManagerState,
        id: CoreObjectId,
        depth: usize,
        allocator: &Arc<FrameAlloc>,
        batch: &mut SyncBatch,
        visited: &mut HashSet<CoreObjectId>,
        keep_alive: &mut KeepAlive,
    ) {
        if depth > self.config.max_dependency_depth {
            tracing::error!(%id, depth, "dependency chain exceeds max_dependency_depth");
            return;
        }
        if !visited.insert(id) {
            return;
        }

        match state.dirty.get(id) {
            None | Some(DirtyEntry::Synced(_)) => {}
            Some(DirtyEntry::Retained(index)) => {
                if let Some(retained) = state.dirty.take_retained(index) {
                    batch.push_retained(retained);
                }
            }
            Some(DirtyEntry::Live) => {
                let Some(object) = state.objects.get(&id).and_then(Weak::upgrade) else {
                    tracing::warn!(%id, "dirty core object dropped without unregistering");
                    return;
                };

                let dependencies = state.graph.dependencies(id).to_vec();
                for dep in dependencies {
                    self.visit(state, dep, depth + 1, allocator, batch, visited, keep_alive);
                }

                let object_state = object.core_state();
                if object_state.is_dirty() {
                    let initialize = state.uninitialized.remove(&id);
                    if let Some(core) = object.core() {
                        let data = object.sync_to_core(allocator);
                        batch.push(&core, id, data, initialize);
                    }
                    object_state.mark_clean();
                }
                keep_alive.push(object);
            }
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Returns the number of registered objects.
    #[must_use]
    pub fn registered_count(&self) -> usize {
        self.state.lock().objects.len()
    }

    /// Checks if `id` is registered.
    #[must_use]
    pub fn is_registered(&self, id: CoreObjectId) -> bool {
        self.state.lock().objects.contains_key(&id)
    }

    /// Checks if `id` is in the dirty set.
    #[must_use]
    pub fn is_dirty(&self, id: CoreObjectId) -> bool {
        self.state.lock().dirty.contains(id)
    }

    /// Returns the number of ids in the dirty set.
    #[must_use]
    pub fn dirty_count(&self) -> usize {
        self.state.lock().dirty.len()
    }

    /// Returns what `id` depends on, sorted.
    #[must_use]
    pub fn dependencies_of(&self, id: CoreObjectId) -> Vec<CoreObjectId> {
        self.state.lock().graph.dependencies(id).to_vec()
    }

    /// Returns what depends on `id`.
    #[must_use]
    pub fn dependants_of(&self, id: CoreObjectId) -> Vec<CoreObjectId> {
        self.state.lock().graph.dependants(id).to_vec()
    }

    /// Checks that the dependency graph is symmetric.
    #[must_use]
    pub fn graph_is_consistent(&self) -> bool {
        self.state.lock().graph.is_consistent()
    }

    /// Returns the number of batches waiting for the core thread.
    #[must_use]
    pub fn pending_batches(&self) -> usize {
        self.pending.len()
    }

    /// Returns the statistics of the last download pass.
    #[must_use]
    pub fn last_stats(&self) -> SyncStats {
        self.state.lock().last_stats
    }

    /// Returns the number of download passes run so far.
    #[must_use]
    pub fn batches_produced(&self) -> u64 {
        self.batches_produced.load(Ordering::Relaxed)
    }
}

impl Drop for CoreObjectManager {
    fn drop(&mut self) {
        let live = self
            .state
            .get_mut()
            .objects
            .values()
            .filter(|object| object.strong_count() > 0)
            .count();

        if live > 0 {
            tracing::error!(live, "core object manager dropped with objects still registered");
            debug_assert!(
                live == 0,
                "core object manager dropped with {live} objects still registered"
            );
        }
    }
}
