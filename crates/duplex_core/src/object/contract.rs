//! The capability contract between resource types and the sync core.

use std::sync::Arc;

use super::id::CoreObjectId;
use super::state::CoreObjectState;
use crate::error::{SyncError, SyncResult};
use crate::memory::{CoreSyncData, FrameAlloc};
use crate::thread::CommandQueue;

/// Core-thread half of a synchronizable resource.
///
/// Only ever touched on the core thread. Implementations keep their mutable
/// state behind interior mutability.
pub trait CoreObjectCore: Send + Sync + 'static {
    /// Applies a delta previously captured by [`CoreObject::sync_to_core`].
    fn sync_to_core(&self, data: &CoreSyncData);

    /// Runs once, right before the first delta is applied.
    fn initialize(&self, id: CoreObjectId) {
        let _ = id;
    }

    /// Runs once after the sim object was destroyed, behind its final delta.
    fn destroy(&self, id: CoreObjectId) {
        let _ = id;
    }
}

/// Sim-thread half of a synchronizable resource.
///
/// The manager calls these methods while holding its lock, so
/// implementations must not call back into the manager from them.
pub trait CoreObject: Send + Sync + 'static {
    /// Returns the embedded bookkeeping state.
    fn core_state(&self) -> &CoreObjectState;

    /// Returns the core-side counterpart, if one exists.
    fn core(&self) -> Option<Arc<dyn CoreObjectCore>>;

    /// Serializes the current delta.
    ///
    /// The dirty state is still set while this runs, so the serializer can
    /// look at [`CoreObjectState::dirty_state`] to decide how much to write.
    fn sync_to_core(&self, allocator: &Arc<FrameAlloc>) -> CoreSyncData;

    /// Reports the objects whose sync must be applied before this one's.
    fn core_dependencies(&self, dependencies: &mut Vec<CoreObjectId>) {
        let _ = dependencies;
    }
}

/// Base-class style helpers available on every [`CoreObject`].
pub trait CoreObjectExt: CoreObject {
    /// Returns the id assigned at registration.
    fn internal_id(&self) -> CoreObjectId {
        self.core_state().id()
    }

    /// Checks if the object has changes not yet sent to its core side.
    fn is_core_dirty(&self) -> bool {
        self.core_state().is_dirty()
    }

    /// Returns the dirty bits.
    fn core_dirty_flags(&self) -> u32 {
        self.core_state().dirty_flags()
    }

    /// Marks the object dirty and queues it for the next sync pass.
    fn mark_core_dirty(&self, flags: u32) {
        let state = self.core_state();
        state.set_dirty_flags(flags);
        if !state.is_registered() {
            return;
        }
        if let Some(manager) = state.manager() {
            manager.notify_core_dirty(state.id());
        }
    }

    /// Re-reads [`CoreObject::core_dependencies`] and updates the graph.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotRegistered`] for unregistered objects and
    /// [`SyncError::DependencyCycle`] if the new dependencies close a cycle.
    fn mark_dependencies_dirty(&self) -> SyncResult<()> {
        let state = self.core_state();
        if !state.is_registered() {
            return Err(SyncError::NotRegistered(state.id()));
        }
        let Some(manager) = state.manager() else {
            return Ok(());
        };
        let mut dependencies = Vec::new();
        self.core_dependencies(&mut dependencies);
        manager.update_dependencies(state.id(), Some(&dependencies))
    }

    /// Pushes this object and its dirty dependencies to the core thread now,
    /// without waiting for the next frame's sync pass.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotRegistered`] for unregistered objects, or
    /// [`SyncError::CoreThreadStopped`] if the queue rejects the command.
    fn sync_now(&self, queue: &dyn CommandQueue) -> SyncResult<()> {
        let state = self.core_state();
        if !state.is_registered() {
            return Err(SyncError::NotRegistered(state.id()));
        }
        match state.manager() {
            Some(manager) => manager.sync_object(state.id(), queue),
            None => Ok(()),
        }
    }

    /// Blocks until the core side has been initialized.
    ///
    /// An object that was never synced is pushed through `queue` first.
    /// Never call this with a queue that only runs when the caller drives
    /// it, such as [`CommandBuffer`](crate::CommandBuffer): it would wait
    /// forever.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotRegistered`] for unregistered objects, or
    /// [`SyncError::CoreThreadStopped`] if the queue went away first.
    fn block_until_core_initialized(&self, queue: &dyn CommandQueue) -> SyncResult<()> {
        let state = self.core_state();
        if !state.is_registered() {
            return Err(SyncError::NotRegistered(state.id()));
        }
        match state.manager() {
            Some(manager) => manager.initialize_now(state.id(), queue)?.wait(),
            None => Ok(()),
        }
    }

    /// Unregisters the object, capturing its last delta if it is dirty.
    ///
    /// Safe to call from `Drop`.
    fn destroy(&self)
    where
        Self: Sized,
    {
        let state = self.core_state();
        if !state.is_registered() {
            return;
        }
        if let Some(manager) = state.manager() {
            manager.unregister(self);
        }
    }
}

impl<T: CoreObject + ?Sized> CoreObjectExt for T {}
