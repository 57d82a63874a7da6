//! Per-object bookkeeping embedded in every sim-side resource.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::id::{CoreObjectId, DirtyState};
use crate::error::{SyncError, SyncResult};
use crate::sync::CoreObjectManager;

/// State every [`CoreObject`](super::CoreObject) embeds.
///
/// Holds the object's id, its dirty state and a non-owning link back to the
/// manager it was created for.
#[derive(Debug)]
pub struct CoreObjectState {
    id: AtomicU64,
    registered: AtomicBool,
    dirty: Mutex<DirtyState>,
    manager: Weak<CoreObjectManager>,
}

impl CoreObjectState {
    /// Creates state bound to a manager. The object still has to be registered.
    #[must_use]
    pub fn new(manager: &Arc<CoreObjectManager>) -> Self {
        Self::with_manager(Arc::downgrade(manager))
    }

    /// Creates state bound to no manager. Dirty notifications go nowhere.
    #[must_use]
    pub fn detached() -> Self {
        Self::with_manager(Weak::new())
    }

    fn with_manager(manager: Weak<CoreObjectManager>) -> Self {
        Self {
            id: AtomicU64::new(0),
            registered: AtomicBool::new(false),
            dirty: Mutex::new(DirtyState::Clean),
            manager,
        }
    }

    /// Returns the id, or [`CoreObjectId::NONE`] before registration.
    ///
    /// The id is kept after unregistration.
    #[inline]
    #[must_use]
    pub fn id(&self) -> CoreObjectId {
        CoreObjectId::new(self.id.load(Ordering::Acquire))
    }

    /// Checks if the object is currently registered.
    #[inline]
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    /// Returns the manager, if it is still alive.
    #[must_use]
    pub fn manager(&self) -> Option<Arc<CoreObjectManager>> {
        self.manager.upgrade()
    }

    /// Returns the current dirty state.
    #[must_use]
    pub fn dirty_state(&self) -> DirtyState {
        *self.dirty.lock()
    }

    /// Checks if the object needs a sync.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.lock().is_dirty()
    }

    /// Returns the dirty bits.
    #[must_use]
    pub fn dirty_flags(&self) -> u32 {
        self.dirty.lock().flags()
    }

    /// Marks the object as in sync with its core side.
    pub fn mark_clean(&self) {
        *self.dirty.lock() = DirtyState::Clean;
    }

    /// Adds own-state dirty bits. Does not notify the manager.
    pub fn set_dirty_flags(&self, flags: u32) {
        let mut dirty = self.dirty.lock();
        *dirty = dirty.with_flags(flags);
    }

    /// Marks the object dirty because a dependency changed.
    pub(crate) fn force_dependency_dirty(&self) {
        *self.dirty.lock() = DirtyState::Dependency;
    }

    pub(crate) fn assign(&self, id: CoreObjectId) -> SyncResult<()> {
        if self.registered.swap(true, Ordering::AcqRel) {
            return Err(SyncError::AlreadyRegistered(self.id()));
        }
        self.id.store(id.raw(), Ordering::Release);
        Ok(())
    }

    /// Flags the object as unregistered. Returns `false` if it already was.
    pub(crate) fn retire(&self) -> bool {
        self.registered.swap(false, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ALL_DIRTY_FLAGS;

    #[test]
    fn test_detached_state() {
        let state = CoreObjectState::detached();
        assert!(state.id().is_none());
        assert!(!state.is_registered());
        assert!(state.manager().is_none());
        assert!(!state.is_dirty());
    }

    #[test]
    fn test_assign_once() {
        let state = CoreObjectState::detached();
        state.assign(CoreObjectId::new(4)).unwrap();
        assert_eq!(state.id(), CoreObjectId::new(4));
        assert_eq!(
            state.assign(CoreObjectId::new(5)),
            Err(SyncError::AlreadyRegistered(CoreObjectId::new(4)))
        );
        assert!(state.retire());
        assert!(!state.retire());
        assert_eq!(state.id(), CoreObjectId::new(4));
    }

    #[test]
    fn test_dirty_transitions() {
        let state = CoreObjectState::detached();
        state.set_dirty_flags(0b100);
        assert_eq!(state.dirty_flags(), 0b100);

        state.force_dependency_dirty();
        assert_eq!(state.dirty_flags(), ALL_DIRTY_FLAGS);

        state.mark_clean();
        assert_eq!(state.dirty_state(), DirtyState::Clean);
    }
}
