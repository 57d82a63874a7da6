//! # Frame Allocator
//!
//! A bump-accounted arena for sync payloads that are released all at once.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use super::sync_data::CoreSyncData;

/// A per-frame arena for sync payloads.
///
/// Allocations bump a counter. Memory is reclaimed all at once when the
/// allocator is cleared, which is only allowed after every payload handed
/// out has been dropped.
///
/// # Thread Safety
///
/// Payloads are allocated on the sim thread and released on the core
/// thread, so all counters are atomic. A given allocator is never cleared
/// while one of its payloads is alive.
///
/// # Example
///
/// ```rust
/// use duplex_core::FrameAlloc;
///
/// let alloc = FrameAlloc::new(1024);
/// let data = alloc.alloc(16);
/// assert_eq!(alloc.outstanding(), 1);
/// drop(data);
/// assert!(alloc.clear());
/// ```
#[derive(Debug)]
pub struct FrameAlloc {
    /// Soft budget in bytes.
    capacity: usize,
    /// Bytes handed out since the last clear.
    used: AtomicUsize,
    /// Payloads not yet returned.
    outstanding: AtomicUsize,
    /// Number of successful clears.
    generation: AtomicU64,
    /// Whether the over-budget warning fired this generation.
    over_budget_reported: AtomicBool,
}

impl FrameAlloc {
    /// Creates a new allocator with the specified soft budget in bytes.
    #[must_use]
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            used: AtomicUsize::new(0),
            outstanding: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
            over_budget_reported: AtomicBool::new(false),
        })
    }

    /// Returns the soft budget in bytes.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the bytes handed out since the last clear.
    #[inline]
    #[must_use]
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    /// Returns the remaining budget in bytes.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.used())
    }

    /// Returns the number of payloads that have not been released yet.
    #[inline]
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Returns how many times this allocator has been cleared.
    #[inline]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Allocates a zeroed payload of `len` bytes.
    ///
    /// Never fails. Going over the budget is reported once per generation.
    pub fn alloc(self: &Arc<Self>, len: usize) -> CoreSyncData {
        let used = self.used.fetch_add(len, Ordering::AcqRel) + len;
        self.outstanding.fetch_add(1, Ordering::AcqRel);

        if used > self.capacity && !self.over_budget_reported.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                used,
                capacity = self.capacity,
                "frame allocator over budget"
            );
        }

        CoreSyncData::from_frame(vec![0u8; len].into_boxed_slice(), Arc::clone(self))
    }

    /// Returns a payload slot. Called when a payload from this allocator drops.
    #[inline]
    pub(crate) fn release(&self) {
        let previous = self.outstanding.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "frame allocator released more than it allocated");
    }

    /// Resets the allocator if every payload has been released.
    ///
    /// Returns `false` and leaves the allocator untouched otherwise.
    pub fn clear(&self) -> bool {
        if self.outstanding() != 0 {
            return false;
        }
        self.used.store(0, Ordering::Release);
        self.over_budget_reported.store(false, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
        true
    }
}

/// Two frame allocators used alternately, one per frame.
///
/// The sim thread allocates from [`current`](Self::current) while the core
/// thread may still be releasing payloads from the previous frame's
/// allocator. [`swap`](Self::swap) at the end of a frame recycles the
/// allocator that was used two frames ago.
#[derive(Debug)]
pub struct FrameAllocators {
    /// The two allocators.
    allocs: [Arc<FrameAlloc>; 2],
    /// Index of the allocator in use this frame (0 or 1).
    active: AtomicUsize,
    /// Number of swaps.
    frame_count: AtomicU64,
}

impl FrameAllocators {
    /// Creates a pair of allocators, each with the given soft budget.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            allocs: [FrameAlloc::new(capacity), FrameAlloc::new(capacity)],
            active: AtomicUsize::new(0),
            frame_count: AtomicU64::new(0),
        }
    }

    /// Returns the allocator for the current frame.
    #[must_use]
    pub fn current(&self) -> Arc<FrameAlloc> {
        let idx = self.active.load(Ordering::Acquire);
        Arc::clone(&self.allocs[idx])
    }

    /// Returns the number of completed swaps.
    #[inline]
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    /// Switches to the other allocator, clearing it first.
    ///
    /// If the core thread still holds payloads from it, the allocator is
    /// kept as is and keeps accumulating until a later swap succeeds.
    pub fn swap(&self) {
        let old = self.active.fetch_xor(1, Ordering::AcqRel);
        let next = &self.allocs[old ^ 1];

        if !next.clear() {
            tracing::debug!(
                outstanding = next.outstanding(),
                "recycled frame allocator still has live payloads"
            );
        }

        self.frame_count.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_accounting() {
        let alloc = FrameAlloc::new(1024);
        let a = alloc.alloc(10);
        let b = alloc.alloc(6);
        assert_eq!(a.size(), 10);
        assert_eq!(alloc.used(), 16);
        assert_eq!(alloc.outstanding(), 2);
        drop(a);
        drop(b);
        assert_eq!(alloc.outstanding(), 0);
    }

    #[test]
    fn test_clear_requires_release() {
        let alloc = FrameAlloc::new(1024);
        let data = alloc.alloc(8);
        assert!(!alloc.clear());
        assert_eq!(alloc.used(), 8);

        drop(data);
        assert!(alloc.clear());
        assert_eq!(alloc.used(), 0);
        assert_eq!(alloc.generation(), 1);
    }

    #[test]
    fn test_over_budget_still_allocates() {
        let alloc = FrameAlloc::new(4);
        let data = alloc.alloc(16);
        assert_eq!(data.size(), 16);
        assert_eq!(alloc.remaining(), 0);
    }

    #[test]
    fn test_allocators_alternate() {
        let allocs = FrameAllocators::new(64);
        let first = allocs.current();
        allocs.swap();
        let second = allocs.current();
        assert!(!Arc::ptr_eq(&first, &second));

        allocs.swap();
        assert!(Arc::ptr_eq(&first, &allocs.current()));
        assert_eq!(allocs.frame_count(), 2);
    }

    #[test]
    fn test_swap_keeps_allocator_with_live_payloads() {
        let allocs = FrameAllocators::new(64);
        let held = allocs.current().alloc(4);
        allocs.swap();
        allocs.swap();
        // Back on the first allocator, which could not be cleared.
        assert_eq!(allocs.current().used(), 4);
        drop(held);
        allocs.swap();
        allocs.swap();
        assert_eq!(allocs.current().used(), 0);
    }
}
