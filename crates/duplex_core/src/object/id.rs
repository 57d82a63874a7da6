//! # Object Identity and Dirtiness

use std::fmt;

/// Process-unique identifier of a registered core object.
///
/// Ids are handed out monotonically starting at 1 and never reused, so a
/// stale id is detected by a failed registry lookup rather than aliasing a
/// newer object. Id 0 means "not registered".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct CoreObjectId(u64);

impl CoreObjectId {
    /// The unassigned id.
    pub const NONE: Self = Self(0);

    /// Creates an id from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Checks if this is the unassigned id.
    #[inline]
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for CoreObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Every dirty bit set.
pub const ALL_DIRTY_FLAGS: u32 = u32::MAX;

/// Why an object needs to be synced.
///
/// `Own` carries the resource-specific bits saying which parts changed.
/// `Dependency` means one of the object's dependencies changed and the core
/// side has to re-derive everything, so the serializer must write a full
/// payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DirtyState {
    /// In sync with the core side.
    #[default]
    Clean,
    /// The object's own state changed.
    Own(u32),
    /// A dependency changed.
    Dependency,
}

impl DirtyState {
    /// Checks if a sync is needed.
    #[inline]
    #[must_use]
    pub const fn is_dirty(self) -> bool {
        !matches!(self, Self::Clean)
    }

    /// Returns the dirty bits. A dependency change reports every bit.
    #[inline]
    #[must_use]
    pub const fn flags(self) -> u32 {
        match self {
            Self::Clean => 0,
            Self::Own(flags) => flags,
            Self::Dependency => ALL_DIRTY_FLAGS,
        }
    }

    /// Checks if the serializer has to write everything.
    #[inline]
    #[must_use]
    pub const fn is_full(self) -> bool {
        match self {
            Self::Clean => false,
            Self::Own(flags) => flags == ALL_DIRTY_FLAGS,
            Self::Dependency => true,
        }
    }

    /// Adds own-state bits.
    #[inline]
    #[must_use]
    pub const fn with_flags(self, flags: u32) -> Self {
        match self {
            Self::Clean => Self::Own(flags),
            Self::Own(old) => Self::Own(old | flags),
            Self::Dependency => Self::Dependency,
        }
    }
}
