//! Revisions (logical clock snapshots)
//!
//! Each write to a reactive source advances a monotonic counter. A value
//! computed at revision R is valid as long as nothing it read has a
//! revision greater than R.

use serde::{Deserialize, Serialize};

/// Snapshot of the global logical clock
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[repr(transparent)]
pub struct Revision(u64);

impl Revision {
    /// Revision of values that can never change
    pub const CONSTANT: Self = Revision(0);

    /// Revision the clock starts at
    pub const INITIAL: Self = Revision(1);

    /// Create a revision from a raw counter value
    #[inline]
    pub const fn new(value: u64) -> Self {
        Revision(value)
    }

    /// Get the raw counter value
    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The revision after this one
    #[inline]
    pub const fn next(self) -> Self {
        Revision(self.0 + 1)
    }
}

/// Monotonic logical clock
///
/// There is exactly one clock per tag graph; every write path goes through
/// [`RevisionClock::advance`], so revisions are totally ordered.
#[derive(Debug, Clone)]
pub struct RevisionClock {
    current: Revision,
}

impl Default for RevisionClock {
    fn default() -> Self {
        Self::new()
    }
}

impl RevisionClock {
    /// Create a clock at [`Revision::INITIAL`]
    pub const fn new() -> Self {
        Self {
            current: Revision::INITIAL,
        }
    }

    /// Get the current revision
    #[inline]
    pub fn current(&self) -> Revision {
        self.current
    }

    /// Advance the clock and return the new revision
    #[inline]
    pub fn advance(&mut self) -> Revision {
        self.current = self.current.next();
        self.current
    }
}
