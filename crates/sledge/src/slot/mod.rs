//! Name primitives: slots, ordered slot sets, and slot bijections
//!
//! A [`Slot`] is an opaque identity naming a binding or use site. Slots are
//! totally ordered and compared by identity only; the engine gives them no
//! further structure. Two allocation regimes share the same value space:
//! *numbered* slots, the canonical low names that node shapes are rewritten
//! into, and *fresh* slots drawn from a process-global monotone counter.
//! Read paths must be able to mint fresh names (e.g. when applying a stored
//! shape under a caller's renaming), so the fresh counter is a global atomic
//! rather than graph state.

use std::{
    fmt,
    sync::atomic::{AtomicU32, Ordering},
};

pub mod map;
pub mod set;

pub use map::SlotMap;
pub use set::SlotSet;

/// First value of the fresh counter; numbered slots stay strictly below.
const FRESH_BASE: u32 = 1 << 20;

static FRESH: AtomicU32 = AtomicU32::new(FRESH_BASE);

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Slot(u32);

impl Slot {
    /// The `n`-th canonical slot, used when numbering a shape's names
    #[must_use]
    pub const fn numbered(n: u32) -> Self {
        assert!(n < FRESH_BASE);
        Self(n)
    }

    /// Allocate a slot that compares unequal to every slot produced so far
    #[must_use]
    pub fn fresh() -> Self {
        let id = FRESH.fetch_add(1, Ordering::Relaxed);
        assert!(id != u32::MAX, "fresh slot counter exhausted");
        Self(id)
    }

    #[must_use]
    pub const fn is_numbered(self) -> bool { self.0 < FRESH_BASE }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self(id) = *self;
        if self.is_numbered() {
            write!(f, "${id}")
        } else {
            write!(f, "$f{}", id - FRESH_BASE)
        }
    }
}

impl fmt::Display for Slot {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { fmt::Debug::fmt(self, f) }
}

#[cfg(test)]
mod test {
    use super::Slot;

    #[test]
    fn fresh_never_collides_with_numbered() {
        let f = Slot::fresh();
        assert!(!f.is_numbered());
        assert!(Slot::numbered(0) < f);
    }

    #[test]
    fn fresh_is_monotone() {
        let a = Slot::fresh();
        let b = Slot::fresh();
        assert!(a < b);
    }
}
