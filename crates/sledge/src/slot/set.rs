//! Ordered sets of slots

use std::{collections::BTreeSet, fmt};

use super::Slot;

#[derive(Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct SlotSet(BTreeSet<Slot>);

impl fmt::Debug for SlotSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self(set) = self;
        f.debug_set().entries(set).finish()
    }
}

impl SlotSet {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    #[must_use]
    pub fn singleton(slot: Slot) -> Self { Self(BTreeSet::from([slot])) }

    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    #[must_use]
    pub fn contains(&self, slot: Slot) -> bool { self.0.contains(&slot) }

    /// Returns true if the slot was not already present
    pub fn insert(&mut self, slot: Slot) -> bool { self.0.insert(slot) }

    /// Returns true if the slot was present
    pub fn remove(&mut self, slot: Slot) -> bool { self.0.remove(&slot) }

    pub fn iter(&self) -> impl Iterator<Item = Slot> + Clone + '_ { self.0.iter().copied() }

    #[must_use]
    pub fn union(&self, other: &Self) -> Self { Self(self.0.union(&other.0).copied().collect()) }

    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        Self(self.0.intersection(&other.0).copied().collect())
    }

    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        Self(self.0.difference(&other.0).copied().collect())
    }

    #[must_use]
    pub fn is_subset(&self, other: &Self) -> bool { self.0.is_subset(&other.0) }

    #[must_use]
    pub fn is_disjoint(&self, other: &Self) -> bool { self.0.is_disjoint(&other.0) }
}

impl FromIterator<Slot> for SlotSet {
    fn from_iter<I: IntoIterator<Item = Slot>>(it: I) -> Self { Self(it.into_iter().collect()) }
}

impl Extend<Slot> for SlotSet {
    #[inline]
    fn extend<I: IntoIterator<Item = Slot>>(&mut self, it: I) { self.0.extend(it); }
}

impl IntoIterator for SlotSet {
    type IntoIter = std::collections::btree_set::IntoIter<Slot>;
    type Item = Slot;

    fn into_iter(self) -> Self::IntoIter { self.0.into_iter() }
}

impl<'a> IntoIterator for &'a SlotSet {
    type IntoIter = std::iter::Copied<std::collections::btree_set::Iter<'a, Slot>>;
    type Item = Slot;

    fn into_iter(self) -> Self::IntoIter { self.0.iter().copied() }
}
