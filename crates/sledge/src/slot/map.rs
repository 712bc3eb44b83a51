//! Ordered slot bijections
//!
//! A [`SlotMap`] is a finite bijection between slots, kept as a vector of
//! `(key, value)` pairs sorted by key. Keys and values are each unique; a map
//! whose key set equals its value set is a *permutation*. Composition is
//! written left to right: `a.compose(&b)` maps `x` to `b[a[x]]`.

use std::fmt;

use hashbrown::HashMap;

use super::{Slot, SlotSet};

/// Error indicating an insertion would break the bijection
#[derive(Debug, Clone, Copy, thiserror::Error)]
pub enum MapClash {
    #[error("key {0} clashes with an existing mapping")]
    Key(Slot),
    #[error("value {0} clashes with an existing mapping")]
    Value(Slot),
}

#[derive(Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct SlotMap(Vec<(Slot, Slot)>);

impl fmt::Debug for SlotMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        struct Pair(Slot, Slot);

        impl fmt::Debug for Pair {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let Self(k, v) = self;
                write!(f, "{k} -> {v}")
            }
        }

        f.debug_set()
            .entries(self.0.iter().map(|&(k, v)| Pair(k, v)))
            .finish()
    }
}

impl SlotMap {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// The identity map on the given slot set
    #[must_use]
    pub fn identity(set: &SlotSet) -> Self { Self(set.iter().map(|s| (s, s)).collect()) }

    /// Build a map from key-value pairs, failing on any clash
    ///
    /// # Errors
    /// Returns an error if two pairs share a key or share a value.
    pub fn from_pairs<I: IntoIterator<Item = (Slot, Slot)>>(it: I) -> Result<Self, MapClash> {
        let mut map = Self::new();
        for (k, v) in it {
            map.try_insert(k, v)?;
        }
        Ok(map)
    }

    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    #[must_use]
    pub fn get(&self, key: Slot) -> Option<Slot> {
        self.0
            .binary_search_by_key(&key, |&(k, _)| k)
            .ok()
            .map(|i| self.0[i].1)
    }

    /// Image of `key`, which must be present
    #[must_use]
    pub fn apply(&self, key: Slot) -> Slot {
        self.get(key)
            .unwrap_or_else(|| panic!("slot map has no key {key}"))
    }

    #[must_use]
    pub fn contains_key(&self, key: Slot) -> bool { self.get(key).is_some() }

    /// Insert a pair, failing if either side clashes with an existing pair
    ///
    /// Returns true if a new pair was inserted (false if it was already
    /// present).
    ///
    /// # Errors
    /// Returns an error if the key maps to a different value, or the value is
    /// already the image of a different key.
    pub fn try_insert(&mut self, key: Slot, value: Slot) -> Result<bool, MapClash> {
        match self.0.binary_search_by_key(&key, |&(k, _)| k) {
            Ok(i) if self.0[i].1 == value => Ok(false),
            Ok(_) => Err(MapClash::Key(key)),
            Err(i) => {
                if self.0.iter().any(|&(_, v)| v == value) {
                    return Err(MapClash::Value(value));
                }
                self.0.insert(i, (key, value));
                Ok(true)
            },
        }
    }

    /// Insert a pair whose sides are known not to clash
    pub fn insert(&mut self, key: Slot, value: Slot) {
        self.try_insert(key, value)
            .unwrap_or_else(|e| panic!("{e}"));
    }

    pub fn keys(&self) -> impl Iterator<Item = Slot> + Clone + '_ {
        self.0.iter().map(|&(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = Slot> + Clone + '_ {
        self.0.iter().map(|&(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Slot, Slot)> + Clone + '_ {
        self.0.iter().copied()
    }

    #[must_use]
    pub fn keys_set(&self) -> SlotSet { self.keys().collect() }

    #[must_use]
    pub fn values_set(&self) -> SlotSet { self.values().collect() }

    #[must_use]
    pub fn inverse(&self) -> Self {
        let mut pairs: Vec<_> = self.0.iter().map(|&(k, v)| (v, k)).collect();
        pairs.sort_unstable_by_key(|&(k, _)| k);
        Self(pairs)
    }

    /// Total composition: apply `self`, then `other`
    ///
    /// Every value of `self` must be a key of `other`.
    #[must_use]
    pub fn compose(&self, other: &Self) -> Self {
        Self(self.0.iter().map(|&(k, v)| (k, other.apply(v))).collect())
    }

    /// Partial composition: pairs whose image is not a key of `other` are
    /// dropped
    #[must_use]
    pub fn compose_partial(&self, other: &Self) -> Self {
        Self(
            self.0
                .iter()
                .filter_map(|&(k, v)| other.get(v).map(|w| (k, w)))
                .collect(),
        )
    }

    /// Composition extending `other` with a fresh target for every value of
    /// `self` it does not cover
    #[must_use]
    pub fn compose_fresh(&self, other: &Self) -> Self {
        Self(
            self.0
                .iter()
                .map(|&(k, v)| (k, other.get(v).unwrap_or_else(Slot::fresh)))
                .collect(),
        )
    }

    /// Rename both sides through `m` where defined, keeping slots `m` does
    /// not cover
    ///
    /// For a permutation `p` and a bijection `m` out of `p`'s carrier this is
    /// conjugation: the result acts on `m`'s values as `p` acts on its keys.
    #[must_use]
    pub fn rename(&self, m: &Self) -> Self {
        let mut pairs: Vec<_> = self
            .0
            .iter()
            .map(|&(k, v)| (m.get(k).unwrap_or(k), m.get(v).unwrap_or(v)))
            .collect();
        pairs.sort_unstable_by_key(|&(k, _)| k);
        Self(pairs)
    }

    /// Restrict to keys contained in `keep`
    #[must_use]
    pub fn filter_keys(&self, keep: &SlotSet) -> Self {
        Self(self.0.iter().copied().filter(|&(k, _)| keep.contains(k)).collect())
    }

    /// Restrict to pairs whose value is contained in `keep`
    #[must_use]
    pub fn filter_values(&self, keep: &SlotSet) -> Self {
        Self(self.0.iter().copied().filter(|&(_, v)| keep.contains(v)).collect())
    }

    #[must_use]
    pub fn is_identity(&self) -> bool { self.0.iter().all(|&(k, v)| k == v) }

    /// True iff the key set equals the value set
    #[must_use]
    pub fn is_perm(&self) -> bool {
        self.len() == self.values_set().len() && self.keys().all(|k| self.values_set().contains(k))
    }

    /// Debug validation that values are pairwise distinct
    #[must_use]
    pub fn is_bijection(&self) -> bool {
        let mut seen = HashMap::with_capacity(self.0.len());
        self.0.iter().all(|&(_, v)| seen.insert(v, ()).is_none())
    }
}

impl FromIterator<(Slot, Slot)> for SlotMap {
    /// Collect pairs that are known not to clash
    fn from_iter<I: IntoIterator<Item = (Slot, Slot)>>(it: I) -> Self {
        let mut map = Self::new();
        for (k, v) in it {
            map.insert(k, v);
        }
        map
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::{Slot, SlotMap, SlotSet};

    fn small_bijection() -> impl Strategy<Value = SlotMap> {
        prop::collection::btree_set(0u32..64, 0..12).prop_flat_map(|keys| {
            let keys: Vec<_> = keys.into_iter().collect();
            let n = keys.len();
            Just(keys)
                .prop_shuffle()
                .prop_map(move |vals| {
                    (0..n)
                        .map(|i| (Slot::numbered(i as u32 + 64), Slot::numbered(vals[i])))
                        .collect()
                })
        })
    }

    fn small_perm() -> impl Strategy<Value = SlotMap> {
        prop::collection::btree_set(0u32..16, 0..8).prop_flat_map(|keys| {
            let keys: Vec<_> = keys.into_iter().collect();
            let orig = keys.clone();
            Just(keys).prop_shuffle().prop_map(move |vals| {
                orig.iter()
                    .zip(&vals)
                    .map(|(&k, &v)| (Slot::numbered(k), Slot::numbered(v)))
                    .collect()
            })
        })
    }

    proptest! {
        #[test]
        fn inverse_round_trips(m in small_bijection()) {
            let inv = m.inverse();
            prop_assert!(m.compose(&inv).is_identity());
            prop_assert!(inv.compose(&m).is_identity());
        }

        #[test]
        fn identity_is_neutral(m in small_bijection()) {
            let l = SlotMap::identity(&m.keys_set());
            let r = SlotMap::identity(&m.values_set());
            prop_assert_eq!(&l.compose(&m), &m);
            prop_assert_eq!(&m.compose(&r), &m);
        }

        #[test]
        fn perms_are_perms(p in small_perm()) {
            prop_assert!(p.is_perm());
            prop_assert!(p.inverse().is_perm());
            prop_assert!(p.compose(&p.inverse()).is_identity());
        }

        #[test]
        fn compose_fresh_extends(m in small_bijection()) {
            let out = m.compose_fresh(&SlotMap::new());
            prop_assert_eq!(out.keys_set(), m.keys_set());
            // every target was freshly minted, so none are numbered
            prop_assert!(out.values().all(|v| !v.is_numbered()));
            prop_assert!(out.is_bijection());
        }
    }

    #[test]
    fn filter_keys_restricts() {
        let m: SlotMap = [(0, 5), (1, 6), (2, 7)]
            .into_iter()
            .map(|(k, v)| (Slot::numbered(k), Slot::numbered(v)))
            .collect();
        let keep: SlotSet = [Slot::numbered(0), Slot::numbered(2)].into_iter().collect();
        let f = m.filter_keys(&keep);
        assert_eq!(f.len(), 2);
        assert_eq!(f.get(Slot::numbered(1)), None);
        assert_eq!(f.get(Slot::numbered(2)), Some(Slot::numbered(7)));
    }
}
