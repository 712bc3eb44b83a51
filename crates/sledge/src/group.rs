//! Permutation groups over slot sets
//!
//! A [`PermGroup`] stores a subgroup of the symmetric group on a finite slot
//! set as a Schreier–Sims stabiliser chain: the first level records the orbit
//! of one stabilised point together with a coset representative per orbit
//! point, and delegates everything fixing that point to a subgroup. The
//! symmetry group of an e-class can be exponential in its slot count; the
//! chain keeps membership polynomial and storage proportional to the orbit
//! sizes.

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    fmt,
};

use crate::slot::{Slot, SlotMap, SlotSet};

pub struct PermGroup {
    slots: SlotSet,
    gens: Vec<SlotMap>,
    chain: Option<Box<Stab>>,
}

struct Stab {
    point: Slot,
    orbit: BTreeMap<Slot, SlotMap>,
    sub: PermGroup,
}

impl fmt::Debug for PermGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            slots,
            gens,
            chain: _,
        } = self;
        f.debug_struct("PermGroup")
            .field("slots", slots)
            .field("gens", gens)
            .finish_non_exhaustive()
    }
}

impl Clone for PermGroup {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
            gens: self.gens.clone(),
            chain: self.chain.as_ref().map(|c| {
                Box::new(Stab {
                    point: c.point,
                    orbit: c.orbit.clone(),
                    sub: c.sub.clone(),
                })
            }),
        }
    }
}

impl PermGroup {
    /// The trivial group acting on the given slots
    #[must_use]
    pub fn trivial(slots: SlotSet) -> Self {
        Self {
            slots,
            gens: Vec::new(),
            chain: None,
        }
    }

    /// The group generated by the given permutations of `slots`
    ///
    /// Identity generators are dropped. Every generator must be a permutation
    /// whose carrier is exactly `slots`.
    #[must_use]
    pub fn from_generators<I: IntoIterator<Item = SlotMap>>(slots: SlotSet, gens: I) -> Self {
        let gens: Vec<_> = gens.into_iter().filter(|g| !g.is_identity()).collect();
        debug_assert!(
            gens.iter()
                .all(|g| g.is_perm() && g.keys_set() == slots),
            "generator carrier mismatch"
        );
        let chain = Self::build_chain(&slots, &gens);
        Self { slots, gens, chain }
    }

    fn build_chain(slots: &SlotSet, gens: &[SlotMap]) -> Option<Box<Stab>> {
        let point = slots
            .iter()
            .find(|&s| gens.iter().any(|g| g.apply(s) != s))?;

        let mut orbit = BTreeMap::new();
        orbit.insert(point, SlotMap::identity(slots));
        let mut queue = VecDeque::from([point]);
        while let Some(o) = queue.pop_front() {
            for g in gens {
                let t = g.apply(o);
                if !orbit.contains_key(&t) {
                    let rep = orbit[&o].compose(g);
                    orbit.insert(t, rep);
                    queue.push_back(t);
                }
            }
        }

        // Schreier's lemma: coset-conjugated generators generate the
        // stabiliser of `point`
        let mut sub_gens = BTreeSet::new();
        for (&o, rep_o) in &orbit {
            for g in gens {
                let t = g.apply(o);
                let s = rep_o.compose(g).compose(&orbit[&t].inverse());
                if !s.is_identity() {
                    sub_gens.insert(s);
                }
            }
        }

        Some(Box::new(Stab {
            point,
            orbit,
            sub: Self::from_generators(slots.clone(), sub_gens),
        }))
    }

    #[must_use]
    pub fn slots(&self) -> &SlotSet { &self.slots }

    #[must_use]
    pub fn generators(&self) -> &[SlotMap] { &self.gens }

    #[must_use]
    pub fn identity(&self) -> SlotMap { SlotMap::identity(&self.slots) }

    #[must_use]
    pub fn is_trivial(&self) -> bool { self.chain.is_none() }

    /// Group membership, by stripping one stabilised point per chain level
    #[must_use]
    pub fn contains(&self, p: &SlotMap) -> bool {
        if !(p.is_perm() && p.keys_set() == self.slots) {
            return false;
        }
        self.contains_impl(p)
    }

    fn contains_impl(&self, p: &SlotMap) -> bool {
        let Some(stab) = &self.chain else {
            return p.is_identity();
        };
        let Some(rep) = stab.orbit.get(&p.apply(stab.point)) else {
            return false;
        };
        stab.sub.contains_impl(&p.compose(&rep.inverse()))
    }

    /// Extend the group by a permutation; returns true if the group grew
    pub fn add(&mut self, p: SlotMap) -> bool {
        debug_assert!(
            p.is_perm() && p.keys_set() == self.slots,
            "added permutation carrier mismatch"
        );
        if p.is_identity() || self.contains(&p) {
            return false;
        }
        self.gens.push(p);
        self.chain = Self::build_chain(&self.slots, &self.gens);
        true
    }

    /// The orbit of a slot under the generator closure
    #[must_use]
    pub fn orbit(&self, slot: Slot) -> SlotSet {
        let mut out = SlotSet::singleton(slot);
        let mut queue = VecDeque::from([slot]);
        while let Some(s) = queue.pop_front() {
            for g in &self.gens {
                let Some(t) = g.get(s) else { continue };
                if out.insert(t) {
                    queue.push_back(t);
                }
            }
        }
        out
    }

    /// Every element of the group, by cartesian expansion of the coset
    /// representatives along the chain
    #[must_use]
    pub fn all_perms(&self) -> Vec<SlotMap> {
        let Some(stab) = &self.chain else {
            return vec![self.identity()];
        };
        let sub = stab.sub.all_perms();
        let mut out = Vec::with_capacity(sub.len() * stab.orbit.len());
        for rep in stab.orbit.values() {
            for q in &sub {
                out.push(q.compose(rep));
            }
        }
        out
    }

    /// Restrict the action to `keep`, which must be closed under every
    /// generator
    #[must_use]
    pub fn restrict(&self, keep: &SlotSet) -> Self {
        let slots = self.slots.intersection(keep);
        let gens: Vec<_> = self.gens.iter().map(|g| g.filter_keys(&slots)).collect();
        debug_assert!(
            gens.iter().all(SlotMap::is_perm),
            "restriction set not closed under the group"
        );
        Self::from_generators(slots, gens)
    }

    /// Transport the action through a bijection out of this group's carrier
    #[must_use]
    pub fn rename(&self, m: &SlotMap) -> Self {
        Self::from_generators(
            self.slots.iter().map(|s| m.apply(s)).collect(),
            self.gens.iter().map(|g| g.rename(m)),
        )
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::PermGroup;
    use crate::slot::{Slot, SlotMap, SlotSet};

    fn perm_of(n: u32) -> impl Strategy<Value = SlotMap> {
        let keys: Vec<_> = (0..n).collect();
        Just(keys.clone()).prop_shuffle().prop_map(move |vals| {
            keys.iter()
                .zip(&vals)
                .map(|(&k, &v)| (Slot::numbered(k), Slot::numbered(v)))
                .collect()
        })
    }

    fn carrier(n: u32) -> SlotSet { (0..n).map(Slot::numbered).collect() }

    /// Brute-force closure of the generators under composition
    fn closure(slots: &SlotSet, gens: &[SlotMap]) -> Vec<SlotMap> {
        let mut seen = std::collections::BTreeSet::new();
        seen.insert(SlotMap::identity(slots));
        loop {
            let next: Vec<_> = seen
                .iter()
                .flat_map(|p| gens.iter().map(move |g| p.compose(g)))
                .filter(|p| !seen.contains(p))
                .collect();
            if next.is_empty() {
                break;
            }
            seen.extend(next);
        }
        seen.into_iter().collect()
    }

    proptest! {
        #[test]
        fn contains_generators(gens in prop::collection::vec(perm_of(5), 1..4)) {
            let group = PermGroup::from_generators(carrier(5), gens.clone());
            for g in &gens {
                prop_assert!(group.contains(g));
            }
            prop_assert!(group.contains(&group.identity()));
        }

        #[test]
        fn contains_products(gens in prop::collection::vec(perm_of(4), 1..3)) {
            let group = PermGroup::from_generators(carrier(4), gens.clone());
            for a in &gens {
                for b in &gens {
                    prop_assert!(group.contains(&a.compose(b)));
                    prop_assert!(group.contains(&a.inverse()));
                }
            }
        }

        #[test]
        fn all_perms_is_closure(gens in prop::collection::vec(perm_of(4), 0..3)) {
            let group = PermGroup::from_generators(carrier(4), gens.clone());
            let mut all = group.all_perms();
            let mut expect = closure(&carrier(4), &gens);
            all.sort();
            expect.sort();
            prop_assert_eq!(all, expect);
        }

        #[test]
        fn membership_matches_closure(gens in prop::collection::vec(perm_of(4), 0..3), probe in perm_of(4)) {
            let group = PermGroup::from_generators(carrier(4), gens.clone());
            let expect = closure(&carrier(4), &gens).contains(&probe);
            prop_assert_eq!(group.contains(&probe), expect);
        }
    }

    #[test]
    fn swap_generates_two_elements() {
        let swap: SlotMap = [(0, 1), (1, 0)]
            .into_iter()
            .map(|(k, v)| (Slot::numbered(k), Slot::numbered(v)))
            .collect();
        let group = PermGroup::from_generators(carrier(2), [swap.clone()]);
        assert!(!group.is_trivial());
        assert!(group.contains(&swap));
        assert_eq!(group.all_perms().len(), 2);
        assert_eq!(group.orbit(Slot::numbered(0)), carrier(2));
    }
}
