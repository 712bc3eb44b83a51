//! A disjoint-set over e-class identities whose edges carry slot renamings
//!
//! Every entry is an [`EClassCall`]: a root `r` maps to the identity call on
//! its own slots, and an absorbed class `c` maps to a call into its parent
//! whose map takes the parent's canonical slots into `c`'s universe. Because
//! slots only ever shrink, the map on an edge is total on the parent's
//! current slots by construction.

use std::collections::BTreeMap;

use crate::{
    eclass::EClassId,
    node::EClassCall,
    slot::{SlotMap, SlotSet},
};

/// Error indicating an e-class ID passed to a [`UnionFind`] operation does
/// not exist.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("no e-class found with ID {0}")]
pub struct NoClass(pub EClassId);

#[derive(Debug, Default, Clone)]
#[repr(transparent)]
pub struct UnionFind(BTreeMap<EClassId, EClassCall>);

impl UnionFind {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    #[must_use]
    pub fn contains(&self, id: EClassId) -> bool { self.0.contains_key(&id) }

    /// Register a freshly allocated root with the given slot set
    pub fn add(&mut self, id: EClassId, slots: &SlotSet) {
        let prev = self
            .0
            .insert(id, EClassCall::new(id, SlotMap::identity(slots)));
        debug_assert!(prev.is_none(), "e-class {id} registered twice");
    }

    /// Resolve the canonical call for an ID: the root it belongs to, with the
    /// map from the root's slots into the ID's universe
    ///
    /// # Errors
    /// Returns an error if the ID was never registered.
    pub fn find(&self, id: EClassId) -> Result<EClassCall, NoClass> {
        let mut acc = self.0.get(&id).ok_or(NoClass(id))?.clone();
        loop {
            let entry = self.0.get(&acc.id).unwrap_or_else(|| unreachable!());
            if entry.id == acc.id {
                return Ok(acc);
            }
            acc = EClassCall::new(entry.id, entry.map.compose(&acc.map));
        }
    }

    /// [`find`](Self::find), additionally rewriting the entry to point
    /// directly at the root
    ///
    /// # Errors
    /// Returns an error if the ID was never registered.
    pub fn find_compress(&mut self, id: EClassId) -> Result<EClassCall, NoClass> {
        let found = self.find(id)?;
        if found.id != id {
            self.0.insert(id, found.clone());
        }
        Ok(found)
    }

    /// Resolve a call through the forest, yielding a call to the root in the
    /// same caller universe
    ///
    /// # Errors
    /// Returns an error if the call's class was never registered.
    pub fn find_call(&self, call: &EClassCall) -> Result<EClassCall, NoClass> {
        let root = self.find(call.id)?;
        Ok(EClassCall::new(root.id, root.map.compose(&call.map)))
    }

    #[must_use]
    pub fn is_canonical(&self, id: EClassId) -> bool {
        self.0.get(&id).is_some_and(|e| e.id == id)
    }

    /// Repoint an absorbed class at its new parent
    pub fn update(&mut self, id: EClassId, parent: EClassCall) {
        let entry = self.0.get_mut(&id).unwrap_or_else(|| unreachable!());
        *entry = parent;
    }

    /// Reset a root's entry to the identity call on a shrunken slot set
    pub fn set_root_slots(&mut self, id: EClassId, slots: &SlotSet) {
        debug_assert!(self.is_canonical(id));
        self.update(id, EClassCall::new(id, SlotMap::identity(slots)));
    }
}

#[cfg(test)]
mod test {
    use super::UnionFind;
    use crate::{
        eclass::EClassId,
        node::EClassCall,
        slot::{Slot, SlotMap, SlotSet},
    };

    fn s(n: u32) -> Slot { Slot::numbered(n) }

    #[test]
    fn find_missing_errors() {
        let uf = UnionFind::new();
        assert!(uf.find(EClassId::new(3)).is_err());
    }

    #[test]
    fn find_composes_renamings_along_the_chain() {
        let mut uf = UnionFind::new();
        let slots: SlotSet = [s(0), s(1)].into_iter().collect();
        let (a, b, c) = (EClassId::new(0), EClassId::new(1), EClassId::new(2));
        uf.add(a, &slots);
        uf.add(b, &slots);
        uf.add(c, &slots);

        // c -> b swapping slots, b -> a swapping slots; c resolves to a with
        // the identity
        let swap: SlotMap = [(s(0), s(1)), (s(1), s(0))].into_iter().collect();
        uf.update(c, EClassCall::new(b, swap.clone()));
        uf.update(b, EClassCall::new(a, swap));

        let found = uf.find(c).unwrap();
        assert_eq!(found.id, a);
        assert!(found.map.is_identity());
        assert!(!uf.is_canonical(c));
        assert!(uf.is_canonical(a));
    }

    #[test]
    fn compression_preserves_find() {
        let mut uf = UnionFind::new();
        let slots: SlotSet = [s(0)].into_iter().collect();
        let ids: Vec<_> = (0..4).map(EClassId::new).collect();
        for &id in &ids {
            uf.add(id, &slots);
        }
        for w in ids.windows(2) {
            uf.update(w[1], EClassCall::new(w[0], SlotMap::identity(&slots)));
        }

        let before = uf.find(ids[3]).unwrap();
        let compressed = uf.find_compress(ids[3]).unwrap();
        assert_eq!(before, compressed);
        assert_eq!(uf.find(ids[3]).unwrap(), before);
    }
}
