//! Union and the monolithic rebuild pass
//!
//! Unions perturb canonical form globally, so repairs are batched: every
//! union queues the shapes that may have decanonicalised, and one worklist
//! drain repairs each touched shape once per perturbation. Class slot sets
//! only ever shrink, and shape counts only ever fall, which bounds the drain.

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    mem,
};

use tracing::trace;

use super::{invariant, EGraph, EGraphError, ExpectInvariant};
use crate::{
    eclass::EClassId,
    node::{EClassCall, ENode, Operator},
    par::ParallelMap,
    slot::{Slot, SlotMap, SlotSet},
};

/// One equivalence group produced by a union: the surviving root plus, for
/// every pre-merge root folded into it, the map from the root's canonical
/// slots into that class's universe
#[derive(Debug, Clone)]
pub struct MergeGroup {
    pub root: EClassId,
    pub members: BTreeMap<EClassId, SlotMap>,
}

/// Everything a union changed: the merged groups, and the classes whose slot
/// sets shrank without necessarily being merged
#[derive(Debug, Clone, Default)]
pub struct UnionReport {
    pub groups: Vec<MergeGroup>,
    pub shrunk: BTreeSet<EClassId>,
}

impl UnionReport {
    #[must_use]
    pub fn is_empty(&self) -> bool { self.groups.is_empty() && self.shrunk.is_empty() }
}

impl<N: Operator> EGraph<N> {
    /// Union a batch of call pairs and rebuild
    ///
    /// The rebuild is single-threaded and monolithic within this call; the
    /// parallel map is used only for the up-front validation of the inputs.
    ///
    /// # Errors
    /// Returns an error if any call references an unknown class or does not
    /// cover its class's canonical slot set, or the parallel map is
    /// cancelled.
    pub fn union_many<P: ParallelMap>(
        &mut self,
        pairs: Vec<(EClassCall, EClassCall)>,
        par: &P,
    ) -> Result<UnionReport, EGraphError> {
        let pairs = par
            .map(pairs, |(a, b)| {
                self.find_call(&a)?;
                self.find_call(&b)?;
                Ok::<_, EGraphError>((a, b))
            })?
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;

        let mut rb = Rebuild {
            eg: self,
            pending: BTreeSet::new(),
            merges: Vec::new(),
            shrunk: BTreeSet::new(),
        };
        for (a, b) in &pairs {
            rb.unify(a, b)?;
        }
        rb.drain()?;
        let Rebuild {
            eg: _,
            merges,
            shrunk,
            pending,
        } = rb;
        debug_assert!(pending.is_empty());

        for &(sub, _) in &merges {
            let data = self
                .classes
                .remove(&sub)
                .expect_invariant("absorbed class missing from the class table");
            if !data.is_empty() {
                invariant!("absorbed class still holds nodes");
            }
        }

        let mut groups: BTreeMap<EClassId, MergeGroup> = BTreeMap::new();
        for &(sub, _) in &merges {
            let found = self.uf.find(sub)?;
            groups
                .entry(found.id)
                .or_insert_with(|| MergeGroup {
                    root: found.id,
                    members: BTreeMap::new(),
                })
                .members
                .insert(sub, found.map);
        }
        for group in groups.values_mut() {
            let identity = SlotMap::identity(self.class(group.root).slots());
            group.members.insert(group.root, identity);
        }

        self.check_invariants();

        Ok(UnionReport {
            groups: groups.into_values().collect(),
            shrunk,
        })
    }
}

struct Rebuild<'a, N> {
    eg: &'a mut EGraph<N>,
    /// Shapes whose canonical form may have changed; every entry is either in
    /// the hash-cons or already superseded
    pending: BTreeSet<ENode<N>>,
    /// `(absorbed root, dominant root at merge time)`
    merges: Vec<(EClassId, EClassId)>,
    shrunk: BTreeSet<EClassId>,
}

impl<N: Operator> Rebuild<'_, N> {
    fn queue_users(&mut self, id: EClassId) {
        let users: Vec<_> = self.eg.class(id).users.iter().cloned().collect();
        self.pending.extend(users);
    }

    fn unify(&mut self, a: &EClassCall, b: &EClassCall) -> Result<(), EGraphError> {
        let mut fuel = 4 + a.map.len() + b.map.len();
        loop {
            if fuel == 0 {
                invariant!("slot intersection failed to converge");
            }
            fuel -= 1;

            let fa = self.eg.find_call(a)?;
            let fb = self.eg.find_call(b)?;
            let ia = fa.map.values_set();
            let ib = fb.map.values_set();
            let shared = ia.intersection(&ib);

            // a union can only identify the slots both sides project; any
            // others become redundant before the classes meet
            if shared != ia {
                self.shrink(fa.id, fa.map.filter_values(&shared).keys_set());
                continue;
            }
            if shared != ib {
                self.shrink(fb.id, fb.map.filter_values(&shared).keys_set());
                continue;
            }

            if fa.id == fb.id {
                if fa.map != fb.map {
                    let perm = fa.map.compose(&fb.map.inverse());
                    if self.eg.class_mut(fa.id).add_perm(perm) {
                        trace!(class = %fa.id, "self-union witnessed a new symmetry");
                        self.queue_users(fa.id);
                    }
                }
                return Ok(());
            }

            let (sub, dom) = if (self.eg.class(fa.id).len(), fa.id)
                <= (self.eg.class(fb.id).len(), fb.id)
            {
                (fa, fb)
            } else {
                (fb, fa)
            };
            self.merge(&sub, &dom);
            return Ok(());
        }
    }

    /// Fold `sub` into `dom`; both are canonical root calls projecting the
    /// same caller slots
    fn merge(&mut self, sub: &EClassCall, dom: &EClassCall) {
        trace!(sub = %sub.id, dom = %dom.id, "merging classes");
        self.merges.push((sub.id, dom.id));

        let dom_to_sub = dom.map.compose(&sub.map.inverse());
        let sub_to_dom = dom_to_sub.inverse();
        self.eg
            .uf
            .update(sub.id, EClassCall::new(dom.id, dom_to_sub));

        let sub_data = self.eg.class_mut(sub.id);
        let nodes = mem::take(&mut sub_data.nodes);
        let users = mem::take(&mut sub_data.users);
        let sub_gens = sub_data.group.generators().to_vec();
        sub_data.invalidate();

        for (shape, renaming) in nodes {
            // translate into the dominant universe; renaming targets outside
            // the shrunken sub slots stay redundant under fresh names
            let translated = renaming.compose_fresh(&sub_to_dom);
            self.eg.hash_cons.insert(shape.clone(), dom.id);
            if self
                .eg
                .class_mut(dom.id)
                .insert_node(shape.clone(), translated)
                .is_some()
            {
                invariant!("hash-cons desync: shape already stored in the dominant class");
            }
            self.pending.insert(shape);
        }

        self.pending.extend(users.iter().cloned());
        let dom_data = self.eg.class_mut(dom.id);
        dom_data.users.extend(users);
        for g in sub_gens {
            dom_data.add_perm(g.rename(&sub_to_dom));
        }
        self.queue_users(dom.id);
    }

    /// Restrict a root's slot set to `keep` (closed further under its
    /// symmetry group) and queue everything projecting it
    fn shrink(&mut self, id: EClassId, keep: SlotSet) {
        let data = self.eg.class(id);
        let redundant = data.slots().difference(&keep);
        if redundant.is_empty() {
            return;
        }

        let mut closed = SlotSet::new();
        for s in &redundant {
            closed.extend(data.group().orbit(s));
        }
        let new_slots = data.slots().difference(&closed);
        let new_group = data.group().restrict(&new_slots);
        trace!(class = %id, dropped = closed.len(), "shrinking class slots");

        let data = self.eg.class_mut(id);
        data.set_slots(new_slots.clone(), new_group);
        self.eg.uf.set_root_slots(id, &new_slots);
        self.shrunk.insert(id);
        self.queue_users(id);
    }

    fn drain(&mut self) -> Result<(), EGraphError> {
        while let Some(shape) = self.pending.pop_first() {
            self.repair(shape)?;
        }
        Ok(())
    }

    /// Re-canonicalise one stored shape, shrinking, rewriting, or unifying as
    /// the new form demands
    fn repair(&mut self, shape: ENode<N>) -> Result<(), EGraphError> {
        let mut fuel = 64usize;
        loop {
            // a queued shape may have been superseded by an earlier repair
            let Some(&cls) = self.eg.hash_cons.get(&shape) else {
                return Ok(());
            };
            debug_assert!(self.eg.uf.is_canonical(cls));

            if fuel == 0 {
                invariant!("node repair failed to converge");
            }
            fuel -= 1;

            let canon = self.eg.canonicalize_node(&shape)?;
            let old = self
                .eg
                .class(cls)
                .nodes
                .get(&shape)
                .expect_invariant("hash-cons entry missing from its class's node table")
                .clone();
            let new_renaming = canon.shape.map.compose_fresh(&old);
            let class_perms: Vec<SlotMap> = canon
                .perms
                .iter()
                .map(|p| p.rename(&new_renaming))
                .collect();

            let slots = self.eg.class(cls).slots().clone();
            let targets = new_renaming.values_set();

            // a class slot this node no longer projects is redundant
            if !slots.is_subset(&targets) {
                self.shrink(cls, slots.intersection(&targets));
                continue;
            }

            // a class slot in the symmetry orbit of a redundant target is
            // itself redundant
            let outside = targets.difference(&slots);
            if !outside.is_empty() && !class_perms.is_empty() {
                let mut gens = class_perms.clone();
                gens.extend(self.eg.class(cls).group().generators().iter().cloned());
                let hits = orbit_hits(&outside, &gens, &slots);
                if !hits.is_empty() {
                    self.shrink(cls, slots.difference(&hits));
                    continue;
                }
            }

            if canon.shape.node == shape {
                let mut changed = false;
                if new_renaming != old {
                    self.eg
                        .class_mut(cls)
                        .insert_node(shape.clone(), new_renaming.clone());
                    changed = true;
                }
                changed |= self.propagate_perms(cls, &slots, class_perms);
                if changed {
                    self.queue_users(cls);
                }
                return Ok(());
            }

            trace!(class = %cls, "repair rewrote a stale shape");

            // unlink the stale shape entirely
            self.eg.class_mut(cls).remove_node(&shape);
            self.eg.hash_cons.remove(&shape);
            for arg in shape.args() {
                let owner = self.eg.uf.find(arg.id)?.id;
                self.eg.class_mut(owner).users.remove(&shape);
            }

            // witnessed symmetries belong to the class regardless of how the
            // structural step below resolves
            if self.propagate_perms(cls, &slots, class_perms) {
                self.queue_users(cls);
            }

            let new_shape = canon.shape.node;
            if let Some(&other) = self.eg.hash_cons.get(&new_shape) {
                // the canonical form already exists elsewhere: the two
                // classes coincide, expressed in the shape's slot universe
                let self_map = new_renaming.filter_values(&slots).inverse();
                let other_data = self.eg.class(other);
                let other_map = other_data
                    .nodes
                    .get(&new_shape)
                    .expect_invariant("hash-cons entry missing from its class's node table")
                    .filter_values(other_data.slots())
                    .inverse();
                let a = EClassCall::new(cls, self_map);
                let b = EClassCall::new(other, other_map);
                self.unify(&a, &b)?;
            } else {
                self.eg.hash_cons.insert(new_shape.clone(), cls);
                self.eg
                    .class_mut(cls)
                    .insert_node(new_shape.clone(), new_renaming);
                for arg in new_shape.args() {
                    let owner = self.eg.uf.find(arg.id)?.id;
                    self.eg.class_mut(owner).users.insert(new_shape.clone());
                }
                self.queue_users(cls);
            }
            return Ok(());
        }
    }

    /// Install witnessed symmetries on a class; returns true if the group
    /// grew
    fn propagate_perms(&mut self, cls: EClassId, slots: &SlotSet, perms: Vec<SlotMap>) -> bool {
        let mut grew = false;
        for q in perms {
            let q = q.filter_keys(slots);
            if q.is_perm() && q.keys_set() == *slots {
                grew |= self.eg.class_mut(cls).add_perm(q);
            }
        }
        grew
    }
}

/// Forward closure of `seed` under `gens`, intersected with `slots`
fn orbit_hits(seed: &SlotSet, gens: &[SlotMap], slots: &SlotSet) -> SlotSet {
    let mut seen = seed.clone();
    let mut queue: VecDeque<Slot> = seed.iter().collect();
    while let Some(s) = queue.pop_front() {
        for g in gens {
            let Some(t) = g.get(s) else { continue };
            if seen.insert(t) {
                queue.push_back(t);
            }
        }
    }
    seen.intersection(slots)
}
