//! Per-class identity and storage

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};

use crate::{
    group::PermGroup,
    node::{ENode, Operator, ShapeCall},
    slot::{SlotMap, SlotSet},
};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct EClassId(u32);

impl EClassId {
    pub(crate) const fn new(id: u32) -> Self { Self(id) }

    #[must_use]
    pub fn id(self) -> u32 { self.0 }
}

impl fmt::Debug for EClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self(id) = self;
        write!(f, "c{id}")
    }
}

impl fmt::Display for EClassId {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { fmt::Debug::fmt(self, f) }
}

/// The stored state of one e-class
///
/// `nodes` keys every member in shape form, valued by the renaming from the
/// shape's free slots into the class's slot universe (the renaming may carry
/// targets outside `slots`; such targets are redundant and are eliminated by
/// rebuild). `users` holds the shapes of nodes in *other* classes whose
/// arguments reference this class. `group` is the witnessed symmetry group of
/// the node set over `slots`.
pub struct EClassData<N> {
    pub(crate) slots: SlotSet,
    pub(crate) nodes: BTreeMap<ENode<N>, SlotMap>,
    pub(crate) group: PermGroup,
    pub(crate) users: BTreeSet<ENode<N>>,
    cache: spin::Mutex<Cache<N>>,
}

struct Cache<N> {
    applied: Option<Arc<[ShapeCall<N>]>>,
    identity: Option<Arc<[ENode<N>]>>,
}

impl<N> Default for Cache<N> {
    fn default() -> Self {
        Self {
            applied: None,
            identity: None,
        }
    }
}

impl<N: fmt::Debug> fmt::Debug for EClassData<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            slots,
            nodes,
            group,
            users,
            cache: _,
        } = self;
        f.debug_struct("EClassData")
            .field("slots", slots)
            .field("nodes", nodes)
            .field("group", group)
            .field("users", users)
            .finish_non_exhaustive()
    }
}

impl<N: Clone> Clone for EClassData<N> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
            nodes: self.nodes.clone(),
            group: self.group.clone(),
            users: self.users.clone(),
            cache: spin::Mutex::new(Cache::default()),
        }
    }
}

impl<N> EClassData<N> {
    #[must_use]
    pub fn new(slots: SlotSet) -> Self {
        Self {
            group: PermGroup::trivial(slots.clone()),
            slots,
            nodes: BTreeMap::new(),
            users: BTreeSet::new(),
            cache: spin::Mutex::new(Cache::default()),
        }
    }

    #[must_use]
    pub fn slots(&self) -> &SlotSet { &self.slots }

    #[must_use]
    pub fn group(&self) -> &PermGroup { &self.group }

    #[must_use]
    pub fn len(&self) -> usize { self.nodes.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.nodes.is_empty() }

    /// Drop the cached projections; must follow any mutation of `slots`,
    /// `nodes`, or `group`
    pub(crate) fn invalidate(&mut self) { *self.cache.get_mut() = Cache::default(); }

    pub(crate) fn set_slots(&mut self, slots: SlotSet, group: PermGroup) {
        self.slots = slots;
        self.group = group;
        self.invalidate();
    }

    pub(crate) fn insert_node(&mut self, shape: ENode<N>, renaming: SlotMap) -> Option<SlotMap>
    where N: Operator {
        let prev = self.nodes.insert(shape, renaming);
        self.invalidate();
        prev
    }

    pub(crate) fn remove_node(&mut self, shape: &ENode<N>) -> Option<SlotMap>
    where N: Operator {
        let prev = self.nodes.remove(shape);
        self.invalidate();
        prev
    }

    pub(crate) fn add_perm(&mut self, perm: SlotMap) -> bool {
        let grew = self.group.add(perm);
        if grew {
            self.invalidate();
        }
        grew
    }
}

impl<N: Operator> EClassData<N> {
    /// Every member node in shape form with its renaming into the class's
    /// slot universe
    #[must_use]
    pub fn applied_nodes(&self) -> Arc<[ShapeCall<N>]> {
        let mut cache = self.cache.lock();
        Arc::clone(cache.applied.get_or_insert_with(|| {
            self.nodes
                .iter()
                .map(|(node, map)| ShapeCall {
                    node: node.clone(),
                    map: map.clone(),
                })
                .collect()
        }))
    }

    /// Member nodes materialised under the identity caller renaming, with
    /// bound and redundant slots refreshed
    #[must_use]
    pub fn applied_nodes_identity(&self) -> Arc<[ENode<N>]> {
        let mut cache = self.cache.lock();
        Arc::clone(cache.identity.get_or_insert_with(|| {
            self.nodes
                .iter()
                .map(|(node, map)| node.rename_fresh(map))
                .collect()
        }))
    }
}
