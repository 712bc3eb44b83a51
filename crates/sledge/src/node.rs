//! E-nodes and applied e-class references
//!
//! An [`ENode`] is one term constructor: an operator label, the slots the
//! node binds (`defs`), the slots it uses freely, and applied references to
//! argument classes. A node is a *shape* when its slots are numbered
//! canonically, lowest first in order of first occurrence; shapes are the
//! keys of the hash-cons and of every class's node table.

use std::{fmt, hash::Hash};

use crate::{
    eclass::EClassId,
    slot::{Slot, SlotMap, SlotSet},
};

/// Contract for operator labels of a term language
pub trait Operator: fmt::Debug + Clone + Eq + Ord + Hash + Send + Sync {}

impl<T: fmt::Debug + Clone + Eq + Ord + Hash + Send + Sync> Operator for T {}

/// An applied reference to an e-class: the class identity together with a
/// bijection from the class's canonical slots into the caller's universe
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EClassCall {
    pub id: EClassId,
    pub map: SlotMap,
}

impl EClassCall {
    #[must_use]
    pub fn new(id: EClassId, map: SlotMap) -> Self { Self { id, map } }

    /// A call to a class with an empty slot set
    #[must_use]
    pub fn slotless(id: EClassId) -> Self { Self::new(id, SlotMap::new()) }

    /// The caller-side slots this call exposes
    #[must_use]
    pub fn slots(&self) -> SlotSet { self.map.values_set() }
}

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ENode<N> {
    op: N,
    defs: Box<[Slot]>,
    uses: Box<[Slot]>,
    args: Box<[EClassCall]>,
}

impl<N: fmt::Debug> fmt::Debug for ENode<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            op,
            defs,
            uses,
            args,
        } = self;
        let mut t = f.debug_tuple("ENode");
        t.field(op);
        if !defs.is_empty() {
            t.field(&format_args!("defs {defs:?}"));
        }
        if !uses.is_empty() {
            t.field(&format_args!("uses {uses:?}"));
        }
        t.field(args).finish()
    }
}

impl<N> ENode<N> {
    #[must_use]
    pub fn new(
        op: N,
        defs: impl Into<Box<[Slot]>>,
        uses: impl Into<Box<[Slot]>>,
        args: impl Into<Box<[EClassCall]>>,
    ) -> Self {
        Self {
            op,
            defs: defs.into(),
            uses: uses.into(),
            args: args.into(),
        }
    }

    /// A node with no slots of its own
    #[must_use]
    pub fn apply(op: N, args: impl Into<Box<[EClassCall]>>) -> Self {
        Self::new(op, [], [], args)
    }

    #[must_use]
    pub fn leaf(op: N) -> Self { Self::apply(op, []) }

    #[must_use]
    pub fn op(&self) -> &N { &self.op }

    #[must_use]
    pub fn defs(&self) -> &[Slot] { &self.defs }

    #[must_use]
    pub fn uses(&self) -> &[Slot] { &self.uses }

    #[must_use]
    pub fn args(&self) -> &[EClassCall] { &self.args }

    /// The node's free slots: uses and argument slots, minus definitions
    #[must_use]
    pub fn slots(&self) -> SlotSet {
        let mut out: SlotSet = self.uses.iter().copied().collect();
        for arg in &self.args {
            out.extend(arg.map.values());
        }
        for &d in &self.defs {
            out.remove(d);
        }
        out
    }

    /// Every slot occurring in the node, bound or free, in occurrence order
    /// (definitions, then uses, then each argument's values in key order)
    fn occurrences(&self) -> impl Iterator<Item = Slot> + '_ {
        self.defs
            .iter()
            .copied()
            .chain(self.uses.iter().copied())
            .chain(self.args.iter().flat_map(|a| a.map.values()))
    }
}

impl<N: Clone> ENode<N> {
    /// Rewrite every slot occurrence through `f`
    ///
    /// `f` must be injective over the node's occurrences; argument maps keep
    /// their keys (the target classes' canonical slots) untouched.
    #[must_use]
    pub fn rename_with(&self, mut f: impl FnMut(Slot) -> Slot) -> Self {
        Self {
            op: self.op.clone(),
            defs: self.defs.iter().map(|&s| f(s)).collect(),
            uses: self.uses.iter().map(|&s| f(s)).collect(),
            args: self
                .args
                .iter()
                .map(|a| {
                    EClassCall::new(a.id, a.map.iter().map(|(k, v)| (k, f(v))).collect())
                })
                .collect(),
        }
    }

    /// Rewrite slot occurrences through a total renaming
    #[must_use]
    pub fn rename(&self, m: &SlotMap) -> Self { self.rename_with(|s| m.apply(s)) }

    /// Rewrite slot occurrences through `m`, minting one fresh slot per
    /// occurrence `m` does not cover
    #[must_use]
    pub fn rename_fresh(&self, m: &SlotMap) -> Self {
        let mut ext = m.clone();
        for s in self.occurrences() {
            if !ext.contains_key(s) {
                ext.insert(s, Slot::fresh());
            }
        }
        self.rename(&ext)
    }

    /// Canonicalise the node's slot names: number every slot in first
    /// occurrence order, and return the numbered node together with the
    /// renaming from its free numbered slots back into this node's universe
    #[must_use]
    pub fn shape(&self) -> ShapeCall<N> {
        let mut numbering = SlotMap::new();
        for s in self.occurrences() {
            if !numbering.contains_key(s) {
                let n = u32::try_from(numbering.len()).unwrap_or_else(|_| unreachable!());
                numbering.insert(s, Slot::numbered(n));
            }
        }
        let node = self.rename(&numbering);
        let map = self
            .slots()
            .iter()
            .map(|s| (numbering.apply(s), s))
            .collect();
        ShapeCall { node, map }
    }

    /// Returns true if the node is already its own shape
    #[must_use]
    pub fn is_shape(&self) -> bool
    where N: Eq {
        self.shape().node == *self
    }
}

/// A node in shape form together with the renaming from the shape's free
/// slots into a containing universe
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShapeCall<N> {
    pub node: ENode<N>,
    pub map: SlotMap,
}

#[cfg(test)]
mod test {
    use super::{EClassCall, ENode, Slot};
    use crate::{eclass::EClassId, slot::SlotMap};

    fn s(n: u32) -> Slot { Slot::numbered(n) }

    #[test]
    fn shape_numbers_first_occurrence() {
        let node = ENode::new('f', [], [s(7), s(3), s(7)], []);
        let shaped = node.shape();
        assert_eq!(shaped.node.uses(), [s(0), s(1), s(0)]);
        assert_eq!(shaped.map.apply(s(0)), s(7));
        assert_eq!(shaped.map.apply(s(1)), s(3));
    }

    #[test]
    fn shape_excludes_defs_from_renaming() {
        // a binder using its own bound slot: `lam $9. use $9`
        let node = ENode::new('l', [s(9)], [s(9)], []);
        let shaped = node.shape();
        assert_eq!(shaped.node.defs(), [s(0)]);
        assert_eq!(shaped.node.uses(), [s(0)]);
        assert!(shaped.map.is_empty());
        assert!(shaped.node.slots().is_empty());
    }

    #[test]
    fn alpha_equivalent_binders_share_a_shape() {
        let a = ENode::new('l', [s(4)], [s(4)], []);
        let b = ENode::new('l', [s(8)], [s(8)], []);
        assert_eq!(a.shape().node, b.shape().node);
    }

    #[test]
    fn arg_keys_survive_renaming() {
        let call = EClassCall::new(
            EClassId::new(0),
            [(s(0), s(20)), (s(1), s(21))].into_iter().collect::<SlotMap>(),
        );
        let node = ENode::new('g', [], [], [call]);
        let shaped = node.shape();
        let arg = &shaped.node.args()[0];
        // class-side keys untouched, caller-side values numbered
        assert_eq!(arg.map.apply(s(0)), s(0));
        assert_eq!(arg.map.apply(s(1)), s(1));
    }
}
