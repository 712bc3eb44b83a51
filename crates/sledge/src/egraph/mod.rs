//! The hash-consed, congruence-closed slotted e-graph kernel
//!
//! State is three synchronised tables: the slotted union-find, the hash-cons
//! from shapes to class identities, and the class table. Insertions
//! canonicalise nodes up to argument symmetry and α-equivalence before
//! touching the hash-cons; unions accumulate perturbations that a single
//! monolithic [`rebuild`](EGraph::union_many) pass repairs.

use std::collections::BTreeMap;

use hashbrown::HashMap;

pub use add::AddResult;
pub use rebuild::{MergeGroup, UnionReport};

use crate::{
    eclass::{EClassData, EClassId},
    fresh::Gen,
    node::{EClassCall, ENode, Operator, ShapeCall},
    par::Canceled,
    union_find::{NoClass, UnionFind},
};

mod add;
mod check;
mod rebuild;

/// Error raised by kernel operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum EGraphError {
    #[error(transparent)]
    NoClass(#[from] NoClass),

    /// The caller's renaming does not cover the canonical slots of the class
    /// it references
    #[error("call into {} does not cover its class's canonical slot set", .0.id)]
    MalformedCall(EClassCall),

    #[error(transparent)]
    Canceled(#[from] Canceled),
}

pub(crate) trait ExpectInvariant<T> {
    fn expect_invariant(self, msg: &str) -> T;
}

#[cfg(any(test, feature = "test"))]
impl<T> ExpectInvariant<T> for Option<T> {
    #[inline]
    fn expect_invariant(self, msg: &str) -> T { self.expect(msg) }
}

#[cfg(any(test, feature = "test"))]
impl<T, E> ExpectInvariant<T> for Result<T, E> {
    #[inline]
    fn expect_invariant(self, msg: &str) -> T { self.unwrap_or_else(|_| panic!("{msg}")) }
}

#[cfg(not(any(test, feature = "test")))]
impl<T> ExpectInvariant<T> for Option<T> {
    #[inline]
    fn expect_invariant(self, _: &str) -> T { self.unwrap_or_else(|| unreachable!()) }
}

#[cfg(not(any(test, feature = "test")))]
impl<T, E> ExpectInvariant<T> for Result<T, E> {
    #[inline]
    fn expect_invariant(self, _: &str) -> T { self.unwrap_or_else(|_| unreachable!()) }
}

macro_rules! invariant {
    ($($tt:tt)*) => {
        #[cfg(any(test, feature = "test"))]
        { panic!($($tt)*) }

        #[cfg(not(any(test, feature = "test")))]
        { unreachable!() }
    };
}

pub(crate) use invariant;

#[derive(Debug, Clone)]
pub struct EGraph<N> {
    uf: UnionFind,
    hash_cons: HashMap<ENode<N>, EClassId>,
    classes: BTreeMap<EClassId, EClassData<N>>,
    ids: Gen<u32>,
}

impl<N> Default for EGraph<N> {
    fn default() -> Self {
        Self {
            uf: UnionFind::new(),
            hash_cons: HashMap::new(),
            classes: BTreeMap::new(),
            ids: Gen::default(),
        }
    }
}

impl<N> EGraph<N> {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// An empty graph of the same node type
    #[must_use]
    pub fn emptied(&self) -> Self { Self::new() }

    /// The number of live (canonical) e-classes
    #[must_use]
    pub fn len(&self) -> usize { self.classes.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.classes.is_empty() }

    /// The number of stored shapes across all classes
    #[must_use]
    pub fn total_nodes(&self) -> usize { self.hash_cons.len() }

    #[must_use]
    pub fn contains(&self, id: EClassId) -> bool { self.uf.contains(id) }

    /// Every canonical e-class
    pub fn classes(&self) -> impl Iterator<Item = EClassId> + '_ {
        self.classes.keys().copied()
    }

    /// The canonical call standing for an e-class: its root, with the map
    /// from the root's slots into the queried class's universe
    ///
    /// # Errors
    /// Returns an error if the class was never part of this graph.
    pub fn canonicalize_ref(&self, id: EClassId) -> Result<EClassCall, EGraphError> {
        Ok(self.uf.find(id)?)
    }

    /// Resolve a caller-provided call to its canonical root in the same
    /// universe, validating that the renaming covers the class
    ///
    /// # Errors
    /// Returns an error if the class is unknown or the call's map does not
    /// cover the class's canonical slot set.
    pub fn canonicalize_call(&self, call: &EClassCall) -> Result<EClassCall, EGraphError> {
        self.find_call(call)
    }

    pub(crate) fn find_call(&self, call: &EClassCall) -> Result<EClassCall, EGraphError> {
        let root = self.uf.find(call.id)?;
        if !root.map.values().all(|v| call.map.contains_key(v)) {
            return Err(EGraphError::MalformedCall(call.clone()));
        }
        Ok(EClassCall::new(root.id, root.map.compose(&call.map)))
    }

    pub(crate) fn class(&self, id: EClassId) -> &EClassData<N> {
        self.classes
            .get(&id)
            .unwrap_or_else(|| panic!("no class data for canonical class {id}"))
    }

    pub(crate) fn class_mut(&mut self, id: EClassId) -> &mut EClassData<N> {
        self.classes
            .get_mut(&id)
            .unwrap_or_else(|| panic!("no class data for canonical class {id}"))
    }
}

impl<N: Operator> EGraph<N> {
    /// Whether two calls denote the same class under the same projection,
    /// modulo the class's witnessed symmetries
    ///
    /// # Errors
    /// Returns an error if either call is unknown or malformed.
    pub fn are_same(&self, a: &EClassCall, b: &EClassCall) -> Result<bool, EGraphError> {
        let a = self.find_call(a)?;
        let b = self.find_call(b)?;
        if a.id != b.id {
            return Ok(false);
        }
        if a.map == b.map {
            return Ok(true);
        }
        let perm = a.map.compose_partial(&b.map.inverse());
        Ok(perm.len() == a.map.len() && perm.is_perm() && self.class(a.id).group().contains(&perm))
    }

    /// The member nodes of a class, materialised in the caller's universe
    ///
    /// Bound slots and redundant shape slots are refreshed per returned node.
    ///
    /// # Errors
    /// Returns an error if the call is unknown or malformed.
    pub fn nodes(&self, call: &EClassCall) -> Result<Vec<ENode<N>>, EGraphError> {
        let call = self.find_call(call)?;
        let data = self.class(call.id);
        if call.map.is_identity() {
            return Ok(data.applied_nodes_identity().to_vec());
        }
        Ok(data
            .applied_nodes()
            .iter()
            .map(|ShapeCall { node, map }| node.rename_fresh(&map.compose_partial(&call.map)))
            .collect())
    }

    /// [`nodes`](Self::nodes), filtered to one operator
    ///
    /// # Errors
    /// Returns an error if the call is unknown or malformed.
    pub fn nodes_with_op(&self, call: &EClassCall, op: &N) -> Result<Vec<ENode<N>>, EGraphError> {
        Ok(self
            .nodes(call)?
            .into_iter()
            .filter(|n| n.op() == op)
            .collect())
    }

    /// The canonical shapes of every node referencing this class in its
    /// arguments
    ///
    /// # Errors
    /// Returns an error if the class is unknown.
    pub fn users(&self, id: EClassId) -> Result<Vec<ENode<N>>, EGraphError> {
        let root = self.uf.find(id)?;
        self.class(root.id)
            .users
            .iter()
            .map(|u| self.canonicalize(u).map(|sc| sc.node))
            .collect()
    }

    /// Look up a node, returning the call it resolves to if some
    /// α-/symmetry-equivalent node is present
    ///
    /// # Errors
    /// Returns an error if any argument call is unknown or malformed.
    pub fn find_node(&self, node: &ENode<N>) -> Result<Option<EClassCall>, EGraphError> {
        let shaped = self.canonicalize(node)?;
        let Some(&id) = self.hash_cons.get(&shaped.node) else {
            return Ok(None);
        };
        debug_assert!(self.uf.is_canonical(id));
        let data = self.class(id);
        let stored = data
            .nodes
            .get(&shaped.node)
            .expect_invariant("hash-cons entry missing from its class's node table");
        // stored: shape slots -> class universe; restrict its inverse to the
        // class's canonical slots and continue into the caller's universe
        let class_to_shape = stored.filter_values(data.slots()).inverse();
        Ok(Some(EClassCall::new(
            id,
            class_to_shape.compose(&shaped.map),
        )))
    }
}

#[cfg(test)]
mod test;
