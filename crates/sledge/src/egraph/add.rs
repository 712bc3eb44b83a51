//! Node canonicalisation and batched insertion
//!
//! Canonicalising a node resolves its argument calls through the union-find,
//! enumerates every variant reachable by composing argument renamings with
//! their classes' symmetry groups, and keeps the variant whose shape is
//! lexicographically least. The deterministic choice makes hash-consing
//! α-equivalence- and symmetry-aware: two nodes equal up to bound-name choice
//! or witnessed argument symmetry canonicalise to the same shape.

use super::{EGraph, EGraphError, ExpectInvariant};
use crate::{
    eclass::{EClassData, EClassId},
    node::{EClassCall, ENode, Operator, ShapeCall},
    par::ParallelMap,
    slot::{Slot, SlotMap},
};

/// Outcome of inserting one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddResult {
    /// The node was new; a class was allocated for it
    Added(EClassCall),
    /// An equivalent node was already present
    Existing(EClassCall),
}

impl AddResult {
    #[must_use]
    pub fn call(&self) -> &EClassCall {
        let (Self::Added(call) | Self::Existing(call)) = self;
        call
    }

    #[must_use]
    pub fn is_added(&self) -> bool { matches!(self, Self::Added(_)) }
}

/// A canonicalised node: the chosen shape plus the node's own symmetries
/// witnessed during variant enumeration, as permutations of the shape's free
/// slots
pub(crate) struct Canonical<N> {
    pub shape: ShapeCall<N>,
    pub perms: Vec<SlotMap>,
}

impl<N: Operator> EGraph<N> {
    /// Rewrite a node's argument calls to their canonical roots
    fn resolve_node(&self, node: &ENode<N>) -> Result<ENode<N>, EGraphError> {
        let args = node
            .args()
            .iter()
            .map(|call| self.find_call(call))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ENode::new(node.op().clone(), node.defs(), node.uses(), args))
    }

    /// Every node differing from `node` only by a witnessed argument
    /// symmetry; `node`'s args must be canonical
    fn compatible_variants(&self, node: &ENode<N>) -> Vec<ENode<N>> {
        let mut variants: Vec<Vec<EClassCall>> = vec![Vec::new()];
        for call in node.args() {
            let group = self.class(call.id).group();
            let choices: Vec<EClassCall> = if group.is_trivial() {
                vec![call.clone()]
            } else {
                group
                    .all_perms()
                    .into_iter()
                    .map(|p| EClassCall::new(call.id, p.compose(&call.map)))
                    .collect()
            };
            variants = variants
                .into_iter()
                .flat_map(|prefix| {
                    choices.iter().map(move |c| {
                        let mut next = prefix.clone();
                        next.push(c.clone());
                        next
                    })
                })
                .collect();
        }
        variants
            .into_iter()
            .map(|args| ENode::new(node.op().clone(), node.defs(), node.uses(), args))
            .collect()
    }

    pub(crate) fn canonicalize_node(&self, node: &ENode<N>) -> Result<Canonical<N>, EGraphError> {
        let resolved = self.resolve_node(node)?;
        let shaped: Vec<ShapeCall<N>> = self
            .compatible_variants(&resolved)
            .into_iter()
            .map(|v| v.shape())
            .collect();
        let best = shaped
            .iter()
            .min()
            .expect_invariant("variant enumeration produced no candidates")
            .clone();
        let mut perms = Vec::new();
        for sc in &shaped {
            if sc.node != best.node {
                continue;
            }
            let p = best.map.compose_partial(&sc.map.inverse());
            if p.len() == best.map.len() && !p.is_identity() && !perms.contains(&p) {
                perms.push(p);
            }
        }
        Ok(Canonical { shape: best, perms })
    }

    /// Canonicalise a node, returning its shape and the renaming from the
    /// shape's free slots into the node's universe
    ///
    /// # Errors
    /// Returns an error if any argument call is unknown or malformed.
    pub fn canonicalize(&self, node: &ENode<N>) -> Result<ShapeCall<N>, EGraphError> {
        self.canonicalize_node(node).map(|c| c.shape)
    }

    /// Insert a batch of nodes
    ///
    /// Canonicalisation is pure with respect to the current graph, so it runs
    /// through the parallel map; hash-cons installation is sequential.
    /// Results are returned in input order.
    ///
    /// # Errors
    /// Returns an error if any argument call is unknown or malformed, or the
    /// parallel map is cancelled.
    pub fn try_add_many<P: ParallelMap>(
        &mut self,
        nodes: Vec<ENode<N>>,
        par: &P,
    ) -> Result<Vec<AddResult>, EGraphError> {
        let canon = par.map(nodes, |n| self.canonicalize_node(&n))?;
        canon
            .into_iter()
            .map(|c| c.map(|c| self.install(c)))
            .collect()
    }

    /// Install one canonicalised node, allocating a class on hash-cons miss
    fn install(&mut self, canon: Canonical<N>) -> AddResult {
        let Canonical {
            shape: ShapeCall { node: shape, map },
            perms,
        } = canon;

        if let Some(&id) = self.hash_cons.get(&shape) {
            let data = self.class(id);
            let stored = data
                .nodes
                .get(&shape)
                .expect_invariant("hash-cons entry missing from its class's node table");
            let class_to_shape = stored.filter_values(data.slots()).inverse();
            return AddResult::Existing(EClassCall::new(id, class_to_shape.compose(&map)));
        }

        let id = EClassId::new(self.ids.bump());

        // fresh class slots, one per free shape slot
        let to_class: SlotMap = map.keys().map(|k| (k, Slot::fresh())).collect();
        let mut data = EClassData::new(to_class.values_set());
        data.insert_node(shape.clone(), to_class.clone());
        for p in perms {
            // shape-slot symmetries act on the class through the fresh naming
            data.add_perm(p.rename(&to_class));
        }

        self.uf.add(id, data.slots());
        self.hash_cons.insert(shape.clone(), id);
        for arg in shape.args() {
            self.class_mut(arg.id).users.insert(shape.clone());
        }
        self.classes.insert(id, data);

        AddResult::Added(EClassCall::new(id, to_class.inverse().compose(&map)))
    }
}
