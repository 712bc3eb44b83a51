//! Rebasing onto the extracted representative
//!
//! Long saturation runs accumulate structural bloat. The rebase strategy
//! periodically extracts the best term rooted at the tracked class (via an
//! external extractor), and if it differs from the previously extracted one,
//! starts a fresh graph containing only that term. The tracked root moves to
//! the new graph's corresponding class.

use tracing::debug;

use super::Strategy;
use crate::{
    command::{CommandError, EClassSymbol, Reification},
    egraph::{EGraph, EGraphError},
    node::{EClassCall, Operator},
    par::ParallelMap,
    tree::{MixedTree, QueueBuilder},
};

/// A graph together with a designated root class
#[derive(Debug, Clone)]
pub struct Rooted<N> {
    pub graph: EGraph<N>,
    pub root: EClassCall,
}

impl<N: Operator> Rooted<N> {
    /// The root's canonical call in the current graph
    ///
    /// # Errors
    /// Returns an error if the root class is not part of the graph.
    pub fn canonical_root(&self) -> Result<EClassCall, EGraphError> {
        self.graph.canonicalize_call(&self.root)
    }
}

/// Periodically restart from the best extracted term
///
/// `extract` must return a fully structural tree (no [`MixedTree::Call`]
/// leaves); `same` is the equivalence under which two extractions count as
/// the same term.
#[derive(Debug)]
pub struct Rebase<X, Q> {
    extract: X,
    same: Q,
}

impl<X, Q> Rebase<X, Q> {
    #[must_use]
    pub fn new(extract: X, same: Q) -> Self { Self { extract, same } }
}

impl<N, X, Q> Strategy<Rooted<N>> for Rebase<X, Q>
where
    N: Operator,
    X: Fn(&EGraph<N>, &EClassCall) -> MixedTree<N>,
    Q: Fn(&MixedTree<N>, &MixedTree<N>) -> bool,
{
    type Data = Option<MixedTree<N>>;

    fn initial(&self) -> Self::Data { None }

    fn apply<P: ParallelMap>(
        &self,
        rooted: &mut Rooted<N>,
        prev: &mut Self::Data,
        par: &P,
    ) -> Result<bool, CommandError> {
        let root = rooted.canonical_root()?;
        let term = (self.extract)(&rooted.graph, &root);
        if prev.as_ref().is_some_and(|p| (self.same)(p, &term)) {
            return Ok(false);
        }

        debug!(nodes = term.len(), "rebasing onto the extracted term");
        let mut fresh = rooted.graph.emptied();
        let mut builder = QueueBuilder::new();
        let sym = builder.add_tree(&term);
        let EClassSymbol::Virtual(virt) = sym else {
            panic!("extracted term must be fully structural");
        };
        let queue = builder.finish().optimize();
        let mut reification = Reification::new();
        queue.apply(&mut fresh, &mut reification, par)?;

        rooted.root = reification
            .remove(&virt)
            .ok_or(CommandError::Unbound(virt))?;
        rooted.graph = fresh;
        *prev = Some(term);
        Ok(true)
    }
}

#[cfg(test)]
mod test {
    use super::{Rebase, Rooted, Strategy};
    use crate::{
        egraph::EGraph,
        node::{EClassCall, ENode},
        par::Sequential,
        tree::MixedTree,
    };

    /// Extracts a constant-size representative: the smallest op among the
    /// root's nodes, as a leaf.
    fn extract_min_leaf(eg: &EGraph<char>, root: &EClassCall) -> MixedTree<char> {
        let op = eg
            .nodes(root)
            .unwrap()
            .iter()
            .map(|n| *n.op())
            .min()
            .unwrap();
        MixedTree::leaf(op)
    }

    #[test]
    fn rebase_discards_bloat_and_reaches_fixpoint() {
        let par = Sequential::new();
        let mut eg = EGraph::new();
        let added = eg
            .try_add_many(vec![ENode::leaf('b'), ENode::leaf('a')], &par)
            .unwrap();
        let b = added[0].call().clone();
        let a = added[1].call().clone();
        eg.union_many(vec![(a, b.clone())], &par).unwrap();

        let mut rooted = Rooted {
            root: b,
            graph: eg,
        };
        let strat = Rebase::new(extract_min_leaf, |l: &MixedTree<char>, r: &MixedTree<char>| {
            l == r
        });
        let mut prev = strat.initial();

        // first pass rebases onto the leaf 'a'
        assert!(strat.apply(&mut rooted, &mut prev, &par).unwrap());
        assert_eq!(rooted.graph.total_nodes(), 1);
        assert_eq!(prev, Some(MixedTree::leaf('a')));

        // second pass extracts the same term: no change
        assert!(!strat.apply(&mut rooted, &mut prev, &par).unwrap());
        assert_eq!(rooted.graph.total_nodes(), 1);
    }
}
