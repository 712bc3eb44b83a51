//! Per-class analyses
//!
//! An [`Analysis`] folds a value over every class: `make` computes a node's
//! value from its arguments' values, `join` combines the values of classes a
//! union identified, and `rename` transports a value through a slot
//! renaming (slots the map does not cover have left the class and should be
//! dropped or weakened by the analysis). [`MetaGraph`] enriches a kernel
//! graph with maintained values, invoking the hooks at the defined points:
//! add, union, and post-union slot shrinkage.

use std::{collections::BTreeMap, fmt};

use crate::{
    eclass::EClassId,
    egraph::{AddResult, EGraph, EGraphError, MergeGroup, UnionReport},
    node::{EClassCall, ENode, Operator},
    par::ParallelMap,
    slot::SlotMap,
};

pub trait Analysis<N>: Send + Sync {
    type Value: Clone + PartialEq + fmt::Debug + Send + Sync;

    /// The value of a node, given the values of its argument classes
    /// transported into the node's universe (in argument order)
    fn make(&self, node: &ENode<N>, args: &[Self::Value]) -> Self::Value;

    /// Combine the values of two identified classes; must be commutative,
    /// associative, and idempotent
    fn join(&self, a: Self::Value, b: Self::Value) -> Self::Value;

    /// Transport a value through a renaming
    fn rename(&self, v: Self::Value, map: &SlotMap) -> Self::Value;
}

/// A kernel graph enriched with maintained per-class analysis values
#[derive(Debug, Clone)]
pub struct MetaGraph<N, A: Analysis<N>> {
    graph: EGraph<N>,
    analysis: A,
    values: BTreeMap<EClassId, A::Value>,
}

impl<N: Operator, A: Analysis<N>> MetaGraph<N, A> {
    #[must_use]
    pub fn new(analysis: A) -> Self { Self::enrich(analysis, EGraph::new()) }

    /// Enrich an existing graph, folding values to a fixpoint over its
    /// current classes
    #[must_use]
    pub fn enrich(analysis: A, graph: EGraph<N>) -> Self {
        let mut out = Self {
            graph,
            analysis,
            values: BTreeMap::new(),
        };
        // cyclic classes converge because join is idempotent and the value
        // of a class only ever coarsens
        let mut changed = true;
        while changed {
            changed = false;
            for id in out.graph.classes().collect::<Vec<_>>() {
                let call = EClassCall::new(id, SlotMap::identity(out.graph.class(id).slots()));
                let Ok(nodes) = out.graph.nodes(&call) else {
                    continue;
                };
                for node in nodes {
                    let Some(value) = out.make_value(&node) else {
                        continue;
                    };
                    let next = match out.values.get(&id) {
                        Some(prev) => out.analysis.join(prev.clone(), value),
                        None => value,
                    };
                    if out.values.get(&id) != Some(&next) {
                        out.values.insert(id, next);
                        changed = true;
                    }
                }
            }
        }
        out
    }

    #[must_use]
    pub fn graph(&self) -> &EGraph<N> { &self.graph }

    #[must_use]
    pub fn into_inner(self) -> (EGraph<N>, A) { (self.graph, self.analysis) }

    /// The maintained value of a class, transported into the caller's
    /// universe
    #[must_use]
    pub fn value(&self, call: &EClassCall) -> Option<A::Value> {
        let found = self.graph.canonicalize_call(call).ok()?;
        let v = self.values.get(&found.id)?;
        Some(self.analysis.rename(v.clone(), &found.map))
    }

    /// `make` for a node whose argument values are all known
    fn make_value(&self, node: &ENode<N>) -> Option<A::Value> {
        let args = node
            .args()
            .iter()
            .map(|call| self.value(call))
            .collect::<Option<Vec<_>>>()?;
        Some(self.analysis.make(node, &args))
    }

    /// Insert nodes, maintaining values for the resulting classes
    ///
    /// # Errors
    /// Returns an error if the kernel rejects a call.
    pub fn try_add_many<P: ParallelMap>(
        &mut self,
        nodes: Vec<ENode<N>>,
        par: &P,
    ) -> Result<Vec<AddResult>, EGraphError> {
        let values: Vec<_> = nodes.iter().map(|n| self.make_value(n)).collect();
        let results = self.graph.try_add_many(nodes, par)?;
        for (result, value) in results.iter().zip(values) {
            let Some(value) = value else { continue };
            let call = result.call();
            // store in the class's own universe
            let value = self.analysis.rename(value, &call.map.inverse());
            let next = match self.values.remove(&call.id) {
                Some(prev) => self.analysis.join(prev, value),
                None => value,
            };
            self.values.insert(call.id, next);
        }
        Ok(results)
    }

    /// Union call pairs, folding values across each merged group and
    /// re-renaming values of classes whose slots shrank
    ///
    /// # Errors
    /// Returns an error if the kernel rejects a call.
    pub fn union_many<P: ParallelMap>(
        &mut self,
        pairs: Vec<(EClassCall, EClassCall)>,
        par: &P,
    ) -> Result<UnionReport, EGraphError> {
        let report = self.graph.union_many(pairs, par)?;

        for MergeGroup { root, members } in &report.groups {
            let mut folded: Option<A::Value> = None;
            for (&member, map) in members {
                let Some(v) = self.values.remove(&member) else {
                    continue;
                };
                // map: root slots -> member universe; pull the value back
                let v = self.analysis.rename(v, &map.inverse());
                folded = Some(match folded {
                    Some(acc) => self.analysis.join(acc, v),
                    None => v,
                });
            }
            if let Some(v) = folded {
                self.values.insert(*root, v);
            }
        }

        for &id in &report.shrunk {
            let Ok(found) = self.graph.canonicalize_ref(id) else {
                continue;
            };
            if found.id != id {
                continue;
            }
            if let Some(v) = self.values.remove(&id) {
                let keep = SlotMap::identity(self.graph.class(id).slots());
                self.values.insert(id, self.analysis.rename(v, &keep));
            }
        }

        Ok(report)
    }
}
