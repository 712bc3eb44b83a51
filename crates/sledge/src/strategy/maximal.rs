//! Exhaustive rule application
//!
//! Each step searches every rule, stages one command queue per match,
//! optimises the whole batch, simplifies it against the current graph (so
//! duplicate matches cost only a hash-cons lookup), and applies the rest.
//! The caching variant additionally remembers which matches were already
//! applied, ported forward through unions, which is what lets term-growing
//! rules reach a fixpoint.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use tracing::debug;

use super::Strategy;
use crate::{
    command::{Command, CommandError, CommandQueue, Reification},
    egraph::EGraph,
    node::Operator,
    par::ParallelMap,
    rule::{Rewrite, RuleMatch},
};

fn search_all<'r, N: Operator, P: ParallelMap>(
    rules: &'r [Rewrite<N>],
    eg: &EGraph<N>,
    par: &P,
) -> Result<Vec<(&'r Rewrite<N>, Vec<RuleMatch>)>, CommandError> {
    let searched = par.map(rules.iter().collect(), |rw| (rw, rw.search(eg)))?;
    Ok(searched)
}

fn stage_and_apply<N: Operator, P: ParallelMap>(
    eg: &mut EGraph<N>,
    staged: Vec<CommandQueue<N>>,
    par: &P,
) -> Result<bool, CommandError> {
    if staged.is_empty() {
        return Ok(false);
    }
    let queue = CommandQueue::from_commands(staged.into_iter().map(Command::Queue).collect())
        .optimize();
    let mut reification = Reification::new();
    let queue = queue.simplify(eg, &mut reification)?;
    queue.apply(eg, &mut reification, par)
}

/// Search every rule, apply every match
#[derive(Debug)]
#[repr(transparent)]
pub struct MaximalRuleApplication<N>(pub Vec<Rewrite<N>>);

impl<N: Operator> Strategy<EGraph<N>> for MaximalRuleApplication<N> {
    type Data = ();

    fn initial(&self) {}

    fn apply<P: ParallelMap>(
        &self,
        graph: &mut EGraph<N>,
        (): &mut (),
        par: &P,
    ) -> Result<bool, CommandError> {
        let searched = search_all(&self.0, graph, par)?;
        let mut staged = Vec::new();
        for (rw, matches) in searched {
            debug!(rule = %rw.name(), matches = matches.len(), "searched rule");
            for m in &matches {
                staged.push(rw.build(graph, m));
            }
        }
        let changed = stage_and_apply(graph, staged, par)?;
        debug!(changed, "applied maximal rule batch");
        Ok(changed)
    }
}

/// Per-rule sets of already-applied matches, ported through unions
pub type MatchCache = BTreeMap<Arc<str>, BTreeSet<RuleMatch>>;

/// Search every rule, apply only the matches not seen before
#[derive(Debug)]
#[repr(transparent)]
pub struct MaximalRuleApplicationWithCaching<N>(pub Vec<Rewrite<N>>);

impl<N: Operator> Strategy<EGraph<N>> for MaximalRuleApplicationWithCaching<N> {
    type Data = MatchCache;

    fn initial(&self) -> MatchCache { MatchCache::new() }

    fn apply<P: ParallelMap>(
        &self,
        graph: &mut EGraph<N>,
        cache: &mut MatchCache,
        par: &P,
    ) -> Result<bool, CommandError> {
        // unions since the last step may have re-rooted cached matches
        for seen in cache.values_mut() {
            *seen = seen
                .iter()
                .filter_map(|m| m.port(graph).ok())
                .collect();
        }

        let searched = search_all(&self.0, graph, par)?;
        let mut staged = Vec::new();
        for (rw, matches) in searched {
            let seen = cache.entry(Arc::clone(rw.name())).or_default();
            let mut fresh = 0usize;
            for m in &matches {
                let Ok(canon) = m.port(graph) else { continue };
                if seen.insert(canon) {
                    fresh += 1;
                    staged.push(rw.build(graph, m));
                }
            }
            debug!(
                rule = %rw.name(),
                matches = matches.len(),
                fresh,
                "searched rule with cache"
            );
        }

        let changed = stage_and_apply(graph, staged, par)?;
        debug!(changed, "applied cached rule batch");
        Ok(changed)
    }
}

#[cfg(test)]
mod test {
    use super::{MaximalRuleApplication, MaximalRuleApplicationWithCaching, Strategy};
    use crate::{
        command::EClassSymbol,
        egraph::EGraph,
        node::{EClassCall, ENode},
        par::Sequential,
        rule::{Rewrite, RuleMatch},
        tree::{MixedTree, QueueBuilder},
    };

    fn identity_call(eg: &EGraph<char>, id: crate::eclass::EClassId) -> EClassCall {
        eg.canonicalize_ref(id).unwrap()
    }

    /// `x -> x + 0`
    fn add_zero() -> Rewrite<char> {
        Rewrite::new(
            "add-zero",
            |eg: &EGraph<char>| {
                eg.classes()
                    .map(|id| RuleMatch::new().bind("x", identity_call(eg, id)))
                    .collect()
            },
            |_eg: &EGraph<char>, m: &RuleMatch| {
                let x = m.get("x").unwrap().clone();
                let tree = MixedTree::node('+', vec![], vec![], vec![
                    MixedTree::call(x.clone()),
                    MixedTree::leaf('0'),
                ]);
                let mut b = QueueBuilder::new();
                b.equivalence(EClassSymbol::Real(x), &tree);
                b.finish()
            },
        )
    }

    /// `x + 0 -> x`
    fn elim_zero() -> Rewrite<char> {
        Rewrite::new(
            "elim-zero",
            |eg: &EGraph<char>| {
                let mut out = Vec::new();
                for id in eg.classes() {
                    let call = identity_call(eg, id);
                    for node in eg.nodes(&call).unwrap() {
                        if *node.op() != '+' {
                            continue;
                        }
                        let [lhs, rhs] = node.args() else { continue };
                        if eg.nodes_with_op(rhs, &'0').unwrap().is_empty() {
                            continue;
                        }
                        out.push(
                            RuleMatch::new()
                                .bind("sum", call.clone())
                                .bind("x", lhs.clone()),
                        );
                    }
                }
                out
            },
            |_eg: &EGraph<char>, m: &RuleMatch| {
                let mut b = QueueBuilder::<char>::new();
                b.union(
                    EClassSymbol::Real(m.get("sum").unwrap().clone()),
                    EClassSymbol::Real(m.get("x").unwrap().clone()),
                );
                b.finish()
            },
        )
    }

    /// The cache keeps the introduction rule from re-firing on classes it
    /// already expanded, so the pair of rules reaches a fixpoint instead of
    /// looping forever.
    #[test]
    fn caching_reaches_fixpoint() {
        let mut eg = EGraph::new();
        let par = Sequential::new();
        let x = eg.try_add_many(vec![ENode::leaf('x')], &par).unwrap()[0]
            .call()
            .clone();

        let strat = MaximalRuleApplicationWithCaching(vec![add_zero(), elim_zero()]);
        let mut cache = strat.initial();
        let mut iterations = 0;
        while strat.apply(&mut eg, &mut cache, &par).unwrap() {
            iterations += 1;
            assert!(iterations < 32, "saturation failed to reach a fixpoint");
        }

        // x + 0 collapsed back into x
        let zero = eg.find_node(&ENode::leaf('0')).unwrap().unwrap();
        let sum = eg
            .find_node(&ENode::apply('+', [x.clone(), zero]))
            .unwrap()
            .unwrap();
        assert!(eg.are_same(&x, &sum).unwrap());
        // only x's class, 0's class, and the classes 0-expansion produced
        assert!(eg.len() <= 4, "graph kept growing: {} classes", eg.len());
    }

    /// A single contracting rule saturates even without the cache.
    #[test]
    fn maximal_application_saturates_contracting_rules() {
        let mut eg = EGraph::new();
        let par = Sequential::new();
        let x = eg.try_add_many(vec![ENode::leaf('x')], &par).unwrap()[0]
            .call()
            .clone();
        let zero = eg.try_add_many(vec![ENode::leaf('0')], &par).unwrap()[0]
            .call()
            .clone();
        let sum = eg
            .try_add_many(vec![ENode::apply('+', [x.clone(), zero])], &par)
            .unwrap()[0]
            .call()
            .clone();
        assert!(!eg.are_same(&x, &sum).unwrap());

        let strat = MaximalRuleApplication(vec![elim_zero()]);
        let mut data = ();
        while strat.apply(&mut eg, &mut data, &par).unwrap() {}
        assert!(eg.are_same(&x, &sum).unwrap());
    }

    #[test]
    fn empty_rule_set_is_a_fixpoint() {
        let mut eg = EGraph::<char>::new();
        let par = Sequential::new();
        let strat = MaximalRuleApplication(Vec::new());
        assert!(!strat.apply(&mut eg, &mut (), &par).unwrap());
    }
}
