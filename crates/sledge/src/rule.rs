//! Rewrite rules: search and application contracts
//!
//! The engine does not define a pattern language; a rule is a boxed searcher
//! producing [`RuleMatch`]es and a boxed applier turning one match into a
//! [`CommandQueue`]. Matches are *portable*: their stored calls can be
//! rewritten through the unions a later graph performed, which is what lets
//! the caching driver carry applied-match sets across iterations.

use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::{
    command::CommandQueue,
    egraph::{EGraph, EGraphError},
    node::{EClassCall, Operator},
};

/// One match of a rule's pattern: named bindings to calls in the searched
/// graph
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct RuleMatch {
    pub bindings: BTreeMap<Arc<str>, EClassCall>,
}

impl RuleMatch {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    #[must_use]
    pub fn bind(mut self, name: impl Into<Arc<str>>, call: EClassCall) -> Self {
        self.bindings.insert(name.into(), call);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&EClassCall> { self.bindings.get(name) }

    /// Rewrite every stored call through the given graph's union-find,
    /// yielding the match's canonical form there
    ///
    /// # Errors
    /// Returns an error if a stored class does not exist in the graph.
    pub fn port<N: Operator>(&self, eg: &EGraph<N>) -> Result<Self, EGraphError> {
        let bindings = self
            .bindings
            .iter()
            .map(|(name, call)| Ok((Arc::clone(name), eg.canonicalize_call(call)?)))
            .collect::<Result<_, EGraphError>>()?;
        Ok(Self { bindings })
    }
}

pub trait Searcher<N>: Send + Sync {
    /// Find every match of this searcher's pattern in the graph
    fn search(&self, eg: &EGraph<N>) -> Vec<RuleMatch>;
}

impl<N, F: Fn(&EGraph<N>) -> Vec<RuleMatch> + Send + Sync> Searcher<N> for F {
    fn search(&self, eg: &EGraph<N>) -> Vec<RuleMatch> { self(eg) }
}

pub trait Applier<N>: Send + Sync {
    /// Stage the edits this rule performs for one match
    fn build(&self, eg: &EGraph<N>, m: &RuleMatch) -> CommandQueue<N>;
}

impl<N, F: Fn(&EGraph<N>, &RuleMatch) -> CommandQueue<N> + Send + Sync> Applier<N> for F {
    fn build(&self, eg: &EGraph<N>, m: &RuleMatch) -> CommandQueue<N> { self(eg, m) }
}

/// A named rewrite rule
pub struct Rewrite<N> {
    name: Arc<str>,
    searcher: Box<dyn Searcher<N>>,
    applier: Box<dyn Applier<N>>,
}

impl<N> fmt::Debug for Rewrite<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            name,
            searcher: _,
            applier: _,
        } = self;
        f.debug_struct("Rewrite")
            .field("name", name)
            .finish_non_exhaustive()
    }
}

impl<N> Rewrite<N> {
    pub fn new(
        name: impl Into<Arc<str>>,
        searcher: impl Searcher<N> + 'static,
        applier: impl Applier<N> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            searcher: Box::new(searcher),
            applier: Box::new(applier),
        }
    }

    #[must_use]
    pub fn name(&self) -> &Arc<str> { &self.name }

    #[must_use]
    pub fn search(&self, eg: &EGraph<N>) -> Vec<RuleMatch> { self.searcher.search(eg) }

    #[must_use]
    pub fn build(&self, eg: &EGraph<N>, m: &RuleMatch) -> CommandQueue<N> {
        self.applier.build(eg, m)
    }
}
