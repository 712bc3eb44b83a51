//! Saturation strategies
//!
//! A [`Strategy`] is one step of a saturation driver: it may edit the graph,
//! carries data forward between steps, and reports whether anything changed.
//! Drivers are composed from combinators: sequencing, fixpoint iteration,
//! iteration/node limits, timeouts, and "close" adapters that run an inner
//! strategy against an enriched view of the graph (metadata, a tracked root,
//! or a union recording) introduced at entry and stripped at exit.

use std::{mem, time::Duration};

pub use backoff::BackoffRuleApplication;
pub use maximal::{MaximalRuleApplication, MaximalRuleApplicationWithCaching};
pub use rebase::{Rebase, Rooted};

use crate::{
    analysis::{Analysis, MetaGraph},
    command::CommandError,
    egraph::{EGraph, EGraphError, MergeGroup, UnionReport},
    node::{EClassCall, Operator},
    par::{CancelToken, ParallelMap},
};

pub mod backoff;
pub mod maximal;
pub mod rebase;

pub trait Strategy<G> {
    type Data;

    fn initial(&self) -> Self::Data;

    /// Run one step; returns true if the graph changed
    ///
    /// # Errors
    /// Returns an error if a staged command fails against the graph;
    /// cancellation surfaces as an error that wrapping combinators convert
    /// to a no-change result.
    fn apply<P: ParallelMap>(
        &self,
        graph: &mut G,
        data: &mut Self::Data,
        par: &P,
    ) -> Result<bool, CommandError>;

    fn then<S: Strategy<G>>(self, other: S) -> Then<Self, S>
    where Self: Sized {
        Then(self, other)
    }

    fn until_fixpoint(self) -> UntilFixpoint<Self>
    where Self: Sized {
        UntilFixpoint(self)
    }

    fn with_iteration_limit(self, limit: usize) -> IterationLimit<Self>
    where Self: Sized {
        IterationLimit { inner: self, limit }
    }

    fn with_timeout(self, timeout: Duration) -> Timeout<Self>
    where Self: Sized {
        Timeout {
            inner: self,
            timeout,
        }
    }

    fn with_node_limit(self, limit: usize) -> NodeLimit<Self>
    where Self: Sized {
        NodeLimit { inner: self, limit }
    }

    fn drop_data(self) -> DropData<Self>
    where Self: Sized {
        DropData(self)
    }
}

/// Size accessor shared by the plain graph and its enriched views
pub trait GraphSize {
    fn total_nodes(&self) -> usize;
}

impl<N> GraphSize for EGraph<N> {
    fn total_nodes(&self) -> usize { EGraph::total_nodes(self) }
}

impl<N: Operator, A: Analysis<N>> GraphSize for MetaGraph<N, A> {
    fn total_nodes(&self) -> usize { self.graph().total_nodes() }
}

impl<N> GraphSize for Rooted<N> {
    fn total_nodes(&self) -> usize { self.graph.total_nodes() }
}

impl<N> GraphSize for Recording<N> {
    fn total_nodes(&self) -> usize { self.graph.total_nodes() }
}

#[derive(Debug)]
pub struct Then<A, B>(A, B);

impl<G, A: Strategy<G>, B: Strategy<G>> Strategy<G> for Then<A, B> {
    type Data = (A::Data, B::Data);

    fn initial(&self) -> Self::Data { (self.0.initial(), self.1.initial()) }

    fn apply<P: ParallelMap>(
        &self,
        graph: &mut G,
        data: &mut Self::Data,
        par: &P,
    ) -> Result<bool, CommandError> {
        let a = self.0.apply(graph, &mut data.0, par)?;
        let b = self.1.apply(graph, &mut data.1, par)?;
        Ok(a | b)
    }
}

#[derive(Debug)]
#[repr(transparent)]
pub struct UntilFixpoint<S>(S);

impl<G, S: Strategy<G>> Strategy<G> for UntilFixpoint<S> {
    type Data = S::Data;

    fn initial(&self) -> Self::Data { self.0.initial() }

    fn apply<P: ParallelMap>(
        &self,
        graph: &mut G,
        data: &mut Self::Data,
        par: &P,
    ) -> Result<bool, CommandError> {
        let mut changed = false;
        while self.0.apply(graph, data, par)? {
            changed = true;
        }
        Ok(changed)
    }
}

#[derive(Debug)]
pub struct IterationLimit<S> {
    inner: S,
    limit: usize,
}

impl<G, S: Strategy<G>> Strategy<G> for IterationLimit<S> {
    type Data = (usize, S::Data);

    fn initial(&self) -> Self::Data { (0, self.inner.initial()) }

    fn apply<P: ParallelMap>(
        &self,
        graph: &mut G,
        data: &mut Self::Data,
        par: &P,
    ) -> Result<bool, CommandError> {
        let (count, inner) = data;
        if *count >= self.limit {
            return Ok(false);
        }
        let changed = self.inner.apply(graph, inner, par)?;
        if changed {
            *count += 1;
        }
        Ok(changed)
    }
}

#[derive(Debug)]
pub struct Timeout<S> {
    inner: S,
    timeout: Duration,
}

impl<G, S: Strategy<G>> Strategy<G> for Timeout<S> {
    type Data = S::Data;

    fn initial(&self) -> Self::Data { self.inner.initial() }

    fn apply<P: ParallelMap>(
        &self,
        graph: &mut G,
        data: &mut Self::Data,
        par: &P,
    ) -> Result<bool, CommandError> {
        let par = par.cancelable(CancelToken::with_deadline(self.timeout));
        match self.inner.apply(graph, data, &par) {
            Err(e) if e.is_canceled() => Ok(false),
            r => r,
        }
    }
}

#[derive(Debug)]
pub struct NodeLimit<S> {
    inner: S,
    limit: usize,
}

impl<G: GraphSize, S: Strategy<G>> Strategy<G> for NodeLimit<S> {
    type Data = S::Data;

    fn initial(&self) -> Self::Data { self.inner.initial() }

    fn apply<P: ParallelMap>(
        &self,
        graph: &mut G,
        data: &mut Self::Data,
        par: &P,
    ) -> Result<bool, CommandError> {
        if graph.total_nodes() > self.limit {
            return Ok(false);
        }
        self.inner.apply(graph, data, par)
    }
}

#[derive(Debug)]
#[repr(transparent)]
pub struct DropData<S>(S);

impl<G, S: Strategy<G>> Strategy<G> for DropData<S> {
    type Data = ();

    fn initial(&self) {}

    fn apply<P: ParallelMap>(
        &self,
        graph: &mut G,
        (): &mut (),
        par: &P,
    ) -> Result<bool, CommandError> {
        let mut data = self.0.initial();
        self.0.apply(graph, &mut data, par)
    }
}

/// Run an inner strategy against a metadata-enriched view of the graph
#[must_use]
pub fn close_metadata<N, A, S>(inner: S, analysis: A) -> CloseMetadata<S, A>
where
    N: Operator,
    A: Analysis<N> + Clone,
    S: Strategy<MetaGraph<N, A>>,
{
    CloseMetadata { inner, analysis }
}

#[derive(Debug)]
pub struct CloseMetadata<S, A> {
    inner: S,
    analysis: A,
}

impl<N, A, S> Strategy<EGraph<N>> for CloseMetadata<S, A>
where
    N: Operator,
    A: Analysis<N> + Clone,
    S: Strategy<MetaGraph<N, A>>,
{
    type Data = S::Data;

    fn initial(&self) -> Self::Data { self.inner.initial() }

    fn apply<P: ParallelMap>(
        &self,
        graph: &mut EGraph<N>,
        data: &mut Self::Data,
        par: &P,
    ) -> Result<bool, CommandError> {
        let mut enriched = MetaGraph::enrich(self.analysis.clone(), mem::take(graph));
        let r = self.inner.apply(&mut enriched, data, par);
        let (stripped, _) = enriched.into_inner();
        *graph = stripped;
        r
    }
}

/// Run an inner strategy against a root-tracking view of the graph
#[must_use]
pub fn close_root<N, S: Strategy<Rooted<N>>>(inner: S, root: EClassCall) -> CloseRoot<S> {
    CloseRoot { inner, root }
}

#[derive(Debug)]
pub struct CloseRoot<S> {
    inner: S,
    root: EClassCall,
}

impl<N: Operator, S: Strategy<Rooted<N>>> Strategy<EGraph<N>> for CloseRoot<S> {
    type Data = (EClassCall, S::Data);

    fn initial(&self) -> Self::Data { (self.root.clone(), self.inner.initial()) }

    fn apply<P: ParallelMap>(
        &self,
        graph: &mut EGraph<N>,
        data: &mut Self::Data,
        par: &P,
    ) -> Result<bool, CommandError> {
        let (root, inner) = data;
        let mut rooted = Rooted {
            graph: mem::take(graph),
            root: root.clone(),
        };
        let r = self.inner.apply(&mut rooted, inner, par);
        *root = rooted.root;
        *graph = rooted.graph;
        r
    }
}

/// A graph view that logs the merge groups of every union run through it
#[derive(Debug, Clone)]
pub struct Recording<N> {
    pub graph: EGraph<N>,
    pub log: Vec<MergeGroup>,
}

impl<N: Operator> Recording<N> {
    /// Union through the kernel, appending the produced groups to the log
    ///
    /// # Errors
    /// Returns an error if the kernel rejects a call.
    pub fn union_many<P: ParallelMap>(
        &mut self,
        pairs: Vec<(EClassCall, EClassCall)>,
        par: &P,
    ) -> Result<UnionReport, EGraphError> {
        let report = self.graph.union_many(pairs, par)?;
        self.log.extend(report.groups.iter().cloned());
        Ok(report)
    }
}

/// Run an inner strategy against a union-recording view of the graph; the
/// accumulated log rides along in the strategy data
#[must_use]
pub fn close_recording<N, S: Strategy<Recording<N>>>(inner: S) -> CloseRecording<S> {
    CloseRecording(inner)
}

#[derive(Debug)]
#[repr(transparent)]
pub struct CloseRecording<S>(S);

impl<N: Operator, S: Strategy<Recording<N>>> Strategy<EGraph<N>> for CloseRecording<S> {
    type Data = (Vec<MergeGroup>, S::Data);

    fn initial(&self) -> Self::Data { (Vec::new(), self.0.initial()) }

    fn apply<P: ParallelMap>(
        &self,
        graph: &mut EGraph<N>,
        data: &mut Self::Data,
        par: &P,
    ) -> Result<bool, CommandError> {
        let (log, inner) = data;
        let mut recording = Recording {
            graph: mem::take(graph),
            log: mem::take(log),
        };
        let r = self.0.apply(&mut recording, inner, par);
        *log = recording.log;
        *graph = recording.graph;
        r
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::Strategy;
    use crate::{
        command::CommandError,
        egraph::EGraph,
        node::ENode,
        par::{ParallelMap, Sequential},
    };

    /// Adds one fresh leaf per step, forever
    struct GrowOnce(char);

    impl Strategy<EGraph<char>> for GrowOnce {
        type Data = u8;

        fn initial(&self) -> u8 { 0 }

        fn apply<P: ParallelMap>(
            &self,
            graph: &mut EGraph<char>,
            data: &mut u8,
            par: &P,
        ) -> Result<bool, CommandError> {
            let op = char::from_u32(u32::from(self.0) + u32::from(*data)).unwrap();
            *data += 1;
            let results = graph.try_add_many(vec![ENode::leaf(op)], par)?;
            Ok(results[0].is_added())
        }
    }

    #[test]
    fn iteration_limit_caps_changes() {
        let mut eg = EGraph::new();
        let par = Sequential::new();
        let strat = GrowOnce('a').with_iteration_limit(3);
        let mut data = strat.initial();
        for _ in 0..10 {
            let _ = strat.apply(&mut eg, &mut data, &par).unwrap();
        }
        assert_eq!(eg.total_nodes(), 3);
    }

    #[test]
    fn timeout_in_the_past_is_a_noop() {
        let mut eg = EGraph::new();
        let par = Sequential::new();
        let strat = GrowOnce('a').with_timeout(Duration::ZERO);
        let mut data = strat.initial();
        assert!(!strat.apply(&mut eg, &mut data, &par).unwrap());
        assert_eq!(eg.total_nodes(), 0);
    }

    #[test]
    fn node_limit_stops_growth() {
        let mut eg = EGraph::new();
        let par = Sequential::new();
        let strat = GrowOnce('a').with_node_limit(2);
        let mut data = strat.initial();
        for _ in 0..10 {
            let _ = strat.apply(&mut eg, &mut data, &par).unwrap();
        }
        assert_eq!(eg.total_nodes(), 3);
    }

    #[test]
    fn then_combines_change_flags() {
        let mut eg = EGraph::new();
        let par = Sequential::new();
        let strat = GrowOnce('a').then(GrowOnce('z'));
        let mut data = strat.initial();
        assert!(strat.apply(&mut eg, &mut data, &par).unwrap());
        assert_eq!(eg.total_nodes(), 2);
    }
}
