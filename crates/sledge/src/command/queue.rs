//! Command queues and the batching optimiser
//!
//! `optimize` flattens nested queues, splits the command list into
//! independent components of the virtual-symbol dataflow graph, and rewrites
//! each component as layered [`Command::AddMany`] batches (each batch's
//! dependencies all defined in earlier batches) followed by one trailing
//! [`Command::UnionMany`]. Inside a batch, insertions are pairwise
//! independent, so canonicalisation can run through the parallel map.

use std::collections::{BTreeMap, BTreeSet};

use super::{Command, CommandError, EClassSymbol, Reification, SymNode, VirtId};
use crate::{egraph::EGraph, node::Operator, par::ParallelMap};

#[derive(Debug, Clone)]
#[repr(transparent)]
pub struct CommandQueue<N>(Vec<Command<N>>);

impl<N> Default for CommandQueue<N> {
    fn default() -> Self { Self(Vec::new()) }
}

impl<N> CommandQueue<N> {
    #[must_use]
    pub fn new() -> Self { Self(Vec::new()) }

    #[must_use]
    pub fn from_commands(cmds: Vec<Command<N>>) -> Self { Self(cmds) }

    #[must_use]
    pub fn commands(&self) -> &[Command<N>] { &self.0 }

    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn push(&mut self, cmd: Command<N>) { self.0.push(cmd); }

    /// Recursively inline nested queues
    fn flatten(self) -> Vec<Command<N>> {
        let mut out = Vec::with_capacity(self.0.len());
        for cmd in self.0 {
            match cmd {
                Command::Queue(q) => out.extend(q.flatten()),
                cmd if cmd.is_empty() => {},
                cmd => out.push(cmd),
            }
        }
        out
    }

    /// Flatten, partition into independent components of the virtual-symbol
    /// dataflow, and layer each component into dependency batches with a
    /// single trailing union
    ///
    /// # Panics
    /// Panics if the virtual-symbol dependencies are cyclic; well-formed
    /// builders never produce cycles.
    #[must_use]
    pub fn optimize(self) -> Self {
        let cmds = self.flatten();

        // union-find over command indices connected by shared symbols
        let mut parent: Vec<usize> = (0..cmds.len()).collect();
        fn root(parent: &mut [usize], mut i: usize) -> usize {
            while parent[i] != i {
                parent[i] = parent[parent[i]];
                i = parent[i];
            }
            i
        }
        let mut touched: BTreeMap<VirtId, usize> = BTreeMap::new();
        for (i, cmd) in cmds.iter().enumerate() {
            for sym in cmd.uses().into_iter().chain(cmd.definitions()) {
                if let Some(&j) = touched.get(&sym) {
                    let (a, b) = (root(&mut parent, i), root(&mut parent, j));
                    parent[a.max(b)] = a.min(b);
                } else {
                    touched.insert(sym, i);
                }
            }
        }

        let mut components: BTreeMap<usize, Vec<Command<N>>> = BTreeMap::new();
        for (i, cmd) in cmds.into_iter().enumerate() {
            components.entry(root(&mut parent, i)).or_default().push(cmd);
        }

        let mut out = Vec::new();
        for (_, group) in components {
            let mut adds: Vec<(VirtId, SymNode<N>)> = Vec::new();
            let mut unions: Vec<(EClassSymbol, EClassSymbol)> = Vec::new();
            for cmd in group {
                match cmd {
                    Command::AddMany(a) => adds.extend(a),
                    Command::UnionMany(u) => unions.extend(u),
                    Command::Queue(_) => unreachable!("queues were flattened"),
                }
            }

            let batches = layer(adds);
            out.extend(batches.into_iter().map(Command::AddMany));
            if !unions.is_empty() {
                out.push(Command::UnionMany(unions));
            }
        }
        Self(out)
    }
}

/// Layer add entries so every entry's locally-defined dependencies land in a
/// strictly earlier batch
fn layer<N>(adds: Vec<(VirtId, SymNode<N>)>) -> Vec<Vec<(VirtId, SymNode<N>)>> {
    let definer: BTreeMap<VirtId, usize> = adds
        .iter()
        .enumerate()
        .map(|(i, (v, _))| (*v, i))
        .collect();

    let mut depth: Vec<Option<usize>> = vec![None; adds.len()];
    let mut visiting: BTreeSet<usize> = BTreeSet::new();

    fn depth_of<N>(
        i: usize,
        adds: &[(VirtId, SymNode<N>)],
        definer: &BTreeMap<VirtId, usize>,
        depth: &mut Vec<Option<usize>>,
        visiting: &mut BTreeSet<usize>,
    ) -> usize {
        if let Some(d) = depth[i] {
            return d;
        }
        assert!(visiting.insert(i), "cyclic virtual-symbol dependencies");
        let d = adds[i]
            .1
            .virt_args()
            .filter_map(|v| definer.get(&v))
            .map(|&j| depth_of(j, adds, definer, depth, visiting) + 1)
            .max()
            .unwrap_or(0);
        visiting.remove(&i);
        depth[i] = Some(d);
        d
    }

    for i in 0..adds.len() {
        depth_of(i, &adds, &definer, &mut depth, &mut visiting);
    }

    let max_depth = depth.iter().map(|d| d.unwrap_or(0)).max().unwrap_or(0);
    let mut batches: Vec<Vec<(VirtId, SymNode<N>)>> = (0..=max_depth).map(|_| Vec::new()).collect();
    for (i, entry) in adds.into_iter().enumerate() {
        batches[depth[i].unwrap_or(0)].push(entry);
    }
    batches.retain(|b| !b.is_empty());
    batches
}

impl<N: Operator> CommandQueue<N> {
    /// Apply every command in order; returns true if any changed the graph
    ///
    /// # Errors
    /// Returns an error if a referenced virtual symbol has no binding, or the
    /// kernel rejects a call.
    pub fn apply<P: ParallelMap>(
        &self,
        eg: &mut EGraph<N>,
        reification: &mut Reification,
        par: &P,
    ) -> Result<bool, CommandError> {
        let mut changed = false;
        for cmd in &self.0 {
            changed |= cmd.apply(eg, reification, par)?;
        }
        Ok(changed)
    }

    /// Simplify every command in order against a read-only graph view
    ///
    /// # Errors
    /// Returns an error if the kernel rejects a call during lookup.
    pub fn simplify(
        &self,
        eg: &EGraph<N>,
        reification: &mut Reification,
    ) -> Result<Self, CommandError> {
        let mut out = Vec::new();
        for cmd in &self.0 {
            let cmd = cmd.simplify(eg, reification)?;
            if !cmd.is_empty() {
                out.push(cmd);
            }
        }
        Ok(Self(out))
    }
}
