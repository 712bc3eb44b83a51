//! Concurrent schedule accumulation
//!
//! A [`ScheduleBuilder`] collects adds and unions from concurrent producers
//! (rule appliers running under the parallel map) into a batched
//! [`CommandSchedule`]: batch 0 holds fully-real nodes that one
//! `try_add_many` can canonicalise in parallel, later batches hold nodes
//! whose virtual arguments are all bound by earlier batches, and the unions
//! run last.

use std::{collections::BTreeMap, mem};

use super::{CommandError, EClassSymbol, Reification, SymNode, VirtId};
use crate::{
    egraph::EGraph,
    node::{ENode, Operator},
    par::ParallelMap,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvalidBatch {
    #[error("batch-0 add with unresolved virtual arguments")]
    VirtualAtBase,

    #[error("schedule builder used after result()")]
    Sealed,

    #[error("virtual argument {arg} of a batch-{batch} add is not defined at an earlier batch")]
    Misordered { arg: VirtId, batch: usize },
}

#[derive(Debug)]
struct Inner<N> {
    base: Vec<(VirtId, ENode<N>)>,
    batches: Vec<Vec<(VirtId, SymNode<N>)>>,
    unions: Vec<(EClassSymbol, EClassSymbol)>,
    sealed: bool,
}

impl<N> Default for Inner<N> {
    fn default() -> Self {
        Self {
            base: Vec::new(),
            batches: Vec::new(),
            unions: Vec::new(),
            sealed: false,
        }
    }
}

/// A thread-safe accumulator of staged edits
#[derive(Debug)]
#[repr(transparent)]
pub struct ScheduleBuilder<N>(spin::Mutex<Inner<N>>);

impl<N> Default for ScheduleBuilder<N> {
    fn default() -> Self { Self(spin::Mutex::new(Inner::default())) }
}

impl<N: Clone> ScheduleBuilder<N> {
    #[must_use]
    pub fn new() -> Self
    where N: Operator {
        Self::default()
    }

    /// Stage an add at the given batch
    ///
    /// # Errors
    /// Returns an error if the builder was already finished, or a batch-0
    /// node still has virtual arguments.
    pub fn add(&self, sym: VirtId, node: &SymNode<N>, batch: usize) -> Result<(), InvalidBatch> {
        let mut inner = self.0.lock();
        if inner.sealed {
            return Err(InvalidBatch::Sealed);
        }
        if batch == 0 {
            let node = node.to_real().ok_or(InvalidBatch::VirtualAtBase)?;
            inner.base.push((sym, node));
        } else {
            if inner.batches.len() < batch {
                inner.batches.resize_with(batch, Vec::new);
            }
            inner.batches[batch - 1].push((sym, node.clone()));
        }
        Ok(())
    }

    /// Stage a union
    ///
    /// # Errors
    /// Returns an error if the builder was already finished.
    pub fn union(&self, a: EClassSymbol, b: EClassSymbol) -> Result<(), InvalidBatch> {
        let mut inner = self.0.lock();
        if inner.sealed {
            return Err(InvalidBatch::Sealed);
        }
        inner.unions.push((a, b));
        Ok(())
    }

    /// Seal the builder and return the accumulated schedule
    ///
    /// # Errors
    /// Returns an error if the builder was already finished, or any add's
    /// virtual argument is not defined at a strictly earlier batch.
    pub fn result(&self) -> Result<CommandSchedule<N>, InvalidBatch> {
        let mut inner = self.0.lock();
        if mem::replace(&mut inner.sealed, true) {
            return Err(InvalidBatch::Sealed);
        }
        let Inner {
            base,
            batches,
            unions,
            sealed: _,
        } = mem::take(&mut *inner);
        inner.sealed = true;

        let mut defined: BTreeMap<VirtId, usize> =
            base.iter().map(|&(v, _)| (v, 0)).collect();
        for (i, batch) in batches.iter().enumerate() {
            defined.extend(batch.iter().map(|&(v, _)| (v, i + 1)));
        }
        for (i, batch) in batches.iter().enumerate() {
            let batch_no = i + 1;
            for (_, node) in batch {
                for arg in node.virt_args() {
                    if defined.get(&arg).is_none_or(|&d| d >= batch_no) {
                        return Err(InvalidBatch::Misordered {
                            arg,
                            batch: batch_no,
                        });
                    }
                }
            }
        }

        Ok(CommandSchedule {
            base,
            batches,
            unions,
        })
    }
}

/// The sealed result of a [`ScheduleBuilder`]
#[derive(Debug, Clone)]
pub struct CommandSchedule<N> {
    base: Vec<(VirtId, ENode<N>)>,
    batches: Vec<Vec<(VirtId, SymNode<N>)>>,
    unions: Vec<(EClassSymbol, EClassSymbol)>,
}

impl<N> CommandSchedule<N> {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.base.is_empty() && self.batches.iter().all(Vec::is_empty) && self.unions.is_empty()
    }
}

impl<N: Operator> CommandSchedule<N> {
    /// Run the schedule: batch 0 as one insert batch, each later batch after
    /// binding its predecessors, then the unions
    ///
    /// # Errors
    /// Returns an error if a union references a symbol no batch defines, or
    /// the kernel rejects a call.
    pub fn apply<P: ParallelMap>(
        &self,
        eg: &mut EGraph<N>,
        par: &P,
    ) -> Result<(bool, Reification), CommandError> {
        let mut reification = Reification::new();
        let mut changed = false;

        let results = eg.try_add_many(
            self.base.iter().map(|(_, n)| n.clone()).collect(),
            par,
        )?;
        for ((virt, _), result) in self.base.iter().zip(results) {
            changed |= result.is_added();
            reification.insert(*virt, result.call().clone());
        }

        for batch in &self.batches {
            let nodes = batch
                .iter()
                .map(|(_, n)| {
                    n.refine(&reification)
                        .to_real()
                        .ok_or_else(|| match n.refine(&reification).virt_args().next() {
                            Some(v) => CommandError::Unbound(v),
                            None => unreachable!(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            let results = eg.try_add_many(nodes, par)?;
            for ((virt, _), result) in batch.iter().zip(results) {
                changed |= result.is_added();
                reification.insert(*virt, result.call().clone());
            }
        }

        let mut remaining = Vec::new();
        for (a, b) in &self.unions {
            let a = match a.refine(&reification) {
                EClassSymbol::Real(call) => call,
                EClassSymbol::Virtual(v) => return Err(CommandError::Unbound(v)),
            };
            let b = match b.refine(&reification) {
                EClassSymbol::Real(call) => call,
                EClassSymbol::Virtual(v) => return Err(CommandError::Unbound(v)),
            };
            if !eg.are_same(&a, &b)? {
                remaining.push((a, b));
            }
        }
        if !remaining.is_empty() {
            eg.union_many(remaining, par)?;
            changed = true;
        }

        Ok((changed, reification))
    }
}

#[cfg(test)]
mod test {
    use super::{EClassSymbol, InvalidBatch, ScheduleBuilder, SymNode, VirtId};
    use crate::{egraph::EGraph, par::Sequential};

    #[test]
    fn base_batch_rejects_virtual_args() {
        let builder = ScheduleBuilder::<char>::new();
        let v = VirtId::fresh();
        let node = SymNode::new('f', [], [], [EClassSymbol::Virtual(v)]);
        assert_eq!(
            builder.add(VirtId::fresh(), &node, 0),
            Err(InvalidBatch::VirtualAtBase)
        );
    }

    #[test]
    fn sealed_builder_rejects_mutation() {
        let builder = ScheduleBuilder::<char>::new();
        builder.result().unwrap();
        assert_eq!(
            builder.add(VirtId::fresh(), &SymNode::new('a', [], [], []), 0),
            Err(InvalidBatch::Sealed)
        );
        assert!(builder.result().is_err());
    }

    #[test]
    fn misordered_batches_are_rejected() {
        let builder = ScheduleBuilder::<char>::new();
        let (v1, v2) = (VirtId::fresh(), VirtId::fresh());
        // v2 at batch 1 uses v1, but v1 is also defined at batch 1
        builder
            .add(v1, &SymNode::new('a', [], [], []), 1)
            .unwrap();
        builder
            .add(
                v2,
                &SymNode::new('f', [], [], [EClassSymbol::Virtual(v1)]),
                1,
            )
            .unwrap();
        assert!(matches!(
            builder.result(),
            Err(InvalidBatch::Misordered { .. })
        ));
    }

    #[test]
    fn schedule_binds_batches_in_order() {
        let builder = ScheduleBuilder::<char>::new();
        let (v1, v2) = (VirtId::fresh(), VirtId::fresh());
        builder
            .add(v1, &SymNode::new('a', [], [], []), 0)
            .unwrap();
        builder
            .add(
                v2,
                &SymNode::new('f', [], [], [EClassSymbol::Virtual(v1)]),
                1,
            )
            .unwrap();
        builder
            .union(EClassSymbol::Virtual(v1), EClassSymbol::Virtual(v2))
            .unwrap();
        let schedule = builder.result().unwrap();

        let mut eg = EGraph::new();
        let par = Sequential::new();
        let (changed, reification) = schedule.apply(&mut eg, &par).unwrap();
        assert!(changed);
        // a, f(a), and the union folding f(a) into a's class
        let a = reification[&v1].clone();
        let f = reification[&v2].clone();
        assert!(eg.are_same(&a, &f).unwrap());
    }
}
