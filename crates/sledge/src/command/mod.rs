//! The staged edit language
//!
//! A [`Command`] is an immutable description of a graph edit. Adds may
//! reference classes that do not exist yet through *virtual symbols*;
//! executing a command threads a reification map binding each virtual symbol
//! to the real call its definition produced. The staging lets a driver
//! simplify, batch, and reorder edits before any mutation happens.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::atomic::{AtomicU32, Ordering},
};

pub use queue::CommandQueue;
pub use schedule::{CommandSchedule, InvalidBatch, ScheduleBuilder};

use crate::{
    egraph::{EGraph, EGraphError},
    node::{EClassCall, ENode, Operator},
    par::{Canceled, ParallelMap},
    slot::Slot,
};

pub mod queue;
pub mod schedule;

static NEXT_VIRT: AtomicU32 = AtomicU32::new(0);

/// A placeholder for an e-class that will exist once a pending add applies
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtId(u32);

impl VirtId {
    /// Allocate a virtual symbol no other allocation will ever collide with
    #[must_use]
    pub fn fresh() -> Self {
        let id = NEXT_VIRT.fetch_add(1, Ordering::Relaxed);
        assert!(id != u32::MAX, "virtual symbol counter exhausted");
        Self(id)
    }
}

impl fmt::Debug for VirtId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self(id) = self;
        write!(f, "v{id}")
    }
}

impl fmt::Display for VirtId {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { fmt::Debug::fmt(self, f) }
}

/// Bindings of virtual symbols to the calls their definitions produced
pub type Reification = BTreeMap<VirtId, EClassCall>;

/// Error raised while applying or simplifying commands
#[derive(Debug, Clone, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Graph(#[from] EGraphError),

    #[error("no binding for virtual class symbol {0}")]
    Unbound(VirtId),
}

impl From<Canceled> for CommandError {
    fn from(c: Canceled) -> Self { Self::Graph(EGraphError::Canceled(c)) }
}

impl CommandError {
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Graph(EGraphError::Canceled(_)))
    }
}

/// Either a real call or a virtual symbol awaiting reification
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EClassSymbol {
    Real(EClassCall),
    Virtual(VirtId),
}

impl EClassSymbol {
    #[must_use]
    pub fn as_real(&self) -> Option<&EClassCall> {
        match self {
            Self::Real(call) => Some(call),
            Self::Virtual(_) => None,
        }
    }

    #[must_use]
    pub fn as_virtual(&self) -> Option<VirtId> {
        match self {
            Self::Real(_) => None,
            Self::Virtual(v) => Some(*v),
        }
    }

    /// Replace a bound virtual symbol by its real call
    #[must_use]
    pub fn refine(&self, reification: &Reification) -> Self {
        match self {
            Self::Virtual(v) => reification
                .get(v)
                .map_or_else(|| self.clone(), |call| Self::Real(call.clone())),
            Self::Real(_) => self.clone(),
        }
    }

    fn resolve(&self, reification: &Reification) -> Result<EClassCall, CommandError> {
        match self {
            Self::Real(call) => Ok(call.clone()),
            Self::Virtual(v) => reification
                .get(v)
                .cloned()
                .ok_or(CommandError::Unbound(*v)),
        }
    }
}

/// An [`ENode`] whose argument calls may still be virtual
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymNode<N> {
    op: N,
    defs: Box<[Slot]>,
    uses: Box<[Slot]>,
    args: Box<[EClassSymbol]>,
}

impl<N> SymNode<N> {
    #[must_use]
    pub fn new(
        op: N,
        defs: impl Into<Box<[Slot]>>,
        uses: impl Into<Box<[Slot]>>,
        args: impl Into<Box<[EClassSymbol]>>,
    ) -> Self {
        Self {
            op,
            defs: defs.into(),
            uses: uses.into(),
            args: args.into(),
        }
    }

    #[must_use]
    pub fn args(&self) -> &[EClassSymbol] { &self.args }

    pub fn virt_args(&self) -> impl Iterator<Item = VirtId> + '_ {
        self.args.iter().filter_map(EClassSymbol::as_virtual)
    }

    #[must_use]
    pub fn is_real(&self) -> bool { self.args.iter().all(|a| a.as_real().is_some()) }
}

impl<N: Clone> SymNode<N> {
    #[must_use]
    pub fn from_real(node: &ENode<N>) -> Self {
        Self::new(
            node.op().clone(),
            node.defs(),
            node.uses(),
            node.args()
                .iter()
                .map(|a| EClassSymbol::Real(a.clone()))
                .collect::<Vec<_>>(),
        )
    }

    /// The underlying node, if every argument is real
    #[must_use]
    pub fn to_real(&self) -> Option<ENode<N>> {
        let args = self
            .args
            .iter()
            .map(|a| a.as_real().cloned())
            .collect::<Option<Vec<_>>>()?;
        Some(ENode::new(self.op.clone(), &*self.defs, &*self.uses, args))
    }

    /// Refine every bound virtual argument to its real call
    #[must_use]
    pub fn refine(&self, reification: &Reification) -> Self {
        Self {
            op: self.op.clone(),
            defs: self.defs.clone(),
            uses: self.uses.clone(),
            args: self.args.iter().map(|a| a.refine(reification)).collect(),
        }
    }

    fn resolve(&self, reification: &Reification) -> Result<ENode<N>, CommandError> {
        let args = self
            .args
            .iter()
            .map(|a| a.resolve(reification))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ENode::new(self.op.clone(), &*self.defs, &*self.uses, args))
    }
}

/// One staged edit
#[derive(Debug, Clone)]
pub enum Command<N> {
    /// Insert a batch of nodes, binding each virtual symbol to the resulting
    /// call
    AddMany(Vec<(VirtId, SymNode<N>)>),
    /// Union pairs of (possibly virtual) class references
    UnionMany(Vec<(EClassSymbol, EClassSymbol)>),
    /// A composed sequence
    Queue(CommandQueue<N>),
}

impl<N> Command<N> {
    /// Virtual symbols this command reads and does not itself define
    #[must_use]
    pub fn uses(&self) -> BTreeSet<VirtId> {
        match self {
            Self::AddMany(adds) => adds.iter().flat_map(|(_, n)| n.virt_args()).collect(),
            Self::UnionMany(pairs) => pairs
                .iter()
                .flat_map(|(a, b)| [a, b])
                .filter_map(EClassSymbol::as_virtual)
                .collect(),
            Self::Queue(q) => {
                let defs = self.definitions();
                q.commands()
                    .iter()
                    .flat_map(Command::uses)
                    .filter(|v| !defs.contains(v))
                    .collect()
            },
        }
    }

    /// Virtual symbols this command binds
    #[must_use]
    pub fn definitions(&self) -> BTreeSet<VirtId> {
        match self {
            Self::AddMany(adds) => adds.iter().map(|(v, _)| *v).collect(),
            Self::UnionMany(_) => BTreeSet::new(),
            Self::Queue(q) => q.commands().iter().flat_map(Command::definitions).collect(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::AddMany(adds) => adds.is_empty(),
            Self::UnionMany(pairs) => pairs.is_empty(),
            Self::Queue(q) => q.commands().iter().all(Command::is_empty),
        }
    }
}

impl<N: Operator> Command<N> {
    /// Execute the edit, extending the reification with any new bindings;
    /// returns true if the graph changed
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
        match self {
            Self::AddMany(adds) => {
                let nodes = adds
                    .iter()
                    .map(|(_, n)| n.resolve(reification))
                    .collect::<Result<Vec<_>, _>>()?;
                let results = eg.try_add_many(nodes, par)?;
                let mut changed = false;
                for ((virt, _), result) in adds.iter().zip(results) {
                    changed |= result.is_added();
                    reification.insert(*virt, result.call().clone());
                }
                Ok(changed)
            },
            Self::UnionMany(pairs) => {
                let mut remaining = Vec::new();
                for (a, b) in pairs {
                    let a = a.resolve(reification)?;
                    let b = b.resolve(reification)?;
                    if !eg.are_same(&a, &b)? {
                        remaining.push((a, b));
                    }
                }
                if remaining.is_empty() {
                    return Ok(false);
                }
                eg.union_many(remaining, par)?;
                Ok(true)
            },
            Self::Queue(q) => {
                let mut changed = false;
                for cmd in q.commands() {
                    changed |= cmd.apply(eg, reification, par)?;
                }
                Ok(changed)
            },
        }
    }

    /// Rewrite the command into an equivalent, cheaper one against a
    /// read-only view of the graph, pre-binding every symbol whose
    /// definition the graph already contains
    ///
    /// # Errors
    /// Returns an error if the kernel rejects a call during lookup.
    pub fn simplify(
        &self,
        eg: &EGraph<N>,
        reification: &mut Reification,
    ) -> Result<Self, CommandError> {
        match self {
            Self::AddMany(adds) => {
                let mut kept = Vec::new();
                for (virt, node) in adds {
                    let refined = node.refine(reification);
                    if let Some(real) = refined.to_real()
                        && let Some(call) = eg.find_node(&real).map_err(CommandError::from)?
                    {
                        reification.insert(*virt, call);
                        continue;
                    }
                    kept.push((*virt, refined));
                }
                Ok(Self::AddMany(kept))
            },
            Self::UnionMany(pairs) => {
                let mut kept = Vec::new();
                for (a, b) in pairs {
                    let a = a.refine(reification);
                    let b = b.refine(reification);
                    if let (Some(ra), Some(rb)) = (a.as_real(), b.as_real())
                        && eg.are_same(ra, rb)?
                    {
                        continue;
                    }
                    kept.push((a, b));
                }
                Ok(Self::UnionMany(kept))
            },
            Self::Queue(q) => {
                let mut out = Vec::new();
                for cmd in q.commands() {
                    let cmd = cmd.simplify(eg, reification)?;
                    if !cmd.is_empty() {
                        out.push(cmd);
                    }
                }
                Ok(Self::Queue(CommandQueue::from_commands(out)))
            },
        }
    }
}
