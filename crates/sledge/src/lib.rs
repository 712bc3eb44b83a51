//! A slotted e-graph engine with staged rewriting
//!
//! The kernel maintains a congruence-closed, hash-consed representation of
//! term sets whose nodes carry *slots* (binder and use sites for names).
//! Canonicalisation is α-equivalence- and symmetry-aware: class symmetries
//! are tracked as permutation groups, and unions propagate renamings through
//! a slotted union-find. Edits are staged as commands with virtual class
//! symbols, batched by dataflow, and driven by composable saturation
//! strategies.

#![deny(
    clippy::disallowed_methods,
    clippy::suspicious,
    clippy::style,
    clippy::clone_on_ref_ptr,
    missing_debug_implementations,
    missing_copy_implementations
)]
#![warn(clippy::pedantic, missing_docs)]
#![allow(clippy::module_name_repetitions)]
#![allow(
    missing_docs,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    reason = "TODO: document everything"
)]

pub mod analysis;
pub mod command;
pub mod eclass;
pub mod egraph;
pub mod fresh;
pub mod group;
pub mod node;
pub mod par;
pub mod rule;
pub mod slot;
pub mod strategy;
pub mod tree;
pub mod union_find;

pub mod prelude {
    pub use super::{
        command::{Command, CommandQueue, EClassSymbol, Reification, SymNode, VirtId},
        eclass::EClassId,
        egraph::{AddResult, EGraph, EGraphError},
        node::{EClassCall, ENode, Operator, ShapeCall},
        par::{ParallelMap, Sequential, Threaded},
        rule::{Applier, Rewrite, RuleMatch, Searcher},
        slot::{Slot, SlotMap, SlotSet},
        strategy::Strategy,
        tree::{MixedTree, QueueBuilder},
    };
}

#[cfg(any(test, feature = "proptest"))]
pub mod prop {
    use proptest::prelude::*;

    /// Operator labels for randomly generated term languages
    pub fn operator() -> impl Strategy<Value = char> + Clone { prop::char::range('a', 'z') }
}
