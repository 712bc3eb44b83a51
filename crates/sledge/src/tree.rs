//! Mixed terms and the tree-walking command builder
//!
//! A [`MixedTree`] is a term whose leaves are either structural nodes or
//! references into an existing graph. The [`QueueBuilder`] walks a tree
//! bottom-up, binding one fresh virtual symbol per structural node, so the
//! whole insertion stages as commands that `optimize` can batch.

use crate::{
    command::{Command, CommandQueue, EClassSymbol, SymNode, VirtId},
    node::{EClassCall, Operator},
    slot::Slot,
};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MixedTree<N> {
    Node {
        op: N,
        defs: Vec<Slot>,
        uses: Vec<Slot>,
        children: Vec<MixedTree<N>>,
    },
    Call(EClassCall),
}

impl<N> MixedTree<N> {
    #[must_use]
    pub fn node(op: N, defs: Vec<Slot>, uses: Vec<Slot>, children: Vec<Self>) -> Self {
        Self::Node {
            op,
            defs,
            uses,
            children,
        }
    }

    #[must_use]
    pub fn leaf(op: N) -> Self { Self::node(op, Vec::new(), Vec::new(), Vec::new()) }

    #[must_use]
    pub fn call(call: EClassCall) -> Self { Self::Call(call) }

    /// The number of structural nodes in the tree
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Node { children, .. } => {
                1 + children.iter().map(Self::len).sum::<usize>()
            },
            Self::Call(_) => 0,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool { matches!(self, Self::Call(_)) }
}

/// Accumulates staged commands from tree walks
#[derive(Debug)]
pub struct QueueBuilder<N> {
    cmds: Vec<Command<N>>,
}

impl<N> Default for QueueBuilder<N> {
    fn default() -> Self { Self { cmds: Vec::new() } }
}

impl<N: Operator> QueueBuilder<N> {
    #[must_use]
    pub fn new() -> Self { Self { cmds: Vec::new() } }

    /// Stage the insertion of a tree, returning the symbol its root will
    /// reify to
    pub fn add_tree(&mut self, tree: &MixedTree<N>) -> EClassSymbol {
        match tree {
            MixedTree::Call(call) => EClassSymbol::Real(call.clone()),
            MixedTree::Node {
                op,
                defs,
                uses,
                children,
            } => {
                let args: Vec<_> = children.iter().map(|c| self.add_tree(c)).collect();
                let sym = VirtId::fresh();
                self.cmds.push(Command::AddMany(vec![(
                    sym,
                    SymNode::new(op.clone(), &**defs, &**uses, args),
                )]));
                EClassSymbol::Virtual(sym)
            },
        }
    }

    /// Stage a union of two (possibly pending) classes
    pub fn union(&mut self, a: EClassSymbol, b: EClassSymbol) {
        self.cmds.push(Command::UnionMany(vec![(a, b)]));
    }

    /// Stage the insertion of a tree and the union of its root with `sym`
    pub fn equivalence(&mut self, sym: EClassSymbol, tree: &MixedTree<N>) {
        let root = self.add_tree(tree);
        self.union(sym, root);
    }

    #[must_use]
    pub fn finish(self) -> CommandQueue<N> { CommandQueue::from_commands(self.cmds) }
}

#[cfg(test)]
mod test {
    use super::{MixedTree, QueueBuilder};
    use crate::{
        command::{EClassSymbol, Reification},
        egraph::EGraph,
        node::ENode,
        par::Sequential,
    };

    #[test]
    fn equivalence_inserts_and_unions() {
        let mut eg = EGraph::new();
        let par = Sequential::new();
        let added = eg.try_add_many(vec![ENode::leaf('x')], &par).unwrap();
        let x = added[0].call().clone();

        // x = f(x, a)
        let tree = MixedTree::node('f', vec![], vec![], vec![
            MixedTree::call(x.clone()),
            MixedTree::leaf('a'),
        ]);
        let mut builder = QueueBuilder::new();
        builder.equivalence(EClassSymbol::Real(x.clone()), &tree);
        let queue = builder.finish().optimize();

        let mut reification = Reification::new();
        assert!(queue.apply(&mut eg, &mut reification, &par).unwrap());

        let f = eg
            .find_node(&ENode::apply('f', [
                x.clone(),
                eg.find_node(&ENode::leaf('a')).unwrap().unwrap(),
            ]))
            .unwrap()
            .unwrap();
        assert!(eg.are_same(&x, &f).unwrap());
    }
}
