use proptest::prelude::*;

use super::EGraph;
use crate::{
    node::{EClassCall, ENode},
    par::Sequential,
    slot::Slot,
};

fn s(n: u32) -> Slot { Slot::numbered(n) }

/// A variable occurrence: one free use of a slot
fn var(x: Slot) -> ENode<char> { ENode::new('v', [], [x], []) }

fn add_one(eg: &mut EGraph<char>, node: ENode<char>) -> EClassCall {
    let results = eg.try_add_many(vec![node], &Sequential::new()).unwrap();
    results[0].call().clone()
}

fn union_one(eg: &mut EGraph<char>, a: &EClassCall, b: &EClassCall) {
    eg.union_many(vec![(a.clone(), b.clone())], &Sequential::new())
        .unwrap();
}

/// Unioning `a = b` must make `f(a)` and `f(b)` equal.
#[test]
fn congruence_closure() {
    let mut eg = EGraph::new();
    let a = add_one(&mut eg, ENode::leaf('a'));
    let b = add_one(&mut eg, ENode::leaf('b'));
    let fa = add_one(&mut eg, ENode::apply('f', [a.clone()]));
    let fb = add_one(&mut eg, ENode::apply('f', [b.clone()]));
    assert!(!eg.are_same(&fa, &fb).unwrap());

    union_one(&mut eg, &a, &b);
    assert!(eg.are_same(&a, &b).unwrap());
    assert!(eg.are_same(&fa, &fb).unwrap());
    eg.check_invariants();
}

/// Congruence reaches through slotted arguments: once the distinguishing
/// subterms are unioned, the stale shape is repaired into the existing class.
#[test]
fn congruence_closure_through_slots() {
    let mut eg = EGraph::new();
    let ca = add_one(&mut eg, var(s(1)));
    let cb = add_one(&mut eg, var(s(2)));
    assert_eq!(ca.id, cb.id, "alpha-equivalent variables share a class");

    let x = add_one(&mut eg, ENode::leaf('x'));
    let y = add_one(&mut eg, ENode::leaf('y'));
    let r1 = add_one(&mut eg, ENode::apply('r', [ca.clone(), x.clone()]));
    let r2 = add_one(&mut eg, ENode::apply('r', [cb.clone(), y.clone()]));
    assert_ne!(
        eg.canonicalize_call(&r1).unwrap().id,
        eg.canonicalize_call(&r2).unwrap().id
    );

    union_one(&mut eg, &x, &y);
    assert_eq!(
        eg.canonicalize_call(&r1).unwrap().id,
        eg.canonicalize_call(&r2).unwrap().id,
        "repair failed to fold congruent slotted shapes"
    );
    eg.check_invariants();
}

/// `λx. x` and `λy. y` hash-cons to the same class with no free slots.
#[test]
fn alpha_equivalent_binders_coincide() {
    let mut eg = EGraph::new();
    let par = Sequential::new();

    let vx = add_one(&mut eg, var(s(10)));
    let lam_x = ENode::new('l', [s(10)], [], [vx.clone()]);
    let vy = eg.find_node(&var(s(11))).unwrap().unwrap();
    let lam_y = ENode::new('l', [s(11)], [], [vy]);

    let results = eg.try_add_many(vec![lam_x, lam_y], &par).unwrap();
    assert!(results[0].is_added());
    assert!(!results[1].is_added(), "alpha-equivalent binder was re-added");
    let call = results[0].call();
    assert_eq!(call.id, results[1].call().id);
    assert!(call.map.is_empty(), "binder class has no free slots");
    assert!(eg.class(call.id).group().is_trivial());
    eg.check_invariants();
}

/// `mul(a, b)` and `mul(b, a)` land in one class; asserting them equal
/// installs the argument swap as a class symmetry.
#[test]
fn symmetry_propagation() {
    let mut eg = EGraph::new();
    let ca = add_one(&mut eg, var(s(1)));
    let cb = eg.find_node(&var(s(2))).unwrap().unwrap();

    let m1 = add_one(&mut eg, ENode::apply('m', [ca.clone(), cb.clone()]));
    let m2 = add_one(&mut eg, ENode::apply('m', [cb, ca]));
    assert_eq!(m1.id, m2.id, "commuted node maps to the same class");
    assert!(!eg.are_same(&m1, &m2).unwrap());

    union_one(&mut eg, &m1, &m2);
    assert!(eg.are_same(&m1, &m2).unwrap());

    let root = eg.canonicalize_call(&m1).unwrap().id;
    let group = eg.class(root).group();
    assert!(!group.is_trivial(), "swap symmetry was not witnessed");
    assert_eq!(group.all_perms().len(), 2);
    eg.check_invariants();
}

/// Unioning `g(x)` with `g(y)` under disjoint projections shrinks the class
/// to no slots; unioning a call with itself changes nothing.
#[test]
fn slot_shrinkage_on_union() {
    let mut eg = EGraph::new();
    let g1 = add_one(&mut eg, ENode::new('g', [], [s(1)], []));
    let g2 = eg
        .find_node(&ENode::new('g', [], [s(2)], []))
        .unwrap()
        .unwrap();
    assert_eq!(g1.id, g2.id);
    assert_eq!(eg.class(g1.id).slots().len(), 1);

    union_one(&mut eg, &g1, &g2);
    let root = eg.canonicalize_call(&g1).unwrap().id;
    assert!(eg.class(root).slots().is_empty(), "disjoint projections leave no slots");
    assert!(eg.are_same(&g1, &g2).unwrap());
    eg.check_invariants();

    let mut eg = EGraph::new();
    let g1 = add_one(&mut eg, ENode::new('g', [], [s(1)], []));
    let report = eg
        .union_many(vec![(g1.clone(), g1.clone())], &Sequential::new())
        .unwrap();
    assert!(report.is_empty());
    assert_eq!(eg.class(g1.id).slots().len(), 1);
    eg.check_invariants();
}

/// A self-union under a non-identity renaming either adds a symmetry or is a
/// no-op.
#[test]
fn self_union_with_renamed_args() {
    let mut eg = EGraph::new();
    let ca = add_one(&mut eg, var(s(1)));
    let cb = eg.find_node(&var(s(2))).unwrap().unwrap();
    let m = add_one(&mut eg, ENode::apply('m', [ca, cb]));

    // swap the two projected slots of the call
    let pairs: Vec<_> = m.map.iter().collect();
    let swapped = EClassCall::new(
        m.id,
        pairs
            .iter()
            .zip(pairs.iter().rev())
            .map(|(&(k, _), &(_, v))| (k, v))
            .collect(),
    );
    union_one(&mut eg, &m, &swapped);
    let root = eg.canonicalize_call(&m).unwrap().id;
    assert!(!eg.class(root).group().is_trivial());

    // repeating the same union is a no-op
    let before = eg.total_nodes();
    let report = eg
        .union_many(vec![(m.clone(), swapped.clone())], &Sequential::new())
        .unwrap();
    assert!(report.is_empty());
    assert_eq!(eg.total_nodes(), before);
    eg.check_invariants();
}

/// Re-adding an existing node yields `Existing` with exactly `find`'s call.
#[test]
fn re_add_is_idempotent() {
    let mut eg = EGraph::new();
    let par = Sequential::new();
    let a = add_one(&mut eg, ENode::leaf('a'));
    let f = add_one(&mut eg, ENode::apply('f', [a.clone()]));

    let node = ENode::apply('f', [a]);
    let found = eg.find_node(&node).unwrap().unwrap();
    let results = eg.try_add_many(vec![node], &par).unwrap();
    assert!(!results[0].is_added());
    assert_eq!(results[0].call(), &found);
    assert_eq!(found.id, eg.canonicalize_call(&f).unwrap().id);
}

/// A slot-free node in an empty graph yields a class with no slots.
#[test]
fn slot_free_nodes_have_no_slots() {
    let mut eg = EGraph::new();
    let a = add_one(&mut eg, ENode::leaf('a'));
    assert!(a.map.is_empty());
    assert!(eg.class(a.id).slots().is_empty());
    assert_eq!(eg.nodes(&a).unwrap().len(), 1);
}

#[test]
fn users_and_nodes_projections() {
    let mut eg = EGraph::new();
    let a = add_one(&mut eg, ENode::leaf('a'));
    let f = add_one(&mut eg, ENode::apply('f', [a.clone()]));

    let users = eg.users(a.id).unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(*users[0].op(), 'f');
    assert!(eg.users(f.id).unwrap().is_empty());

    let nodes = eg.nodes(&f).unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(*nodes[0].op(), 'f');
    assert!(eg.nodes_with_op(&f, &'g').unwrap().is_empty());
}

/// Member nodes come back renamed into the caller's slot universe.
#[test]
fn nodes_rename_into_the_callers_universe() {
    let mut eg = EGraph::new();
    let g = add_one(&mut eg, ENode::new('g', [], [s(5)], []));
    let nodes = eg.nodes(&g).unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].uses(), [s(5)]);
}

/// Malformed calls are rejected at the union entry point.
#[test]
fn union_rejects_uncovering_calls() {
    let mut eg = EGraph::new();
    let g = add_one(&mut eg, ENode::new('g', [], [s(1)], []));
    let bare = EClassCall::slotless(g.id);
    let err = eg
        .union_many(vec![(bare.clone(), g)], &Sequential::new())
        .unwrap_err();
    assert!(matches!(err, super::EGraphError::MalformedCall(_)));
}

#[test]
fn missing_classes_are_not_found() {
    let eg = EGraph::<char>::new();
    assert!(eg.canonicalize_ref(crate::eclass::EClassId::new(7)).is_err());
}

#[derive(Debug, Clone)]
struct Tree(char, Vec<Tree>);

impl Tree {
    fn fold_impl<T>(&self, f: &mut impl FnMut(char, Vec<T>) -> T) -> T {
        let Self(op, children) = self;
        let children = children.iter().map(|c| c.fold_impl(f)).collect();
        f(*op, children)
    }

    #[inline]
    fn fold<T>(&self, mut f: impl FnMut(char, Vec<T>) -> T) -> T { self.fold_impl(&mut f) }

    fn count(&self) -> usize {
        self.1.iter().map(Tree::count).sum::<usize>() + 1
    }
}

fn nodes_and_merges(
    depth: u32,
    tree_size: u32,
    branch_size: u32,
    merges: std::ops::Range<usize>,
) -> impl Strategy<Value = (Tree, Vec<(usize, usize)>)> {
    let op = crate::prop::operator();
    op.clone()
        .prop_map(|o| Tree(o, vec![]))
        .prop_recursive(depth, tree_size, branch_size, move |t| {
            (
                op.clone(),
                prop::collection::vec(t, 0..=(branch_size.try_into().unwrap())),
            )
                .prop_map(|(o, c)| Tree(o, c))
        })
        .prop_flat_map(move |t| {
            let id = 0..t.count();
            prop::collection::vec((id.clone(), id), merges.clone())
                .prop_map(move |m| (t.clone(), m))
        })
}

fn build(eg: &mut EGraph<char>, tree: &Tree) -> Vec<EClassCall> {
    let mut calls = vec![];
    tree.fold(|op, children: Vec<EClassCall>| {
        let call = add_one(eg, ENode::apply(op, children));
        calls.push(call.clone());
        call
    });
    calls
}

fn assert_same_quotient(a: &EGraph<char>, b: &EGraph<char>, calls: &[(EClassCall, EClassCall)]) {
    for (i, (ai, bi)) in calls.iter().enumerate() {
        for (aj, bj) in calls.iter().take(i) {
            assert_eq!(
                a.are_same(ai, aj).unwrap(),
                b.are_same(bi, bj).unwrap(),
                "graphs disagree on equivalence"
            );
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        max_shrink_time: 0,
        max_shrink_iters: 4096,
        ..ProptestConfig::default()
    })]

    /// Invariants hold after every single union of a random merge sequence.
    #[test]
    fn stepwise_unions_preserve_invariants(
        (tree, merges) in nodes_and_merges(8, 64, 4, 1..24),
    ) {
        let mut eg = EGraph::new();
        let calls = build(&mut eg, &tree);
        eg.check_invariants();

        for &(a, b) in &merges {
            union_one(&mut eg, &calls[a], &calls[b]);
            eg.check_invariants();
        }
    }

    /// One batched union reaches the same quotient as applying the pairs one
    /// at a time.
    #[test]
    fn batched_union_matches_stepwise(
        (tree, merges) in nodes_and_merges(8, 64, 4, 1..24),
    ) {
        let par = Sequential::new();

        let mut stepwise = EGraph::new();
        let step_calls = build(&mut stepwise, &tree);
        for &(a, b) in &merges {
            union_one(&mut stepwise, &step_calls[a], &step_calls[b]);
        }

        let mut batched = EGraph::new();
        let batch_calls = build(&mut batched, &tree);
        let pairs = merges
            .iter()
            .map(|&(a, b)| (batch_calls[a].clone(), batch_calls[b].clone()))
            .collect();
        batched.union_many(pairs, &par).unwrap();
        batched.check_invariants();

        let paired: Vec<_> = step_calls.into_iter().zip(batch_calls).collect();
        assert_same_quotient(&stepwise, &batched, &paired);
    }

    /// Adding the same tree twice changes nothing the second time.
    #[test]
    fn re_adding_a_tree_is_idempotent(
        (tree, _) in nodes_and_merges(6, 32, 3, 0..1),
    ) {
        let mut eg = EGraph::new();
        let first = build(&mut eg, &tree);
        let nodes = eg.total_nodes();
        let second = build(&mut eg, &tree);
        assert_eq!(eg.total_nodes(), nodes);
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a, b);
        }
    }
}
