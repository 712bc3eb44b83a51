//! Whole-graph invariant validation, compiled under the `test` feature only

use super::EGraph;
use crate::node::Operator;

impl<N: Operator> EGraph<N> {
    /// Validate every kernel invariant; a no-op outside test builds
    #[cfg(not(any(test, feature = "test")))]
    #[inline]
    pub fn check_invariants(&self) { let _ = self; }

    /// Validate every kernel invariant
    ///
    /// # Panics
    /// Panics if any table is out of sync: a stored shape that is no longer
    /// canonical, a hash-cons entry without class data, a users set that does
    /// not match the argument references, a renaming that fails to cover its
    /// class's slots, or a symmetry generator with the wrong carrier.
    #[cfg(any(test, feature = "test"))]
    pub fn check_invariants(&self) {
        for (shape, &id) in &self.hash_cons {
            assert!(
                self.uf.is_canonical(id),
                "hash-cons target {id} is not canonical"
            );
            let data = self
                .classes
                .get(&id)
                .expect("hash-cons target has no class data");
            assert!(
                data.nodes.contains_key(shape),
                "hash-cons entry missing from its class's node table"
            );
            let canon = self
                .canonicalize(shape)
                .expect("stored shape failed to canonicalize");
            assert!(
                canon.node == *shape,
                "stored shape is no longer canonical: {shape:?} vs {:?}",
                canon.node
            );
        }

        for (&id, data) in &self.classes {
            assert!(self.uf.is_canonical(id), "class {id} is not canonical");
            assert!(!data.is_empty(), "class {id} retained with no nodes");

            let found = self.uf.find(id).unwrap();
            assert_eq!(found.id, id);
            assert!(
                found.map.is_identity(),
                "root entry for {id} is not the identity"
            );

            for (shape, renaming) in &data.nodes {
                assert_eq!(
                    self.hash_cons.get(shape),
                    Some(&id),
                    "class node missing from the hash-cons"
                );
                assert!(
                    data.slots().is_subset(&renaming.values_set()),
                    "node renaming does not cover the slots of class {id}"
                );
                assert!(renaming.is_bijection());
                for arg in shape.args() {
                    let owner = self.uf.find(arg.id).unwrap().id;
                    assert!(
                        self.classes[&owner].users.contains(shape),
                        "argument class {owner} does not list its user"
                    );
                }
            }

            for g in data.group().generators() {
                assert!(g.is_perm(), "class {id} generator is not a permutation");
                assert_eq!(
                    &g.keys_set(),
                    data.slots(),
                    "class {id} generator carrier mismatch"
                );
            }

            for user in &data.users {
                let uid = *self
                    .hash_cons
                    .get(user)
                    .expect("stale shape in a users table");
                assert!(self.uf.is_canonical(uid));
                assert!(
                    user.args()
                        .iter()
                        .any(|a| self.uf.find(a.id).unwrap().id == id),
                    "user shape does not reference class {id}"
                );
            }
        }
    }
}
