// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Per-table B+-tree of clusters, keyed by object key.
//!
//! Inner nodes keep a keys array (maximum key of each child subtree) in
//! slot 0 and child refs in the remaining slots. Leaves are
//! `ClusterLeaf` values. Fan-out is `CLUSTER_NODE_SIZE` for both levels.
//!
//! A child mutation reports back through `NodeChange` and the parent
//! re-links accordingly; since node arrays relocate on capacity growth,
//! every recursive call also returns the child's current ref.
//!
//! Invariants maintained by every mutation:
//! - inner key array entry i equals the maximum key in child i's subtree
//! - sibling leaves are disjoint, ordered key ranges
//! - inner nodes are never empty; an emptied child collapses upward

use super::leaf::ClusterLeaf;
use crate::alloc::{Arena, Ref};
use crate::array::{Array, ArrayKind};
use crate::error::{TroveError, TroveResult};
use crate::keys::{ColKey, ObjKey};

/// Maximum rows per cluster and children per inner node. Power of two.
pub const CLUSTER_NODE_SIZE: usize = 256;

/// Result of a child mutation, driving parent re-linking.
#[derive(Debug, Clone, Copy)]
pub enum NodeChange {
    None,
    /// A new sibling carrying keys below the child's range.
    InsertBefore(Ref),
    /// A new sibling carrying keys above the child's range.
    InsertAfter(Ref),
    /// The child split in two: (left, right).
    Split(Ref, Ref),
}

/// Handle on a table's cluster tree.
#[derive(Debug, Clone, Copy)]
pub struct ClusterTree {
    root: Ref,
}

impl ClusterTree {
    /// Creates a tree with a single empty leaf.
    pub fn create(arena: &mut Arena, cols: &[ColKey]) -> TroveResult<ClusterTree> {
        let leaf = ClusterLeaf::create(arena, cols)?;
        Ok(ClusterTree { root: leaf.ref_() })
    }

    pub fn from_ref(root: Ref) -> ClusterTree {
        ClusterTree { root }
    }

    pub fn root_ref(&self) -> Ref {
        self.root
    }

    fn is_inner(arena: &Arena, r: Ref) -> bool {
        Array::from_ref(r).is_inner_node(arena)
    }

    /// Maximum key in the subtree rooted at `r`.
    fn node_max(arena: &Arena, r: Ref) -> i64 {
        if Self::is_inner(arena, r) {
            let node = Array::from_ref(r);
            let keys = Array::from_ref(node.get(arena, 0) as Ref);
            let n = keys.size(arena);
            keys.get(arena, n - 1)
        } else {
            ClusterLeaf::from_ref(r).max_key(arena).map(|k| k.0).unwrap_or(i64::MIN)
        }
    }

    /// Inserts a new row with default payloads at `key`.
    ///
    /// ## Error Conditions
    /// - `InvalidKey` when the key already exists
    pub fn insert(&mut self, arena: &mut Arena, cols: &[ColKey], key: ObjKey) -> TroveResult<()> {
        let (new_root, change) = Self::insert_recurse(arena, cols, self.root, key)?;
        self.root = new_root;
        match change {
            NodeChange::None => {}
            NodeChange::InsertBefore(sibling) => {
                self.root = Self::new_root(arena, &[sibling, new_root])?;
            }
            NodeChange::InsertAfter(sibling) => {
                self.root = Self::new_root(arena, &[new_root, sibling])?;
            }
            NodeChange::Split(left, right) => {
                self.root = Self::new_root(arena, &[left, right])?;
            }
        }
        Ok(())
    }

    fn new_root(arena: &mut Arena, children: &[Ref]) -> TroveResult<Ref> {
        let mut node = Array::create_with_capacity(arena, ArrayKind::InnerNode, children.len() + 1)?;
        let mut keys = Array::create(arena, ArrayKind::Normal)?;
        for child in children {
            keys.add(arena, Self::node_max(arena, *child))?;
        }
        node.add(arena, keys.ref_() as i64)?;
        for child in children {
            node.add(arena, *child as i64)?;
        }
        Ok(node.ref_())
    }

    fn insert_recurse(
        arena: &mut Arena,
        cols: &[ColKey],
        node_ref: Ref,
        key: ObjKey,
    ) -> TroveResult<(Ref, NodeChange)> {
        if !Self::is_inner(arena, node_ref) {
            let mut leaf = ClusterLeaf::from_ref(node_ref);
            if leaf.find_row(arena, key).is_ok() {
                return Err(TroveError::InvalidKey { key: key.0 });
            }
            if leaf.num_rows(arena) < CLUSTER_NODE_SIZE {
                leaf.insert_row(arena, cols, key)?;
                return Ok((node_ref, NodeChange::None));
            }

            // Leaf is full. Keys beyond either end go to a fresh sibling;
            // an interior key forces a balanced split.
            let max = leaf.max_key(arena).map(|k| k.0).unwrap_or(i64::MIN);
            let min = leaf.min_key(arena).map(|k| k.0).unwrap_or(i64::MAX);
            if key.0 > max {
                let mut sibling = ClusterLeaf::create(arena, cols)?;
                sibling.insert_row(arena, cols, key)?;
                return Ok((node_ref, NodeChange::InsertAfter(sibling.ref_())));
            }
            if key.0 < min {
                let mut sibling = ClusterLeaf::create(arena, cols)?;
                sibling.insert_row(arena, cols, key)?;
                return Ok((node_ref, NodeChange::InsertBefore(sibling.ref_())));
            }

            let mut right = leaf.split(arena, cols)?;
            let right_min = right.min_key(arena).map(|k| k.0).unwrap_or(i64::MAX);
            if key.0 < right_min {
                leaf.insert_row(arena, cols, key)?;
            } else {
                right.insert_row(arena, cols, key)?;
            }
            return Ok((node_ref, NodeChange::Split(leaf.ref_(), right.ref_())));
        }

        // Inner node.
        let mut node = Array::from_ref(node_ref);
        let mut keys = Array::from_ref(node.get(arena, 0) as Ref);
        let nchildren = keys.size(arena);
        let idx = {
            let pos = keys.lower_bound(arena, key.0);
            pos.min(nchildren - 1)
        };
        let child_ref = node.get(arena, idx + 1) as Ref;

        let (child_now, change) = Self::insert_recurse(arena, cols, child_ref, key)?;
        if child_now != child_ref {
            node.set(arena, idx + 1, child_now as i64)?;
        }

        match change {
            NodeChange::None => {
                keys.set(arena, idx, Self::node_max(arena, child_now))?;
                node.set(arena, 0, keys.ref_() as i64)?;
                Ok((node.ref_(), NodeChange::None))
            }
            NodeChange::InsertBefore(sibling) => {
                keys.insert(arena, idx, Self::node_max(arena, sibling))?;
                node.insert(arena, idx + 1, sibling as i64)?;
                node.set(arena, 0, keys.ref_() as i64)?;
                self_split_if_needed(arena, node, keys)
            }
            NodeChange::InsertAfter(sibling) => {
                keys.set(arena, idx, Self::node_max(arena, child_now))?;
                keys.insert(arena, idx + 1, Self::node_max(arena, sibling))?;
                node.insert(arena, idx + 2, sibling as i64)?;
                node.set(arena, 0, keys.ref_() as i64)?;
                self_split_if_needed(arena, node, keys)
            }
            NodeChange::Split(left, right) => {
                keys.set(arena, idx, Self::node_max(arena, left))?;
                keys.insert(arena, idx + 1, Self::node_max(arena, right))?;
                node.set(arena, idx + 1, left as i64)?;
                node.insert(arena, idx + 2, right as i64)?;
                node.set(arena, 0, keys.ref_() as i64)?;
                self_split_if_needed(arena, node, keys)
            }
        }
    }

    /// Locates a row by key.
    pub fn lookup(&self, arena: &Arena, key: ObjKey) -> Option<(ClusterLeaf, usize)> {
        let mut current = self.root;
        loop {
            if Self::is_inner(arena, current) {
                let node = Array::from_ref(current);
                let keys = Array::from_ref(node.get(arena, 0) as Ref);
                let n = keys.size(arena);
                let idx = keys.lower_bound(arena, key.0);
                if idx >= n {
                    return None;
                }
                current = node.get(arena, idx + 1) as Ref;
            } else {
                let leaf = ClusterLeaf::from_ref(current);
                return match leaf.find_row(arena, key) {
                    Ok(row) => Some((leaf, row)),
                    Err(_) => None,
                };
            }
        }
    }

    /// Removes the row at `key`, collapsing emptied nodes upward.
    ///
    /// ## Error Conditions
    /// - `InvalidKey` when the key is absent
    pub fn erase(&mut self, arena: &mut Arena, cols: &[ColKey], key: ObjKey) -> TroveResult<()> {
        let (new_root, _empty) = Self::erase_recurse(arena, cols, self.root, key)?;
        self.root = new_root;

        // A root inner node with a single child hands the root role down.
        while Self::is_inner(arena, self.root) {
            let node = Array::from_ref(self.root);
            let keys = Array::from_ref(node.get(arena, 0) as Ref);
            if keys.size(arena) != 1 {
                break;
            }
            let only_child = node.get(arena, 1) as Ref;
            keys.destroy(arena);
            node.destroy(arena);
            self.root = only_child;
        }
        Ok(())
    }

    fn erase_recurse(
        arena: &mut Arena,
        cols: &[ColKey],
        node_ref: Ref,
        key: ObjKey,
    ) -> TroveResult<(Ref, bool)> {
        if !Self::is_inner(arena, node_ref) {
            let mut leaf = ClusterLeaf::from_ref(node_ref);
            let row = leaf
                .find_row(arena, key)
                .map_err(|_| TroveError::InvalidKey { key: key.0 })?;
            leaf.erase_row(arena, cols, row)?;
            return Ok((node_ref, leaf.num_rows(arena) == 0));
        }

        let mut node = Array::from_ref(node_ref);
        let mut keys = Array::from_ref(node.get(arena, 0) as Ref);
        let n = keys.size(arena);
        let idx = keys.lower_bound(arena, key.0);
        if idx >= n {
            return Err(TroveError::InvalidKey { key: key.0 });
        }
        let child_ref = node.get(arena, idx + 1) as Ref;
        let (child_now, child_empty) = Self::erase_recurse(arena, cols, child_ref, key)?;

        if child_empty {
            // Free the emptied child and drop its slot.
            if Self::is_inner(arena, child_now) {
                let child = Array::from_ref(child_now);
                Array::from_ref(child.get(arena, 0) as Ref).destroy(arena);
                child.destroy(arena);
            } else {
                ClusterLeaf::from_ref(child_now).destroy(arena, cols);
            }
            keys.erase(arena, idx)?;
            node.erase(arena, idx + 1)?;
            node.set(arena, 0, keys.ref_() as i64)?;
            return Ok((node.ref_(), keys.size(arena) == 0));
        }

        if child_now != child_ref {
            node.set(arena, idx + 1, child_now as i64)?;
        }
        keys.set(arena, idx, Self::node_max(arena, child_now))?;
        node.set(arena, 0, keys.ref_() as i64)?;
        Ok((node.ref_(), false))
    }

    /// Leaf refs in ascending key order.
    pub fn leaf_refs(&self, arena: &Arena) -> Vec<Ref> {
        let mut out = Vec::new();
        Self::collect_leaves(arena, self.root, &mut out);
        out
    }

    fn collect_leaves(arena: &Arena, r: Ref, out: &mut Vec<Ref>) {
        if Self::is_inner(arena, r) {
            let node = Array::from_ref(r);
            let nchildren = node.size(arena) - 1;
            for i in 0..nchildren {
                Self::collect_leaves(arena, node.get(arena, i + 1) as Ref, out);
            }
        } else {
            out.push(r);
        }
    }

    /// All keys in ascending order.
    pub fn keys(&self, arena: &Arena) -> Vec<ObjKey> {
        let mut out = Vec::new();
        for r in self.leaf_refs(arena) {
            let leaf = ClusterLeaf::from_ref(r);
            let n = leaf.num_rows(arena);
            for row in 0..n {
                out.push(leaf.key_at(arena, row));
            }
        }
        out
    }

    /// Total row count.
    pub fn count_rows(&self, arena: &Arena) -> usize {
        self.leaf_refs(arena)
            .into_iter()
            .map(|r| ClusterLeaf::from_ref(r).num_rows(arena))
            .sum()
    }

    /// Releases the whole tree and resets to a single empty leaf.
    pub fn clear(&mut self, arena: &mut Arena, cols: &[ColKey]) -> TroveResult<()> {
        Self::destroy_node(arena, self.root, cols);
        let leaf = ClusterLeaf::create(arena, cols)?;
        self.root = leaf.ref_();
        Ok(())
    }

    /// Releases the whole tree without recreating a root.
    pub fn destroy(self, arena: &mut Arena, cols: &[ColKey]) {
        Self::destroy_node(arena, self.root, cols);
    }

    fn destroy_node(arena: &mut Arena, r: Ref, cols: &[ColKey]) {
        if Self::is_inner(arena, r) {
            let node = Array::from_ref(r);
            let nchildren = node.size(arena) - 1;
            for i in 0..nchildren {
                Self::destroy_node(arena, node.get(arena, i + 1) as Ref, cols);
            }
            Array::from_ref(node.get(arena, 0) as Ref).destroy(arena);
            node.destroy(arena);
        } else {
            ClusterLeaf::from_ref(r).destroy(arena, cols);
        }
    }
}

/// Splits an over-full inner node at its midpoint.
fn self_split_if_needed(
    arena: &mut Arena,
    mut node: Array,
    mut keys: Array,
) -> TroveResult<(Ref, NodeChange)> {
    let nchildren = keys.size(arena);
    node.set(arena, 0, keys.ref_() as i64)?;
    if nchildren <= CLUSTER_NODE_SIZE {
        return Ok((node.ref_(), NodeChange::None));
    }

    let mid = nchildren / 2;
    let mut rnode = Array::create_with_capacity(arena, ArrayKind::InnerNode, nchildren - mid + 1)?;
    let mut rkeys = Array::create(arena, ArrayKind::Normal)?;
    for i in mid..nchildren {
        rkeys.add(arena, keys.get(arena, i))?;
    }
    rnode.add(arena, rkeys.ref_() as i64)?;
    for i in mid..nchildren {
        rnode.add(arena, node.get(arena, i + 1))?;
    }
    keys.truncate(arena, mid)?;
    node.truncate(arena, mid + 1)?;
    node.set(arena, 0, keys.ref_() as i64)?;
    Ok((node.ref_(), NodeChange::Split(node.ref_(), rnode.ref_())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbOptions;
    use crate::keys::CollectionKind;
    use crate::value::{ColumnType, Value};

    fn setup() -> (tempfile::TempDir, Arena, Vec<ColKey>) {
        let dir = tempfile::tempdir().unwrap();
        let arena = Arena::open(dir.path().join("t.trove"), &DbOptions::default()).unwrap();
        let cols = vec![
            ColKey::new(0, ColumnType::Int, false, CollectionKind::None),
            ColKey::new(1, ColumnType::String, true, CollectionKind::None),
        ];
        (dir, arena, cols)
    }

    #[test]
    fn test_insert_lookup_roundtrip() {
        let (_d, mut arena, cols) = setup();
        let mut tree = ClusterTree::create(&mut arena, &cols).unwrap();
        for k in [5i64, 1, 9, 3] {
            tree.insert(&mut arena, &cols, ObjKey(k)).unwrap();
        }
        assert_eq!(tree.count_rows(&arena), 4);
        let (mut leaf, row) = tree.lookup(&arena, ObjKey(3)).unwrap();
        leaf.set_value(&mut arena, &cols, 0, row, &Value::Int(42), "v")
            .unwrap();
        let (leaf, row) = tree.lookup(&arena, ObjKey(3)).unwrap();
        assert_eq!(
            leaf.get_value(&arena, &cols, 0, row).unwrap(),
            Value::Int(42)
        );
        assert!(tree.lookup(&arena, ObjKey(4)).is_none());
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let (_d, mut arena, cols) = setup();
        let mut tree = ClusterTree::create(&mut arena, &cols).unwrap();
        tree.insert(&mut arena, &cols, ObjKey(7)).unwrap();
        assert!(matches!(
            tree.insert(&mut arena, &cols, ObjKey(7)),
            Err(TroveError::InvalidKey { key: 7 })
        ));
    }

    #[test]
    fn test_keys_sorted_after_many_inserts() {
        let (_d, mut arena, cols) = setup();
        let mut tree = ClusterTree::create(&mut arena, &cols).unwrap();
        // Interleaved pattern forcing interior splits.
        let mut expected = Vec::new();
        for k in 0..1500i64 {
            let key = (k * 7919) % 10007;
            tree.insert(&mut arena, &cols, ObjKey(key)).unwrap();
            expected.push(key);
        }
        expected.sort_unstable();
        let got: Vec<i64> = tree.keys(&arena).into_iter().map(|k| k.0).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_split_boundary_balanced() {
        let (_d, mut arena, cols) = setup();
        let mut tree = ClusterTree::create(&mut arena, &cols).unwrap();
        // Fill one leaf exactly, leaving a gap in the middle.
        for k in 0..CLUSTER_NODE_SIZE as i64 {
            let key = if k < 128 { k } else { k + 1 };
            tree.insert(&mut arena, &cols, ObjKey(key)).unwrap();
        }
        // Interior insert at the gap forces the balanced split.
        tree.insert(&mut arena, &cols, ObjKey(128)).unwrap();
        let leaves = tree.leaf_refs(&arena);
        assert_eq!(leaves.len(), 2);
        for r in leaves {
            let n = ClusterLeaf::from_ref(r).num_rows(&arena);
            assert!(n >= CLUSTER_NODE_SIZE / 2, "unbalanced leaf: {} rows", n);
        }
    }

    #[test]
    fn test_sequential_append_creates_sibling() {
        let (_d, mut arena, cols) = setup();
        let mut tree = ClusterTree::create(&mut arena, &cols).unwrap();
        for k in 0..=CLUSTER_NODE_SIZE as i64 {
            tree.insert(&mut arena, &cols, ObjKey(k)).unwrap();
        }
        let leaves = tree.leaf_refs(&arena);
        assert_eq!(leaves.len(), 2);
        assert_eq!(ClusterLeaf::from_ref(leaves[1]).num_rows(&arena), 1);
    }

    #[test]
    fn test_erase_collapses_tree() {
        let (_d, mut arena, cols) = setup();
        let mut tree = ClusterTree::create(&mut arena, &cols).unwrap();
        for k in 0..600i64 {
            tree.insert(&mut arena, &cols, ObjKey(k)).unwrap();
        }
        for k in 0..600i64 {
            tree.erase(&mut arena, &cols, ObjKey(k)).unwrap();
        }
        assert_eq!(tree.count_rows(&arena), 0);
        assert_eq!(tree.leaf_refs(&arena).len(), 1);
        assert!(matches!(
            tree.erase(&mut arena, &cols, ObjKey(0)),
            Err(TroveError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_erase_missing_key() {
        let (_d, mut arena, cols) = setup();
        let mut tree = ClusterTree::create(&mut arena, &cols).unwrap();
        tree.insert(&mut arena, &cols, ObjKey(1)).unwrap();
        assert!(tree.erase(&mut arena, &cols, ObjKey(2)).is_err());
    }
}
