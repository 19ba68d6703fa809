// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! String-prefix trie index.
//!
//! Values are keyed four bytes at a time. At each trie level a node maps
//! sorted chunk keys to entries:
//!
//! - tagged literal (low bit set): a single object key owns this prefix
//! - ref to a plain sorted array: several keys share the prefix, either
//!   duplicates of one value, or (past `MAX_OFFSET`) a terminal list of
//!   different values sorted by (value, key)
//! - ref to a context-flagged node: distinct values share the prefix and
//!   the trie descends another level
//!
//! A node whose chunk-key array outgrows `INDEX_NODE_SIZE` splits down
//! the middle like a cluster node; inner index nodes key children by the
//! last chunk key of each child subtree.
//!
//! Chunk collisions are resolved by reading the colliding row's full
//! value back through the accessor, exactly mirroring the behavior of
//! the cluster-resident column.

use super::{chunk_at, FindResult, IndexAccessor, IndexPayload, INDEX_KEY_LENGTH, MAX_OFFSET};
use crate::alloc::{Arena, Ref};
use crate::array::{is_literal, tag_literal, untag_literal, Array, ArrayKind};
use crate::cluster::tree::NodeChange;
use crate::error::{TroveError, TroveResult};
use crate::index::INDEX_NODE_SIZE;
use crate::keys::ObjKey;
use std::cmp::Ordering;

/// Number of upper/lower chunk permutations probed per level in a
/// case-insensitive search (one bit per byte of the chunk).
const NUM_CI_PERMUTATIONS: u32 = 1 << INDEX_KEY_LENGTH;

/// Search index over 4-byte value chunks.
#[derive(Debug, Clone, Copy)]
pub struct StringIndex {
    root: Ref,
}

impl StringIndex {
    pub fn create(arena: &mut Arena) -> TroveResult<StringIndex> {
        Ok(StringIndex {
            root: new_leaf_node(arena)?,
        })
    }

    pub fn from_ref(root: Ref) -> StringIndex {
        StringIndex { root }
    }

    pub fn root_ref(&self) -> Ref {
        self.root
    }

    pub fn is_empty(&self, arena: &Arena) -> bool {
        let node = Array::from_ref(self.root);
        keys_of(arena, &node).size(arena) == 0
    }

    /// Inserts (key, value). Idempotent for already-present pairs.
    pub fn insert(
        &mut self,
        arena: &mut Arena,
        acc: &dyn IndexAccessor,
        key: ObjKey,
        payload: &IndexPayload,
    ) -> TroveResult<()> {
        self.root = insert_level(arena, acc, self.root, key, payload, 0)?;
        Ok(())
    }

    /// Removes (key, value); a no-op when the pair is absent.
    pub fn erase(
        &mut self,
        arena: &mut Arena,
        acc: &dyn IndexAccessor,
        key: ObjKey,
        payload: &IndexPayload,
    ) -> TroveResult<()> {
        let (new_root, _) = erase_recurse(arena, acc, self.root, key, payload, 0)?;
        self.root = new_root;
        // A root left as a single-child inner node hands the role down.
        loop {
            let node = Array::from_ref(self.root);
            if !node.is_inner_node(arena) {
                break;
            }
            let keys = keys_of(arena, &node);
            if keys.size(arena) != 1 {
                break;
            }
            let child = node.get(arena, 1) as Ref;
            keys.destroy(arena);
            node.destroy(arena);
            self.root = child;
        }
        Ok(())
    }

    /// Re-keys an existing (value, old) pair to `new`.
    pub fn update_ref(
        &mut self,
        arena: &mut Arena,
        acc: &dyn IndexAccessor,
        old: ObjKey,
        new: ObjKey,
        payload: &IndexPayload,
    ) -> TroveResult<()> {
        self.erase(arena, acc, old, payload)?;
        self.insert(arena, acc, new, payload)
    }

    /// Lowest object key holding `payload`, if any.
    pub fn find_first(
        &self,
        arena: &Arena,
        acc: &dyn IndexAccessor,
        payload: &IndexPayload,
    ) -> TroveResult<Option<ObjKey>> {
        Ok(match self.find_all_no_copy(arena, acc, payload)? {
            FindResult::NotFound => None,
            FindResult::Single(k) => Some(k),
            FindResult::Column { list_ref, start, .. } => {
                Some(ObjKey(Array::from_ref(list_ref).get(arena, start)))
            }
        })
    }

    /// Locates matches without copying leaf lists.
    pub fn find_all_no_copy(
        &self,
        arena: &Arena,
        acc: &dyn IndexAccessor,
        payload: &IndexPayload,
    ) -> TroveResult<FindResult> {
        find_recurse(arena, acc, self.root, payload, 0)
    }

    pub fn count(
        &self,
        arena: &Arena,
        acc: &dyn IndexAccessor,
        payload: &IndexPayload,
    ) -> TroveResult<usize> {
        Ok(self.find_all_no_copy(arena, acc, payload)?.count())
    }

    /// All keys holding `payload`, ascending. With `case_insensitive`,
    /// string payloads match under case folding.
    pub fn find_all(
        &self,
        arena: &Arena,
        acc: &dyn IndexAccessor,
        payload: &IndexPayload,
        case_insensitive: bool,
    ) -> TroveResult<Vec<ObjKey>> {
        if case_insensitive {
            if let IndexPayload::String(s) = payload {
                return self.find_all_case_insensitive(arena, acc, s);
            }
        }
        let mut keys = self.find_all_no_copy(arena, acc, payload)?.to_keys(arena);
        keys.sort_unstable();
        Ok(keys)
    }

    fn find_all_case_insensitive(
        &self,
        arena: &Arena,
        acc: &dyn IndexAccessor,
        value: &str,
    ) -> TroveResult<Vec<ObjKey>> {
        let upper = IndexPayload::String(value.to_uppercase());
        let lower = IndexPayload::String(value.to_lowercase());
        let target = IndexPayload::String(value.to_string());
        let mut out = Vec::new();
        ci_recurse(arena, acc, self.root, &upper, &lower, &target, 0, &mut out)?;
        out.sort_unstable();
        out.dedup();
        Ok(out)
    }

    /// All keys whose value lies in `[lo, hi]` (inclusive bounds).
    pub fn find_all_range(
        &self,
        arena: &Arena,
        acc: &dyn IndexAccessor,
        lo: &IndexPayload,
        hi: &IndexPayload,
    ) -> TroveResult<Vec<ObjKey>> {
        let mut out = Vec::new();
        range_recurse(arena, acc, self.root, lo, hi, 0, &mut out)?;
        out.sort_unstable();
        Ok(out)
    }

    /// One object key per distinct value, in traversal (value) order.
    pub fn distinct(&self, arena: &Arena, acc: &dyn IndexAccessor) -> TroveResult<Vec<ObjKey>> {
        let mut out = Vec::new();
        distinct_recurse(arena, acc, self.root, &mut out)?;
        Ok(out)
    }

    /// Whether any value is held by more than one key.
    pub fn has_duplicates(&self, arena: &Arena, acc: &dyn IndexAccessor) -> TroveResult<bool> {
        dup_recurse(arena, acc, self.root)
    }

    /// Releases the whole index, leaving an empty root.
    pub fn clear(&mut self, arena: &mut Arena) -> TroveResult<()> {
        destroy_node(arena, self.root);
        self.root = new_leaf_node(arena)?;
        Ok(())
    }

    pub fn destroy(self, arena: &mut Arena) {
        destroy_node(arena, self.root);
    }

    /// Asserts that every reachable key still resolves to its indexed
    /// value and that leaf lists are sorted. Debug aid; O(n) traversal.
    pub fn verify(&self, arena: &Arena, acc: &dyn IndexAccessor) -> TroveResult<()> {
        verify_recurse(arena, acc, self.root, 0)
    }
}

fn new_leaf_node(arena: &mut Arena) -> TroveResult<Ref> {
    let mut node = Array::create(arena, ArrayKind::IndexNode)?;
    let keys = Array::create(arena, ArrayKind::Normal)?;
    node.add(arena, keys.ref_() as i64)?;
    Ok(node.ref_())
}

fn keys_of(arena: &Arena, node: &Array) -> Array {
    Array::from_ref(node.get(arena, 0) as Ref)
}

fn is_sub_index(arena: &Arena, r: Ref) -> bool {
    Array::from_ref(r).context_flag(arena)
}

/// Last chunk key of the subtree rooted at `r` (for inner-node keys).
fn node_last_key(arena: &Arena, r: Ref) -> i64 {
    let node = Array::from_ref(r);
    let keys = keys_of(arena, &node);
    let n = keys.size(arena);
    keys.get(arena, n - 1)
}

/// Inserts at a trie level, absorbing any root-level split.
fn insert_level(
    arena: &mut Arena,
    acc: &dyn IndexAccessor,
    root: Ref,
    key: ObjKey,
    payload: &IndexPayload,
    offset: usize,
) -> TroveResult<Ref> {
    let (now, change) = insert_recurse(arena, acc, root, key, payload, offset)?;
    match change {
        NodeChange::None => Ok(now),
        NodeChange::Split(left, right) => {
            let mut node = Array::create_with_capacity(arena, ArrayKind::IndexInnerNode, 3)?;
            let mut keys = Array::create(arena, ArrayKind::Normal)?;
            keys.add(arena, node_last_key(arena, left))?;
            keys.add(arena, node_last_key(arena, right))?;
            node.add(arena, keys.ref_() as i64)?;
            node.add(arena, left as i64)?;
            node.add(arena, right as i64)?;
            Ok(node.ref_())
        }
        // Index nodes only report midpoint splits.
        NodeChange::InsertBefore(_) | NodeChange::InsertAfter(_) => unreachable!(),
    }
}

fn insert_recurse(
    arena: &mut Arena,
    acc: &dyn IndexAccessor,
    node_ref: Ref,
    key: ObjKey,
    payload: &IndexPayload,
    offset: usize,
) -> TroveResult<(Ref, NodeChange)> {
    let mut node = Array::from_ref(node_ref);
    let mut keys = keys_of(arena, &node);

    if node.is_inner_node(arena) {
        let chunk = chunk_at(payload, offset) as i64;
        let n = keys.size(arena);
        let idx = keys.lower_bound(arena, chunk).min(n - 1);
        let child_ref = node.get(arena, idx + 1) as Ref;
        let (child_now, change) = insert_recurse(arena, acc, child_ref, key, payload, offset)?;
        if child_now != child_ref {
            node.set(arena, idx + 1, child_now as i64)?;
        }
        match change {
            NodeChange::None => {
                keys.set(arena, idx, node_last_key(arena, child_now))?;
                node.set(arena, 0, keys.ref_() as i64)?;
                return Ok((node.ref_(), NodeChange::None));
            }
            NodeChange::Split(left, right) => {
                keys.set(arena, idx, node_last_key(arena, left))?;
                keys.insert(arena, idx + 1, node_last_key(arena, right))?;
                node.set(arena, idx + 1, left as i64)?;
                node.insert(arena, idx + 2, right as i64)?;
                node.set(arena, 0, keys.ref_() as i64)?;
                return split_if_needed(arena, node, keys, ArrayKind::IndexInnerNode);
            }
            NodeChange::InsertBefore(_) | NodeChange::InsertAfter(_) => unreachable!(),
        }
    }

    // Leaf node.
    let chunk = chunk_at(payload, offset) as i64;
    let n = keys.size(arena);
    let pos = keys.lower_bound(arena, chunk);

    if pos == n || keys.get(arena, pos) != chunk {
        keys.insert(arena, pos, chunk)?;
        node.insert(arena, pos + 1, tag_literal(key.0))?;
        node.set(arena, 0, keys.ref_() as i64)?;
        return split_if_needed(arena, node, keys, ArrayKind::IndexNode);
    }

    // The chunk key is present; resolve the collision on the full value.
    let slot = node.get(arena, pos + 1);
    let suboffset = offset + INDEX_KEY_LENGTH;

    if is_literal(slot) {
        let row2 = ObjKey(untag_literal(slot));
        if row2 == key {
            // Idempotent re-insert of the same pair.
            return Ok((node.ref_(), NodeChange::None));
        }
        let payload2 = acc.payload(arena, row2)?;
        let new_slot = if payload2.cmp_payload(payload) == Ordering::Equal {
            // Equal values: convert to a duplicate list, keys ascending.
            let mut list = Array::create(arena, ArrayKind::Normal)?;
            let (a, b) = if key.0 < row2.0 {
                (key.0, row2.0)
            } else {
                (row2.0, key.0)
            };
            list.add(arena, a)?;
            list.add(arena, b)?;
            list.ref_()
        } else if suboffset > MAX_OFFSET {
            // Shared prefix but the offset budget is spent: terminal
            // list sorted by (value, key).
            let mut list = Array::create(arena, ArrayKind::Normal)?;
            let first_new = payload.cmp_payload(&payload2) == Ordering::Less;
            if first_new {
                list.add(arena, key.0)?;
                list.add(arena, row2.0)?;
            } else {
                list.add(arena, row2.0)?;
                list.add(arena, key.0)?;
            }
            list.ref_()
        } else {
            // Extend the trie until the prefixes differ.
            let mut sub = new_leaf_node(arena)?;
            sub = insert_level(arena, acc, sub, row2, &payload2, suboffset)?;
            sub = insert_level(arena, acc, sub, key, payload, suboffset)?;
            sub
        };
        node.set(arena, pos + 1, new_slot as i64)?;
        return Ok((node.ref_(), NodeChange::None));
    }

    let target = slot as Ref;
    if is_sub_index(arena, target) {
        let new_sub = insert_level(arena, acc, target, key, payload, suboffset)?;
        if new_sub != target {
            node.set(arena, pos + 1, new_sub as i64)?;
        }
        return Ok((node.ref_(), NodeChange::None));
    }

    // Existing list of rows sharing this prefix.
    let mut list = Array::from_ref(target);
    let size = list.size(arena);

    // Amortized append: a matching tail means the new pair sorts last.
    let last_row = ObjKey(list.get(arena, size - 1));
    let last_payload = acc.payload(arena, last_row)?;
    let cmp_last = match last_payload.cmp_payload(payload) {
        Ordering::Equal => last_row.0.cmp(&key.0),
        other => other,
    };
    if cmp_last == Ordering::Less {
        if last_payload.cmp_payload(payload) != Ordering::Equal && suboffset <= MAX_OFFSET {
            // Distinct value with budget left: promote below instead.
        } else {
            list.add(arena, key.0)?;
            node.set(arena, pos + 1, list.ref_() as i64)?;
            return Ok((node.ref_(), NodeChange::None));
        }
    }

    let (lower, upper) = list_payload_bounds(arena, acc, &list, payload)?;
    if lower < upper {
        // Value already present: insert the key into its run.
        let mut at = lower;
        while at < upper && list.get(arena, at) < key.0 {
            at += 1;
        }
        if at < upper && list.get(arena, at) == key.0 {
            return Ok((node.ref_(), NodeChange::None)); // idempotent
        }
        list.insert(arena, at, key.0)?;
        node.set(arena, pos + 1, list.ref_() as i64)?;
        return Ok((node.ref_(), NodeChange::None));
    }

    if suboffset > MAX_OFFSET {
        // Terminal list: keep (value, key) order.
        list.insert(arena, lower, key.0)?;
        node.set(arena, pos + 1, list.ref_() as i64)?;
        return Ok((node.ref_(), NodeChange::None));
    }

    // The list holds only duplicates of some other value; branch into a
    // sub-index re-using the list as one leaf entry.
    let row_of_dup = ObjKey(list.get(arena, 0));
    let payload2 = acc.payload(arena, row_of_dup)?;
    let mut sub_node = Array::create(arena, ArrayKind::IndexNode)?;
    let mut sub_keys = Array::create(arena, ArrayKind::Normal)?;
    sub_keys.add(arena, chunk_at(&payload2, suboffset) as i64)?;
    sub_node.add(arena, sub_keys.ref_() as i64)?;
    sub_node.add(arena, list.ref_() as i64)?;
    let sub = insert_level(arena, acc, sub_node.ref_(), key, payload, suboffset)?;
    node.set(arena, pos + 1, sub as i64)?;
    Ok((node.ref_(), NodeChange::None))
}

/// Splits an over-full index node at its midpoint.
fn split_if_needed(
    arena: &mut Arena,
    mut node: Array,
    mut keys: Array,
    kind: ArrayKind,
) -> TroveResult<(Ref, NodeChange)> {
    let n = keys.size(arena);
    node.set(arena, 0, keys.ref_() as i64)?;
    if n <= INDEX_NODE_SIZE {
        return Ok((node.ref_(), NodeChange::None));
    }
    let mid = n / 2;
    let mut rnode = Array::create_with_capacity(arena, kind, n - mid + 1)?;
    let mut rkeys = Array::create(arena, ArrayKind::Normal)?;
    for i in mid..n {
        rkeys.add(arena, keys.get(arena, i))?;
    }
    rnode.add(arena, rkeys.ref_() as i64)?;
    for i in mid..n {
        rnode.add(arena, node.get(arena, i + 1))?;
    }
    keys.truncate(arena, mid)?;
    node.truncate(arena, mid + 1)?;
    node.set(arena, 0, keys.ref_() as i64)?;
    Ok((node.ref_(), NodeChange::Split(node.ref_(), rnode.ref_())))
}

/// Binary search bounds of the equal-`payload` run in a sorted list.
fn list_payload_bounds(
    arena: &Arena,
    acc: &dyn IndexAccessor,
    list: &Array,
    payload: &IndexPayload,
) -> TroveResult<(usize, usize)> {
    let n = list.size(arena);
    let mut lo = 0usize;
    let mut hi = n;
    while lo < hi {
        let mid = (lo + hi) / 2;
        let p = acc.payload(arena, ObjKey(list.get(arena, mid)))?;
        if p.cmp_payload(payload) == Ordering::Less {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    let start = lo;
    hi = n;
    while lo < hi {
        let mid = (lo + hi) / 2;
        let p = acc.payload(arena, ObjKey(list.get(arena, mid)))?;
        if p.cmp_payload(payload) == Ordering::Greater {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    Ok((start, lo))
}

fn find_recurse(
    arena: &Arena,
    acc: &dyn IndexAccessor,
    node_ref: Ref,
    payload: &IndexPayload,
    offset: usize,
) -> TroveResult<FindResult> {
    let node = Array::from_ref(node_ref);
    let keys = keys_of(arena, &node);
    let chunk = chunk_at(payload, offset) as i64;
    let n = keys.size(arena);

    if node.is_inner_node(arena) {
        let idx = keys.lower_bound(arena, chunk);
        if idx >= n {
            return Ok(FindResult::NotFound);
        }
        return find_recurse(arena, acc, node.get(arena, idx + 1) as Ref, payload, offset);
    }

    let pos = keys.lower_bound(arena, chunk);
    if pos >= n || keys.get(arena, pos) != chunk {
        return Ok(FindResult::NotFound);
    }
    let slot = node.get(arena, pos + 1);
    if is_literal(slot) {
        let row = ObjKey(untag_literal(slot));
        let stored = acc.payload(arena, row)?;
        return Ok(if stored.cmp_payload(payload) == Ordering::Equal {
            FindResult::Single(row)
        } else {
            FindResult::NotFound
        });
    }
    let target = slot as Ref;
    if is_sub_index(arena, target) {
        return find_recurse(arena, acc, target, payload, offset + INDEX_KEY_LENGTH);
    }
    let list = Array::from_ref(target);
    let (start, end) = list_payload_bounds(arena, acc, &list, payload)?;
    Ok(if start == end {
        FindResult::NotFound
    } else {
        FindResult::Column {
            list_ref: target,
            start,
            end,
        }
    })
}

fn erase_recurse(
    arena: &mut Arena,
    acc: &dyn IndexAccessor,
    node_ref: Ref,
    key: ObjKey,
    payload: &IndexPayload,
    offset: usize,
) -> TroveResult<(Ref, bool)> {
    let mut node = Array::from_ref(node_ref);
    let mut keys = keys_of(arena, &node);
    let chunk = chunk_at(payload, offset) as i64;
    let n = keys.size(arena);

    if node.is_inner_node(arena) {
        let idx = keys.lower_bound(arena, chunk);
        if idx >= n {
            return Ok((node_ref, false)); // no-op on missing key
        }
        let child_ref = node.get(arena, idx + 1) as Ref;
        let (child_now, child_empty) =
            erase_recurse(arena, acc, child_ref, key, payload, offset)?;
        if child_empty {
            destroy_node(arena, child_now);
            keys.erase(arena, idx)?;
            node.erase(arena, idx + 1)?;
            node.set(arena, 0, keys.ref_() as i64)?;
            return Ok((node.ref_(), keys.size(arena) == 0));
        }
        if child_now != child_ref {
            node.set(arena, idx + 1, child_now as i64)?;
        }
        keys.set(arena, idx, node_last_key(arena, child_now))?;
        node.set(arena, 0, keys.ref_() as i64)?;
        return Ok((node.ref_(), false));
    }

    let pos = keys.lower_bound(arena, chunk);
    if pos >= n || keys.get(arena, pos) != chunk {
        return Ok((node_ref, false));
    }
    let slot = node.get(arena, pos + 1);
    let suboffset = offset + INDEX_KEY_LENGTH;

    if is_literal(slot) {
        if untag_literal(slot) == key.0 {
            keys.erase(arena, pos)?;
            node.erase(arena, pos + 1)?;
            node.set(arena, 0, keys.ref_() as i64)?;
        }
        return Ok((node.ref_(), keys.size(arena) == 0));
    }

    let target = slot as Ref;
    if is_sub_index(arena, target) {
        let (sub_now, sub_empty) = erase_recurse(arena, acc, target, key, payload, suboffset)?;
        if sub_empty {
            destroy_node(arena, sub_now);
            keys.erase(arena, pos)?;
            node.erase(arena, pos + 1)?;
            node.set(arena, 0, keys.ref_() as i64)?;
            return Ok((node.ref_(), keys.size(arena) == 0));
        }
        // Collapse a sub-index reduced to a single literal entry.
        let sub = Array::from_ref(sub_now);
        if !sub.is_inner_node(arena) {
            let sub_keys = keys_of(arena, &sub);
            if sub_keys.size(arena) == 1 {
                let only = sub.get(arena, 1);
                if is_literal(only) {
                    sub_keys.destroy(arena);
                    sub.destroy(arena);
                    node.set(arena, pos + 1, only)?;
                    return Ok((node.ref_(), false));
                }
            }
        }
        if sub_now != target {
            node.set(arena, pos + 1, sub_now as i64)?;
        }
        return Ok((node.ref_(), false));
    }

    let mut list = Array::from_ref(target);
    let (start, end) = list_payload_bounds(arena, acc, &list, payload)?;
    let mut at = start;
    while at < end && list.get(arena, at) != key.0 {
        at += 1;
    }
    if at == end {
        return Ok((node.ref_(), false));
    }
    list.erase(arena, at)?;
    match list.size(arena) {
        0 => {
            list.destroy(arena);
            keys.erase(arena, pos)?;
            node.erase(arena, pos + 1)?;
            node.set(arena, 0, keys.ref_() as i64)?;
            Ok((node.ref_(), keys.size(arena) == 0))
        }
        1 => {
            let last = list.get(arena, 0);
            list.destroy(arena);
            node.set(arena, pos + 1, tag_literal(last))?;
            Ok((node.ref_(), false))
        }
        _ => {
            node.set(arena, pos + 1, list.ref_() as i64)?;
            Ok((node.ref_(), false))
        }
    }
}

fn ci_chunk(upper: u32, lower: u32, permutation: u32) -> u32 {
    let mut key = 0u32;
    for byte in 0..INDEX_KEY_LENGTH as u32 {
        let shift = byte * 8;
        let source = if permutation & (1 << byte) != 0 {
            upper
        } else {
            lower
        };
        key |= source & (0xFF << shift);
    }
    key
}

/// Descends to the leaf entry for `chunk`, if present.
fn find_entry(arena: &Arena, node_ref: Ref, chunk: i64) -> Option<i64> {
    let node = Array::from_ref(node_ref);
    let keys = keys_of(arena, &node);
    let n = keys.size(arena);
    let idx = keys.lower_bound(arena, chunk);
    if node.is_inner_node(arena) {
        if idx >= n {
            return None;
        }
        return find_entry(arena, node.get(arena, idx + 1) as Ref, chunk);
    }
    if idx >= n || keys.get(arena, idx) != chunk {
        return None;
    }
    Some(node.get(arena, idx + 1))
}

#[allow(clippy::too_many_arguments)]
fn ci_recurse(
    arena: &Arena,
    acc: &dyn IndexAccessor,
    node_ref: Ref,
    upper: &IndexPayload,
    lower: &IndexPayload,
    target: &IndexPayload,
    offset: usize,
    out: &mut Vec<ObjKey>,
) -> TroveResult<()> {
    let upper_key = chunk_at(upper, offset);
    let lower_key = chunk_at(lower, offset);
    let mut seen: Vec<u32> = Vec::with_capacity(NUM_CI_PERMUTATIONS as usize);

    for p in 0..NUM_CI_PERMUTATIONS {
        let chunk = ci_chunk(upper_key, lower_key, p);
        if seen.contains(&chunk) {
            continue;
        }
        seen.push(chunk);
        let slot = match find_entry(arena, node_ref, chunk as i64) {
            Some(s) => s,
            None => continue,
        };
        if is_literal(slot) {
            let row = ObjKey(untag_literal(slot));
            let stored = acc.payload(arena, row)?;
            if stored.eq_case_insensitive(target) {
                out.push(row);
            }
            continue;
        }
        let r = slot as Ref;
        if is_sub_index(arena, r) {
            ci_recurse(
                arena,
                acc,
                r,
                upper,
                lower,
                target,
                offset + INDEX_KEY_LENGTH,
                out,
            )?;
        } else {
            // Lists are ordered case-sensitively; every row is checked
            // with the full case-fold compare.
            let list = Array::from_ref(r);
            for i in 0..list.size(arena) {
                let row = ObjKey(list.get(arena, i));
                let stored = acc.payload(arena, row)?;
                if stored.eq_case_insensitive(target) {
                    out.push(row);
                }
            }
        }
    }
    Ok(())
}

fn range_recurse(
    arena: &Arena,
    acc: &dyn IndexAccessor,
    node_ref: Ref,
    lo: &IndexPayload,
    hi: &IndexPayload,
    offset: usize,
    out: &mut Vec<ObjKey>,
) -> TroveResult<()> {
    let node = Array::from_ref(node_ref);
    let keys = keys_of(arena, &node);
    let n = keys.size(arena);
    let lo_chunk = chunk_at(lo, offset) as i64;
    let hi_chunk = chunk_at(hi, offset) as i64;

    if node.is_inner_node(arena) {
        for i in 0..n {
            if keys.get(arena, i) < lo_chunk {
                continue;
            }
            range_recurse(arena, acc, node.get(arena, i + 1) as Ref, lo, hi, offset, out)?;
            // Children are keyed by their last chunk; once one reaches
            // past the high bound the rest cannot match.
            if keys.get(arena, i) > hi_chunk {
                break;
            }
        }
        return Ok(());
    }

    let start = keys.lower_bound(arena, lo_chunk);
    for pos in start..n {
        let chunk = keys.get(arena, pos);
        if chunk > hi_chunk {
            break;
        }
        let slot = node.get(arena, pos + 1);
        if is_literal(slot) {
            let row = ObjKey(untag_literal(slot));
            let stored = acc.payload(arena, row)?;
            if stored.cmp_payload(lo) != Ordering::Less && stored.cmp_payload(hi) != Ordering::Greater
            {
                out.push(row);
            }
            continue;
        }
        let r = slot as Ref;
        if is_sub_index(arena, r) {
            range_recurse(arena, acc, r, lo, hi, offset + INDEX_KEY_LENGTH, out)?;
        } else {
            let list = Array::from_ref(r);
            for i in 0..list.size(arena) {
                let row = ObjKey(list.get(arena, i));
                let stored = acc.payload(arena, row)?;
                if stored.cmp_payload(lo) != Ordering::Less
                    && stored.cmp_payload(hi) != Ordering::Greater
                {
                    out.push(row);
                }
            }
        }
    }
    Ok(())
}

fn distinct_recurse(
    arena: &Arena,
    acc: &dyn IndexAccessor,
    node_ref: Ref,
    out: &mut Vec<ObjKey>,
) -> TroveResult<()> {
    let node = Array::from_ref(node_ref);
    let keys = keys_of(arena, &node);
    let n = keys.size(arena);

    if node.is_inner_node(arena) {
        for i in 0..n {
            distinct_recurse(arena, acc, node.get(arena, i + 1) as Ref, out)?;
        }
        return Ok(());
    }

    for pos in 0..n {
        let slot = node.get(arena, pos + 1);
        if is_literal(slot) {
            out.push(ObjKey(untag_literal(slot)));
            continue;
        }
        let r = slot as Ref;
        if is_sub_index(arena, r) {
            distinct_recurse(arena, acc, r, out)?;
        } else {
            // First key of each distinct value run.
            let list = Array::from_ref(r);
            let mut prev: Option<IndexPayload> = None;
            for i in 0..list.size(arena) {
                let row = ObjKey(list.get(arena, i));
                let p = acc.payload(arena, row)?;
                let fresh = match &prev {
                    None => true,
                    Some(q) => q.cmp_payload(&p) != Ordering::Equal,
                };
                if fresh {
                    out.push(row);
                    prev = Some(p);
                }
            }
        }
    }
    Ok(())
}

fn dup_recurse(arena: &Arena, acc: &dyn IndexAccessor, node_ref: Ref) -> TroveResult<bool> {
    let node = Array::from_ref(node_ref);
    let keys = keys_of(arena, &node);
    let n = keys.size(arena);

    if node.is_inner_node(arena) {
        for i in 0..n {
            if dup_recurse(arena, acc, node.get(arena, i + 1) as Ref)? {
                return Ok(true);
            }
        }
        return Ok(false);
    }

    for pos in 0..n {
        let slot = node.get(arena, pos + 1);
        if is_literal(slot) {
            continue;
        }
        let r = slot as Ref;
        if is_sub_index(arena, r) {
            if dup_recurse(arena, acc, r)? {
                return Ok(true);
            }
        } else {
            let list = Array::from_ref(r);
            let size = list.size(arena);
            let mut prev = acc.payload(arena, ObjKey(list.get(arena, 0)))?;
            for i in 1..size {
                let p = acc.payload(arena, ObjKey(list.get(arena, i)))?;
                if prev.cmp_payload(&p) == Ordering::Equal {
                    return Ok(true);
                }
                prev = p;
            }
        }
    }
    Ok(false)
}

fn verify_recurse(
    arena: &Arena,
    acc: &dyn IndexAccessor,
    node_ref: Ref,
    offset: usize,
) -> TroveResult<()> {
    let node = Array::from_ref(node_ref);
    let keys = keys_of(arena, &node);
    let n = keys.size(arena);
    let corrupt = |reason: String| TroveError::Corrupted { reason };

    // Chunk keys strictly ascending; one slot per key plus the keys slot.
    if node.size(arena) != n + 1 {
        return Err(corrupt("index node slot/key count mismatch".to_string()));
    }
    for i in 1..n {
        if keys.get(arena, i - 1) >= keys.get(arena, i) {
            return Err(corrupt("index chunk keys not ascending".to_string()));
        }
    }

    if node.is_inner_node(arena) {
        for i in 0..n {
            verify_recurse(arena, acc, node.get(arena, i + 1) as Ref, offset)?;
        }
        return Ok(());
    }

    for pos in 0..n {
        let chunk = keys.get(arena, pos) as u32;
        let slot = node.get(arena, pos + 1);
        if is_literal(slot) {
            let row = ObjKey(untag_literal(slot));
            let p = acc.payload(arena, row)?;
            if chunk_at(&p, offset) != chunk {
                return Err(corrupt(format!("row {} chunk mismatch", row)));
            }
        } else if is_sub_index(arena, slot as Ref) {
            verify_recurse(arena, acc, slot as Ref, offset + INDEX_KEY_LENGTH)?;
        } else {
            let list = Array::from_ref(slot as Ref);
            let mut prev: Option<(IndexPayload, i64)> = None;
            for i in 0..list.size(arena) {
                let row = list.get(arena, i);
                let p = acc.payload(arena, ObjKey(row))?;
                if chunk_at(&p, offset) != chunk {
                    return Err(corrupt(format!("row {} list chunk mismatch", row)));
                }
                if let Some((pp, pk)) = &prev {
                    let ord = pp.cmp_payload(&p).then(pk.cmp(&row));
                    if ord != Ordering::Less {
                        return Err(corrupt("index list not sorted".to_string()));
                    }
                }
                prev = Some((p, row));
            }
        }
    }
    Ok(())
}

fn destroy_node(arena: &mut Arena, node_ref: Ref) {
    let node = Array::from_ref(node_ref);
    let n = node.size(arena);
    for i in 1..n {
        let slot = node.get(arena, i);
        if slot == 0 || is_literal(slot) {
            continue;
        }
        let r = slot as Ref;
        if is_sub_index(arena, r) || node.is_inner_node(arena) {
            destroy_node(arena, r);
        } else {
            Array::from_ref(r).destroy(arena);
        }
    }
    keys_of(arena, &node).destroy(arena);
    node.destroy(arena);
}
