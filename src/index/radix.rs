// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Radix-tree index over 64-bit integer columns.
//!
//! Values are canonicalized by flipping the sign bit and consumed W bits
//! at a time from the most significant end (W is configured in
//! `DbOptions`, range 4..=10). Node layout matches the trie: sorted chunk
//! keys in slot 0, entries in the remaining slots.
//!
//! The compact-representation threshold T keeps any subtree with at most
//! T entries as one flat list sorted by (value, key); the list fans out
//! into a node only on overflow. A list of pure duplicates never fans
//! out, since no chunk can separate equal values, and keys sharing all 64
//! bits are duplicates by construction.
//!
//! Null rows live in a dedicated slot beside the tree so the integer
//! chunk space stays unambiguous.

use super::{FindResult, IndexAccessor, IndexPayload, INDEX_NODE_SIZE};
use crate::alloc::{Arena, Ref};
use crate::array::{is_literal, tag_literal, untag_literal, Array, ArrayKind};
use crate::cluster::tree::NodeChange;
use crate::error::{TroveError, TroveResult};
use crate::keys::ObjKey;
use std::cmp::Ordering;

/// Sign-flipped canonical form of an indexed integer.
fn canon_of(payload: &IndexPayload) -> Option<u64> {
    match payload {
        IndexPayload::Null => None,
        other => {
            let bytes = other.bytes();
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[..8]);
            Some(u64::from_be_bytes(raw))
        }
    }
}

/// W-bit chunk at `level`, MSB-first. Levels past the value width yield 0.
fn chunk_at_level(canon: u64, width: u8, level: usize) -> u32 {
    let consumed = width as usize * level;
    if consumed >= 64 {
        return 0;
    }
    ((canon << consumed) >> (64 - width as usize)) as u32
}

/// Levels after which two distinct values must have diverged.
fn max_levels(width: u8) -> usize {
    (64 + width as usize - 1) / width as usize
}

/// Radix search index for integer payloads.
#[derive(Debug, Clone, Copy)]
pub struct RadixTree {
    /// Wrapper array: slot 0 = tree root node, slot 1 = null-row slot.
    root: Ref,
    width: u8,
    threshold: usize,
}

impl RadixTree {
    pub fn create(arena: &mut Arena, width: u8, threshold: usize) -> TroveResult<RadixTree> {
        let tree = new_node(arena)?;
        let mut wrapper = Array::create_with_capacity(arena, ArrayKind::HasRefs, 2)?;
        wrapper.add(arena, tree as i64)?;
        wrapper.add(arena, 0)?;
        Ok(RadixTree {
            root: wrapper.ref_(),
            width,
            threshold,
        })
    }

    pub fn from_ref(root: Ref, width: u8, threshold: usize) -> RadixTree {
        RadixTree {
            root,
            width,
            threshold,
        }
    }

    pub fn root_ref(&self) -> Ref {
        self.root
    }

    fn tree_root(&self, arena: &Arena) -> Ref {
        Array::from_ref(self.root).get(arena, 0) as Ref
    }

    fn set_tree_root(&self, arena: &mut Arena, r: Ref) -> TroveResult<()> {
        Array::from_ref(self.root).set(arena, 0, r as i64)
    }

    pub fn is_empty(&self, arena: &Arena) -> bool {
        let tree = Array::from_ref(self.tree_root(arena));
        let keys = Array::from_ref(tree.get(arena, 0) as Ref);
        keys.size(arena) == 0 && Array::from_ref(self.root).get(arena, 1) == 0
    }

    /// Inserts (key, value). Idempotent for present pairs.
    pub fn insert(
        &mut self,
        arena: &mut Arena,
        acc: &dyn IndexAccessor,
        key: ObjKey,
        payload: &IndexPayload,
    ) -> TroveResult<()> {
        let canon = match canon_of(payload) {
            Some(c) => c,
            None => return self.null_insert(arena, key),
        };
        let ctx = Ctx {
            width: self.width,
            threshold: self.threshold,
        };
        let root = self.tree_root(arena);
        let new_root = insert_level(arena, acc, &ctx, root, key, canon, 0)?;
        if new_root != root {
            self.set_tree_root(arena, new_root)?;
        }
        Ok(())
    }

    /// Removes (key, value); a no-op for absent pairs.
    pub fn erase(
        &mut self,
        arena: &mut Arena,
        acc: &dyn IndexAccessor,
        key: ObjKey,
        payload: &IndexPayload,
    ) -> TroveResult<()> {
        let canon = match canon_of(payload) {
            Some(c) => c,
            None => return self.null_erase(arena, key),
        };
        let ctx = Ctx {
            width: self.width,
            threshold: self.threshold,
        };
        let root = self.tree_root(arena);
        let (mut now, _) = erase_recurse(arena, acc, &ctx, root, key, canon, 0)?;
        // Collapse a single-child inner chain at the root.
        loop {
            let node = Array::from_ref(now);
            if !node.is_inner_node(arena) {
                break;
            }
            let keys = Array::from_ref(node.get(arena, 0) as Ref);
            if keys.size(arena) != 1 {
                break;
            }
            let child = node.get(arena, 1) as Ref;
            keys.destroy(arena);
            node.destroy(arena);
            now = child;
        }
        if now != root {
            self.set_tree_root(arena, now)?;
        }
        Ok(())
    }

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

    pub fn find_all_no_copy(
        &self,
        arena: &Arena,
        acc: &dyn IndexAccessor,
        payload: &IndexPayload,
    ) -> TroveResult<FindResult> {
        let canon = match canon_of(payload) {
            Some(c) => c,
            None => {
                let slot = Array::from_ref(self.root).get(arena, 1);
                return Ok(if slot == 0 {
                    FindResult::NotFound
                } else if is_literal(slot) {
                    FindResult::Single(ObjKey(untag_literal(slot)))
                } else {
                    let list = Array::from_ref(slot as Ref);
                    FindResult::Column {
                        list_ref: slot as Ref,
                        start: 0,
                        end: list.size(arena),
                    }
                });
            }
        };
        find_recurse(arena, acc, self.width, self.tree_root(arena), canon, 0)
    }

    pub fn count(
        &self,
        arena: &Arena,
        acc: &dyn IndexAccessor,
        payload: &IndexPayload,
    ) -> TroveResult<usize> {
        Ok(self.find_all_no_copy(arena, acc, payload)?.count())
    }

    /// All keys holding `payload`, ascending. Integer payloads have no
    /// case dimension, so the flag only changes string behavior upstream.
    pub fn find_all(
        &self,
        arena: &Arena,
        acc: &dyn IndexAccessor,
        payload: &IndexPayload,
        _case_insensitive: bool,
    ) -> TroveResult<Vec<ObjKey>> {
        let mut keys = self.find_all_no_copy(arena, acc, payload)?.to_keys(arena);
        keys.sort_unstable();
        Ok(keys)
    }

    /// All keys whose value lies in `[lo, hi]`, null excluded.
    pub fn find_all_range(
        &self,
        arena: &Arena,
        acc: &dyn IndexAccessor,
        lo: &IndexPayload,
        hi: &IndexPayload,
    ) -> TroveResult<Vec<ObjKey>> {
        let (lo_c, hi_c) = match (canon_of(lo), canon_of(hi)) {
            (Some(a), Some(b)) => (a, b),
            _ => return Ok(Vec::new()),
        };
        let mut out = Vec::new();
        range_recurse(
            arena,
            acc,
            self.width,
            self.tree_root(arena),
            lo_c,
            hi_c,
            0,
            &mut out,
        )?;
        out.sort_unstable();
        Ok(out)
    }

    /// One key per distinct value (nulls contribute their first key).
    pub fn distinct(&self, arena: &Arena, acc: &dyn IndexAccessor) -> TroveResult<Vec<ObjKey>> {
        let mut out = Vec::new();
        let null_slot = Array::from_ref(self.root).get(arena, 1);
        if null_slot != 0 {
            if is_literal(null_slot) {
                out.push(ObjKey(untag_literal(null_slot)));
            } else {
                out.push(ObjKey(Array::from_ref(null_slot as Ref).get(arena, 0)));
            }
        }
        distinct_recurse(arena, acc, self.tree_root(arena), &mut out)?;
        Ok(out)
    }

    pub fn has_duplicates(&self, arena: &Arena, acc: &dyn IndexAccessor) -> TroveResult<bool> {
        let null_slot = Array::from_ref(self.root).get(arena, 1);
        if null_slot != 0 && !is_literal(null_slot) {
            return Ok(true);
        }
        dup_recurse(arena, acc, self.tree_root(arena))
    }

    pub fn clear(&mut self, arena: &mut Arena) -> TroveResult<()> {
        destroy_tree(arena, self.tree_root(arena));
        let fresh = new_node(arena)?;
        self.set_tree_root(arena, fresh)?;
        let wrapper = Array::from_ref(self.root);
        let null_slot = wrapper.get(arena, 1);
        if null_slot != 0 && !is_literal(null_slot) {
            Array::from_ref(null_slot as Ref).destroy(arena);
        }
        Array::from_ref(self.root).set(arena, 1, 0)?;
        Ok(())
    }

    pub fn destroy(self, arena: &mut Arena) {
        destroy_tree(arena, self.tree_root(arena));
        let wrapper = Array::from_ref(self.root);
        let null_slot = wrapper.get(arena, 1);
        if null_slot != 0 && !is_literal(null_slot) {
            Array::from_ref(null_slot as Ref).destroy(arena);
        }
        wrapper.destroy(arena);
    }

    /// Debug traversal asserting sortedness and value agreement.
    pub fn verify(&self, arena: &Arena, acc: &dyn IndexAccessor) -> TroveResult<()> {
        verify_recurse(arena, acc, self.width, self.tree_root(arena), 0)
    }

    fn null_insert(&mut self, arena: &mut Arena, key: ObjKey) -> TroveResult<()> {
        let mut wrapper = Array::from_ref(self.root);
        let slot = wrapper.get(arena, 1);
        if slot == 0 {
            wrapper.set(arena, 1, tag_literal(key.0))?;
        } else if is_literal(slot) {
            let existing = untag_literal(slot);
            if existing != key.0 {
                let mut list = Array::create(arena, ArrayKind::Normal)?;
                let (a, b) = if existing < key.0 {
                    (existing, key.0)
                } else {
                    (key.0, existing)
                };
                list.add(arena, a)?;
                list.add(arena, b)?;
                wrapper.set(arena, 1, list.ref_() as i64)?;
            }
        } else {
            let mut list = Array::from_ref(slot as Ref);
            let pos = list.lower_bound(arena, key.0);
            if pos >= list.size(arena) || list.get(arena, pos) != key.0 {
                list.insert(arena, pos, key.0)?;
                wrapper.set(arena, 1, list.ref_() as i64)?;
            }
        }
        Ok(())
    }

    fn null_erase(&mut self, arena: &mut Arena, key: ObjKey) -> TroveResult<()> {
        let mut wrapper = Array::from_ref(self.root);
        let slot = wrapper.get(arena, 1);
        if slot == 0 {
            return Ok(());
        }
        if is_literal(slot) {
            if untag_literal(slot) == key.0 {
                wrapper.set(arena, 1, 0)?;
            }
            return Ok(());
        }
        let mut list = Array::from_ref(slot as Ref);
        let pos = list.lower_bound(arena, key.0);
        if pos < list.size(arena) && list.get(arena, pos) == key.0 {
            list.erase(arena, pos)?;
            if list.size(arena) == 1 {
                let last = list.get(arena, 0);
                list.destroy(arena);
                wrapper.set(arena, 1, tag_literal(last))?;
            } else {
                wrapper.set(arena, 1, list.ref_() as i64)?;
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
struct Ctx {
    width: u8,
    threshold: usize,
}

fn new_node(arena: &mut Arena) -> TroveResult<Ref> {
    let mut node = Array::create(arena, ArrayKind::IndexNode)?;
    let keys = Array::create(arena, ArrayKind::Normal)?;
    node.add(arena, keys.ref_() as i64)?;
    Ok(node.ref_())
}

fn keys_of(arena: &Arena, node: &Array) -> Array {
    Array::from_ref(node.get(arena, 0) as Ref)
}

fn is_node(arena: &Arena, r: Ref) -> bool {
    Array::from_ref(r).context_flag(arena)
}

fn node_last_key(arena: &Arena, r: Ref) -> i64 {
    let node = Array::from_ref(r);
    let keys = keys_of(arena, &node);
    keys.get(arena, keys.size(arena) - 1)
}

fn canon_for_row(arena: &Arena, acc: &dyn IndexAccessor, row: ObjKey) -> TroveResult<u64> {
    let p = acc.payload(arena, row)?;
    canon_of(&p).ok_or_else(|| TroveError::Corrupted {
        reason: format!("row {} lost its indexed integer value", row),
    })
}

/// Inserts at a level, absorbing a root-level node split.
fn insert_level(
    arena: &mut Arena,
    acc: &dyn IndexAccessor,
    ctx: &Ctx,
    root: Ref,
    key: ObjKey,
    canon: u64,
    level: usize,
) -> TroveResult<Ref> {
    let (now, change) = insert_recurse(arena, acc, ctx, root, key, canon, level)?;
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
        NodeChange::InsertBefore(_) | NodeChange::InsertAfter(_) => unreachable!(),
    }
}

fn insert_recurse(
    arena: &mut Arena,
    acc: &dyn IndexAccessor,
    ctx: &Ctx,
    node_ref: Ref,
    key: ObjKey,
    canon: u64,
    level: usize,
) -> TroveResult<(Ref, NodeChange)> {
    let mut node = Array::from_ref(node_ref);
    let mut keys = keys_of(arena, &node);
    let chunk = chunk_at_level(canon, ctx.width, level) as i64;

    if node.is_inner_node(arena) {
        let n = keys.size(arena);
        let idx = keys.lower_bound(arena, chunk).min(n - 1);
        let child_ref = node.get(arena, idx + 1) as Ref;
        let (child_now, change) = insert_recurse(arena, acc, ctx, child_ref, key, canon, level)?;
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

    let n = keys.size(arena);
    let pos = keys.lower_bound(arena, chunk);

    if pos == n || keys.get(arena, pos) != chunk {
        keys.insert(arena, pos, chunk)?;
        node.insert(arena, pos + 1, tag_literal(key.0))?;
        node.set(arena, 0, keys.ref_() as i64)?;
        return split_if_needed(arena, node, keys, ArrayKind::IndexNode);
    }

    let slot = node.get(arena, pos + 1);

    if is_literal(slot) {
        let row2 = ObjKey(untag_literal(slot));
        if row2 == key {
            return Ok((node.ref_(), NodeChange::None));
        }
        let canon2 = canon_for_row(arena, acc, row2)?;
        let new_slot = if canon2 == canon || ctx.threshold >= 2 {
            // Duplicates, or room for a compact list.
            let mut list = Array::create(arena, ArrayKind::Normal)?;
            let first_new = match canon.cmp(&canon2) {
                Ordering::Less => true,
                Ordering::Greater => false,
                Ordering::Equal => key.0 < row2.0,
            };
            if first_new {
                list.add(arena, key.0)?;
                list.add(arena, row2.0)?;
            } else {
                list.add(arena, row2.0)?;
                list.add(arena, key.0)?;
            }
            list.ref_()
        } else {
            // Threshold forbids lists: fan out immediately.
            let mut sub = new_node(arena)?;
            sub = insert_level(arena, acc, ctx, sub, row2, canon2, level + 1)?;
            sub = insert_level(arena, acc, ctx, sub, key, canon, level + 1)?;
            sub
        };
        node.set(arena, pos + 1, new_slot as i64)?;
        return Ok((node.ref_(), NodeChange::None));
    }

    let target = slot as Ref;
    if is_node(arena, target) {
        let new_sub = insert_level(arena, acc, ctx, target, key, canon, level + 1)?;
        if new_sub != target {
            node.set(arena, pos + 1, new_sub as i64)?;
        }
        return Ok((node.ref_(), NodeChange::None));
    }

    // Compact list under this chunk.
    let mut list = Array::from_ref(target);
    let size = list.size(arena);
    let first_c = canon_for_row(arena, acc, ObjKey(list.get(arena, 0)))?;
    let last_c = canon_for_row(arena, acc, ObjKey(list.get(arena, size - 1)))?;
    let pure_duplicates = first_c == last_c;

    if (pure_duplicates && first_c == canon) || size < ctx.threshold || level + 1 >= max_levels(ctx.width)
    {
        // Insert sorted by (value, key); idempotent on an exact match.
        let at = list_insert_pos(arena, acc, &list, canon, key)?;
        match at {
            Some(i) => {
                list.insert(arena, i, key.0)?;
                node.set(arena, pos + 1, list.ref_() as i64)?;
            }
            None => {}
        }
        return Ok((node.ref_(), NodeChange::None));
    }

    // Overflow with distinct values: fan out into a deeper node.
    let entries = list.to_vec(arena);
    list.destroy(arena);
    let mut sub = new_node(arena)?;
    for row in entries {
        let c = canon_for_row(arena, acc, ObjKey(row))?;
        sub = insert_level(arena, acc, ctx, sub, ObjKey(row), c, level + 1)?;
    }
    sub = insert_level(arena, acc, ctx, sub, key, canon, level + 1)?;
    node.set(arena, pos + 1, sub as i64)?;
    Ok((node.ref_(), NodeChange::None))
}

/// Sorted insertion position by (value, key); `None` when the exact pair
/// already exists.
fn list_insert_pos(
    arena: &Arena,
    acc: &dyn IndexAccessor,
    list: &Array,
    canon: u64,
    key: ObjKey,
) -> TroveResult<Option<usize>> {
    let n = list.size(arena);
    let mut lo = 0usize;
    let mut hi = n;
    while lo < hi {
        let mid = (lo + hi) / 2;
        let row = ObjKey(list.get(arena, mid));
        let c = canon_for_row(arena, acc, row)?;
        let ord = c.cmp(&canon).then(row.0.cmp(&key.0));
        match ord {
            Ordering::Less => lo = mid + 1,
            Ordering::Greater => hi = mid,
            Ordering::Equal => return Ok(None),
        }
    }
    Ok(Some(lo))
}

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

fn find_recurse(
    arena: &Arena,
    acc: &dyn IndexAccessor,
    width: u8,
    node_ref: Ref,
    canon: u64,
    level: usize,
) -> TroveResult<FindResult> {
    let node = Array::from_ref(node_ref);
    let keys = keys_of(arena, &node);
    let chunk = chunk_at_level(canon, width, level) as i64;
    let n = keys.size(arena);

    if node.is_inner_node(arena) {
        let idx = keys.lower_bound(arena, chunk);
        if idx >= n {
            return Ok(FindResult::NotFound);
        }
        return find_recurse(
            arena,
            acc,
            width,
            node.get(arena, idx + 1) as Ref,
            canon,
            level,
        );
    }

    let pos = keys.lower_bound(arena, chunk);
    if pos >= n || keys.get(arena, pos) != chunk {
        return Ok(FindResult::NotFound);
    }
    let slot = node.get(arena, pos + 1);
    if is_literal(slot) {
        let row = ObjKey(untag_literal(slot));
        let c = canon_for_row(arena, acc, row)?;
        return Ok(if c == canon {
            FindResult::Single(row)
        } else {
            FindResult::NotFound
        });
    }
    let target = slot as Ref;
    if is_node(arena, target) {
        return find_recurse(arena, acc, width, target, canon, level + 1);
    }
    let list = Array::from_ref(target);
    let n = list.size(arena);
    let mut lo = 0usize;
    let mut hi = n;
    while lo < hi {
        let mid = (lo + hi) / 2;
        let c = canon_for_row(arena, acc, ObjKey(list.get(arena, mid)))?;
        if c < canon {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    let start = lo;
    hi = n;
    while lo < hi {
        let mid = (lo + hi) / 2;
        let c = canon_for_row(arena, acc, ObjKey(list.get(arena, mid)))?;
        if c > canon {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    Ok(if start == lo {
        FindResult::NotFound
    } else {
        FindResult::Column {
            list_ref: target,
            start,
            end: lo,
        }
    })
}

fn erase_recurse(
    arena: &mut Arena,
    acc: &dyn IndexAccessor,
    ctx: &Ctx,
    node_ref: Ref,
    key: ObjKey,
    canon: u64,
    level: usize,
) -> TroveResult<(Ref, bool)> {
    let mut node = Array::from_ref(node_ref);
    let mut keys = keys_of(arena, &node);
    let chunk = chunk_at_level(canon, ctx.width, level) as i64;
    let n = keys.size(arena);

    if node.is_inner_node(arena) {
        let idx = keys.lower_bound(arena, chunk);
        if idx >= n {
            return Ok((node_ref, false));
        }
        let child_ref = node.get(arena, idx + 1) as Ref;
        let (child_now, child_empty) =
            erase_recurse(arena, acc, ctx, child_ref, key, canon, level)?;
        if child_empty {
            destroy_tree(arena, child_now);
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

    if is_literal(slot) {
        if untag_literal(slot) == key.0 {
            keys.erase(arena, pos)?;
            node.erase(arena, pos + 1)?;
            node.set(arena, 0, keys.ref_() as i64)?;
        }
        return Ok((node.ref_(), keys.size(arena) == 0));
    }

    let target = slot as Ref;
    if is_node(arena, target) {
        let (sub_now, sub_empty) = erase_recurse(arena, acc, ctx, target, key, canon, level + 1)?;
        if sub_empty {
            destroy_tree(arena, sub_now);
            keys.erase(arena, pos)?;
            node.erase(arena, pos + 1)?;
            node.set(arena, 0, keys.ref_() as i64)?;
            return Ok((node.ref_(), keys.size(arena) == 0));
        }
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
    let size = list.size(arena);
    let mut at = None;
    for i in 0..size {
        if list.get(arena, i) == key.0 {
            at = Some(i);
            break;
        }
    }
    let at = match at {
        Some(i) => i,
        None => return Ok((node.ref_(), false)),
    };
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

#[allow(clippy::too_many_arguments)]
fn range_recurse(
    arena: &Arena,
    acc: &dyn IndexAccessor,
    width: u8,
    node_ref: Ref,
    lo: u64,
    hi: u64,
    level: usize,
    out: &mut Vec<ObjKey>,
) -> TroveResult<()> {
    let node = Array::from_ref(node_ref);
    let keys = keys_of(arena, &node);
    let n = keys.size(arena);
    let lo_chunk = chunk_at_level(lo, width, level) as i64;
    let hi_chunk = chunk_at_level(hi, width, level) as i64;

    if node.is_inner_node(arena) {
        for i in 0..n {
            if keys.get(arena, i) < lo_chunk {
                continue;
            }
            range_recurse(
                arena,
                acc,
                width,
                node.get(arena, i + 1) as Ref,
                lo,
                hi,
                level,
                out,
            )?;
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
            let c = canon_for_row(arena, acc, row)?;
            if c >= lo && c <= hi {
                out.push(row);
            }
            continue;
        }
        let r = slot as Ref;
        if is_node(arena, r) {
            range_recurse(arena, acc, width, r, lo, hi, level + 1, out)?;
        } else {
            let list = Array::from_ref(r);
            for i in 0..list.size(arena) {
                let row = ObjKey(list.get(arena, i));
                let c = canon_for_row(arena, acc, row)?;
                if c >= lo && c <= hi {
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
        if is_node(arena, r) {
            distinct_recurse(arena, acc, r, out)?;
        } else {
            let list = Array::from_ref(r);
            let mut prev: Option<u64> = None;
            for i in 0..list.size(arena) {
                let row = ObjKey(list.get(arena, i));
                let c = canon_for_row(arena, acc, row)?;
                if prev != Some(c) {
                    out.push(row);
                    prev = Some(c);
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
        if is_node(arena, r) {
            if dup_recurse(arena, acc, r)? {
                return Ok(true);
            }
        } else {
            let list = Array::from_ref(r);
            let size = list.size(arena);
            let mut prev = canon_for_row(arena, acc, ObjKey(list.get(arena, 0)))?;
            for i in 1..size {
                let c = canon_for_row(arena, acc, ObjKey(list.get(arena, i)))?;
                if c == prev {
                    return Ok(true);
                }
                prev = c;
            }
        }
    }
    Ok(false)
}

fn verify_recurse(
    arena: &Arena,
    acc: &dyn IndexAccessor,
    width: u8,
    node_ref: Ref,
    level: usize,
) -> TroveResult<()> {
    let node = Array::from_ref(node_ref);
    let keys = keys_of(arena, &node);
    let n = keys.size(arena);
    let corrupt = |reason: String| TroveError::Corrupted { reason };

    if node.size(arena) != n + 1 {
        return Err(corrupt("radix node slot/key count mismatch".to_string()));
    }
    for i in 1..n {
        if keys.get(arena, i - 1) >= keys.get(arena, i) {
            return Err(corrupt("radix chunk keys not ascending".to_string()));
        }
    }

    if node.is_inner_node(arena) {
        for i in 0..n {
            verify_recurse(arena, acc, width, node.get(arena, i + 1) as Ref, level)?;
        }
        return Ok(());
    }

    for pos in 0..n {
        let chunk = keys.get(arena, pos) as u32;
        let slot = node.get(arena, pos + 1);
        if is_literal(slot) {
            let row = ObjKey(untag_literal(slot));
            let c = canon_for_row(arena, acc, row)?;
            if chunk_at_level(c, width, level) != chunk {
                return Err(corrupt(format!("row {} radix chunk mismatch", row)));
            }
        } else if is_node(arena, slot as Ref) {
            verify_recurse(arena, acc, width, slot as Ref, level + 1)?;
        } else {
            let list = Array::from_ref(slot as Ref);
            let mut prev: Option<(u64, i64)> = None;
            for i in 0..list.size(arena) {
                let row = list.get(arena, i);
                let c = canon_for_row(arena, acc, ObjKey(row))?;
                if chunk_at_level(c, width, level) != chunk {
                    return Err(corrupt(format!("row {} radix list chunk mismatch", row)));
                }
                if let Some((pc, pk)) = prev {
                    if pc.cmp(&c).then(pk.cmp(&row)) != Ordering::Less {
                        return Err(corrupt("radix list not sorted".to_string()));
                    }
                }
                prev = Some((c, row));
            }
        }
    }
    Ok(())
}

fn destroy_tree(arena: &mut Arena, node_ref: Ref) {
    let node = Array::from_ref(node_ref);
    let n = node.size(arena);
    for i in 1..n {
        let slot = node.get(arena, i);
        if slot == 0 || is_literal(slot) {
            continue;
        }
        let r = slot as Ref;
        if is_node(arena, r) || node.is_inner_node(arena) {
            destroy_tree(arena, r);
        } else {
            Array::from_ref(r).destroy(arena);
        }
    }
    keys_of(arena, &node).destroy(arena);
    node.destroy(arena);
}
