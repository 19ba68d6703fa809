// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Width-compressed integer arrays: the leaves of every higher structure.
//!
//! Every structured object in the arena begins with a fixed 8-byte header:
//!
//! ```text
//! byte 0      [flags:4 | wtype:4]
//!             flags: bit 0 = is_inner_bptree_node
//!                    bit 1 = has_refs (body holds refs, not scalars)
//!                    bit 2 = context_flag (overloaded per user)
//!             wtype: element width code (0,1,2,4,8,16,32,64 bits)
//! byte 1      reserved
//! bytes 2..5  capacity in bytes (24-bit LE)
//! bytes 5..8  size in elements (24-bit LE)
//! ```
//!
//! Bodies are densely packed at the element width. Widths 1, 2 and 4 hold
//! unsigned ranges; 8 and up hold little-endian two's complement. Width 0
//! is the all-zero array. Widths upgrade transparently on insert.
//!
//! Mutation follows copy-on-write at ref granularity: an operation that
//! outgrows the current capacity allocates a new ref and frees the old
//! one; the array handle tracks the move and the caller re-links the
//! parent slot. Navigation therefore keeps a breadcrumb of
//! (parent, slot) pairs instead of parent pointers in nodes.
//!
//! Out-of-range access is not defended here; the cluster and index layers
//! enforce their own invariants.

pub mod blob;

use crate::alloc::{Arena, Ref};
use crate::error::TroveResult;

/// Array header size in bytes.
pub const HEADER_SIZE: usize = 8;

const FLAG_INNER: u8 = 0x1;
const FLAG_HAS_REFS: u8 = 0x2;
const FLAG_CONTEXT: u8 = 0x4;

/// Creation-time array shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayKind {
    /// Scalar integer payload.
    Normal,
    /// Body holds refs / tagged literals; freed recursively.
    HasRefs,
    /// Inner B+-tree node (implies HasRefs).
    InnerNode,
    /// Search-index node (HasRefs plus context flag).
    IndexNode,
    /// Inner search-index node (HasRefs, context and inner flags).
    IndexInnerNode,
}

impl ArrayKind {
    fn flags(&self) -> u8 {
        match self {
            ArrayKind::Normal => 0,
            ArrayKind::HasRefs => FLAG_HAS_REFS,
            ArrayKind::InnerNode => FLAG_HAS_REFS | FLAG_INNER,
            ArrayKind::IndexNode => FLAG_HAS_REFS | FLAG_CONTEXT,
            ArrayKind::IndexInnerNode => FLAG_HAS_REFS | FLAG_CONTEXT | FLAG_INNER,
        }
    }
}

/// Decoded header fields.
#[derive(Debug, Clone, Copy)]
struct Header {
    flags: u8,
    width: u8,
    cap_bytes: usize,
    size: usize,
}

fn read_header(arena: &Arena, r: Ref) -> Header {
    let h = arena.bytes(r, HEADER_SIZE);
    Header {
        flags: h[0] >> 4,
        width: width_from_code(h[0] & 0xF),
        cap_bytes: u32::from_le_bytes([h[2], h[3], h[4], 0]) as usize,
        size: u32::from_le_bytes([h[5], h[6], h[7], 0]) as usize,
    }
}

fn write_header(arena: &mut Arena, r: Ref, h: Header) {
    let out = arena.bytes_mut(r, HEADER_SIZE);
    out[0] = (h.flags << 4) | code_from_width(h.width);
    out[1] = 0;
    let cap = (h.cap_bytes as u32).to_le_bytes();
    out[2] = cap[0];
    out[3] = cap[1];
    out[4] = cap[2];
    let size = (h.size as u32).to_le_bytes();
    out[5] = size[0];
    out[6] = size[1];
    out[7] = size[2];
}

fn width_from_code(code: u8) -> u8 {
    match code {
        0 => 0,
        1 => 1,
        2 => 2,
        3 => 4,
        4 => 8,
        5 => 16,
        6 => 32,
        _ => 64,
    }
}

fn code_from_width(width: u8) -> u8 {
    match width {
        0 => 0,
        1 => 1,
        2 => 2,
        4 => 3,
        8 => 4,
        16 => 5,
        32 => 6,
        _ => 7,
    }
}

/// Bytes needed for `n` elements at `width` bits.
fn bytes_for(width: u8, n: usize) -> usize {
    (n * width as usize + 7) / 8
}

/// Minimum width able to represent `v`.
fn width_for(v: i64) -> u8 {
    if v >= 0 {
        if v <= 1 {
            1
        } else if v <= 3 {
            2
        } else if v <= 15 {
            4
        } else if v <= i8::MAX as i64 {
            8
        } else if v <= i16::MAX as i64 {
            16
        } else if v <= i32::MAX as i64 {
            32
        } else {
            64
        }
    } else if v >= i8::MIN as i64 {
        8
    } else if v >= i16::MIN as i64 {
        16
    } else if v >= i32::MIN as i64 {
        32
    } else {
        64
    }
}

/// Direct element read from a packed body. The hot scan paths bind
/// `width` once per leaf and avoid per-element dispatch.
#[inline]
pub fn get_direct(width: u8, body: &[u8], i: usize) -> i64 {
    match width {
        0 => 0,
        1 => ((body[i / 8] >> (i % 8)) & 0x1) as i64,
        2 => ((body[i / 4] >> ((i % 4) * 2)) & 0x3) as i64,
        4 => ((body[i / 2] >> ((i % 2) * 4)) & 0xF) as i64,
        8 => body[i] as i8 as i64,
        16 => i16::from_le_bytes([body[i * 2], body[i * 2 + 1]]) as i64,
        32 => i32::from_le_bytes([
            body[i * 4],
            body[i * 4 + 1],
            body[i * 4 + 2],
            body[i * 4 + 3],
        ]) as i64,
        _ => i64::from_le_bytes(body[i * 8..i * 8 + 8].try_into().unwrap()),
    }
}

fn put_direct(width: u8, body: &mut [u8], i: usize, v: i64) {
    match width {
        0 => {}
        1 => {
            let mask = 1u8 << (i % 8);
            if v != 0 {
                body[i / 8] |= mask;
            } else {
                body[i / 8] &= !mask;
            }
        }
        2 => {
            let shift = (i % 4) * 2;
            body[i / 4] = (body[i / 4] & !(0x3u8 << shift)) | (((v as u8) & 0x3) << shift);
        }
        4 => {
            let shift = (i % 2) * 4;
            body[i / 2] = (body[i / 2] & !(0xFu8 << shift)) | (((v as u8) & 0xF) << shift);
        }
        8 => body[i] = v as i8 as u8,
        16 => body[i * 2..i * 2 + 2].copy_from_slice(&(v as i16).to_le_bytes()),
        32 => body[i * 4..i * 4 + 4].copy_from_slice(&(v as i32).to_le_bytes()),
        _ => body[i * 8..i * 8 + 8].copy_from_slice(&v.to_le_bytes()),
    }
}

/// Handle on an array in the arena.
///
/// The handle is only a ref; header fields are read on demand. After a
/// mutating call the handle's ref may have changed (copy-on-write
/// reallocation); callers owning a parent slot must re-link via `ref_()`.
#[derive(Debug, Clone, Copy)]
pub struct Array {
    r: Ref,
}

impl Array {
    /// Allocates an empty array of the given kind.
    pub fn create(arena: &mut Arena, kind: ArrayKind) -> TroveResult<Array> {
        Self::create_with_capacity(arena, kind, 8)
    }

    /// Allocates an empty array with room for `cap_hint` 64-bit elements.
    pub fn create_with_capacity(
        arena: &mut Arena,
        kind: ArrayKind,
        cap_hint: usize,
    ) -> TroveResult<Array> {
        let width: u8 = if kind == ArrayKind::Normal { 0 } else { 64 };
        let cap_bytes = (cap_hint.max(1) * 8).max(8);
        let r = arena.alloc(HEADER_SIZE + cap_bytes)?;
        arena.bytes_mut(r, HEADER_SIZE + cap_bytes).fill(0);
        write_header(
            arena,
            r,
            Header {
                flags: kind.flags(),
                width,
                cap_bytes,
                size: 0,
            },
        );
        Ok(Array { r })
    }

    /// Attaches to an existing array.
    pub fn from_ref(r: Ref) -> Array {
        debug_assert!(r != 0);
        Array { r }
    }

    pub fn ref_(&self) -> Ref {
        self.r
    }

    pub fn size(&self, arena: &Arena) -> usize {
        read_header(arena, self.r).size
    }

    pub fn is_empty(&self, arena: &Arena) -> bool {
        self.size(arena) == 0
    }

    pub fn width(&self, arena: &Arena) -> u8 {
        read_header(arena, self.r).width
    }

    pub fn is_inner_node(&self, arena: &Arena) -> bool {
        read_header(arena, self.r).flags & FLAG_INNER != 0
    }

    pub fn has_refs(&self, arena: &Arena) -> bool {
        read_header(arena, self.r).flags & FLAG_HAS_REFS != 0
    }

    pub fn context_flag(&self, arena: &Arena) -> bool {
        read_header(arena, self.r).flags & FLAG_CONTEXT != 0
    }

    pub fn set_context_flag(&self, arena: &mut Arena, on: bool) {
        let mut h = read_header(arena, self.r);
        if on {
            h.flags |= FLAG_CONTEXT;
        } else {
            h.flags &= !FLAG_CONTEXT;
        }
        write_header(arena, self.r, h);
    }

    /// Element read.
    pub fn get(&self, arena: &Arena, i: usize) -> i64 {
        let h = read_header(arena, self.r);
        debug_assert!(i < h.size);
        let body = arena.bytes(self.r + HEADER_SIZE as u64, h.cap_bytes);
        get_direct(h.width, body, i)
    }

    /// Reads the whole body into a Vec.
    pub fn to_vec(&self, arena: &Arena) -> Vec<i64> {
        let h = read_header(arena, self.r);
        let body = arena.bytes(self.r + HEADER_SIZE as u64, h.cap_bytes);
        (0..h.size).map(|i| get_direct(h.width, body, i)).collect()
    }

    /// Element write, upgrading the width when `v` does not fit.
    pub fn set(&mut self, arena: &mut Arena, i: usize, v: i64) -> TroveResult<()> {
        let h = read_header(arena, self.r);
        debug_assert!(i < h.size);
        if width_for(v) > h.width {
            self.upgrade_width(arena, width_for(v), h.size)?;
        }
        let h = read_header(arena, self.r);
        let body = arena.bytes_mut(self.r + HEADER_SIZE as u64, h.cap_bytes);
        put_direct(h.width, body, i, v);
        Ok(())
    }

    /// Appends an element.
    pub fn add(&mut self, arena: &mut Arena, v: i64) -> TroveResult<()> {
        let h = read_header(arena, self.r);
        self.insert(arena, h.size, v)
    }

    /// Inserts an element at `i`, shifting the tail.
    pub fn insert(&mut self, arena: &mut Arena, i: usize, v: i64) -> TroveResult<()> {
        let h = read_header(arena, self.r);
        debug_assert!(i <= h.size);
        let width = h.width.max(width_for(v));
        let new_size = h.size + 1;

        if width == h.width && bytes_for(width, new_size) <= h.cap_bytes {
            // Fast path: shift the tail in place.
            let cap = h.cap_bytes;
            let body = arena.bytes_mut(self.r + HEADER_SIZE as u64, cap);
            let mut j = h.size;
            while j > i {
                let prev = get_direct(width, body, j - 1);
                put_direct(width, body, j, prev);
                j -= 1;
            }
            put_direct(width, body, i, v);
            let mut h2 = h;
            h2.size = new_size;
            write_header(arena, self.r, h2);
            return Ok(());
        }

        // Slow path: rebuild at the required width and capacity.
        let mut values = self.to_vec(arena);
        values.insert(i, v);
        self.rebuild(arena, h, width, &values)
    }

    /// Removes the element at `i`.
    pub fn erase(&mut self, arena: &mut Arena, i: usize) -> TroveResult<()> {
        let h = read_header(arena, self.r);
        debug_assert!(i < h.size);
        let cap = h.cap_bytes;
        let body = arena.bytes_mut(self.r + HEADER_SIZE as u64, cap);
        for j in i..h.size - 1 {
            let next = get_direct(h.width, body, j + 1);
            put_direct(h.width, body, j, next);
        }
        let mut h2 = h;
        h2.size -= 1;
        write_header(arena, self.r, h2);
        Ok(())
    }

    /// Shrinks to the first `n` elements.
    pub fn truncate(&mut self, arena: &mut Arena, n: usize) -> TroveResult<()> {
        let mut h = read_header(arena, self.r);
        debug_assert!(n <= h.size);
        h.size = n;
        write_header(arena, self.r, h);
        Ok(())
    }

    fn upgrade_width(&mut self, arena: &mut Arena, new_width: u8, size: usize) -> TroveResult<()> {
        let h = read_header(arena, self.r);
        let values = self.to_vec(arena);
        debug_assert_eq!(values.len(), size);
        self.rebuild(arena, h, new_width, &values)
    }

    /// Reallocates the body at `width` with doubling capacity, writes
    /// `values`, frees the old ref.
    fn rebuild(
        &mut self,
        arena: &mut Arena,
        old: Header,
        width: u8,
        values: &[i64],
    ) -> TroveResult<()> {
        let needed = bytes_for(width, values.len());
        let cap_bytes = needed.max(old.cap_bytes * 2).max(8);
        let new_ref = arena.alloc(HEADER_SIZE + cap_bytes)?;
        arena.bytes_mut(new_ref, HEADER_SIZE + cap_bytes).fill(0);
        write_header(
            arena,
            new_ref,
            Header {
                flags: old.flags,
                width,
                cap_bytes,
                size: values.len(),
            },
        );
        {
            let body = arena.bytes_mut(new_ref + HEADER_SIZE as u64, cap_bytes);
            for (i, v) in values.iter().enumerate() {
                put_direct(width, body, i, *v);
            }
        }
        arena.free(self.r, HEADER_SIZE + old.cap_bytes);
        self.r = new_ref;
        Ok(())
    }

    /// Lower bound over a sorted ascending body: first position whose
    /// element is not less than `value`. Branch-free halving loop,
    /// specialised by the caller binding the width once.
    pub fn lower_bound(&self, arena: &Arena, value: i64) -> usize {
        let h = read_header(arena, self.r);
        let body = arena.bytes(self.r + HEADER_SIZE as u64, h.cap_bytes);
        let mut low = 0usize;
        let mut size = h.size;
        while size > 0 {
            let half = size / 2;
            let other_half = size - half;
            let probe = low + half;
            let other_low = low + other_half;
            let v = get_direct(h.width, body, probe);
            size = half;
            low = if v < value { other_low } else { low };
        }
        low
    }

    /// First position whose element is greater than `value`.
    pub fn upper_bound(&self, arena: &Arena, value: i64) -> usize {
        let h = read_header(arena, self.r);
        let body = arena.bytes(self.r + HEADER_SIZE as u64, h.cap_bytes);
        let mut low = 0usize;
        let mut size = h.size;
        while size > 0 {
            let half = size / 2;
            let other_half = size - half;
            let probe = low + half;
            let other_low = low + other_half;
            let v = get_direct(h.width, body, probe);
            size = half;
            low = if v <= value { other_low } else { low };
        }
        low
    }

    /// Linear scan for the first occurrence of `value`.
    pub fn find_first(&self, arena: &Arena, value: i64) -> Option<usize> {
        let h = read_header(arena, self.r);
        let body = arena.bytes(self.r + HEADER_SIZE as u64, h.cap_bytes);
        (0..h.size).find(|&i| get_direct(h.width, body, i) == value)
    }

    /// Frees this array only (slots are not chased).
    pub fn destroy(self, arena: &mut Arena) {
        let h = read_header(arena, self.r);
        arena.free(self.r, HEADER_SIZE + h.cap_bytes);
    }

    /// Frees this array and, when it holds refs, every reachable child.
    /// Tagged literals (odd slots) are skipped.
    pub fn destroy_deep(self, arena: &mut Arena) {
        let h = read_header(arena, self.r);
        if h.flags & FLAG_HAS_REFS != 0 {
            for i in 0..h.size {
                let v = self.get(arena, i);
                if v != 0 && v & 1 == 0 {
                    let child = Array::from_ref(v as Ref);
                    child.destroy_deep(arena);
                }
            }
        }
        arena.free(self.r, HEADER_SIZE + h.cap_bytes);
    }
}

/// Tags a literal value for storage in a has_refs slot (low bit set).
#[inline]
pub fn tag_literal(v: i64) -> i64 {
    (v << 1) | 1
}

/// Recovers a literal value from a tagged slot.
#[inline]
pub fn untag_literal(v: i64) -> i64 {
    v >> 1
}

/// Whether a has_refs slot holds a tagged literal rather than a ref.
#[inline]
pub fn is_literal(v: i64) -> bool {
    v & 1 != 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbOptions;

    fn arena() -> (tempfile::TempDir, Arena) {
        let dir = tempfile::tempdir().unwrap();
        let arena = Arena::open(dir.path().join("t.trove"), &DbOptions::default()).unwrap();
        (dir, arena)
    }

    #[test]
    fn test_add_get_small_widths() {
        let (_d, mut a) = arena();
        let mut arr = Array::create(&mut a, ArrayKind::Normal).unwrap();
        arr.add(&mut a, 0).unwrap();
        arr.add(&mut a, 1).unwrap();
        assert_eq!(arr.width(&a), 1);
        arr.add(&mut a, 3).unwrap();
        assert_eq!(arr.width(&a), 2);
        arr.add(&mut a, 15).unwrap();
        assert_eq!(arr.width(&a), 4);
        assert_eq!(arr.to_vec(&a), vec![0, 1, 3, 15]);
    }

    #[test]
    fn test_width_upgrade_preserves_values() {
        let (_d, mut a) = arena();
        let mut arr = Array::create(&mut a, ArrayKind::Normal).unwrap();
        for v in [1, 2, 3] {
            arr.add(&mut a, v).unwrap();
        }
        arr.add(&mut a, -1_000_000).unwrap();
        assert_eq!(arr.width(&a), 32);
        assert_eq!(arr.to_vec(&a), vec![1, 2, 3, -1_000_000]);
        arr.set(&mut a, 0, i64::MIN).unwrap();
        assert_eq!(arr.width(&a), 64);
        assert_eq!(arr.get(&a, 0), i64::MIN);
        assert_eq!(arr.get(&a, 3), -1_000_000);
    }

    #[test]
    fn test_insert_erase() {
        let (_d, mut a) = arena();
        let mut arr = Array::create(&mut a, ArrayKind::Normal).unwrap();
        for v in [10, 30] {
            arr.add(&mut a, v).unwrap();
        }
        arr.insert(&mut a, 1, 20).unwrap();
        assert_eq!(arr.to_vec(&a), vec![10, 20, 30]);
        arr.erase(&mut a, 0).unwrap();
        assert_eq!(arr.to_vec(&a), vec![20, 30]);
        arr.truncate(&mut a, 1).unwrap();
        assert_eq!(arr.to_vec(&a), vec![20]);
    }

    #[test]
    fn test_lower_bound() {
        let (_d, mut a) = arena();
        let mut arr = Array::create(&mut a, ArrayKind::Normal).unwrap();
        for v in [2, 4, 4, 8, 100] {
            arr.add(&mut a, v).unwrap();
        }
        assert_eq!(arr.lower_bound(&a, 1), 0);
        assert_eq!(arr.lower_bound(&a, 4), 1);
        assert_eq!(arr.upper_bound(&a, 4), 3);
        assert_eq!(arr.lower_bound(&a, 9), 4);
        assert_eq!(arr.lower_bound(&a, 101), 5);
    }

    #[test]
    fn test_many_elements_growth() {
        let (_d, mut a) = arena();
        let mut arr = Array::create(&mut a, ArrayKind::Normal).unwrap();
        for v in 0..1000i64 {
            arr.add(&mut a, v * 7).unwrap();
        }
        assert_eq!(arr.size(&a), 1000);
        for i in 0..1000usize {
            assert_eq!(arr.get(&a, i), i as i64 * 7);
        }
    }

    #[test]
    fn test_tagging() {
        assert!(is_literal(tag_literal(5)));
        assert_eq!(untag_literal(tag_literal(5)), 5);
        assert!(!is_literal(0x1000));
    }

    #[test]
    fn test_ref_array_destroy_deep() {
        let (_d, mut a) = arena();
        let child = Array::create(&mut a, ArrayKind::Normal).unwrap();
        let mut parent = Array::create(&mut a, ArrayKind::HasRefs).unwrap();
        parent.add(&mut a, child.ref_() as i64).unwrap();
        parent.add(&mut a, tag_literal(42)).unwrap();
        parent.destroy_deep(&mut a);
        // Freed space is reusable after commit.
        a.commit(0).unwrap();
        assert!(a.alloc(8).is_ok());
    }
}
