// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Search indices: value → set of object keys.
//!
//! Two implementations share one contract:
//!
//! - [`trie::StringIndex`]: a prefix trie consuming the canonical byte
//!   encoding four bytes at a time. Used for String, Bool, Timestamp,
//!   ObjectId, UUID and Mixed columns.
//! - [`radix::RadixTree`]: a radix tree over sign-flipped 64-bit integers
//!   consuming W bits per level, with a compact-list threshold. Used for
//!   Int columns.
//!
//! Index nodes are arrays with the context flag set: slot 0 holds the
//! sorted chunk-key array, the remaining slots hold either tagged literal
//! object keys (low bit set) or refs to duplicate lists / deeper nodes.
//! Duplicate lists are plain arrays (context flag clear) sorted by
//! (value, key).
//!
//! Index maintenance reads back full column values through an
//! [`IndexAccessor`] to disambiguate chunk collisions; the cluster tree
//! implements it per indexed column.

pub mod radix;
pub mod trie;

#[cfg(test)]
mod index_test;

use crate::alloc::{Arena, Ref};
use crate::array::Array;
use crate::error::{TroveError, TroveResult};
use crate::keys::ObjKey;
use crate::value::{ColumnType, Value};
use std::cmp::Ordering;

/// Chunk length consumed per trie level, in bytes.
pub const INDEX_KEY_LENGTH: usize = 4;

/// Byte offset beyond which the trie stores terminal sorted lists
/// instead of descending further.
pub const MAX_OFFSET: usize = 200;

/// Maximum entries per index node before a B+-style split.
pub const INDEX_NODE_SIZE: usize = 256;

/// Canonical index encoding of a column value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexPayload {
    Null,
    /// Original string, kept for case-insensitive folding.
    String(String),
    /// Order-preserving byte encoding of a non-string scalar.
    Bytes(Vec<u8>),
}

impl IndexPayload {
    pub fn bytes(&self) -> &[u8] {
        match self {
            IndexPayload::Null => &[],
            IndexPayload::String(s) => s.as_bytes(),
            IndexPayload::Bytes(b) => b,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, IndexPayload::Null)
    }

    /// Total order: null below everything, then byte-wise.
    pub fn cmp_payload(&self, other: &IndexPayload) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.bytes().cmp(other.bytes()),
        }
    }

    /// Case-folded equality for case-insensitive finds; exact for
    /// non-string payloads.
    pub fn eq_case_insensitive(&self, other: &IndexPayload) -> bool {
        match (self, other) {
            (IndexPayload::String(a), IndexPayload::String(b)) => {
                a.to_lowercase() == b.to_lowercase()
            }
            _ => self.cmp_payload(other) == Ordering::Equal,
        }
    }
}

/// Derives the 4-byte big-endian chunk key at `offset`. Bytes past the
/// end pad with zero; the full-value compare disambiguates.
pub fn chunk_at(payload: &IndexPayload, offset: usize) -> u32 {
    let bytes = payload.bytes();
    let mut key = 0u32;
    for i in 0..INDEX_KEY_LENGTH {
        key <<= 8;
        if let Some(&b) = bytes.get(offset + i) {
            key |= b as u32;
        }
    }
    key
}

/// Canonical encoding for trie-indexed values.
///
/// ## Error Conditions
/// - `IllegalCombination` for types that do not support indexing
pub fn payload_for_value(value: &Value) -> TroveResult<IndexPayload> {
    Ok(match value {
        Value::Null => IndexPayload::Null,
        Value::String(s) => IndexPayload::String(s.clone()),
        Value::Bool(b) => IndexPayload::Bytes(vec![*b as u8]),
        Value::Int(v) => IndexPayload::Bytes(canonical_int(*v).to_be_bytes().to_vec()),
        Value::Timestamp(ts) => {
            let mut buf = Vec::with_capacity(12);
            buf.extend_from_slice(&canonical_int(ts.seconds()).to_be_bytes());
            buf.extend_from_slice(&((ts.nanoseconds() + 1_000_000_000) as u32).to_be_bytes());
            IndexPayload::Bytes(buf)
        }
        Value::ObjectId(oid) => IndexPayload::Bytes(oid.as_bytes().to_vec()),
        Value::Uuid(u) => IndexPayload::Bytes(u.as_bytes().to_vec()),
        other => {
            return Err(TroveError::IllegalCombination {
                reason: format!("type {} does not support indexing", other.type_name()),
            });
        }
    })
}

/// Index payload for a Mixed cell: a type-rank byte followed by the
/// scalar's canonical encoding.
pub fn payload_for_mixed(value: &Value) -> TroveResult<IndexPayload> {
    if value.is_null() {
        return Ok(IndexPayload::Null);
    }
    let inner = payload_for_value(value)?;
    // A leading type-rank byte keeps values of different types from
    // colliding on the byte encoding.
    let tag = match value {
        Value::Int(_) => 1u8,
        Value::Bool(_) => 2,
        Value::String(_) => 3,
        Value::ObjectId(_) => 4,
        Value::Uuid(_) => 5,
        Value::Timestamp(_) => 6,
        _ => 0,
    };
    let mut buf = vec![tag];
    buf.extend_from_slice(inner.bytes());
    Ok(IndexPayload::Bytes(buf))
}

/// Sign-flip canonicalization: preserves order when compared unsigned.
pub fn canonical_int(v: i64) -> u64 {
    (v as u64) ^ (1 << 63)
}

/// Reads full column values back for collision handling and verification.
pub trait IndexAccessor {
    fn payload(&self, arena: &Arena, key: ObjKey) -> TroveResult<IndexPayload>;
}

/// Result of `find_all_no_copy`: either nothing, a single key, or a
/// borrowed slice of a pre-existing sorted leaf list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindResult {
    NotFound,
    Single(ObjKey),
    Column {
        list_ref: Ref,
        start: usize,
        end: usize,
    },
}

impl FindResult {
    /// Materializes the matching keys.
    pub fn to_keys(&self, arena: &Arena) -> Vec<ObjKey> {
        match self {
            FindResult::NotFound => Vec::new(),
            FindResult::Single(k) => vec![*k],
            FindResult::Column {
                list_ref,
                start,
                end,
            } => {
                let list = Array::from_ref(*list_ref);
                (*start..*end).map(|i| ObjKey(list.get(arena, i))).collect()
            }
        }
    }

    pub fn count(&self) -> usize {
        match self {
            FindResult::NotFound => 0,
            FindResult::Single(_) => 1,
            FindResult::Column { start, end, .. } => end - start,
        }
    }
}

/// Whether a column type may carry a search index.
pub fn check_indexable(ty: ColumnType, is_collection: bool) -> TroveResult<()> {
    if is_collection || !ty.supports_index() {
        return Err(TroveError::IllegalCombination {
            reason: format!("cannot index column of type {}", ty.name()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_derivation() {
        let p = IndexPayload::String("abcdef".to_string());
        assert_eq!(chunk_at(&p, 0), u32::from_be_bytes(*b"abcd"));
        assert_eq!(chunk_at(&p, 4), u32::from_be_bytes([b'e', b'f', 0, 0]));
        assert_eq!(chunk_at(&p, 8), 0);
        assert_eq!(chunk_at(&IndexPayload::Null, 0), 0);
    }

    #[test]
    fn test_canonical_int_order() {
        let values = [i64::MIN, -5, -1, 0, 1, 42, i64::MAX];
        for w in values.windows(2) {
            assert!(canonical_int(w[0]) < canonical_int(w[1]));
        }
    }

    #[test]
    fn test_int_payload_order_preserving() {
        let a = payload_for_value(&Value::Int(-10)).unwrap();
        let b = payload_for_value(&Value::Int(3)).unwrap();
        assert_eq!(a.cmp_payload(&b), Ordering::Less);
    }

    #[test]
    fn test_unindexable_types_rejected() {
        assert!(payload_for_value(&Value::Double(1.0)).is_err());
        assert!(payload_for_value(&Value::Binary(vec![1])).is_err());
        assert!(check_indexable(ColumnType::Float, false).is_err());
        assert!(check_indexable(ColumnType::String, true).is_err());
        assert!(check_indexable(ColumnType::String, false).is_ok());
    }

    #[test]
    fn test_null_orders_below() {
        let null = IndexPayload::Null;
        let empty = IndexPayload::String(String::new());
        assert_eq!(null.cmp_payload(&empty), Ordering::Less);
        assert_eq!(null.cmp_payload(&IndexPayload::Null), Ordering::Equal);
    }
}
