// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Cluster leaf: up to N rows stored column-wise.
//!
//! Layout (has_refs array):
//!
//! ```text
//! slot 0       ref to the key-offset array (sorted ascending)
//! slot 1       tagged base key; row i's full key = base + offset[i]
//! slot 2..C+2  per-column array refs, column-major
//! ```
//!
//! Every column array holds exactly one entry per row (nullable integer
//! columns carry one extra leading sentinel element). Rows are physically
//! ordered by key.

use crate::alloc::{Arena, Ref};
use crate::array::{blob, is_literal, tag_literal, untag_literal, Array, ArrayKind};
use crate::cluster::payload;
use crate::error::{TroveError, TroveResult};
use crate::keys::{CollectionKind, ColKey, ObjKey};
use crate::value::{ColumnType, Decimal128, ObjectId, Timestamp, Value};
use uuid::Uuid;

/// Null sentinel bit patterns for float columns. Stored NaNs are
/// canonicalized so a user NaN never collides with the sentinel.
const NULL_FLOAT_BITS: u32 = 0x7FC0_00AA;
const CANON_FLOAT_NAN: u32 = 0x7FC0_0000;
const NULL_DOUBLE_BITS: u64 = 0x7FF8_0000_0000_00AA;
const CANON_DOUBLE_NAN: u64 = 0x7FF8_0000_0000_0000;

/// Physical representation of a column inside a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Storage {
    /// Plain integer payload (Int, Bool, Link as key+1).
    Int,
    /// Integer payload with a leading null-sentinel element.
    IntNull,
    /// f32 bit patterns.
    Float,
    /// f64 bit patterns.
    Double,
    /// Blob refs; 0 is null.
    Refs,
    /// Backlink cell: 0, tagged single key, or ref to a sorted key array.
    Backlink,
}

fn storage_of(ck: ColKey) -> Storage {
    if ck.collection() != CollectionKind::None {
        return Storage::Refs;
    }
    match ck.col_type() {
        ColumnType::Int | ColumnType::Bool => {
            if ck.is_nullable() {
                Storage::IntNull
            } else {
                Storage::Int
            }
        }
        ColumnType::Link => Storage::Int,
        ColumnType::Float => Storage::Float,
        ColumnType::Double => Storage::Double,
        ColumnType::Backlink => Storage::Backlink,
        _ => Storage::Refs,
    }
}

fn array_kind_of(storage: Storage) -> ArrayKind {
    match storage {
        Storage::Refs => ArrayKind::HasRefs,
        _ => ArrayKind::Normal,
    }
}

/// Handle on one cluster leaf.
#[derive(Debug, Clone, Copy)]
pub struct ClusterLeaf {
    arr: Array,
}

impl ClusterLeaf {
    /// Creates an empty leaf for the given column set.
    pub fn create(arena: &mut Arena, cols: &[ColKey]) -> TroveResult<ClusterLeaf> {
        let mut arr = Array::create_with_capacity(arena, ArrayKind::HasRefs, cols.len() + 2)?;
        let offsets = Array::create(arena, ArrayKind::Normal)?;
        arr.add(arena, offsets.ref_() as i64)?;
        arr.add(arena, tag_literal(0))?;
        for ck in cols {
            let storage = storage_of(*ck);
            let mut col = Array::create(arena, array_kind_of(storage))?;
            if storage == Storage::IntNull {
                col.add(arena, i64::MIN)?;
            }
            arr.add(arena, col.ref_() as i64)?;
        }
        Ok(ClusterLeaf { arr })
    }

    pub fn from_ref(r: Ref) -> ClusterLeaf {
        ClusterLeaf {
            arr: Array::from_ref(r),
        }
    }

    pub fn ref_(&self) -> Ref {
        self.arr.ref_()
    }

    fn offsets(&self, arena: &Arena) -> Array {
        Array::from_ref(self.arr.get(arena, 0) as Ref)
    }

    fn store_offsets(&mut self, arena: &mut Arena, offsets: Array) -> TroveResult<()> {
        self.arr.set(arena, 0, offsets.ref_() as i64)
    }

    fn col_array(&self, arena: &Arena, col: usize) -> Array {
        Array::from_ref(self.arr.get(arena, col + 2) as Ref)
    }

    fn store_col(&mut self, arena: &mut Arena, col: usize, arr: Array) -> TroveResult<()> {
        self.arr.set(arena, col + 2, arr.ref_() as i64)
    }

    pub fn num_rows(&self, arena: &Arena) -> usize {
        self.offsets(arena).size(arena)
    }

    pub fn base_key(&self, arena: &Arena) -> i64 {
        untag_literal(self.arr.get(arena, 1))
    }

    fn set_base_key(&mut self, arena: &mut Arena, base: i64) -> TroveResult<()> {
        self.arr.set(arena, 1, tag_literal(base))
    }

    pub fn key_at(&self, arena: &Arena, row: usize) -> ObjKey {
        ObjKey(self.base_key(arena) + self.offsets(arena).get(arena, row))
    }

    pub fn min_key(&self, arena: &Arena) -> Option<ObjKey> {
        if self.num_rows(arena) == 0 {
            None
        } else {
            Some(self.key_at(arena, 0))
        }
    }

    pub fn max_key(&self, arena: &Arena) -> Option<ObjKey> {
        let n = self.num_rows(arena);
        if n == 0 {
            None
        } else {
            Some(self.key_at(arena, n - 1))
        }
    }

    /// Locates a key: `Ok(row)` when present, `Err(insertion_row)` when
    /// absent.
    pub fn find_row(&self, arena: &Arena, key: ObjKey) -> Result<usize, usize> {
        let base = self.base_key(arena);
        let offsets = self.offsets(arena);
        let n = offsets.size(arena);
        if key.0 < base {
            return Err(0);
        }
        let target = key.0 - base;
        let pos = offsets.lower_bound(arena, target);
        if pos < n && offsets.get(arena, pos) == target {
            Ok(pos)
        } else {
            Err(pos)
        }
    }

    /// Inserts a row with default (null/zero) payloads, keeping key order.
    pub fn insert_row(&mut self, arena: &mut Arena, cols: &[ColKey], key: ObjKey) -> TroveResult<()> {
        let n = self.num_rows(arena);
        let mut base = self.base_key(arena);

        // An incoming key below the base rebases the whole offset array.
        if n == 0 {
            self.set_base_key(arena, key.0)?;
            base = key.0;
        } else if key.0 < base {
            let delta = base - key.0;
            let mut offsets = self.offsets(arena);
            for i in 0..n {
                let v = offsets.get(arena, i);
                offsets.set(arena, i, v + delta)?;
            }
            self.store_offsets(arena, offsets)?;
            self.set_base_key(arena, key.0)?;
            base = key.0;
        }

        let row = match self.find_row(arena, key) {
            Ok(_) => return Err(TroveError::InvalidKey { key: key.0 }),
            Err(pos) => pos,
        };

        let mut offsets = self.offsets(arena);
        offsets.insert(arena, row, key.0 - base)?;
        self.store_offsets(arena, offsets)?;

        for (i, ck) in cols.iter().enumerate() {
            let storage = storage_of(*ck);
            let mut col = self.col_array(arena, i);
            match storage {
                Storage::Int | Storage::Refs | Storage::Backlink => {
                    col.insert(arena, row, 0)?;
                }
                Storage::IntNull => {
                    let sentinel = col.get(arena, 0);
                    col.insert(arena, row + 1, sentinel)?;
                }
                Storage::Float => {
                    let bits = if ck.is_nullable() {
                        NULL_FLOAT_BITS as i64
                    } else {
                        0
                    };
                    col.insert(arena, row, bits)?;
                }
                Storage::Double => {
                    let bits = if ck.is_nullable() {
                        NULL_DOUBLE_BITS as i64
                    } else {
                        0
                    };
                    col.insert(arena, row, bits)?;
                }
            }
            self.store_col(arena, i, col)?;
        }
        Ok(())
    }

    /// Removes a row, freeing owned payload refs.
    pub fn erase_row(&mut self, arena: &mut Arena, cols: &[ColKey], row: usize) -> TroveResult<()> {
        let mut offsets = self.offsets(arena);
        offsets.erase(arena, row)?;
        self.store_offsets(arena, offsets)?;

        for (i, ck) in cols.iter().enumerate() {
            let storage = storage_of(*ck);
            let mut col = self.col_array(arena, i);
            match storage {
                Storage::IntNull => col.erase(arena, row + 1)?,
                Storage::Refs => {
                    let slot = col.get(arena, row);
                    if slot != 0 && !is_literal(slot) {
                        blob::free(arena, slot as Ref);
                    }
                    col.erase(arena, row)?;
                }
                Storage::Backlink => {
                    let slot = col.get(arena, row);
                    if slot != 0 && !is_literal(slot) {
                        Array::from_ref(slot as Ref).destroy(arena);
                    }
                    col.erase(arena, row)?;
                }
                _ => col.erase(arena, row)?,
            }
            self.store_col(arena, i, col)?;
        }
        Ok(())
    }

    /// Reads a cell.
    pub fn get_value(
        &self,
        arena: &Arena,
        cols: &[ColKey],
        col: usize,
        row: usize,
    ) -> TroveResult<Value> {
        let ck = cols[col];
        let storage = storage_of(ck);
        let arr = self.col_array(arena, col);
        Ok(match storage {
            Storage::Int => {
                let raw = arr.get(arena, row);
                match ck.col_type() {
                    ColumnType::Bool => Value::Bool(raw != 0),
                    ColumnType::Link => {
                        if raw == 0 {
                            Value::Null
                        } else {
                            Value::Link(ObjKey(raw - 1))
                        }
                    }
                    _ => Value::Int(raw),
                }
            }
            Storage::IntNull => {
                let sentinel = arr.get(arena, 0);
                let raw = arr.get(arena, row + 1);
                if raw == sentinel {
                    Value::Null
                } else if ck.col_type() == ColumnType::Bool {
                    Value::Bool(raw != 0)
                } else {
                    Value::Int(raw)
                }
            }
            Storage::Float => {
                let bits = arr.get(arena, row) as u32;
                if ck.is_nullable() && bits == NULL_FLOAT_BITS {
                    Value::Null
                } else {
                    Value::Float(f32::from_bits(bits))
                }
            }
            Storage::Double => {
                let bits = arr.get(arena, row) as u64;
                if ck.is_nullable() && bits == NULL_DOUBLE_BITS {
                    Value::Null
                } else {
                    Value::Double(f64::from_bits(bits))
                }
            }
            Storage::Refs => {
                let slot = arr.get(arena, row);
                if slot == 0 {
                    default_for_absent(ck)
                } else {
                    decode_ref_cell(arena, ck, slot as Ref)?
                }
            }
            Storage::Backlink => {
                let keys = read_backlinks(arena, &arr, row);
                Value::List(keys.into_iter().map(Value::Link).collect())
            }
        })
    }

    /// Writes a cell, checking the declared type and nullability.
    pub fn set_value(
        &mut self,
        arena: &mut Arena,
        cols: &[ColKey],
        col: usize,
        row: usize,
        value: &Value,
        column_name: &str,
    ) -> TroveResult<()> {
        let ck = cols[col];
        if value.is_null() && !ck.is_nullable() && storage_of(ck) != Storage::Refs {
            return Err(TroveError::ColumnNotNullable {
                column: column_name.to_string(),
            });
        }
        check_value_type(ck, value)?;

        let storage = storage_of(ck);
        let mut arr = self.col_array(arena, col);
        match storage {
            Storage::Int => {
                let raw = match value {
                    Value::Bool(b) => *b as i64,
                    Value::Int(v) => *v,
                    Value::Link(k) => k.0 + 1,
                    Value::Null => 0, // nullable link only; checked above
                    _ => unreachable!(),
                };
                arr.set(arena, row, raw)?;
            }
            Storage::IntNull => {
                let mut sentinel = arr.get(arena, 0);
                match value {
                    Value::Null => arr.set(arena, row + 1, sentinel)?,
                    _ => {
                        let raw = match value {
                            Value::Bool(b) => *b as i64,
                            Value::Int(v) => *v,
                            _ => unreachable!(),
                        };
                        if raw == sentinel {
                            sentinel = self.pick_sentinel(arena, &arr, raw);
                            // Rewrite old nulls to the new sentinel.
                            let size = arr.size(arena);
                            let old = arr.get(arena, 0);
                            for i in 1..size {
                                if arr.get(arena, i) == old {
                                    arr.set(arena, i, sentinel)?;
                                }
                            }
                            arr.set(arena, 0, sentinel)?;
                        }
                        arr.set(arena, row + 1, raw)?;
                    }
                }
            }
            Storage::Float => {
                let bits = match value {
                    Value::Null => NULL_FLOAT_BITS,
                    Value::Float(v) => {
                        if v.is_nan() {
                            CANON_FLOAT_NAN
                        } else {
                            v.to_bits()
                        }
                    }
                    _ => unreachable!(),
                };
                arr.set(arena, row, bits as i64)?;
            }
            Storage::Double => {
                let bits = match value {
                    Value::Null => NULL_DOUBLE_BITS,
                    Value::Double(v) => {
                        if v.is_nan() {
                            CANON_DOUBLE_NAN
                        } else {
                            v.to_bits()
                        }
                    }
                    _ => unreachable!(),
                };
                arr.set(arena, row, bits as i64)?;
            }
            Storage::Refs => {
                // Encode first so a failed write leaves the cell intact.
                let slot = if value.is_null() {
                    if !ck.is_nullable() && !ck.is_collection() {
                        return Err(TroveError::ColumnNotNullable {
                            column: column_name.to_string(),
                        });
                    }
                    0
                } else {
                    encode_ref_cell(arena, ck, value)? as i64
                };
                let old = arr.get(arena, row);
                if old != 0 {
                    blob::free(arena, old as Ref);
                }
                arr.set(arena, row, slot)?;
            }
            Storage::Backlink => {
                return Err(TroveError::IllegalCombination {
                    reason: "backlink columns are maintained automatically".to_string(),
                })
            }
        }
        self.store_col(arena, col, arr)?;
        Ok(())
    }

    fn pick_sentinel(&self, arena: &Arena, arr: &Array, taken: i64) -> i64 {
        let values = arr.to_vec(arena);
        let mut candidate = taken.wrapping_add(1);
        while values.contains(&candidate) {
            candidate = candidate.wrapping_add(1);
        }
        candidate
    }

    /// Adds `origin` to the backlink cell at (col, row).
    pub fn backlink_add(
        &mut self,
        arena: &mut Arena,
        col: usize,
        row: usize,
        origin: ObjKey,
    ) -> TroveResult<()> {
        let mut arr = self.col_array(arena, col);
        let slot = arr.get(arena, row);
        if slot == 0 {
            arr.set(arena, row, tag_literal(origin.0))?;
        } else if is_literal(slot) {
            let existing = untag_literal(slot);
            if existing != origin.0 {
                let mut list = Array::create(arena, ArrayKind::Normal)?;
                let (a, b) = if existing < origin.0 {
                    (existing, origin.0)
                } else {
                    (origin.0, existing)
                };
                list.add(arena, a)?;
                list.add(arena, b)?;
                arr.set(arena, row, list.ref_() as i64)?;
            }
        } else {
            let mut list = Array::from_ref(slot as Ref);
            let pos = list.lower_bound(arena, origin.0);
            if pos >= list.size(arena) || list.get(arena, pos) != origin.0 {
                list.insert(arena, pos, origin.0)?;
                arr.set(arena, row, list.ref_() as i64)?;
            }
        }
        self.store_col(arena, col, arr)
    }

    /// Removes `origin` from the backlink cell at (col, row).
    pub fn backlink_remove(
        &mut self,
        arena: &mut Arena,
        col: usize,
        row: usize,
        origin: ObjKey,
    ) -> TroveResult<()> {
        let mut arr = self.col_array(arena, col);
        let slot = arr.get(arena, row);
        if slot == 0 {
            return Ok(());
        }
        if is_literal(slot) {
            if untag_literal(slot) == origin.0 {
                arr.set(arena, row, 0)?;
            }
        } else {
            let mut list = Array::from_ref(slot as Ref);
            let pos = list.lower_bound(arena, origin.0);
            if pos < list.size(arena) && list.get(arena, pos) == origin.0 {
                list.erase(arena, pos)?;
                if list.size(arena) == 1 {
                    let last = list.get(arena, 0);
                    list.destroy(arena);
                    arr.set(arena, row, tag_literal(last))?;
                } else {
                    arr.set(arena, row, list.ref_() as i64)?;
                }
            }
        }
        self.store_col(arena, col, arr)
    }

    /// All origin keys recorded in the backlink cell at (col, row).
    pub fn backlinks(&self, arena: &Arena, col: usize, row: usize) -> Vec<ObjKey> {
        let arr = self.col_array(arena, col);
        read_backlinks(arena, &arr, row)
    }

    /// Splits at the midpoint; returns the new right sibling. Column
    /// arrays move their upper halves in lockstep, refs are handed over
    /// without deep copies.
    pub fn split(&mut self, arena: &mut Arena, cols: &[ColKey]) -> TroveResult<ClusterLeaf> {
        let n = self.num_rows(arena);
        let mid = n / 2;
        let mut right = ClusterLeaf::create(arena, cols)?;

        // Keys.
        let new_base = self.key_at(arena, mid).0;
        right.set_base_key(arena, new_base)?;
        {
            let mut roffsets = right.offsets(arena);
            for i in mid..n {
                let k = self.key_at(arena, i).0;
                roffsets.add(arena, k - new_base)?;
            }
            right.store_offsets(arena, roffsets)?;
        }
        let mut loffsets = self.offsets(arena);
        loffsets.truncate(arena, mid)?;
        self.store_offsets(arena, loffsets)?;

        // Columns, in lockstep.
        for (i, ck) in cols.iter().enumerate() {
            let storage = storage_of(*ck);
            let mut lcol = self.col_array(arena, i);
            let mut rcol = right.col_array(arena, i);
            match storage {
                Storage::IntNull => {
                    let sentinel = lcol.get(arena, 0);
                    rcol.set(arena, 0, sentinel)?;
                    for row in mid..n {
                        rcol.add(arena, lcol.get(arena, row + 1))?;
                    }
                    lcol.truncate(arena, mid + 1)?;
                }
                _ => {
                    for row in mid..n {
                        rcol.add(arena, lcol.get(arena, row))?;
                    }
                    lcol.truncate(arena, mid)?;
                }
            }
            self.store_col(arena, i, lcol)?;
            right.store_col(arena, i, rcol)?;
        }
        Ok(right)
    }

    /// Frees the leaf and every owned payload.
    pub fn destroy(self, arena: &mut Arena, cols: &[ColKey]) {
        let n = self.num_rows(arena);
        for (i, ck) in cols.iter().enumerate() {
            let storage = storage_of(*ck);
            let col = self.col_array(arena, i);
            match storage {
                Storage::Refs => {
                    for row in 0..n {
                        let slot = col.get(arena, row);
                        if slot != 0 {
                            blob::free(arena, slot as Ref);
                        }
                    }
                }
                Storage::Backlink => {
                    for row in 0..n {
                        let slot = col.get(arena, row);
                        if slot != 0 && !is_literal(slot) {
                            Array::from_ref(slot as Ref).destroy(arena);
                        }
                    }
                }
                _ => {}
            }
            col.destroy(arena);
        }
        self.offsets(arena).destroy(arena);
        self.arr.destroy(arena);
    }
}

fn read_backlinks(arena: &Arena, arr: &Array, row: usize) -> Vec<ObjKey> {
    let slot = arr.get(arena, row);
    if slot == 0 {
        Vec::new()
    } else if is_literal(slot) {
        vec![ObjKey(untag_literal(slot))]
    } else {
        Array::from_ref(slot as Ref)
            .to_vec(arena)
            .into_iter()
            .map(ObjKey)
            .collect()
    }
}

/// Default value surfaced when a ref cell holds the null ref but the
/// column is not nullable.
fn default_for_absent(ck: ColKey) -> Value {
    if ck.is_nullable() {
        return Value::Null;
    }
    match ck.collection() {
        CollectionKind::List => return Value::List(Vec::new()),
        CollectionKind::Set => return Value::Set(Vec::new()),
        CollectionKind::Dictionary => return Value::Dictionary(Vec::new()),
        CollectionKind::None => {}
    }
    match ck.col_type() {
        ColumnType::String => Value::String(String::new()),
        ColumnType::Binary => Value::Binary(Vec::new()),
        ColumnType::Timestamp => Value::Timestamp(Timestamp::new(0, 0).unwrap()),
        ColumnType::Decimal => Value::Decimal(Decimal128::zero()),
        ColumnType::ObjectId => Value::ObjectId(ObjectId::from_bytes([0; 12])),
        ColumnType::Uuid => Value::Uuid(Uuid::nil()),
        _ => Value::Null,
    }
}

fn decode_ref_cell(arena: &Arena, ck: ColKey, r: Ref) -> TroveResult<Value> {
    if ck.is_collection() || ck.col_type() == ColumnType::Mixed {
        return payload::load_mixed(arena, r);
    }
    let bytes = blob::data(arena, r);
    Ok(match ck.col_type() {
        ColumnType::String => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ColumnType::Binary => Value::Binary(bytes.to_vec()),
        ColumnType::Timestamp => Value::Timestamp(payload::decode_timestamp(bytes)?),
        ColumnType::Decimal => {
            let mut raw = [0u8; 16];
            raw.copy_from_slice(&bytes[..16]);
            Value::Decimal(Decimal128::from_bytes(&raw))
        }
        ColumnType::ObjectId => {
            let mut raw = [0u8; 12];
            raw.copy_from_slice(&bytes[..12]);
            Value::ObjectId(ObjectId::from_bytes(raw))
        }
        ColumnType::Uuid => {
            let mut raw = [0u8; 16];
            raw.copy_from_slice(&bytes[..16]);
            Value::Uuid(Uuid::from_bytes(raw))
        }
        ColumnType::TypedLink => Value::TypedLink(payload::decode_typed_link(bytes)),
        other => {
            return Err(TroveError::Corrupted {
                reason: format!("unexpected ref cell for column type {}", other.name()),
            })
        }
    })
}

fn encode_ref_cell(arena: &mut Arena, ck: ColKey, value: &Value) -> TroveResult<Ref> {
    if ck.is_collection() || ck.col_type() == ColumnType::Mixed {
        return payload::store_mixed(arena, value);
    }
    match (ck.col_type(), value) {
        (ColumnType::String, Value::String(s)) => blob::create_string(arena, s),
        (ColumnType::Binary, Value::Binary(b)) => blob::create_binary(arena, b),
        (ColumnType::Timestamp, Value::Timestamp(ts)) => {
            blob::create(arena, &payload::encode_timestamp(ts))
        }
        (ColumnType::Decimal, Value::Decimal(d)) => blob::create(arena, &d.to_bytes()),
        (ColumnType::ObjectId, Value::ObjectId(oid)) => blob::create(arena, oid.as_bytes()),
        (ColumnType::Uuid, Value::Uuid(u)) => blob::create(arena, u.as_bytes()),
        (ColumnType::TypedLink, Value::TypedLink(l)) => {
            blob::create(arena, &payload::encode_typed_link(l))
        }
        (ty, v) => Err(TroveError::TypeMismatch {
            expected: ty.name().to_string(),
            actual: v.type_name().to_string(),
        }),
    }
}

/// Validates a value against the column's declared type.
fn check_value_type(ck: ColKey, value: &Value) -> TroveResult<()> {
    if value.is_null() {
        return Ok(()); // nullability handled by the caller
    }
    let mismatch = |expected: &str| TroveError::TypeMismatch {
        expected: expected.to_string(),
        actual: value.type_name().to_string(),
    };
    match ck.collection() {
        CollectionKind::List => {
            return if matches!(value, Value::List(_)) {
                Ok(())
            } else {
                Err(mismatch("list"))
            }
        }
        CollectionKind::Set => {
            return if matches!(value, Value::Set(_)) {
                Ok(())
            } else {
                Err(mismatch("set"))
            }
        }
        CollectionKind::Dictionary => {
            return if matches!(value, Value::Dictionary(_)) {
                Ok(())
            } else {
                Err(mismatch("dictionary"))
            }
        }
        CollectionKind::None => {}
    }
    let ok = match ck.col_type() {
        ColumnType::Int => matches!(value, Value::Int(_)),
        ColumnType::Bool => matches!(value, Value::Bool(_)),
        ColumnType::String => matches!(value, Value::String(_)),
        ColumnType::Binary => matches!(value, Value::Binary(_)),
        ColumnType::Float => matches!(value, Value::Float(_)),
        ColumnType::Double => matches!(value, Value::Double(_)),
        ColumnType::Decimal => matches!(value, Value::Decimal(_)),
        ColumnType::Timestamp => matches!(value, Value::Timestamp(_)),
        ColumnType::ObjectId => matches!(value, Value::ObjectId(_)),
        ColumnType::Uuid => matches!(value, Value::Uuid(_)),
        ColumnType::Link => matches!(value, Value::Link(_)),
        ColumnType::TypedLink => matches!(value, Value::TypedLink(_)),
        ColumnType::Mixed => !matches!(value, Value::Link(_)),
        ColumnType::Backlink => false,
    };
    if ok {
        Ok(())
    } else {
        Err(mismatch(ck.col_type().name()))
    }
}
