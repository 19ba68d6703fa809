// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Cell payload encodings for ref-backed columns.
//!
//! Fixed-width scalars (timestamp, uuid, object id, decimal, typed link)
//! have dedicated little-endian layouts; Mixed cells and collection cells
//! use the tagged self-describing encoding, which nests for collections
//! inside Mixed.

use crate::alloc::{Arena, Ref};
use crate::array::blob;
use crate::error::{TroveError, TroveResult};
use crate::keys::{ObjKey, ObjLink, TableKey};
use crate::value::{Decimal128, ObjectId, Timestamp, Value};
use uuid::Uuid;

// Mixed encoding tags.
const TAG_INT: u8 = 1;
const TAG_BOOL: u8 = 2;
const TAG_STRING: u8 = 3;
const TAG_BINARY: u8 = 4;
const TAG_FLOAT: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_DECIMAL: u8 = 7;
const TAG_TIMESTAMP: u8 = 8;
const TAG_OBJECT_ID: u8 = 9;
const TAG_UUID: u8 = 10;
const TAG_LINK: u8 = 11;
const TAG_TYPED_LINK: u8 = 12;
const TAG_LIST: u8 = 13;
const TAG_SET: u8 = 14;
const TAG_DICTIONARY: u8 = 15;
const TAG_NULL: u8 = 16;

/// Encodes a timestamp into its 12-byte cell form.
pub fn encode_timestamp(ts: &Timestamp) -> [u8; 12] {
    let mut out = [0u8; 12];
    out[..8].copy_from_slice(&ts.seconds().to_le_bytes());
    out[8..].copy_from_slice(&ts.nanoseconds().to_le_bytes());
    out
}

pub fn decode_timestamp(bytes: &[u8]) -> TroveResult<Timestamp> {
    let s = i64::from_le_bytes(bytes[..8].try_into().unwrap());
    let ns = i32::from_le_bytes(bytes[8..12].try_into().unwrap());
    Timestamp::new(s, ns)
}

pub fn encode_typed_link(link: &ObjLink) -> [u8; 12] {
    let mut out = [0u8; 12];
    out[..4].copy_from_slice(&link.table.0.to_le_bytes());
    out[4..].copy_from_slice(&link.key.0.to_le_bytes());
    out
}

pub fn decode_typed_link(bytes: &[u8]) -> ObjLink {
    let table = u32::from_le_bytes(bytes[..4].try_into().unwrap());
    let key = i64::from_le_bytes(bytes[4..12].try_into().unwrap());
    ObjLink::new(TableKey(table), ObjKey(key))
}

/// Serializes a Mixed (or collection) value into the tagged byte form.
pub fn encode_mixed(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Int(v) => {
            out.push(TAG_INT);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::Bool(v) => {
            out.push(TAG_BOOL);
            out.push(*v as u8);
        }
        Value::String(s) => {
            out.push(TAG_STRING);
            out.extend_from_slice(&(s.len() as u32).to_le_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        Value::Binary(b) => {
            out.push(TAG_BINARY);
            out.extend_from_slice(&(b.len() as u32).to_le_bytes());
            out.extend_from_slice(b);
        }
        Value::Float(v) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::Double(v) => {
            out.push(TAG_DOUBLE);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::Decimal(d) => {
            out.push(TAG_DECIMAL);
            out.extend_from_slice(&d.to_bytes());
        }
        Value::Timestamp(ts) => {
            out.push(TAG_TIMESTAMP);
            out.extend_from_slice(&encode_timestamp(ts));
        }
        Value::ObjectId(oid) => {
            out.push(TAG_OBJECT_ID);
            out.extend_from_slice(oid.as_bytes());
        }
        Value::Uuid(u) => {
            out.push(TAG_UUID);
            out.extend_from_slice(u.as_bytes());
        }
        Value::Link(k) => {
            out.push(TAG_LINK);
            out.extend_from_slice(&k.0.to_le_bytes());
        }
        Value::TypedLink(l) => {
            out.push(TAG_TYPED_LINK);
            out.extend_from_slice(&encode_typed_link(l));
        }
        Value::List(items) => {
            out.push(TAG_LIST);
            out.extend_from_slice(&(items.len() as u32).to_le_bytes());
            for item in items {
                encode_mixed(item, out);
            }
        }
        Value::Set(items) => {
            out.push(TAG_SET);
            out.extend_from_slice(&(items.len() as u32).to_le_bytes());
            for item in items {
                encode_mixed(item, out);
            }
        }
        Value::Dictionary(entries) => {
            out.push(TAG_DICTIONARY);
            out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
            for (k, v) in entries {
                out.extend_from_slice(&(k.len() as u32).to_le_bytes());
                out.extend_from_slice(k.as_bytes());
                encode_mixed(v, out);
            }
        }
    }
}

fn corrupt() -> TroveError {
    TroveError::Corrupted {
        reason: "truncated mixed payload".to_string(),
    }
}

fn take<'a>(bytes: &'a [u8], pos: &mut usize, n: usize) -> TroveResult<&'a [u8]> {
    let s = bytes.get(*pos..*pos + n).ok_or_else(corrupt)?;
    *pos += n;
    Ok(s)
}

/// Deserializes a Mixed value, advancing `pos`.
pub fn decode_mixed(bytes: &[u8], pos: &mut usize) -> TroveResult<Value> {
    let tag = *bytes.get(*pos).ok_or_else(corrupt)?;
    *pos += 1;
    Ok(match tag {
        TAG_NULL => Value::Null,
        TAG_INT => Value::Int(i64::from_le_bytes(
            take(bytes, pos, 8)?.try_into().unwrap(),
        )),
        TAG_BOOL => Value::Bool(take(bytes, pos, 1)?[0] != 0),
        TAG_STRING => {
            let len = u32::from_le_bytes(take(bytes, pos, 4)?.try_into().unwrap()) as usize;
            Value::String(String::from_utf8_lossy(take(bytes, pos, len)?).into_owned())
        }
        TAG_BINARY => {
            let len = u32::from_le_bytes(take(bytes, pos, 4)?.try_into().unwrap()) as usize;
            Value::Binary(take(bytes, pos, len)?.to_vec())
        }
        TAG_FLOAT => Value::Float(f32::from_le_bytes(
            take(bytes, pos, 4)?.try_into().unwrap(),
        )),
        TAG_DOUBLE => Value::Double(f64::from_le_bytes(
            take(bytes, pos, 8)?.try_into().unwrap(),
        )),
        TAG_DECIMAL => Value::Decimal(Decimal128::from_bytes(
            take(bytes, pos, 16)?.try_into().unwrap(),
        )),
        TAG_TIMESTAMP => Value::Timestamp(decode_timestamp(take(bytes, pos, 12)?)?),
        TAG_OBJECT_ID => {
            let mut raw = [0u8; 12];
            raw.copy_from_slice(take(bytes, pos, 12)?);
            Value::ObjectId(ObjectId::from_bytes(raw))
        }
        TAG_UUID => {
            let mut raw = [0u8; 16];
            raw.copy_from_slice(take(bytes, pos, 16)?);
            Value::Uuid(Uuid::from_bytes(raw))
        }
        TAG_LINK => Value::Link(ObjKey(i64::from_le_bytes(
            take(bytes, pos, 8)?.try_into().unwrap(),
        ))),
        TAG_TYPED_LINK => Value::TypedLink(decode_typed_link(take(bytes, pos, 12)?)),
        TAG_LIST | TAG_SET => {
            let count = u32::from_le_bytes(take(bytes, pos, 4)?.try_into().unwrap()) as usize;
            let mut items = Vec::with_capacity(count.min(4096));
            for _ in 0..count {
                items.push(decode_mixed(bytes, pos)?);
            }
            if tag == TAG_LIST {
                Value::List(items)
            } else {
                Value::Set(items)
            }
        }
        TAG_DICTIONARY => {
            let count = u32::from_le_bytes(take(bytes, pos, 4)?.try_into().unwrap()) as usize;
            let mut entries = Vec::with_capacity(count.min(4096));
            for _ in 0..count {
                let klen = u32::from_le_bytes(take(bytes, pos, 4)?.try_into().unwrap()) as usize;
                let key = String::from_utf8_lossy(take(bytes, pos, klen)?).into_owned();
                let value = decode_mixed(bytes, pos)?;
                entries.push((key, value));
            }
            Value::Dictionary(entries)
        }
        _ => return Err(corrupt()),
    })
}

/// Writes a Mixed value as a fresh blob, returning the blob ref.
pub fn store_mixed(arena: &mut Arena, value: &Value) -> TroveResult<Ref> {
    let mut buf = Vec::new();
    encode_mixed(value, &mut buf);
    blob::create(arena, &buf)
}

/// Reads a Mixed value from a blob ref.
pub fn load_mixed(arena: &Arena, r: Ref) -> TroveResult<Value> {
    let bytes = blob::data(arena, r).to_vec();
    let mut pos = 0;
    decode_mixed(&bytes, &mut pos)
}
