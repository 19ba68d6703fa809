// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Column types and the dynamically typed `Value` cell.
//!
//! `Value` is the tagged union flowing through the whole engine: column
//! reads and writes, query operands, sort comparators and JSON export all
//! speak `Value`. Columns declare a `ColumnType`; a `Mixed` column stores
//! any scalar or link value with a per-cell tag.
//!
//! ## Comparison semantics
//!
//! Two comparison entry points exist and they deliberately differ on null:
//!
//! - `sort_cmp`: total order used by sort descriptors; null sorts below
//!   any non-null value, NaN below any other number.
//! - `query_cmp`: partial order used by `<`, `<=`, `>`, `>=`; returns
//!   `None` when either side is null or the pair is not comparable, which
//!   the evaluator treats as "no match".
//!
//! Numerics (Int, Float, Double, Decimal) compare across types on the
//! shared numeric axis.

pub mod decimal;
pub mod object_id;
pub mod timestamp;

pub use decimal::Decimal128;
pub use object_id::ObjectId;
pub use timestamp::Timestamp;

use crate::error::{TroveError, TroveResult};
use crate::keys::{ObjKey, ObjLink};
use std::cmp::Ordering;
use uuid::Uuid;

/// Declared type of a column (and tag of a Mixed cell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ColumnType {
    Int = 0,
    Bool = 1,
    String = 2,
    Binary = 3,
    Mixed = 4,
    Timestamp = 5,
    Float = 6,
    Double = 7,
    Decimal = 8,
    Link = 9,
    TypedLink = 10,
    ObjectId = 11,
    Uuid = 12,
    /// Hidden inverse-link column; never user-declared.
    Backlink = 13,
}

impl ColumnType {
    /// Reconstructs a type from its persisted tag.
    pub fn from_tag(tag: u8) -> ColumnType {
        match tag {
            0 => ColumnType::Int,
            1 => ColumnType::Bool,
            2 => ColumnType::String,
            3 => ColumnType::Binary,
            4 => ColumnType::Mixed,
            5 => ColumnType::Timestamp,
            6 => ColumnType::Float,
            7 => ColumnType::Double,
            8 => ColumnType::Decimal,
            9 => ColumnType::Link,
            10 => ColumnType::TypedLink,
            11 => ColumnType::ObjectId,
            12 => ColumnType::Uuid,
            13 => ColumnType::Backlink,
            _ => ColumnType::Mixed,
        }
    }

    /// Whether a search index may be attached to a column of this type.
    pub fn supports_index(&self) -> bool {
        matches!(
            self,
            ColumnType::Int
                | ColumnType::Bool
                | ColumnType::String
                | ColumnType::Timestamp
                | ColumnType::ObjectId
                | ColumnType::Uuid
                | ColumnType::Mixed
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Int => "int",
            ColumnType::Bool => "bool",
            ColumnType::String => "string",
            ColumnType::Binary => "binary",
            ColumnType::Mixed => "mixed",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Float => "float",
            ColumnType::Double => "double",
            ColumnType::Decimal => "decimal",
            ColumnType::Link => "link",
            ColumnType::TypedLink => "typedLink",
            ColumnType::ObjectId => "objectId",
            ColumnType::Uuid => "uuid",
            ColumnType::Backlink => "backlink",
        }
    }
}

/// Dynamically typed cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Bool(bool),
    String(String),
    Binary(Vec<u8>),
    Float(f32),
    Double(f64),
    Decimal(Decimal128),
    Timestamp(Timestamp),
    ObjectId(ObjectId),
    Uuid(Uuid),
    Link(ObjKey),
    TypedLink(ObjLink),
    List(Vec<Value>),
    Set(Vec<Value>),
    Dictionary(Vec<(String, Value)>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The cell's dynamic type; `None` for null.
    pub fn data_type(&self) -> Option<ColumnType> {
        match self {
            Value::Null => None,
            Value::Int(_) => Some(ColumnType::Int),
            Value::Bool(_) => Some(ColumnType::Bool),
            Value::String(_) => Some(ColumnType::String),
            Value::Binary(_) => Some(ColumnType::Binary),
            Value::Float(_) => Some(ColumnType::Float),
            Value::Double(_) => Some(ColumnType::Double),
            Value::Decimal(_) => Some(ColumnType::Decimal),
            Value::Timestamp(_) => Some(ColumnType::Timestamp),
            Value::ObjectId(_) => Some(ColumnType::ObjectId),
            Value::Uuid(_) => Some(ColumnType::Uuid),
            Value::Link(_) => Some(ColumnType::Link),
            Value::TypedLink(_) => Some(ColumnType::TypedLink),
            Value::List(_) | Value::Set(_) | Value::Dictionary(_) => None,
        }
    }

    /// Type name exposed by the `.@type` post-op.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Dictionary(_) => "dictionary",
            other => other.data_type().map(|t| t.name()).unwrap_or("null"),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::Int(_) | Value::Float(_) | Value::Double(_) | Value::Decimal(_)
        )
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            Value::Decimal(d) => Some(d.to_f64()),
            _ => None,
        }
    }

    /// Equality under query semantics: null equals null, numerics compare
    /// across types, everything else requires matching types.
    pub fn query_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            _ => self.query_cmp(other) == Some(Ordering::Equal),
        }
    }

    /// Ordered comparison under query semantics. `None` when either side
    /// is null or the pair is not comparable; ordered operators then do
    /// not match.
    pub fn query_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (a, b) if a.is_numeric() && b.is_numeric() => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => numeric_cmp(x, y),
                _ => None,
            },
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
            (Value::Binary(a), Value::Binary(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::Binary(b)) => Some(a.as_bytes().cmp(&b[..])),
            (Value::Binary(a), Value::String(b)) => Some(a[..].cmp(b.as_bytes())),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::ObjectId(a), Value::ObjectId(b)) => Some(a.cmp(b)),
            (Value::Uuid(a), Value::Uuid(b)) => Some(a.cmp(b)),
            (Value::Link(a), Value::Link(b)) => Some(a.cmp(b)),
            (Value::TypedLink(a), Value::TypedLink(b)) => {
                if a == b {
                    Some(Ordering::Equal)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Total order used by sort descriptors. Null sorts below any
    /// non-null; values of different kinds order by kind rank.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        let ra = self.sort_rank();
        let rb = other.sort_rank();
        if ra != rb {
            return ra.cmp(&rb);
        }
        self.query_cmp(other).unwrap_or_else(|| {
            // Same rank but incomparable: NaN against a number, or equal
            // sentinel kinds. NaN orders below every other number.
            match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => match (a.is_nan(), b.is_nan()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Less,
                    (false, true) => Ordering::Greater,
                    (false, false) => Ordering::Equal,
                },
                _ => Ordering::Equal,
            }
        })
    }

    fn sort_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Int(_) | Value::Float(_) | Value::Double(_) | Value::Decimal(_) => 1,
            Value::Bool(_) => 2,
            Value::String(_) => 3,
            Value::Binary(_) => 4,
            Value::Timestamp(_) => 5,
            Value::ObjectId(_) => 6,
            Value::Uuid(_) => 7,
            Value::Link(_) => 8,
            Value::TypedLink(_) => 9,
            Value::List(_) => 10,
            Value::Set(_) => 11,
            Value::Dictionary(_) => 12,
        }
    }

    /// Parses a JSON payload into a Mixed value.
    ///
    /// JSON numbers map to Int when integral, Double otherwise; arrays map
    /// to List and objects to Dictionary.
    pub fn from_json(payload: &str) -> TroveResult<Value> {
        let parsed: serde_json::Value =
            serde_json::from_str(payload).map_err(|e| TroveError::MalformedJson {
                reason: e.to_string(),
            })?;
        Ok(Self::from_json_value(parsed))
    }

    fn from_json_value(v: serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Self::from_json_value).collect())
            }
            serde_json::Value::Object(map) => Value::Dictionary(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_json_value(v)))
                    .collect(),
            ),
        }
    }
}

fn numeric_cmp(a: f64, b: f64) -> Option<Ordering> {
    a.partial_cmp(&b)
}

/// Numeric promotion rank on the {Int, Float, Double, Decimal} semilattice.
fn numeric_rank(v: &Value) -> Option<u8> {
    match v {
        Value::Int(_) => Some(0),
        Value::Float(_) => Some(1),
        Value::Double(_) => Some(2),
        Value::Decimal(_) => Some(3),
        _ => None,
    }
}

/// Arithmetic on the numeric semilattice; the result carries the higher
/// of the two operand types. Integer arithmetic wraps; division by an
/// integer zero yields null.
pub fn numeric_binop(op: char, a: &Value, b: &Value) -> Option<Value> {
    let (ra, rb) = (numeric_rank(a)?, numeric_rank(b)?);
    let rank = ra.max(rb);
    match rank {
        0 => {
            let (x, y) = match (a, b) {
                (Value::Int(x), Value::Int(y)) => (*x, *y),
                _ => unreachable!(),
            };
            Some(match op {
                '+' => Value::Int(x.wrapping_add(y)),
                '-' => Value::Int(x.wrapping_sub(y)),
                '*' => Value::Int(x.wrapping_mul(y)),
                '/' => {
                    if y == 0 {
                        Value::Null
                    } else {
                        Value::Int(x.wrapping_div(y))
                    }
                }
                _ => return None,
            })
        }
        3 => {
            // Decimal arithmetic is carried out in floating point and
            // re-wrapped; exactness is only guaranteed for comparisons.
            let (x, y) = (a.as_f64()?, b.as_f64()?);
            let r = apply_f64(op, x, y)?;
            Some(Value::Decimal(Decimal128::parse(&format!("{}", r)).ok()?))
        }
        1 if ra == rb => {
            let (x, y) = match (a, b) {
                (Value::Float(x), Value::Float(y)) => (*x, *y),
                _ => unreachable!(),
            };
            let r = apply_f64(op, x as f64, y as f64)?;
            Some(Value::Float(r as f32))
        }
        _ => {
            let r = apply_f64(op, a.as_f64()?, b.as_f64()?)?;
            Some(Value::Double(r))
        }
    }
}

fn apply_f64(op: char, x: f64, y: f64) -> Option<f64> {
    Some(match op {
        '+' => x + y,
        '-' => x - y,
        '*' => x * y,
        '/' => x / y,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_comparisons() {
        assert!(Value::Null.query_eq(&Value::Null));
        assert!(!Value::Null.query_eq(&Value::Int(0)));
        assert_eq!(Value::Null.query_cmp(&Value::Int(1)), None);
        assert_eq!(Value::Null.sort_cmp(&Value::Int(-100)), Ordering::Less);
    }

    #[test]
    fn test_cross_numeric_compare() {
        assert!(Value::Int(2).query_eq(&Value::Double(2.0)));
        assert_eq!(
            Value::Float(1.5).query_cmp(&Value::Int(2)),
            Some(Ordering::Less)
        );
        assert!(Value::Decimal(Decimal128::parse("2.5").unwrap())
            .query_eq(&Value::Double(2.5)));
    }

    #[test]
    fn test_string_binary_compare() {
        let s = Value::String("abc".into());
        let b = Value::Binary(b"abc".to_vec());
        assert!(s.query_eq(&b));
        assert_eq!(
            Value::String("abd".into()).query_cmp(&b),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn test_nan_sorts_below_numbers() {
        let nan = Value::Double(f64::NAN);
        assert_eq!(nan.sort_cmp(&Value::Int(0)), Ordering::Less);
        assert_eq!(nan.sort_cmp(&Value::Null), Ordering::Greater);
    }

    #[test]
    fn test_from_json() {
        let v = Value::from_json(r#"{"a": 1, "b": [true, null, 2.5]}"#).unwrap();
        match v {
            Value::Dictionary(entries) => {
                assert_eq!(entries[0], ("a".to_string(), Value::Int(1)));
                match &entries[1].1 {
                    Value::List(items) => {
                        assert_eq!(items[0], Value::Bool(true));
                        assert_eq!(items[1], Value::Null);
                        assert_eq!(items[2], Value::Double(2.5));
                    }
                    other => panic!("expected list, got {:?}", other),
                }
            }
            other => panic!("expected dictionary, got {:?}", other),
        }
        assert!(Value::from_json("{nope").is_err());
    }

    #[test]
    fn test_numeric_binop_promotion() {
        assert_eq!(
            numeric_binop('+', &Value::Int(1), &Value::Int(2)),
            Some(Value::Int(3))
        );
        assert_eq!(
            numeric_binop('*', &Value::Int(2), &Value::Double(1.5)),
            Some(Value::Double(3.0))
        );
        assert_eq!(
            numeric_binop('/', &Value::Int(1), &Value::Int(0)),
            Some(Value::Null)
        );
    }

    #[test]
    fn test_type_names() {
        assert_eq!(Value::Int(1).type_name(), "int");
        assert_eq!(Value::Null.type_name(), "null");
        assert_eq!(Value::List(vec![]).type_name(), "list");
    }
}
