// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Ordering descriptors: sort, distinct, limit.
//!
//! Descriptors are plain values chained onto a view. Sorting is stable
//! so later clauses and re-applications break ties deterministically;
//! null sorts below any non-null value of the same column.

use crate::error::{TroveError, TroveResult};
use crate::group::Group;
use crate::keys::{ObjKey, TableKey};
use crate::value::{ColumnType, Value};
use std::cmp::Ordering;

/// One post-filter operation on a view.
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptor {
    /// (column chain, ascending) clauses, applied as one composite key.
    Sort(Vec<(Vec<String>, bool)>),
    /// Column chains whose value tuple deduplicates rows.
    Distinct(Vec<Vec<String>>),
    /// Keeps the first `n` rows.
    Limit(usize),
}

impl Descriptor {
    /// Applies this descriptor to `keys` in place.
    pub fn apply(&self, g: &Group, table: TableKey, keys: &mut Vec<ObjKey>) -> TroveResult<()> {
        match self {
            Descriptor::Sort(clauses) => apply_sort(g, table, keys, clauses),
            Descriptor::Distinct(paths) => apply_distinct(g, table, keys, paths),
            Descriptor::Limit(n) => {
                keys.truncate(*n);
                Ok(())
            }
        }
    }
}

/// Value of a dotted column chain for one row. A broken link yields
/// null rather than an error.
pub fn chain_value(
    g: &Group,
    table: TableKey,
    key: ObjKey,
    path: &[String],
) -> TroveResult<Value> {
    let mut current_table = table;
    let mut current_key = key;
    for (i, name) in path.iter().enumerate() {
        let t = g.table(current_table)?;
        let pos = t.col_position(name)?;
        let obj = match g.obj(current_table, current_key) {
            Ok(o) => o,
            Err(_) => return Ok(Value::Null),
        };
        let value = obj.get_at(pos)?;
        if i == path.len() - 1 {
            return Ok(value);
        }
        match value {
            Value::Link(next) => {
                current_table = t.cols[pos]
                    .target_table
                    .ok_or_else(|| TroveError::InvalidQuery {
                        message: format!("link column '{}' has no target", name),
                    })?;
                current_key = next;
            }
            _ => return Ok(Value::Null),
        }
    }
    Ok(Value::Null)
}

fn apply_sort(
    g: &Group,
    table: TableKey,
    keys: &mut Vec<ObjKey>,
    clauses: &[(Vec<String>, bool)],
) -> TroveResult<()> {
    // Pre-fetch the sort tuples, then run one stable sort.
    let mut decorated: Vec<(Vec<Value>, ObjKey)> = Vec::with_capacity(keys.len());
    for key in keys.iter() {
        let mut tuple = Vec::with_capacity(clauses.len());
        for (path, _) in clauses {
            tuple.push(chain_value(g, table, *key, path)?);
        }
        decorated.push((tuple, *key));
    }
    decorated.sort_by(|(a, _), (b, _)| {
        for (i, (_, ascending)) in clauses.iter().enumerate() {
            let ord = a[i].sort_cmp(&b[i]);
            let ord = if *ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    *keys = decorated.into_iter().map(|(_, k)| k).collect();
    Ok(())
}

fn apply_distinct(
    g: &Group,
    table: TableKey,
    keys: &mut Vec<ObjKey>,
    paths: &[Vec<String>],
) -> TroveResult<()> {
    let mut seen: Vec<Vec<Value>> = Vec::new();
    let mut kept = Vec::with_capacity(keys.len());
    for key in keys.iter() {
        let mut tuple = Vec::with_capacity(paths.len());
        for path in paths {
            tuple.push(chain_value(g, table, *key, path)?);
        }
        let fresh = !seen
            .iter()
            .any(|t| t.iter().zip(&tuple).all(|(a, b)| a.sort_cmp(b) == Ordering::Equal));
        if fresh {
            seen.push(tuple);
            kept.push(*key);
        }
    }
    *keys = kept;
    Ok(())
}

/// Validates that a column admits min/max aggregation.
pub fn check_minmax_column(ty: ColumnType) -> TroveResult<()> {
    match ty {
        ColumnType::Int
        | ColumnType::Float
        | ColumnType::Double
        | ColumnType::Decimal
        | ColumnType::Timestamp
        | ColumnType::Mixed => Ok(()),
        other => Err(TroveError::IllegalCombination {
            reason: format!("cannot aggregate column of type {}", other.name()),
        }),
    }
}

/// Validates that a column admits sum/avg aggregation.
pub fn check_numeric_column(ty: ColumnType) -> TroveResult<()> {
    match ty {
        ColumnType::Int
        | ColumnType::Float
        | ColumnType::Double
        | ColumnType::Decimal
        | ColumnType::Mixed => Ok(()),
        other => Err(TroveError::IllegalCombination {
            reason: format!("cannot sum column of type {}", other.name()),
        }),
    }
}
