// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Materialized query results.
//!
//! A `TableView` owns the matching object keys, the descriptor chain
//! that produced their order, and the content version of the source
//! table at evaluation time. It can detect staleness (`is_in_sync`) and
//! re-evaluate itself in place (`sync_if_needed`), re-applying the
//! descriptor chain verbatim.
//!
//! A view anchored on a specific row (a backlink view) becomes
//! permanently in-sync and empty once its anchor is deleted.

pub mod descriptor;

#[cfg(test)]
mod view_test;

use crate::error::{TroveError, TroveResult};
use crate::group::Group;
use crate::keys::{ObjKey, TableKey};
use crate::tql::Query;
use crate::value::{numeric_binop, Value};
use descriptor::{chain_value, check_minmax_column, check_numeric_column, Descriptor};

/// Anchor of a backlink-derived view.
#[derive(Debug, Clone, Copy)]
struct Anchor {
    table: TableKey,
    key: ObjKey,
    origin_table: TableKey,
    origin_col: usize,
}

/// Materialized, possibly ordered, list of matching rows.
#[derive(Debug, Clone)]
pub struct TableView {
    pub table: TableKey,
    keys: Vec<ObjKey>,
    descriptors: Vec<Descriptor>,
    version: u64,
    query: Option<Query>,
    anchor: Option<Anchor>,
    detached: bool,
}

impl TableView {
    /// Builds a view from an evaluated query.
    pub(crate) fn from_query(
        g: &Group,
        query: Query,
        keys: Vec<ObjKey>,
    ) -> TroveResult<TableView> {
        let version = g.table(query.table)?.content_version;
        let mut view = TableView {
            table: query.table,
            keys,
            descriptors: query.descriptors.clone(),
            version,
            query: Some(query),
            anchor: None,
            detached: false,
        };
        view.apply_descriptors(g)?;
        Ok(view)
    }

    /// Builds a view over the rows of `origin_table` that link to
    /// `anchor` through `origin_col`.
    pub fn from_backlinks(
        g: &Group,
        anchor_table: TableKey,
        anchor: ObjKey,
        origin_table: TableKey,
        origin_col: usize,
    ) -> TroveResult<TableView> {
        let obj = g.obj(anchor_table, anchor)?;
        let keys = obj.backlinks(origin_table, origin_col);
        let version = g.table(origin_table)?.content_version;
        Ok(TableView {
            table: origin_table,
            keys,
            descriptors: Vec::new(),
            version,
            query: None,
            anchor: Some(Anchor {
                table: anchor_table,
                key: anchor,
                origin_table,
                origin_col,
            }),
            detached: false,
        })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key at view position `i`.
    pub fn get_key(&self, i: usize) -> Option<ObjKey> {
        self.keys.get(i).copied()
    }

    pub fn keys(&self) -> &[ObjKey] {
        &self.keys
    }

    pub fn iter(&self) -> impl Iterator<Item = ObjKey> + '_ {
        self.keys.iter().copied()
    }

    /// First view position whose `column` equals `value`.
    pub fn find_first_value(
        &self,
        g: &Group,
        column: &str,
        value: &Value,
    ) -> TroveResult<Option<usize>> {
        for (i, key) in self.keys.iter().enumerate() {
            let v = g.obj(self.table, *key)?.get(column)?;
            if v.query_eq(value) {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    /// All view positions whose `column` equals `value`.
    pub fn find_all_value(
        &self,
        g: &Group,
        column: &str,
        value: &Value,
    ) -> TroveResult<Vec<usize>> {
        let mut out = Vec::new();
        for (i, key) in self.keys.iter().enumerate() {
            let v = g.obj(self.table, *key)?.get(column)?;
            if v.query_eq(value) {
                out.push(i);
            }
        }
        Ok(out)
    }

    // ---- aggregation -----------------------------------------------------

    /// Minimum non-null value of `column`; null for an empty view.
    pub fn min(&self, g: &Group, column: &str) -> TroveResult<Value> {
        self.check_agg_column(g, column, false)?;
        let mut best = Value::Null;
        for v in self.column_values(g, column)? {
            if v.is_null() {
                continue;
            }
            if best.is_null() || v.sort_cmp(&best) == std::cmp::Ordering::Less {
                best = v;
            }
        }
        Ok(best)
    }

    /// Maximum non-null value of `column`.
    pub fn max(&self, g: &Group, column: &str) -> TroveResult<Value> {
        self.check_agg_column(g, column, false)?;
        let mut best = Value::Null;
        for v in self.column_values(g, column)? {
            if v.is_null() {
                continue;
            }
            if best.is_null() || v.sort_cmp(&best) == std::cmp::Ordering::Greater {
                best = v;
            }
        }
        Ok(best)
    }

    /// Sum of non-null values; integer zero for an empty view.
    pub fn sum(&self, g: &Group, column: &str) -> TroveResult<Value> {
        self.check_agg_column(g, column, true)?;
        let mut acc = Value::Int(0);
        for v in self.column_values(g, column)? {
            if v.is_null() {
                continue;
            }
            if let Some(next) = numeric_binop('+', &acc, &v) {
                acc = next;
            }
        }
        Ok(acc)
    }

    /// Average of non-null values; null when none.
    pub fn avg(&self, g: &Group, column: &str) -> TroveResult<Value> {
        self.check_agg_column(g, column, true)?;
        let mut acc = Value::Double(0.0);
        let mut n = 0usize;
        for v in self.column_values(g, column)? {
            if v.is_null() {
                continue;
            }
            if let Some(next) = numeric_binop('+', &acc, &v) {
                acc = next;
                n += 1;
            }
        }
        if n == 0 {
            return Ok(Value::Null);
        }
        Ok(numeric_binop('/', &acc, &Value::Double(n as f64)).unwrap_or(Value::Null))
    }

    /// Count of non-null values of `column`.
    pub fn count_non_null(&self, g: &Group, column: &str) -> TroveResult<usize> {
        let mut n = 0;
        for v in self.column_values(g, column)? {
            if !v.is_null() {
                n += 1;
            }
        }
        Ok(n)
    }

    fn column_values(&self, g: &Group, column: &str) -> TroveResult<Vec<Value>> {
        let mut out = Vec::with_capacity(self.keys.len());
        for key in &self.keys {
            out.push(g.obj(self.table, *key)?.get(column)?);
        }
        Ok(out)
    }

    fn check_agg_column(&self, g: &Group, column: &str, numeric_only: bool) -> TroveResult<()> {
        let t = g.table(self.table)?;
        let pos = t.col_position(column)?;
        let ty = t.cols[pos].key.col_type();
        if t.cols[pos].key.is_collection() {
            return Err(TroveError::IllegalCombination {
                reason: format!("cannot aggregate collection column '{}'", column),
            });
        }
        if numeric_only {
            check_numeric_column(ty)
        } else {
            check_minmax_column(ty)
        }
    }

    // ---- descriptors -----------------------------------------------------

    /// Sorts by a column chain, appending to the descriptor chain.
    pub fn sort(&mut self, g: &Group, clauses: Vec<(Vec<String>, bool)>) -> TroveResult<()> {
        let d = Descriptor::Sort(clauses);
        d.apply(g, self.table, &mut self.keys)?;
        self.descriptors.push(d);
        Ok(())
    }

    /// Deduplicates by a column-chain tuple, appending to the chain.
    pub fn distinct(&mut self, g: &Group, paths: Vec<Vec<String>>) -> TroveResult<()> {
        let d = Descriptor::Distinct(paths);
        d.apply(g, self.table, &mut self.keys)?;
        self.descriptors.push(d);
        Ok(())
    }

    /// Truncates to `n` rows, appending to the chain.
    pub fn limit(&mut self, g: &Group, n: usize) -> TroveResult<()> {
        let d = Descriptor::Limit(n);
        d.apply(g, self.table, &mut self.keys)?;
        self.descriptors.push(d);
        Ok(())
    }

    fn apply_descriptors(&mut self, g: &Group) -> TroveResult<()> {
        let descriptors = self.descriptors.clone();
        for d in &descriptors {
            d.apply(g, self.table, &mut self.keys)?;
        }
        Ok(())
    }

    /// Value of a column chain for the row at view position `i`.
    pub fn chain_value_at(
        &self,
        g: &Group,
        i: usize,
        path: &[String],
    ) -> TroveResult<Value> {
        let key = self.keys.get(i).ok_or(TroveError::InvalidKey { key: i as i64 })?;
        chain_value(g, self.table, *key, path)
    }

    // ---- mutation through the view ---------------------------------------

    /// Deletes every row in the view from the table.
    pub fn clear(&mut self, g: &mut Group) -> TroveResult<()> {
        for key in std::mem::take(&mut self.keys) {
            if g.obj(self.table, key).is_ok() {
                g.remove_object(self.table, key)?;
            }
        }
        self.version = g.table(self.table)?.content_version;
        Ok(())
    }

    /// Deletes the row at view position `i`.
    pub fn remove(&mut self, g: &mut Group, i: usize) -> TroveResult<()> {
        if i >= self.keys.len() {
            return Err(TroveError::InvalidKey { key: i as i64 });
        }
        let key = self.keys.remove(i);
        g.remove_object(self.table, key)?;
        self.version = g.table(self.table)?.content_version;
        Ok(())
    }

    /// Deletes the last row of the view.
    pub fn remove_last(&mut self, g: &mut Group) -> TroveResult<()> {
        if self.keys.is_empty() {
            return Ok(());
        }
        let i = self.keys.len() - 1;
        self.remove(g, i)
    }

    // ---- synchronisation -------------------------------------------------

    /// Whether the view reflects the table's current content version.
    pub fn is_in_sync(&self, g: &Group) -> TroveResult<bool> {
        if self.detached {
            return Ok(true);
        }
        Ok(self.version == g.table(self.table)?.content_version)
    }

    /// Whether the view's anchor row has been deleted.
    pub fn depends_on_deleted_object(&self, g: &Group) -> bool {
        match self.anchor {
            Some(a) => g.obj(a.table, a.key).is_err(),
            None => false,
        }
    }

    /// Re-runs the originating query when stale, re-applying the
    /// descriptor chain. An anchored view whose anchor is gone empties
    /// itself and stays permanently in sync.
    pub fn sync_if_needed(&mut self, g: &Group) -> TroveResult<()> {
        if self.detached || self.is_in_sync(g)? {
            return Ok(());
        }
        if let Some(a) = self.anchor {
            match g.obj(a.table, a.key) {
                Err(_) => {
                    self.keys.clear();
                    self.detached = true;
                    return Ok(());
                }
                Ok(obj) => {
                    self.keys = obj.backlinks(a.origin_table, a.origin_col);
                }
            }
        } else if let Some(query) = self.query.clone() {
            self.keys = query.find_all(g)?;
        }
        self.apply_descriptors(g)?;
        self.version = g.table(self.table)?.content_version;
        Ok(())
    }
}
