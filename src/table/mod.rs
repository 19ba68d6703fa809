// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Table schema and object handles.
//!
//! A `Table` mirrors the persisted schema of one typed table: its column
//! list (user columns plus hidden backlink columns), the cluster-tree
//! root, per-column search indices and the monotonically increasing
//! content version consumed by `TableView::sync_if_needed`.
//!
//! All mutation goes through the owning [`Group`](crate::group::Group);
//! `Obj` is a borrowed read handle.

use crate::alloc::{Arena, Ref};
use crate::cluster::leaf::ClusterLeaf;
use crate::cluster::tree::ClusterTree;
use crate::error::{TroveError, TroveResult};
use crate::index::radix::RadixTree;
use crate::index::trie::StringIndex;
use crate::index::{payload_for_mixed, payload_for_value, IndexAccessor, IndexPayload};
use crate::keys::{ColKey, ObjKey, TableKey};
use crate::value::{ColumnType, Value};

/// Search-index handle attached to a column.
#[derive(Debug, Clone, Copy)]
pub enum ColumnIndex {
    Trie(StringIndex),
    Radix(RadixTree),
}

impl ColumnIndex {
    pub fn root_ref(&self) -> Ref {
        match self {
            ColumnIndex::Trie(t) => t.root_ref(),
            ColumnIndex::Radix(r) => r.root_ref(),
        }
    }

    pub fn kind_tag(&self) -> i64 {
        match self {
            ColumnIndex::Trie(_) => 1,
            ColumnIndex::Radix(_) => 2,
        }
    }
}

/// One column of a table.
#[derive(Debug, Clone)]
pub struct Column {
    pub key: ColKey,
    pub name: String,
    /// Target table for Link columns and hidden backlink columns.
    pub target_table: Option<TableKey>,
    /// For backlink columns: (origin table, origin column position).
    pub backlink_origin: Option<(TableKey, usize)>,
    pub index: Option<ColumnIndex>,
}

/// In-memory mirror of one table's persisted state.
#[derive(Debug, Clone)]
pub struct Table {
    pub key: TableKey,
    pub name: String,
    pub cols: Vec<Column>,
    pub tree: ClusterTree,
    /// Next candidate for counter-chosen object keys.
    pub next_key: i64,
    /// Bumped on every successful mutation.
    pub content_version: u64,
}

impl Table {
    /// Column keys in slot order (the shape every leaf operation needs).
    pub fn col_keys(&self) -> Vec<ColKey> {
        self.cols.iter().map(|c| c.key).collect()
    }

    /// Position of a user-visible column by name.
    pub fn col_position(&self, name: &str) -> TroveResult<usize> {
        self.cols
            .iter()
            .position(|c| c.name == name && c.key.col_type() != ColumnType::Backlink)
            .ok_or_else(|| TroveError::ColumnIndexOutOfRange {
                column: name.to_string(),
            })
    }

    /// Position of the hidden backlink column for (origin, origin_col).
    pub fn backlink_position(&self, origin: TableKey, origin_col: usize) -> Option<usize> {
        self.cols
            .iter()
            .position(|c| c.backlink_origin == Some((origin, origin_col)))
    }

    pub fn size(&self, arena: &Arena) -> usize {
        self.tree.count_rows(arena)
    }

    pub fn is_empty(&self, arena: &Arena) -> bool {
        self.size(arena) == 0
    }

    /// Derives the index payload of a cell for column `pos`.
    pub fn index_payload_of(&self, pos: usize, value: &Value) -> TroveResult<IndexPayload> {
        if self.cols[pos].key.col_type() == ColumnType::Mixed {
            payload_for_mixed(value)
        } else if value.is_null() {
            Ok(IndexPayload::Null)
        } else {
            payload_for_value(value)
        }
    }

    /// Accessor reading the current cell values of column `pos` back for
    /// index maintenance.
    pub fn accessor(&self, pos: usize) -> ClusterAccessor {
        ClusterAccessor {
            root: self.tree.root_ref(),
            cols: self.col_keys(),
            pos,
            mixed: self.cols[pos].key.col_type() == ColumnType::Mixed,
        }
    }
}

/// `IndexAccessor` backed by the owning table's cluster tree.
pub struct ClusterAccessor {
    root: Ref,
    cols: Vec<ColKey>,
    pos: usize,
    mixed: bool,
}

impl IndexAccessor for ClusterAccessor {
    fn payload(&self, arena: &Arena, key: ObjKey) -> TroveResult<IndexPayload> {
        let tree = ClusterTree::from_ref(self.root);
        let (leaf, row) = tree
            .lookup(arena, key)
            .ok_or(TroveError::InvalidKey { key: key.0 })?;
        let value = leaf.get_value(arena, &self.cols, self.pos, row)?;
        if self.mixed {
            payload_for_mixed(&value)
        } else if value.is_null() {
            Ok(IndexPayload::Null)
        } else {
            payload_for_value(&value)
        }
    }
}

/// Borrowed read handle on one row.
#[derive(Clone, Copy)]
pub struct Obj<'a> {
    pub(crate) arena: &'a Arena,
    pub(crate) table: &'a Table,
    pub key: ObjKey,
    pub(crate) leaf: ClusterLeaf,
    pub(crate) row: usize,
}

impl<'a> Obj<'a> {
    /// Reads a cell by column name.
    pub fn get(&self, column: &str) -> TroveResult<Value> {
        let pos = self.table.col_position(column)?;
        self.get_at(pos)
    }

    /// Reads a cell by column position.
    pub fn get_at(&self, pos: usize) -> TroveResult<Value> {
        self.leaf
            .get_value(self.arena, &self.table.col_keys(), pos, self.row)
    }

    /// Whether the cell is null.
    pub fn is_null(&self, column: &str) -> TroveResult<bool> {
        Ok(self.get(column)?.is_null())
    }

    /// Keys of rows in the origin table whose `origin_column` links here.
    pub fn backlinks(&self, origin: TableKey, origin_col: usize) -> Vec<ObjKey> {
        match self.table.backlink_position(origin, origin_col) {
            Some(pos) => self.leaf.backlinks(self.arena, pos, self.row),
            None => Vec::new(),
        }
    }
}
