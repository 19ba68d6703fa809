// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Group: the top-level database handle.
//!
//! A group owns the arena, the table schemas and the writer lock. The
//! transaction layer drives it through `attach` (implicit in `open`),
//! `commit` and `rollback`; the schema layer through `add_table` /
//! `add_column` / `add_column_link` / `add_search_index`; the data layer
//! through object creation, removal and per-cell `get`/`set`.
//!
//! ## Persisted layout
//!
//! Every commit writes a fresh top array:
//!
//! ```text
//! top:    [ tagged next_table_key, table_ref..., tagged crc32 ]
//! table:  [ tagged table_key, name blob, cols ref, cluster root,
//!           tagged next_key, tagged content_version ]
//! column: [ tagged col_key, name blob, tagged target+1,
//!           tagged origin_table+1, tagged origin_col,
//!           index root, tagged index kind,
//!           tagged radix width, tagged radix threshold ]
//! ```
//!
//! The crc32 over the table refs is checked on attach. Old schema arrays
//! are freed on commit; cluster and index roots are referenced by the new
//! schema and survive untouched.
//!
//! ## Write coordination
//!
//! One writer per database file, enforced with an advisory file lock on a
//! `.lock` sibling. The lock is held for the life of the group.

use crate::alloc::{Arena, Ref};
use crate::array::{blob, is_literal, tag_literal, untag_literal, Array, ArrayKind};
use crate::config::DbOptions;
use crate::error::{TroveError, TroveResult};
use crate::index::radix::RadixTree;
use crate::index::trie::StringIndex;
use crate::index::{check_indexable, IndexPayload};
use crate::keys::{ColKey, CollectionKind, ObjKey, TableKey};
use crate::metrics::{record_duration, Metric};
use crate::table::{Column, ColumnIndex, Obj, Table};
use crate::cluster::tree::ClusterTree;
use crate::value::{ColumnType, Value};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Maximum column-name length in bytes.
const MAX_COLUMN_NAME: usize = 63;

/// Top-level database handle.
pub struct Group {
    arena: Arena,
    tables: Vec<Table>,
    next_table_key: u32,
    options: DbOptions,
    path: PathBuf,
    _lock: File,
}

impl Group {
    /// Opens (or creates) the database at `path` with default options.
    pub fn open<P: AsRef<Path>>(path: P) -> TroveResult<Group> {
        Self::open_with_options(path, DbOptions::default())
    }

    /// Opens (or creates) the database at `path`.
    ///
    /// Acquires the writer lock; a second writer fails with
    /// `LockTimeout` after `options.lock_timeout_secs`.
    pub fn open_with_options<P: AsRef<Path>>(path: P, options: DbOptions) -> TroveResult<Group> {
        options.validate()?;
        let path = path.as_ref().to_path_buf();
        let lock = acquire_lock(&path, Duration::from_secs(options.lock_timeout_secs))?;
        let arena = Arena::open(&path, &options)?;
        let mut group = Group {
            arena,
            tables: Vec::new(),
            next_table_key: 1,
            options,
            path,
            _lock: lock,
        };
        group.attach()?;
        Ok(group)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Rebuilds the in-memory schema mirror from the current top-ref.
    fn attach(&mut self) -> TroveResult<()> {
        self.tables.clear();
        self.next_table_key = 1;
        let top_ref = self.arena.top_ref();
        if top_ref == 0 {
            return Ok(());
        }
        let arena = &self.arena;
        let top = Array::from_ref(top_ref);
        let n = top.size(arena);
        if n < 2 {
            return Err(TroveError::Corrupted {
                reason: "top array too small".to_string(),
            });
        }
        self.next_table_key = untag_literal(top.get(arena, 0)) as u32;

        // Verify the table-ref checksum before trusting anything below.
        let mut hasher = crc32fast::Hasher::new();
        for i in 1..n - 1 {
            hasher.update(&top.get(arena, i).to_le_bytes());
        }
        let stored = untag_literal(top.get(arena, n - 1)) as u32 as i64;
        if stored != hasher.finalize() as i64 {
            return Err(TroveError::Corrupted {
                reason: "top-array checksum mismatch".to_string(),
            });
        }

        for i in 1..n - 1 {
            let tref = top.get(arena, i) as Ref;
            let table = self.read_table(tref)?;
            self.tables.push(table);
        }
        Ok(())
    }

    fn read_table(&self, tref: Ref) -> TroveResult<Table> {
        let arena = &self.arena;
        let t = Array::from_ref(tref);
        let key = TableKey(untag_literal(t.get(arena, 0)) as u32);
        let name = blob::string(arena, t.get(arena, 1) as Ref);
        let cols_ref = t.get(arena, 2) as Ref;
        let cluster_root = t.get(arena, 3) as Ref;
        let next_key = untag_literal(t.get(arena, 4));
        let content_version = untag_literal(t.get(arena, 5)) as u64;

        let carr = Array::from_ref(cols_ref);
        let ncols = carr.size(arena);
        let mut cols = Vec::with_capacity(ncols);
        for i in 0..ncols {
            let centry = Array::from_ref(carr.get(arena, i) as Ref);
            let col_key = ColKey::from_raw(untag_literal(centry.get(arena, 0)) as u64);
            let cname = blob::string(arena, centry.get(arena, 1) as Ref);
            let target_raw = untag_literal(centry.get(arena, 2));
            let origin_raw = untag_literal(centry.get(arena, 3));
            let origin_col = untag_literal(centry.get(arena, 4)) as usize;
            let index_root = centry.get(arena, 5) as Ref;
            let index_kind = untag_literal(centry.get(arena, 6));
            let radix_width = untag_literal(centry.get(arena, 7)) as u8;
            let radix_threshold = untag_literal(centry.get(arena, 8)) as usize;

            let index = match index_kind {
                1 => Some(ColumnIndex::Trie(StringIndex::from_ref(index_root))),
                2 => Some(ColumnIndex::Radix(RadixTree::from_ref(
                    index_root,
                    radix_width,
                    radix_threshold,
                ))),
                _ => None,
            };
            cols.push(Column {
                key: col_key,
                name: cname,
                target_table: if target_raw == 0 {
                    None
                } else {
                    Some(TableKey(target_raw as u32 - 1))
                },
                backlink_origin: if origin_raw == 0 {
                    None
                } else {
                    Some((TableKey(origin_raw as u32 - 1), origin_col))
                },
                index,
            });
        }
        Ok(Table {
            key,
            name,
            cols,
            tree: ClusterTree::from_ref(cluster_root),
            next_key,
            content_version,
        })
    }

    /// Publishes the current state and returns the new top-ref.
    pub fn commit(&mut self) -> TroveResult<Ref> {
        let started = Instant::now();
        let old_top = self.arena.top_ref();

        let mut top = Array::create_with_capacity(&mut self.arena, ArrayKind::HasRefs, self.tables.len() + 2)?;
        top.add(&mut self.arena, tag_literal(self.next_table_key as i64))?;
        let mut hasher = crc32fast::Hasher::new();
        for ti in 0..self.tables.len() {
            let tref = self.write_table(ti)?;
            top.add(&mut self.arena, tref as i64)?;
            hasher.update(&(tref as i64).to_le_bytes());
        }
        top.add(&mut self.arena, tag_literal(hasher.finalize() as i64))?;

        if old_top != 0 {
            free_schema(&mut self.arena, old_top);
        }
        self.arena.commit(top.ref_())?;
        record_duration(Metric::group_commit(), started.elapsed());
        Ok(top.ref_())
    }

    fn write_table(&mut self, ti: usize) -> TroveResult<Ref> {
        let table = self.tables[ti].clone();
        let arena = &mut self.arena;

        let mut carr =
            Array::create_with_capacity(arena, ArrayKind::HasRefs, table.cols.len().max(1))?;
        for col in &table.cols {
            let mut centry = Array::create_with_capacity(arena, ArrayKind::HasRefs, 9)?;
            centry.add(arena, tag_literal(col.key.raw() as i64))?;
            let name_blob = blob::create_string(arena, &col.name)?;
            centry.add(arena, name_blob as i64)?;
            centry.add(
                arena,
                tag_literal(col.target_table.map(|t| t.0 as i64 + 1).unwrap_or(0)),
            )?;
            centry.add(
                arena,
                tag_literal(
                    col.backlink_origin
                        .map(|(t, _)| t.0 as i64 + 1)
                        .unwrap_or(0),
                ),
            )?;
            centry.add(
                arena,
                tag_literal(col.backlink_origin.map(|(_, c)| c as i64).unwrap_or(0)),
            )?;
            centry.add(arena, col.index.map(|i| i.root_ref() as i64).unwrap_or(0))?;
            centry.add(arena, tag_literal(col.index.map(|i| i.kind_tag()).unwrap_or(0)))?;
            let (w, t) = match col.index {
                Some(ColumnIndex::Radix(_)) => (
                    self.options.radix_chunk_width as i64,
                    self.options.radix_compact_threshold as i64,
                ),
                _ => (0, 0),
            };
            centry.add(arena, tag_literal(w))?;
            centry.add(arena, tag_literal(t))?;
            carr.add(arena, centry.ref_() as i64)?;
        }

        let mut tarr = Array::create_with_capacity(arena, ArrayKind::HasRefs, 6)?;
        tarr.add(arena, tag_literal(table.key.0 as i64))?;
        let name_blob = blob::create_string(arena, &table.name)?;
        tarr.add(arena, name_blob as i64)?;
        tarr.add(arena, carr.ref_() as i64)?;
        tarr.add(arena, table.tree.root_ref() as i64)?;
        tarr.add(arena, tag_literal(table.next_key))?;
        tarr.add(arena, tag_literal(table.content_version as i64))?;
        Ok(tarr.ref_())
    }

    /// Discards everything since the last commit.
    pub fn rollback(&mut self) -> TroveResult<()> {
        self.arena.rollback();
        self.attach()
    }

    // ---- schema ----------------------------------------------------------

    /// Adds an empty table.
    pub fn add_table(&mut self, name: &str) -> TroveResult<TableKey> {
        if self.tables.iter().any(|t| t.name == name) {
            return Err(TroveError::TableAlreadyExists {
                name: name.to_string(),
            });
        }
        let key = TableKey(self.next_table_key);
        self.next_table_key += 1;
        let tree = ClusterTree::create(&mut self.arena, &[])?;
        self.tables.push(Table {
            key,
            name: name.to_string(),
            cols: Vec::new(),
            tree,
            next_key: 0,
            content_version: 0,
        });
        Ok(key)
    }

    /// Removes a table. Fails while other tables hold links into it.
    pub fn remove_table(&mut self, key: TableKey) -> TroveResult<()> {
        let ti = self.table_index(key)?;
        for other in &self.tables {
            if other.key == key {
                continue;
            }
            if other
                .cols
                .iter()
                .any(|c| c.target_table == Some(key) && c.backlink_origin.is_none())
            {
                return Err(TroveError::IllegalCombination {
                    reason: format!("table '{}' is a link target", self.tables[ti].name),
                });
            }
        }
        let table = self.tables.remove(ti);
        let cols = table.col_keys();
        for col in &table.cols {
            if let Some(index) = col.index {
                destroy_index(&mut self.arena, index);
            }
        }
        table.tree.destroy(&mut self.arena, &cols);
        // Drop backlink columns other tables keep for this one.
        let origins: Vec<TableKey> = self
            .tables
            .iter()
            .filter(|t| t.cols.iter().any(|c| c.backlink_origin.map(|(o, _)| o) == Some(key)))
            .map(|t| t.key)
            .collect();
        for tk in origins {
            let oi = self.table_index(tk)?;
            let ncols = self.tables[oi].cols.len();
            let keep: Vec<usize> = self.tables[oi]
                .cols
                .iter()
                .enumerate()
                .filter(|(_, c)| c.backlink_origin.map(|(o, _)| o) != Some(key))
                .map(|(i, _)| i)
                .collect();
            self.rebuild_with_columns(oi, keep, ncols)?;
        }
        Ok(())
    }

    /// Adds a scalar or collection column.
    ///
    /// ## Error Conditions
    /// - `ColumnNameTooLong` for names over 63 bytes
    /// - `IllegalCombination` for Link/Backlink types (use
    ///   `add_column_link`)
    pub fn add_column(
        &mut self,
        table: TableKey,
        ty: ColumnType,
        name: &str,
        nullable: bool,
    ) -> TroveResult<ColKey> {
        self.add_column_full(table, ty, name, nullable, CollectionKind::None, None)
    }

    /// Adds a collection column of scalars.
    pub fn add_column_collection(
        &mut self,
        table: TableKey,
        ty: ColumnType,
        name: &str,
        nullable: bool,
        kind: CollectionKind,
    ) -> TroveResult<ColKey> {
        self.add_column_full(table, ty, name, nullable, kind, None)
    }

    /// Adds a link column (scalar or collection) and the backing
    /// backlink column on the target table.
    pub fn add_column_link(
        &mut self,
        table: TableKey,
        name: &str,
        target: TableKey,
        kind: CollectionKind,
    ) -> TroveResult<ColKey> {
        self.table_index(target)?;
        let ck = self.add_column_full(table, ColumnType::Link, name, true, kind, Some(target))?;
        let origin_pos = {
            let t = self.table(table)?;
            t.cols.len() - 1
        };
        // Hidden inverse column on the target.
        let oi = self.table_index(target)?;
        let mut cols: Vec<usize> = (0..self.tables[oi].cols.len()).collect();
        let bk = Column {
            key: ColKey::new(
                self.tables[oi].cols.len() as u16,
                ColumnType::Backlink,
                false,
                CollectionKind::None,
            ),
            name: String::new(),
            target_table: Some(table),
            backlink_origin: Some((table, origin_pos)),
            index: None,
        };
        self.tables[oi].cols.push(bk);
        cols.push(self.tables[oi].cols.len() - 1);
        let old_ncols = self.tables[oi].cols.len() - 1;
        self.rebuild_with_columns(oi, cols, old_ncols)?;
        Ok(ck)
    }

    fn add_column_full(
        &mut self,
        table: TableKey,
        ty: ColumnType,
        name: &str,
        nullable: bool,
        kind: CollectionKind,
        target: Option<TableKey>,
    ) -> TroveResult<ColKey> {
        if name.len() > MAX_COLUMN_NAME {
            return Err(TroveError::ColumnNameTooLong {
                name: name.to_string(),
            });
        }
        if ty == ColumnType::Backlink || (ty == ColumnType::Link && target.is_none()) {
            return Err(TroveError::IllegalCombination {
                reason: format!("cannot add {} column directly", ty.name()),
            });
        }
        let ti = self.table_index(table)?;
        if self.tables[ti]
            .cols
            .iter()
            .any(|c| c.name == name && c.key.col_type() != ColumnType::Backlink)
        {
            return Err(TroveError::IllegalCombination {
                reason: format!("column '{}' already exists", name),
            });
        }
        let ck = ColKey::new(self.tables[ti].cols.len() as u16, ty, nullable, kind);
        self.tables[ti].cols.push(Column {
            key: ck,
            name: name.to_string(),
            target_table: target,
            backlink_origin: None,
            index: None,
        });
        let order: Vec<usize> = (0..self.tables[ti].cols.len()).collect();
        let old_ncols = self.tables[ti].cols.len() - 1;
        self.rebuild_with_columns(ti, order, old_ncols)?;
        Ok(ck)
    }

    /// Removes a user column, along with its search index and, for link
    /// columns, the backing backlink column on the target table.
    pub fn remove_column(&mut self, table: TableKey, name: &str) -> TroveResult<()> {
        let ti = self.table_index(table)?;
        let pos = self.tables[ti].col_position(name)?;
        if let Some(index) = self.tables[ti].cols[pos].index.take() {
            destroy_index(&mut self.arena, index);
        }

        // A link column drags its inverse column with it.
        let col = self.tables[ti].cols[pos].clone();
        if col.key.col_type() == ColumnType::Link {
            if let Some(target) = col.target_table {
                let oi = self.table_index(target)?;
                let ncols = self.tables[oi].cols.len();
                let keep: Vec<usize> = (0..ncols)
                    .filter(|i| {
                        self.tables[oi].cols[*i].backlink_origin != Some((table, pos))
                    })
                    .collect();
                if keep.len() != ncols {
                    self.rebuild_with_columns(oi, keep, ncols)?;
                }
            }
        }

        // Positions may have shifted when the table links to itself.
        let ti = self.table_index(table)?;
        let pos = self.tables[ti].col_position(name)?;
        let ncols = self.tables[ti].cols.len();
        let keep: Vec<usize> = (0..ncols).filter(|i| *i != pos).collect();
        self.rebuild_with_columns(ti, keep, ncols)?;
        Ok(())
    }

    /// Rebuilds a table's cluster tree for a changed column set.
    ///
    /// `keep` lists positions of the current column vector to carry
    /// over; `old_tree_ncols` is the column count the existing tree was
    /// built with; positions at or beyond it are freshly pushed columns
    /// and keep their defaults. Column keys are re-packed to their new
    /// slot positions.
    fn rebuild_with_columns(
        &mut self,
        ti: usize,
        keep: Vec<usize>,
        old_tree_ncols: usize,
    ) -> TroveResult<()> {
        let old_table = self.tables[ti].clone();
        let old_cols: Vec<ColKey> = old_table.col_keys()[..old_tree_ncols].to_vec();
        let old_tree = old_table.tree;

        // Re-pack kept columns at their new positions.
        let mut new_cols: Vec<Column> = Vec::with_capacity(keep.len());
        for (new_pos, &old_pos) in keep.iter().enumerate() {
            let mut col = old_table.cols[old_pos].clone();
            col.key = ColKey::new(
                new_pos as u16,
                col.key.col_type(),
                col.key.is_nullable(),
                col.key.collection(),
            );
            new_cols.push(col);
        }
        let new_col_keys: Vec<ColKey> = new_cols.iter().map(|c| c.key).collect();

        let mut new_tree = ClusterTree::create(&mut self.arena, &new_col_keys)?;
        for key in old_tree.keys(&self.arena) {
            new_tree.insert(&mut self.arena, &new_col_keys, key)?;
            let (old_leaf, old_row) = old_tree
                .lookup(&self.arena, key)
                .ok_or(TroveError::InvalidKey { key: key.0 })?;
            let (mut new_leaf, new_row) = new_tree
                .lookup(&self.arena, key)
                .ok_or(TroveError::InvalidKey { key: key.0 })?;
            for (new_pos, &old_pos) in keep.iter().enumerate() {
                if old_pos >= old_tree_ncols {
                    continue; // freshly added column, keep defaults
                }
                if new_col_keys[new_pos].col_type() == ColumnType::Backlink {
                    for origin in old_leaf.backlinks(&self.arena, old_pos, old_row) {
                        new_leaf.backlink_add(&mut self.arena, new_pos, new_row, origin)?;
                    }
                    continue;
                }
                let value = old_leaf.get_value(&self.arena, &old_cols, old_pos, old_row)?;
                if !value.is_null() {
                    new_leaf.set_value(
                        &mut self.arena,
                        &new_col_keys,
                        new_pos,
                        new_row,
                        &value,
                        &new_cols[new_pos].name,
                    )?;
                }
            }
        }
        old_tree.destroy(&mut self.arena, &old_cols);
        let moved_table = self.tables[ti].key;
        self.tables[ti].cols = new_cols;
        self.tables[ti].tree = new_tree;
        self.tables[ti].content_version += 1;

        // Column positions shifted: backlink columns elsewhere reference
        // link columns of this table by position and must follow.
        for t in &mut self.tables {
            for col in &mut t.cols {
                if let Some((origin, old_pos)) = col.backlink_origin {
                    if origin == moved_table {
                        if let Some(new_pos) = keep.iter().position(|&p| p == old_pos) {
                            col.backlink_origin = Some((origin, new_pos));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Attaches a search index to a column and loads existing rows.
    pub fn add_search_index(&mut self, table: TableKey, name: &str) -> TroveResult<()> {
        let ti = self.table_index(table)?;
        let pos = self.tables[ti].col_position(name)?;
        let ck = self.tables[ti].cols[pos].key;
        check_indexable(ck.col_type(), ck.is_collection())?;
        if self.tables[ti].cols[pos].index.is_some() {
            return Ok(());
        }
        let mut index = if ck.col_type() == ColumnType::Int {
            ColumnIndex::Radix(RadixTree::create(
                &mut self.arena,
                self.options.radix_chunk_width,
                self.options.radix_compact_threshold,
            )?)
        } else {
            ColumnIndex::Trie(StringIndex::create(&mut self.arena)?)
        };

        let keys = self.tables[ti].tree.keys(&self.arena);
        let col_keys = self.tables[ti].col_keys();
        let acc = self.tables[ti].accessor(pos);
        for key in keys {
            let (leaf, row) = self.tables[ti]
                .tree
                .lookup(&self.arena, key)
                .ok_or(TroveError::InvalidKey { key: key.0 })?;
            let value = leaf.get_value(&self.arena, &col_keys, pos, row)?;
            let payload = self.tables[ti].index_payload_of(pos, &value)?;
            insert_into_index(&mut self.arena, &mut index, &acc, key, &payload)?;
        }
        self.tables[ti].cols[pos].index = Some(index);
        self.tables[ti].content_version += 1;
        Ok(())
    }

    /// Drops a column's search index.
    pub fn remove_search_index(&mut self, table: TableKey, name: &str) -> TroveResult<()> {
        let ti = self.table_index(table)?;
        let pos = self.tables[ti].col_position(name)?;
        if let Some(index) = self.tables[ti].cols[pos].index.take() {
            destroy_index(&mut self.arena, index);
            self.tables[ti].content_version += 1;
        }
        Ok(())
    }

    // ---- table access ----------------------------------------------------

    pub fn table_keys(&self) -> Vec<TableKey> {
        self.tables.iter().map(|t| t.key).collect()
    }

    pub fn table(&self, key: TableKey) -> TroveResult<&Table> {
        self.tables
            .iter()
            .find(|t| t.key == key)
            .ok_or_else(|| TroveError::TableNotFound {
                name: format!("#{}", key.0),
            })
    }

    pub fn table_by_name(&self, name: &str) -> TroveResult<&Table> {
        self.tables
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| TroveError::TableNotFound {
                name: name.to_string(),
            })
    }

    fn table_index(&self, key: TableKey) -> TroveResult<usize> {
        self.tables
            .iter()
            .position(|t| t.key == key)
            .ok_or_else(|| TroveError::TableNotFound {
                name: format!("#{}", key.0),
            })
    }

    // ---- objects ---------------------------------------------------------

    /// Creates an object with a counter-chosen key.
    pub fn create_object(&mut self, table: TableKey) -> TroveResult<ObjKey> {
        let ti = self.table_index(table)?;
        let key = ObjKey(self.tables[ti].next_key);
        self.create_object_with_key(table, key)?;
        Ok(key)
    }

    /// Creates an object at `key`.
    ///
    /// ## Error Conditions
    /// - `InvalidKey` when the key exists or is negative
    pub fn create_object_with_key(&mut self, table: TableKey, key: ObjKey) -> TroveResult<ObjKey> {
        if key.0 < 0 {
            return Err(TroveError::InvalidKey { key: key.0 });
        }
        let ti = self.table_index(table)?;
        let col_keys = self.tables[ti].col_keys();
        let mut tree = self.tables[ti].tree;
        tree.insert(&mut self.arena, &col_keys, key)?;
        self.tables[ti].tree = tree;
        self.tables[ti].next_key = self.tables[ti].next_key.max(key.0 + 1);

        // Indexed columns see the new row's default cell immediately.
        for pos in 0..self.tables[ti].cols.len() {
            if self.tables[ti].cols[pos].index.is_none() {
                continue;
            }
            let (leaf, row) = tree
                .lookup(&self.arena, key)
                .ok_or(TroveError::InvalidKey { key: key.0 })?;
            let value = leaf.get_value(&self.arena, &col_keys, pos, row)?;
            let payload = self.tables[ti].index_payload_of(pos, &value)?;
            let acc = self.tables[ti].accessor(pos);
            let mut index = self.tables[ti].cols[pos].index.take().ok_or_else(|| {
                TroveError::Corrupted {
                    reason: "index vanished mid-insert".to_string(),
                }
            })?;
            insert_into_index(&mut self.arena, &mut index, &acc, key, &payload)?;
            self.tables[ti].cols[pos].index = Some(index);
        }
        self.tables[ti].content_version += 1;
        Ok(key)
    }

    /// Fetches a read handle.
    ///
    /// ## Error Conditions
    /// - `InvalidKey` for absent or removed keys
    pub fn obj(&self, table: TableKey, key: ObjKey) -> TroveResult<Obj<'_>> {
        let t = self.table(table)?;
        let (leaf, row) = t
            .tree
            .lookup(&self.arena, key)
            .ok_or(TroveError::InvalidKey { key: key.0 })?;
        Ok(Obj {
            arena: &self.arena,
            table: t,
            key,
            leaf,
            row,
        })
    }

    /// Removes an object, maintaining indices and the link graph.
    pub fn remove_object(&mut self, table: TableKey, key: ObjKey) -> TroveResult<()> {
        let ti = self.table_index(table)?;
        let col_keys = self.tables[ti].col_keys();
        let (leaf, row) = self.tables[ti]
            .tree
            .lookup(&self.arena, key)
            .ok_or(TroveError::InvalidKey { key: key.0 })?;

        // Index entries go first, while the row still resolves.
        for pos in 0..self.tables[ti].cols.len() {
            if self.tables[ti].cols[pos].index.is_none() {
                continue;
            }
            let value = leaf.get_value(&self.arena, &col_keys, pos, row)?;
            let payload = self.tables[ti].index_payload_of(pos, &value)?;
            let acc = self.tables[ti].accessor(pos);
            let mut index = self.tables[ti].cols[pos].index.take().ok_or_else(|| {
                TroveError::Corrupted {
                    reason: "index vanished mid-remove".to_string(),
                }
            })?;
            erase_from_index(&mut self.arena, &mut index, &acc, key, &payload)?;
            self.tables[ti].cols[pos].index = Some(index);
        }

        // Outgoing links lose their backlink entries.
        for pos in 0..self.tables[ti].cols.len() {
            let col = self.tables[ti].cols[pos].clone();
            if col.key.col_type() != ColumnType::Link || col.backlink_origin.is_some() {
                continue;
            }
            let target = match col.target_table {
                Some(t) => t,
                None => continue,
            };
            let value = leaf.get_value(&self.arena, &col_keys, pos, row)?;
            for linked in link_values(&value) {
                self.backlink_update(target, table, pos, linked, key, false)?;
            }
        }

        // Incoming links are nullified at their origin.
        for pos in 0..self.tables[ti].cols.len() {
            let col = self.tables[ti].cols[pos].clone();
            let (origin_table, origin_col) = match col.backlink_origin {
                Some(o) => o,
                None => continue,
            };
            let origins = leaf.backlinks(&self.arena, pos, row);
            for origin_key in origins {
                self.nullify_link_cell(origin_table, origin_key, origin_col, key)?;
            }
        }

        let mut tree = self.tables[ti].tree;
        tree.erase(&mut self.arena, &col_keys, key)?;
        self.tables[ti].tree = tree;
        self.tables[ti].content_version += 1;
        Ok(())
    }

    /// Deletes every object in the table.
    pub fn clear_table(&mut self, table: TableKey) -> TroveResult<()> {
        let ti = self.table_index(table)?;
        for key in self.tables[ti].tree.keys(&self.arena) {
            self.remove_object(table, key)?;
        }
        Ok(())
    }

    /// Writes a cell, maintaining indices and backlinks.
    pub fn set_value(
        &mut self,
        table: TableKey,
        key: ObjKey,
        column: &str,
        value: Value,
    ) -> TroveResult<()> {
        let ti = self.table_index(table)?;
        let pos = self.tables[ti].col_position(column)?;
        self.set_value_at(table, key, pos, value)
    }

    /// Writes a cell by column position.
    pub fn set_value_at(
        &mut self,
        table: TableKey,
        key: ObjKey,
        pos: usize,
        value: Value,
    ) -> TroveResult<()> {
        let ti = self.table_index(table)?;
        let col = self.tables[ti].cols[pos].clone();
        let col_keys = self.tables[ti].col_keys();

        // Link targets must exist before anything is written.
        if col.key.col_type() == ColumnType::Link {
            if let Some(target) = col.target_table {
                for linked in link_values(&value) {
                    let oi = self.table_index(target)?;
                    if self.tables[oi].tree.lookup(&self.arena, linked).is_none() {
                        return Err(TroveError::TargetRowIndexOutOfRange { key: linked.0 });
                    }
                }
            }
        }

        let (mut leaf, row) = self.tables[ti]
            .tree
            .lookup(&self.arena, key)
            .ok_or(TroveError::InvalidKey { key: key.0 })?;
        let old_value = leaf.get_value(&self.arena, &col_keys, pos, row)?;

        // Index: erase under the old cell, reinsert under the new one.
        let indexed = self.tables[ti].cols[pos].index.is_some();
        if indexed {
            let payload = self.tables[ti].index_payload_of(pos, &old_value)?;
            let acc = self.tables[ti].accessor(pos);
            let mut index = self.tables[ti].cols[pos].index.take().ok_or_else(|| {
                TroveError::Corrupted {
                    reason: "index vanished mid-set".to_string(),
                }
            })?;
            erase_from_index(&mut self.arena, &mut index, &acc, key, &payload)?;
            self.tables[ti].cols[pos].index = Some(index);
        }

        leaf.set_value(&mut self.arena, &col_keys, pos, row, &value, &col.name)?;

        if indexed {
            let payload = self.tables[ti].index_payload_of(pos, &value)?;
            let acc = self.tables[ti].accessor(pos);
            let mut index = self.tables[ti].cols[pos].index.take().ok_or_else(|| {
                TroveError::Corrupted {
                    reason: "index vanished mid-set".to_string(),
                }
            })?;
            insert_into_index(&mut self.arena, &mut index, &acc, key, &payload)?;
            self.tables[ti].cols[pos].index = Some(index);
        }

        // Backlink bookkeeping for link cells and collections.
        if col.key.col_type() == ColumnType::Link && col.backlink_origin.is_none() {
            if let Some(target) = col.target_table {
                let old_links = link_values(&old_value);
                let new_links = link_values(&value);
                for gone in old_links.iter().filter(|k| !new_links.contains(k)) {
                    self.backlink_update(target, table, pos, *gone, key, false)?;
                }
                for added in new_links.iter().filter(|k| !old_links.contains(k)) {
                    self.backlink_update(target, table, pos, *added, key, true)?;
                }
            }
        }

        self.tables[ti].content_version += 1;
        Ok(())
    }

    /// Null assignment shorthand.
    pub fn set_null(&mut self, table: TableKey, key: ObjKey, column: &str) -> TroveResult<()> {
        self.set_value(table, key, column, Value::Null)
    }

    /// Sets a Mixed cell from a JSON payload.
    ///
    /// ## Error Conditions
    /// - `MalformedJson` for unparseable input
    pub fn set_json(
        &mut self,
        table: TableKey,
        key: ObjKey,
        column: &str,
        json: &str,
    ) -> TroveResult<()> {
        let value = Value::from_json(json)?;
        self.set_value(table, key, column, value)
    }

    /// Reads a cell.
    pub fn get_value(
        &self,
        table: TableKey,
        key: ObjKey,
        column: &str,
    ) -> TroveResult<Value> {
        self.obj(table, key)?.get(column)
    }

    // ---- column-wide search ----------------------------------------------

    /// First key whose `column` equals `value`; index-accelerated when
    /// available, scan otherwise.
    pub fn find_first_value(
        &self,
        table: TableKey,
        column: &str,
        value: &Value,
    ) -> TroveResult<Option<ObjKey>> {
        let t = self.table(table)?;
        let pos = t.col_position(column)?;
        if let Some(index) = &t.cols[pos].index {
            let payload = t.index_payload_of(pos, value)?;
            let acc = t.accessor(pos);
            return match index {
                ColumnIndex::Trie(trie) => trie.find_first(&self.arena, &acc, &payload),
                ColumnIndex::Radix(radix) => radix.find_first(&self.arena, &acc, &payload),
            };
        }
        let col_keys = t.col_keys();
        for leaf_ref in t.tree.leaf_refs(&self.arena) {
            let leaf = crate::cluster::leaf::ClusterLeaf::from_ref(leaf_ref);
            for row in 0..leaf.num_rows(&self.arena) {
                let v = leaf.get_value(&self.arena, &col_keys, pos, row)?;
                if v.query_eq(value) {
                    return Ok(Some(leaf.key_at(&self.arena, row)));
                }
            }
        }
        Ok(None)
    }

    /// All keys whose `column` equals `value`, in key order.
    pub fn find_all_value(
        &self,
        table: TableKey,
        column: &str,
        value: &Value,
    ) -> TroveResult<Vec<ObjKey>> {
        let t = self.table(table)?;
        let pos = t.col_position(column)?;
        if let Some(index) = &t.cols[pos].index {
            let payload = t.index_payload_of(pos, value)?;
            let acc = t.accessor(pos);
            return match index {
                ColumnIndex::Trie(trie) => trie.find_all(&self.arena, &acc, &payload, false),
                ColumnIndex::Radix(radix) => radix.find_all(&self.arena, &acc, &payload, false),
            };
        }
        let col_keys = t.col_keys();
        let mut out = Vec::new();
        for leaf_ref in t.tree.leaf_refs(&self.arena) {
            let leaf = crate::cluster::leaf::ClusterLeaf::from_ref(leaf_ref);
            for row in 0..leaf.num_rows(&self.arena) {
                let v = leaf.get_value(&self.arena, &col_keys, pos, row)?;
                if v.query_eq(value) {
                    out.push(leaf.key_at(&self.arena, row));
                }
            }
        }
        Ok(out)
    }

    // ---- link plumbing ---------------------------------------------------

    fn backlink_update(
        &mut self,
        target: TableKey,
        origin_table: TableKey,
        origin_col: usize,
        target_key: ObjKey,
        origin_key: ObjKey,
        add: bool,
    ) -> TroveResult<()> {
        let oi = self.table_index(target)?;
        let pos = match self.tables[oi].backlink_position(origin_table, origin_col) {
            Some(p) => p,
            None => return Ok(()),
        };
        let (mut leaf, row) = match self.tables[oi].tree.lookup(&self.arena, target_key) {
            Some(found) => found,
            None => return Ok(()),
        };
        if add {
            leaf.backlink_add(&mut self.arena, pos, row, origin_key)?;
        } else {
            leaf.backlink_remove(&mut self.arena, pos, row, origin_key)?;
        }
        self.tables[oi].content_version += 1;
        Ok(())
    }

    /// Clears `removed` out of an origin row's link cell without touching
    /// the (dying) target row's backlink bookkeeping.
    fn nullify_link_cell(
        &mut self,
        origin_table: TableKey,
        origin_key: ObjKey,
        pos: usize,
        removed: ObjKey,
    ) -> TroveResult<()> {
        let oi = self.table_index(origin_table)?;
        let col_keys = self.tables[oi].col_keys();
        let name = self.tables[oi].cols[pos].name.clone();
        let (mut leaf, row) = match self.tables[oi].tree.lookup(&self.arena, origin_key) {
            Some(found) => found,
            None => return Ok(()),
        };
        let value = leaf.get_value(&self.arena, &col_keys, pos, row)?;
        let new_value = match value {
            Value::Link(k) if k == removed => Value::Null,
            Value::List(items) => Value::List(
                items
                    .into_iter()
                    .filter(|v| !matches!(v, Value::Link(k) if *k == removed))
                    .collect(),
            ),
            Value::Set(items) => Value::Set(
                items
                    .into_iter()
                    .filter(|v| !matches!(v, Value::Link(k) if *k == removed))
                    .collect(),
            ),
            Value::Dictionary(entries) => Value::Dictionary(
                entries
                    .into_iter()
                    .map(|(k, v)| {
                        if matches!(&v, Value::Link(link) if *link == removed) {
                            (k, Value::Null)
                        } else {
                            (k, v)
                        }
                    })
                    .collect(),
            ),
            other => other,
        };
        leaf.set_value(&mut self.arena, &col_keys, pos, row, &new_value, &name)?;
        self.tables[oi].content_version += 1;
        Ok(())
    }
}

/// Object keys referenced by a link cell (scalar or collection).
fn link_values(value: &Value) -> Vec<ObjKey> {
    match value {
        Value::Link(k) => vec![*k],
        Value::List(items) | Value::Set(items) => items
            .iter()
            .filter_map(|v| match v {
                Value::Link(k) => Some(*k),
                _ => None,
            })
            .collect(),
        Value::Dictionary(entries) => entries
            .iter()
            .filter_map(|(_, v)| match v {
                Value::Link(k) => Some(*k),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn insert_into_index(
    arena: &mut Arena,
    index: &mut ColumnIndex,
    acc: &dyn crate::index::IndexAccessor,
    key: ObjKey,
    payload: &IndexPayload,
) -> TroveResult<()> {
    match index {
        ColumnIndex::Trie(t) => t.insert(arena, acc, key, payload),
        ColumnIndex::Radix(r) => r.insert(arena, acc, key, payload),
    }
}

fn erase_from_index(
    arena: &mut Arena,
    index: &mut ColumnIndex,
    acc: &dyn crate::index::IndexAccessor,
    key: ObjKey,
    payload: &IndexPayload,
) -> TroveResult<()> {
    match index {
        ColumnIndex::Trie(t) => t.erase(arena, acc, key, payload),
        ColumnIndex::Radix(r) => r.erase(arena, acc, key, payload),
    }
}

fn destroy_index(arena: &mut Arena, index: ColumnIndex) {
    match index {
        ColumnIndex::Trie(t) => t.destroy(arena),
        ColumnIndex::Radix(r) => r.destroy(arena),
    }
}

/// Frees the persisted schema arrays reachable from `top`, leaving
/// cluster and index roots in place.
fn free_schema(arena: &mut Arena, top: Ref) {
    let top_arr = Array::from_ref(top);
    let n = top_arr.size(arena);
    for i in 1..n.saturating_sub(1) {
        let tref = top_arr.get(arena, i);
        if is_literal(tref) {
            continue;
        }
        let tarr = Array::from_ref(tref as Ref);
        blob::free(arena, tarr.get(arena, 1) as Ref);
        let carr = Array::from_ref(tarr.get(arena, 2) as Ref);
        for ci in 0..carr.size(arena) {
            let centry = Array::from_ref(carr.get(arena, ci) as Ref);
            blob::free(arena, centry.get(arena, 1) as Ref);
            centry.destroy(arena);
        }
        carr.destroy(arena);
        tarr.destroy(arena);
    }
    top_arr.destroy(arena);
}

/// Acquires the exclusive writer lock, waiting up to `timeout`.
fn acquire_lock(db_path: &Path, timeout: Duration) -> TroveResult<File> {
    let lock_path = db_path.with_extension("lock");
    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(&lock_path)
        .map_err(|e| TroveError::IoError {
            operation: "create_lock_file".to_string(),
            reason: e.to_string(),
        })?;

    let start = Instant::now();
    loop {
        match lock_file.try_lock_exclusive() {
            Ok(()) => return Ok(lock_file),
            Err(_) if start.elapsed() < timeout => {
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(_) => {
                return Err(TroveError::LockTimeout {
                    path: lock_path.display().to_string(),
                    timeout_secs: timeout.as_secs(),
                });
            }
        }
    }
}
