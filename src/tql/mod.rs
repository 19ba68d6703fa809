// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! TQL, the predicate query language.
//!
//! A query moves through three stages:
//!
//! 1. **Parse** (`parser`): the predicate string becomes a schema-blind
//!    tree of `ast` nodes.
//! 2. **Compile** (`compiler`): identifiers resolve against the schema
//!    through the `KeyPathMapping`, `$n` arguments are pulled from an
//!    `Arguments` provider, constants are coerced and folded, and the
//!    tree lowers to `expr` shapes.
//! 3. **Evaluate** (`Query`): the expression walks cluster leaves in key
//!    order; equality and membership over indexed base-table columns
//!    take the search-index fast path instead of scanning.
//!
//! ## Example
//! ```no_run
//! use trovedb::group::Group;
//! use trovedb::tql::{ArgumentList, KeyPathMapping};
//! use trovedb::value::Value;
//!
//! let g = Group::open("app.trove")?;
//! let people = g.table_by_name("people")?.key;
//! let q = g.query(
//!     people,
//!     "age >= $0 SORT(name ASC) LIMIT(10)",
//!     &ArgumentList::new(vec![Value::Int(21)]),
//!     &KeyPathMapping::new(),
//! )?;
//! let view = q.run(&g)?;
//! # Ok::<(), trovedb::error::TroveError>(())
//! ```

pub mod args;
pub mod ast;
pub mod base64;
pub mod compiler;
pub mod expr;
pub mod keypath;
pub mod like;
pub mod parser;

#[cfg(test)]
mod eval_test;

pub use args::{ArgumentList, Arguments};
pub use ast::{CompareOp, Quantifier};
pub use expr::{Expression, PropExpr, Subexpr};
pub use keypath::KeyPathMapping;
pub use parser::parse;

use crate::cluster::leaf::ClusterLeaf;
use crate::error::TroveResult;
use crate::group::Group;
use crate::keys::{ObjKey, TableKey};
use crate::metrics::{record_duration, Metric};
use crate::table::ColumnIndex;
use crate::value::Value;
use crate::view::descriptor::Descriptor;
use crate::view::TableView;
use std::time::Instant;

/// Compiled, executable query.
#[derive(Debug, Clone)]
pub struct Query {
    pub table: TableKey,
    pub expr: Expression,
    pub descriptors: Vec<Descriptor>,
}

impl Query {
    /// Builds a range query `lo <= column <= hi` on a plain column.
    pub fn between(
        g: &Group,
        table: TableKey,
        column: &str,
        lo: Value,
        hi: Value,
    ) -> TroveResult<Query> {
        let t = g.table(table)?;
        let pos = t.col_position(column)?;
        let prop = || {
            Subexpr::Prop(PropExpr {
                steps: Vec::new(),
                column: Some(pos),
                quantifier: Quantifier::Any,
                post_op: None,
                aggregate: None,
                dict_access: None,
                list_index: None,
            })
        };
        let cmp = |op, value: Value| {
            Expression::Compare(expr::CompareExpr {
                op,
                case_insensitive: false,
                left: prop(),
                right: Subexpr::Const(value),
                like: None,
            })
        };
        Ok(Query {
            table,
            expr: Expression::And(vec![cmp(CompareOp::Ge, lo), cmp(CompareOp::Le, hi)]),
            descriptors: Vec::new(),
        })
    }

    /// First matching key at or above `start`, in key order.
    pub fn find_first(&self, g: &Group, start: Option<ObjKey>) -> TroveResult<Option<ObjKey>> {
        let t = g.table(self.table)?;
        let arena = g.arena();
        for leaf_ref in t.tree.leaf_refs(arena) {
            let leaf = ClusterLeaf::from_ref(leaf_ref);
            let n = leaf.num_rows(arena);
            if n == 0 {
                continue;
            }
            if let Some(s) = start {
                match leaf.max_key(arena) {
                    Some(max) if max < s => continue,
                    _ => {}
                }
            }
            for row in 0..n {
                let key = leaf.key_at(arena, row);
                if let Some(s) = start {
                    if key < s {
                        continue;
                    }
                }
                if self.expr.matches(g, self.table, key)? {
                    return Ok(Some(key));
                }
            }
        }
        Ok(None)
    }

    /// All matching keys, strictly ascending.
    pub fn find_all(&self, g: &Group) -> TroveResult<Vec<ObjKey>> {
        let started = Instant::now();
        let result = match self.try_index_fast_path(g)? {
            Some(keys) => keys,
            None => {
                let t = g.table(self.table)?;
                let arena = g.arena();
                let mut out = Vec::new();
                for leaf_ref in t.tree.leaf_refs(arena) {
                    let leaf = ClusterLeaf::from_ref(leaf_ref);
                    for row in 0..leaf.num_rows(arena) {
                        let key = leaf.key_at(arena, row);
                        if self.expr.matches(g, self.table, key)? {
                            out.push(key);
                        }
                    }
                }
                out
            }
        };
        record_duration(Metric::query_eval(), started.elapsed());
        Ok(result)
    }

    /// Number of matching rows.
    pub fn count(&self, g: &Group) -> TroveResult<usize> {
        Ok(self.find_all(g)?.len())
    }

    /// Materializes the result, applying the descriptor chain.
    pub fn run(&self, g: &Group) -> TroveResult<TableView> {
        let keys = self.find_all(g)?;
        TableView::from_query(g, self.clone(), keys)
    }

    /// Index-accelerated plans: equality or membership over a plain,
    /// indexed base-table column, and the `lo <= col <= hi` conjunction
    /// via the index range scan.
    fn try_index_fast_path(&self, g: &Group) -> TroveResult<Option<Vec<ObjKey>>> {
        let t = g.table(self.table)?;
        let arena = g.arena();

        match &self.expr {
            Expression::Compare(c) if c.op == CompareOp::Eq => {
                let (pos, value) = match (&c.left, &c.right) {
                    (Subexpr::Prop(p), Subexpr::Const(v)) if p.is_plain() => {
                        (p.column.unwrap_or(0), v)
                    }
                    _ => return Ok(None),
                };
                let index = match &t.cols[pos].index {
                    Some(i) => i,
                    None => return Ok(None),
                };
                let payload = t.index_payload_of(pos, value)?;
                let acc = t.accessor(pos);
                let keys = match index {
                    ColumnIndex::Trie(trie) => {
                        trie.find_all(arena, &acc, &payload, c.case_insensitive)?
                    }
                    ColumnIndex::Radix(radix) => {
                        radix.find_all(arena, &acc, &payload, c.case_insensitive)?
                    }
                };
                Ok(Some(keys))
            }
            Expression::InConst { pos, values } => {
                let index = match &t.cols[*pos].index {
                    Some(i) => i,
                    None => return Ok(None),
                };
                let acc = t.accessor(*pos);
                let mut out = Vec::new();
                for value in values {
                    let payload = t.index_payload_of(*pos, value)?;
                    let keys = match index {
                        ColumnIndex::Trie(trie) => trie.find_all(arena, &acc, &payload, false)?,
                        ColumnIndex::Radix(radix) => {
                            radix.find_all(arena, &acc, &payload, false)?
                        }
                    };
                    out.extend(keys);
                }
                out.sort_unstable();
                out.dedup();
                Ok(Some(out))
            }
            Expression::And(parts) if parts.len() == 2 => {
                // lo <= col AND col <= hi over one indexed column.
                let (ge, le) = match (&parts[0], &parts[1]) {
                    (Expression::Compare(a), Expression::Compare(b))
                        if a.op == CompareOp::Ge && b.op == CompareOp::Le =>
                    {
                        (a, b)
                    }
                    _ => return Ok(None),
                };
                let (pos_a, lo) = match (&ge.left, &ge.right) {
                    (Subexpr::Prop(p), Subexpr::Const(v)) if p.is_plain() => {
                        (p.column.unwrap_or(0), v)
                    }
                    _ => return Ok(None),
                };
                let (pos_b, hi) = match (&le.left, &le.right) {
                    (Subexpr::Prop(p), Subexpr::Const(v)) if p.is_plain() => {
                        (p.column.unwrap_or(0), v)
                    }
                    _ => return Ok(None),
                };
                if pos_a != pos_b {
                    return Ok(None);
                }
                let index = match &t.cols[pos_a].index {
                    Some(i) => i,
                    None => return Ok(None),
                };
                if lo.is_null() || hi.is_null() {
                    return Ok(None);
                }
                let acc = t.accessor(pos_a);
                let lo_p = t.index_payload_of(pos_a, lo)?;
                let hi_p = t.index_payload_of(pos_a, hi)?;
                let keys = match index {
                    ColumnIndex::Trie(trie) => trie.find_all_range(arena, &acc, &lo_p, &hi_p)?,
                    ColumnIndex::Radix(radix) => {
                        radix.find_all_range(arena, &acc, &lo_p, &hi_p)?
                    }
                };
                Ok(Some(keys))
            }
            _ => Ok(None),
        }
    }
}

impl Group {
    /// Parses and compiles a predicate against `table`.
    ///
    /// ## Error Conditions
    /// - `SyntaxError` for unparseable predicates
    /// - `InvalidQueryError` for unknown properties or illegal operators
    /// - `InvalidQueryArgError` for argument type mismatches
    pub fn query(
        &self,
        table: TableKey,
        predicate: &str,
        args: &dyn Arguments,
        mapping: &KeyPathMapping,
    ) -> TroveResult<Query> {
        let started = Instant::now();
        let parsed = parser::parse(predicate)?;
        let query = compiler::compile(self, table, &parsed, args, mapping)?;
        record_duration(Metric::query_parse(), started.elapsed());
        Ok(query)
    }

    /// Argument-free convenience wrapper around [`Group::query`].
    pub fn query_simple(&self, table: TableKey, predicate: &str) -> TroveResult<Query> {
        self.query(
            table,
            predicate,
            &ArgumentList::default(),
            &KeyPathMapping::new(),
        )
    }
}
