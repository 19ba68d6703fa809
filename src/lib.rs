// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! TroveDB - embedded, single-file object database engine.
//!
//! Application data lives in typed tables of rows with stable 64-bit
//! keys, persisted in one memory-mapped file. All on-disk structures are
//! width-compressed arrays addressed by immutable refs.
//!
//! ## Features
//!
//! - **Cluster-tree store**: per-table B+-tree of column-major leaves
//! - **Search indices**: string-prefix trie and integer radix tree
//! - **TQL**: a compiled predicate language with links, backlinks,
//!   collections, aggregates and sort/distinct/limit descriptors
//! - **MVCC commits**: dual top-refs, copy-on-write refs, free-list reuse
//!   only after publication
//! - **Single-writer coordination** via advisory file locks
//!
//! ## Quick Start
//!
//! ```no_run
//! use trovedb::group::Group;
//! use trovedb::value::{ColumnType, Value};
//!
//! let mut g = Group::open("app.trove")?;
//! let people = g.add_table("people")?;
//! g.add_column(people, ColumnType::String, "name", false)?;
//! g.add_search_index(people, "name")?;
//!
//! let alice = g.create_object(people)?;
//! g.set_value(people, alice, "name", Value::String("Alice".into()))?;
//! g.commit()?;
//!
//! let q = g.query_simple(people, "name == 'Alice'")?;
//! assert_eq!(q.run(&g)?.len(), 1);
//! # Ok::<(), trovedb::error::TroveError>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Group (schema, commit)                  │
//! ├───────────────┬───────────────────────┬─────────────────────┤
//! │  ClusterTree  │     Search indices    │     TQL queries     │
//! │  (tables)     │   (trie / radix)      │  parse→compile→eval │
//! ├───────────────┴───────────────────────┴─────────────────────┤
//! │             Array primitives (8-byte headers)               │
//! ├─────────────────────────────────────────────────────────────┤
//! │          Arena (mmap file, refs, dual top-refs)             │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod alloc;
pub mod array;
pub mod cluster;
pub mod config;
pub mod error;
pub mod group;
pub mod index;
pub mod json;
pub mod keys;
pub mod metrics;
pub mod table;
pub mod tql;
pub mod value;
pub mod view;

#[cfg(test)]
mod group_test;

// Re-export commonly used types
pub use config::DbOptions;
pub use error::{TroveError, TroveResult};
pub use group::Group;
pub use keys::{ColKey, CollectionKind, ObjKey, ObjLink, TableKey};
pub use metrics::{Metric, MetricsCollector};
pub use table::{Obj, Table};
pub use tql::{ArgumentList, Arguments, KeyPathMapping, Query};
pub use value::{ColumnType, Decimal128, ObjectId, Timestamp, Value};
pub use view::TableView;
