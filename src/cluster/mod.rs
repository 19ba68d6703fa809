// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Cluster-tree object store.
//!
//! Each table's rows live in a B+-tree keyed by object key whose leaves
//! ("clusters") hold up to `CLUSTER_NODE_SIZE` rows stored column-wise:
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ inner node: [keys] [child] [child] ...        │
//! │     keys[i] = max key in child i's subtree    │
//! └───────┬───────────────────────┬───────────────┘
//!         ▼                       ▼
//! ┌───────────────┐       ┌───────────────┐
//! │ cluster leaf  │       │ cluster leaf  │
//! │ [offsets]     │       │ [offsets]     │
//! │ [base key]    │       │ [base key]    │
//! │ [col 0 array] │       │ [col 0 array] │
//! │ [col 1 array] │  ...  │ [col 1 array] │
//! └───────────────┘       └───────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - `payload`: cell encodings for ref-backed columns (blobs, Mixed,
//!   collections)
//! - `leaf`: one cluster, row insertion/erasure, per-cell get/set,
//!   backlink cells, lockstep splits
//! - `tree`: the B+-tree proper: descent, three-valued split
//!   propagation, collapse on delete

pub mod leaf;
pub mod payload;
pub mod tree;

pub use leaf::ClusterLeaf;
pub use tree::{ClusterTree, NodeChange, CLUSTER_NODE_SIZE};
