// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Parsed query tree.
//!
//! The parser produces these nodes without consulting the schema; the
//! compiler resolves identifiers, coerces constants and lowers the tree
//! to executable expressions. Nodes live only as long as compilation.

use crate::value::Timestamp;

/// Complete parse result: predicate plus trailing descriptors.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuery {
    pub predicate: Pred,
    pub descriptors: Vec<DescriptorNode>,
}

/// Trailing SORT / DISTINCT / LIMIT clause.
#[derive(Debug, Clone, PartialEq)]
pub enum DescriptorNode {
    Sort(Vec<(Vec<String>, bool)>),
    Distinct(Vec<Vec<String>>),
    Limit(usize),
}

/// Predicate node.
#[derive(Debug, Clone, PartialEq)]
pub enum Pred {
    True,
    False,
    And(Vec<Pred>),
    Or(Vec<Pred>),
    Not(Box<Pred>),
    Cmp(Comparison),
}

/// Comparison operators, including the string family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    BeginsWith,
    EndsWith,
    Contains,
    Like,
    In,
    TextSearch,
}

impl CompareOp {
    pub fn is_ordered(&self) -> bool {
        matches!(
            self,
            CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge
        )
    }

    pub fn is_string_op(&self) -> bool {
        matches!(
            self,
            CompareOp::BeginsWith
                | CompareOp::EndsWith
                | CompareOp::Contains
                | CompareOp::Like
                | CompareOp::TextSearch
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::BeginsWith => "BEGINSWITH",
            CompareOp::EndsWith => "ENDSWITH",
            CompareOp::Contains => "CONTAINS",
            CompareOp::Like => "LIKE",
            CompareOp::In => "IN",
            CompareOp::TextSearch => "TEXT",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub op: CompareOp,
    pub case_insensitive: bool,
    pub left: ValueNode,
    pub right: ValueNode,
}

/// Collection quantifier prefixing a key path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    Any,
    All,
    None,
}

/// Post-ops on a resolved key path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOp {
    Size,
    Count,
    Type,
}

/// Aggregates over a multi-valued key path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggOp {
    Min,
    Max,
    Sum,
    Avg,
}

/// One step of a dotted key path.
#[derive(Debug, Clone, PartialEq)]
pub enum PathElem {
    /// Plain identifier.
    Key(String),
    /// Numeric list index `[i]`.
    Index(usize),
    /// Dictionary access `[key]`.
    DictKey(String),
    /// Dictionary wildcard `[ALL]`.
    AllEntries,
    /// `@keys` of a dictionary.
    Keys,
    /// `@values` of a dictionary.
    Values,
    /// Backlink hop `@links.Table.column`.
    Backlink { table: String, column: String },
}

/// Value-producing node.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueNode {
    Constant(Constant),
    Property {
        quantifier: Option<Quantifier>,
        path: Vec<PathElem>,
        post_op: Option<PostOp>,
        aggregate: Option<AggOp>,
    },
    Arith {
        op: char,
        left: Box<ValueNode>,
        right: Box<ValueNode>,
    },
}

impl ValueNode {
    pub fn is_constant(&self) -> bool {
        match self {
            ValueNode::Constant(_) => true,
            ValueNode::Arith { left, right, .. } => left.is_constant() && right.is_constant(),
            _ => false,
        }
    }
}

/// Literal constants and argument references.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(i64),
    Float(f64),
    String(String),
    Base64(Vec<u8>),
    Timestamp(Timestamp),
    Uuid(uuid::Uuid),
    ObjectId(crate::value::ObjectId),
    Null,
    True,
    False,
    /// `$n`
    Arg(usize),
    /// `$Kn`: argument interpreted as an object key.
    KeyArg(usize),
    /// Brace list literal `{a, b, c}` for IN.
    List(Vec<Constant>),
}
