// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Compiled query expressions.
//!
//! The compiler lowers every parse node to one of a fixed set of shapes:
//! value-producing `Subexpr`s and boolean `Expression`s. Evaluation is a
//! match on the shape per candidate row; property chains expand through
//! links, backlinks and collections into multi-valued operands, and the
//! quantifier decides how the value sets combine.
//!
//! A missing row behind a link never errors: the chain simply produces
//! no value and the comparison falls out as "no match".

use super::ast::{AggOp, CompareOp, PostOp, Quantifier};
use crate::error::TroveResult;
use crate::group::Group;
use crate::keys::{ObjKey, TableKey};
use crate::value::{numeric_binop, Value};
use regex::Regex;
use std::cmp::Ordering;

/// One hop of a resolved property chain.
#[derive(Debug, Clone)]
pub enum LinkStep {
    /// Forward hop through a link column (scalar or collection).
    Link { pos: usize, target: TableKey },
    /// Inverse hop through the hidden backlink column.
    Backlink {
        origin_table: TableKey,
        origin_col: usize,
    },
}

/// Dictionary access mode on a terminal dictionary column.
#[derive(Debug, Clone, PartialEq)]
pub enum DictAccess {
    Key(String),
    AllValues,
    Keys,
    Values,
}

/// Resolved property reference.
#[derive(Debug, Clone)]
pub struct PropExpr {
    /// Link hops from the base table.
    pub steps: Vec<LinkStep>,
    /// Terminal column position; `None` when the path ends on the rows
    /// reached by the last hop (e.g. a bare backlink path).
    pub column: Option<usize>,
    pub quantifier: Quantifier,
    pub post_op: Option<PostOp>,
    pub aggregate: Option<AggOp>,
    pub dict_access: Option<DictAccess>,
    pub list_index: Option<usize>,
}

impl PropExpr {
    /// Whether this is a plain column on the base table (fast-path
    /// eligible).
    pub fn is_plain(&self) -> bool {
        self.steps.is_empty()
            && self.column.is_some()
            && self.post_op.is_none()
            && self.aggregate.is_none()
            && self.dict_access.is_none()
            && self.list_index.is_none()
    }

    /// Values produced for `key` on the base table.
    pub fn eval(&self, g: &Group, table: TableKey, key: ObjKey) -> TroveResult<Vec<Value>> {
        let mut rows = vec![(table, key)];
        for step in &self.steps {
            let mut next = Vec::new();
            match step {
                LinkStep::Link { pos, target } => {
                    for (t, k) in rows {
                        let obj = match g.obj(t, k) {
                            Ok(o) => o,
                            Err(_) => continue,
                        };
                        let value = obj.get_at(*pos)?;
                        for linked in value_links(&value) {
                            if g.obj(*target, linked).is_ok() {
                                next.push((*target, linked));
                            }
                        }
                    }
                }
                LinkStep::Backlink {
                    origin_table,
                    origin_col,
                } => {
                    for (t, k) in rows {
                        let obj = match g.obj(t, k) {
                            Ok(o) => o,
                            Err(_) => continue,
                        };
                        for origin in obj.backlinks(*origin_table, *origin_col) {
                            next.push((*origin_table, origin));
                        }
                    }
                }
            }
            rows = next;
        }

        let mut values = Vec::new();
        match self.column {
            Some(pos) => {
                for (t, k) in rows {
                    let obj = match g.obj(t, k) {
                        Ok(o) => o,
                        Err(_) => continue,
                    };
                    let cell = obj.get_at(pos)?;
                    self.expand_cell(cell, &mut values);
                }
            }
            None => {
                for (_, k) in rows {
                    values.push(Value::Link(k));
                }
            }
        }

        if let Some(post) = self.post_op {
            return Ok(apply_post_op(post, values));
        }
        if let Some(agg) = self.aggregate {
            return Ok(vec![apply_aggregate(agg, &values)]);
        }
        Ok(values)
    }

    /// Expands a terminal cell into operand values, honoring collection
    /// and dictionary access.
    fn expand_cell(&self, cell: Value, out: &mut Vec<Value>) {
        match cell {
            Value::List(items) | Value::Set(items) => {
                if let Some(i) = self.list_index {
                    if let Some(v) = items.into_iter().nth(i) {
                        out.push(v);
                    }
                    return;
                }
                out.extend(items);
            }
            Value::Dictionary(entries) => match &self.dict_access {
                Some(DictAccess::Key(k)) => {
                    if let Some((_, v)) = entries.into_iter().find(|(ek, _)| ek == k) {
                        out.push(v);
                    }
                }
                Some(DictAccess::Keys) => {
                    out.extend(entries.into_iter().map(|(k, _)| Value::String(k)));
                }
                Some(DictAccess::Values) | Some(DictAccess::AllValues) | None => {
                    out.extend(entries.into_iter().map(|(_, v)| v));
                }
            },
            other => out.push(other),
        }
    }
}

/// `.@size` on a string or binary cell is the byte length; otherwise
/// `@size`/`@count` is the value count.
fn apply_post_op(post: PostOp, values: Vec<Value>) -> Vec<Value> {
    match post {
        PostOp::Size if values.len() == 1 => match &values[0] {
            Value::String(s) => vec![Value::Int(s.len() as i64)],
            Value::Binary(b) => vec![Value::Int(b.len() as i64)],
            _ => vec![Value::Int(1)],
        },
        PostOp::Size | PostOp::Count => vec![Value::Int(values.len() as i64)],
        PostOp::Type => values
            .iter()
            .map(|v| Value::String(v.type_name().to_string()))
            .collect(),
    }
}

/// Null-skipping aggregates. Empty input: min/max/avg are null, sum is 0.
fn apply_aggregate(agg: AggOp, values: &[Value]) -> Value {
    let numeric: Vec<&Value> = values.iter().filter(|v| v.is_numeric()).collect();
    match agg {
        AggOp::Min => numeric
            .iter()
            .cloned()
            .min_by(|a, b| a.sort_cmp(b))
            .cloned()
            .unwrap_or(Value::Null),
        AggOp::Max => numeric
            .iter()
            .cloned()
            .max_by(|a, b| a.sort_cmp(b))
            .cloned()
            .unwrap_or(Value::Null),
        AggOp::Sum => {
            let mut acc = Value::Int(0);
            for v in numeric {
                if let Some(next) = numeric_binop('+', &acc, v) {
                    acc = next;
                }
            }
            acc
        }
        AggOp::Avg => {
            if numeric.is_empty() {
                return Value::Null;
            }
            let mut acc = Value::Double(0.0);
            let n = numeric.len() as f64;
            for v in numeric {
                if let Some(next) = numeric_binop('+', &acc, v) {
                    acc = next;
                }
            }
            numeric_binop('/', &acc, &Value::Double(n)).unwrap_or(Value::Null)
        }
    }
}

/// Object keys referenced by a link-valued cell.
fn value_links(value: &Value) -> Vec<ObjKey> {
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

/// Value-producing operand.
#[derive(Debug, Clone)]
pub enum Subexpr {
    Const(Value),
    ConstList(Vec<Value>),
    Prop(PropExpr),
    Arith {
        op: char,
        left: Box<Subexpr>,
        right: Box<Subexpr>,
    },
}

impl Subexpr {
    pub fn eval(&self, g: &Group, table: TableKey, key: ObjKey) -> TroveResult<Vec<Value>> {
        match self {
            Subexpr::Const(v) => Ok(vec![v.clone()]),
            Subexpr::ConstList(vs) => Ok(vs.clone()),
            Subexpr::Prop(p) => p.eval(g, table, key),
            Subexpr::Arith { op, left, right } => {
                let lhs = left.eval(g, table, key)?;
                let rhs = right.eval(g, table, key)?;
                let mut out = Vec::new();
                for l in &lhs {
                    for r in &rhs {
                        out.push(numeric_binop(*op, l, r).unwrap_or(Value::Null));
                    }
                }
                Ok(out)
            }
        }
    }

    pub fn quantifier(&self) -> Quantifier {
        match self {
            Subexpr::Prop(p) => p.quantifier,
            _ => Quantifier::Any,
        }
    }
}

/// Compiled comparison.
#[derive(Debug, Clone)]
pub struct CompareExpr {
    pub op: CompareOp,
    pub case_insensitive: bool,
    pub left: Subexpr,
    pub right: Subexpr,
    /// Precompiled pattern for LIKE against a constant right side.
    pub like: Option<Regex>,
}

/// Predicate tree evaluated per row.
#[derive(Debug, Clone)]
pub enum Expression {
    True,
    False,
    And(Vec<Expression>),
    Or(Vec<Expression>),
    Not(Box<Expression>),
    Compare(CompareExpr),
    /// Specialized `property IN {constants}` on a plain base-table
    /// column.
    InConst { pos: usize, values: Vec<Value> },
}

impl Expression {
    /// Whether the row at `key` matches.
    pub fn matches(&self, g: &Group, table: TableKey, key: ObjKey) -> TroveResult<bool> {
        match self {
            Expression::True => Ok(true),
            Expression::False => Ok(false),
            Expression::And(parts) => {
                for p in parts {
                    if !p.matches(g, table, key)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Expression::Or(parts) => {
                for p in parts {
                    if p.matches(g, table, key)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Expression::Not(inner) => Ok(!inner.matches(g, table, key)?),
            Expression::Compare(cmp) => cmp.matches(g, table, key),
            Expression::InConst { pos, values } => {
                let obj = g.obj(table, key)?;
                let cell = obj.get_at(*pos)?;
                Ok(values.iter().any(|v| cell.query_eq(v)))
            }
        }
    }
}

impl CompareExpr {
    fn matches(&self, g: &Group, table: TableKey, key: ObjKey) -> TroveResult<bool> {
        let lhs = self.left.eval(g, table, key)?;
        let rhs = self.right.eval(g, table, key)?;
        let quantifier = self.left.quantifier();

        let one = |l: &Value| -> TroveResult<bool> {
            for r in &rhs {
                if self.pair_matches(l, r)? {
                    return Ok(true);
                }
            }
            Ok(false)
        };

        match quantifier {
            Quantifier::Any => {
                for l in &lhs {
                    if one(l)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Quantifier::All => {
                for l in &lhs {
                    if !one(l)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Quantifier::None => {
                for l in &lhs {
                    if one(l)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }

    /// Static pair evaluation, used by the compiler's constant folding.
    pub(crate) fn const_pair_matches(&self, left: &Value, right: &Value) -> TroveResult<bool> {
        self.pair_matches(left, right)
    }

    fn pair_matches(&self, left: &Value, right: &Value) -> TroveResult<bool> {
        let ci = self.case_insensitive;
        Ok(match self.op {
            CompareOp::Eq => value_eq(left, right, ci),
            CompareOp::Ne => !value_eq(left, right, ci),
            CompareOp::Lt => left.query_cmp(right) == Some(Ordering::Less),
            CompareOp::Le => matches!(
                left.query_cmp(right),
                Some(Ordering::Less) | Some(Ordering::Equal)
            ),
            CompareOp::Gt => left.query_cmp(right) == Some(Ordering::Greater),
            CompareOp::Ge => matches!(
                left.query_cmp(right),
                Some(Ordering::Greater) | Some(Ordering::Equal)
            ),
            CompareOp::In => value_eq(left, right, ci),
            CompareOp::BeginsWith => {
                string_pair(left, right, ci, |l, r| l.starts_with(r)).unwrap_or(false)
            }
            CompareOp::EndsWith => {
                string_pair(left, right, ci, |l, r| l.ends_with(r)).unwrap_or(false)
            }
            CompareOp::Contains => {
                string_pair(left, right, ci, |l, r| contains_sub(l, r)).unwrap_or(false)
            }
            CompareOp::Like => match (&self.like, left) {
                (Some(re), Value::String(s)) => re.is_match(s),
                _ => false,
            },
            CompareOp::TextSearch => match (left, right) {
                (Value::String(text), Value::String(terms)) => text_match(text, terms),
                _ => false,
            },
        })
    }
}

fn value_eq(left: &Value, right: &Value, ci: bool) -> bool {
    if ci {
        if let (Value::String(a), Value::String(b)) = (left, right) {
            return a.to_lowercase() == b.to_lowercase();
        }
    }
    left.query_eq(right)
}

/// Applies a byte-slice predicate to a string/binary pair, folding case
/// on demand.
fn string_pair(
    left: &Value,
    right: &Value,
    ci: bool,
    f: impl Fn(&[u8], &[u8]) -> bool,
) -> Option<bool> {
    let l = value_bytes(left)?;
    let r = value_bytes(right)?;
    if ci {
        let lf: Vec<u8> = l.to_ascii_lowercase();
        let rf: Vec<u8> = r.to_ascii_lowercase();
        Some(f(&lf, &rf))
    } else {
        Some(f(&l, &r))
    }
}

fn value_bytes(v: &Value) -> Option<Vec<u8>> {
    match v {
        Value::String(s) => Some(s.as_bytes().to_vec()),
        Value::Binary(b) => Some(b.clone()),
        _ => None,
    }
}

fn contains_sub(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack
        .windows(needle.len())
        .any(|window| window == needle)
}

/// Word-level full-text match: every search term occurs as a whole word.
fn text_match(text: &str, terms: &str) -> bool {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect();
    terms
        .split_whitespace()
        .all(|term| words.iter().any(|w| w == &term.to_lowercase()))
}
