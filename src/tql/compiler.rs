// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Lowering from the parsed tree to executable expressions.
//!
//! The compiler resolves identifiers against the schema (through the
//! key-path mapping), pulls numbered arguments, coerces constants to the
//! opposing operand's declared type with truncation guards, folds
//! constant-only comparisons, enforces operator/type compatibility and
//! rewrites eligible `IN` comparisons to the specialized constant-set
//! shape.

use super::ast::{
    AggOp, CompareOp, Comparison, Constant, DescriptorNode, ParsedQuery, PathElem, PostOp, Pred,
    Quantifier, ValueNode,
};
use super::args::Arguments;
use super::expr::{CompareExpr, DictAccess, Expression, LinkStep, PropExpr, Subexpr};
use super::keypath::KeyPathMapping;
use super::like;
use super::Query;
use crate::error::{TroveError, TroveResult};
use crate::group::Group;
use crate::keys::TableKey;
use crate::value::{ColumnType, Decimal128, Value};
use crate::view::descriptor::Descriptor;

/// Static type of an operand, as far as the compiler can know it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperandType {
    Typed(ColumnType),
    /// Result of the `.@type` post-op.
    TypeSentinel,
    /// Mixed column or arithmetic result.
    Unknown,
}

impl OperandType {
    fn as_column_type(&self) -> Option<ColumnType> {
        match self {
            OperandType::Typed(t) => Some(*t),
            OperandType::TypeSentinel => Some(ColumnType::String),
            OperandType::Unknown => None,
        }
    }
}

/// Compiles a parsed query against a base table.
pub fn compile(
    g: &Group,
    table: TableKey,
    parsed: &ParsedQuery,
    args: &dyn Arguments,
    mapping: &KeyPathMapping,
) -> TroveResult<Query> {
    let ctx = Compiler {
        g,
        table,
        args,
        mapping,
    };
    let expr = ctx.lower_pred(&parsed.predicate)?;
    let mut descriptors = Vec::new();
    for d in &parsed.descriptors {
        descriptors.push(ctx.lower_descriptor(d)?);
    }
    Ok(Query {
        table,
        expr,
        descriptors,
    })
}

struct Compiler<'a> {
    g: &'a Group,
    table: TableKey,
    args: &'a dyn Arguments,
    mapping: &'a KeyPathMapping,
}

impl<'a> Compiler<'a> {
    fn lower_pred(&self, pred: &Pred) -> TroveResult<Expression> {
        Ok(match pred {
            Pred::True => Expression::True,
            Pred::False => Expression::False,
            Pred::And(parts) => Expression::And(
                parts
                    .iter()
                    .map(|p| self.lower_pred(p))
                    .collect::<TroveResult<_>>()?,
            ),
            Pred::Or(parts) => Expression::Or(
                parts
                    .iter()
                    .map(|p| self.lower_pred(p))
                    .collect::<TroveResult<_>>()?,
            ),
            Pred::Not(inner) => Expression::Not(Box::new(self.lower_pred(inner)?)),
            Pred::Cmp(cmp) => self.lower_comparison(cmp)?,
        })
    }

    fn lower_comparison(&self, cmp: &Comparison) -> TroveResult<Expression> {
        // Constant-only comparisons fold at compile time.
        if cmp.left.is_constant() && cmp.right.is_constant() {
            return self.fold_constant(cmp);
        }

        if cmp.op == CompareOp::In {
            return self.lower_in(cmp);
        }

        // Resolve the non-constant side first so the constant can be
        // coerced to its declared type.
        let (left, left_ty, right, right_ty) = if cmp.left.is_constant() {
            let (r, rt) = self.resolve_value(&cmp.right, None)?;
            let (l, lt) = self.resolve_value(&cmp.left, rt.as_column_type())?;
            (l, lt, r, rt)
        } else {
            let (l, lt) = self.resolve_value(&cmp.left, None)?;
            let (r, rt) = self.resolve_value(&cmp.right, lt.as_column_type())?;
            (l, lt, r, rt)
        };

        self.check_compatibility(cmp, left_ty, right_ty)?;

        let like = if cmp.op == CompareOp::Like {
            match &right {
                Subexpr::Const(Value::String(pattern)) => {
                    Some(like::compile(pattern, cmp.case_insensitive)?)
                }
                _ => {
                    return Err(TroveError::InvalidQuery {
                        message: "LIKE requires a constant string pattern".to_string(),
                    })
                }
            }
        } else {
            None
        };

        Ok(Expression::Compare(CompareExpr {
            op: cmp.op,
            case_insensitive: cmp.case_insensitive,
            left,
            right,
            like,
        }))
    }

    fn lower_in(&self, cmp: &Comparison) -> TroveResult<Expression> {
        let (left, left_ty) = self.resolve_value(&cmp.left, None)?;
        let target = left_ty.as_column_type();

        // The right side may be a brace literal, a list argument, or a
        // collection property.
        let values: Option<Vec<Value>> = match &cmp.right {
            ValueNode::Constant(Constant::List(items)) => Some(
                items
                    .iter()
                    .map(|c| self.coerce_constant(c, target))
                    .collect::<TroveResult<_>>()?,
            ),
            ValueNode::Constant(Constant::Arg(n)) => {
                if self.args.is_argument_list(*n)? {
                    Some(
                        self.args
                            .list_for_argument(*n)?
                            .iter()
                            .map(|v| coerce_value(v, target, *n))
                            .collect::<TroveResult<_>>()?,
                    )
                } else {
                    None
                }
            }
            _ => None,
        };

        match values {
            Some(values) => {
                // Plain base-table property: specialized membership node.
                if let Subexpr::Prop(p) = &left {
                    if p.is_plain() {
                        let pos = p.column.unwrap_or(0);
                        return Ok(Expression::InConst { pos, values });
                    }
                }
                Ok(Expression::Compare(CompareExpr {
                    op: CompareOp::In,
                    case_insensitive: cmp.case_insensitive,
                    left,
                    right: Subexpr::ConstList(values),
                    like: None,
                }))
            }
            None => {
                let (right, _) = self.resolve_value(&cmp.right, target)?;
                Ok(Expression::Compare(CompareExpr {
                    op: CompareOp::In,
                    case_insensitive: cmp.case_insensitive,
                    left,
                    right,
                    like: None,
                }))
            }
        }
    }

    fn fold_constant(&self, cmp: &Comparison) -> TroveResult<Expression> {
        let left = self.const_values(&cmp.left)?;
        let right = self.const_values(&cmp.right)?;
        let like = if cmp.op == CompareOp::Like {
            match right.first() {
                Some(Value::String(p)) => Some(like::compile(p, cmp.case_insensitive)?),
                _ => None,
            }
        } else {
            None
        };
        let probe = CompareExpr {
            op: cmp.op,
            case_insensitive: cmp.case_insensitive,
            left: Subexpr::Const(Value::Null),
            right: Subexpr::Const(Value::Null),
            like,
        };
        for l in &left {
            for r in &right {
                if probe.const_pair_matches(l, r)? {
                    return Ok(Expression::True);
                }
            }
        }
        Ok(Expression::False)
    }

    /// Evaluates a constant-only value node on the mixed-arithmetic
    /// value lattice.
    fn const_values(&self, node: &ValueNode) -> TroveResult<Vec<Value>> {
        match node {
            ValueNode::Constant(Constant::List(items)) => items
                .iter()
                .map(|c| self.coerce_constant(c, None))
                .collect(),
            ValueNode::Constant(c) => Ok(vec![self.coerce_constant(c, None)?]),
            ValueNode::Arith { op, left, right } => {
                let l = self.const_values(left)?;
                let r = self.const_values(right)?;
                let mut out = Vec::new();
                for a in &l {
                    for b in &r {
                        out.push(crate::value::numeric_binop(*op, a, b).unwrap_or(Value::Null));
                    }
                }
                Ok(out)
            }
            ValueNode::Property { .. } => Err(TroveError::InvalidQuery {
                message: "property in constant fold".to_string(),
            }),
        }
    }

    fn resolve_value(
        &self,
        node: &ValueNode,
        target: Option<ColumnType>,
    ) -> TroveResult<(Subexpr, OperandType)> {
        match node {
            ValueNode::Constant(c) => {
                let value = self.coerce_constant(c, target)?;
                let ty = value
                    .data_type()
                    .map(OperandType::Typed)
                    .unwrap_or(OperandType::Unknown);
                Ok((Subexpr::Const(value), ty))
            }
            ValueNode::Arith { op, left, right } => {
                let (l, _) = self.resolve_value(left, None)?;
                let (r, _) = self.resolve_value(right, None)?;
                Ok((
                    Subexpr::Arith {
                        op: *op,
                        left: Box::new(l),
                        right: Box::new(r),
                    },
                    OperandType::Unknown,
                ))
            }
            ValueNode::Property {
                quantifier,
                path,
                post_op,
                aggregate,
            } => self.resolve_property(*quantifier, path, *post_op, *aggregate),
        }
    }

    fn resolve_property(
        &self,
        quantifier: Option<Quantifier>,
        path: &[PathElem],
        post_op: Option<PostOp>,
        aggregate: Option<AggOp>,
    ) -> TroveResult<(Subexpr, OperandType)> {
        let mut steps: Vec<LinkStep> = Vec::new();
        let mut column: Option<usize> = None;
        let mut column_type: Option<ColumnType> = None;
        let mut dict_access: Option<DictAccess> = None;
        let mut list_index: Option<usize> = None;
        let mut crosses_collection = false;
        let mut current = self.table;

        let mut idx = 0;
        while idx < path.len() {
            let elem = &path[idx];
            let last = idx == path.len() - 1;
            match elem {
                PathElem::Backlink { table, column: col } => {
                    if column.is_some() {
                        return Err(self.bad_path("backlink after terminal column"));
                    }
                    let real_table = self.mapping.translate_table_name(table)?;
                    let origin = self.g.table_by_name(&real_table)?;
                    let translated = self.mapping.translate(origin.key, col)?;
                    let origin_col = origin.col_position(&translated)?;
                    if origin.cols[origin_col].key.col_type() != ColumnType::Link {
                        return Err(TroveError::InvalidQuery {
                            message: format!("'{}.{}' is not a link column", table, col),
                        });
                    }
                    steps.push(LinkStep::Backlink {
                        origin_table: origin.key,
                        origin_col,
                    });
                    crosses_collection = true;
                    current = origin.key;
                }
                PathElem::Key(name) => {
                    if column.is_some() {
                        return Err(self.bad_path(&format!("'{}' after terminal column", name)));
                    }
                    let translated = self.mapping.translate(current, name)?;
                    // An alias may expand to a dotted path.
                    if translated.contains('.') {
                        let spliced: Vec<PathElem> = translated
                            .split('.')
                            .map(|part| PathElem::Key(part.to_string()))
                            .collect();
                        let mut new_path: Vec<PathElem> = Vec::new();
                        new_path.extend_from_slice(&path[..idx]);
                        new_path.extend(spliced);
                        new_path.extend_from_slice(&path[idx + 1..]);
                        return self.resolve_property(quantifier, &new_path, post_op, aggregate);
                    }
                    let t = self.g.table(current)?;
                    let pos = t.col_position(&translated)?;
                    let ck = t.cols[pos].key;
                    let is_link = ck.col_type() == ColumnType::Link;
                    if is_link && !last {
                        // Hop through; collections fan out.
                        let target =
                            t.cols[pos]
                                .target_table
                                .ok_or_else(|| TroveError::InvalidQuery {
                                    message: format!("link column '{}' has no target", translated),
                                })?;
                        if ck.is_collection() {
                            crosses_collection = true;
                        }
                        steps.push(LinkStep::Link { pos, target });
                        current = target;
                    } else {
                        column = Some(pos);
                        column_type = Some(ck.col_type());
                        if ck.is_collection() {
                            crosses_collection = true;
                        }
                    }
                }
                PathElem::Index(i) => {
                    if column.is_none() {
                        return Err(self.bad_path("index access before a collection column"));
                    }
                    list_index = Some(*i);
                    crosses_collection = false; // single element access
                }
                PathElem::DictKey(k) => {
                    if column.is_none() {
                        return Err(self.bad_path("dictionary access before a column"));
                    }
                    dict_access = Some(DictAccess::Key(k.clone()));
                    crosses_collection = false;
                }
                PathElem::AllEntries => {
                    dict_access = Some(DictAccess::AllValues);
                    crosses_collection = true;
                }
                PathElem::Keys => {
                    dict_access = Some(DictAccess::Keys);
                    column_type = Some(ColumnType::String);
                    crosses_collection = true;
                }
                PathElem::Values => {
                    dict_access = Some(DictAccess::Values);
                    crosses_collection = true;
                }
            }
            idx += 1;
        }

        if column.is_none() && steps.is_empty() {
            return Err(self.bad_path("empty key path"));
        }

        let effective_quantifier = quantifier.unwrap_or(Quantifier::Any);
        if quantifier.is_some() && !crosses_collection {
            return Err(TroveError::InvalidQuery {
                message: "quantifier on a single-valued key path".to_string(),
            });
        }

        let prop = PropExpr {
            steps,
            column,
            quantifier: effective_quantifier,
            post_op,
            aggregate,
            dict_access,
            list_index,
        };

        let ty = if post_op == Some(PostOp::Type) {
            OperandType::TypeSentinel
        } else if matches!(post_op, Some(PostOp::Size) | Some(PostOp::Count)) {
            OperandType::Typed(ColumnType::Int)
        } else if aggregate.is_some() {
            OperandType::Unknown
        } else {
            match column_type {
                Some(ColumnType::Mixed) | None => {
                    if prop.column.is_none() {
                        OperandType::Typed(ColumnType::Link)
                    } else {
                        OperandType::Unknown
                    }
                }
                Some(t) => OperandType::Typed(t),
            }
        };
        Ok((Subexpr::Prop(prop), ty))
    }

    fn check_compatibility(
        &self,
        cmp: &Comparison,
        left: OperandType,
        right: OperandType,
    ) -> TroveResult<()> {
        let err = |message: String| Err(TroveError::InvalidQuery { message });

        if cmp.op.is_ordered() {
            if left == OperandType::TypeSentinel || right == OperandType::TypeSentinel {
                return err(format!(
                    "ordered comparison '{}' is not defined for @type",
                    cmp.op.name()
                ));
            }
            if left.as_column_type() == Some(ColumnType::Link)
                || right.as_column_type() == Some(ColumnType::Link)
            {
                return err(format!(
                    "ordered comparison '{}' is not defined for links",
                    cmp.op.name()
                ));
            }
        }

        if cmp.op.is_string_op() {
            for (side, ty) in [("left", left), ("right", right)] {
                if let Some(t) = ty.as_column_type() {
                    if !matches!(
                        t,
                        ColumnType::String | ColumnType::Binary | ColumnType::Mixed
                    ) {
                        return err(format!(
                            "string operator '{}' requires string or binary {} operand, got {}",
                            cmp.op.name(),
                            side,
                            t.name()
                        ));
                    }
                }
            }
        }

        if cmp.case_insensitive {
            for ty in [left, right] {
                if let Some(t) = ty.as_column_type() {
                    if !matches!(
                        t,
                        ColumnType::String | ColumnType::Binary | ColumnType::Mixed
                    ) {
                        return err(format!(
                            "case-insensitive compare requires string or binary operands, got {}",
                            t.name()
                        ));
                    }
                }
            }
        }

        // General comparability.
        if let (Some(l), Some(r)) = (left.as_column_type(), right.as_column_type()) {
            if !types_comparable(l, r) {
                return err(format!(
                    "cannot compare {} against {}",
                    l.name(),
                    r.name()
                ));
            }
        }
        Ok(())
    }

    fn coerce_constant(&self, c: &Constant, target: Option<ColumnType>) -> TroveResult<Value> {
        let truncation = |what: &str| TroveError::InvalidQuery {
            message: format!("{} cannot be represented as an integer", what),
        };
        Ok(match c {
            Constant::Null => Value::Null,
            Constant::True => Value::Bool(true),
            Constant::False => Value::Bool(false),
            Constant::Int(v) => match target {
                Some(ColumnType::Float) => Value::Float(*v as f32),
                Some(ColumnType::Double) => Value::Double(*v as f64),
                Some(ColumnType::Decimal) => Value::Decimal(Decimal128::from_i64(*v)),
                _ => Value::Int(*v),
            },
            Constant::Float(v) => match target {
                Some(ColumnType::Int) | Some(ColumnType::Timestamp) => {
                    if !v.is_finite() {
                        return Err(truncation("non-finite value"));
                    }
                    if v.fract() != 0.0 {
                        return Err(truncation(&format!("{}", v)));
                    }
                    Value::Int(*v as i64)
                }
                Some(ColumnType::Float) => Value::Float(*v as f32),
                Some(ColumnType::Decimal) => {
                    Decimal128::parse(&format!("{}", v)).map(Value::Decimal).map_err(|_| {
                        TroveError::InvalidQuery {
                            message: format!("cannot convert {} to decimal", v),
                        }
                    })?
                }
                _ => Value::Double(*v),
            },
            Constant::String(s) => match target {
                Some(ColumnType::Binary) => Value::Binary(s.clone().into_bytes()),
                _ => Value::String(s.clone()),
            },
            Constant::Base64(b) => match target {
                Some(ColumnType::String) => {
                    Value::String(String::from_utf8_lossy(b).into_owned())
                }
                _ => Value::Binary(b.clone()),
            },
            Constant::Timestamp(ts) => Value::Timestamp(*ts),
            Constant::Uuid(u) => Value::Uuid(*u),
            Constant::ObjectId(oid) => Value::ObjectId(*oid),
            Constant::Arg(n) => {
                if self.args.is_argument_null(*n)? {
                    Value::Null
                } else if self.args.is_argument_list(*n)? {
                    return Err(TroveError::InvalidQueryArg {
                        message: format!("argument ${} is a list in a scalar position", n),
                    });
                } else {
                    coerce_value(&self.args.value_for_argument(*n)?, target, *n)?
                }
            }
            Constant::KeyArg(n) => Value::Link(self.args.objkey_for_argument(*n)?),
            Constant::List(_) => {
                return Err(TroveError::InvalidQuery {
                    message: "list literal outside IN".to_string(),
                })
            }
        })
    }

    fn lower_descriptor(&self, d: &DescriptorNode) -> TroveResult<Descriptor> {
        match d {
            DescriptorNode::Sort(clauses) => {
                for (path, _) in clauses {
                    self.check_descriptor_path(path)?;
                }
                Ok(Descriptor::Sort(clauses.clone()))
            }
            DescriptorNode::Distinct(paths) => {
                for path in paths {
                    self.check_descriptor_path(path)?;
                }
                Ok(Descriptor::Distinct(paths.clone()))
            }
            DescriptorNode::Limit(n) => Ok(Descriptor::Limit(*n)),
        }
    }

    /// Validates a sort/distinct column chain: link hops ending in a
    /// plain scalar column.
    fn check_descriptor_path(&self, path: &[String]) -> TroveResult<()> {
        let mut current = self.table;
        for (i, name) in path.iter().enumerate() {
            let translated = self.mapping.translate(current, name)?;
            let t = self.g.table(current)?;
            let pos = t.col_position(&translated)?;
            let ck = t.cols[pos].key;
            let last = i == path.len() - 1;
            if last {
                if ck.is_collection() || ck.col_type() == ColumnType::Link {
                    return Err(TroveError::IllegalCombination {
                        reason: format!("cannot order by '{}'", name),
                    });
                }
            } else {
                if ck.col_type() != ColumnType::Link || ck.is_collection() {
                    return Err(TroveError::IllegalCombination {
                        reason: format!("'{}' is not a single link column", name),
                    });
                }
                current = t.cols[pos].target_table.ok_or_else(|| {
                    TroveError::InvalidQuery {
                        message: format!("link column '{}' has no target", name),
                    }
                })?;
            }
        }
        Ok(())
    }

    fn bad_path(&self, detail: &str) -> TroveError {
        TroveError::InvalidQuery {
            message: format!("invalid key path: {}", detail),
        }
    }
}

/// Converts a runtime argument value to the operand's declared type.
fn coerce_value(v: &Value, target: Option<ColumnType>, arg: usize) -> TroveResult<Value> {
    let mismatch = |t: ColumnType| TroveError::InvalidQueryArg {
        message: format!(
            "argument ${} of type {} cannot be coerced to {}",
            arg,
            v.type_name(),
            t.name()
        ),
    };
    let target = match target {
        Some(t) => t,
        None => return Ok(v.clone()),
    };
    Ok(match (v, target) {
        (Value::Null, _) => Value::Null,
        (Value::Int(i), ColumnType::Int) => Value::Int(*i),
        (Value::Int(i), ColumnType::Float) => Value::Float(*i as f32),
        (Value::Int(i), ColumnType::Double) => Value::Double(*i as f64),
        (Value::Int(i), ColumnType::Decimal) => Value::Decimal(Decimal128::from_i64(*i)),
        (Value::Int(i), ColumnType::Link) => Value::Link(crate::keys::ObjKey(*i)),
        (Value::Double(d), ColumnType::Int) => {
            if !d.is_finite() || d.fract() != 0.0 {
                return Err(mismatch(target));
            }
            Value::Int(*d as i64)
        }
        (Value::Double(d), ColumnType::Double) => Value::Double(*d),
        (Value::Double(d), ColumnType::Float) => Value::Float(*d as f32),
        (Value::Float(f), ColumnType::Float) => Value::Float(*f),
        (Value::Float(f), ColumnType::Double) => Value::Double(*f as f64),
        (Value::Bool(b), ColumnType::Bool) => Value::Bool(*b),
        (Value::String(s), ColumnType::String) => Value::String(s.clone()),
        (Value::String(s), ColumnType::Binary) => Value::Binary(s.clone().into_bytes()),
        (Value::Binary(b), ColumnType::Binary) => Value::Binary(b.clone()),
        (Value::Timestamp(ts), ColumnType::Timestamp) => Value::Timestamp(*ts),
        (Value::Uuid(u), ColumnType::Uuid) => Value::Uuid(*u),
        (Value::ObjectId(o), ColumnType::ObjectId) => Value::ObjectId(*o),
        (Value::Link(k), ColumnType::Link) => Value::Link(*k),
        (any, ColumnType::Mixed) => any.clone(),
        _ => return Err(mismatch(target)),
    })
}

/// Type-pair comparability under the numeric promotion rules. Bool only
/// compares against Bool; the other numerics interchange freely.
fn types_comparable(l: ColumnType, r: ColumnType) -> bool {
    use ColumnType::*;
    if l == r {
        return true;
    }
    let numeric = |t: ColumnType| matches!(t, Int | Float | Double | Decimal);
    if numeric(l) && numeric(r) {
        return true;
    }
    matches!(
        (l, r),
        (String, Binary) | (Binary, String) | (Mixed, _) | (_, Mixed)
    )
}
