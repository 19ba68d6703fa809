// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! JSON export of objects and views.
//!
//! Links follow up to `link_depth` hops and then degrade to bare key
//! references, which also bounds cycles in the link graph. Binary cells
//! render as base64, timestamps as RFC 3339 where representable.

use crate::error::TroveResult;
use crate::group::Group;
use crate::keys::{ObjKey, TableKey};
use crate::tql::base64;
use crate::value::{ColumnType, Value};
use crate::view::TableView;
use serde_json::{json, Map};

/// Renders one object as a JSON map of its user columns.
pub fn obj_to_json(
    g: &Group,
    table: TableKey,
    key: ObjKey,
    link_depth: usize,
) -> TroveResult<serde_json::Value> {
    let t = g.table(table)?;
    let obj = g.obj(table, key)?;
    let mut out = Map::new();
    out.insert("_key".to_string(), json!(key.0));
    for (pos, col) in t.cols.iter().enumerate() {
        if col.key.col_type() == ColumnType::Backlink {
            continue;
        }
        let value = obj.get_at(pos)?;
        let rendered = match (&value, col.target_table) {
            (Value::Link(linked), Some(target)) if link_depth > 0 => {
                match obj_to_json(g, target, *linked, link_depth - 1) {
                    Ok(nested) => nested,
                    Err(_) => json!(linked.0),
                }
            }
            _ => value_to_json(g, &value, col.target_table, link_depth),
        };
        out.insert(col.name.clone(), rendered);
    }
    Ok(serde_json::Value::Object(out))
}

/// Renders a view as a JSON array of its rows.
pub fn view_to_json(g: &Group, view: &TableView, link_depth: usize) -> TroveResult<serde_json::Value> {
    let mut rows = Vec::with_capacity(view.len());
    for key in view.iter() {
        rows.push(obj_to_json(g, view.table, key, link_depth)?);
    }
    Ok(serde_json::Value::Array(rows))
}

fn value_to_json(
    g: &Group,
    value: &Value,
    link_target: Option<TableKey>,
    link_depth: usize,
) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Int(v) => json!(v),
        Value::Bool(b) => json!(b),
        Value::String(s) => json!(s),
        Value::Binary(b) => json!(base64::encode(b)),
        Value::Float(f) => json!(f),
        Value::Double(d) => json!(d),
        Value::Decimal(d) => json!(d.to_string()),
        Value::Timestamp(ts) => json!(ts.to_string()),
        Value::ObjectId(oid) => json!(oid.to_string()),
        Value::Uuid(u) => json!(u.to_string()),
        Value::Link(k) => match link_target {
            Some(target) if link_depth > 0 => obj_to_json(g, target, *k, link_depth - 1)
                .unwrap_or_else(|_| json!(k.0)),
            _ => json!(k.0),
        },
        Value::TypedLink(l) => json!({ "table": l.table.0, "key": l.key.0 }),
        Value::List(items) | Value::Set(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|v| value_to_json(g, v, link_target, link_depth))
                .collect(),
        ),
        Value::Dictionary(entries) => {
            let mut map = Map::new();
            for (k, v) in entries {
                map.insert(k.clone(), value_to_json(g, v, link_target, link_depth));
            }
            serde_json::Value::Object(map)
        }
    }
}
