//! Normalization of the response envelopes the panel API wraps payloads in.
//!
//! Observed list shapes:
//! - bare array: `[ {...}, {...} ]`
//! - keyed: `{ "users": [ ... ], "total": 2 }`
//! - wrapped: `{ "response": <bare or keyed> }` (one level only)
//!
//! Call sites only ever see `Vec<Entity>` / `Entity`.

use serde_json::Value;

use super::traits::BulkOutcome;
use crate::entity::{Entity, EntityKind};

type ListDecoder = for<'a> fn(EntityKind, &'a Value) -> Option<&'a Vec<Value>>;
type ItemDecoder = for<'a> fn(EntityKind, &'a Value) -> Option<&'a Value>;

const LIST_DECODERS: &[(&str, ListDecoder)] = &[
    ("bare", decode_bare_list),
    ("keyed", decode_keyed_list),
    ("response", decode_wrapped_list),
];

const ITEM_DECODERS: &[(&str, ItemDecoder)] = &[
    ("bare", decode_bare_item),
    ("keyed", decode_keyed_item),
    ("response", decode_wrapped_item),
];

const AFFECTED_KEYS: &[&str] = &["affectedRows", "affectedCount", "affected", "updated", "count"];
const DETAIL_KEYS: &[&str] = &["message", "detail"];

fn decode_bare_list(_kind: EntityKind, value: &Value) -> Option<&Vec<Value>> {
    value.as_array()
}

fn decode_keyed_list(kind: EntityKind, value: &Value) -> Option<&Vec<Value>> {
    value.get(kind.plural()).and_then(Value::as_array)
}

fn decode_wrapped_list(kind: EntityKind, value: &Value) -> Option<&Vec<Value>> {
    let inner = value.get("response")?;
    decode_bare_list(kind, inner).or_else(|| decode_keyed_list(kind, inner))
}

fn decode_bare_item(_kind: EntityKind, value: &Value) -> Option<&Value> {
    let object = value.as_object()?;
    (object.contains_key("uuid") || object.contains_key("id")).then_some(value)
}

fn decode_keyed_item(kind: EntityKind, value: &Value) -> Option<&Value> {
    value
        .get(kind.as_str())
        .and_then(|inner| decode_bare_item(kind, inner))
}

fn decode_wrapped_item(kind: EntityKind, value: &Value) -> Option<&Value> {
    let inner = value.get("response")?;
    decode_bare_item(kind, inner).or_else(|| decode_keyed_item(kind, inner))
}

fn describe_shape(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let keys: Vec<&str> = map.keys().map(String::as_str).take(8).collect();
            format!("object{{{}}}", keys.join(","))
        }
        Value::Array(_) => "array".into(),
        Value::String(_) => "string".into(),
        Value::Number(_) => "number".into(),
        Value::Bool(_) => "bool".into(),
        Value::Null => "null".into(),
    }
}

/// Decode a list response. Unrecognized shapes yield an empty list and a logged anomaly.
pub fn normalize_list(kind: EntityKind, body: &Value) -> Vec<Entity> {
    let Some((shape, items)) = LIST_DECODERS
        .iter()
        .find_map(|(shape, decode)| decode(kind, body).map(|items| (*shape, items)))
    else {
        tracing::warn!(
            kind = %kind,
            shape = %describe_shape(body),
            "unrecognized list envelope; treating as empty"
        );
        return Vec::new();
    };

    let mut entities = Vec::with_capacity(items.len());
    for item in items {
        match Entity::from_value(kind, item.clone()) {
            Some(entity) => entities.push(entity),
            None => tracing::debug!(kind = %kind, envelope = shape, "skipping list item without id"),
        }
    }
    entities
}

/// Decode a single-entity response.
pub fn normalize_item(kind: EntityKind, body: &Value) -> Option<Entity> {
    let item = ITEM_DECODERS
        .iter()
        .find_map(|(_, decode)| decode(kind, body));
    match item {
        Some(value) => Entity::from_value(kind, value.clone()),
        None => {
            tracing::warn!(
                kind = %kind,
                shape = %describe_shape(body),
                "unrecognized entity envelope"
            );
            None
        }
    }
}

/// Extract whatever affected-count detail the backend reports for a bulk request.
pub fn normalize_bulk(body: &Value, requested: usize) -> BulkOutcome {
    let null = Value::Null;
    let scopes = [body, body.get("response").unwrap_or(&null)];

    let affected = scopes.iter().find_map(|scope| {
        AFFECTED_KEYS
            .iter()
            .find_map(|key| scope.get(*key).and_then(Value::as_u64))
            .and_then(|n| usize::try_from(n).ok())
    });
    let detail = scopes.iter().find_map(|scope| {
        DETAIL_KEYS
            .iter()
            .find_map(|key| scope.get(*key).and_then(Value::as_str))
            .map(ToString::to_string)
    });

    BulkOutcome {
        requested,
        affected,
        detail,
    }
}
