//! Payload shaping modes and field-set helpers.
//!
//! `detailed` is the identity, `sensitive` strips a declared list of
//! secret-ish keys recursively, `minimal` keeps only the top-level
//! control fields plus `data.{id,type,operation}`.

use serde_json::{Map, Value};

use crate::subscription::PayloadMode;

/// Keys stripped by the `sensitive` mode (case-insensitive exact match).
pub const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "token",
    "secret",
    "key",
    "credential",
    "credentials",
    "email",
    "phone",
    "apikey",
    "authorization",
    "ssn",
];

/// Top-level fields retained by the `minimal` mode.
const CONTROL_FIELDS: &[&str] = &["id", "event", "timestamp", "version"];

/// Apply a subscription's payload mode to a built payload.
#[must_use]
pub fn apply_mode(mode: PayloadMode, payload: Value) -> Value {
    match mode {
        PayloadMode::Detailed => payload,
        PayloadMode::Sensitive => strip_sensitive(payload),
        PayloadMode::Minimal => minimal(payload),
    }
}

fn strip_sensitive(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(key, _)| {
                    let lowered = key.to_ascii_lowercase();
                    !SENSITIVE_KEYS.contains(&lowered.as_str())
                })
                .map(|(key, inner)| (key, strip_sensitive(inner)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_sensitive).collect()),
        other => other,
    }
}

fn minimal(payload: Value) -> Value {
    let Value::Object(mut map) = payload else {
        return payload;
    };

    let mut out = Map::new();
    for field in CONTROL_FIELDS {
        if let Some(value) = map.remove(*field) {
            out.insert((*field).to_string(), value);
        }
    }

    if let Some(Value::Object(mut data)) = map.remove("data") {
        let mut kept = Map::new();
        for field in ["id", "type", "operation"] {
            if let Some(value) = data.remove(field) {
                kept.insert(field.to_string(), value);
            }
        }
        out.insert("data".to_string(), Value::Object(kept));
    }

    Value::Object(out)
}

/// Keep only the named top-level fields of an object.
#[must_use]
pub fn keep_only_fields(value: &Value, fields: &[&str]) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| fields.contains(&key.as_str()))
                .map(|(key, inner)| (key.clone(), inner.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Remove the named top-level fields of an object.
#[must_use]
pub fn remove_fields(value: &Value, fields: &[&str]) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !fields.contains(&key.as_str()))
                .map(|(key, inner)| (key.clone(), inner.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}
