//! Field-level normalizers applied after projection.
//!
//! Identifier-like fields become strings; date-like fields become
//! RFC-3339 strings (epoch-millisecond numbers from the store are
//! converted, strings are passed through).

use chrono::{DateTime, SecondsFormat};
use serde_json::Value;

/// Payload keys normalized to strings.
const IDENTIFIER_KEYS: &[&str] = &[
    "id", "assignee", "author", "attachedTo", "createdBy", "modifiedBy", "project", "file",
];

/// Payload keys normalized to RFC-3339 timestamps.
const DATE_KEYS: &[&str] = &["createdOn", "modifiedOn", "dueDate", "targetDate"];

/// Normalize one projected field value by payload key.
#[must_use]
pub fn normalize_field(payload_key: &str, value: &Value) -> Value {
    if IDENTIFIER_KEYS.contains(&payload_key) {
        return normalize_identifier(value);
    }
    if DATE_KEYS.contains(&payload_key) {
        return normalize_date(value);
    }
    value.clone()
}

fn normalize_identifier(value: &Value) -> Value {
    match value {
        Value::String(_) => value.clone(),
        Value::Number(n) => Value::String(n.to_string()),
        other => other.clone(),
    }
}

fn normalize_date(value: &Value) -> Value {
    match value {
        Value::Number(n) => n
            .as_i64()
            .and_then(DateTime::from_timestamp_millis)
            .map_or_else(
                || value.clone(),
                |dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
            ),
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_identifier_becomes_string() {
        assert_eq!(normalize_field("id", &json!(42)), json!("42"));
        assert_eq!(normalize_field("assignee", &json!("u1")), json!("u1"));
    }

    #[test]
    fn test_epoch_millis_become_rfc3339() {
        let normalized = normalize_field("createdOn", &json!(1_700_000_000_000_i64));
        assert_eq!(normalized, json!("2023-11-14T22:13:20.000Z"));
    }

    #[test]
    fn test_date_strings_pass_through() {
        let raw = json!("2024-01-01T00:00:00Z");
        assert_eq!(normalize_field("dueDate", &raw), raw);
    }

    #[test]
    fn test_other_fields_untouched() {
        assert_eq!(normalize_field("title", &json!(7)), json!(7));
        assert_eq!(normalize_field("labels", &json!(["a"])), json!(["a"]));
    }
}
