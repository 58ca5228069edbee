//! Per-entity payload projection.
//!
//! Each entity kind declares the document fields its payload block
//! carries. Projection copies declared fields only; embedded documents
//! are never copied wholesale, which keeps payload graphs acyclic.
//! Kinds without a dedicated field set share the generic projection.

use serde_json::{Map, Value};

use super::normalize::normalize_field;
use crate::classifier::EntityKind;

/// (payload key, document key) pairs projected for one entity kind.
type FieldSet = &'static [(&'static str, &'static str)];

const ISSUE_FIELDS: FieldSet = &[
    ("id", "_id"),
    ("title", "title"),
    ("description", "description"),
    ("status", "status"),
    ("priority", "priority"),
    ("assignee", "assignee"),
    ("labels", "labels"),
    ("project", "space"),
    ("number", "number"),
    ("rank", "rank"),
    ("dueDate", "dueDate"),
    ("estimation", "estimation"),
    ("createdBy", "createdBy"),
    ("modifiedBy", "modifiedBy"),
    ("createdOn", "createdOn"),
    ("modifiedOn", "modifiedOn"),
];

const PROJECT_FIELDS: FieldSet = &[
    ("id", "_id"),
    ("name", "name"),
    ("identifier", "identifier"),
    ("description", "description"),
    ("archived", "archived"),
    ("members", "members"),
    ("private", "private"),
    ("createdOn", "createdOn"),
    ("modifiedOn", "modifiedOn"),
];

const COMMENT_FIELDS: FieldSet = &[
    ("id", "_id"),
    ("message", "message"),
    ("author", "createdBy"),
    ("attachedTo", "attachedTo"),
    ("attachedToKind", "attachedToClass"),
    ("createdOn", "createdOn"),
    ("modifiedOn", "modifiedOn"),
];

const ATTACHMENT_FIELDS: FieldSet = &[
    ("id", "_id"),
    ("fileName", "name"),
    ("file", "file"),
    ("size", "size"),
    ("contentType", "type"),
    ("attachedTo", "attachedTo"),
    ("createdOn", "createdOn"),
    ("modifiedOn", "modifiedOn"),
];

const MILESTONE_FIELDS: FieldSet = &[
    ("id", "_id"),
    ("label", "label"),
    ("status", "status"),
    ("targetDate", "targetDate"),
    ("project", "space"),
    ("createdOn", "createdOn"),
    ("modifiedOn", "modifiedOn"),
];

/// Common subset copied for kinds without a dedicated projection.
const GENERIC_FIELDS: FieldSet = &[
    ("id", "_id"),
    ("name", "name"),
    ("title", "title"),
    ("description", "description"),
    ("project", "space"),
    ("createdBy", "createdBy"),
    ("modifiedBy", "modifiedBy"),
    ("createdOn", "createdOn"),
    ("modifiedOn", "modifiedOn"),
];

fn field_set(kind: &EntityKind) -> FieldSet {
    match kind {
        EntityKind::Issue => ISSUE_FIELDS,
        EntityKind::Project => PROJECT_FIELDS,
        EntityKind::Comment => COMMENT_FIELDS,
        EntityKind::Attachment => ATTACHMENT_FIELDS,
        EntityKind::Milestone => MILESTONE_FIELDS,
        EntityKind::Generic(_) => GENERIC_FIELDS,
    }
}

/// Payload key holding the entity block (e.g. `issue`).
#[must_use]
pub fn block_key(kind: &EntityKind) -> String {
    kind.name().to_string()
}

/// Payload key holding the pre-image block (e.g. `previousIssue`).
#[must_use]
pub fn previous_block_key(kind: &EntityKind) -> String {
    let name = kind.name();
    let mut key = String::with_capacity(8 + name.len());
    key.push_str("previous");
    let mut chars = name.chars();
    if let Some(first) = chars.next() {
        key.extend(first.to_uppercase());
        key.push_str(chars.as_str());
    }
    key
}

/// Project a document image into the entity block for one kind.
///
/// Declared fields present in the document are copied and normalized;
/// everything else is dropped.
#[must_use]
pub fn project(kind: &EntityKind, document: &Value) -> Value {
    let mut block = Map::new();

    for (payload_key, doc_key) in field_set(kind) {
        if let Some(value) = document.get(*doc_key) {
            if value.is_null() {
                continue;
            }
            block.insert(
                (*payload_key).to_string(),
                normalize_field(payload_key, value),
            );
        }
    }

    Value::Object(block)
}
