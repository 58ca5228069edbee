//! Mutation records consumed from the change feed and the events derived
//! from them.
//!
//! A [`MutationRecord`] is one entry of the store's ordered change log:
//! operation, document key, post-image (insert/update), pre-image
//! (update/delete when recorded) and the update description. The
//! classifier turns a record into an [`Event`] carrying the
//! `entity.operation` event type and a content fingerprint used for
//! deduplication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Opaque, totally-ordered position in the change feed.
///
/// Only the change source that produced a token may interpret it; every
/// other component carries it verbatim (into payload metadata, the
/// cursor store, and log lines).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResumeToken(String);

impl ResumeToken {
    /// Wrap a raw token string
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResumeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of store mutation that produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Document was inserted
    Insert,
    /// Document was updated in place
    Update,
    /// Document was removed
    Delete,
}

impl Operation {
    /// Convert to string representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Array truncation noted in an update description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncatedArray {
    /// Field holding the truncated array
    pub field: String,
    /// Length after truncation
    pub new_size: usize,
}

/// Field-level description of an update mutation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateDescription {
    /// Fields set to new values, keyed by field path
    #[serde(default)]
    pub updated_fields: Map<String, Value>,
    /// Fields removed from the document
    #[serde(default)]
    pub removed_fields: Vec<String>,
    /// Arrays truncated in place
    #[serde(default)]
    pub truncated_arrays: Vec<TruncatedArray>,
}

impl UpdateDescription {
    /// True when the update set or removed the given field
    #[must_use]
    pub fn touches(&self, field: &str) -> bool {
        self.updated_fields.contains_key(field)
            || self.removed_fields.iter().any(|f| f == field)
    }

    /// True when nothing changed (defensive for malformed records)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updated_fields.is_empty()
            && self.removed_fields.is_empty()
            && self.truncated_arrays.is_empty()
    }
}

/// One entry of the store's ordered mutation feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationRecord {
    /// Opaque ordered position of this mutation
    pub resume_token: ResumeToken,
    /// Store-side timestamp of the mutation
    pub cluster_time: DateTime<Utc>,
    /// Collection the mutation happened in
    pub collection: String,
    /// What kind of mutation this is
    pub operation: Operation,
    /// Primary key of the mutated document
    pub document_key: String,
    /// Document state after the mutation (insert/update)
    pub post_image: Option<Value>,
    /// Document state before the mutation (update/delete, when recorded)
    pub pre_image: Option<Value>,
    /// Field-level change description (update only)
    pub update_description: Option<UpdateDescription>,
}

impl MutationRecord {
    /// The document image filters and projections should evaluate against:
    /// the post-image when present, else the pre-image (deletes).
    #[must_use]
    pub fn effective_image(&self) -> Option<&Value> {
        self.post_image.as_ref().or(self.pre_image.as_ref())
    }

    /// True when the source recorded the pre-mutation document state
    #[must_use]
    pub const fn has_pre_image(&self) -> bool {
        self.pre_image.is_some()
    }
}

/// A classified business event derived from one mutation record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier (time + random + resume token)
    pub id: String,
    /// Event type in `entity.operation` form (e.g. `issue.created`)
    pub event_type: String,
    /// Entity kind name (e.g. `issue`)
    pub entity_kind: String,
    /// Source timestamp of the underlying mutation
    pub timestamp: DateTime<Utc>,
    /// Collection the mutation happened in
    pub collection: String,
    /// Underlying store operation
    pub operation: Operation,
    /// Deterministic content hash for deduplication
    pub fingerprint: String,
}

impl Event {
    /// Derive the unique event id for a mutation record.
    ///
    /// The id combines the wall-clock millis, a random component and the
    /// resume token so one mutation maps to exactly one event id.
    #[must_use]
    pub fn derive_id(record: &MutationRecord) -> String {
        let random = uuid::Uuid::new_v4().simple().to_string();
        format!(
            "{}-{}-{}",
            record.cluster_time.timestamp_millis(),
            &random[..8],
            record.resume_token
        )
    }

    /// Deterministic fingerprint over the identifying content of a mutation.
    #[must_use]
    pub fn fingerprint_of(record: &MutationRecord) -> String {
        let mut hasher = Sha256::new();
        hasher.update(record.collection.as_bytes());
        hasher.update([0u8]);
        hasher.update(record.operation.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(record.document_key.as_bytes());
        hasher.update([0u8]);
        hasher.update(record.cluster_time.timestamp_millis().to_be_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(op: Operation) -> MutationRecord {
        MutationRecord {
            resume_token: ResumeToken::new("42"),
            cluster_time: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            collection: "issues".to_string(),
            operation: op,
            document_key: "I1".to_string(),
            post_image: Some(json!({"_id": "I1", "title": "t"})),
            pre_image: None,
            update_description: None,
        }
    }

    #[test]
    fn test_operation_as_str() {
        assert_eq!(Operation::Insert.as_str(), "insert");
        assert_eq!(Operation::Update.as_str(), "update");
        assert_eq!(Operation::Delete.as_str(), "delete");
    }

    #[test]
    fn test_update_description_touches() {
        let mut desc = UpdateDescription::default();
        desc.updated_fields.insert("status".to_string(), json!("done"));
        desc.removed_fields.push("assignee".to_string());

        assert!(desc.touches("status"));
        assert!(desc.touches("assignee"));
        assert!(!desc.touches("title"));
        assert!(!desc.is_empty());
    }

    #[test]
    fn test_effective_image_prefers_post() {
        let mut rec = record(Operation::Update);
        rec.pre_image = Some(json!({"title": "old"}));

        let image = rec.effective_image().unwrap();
        assert_eq!(image["title"], "t");
    }

    #[test]
    fn test_effective_image_falls_back_to_pre() {
        let mut rec = record(Operation::Delete);
        rec.post_image = None;
        rec.pre_image = Some(json!({"title": "old"}));

        let image = rec.effective_image().unwrap();
        assert_eq!(image["title"], "old");
    }

    #[test]
    fn test_event_id_embeds_resume_token() {
        let rec = record(Operation::Insert);
        let id = Event::derive_id(&rec);
        assert!(id.ends_with("-42"));
        assert!(id.starts_with("1700000000000-"));
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let rec = record(Operation::Insert);
        assert_eq!(Event::fingerprint_of(&rec), Event::fingerprint_of(&rec));
    }

    #[test]
    fn test_fingerprint_distinguishes_operations() {
        let insert = record(Operation::Insert);
        let delete = record(Operation::Delete);
        assert_ne!(Event::fingerprint_of(&insert), Event::fingerprint_of(&delete));
    }

    #[test]
    fn test_resume_token_serde_transparent() {
        let token = ResumeToken::new("abc");
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, "\"abc\"");
    }
}
