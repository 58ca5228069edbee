//! Payload transformation.
//!
//! Projects a mutation record (and its pre-image, for updates) into the
//! stable per-entity payload schema delivered to subscribers:
//!
//! ```text
//! { id, event, timestamp, version, source: {service, version, instance},
//!   data: { id, type, operation, collection, namespace, timestamp, <entity block> },
//!   metadata: { resumeToken, wallTime, documentKey },
//!   webhook: { id, name, url, version, deliveryId, attempt, maxAttempts } }
//! ```
//!
//! For a given (mutation, subscription) the transformation is
//! deterministic except for `id`, `webhook.deliveryId` and `timestamp`.
//! Projection copies declared fields only, so payload graphs are acyclic
//! regardless of what the store documents reference.

pub mod entity;
pub mod filters;
pub mod normalize;

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::classifier::Classification;
use crate::event::{MutationRecord, Operation};
use crate::subscription::Subscription;

/// Payload schema version
pub const PAYLOAD_VERSION: &str = "1.0";

/// Identity of one enqueued delivery, stamped into the `webhook` block
#[derive(Debug, Clone)]
pub struct DeliveryContext {
    /// Delivery identifier
    pub delivery_id: Uuid,
    /// Attempt number at payload-build time (1-based)
    pub attempt: u32,
    /// Attempt ceiling for this delivery
    pub max_attempts: u32,
}

/// Builds delivery payloads from classified mutations.
#[derive(Debug, Clone)]
pub struct Transformer {
    /// Service name stamped into `source.service`
    service: String,
    /// Service version stamped into `source.version`
    version: String,
    /// Instance identifier stamped into `source.instance`
    instance: String,
    /// Namespace prefix (store database name)
    namespace: String,
}

impl Transformer {
    /// Create a transformer with the given source identity.
    #[must_use]
    pub fn new(
        service: impl Into<String>,
        version: impl Into<String>,
        instance: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            version: version.into(),
            instance: instance.into(),
            namespace: namespace.into(),
        }
    }

    /// Build the payload for one (mutation, subscription) pair.
    ///
    /// The subscription's payload mode is applied last, after projection
    /// and normalization.
    #[must_use]
    pub fn transform(
        &self,
        record: &MutationRecord,
        classification: &Classification,
        subscription: &Subscription,
        delivery: &DeliveryContext,
    ) -> Value {
        let event = &classification.event;
        let kind = &classification.kind;

        let mut data = Map::new();
        data.insert("id".to_string(), Value::String(record.document_key.clone()));
        data.insert("type".to_string(), Value::String(kind.name().to_string()));
        data.insert(
            "operation".to_string(),
            Value::String(record.operation.as_str().to_string()),
        );
        data.insert(
            "collection".to_string(),
            Value::String(record.collection.clone()),
        );
        data.insert(
            "namespace".to_string(),
            Value::String(format!("{}.{}", self.namespace, record.collection)),
        );
        data.insert(
            "timestamp".to_string(),
            Value::String(
                record
                    .cluster_time
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
        );

        if let Some(image) = record.effective_image() {
            data.insert(
                entity::block_key(kind),
                entity::project(kind, image),
            );
        }

        if record.operation == Operation::Update {
            if let Some(previous) = record.pre_image.as_ref() {
                data.insert(
                    entity::previous_block_key(kind),
                    entity::project(kind, previous),
                );
            }
            if let Some(desc) = record.update_description.as_ref() {
                data.insert("changes".to_string(), changes_block(desc));
            }
        }

        let payload = json!({
            "id": Uuid::new_v4().to_string(),
            "event": event.event_type,
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "version": PAYLOAD_VERSION,
            "source": {
                "service": self.service,
                "version": self.version,
                "instance": self.instance,
            },
            "data": Value::Object(data),
            "metadata": {
                "resumeToken": record.resume_token.as_str(),
                "wallTime": event.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                "documentKey": record.document_key,
            },
            "webhook": {
                "id": subscription.id.to_string(),
                "name": subscription.name,
                "url": subscription.url,
                "version": PAYLOAD_VERSION,
                "deliveryId": delivery.delivery_id.to_string(),
                "attempt": delivery.attempt,
                "maxAttempts": delivery.max_attempts,
            },
        });

        filters::apply_mode(subscription.payload_mode, payload)
    }
}

/// Build the `changes` object from an update description.
fn changes_block(desc: &crate::event::UpdateDescription) -> Value {
    let truncated: Vec<Value> = desc
        .truncated_arrays
        .iter()
        .map(|t| json!({"field": t.field, "newSize": t.new_size}))
        .collect();

    json!({
        "updated": Value::Object(desc.updated_fields.clone()),
        "removed": desc.removed_fields,
        "truncated": truncated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Classifier;
    use crate::event::{ResumeToken, UpdateDescription};
    use crate::pattern::EventPattern;
    use crate::subscription::PayloadMode;
    use chrono::DateTime;
    use serde_json::json;

    fn transformer() -> Transformer {
        Transformer::new("hookline", "0.3.0", "test-1", "tracker")
    }

    fn delivery() -> DeliveryContext {
        DeliveryContext {
            delivery_id: Uuid::new_v4(),
            attempt: 1,
            max_attempts: 3,
        }
    }

    fn subscription() -> Subscription {
        Subscription::new(
            "s1",
            "https://h.example/w",
            vec![EventPattern::parse("issue.*").unwrap()],
        )
    }

    fn issue_insert() -> MutationRecord {
        MutationRecord {
            resume_token: ResumeToken::new("9"),
            cluster_time: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            collection: "issues".to_string(),
            operation: Operation::Insert,
            document_key: "I1".to_string(),
            post_image: Some(json!({"_id": "I1", "title": "t", "status": "open"})),
            pre_image: None,
            update_description: None,
        }
    }

    #[test]
    fn test_insert_payload_shape() {
        let rec = issue_insert();
        let cls = Classifier::new().classify(&rec);
        let payload = transformer().transform(&rec, &cls, &subscription(), &delivery());

        assert_eq!(payload["event"], "issue.created");
        assert_eq!(payload["version"], PAYLOAD_VERSION);
        assert_eq!(payload["source"]["service"], "hookline");
        assert_eq!(payload["data"]["id"], "I1");
        assert_eq!(payload["data"]["type"], "issue");
        assert_eq!(payload["data"]["operation"], "insert");
        assert_eq!(payload["data"]["namespace"], "tracker.issues");
        assert_eq!(payload["data"]["issue"]["id"], "I1");
        assert_eq!(payload["data"]["issue"]["title"], "t");
        assert_eq!(payload["metadata"]["resumeToken"], "9");
        assert_eq!(payload["metadata"]["documentKey"], "I1");
        assert_eq!(payload["webhook"]["name"], "s1");
        assert_eq!(payload["webhook"]["attempt"], 1);
        assert_eq!(payload["webhook"]["maxAttempts"], 3);
    }

    #[test]
    fn test_update_payload_carries_previous_and_changes() {
        let mut rec = issue_insert();
        rec.operation = Operation::Update;
        rec.pre_image = Some(json!({"_id": "I1", "title": "t", "status": "open"}));
        rec.post_image = Some(json!({"_id": "I1", "title": "t", "status": "done"}));
        let mut desc = UpdateDescription::default();
        desc.updated_fields
            .insert("status".to_string(), json!("done"));
        desc.removed_fields.push("dueDate".to_string());
        rec.update_description = Some(desc);

        let cls = Classifier::new().classify(&rec);
        let payload = transformer().transform(&rec, &cls, &subscription(), &delivery());

        assert_eq!(payload["event"], "issue.status_changed");
        assert_eq!(payload["data"]["issue"]["status"], "done");
        assert_eq!(payload["data"]["previousIssue"]["status"], "open");
        assert_eq!(payload["data"]["changes"]["updated"]["status"], "done");
        assert_eq!(payload["data"]["changes"]["removed"][0], "dueDate");
    }

    #[test]
    fn test_transform_is_deterministic_up_to_stochastic_fields() {
        let rec = issue_insert();
        let cls = Classifier::new().classify(&rec);
        let sub = subscription();
        let ctx = delivery();

        let mut a = transformer().transform(&rec, &cls, &sub, &ctx);
        let mut b = transformer().transform(&rec, &cls, &sub, &ctx);

        for payload in [&mut a, &mut b] {
            let obj = payload.as_object_mut().unwrap();
            obj.remove("id");
            obj.remove("timestamp");
        }
        assert_eq!(a, b);
    }

    #[test]
    fn test_minimal_mode_applied() {
        let rec = issue_insert();
        let cls = Classifier::new().classify(&rec);
        let mut sub = subscription();
        sub.payload_mode = PayloadMode::Minimal;

        let payload = transformer().transform(&rec, &cls, &sub, &delivery());
        assert_eq!(payload["data"]["id"], "I1");
        assert!(payload["data"].get("issue").is_none());
        assert!(payload.get("webhook").is_none());
    }

    #[test]
    fn test_delete_projects_pre_image() {
        let mut rec = issue_insert();
        rec.operation = Operation::Delete;
        rec.post_image = None;
        rec.pre_image = Some(json!({"_id": "I1", "title": "gone"}));

        let cls = Classifier::new().classify(&rec);
        let payload = transformer().transform(&rec, &cls, &subscription(), &delivery());

        assert_eq!(payload["event"], "issue.deleted");
        assert_eq!(payload["data"]["issue"]["title"], "gone");
        assert!(payload["data"].get("previousIssue").is_none());
    }
}
