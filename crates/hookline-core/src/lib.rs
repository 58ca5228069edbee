#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::cast_possible_truncation)]

//! hookline core: classification, routing and payload transformation.
//!
//! hookline is a sidecar webhook relay for document stores without
//! native webhooks. This crate holds everything that is pure data flow:
//!
//! ```text
//! MutationRecord (from the change feed)
//!     ↓
//! Classifier: (collection, operation, update description) → event type
//!     ↓
//! Router: active? pattern match? collection filter? document filters?
//!     ↓
//! Transformer: per-entity projection → stable JSON payload
//! ```
//!
//! The delivery engine (queue, dispatcher, dead-letter store) lives in
//! `hookline-relay`; the management API lives in `hookline-server`.

pub mod classifier;
pub mod config;
pub mod error;
pub mod event;
pub mod pattern;
pub mod period;
pub mod router;
pub mod subscription;
pub mod transform;

// Re-export common types at crate level
pub use classifier::{Classification, Classifier, EntityKind, OperationKind, Priority};
pub use config::{OverflowPolicy, RelayConfig};
pub use error::{RelayError, RelayErrorCode, Result};
pub use event::{Event, MutationRecord, Operation, ResumeToken, UpdateDescription};
pub use pattern::EventPattern;
pub use period::parse_period;
pub use router::{Router, RoutingStats, RoutingStatsSnapshot};
pub use subscription::{
    PayloadMode, RetryPolicy, Subscription, SubscriptionFilters, SubscriptionListFilter,
};
pub use transform::{DeliveryContext, Transformer, PAYLOAD_VERSION};

#[cfg(test)]
mod integration_tests {
    use super::*;
    use crate::event::ResumeToken;
    use chrono::DateTime;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_classify_route_transform_chain() {
        let record = MutationRecord {
            resume_token: ResumeToken::new("3"),
            cluster_time: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            collection: "issues".to_string(),
            operation: Operation::Insert,
            document_key: "I1".to_string(),
            post_image: Some(json!({"_id": "I1", "title": "t", "space": "P1"})),
            pre_image: None,
            update_description: None,
        };

        let classification = Classifier::new().classify(&record);
        assert_eq!(classification.event.event_type, "issue.created");

        let sub = Arc::new(Subscription::new(
            "chain",
            "https://h.example/w",
            vec![EventPattern::parse("issue.*").unwrap()],
        ));

        let router = Router::new();
        let matches = router.route(&record, &classification.event, &[Arc::clone(&sub)]);
        assert_eq!(matches.len(), 1);

        let transformer = Transformer::new("hookline", "0.3.0", "node-1", "tracker");
        let payload = transformer.transform(
            &record,
            &classification,
            &sub,
            &DeliveryContext {
                delivery_id: uuid::Uuid::new_v4(),
                attempt: 1,
                max_attempts: sub.retry.max_attempts,
            },
        );

        assert_eq!(payload["data"]["issue"]["project"], "P1");
        assert_eq!(payload["webhook"]["name"], "chain");
    }
}
