//! Event-to-subscription routing.
//!
//! For each classified mutation the router produces the set of matching
//! subscriptions from a read-only registry snapshot. Matching rules, in
//! order: active flag, event pattern, collection filter, document
//! filters (AND across filter kinds, OR within one kind, tag filter by
//! set intersection; deletes are evaluated against the pre-image).
//!
//! Routing order is the insertion order of the snapshot; callers must
//! not depend on it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::event::{Event, MutationRecord, Operation};
use crate::subscription::Subscription;

/// Running routing counters, shared across the pipeline.
#[derive(Debug, Default)]
pub struct RoutingStats {
    matched_by_collection: DashMap<String, u64>,
    matched_by_event_type: DashMap<String, u64>,
    dropped_events: AtomicU64,
    routing_errors: AtomicU64,
}

/// Point-in-time copy of the routing counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingStatsSnapshot {
    /// Matches per source collection
    pub matched_by_collection: HashMap<String, u64>,
    /// Matches per event type
    pub matched_by_event_type: HashMap<String, u64>,
    /// Events that matched no subscription
    pub dropped_events: u64,
    /// Records whose routing raised an error
    pub routing_errors: u64,
}

impl RoutingStats {
    /// Create zeroed counters
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a routed event with `matches` matching subscriptions.
    pub fn record(&self, event: &Event, matches: usize) {
        if matches == 0 {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
            return;
        }
        *self
            .matched_by_collection
            .entry(event.collection.clone())
            .or_insert(0) += matches as u64;
        *self
            .matched_by_event_type
            .entry(event.event_type.clone())
            .or_insert(0) += matches as u64;
    }

    /// Record a routing error.
    pub fn record_error(&self) {
        self.routing_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters for reporting.
    #[must_use]
    pub fn snapshot(&self) -> RoutingStatsSnapshot {
        RoutingStatsSnapshot {
            matched_by_collection: self
                .matched_by_collection
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            matched_by_event_type: self
                .matched_by_event_type
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
            routing_errors: self.routing_errors.load(Ordering::Relaxed),
        }
    }
}

/// Matches classified events against a subscription snapshot.
#[derive(Debug, Clone, Default)]
pub struct Router {
    stats: Arc<RoutingStats>,
}

impl Router {
    /// Create a router with fresh statistics
    #[must_use]
    pub fn new() -> Self {
        Self {
            stats: Arc::new(RoutingStats::new()),
        }
    }

    /// The router's shared statistics handle
    #[must_use]
    pub fn stats(&self) -> Arc<RoutingStats> {
        Arc::clone(&self.stats)
    }

    /// Produce the matching subscriptions for one mutation, in snapshot
    /// order. Produces zero or more results and updates routing
    /// statistics.
    #[must_use]
    pub fn route(
        &self,
        record: &MutationRecord,
        event: &Event,
        snapshot: &[Arc<Subscription>],
    ) -> Vec<Arc<Subscription>> {
        let matches: Vec<Arc<Subscription>> = snapshot
            .iter()
            .filter(|sub| Self::subscription_matches(sub, record, event))
            .cloned()
            .collect();

        self.stats.record(event, matches.len());
        matches
    }

    fn subscription_matches(sub: &Subscription, record: &MutationRecord, event: &Event) -> bool {
        if !sub.active {
            return false;
        }
        if !sub.wants_event(&event.event_type) {
            return false;
        }
        if !sub.filters.collections.is_empty()
            && !sub.filters.collections.iter().any(|c| *c == record.collection)
        {
            return false;
        }
        if sub.filters.is_empty() {
            return true;
        }

        // Deletes carry no post-image; fall back to the pre-image.
        let image = match record.operation {
            Operation::Delete => record.pre_image.as_ref().or(record.post_image.as_ref()),
            _ => record.effective_image(),
        };

        match image {
            Some(document) => sub.filters.matches_document(document),
            // A declared document filter with no image to evaluate cannot match.
            None => sub
                .filters
                .projects
                .is_empty()
                && sub.filters.statuses.is_empty()
                && sub.filters.priorities.is_empty()
                && sub.filters.assignees.is_empty()
                && sub.filters.tags.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Classifier;
    use crate::event::ResumeToken;
    use crate::pattern::EventPattern;
    use crate::subscription::SubscriptionFilters;
    use chrono::DateTime;
    use serde_json::json;

    fn record(collection: &str, doc: serde_json::Value) -> MutationRecord {
        MutationRecord {
            resume_token: ResumeToken::new("1"),
            cluster_time: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            collection: collection.to_string(),
            operation: Operation::Insert,
            document_key: "D1".to_string(),
            post_image: Some(doc),
            pre_image: None,
            update_description: None,
        }
    }

    fn sub(patterns: &[&str]) -> Arc<Subscription> {
        Arc::new(Subscription::new(
            "s",
            "https://h.example/w",
            patterns
                .iter()
                .map(|p| EventPattern::parse(p).unwrap())
                .collect(),
        ))
    }

    fn classify(record: &MutationRecord) -> Event {
        Classifier::new().classify(record).event
    }

    #[test]
    fn test_inactive_subscription_never_matches() {
        let router = Router::new();
        let rec = record("issues", json!({}));
        let event = classify(&rec);

        let mut s = Subscription::new(
            "s",
            "https://h.example/w",
            vec![EventPattern::Any],
        );
        s.active = false;

        let out = router.route(&rec, &event, &[Arc::new(s)]);
        assert!(out.is_empty());
    }

    #[test]
    fn test_pattern_mismatch_drops() {
        let router = Router::new();
        let rec = record("issues", json!({}));
        let event = classify(&rec);

        let out = router.route(&rec, &event, &[sub(&["project.*"])]);
        assert!(out.is_empty());
        assert_eq!(router.stats().snapshot().dropped_events, 1);
    }

    #[test]
    fn test_wildcard_and_exact_both_fire() {
        let router = Router::new();
        let rec = record("projects", json!({}));
        let event = classify(&rec);
        assert_eq!(event.event_type, "project.created");

        let out = router.route(&rec, &event, &[sub(&["*"]), sub(&["project.created"])]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_collection_filter() {
        let router = Router::new();
        let rec = record("issues", json!({}));
        let event = classify(&rec);

        let mut restricted = Subscription::new(
            "s",
            "https://h.example/w",
            vec![EventPattern::Any],
        );
        restricted.filters = SubscriptionFilters {
            collections: vec!["projects".to_string()],
            ..Default::default()
        };

        let out = router.route(&rec, &event, &[Arc::new(restricted)]);
        assert!(out.is_empty());
    }

    #[test]
    fn test_project_filter_excludes_other_space() {
        let router = Router::new();
        let rec = record("issues", json!({"space": "P2"}));
        let event = classify(&rec);

        let mut s = Subscription::new(
            "s2",
            "https://h.example/w",
            vec![EventPattern::parse("issue.*").unwrap()],
        );
        s.filters = SubscriptionFilters {
            projects: vec!["P1".to_string()],
            ..Default::default()
        };

        let out = router.route(&rec, &event, &[Arc::new(s)]);
        assert!(out.is_empty());
        assert_eq!(router.stats().snapshot().dropped_events, 1);
    }

    #[test]
    fn test_delete_filters_against_pre_image() {
        let router = Router::new();
        let mut rec = record("issues", json!({}));
        rec.operation = Operation::Delete;
        rec.post_image = None;
        rec.pre_image = Some(json!({"space": "P1"}));
        let event = classify(&rec);

        let mut s = Subscription::new(
            "s",
            "https://h.example/w",
            vec![EventPattern::Any],
        );
        s.filters = SubscriptionFilters {
            projects: vec!["P1".to_string()],
            ..Default::default()
        };

        let out = router.route(&rec, &event, &[Arc::new(s)]);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_stats_accumulate() {
        let router = Router::new();
        let rec = record("issues", json!({}));
        let event = classify(&rec);

        let _ = router.route(&rec, &event, &[sub(&["issue.*"]), sub(&["*"])]);
        let snap = router.stats().snapshot();
        assert_eq!(snap.matched_by_collection["issues"], 2);
        assert_eq!(snap.matched_by_event_type["issue.created"], 2);
        assert_eq!(snap.dropped_events, 0);
    }
}
