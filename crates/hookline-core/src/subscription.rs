//! Subscription model and validation.
//!
//! A subscription names a target URL, the event patterns it wants, and
//! optional document filters. Validation is performed on every create
//! and update at the management boundary; the pipeline assumes stored
//! subscriptions are valid.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{RelayError, Result};
use crate::pattern::EventPattern;

/// Header names a subscription may not override.
///
/// The first four belong to the HTTP client; the `x-webhook-*` prefix is
/// reserved for the relay's own delivery headers.
pub const RESERVED_HEADERS: &[&str] = &["host", "content-length", "user-agent", "accept-encoding"];

const NAME_MAX: usize = 100;
const SECRET_MIN: usize = 8;
const SECRET_MAX: usize = 255;

/// Per-subscription retry policy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum delivery attempts before dead-lettering (1..=10)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Exponential backoff multiplier (1..=10)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Delay before the first retry in milliseconds (>= 100)
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_backoff_multiplier() -> f64 {
    2.0
}

const fn default_initial_delay_ms() -> u64 {
    1_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_multiplier: default_backoff_multiplier(),
            initial_delay_ms: default_initial_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Validate the policy ranges.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Validation`] when a bound is violated.
    pub fn validate(&self) -> Result<()> {
        if !(1..=10).contains(&self.max_attempts) {
            return Err(RelayError::validation("retry.max_attempts must be 1..=10"));
        }
        if !(1.0..=10.0).contains(&self.backoff_multiplier) {
            return Err(RelayError::validation(
                "retry.backoff_multiplier must be 1..=10",
            ));
        }
        if self.initial_delay_ms < 100 {
            return Err(RelayError::validation(
                "retry.initial_delay_ms must be at least 100",
            ));
        }
        Ok(())
    }
}

/// Document filters applied after pattern matching.
///
/// Filter kinds combine with AND; values within one kind combine with
/// OR. Empty sets mean "not declared".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionFilters {
    /// Project (space) identifiers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub projects: Vec<String>,
    /// Status values
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub statuses: Vec<String>,
    /// Priority values
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub priorities: Vec<String>,
    /// Assignee identifiers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assignees: Vec<String>,
    /// Tags matched by non-empty set intersection
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Restrict to these source collections
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collections: Vec<String>,
}

impl SubscriptionFilters {
    /// True when no filter kind is declared
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
            && self.statuses.is_empty()
            && self.priorities.is_empty()
            && self.assignees.is_empty()
            && self.tags.is_empty()
            && self.collections.is_empty()
    }

    /// Evaluate the document-level filters against a document image.
    ///
    /// The collection filter is evaluated separately by the router.
    /// Declared kinds AND together; a declared kind with no matching
    /// document value fails the filter.
    #[must_use]
    pub fn matches_document(&self, document: &Value) -> bool {
        if !self.projects.is_empty() && !value_in(document, "space", &self.projects) {
            return false;
        }
        if !self.statuses.is_empty() && !value_in(document, "status", &self.statuses) {
            return false;
        }
        if !self.priorities.is_empty() && !value_in(document, "priority", &self.priorities) {
            return false;
        }
        if !self.assignees.is_empty() && !value_in(document, "assignee", &self.assignees) {
            return false;
        }
        if !self.tags.is_empty() && !tags_intersect(document, &self.tags) {
            return false;
        }
        true
    }
}

/// True when the document field equals one of the accepted values.
fn value_in(document: &Value, field: &str, accepted: &[String]) -> bool {
    match document.get(field) {
        Some(Value::String(s)) => accepted.iter().any(|a| a == s),
        Some(Value::Number(n)) => {
            let rendered = n.to_string();
            accepted.iter().any(|a| *a == rendered)
        }
        _ => false,
    }
}

/// Tag filter: non-empty intersection with the document's label array.
fn tags_intersect(document: &Value, accepted: &[String]) -> bool {
    let labels = document
        .get("labels")
        .or_else(|| document.get("tags"))
        .and_then(Value::as_array);

    labels.is_some_and(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .any(|tag| accepted.iter().any(|a| a == tag))
    })
}

/// Payload shaping applied after projection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadMode {
    /// Full payload (identity)
    #[default]
    Detailed,
    /// Strip secret-ish keys recursively
    Sensitive,
    /// Keep only control fields and `data.{id,type,operation}`
    Minimal,
}

/// A user-defined webhook subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Stable identifier
    pub id: Uuid,
    /// Unique display name (1..=100 chars, `[A-Za-z0-9 ._-]`)
    pub name: String,
    /// Target URL (http/https only)
    pub url: String,
    /// Shared secret for HMAC signing (8..=255 chars)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// Event patterns; non-empty
    pub events: Vec<EventPattern>,
    /// Optional document filters
    #[serde(default)]
    pub filters: SubscriptionFilters,
    /// Payload shaping mode
    #[serde(default)]
    pub payload_mode: PayloadMode,
    /// Whether the subscription receives deliveries
    #[serde(default = "default_active")]
    pub active: bool,
    /// Retry policy for deliveries
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Per-attempt HTTP timeout in seconds (1..=120)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Custom request headers merged into each delivery
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
    /// Total deliveries attempted
    #[serde(default)]
    pub total_deliveries: u64,
    /// Deliveries that ended in failure
    #[serde(default)]
    pub failed_deliveries: u64,
    /// Completion time of the most recent delivery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_delivery_at: Option<DateTime<Utc>>,
}

const fn default_active() -> bool {
    true
}

const fn default_timeout_secs() -> u64 {
    30
}

impl Subscription {
    /// Create a subscription with defaults for everything optional.
    #[must_use]
    pub fn new(name: impl Into<String>, url: impl Into<String>, events: Vec<EventPattern>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            url: url.into(),
            secret: None,
            events,
            filters: SubscriptionFilters::default(),
            payload_mode: PayloadMode::default(),
            active: true,
            retry: RetryPolicy::default(),
            timeout_secs: default_timeout_secs(),
            headers: HashMap::new(),
            created_at: now,
            updated_at: now,
            total_deliveries: 0,
            failed_deliveries: 0,
            last_delivery_at: None,
        }
    }

    /// Validate every invariant of the model.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Validation`] naming the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.len() > NAME_MAX {
            return Err(RelayError::validation(format!(
                "name must be 1..={NAME_MAX} characters"
            )));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '.' | '_' | '-'))
        {
            return Err(RelayError::validation(
                "name may only contain letters, digits, spaces, dots, underscores and dashes",
            ));
        }

        validate_url(&self.url)?;

        if let Some(secret) = &self.secret {
            if secret.len() < SECRET_MIN || secret.len() > SECRET_MAX {
                return Err(RelayError::validation(format!(
                    "secret must be {SECRET_MIN}..={SECRET_MAX} characters"
                )));
            }
        }

        if self.events.is_empty() {
            return Err(RelayError::validation(
                "at least one event pattern is required",
            ));
        }

        self.retry.validate()?;

        if !(1..=120).contains(&self.timeout_secs) {
            return Err(RelayError::validation("timeout_secs must be 1..=120"));
        }

        for name in self.headers.keys() {
            let lowered = name.to_ascii_lowercase();
            if RESERVED_HEADERS.contains(&lowered.as_str()) || lowered.starts_with("x-webhook-") {
                return Err(RelayError::validation(format!(
                    "header '{name}' is reserved and may not be overridden"
                )));
            }
        }

        Ok(())
    }

    /// True when any of the subscription's patterns selects the event type
    #[must_use]
    pub fn wants_event(&self, event_type: &str) -> bool {
        self.events.iter().any(|p| p.matches(event_type))
    }
}

/// Validate the delivery URL scheme and shape.
///
/// # Errors
///
/// Returns [`RelayError::Validation`] for unparseable URLs or schemes
/// other than http/https.
pub fn validate_url(url: &str) -> Result<()> {
    let uri: http::Uri = url
        .parse()
        .map_err(|e| RelayError::validation(format!("url '{url}' is not parseable: {e}")))?;

    match uri.scheme_str() {
        Some("http" | "https") => {}
        Some(other) => {
            return Err(RelayError::validation(format!(
                "url scheme '{other}' is not allowed; use http or https"
            )));
        }
        None => {
            return Err(RelayError::validation(format!(
                "url '{url}' is missing a scheme"
            )));
        }
    }

    if uri.host().is_none() {
        return Err(RelayError::validation(format!("url '{url}' has no host")));
    }

    Ok(())
}

/// Filter for listing subscriptions at the management surface
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionListFilter {
    /// Only subscriptions with this active flag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    /// Only subscriptions whose patterns select this event type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    /// Case-insensitive name substring
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_contains: Option<String>,
}

impl SubscriptionListFilter {
    /// True when the subscription passes the filter
    #[must_use]
    pub fn accepts(&self, sub: &Subscription) -> bool {
        if let Some(active) = self.active {
            if sub.active != active {
                return false;
            }
        }
        if let Some(event) = &self.event {
            if !sub.wants_event(event) {
                return false;
            }
        }
        if let Some(needle) = &self.name_contains {
            if !sub
                .name
                .to_ascii_lowercase()
                .contains(&needle.to_ascii_lowercase())
            {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subscription() -> Subscription {
        Subscription::new(
            "orders hook",
            "https://h.example/w",
            vec![EventPattern::parse("issue.*").unwrap()],
        )
    }

    #[test]
    fn test_valid_subscription_passes() {
        assert!(subscription().validate().is_ok());
    }

    #[test]
    fn test_name_charset_enforced() {
        let mut sub = subscription();
        sub.name = "bad/name".to_string();
        assert!(sub.validate().is_err());

        sub.name = "ok Name_1.2-x".to_string();
        assert!(sub.validate().is_ok());
    }

    #[test]
    fn test_name_length_enforced() {
        let mut sub = subscription();
        sub.name = String::new();
        assert!(sub.validate().is_err());

        sub.name = "a".repeat(101);
        assert!(sub.validate().is_err());

        sub.name = "a".repeat(100);
        assert!(sub.validate().is_ok());
    }

    #[test]
    fn test_url_schemes() {
        assert!(validate_url("https://h.example/w").is_ok());
        assert!(validate_url("http://localhost:8080/hook").is_ok());
        assert!(validate_url("ftp://h.example/w").is_err());
        assert!(validate_url("not a url").is_err());
        assert!(validate_url("/relative/path").is_err());
    }

    #[test]
    fn test_secret_length() {
        let mut sub = subscription();
        sub.secret = Some("short".to_string());
        assert!(sub.validate().is_err());

        sub.secret = Some("x1x2x3x4x5".to_string());
        assert!(sub.validate().is_ok());

        sub.secret = Some("s".repeat(256));
        assert!(sub.validate().is_err());
    }

    #[test]
    fn test_events_must_be_non_empty() {
        let mut sub = subscription();
        sub.events.clear();
        assert!(sub.validate().is_err());
    }

    #[test]
    fn test_retry_bounds() {
        let mut sub = subscription();
        sub.retry.max_attempts = 0;
        assert!(sub.validate().is_err());

        sub.retry.max_attempts = 11;
        assert!(sub.validate().is_err());

        sub.retry = RetryPolicy {
            max_attempts: 10,
            backoff_multiplier: 10.0,
            initial_delay_ms: 100,
        };
        assert!(sub.validate().is_ok());

        sub.retry.initial_delay_ms = 99;
        assert!(sub.validate().is_err());
    }

    #[test]
    fn test_reserved_headers_rejected() {
        let mut sub = subscription();
        sub.headers
            .insert("Host".to_string(), "evil.example".to_string());
        assert!(sub.validate().is_err());

        sub.headers.clear();
        sub.headers
            .insert("X-Webhook-Signature".to_string(), "forged".to_string());
        assert!(sub.validate().is_err());

        sub.headers.clear();
        sub.headers
            .insert("X-Custom".to_string(), "fine".to_string());
        assert!(sub.validate().is_ok());
    }

    #[test]
    fn test_timeout_bounds() {
        let mut sub = subscription();
        sub.timeout_secs = 0;
        assert!(sub.validate().is_err());
        sub.timeout_secs = 121;
        assert!(sub.validate().is_err());
        sub.timeout_secs = 120;
        assert!(sub.validate().is_ok());
    }

    #[test]
    fn test_filters_project_mismatch() {
        let filters = SubscriptionFilters {
            projects: vec!["P1".to_string()],
            ..Default::default()
        };
        assert!(!filters.matches_document(&json!({"space": "P2"})));
        assert!(filters.matches_document(&json!({"space": "P1"})));
        assert!(!filters.matches_document(&json!({})));
    }

    #[test]
    fn test_filters_and_across_kinds() {
        let filters = SubscriptionFilters {
            projects: vec!["P1".to_string()],
            statuses: vec!["open".to_string(), "blocked".to_string()],
            ..Default::default()
        };
        assert!(filters.matches_document(&json!({"space": "P1", "status": "blocked"})));
        assert!(!filters.matches_document(&json!({"space": "P1", "status": "done"})));
        assert!(!filters.matches_document(&json!({"space": "P2", "status": "open"})));
    }

    #[test]
    fn test_tag_intersection() {
        let filters = SubscriptionFilters {
            tags: vec!["urgent".to_string()],
            ..Default::default()
        };
        assert!(filters.matches_document(&json!({"labels": ["urgent", "ui"]})));
        assert!(filters.matches_document(&json!({"tags": ["urgent"]})));
        assert!(!filters.matches_document(&json!({"labels": ["ui"]})));
        assert!(!filters.matches_document(&json!({"labels": []})));
    }

    #[test]
    fn test_numeric_filter_values() {
        let filters = SubscriptionFilters {
            priorities: vec!["1".to_string()],
            ..Default::default()
        };
        assert!(filters.matches_document(&json!({"priority": 1})));
        assert!(!filters.matches_document(&json!({"priority": 2})));
    }

    #[test]
    fn test_list_filter() {
        let mut sub = subscription();
        sub.active = false;

        let mut filter = SubscriptionListFilter::default();
        assert!(filter.accepts(&sub));

        filter.active = Some(true);
        assert!(!filter.accepts(&sub));

        filter.active = Some(false);
        filter.event = Some("issue.created".to_string());
        assert!(filter.accepts(&sub));

        filter.event = Some("project.created".to_string());
        assert!(!filter.accepts(&sub));

        filter.event = None;
        filter.name_contains = Some("ORDERS".to_string());
        assert!(filter.accepts(&sub));

        filter.name_contains = Some("nope".to_string());
        assert!(!filter.accepts(&sub));
    }

    #[test]
    fn test_wants_event() {
        let sub = subscription();
        assert!(sub.wants_event("issue.created"));
        assert!(!sub.wants_event("project.created"));
    }
}
