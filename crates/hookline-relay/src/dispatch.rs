//! HTTP delivery attempts.
//!
//! One [`HttpDispatcher::attempt`] call is one POST cycle: serialize the
//! payload, sign it, send it, stream the response up to the size cap,
//! and classify the outcome. Errors never escape as `Err`: every
//! failure mode folds into an [`AttemptOutcome`] the queue turns into a
//! retry or dead-letter decision.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use chrono::Utc;
use hookline_core::config::DeliveryConfig;
use hookline_core::subscription::RESERVED_HEADERS;
use tracing::debug;

use crate::queue::DeliveryItem;
use crate::signature;

/// Outcome categories recorded on attempts
pub mod category {
    /// Target URL rejected before dispatch
    pub const INVALID_URL: &str = "invalid-url";
    /// Non-2xx HTTP status
    pub const HTTP_STATUS: &str = "http-status";
    /// Attempt exceeded its deadline
    pub const TIMEOUT: &str = "timeout";
    /// TCP/TLS level failure
    pub const CONNECT: &str = "connect";
    /// Hostname did not resolve
    pub const DNS: &str = "dns";
    /// Response body exceeded the size cap
    pub const RESPONSE_SIZE_EXCEEDED: &str = "response-size-exceeded";
    /// Payload could not be serialized
    pub const SERIALIZATION: &str = "serialization";
    /// Request failed while sending or reading
    pub const TRANSPORT: &str = "transport";
}

/// Result of one HTTP delivery attempt
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    /// HTTP status was in [200, 300)
    pub success: bool,
    /// Response status, when a response arrived
    pub status_code: Option<u16>,
    /// Wall time of the attempt in milliseconds
    pub duration_ms: f64,
    /// Response headers, when a response arrived
    pub headers: HashMap<String, String>,
    /// First bytes of the response body (audit, <= 1000 bytes)
    pub body_prefix: Option<String>,
    /// Failure description
    pub error: Option<String>,
    /// Failure category (see [`category`])
    pub error_category: Option<&'static str>,
    /// Whether the queue may schedule a retry for this failure
    pub retryable: bool,
}

/// Response-body audit prefix cap in bytes
const BODY_PREFIX_MAX: usize = 1_000;

impl AttemptOutcome {
    /// Synthetic outcome for an attempt cancelled by the queue deadline.
    #[must_use]
    pub fn timed_out(duration_ms: f64) -> Self {
        Self {
            success: false,
            status_code: Some(408),
            duration_ms,
            headers: HashMap::new(),
            body_prefix: None,
            error: Some("Delivery attempt timeout".to_string()),
            error_category: Some(category::TIMEOUT),
            retryable: true,
        }
    }

    fn failure(
        duration_ms: f64,
        error: String,
        error_category: &'static str,
        retryable: bool,
    ) -> Self {
        Self {
            success: false,
            status_code: None,
            duration_ms,
            headers: HashMap::new(),
            body_prefix: None,
            error: Some(error),
            error_category: Some(error_category),
            retryable,
        }
    }
}

/// Sends signed delivery attempts and classifies their outcomes.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: reqwest::Client,
    max_payload_size: usize,
    retryable_statuses: HashSet<u16>,
    /// Fallback signing salt for subscriptions without a secret
    secret_salt: Option<String>,
}

impl HttpDispatcher {
    /// Build a dispatcher from the delivery configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying HTTP client cannot be built.
    pub fn new(
        config: &DeliveryConfig,
        secret_salt: Option<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self {
            client,
            max_payload_size: config.max_payload_size,
            retryable_statuses: config.retryable_statuses.iter().copied().collect(),
            secret_salt,
        })
    }

    /// Execute one delivery attempt for an item.
    pub async fn attempt(&self, item: &DeliveryItem) -> AttemptOutcome {
        let start = Instant::now();
        let elapsed_ms = |start: Instant| start.elapsed().as_secs_f64() * 1000.0;

        // Protocol restriction is enforced before any connection is made.
        if !item.url.starts_with("http://") && !item.url.starts_with("https://") {
            return AttemptOutcome::failure(
                elapsed_ms(start),
                format!("URL '{}' is not http or https", item.url),
                category::INVALID_URL,
                false,
            );
        }

        let body = match serde_json::to_vec(item.payload.as_ref()) {
            Ok(body) => body,
            Err(e) => {
                return AttemptOutcome::failure(
                    elapsed_ms(start),
                    format!("payload serialization failed: {e}"),
                    category::SERIALIZATION,
                    false,
                );
            }
        };

        let mut request = self
            .client
            .post(&item.url)
            .timeout(item.timeout)
            .header("Content-Type", "application/json")
            .header("X-Webhook-Id", item.subscription_id.to_string())
            .header("X-Webhook-Timestamp", Utc::now().timestamp().to_string())
            .header("X-Webhook-Event", item.event_type.clone());

        let secret = item.secret.as_deref().or(self.secret_salt.as_deref());
        if let Some(secret) = secret {
            request = request.header(signature::SIGNATURE_HEADER, signature::sign(&body, secret));
        }

        // Subscription headers are merged last but cannot shadow reserved
        // names or the relay's own delivery headers.
        for (name, value) in &item.headers {
            let lowered = name.to_ascii_lowercase();
            if RESERVED_HEADERS.contains(&lowered.as_str()) || lowered.starts_with("x-webhook-") {
                continue;
            }
            request = request.header(name, value);
        }

        debug!(
            delivery_id = %item.id,
            url = %item.url,
            attempt = item.attempts,
            "dispatching delivery"
        );

        let response = match request.body(body).send().await {
            Ok(response) => response,
            Err(e) => return self.classify_transport_error(&e, elapsed_ms(start)),
        };

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        // Stream the body with a hard cap; oversized responses abort the
        // read rather than buffering the rest.
        let mut collected: Vec<u8> = Vec::new();
        let mut response = response;
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    if collected.len() + chunk.len() > self.max_payload_size {
                        return AttemptOutcome {
                            success: false,
                            status_code: Some(status),
                            duration_ms: elapsed_ms(start),
                            headers,
                            body_prefix: Some(body_prefix(&collected)),
                            error: Some(format!(
                                "response exceeded {} bytes",
                                self.max_payload_size
                            )),
                            error_category: Some(category::RESPONSE_SIZE_EXCEEDED),
                            retryable: false,
                        };
                    }
                    collected.extend_from_slice(&chunk);
                }
                Ok(None) => break,
                Err(e) => {
                    return AttemptOutcome {
                        success: false,
                        status_code: Some(status),
                        duration_ms: elapsed_ms(start),
                        headers,
                        body_prefix: Some(body_prefix(&collected)),
                        error: Some(format!("response read failed: {e}")),
                        error_category: Some(category::TRANSPORT),
                        retryable: true,
                    };
                }
            }
        }

        let duration_ms = elapsed_ms(start);
        let prefix = body_prefix(&collected);

        if (200..300).contains(&status) {
            AttemptOutcome {
                success: true,
                status_code: Some(status),
                duration_ms,
                headers,
                body_prefix: Some(prefix),
                error: None,
                error_category: None,
                retryable: false,
            }
        } else {
            AttemptOutcome {
                success: false,
                status_code: Some(status),
                duration_ms,
                headers,
                body_prefix: Some(prefix),
                error: Some(format!("HTTP {status} response")),
                error_category: Some(category::HTTP_STATUS),
                retryable: self.retryable_statuses.contains(&status),
            }
        }
    }

    /// Classify a reqwest error into an outcome.
    ///
    /// DNS resolution failures are non-retryable; connect-refused, reset
    /// and timeout errors are retryable.
    fn classify_transport_error(&self, error: &reqwest::Error, duration_ms: f64) -> AttemptOutcome {
        if error.is_timeout() {
            return AttemptOutcome::timed_out(duration_ms);
        }

        if is_dns_failure(error) {
            return AttemptOutcome::failure(
                duration_ms,
                format!("DNS resolution failed: {error}"),
                category::DNS,
                false,
            );
        }

        if error.is_connect() {
            return AttemptOutcome::failure(
                duration_ms,
                format!("connection failed: {error}"),
                category::CONNECT,
                true,
            );
        }

        AttemptOutcome::failure(
            duration_ms,
            format!("request failed: {error}"),
            category::TRANSPORT,
            true,
        )
    }
}

/// Walk the error source chain looking for a resolver failure.
fn is_dns_failure(error: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(current) = source {
        let rendered = current.to_string().to_ascii_lowercase();
        if rendered.contains("dns") || rendered.contains("failed to lookup") {
            return true;
        }
        source = current.source();
    }
    false
}

/// First bytes of a response body, truncated on a char boundary.
fn body_prefix(body: &[u8]) -> String {
    let slice = &body[..body.len().min(BODY_PREFIX_MAX)];
    String::from_utf8_lossy(slice).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use hookline_core::classifier::Priority;
    use hookline_core::subscription::RetryPolicy;
    use uuid::Uuid;
    use wiremock::matchers::{body_json_string, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn item(url: String) -> DeliveryItem {
        DeliveryItem::new(
            Uuid::new_v4(),
            "evt-1".to_string(),
            "issue.created".to_string(),
            Arc::new(serde_json::json!({"event": "issue.created"})),
            url,
            HashMap::new(),
            Some("x1x2x3x4x5".to_string()),
            Duration::from_secs(5),
            Priority::High,
            RetryPolicy::default(),
        )
    }

    fn dispatcher() -> HttpDispatcher {
        HttpDispatcher::new(&DeliveryConfig::default(), None).unwrap()
    }

    #[tokio::test]
    async fn test_successful_post_carries_signature_and_headers() {
        let server = MockServer::start().await;
        let expected_body = serde_json::to_string(&serde_json::json!({"event": "issue.created"}))
            .unwrap();

        Mock::given(method("POST"))
            .and(path("/w"))
            .and(header("Content-Type", "application/json"))
            .and(header("X-Webhook-Event", "issue.created"))
            .and(header_exists("X-Webhook-Id"))
            .and(header_exists("X-Webhook-Timestamp"))
            .and(header_exists("X-Webhook-Signature"))
            .and(body_json_string(&expected_body))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let outcome = dispatcher().attempt(&item(format!("{}/w", server.uri()))).await;

        assert!(outcome.success);
        assert_eq!(outcome.status_code, Some(200));
        assert_eq!(outcome.body_prefix.as_deref(), Some("ok"));
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_signature_verifies_against_sent_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let it = item(format!("{}/w", server.uri()));
        let outcome = dispatcher().attempt(&it).await;
        assert!(outcome.success);

        let requests = server.received_requests().await.unwrap();
        let request = &requests[0];
        let sig = request.headers.get("X-Webhook-Signature").unwrap();
        assert!(signature::verify(
            &request.body,
            sig.to_str().unwrap(),
            "x1x2x3x4x5"
        ));
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let outcome = dispatcher().attempt(&item(format!("{}/w", server.uri()))).await;

        assert!(!outcome.success);
        assert_eq!(outcome.status_code, Some(503));
        assert!(outcome.retryable);
        assert_eq!(outcome.error_category, Some(category::HTTP_STATUS));
    }

    #[tokio::test]
    async fn test_client_error_is_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let outcome = dispatcher().attempt(&item(format!("{}/w", server.uri()))).await;

        assert!(!outcome.success);
        assert!(!outcome.retryable);
    }

    #[tokio::test]
    async fn test_invalid_scheme_rejected_pre_dispatch() {
        let outcome = dispatcher()
            .attempt(&item("ftp://h.example/w".to_string()))
            .await;

        assert!(!outcome.success);
        assert!(!outcome.retryable);
        assert_eq!(outcome.error_category, Some(category::INVALID_URL));
    }

    #[tokio::test]
    async fn test_custom_headers_cannot_shadow_reserved() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut it = item(format!("{}/w", server.uri()));
        it.headers
            .insert("X-Trace".to_string(), "abc".to_string());
        it.headers
            .insert("X-Webhook-Event".to_string(), "forged".to_string());

        let outcome = dispatcher().attempt(&it).await;
        assert!(outcome.success);

        let requests = server.received_requests().await.unwrap();
        let request = &requests[0];
        assert_eq!(
            request.headers.get("X-Trace").unwrap().to_str().unwrap(),
            "abc"
        );
        assert_eq!(
            request
                .headers
                .get("X-Webhook-Event")
                .unwrap()
                .to_str()
                .unwrap(),
            "issue.created"
        );
    }

    #[tokio::test]
    async fn test_salt_signs_when_subscription_has_no_secret() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let dispatcher =
            HttpDispatcher::new(&DeliveryConfig::default(), Some("salt-value".to_string()))
                .unwrap();
        let mut it = item(format!("{}/w", server.uri()));
        it.secret = None;

        let outcome = dispatcher.attempt(&it).await;
        assert!(outcome.success);

        let requests = server.received_requests().await.unwrap();
        let sig = requests[0].headers.get("X-Webhook-Signature").unwrap();
        assert!(signature::verify(
            &requests[0].body,
            sig.to_str().unwrap(),
            "salt-value"
        ));
    }

    #[tokio::test]
    async fn test_connection_refused_is_retryable() {
        // Port 1 is essentially never listening.
        let outcome = dispatcher()
            .attempt(&item("http://127.0.0.1:1/w".to_string()))
            .await;

        assert!(!outcome.success);
        assert!(outcome.retryable);
    }

    #[test]
    fn test_body_prefix_truncates() {
        let long = vec![b'a'; 2_000];
        assert_eq!(body_prefix(&long).len(), 1_000);
    }

    #[test]
    fn test_timed_out_outcome_shape() {
        let outcome = AttemptOutcome::timed_out(30_000.0);
        assert!(!outcome.success);
        assert_eq!(outcome.status_code, Some(408));
        assert!(outcome.retryable);
        assert_eq!(
            outcome.error.as_deref(),
            Some("Delivery attempt timeout")
        );
    }
}
