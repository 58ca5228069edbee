//! Event patterns used by subscriptions to select events.
//!
//! A pattern is `*` (everything), `kind.*` (every verb of one entity
//! kind), or an exact `kind.verb` event type. Segments must be non-empty
//! and at most two are permitted.

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

/// A validated subscription event pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventPattern {
    /// `*`: matches every event type
    Any,
    /// `kind.*`: matches every event of one entity kind
    Kind(String),
    /// `kind.verb`: matches exactly one event type
    Exact(String),
}

impl EventPattern {
    /// Parse and validate a pattern string.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Validation`] for empty segments, more than
    /// two segments, or a leading wildcard with a trailing segment.
    pub fn parse(pattern: &str) -> Result<Self> {
        if pattern == "*" {
            return Ok(EventPattern::Any);
        }

        let segments: Vec<&str> = pattern.split('.').collect();
        if segments.len() > 2 {
            return Err(RelayError::validation(format!(
                "event pattern '{pattern}' has more than two segments"
            )));
        }
        if segments.iter().any(|s| s.is_empty()) {
            return Err(RelayError::validation(format!(
                "event pattern '{pattern}' has an empty segment"
            )));
        }

        match segments.as_slice() {
            [kind, "*"] => {
                if *kind == "*" {
                    return Err(RelayError::validation(
                        "event pattern '*.*' is not valid; use '*'",
                    ));
                }
                Ok(EventPattern::Kind((*kind).to_string()))
            }
            [kind, _leaf] => {
                if *kind == "*" {
                    return Err(RelayError::validation(format!(
                        "event pattern '{pattern}' may not use a wildcard kind"
                    )));
                }
                Ok(EventPattern::Exact(pattern.to_string()))
            }
            [_single] => Ok(EventPattern::Exact(pattern.to_string())),
            _ => Err(RelayError::validation(format!(
                "event pattern '{pattern}' is not valid"
            ))),
        }
    }

    /// True iff the pattern selects the given event type.
    ///
    /// A pattern matches when it is `*`, exactly equals the event type,
    /// or is `kind.*` and the event type starts with `kind.`.
    #[must_use]
    pub fn matches(&self, event_type: &str) -> bool {
        match self {
            EventPattern::Any => true,
            EventPattern::Exact(exact) => exact == event_type,
            EventPattern::Kind(kind) => event_type
                .strip_prefix(kind.as_str())
                .and_then(|rest| rest.strip_prefix('.'))
                .is_some_and(|verb| !verb.is_empty()),
        }
    }
}

impl std::fmt::Display for EventPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventPattern::Any => f.write_str("*"),
            EventPattern::Kind(kind) => write!(f, "{kind}.*"),
            EventPattern::Exact(exact) => f.write_str(exact),
        }
    }
}

impl std::str::FromStr for EventPattern {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for EventPattern {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EventPattern {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_wildcard() {
        assert_eq!(EventPattern::parse("*").unwrap(), EventPattern::Any);
    }

    #[test]
    fn test_parse_kind_wildcard() {
        assert_eq!(
            EventPattern::parse("issue.*").unwrap(),
            EventPattern::Kind("issue".to_string())
        );
    }

    #[test]
    fn test_parse_exact() {
        assert_eq!(
            EventPattern::parse("issue.created").unwrap(),
            EventPattern::Exact("issue.created".to_string())
        );
    }

    #[test]
    fn test_parse_rejects_invalid() {
        assert!(EventPattern::parse("").is_err());
        assert!(EventPattern::parse(".").is_err());
        assert!(EventPattern::parse("a.").is_err());
        assert!(EventPattern::parse(".b").is_err());
        assert!(EventPattern::parse("a.b.c").is_err());
        assert!(EventPattern::parse("*.*").is_err());
        assert!(EventPattern::parse("*.created").is_err());
    }

    #[test]
    fn test_any_matches_everything() {
        let p = EventPattern::Any;
        assert!(p.matches("issue.created"));
        assert!(p.matches("project.deleted"));
        assert!(p.matches("anything"));
    }

    #[test]
    fn test_exact_match() {
        let p = EventPattern::parse("issue.created").unwrap();
        assert!(p.matches("issue.created"));
        assert!(!p.matches("issue.updated"));
        assert!(!p.matches("project.created"));
    }

    #[test]
    fn test_kind_wildcard_match() {
        let p = EventPattern::parse("issue.*").unwrap();
        assert!(p.matches("issue.created"));
        assert!(p.matches("issue.status_changed"));
        assert!(!p.matches("project.created"));
        // prefix match must respect the segment boundary
        assert!(!p.matches("issues.created"));
        assert!(!p.matches("issue."));
    }

    #[test]
    fn test_display_round_trip() {
        for raw in ["*", "issue.*", "issue.created"] {
            let p = EventPattern::parse(raw).unwrap();
            assert_eq!(p.to_string(), raw);
        }
    }

    #[test]
    fn test_serde_round_trip() {
        let p: EventPattern = serde_json::from_str("\"issue.*\"").unwrap();
        assert_eq!(p, EventPattern::Kind("issue".to_string()));
        assert_eq!(serde_json::to_string(&p).unwrap(), "\"issue.*\"");

        assert!(serde_json::from_str::<EventPattern>("\"a.b.c\"").is_err());
    }

    proptest! {
        // matches(P, E) is true iff P is `*`, P == E, or P is `k.*` and E starts with `k.`
        #[test]
        fn prop_matching_law(kind in "[a-z]{1,8}", verb in "[a-z_]{1,12}") {
            let event_type = format!("{kind}.{verb}");

            prop_assert!(EventPattern::Any.matches(&event_type));
            prop_assert!(EventPattern::parse(&event_type).unwrap().matches(&event_type));
            let kind_star = format!("{}.*", kind);
            let kindx_star = format!("{}x.*", kind);
            prop_assert!(EventPattern::parse(&kind_star).unwrap().matches(&event_type));
            prop_assert!(!EventPattern::parse(&kindx_star).unwrap().matches(&event_type));
        }
    }
}
