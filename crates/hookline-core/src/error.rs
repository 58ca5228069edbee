//! Relay error types and error code definitions.

use thiserror::Error;

/// Relay error type with structured error codes.
#[derive(Debug, Error, Clone)]
pub enum RelayError {
    /// HL001: Malformed input; never retried, surfaced at the management boundary
    #[error("HL001: Validation failed: {message}")]
    Validation {
        /// Detailed error message
        message: String,
    },

    /// HL002: Referenced entity absent
    #[error("HL002: {entity} not found: {id}")]
    NotFound {
        /// Kind of entity that was looked up
        entity: String,
        /// Identifier that failed to resolve
        id: String,
    },

    /// HL003: Unique-constraint violation (duplicate subscription name)
    #[error("HL003: Conflict: {message}")]
    Conflict {
        /// Detailed error message
        message: String,
    },

    /// HL004: Transient I/O failure, retried with backoff at its layer
    #[error("HL004: Transient I/O failure: {reason}")]
    TransientIo {
        /// Reason for the failure
        reason: String,
    },

    /// HL005: Storage operation failed
    #[error("HL005: Storage operation failed: {reason}")]
    Storage {
        /// Reason for the failure
        reason: String,
    },

    /// HL006: Delivery attempt failed but may be retried
    #[error("HL006: Delivery failed (retryable): {reason}")]
    DeliveryFailed {
        /// Reason for the failure
        reason: String,
    },

    /// HL007: Delivery exhausted all attempts
    #[error("HL007: Delivery exhausted after {attempts} attempts: {reason}")]
    DeliveryExhausted {
        /// Attempts consumed before giving up
        attempts: u32,
        /// Last failure reason
        reason: String,
    },

    /// HL008: Queue or dead-letter capacity exhausted
    #[error("HL008: Capacity exhausted: {what}")]
    CapacityExhausted {
        /// Which bounded resource overflowed
        what: String,
    },

    /// HL009: Resume cursor no longer covered by the change log
    #[error("HL009: Cursor expired: {token}")]
    CursorExpired {
        /// The expired token
        token: String,
    },

    /// HL010: Target URL rejected before dispatch
    #[error("HL010: Invalid delivery URL: {reason}")]
    InvalidUrl {
        /// Why the URL was rejected
        reason: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// HL011: Precondition violated; the offending task is aborted, never the process
    #[error("HL011: Internal invariant violated: {message}")]
    Internal {
        /// Detailed error message
        message: String,
    },
}

/// Error code with classification for retry/dead-letter decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayErrorCode {
    /// HL001: Validation failed
    Validation,
    /// HL002: Entity not found
    NotFound,
    /// HL003: Unique-constraint conflict
    Conflict,
    /// HL004: Transient I/O failure
    TransientIo,
    /// HL005: Storage operation failed
    Storage,
    /// HL006: Retryable delivery failure
    DeliveryFailed,
    /// HL007: Delivery exhausted all attempts
    DeliveryExhausted,
    /// HL008: Capacity exhausted
    CapacityExhausted,
    /// HL009: Cursor expired
    CursorExpired,
    /// HL010: Invalid delivery URL
    InvalidUrl,
    /// Serialization error
    Serialization,
    /// HL011: Internal invariant violated
    Internal,
}

impl RelayErrorCode {
    /// Returns true if this error is transient (retryable at its layer)
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            RelayErrorCode::TransientIo
                | RelayErrorCode::Storage
                | RelayErrorCode::DeliveryFailed
        )
    }

    /// Returns true if this error moves the delivery to the dead-letter queue
    #[must_use]
    pub const fn should_dead_letter(self) -> bool {
        matches!(
            self,
            RelayErrorCode::DeliveryExhausted | RelayErrorCode::InvalidUrl
        )
    }
}

impl RelayError {
    /// Build a validation error from any displayable message
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Build a not-found error
    pub fn not_found(entity: impl Into<String>, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Build a conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Build a storage error from a backend failure
    pub fn storage(reason: impl std::fmt::Display) -> Self {
        Self::Storage {
            reason: reason.to_string(),
        }
    }

    /// Build a transient I/O error
    pub fn transient(reason: impl std::fmt::Display) -> Self {
        Self::TransientIo {
            reason: reason.to_string(),
        }
    }

    /// Get the error code for this error
    #[must_use]
    pub const fn code(&self) -> RelayErrorCode {
        match self {
            RelayError::Validation { .. } => RelayErrorCode::Validation,
            RelayError::NotFound { .. } => RelayErrorCode::NotFound,
            RelayError::Conflict { .. } => RelayErrorCode::Conflict,
            RelayError::TransientIo { .. } => RelayErrorCode::TransientIo,
            RelayError::Storage { .. } => RelayErrorCode::Storage,
            RelayError::DeliveryFailed { .. } => RelayErrorCode::DeliveryFailed,
            RelayError::DeliveryExhausted { .. } => RelayErrorCode::DeliveryExhausted,
            RelayError::CapacityExhausted { .. } => RelayErrorCode::CapacityExhausted,
            RelayError::CursorExpired { .. } => RelayErrorCode::CursorExpired,
            RelayError::InvalidUrl { .. } => RelayErrorCode::InvalidUrl,
            RelayError::Serialization(_) => RelayErrorCode::Serialization,
            RelayError::Internal { .. } => RelayErrorCode::Internal,
        }
    }

    /// Returns true if this error is transient (retryable at its layer)
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.code().is_transient()
    }

    /// Returns true if this error moves the delivery to the dead-letter queue
    #[must_use]
    pub const fn should_dead_letter(&self) -> bool {
        self.code().should_dead_letter()
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;
