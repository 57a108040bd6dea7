//! Error types for the sentinel services

use std::fmt;
use thiserror::Error;

// ============================================================================
// Structured Persistence Errors
// ============================================================================

/// Category of durable store failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersistenceErrorKind {
    /// Store unreachable or the connection failed
    Unavailable,
    /// Store call exceeded `store.timeout_ms`
    Timeout,
    /// Optimistic read-modify-write lost too many races
    Conflict,
    /// Record could not be encoded or decoded
    Serialization,
    /// Attempted mutation of an append-only table
    AppendOnly,
}

impl fmt::Display for PersistenceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => write!(f, "unavailable"),
            Self::Timeout => write!(f, "timeout"),
            Self::Conflict => write!(f, "conflict"),
            Self::Serialization => write!(f, "serialization"),
            Self::AppendOnly => write!(f, "append_only"),
        }
    }
}

/// Durable store error with operation context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceError {
    /// The store operation that failed (e.g. `append:audit_events`)
    pub operation: String,
    /// The category of error
    pub kind: PersistenceErrorKind,
    /// Human-readable error message
    pub message: String,
}

impl PersistenceError {
    /// Create a new persistence error
    pub fn new(
        operation: impl Into<String>,
        kind: PersistenceErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            kind,
            message: message.into(),
        }
    }

    /// Store unreachable
    pub fn unavailable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(operation, PersistenceErrorKind::Unavailable, message)
    }

    /// Store call timed out
    pub fn timeout(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(operation, PersistenceErrorKind::Timeout, message)
    }

    /// Optimistic transaction retries exhausted
    pub fn conflict(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(operation, PersistenceErrorKind::Conflict, message)
    }

    /// Encode/decode failure
    pub fn serialization(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(operation, PersistenceErrorKind::Serialization, message)
    }

    /// Mutation of an append-only table
    pub fn append_only(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(operation, PersistenceErrorKind::AppendOnly, message)
    }

    /// Check if this error is transient and the call may be retried
    ///
    /// Serialization and append-only violations are permanent.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.kind,
            PersistenceErrorKind::Unavailable
                | PersistenceErrorKind::Timeout
                | PersistenceErrorKind::Conflict
        )
    }
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "store {} failed ({}): {}",
            self.operation, self.kind, self.message
        )
    }
}

impl std::error::Error for PersistenceError {}

// ============================================================================
// Main Error Type
// ============================================================================

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Sentinel error type
#[derive(Debug, Error)]
pub enum Error {
    /// Durable store failure (unreachable, timeout, conflict)
    #[error("Persistence error: {0}")]
    Persistence(PersistenceError),

    /// Rate limit exceeded for a domain
    #[error("Rate limit exceeded for {domain}: {reason} (retry after {retry_after_secs}s)")]
    RateLimitExceeded {
        /// Resolved domain
        domain: String,
        /// Machine-readable reason (`cooldown`, `burst_limit`, ...)
        reason: String,
        /// Seconds until a retry may succeed
        retry_after_secs: u64,
    },

    /// Credential type is not known to the tracker
    #[error("Unknown credential type: {0}")]
    UnknownCredential(String),

    /// Credential is expired or inactive
    #[error("Credential {credential_type} expired ({days_remaining:?} days remaining)")]
    CredentialExpired {
        /// Credential kind
        credential_type: String,
        /// Days until expiry (negative when past)
        days_remaining: Option<i64>,
    },

    /// Secret failed format validation
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    /// Another rotation for the same credential type is in flight
    #[error("Rotation already in progress for {0}")]
    RotationInProgress(String),

    /// Stored audit event does not match its checksum
    #[error("Integrity violation: audit event {event_id} failed checksum verification")]
    IntegrityViolation {
        /// Tampered event
        event_id: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Machine-readable reason code for this error
    pub fn reason_code(&self) -> &str {
        match self {
            Self::Persistence(e) => match e.kind {
                PersistenceErrorKind::Timeout => "persistence_timeout",
                _ => "persistence_error",
            },
            Self::RateLimitExceeded { reason, .. } => reason.as_str(),
            Self::UnknownCredential(_) => "unknown_credential",
            Self::CredentialExpired { .. } => "credential_expired",
            Self::InvalidCredential(_) => "invalid_credential",
            Self::RotationInProgress(_) => "rotation_in_progress",
            Self::IntegrityViolation { .. } => "integrity_violation",
            Self::Config(_) => "config_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Check if the failed operation may be retried
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Persistence(e) => e.is_retriable(),
            Self::RateLimitExceeded { .. } | Self::RotationInProgress(_) => true,
            _ => false,
        }
    }
}

// Manual From implementations for boxed errors
impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

impl From<PersistenceError> for Error {
    fn from(err: PersistenceError) -> Self {
        Error::Persistence(err)
    }
}
