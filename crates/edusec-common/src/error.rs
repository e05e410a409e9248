//! Error types for EduSec

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Record store failure
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Store could not be reached or timed out
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Row could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Write conflicted with existing data
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Store result type
pub type StoreResult<T> = Result<T, StoreError>;

/// EduSec error type
#[derive(Error, Debug, Clone)]
pub enum SecurityError {
    /// Malformed input
    #[error("validation error: {0}")]
    Validation(String),

    /// Referenced request or assignment is absent
    #[error("not found: {0}")]
    NotFound(String),

    /// Insufficient rights or self-approval
    #[error("permission denied: {0}")]
    Permission(String),

    /// Quota, burst or block exceeded
    #[error("rate limit exceeded: {reason}")]
    RateLimit {
        /// Why the request was limited
        reason: String,
        /// Seconds until a retry can succeed
        retry_after: Option<u64>,
    },

    /// Internal failure during a security-critical decision
    #[error("security error: {0}")]
    Security(String),

    /// Anything uncaught
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl From<StoreError> for SecurityError {
    fn from(e: StoreError) -> Self {
        SecurityError::Security(e.to_string())
    }
}

/// Result type for EduSec
pub type SecurityResult<T> = Result<T, SecurityError>;

/// Error severity used for aggregate statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    /// Expected, user-facing
    Low,
    /// Expected but noteworthy
    Medium,
    /// Needs attention
    High,
    /// Security decision could not be made
    Critical,
}

impl SecurityError {
    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            SecurityError::Validation(_) => "VALIDATION_ERROR",
            SecurityError::NotFound(_) => "NOT_FOUND",
            SecurityError::Permission(_) => "PERMISSION_DENIED",
            SecurityError::RateLimit { .. } => "RATE_LIMIT_EXCEEDED",
            SecurityError::Security(_) => "SECURITY_ERROR",
            SecurityError::Unknown(_) => "UNKNOWN_ERROR",
        }
    }

    /// Severity bucket
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            SecurityError::Validation(_) | SecurityError::NotFound(_) => ErrorSeverity::Low,
            SecurityError::RateLimit { .. } => ErrorSeverity::Medium,
            SecurityError::Permission(_) => ErrorSeverity::High,
            SecurityError::Security(_) | SecurityError::Unknown(_) => ErrorSeverity::Critical,
        }
    }

    /// Whether the caller can recover by changing input or waiting
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SecurityError::Security(_) | SecurityError::Unknown(_))
    }
}

/// Aggregate error counters.
///
/// One tracker is constructed by the application entry point and shared by
/// every component that can fail during a security decision.
#[derive(Debug, Default)]
pub struct ErrorTracker {
    by_code: DashMap<&'static str, u64>,
    by_severity: DashMap<ErrorSeverity, u64>,
    total: AtomicU64,
    recoverable: AtomicU64,
    critical: AtomicU64,
}

impl ErrorTracker {
    /// Create empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an error and log it
    pub fn record(&self, error: &SecurityError, operation: &str) {
        *self.by_code.entry(error.code()).or_insert(0) += 1;
        *self.by_severity.entry(error.severity()).or_insert(0) += 1;
        self.total.fetch_add(1, Ordering::Relaxed);

        if error.is_recoverable() {
            self.recoverable.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(code = error.code(), operation, error = %error, "security operation rejected");
        } else {
            self.critical.fetch_add(1, Ordering::Relaxed);
            tracing::error!(code = error.code(), operation, error = %error, "security operation failed");
        }
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> ErrorStatistics {
        ErrorStatistics {
            total: self.total.load(Ordering::Relaxed),
            recoverable: self.recoverable.load(Ordering::Relaxed),
            critical: self.critical.load(Ordering::Relaxed),
            by_code: self
                .by_code
                .iter()
                .map(|e| (e.key().to_string(), *e.value()))
                .collect(),
            by_severity: self
                .by_severity
                .iter()
                .map(|e| (*e.key(), *e.value()))
                .collect(),
        }
    }
}

/// Error statistics snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorStatistics {
    /// All recorded errors
    pub total: u64,
    /// Errors the caller can recover from
    pub recoverable: u64,
    /// Errors that forced a fail-closed decision
    pub critical: u64,
    /// Count per error code
    pub by_code: BTreeMap<String, u64>,
    /// Count per severity
    pub by_severity: BTreeMap<ErrorSeverity, u64>,
}
