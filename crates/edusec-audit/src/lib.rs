//! EduSec Audit - Security event logging and alerting
//!
//! Features:
//! - Fixed event taxonomy with a static severity table
//! - Buffered batch persistence with a background flusher
//! - At-least-once delivery (failed batches are re-queued)
//! - Pattern detection: rapid role requests, privilege escalation,
//!   repeated permission violations
//! - Alert lifecycle and aggregate security metrics

#![warn(clippy::all)]

pub mod alert;
mod buffer;
pub mod event;
pub mod logger;
pub mod metrics;
pub mod patterns;

pub use alert::{AlertFilter, AlertStatus, SecurityAlert};
pub use event::{EventCategory, EventContext, SecurityEvent, SecurityEventType, Severity};
pub use logger::{EventFilter, LoggedEvent, LoggerStats, SecurityEventLogger};
pub use metrics::{RiskRanking, SecurityMetrics, TimeRange};
pub use patterns::DetectedPattern;

use serde::{Deserialize, Serialize};

/// Event logger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventLoggerConfig {
    /// Pending events that trigger a flush
    pub event_buffer_size: usize,
    /// Background flush period
    pub flush_interval_ms: u64,
    /// Role requests per user per hour before a pattern event
    pub rapid_request_threshold: u32,
    /// Permission violations per user per day before a pattern event
    pub violation_threshold: u32,
    /// Entries in each metrics ranking
    pub metrics_top_n: usize,
}

impl Default for EventLoggerConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 100,
            flush_interval_ms: 5000,
            rapid_request_threshold: 5,
            violation_threshold: 10,
            metrics_top_n: 10,
        }
    }
}
