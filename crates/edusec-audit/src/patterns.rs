//! Pattern detectors
//!
//! Detectors run after each appended event against in-process sliding
//! windows. They never touch the store and never fail.

use crate::event::{EventContext, SecurityEvent, SecurityEventType};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use edusec_common::Role;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};

/// Idle windows are swept at most this often from `inspect`
const PRUNE_INTERVAL_MS: i64 = 60_000;

/// Event a detector wants logged
#[derive(Debug, Clone)]
pub struct DetectedPattern {
    pub event_type: SecurityEventType,
    pub description: String,
    pub details: Value,
    pub context: EventContext,
}

pub(crate) struct PatternDetector {
    rapid_request_threshold: usize,
    violation_threshold: usize,
    role_requests: DashMap<String, VecDeque<DateTime<Utc>>>,
    violations: DashMap<String, VecDeque<DateTime<Utc>>>,
    last_pruned_ms: AtomicI64,
}

impl PatternDetector {
    pub fn new(rapid_request_threshold: u32, violation_threshold: u32) -> Self {
        Self {
            rapid_request_threshold: rapid_request_threshold.max(1) as usize,
            violation_threshold: violation_threshold.max(1) as usize,
            role_requests: DashMap::new(),
            violations: DashMap::new(),
            last_pruned_ms: AtomicI64::new(0),
        }
    }

    /// Run every detector against one event
    pub fn inspect(&self, event: &SecurityEvent) -> Vec<DetectedPattern> {
        let mut found = Vec::new();
        if let Some(p) = self.rapid_role_requests(event) {
            found.push(p);
        }
        if let Some(p) = self.privilege_escalation(event) {
            found.push(p);
        }
        if let Some(p) = self.repeated_violations(event) {
            found.push(p);
        }
        self.maybe_prune(Utc::now());
        found
    }

    fn maybe_prune(&self, now: DateTime<Utc>) {
        let now_ms = now.timestamp_millis();
        let last = self.last_pruned_ms.load(Ordering::Relaxed);
        if now_ms - last < PRUNE_INTERVAL_MS {
            return;
        }
        if self
            .last_pruned_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            self.prune(now);
        }
    }

    fn rapid_role_requests(&self, event: &SecurityEvent) -> Option<DetectedPattern> {
        if event.event_type != SecurityEventType::RoleRequestCreated {
            return None;
        }
        let user = event.user_id.as_deref()?;
        let count = slide(&self.role_requests, user, event.timestamp, Duration::hours(1));
        (count == self.rapid_request_threshold).then(|| DetectedPattern {
            event_type: SecurityEventType::SuspiciousPatternDetected,
            description: format!("{count} role requests from {user} within one hour"),
            details: json!({
                "pattern": "rapid_role_requests",
                "count": count,
                "window_seconds": 3600,
                "trigger_event_id": event.id,
            }),
            context: event.context(),
        })
    }

    fn privilege_escalation(&self, event: &SecurityEvent) -> Option<DetectedPattern> {
        if !matches!(
            event.event_type,
            SecurityEventType::RoleRequestCreated | SecurityEventType::InvalidRoleTransition
        ) {
            return None;
        }
        let requested: Role = event.detail_str("requested_role")?.parse().ok()?;
        (requested == Role::top()).then(|| DetectedPattern {
            event_type: SecurityEventType::PrivilegeEscalationAttempt,
            description: format!("request for {requested} role"),
            details: json!({
                "pattern": "privilege_escalation",
                "requested_role": requested,
                "current_role": event.details.get("current_role").cloned().unwrap_or(Value::Null),
                "trigger_event_id": event.id,
            }),
            context: event.context(),
        })
    }

    fn repeated_violations(&self, event: &SecurityEvent) -> Option<DetectedPattern> {
        if !matches!(
            event.event_type,
            SecurityEventType::PermissionDenied
                | SecurityEventType::UnauthorizedAccessAttempt
                | SecurityEventType::CrossInstitutionAccess
        ) {
            return None;
        }
        let user = event.user_id.as_deref()?;
        let count = slide(&self.violations, user, event.timestamp, Duration::days(1));
        (count == self.violation_threshold).then(|| DetectedPattern {
            event_type: SecurityEventType::SuspiciousPatternDetected,
            description: format!("{count} permission violations by {user} within one day"),
            details: json!({
                "pattern": "repeated_permission_violations",
                "count": count,
                "window_seconds": 86_400,
                "trigger_event_id": event.id,
            }),
            context: event.context(),
        })
    }

    /// Drop windows with no recent activity
    pub fn prune(&self, now: DateTime<Utc>) {
        let hour = now - Duration::hours(1);
        let day = now - Duration::days(1);
        self.role_requests
            .retain(|_, times| times.back().map_or(false, |t| *t > hour));
        self.violations
            .retain(|_, times| times.back().map_or(false, |t| *t > day));
    }

    pub fn tracked_users(&self) -> usize {
        self.role_requests.len() + self.violations.len()
    }
}

/// Push `at` into the user's window, drop what aged out, return the count
fn slide(
    windows: &DashMap<String, VecDeque<DateTime<Utc>>>,
    user: &str,
    at: DateTime<Utc>,
    window: Duration,
) -> usize {
    let mut times = windows.entry(user.to_string()).or_default();
    times.push_back(at);
    let cutoff = at - window;
    while times.front().map_or(false, |t| *t <= cutoff) {
        times.pop_front();
    }
    times.len()
}
