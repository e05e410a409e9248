//! Security event logger
//!
//! Events are appended to an in-memory buffer and persisted in batches by a
//! background flusher (interval tick, capacity trigger, or shutdown drain).
//! CRITICAL events create their alert and flush inline before the call
//! returns. A failed flush puts the batch back at the front of the buffer,
//! so delivery is at-least-once and readers dedupe by id.

use crate::alert::{AlertFilter, SecurityAlert};
use crate::buffer::EventBuffer;
use crate::event::{EventContext, SecurityEvent, SecurityEventType, Severity};
use crate::metrics::{self, SecurityMetrics, TimeRange};
use crate::patterns::PatternDetector;
use crate::EventLoggerConfig;
use chrono::{DateTime, Utc};
use edusec_common::{Order, Query, RecordStore, Role, SecurityError, SecurityResult, Table};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Event read filter
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub event_types: Vec<SecurityEventType>,
    pub min_severity: Option<Severity>,
    pub user_id: Option<String>,
    pub institution_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub resolved: Option<bool>,
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn of_type(event_type: SecurityEventType) -> Self {
        Self {
            event_types: vec![event_type],
            ..Default::default()
        }
    }

    pub fn for_user(user_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            ..Default::default()
        }
    }

    fn to_query(&self) -> Query {
        let mut query = Query::table(Table::SecurityEvents);
        if !self.event_types.is_empty() {
            query = query.one_of(
                "event_type",
                self.event_types.iter().map(|t| json!(t.as_str())).collect(),
            );
        }
        if let Some(min) = self.min_severity {
            query = query.one_of("severity", min.at_least().map(|s| json!(s.as_str())).collect());
        }
        if let Some(user) = &self.user_id {
            query = query.eq("user_id", user.as_str());
        }
        if let Some(inst) = &self.institution_id {
            query = query.eq("institution_id", inst.as_str());
        }
        if let Some(since) = self.since {
            query = query.gte("timestamp", since.timestamp_millis());
        }
        if let Some(until) = self.until {
            query = query.lte("timestamp", until.timestamp_millis());
        }
        if let Some(resolved) = self.resolved {
            query = query.eq("resolved", resolved);
        }
        query
    }
}

/// Result of logging one event
#[derive(Debug, Clone)]
pub struct LoggedEvent {
    pub event: SecurityEvent,
    /// Present when the event was CRITICAL
    pub alert: Option<SecurityAlert>,
}

/// Logger counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoggerStats {
    pub events_logged: u64,
    pub events_flushed: u64,
    pub alerts_created: u64,
    pub alerts_flushed: u64,
    pub patterns_detected: u64,
    pub flush_failures: u64,
    pub pending_events: usize,
    pub pending_alerts: usize,
}

#[derive(Default)]
struct Counters {
    events_logged: AtomicU64,
    events_flushed: AtomicU64,
    alerts_created: AtomicU64,
    alerts_flushed: AtomicU64,
    patterns_detected: AtomicU64,
    flush_failures: AtomicU64,
}

enum FlushCommand {
    Flush,
    Shutdown,
}

struct LoggerInner {
    store: Arc<dyn RecordStore>,
    config: EventLoggerConfig,
    buffer: EventBuffer,
    detector: PatternDetector,
    /// Serializes flushes and alert transitions
    flush_lock: tokio::sync::Mutex<()>,
    flush_tx: parking_lot::Mutex<Option<mpsc::UnboundedSender<FlushCommand>>>,
    counters: Counters,
}

/// Buffered security event logger.
///
/// Constructed once by the application and shared (via `Arc`) with every
/// component that emits events.
pub struct SecurityEventLogger {
    inner: Arc<LoggerInner>,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl SecurityEventLogger {
    pub fn new(store: Arc<dyn RecordStore>, config: EventLoggerConfig) -> Self {
        let detector = PatternDetector::new(config.rapid_request_threshold, config.violation_threshold);
        Self {
            inner: Arc::new(LoggerInner {
                store,
                config,
                buffer: EventBuffer::new(),
                detector,
                flush_lock: tokio::sync::Mutex::new(()),
                flush_tx: parking_lot::Mutex::new(None),
                counters: Counters::default(),
            }),
            worker: parking_lot::Mutex::new(None),
        }
    }

    /// Spawn the background flusher. Idempotent; needs a Tokio runtime.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.flush_tx.lock() = Some(tx);
        *worker = Some(tokio::spawn(run_flusher(Arc::clone(&self.inner), rx)));
        tracing::info!(
            interval_ms = self.inner.config.flush_interval_ms,
            buffer_size = self.inner.config.event_buffer_size,
            "security event flusher started"
        );
    }

    /// Stop the flusher and persist everything still buffered
    pub async fn shutdown(&self) -> SecurityResult<usize> {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Some(tx) = self.inner.flush_tx.lock().take() {
                let _ = tx.send(FlushCommand::Shutdown);
            }
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "security event flusher panicked");
            }
        }
        let flushed = self.inner.flush().await?;
        tracing::info!(flushed, "security event logger drained");
        Ok(flushed)
    }

    /// Persist buffered events and alerts now
    pub async fn flush(&self) -> SecurityResult<usize> {
        self.inner.flush().await
    }

    /// Log one event and run pattern detection on it
    pub async fn log_security_event(
        &self,
        event_type: SecurityEventType,
        description: impl Into<String>,
        details: Value,
        context: EventContext,
    ) -> LoggedEvent {
        let logged = self
            .inner
            .record(SecurityEvent::new(event_type, description, details, context))
            .await;

        for pattern in self.inner.detector.inspect(&logged.event) {
            self.inner.counters.patterns_detected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                pattern = %pattern.event_type,
                user_id = ?pattern.context.user_id,
                "{}",
                pattern.description
            );
            let derived = SecurityEvent::new(pattern.event_type, pattern.description, pattern.details, pattern.context);
            self.inner.record(derived).await;
        }

        logged
    }

    pub async fn log_authentication(&self, user_id: &str, success: bool, context: EventContext) -> LoggedEvent {
        let (event_type, description) = if success {
            (SecurityEventType::LoginSuccess, "login succeeded")
        } else {
            (SecurityEventType::LoginFailure, "login failed")
        };
        let context = EventContext { user_id: Some(user_id.to_string()), ..context };
        self.log_security_event(event_type, description, json!({ "success": success }), context)
            .await
    }

    /// Log a role-request lifecycle event with its role pair
    pub async fn log_role_request(
        &self,
        event_type: SecurityEventType,
        current_role: Role,
        requested_role: Role,
        reason: Option<&str>,
        context: EventContext,
    ) -> LoggedEvent {
        let description = match reason {
            Some(reason) => format!("{current_role} -> {requested_role}: {reason}"),
            None => format!("{current_role} -> {requested_role}"),
        };
        let details = json!({
            "current_role": current_role,
            "requested_role": requested_role,
            "reason": reason,
        });
        self.log_security_event(event_type, description, details, context).await
    }

    pub async fn log_permission_violation(&self, user_id: &str, permission: &str, context: EventContext) -> LoggedEvent {
        let context = EventContext { user_id: Some(user_id.to_string()), ..context };
        self.log_security_event(
            SecurityEventType::PermissionDenied,
            format!("permission {permission} denied"),
            json!({ "permission": permission }),
            context,
        )
        .await
    }

    pub async fn log_admin_action(
        &self,
        event_type: SecurityEventType,
        actor: &str,
        action: &str,
        details: Value,
        context: EventContext,
    ) -> LoggedEvent {
        let context = EventContext { user_id: Some(actor.to_string()), ..context };
        let details = match details {
            Value::Object(mut map) => {
                map.insert("action".into(), json!(action));
                Value::Object(map)
            }
            Value::Null => json!({ "action": action }),
            other => json!({ "action": action, "data": other }),
        };
        self.log_security_event(event_type, action.to_string(), details, context).await
    }

    /// Record an internal failure. Details stay in the audit trail only.
    pub async fn log_system_error(&self, operation: &str, error: &SecurityError, context: EventContext) -> LoggedEvent {
        self.log_security_event(
            SecurityEventType::SystemError,
            format!("{operation} failed"),
            json!({
                "operation": operation,
                "code": error.code(),
                "error": error.to_string(),
            }),
            context,
        )
        .await
    }

    /// Stored and buffered events, newest first, deduplicated by id
    pub async fn get_security_events(&self, filter: &EventFilter) -> SecurityResult<Vec<SecurityEvent>> {
        let query = filter.to_query();
        let mut store_query = query.clone().order_by("timestamp", Order::Desc);
        if let Some(limit) = filter.limit {
            store_query = store_query.limit(limit);
        }
        let stored: Vec<SecurityEvent> = self.inner.store.fetch(&store_query).await?;
        let buffered = self.inner.buffer.snapshot_events();

        let mut events = merge_by_id(stored, buffered, |e| &e.id, |e| row_matches(&query, e));
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = filter.limit {
            events.truncate(limit);
        }
        Ok(events)
    }

    /// Stored and pending alerts, newest first
    pub async fn get_security_alerts(&self, filter: &AlertFilter) -> SecurityResult<Vec<SecurityAlert>> {
        let query = filter.to_query();
        let mut store_query = query.clone().order_by("created_at", Order::Desc);
        if let Some(limit) = filter.limit {
            store_query = store_query.limit(limit);
        }
        let stored: Vec<SecurityAlert> = self.inner.store.fetch(&store_query).await?;
        let pending = self.inner.buffer.snapshot_alerts();

        let mut alerts = merge_by_id(stored, pending, |a| &a.id, |a| row_matches(&query, a));
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            alerts.truncate(limit);
        }
        Ok(alerts)
    }

    /// Counts by severity and type plus the most active users and institutions
    pub async fn get_security_metrics(
        &self,
        institution_id: Option<&str>,
        range: Option<TimeRange>,
    ) -> SecurityResult<SecurityMetrics> {
        let events = self
            .get_security_events(&EventFilter {
                institution_id: institution_id.map(str::to_string),
                since: range.map(|r| r.start),
                until: range.map(|r| r.end),
                ..Default::default()
            })
            .await?;
        let alerts: Vec<SecurityAlert> = self
            .get_security_alerts(&AlertFilter {
                institution_id: institution_id.map(str::to_string),
                since: range.map(|r| r.start),
                ..Default::default()
            })
            .await?
            .into_iter()
            .filter(|a| range.map_or(true, |r| r.contains(a.created_at)))
            .collect();

        Ok(metrics::aggregate(&events, &alerts, range, self.inner.config.metrics_top_n))
    }

    /// `unacknowledged -> acknowledged`
    pub async fn acknowledge_alert(&self, alert_id: &str, actor: &str) -> SecurityResult<SecurityAlert> {
        let alert = self.inner.transition_alert(alert_id, |a| a.acknowledge(actor)).await?;
        self.log_admin_action(
            SecurityEventType::AdminActionPerformed,
            actor,
            "alert_acknowledged",
            json!({ "alert_id": alert.id, "alert_type": alert.alert_type }),
            EventContext::default(),
        )
        .await;
        Ok(alert)
    }

    /// `acknowledged -> resolved`, with a required note
    pub async fn resolve_alert(&self, alert_id: &str, actor: &str, resolution: &str) -> SecurityResult<SecurityAlert> {
        let alert = self
            .inner
            .transition_alert(alert_id, |a| a.resolve(actor, resolution))
            .await?;
        self.log_admin_action(
            SecurityEventType::AdminActionPerformed,
            actor,
            "alert_resolved",
            json!({ "alert_id": alert.id, "resolution": resolution }),
            EventContext::default(),
        )
        .await;
        Ok(alert)
    }

    pub fn stats(&self) -> LoggerStats {
        let c = &self.inner.counters;
        LoggerStats {
            events_logged: c.events_logged.load(Ordering::Relaxed),
            events_flushed: c.events_flushed.load(Ordering::Relaxed),
            alerts_created: c.alerts_created.load(Ordering::Relaxed),
            alerts_flushed: c.alerts_flushed.load(Ordering::Relaxed),
            patterns_detected: c.patterns_detected.load(Ordering::Relaxed),
            flush_failures: c.flush_failures.load(Ordering::Relaxed),
            pending_events: self.inner.buffer.pending_events(),
            pending_alerts: self.inner.buffer.pending_alerts(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }
}

impl LoggerInner {
    async fn record(&self, event: SecurityEvent) -> LoggedEvent {
        self.counters.events_logged.fetch_add(1, Ordering::Relaxed);
        match event.severity {
            Severity::Critical => tracing::error!(
                event_type = %event.event_type,
                user_id = ?event.user_id,
                institution_id = ?event.institution_id,
                "{}",
                event.description
            ),
            Severity::High => tracing::warn!(
                event_type = %event.event_type,
                user_id = ?event.user_id,
                "{}",
                event.description
            ),
            _ => tracing::debug!(event_type = %event.event_type, user_id = ?event.user_id, "{}", event.description),
        }

        let alert = (event.severity == Severity::Critical).then(|| SecurityAlert::from_event(&event));
        if let Some(alert) = &alert {
            self.counters.alerts_created.fetch_add(1, Ordering::Relaxed);
            self.buffer.push_alert(alert.clone());
        }
        let pending = self.buffer.push_event(event.clone());

        if alert.is_some() {
            if let Err(e) = self.flush().await {
                tracing::warn!(error = %e, "critical event flush failed, will retry");
            }
        } else if pending >= self.config.event_buffer_size {
            self.request_flush().await;
        }

        LoggedEvent { event, alert }
    }

    /// Hand a capacity flush to the worker, or flush inline without one
    async fn request_flush(&self) {
        let sent = self
            .flush_tx
            .lock()
            .as_ref()
            .map_or(false, |tx| tx.send(FlushCommand::Flush).is_ok());
        if !sent {
            if let Err(e) = self.flush().await {
                tracing::warn!(error = %e, "capacity flush failed, will retry");
            }
        }
    }

    async fn flush(&self) -> SecurityResult<usize> {
        let _guard = self.flush_lock.lock().await;
        let events = self.buffer.take_events();
        let alerts = self.buffer.take_alerts();
        if events.is_empty() && alerts.is_empty() {
            return Ok(0);
        }

        let mut persisted = 0;
        let mut failure = None;

        if !events.is_empty() {
            let count = events.len();
            match self.store.insert_records(&events).await {
                Ok(()) => {
                    persisted += count;
                    self.counters.events_flushed.fetch_add(count as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    self.buffer.requeue_events(events);
                    failure = Some(e);
                }
            }
        }

        if !alerts.is_empty() {
            let count = alerts.len();
            match self.store.insert_records(&alerts).await {
                Ok(()) => {
                    self.counters.alerts_flushed.fetch_add(count as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    self.buffer.requeue_alerts(alerts);
                    failure = Some(e);
                }
            }
        }

        match failure {
            None => {
                tracing::debug!(persisted, "security events flushed");
                Ok(persisted)
            }
            Some(e) => {
                self.counters.flush_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    error = %e,
                    pending = self.buffer.pending_events(),
                    "security event flush failed, batch re-queued"
                );
                Err(e.into())
            }
        }
    }

    /// Apply a lifecycle transition to a pending or stored alert
    async fn transition_alert(
        &self,
        alert_id: &str,
        apply: impl Fn(&mut SecurityAlert) -> SecurityResult<()>,
    ) -> SecurityResult<SecurityAlert> {
        let _guard = self.flush_lock.lock().await;

        let pending = self.buffer.with_alert(alert_id, |alert| -> SecurityResult<SecurityAlert> {
            let mut updated = alert.clone();
            apply(&mut updated)?;
            *alert = updated.clone();
            Ok(updated)
        });
        if let Some(result) = pending {
            return result;
        }

        let query = Query::table(Table::SecurityAlerts).eq("id", alert_id);
        let mut alert = self
            .store
            .fetch::<SecurityAlert>(&query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SecurityError::NotFound(format!("alert {alert_id}")))?;
        apply(&mut alert)?;
        self.store.update(&query, alert.lifecycle_patch()).await?;
        Ok(alert)
    }
}

async fn run_flusher(inner: Arc<LoggerInner>, mut rx: mpsc::UnboundedReceiver<FlushCommand>) {
    let mut ticker = tokio::time::interval(Duration::from_millis(inner.config.flush_interval_ms.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let _ = inner.flush().await;
                inner.detector.prune(Utc::now());
            }
            command = rx.recv() => match command {
                Some(FlushCommand::Flush) => {
                    let _ = inner.flush().await;
                }
                Some(FlushCommand::Shutdown) | None => break,
            },
        }
    }
    tracing::debug!("security event flusher stopped");
}

fn merge_by_id<T>(
    stored: Vec<T>,
    buffered: Vec<T>,
    id: impl Fn(&T) -> &String,
    keep: impl Fn(&T) -> bool,
) -> Vec<T> {
    let seen: HashSet<String> = stored.iter().map(|r| id(r).clone()).collect();
    let mut merged = stored;
    merged.extend(buffered.into_iter().filter(|r| !seen.contains(id(r)) && keep(r)));
    merged
}

fn row_matches<T: Serialize>(query: &Query, record: &T) -> bool {
    serde_json::to_value(record).map_or(false, |row| query.matches(&row))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertStatus;
    use edusec_common::InMemoryRecordStore;

    fn logger_with(config: EventLoggerConfig) -> (Arc<InMemoryRecordStore>, SecurityEventLogger) {
        let store = Arc::new(InMemoryRecordStore::new());
        let logger = SecurityEventLogger::new(store.clone(), config);
        (store, logger)
    }

    fn logger() -> (Arc<InMemoryRecordStore>, SecurityEventLogger) {
        logger_with(EventLoggerConfig::default())
    }

    #[tokio::test]
    async fn test_critical_event_creates_one_alert_synchronously() {
        let (store, logger) = logger();
        let logged = logger
            .log_security_event(
                SecurityEventType::EmergencyAccessGranted,
                "break-glass access",
                json!({}),
                EventContext::user("admin").institution("i1"),
            )
            .await;

        let alert = logged.alert.expect("critical event raises an alert");
        assert_eq!(alert.alert_type, "EMERGENCY_ACCESS_GRANTED");
        assert_eq!(alert.event_ids, vec![logged.event.id.clone()]);
        assert_eq!(store.row_count(Table::SecurityAlerts), 1);
        assert_eq!(store.row_count(Table::SecurityEvents), 1);

        let alerts = logger.get_security_alerts(&AlertFilter::default()).await.unwrap();
        assert_eq!(alerts.len(), 1);
    }

    #[tokio::test]
    async fn test_non_critical_events_wait_for_capacity() {
        let (store, logger) = logger_with(EventLoggerConfig {
            event_buffer_size: 3,
            ..Default::default()
        });
        for _ in 0..2 {
            logger
                .log_authentication("u1", true, EventContext::default())
                .await;
        }
        assert_eq!(store.row_count(Table::SecurityEvents), 0);
        assert_eq!(logger.stats().pending_events, 2);

        logger.log_authentication("u1", false, EventContext::default()).await;
        assert_eq!(store.row_count(Table::SecurityEvents), 3);
        assert_eq!(logger.stats().pending_events, 0);
    }

    #[tokio::test]
    async fn test_failed_flush_requeues() {
        let (store, logger) = logger();
        store.set_unavailable(true);
        let logged = logger
            .log_security_event(
                SecurityEventType::PrivilegeEscalationAttempt,
                "attempt",
                json!({}),
                EventContext::user("u1"),
            )
            .await;
        assert!(logged.alert.is_some());
        assert_eq!(logger.stats().pending_events, 1);
        assert_eq!(logger.stats().pending_alerts, 1);
        assert_eq!(logger.stats().flush_failures, 1);

        store.set_unavailable(false);
        assert_eq!(logger.flush().await.unwrap(), 1);
        assert_eq!(store.row_count(Table::SecurityEvents), 1);
        assert_eq!(store.row_count(Table::SecurityAlerts), 1);
    }

    #[tokio::test]
    async fn test_reads_merge_buffer_without_duplicates() {
        let (_, logger) = logger();
        logger.log_authentication("u1", true, EventContext::default()).await;
        logger.flush().await.unwrap();
        logger.log_authentication("u1", false, EventContext::default()).await;
        logger.log_authentication("u2", false, EventContext::default()).await;

        let events = logger.get_security_events(&EventFilter::for_user("u1")).await.unwrap();
        assert_eq!(events.len(), 2);

        let failures = logger
            .get_security_events(&EventFilter::of_type(SecurityEventType::LoginFailure))
            .await
            .unwrap();
        assert_eq!(failures.len(), 2);

        let ids: HashSet<_> = logger
            .get_security_events(&EventFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids.len(), 3);
    }

    #[tokio::test]
    async fn test_rapid_requests_emit_one_pattern_event() {
        let (_, logger) = logger_with(EventLoggerConfig {
            rapid_request_threshold: 3,
            ..Default::default()
        });
        for _ in 0..4 {
            logger
                .log_role_request(
                    SecurityEventType::RoleRequestCreated,
                    Role::Student,
                    Role::Teacher,
                    None,
                    EventContext::user("u1").institution("i1"),
                )
                .await;
        }
        let patterns = logger
            .get_security_events(&EventFilter::of_type(SecurityEventType::SuspiciousPatternDetected))
            .await
            .unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].severity, Severity::High);
        assert_eq!(logger.stats().patterns_detected, 1);
    }

    #[tokio::test]
    async fn test_top_tier_request_raises_escalation_alert() {
        let (_, logger) = logger();
        let logged = logger
            .log_role_request(
                SecurityEventType::RoleRequestCreated,
                Role::Student,
                Role::SystemAdmin,
                None,
                EventContext::user("u1").institution("i1"),
            )
            .await;
        assert!(logged.alert.is_none());

        let alerts = logger.get_security_alerts(&AlertFilter::open()).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, "PRIVILEGE_ESCALATION_ATTEMPT");
    }

    #[tokio::test]
    async fn test_alert_lifecycle_through_store() {
        let (_, logger) = logger();
        let alert = logger
            .log_security_event(
                SecurityEventType::PrivilegeEscalationAttempt,
                "attempt",
                json!({}),
                EventContext::user("u1"),
            )
            .await
            .alert
            .unwrap();

        let err = logger.resolve_alert(&alert.id, "admin", "done").await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let acked = logger.acknowledge_alert(&alert.id, "admin").await.unwrap();
        assert_eq!(acked.status(), AlertStatus::Acknowledged);

        let err = logger.resolve_alert(&alert.id, "admin", "").await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let resolved = logger
            .resolve_alert(&alert.id, "admin", "escalated to institution")
            .await
            .unwrap();
        assert_eq!(resolved.status(), AlertStatus::Resolved);

        let stored = logger
            .get_security_alerts(&AlertFilter {
                status: Some(AlertStatus::Resolved),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].resolution.as_deref(), Some("escalated to institution"));

        let missing = logger.acknowledge_alert("nope", "admin").await.unwrap_err();
        assert_eq!(missing.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_pending_alert_transitions_in_buffer() {
        let (store, logger) = logger();
        store.set_unavailable(true);
        let alert = logger
            .log_security_event(
                SecurityEventType::EmergencyAccessGranted,
                "break-glass",
                json!({}),
                EventContext::user("u1"),
            )
            .await
            .alert
            .unwrap();

        let acked = logger.acknowledge_alert(&alert.id, "admin").await.unwrap();
        assert!(acked.acknowledged);

        store.set_unavailable(false);
        logger.flush().await.unwrap();
        let stored = logger.get_security_alerts(&AlertFilter::default()).await.unwrap();
        assert!(stored[0].acknowledged);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_flusher_persists_on_interval() {
        let (store, logger) = logger_with(EventLoggerConfig {
            flush_interval_ms: 100,
            ..Default::default()
        });
        logger.start();
        logger.log_authentication("u1", true, EventContext::default()).await;
        assert_eq!(store.row_count(Table::SecurityEvents), 0);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(store.row_count(Table::SecurityEvents), 1);
        logger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_drains_buffer() {
        let (store, logger) = logger();
        logger.start();
        assert!(logger.is_running());
        for i in 0..5 {
            logger
                .log_permission_violation(&format!("u{i}"), "grades:edit", EventContext::default())
                .await;
        }
        logger.shutdown().await.unwrap();
        assert!(!logger.is_running());
        assert_eq!(store.row_count(Table::SecurityEvents), 5);
        assert_eq!(logger.stats().pending_events, 0);
    }

    #[tokio::test]
    async fn test_metrics_scoped_to_institution() {
        let (_, logger) = logger();
        logger
            .log_permission_violation("u1", "grades:edit", EventContext::default().institution("i1"))
            .await;
        logger
            .log_permission_violation("u2", "grades:edit", EventContext::default().institution("i2"))
            .await;

        let metrics = logger
            .get_security_metrics(Some("i1"), Some(TimeRange::last_hours(1)))
            .await
            .unwrap();
        assert_eq!(metrics.total_events, 1);
        assert_eq!(metrics.top_users[0].id, "u1");
    }

    #[tokio::test]
    async fn test_system_error_keeps_detail_in_audit_trail() {
        let (_, logger) = logger();
        let err = SecurityError::Security("store unavailable: timeout".into());
        let logged = logger
            .log_system_error("validate_role_request", &err, EventContext::user("u1"))
            .await;
        assert_eq!(logged.event.severity, Severity::High);
        assert_eq!(logged.event.detail_str("code"), Some("SECURITY_ERROR"));
    }
}
