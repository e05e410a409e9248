//! Security alerts
//!
//! Alerts move through `unacknowledged -> acknowledged -> resolved`; every
//! transition records who made it and when.

use crate::event::{SecurityEvent, Severity};
use chrono::{DateTime, Utc};
use edusec_common::{Query, Record, SecurityError, SecurityResult, Table};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Alert lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Unacknowledged,
    Acknowledged,
    Resolved,
}

/// Alert raised for a CRITICAL event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityAlert {
    pub id: String,
    /// Wire name of the triggering event type
    pub alert_type: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub event_ids: Vec<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub institution_id: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub acknowledged: bool,
    #[serde(default)]
    pub acknowledged_by: Option<String>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default)]
    pub resolved_by: Option<String>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolution: Option<String>,
}

impl Record for SecurityAlert {
    const TABLE: Table = Table::SecurityAlerts;
}

impl SecurityAlert {
    /// One alert for one event
    pub fn from_event(event: &SecurityEvent) -> Self {
        Self {
            id: edusec_common::new_id(),
            alert_type: event.event_type.as_str().to_string(),
            severity: event.severity,
            title: format!("{} detected", event.event_type),
            description: event.description.clone(),
            event_ids: vec![event.id.clone()],
            user_id: event.user_id.clone(),
            institution_id: event.institution_id.clone(),
            created_at: event.timestamp,
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved: false,
            resolved_by: None,
            resolved_at: None,
            resolution: None,
        }
    }

    pub fn status(&self) -> AlertStatus {
        if self.resolved {
            AlertStatus::Resolved
        } else if self.acknowledged {
            AlertStatus::Acknowledged
        } else {
            AlertStatus::Unacknowledged
        }
    }

    pub fn is_open(&self) -> bool {
        !self.resolved
    }

    /// `unacknowledged -> acknowledged`
    pub fn acknowledge(&mut self, actor: &str) -> SecurityResult<()> {
        if actor.trim().is_empty() {
            return Err(SecurityError::Validation("acknowledging actor is required".into()));
        }
        match self.status() {
            AlertStatus::Unacknowledged => {
                self.acknowledged = true;
                self.acknowledged_by = Some(actor.to_string());
                self.acknowledged_at = Some(Utc::now());
                Ok(())
            }
            status => Err(SecurityError::Validation(format!(
                "alert {} cannot be acknowledged while {:?}",
                self.id, status
            ))),
        }
    }

    /// `acknowledged -> resolved`; the note must not be blank
    pub fn resolve(&mut self, actor: &str, resolution: &str) -> SecurityResult<()> {
        if actor.trim().is_empty() {
            return Err(SecurityError::Validation("resolving actor is required".into()));
        }
        if resolution.trim().is_empty() {
            return Err(SecurityError::Validation("resolution note is required".into()));
        }
        match self.status() {
            AlertStatus::Acknowledged => {
                self.resolved = true;
                self.resolved_by = Some(actor.to_string());
                self.resolved_at = Some(Utc::now());
                self.resolution = Some(resolution.trim().to_string());
                Ok(())
            }
            status => Err(SecurityError::Validation(format!(
                "alert {} cannot be resolved while {:?}",
                self.id, status
            ))),
        }
    }

    /// Mutable lifecycle fields, as a store patch
    pub(crate) fn lifecycle_patch(&self) -> Value {
        json!({
            "acknowledged": self.acknowledged,
            "acknowledged_by": self.acknowledged_by,
            "acknowledged_at": self.acknowledged_at.map(|t| t.timestamp_millis()),
            "resolved": self.resolved,
            "resolved_by": self.resolved_by,
            "resolved_at": self.resolved_at.map(|t| t.timestamp_millis()),
            "resolution": self.resolution,
        })
    }
}

/// Alert read filter
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub status: Option<AlertStatus>,
    pub min_severity: Option<Severity>,
    pub alert_type: Option<String>,
    pub institution_id: Option<String>,
    pub user_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AlertFilter {
    pub fn open() -> Self {
        Self {
            status: Some(AlertStatus::Unacknowledged),
            ..Default::default()
        }
    }

    pub(crate) fn to_query(&self) -> Query {
        let mut query = Query::table(Table::SecurityAlerts);
        if let Some(status) = self.status {
            let (acknowledged, resolved) = match status {
                AlertStatus::Unacknowledged => (false, false),
                AlertStatus::Acknowledged => (true, false),
                AlertStatus::Resolved => (true, true),
            };
            query = query.eq("acknowledged", acknowledged).eq("resolved", resolved);
        }
        if let Some(min) = self.min_severity {
            query = query.one_of("severity", min.at_least().map(|s| json!(s.as_str())).collect());
        }
        if let Some(alert_type) = &self.alert_type {
            query = query.eq("alert_type", alert_type.as_str());
        }
        if let Some(inst) = &self.institution_id {
            query = query.eq("institution_id", inst.as_str());
        }
        if let Some(user) = &self.user_id {
            query = query.eq("user_id", user.as_str());
        }
        if let Some(since) = self.since {
            query = query.gte("created_at", since.timestamp_millis());
        }
        query
    }
}
