//! Security metrics aggregation

use crate::alert::SecurityAlert;
use crate::event::{EventCategory, SecurityEvent, Severity};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Inclusive time range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn last_hours(hours: i64) -> Self {
        let end = Utc::now();
        Self { start: end - Duration::hours(hours), end }
    }

    pub fn last_days(days: i64) -> Self {
        let end = Utc::now();
        Self { start: end - Duration::days(days), end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// One ranked subject (user or institution)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskRanking {
    pub id: String,
    pub event_count: u64,
    /// Sum of severity weights; grows with every event
    pub risk_score: u64,
}

/// Aggregated view of events and alerts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityMetrics {
    pub total_events: u64,
    pub by_severity: BTreeMap<Severity, u64>,
    pub by_type: BTreeMap<String, u64>,
    pub by_category: BTreeMap<EventCategory, u64>,
    pub total_alerts: u64,
    pub open_alerts: u64,
    pub unacknowledged_alerts: u64,
    pub top_users: Vec<RiskRanking>,
    pub top_institutions: Vec<RiskRanking>,
    pub range: Option<TimeRange>,
}

pub(crate) fn aggregate(
    events: &[SecurityEvent],
    alerts: &[SecurityAlert],
    range: Option<TimeRange>,
    top_n: usize,
) -> SecurityMetrics {
    let mut metrics = SecurityMetrics {
        total_events: events.len() as u64,
        total_alerts: alerts.len() as u64,
        range,
        ..Default::default()
    };

    let mut users: HashMap<&str, RiskRanking> = HashMap::new();
    let mut institutions: HashMap<&str, RiskRanking> = HashMap::new();

    for event in events {
        *metrics.by_severity.entry(event.severity).or_insert(0) += 1;
        *metrics.by_type.entry(event.event_type.as_str().to_string()).or_insert(0) += 1;
        *metrics.by_category.entry(event.event_type.category()).or_insert(0) += 1;

        let weight = event.severity.weight();
        if let Some(user) = event.user_id.as_deref() {
            bump(&mut users, user, weight);
        }
        if let Some(inst) = event.institution_id.as_deref() {
            bump(&mut institutions, inst, weight);
        }
    }

    for alert in alerts {
        if alert.is_open() {
            metrics.open_alerts += 1;
            if !alert.acknowledged {
                metrics.unacknowledged_alerts += 1;
            }
        }
    }

    metrics.top_users = rank(users, top_n);
    metrics.top_institutions = rank(institutions, top_n);
    metrics
}

fn bump<'a>(table: &mut HashMap<&'a str, RiskRanking>, id: &'a str, weight: u64) {
    let entry = table.entry(id).or_insert_with(|| RiskRanking {
        id: id.to_string(),
        event_count: 0,
        risk_score: 0,
    });
    entry.event_count += 1;
    entry.risk_score += weight;
}

fn rank(table: HashMap<&str, RiskRanking>, top_n: usize) -> Vec<RiskRanking> {
    let mut ranked: Vec<_> = table.into_values().collect();
    ranked.sort_by(|a, b| {
        b.risk_score
            .cmp(&a.risk_score)
            .then(b.event_count.cmp(&a.event_count))
            .then(a.id.cmp(&b.id))
    });
    ranked.truncate(top_n);
    ranked
}
