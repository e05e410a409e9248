//! In-memory event buffer

use crate::alert::SecurityAlert;
use crate::event::SecurityEvent;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Pending events and alerts awaiting persistence.
///
/// Failed batches go back to the front so persistence order is kept.
#[derive(Default)]
pub(crate) struct EventBuffer {
    events: Mutex<VecDeque<SecurityEvent>>,
    alerts: Mutex<VecDeque<SecurityAlert>>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event, returning the new pending count
    pub fn push_event(&self, event: SecurityEvent) -> usize {
        let mut events = self.events.lock();
        events.push_back(event);
        events.len()
    }

    pub fn push_alert(&self, alert: SecurityAlert) {
        self.alerts.lock().push_back(alert);
    }

    pub fn pending_events(&self) -> usize {
        self.events.lock().len()
    }

    pub fn pending_alerts(&self) -> usize {
        self.alerts.lock().len()
    }

    pub fn take_events(&self) -> Vec<SecurityEvent> {
        self.events.lock().drain(..).collect()
    }

    pub fn take_alerts(&self) -> Vec<SecurityAlert> {
        self.alerts.lock().drain(..).collect()
    }

    pub fn requeue_events(&self, batch: Vec<SecurityEvent>) {
        let mut events = self.events.lock();
        for event in batch.into_iter().rev() {
            events.push_front(event);
        }
    }

    pub fn requeue_alerts(&self, batch: Vec<SecurityAlert>) {
        let mut alerts = self.alerts.lock();
        for alert in batch.into_iter().rev() {
            alerts.push_front(alert);
        }
    }

    pub fn snapshot_events(&self) -> Vec<SecurityEvent> {
        self.events.lock().iter().cloned().collect()
    }

    pub fn snapshot_alerts(&self) -> Vec<SecurityAlert> {
        self.alerts.lock().iter().cloned().collect()
    }

    /// Apply `f` to a pending alert; `None` if it is not buffered
    pub fn with_alert<R>(&self, id: &str, f: impl FnOnce(&mut SecurityAlert) -> R) -> Option<R> {
        self.alerts.lock().iter_mut().find(|a| a.id == id).map(f)
    }
}
