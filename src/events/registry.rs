//! Active-event state machine
//!
//! States: absent → active → expired. All mutation goes through
//! [`EventRegistry::on_alert`], [`EventRegistry::tick`] and
//! [`EventRegistry::cancel`]. Identifiers are unique within the active set
//! under case-insensitive comparison.

use crate::types::{ActiveEvent, AlertMessage};

/// Result of applying an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    /// absent → active
    New,
    /// active → active, fields overwritten
    Updated,
}

impl AlertOutcome {
    pub fn is_new(self) -> bool {
        matches!(self, Self::New)
    }
}

/// Registry of events currently being processed.
#[derive(Debug, Clone)]
pub struct EventRegistry {
    events: Vec<ActiveEvent>,
    /// Seconds after origin before an event expires
    processing_time: f64,
}

impl EventRegistry {
    pub fn new(processing_time: f64) -> Self {
        Self { events: Vec::new(), processing_time }
    }

    /// Insert a new event or overwrite the matching one in place.
    pub fn on_alert(&mut self, alert: &AlertMessage) -> AlertOutcome {
        if let Some(existing) = self.events.iter_mut().find(|e| e.matches(&alert.event_id)) {
            let id = existing.id.clone();
            *existing = ActiveEvent { id, ..ActiveEvent::from_alert(alert) };
            tracing::info!(
                event_id = %existing.id,
                magnitude = existing.magnitude,
                version = existing.version,
                "Event updated"
            );
            return AlertOutcome::Updated;
        }

        let event = ActiveEvent::from_alert(alert);
        tracing::info!(
            event_id = %event.id,
            latitude = event.latitude,
            longitude = event.longitude,
            depth_km = event.depth_km,
            magnitude = event.magnitude,
            "New event"
        );
        self.events.push(event);
        AlertOutcome::New
    }

    /// Expire events older than the processing-time budget.
    pub fn tick(&mut self, now: f64) -> Vec<ActiveEvent> {
        let budget = self.processing_time;
        let (expired, active): (Vec<_>, Vec<_>) =
            self.events.drain(..).partition(|e| e.age(now) > budget);
        self.events = active;
        for event in &expired {
            tracing::info!(event_id = %event.id, age_s = event.age(now), "Event expired");
        }
        expired
    }

    /// Remove an event immediately. Removing an absent id is a no-op.
    pub fn cancel(&mut self, id: &str) -> Option<ActiveEvent> {
        let position = self.events.iter().position(|e| e.matches(id))?;
        let event = self.events.remove(position);
        tracing::info!(event_id = %event.id, "Event cancelled");
        Some(event)
    }

    pub fn get(&self, id: &str) -> Option<&ActiveEvent> {
        self.events.iter().find(|e| e.matches(id))
    }

    pub fn active(&self) -> &[ActiveEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
