//! Alert and active-event types

use serde::{Deserialize, Serialize};

/// Inbound event announcement from the external alerting feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
    pub event_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub depth_km: f64,
    pub magnitude: f64,
    /// Origin time (UTC epoch seconds)
    pub origin_time: f64,
    #[serde(default)]
    pub version: u32,
}

/// Commands delivered by the alert transport.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertCommand {
    Alert(AlertMessage),
    Cancel(String),
}

/// An event currently being processed.
///
/// Identifiers compare case-insensitively; see [`ActiveEvent::matches`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveEvent {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub depth_km: f64,
    pub magnitude: f64,
    pub origin_time: f64,
    pub version: u32,
}

impl ActiveEvent {
    pub fn from_alert(alert: &AlertMessage) -> Self {
        Self {
            id: alert.event_id.clone(),
            latitude: alert.latitude,
            longitude: alert.longitude,
            depth_km: alert.depth_km,
            magnitude: alert.magnitude,
            origin_time: alert.origin_time,
            version: alert.version,
        }
    }

    /// Case-insensitive identifier comparison.
    pub fn matches(&self, id: &str) -> bool {
        self.id.eq_ignore_ascii_case(id)
    }

    /// Seconds since origin at `now`.
    pub fn age(&self, now: f64) -> f64 {
        now - self.origin_time
    }
}
