//! Alert transport collaborators
//!
//! Inbound: alert messages (new or updated hypocentres) and cancellations.
//! Outbound: the per-iteration event message.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;

use super::clock::Clock;
use crate::acquisition::TransportError;
use crate::types::{AlertCommand, AlertMessage};

/// Bidirectional alert transport.
///
/// `poll_alert` returning `Ok(None)` means nothing arrived within the
/// timeout, which is distinct from a transport error.
#[async_trait]
pub trait AlertTransport: Send {
    async fn poll_alert(&mut self, timeout: Duration) -> Result<Option<AlertCommand>, TransportError>;

    async fn publish(&mut self, event_id: &str, message: &[u8]) -> Result<(), TransportError>;

    fn transport_name(&self) -> &str;
}

/// An outbound message as seen by in-process consumers
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub event_id: String,
    pub payload: Vec<u8>,
}

// ============================================================================
// Channel Transport
// ============================================================================

/// In-process transport over tokio channels.
///
/// A closed inbound channel is a terminate signal. A closed outbound channel
/// only fails the publish.
pub struct ChannelTransport {
    inbound: mpsc::Receiver<AlertCommand>,
    outbound: mpsc::Sender<PublishedMessage>,
}

impl ChannelTransport {
    pub fn new(inbound: mpsc::Receiver<AlertCommand>, outbound: mpsc::Sender<PublishedMessage>) -> Self {
        Self { inbound, outbound }
    }
}

#[async_trait]
impl AlertTransport for ChannelTransport {
    async fn poll_alert(&mut self, timeout: Duration) -> Result<Option<AlertCommand>, TransportError> {
        match tokio::time::timeout(timeout, self.inbound.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(command)) => Ok(Some(command)),
            Ok(None) => Err(TransportError::Terminated),
        }
    }

    async fn publish(&mut self, event_id: &str, message: &[u8]) -> Result<(), TransportError> {
        self.outbound
            .send(PublishedMessage { event_id: event_id.to_string(), payload: message.to_vec() })
            .await
            .map_err(|_| TransportError::ConnectionFailed("publish channel closed".to_string()))
    }

    fn transport_name(&self) -> &str {
        "channel"
    }
}

// ============================================================================
// JSON-lines Transport (replay)
// ============================================================================

/// One line of an alert replay file
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AlertLine {
    Cancel {
        cancel: String,
        /// Release time; defaults to immediately
        #[serde(default)]
        at: f64,
    },
    Alert(AlertMessage),
}

impl AlertLine {
    fn into_scheduled(self) -> (f64, AlertCommand) {
        match self {
            Self::Cancel { cancel, at } => (at, AlertCommand::Cancel(cancel)),
            Self::Alert(alert) => (alert.origin_time, AlertCommand::Alert(alert)),
        }
    }
}

/// Parse a JSON-lines alert document.
///
/// Blank lines and `#` comments are skipped; anything else that fails to
/// parse is a payload error naming the line.
pub fn parse_alert_lines(text: &str) -> Result<Vec<(f64, AlertCommand)>, TransportError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(i, line)| {
            serde_json::from_str::<AlertLine>(line)
                .map(AlertLine::into_scheduled)
                .map_err(|e| TransportError::Payload(format!("alert line {}: {}", i + 1, e)))
        })
        .collect()
}

/// Replays alerts from a JSON-lines file and writes published messages to
/// a directory.
///
/// Lines are released in file order, each once the clock reaches its time
/// (origin time for alerts, `at` for cancellations).
pub struct JsonLinesTransport {
    pending: VecDeque<(f64, AlertCommand)>,
    clock: Arc<dyn Clock>,
    publish_dir: Option<PathBuf>,
    published: u64,
}

impl JsonLinesTransport {
    pub fn new(commands: Vec<(f64, AlertCommand)>, clock: Arc<dyn Clock>, publish_dir: Option<PathBuf>) -> Self {
        Self { pending: commands.into(), clock, publish_dir, published: 0 }
    }

    pub fn open(path: &Path, clock: Arc<dyn Clock>, publish_dir: Option<PathBuf>) -> Result<Self, TransportError> {
        let text = std::fs::read_to_string(path)?;
        let commands = parse_alert_lines(&text)?;
        tracing::info!(path = %path.display(), alerts = commands.len(), "Alert replay loaded");
        Ok(Self::new(commands, clock, publish_dir))
    }

    pub fn published(&self) -> u64 {
        self.published
    }
}

#[async_trait]
impl AlertTransport for JsonLinesTransport {
    async fn poll_alert(&mut self, _timeout: Duration) -> Result<Option<AlertCommand>, TransportError> {
        let now = self.clock.now();
        match self.pending.front() {
            Some((release, _)) if *release <= now => Ok(self.pending.pop_front().map(|(_, command)| command)),
            _ => Ok(None),
        }
    }

    async fn publish(&mut self, event_id: &str, message: &[u8]) -> Result<(), TransportError> {
        self.published += 1;
        let Some(dir) = &self.publish_dir else {
            tracing::debug!(event_id = %event_id, bytes = message.len(), "Publish (no output directory)");
            return Ok(());
        };
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{}_{:05}.json", event_id, self.published));
        tokio::fs::write(&path, message).await?;
        tracing::debug!(event_id = %event_id, path = %path.display(), "Published event message");
        Ok(())
    }

    fn transport_name(&self) -> &str {
        "json-lines"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::clock::ManualClock;

    const LINES: &str = r#"
# replay
{"event_id": "ev1", "latitude": 38.3, "longitude": 142.4, "depth_km": 24.0, "magnitude": 7.0, "origin_time": 100.0}
{"event_id": "ev1", "latitude": 38.3, "longitude": 142.4, "depth_km": 20.0, "magnitude": 7.5, "origin_time": 100.0, "version": 1}
{"cancel": "EV1", "at": 150.0}
"#;

    #[test]
    fn test_parse_alert_lines() {
        let commands = parse_alert_lines(LINES).unwrap();
        assert_eq!(commands.len(), 3);
        assert!(matches!(&commands[1].1, AlertCommand::Alert(a) if a.version == 1 && a.magnitude == 7.5));
        assert_eq!(commands[2], (150.0, AlertCommand::Cancel("EV1".to_string())));
    }

    #[test]
    fn test_bad_line_is_payload_error() {
        let err = parse_alert_lines("{\"event_id\": 3}\n").unwrap_err();
        assert!(matches!(err, TransportError::Payload(msg) if msg.starts_with("alert line 1")));
    }

    #[tokio::test]
    async fn test_json_lines_release_order() {
        let clock = Arc::new(ManualClock::new(50.0));
        let mut transport = JsonLinesTransport::new(parse_alert_lines(LINES).unwrap(), clock.clone(), None);
        assert!(transport.poll_alert(Duration::ZERO).await.unwrap().is_none());

        clock.set(120.0);
        assert!(matches!(transport.poll_alert(Duration::ZERO).await.unwrap(), Some(AlertCommand::Alert(_))));
        assert!(matches!(transport.poll_alert(Duration::ZERO).await.unwrap(), Some(AlertCommand::Alert(_))));
        assert!(transport.poll_alert(Duration::ZERO).await.unwrap().is_none());

        clock.set(150.0);
        assert!(matches!(transport.poll_alert(Duration::ZERO).await.unwrap(), Some(AlertCommand::Cancel(_))));
    }

    #[tokio::test]
    async fn test_publish_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(0.0));
        let mut transport = JsonLinesTransport::new(Vec::new(), clock, Some(dir.path().join("out")));
        transport.publish("ev1", b"{}").await.unwrap();
        transport.publish("ev1", b"{\"a\":1}").await.unwrap();
        assert_eq!(transport.published(), 2);
        let second = std::fs::read(dir.path().join("out").join("ev1_00002.json")).unwrap();
        assert_eq!(second, b"{\"a\":1}");
    }

    #[tokio::test]
    async fn test_channel_transport_terminates_on_close() {
        let (tx, rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let mut transport = ChannelTransport::new(rx, out_tx);

        transport.publish("ev1", b"x").await.unwrap();
        assert_eq!(out_rx.recv().await.unwrap().event_id, "ev1");

        tx.send(AlertCommand::Cancel("ev1".to_string())).await.unwrap();
        assert!(transport.poll_alert(Duration::from_millis(5)).await.unwrap().is_some());
        drop(tx);
        assert!(transport.poll_alert(Duration::from_millis(5)).await.unwrap_err().is_fatal());
    }
}
