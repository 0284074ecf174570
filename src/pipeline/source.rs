//! Trace source abstraction for wire message ingestion.
//!
//! Provides a unified trait for reading raw tracebuf frames from different
//! sources: a replay file, a TCP export, and an in-process channel.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::clock::Clock;
use crate::acquisition::tracebuf::{parse_header, MAX_TRACEBUF_SIZE};
use crate::acquisition::{ReconnectPolicy, TraceClient, TransportError};

/// Trait abstracting where wire messages come from.
///
/// `read_batch` waits at most `timeout` and may return an empty batch;
/// "no data" is never an error. An `Err` that `is_fatal()` ends the
/// scheduler.
#[async_trait]
pub trait TraceSource: Send {
    async fn read_batch(&mut self, timeout: Duration) -> Result<Vec<Vec<u8>>, TransportError>;

    /// Human-readable name for logging (e.g. "replay", "tcp").
    fn source_name(&self) -> &str;
}

// ============================================================================
// Replay Source (file of concatenated frames)
// ============================================================================

/// Replays a file of concatenated `MAX_TRACEBUF_SIZE` frames.
///
/// A frame is released once the clock has passed its last sample, so the
/// buffer window never sees data from the future. Frames whose header cannot
/// be parsed, or whose end time is not finite, are released immediately and
/// left to the decoder.
pub struct ReplaySource {
    /// (release time, frame), ascending
    frames: std::collections::VecDeque<(f64, Vec<u8>)>,
    clock: Arc<dyn Clock>,
    max_batch: usize,
}

impl ReplaySource {
    pub fn new(bytes: &[u8], clock: Arc<dyn Clock>, max_batch: usize) -> Self {
        if bytes.len() % MAX_TRACEBUF_SIZE != 0 {
            tracing::warn!(
                bytes = bytes.len(),
                trailing = bytes.len() % MAX_TRACEBUF_SIZE,
                "Replay file has a partial trailing frame, ignoring it"
            );
        }
        let mut frames: Vec<(f64, Vec<u8>)> = bytes
            .chunks_exact(MAX_TRACEBUF_SIZE)
            .map(|frame| {
                let release = parse_header(frame)
                    .ok()
                    .map(|h| h.end_time)
                    .filter(|t| t.is_finite())
                    .unwrap_or(f64::NEG_INFINITY);
                (release, frame.to_vec())
            })
            .collect();
        frames.sort_by(|a, b| a.0.total_cmp(&b.0));
        tracing::info!(frames = frames.len(), "Replay source loaded");
        Self { frames: frames.into(), clock, max_batch }
    }

    /// Load a replay file from disk.
    pub fn open(path: &Path, clock: Arc<dyn Clock>, max_batch: usize) -> Result<Self, TransportError> {
        let bytes = std::fs::read(path)?;
        Ok(Self::new(&bytes, clock, max_batch))
    }

    /// Earliest sample time in a replay file; a natural replay clock start.
    pub fn first_sample_time(bytes: &[u8]) -> Option<f64> {
        bytes
            .chunks_exact(MAX_TRACEBUF_SIZE)
            .filter_map(|frame| parse_header(frame).ok())
            .map(|h| h.start_time)
            .min_by(f64::total_cmp)
    }

    /// Earliest release time still pending
    pub fn next_release(&self) -> Option<f64> {
        self.frames.front().map(|(t, _)| *t)
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

#[async_trait]
impl TraceSource for ReplaySource {
    async fn read_batch(&mut self, _timeout: Duration) -> Result<Vec<Vec<u8>>, TransportError> {
        let now = self.clock.now();
        let mut batch = Vec::new();
        while batch.len() < self.max_batch {
            match self.frames.front() {
                Some((release, _)) if *release <= now => {
                    if let Some((_, frame)) = self.frames.pop_front() {
                        batch.push(frame);
                    }
                }
                _ => break,
            }
        }
        Ok(batch)
    }

    fn source_name(&self) -> &str {
        "replay"
    }
}

// ============================================================================
// TCP Source
// ============================================================================

/// Reads frames from a tracebuf TCP export.
///
/// Wraps [`TraceClient`] which handles reconnection internally; an error
/// from it means the reconnect policy is exhausted.
pub struct TcpTraceSource {
    client: TraceClient,
}

impl TcpTraceSource {
    /// Connect and return a ready source.
    pub async fn connect(address: &str, policy: ReconnectPolicy) -> Result<Self, TransportError> {
        let mut client = TraceClient::new(address, policy);
        if let Err(e) = client.connect().await {
            tracing::warn!(address = %address, error = %e, "Initial connect failed");
            client.reconnect().await?;
        }
        Ok(Self { client })
    }
}

#[async_trait]
impl TraceSource for TcpTraceSource {
    async fn read_batch(&mut self, timeout: Duration) -> Result<Vec<Vec<u8>>, TransportError> {
        self.client.read_frames(timeout).await
    }

    fn source_name(&self) -> &str {
        "tcp"
    }
}

// ============================================================================
// Channel Source
// ============================================================================

/// Frames pushed from elsewhere in the process.
///
/// A closed channel is a terminate signal.
pub struct ChannelTraceSource {
    rx: mpsc::Receiver<Vec<u8>>,
    max_batch: usize,
}

impl ChannelTraceSource {
    pub fn new(rx: mpsc::Receiver<Vec<u8>>, max_batch: usize) -> Self {
        Self { rx, max_batch }
    }
}

#[async_trait]
impl TraceSource for ChannelTraceSource {
    async fn read_batch(&mut self, timeout: Duration) -> Result<Vec<Vec<u8>>, TransportError> {
        let first = match tokio::time::timeout(timeout, self.rx.recv()).await {
            Err(_) => return Ok(Vec::new()),
            Ok(None) => return Err(TransportError::Terminated),
            Ok(Some(frame)) => frame,
        };
        let mut batch = vec![first];
        while batch.len() < self.max_batch {
            match self.rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }
        Ok(batch)
    }

    fn source_name(&self) -> &str {
        "channel"
    }
}
