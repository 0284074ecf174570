//! Tracebuf TCP client
//!
//! Reads fixed-size (`MAX_TRACEBUF_SIZE`) trace frames from a TCP export.
//! Connection loss is handled with a bounded reconnect policy: a fixed delay
//! between attempts and a maximum attempt count, after which the client
//! reports `ReconnectExhausted` and the caller treats it as fatal.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::tracebuf::MAX_TRACEBUF_SIZE;
use crate::config::defaults::{TCP_CONNECT_TIMEOUT_SECS, TCP_KEEPALIVE_SECS};
use crate::config::TransportConfig;

/// Transport errors shared by the trace and alert collaborators
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport terminated by peer or operator")]
    Terminated,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Reconnection exhausted after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("Malformed transport payload: {0}")]
    Payload(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Errors that must end the scheduler loop
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Terminated | Self::ReconnectExhausted { .. })
    }
}

/// Bounded reconnect policy (fixed inter-attempt delay)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&TransportConfig::default())
    }
}

impl From<&TransportConfig> for ReconnectPolicy {
    fn from(config: &TransportConfig) -> Self {
        Self {
            max_attempts: config.max_reconnect_attempts,
            delay: Duration::from_millis(config.reconnect_delay_ms),
        }
    }
}

/// Connection statistics
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct TraceClientStats {
    pub connected: bool,
    pub frames_received: u64,
    pub reconnections: u64,
}

/// TCP client yielding whole tracebuf frames.
pub struct TraceClient {
    address: String,
    stream: Option<TcpStream>,
    policy: ReconnectPolicy,
    /// Partial frame carried across reads
    pending: Vec<u8>,
    frames_received: u64,
    reconnections: u64,
}

impl TraceClient {
    pub fn new(address: &str, policy: ReconnectPolicy) -> Self {
        Self {
            address: address.to_string(),
            stream: None,
            policy,
            pending: Vec::with_capacity(MAX_TRACEBUF_SIZE),
            frames_received: 0,
            reconnections: 0,
        }
    }

    /// Connect with a bounded timeout and TCP keepalive.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        if self.stream.is_some() {
            return Ok(());
        }
        tracing::info!(address = %self.address, "Connecting to trace export");

        let stream = tokio::time::timeout(Duration::from_secs(TCP_CONNECT_TIMEOUT_SECS), TcpStream::connect(&self.address))
            .await
            .map_err(|_| TransportError::ConnectionFailed("connect timed out".to_string()))?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let sock_ref = socket2::SockRef::from(&stream);
        let keepalive = socket2::TcpKeepalive::new()
            .with_time(Duration::from_secs(TCP_KEEPALIVE_SECS))
            .with_interval(Duration::from_secs(10));
        let _ = sock_ref.set_tcp_keepalive(&keepalive);

        self.stream = Some(stream);
        self.pending.clear();
        tracing::info!(address = %self.address, "Trace export connected");
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.pending.clear();
    }

    /// Reconnect with a fixed delay, up to `max_attempts` times.
    pub async fn reconnect(&mut self) -> Result<(), TransportError> {
        self.disconnect().await;

        for attempt in 1..=self.policy.max_attempts {
            tracing::warn!(
                attempt = attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = self.policy.delay.as_millis() as u64,
                "Trace export reconnecting"
            );
            tokio::time::sleep(self.policy.delay).await;

            match self.connect().await {
                Ok(()) => {
                    self.reconnections += 1;
                    return Ok(());
                }
                Err(e) => tracing::warn!(attempt = attempt, error = %e, "Reconnection attempt failed"),
            }
        }

        tracing::error!(max_attempts = self.policy.max_attempts, "Trace export reconnection exhausted");
        Err(TransportError::ReconnectExhausted { attempts: self.policy.max_attempts })
    }

    /// Read whatever whole frames arrive within `timeout`.
    ///
    /// An empty result is normal. A closed or failed connection triggers the
    /// reconnect policy.
    pub async fn read_frames(&mut self, timeout: Duration) -> Result<Vec<Vec<u8>>, TransportError> {
        if self.stream.is_none() {
            if let Err(e) = self.connect().await {
                tracing::warn!(error = %e, "Connect failed");
                self.reconnect().await?;
            }
        }

        let mut chunk = vec![0u8; MAX_TRACEBUF_SIZE * 4];
        let read = match self.stream.as_mut() {
            Some(stream) => tokio::time::timeout(timeout, stream.read(&mut chunk)).await,
            None => return Err(TransportError::ConnectionFailed("not connected".to_string())),
        };

        match read {
            Err(_) => Ok(Vec::new()),
            Ok(Ok(0)) => {
                tracing::warn!("Trace export closed the connection");
                self.reconnect().await?;
                Ok(Vec::new())
            }
            Ok(Ok(n)) => {
                self.pending.extend_from_slice(&chunk[..n]);
                Ok(self.take_frames())
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Trace export read failed");
                self.reconnect().await?;
                Ok(Vec::new())
            }
        }
    }

    /// Split whole frames off the pending buffer.
    fn take_frames(&mut self) -> Vec<Vec<u8>> {
        let whole = self.pending.len() / MAX_TRACEBUF_SIZE;
        let frames: Vec<Vec<u8>> = self.pending[..whole * MAX_TRACEBUF_SIZE]
            .chunks_exact(MAX_TRACEBUF_SIZE)
            .map(<[u8]>::to_vec)
            .collect();
        self.pending.drain(..whole * MAX_TRACEBUF_SIZE);
        self.frames_received += frames.len() as u64;
        frames
    }

    pub fn stats(&self) -> TraceClientStats {
        TraceClientStats {
            connected: self.stream.is_some(),
            frames_received: self.frames_received,
            reconnections: self.reconnections,
        }
    }
}
