//! System-wide constants with no operator meaning.
//!
//! Grouped by subsystem for easy discovery.

// ============================================================================
// Configuration
// ============================================================================

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "GFAST_CONFIG";

/// Config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "gfast.toml";

// ============================================================================
// Transport
// ============================================================================

/// TCP connect timeout for the trace feed (seconds).
pub const TCP_CONNECT_TIMEOUT_SECS: u64 = 30;

/// TCP keepalive idle time before probes start (seconds).
pub const TCP_KEEPALIVE_SECS: u64 = 60;

// ============================================================================
// Scheduler
// ============================================================================

/// An iteration longer than this multiple of `wait_time` is an overrun.
pub const OVERRUN_FACTOR: f64 = 2.0;

/// Upper bound on alerts drained in one iteration.
pub const MAX_ALERTS_PER_ITERATION: usize = 64;

// ============================================================================
// Archive
// ============================================================================

/// Key suffix for the per-event site metadata record.
pub const SITES_RECORD: &str = "sites";
