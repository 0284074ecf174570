//! Processing Pipeline Module
//!
//! ```text
//! TraceSource ──► WireDecoder ──► BufferRouter ──► SiteBuffer(s)
//!                                                      │
//! AlertTransport ──► EventRegistry ──► per event: PGD → CMT → FF
//!                                                      │
//!                                   ArchiveSink ◄──────┴──► AlertTransport
//! ```
//!
//! The [`Scheduler`] owns every buffer and runs the stages in order on a
//! single task; sources, transports, archive and clock are injected.

pub mod clock;
pub mod scheduler;
pub mod source;
pub mod transport;

pub use clock::{Clock, ManualClock, ReplayClock, SystemClock};
pub use scheduler::{LogContext, Scheduler, SchedulerError, SchedulerStats};
pub use source::{ChannelTraceSource, ReplaySource, TcpTraceSource, TraceSource};
pub use transport::{parse_alert_lines, AlertTransport, ChannelTransport, JsonLinesTransport, PublishedMessage};
