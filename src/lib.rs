//! GFAST: Geodetic First Approximation of Size and Timing
//!
//! Real-time GPS displacement processing for earthquake early warning.
//!
//! ## Architecture
//!
//! - **Acquisition**: tracebuf wire decoding, site routing, TCP ingest
//! - **Buffer**: per-site sliding displacement windows and feature extraction
//! - **Events**: active-event registry driven by the alert feed
//! - **Inversion**: weighted least-squares grid search shared by the PGD,
//!   CMT and finite-fault models
//! - **Pipeline**: the paced scheduler tying the stages together
//! - **Storage**: per-iteration archive

pub mod acquisition;
pub mod buffer;
pub mod config;
pub mod events;
pub mod inversion;
pub mod messages;
pub mod pipeline;
pub mod sites;
pub mod storage;
pub mod types;

// Re-export configuration
pub use config::{ConfigError, GfastConfig};

// Re-export commonly used types
pub use types::{
    ActiveEvent, AlertCommand, AlertMessage, CmtResult, Component, FfResult, ModelKind,
    OffsetObservation, PeakDisplacementObservation, PgdResult, SiteKey, SiteMetadata,
};

// Re-export pipeline entry points
pub use pipeline::{Scheduler, SchedulerError, SchedulerStats};

// Re-export storage
pub use storage::{ArchiveError, ArchiveSink, InMemoryArchive, SledArchive};
