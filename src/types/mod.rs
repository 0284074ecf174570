//! Shared data structures for the geodetic early-warning pipeline
//!
//! This module defines the core types passed between stages:
//! - Stage 1: SiteKey / Component (wire message addressing)
//! - Stage 2: SiteMetadata (static station description)
//! - Stage 3: AlertMessage / ActiveEvent (event registry)
//! - Stage 4: PeakDisplacementObservation / OffsetObservation (windowed features)
//! - Stage 5: PgdResult / CmtResult / FfResult (inversion outputs)

mod site;
mod event;
mod observations;
mod results;

pub use site::*;
pub use event::*;
pub use observations::*;
pub use results::*;
