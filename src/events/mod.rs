//! Event lifecycle tracking

pub mod registry;

pub use registry::{AlertOutcome, EventRegistry};
