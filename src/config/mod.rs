//! GFAST Configuration Module
//!
//! Buffer horizon, inversion grids and transport settings loaded from TOML.
//!
//! ## Loading Order
//!
//! 1. `GFAST_CONFIG` environment variable (path to TOML file)
//! 2. `gfast.toml` in the current working directory
//! 3. Built-in defaults
//!
//! The loaded config is shared as `Arc<GfastConfig>`; there is no global.

mod gfast_config;
pub mod defaults;
pub mod validation;

pub use gfast_config::*;
