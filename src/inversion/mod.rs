//! Grid-search source inversions
//!
//! [`grid_search`] holds the shared weighted least-squares engine. The
//! three drivers bind it to their forward models:
//! - [`pgd`]: magnitude from peak displacement scaling over a depth grid
//! - [`cmt`]: deviatoric moment tensor over depth (× lat × lon)
//! - [`ff`]: distributed slip on candidate fault planes

pub mod cmt;
pub mod decompose;
pub mod ff;
pub mod geo;
pub mod greens;
pub mod grid_search;
pub mod okada;
pub mod pgd;

pub use cmt::{invert_cmt, CmtGrid};
pub use decompose::{decompose, moment_magnitude, scalar_moment};
pub use ff::{fault_dimensions, invert_ff, FaultPlane};
pub use grid_search::{GridModel, GridPointFit, GridSearchResult, GridSearchSolver, InversionError};
pub use pgd::{invert_pgd, predict_pgd};
