//! Per-site features extracted from the displacement buffers

use serde::{Deserialize, Serialize};

use super::SiteKey;

/// Peak horizontal displacement at one site for one event iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakDisplacementObservation {
    pub site: SiteKey,
    pub latitude: f64,
    pub longitude: f64,
    /// Peak horizontal displacement (m)
    pub pgd: f64,
    /// Externally supplied weight, combined with the distance taper
    pub weight: Option<f64>,
    /// False when masked or when the window holds no usable data
    pub usable: bool,
}

/// Static offset (north, east, up) at one site for one event iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffsetObservation {
    pub site: SiteKey,
    pub latitude: f64,
    pub longitude: f64,
    /// Offsets (m) in row order north, east, up
    pub offset: [f64; 3],
    /// Per-component weights in row order north, east, up
    pub weights: [Option<f64>; 3],
    pub usable: bool,
}

impl OffsetObservation {
    pub fn north(&self) -> f64 {
        self.offset[0]
    }

    pub fn east(&self) -> f64 {
        self.offset[1]
    }

    pub fn up(&self) -> f64 {
        self.offset[2]
    }
}
