//! Inversion result types
//!
//! Every result carries one entry per grid point (`len(estimates) == len(grid)`)
//! plus the index of the optimum. Results are superseded by the next iteration,
//! never merged.

use serde::{Deserialize, Serialize};

/// Which inversion produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Pgd,
    Cmt,
    Ff,
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pgd => write!(f, "PGD"),
            Self::Cmt => write!(f, "CMT"),
            Self::Ff => write!(f, "FF"),
        }
    }
}

/// Peak-displacement magnitude scaling over a depth grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PgdResult {
    pub depths_km: Vec<f64>,
    /// Magnitude estimate per depth
    pub magnitudes: Vec<f64>,
    pub variance_reduction: Vec<f64>,
    /// Effective solver rank per depth
    pub ranks: Vec<usize>,
    pub optimum: usize,
    /// Sites that contributed rows
    pub sites_used: usize,
}

impl PgdResult {
    pub fn magnitude(&self) -> f64 {
        self.magnitudes[self.optimum]
    }

    pub fn depth_km(&self) -> f64 {
        self.depths_km[self.optimum]
    }
}

/// Moment tensor in the local east/north/up frame (N·m).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MomentTensor {
    pub mee: f64,
    pub mnn: f64,
    pub muu: f64,
    pub men: f64,
    pub meu: f64,
    pub mnu: f64,
}

impl MomentTensor {
    /// Deviatoric tensor from the five solved components.
    pub fn from_deviatoric(mee: f64, mnn: f64, men: f64, meu: f64, mnu: f64) -> Self {
        Self { mee, mnn, muu: -(mee + mnn), men, meu, mnu }
    }

    /// Harvard (r, t, p) convention: `[Mrr, Mtt, Mpp, Mrt, Mrp, Mtp]`.
    pub fn to_harvard(&self) -> [f64; 6] {
        [self.muu, self.mnn, self.mee, -self.mnu, self.meu, -self.men]
    }

    /// Full symmetric 3x3 in east/north/up order.
    pub fn to_matrix(&self) -> [[f64; 3]; 3] {
        [
            [self.mee, self.men, self.meu],
            [self.men, self.mnn, self.mnu],
            [self.meu, self.mnu, self.muu],
        ]
    }
}

/// Strike/dip/rake in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodalPlane {
    pub strike: f64,
    pub dip: f64,
    pub rake: f64,
}

/// Post-processed moment tensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Decomposition {
    pub scalar_moment: f64,
    pub magnitude: f64,
    pub double_couple_pct: f64,
    pub planes: [NodalPlane; 2],
}

/// Centroid moment tensor search over depth x lat x lon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CmtResult {
    pub depths_km: Vec<f64>,
    pub latitudes: Vec<f64>,
    pub longitudes: Vec<f64>,
    pub tensors: Vec<MomentTensor>,
    pub variance_reduction: Vec<f64>,
    pub ranks: Vec<usize>,
    pub optimum: usize,
    /// Decomposition of the optimum
    pub decomposition: Decomposition,
    /// Decomposition of every grid point, when requested
    pub all_decompositions: Option<Vec<Option<Decomposition>>>,
    pub sites_used: usize,
}

impl CmtResult {
    pub fn magnitude(&self) -> f64 {
        self.decomposition.magnitude
    }

    /// (depth, lat, lon) of grid point `index`
    pub fn location(&self, index: usize) -> (f64, f64, f64) {
        let nlon = self.longitudes.len().max(1);
        let nlat = self.latitudes.len().max(1);
        let ilon = index % nlon;
        let ilat = (index / nlon) % nlat;
        let idep = index / (nlon * nlat);
        (self.depths_km[idep], self.latitudes[ilat], self.longitudes[ilon])
    }
}

/// One rectangular fault patch with its solved slip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultPatch {
    /// Patch centre
    pub latitude: f64,
    pub longitude: f64,
    pub depth_km: f64,
    pub length_km: f64,
    pub width_km: f64,
    pub strike: f64,
    pub dip: f64,
    /// Strike-slip and dip-slip components (m)
    pub slip_strike: f64,
    pub slip_dip: f64,
}

impl FaultPatch {
    pub fn slip(&self) -> f64 {
        self.slip_strike.hypot(self.slip_dip)
    }

    pub fn rake(&self) -> f64 {
        self.slip_dip.atan2(self.slip_strike).to_degrees()
    }
}

/// Slip model on one candidate fault plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultPlaneSolution {
    pub strike: f64,
    pub dip: f64,
    pub patches: Vec<FaultPatch>,
    pub moment: f64,
    pub magnitude: f64,
}

/// Finite-fault result over the candidate planes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FfResult {
    pub planes: Vec<FaultPlaneSolution>,
    pub variance_reduction: Vec<f64>,
    pub ranks: Vec<usize>,
    pub optimum: usize,
    pub nstr: usize,
    pub ndip: usize,
    pub sites_used: usize,
}

impl FfResult {
    pub fn best(&self) -> &FaultPlaneSolution {
        &self.planes[self.optimum]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deviatoric_trace_free() {
        let m = MomentTensor::from_deviatoric(1.0, 2.0, 0.5, 0.1, -0.2);
        assert_eq!(m.mee + m.mnn + m.muu, 0.0);
        let h = m.to_harvard();
        assert_eq!(h[0], -3.0);
        assert_eq!(h[3], 0.2);
        assert_eq!(h[5], -0.5);
    }

    #[test]
    fn test_cmt_location_indexing() {
        let result = CmtResult {
            depths_km: vec![5.0, 10.0],
            latitudes: vec![34.0, 34.1, 34.2],
            longitudes: vec![-118.0, -117.9],
            tensors: vec![MomentTensor::default(); 12],
            variance_reduction: vec![0.0; 12],
            ranks: vec![5; 12],
            optimum: 0,
            decomposition: Decomposition {
                scalar_moment: 0.0,
                magnitude: 0.0,
                double_couple_pct: 0.0,
                planes: [NodalPlane { strike: 0.0, dip: 0.0, rake: 0.0 }; 2],
            },
            all_decompositions: None,
            sites_used: 0,
        };
        // (idep * nlat + ilat) * nlon + ilon
        assert_eq!(result.location(11), (10.0, 34.2, -117.9));
        assert_eq!(result.location(3), (5.0, 34.1, -117.9));
    }
}
