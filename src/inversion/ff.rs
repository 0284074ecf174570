//! Finite-fault slip inversion
//!
//! For each candidate plane (strike, dip) a fault of magnitude-scaled size
//! is centred on the hypocentre and split into `nstr × ndip` patches. Each
//! patch contributes a strike-slip and a dip-slip column computed with the
//! Okada rectangular dislocation. A Laplacian smoothing block is appended
//! below the weighted data rows.

use nalgebra::{DMatrix, DVector, Vector3};
use serde::{Deserialize, Serialize};

use super::decompose::moment_magnitude;
use super::geo;
use super::grid_search::{GridModel, GridSearchSolver, InversionError};
use super::okada::{unit_displacements, RectangularFault};
use crate::config::FfConfig;
use crate::types::{ActiveEvent, FaultPatch, FaultPlaneSolution, FfResult, ModelKind, OffsetObservation};

/// Candidate orientation for the finite-fault search
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaultPlane {
    pub strike: f64,
    pub dip: f64,
}

/// Fault length and width (km) for a magnitude.
pub fn fault_dimensions(config: &FfConfig, magnitude: f64) -> (f64, f64) {
    let length = 10f64.powf(config.length_a + config.length_b * magnitude);
    let width = 10f64.powf(config.width_a + config.width_b * magnitude);
    (length, width)
}

/// Patch centres in the local frame (east km, north km, depth km).
#[derive(Debug, Clone)]
struct PlaneGeometry {
    plane: FaultPlane,
    patch_length: f64,
    patch_width: f64,
    centres: Vec<Vector3<f64>>,
}

impl PlaneGeometry {
    fn new(plane: FaultPlane, hypocentre_depth: f64, length: f64, width: f64, nstr: usize, ndip: usize) -> Self {
        let (sin_s, cos_s) = plane.strike.to_radians().sin_cos();
        let (sin_d, cos_d) = plane.dip.to_radians().sin_cos();
        // (east, north, depth); depth grows down dip
        let along_strike = Vector3::new(sin_s, cos_s, 0.0);
        let down_dip = Vector3::new(cos_s * cos_d, -sin_s * cos_d, sin_d);

        let mut centre = Vector3::new(0.0, 0.0, hypocentre_depth);
        let top = hypocentre_depth - width / 2.0 * sin_d;
        if top < 0.0 && sin_d > f64::EPSILON {
            centre += down_dip * (-top / sin_d);
        }

        let patch_length = length / nstr as f64;
        let patch_width = width / ndip as f64;
        let mut centres = Vec::with_capacity(nstr * ndip);
        for j in 0..ndip {
            for i in 0..nstr {
                let a = (i as f64 + 0.5) * patch_length - length / 2.0;
                let b = (j as f64 + 0.5) * patch_width - width / 2.0;
                centres.push(centre + along_strike * a + down_dip * b);
            }
        }
        Self { plane, patch_length, patch_width, centres }
    }

    fn patch(&self, index: usize) -> RectangularFault {
        RectangularFault {
            depth: self.centres[index].z,
            strike: self.plane.strike,
            dip: self.plane.dip,
            length: self.patch_length,
            width: self.patch_width,
        }
    }
}

/// Second-difference operator over the patch grid, per slip component.
pub fn laplacian(nstr: usize, ndip: usize) -> DMatrix<f64> {
    let n = nstr * ndip;
    let mut lap = DMatrix::zeros(2 * n, 2 * n);
    for j in 0..ndip {
        for i in 0..nstr {
            let p = j * nstr + i;
            let mut neighbours = Vec::with_capacity(4);
            if i > 0 {
                neighbours.push(p - 1);
            }
            if i + 1 < nstr {
                neighbours.push(p + 1);
            }
            if j > 0 {
                neighbours.push(p - nstr);
            }
            if j + 1 < ndip {
                neighbours.push(p + nstr);
            }
            for c in 0..2 {
                let row = 2 * p + c;
                lap[(row, 2 * p + c)] = 4.0;
                for &q in &neighbours {
                    lap[(row, 2 * q + c)] = -1.0;
                }
            }
        }
    }
    lap
}

struct FfModel<'a> {
    config: &'a FfConfig,
    planes: Vec<PlaneGeometry>,
    /// Site (east, north) km relative to the hypocentre
    site_positions: Vec<(f64, f64)>,
    sites: Vec<&'a OffsetObservation>,
    smoothing: DMatrix<f64>,
}

impl GridModel for FfModel<'_> {
    fn grid_len(&self) -> usize {
        self.planes.len()
    }

    fn n_params(&self) -> usize {
        2 * self.config.nstr * self.config.ndip
    }

    fn forward(&self, point: usize) -> DMatrix<f64> {
        let geometry = &self.planes[point];
        let mut g = DMatrix::zeros(3 * self.sites.len(), self.n_params());
        for (k, &(east, north)) in self.site_positions.iter().enumerate() {
            for (p, centre) in geometry.centres.iter().enumerate() {
                let fault = geometry.patch(p);
                let (ss, ds) = unit_displacements(&fault, east - centre.x, north - centre.y, self.config.poisson);
                // Rows north, east, up
                for (c, axis) in [1usize, 0, 2].into_iter().enumerate() {
                    g[(3 * k + c, 2 * p)] = ss[axis];
                    g[(3 * k + c, 2 * p + 1)] = ds[axis];
                }
            }
        }
        g
    }

    fn rhs(&self, _point: usize) -> DVector<f64> {
        DVector::from_iterator(3 * self.sites.len(), self.sites.iter().flat_map(|s| s.offset))
    }

    fn weights(&self, _point: usize) -> Vec<Option<f64>> {
        self.sites.iter().flat_map(|s| s.weights).collect()
    }

    fn regularization(&self, _point: usize) -> Option<DMatrix<f64>> {
        Some(self.smoothing.clone())
    }
}

/// Run the finite-fault inversion over the candidate planes.
pub fn invert_ff(
    config: &FfConfig,
    solver: &GridSearchSolver,
    event: &ActiveEvent,
    magnitude: f64,
    planes: &[FaultPlane],
    observations: &[OffsetObservation],
) -> Result<FfResult, InversionError> {
    let sites: Vec<&OffsetObservation> = observations
        .iter()
        .filter(|o| o.usable && o.offset.iter().all(|v| v.is_finite()))
        .collect();
    if sites.len() < config.min_sites {
        return Err(InversionError::InsufficientData {
            model: ModelKind::Ff,
            usable: sites.len(),
            required: config.min_sites,
        });
    }
    if planes.is_empty() {
        return Err(InversionError::EmptyGrid);
    }

    let (length, width) = fault_dimensions(config, magnitude);
    let geometries: Vec<PlaneGeometry> = planes
        .iter()
        .map(|&plane| PlaneGeometry::new(plane, event.depth_km, length, width, config.nstr, config.ndip))
        .collect();
    let site_positions = sites
        .iter()
        .map(|s| geo::local_offset_km(event.latitude, event.longitude, s.latitude, s.longitude))
        .collect();
    let sites_used = sites.len();
    let model = FfModel {
        config,
        planes: geometries,
        site_positions,
        sites,
        smoothing: laplacian(config.nstr, config.ndip) * config.smoothing,
    };
    let search = solver.solve(&model, ModelKind::Ff)?;

    let patch_area_m2 = length * width * 1.0e6 / (config.nstr * config.ndip) as f64;
    let solutions: Vec<FaultPlaneSolution> = model
        .planes
        .iter()
        .zip(&search.fits)
        .map(|(geometry, fit)| {
            let patches: Vec<FaultPatch> = geometry
                .centres
                .iter()
                .enumerate()
                .map(|(p, centre)| {
                    let (lat, lon) = geo::offset_to_latlon(event.latitude, event.longitude, centre.x, centre.y);
                    FaultPatch {
                        latitude: lat,
                        longitude: lon,
                        depth_km: centre.z,
                        length_km: geometry.patch_length,
                        width_km: geometry.patch_width,
                        strike: geometry.plane.strike,
                        dip: geometry.plane.dip,
                        slip_strike: fit.estimate[2 * p],
                        slip_dip: fit.estimate[2 * p + 1],
                    }
                })
                .collect();
            let moment: f64 = patches.iter().map(|p| config.rigidity * p.slip() * patch_area_m2).sum();
            FaultPlaneSolution {
                strike: geometry.plane.strike,
                dip: geometry.plane.dip,
                magnitude: if moment > 0.0 { moment_magnitude(moment) } else { f64::NAN },
                moment,
                patches,
            }
        })
        .collect();

    let result = FfResult {
        planes: solutions,
        variance_reduction: search.variance_reductions(),
        ranks: search.ranks(),
        optimum: search.optimum,
        nstr: config.nstr,
        ndip: config.ndip,
        sites_used,
    };
    let best = result.best();
    tracing::info!(
        event_id = %event.id,
        strike = best.strike,
        dip = best.dip,
        magnitude = best.magnitude,
        variance_reduction = result.variance_reduction[result.optimum],
        sites = sites_used,
        "FF inversion complete"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SiteKey;

    fn event() -> ActiveEvent {
        ActiveEvent {
            id: "ff".to_string(),
            latitude: 36.0,
            longitude: -120.0,
            depth_km: 6.0,
            magnitude: 6.5,
            origin_time: 0.0,
            version: 0,
        }
    }

    #[test]
    fn test_laplacian_rows_sum_to_edge_count() {
        let lap = laplacian(3, 2);
        assert_eq!(lap.shape(), (12, 12));
        // Corner patch (0,0): two neighbours → row sum 4 - 2
        assert_eq!(lap.row(0).sum(), 2.0);
        // Middle of the top row (1,0): three neighbours
        assert_eq!(lap.row(2).sum(), 1.0);
        // Components never mix
        assert_eq!(lap[(0, 1)], 0.0);
    }

    #[test]
    fn test_fault_dimensions_scaling() {
        let config = FfConfig::default();
        let (l, w) = fault_dimensions(&config, 7.0);
        assert!((l - 10f64.powf(-2.44 + 0.59 * 7.0)).abs() < 1e-9);
        assert!((w - 10f64.powf(-1.01 + 0.32 * 7.0)).abs() < 1e-9);
    }

    #[test]
    fn test_shallow_fault_shifted_below_surface() {
        let geometry = PlaneGeometry::new(FaultPlane { strike: 0.0, dip: 30.0 }, 1.0, 40.0, 20.0, 4, 2);
        let shallowest = geometry.centres.iter().map(|c| c.z).fold(f64::INFINITY, f64::min);
        // Top of the upper row sits at the surface
        assert!((shallowest - geometry.patch_width / 2.0 * 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_prefers_generating_plane() {
        let config = FfConfig { min_sites: 4, nstr: 2, ndip: 1, smoothing: 1.0e-3, ..FfConfig::default() };
        let ev = event();
        let truth = FaultPlane { strike: 330.0, dip: 80.0 };
        let decoy = FaultPlane { strike: 60.0, dip: 10.0 };
        let (length, width) = fault_dimensions(&config, 6.5);
        let geometry = PlaneGeometry::new(truth, ev.depth_km, length, width, config.nstr, config.ndip);

        let mut observations = Vec::new();
        let positions = [
            (-20.0, 5.0),
            (15.0, 25.0),
            (5.0, -30.0),
            (30.0, -10.0),
            (-10.0, -15.0),
            (2.0, 40.0),
            (-35.0, -20.0),
            (25.0, 20.0),
            (-5.0, 12.0),
            (12.0, -5.0),
        ];
        for (i, (de, dn)) in positions.into_iter().enumerate() {
            let mut offset = [0.0; 3];
            for (p, centre) in geometry.centres.iter().enumerate() {
                let (ss, _) = unit_displacements(&geometry.patch(p), de - centre.x, dn - centre.y, config.poisson);
                // 1 m right-lateral everywhere
                offset[0] -= ss[1];
                offset[1] -= ss[0];
                offset[2] -= ss[2];
            }
            let (lat, lon) = geo::offset_to_latlon(ev.latitude, ev.longitude, de, dn);
            observations.push(OffsetObservation {
                site: SiteKey::new("XX", &format!("F{}", i), "LY", ""),
                latitude: lat,
                longitude: lon,
                offset,
                weights: [None; 3],
                usable: true,
            });
        }

        let result = invert_ff(
            &config,
            &GridSearchSolver::default(),
            &ev,
            6.5,
            &[decoy, truth],
            &observations,
        )
        .unwrap();
        assert_eq!(result.optimum, 1);
        assert_eq!(result.planes.len(), 2);
        assert_eq!(result.best().patches.len(), 2);
        assert!(result.variance_reduction[1] > 0.99);
        assert!(result.variance_reduction[0] < 0.9);
        assert!((result.best().patches[0].slip_strike + 1.0).abs() < 0.01);
        assert!(result.variance_reduction[1] > result.variance_reduction[0]);
    }

    #[test]
    fn test_no_planes_is_empty_grid() {
        let config = FfConfig { min_sites: 1, ..FfConfig::default() };
        let obs = OffsetObservation {
            site: SiteKey::new("XX", "A", "LY", ""),
            latitude: 36.1,
            longitude: -120.0,
            offset: [0.1, 0.0, 0.0],
            weights: [None; 3],
            usable: true,
        };
        assert_eq!(
            invert_ff(&config, &GridSearchSolver::default(), &event(), 6.0, &[], &[obs]),
            Err(InversionError::EmptyGrid)
        );
    }
}
