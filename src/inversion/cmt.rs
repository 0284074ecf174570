//! Centroid moment tensor inversion
//!
//! Grid over depth × latitude × longitude around the alert hypocentre.
//! Index layout is `(idep·nlat + ilat)·nlon + ilon`; with `nlat = nlon = 1`
//! this is a pure depth search. Five deviatoric unknowns per point,
//! solved against static offsets with the Kelvin Green's function.

use nalgebra::{DMatrix, DVector};

use super::decompose::decompose;
use super::geo;
use super::greens::site_greens;
use super::grid_search::{GridModel, GridSearchSolver, InversionError};
use crate::config::CmtConfig;
use crate::types::{ActiveEvent, CmtResult, ModelKind, MomentTensor, OffsetObservation};

/// Trial source positions for an event.
#[derive(Debug, Clone, PartialEq)]
pub struct CmtGrid {
    pub depths_km: Vec<f64>,
    pub latitudes: Vec<f64>,
    pub longitudes: Vec<f64>,
}

impl CmtGrid {
    /// Lat/lon offsets are centred on the hypocentre.
    pub fn around(event: &ActiveEvent, config: &CmtConfig) -> Self {
        let centred = |n: usize, delta: f64, origin: f64| -> Vec<f64> {
            let half = (n.max(1) - 1) as f64 / 2.0;
            (0..n.max(1)).map(|i| origin + (i as f64 - half) * delta).collect()
        };
        Self {
            depths_km: config.depths_km.clone(),
            latitudes: centred(config.nlat, config.dlat, event.latitude),
            longitudes: centred(config.nlon, config.dlon, event.longitude)
                .into_iter()
                .map(geo::normalize_longitude)
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.depths_km.len() * self.latitudes.len() * self.longitudes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (depth, lat, lon) of a flat index
    pub fn point(&self, index: usize) -> (f64, f64, f64) {
        let nlon = self.longitudes.len();
        let nlat = self.latitudes.len();
        let ilon = index % nlon;
        let ilat = (index / nlon) % nlat;
        let idep = index / (nlon * nlat);
        (self.depths_km[idep], self.latitudes[ilat], self.longitudes[ilon])
    }
}

struct CmtModel<'a> {
    grid: &'a CmtGrid,
    sites: Vec<&'a OffsetObservation>,
    mu: f64,
    nu: f64,
}

impl GridModel for CmtModel<'_> {
    fn grid_len(&self) -> usize {
        self.grid.len()
    }

    fn n_params(&self) -> usize {
        5
    }

    fn forward(&self, point: usize) -> DMatrix<f64> {
        let (depth, lat, lon) = self.grid.point(point);
        let mut g = DMatrix::zeros(3 * self.sites.len(), 5);
        for (k, site) in self.sites.iter().enumerate() {
            let (east, north) = geo::local_offset_km(lat, lon, site.latitude, site.longitude);
            let rows = site_greens(east, north, depth, self.mu, self.nu);
            for (c, row) in rows.iter().enumerate() {
                for (j, &value) in row.iter().enumerate() {
                    g[(3 * k + c, j)] = value;
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
}

/// Run the CMT grid search and decompose the optimum.
pub fn invert_cmt(
    config: &CmtConfig,
    solver: &GridSearchSolver,
    event: &ActiveEvent,
    observations: &[OffsetObservation],
) -> Result<CmtResult, InversionError> {
    let sites: Vec<&OffsetObservation> = observations
        .iter()
        .filter(|o| o.usable && o.offset.iter().all(|v| v.is_finite()))
        .collect();
    if sites.len() < config.min_sites {
        return Err(InversionError::InsufficientData {
            model: ModelKind::Cmt,
            usable: sites.len(),
            required: config.min_sites,
        });
    }

    let grid = CmtGrid::around(event, config);
    let sites_used = sites.len();
    let model = CmtModel { grid: &grid, sites, mu: config.rigidity, nu: config.poisson };
    let search = solver.solve(&model, ModelKind::Cmt)?;

    let tensors: Vec<MomentTensor> = search
        .fits
        .iter()
        .map(|f| {
            let m = &f.estimate;
            MomentTensor::from_deviatoric(m[0], m[1], m[2], m[3], m[4])
        })
        .collect();

    let decomposition = decompose(&tensors[search.optimum])
        .ok_or_else(|| InversionError::NoSolution("degenerate moment tensor at optimum".to_string()))?;
    let all_decompositions = config
        .decompose_all
        .then(|| tensors.iter().map(decompose).collect());

    let result = CmtResult {
        depths_km: grid.depths_km,
        latitudes: grid.latitudes,
        longitudes: grid.longitudes,
        tensors,
        variance_reduction: search.variance_reductions(),
        ranks: search.ranks(),
        optimum: search.optimum,
        decomposition,
        all_decompositions,
        sites_used,
    };
    let (depth, lat, lon) = result.location(result.optimum);
    tracing::info!(
        event_id = %event.id,
        magnitude = decomposition.magnitude,
        double_couple_pct = decomposition.double_couple_pct,
        depth_km = depth,
        latitude = lat,
        longitude = lon,
        variance_reduction = result.variance_reduction[result.optimum],
        sites = sites_used,
        "CMT inversion complete"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inversion::decompose::{double_couple, scalar_moment};
    use crate::types::{NodalPlane, SiteKey};

    fn event() -> ActiveEvent {
        ActiveEvent {
            id: "cmt".to_string(),
            latitude: 40.0,
            longitude: 140.0,
            depth_km: 20.0,
            magnitude: 7.0,
            origin_time: 0.0,
            version: 0,
        }
    }

    fn synthetic(config: &CmtConfig, truth: &MomentTensor, depth: f64) -> Vec<OffsetObservation> {
        let ev = event();
        let mut out = Vec::new();
        for (i, (de, dn)) in [(-60.0, 10.0), (40.0, 50.0), (10.0, -70.0), (80.0, -20.0), (-30.0, -40.0), (5.0, 90.0)]
            .into_iter()
            .enumerate()
        {
            let (lat, lon) = geo::offset_to_latlon(ev.latitude, ev.longitude, de, dn);
            let (east, north) = geo::local_offset_km(ev.latitude, ev.longitude, lat, lon);
            let g = site_greens(east, north, depth, config.rigidity, config.poisson);
            let m = [truth.mee, truth.mnn, truth.men, truth.meu, truth.mnu];
            let mut offset = [0.0; 3];
            for c in 0..3 {
                offset[c] = (0..5).map(|j| g[c][j] * m[j]).sum();
            }
            out.push(OffsetObservation {
                site: SiteKey::new("XX", &format!("S{}", i), "LY", ""),
                latitude: lat,
                longitude: lon,
                offset,
                weights: [None; 3],
                usable: true,
            });
        }
        out
    }

    #[test]
    fn test_grid_index_layout() {
        let config = CmtConfig { nlat: 3, nlon: 2, dlat: 0.1, dlon: 0.2, depths_km: vec![5.0, 15.0], ..CmtConfig::default() };
        let grid = CmtGrid::around(&event(), &config);
        assert_eq!(grid.len(), 12);
        assert!((grid.latitudes[1] - 40.0).abs() < 1e-12);
        assert!((grid.longitudes[0] - 139.9).abs() < 1e-12);
        let (d, lat, lon) = grid.point(9);
        assert_eq!(d, 15.0);
        assert!((lat - 40.0).abs() < 1e-12);
        assert!((lon - 140.1).abs() < 1e-12);
    }

    #[test]
    fn test_recovers_mechanism_and_depth() {
        let config = CmtConfig { min_sites: 4, depths_km: vec![10.0, 20.0, 30.0], ..CmtConfig::default() };
        let truth = double_couple(&NodalPlane { strike: 200.0, dip: 25.0, rake: 95.0 }, scalar_moment(7.0));
        let observations = synthetic(&config, &truth, 20.0);

        let result = invert_cmt(&config, &GridSearchSolver::default(), &event(), &observations).unwrap();
        assert_eq!(result.optimum, 1);
        assert!((result.variance_reduction[1] - 1.0).abs() < 1e-9);
        assert!((result.magnitude() - 7.0).abs() < 1e-6);
        assert!(result.decomposition.double_couple_pct > 99.9);
        assert!(result.all_decompositions.is_none());
    }

    #[test]
    fn test_masked_sites_trigger_insufficient_data() {
        let config = CmtConfig { min_sites: 4, ..CmtConfig::default() };
        let truth = double_couple(&NodalPlane { strike: 0.0, dip: 90.0, rake: 0.0 }, 1.0e19);
        let mut observations = synthetic(&config, &truth, 20.0);
        for obs in observations.iter_mut().take(3) {
            obs.usable = false;
        }
        assert!(matches!(
            invert_cmt(&config, &GridSearchSolver::default(), &event(), &observations),
            Err(InversionError::InsufficientData { usable: 3, required: 4, .. })
        ));
    }
}
