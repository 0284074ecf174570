//! Peak ground displacement magnitude scaling
//!
//! Scaling law: `log10(PGD_cm) = A + B·M + C·M·log10(R_km)`.
//! At each trial depth the single unknown is `M`:
//! `G_i = B + C·log10(R_i)`, `b_i = log10(PGD_i) - A`.
//! Near stations are favoured by `w_i = s_i · exp(-R_i² / (8·R_min²))`
//! where `s_i` is the optional external site weight.

use nalgebra::{DMatrix, DVector};

use super::geo;
use super::grid_search::{GridModel, GridSearchSolver, InversionError};
use crate::config::PgdConfig;
use crate::types::{ActiveEvent, ModelKind, PeakDisplacementObservation, PgdResult};

/// Metres to centimetres
const M_TO_CM: f64 = 100.0;

struct PgdRow {
    latitude: f64,
    longitude: f64,
    log_pgd_cm: f64,
    site_weight: f64,
}

/// Depth-grid PGD model bound to one event iteration
struct PgdModel<'a> {
    config: &'a PgdConfig,
    event: &'a ActiveEvent,
    rows: Vec<PgdRow>,
}

impl PgdModel<'_> {
    /// Hypocentral distances with the small-distance floor applied
    fn distances(&self, point: usize) -> Vec<f64> {
        let depth = self.config.depths_km[point];
        self.rows
            .iter()
            .map(|row| {
                let r = geo::hypocentral_distance_km(
                    self.event.latitude,
                    self.event.longitude,
                    depth,
                    row.latitude,
                    row.longitude,
                );
                if r < self.config.dist_tol {
                    self.config.dist_def
                } else {
                    r
                }
            })
            .collect()
    }
}

impl GridModel for PgdModel<'_> {
    fn grid_len(&self) -> usize {
        self.config.depths_km.len()
    }

    fn n_params(&self) -> usize {
        1
    }

    fn forward(&self, point: usize) -> DMatrix<f64> {
        let (b, c) = (self.config.b, self.config.c);
        let distances = self.distances(point);
        DMatrix::from_iterator(distances.len(), 1, distances.iter().map(|r| b + c * r.log10()))
    }

    fn rhs(&self, _point: usize) -> DVector<f64> {
        DVector::from_iterator(self.rows.len(), self.rows.iter().map(|row| row.log_pgd_cm - self.config.a))
    }

    fn weights(&self, point: usize) -> Vec<Option<f64>> {
        let distances = self.distances(point);
        let r_min = distances.iter().copied().fold(f64::INFINITY, f64::min);
        let scale = 8.0 * r_min * r_min;
        distances
            .iter()
            .zip(&self.rows)
            .map(|(r, row)| Some(row.site_weight * (-(r * r) / scale).exp()))
            .collect()
    }
}

/// Run the PGD depth-grid inversion.
pub fn invert_pgd(
    config: &PgdConfig,
    solver: &GridSearchSolver,
    event: &ActiveEvent,
    observations: &[PeakDisplacementObservation],
) -> Result<PgdResult, InversionError> {
    let rows: Vec<PgdRow> = observations
        .iter()
        .filter(|o| o.usable && o.pgd.is_finite() && o.pgd > 0.0)
        .map(|o| PgdRow {
            latitude: o.latitude,
            longitude: o.longitude,
            log_pgd_cm: (o.pgd * M_TO_CM).log10(),
            site_weight: o.weight.unwrap_or(1.0),
        })
        .collect();

    if rows.len() < config.min_sites {
        return Err(InversionError::InsufficientData {
            model: ModelKind::Pgd,
            usable: rows.len(),
            required: config.min_sites,
        });
    }

    let sites_used = rows.len();
    let model = PgdModel { config, event, rows };
    let search = solver.solve(&model, ModelKind::Pgd)?;

    let result = PgdResult {
        depths_km: config.depths_km.clone(),
        magnitudes: search.fits.iter().map(|f| f.estimate[0]).collect(),
        variance_reduction: search.variance_reductions(),
        ranks: search.ranks(),
        optimum: search.optimum,
        sites_used,
    };
    tracing::info!(
        event_id = %event.id,
        magnitude = result.magnitude(),
        depth_km = result.depth_km(),
        variance_reduction = result.variance_reduction[result.optimum],
        sites = sites_used,
        "PGD inversion complete"
    );
    Ok(result)
}

/// Forward-predicted PGD (m) for a magnitude at hypocentral distance `r_km`.
pub fn predict_pgd(config: &PgdConfig, magnitude: f64, r_km: f64) -> f64 {
    10f64.powf(config.a + config.b * magnitude + config.c * magnitude * r_km.log10()) / M_TO_CM
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SiteKey;

    fn event() -> ActiveEvent {
        ActiveEvent {
            id: "pgd".to_string(),
            latitude: 0.0,
            longitude: 0.0,
            depth_km: 8.0,
            magnitude: 5.0,
            origin_time: 0.0,
            version: 0,
        }
    }

    fn obs(lat: f64, lon: f64, pgd: f64) -> PeakDisplacementObservation {
        PeakDisplacementObservation {
            site: SiteKey::new("XX", "S", "LY", ""),
            latitude: lat,
            longitude: lon,
            pgd,
            weight: None,
            usable: true,
        }
    }

    #[test]
    fn test_insufficient_sites() {
        let config = PgdConfig { min_sites: 4, ..PgdConfig::default() };
        let observations = vec![obs(0.1, 0.0, 0.1), obs(0.0, 0.2, 0.05)];
        let err = invert_pgd(&config, &GridSearchSolver::default(), &event(), &observations).unwrap_err();
        assert_eq!(
            err,
            InversionError::InsufficientData { model: ModelKind::Pgd, usable: 2, required: 4 }
        );
    }

    #[test]
    fn test_unusable_and_zero_pgd_not_counted() {
        let config = PgdConfig { min_sites: 2, ..PgdConfig::default() };
        let mut masked = obs(0.1, 0.0, 0.1);
        masked.usable = false;
        let observations = vec![masked, obs(0.2, 0.0, 0.0), obs(0.3, 0.0, 0.02)];
        assert!(matches!(
            invert_pgd(&config, &GridSearchSolver::default(), &event(), &observations),
            Err(InversionError::InsufficientData { usable: 1, .. })
        ));
    }

    #[test]
    fn test_distance_floor() {
        let config = PgdConfig { dist_tol: 5.0, dist_def: 5.0, depths_km: vec![0.0], ..PgdConfig::default() };
        let ev = ActiveEvent { depth_km: 0.0, ..event() };
        let model = PgdModel {
            config: &config,
            event: &ev,
            rows: vec![PgdRow { latitude: 0.0, longitude: 0.0, log_pgd_cm: 0.0, site_weight: 1.0 }],
        };
        assert_eq!(model.distances(0), vec![5.0]);
        assert!(model.forward(0)[(0, 0)].is_finite());
    }

    #[test]
    fn test_recovers_magnitude_default_coefficients() {
        let config = PgdConfig { min_sites: 3, depths_km: vec![4.0, 8.0, 12.0], ..PgdConfig::default() };
        let sites = [(0.3, 0.0), (0.0, 0.5), (-0.6, 0.2), (0.2, -0.9)];
        let observations: Vec<_> = sites
            .iter()
            .map(|&(lat, lon)| {
                let r = geo::hypocentral_distance_km(0.0, 0.0, 8.0, lat, lon);
                obs(lat, lon, predict_pgd(&config, 6.5, r))
            })
            .collect();
        let result = invert_pgd(&config, &GridSearchSolver::default(), &event(), &observations).unwrap();
        assert_eq!(result.optimum, 1);
        assert!((result.magnitude() - 6.5).abs() < 1e-6);
        assert!((result.variance_reduction[1] - 1.0).abs() < 1e-9);
        assert_eq!(result.magnitudes.len(), 3);
    }

    #[test]
    fn test_three_site_scenario_with_custom_law() {
        let config = PgdConfig {
            min_sites: 3,
            b: 1.5,
            c: -0.5,
            depths_km: vec![5.0, 10.0, 20.0],
            ..PgdConfig::default()
        };
        let sites = [(0.2, 0.1), (-0.4, 0.5), (0.9, -0.7)];
        let observations: Vec<_> = sites
            .iter()
            .map(|&(lat, lon)| {
                let r = geo::hypocentral_distance_km(0.0, 0.0, 10.0, lat, lon);
                obs(lat, lon, predict_pgd(&config, 6.0, r))
            })
            .collect();
        let result = invert_pgd(&config, &GridSearchSolver::new(false), &event(), &observations).unwrap();
        assert_eq!(result.optimum, 1);
        assert_eq!(result.depth_km(), 10.0);
        assert!((result.magnitude() - 6.0).abs() < 0.05, "magnitude {}", result.magnitude());
        assert_eq!(result.sites_used, 3);
    }
}
