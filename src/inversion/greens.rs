//! Static point-source Green's functions for the deviatoric moment tensor
//!
//! Whole-space (Kelvin) static displacement from a moment tensor `M`:
//!
//! `u = (2(1-2ν)·Mγ + 3γ·(γᵀMγ)) / (16πμ(1-ν)·r²)`
//!
//! with `γ` the unit vector from source to receiver. Coordinates are local
//! east/north/up; a source at depth `d` sits at `(0, 0, -d)`.

use nalgebra::{Matrix3, Vector3};
use std::f64::consts::PI;

/// The five deviatoric basis tensors in (east, north, up) order, matching
/// the unknowns `(Mee, Mnn, Men, Meu, Mnu)` with `Muu = -(Mee + Mnn)`.
pub fn deviatoric_basis() -> [Matrix3<f64>; 5] {
    [
        Matrix3::new(1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, -1.0),
        Matrix3::new(0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, -1.0),
        Matrix3::new(0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0),
        Matrix3::new(0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0),
        Matrix3::new(0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0),
    ]
}

/// Displacement (east, north, up) in metres at `receiver - source` offset
/// `r` (metres) for a moment tensor in N·m.
pub fn kelvin_displacement(moment: &Matrix3<f64>, r: &Vector3<f64>, mu: f64, nu: f64) -> Vector3<f64> {
    let dist = r.norm();
    if dist == 0.0 {
        return Vector3::zeros();
    }
    let gamma = r / dist;
    let m_gamma = moment * gamma;
    let projection = gamma.dot(&m_gamma);
    let scale = 1.0 / (16.0 * PI * mu * (1.0 - nu) * dist * dist);
    (m_gamma * (2.0 * (1.0 - 2.0 * nu)) + gamma * (3.0 * projection)) * scale
}

/// Green's function rows (north, east, up) × 5 columns for one site.
///
/// `east_km`/`north_km` locate the site relative to the source epicentre.
pub fn site_greens(east_km: f64, north_km: f64, depth_km: f64, mu: f64, nu: f64) -> [[f64; 5]; 3] {
    let r = Vector3::new(east_km, north_km, depth_km) * 1000.0;
    let mut rows = [[0.0; 5]; 3];
    for (k, basis) in deviatoric_basis().iter().enumerate() {
        let u = kelvin_displacement(basis, &r, mu, nu);
        rows[0][k] = u.y;
        rows[1][k] = u.x;
        rows[2][k] = u.z;
    }
    rows
}
