//! Moment tensor decomposition
//!
//! Eigen-decomposition of the tensor (rotated to north/east/down) yields
//! the T, B and P axes. From them:
//! - scalar moment `M0 = (|λmax| + |λmin|) / 2`
//! - moment magnitude `Mw = 2/3·(log10 M0 − 9.1)`
//! - double-couple percentage `100·(1 − 2|ε|)`, `ε = −λ_small / |λ_large|`
//!   by absolute value
//! - the two nodal planes, with normal/slip pairs `(T+P)/√2, (T−P)/√2`

use nalgebra::{Matrix3, SymmetricEigen, Vector3};
use std::f64::consts::FRAC_1_SQRT_2;

use crate::types::{Decomposition, MomentTensor, NodalPlane};

/// Moment magnitude from scalar moment (N·m)
pub fn moment_magnitude(m0: f64) -> f64 {
    2.0 / 3.0 * (m0.log10() - 9.1)
}

/// Scalar moment (N·m) from moment magnitude
pub fn scalar_moment(mw: f64) -> f64 {
    10f64.powf(1.5 * mw + 9.1)
}

/// Rotate east/north/up into north/east/down.
pub fn to_ned(m: &MomentTensor) -> Matrix3<f64> {
    Matrix3::new(
        m.mnn, m.men, -m.mnu, //
        m.men, m.mee, -m.meu, //
        -m.mnu, -m.meu, m.muu,
    )
}

/// Rotate north/east/down back into a tensor in east/north/up.
pub fn from_ned(m: &Matrix3<f64>) -> MomentTensor {
    MomentTensor {
        mnn: m[(0, 0)],
        mee: m[(1, 1)],
        muu: m[(2, 2)],
        men: m[(0, 1)],
        mnu: -m[(0, 2)],
        meu: -m[(1, 2)],
    }
}

/// Strike/dip/rake (degrees) from a unit fault normal and slip vector in NED.
pub fn plane_from_vectors(normal: &Vector3<f64>, slip: &Vector3<f64>) -> NodalPlane {
    // Normal must point up (negative down component)
    let (n, d) = if normal.z > 0.0 { (-normal, -slip) } else { (*normal, *slip) };

    let dip = (-n.z).clamp(-1.0, 1.0).acos();
    let strike = (-n.x).atan2(n.y);
    let (sin_s, cos_s) = strike.sin_cos();
    let cos_rake = d.x * cos_s + d.y * sin_s;
    let sin_rake = if dip.sin().abs() > 0.1 {
        -d.z / dip.sin()
    } else {
        (d.x * sin_s - d.y * cos_s) / dip.cos()
    };

    NodalPlane {
        strike: strike.to_degrees().rem_euclid(360.0),
        dip: dip.to_degrees(),
        rake: sin_rake.atan2(cos_rake).to_degrees(),
    }
}

/// Fault normal and slip vector (NED) for a nodal plane.
pub fn plane_vectors(plane: &NodalPlane) -> (Vector3<f64>, Vector3<f64>) {
    let (phi, delta, lambda) = (
        plane.strike.to_radians(),
        plane.dip.to_radians(),
        plane.rake.to_radians(),
    );
    let normal = Vector3::new(-delta.sin() * phi.sin(), delta.sin() * phi.cos(), -delta.cos());
    let slip = Vector3::new(
        lambda.cos() * phi.cos() + delta.cos() * lambda.sin() * phi.sin(),
        lambda.cos() * phi.sin() - delta.cos() * lambda.sin() * phi.cos(),
        -lambda.sin() * delta.sin(),
    );
    (normal, slip)
}

/// Double-couple tensor for a plane and scalar moment.
pub fn double_couple(plane: &NodalPlane, m0: f64) -> MomentTensor {
    let (n, d) = plane_vectors(plane);
    let m = (n * d.transpose() + d * n.transpose()) * m0;
    from_ned(&m)
}

/// Decompose a moment tensor. `None` for a zero or non-finite tensor.
pub fn decompose(tensor: &MomentTensor) -> Option<Decomposition> {
    let m = to_ned(tensor);
    if !m.iter().all(|v| v.is_finite()) {
        return None;
    }
    let eigen = SymmetricEigen::new(m);

    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]));
    let (i_p, i_t) = (order[0], order[2]);
    let (lambda_min, lambda_max) = (eigen.eigenvalues[i_p], eigen.eigenvalues[i_t]);

    let m0 = (lambda_max.abs() + lambda_min.abs()) / 2.0;
    if m0 <= 0.0 || !m0.is_finite() {
        return None;
    }

    let mut by_abs = [0usize, 1, 2];
    by_abs.sort_by(|&a, &b| eigen.eigenvalues[a].abs().total_cmp(&eigen.eigenvalues[b].abs()));
    let epsilon = -eigen.eigenvalues[by_abs[0]] / eigen.eigenvalues[by_abs[2]].abs();
    let double_couple_pct = (100.0 * (1.0 - 2.0 * epsilon.abs())).clamp(0.0, 100.0);

    let t: Vector3<f64> = eigen.eigenvectors.column(i_t).into_owned().normalize();
    let p: Vector3<f64> = eigen.eigenvectors.column(i_p).into_owned().normalize();
    let n1 = (t + p) * FRAC_1_SQRT_2;
    let d1 = (t - p) * FRAC_1_SQRT_2;

    Some(Decomposition {
        scalar_moment: m0,
        magnitude: moment_magnitude(m0),
        double_couple_pct,
        planes: [plane_from_vectors(&n1, &d1), plane_from_vectors(&d1, &n1)],
    })
}
