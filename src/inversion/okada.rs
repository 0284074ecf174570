//! Surface displacement from a rectangular dislocation (Okada, 1985)
//!
//! Half-space, free-surface solution for a finite rectangular fault.
//! Observation points and the fault centroid are given in a local
//! east/north frame; the fault is described by its centroid depth, strike,
//! dip, length along strike and width down dip. Lengths may be in any unit
//! as long as they are consistent; displacements come out in slip units.

use std::f64::consts::PI;

/// Rectangular fault geometry (angles in degrees, lengths consistent)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RectangularFault {
    /// Centroid depth (positive down)
    pub depth: f64,
    pub strike: f64,
    pub dip: f64,
    pub length: f64,
    pub width: f64,
}

/// (east, north, up) displacement
pub type Displacement = [f64; 3];

/// Geometry terms shared by every Okada function at one corner
struct Corner {
    xi: f64,
    eta: f64,
    q: f64,
    r: f64,
    sin_d: f64,
    cos_d: f64,
    /// 1 - 2ν (μ/(λ+μ))
    k: f64,
}

impl Corner {
    fn new(xi: f64, eta: f64, q: f64, sin_d: f64, cos_d: f64, nu: f64) -> Self {
        let r = (xi * xi + eta * eta + q * q).sqrt();
        Self { xi, eta, q, r, sin_d, cos_d, k: 1.0 - 2.0 * nu }
    }

    fn y_bar(&self) -> f64 {
        self.eta * self.cos_d + self.q * self.sin_d
    }

    fn d_bar(&self) -> f64 {
        self.eta * self.sin_d - self.q * self.cos_d
    }

    /// ln(R + η), with the R + η → 0 singularity replaced by -ln(R - η)
    fn log_r_eta(&self) -> f64 {
        let s = self.r + self.eta;
        if s > f64::EPSILON * self.r.max(1.0) {
            s.ln()
        } else {
            -(self.r - self.eta).ln()
        }
    }

    fn inv_r_eta(&self) -> f64 {
        let s = self.r + self.eta;
        if s.abs() > f64::EPSILON * self.r.max(1.0) {
            1.0 / s
        } else {
            0.0
        }
    }

    fn inv_r_xi(&self) -> f64 {
        let s = self.r + self.xi;
        if s.abs() > f64::EPSILON * self.r.max(1.0) {
            1.0 / s
        } else {
            0.0
        }
    }

    fn atan_term(&self) -> f64 {
        if self.q != 0.0 && self.r != 0.0 {
            (self.xi * self.eta / (self.q * self.r)).atan()
        } else {
            0.0
        }
    }

    fn vertical(&self) -> bool {
        self.cos_d <= f64::EPSILON
    }

    fn i5(&self) -> f64 {
        if self.vertical() {
            let db = self.d_bar();
            return -self.k * self.xi * self.sin_d / (self.r + db);
        }
        if self.xi == 0.0 {
            return 0.0;
        }
        let x = self.xi.hypot(self.q);
        self.k * 2.0 / self.cos_d
            * ((self.eta * (x + self.q * self.cos_d) + x * (self.r + x) * self.sin_d)
                / (self.xi * (self.r + x) * self.cos_d))
                .atan()
    }

    fn i4(&self) -> f64 {
        let db = self.d_bar();
        if self.vertical() {
            -self.k * self.q / (self.r + db)
        } else {
            self.k / self.cos_d * ((self.r + db).ln() - self.sin_d * self.log_r_eta())
        }
    }

    fn i3(&self) -> f64 {
        let db = self.d_bar();
        let yb = self.y_bar();
        if self.vertical() {
            self.k / 2.0 * (self.eta / (self.r + db) + yb * self.q / (self.r + db).powi(2) - self.log_r_eta())
        } else {
            self.k * (yb / (self.cos_d * (self.r + db)) - self.log_r_eta())
                + self.sin_d / self.cos_d * self.i4()
        }
    }

    fn i2(&self) -> f64 {
        self.k * (-self.log_r_eta()) - self.i3()
    }

    fn i1(&self) -> f64 {
        let db = self.d_bar();
        if self.vertical() {
            -self.k / 2.0 * self.xi * self.q / (self.r + db).powi(2)
        } else {
            self.k * (-self.xi / (self.cos_d * (self.r + db))) - self.sin_d / self.cos_d * self.i5()
        }
    }

    /// Strike-slip (x, y, z) in the fault frame
    fn strike_slip(&self) -> [f64; 3] {
        let qr_eta = self.q * self.inv_r_eta() / self.r;
        [
            self.xi * qr_eta + self.atan_term() + self.i1() * self.sin_d,
            self.y_bar() * qr_eta + self.q * self.cos_d * self.inv_r_eta() + self.i2() * self.sin_d,
            self.d_bar() * qr_eta + self.q * self.sin_d * self.inv_r_eta() + self.i4() * self.sin_d,
        ]
    }

    /// Dip-slip (x, y, z) in the fault frame
    fn dip_slip(&self) -> [f64; 3] {
        let sc = self.sin_d * self.cos_d;
        let qr_xi = self.q * self.inv_r_xi() / self.r;
        [
            self.q / self.r - self.i3() * sc,
            self.y_bar() * qr_xi + self.cos_d * self.atan_term() - self.i1() * sc,
            self.d_bar() * qr_xi + self.sin_d * self.atan_term() - self.i5() * sc,
        ]
    }
}

/// Chinnery's notation: f(x,p) - f(x,p-W) - f(x-L,p) + f(x-L,p-W)
fn chinnery<F>(x: f64, p: f64, length: f64, width: f64, f: F) -> [f64; 3]
where
    F: Fn(f64, f64) -> [f64; 3],
{
    let a = f(x, p);
    let b = f(x, p - width);
    let c = f(x - length, p);
    let d = f(x - length, p - width);
    [a[0] - b[0] - c[0] + d[0], a[1] - b[1] - c[1] + d[1], a[2] - b[2] - c[2] + d[2]]
}

/// Surface displacement (east, north, up) for unit strike-slip and unit
/// dip-slip on the fault, at an observation point `(east, north)` relative
/// to the fault centroid.
pub fn unit_displacements(fault: &RectangularFault, east: f64, north: f64, nu: f64) -> (Displacement, Displacement) {
    let strike = fault.strike.to_radians();
    let dip = fault.dip.to_radians();
    let (sin_s, cos_s) = strike.sin_cos();
    let (sin_d, cos_d) = dip.sin_cos();
    let (l, w) = (fault.length, fault.width);

    // Origin at the lower corner of the fault in Okada's frame
    let d = fault.depth + sin_d * w / 2.0;
    let ec = east + cos_s * cos_d * w / 2.0;
    let nc = north - sin_s * cos_d * w / 2.0;
    let x = cos_s * nc + sin_s * ec + l / 2.0;
    let y = sin_s * nc - cos_s * ec + cos_d * w;
    let p = y * cos_d + d * sin_d;
    let q = y * sin_d - d * cos_d;

    let ss = chinnery(x, p, l, w, |xi, eta| Corner::new(xi, eta, q, sin_d, cos_d, nu).strike_slip());
    let ds = chinnery(x, p, l, w, |xi, eta| Corner::new(xi, eta, q, sin_d, cos_d, nu).dip_slip());

    let to_geographic = |u: [f64; 3]| -> Displacement {
        let (ux, uy, uz) = (-u[0] / (2.0 * PI), -u[1] / (2.0 * PI), -u[2] / (2.0 * PI));
        [sin_s * ux - cos_s * uy, cos_s * ux + sin_s * uy, uz]
    };
    (to_geographic(ss), to_geographic(ds))
}

/// Displacement for a given rake and slip.
pub fn displacement(fault: &RectangularFault, east: f64, north: f64, rake: f64, slip: f64, nu: f64) -> Displacement {
    let (ss, ds) = unit_displacements(fault, east, north, nu);
    let (sin_r, cos_r) = rake.to_radians().sin_cos();
    let mut u = [0.0; 3];
    for i in 0..3 {
        u[i] = slip * (cos_r * ss[i] + sin_r * ds[i]);
    }
    u
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertical_fault() -> RectangularFault {
        RectangularFault { depth: 5.0, strike: 0.0, dip: 90.0, length: 20.0, width: 10.0 }
    }

    #[test]
    fn test_vertical_strike_slip_antisymmetry() {
        let fault = vertical_fault();
        let (east_side, _) = unit_displacements(&fault, 5.0, 3.0, 0.25);
        let (west_side, _) = unit_displacements(&fault, -5.0, 3.0, 0.25);
        // Fault-parallel motion flips sign across a vertical strike-slip fault
        assert!(east_side[1].abs() > 1e-4);
        assert!((east_side[1] + west_side[1]).abs() < 1e-9);
        assert!(east_side.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_decays_with_distance() {
        let fault = RectangularFault { depth: 10.0, strike: 30.0, dip: 45.0, length: 20.0, width: 10.0 };
        let near = displacement(&fault, 10.0, 10.0, 90.0, 1.0, 0.25);
        let far = displacement(&fault, 200.0, 200.0, 90.0, 1.0, 0.25);
        let norm = |u: [f64; 3]| (u[0] * u[0] + u[1] * u[1] + u[2] * u[2]).sqrt();
        assert!(norm(near) > 10.0 * norm(far));
        assert!(norm(far) > 0.0);
    }

    #[test]
    fn test_thrust_uplifts_hanging_wall() {
        // Dips to the east (strike north); hanging wall is east of the trace
        let fault = RectangularFault { depth: 8.0, strike: 0.0, dip: 30.0, length: 40.0, width: 10.0 };
        let (_, ds) = unit_displacements(&fault, 2.0, 0.0, 0.25);
        assert!(ds[2] > 0.0, "uplift = {}", ds[2]);
    }

    #[test]
    fn test_rake_combines_components() {
        let fault = vertical_fault();
        let (ss, ds) = unit_displacements(&fault, 7.0, -4.0, 0.25);
        let u = displacement(&fault, 7.0, -4.0, 45.0, 2.0, 0.25);
        let s = 2.0 * std::f64::consts::FRAC_1_SQRT_2;
        for i in 0..3 {
            assert!((u[i] - s * (ss[i] + ds[i])).abs() < 1e-12);
        }
    }
}
