//! Weighted least-squares grid search
//!
//! Shared engine behind the PGD, CMT and FF inversions. A model supplies,
//! for each grid point, a forward matrix, the observation vector, the
//! per-row weights and optionally a regularization block. Every point is
//! solved independently:
//!
//! 1. `W` = diag(weights); absent weights default to 1.0
//! 2. `G̃ = W·G`, `b̃ = W·b`, regularization rows appended with zero RHS
//! 3. minimum-norm SVD solve of `G̃ m = b̃`, reporting effective rank
//! 4. `VR = 1 - ‖b - G m‖² / ‖b‖²` on unweighted data rows (`‖b‖² = 0` ⇒ 0)
//!
//! The optimum is the first strict maximum of VR, so ties resolve to the
//! lowest grid index. Points are independent and evaluated in parallel.

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use thiserror::Error;

use crate::types::ModelKind;

/// Inversion errors
#[derive(Debug, Error, PartialEq)]
pub enum InversionError {
    #[error("{model}: insufficient data ({usable} usable sites, {required} required)")]
    InsufficientData { model: ModelKind, usable: usize, required: usize },

    #[error("Dimension mismatch at grid point {point}: {detail}")]
    DimensionMismatch { point: usize, detail: String },

    #[error("Grid is empty")]
    EmptyGrid,

    #[error("No solution: {0}")]
    NoSolution(String),
}

/// A parameterized forward model evaluated over a grid.
///
/// Implementations only read shared immutable state, so points can be
/// evaluated concurrently.
pub trait GridModel: Sync {
    fn grid_len(&self) -> usize;

    /// Number of unknowns per point
    fn n_params(&self) -> usize;

    /// Forward matrix for data rows only
    fn forward(&self, point: usize) -> DMatrix<f64>;

    /// Observation vector matching `forward` rows
    fn rhs(&self, point: usize) -> DVector<f64>;

    /// Per-row weights. Empty or all `None` means unweighted.
    fn weights(&self, point: usize) -> Vec<Option<f64>>;

    /// Extra rows appended after weighting, with zero right-hand side
    fn regularization(&self, _point: usize) -> Option<DMatrix<f64>> {
        None
    }
}

/// Solution at one grid point
#[derive(Debug, Clone, PartialEq)]
pub struct GridPointFit {
    pub estimate: DVector<f64>,
    /// NaN when the point was skipped
    pub variance_reduction: f64,
    pub rank: usize,
    /// No data rows at this point
    pub skipped: bool,
    /// Rows whose weight was missing and defaulted to 1.0
    pub defaulted_weights: usize,
}

impl GridPointFit {
    fn skipped(n_params: usize) -> Self {
        Self {
            estimate: DVector::from_element(n_params, f64::NAN),
            variance_reduction: f64::NAN,
            rank: 0,
            skipped: true,
            defaulted_weights: 0,
        }
    }

    pub fn is_full_rank(&self) -> bool {
        self.rank == self.estimate.len()
    }
}

/// All grid-point fits plus the selected optimum
#[derive(Debug, Clone, PartialEq)]
pub struct GridSearchResult {
    pub fits: Vec<GridPointFit>,
    pub optimum: usize,
}

impl GridSearchResult {
    pub fn best(&self) -> &GridPointFit {
        &self.fits[self.optimum]
    }

    pub fn variance_reductions(&self) -> Vec<f64> {
        self.fits.iter().map(|f| f.variance_reduction).collect()
    }

    pub fn ranks(&self) -> Vec<usize> {
        self.fits.iter().map(|f| f.rank).collect()
    }
}

/// Resolve the weight policy: absent → identity, partial → 1.0 for gaps.
fn resolve_weights(
    weights: Vec<Option<f64>>,
    rows: usize,
    point: usize,
) -> Result<(Vec<f64>, usize), InversionError> {
    if weights.is_empty() || weights.iter().all(Option::is_none) {
        return Ok((vec![1.0; rows], 0));
    }
    if weights.len() != rows {
        return Err(InversionError::DimensionMismatch {
            point,
            detail: format!("{} weights for {} rows", weights.len(), rows),
        });
    }
    let defaulted = weights.iter().filter(|w| w.is_none()).count();
    Ok((weights.into_iter().map(|w| w.unwrap_or(1.0)).collect(), defaulted))
}

/// Solve one grid point.
pub fn solve_point<M: GridModel + ?Sized>(model: &M, point: usize) -> Result<GridPointFit, InversionError> {
    let n_params = model.n_params();
    let g = model.forward(point);
    let b = model.rhs(point);
    let rows = g.nrows();

    if rows == 0 {
        return Ok(GridPointFit::skipped(n_params));
    }
    if g.ncols() != n_params || b.len() != rows {
        return Err(InversionError::DimensionMismatch {
            point,
            detail: format!("G is {}x{}, b has {}, expected {} columns", rows, g.ncols(), b.len(), n_params),
        });
    }

    let (weights, defaulted_weights) = resolve_weights(model.weights(point), rows, point)?;
    let w = DVector::from_vec(weights);

    let mut gw = g.clone();
    for i in 0..rows {
        gw.row_mut(i).scale_mut(w[i]);
    }
    let bw = b.component_mul(&w);

    let (a, rhs) = match model.regularization(point) {
        Some(reg) if reg.nrows() > 0 => {
            if reg.ncols() != n_params {
                return Err(InversionError::DimensionMismatch {
                    point,
                    detail: format!("regularization has {} columns, expected {}", reg.ncols(), n_params),
                });
            }
            let total = rows + reg.nrows();
            let mut a = DMatrix::zeros(total, n_params);
            a.rows_mut(0, rows).copy_from(&gw);
            a.rows_mut(rows, reg.nrows()).copy_from(&reg);
            let mut rhs = DVector::zeros(total);
            rhs.rows_mut(0, rows).copy_from(&bw);
            (a, rhs)
        }
        _ => (gw, bw),
    };

    let (nrows, ncols) = a.shape();
    let svd = a.svd(true, true);
    let sigma_max = svd.singular_values.max();
    let eps = f64::EPSILON * nrows.max(ncols) as f64 * sigma_max;
    let rank = svd.rank(eps);
    let estimate = svd
        .solve(&rhs, eps)
        .map_err(|e| InversionError::NoSolution(e.to_string()))?;

    let residual = &b - &g * &estimate;
    let b_norm = b.norm_squared();
    let variance_reduction = if b_norm == 0.0 {
        0.0
    } else {
        1.0 - residual.norm_squared() / b_norm
    };

    Ok(GridPointFit { estimate, variance_reduction, rank, skipped: false, defaulted_weights })
}

/// Index of the first strict maximum, ignoring NaN.
pub fn select_optimum(variance_reductions: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &vr) in variance_reductions.iter().enumerate() {
        if vr.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if vr <= b => {}
            _ => best = Some((i, vr)),
        }
    }
    best.map(|(i, _)| i)
}

/// Grid-search driver
#[derive(Debug, Clone, Copy)]
pub struct GridSearchSolver {
    parallel: bool,
}

impl Default for GridSearchSolver {
    fn default() -> Self {
        Self { parallel: true }
    }
}

impl GridSearchSolver {
    pub fn new(parallel: bool) -> Self {
        Self { parallel }
    }

    /// Evaluate every grid point and select the best by variance reduction.
    pub fn solve<M: GridModel>(&self, model: &M, label: ModelKind) -> Result<GridSearchResult, InversionError> {
        let n = model.grid_len();
        if n == 0 {
            return Err(InversionError::EmptyGrid);
        }

        let fits: Vec<GridPointFit> = if self.parallel {
            (0..n).into_par_iter().map(|p| solve_point(model, p)).collect::<Result<_, _>>()?
        } else {
            (0..n).map(|p| solve_point(model, p)).collect::<Result<_, _>>()?
        };

        let defaulted: usize = fits.iter().map(|f| f.defaulted_weights).sum();
        if defaulted > 0 {
            tracing::warn!(model = %label, rows = defaulted, "Missing weights defaulted to 1.0");
        }

        let vrs: Vec<f64> = fits.iter().map(|f| f.variance_reduction).collect();
        let optimum = select_optimum(&vrs)
            .ok_or_else(|| InversionError::NoSolution("every grid point was skipped".to_string()))?;

        let best = &fits[optimum];
        if !best.is_full_rank() {
            tracing::warn!(
                model = %label,
                rank = best.rank,
                params = best.estimate.len(),
                "Rank-deficient solve at optimum; minimum-norm estimate"
            );
        }

        Ok(GridSearchResult { fits, optimum })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// y = slope * x with the slope's grid value selecting x-scaling
    struct LineModel {
        xs: Vec<f64>,
        ys: Vec<f64>,
        scales: Vec<f64>,
        weights: Vec<Option<f64>>,
    }

    impl GridModel for LineModel {
        fn grid_len(&self) -> usize {
            self.scales.len()
        }
        fn n_params(&self) -> usize {
            1
        }
        fn forward(&self, point: usize) -> DMatrix<f64> {
            let s = self.scales[point];
            DMatrix::from_iterator(self.xs.len(), 1, self.xs.iter().map(|x| (x * s).powi(2)))
        }
        fn rhs(&self, _point: usize) -> DVector<f64> {
            DVector::from_vec(self.ys.clone())
        }
        fn weights(&self, _point: usize) -> Vec<Option<f64>> {
            self.weights.clone()
        }
    }

    #[test]
    fn test_partial_weights_default() {
        let (w, defaulted) = resolve_weights(vec![Some(2.0), None, Some(0.5)], 3, 0).unwrap();
        assert_eq!(w, vec![2.0, 1.0, 0.5]);
        assert_eq!(defaulted, 1);
        let (w, defaulted) = resolve_weights(vec![None, None], 2, 0).unwrap();
        assert_eq!(w, vec![1.0, 1.0]);
        assert_eq!(defaulted, 0);
        assert!(resolve_weights(vec![Some(1.0)], 2, 0).is_err());
    }

    #[test]
    fn test_zero_rhs_gives_zero_vr() {
        let model = LineModel { xs: vec![1.0, 2.0], ys: vec![0.0, 0.0], scales: vec![1.0], weights: vec![] };
        let fit = solve_point(&model, 0).unwrap();
        assert_eq!(fit.variance_reduction, 0.0);
    }

    #[test]
    fn test_tie_break_lowest_index() {
        assert_eq!(select_optimum(&[0.2, 0.9, 0.9, 0.1]), Some(1));
        assert_eq!(select_optimum(&[f64::NAN, 0.5, f64::NAN]), Some(1));
        assert_eq!(select_optimum(&[f64::NAN]), None);
    }

    #[test]
    fn test_symmetric_scales_tie() {
        // ±s give identical forward matrices
        let model = LineModel {
            xs: vec![1.0, 2.0, 3.0],
            ys: vec![1.0, 5.0, 8.0],
            scales: vec![-1.0, 1.0],
            weights: vec![],
        };
        for _ in 0..5 {
            let result = GridSearchSolver::new(true).solve(&model, ModelKind::Pgd).unwrap();
            assert_eq!(result.fits[0].variance_reduction, result.fits[1].variance_reduction);
            assert_eq!(result.optimum, 0);
        }
    }

    #[test]
    fn test_rank_deficient_min_norm() {
        struct Duplicate;
        impl GridModel for Duplicate {
            fn grid_len(&self) -> usize {
                1
            }
            fn n_params(&self) -> usize {
                2
            }
            fn forward(&self, _: usize) -> DMatrix<f64> {
                DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 2.0, 2.0])
            }
            fn rhs(&self, _: usize) -> DVector<f64> {
                DVector::from_vec(vec![2.0, 4.0])
            }
            fn weights(&self, _: usize) -> Vec<Option<f64>> {
                Vec::new()
            }
        }
        let result = GridSearchSolver::new(false).solve(&Duplicate, ModelKind::Cmt).unwrap();
        let fit = result.best();
        assert_eq!(fit.rank, 1);
        assert!((fit.estimate[0] - 1.0).abs() < 1e-9);
        assert!((fit.estimate[1] - 1.0).abs() < 1e-9);
        assert!((fit.variance_reduction - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_regularization_rows_excluded_from_vr() {
        struct Damped;
        impl GridModel for Damped {
            fn grid_len(&self) -> usize {
                1
            }
            fn n_params(&self) -> usize {
                1
            }
            fn forward(&self, _: usize) -> DMatrix<f64> {
                DMatrix::from_element(1, 1, 1.0)
            }
            fn rhs(&self, _: usize) -> DVector<f64> {
                DVector::from_element(1, 2.0)
            }
            fn weights(&self, _: usize) -> Vec<Option<f64>> {
                Vec::new()
            }
            fn regularization(&self, _: usize) -> Option<DMatrix<f64>> {
                Some(DMatrix::from_element(1, 1, 1.0))
            }
        }
        let fit = solve_point(&Damped, 0).unwrap();
        // min (m-2)^2 + m^2 → m = 1; VR on data row only = 1 - 1/4
        assert!((fit.estimate[0] - 1.0).abs() < 1e-12);
        assert!((fit.variance_reduction - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_empty_grid_and_skipped_points() {
        let empty = LineModel { xs: vec![], ys: vec![], scales: vec![], weights: vec![] };
        assert_eq!(GridSearchSolver::default().solve(&empty, ModelKind::Pgd), Err(InversionError::EmptyGrid));

        let no_rows = LineModel { xs: vec![], ys: vec![], scales: vec![1.0, 2.0], weights: vec![] };
        assert!(matches!(
            GridSearchSolver::default().solve(&no_rows, ModelKind::Pgd),
            Err(InversionError::NoSolution(_))
        ));
    }
}
