use binaura_core::{BuildError, MapFn};
use ndarray::{Array1, Array2};
use rand::{rngs::StdRng, Rng};
use rand_distr::{Distribution, Normal};

use crate::Ensemble;

/// Representative inputs spanning `[-radius, radius]^dimensions`.
///
/// One dimension uses an evenly spaced grid so decoder fits are fully
/// deterministic; higher dimensions sample the ball through the caller's
/// seeded generator.
pub fn eval_points(dimensions: usize, radius: f64, count: usize, rng: &mut StdRng) -> Array2<f64> {
    let mut points = Array2::zeros((count, dimensions));
    if dimensions == 1 {
        let grid = Array1::linspace(-radius, radius, count);
        for (i, mut row) in points.rows_mut().into_iter().enumerate() {
            row[0] = grid[i];
        }
    } else {
        let normal = Normal::new(0.0, 1.0).expect("unit normal is valid");
        for mut row in points.rows_mut() {
            for v in row.iter_mut() {
                *v = normal.sample(rng);
            }
            let norm = row.dot(&row).sqrt().max(1e-12);
            let r = radius * rng.gen_range(0.0f64..=1.0).powf(1.0 / dimensions as f64);
            row.mapv_inplace(|v| v / norm * r);
        }
    }
    points
}

/// Fit a linear readout `D` so that `rates(x)·D ≈ f(x)` across the
/// evaluation points, by ridge-regularized least squares over the noiseless
/// tuning curves. `f` defaults to the identity.
///
/// Runs once per connection at build time; the simulation loop never touches
/// this again.
pub fn solve_decoders(
    ensemble: &Ensemble,
    function: Option<&MapFn>,
    points: &Array2<f64>,
) -> Result<Array2<f64>, BuildError> {
    let fit_error = |reason: &str| BuildError::DecoderFit(ensemble.label.clone(), reason.into());

    if ensemble.n_neurons() == 0 {
        return Err(fit_error("ensemble has no neurons"));
    }

    let n_points = points.nrows();
    let n_neurons = ensemble.n_neurons();

    // activity matrix: points × neurons
    let mut activities = Array2::zeros((n_points, n_neurons));
    for (i, point) in points.rows().into_iter().enumerate() {
        let rates = ensemble.rates(point.as_slice().expect("rows are contiguous"));
        activities.row_mut(i).assign(&rates);
    }

    // target matrix: points × output dimensions
    let first = apply(function, points.row(0).as_slice().expect("contiguous"));
    let size_out = first.len();
    let mut targets = Array2::zeros((n_points, size_out));
    targets.row_mut(0).assign(&Array1::from(first));
    for (i, point) in points.rows().into_iter().enumerate().skip(1) {
        let out = apply(function, point.as_slice().expect("contiguous"));
        if out.len() != size_out {
            return Err(fit_error("function output dimension varies across inputs"));
        }
        targets.row_mut(i).assign(&Array1::from(out));
    }

    let a_max = activities.iter().cloned().fold(0.0f64, f64::max);
    if !a_max.is_finite() || a_max <= 0.0 {
        return Err(fit_error("tuning curves are silent or non-finite"));
    }

    // normal equations with Tikhonov regularization, lambda scaled to the
    // mean squared activity
    let lambda = (0.1 * a_max).powi(2) * n_points as f64;
    let mut gram = activities.t().dot(&activities);
    for i in 0..n_neurons {
        gram[(i, i)] += lambda;
    }
    let projected = activities.t().dot(&targets);

    cholesky_solve(gram, projected)
        .ok_or_else(|| fit_error("activity matrix is rank-deficient beyond regularization"))
}

fn apply(function: Option<&MapFn>, x: &[f64]) -> Vec<f64> {
    match function {
        Some(f) => f(x),
        None => x.to_vec(),
    }
}

/// Solve `G·X = B` for symmetric positive-definite `G` by in-place Cholesky
/// factorization with forward/back substitution per column.
fn cholesky_solve(mut gram: Array2<f64>, rhs: Array2<f64>) -> Option<Array2<f64>> {
    let n = gram.nrows();

    // lower-triangular factor written over the input
    for j in 0..n {
        for k in 0..j {
            let l_jk = gram[(j, k)];
            for i in j..n {
                gram[(i, j)] -= gram[(i, k)] * l_jk;
            }
        }
        let diag = gram[(j, j)];
        if !(diag > 0.0) || !diag.is_finite() {
            return None;
        }
        let root = diag.sqrt();
        for i in j..n {
            gram[(i, j)] /= root;
        }
    }

    let mut solution = rhs;
    for mut column in solution.columns_mut() {
        // L·y = b
        for i in 0..n {
            let mut sum = column[i];
            for k in 0..i {
                sum -= gram[(i, k)] * column[k];
            }
            column[i] = sum / gram[(i, i)];
        }
        // Lᵀ·x = y
        for i in (0..n).rev() {
            let mut sum = column[i];
            for k in i + 1..n {
                sum -= gram[(k, i)] * column[k];
            }
            column[i] = sum / gram[(i, i)];
        }
    }
    Some(solution)
}
