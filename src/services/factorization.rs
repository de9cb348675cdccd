use nalgebra::DMatrix;
use ndarray::{Array1, Array2, Axis};
use rand::{rngs::StdRng, Rng, SeedableRng};
use thiserror::Error;

use crate::services::sparse::CsrMatrix;

/// Error types for the factorization engine
#[derive(Debug, Error, PartialEq)]
pub enum FactorizationError {
    #[error("Matrix of shape {rows}x{cols} is too small to factorize")]
    Degenerate { rows: usize, cols: usize },
    #[error("Residual matrix contains non-finite values")]
    NonFinite,
    #[error("Dense SVD of the projected matrix did not converge")]
    NoConvergence,
}

/// Tuning knobs for the randomized range finder
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SvdOptions {
    /// Minimum extra sketch columns beyond k; the sketch is never narrower than 2k
    pub oversampling: usize,
    /// Subspace iterations always run before convergence is checked
    pub power_iterations: usize,
    /// Hard cap on subspace iterations
    pub max_iterations: usize,
    /// Largest relative change of the top-k singular values accepted as converged
    pub tolerance: f64,
    pub seed: u64,
}

impl Default for SvdOptions {
    fn default() -> Self {
        Self {
            oversampling: 10,
            power_iterations: 4,
            max_iterations: 60,
            tolerance: 1e-10,
            seed: 42,
        }
    }
}

/// Rank-k decomposition A ≈ U · diag(s) · Vᵗ
#[derive(Debug, Clone, PartialEq)]
pub struct TruncatedSvd {
    /// n_rows × k
    pub u: Array2<f64>,
    /// Length k, descending
    pub singular_values: Array1<f64>,
    /// k × n_cols
    pub vt: Array2<f64>,
}

impl TruncatedSvd {
    pub fn rank(&self) -> usize {
        self.singular_values.len()
    }

    /// Singular values as a k×k diagonal matrix
    pub fn sigma(&self) -> Array2<f64> {
        Array2::from_diag(&self.singular_values)
    }

    /// Dense U · Σ · Vᵗ, for small matrices and tests
    pub fn reconstruct(&self) -> Array2<f64> {
        (&self.u * &self.singular_values).dot(&self.vt)
    }
}

/// Largest usable rank for a matrix of the given shape
///
/// Requests above `min(rows, cols) - 1` are silently clamped; a matrix with
/// a dimension of one or less cannot be factorized at all.
pub fn clamp_rank(requested: usize, rows: usize, cols: usize) -> Result<usize, FactorizationError> {
    let min_dim = rows.min(cols);
    if min_dim <= 1 {
        return Err(FactorizationError::Degenerate { rows, cols });
    }
    Ok(requested.clamp(1, min_dim - 1))
}

/// Sketch width for rank `k`: k plus `max(oversampling, k)`, capped at `min_dim`
pub fn sketch_width(k: usize, oversampling: usize, min_dim: usize) -> usize {
    (k + oversampling.max(k)).min(min_dim)
}

/// Reorders singular triplets so singular values are descending
///
/// Column i of `u`, entry i of `s` and row i of `vt` move together.
pub fn order_descending(
    u: Array2<f64>,
    s: Array1<f64>,
    vt: Array2<f64>,
) -> (Array2<f64>, Array1<f64>, Array2<f64>) {
    let mut order: Vec<usize> = (0..s.len()).collect();
    order.sort_by(|&a, &b| s[b].total_cmp(&s[a]));
    if order.iter().enumerate().all(|(i, &o)| i == o) {
        return (u, s, vt);
    }
    (
        u.select(Axis(1), &order),
        s.select(Axis(0), &order),
        vt.select(Axis(0), &order),
    )
}

fn to_dmatrix(a: &Array2<f64>) -> DMatrix<f64> {
    let (rows, cols) = a.dim();
    DMatrix::from_fn(rows, cols, |i, j| a[[i, j]])
}

fn to_array(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn(m.shape(), |(i, j)| m[(i, j)])
}

/// Orthonormal basis of the column space of a tall matrix (thin Householder QR)
fn orthonormal_basis(a: Array2<f64>) -> Array2<f64> {
    to_array(&to_dmatrix(&a).qr().q())
}

/// Dense thin SVD, reordered to descending singular values
fn dense_svd(
    a: &Array2<f64>,
) -> Result<(Array2<f64>, Array1<f64>, Array2<f64>), FactorizationError> {
    let svd = to_dmatrix(a)
        .try_svd(true, true, f64::EPSILON, 0)
        .ok_or(FactorizationError::NoConvergence)?;
    let u = svd.u.ok_or(FactorizationError::NoConvergence)?;
    let v_t = svd.v_t.ok_or(FactorizationError::NoConvergence)?;
    let s = Array1::from_iter(svd.singular_values.iter().copied());
    Ok(order_descending(to_array(&u), s, to_array(&v_t)))
}

fn max_relative_change(previous: &Array1<f64>, current: &Array1<f64>, k: usize) -> f64 {
    let scale = current.first().copied().unwrap_or(0.0).max(f64::MIN_POSITIVE);
    previous
        .iter()
        .zip(current.iter())
        .take(k)
        .map(|(p, c)| (p - c).abs() / c.abs().max(scale * f64::EPSILON))
        .fold(0.0, f64::max)
}

/// Truncated SVD of a sparse matrix by randomized subspace iteration
///
/// After `power_iterations` rounds, iteration continues until the top-k
/// singular values stop moving (relative change below `tolerance`) or
/// `max_iterations` is reached. A sketch as wide as the smaller dimension is
/// exact after the first projection.
pub fn truncated_svd(
    matrix: &CsrMatrix,
    k: usize,
    options: &SvdOptions,
) -> Result<TruncatedSvd, FactorizationError> {
    let (rows, cols) = matrix.shape();
    let k = clamp_rank(k, rows, cols)?;
    let width = sketch_width(k, options.oversampling, rows.min(cols));

    let mut rng = StdRng::seed_from_u64(options.seed);
    let omega = Array2::from_shape_simple_fn((cols, width), || rng.gen_range(-1.0..1.0));
    let mut q = orthonormal_basis(matrix.dot_dense(&omega.view()));
    drop(omega);

    let max_iterations = options.max_iterations.max(options.power_iterations);
    let mut previous: Option<Array1<f64>> = None;
    let mut iterations = 0;
    let (ub, s, vbt) = loop {
        // Bᵗ = Aᵗ Q is tall (cols × width)
        let bt = matrix.transpose_dot_dense(&q.view());
        if bt.iter().any(|v| !v.is_finite()) {
            return Err(FactorizationError::NonFinite);
        }

        let spans_range = width == rows.min(cols);
        if spans_range || iterations >= options.power_iterations {
            let (ub, s, vbt) = dense_svd(&bt)?;
            let converged = previous
                .as_ref()
                .is_some_and(|p| max_relative_change(p, &s, k) <= options.tolerance);
            if spans_range || converged || iterations >= max_iterations {
                break (ub, s, vbt);
            }
            previous = Some(s);
        }

        let z = orthonormal_basis(bt);
        q = orthonormal_basis(matrix.dot_dense(&z.view()));
        iterations += 1;
    };

    // A ≈ Q B = (Q Vb) Σ Ubᵗ
    let u = q.dot(&vbt.t());
    let vt = ub.t().to_owned();

    let u = u.slice(ndarray::s![.., ..k]).to_owned();
    let singular_values = s.slice(ndarray::s![..k]).to_owned();
    let vt = vt.slice(ndarray::s![..k, ..]).to_owned();

    tracing::info!(
        rows,
        cols,
        k,
        sketch_width = width,
        iterations,
        top_singular_value = singular_values.first().copied().unwrap_or(0.0),
        "Truncated SVD computed"
    );

    Ok(TruncatedSvd {
        u,
        singular_values,
        vt,
    })
}
