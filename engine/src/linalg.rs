//! Cholesky factorisation and eigendecomposition-based pseudoinverse over
//! `nalgebra`, the pack's idiomatic pure-Rust linear-algebra crate (see
//! `DESIGN.md` for why it was added to a workspace that otherwise has no
//! linear-algebra dependency). `ndarray::Array2` stays the public currency
//! of the engine crate; conversion happens at this module's boundary only.

use nalgebra::{Cholesky, DMatrix, SymmetricEigen};
use ndarray::Array2;

pub fn to_dmatrix(a: &Array2<f64>) -> DMatrix<f64> {
    let (rows, cols) = a.dim();
    DMatrix::from_fn(rows, cols, |r, c| a[[r, c]])
}

pub fn to_array2(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(r, c)| m[(r, c)])
}

/// The lower-triangular factor `L` such that `cov = L * L^T`, or `None` if
/// `cov` is not positive definite (the caller falls back to
/// [`pseudo_inverse_and_log_det`]).
#[must_use]
pub fn cholesky(cov: &Array2<f64>) -> Option<Array2<f64>> {
    Cholesky::new(to_dmatrix(cov)).map(|c| to_array2(&c.unpack()))
}

/// Moore-Penrose pseudoinverse and log-pseudo-determinant of `cov` via
/// symmetric eigendecomposition, summing only eigenvalues strictly greater
/// than `dim * epsilon` (the threshold the GMM engine uses to detect a
/// singular covariance).
#[must_use]
pub fn pseudo_inverse_and_log_det(cov: &Array2<f64>, epsilon: f64) -> (Array2<f64>, f64) {
    let m = to_dmatrix(cov);
    let dim = m.nrows();
    let eig = SymmetricEigen::new(m);
    let threshold = dim as f64 * epsilon;

    let mut inv_diag = DMatrix::<f64>::zeros(dim, dim);
    let mut log_det = 0.0;
    for i in 0..dim {
        let lambda = eig.eigenvalues[i];
        if lambda > threshold {
            inv_diag[(i, i)] = 1.0 / lambda;
            log_det += lambda.ln();
        }
    }
    let v = &eig.eigenvectors;
    let pinv = v * inv_diag * v.transpose();
    (to_array2(&pinv), log_det)
}

/// Solve `l * y = rhs` by forward substitution (`l` lower-triangular).
#[must_use]
pub fn forward_substitute(l: &Array2<f64>, rhs: &ndarray::Array1<f64>) -> ndarray::Array1<f64> {
    let l = to_dmatrix(l);
    let rhs = nalgebra::DVector::from_iterator(rhs.len(), rhs.iter().copied());
    let y = l
        .solve_lower_triangular(&rhs)
        .expect("Cholesky factor is non-singular by construction");
    ndarray::Array1::from_iter(y.iter().copied())
}

/// A symmetric square root `S` of a positive-semidefinite `cov` (`S*S^T ≈
/// cov`) via eigendecomposition, clamping negative eigenvalues (numerical
/// noise on a nominally PSD matrix) to zero. Used to sample from a
/// covariance whose Cholesky factor does not exist.
#[must_use]
pub fn sqrt_symmetric(cov: &Array2<f64>) -> Array2<f64> {
    let m = to_dmatrix(cov);
    let eig = SymmetricEigen::new(m);
    let dim = eig.eigenvalues.len();
    let mut sqrt_diag = DMatrix::<f64>::zeros(dim, dim);
    for i in 0..dim {
        sqrt_diag[(i, i)] = eig.eigenvalues[i].max(0.0).sqrt();
    }
    to_array2(&(&eig.eigenvectors * sqrt_diag))
}
