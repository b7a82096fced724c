//! Small dense linear-algebra helpers used by the proposals and the running moments.
//!
//! Only what the chains need lives here: a lower Cholesky factorization that reports
//! failure as `None` rather than panicking, outer products, and standard-normal draws.

use nalgebra::{DMatrix, DVector};
use ndarray::prelude::*;
use rand::Rng;
use rand_distr::StandardNormal;

/// Lower-triangular factor `L` of a positive-definite matrix `A = L Lᵀ`.
///
/// A `CholeskyFactor` can only be obtained through [`cholesky`], so holding one means the
/// factorization succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct CholeskyFactor {
    lower: DMatrix<f64>,
}

impl CholeskyFactor {
    /// Factor of the identity matrix, which is its own Cholesky factor.
    pub fn identity(dim: usize) -> Self {
        Self {
            lower: DMatrix::identity(dim, dim),
        }
    }

    /// A copy of the lower-triangular matrix `L`.
    pub fn lower(&self) -> Array2<f64> {
        let n = self.dim();
        Array2::from_shape_fn((n, n), |(i, j)| self.lower[(i, j)])
    }

    /// Dimension of the factorized matrix.
    pub fn dim(&self) -> usize {
        self.lower.nrows()
    }

    /// Maps a standard-normal vector `z` to `L z`, a draw with covariance `L Lᵀ`.
    pub fn transform(&self, z: &ArrayView1<f64>) -> Array1<f64> {
        let x = &self.lower * to_vector(z);
        Array1::from_iter(x.iter().copied())
    }

    /// Solves `L y = b` by forward substitution. `None` only if `b` has the wrong length.
    pub fn solve_lower(&self, b: &ArrayView1<f64>) -> Option<Array1<f64>> {
        if b.len() != self.dim() {
            return None;
        }
        let y = self.lower.solve_lower_triangular(&to_vector(b))?;
        Some(Array1::from_iter(y.iter().copied()))
    }
}

fn to_vector(v: &ArrayView1<f64>) -> DVector<f64> {
    DVector::from_iterator(v.len(), v.iter().copied())
}

fn to_matrix(m: &ArrayView2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(m.nrows(), m.ncols(), |i, j| m[[i, j]])
}

/**
Computes the lower Cholesky factor of a symmetric matrix.

Returns `None` when the matrix is not square or not (numerically) positive definite, so
callers decide how to recover.

# Examples

```rust
use adaptive_mcmc::linalg::cholesky;
use ndarray::arr2;

let factor = cholesky(&arr2(&[[4.0, 2.0], [2.0, 3.0]]).view()).unwrap();
assert_eq!(factor.lower()[[0, 0]], 2.0);
assert!(cholesky(&arr2(&[[1.0, 2.0], [2.0, 1.0]]).view()).is_none());
```
*/
pub fn cholesky(matrix: &ArrayView2<f64>) -> Option<CholeskyFactor> {
    if !matrix.is_square() {
        return None;
    }
    let lower = to_matrix(matrix).cholesky()?.unpack();
    if lower.iter().any(|x| !x.is_finite()) {
        return None;
    }
    Some(CholeskyFactor { lower })
}

/// Outer product `a bᵀ`.
pub fn outer(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> Array2<f64> {
    let a = a.view().insert_axis(Axis(1));
    let b = b.view().insert_axis(Axis(0));
    a.dot(&b)
}

/// Draws `n` independent standard-normal values.
pub fn standard_normal_vector<R: Rng>(rng: &mut R, n: usize) -> Array1<f64> {
    Array1::from_iter((0..n).map(|_| rng.sample::<f64, _>(StandardNormal)))
}
