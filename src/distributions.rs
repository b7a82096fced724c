/*!
Target distributions for the chains.

Any type implementing [`Target`] can be sampled: it only has to report its dimensionality
and evaluate a log-density (up to an additive constant) at a point. Points outside the
support should evaluate to `f64::NEG_INFINITY`; NaN is never a valid return value.

A multivariate [`Gaussian`] is provided as a reference target.

# Examples

```rust
use adaptive_mcmc::distributions::{Gaussian, Target};
use ndarray::{arr1, arr2};

let target = Gaussian::new(arr1(&[0.0, 1.0]), arr2(&[[4.0, 2.0], [2.0, 3.0]])).unwrap();
assert_eq!(target.n_dim(), 2);
let lp = target.log_density(&arr1(&[0.0, 1.0]).view());
assert_eq!(lp, 0.0);
```
*/

use ndarray::prelude::*;

use crate::error::McmcError;
use crate::linalg::{cholesky, CholeskyFactor};

/// A continuous target distribution we want to sample from.
pub trait Target {
    /// Number of dimensions of the sample space; fixed for the lifetime of the target.
    fn n_dim(&self) -> usize;

    /// Log of the (possibly unnormalized) density at `point`.
    fn log_density(&self, point: &ArrayView1<f64>) -> f64;
}

impl<T: Target + ?Sized> Target for &T {
    fn n_dim(&self) -> usize {
        (**self).n_dim()
    }

    fn log_density(&self, point: &ArrayView1<f64>) -> f64 {
        (**self).log_density(point)
    }
}

/**
A multivariate Gaussian `N(mean, cov)` evaluated through the Cholesky factor of its
covariance. `log_density` drops the normalizing constant.

# Examples

```rust
use adaptive_mcmc::distributions::{Gaussian, Target};
use ndarray::arr1;

let target = Gaussian::standard(3);
assert_eq!(target.n_dim(), 3);
assert_eq!(target.log_density(&arr1(&[1.0, 0.0, 0.0]).view()), -0.5);
```
*/
#[derive(Debug, Clone, PartialEq)]
pub struct Gaussian {
    mean: Array1<f64>,
    cov: Array2<f64>,
    chol: CholeskyFactor,
}

impl Gaussian {
    /// Creates a Gaussian with the given mean and covariance. Fails if the covariance
    /// does not match the mean or is not positive definite.
    pub fn new(mean: Array1<f64>, cov: Array2<f64>) -> Result<Self, McmcError> {
        let n_dim = mean.len();
        if n_dim == 0 {
            return Err(McmcError::InvalidDimension);
        }
        if cov.dim() != (n_dim, n_dim) {
            return Err(McmcError::DimensionMismatch {
                expected: n_dim,
                found: cov.nrows(),
            });
        }
        let chol = cholesky(&cov.view()).ok_or(McmcError::NotPositiveDefinite)?;
        Ok(Self { mean, cov, chol })
    }

    /// Standard normal in `n_dim` dimensions.
    pub fn standard(n_dim: usize) -> Self {
        let mean = Array1::zeros(n_dim);
        let cov = Array2::eye(n_dim);
        let chol = CholeskyFactor::identity(n_dim);
        Self { mean, cov, chol }
    }

    pub fn mean(&self) -> ArrayView1<'_, f64> {
        self.mean.view()
    }

    pub fn cov(&self) -> ArrayView2<'_, f64> {
        self.cov.view()
    }
}

impl Target for Gaussian {
    fn n_dim(&self) -> usize {
        self.mean.len()
    }

    fn log_density(&self, point: &ArrayView1<f64>) -> f64 {
        // With L y = x - mean, the quadratic form is |y|^2.
        let diff = point - &self.mean;
        match self.chol.solve_lower(&diff.view()) {
            Some(y) => -0.5 * y.dot(&y),
            None => f64::NEG_INFINITY,
        }
    }
}
