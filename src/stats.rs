//! Convergence diagnostics computed from stored chain samples: burn-in posterior
//! statistics, batch-means Monte Carlo error, autocorrelation and the between-chain
//! potential scale reduction.

use ndarray::prelude::*;
use ndarray_stats::CorrelationExt;

use crate::error::McmcError;

/// Below this value of `ln(posterior std) - ln(Monte Carlo error)` the Monte Carlo error
/// is roughly a thousandth of the posterior spread and the chain may be stopped.
pub const STOPPING_LN_ERROR_DIFFERENCE: f64 = 6.9;

/// Posterior summaries of a chain after discarding `burn_in` samples.
///
/// # Fields
/// - `burn_in`: Number of leading samples that were discarded.
/// - `n_samples`: Number of samples the statistics were computed from.
/// - `expectation`: Sample mean per dimension.
/// - `covariance`: Bias-corrected (`N - 1`) covariance.
/// - `monte_carlo_error`: Batch-means standard error of `expectation`.
#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorStats {
    pub burn_in: usize,
    pub n_samples: usize,
    pub expectation: Array1<f64>,
    pub covariance: Array2<f64>,
    pub monte_carlo_error: Array1<f64>,
}

impl PosteriorStats {
    /// Computes the statistics from a `(n_samples, n_dim)` matrix, skipping the first
    /// `burn_in` rows. At least two rows must remain.
    pub fn from_samples(samples: &ArrayView2<f64>, burn_in: usize) -> Result<Self, McmcError> {
        let n_total = samples.nrows();
        if burn_in >= n_total || n_total - burn_in < 2 {
            return Err(McmcError::InvalidBurnIn {
                burn_in,
                n_samples: n_total,
            });
        }
        let burnt = samples.slice(s![burn_in.., ..]);
        let n_samples = burnt.nrows();

        let expectation = burnt.sum_axis(Axis(0)) / n_samples as f64;
        let monte_carlo_error = Array1::from_iter(
            burnt
                .columns()
                .into_iter()
                .zip(expectation.iter())
                .map(|(column, &mean)| batch_means_error(&column, mean)),
        );
        let covariance = burnt.t().cov(1.0).map_err(|_| McmcError::InvalidBurnIn {
            burn_in,
            n_samples: n_total,
        })?;

        Ok(Self {
            burn_in,
            n_samples,
            expectation,
            covariance,
            monte_carlo_error,
        })
    }

    /// `ln(sqrt(covariance_ii)) - ln(monte_carlo_error_i)` for every dimension.
    ///
    /// Small values (below [`STOPPING_LN_ERROR_DIFFERENCE`]) mean the Monte Carlo error is
    /// still large relative to the posterior spread.
    pub fn difference_ln_error(&self) -> Array1<f64> {
        let ln_std = self.covariance.diag().mapv(|v| v.sqrt().ln());
        ln_std - self.monte_carlo_error.mapv(f64::ln)
    }
}

/**
Batch-means estimate of the standard error of the mean of `series`.

The series is cut into `round(sqrt(n))` contiguous batches whose boundaries are
`round((i + 1) n / n_batch)`, so batch lengths differ by at most one. The error is

```text
sqrt( Σ_b len_b (batch_mean_b - mean)² / (n_batch · n) )
```

where `mean` is the overall mean of the series.

# Examples

```rust
use adaptive_mcmc::stats::batch_means_error;
use ndarray::arr1;

let series = arr1(&[1.0, 1.0, 3.0, 3.0]);
// two batches with means 1 and 3 around an overall mean of 2
let err = batch_means_error(&series.view(), 2.0);
assert!((err - 0.5_f64.sqrt()).abs() < 1e-12);
```
*/
pub fn batch_means_error(series: &ArrayView1<f64>, mean: f64) -> f64 {
    let n = series.len();
    let n_batch = (n as f64).sqrt().round() as usize;
    if n_batch == 0 {
        return f64::NAN;
    }
    let mut start = 0;
    let mut sum_sq = 0.0;
    for i_batch in 0..n_batch {
        let end = (((i_batch + 1) as f64) * (n as f64) / (n_batch as f64)).round() as usize;
        let batch = series.slice(s![start..end]);
        let batch_length = (end - start) as f64;
        let batch_mean = batch.sum() / batch_length;
        sum_sq += batch_length * (batch_mean - mean).powi(2);
        start = end;
    }
    (sum_sq / (n_batch * n) as f64).sqrt()
}

/**
Sample autocorrelation of `series` for lags `0..=max_lag`.

The series is centred on its sample mean, `S(k) = Σ_{i=0}^{n-1-k} x_i x_{i+k}` is computed
for every lag, and each lag is normalised by `S(0)`. `acf[0]` is exactly `1.0`.

# Examples

```rust
use adaptive_mcmc::stats::autocorrelation;
use ndarray::arr1;

let acf = autocorrelation(&arr1(&[1.0, -1.0, 1.0, -1.0]).view(), 1).unwrap();
assert_eq!(acf[0], 1.0);
assert!((acf[1] + 0.75).abs() < 1e-12);
```
*/
pub fn autocorrelation(series: &ArrayView1<f64>, max_lag: usize) -> Result<Array1<f64>, McmcError> {
    let n = series.len();
    if max_lag >= n {
        return Err(McmcError::InvalidLag {
            max_lag,
            n_samples: n,
        });
    }
    let mean = series.sum() / n as f64;
    let centred = series.mapv(|x| x - mean);

    let mut acf = Array1::from_iter((0..=max_lag).map(|lag| {
        let front = centred.slice(s![lag..]);
        let back = centred.slice(s![..n - lag]);
        front.dot(&back)
    }));
    let s0 = acf[0];
    acf.slice_mut(s![1..]).mapv_inplace(|v| v / s0);
    acf[0] = 1.0;
    Ok(acf)
}

/**
Potential scale reduction (Gelman-Rubin R-hat) per dimension across several chains.

Each element of `chains` is a `(n_samples, n_dim)` sample matrix; the first `burn_in`
rows of every chain are discarded. All chains must have the same shape and there must
be at least two of them. Values close to one indicate that the chains agree.
*/
pub fn potential_scale_reduction(
    chains: &[ArrayView2<f64>],
    burn_in: usize,
) -> Result<Array1<f64>, McmcError> {
    let n_chains = chains.len();
    let first = chains.first().ok_or(McmcError::TooFewChains(n_chains))?;
    if n_chains < 2 || chains.iter().any(|c| c.dim() != first.dim()) {
        return Err(McmcError::TooFewChains(n_chains));
    }
    let (n_total, n_dim) = first.dim();
    if burn_in >= n_total || n_total - burn_in < 2 {
        return Err(McmcError::InvalidBurnIn {
            burn_in,
            n_samples: n_total,
        });
    }
    let n = (n_total - burn_in) as f64;

    let mut means = Array2::<f64>::zeros((n_chains, n_dim));
    let mut variances = Array2::<f64>::zeros((n_chains, n_dim));
    for (i, chain) in chains.iter().enumerate() {
        let burnt = chain.slice(s![burn_in.., ..]);
        let mean = burnt.sum_axis(Axis(0)) / n;
        let var = burnt.var_axis(Axis(0), 1.0);
        means.row_mut(i).assign(&mean);
        variances.row_mut(i).assign(&var);
    }

    let within = variances.sum_axis(Axis(0)) / n_chains as f64;
    let grand_mean = means.sum_axis(Axis(0)) / n_chains as f64;
    let between = (&means - &grand_mean).mapv(|d| d * d).sum_axis(Axis(0)) * n
        / (n_chains as f64 - 1.0);
    let var_plus = &within * ((n - 1.0) / n) + &between / n;
    Ok((var_plus / within).mapv(f64::sqrt))
}
