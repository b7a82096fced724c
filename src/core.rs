//! The chain engine shared by every sampler: sample storage, online moments,
//! acceptance bookkeeping, posterior diagnostics, and the [`Chain`] trait that
//! concrete samplers implement by supplying a single `step`.

use std::time::{Duration, Instant};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use ndarray::prelude::*;
use rand::prelude::*;
use rayon::prelude::*;

use crate::distributions::Target;
use crate::error::McmcError;
use crate::linalg::outer;
use crate::stats::{autocorrelation, PosteriorStats};

/// Everything a chain stores about its own history.
///
/// `ChainState` owns the target, the preallocated `(chain_length, n_dim)` sample matrix,
/// the running mean and covariance of all stored samples, the cumulative acceptance rate
/// after every step, and the chain's random number generator. Samplers hold one and drive
/// it through [`ChainState::accept_step`] and [`ChainState::update_statistics`].
#[derive(Debug, Clone)]
pub struct ChainState<D> {
    target: D,
    samples: Array2<f64>,
    chain_mean: Array1<f64>,
    chain_covariance: Array2<f64>,
    acceptance: Vec<f64>,
    n_step: usize,
    n_accept: usize,
    seed: u64,
    rng: SmallRng,
    posterior: Option<PosteriorStats>,
}

impl<D: Target> ChainState<D> {
    /**
    Allocates storage for `chain_length` samples of `target.n_dim()` dimensions.

    The initial value (row 0) is the origin; use [`ChainState::set_initial_value`] to move
    it. The RNG is seeded from entropy; use [`ChainState::set_seed`] for reproducible runs.

    # Examples

    ```rust
    use adaptive_mcmc::core::ChainState;
    use adaptive_mcmc::distributions::Gaussian;

    let state = ChainState::new(Gaussian::standard(2), 100).unwrap().set_seed(42);
    assert_eq!(state.samples().dim(), (100, 2));
    assert_eq!(state.acceptance_rate().len(), 99);
    assert_eq!(state.n_step(), 0);
    ```
    */
    pub fn new(target: D, chain_length: usize) -> Result<Self, McmcError> {
        if chain_length == 0 {
            return Err(McmcError::InvalidChainLength(chain_length));
        }
        let n_dim = target.n_dim();
        if n_dim == 0 {
            return Err(McmcError::InvalidDimension);
        }
        let seed = thread_rng().gen::<u64>();
        Ok(Self {
            target,
            samples: Array2::zeros((chain_length, n_dim)),
            chain_mean: Array1::zeros(n_dim),
            chain_covariance: Array2::zeros((n_dim, n_dim)),
            acceptance: vec![0.0; chain_length - 1],
            n_step: 0,
            n_accept: 0,
            seed,
            rng: SmallRng::seed_from_u64(seed),
            posterior: None,
        })
    }

    /// Reseeds the chain's random number generator.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    /**
    Consumes the chain and returns one with room for `n_more_steps` further steps.

    Ownership of the pieces is explicit:
    - moved: the target, the RNG (so the random stream continues where it stopped), the
      running mean/covariance, the counters and the acceptance history;
    - copied: every stored sample, into freshly allocated storage of
      `chain_length + n_more_steps` rows.

    Cached posterior statistics are dropped since they describe the shorter chain.
    */
    pub fn extend(self, n_more_steps: usize) -> Self {
        let (old_length, n_dim) = self.samples.dim();
        let chain_length = old_length + n_more_steps;

        let mut samples = Array2::zeros((chain_length, n_dim));
        samples
            .slice_mut(s![..old_length, ..])
            .assign(&self.samples);
        let mut acceptance = self.acceptance;
        acceptance.resize(chain_length - 1, 0.0);

        Self {
            target: self.target,
            samples,
            chain_mean: self.chain_mean,
            chain_covariance: self.chain_covariance,
            acceptance,
            n_step: self.n_step,
            n_accept: self.n_accept,
            seed: self.seed,
            rng: self.rng,
            posterior: None,
        }
    }

    /// Overwrites the initial value (row 0), which is also the running mean of a chain
    /// holding one sample. Only allowed before the first step.
    pub fn set_initial_value(&mut self, initial_value: &[f64]) -> Result<(), McmcError> {
        if initial_value.len() != self.n_dim() {
            return Err(McmcError::DimensionMismatch {
                expected: self.n_dim(),
                found: initial_value.len(),
            });
        }
        if self.n_step > 0 {
            return Err(McmcError::InitialValueAfterStart);
        }
        let initial_value = ArrayView1::from(initial_value);
        self.samples.row_mut(0).assign(&initial_value);
        self.chain_mean.assign(&initial_value);
        Ok(())
    }

    /// Errors if no slot is left for another sample.
    pub(crate) fn ensure_capacity(&self) -> Result<(), McmcError> {
        if self.is_complete() {
            return Err(McmcError::ChainComplete(self.n_step));
        }
        Ok(())
    }

    /**
    Metropolis-Hastings accept/reject decision.

    Draws `u ~ Uniform(0, 1)`; if `u < accept_probability` the proposal is stored and the
    acceptance counter increments, otherwise `current` is stored again. The chosen point
    goes to row `n_step + 1`. Returns whether the proposal was accepted.
    */
    pub(crate) fn accept_step<'a>(
        &mut self,
        accept_probability: f64,
        current: &ArrayView1<'a, f64>,
        proposed: &ArrayView1<'a, f64>,
    ) -> Result<bool, McmcError> {
        self.ensure_capacity()?;
        let u: f64 = self.rng.gen();
        let accepted = u < accept_probability;
        let chosen = if accepted {
            self.n_accept += 1;
            proposed
        } else {
            current
        };
        self.samples.row_mut(self.n_step + 1).assign(chosen);
        Ok(accepted)
    }

    /**
    Books a completed step: records the cumulative acceptance rate, advances `n_step`
    and updates the running mean and covariance in O(n_dim²).

    With `n = n_step + 1` stored samples and `x` the newest one:

    ```text
    mean_n = ((n - 1) mean_{n-1} + x) / n
    cov_n  = ((n - 2) cov_{n-1} + n / (n - 1) (x - mean_n)(x - mean_n)ᵀ) / (n - 1)
    ```

    The first update builds the covariance of the two stored samples directly.
    */
    pub(crate) fn update_statistics(&mut self) -> Result<(), McmcError> {
        self.ensure_capacity()?;
        self.acceptance[self.n_step] = self.n_accept as f64 / (self.n_step + 1) as f64;
        self.n_step += 1;
        self.posterior = None;
        let n = (self.n_step + 1) as f64;

        let x = self.samples.row(self.n_step);
        self.chain_mean *= n - 1.0;
        self.chain_mean += &x;
        self.chain_mean /= n;

        let r = &x - &self.chain_mean;
        if self.n_step == 1 {
            let r0 = &self.samples.row(0) - &self.chain_mean;
            self.chain_covariance = outer(&r0.view(), &r0.view()) + outer(&r.view(), &r.view());
        } else {
            self.chain_covariance *= n - 2.0;
            self.chain_covariance
                .scaled_add(n / (n - 1.0), &outer(&r.view(), &r.view()));
            self.chain_covariance /= n - 1.0;
        }
        Ok(())
    }

    /// Draws one `Uniform(0, 1)` value from the chain's generator.
    pub(crate) fn uniform(&mut self) -> f64 {
        self.rng.gen()
    }

    pub(crate) fn rng_mut(&mut self) -> &mut SmallRng {
        &mut self.rng
    }

    /**
    Sample autocorrelation of dimension `dimension` for lags `0..=max_lag`, over every
    sample stored so far (burn-in is not removed). `acf[0]` is exactly one.
    */
    pub fn acf(&self, dimension: usize, max_lag: usize) -> Result<Array1<f64>, McmcError> {
        let series = self.dimension_series(dimension)?;
        autocorrelation(&series, max_lag)
    }

    /**
    Computes posterior expectation, covariance and Monte Carlo error from the stored
    samples after discarding the first `burn_in`, caches them on the chain and returns
    them. Calling it again with the same burn-in yields identical statistics.

    # Examples

    ```rust
    use adaptive_mcmc::core::Chain;
    use adaptive_mcmc::distributions::Gaussian;
    use adaptive_mcmc::metropolis_hastings::RandomWalkMetropolisHastings;
    use ndarray::arr2;

    let mut chain =
        RandomWalkMetropolisHastings::new(Gaussian::standard(1), 2_000, arr2(&[[1.0]]))
            .unwrap()
            .set_seed(1);
    chain.run().unwrap();
    let stats = chain.calculate_posterior_statistics(500).unwrap();
    assert_eq!(stats.n_samples, 1_500);
    assert!(stats.monte_carlo_error[0] > 0.0);
    ```
    */
    pub fn calculate_posterior_statistics(
        &mut self,
        burn_in: usize,
    ) -> Result<&PosteriorStats, McmcError> {
        let stored = self.samples.slice(s![..=self.n_step, ..]);
        let stats = PosteriorStats::from_samples(&stored, burn_in)?;
        Ok(self.posterior.insert(stats))
    }

    /// `ln(posterior std) - ln(Monte Carlo error)` per dimension, see
    /// [`PosteriorStats::difference_ln_error`].
    pub fn difference_ln_error(&self) -> Result<Array1<f64>, McmcError> {
        Ok(self.posterior()?.difference_ln_error())
    }

    pub fn posterior(&self) -> Result<&PosteriorStats, McmcError> {
        self.posterior
            .as_ref()
            .ok_or(McmcError::MissingPosteriorStatistics)
    }

    pub fn posterior_expectation(&self) -> Result<ArrayView1<'_, f64>, McmcError> {
        Ok(self.posterior()?.expectation.view())
    }

    pub fn posterior_covariance(&self) -> Result<ArrayView2<'_, f64>, McmcError> {
        Ok(self.posterior()?.covariance.view())
    }

    pub fn monte_carlo_error(&self) -> Result<ArrayView1<'_, f64>, McmcError> {
        Ok(self.posterior()?.monte_carlo_error.view())
    }

    pub fn target(&self) -> &D {
        &self.target
    }

    pub fn n_dim(&self) -> usize {
        self.samples.ncols()
    }

    pub fn chain_length(&self) -> usize {
        self.samples.nrows()
    }

    /// Number of steps taken; `0` means only the initial value is stored.
    pub fn n_step(&self) -> usize {
        self.n_step
    }

    pub fn n_accept(&self) -> usize {
        self.n_accept
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn is_complete(&self) -> bool {
        self.n_step + 1 >= self.chain_length()
    }

    /// The full `(chain_length, n_dim)` sample matrix; rows past `n_step` are still zero.
    pub fn samples(&self) -> ArrayView2<'_, f64> {
        self.samples.view()
    }

    /// Samples of one dimension, up to and including the latest step.
    pub fn dimension_series(&self, dimension: usize) -> Result<ArrayView1<'_, f64>, McmcError> {
        if dimension >= self.n_dim() {
            return Err(McmcError::DimensionOutOfRange {
                dimension,
                n_dim: self.n_dim(),
            });
        }
        Ok(self.samples.slice(s![..=self.n_step, dimension]))
    }

    /// Cumulative acceptance rate after each step; entry `i` is `n_accept / (i + 1)`
    /// as it was after step `i + 1`.
    pub fn acceptance_rate(&self) -> &[f64] {
        &self.acceptance
    }

    /// The latest stored sample.
    pub fn end_of_chain(&self) -> ArrayView1<'_, f64> {
        self.samples.row(self.n_step)
    }

    /// Running mean of every sample stored so far.
    pub fn chain_mean(&self) -> ArrayView1<'_, f64> {
        self.chain_mean.view()
    }

    /// Running (`n - 1` divisor) covariance of every sample stored so far.
    pub fn chain_covariance(&self) -> ArrayView2<'_, f64> {
        self.chain_covariance.view()
    }
}

/// A Markov chain whose history lives in a [`ChainState`].
///
/// Implementors supply [`Chain::step`]; running, progress reporting and the diagnostics
/// come from the shared state. Samples and running moments are only ever written by
/// `step`; the mutable state exposes validated setters and the posterior cache.
pub trait Chain {
    type Target: Target;

    fn state(&self) -> &ChainState<Self::Target>;

    fn state_mut(&mut self) -> &mut ChainState<Self::Target>;

    /// Performs exactly one transition, storing one new sample and updating the running
    /// statistics. Fails with [`McmcError::ChainComplete`] once every slot is filled.
    fn step(&mut self) -> Result<(), McmcError>;

    /// Steps until the chain is complete: `chain_length - 1` steps for a fresh chain, the
    /// remaining ones for an extended chain.
    fn run(&mut self) -> Result<(), McmcError> {
        while !self.state().is_complete() {
            self.step()?;
        }
        log::info!(
            "chain finished after {} steps, acceptance rate {:.3}",
            self.state().n_step(),
            self.state().acceptance_rate().last().copied().unwrap_or(0.0)
        );
        Ok(())
    }

    /// Sets the starting point of the chain; only allowed before the first step.
    fn set_initial_value(&mut self, initial_value: &[f64]) -> Result<(), McmcError> {
        self.state_mut().set_initial_value(initial_value)
    }

    /// Computes and caches posterior statistics after discarding `burn_in` samples, see
    /// [`ChainState::calculate_posterior_statistics`].
    fn calculate_posterior_statistics(
        &mut self,
        burn_in: usize,
    ) -> Result<&PosteriorStats, McmcError> {
        self.state_mut().calculate_posterior_statistics(burn_in)
    }

    /// Like [`Chain::run`], drawing a progress bar with the running acceptance rate.
    fn run_progress(&mut self) -> Result<(), McmcError> {
        let remaining = self.state().chain_length() - 1 - self.state().n_step();
        let pb = ProgressBar::new(remaining as u64);
        pb.set_style(progress_style());
        pb.set_prefix("Chain");
        run_with_progress_bar(self, &pb)?;
        pb.finish_with_message("Done!");
        Ok(())
    }
}

const UPDATE_INTERVAL: Duration = Duration::from_millis(500);

fn progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
}

/// Steps `chain` to completion, refreshing `pb` roughly every 500 milliseconds.
fn run_with_progress_bar<C: Chain + ?Sized>(
    chain: &mut C,
    pb: &ProgressBar,
) -> Result<(), McmcError> {
    let mut last_update = Instant::now();
    while !chain.state().is_complete() {
        chain.step()?;
        pb.inc(1);
        if last_update.elapsed() >= UPDATE_INTERVAL || chain.state().is_complete() {
            let accept_rate = chain.state().acceptance_rate()[chain.state().n_step() - 1];
            pb.set_message(format!("AcceptRate={:.3}", accept_rate));
            last_update = Instant::now();
        }
    }
    Ok(())
}

/**
Runs independent chains to completion in parallel on the rayon thread pool.

Each chain is handed to exactly one worker, so the per-chain state stays single-owner.
Stops at the first error.

# Examples

```rust
use adaptive_mcmc::core::{run_chains, Chain};
use adaptive_mcmc::distributions::Gaussian;
use adaptive_mcmc::metropolis_hastings::AdaptiveRwmh;
use ndarray::Array2;

let mut chains: Vec<_> = (0..4)
    .map(|i| {
        AdaptiveRwmh::new(Gaussian::standard(2), 500, Array2::eye(2))
            .unwrap()
            .set_seed(42 + i)
    })
    .collect();
run_chains(&mut chains).unwrap();
assert!(chains.iter().all(|c| c.state().is_complete()));
```
*/
pub fn run_chains<C>(chains: &mut [C]) -> Result<(), McmcError>
where
    C: Chain + Send,
{
    chains.par_iter_mut().try_for_each(|chain| chain.run())
}

/// Like [`run_chains`], with one progress bar per chain.
pub fn run_chains_progress<C>(chains: &mut [C]) -> Result<(), McmcError>
where
    C: Chain + Send,
{
    let multi = MultiProgress::new();
    let pb_style = progress_style();
    chains
        .par_iter_mut()
        .enumerate()
        .try_for_each(|(i, chain)| {
            let remaining = chain.state().chain_length() - 1 - chain.state().n_step();
            let pb = multi.add(ProgressBar::new(remaining as u64));
            pb.set_prefix(format!("Chain {i}"));
            pb.set_style(pb_style.clone());
            run_with_progress_bar(chain, &pb)?;
            pb.finish_with_message("Done!");
            Ok(())
        })
}
