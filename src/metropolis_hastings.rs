/*!
# Random-Walk Metropolis–Hastings

This module implements random-walk Metropolis–Hastings on top of the shared
[`ChainState`] engine. A [`MetropolisHastings`] chain pairs the state with a
[`Proposal`] strategy that picks the proposal covariance for each step:

- [`RandomWalkMetropolisHastings`]: fixed proposal covariance.
- [`AdaptiveRwmh`]: proposal covariance follows the running chain covariance.
- [`MixtureAdaptiveRwmh`]: adaptive proposal mixed with a fixed safety proposal.

Every step proposes `x' = x + L z` with `z ~ N(0, I)` and `L` the Cholesky factor chosen by
the proposal. Since the proposal is symmetric, the acceptance probability is

```text
min(1, exp(log p(x') - log p(x)))
```

## Example Usage

```rust
use adaptive_mcmc::core::Chain;
use adaptive_mcmc::distributions::Gaussian;
use adaptive_mcmc::metropolis_hastings::AdaptiveRwmh;
use ndarray::{arr1, arr2};

let target = Gaussian::new(arr1(&[0.0, 1.0]), arr2(&[[4.0, 2.0], [2.0, 3.0]])).unwrap();
let mut chain = AdaptiveRwmh::new(target, 5_000, arr2(&[[1.0, 0.0], [0.0, 1.0]]))
    .unwrap()
    .set_seed(42);
chain.run().unwrap();

let stats = chain.calculate_posterior_statistics(1_000).unwrap();
assert_eq!(stats.expectation.len(), 2);
assert_eq!(chain.state().acceptance_rate().len(), 4_999);
```
*/

use ndarray::prelude::*;

use crate::core::{Chain, ChainState};
use crate::distributions::Target;
use crate::error::McmcError;
use crate::linalg::standard_normal_vector;
use crate::proposal::{AdaptiveProposal, FixedProposal, MixtureProposal, Proposal};

/// Random-walk Metropolis–Hastings with a fixed proposal covariance.
pub type RandomWalkMetropolisHastings<D> = MetropolisHastings<D, FixedProposal>;

/// Random-walk Metropolis–Hastings with global adaptive scaling.
pub type AdaptiveRwmh<D> = MetropolisHastings<D, AdaptiveProposal>;

/// Adaptive random-walk Metropolis–Hastings mixed with a fixed safety proposal.
pub type MixtureAdaptiveRwmh<D> = MetropolisHastings<D, MixtureProposal>;

/**
A random-walk Metropolis–Hastings chain.

# Type Parameters
- `D`: The target distribution. Must implement [`Target`].
- `P`: The proposal strategy. Must implement [`Proposal`].
*/
#[derive(Debug, Clone)]
pub struct MetropolisHastings<D, P> {
    state: ChainState<D>,
    proposal: P,
}

/// `min(1, exp(log_ratio))`, with an undefined ratio (e.g. both densities `-inf`)
/// counted as a certain rejection.
pub fn acceptance_probability(log_ratio: f64) -> f64 {
    if log_ratio.is_nan() {
        0.0
    } else {
        log_ratio.exp().min(1.0)
    }
}

impl<D: Target, P: Proposal> MetropolisHastings<D, P> {
    /// Combines a chain state with a proposal strategy of matching dimension.
    pub fn from_parts(state: ChainState<D>, proposal: P) -> Result<Self, McmcError> {
        if proposal.dim() != state.n_dim() {
            return Err(McmcError::DimensionMismatch {
                expected: state.n_dim(),
                found: proposal.dim(),
            });
        }
        Ok(Self { state, proposal })
    }

    /// Reseeds the chain's random number generator.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.state = self.state.set_seed(seed);
        self
    }

    /**
    Consumes the chain and returns it with room for `n_more_steps` further steps.

    Stored samples are copied into the larger storage; the target, generator, running
    moments, counters and the proposal (including any adapted factor) carry over, so
    running the extended chain continues exactly where the old one stopped.
    */
    pub fn extend(self, n_more_steps: usize) -> Self {
        Self {
            state: self.state.extend(n_more_steps),
            proposal: self.proposal,
        }
    }

    pub fn proposal(&self) -> &P {
        &self.proposal
    }

    pub fn into_state(self) -> ChainState<D> {
        self.state
    }
}

impl<D: Target> MetropolisHastings<D, FixedProposal> {
    /// Creates a chain of `chain_length` samples proposing with `proposal_covariance`.
    /// Fails if the covariance is not positive definite.
    pub fn new(
        target: D,
        chain_length: usize,
        proposal_covariance: Array2<f64>,
    ) -> Result<Self, McmcError> {
        let proposal = FixedProposal::new(&proposal_covariance.view())?;
        Self::from_parts(ChainState::new(target, chain_length)?, proposal)
    }
}

impl<D: Target> MetropolisHastings<D, AdaptiveProposal> {
    /// Creates an adaptive chain; `proposal_covariance` drives the first `2 n_dim + 1` steps.
    pub fn new(
        target: D,
        chain_length: usize,
        proposal_covariance: Array2<f64>,
    ) -> Result<Self, McmcError> {
        let proposal = AdaptiveProposal::new(&proposal_covariance.view())?;
        Self::from_parts(ChainState::new(target, chain_length)?, proposal)
    }
}

impl<D: Target> MetropolisHastings<D, MixtureProposal> {
    /// Creates a mixture-adaptive chain; `proposal_covariance` is used for the first
    /// `2 n_dim + 1` steps and as the safety proposal afterwards.
    pub fn new(
        target: D,
        chain_length: usize,
        proposal_covariance: Array2<f64>,
    ) -> Result<Self, McmcError> {
        let proposal = MixtureProposal::new(&proposal_covariance.view())?;
        Self::from_parts(ChainState::new(target, chain_length)?, proposal)
    }

    /// Sets the probability of a safety step, in `[0, 1]` (default 0.05).
    pub fn set_probability_safety(mut self, probability_safety: f64) -> Result<Self, McmcError> {
        self.proposal = self.proposal.set_probability_safety(probability_safety)?;
        Ok(self)
    }
}

impl<D: Target, P: Proposal> Chain for MetropolisHastings<D, P> {
    type Target = D;

    fn state(&self) -> &ChainState<D> {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ChainState<D> {
        &mut self.state
    }

    /**
    Performs one Metropolis–Hastings step.

    The proposal strategy picks the Cholesky factor `L`, a standard-normal `z` is drawn
    and `x + L z` is accepted with probability `min(1, p(x + L z) / p(x))`.
    */
    fn step(&mut self) -> Result<(), McmcError> {
        self.state.ensure_capacity()?;
        let n_dim = self.state.n_dim();
        let chol = self.proposal.factor(&mut self.state);

        let current = self.state.end_of_chain().to_owned();
        let z = standard_normal_vector(self.state.rng_mut(), n_dim);
        let proposed = &current + &chol.transform(&z.view());

        let target = self.state.target();
        let log_ratio =
            target.log_density(&proposed.view()) - target.log_density(&current.view());

        self.state
            .accept_step(acceptance_probability(log_ratio), &current.view(), &proposed.view())?;
        self.state.update_statistics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::Gaussian;
    use approx::assert_abs_diff_eq;
    use ndarray::arr2;
    use ndarray_stats::CorrelationExt;

    /// Log-density `0` at the origin and `-inf` everywhere else.
    #[derive(Debug, Clone)]
    struct PointMass {
        n_dim: usize,
    }

    impl Target for PointMass {
        fn n_dim(&self) -> usize {
            self.n_dim
        }

        fn log_density(&self, point: &ArrayView1<f64>) -> f64 {
            if point.iter().all(|&x| x == 0.0) {
                0.0
            } else {
                f64::NEG_INFINITY
            }
        }
    }

    /// `-inf` everywhere, so every log ratio is undefined.
    #[derive(Debug, Clone)]
    struct Nowhere;

    impl Target for Nowhere {
        fn n_dim(&self) -> usize {
            2
        }

        fn log_density(&self, _point: &ArrayView1<f64>) -> f64 {
            f64::NEG_INFINITY
        }
    }

    #[test]
    fn acceptance_probability_is_clamped() {
        assert_eq!(acceptance_probability(0.5), 1.0);
        assert_eq!(acceptance_probability(f64::INFINITY), 1.0);
        assert_eq!(acceptance_probability(f64::NEG_INFINITY), 0.0);
        assert_eq!(acceptance_probability(f64::NAN), 0.0);
        assert_abs_diff_eq!(acceptance_probability(-1.0), (-1.0_f64).exp());
    }

    #[test]
    fn standard_normal_scenario() {
        let mut chain =
            RandomWalkMetropolisHastings::new(Gaussian::standard(1), 10_000, arr2(&[[1.0]]))
                .unwrap()
                .set_seed(42);
        chain.set_initial_value(&[0.0]).unwrap();
        chain.run().unwrap();

        let stats = chain.calculate_posterior_statistics(1_000).unwrap();
        assert_abs_diff_eq!(stats.expectation[0], 0.0, epsilon = 0.05);
        assert_abs_diff_eq!(stats.covariance[[0, 0]], 1.0, epsilon = 0.1);
    }

    #[test]
    fn acceptance_record_is_cumulative() {
        let mut chain =
            RandomWalkMetropolisHastings::new(Gaussian::standard(2), 500, Array2::eye(2))
                .unwrap()
                .set_seed(7);
        chain.run().unwrap();

        let rates = chain.state().acceptance_rate();
        assert_eq!(rates.len(), 499);
        let mut previous = 0;
        for (i, &rate) in rates.iter().enumerate() {
            assert!((0.0..=1.0).contains(&rate));
            let n_accepted = (rate * (i + 1) as f64).round() as usize;
            assert!(n_accepted == previous || n_accepted == previous + 1);
            previous = n_accepted;
        }
        assert_eq!(previous, chain.state().n_accept());
    }

    #[test]
    fn running_moments_match_stored_samples() {
        let target = Gaussian::new(
            ndarray::arr1(&[1.0, -1.0]),
            arr2(&[[2.0, 0.5], [0.5, 1.0]]),
        )
        .unwrap();
        let mut chain = AdaptiveRwmh::new(target, 3_000, Array2::eye(2))
            .unwrap()
            .set_seed(11);
        chain.run().unwrap();

        let samples = chain.state().samples();
        let mean = samples.mean_axis(Axis(0)).unwrap();
        let cov = samples.t().cov(1.0).unwrap();
        assert_abs_diff_eq!(chain.state().chain_mean(), mean.view(), epsilon = 1e-9);
        assert_abs_diff_eq!(chain.state().chain_covariance(), cov.view(), epsilon = 1e-9);
    }

    #[test]
    fn running_mean_counts_initial_value() {
        let mut chain =
            RandomWalkMetropolisHastings::new(Gaussian::standard(1), 5, arr2(&[[1.0]]))
                .unwrap()
                .set_seed(1);
        chain.set_initial_value(&[100.0]).unwrap();
        assert_eq!(chain.state().chain_mean()[0], 100.0);
        chain.run().unwrap();

        let samples = chain.state().samples();
        let mean = samples.mean_axis(Axis(0)).unwrap();
        let cov = samples.t().cov(1.0).unwrap();
        assert_abs_diff_eq!(chain.state().chain_mean(), mean.view(), epsilon = 1e-9);
        assert_abs_diff_eq!(chain.state().chain_covariance(), cov.view(), epsilon = 1e-9);
    }

    #[test]
    fn adaptive_moments_from_distant_start() {
        let mut chain = AdaptiveRwmh::new(Gaussian::standard(2), 500, Array2::eye(2))
            .unwrap()
            .set_seed(4);
        chain.set_initial_value(&[-20.0, 35.0]).unwrap();
        chain.run().unwrap();

        let samples = chain.state().samples();
        let mean = samples.mean_axis(Axis(0)).unwrap();
        let cov = samples.t().cov(1.0).unwrap();
        assert_abs_diff_eq!(chain.state().chain_mean(), mean.view(), epsilon = 1e-9);
        assert_abs_diff_eq!(chain.state().chain_covariance(), cov.view(), epsilon = 1e-8);
    }

    #[test]
    fn stepping_a_complete_chain_fails() {
        let mut chain =
            RandomWalkMetropolisHastings::new(Gaussian::standard(1), 3, arr2(&[[1.0]])).unwrap();
        chain.run().unwrap();
        assert_eq!(chain.step(), Err(McmcError::ChainComplete(2)));
        // running a complete chain is a no-op
        assert_eq!(chain.run(), Ok(()));
    }

    #[test]
    fn constructors_validate_covariance() {
        assert!(matches!(
            RandomWalkMetropolisHastings::new(
                Gaussian::standard(2),
                10,
                arr2(&[[1.0, 2.0], [2.0, 1.0]])
            ),
            Err(McmcError::NotPositiveDefinite)
        ));
        assert!(matches!(
            AdaptiveRwmh::new(Gaussian::standard(2), 10, Array2::eye(3)),
            Err(McmcError::DimensionMismatch {
                expected: 2,
                found: 3
            })
        ));
        assert!(matches!(
            MixtureAdaptiveRwmh::new(Gaussian::standard(2), 0, Array2::eye(2)),
            Err(McmcError::InvalidChainLength(0))
        ));
    }

    #[test]
    fn undefined_ratio_is_a_rejection() {
        let mut chain = RandomWalkMetropolisHastings::new(Nowhere, 50, Array2::eye(2))
            .unwrap()
            .set_seed(3);
        chain.run().unwrap();
        assert_eq!(chain.state().n_accept(), 0);
        assert!(chain.state().samples().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn adaptive_chains_survive_degenerate_covariance() {
        let mut adaptive = AdaptiveRwmh::new(PointMass { n_dim: 2 }, 200, Array2::eye(2))
            .unwrap()
            .set_seed(1);
        adaptive.run().unwrap();
        assert_eq!(adaptive.state().n_accept(), 0);
        assert_eq!(
            adaptive.proposal().working_factor(),
            adaptive.proposal().homogeneous_factor()
        );

        let mut mixture = MixtureAdaptiveRwmh::new(PointMass { n_dim: 2 }, 200, Array2::eye(2))
            .unwrap()
            .set_seed(1);
        mixture.run().unwrap();
        assert_eq!(mixture.state().n_accept(), 0);
        assert!(mixture.state().chain_covariance().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn mixture_with_certain_safety_matches_fixed_chain() {
        let target = Gaussian::new(
            ndarray::arr1(&[0.0, 0.0]),
            arr2(&[[4.0, 2.0], [2.0, 3.0]]),
        )
        .unwrap();
        let cov = arr2(&[[0.5, 0.1], [0.1, 0.5]]);

        let mut fixed = RandomWalkMetropolisHastings::new(target.clone(), 2_000, cov.clone())
            .unwrap()
            .set_seed(42);
        let mut mixture = MixtureAdaptiveRwmh::new(target, 2_000, cov)
            .unwrap()
            .set_seed(42)
            .set_probability_safety(1.0)
            .unwrap();
        fixed.run().unwrap();
        mixture.run().unwrap();

        assert_eq!(fixed.state().samples(), mixture.state().samples());
        assert_eq!(fixed.state().acceptance_rate(), mixture.state().acceptance_rate());
    }

    #[test]
    fn extended_chain_continues_where_it_stopped() {
        let target = Gaussian::standard(2);
        let mut long = AdaptiveRwmh::new(target.clone(), 1_500, Array2::eye(2))
            .unwrap()
            .set_seed(8);
        long.run().unwrap();

        let mut short = AdaptiveRwmh::new(target, 1_000, Array2::eye(2))
            .unwrap()
            .set_seed(8);
        short.run().unwrap();
        let prefix = short.state().samples().to_owned();

        let mut extended = short.extend(500);
        assert_eq!(extended.state().chain_length(), 1_500);
        assert_eq!(extended.state().samples().slice(s![..1_000, ..]), prefix);
        extended.run().unwrap();

        assert_eq!(extended.state().samples(), long.state().samples());
        assert_eq!(extended.state().chain_mean(), long.state().chain_mean());
        assert_eq!(
            extended.state().acceptance_rate(),
            long.state().acceptance_rate()
        );
    }

    #[test]
    fn posterior_statistics_are_idempotent() {
        let mut chain = MixtureAdaptiveRwmh::new(Gaussian::standard(2), 2_000, Array2::eye(2))
            .unwrap()
            .set_seed(5);
        chain.run().unwrap();
        let first = chain.calculate_posterior_statistics(200).unwrap().clone();
        let second = chain.calculate_posterior_statistics(200).unwrap().clone();
        assert_eq!(first, second);
        assert_eq!(
            chain.state().difference_ln_error().unwrap(),
            first.difference_ln_error()
        );
    }
}
