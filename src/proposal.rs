/*!
Proposal strategies for random-walk Metropolis-Hastings.

Every strategy hands the sampler the Cholesky factor `L` of the proposal covariance to use
for the next step; the sampler then proposes `x + L z` with `z ~ N(0, I)`.

- [`FixedProposal`]: one covariance, factorized once.
- [`AdaptiveProposal`]: after `2 n_dim + 1` homogeneous steps, the covariance becomes
  `2.38² / n_dim` times the running chain covariance (Haario et al., 2001). A failed
  factorization keeps the previous working factor.
- [`MixtureProposal`]: as the adaptive proposal, but each adaptive step falls back to a
  fixed safety factor with probability `probability_safety` (Roberts & Rosenthal, 2009),
  and whenever the scaled covariance cannot be factorized.
*/

use ndarray::prelude::*;

use crate::core::ChainState;
use crate::distributions::Target;
use crate::error::McmcError;
use crate::linalg::{cholesky, CholeskyFactor};

/// Scale of the adaptive proposal, asymptotically optimal for Gaussian targets.
pub const OPTIMAL_SCALE: f64 = 2.38;

/// Default probability of taking a safety step in [`MixtureProposal`].
pub const DEFAULT_PROBABILITY_SAFETY: f64 = 0.05;

/// Chooses the proposal covariance for each step of a chain.
pub trait Proposal {
    /// Dimension of the proposal covariance.
    fn dim(&self) -> usize;

    /// Returns the Cholesky factor for the next step. May draw from the chain's generator
    /// and read its running moments.
    fn factor<D: Target>(&mut self, state: &mut ChainState<D>) -> &CholeskyFactor;
}

fn factor_covariance(covariance: &ArrayView2<f64>) -> Result<CholeskyFactor, McmcError> {
    if covariance.nrows() != covariance.ncols() {
        return Err(McmcError::DimensionMismatch {
            expected: covariance.nrows(),
            found: covariance.ncols(),
        });
    }
    cholesky(covariance).ok_or(McmcError::NotPositiveDefinite)
}

/// Adaptation starts once `2 n_dim + 1` steps have been taken.
fn is_adapting<D: Target>(state: &ChainState<D>) -> bool {
    state.n_step() >= 2 * state.n_dim() + 1
}

/// Cholesky factor of `(2.38² / n_dim) * chain_covariance`, if it exists.
fn scaled_chain_factor<D: Target>(state: &ChainState<D>) -> Option<CholeskyFactor> {
    let scale = OPTIMAL_SCALE.powi(2) / state.n_dim() as f64;
    let scaled = &state.chain_covariance() * scale;
    cholesky(&scaled.view())
}

/// A proposal with a constant covariance.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedProposal {
    chol: CholeskyFactor,
}

impl FixedProposal {
    /// Factorizes `covariance` once; fails if it is not square and positive definite.
    pub fn new(covariance: &ArrayView2<f64>) -> Result<Self, McmcError> {
        Ok(Self {
            chol: factor_covariance(covariance)?,
        })
    }

    pub fn cholesky_factor(&self) -> &CholeskyFactor {
        &self.chol
    }
}

impl Proposal for FixedProposal {
    fn dim(&self) -> usize {
        self.chol.dim()
    }

    fn factor<D: Target>(&mut self, _state: &mut ChainState<D>) -> &CholeskyFactor {
        &self.chol
    }
}

/// Global adaptive scaling: the proposal follows the running chain covariance.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveProposal {
    homogeneous: CholeskyFactor,
    working: CholeskyFactor,
}

impl AdaptiveProposal {
    /// `covariance` is used for the homogeneous steps before adaptation starts.
    pub fn new(covariance: &ArrayView2<f64>) -> Result<Self, McmcError> {
        let homogeneous = factor_covariance(covariance)?;
        Ok(Self {
            working: homogeneous.clone(),
            homogeneous,
        })
    }

    /// Factor used before adaptation starts.
    pub fn homogeneous_factor(&self) -> &CholeskyFactor {
        &self.homogeneous
    }

    /// Most recent successfully factorized adaptive covariance.
    pub fn working_factor(&self) -> &CholeskyFactor {
        &self.working
    }
}

impl Proposal for AdaptiveProposal {
    fn dim(&self) -> usize {
        self.homogeneous.dim()
    }

    fn factor<D: Target>(&mut self, state: &mut ChainState<D>) -> &CholeskyFactor {
        if !is_adapting(state) {
            return &self.homogeneous;
        }
        match scaled_chain_factor(state) {
            Some(chol) => {
                log::trace!("step {}: adapted proposal covariance", state.n_step());
                self.working = chol;
            }
            None => log::debug!(
                "step {}: scaled chain covariance not positive definite, keeping proposal",
                state.n_step()
            ),
        }
        &self.working
    }
}

/// Mixture of the adaptive proposal with a fixed safety proposal.
#[derive(Debug, Clone, PartialEq)]
pub struct MixtureProposal {
    safety: CholeskyFactor,
    working: CholeskyFactor,
    probability_safety: f64,
}

impl MixtureProposal {
    /// `covariance` is used both for the homogeneous steps and as the safety proposal.
    pub fn new(covariance: &ArrayView2<f64>) -> Result<Self, McmcError> {
        let safety = factor_covariance(covariance)?;
        Ok(Self {
            working: safety.clone(),
            safety,
            probability_safety: DEFAULT_PROBABILITY_SAFETY,
        })
    }

    /// Sets the probability of using the safety proposal on an adaptive step.
    pub fn set_probability_safety(mut self, probability_safety: f64) -> Result<Self, McmcError> {
        if !(0.0..=1.0).contains(&probability_safety) {
            return Err(McmcError::InvalidProbability(probability_safety));
        }
        self.probability_safety = probability_safety;
        Ok(self)
    }

    pub fn probability_safety(&self) -> f64 {
        self.probability_safety
    }

    pub fn safety_factor(&self) -> &CholeskyFactor {
        &self.safety
    }

    pub fn working_factor(&self) -> &CholeskyFactor {
        &self.working
    }

    fn choose_safety<D: Target>(&self, state: &mut ChainState<D>) -> bool {
        // Degenerate mixtures are decided without touching the random stream.
        if self.probability_safety >= 1.0 {
            true
        } else if self.probability_safety <= 0.0 {
            false
        } else {
            state.uniform() < self.probability_safety
        }
    }
}

impl Proposal for MixtureProposal {
    fn dim(&self) -> usize {
        self.safety.dim()
    }

    fn factor<D: Target>(&mut self, state: &mut ChainState<D>) -> &CholeskyFactor {
        if !is_adapting(state) || self.choose_safety(state) {
            return &self.safety;
        }
        match scaled_chain_factor(state) {
            Some(chol) => {
                log::trace!("step {}: adapted proposal covariance", state.n_step());
                self.working = chol;
                &self.working
            }
            None => {
                log::debug!(
                    "step {}: scaled chain covariance not positive definite, using safety",
                    state.n_step()
                );
                &self.safety
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::Gaussian;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2};

    /// A 1-D chain that has taken `points.len()` accepted steps through `points`.
    fn chain_through(points: &[f64]) -> ChainState<Gaussian> {
        let mut state = ChainState::new(Gaussian::standard(1), points.len() + 2)
            .unwrap()
            .set_seed(5);
        for &p in points {
            let current = state.end_of_chain().to_owned();
            state
                .accept_step(1.0, &current.view(), &arr1(&[p]).view())
                .unwrap();
            state.update_statistics().unwrap();
        }
        state
    }

    #[test]
    fn fixed_proposal_validates_covariance() {
        assert_eq!(
            FixedProposal::new(&arr2(&[[1.0, 2.0], [2.0, 1.0]]).view()),
            Err(McmcError::NotPositiveDefinite)
        );
        assert_eq!(
            FixedProposal::new(&Array2::<f64>::zeros((2, 3)).view()),
            Err(McmcError::DimensionMismatch {
                expected: 2,
                found: 3
            })
        );
        let proposal = FixedProposal::new(&arr2(&[[4.0]]).view()).unwrap();
        assert_eq!(proposal.cholesky_factor().lower()[[0, 0]], 2.0);
    }

    #[test]
    fn adaptive_proposal_waits_for_enough_steps() {
        let mut proposal = AdaptiveProposal::new(&arr2(&[[1.0]]).view()).unwrap();
        // 1-D: adaptation starts after 3 steps
        let mut state = chain_through(&[1.0, -1.0]);
        assert_eq!(Proposal::factor(&mut proposal, &mut state).lower()[[0, 0]], 1.0);

        let mut state = chain_through(&[1.0, -1.0, 2.0]);
        let chain_var = state.chain_covariance()[[0, 0]];
        let chol = Proposal::factor(&mut proposal, &mut state).clone();
        assert_abs_diff_eq!(
            chol.lower()[[0, 0]],
            (OPTIMAL_SCALE.powi(2) * chain_var).sqrt(),
            epsilon = 1e-12
        );
        assert_eq!(proposal.working_factor(), &chol);
    }

    #[test]
    fn adaptive_proposal_keeps_previous_factor_on_failure() {
        let mut proposal = AdaptiveProposal::new(&arr2(&[[1.0]]).view()).unwrap();
        let mut moving = chain_through(&[1.0, -1.0, 2.0]);
        let adapted = Proposal::factor(&mut proposal, &mut moving).clone();

        // a chain that never moved has zero covariance
        let mut stuck = chain_through(&[0.0, 0.0, 0.0, 0.0]);
        assert_eq!(Proposal::factor(&mut proposal, &mut stuck), &adapted);
    }

    #[test]
    fn mixture_proposal_falls_back_to_safety() {
        let mut proposal = MixtureProposal::new(&arr2(&[[0.25]]).view())
            .unwrap()
            .set_probability_safety(0.0)
            .unwrap();
        let mut moving = chain_through(&[1.0, -1.0, 2.0]);
        let adapted = Proposal::factor(&mut proposal, &mut moving).clone();
        assert_ne!(&adapted, proposal.safety_factor());

        let safety = proposal.safety_factor().clone();
        let mut stuck = chain_through(&[0.0, 0.0, 0.0, 0.0]);
        assert_eq!(Proposal::factor(&mut proposal, &mut stuck), &safety);
    }

    #[test]
    fn mixture_proposal_always_safe_with_probability_one() {
        let mut proposal = MixtureProposal::new(&arr2(&[[0.25]]).view())
            .unwrap()
            .set_probability_safety(1.0)
            .unwrap();
        let mut state = chain_through(&[1.0, -1.0, 2.0, 3.0]);
        let safety = proposal.safety_factor().clone();
        assert_eq!(Proposal::factor(&mut proposal, &mut state), &safety);
    }

    #[test]
    fn mixture_probability_is_validated() {
        let proposal = MixtureProposal::new(&arr2(&[[1.0]]).view()).unwrap();
        assert_eq!(proposal.probability_safety(), DEFAULT_PROBABILITY_SAFETY);
        assert_eq!(
            proposal.clone().set_probability_safety(1.5),
            Err(McmcError::InvalidProbability(1.5))
        );
        assert!(proposal.set_probability_safety(-0.1).is_err());
    }
}
