//! Error type shared by all chains, proposals and diagnostics.

use thiserror::Error;

/// Errors returned while building, running or summarising a chain.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum McmcError {
    /// A Cholesky factorization was required and no fallback factor exists.
    #[error("matrix is not positive definite; Cholesky factorization failed")]
    NotPositiveDefinite,
    #[error("chain length must be positive, got {0}")]
    InvalidChainLength(usize),
    #[error("target distribution must have at least one dimension")]
    InvalidDimension,
    #[error("expected {expected} dimensions, got {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("dimension {dimension} is out of range for a {n_dim}-dimensional chain")]
    DimensionOutOfRange { dimension: usize, n_dim: usize },
    #[error("burn-in ({burn_in}) must leave at least two of the {n_samples} stored samples")]
    InvalidBurnIn { burn_in: usize, n_samples: usize },
    #[error("maximum lag ({max_lag}) must be smaller than the number of samples ({n_samples})")]
    InvalidLag { max_lag: usize, n_samples: usize },
    #[error("probability must lie in [0, 1], got {0}")]
    InvalidProbability(f64),
    #[error("the initial value can only be set before the first step")]
    InitialValueAfterStart,
    #[error("chain is complete after {0} steps; extend it to keep sampling")]
    ChainComplete(usize),
    #[error("posterior statistics have not been calculated yet")]
    MissingPosteriorStatistics,
    #[error("at least two chains of equal length are required, got {0}")]
    TooFewChains(usize),
}
