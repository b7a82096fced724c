//! Adaptive random-walk Metropolis–Hastings samplers with online moment tracking and
//! posterior diagnostics.

pub mod core;
pub mod distributions;
pub mod error;
pub mod linalg;
pub mod metropolis_hastings;
pub mod proposal;
pub mod stats;

pub use crate::core::{run_chains, run_chains_progress, Chain, ChainState};
pub use crate::error::McmcError;
