//! Samples a correlated 2D Gaussian with four mixture-adaptive chains, extending them until
//! the Monte Carlo error is small enough, then prints the posterior summaries.

use adaptive_mcmc::core::{run_chains_progress, Chain};
use adaptive_mcmc::distributions::Gaussian;
use adaptive_mcmc::metropolis_hastings::MixtureAdaptiveRwmh;
use adaptive_mcmc::stats::{potential_scale_reduction, STOPPING_LN_ERROR_DIFFERENCE};
use ndarray::{arr1, arr2, Array2, ArrayView2};
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    const CHAIN_LENGTH: usize = 20_000;
    const BURN_IN: usize = 2_000;
    const N_CHAINS: u64 = 4;
    const MAX_ROUNDS: usize = 5;

    let target = Gaussian::new(arr1(&[0.0, 1.0]), arr2(&[[4.0, 2.0], [2.0, 3.0]]))?;
    let mut chains = (0..N_CHAINS)
        .map(|i| {
            MixtureAdaptiveRwmh::new(target.clone(), CHAIN_LENGTH, Array2::eye(2))
                .map(|chain| chain.set_seed(42 + i))
        })
        .collect::<Result<Vec<_>, _>>()?;

    for round in 0..MAX_ROUNDS {
        run_chains_progress(&mut chains)?;

        let mut converged = true;
        for chain in chains.iter_mut() {
            chain.calculate_posterior_statistics(BURN_IN)?;
            let diff = chain.state().difference_ln_error()?;
            converged &= diff.iter().all(|&d| d >= STOPPING_LN_ERROR_DIFFERENCE);
        }
        if converged || round + 1 == MAX_ROUNDS {
            println!("Stopped after {} rounds, converged: {converged}", round + 1);
            break;
        }
        chains = chains
            .into_iter()
            .map(|chain| chain.extend(CHAIN_LENGTH))
            .collect();
    }

    for (i, chain) in chains.iter().enumerate() {
        let state = chain.state();
        println!(
            "Chain {i}: {} samples, acceptance rate {:.3}",
            state.n_step() + 1,
            state.acceptance_rate().last().copied().unwrap_or(0.0)
        );
        println!("  expectation: {:.3}", state.posterior_expectation()?);
        println!("  covariance:  {:.3}", state.posterior_covariance()?);
        println!("  MC error:    {:.4}", state.monte_carlo_error()?);
        println!("  lag-1 ACF:   {:.3}", state.acf(0, 1)?[1]);
    }

    let samples: Vec<ArrayView2<f64>> = chains.iter().map(|c| c.state().samples()).collect();
    println!("R-hat: {:.4}", potential_scale_reduction(&samples, BURN_IN)?);
    Ok(())
}
