use adaptive_mcmc::core::Chain;
use adaptive_mcmc::distributions::Gaussian;
use adaptive_mcmc::metropolis_hastings::RandomWalkMetropolisHastings;
use ndarray::arr2;

fn main() {
    let target = Gaussian::standard(1);

    // Chain of 10,000 samples with proposal variance 1
    let mut chain = RandomWalkMetropolisHastings::new(target, 10_000, arr2(&[[1.0]]))
        .unwrap()
        .set_seed(42);
    chain.set_initial_value(&[0.0]).unwrap();
    chain.run().unwrap();

    // Discard the first 1,000 samples as burn-in
    let stats = chain.calculate_posterior_statistics(1_000).unwrap();
    assert_eq!(stats.n_samples, 9_000);
    println!(
        "mean {:.3}, variance {:.3}, MC error {:.4}",
        stats.expectation[0], stats.covariance[[0, 0]], stats.monte_carlo_error[0]
    );
}
