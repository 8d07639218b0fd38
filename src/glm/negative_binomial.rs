//! Negative binomial distribution utilities

use statrs::function::gamma::ln_gamma;

/// Floor on fitted means during IRLS
pub const MIN_MU: f64 = 0.5;

/// IRLS stops when any |beta| exceeds this (natural log scale)
pub const MAX_LFC_BETA: f64 = 30.0;

/// Clamp on the linear predictor to keep exp() finite
pub const MAX_ETA: f64 = 700.0;

/// mu = size_factor * exp(eta)
pub fn nb_mean(eta: f64, size_factor: f64) -> f64 {
    size_factor * eta.clamp(-MAX_ETA, MAX_ETA).exp()
}

/// Var(Y) = mu + alpha * mu^2
pub fn nb_variance(mu: f64, alpha: f64) -> f64 {
    mu + alpha * mu * mu
}

/// IRLS weight w = mu / (1 + alpha * mu)
pub fn nb_weight(mu: f64, alpha: f64) -> f64 {
    mu / (1.0 + alpha * mu)
}

/// log P(Y = y) for a negative binomial with mean `mu` and dispersion `alpha`
pub fn nb_log_likelihood(y: f64, mu: f64, alpha: f64) -> f64 {
    if mu <= 0.0 || alpha <= 0.0 {
        return f64::NEG_INFINITY;
    }
    let size = 1.0 / alpha;
    let prob = size / (size + mu);
    ln_gamma(y + size) - ln_gamma(size) - ln_gamma(y + 1.0)
        + size * prob.ln()
        + y * (1.0 - prob).ln()
}

/// -2 * log-likelihood summed over samples
pub fn nb_deviance(counts: &[f64], mu: &[f64], alpha: f64) -> f64 {
    counts
        .iter()
        .zip(mu.iter())
        .map(|(&y, &m)| -2.0 * nb_log_likelihood(y, m, alpha))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nb_mean_and_weight() {
        assert!((nb_mean(2.0, 3.0) - 3.0 * 2.0_f64.exp()).abs() < 1e-10);
        assert!((nb_weight(10.0, 0.1) - 5.0).abs() < 1e-10);
        assert!((nb_variance(10.0, 0.1) - 20.0).abs() < 1e-10);
    }

    #[test]
    fn test_poisson_limit() {
        // Small alpha approaches the Poisson log-probability
        let ll = nb_log_likelihood(3.0, 2.0, 1e-8);
        let poisson = 3.0 * 2.0_f64.ln() - 2.0 - ln_gamma(4.0);
        assert!((ll - poisson).abs() < 1e-5);
    }

    #[test]
    fn test_deviance_prefers_true_mean() {
        let y = [10.0, 12.0, 9.0];
        assert!(nb_deviance(&y, &[10.0; 3], 0.05) < nb_deviance(&y, &[30.0; 3], 0.05));
    }
}
