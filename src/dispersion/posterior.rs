//! Cox-Reid adjusted profile log-posterior of log(alpha) and its maximization
//!
//! Shared by the gene-wise estimates (no prior) and the MAP estimates
//! (normal prior on log(alpha) centred on the trend).

use ndarray::Array2;
use statrs::function::gamma::{digamma, ln_gamma};

use crate::linalg::{invert_spd, log_det_spd, xtwx};

/// Hard bounds on proposals of the line search (log scale)
const MIN_LOG_ALPHA_HARD: f64 = -30.0;
const MAX_LOG_ALPHA_HARD: f64 = 10.0;
/// Armijo sufficient-increase constant
const ARMIJO_EPSILON: f64 = 1e-4;
const GRID_POINTS: usize = 20;

/// Normal prior on log(alpha)
#[derive(Debug, Clone, Copy)]
pub struct LogNormalPrior {
    pub mean: f64,
    pub variance: f64,
}

/// One gene's data, with the expected counts held fixed during the search
pub struct DispersionProblem<'a> {
    pub counts: &'a [f64],
    pub mu: &'a [f64],
    pub design: &'a Array2<f64>,
    pub prior: Option<LogNormalPrior>,
}

/// Settings of the line search
#[derive(Debug, Clone, Copy)]
pub struct LineSearch {
    pub kappa_0: f64,
    pub tol: f64,
    pub maxit: usize,
    /// Stop once log(alpha) drops below this
    pub min_log_alpha: f64,
}

/// Outcome of the line search
#[derive(Debug, Clone, Copy)]
pub struct LineSearchResult {
    pub log_alpha: f64,
    pub initial_lp: f64,
    pub last_lp: f64,
    pub iterations: usize,
}

fn cr_weights(mu: &[f64], alpha: f64) -> Vec<f64> {
    mu.iter().map(|&m| 1.0 / (1.0 / m.max(1e-10) + alpha)).collect()
}

impl DispersionProblem<'_> {
    pub fn log_posterior(&self, log_alpha: f64) -> f64 {
        let alpha = log_alpha.exp();
        let alpha_inv = 1.0 / alpha;

        let ll: f64 = self
            .counts
            .iter()
            .zip(self.mu.iter())
            .map(|(&y, &m)| {
                let m = m.max(1e-10);
                ln_gamma(y + alpha_inv) - ln_gamma(alpha_inv) - y * (m + alpha_inv).ln()
                    - alpha_inv * (1.0 + m * alpha).ln()
            })
            .sum();

        let p = self.design.ncols();
        let b = xtwx(self.design, &cr_weights(self.mu, alpha));
        let cr = match log_det_spd(&b, p) {
            Some(ld) => -0.5 * ld,
            None => 0.0,
        };

        let prior = match self.prior {
            Some(pr) => -0.5 * (log_alpha - pr.mean).powi(2) / pr.variance,
            None => 0.0,
        };

        ll + cr + prior
    }

    /// Derivative with respect to log(alpha)
    pub fn d_log_posterior(&self, log_alpha: f64) -> f64 {
        let alpha = log_alpha.exp();
        let alpha_inv = 1.0 / alpha;
        let alpha_sq = alpha * alpha;

        let dll: f64 = self
            .counts
            .iter()
            .zip(self.mu.iter())
            .map(|(&y, &m)| {
                let m = m.max(1e-10);
                -digamma(y + alpha_inv) / alpha_sq + digamma(alpha_inv) / alpha_sq
                    + y / (alpha_sq * (m + alpha_inv))
                    + (1.0 + m * alpha).ln() / alpha_sq
                    - m / (alpha * (1.0 + m * alpha))
            })
            .sum();

        // d/dalpha of -0.5 ln det(B) = -0.5 tr(B^-1 dB), with dw/dalpha = -w^2
        let p = self.design.ncols();
        let w = cr_weights(self.mu, alpha);
        let dw: Vec<f64> = w.iter().map(|&wi| -wi * wi).collect();
        let b = xtwx(self.design, &w);
        let db = xtwx(self.design, &dw);
        let dcr = match invert_spd(&b, p) {
            Some(b_inv) => {
                let mut trace = 0.0;
                for j in 0..p {
                    for k in 0..p {
                        trace += b_inv[j * p + k] * db[k * p + j];
                    }
                }
                -0.5 * trace
            }
            None => 0.0,
        };

        let prior = match self.prior {
            Some(pr) => -(log_alpha - pr.mean) / pr.variance,
            None => 0.0,
        };

        (dll + dcr) * alpha + prior
    }

    /// Armijo backtracking line search along the gradient
    pub fn line_search(&self, alpha_init: f64, settings: &LineSearch) -> LineSearchResult {
        let mut log_alpha = alpha_init.max(1e-10).ln().clamp(MIN_LOG_ALPHA_HARD, MAX_LOG_ALPHA_HARD);
        let initial_lp = self.log_posterior(log_alpha);
        let mut lp = initial_lp;
        let mut dlp = self.d_log_posterior(log_alpha);
        let mut kappa = settings.kappa_0;
        let mut accepted = 0;
        let mut iterations = settings.maxit;

        for iter in 0..settings.maxit {
            if !dlp.is_finite() || dlp == 0.0 {
                iterations = iter + 1;
                break;
            }
            let raw = log_alpha + kappa * dlp;
            if raw < MIN_LOG_ALPHA_HARD {
                kappa = (MIN_LOG_ALPHA_HARD - log_alpha) / dlp;
            }
            if raw > MAX_LOG_ALPHA_HARD {
                kappa = (MAX_LOG_ALPHA_HARD - log_alpha) / dlp;
            }
            let proposal = log_alpha + kappa * dlp;
            let lp_proposal = self.log_posterior(proposal);

            if -lp_proposal <= -lp - kappa * ARMIJO_EPSILON * dlp * dlp {
                accepted += 1;
                log_alpha = proposal;
                let change = lp_proposal - lp;
                lp = lp_proposal;
                if change < settings.tol || log_alpha < settings.min_log_alpha {
                    iterations = iter + 1;
                    break;
                }
                dlp = self.d_log_posterior(log_alpha);
                kappa = (kappa * 1.1).min(settings.kappa_0);
                if accepted % 5 == 0 {
                    kappa /= 2.0;
                }
            } else {
                kappa /= 2.0;
            }
        }

        LineSearchResult {
            log_alpha,
            initial_lp,
            last_lp: lp,
            iterations,
        }
    }

    /// Coarse then fine grid over [min_log_alpha, max_log_alpha]; returns alpha
    pub fn grid_search(&self, min_log_alpha: f64, max_log_alpha: f64) -> f64 {
        let argmax = |grid: &[f64]| -> f64 {
            grid.iter()
                .map(|&la| (la, self.log_posterior(la)))
                .filter(|(_, lp)| lp.is_finite())
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(la, _)| la)
                .unwrap_or(grid[0])
        };
        let linspace = |lo: f64, hi: f64| -> Vec<f64> {
            let step = (hi - lo) / (GRID_POINTS - 1) as f64;
            (0..GRID_POINTS).map(|i| lo + i as f64 * step).collect()
        };

        let coarse = linspace(min_log_alpha, max_log_alpha);
        let delta = coarse[1] - coarse[0];
        let best = argmax(&coarse);
        argmax(&linspace(best - delta, best + delta)).exp()
    }
}
