//! GLM fitting using Iteratively Reweighted Least Squares (IRLS)

use ndarray::{Array2, Array3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::negative_binomial::{nb_deviance, nb_mean, nb_weight, MAX_LFC_BETA, MIN_MU};
use crate::data::CountDataSet;
use crate::error::{PipelineError, Result};
use crate::linalg::{invert_spd, matmul, solve_spd, xtwx};

/// Configurable parameters for GLM fitting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlmFitParams {
    /// Maximum IRLS iterations
    pub maxit: usize,
    /// Relative deviance change at which IRLS stops
    pub beta_tol: f64,
}

impl Default for GlmFitParams {
    fn default() -> Self {
        Self {
            maxit: 100,
            beta_tol: 1e-8,
        }
    }
}

/// Ridge penalty on every coefficient (natural log scale)
fn ridge_lambda() -> f64 {
    let ln2 = std::f64::consts::LN_2;
    1e-6 / (ln2 * ln2)
}

/// Per-gene GLM fit
#[derive(Debug, Clone)]
pub struct GlmFitResult {
    pub coefficients: Vec<f64>,
    pub standard_errors: Vec<f64>,
    /// Row-major n_coefs x n_coefs covariance
    pub covariance: Vec<f64>,
    pub hat_diagonals: Vec<f64>,
    pub mu: Vec<f64>,
    pub deviance: f64,
    pub converged: bool,
}

impl GlmFitResult {
    fn undefined(n_samples: usize, n_coefs: usize) -> Self {
        Self {
            coefficients: vec![f64::NAN; n_coefs],
            standard_errors: vec![f64::NAN; n_coefs],
            covariance: vec![f64::NAN; n_coefs * n_coefs],
            hat_diagonals: vec![0.0; n_samples],
            mu: vec![0.0; n_samples],
            deviance: f64::NAN,
            converged: false,
        }
    }
}

/// Fit the negative binomial GLM to every gene using the final dispersions
pub fn fit_glm(dds: &mut CountDataSet, params: &GlmFitParams) -> Result<()> {
    let size_factors = dds
        .size_factors()
        .ok_or_else(|| PipelineError::InvalidInput {
            reason: "Size factors must be estimated before fitting the GLM".to_string(),
        })?
        .to_vec();
    let dispersions = dds
        .dispersions()
        .ok_or_else(|| PipelineError::InvalidInput {
            reason: "Dispersions must be estimated before fitting the GLM".to_string(),
        })?
        .to_vec();

    let counts = dds.counts().counts();
    let design = dds.design_matrix();
    let (n_genes, n_samples) = counts.dim();
    let n_coefs = design.ncols();

    let fits: Vec<GlmFitResult> = (0..n_genes)
        .into_par_iter()
        .map(|i| {
            let y: Vec<f64> = counts.row(i).to_vec();
            if y.iter().all(|&c| c == 0.0) || !dispersions[i].is_finite() {
                GlmFitResult::undefined(n_samples, n_coefs)
            } else {
                fit_single_gene(&y, design, &size_factors, dispersions[i], params)
            }
        })
        .collect();

    let mut coefficients = Array2::zeros((n_genes, n_coefs));
    let mut covariances = Array3::zeros((n_genes, n_coefs, n_coefs));
    let mut hat = Array2::zeros((n_genes, n_samples));
    let mut mu = Array2::zeros((n_genes, n_samples));
    let mut converged = Vec::with_capacity(n_genes);

    for (i, fit) in fits.into_iter().enumerate() {
        for j in 0..n_coefs {
            coefficients[[i, j]] = fit.coefficients[j];
            for k in 0..n_coefs {
                covariances[[i, j, k]] = fit.covariance[j * n_coefs + k];
            }
        }
        for s in 0..n_samples {
            hat[[i, s]] = fit.hat_diagonals[s];
            mu[[i, s]] = fit.mu[s];
        }
        converged.push(fit.converged);
    }

    let n_unconverged = converged.iter().filter(|&&c| !c).count();
    if n_unconverged > 0 {
        log::info!("{} genes did not converge in the GLM fit", n_unconverged);
    }

    dds.set_glm_fit(coefficients, covariances, hat, mu, converged)
}

fn fitted_means(design: &Array2<f64>, beta: &[f64], size_factors: &[f64]) -> Vec<f64> {
    (0..design.nrows())
        .map(|i| {
            let eta: f64 = (0..beta.len()).map(|j| design[[i, j]] * beta[j]).sum();
            nb_mean(eta, size_factors[i]).max(MIN_MU)
        })
        .collect()
}

/// Ordinary least squares on log(normalized + 0.1) as the IRLS starting point
fn initial_beta(counts: &[f64], design: &Array2<f64>, size_factors: &[f64]) -> Vec<f64> {
    let n_coefs = design.ncols();
    let log_counts: Vec<f64> = counts
        .iter()
        .zip(size_factors.iter())
        .map(|(&c, &s)| (c / s + 0.1).ln())
        .collect();

    let ones = vec![1.0; counts.len()];
    let xtx = xtwx(design, &ones);
    let mut xty = vec![0.0; n_coefs];
    for (i, &lc) in log_counts.iter().enumerate() {
        for (j, v) in xty.iter_mut().enumerate() {
            *v += design[[i, j]] * lc;
        }
    }

    match solve_spd(&xtx, &xty, n_coefs) {
        Some(beta) if beta.iter().all(|b| b.is_finite()) => beta,
        _ => {
            let mean_log = log_counts.iter().sum::<f64>() / log_counts.len() as f64;
            let mut beta = vec![0.0; n_coefs];
            beta[0] = mean_log;
            beta
        }
    }
}

/// Fit one gene with fixed dispersion `alpha`
pub fn fit_single_gene(
    counts: &[f64],
    design: &Array2<f64>,
    size_factors: &[f64],
    alpha: f64,
    params: &GlmFitParams,
) -> GlmFitResult {
    let n_samples = counts.len();
    let n_coefs = design.ncols();
    let lambda = ridge_lambda();

    let mut beta = initial_beta(counts, design, size_factors);
    let mut mu = fitted_means(design, &beta, size_factors);
    let mut best = (f64::INFINITY, beta.clone());
    let mut dev_old = 0.0;
    let mut converged = false;

    for iter in 0..params.maxit {
        let weights: Vec<f64> = mu.iter().map(|&m| nb_weight(m, alpha)).collect();
        let z: Vec<f64> = (0..n_samples)
            .map(|i| (mu[i] / size_factors[i]).ln() + (counts[i] - mu[i]) / mu[i])
            .collect();

        let mut a = xtwx(design, &weights);
        for j in 0..n_coefs {
            a[j * n_coefs + j] += lambda;
        }
        let mut b = vec![0.0; n_coefs];
        for i in 0..n_samples {
            for (j, v) in b.iter_mut().enumerate() {
                *v += design[[i, j]] * weights[i] * z[i];
            }
        }

        let next = match solve_spd(&a, &b, n_coefs) {
            Some(next) => next,
            None => break,
        };
        if next.iter().any(|v| !v.is_finite() || v.abs() > MAX_LFC_BETA) {
            break;
        }
        beta = next;
        mu = fitted_means(design, &beta, size_factors);

        let dev = nb_deviance(counts, &mu, alpha);
        if dev < best.0 {
            best = (dev, beta.clone());
        }
        let conv_test = (dev - dev_old).abs() / (dev.abs() + 0.1);
        if conv_test.is_nan() {
            break;
        }
        if iter > 0 && conv_test < params.beta_tol {
            converged = true;
            break;
        }
        dev_old = dev;
    }

    if !converged && best.0.is_finite() {
        beta = best.1;
        mu = fitted_means(design, &beta, size_factors);
    }

    let weights: Vec<f64> = mu.iter().map(|&m| nb_weight(m, alpha)).collect();
    let (covariance, hat_diagonals) = sandwich_covariance(design, &weights, lambda);
    let standard_errors = (0..n_coefs)
        .map(|j| {
            let v = covariance[j * n_coefs + j];
            if v > 0.0 {
                v.sqrt()
            } else {
                f64::NAN
            }
        })
        .collect();

    GlmFitResult {
        deviance: nb_deviance(counts, &mu, alpha),
        coefficients: beta,
        standard_errors,
        covariance,
        hat_diagonals,
        mu,
        converged,
    }
}

/// Sigma = (X'WX + L)^-1 X'WX (X'WX + L)^-1 and h_i = w_i x_i' (X'WX + L)^-1 x_i
fn sandwich_covariance(design: &Array2<f64>, weights: &[f64], lambda: f64) -> (Vec<f64>, Vec<f64>) {
    let n_coefs = design.ncols();
    let n_samples = design.nrows();
    let info = xtwx(design, weights);
    let mut ridged = info.clone();
    for j in 0..n_coefs {
        ridged[j * n_coefs + j] += lambda;
    }

    let inv = match invert_spd(&ridged, n_coefs) {
        Some(inv) => inv,
        None => return (vec![f64::NAN; n_coefs * n_coefs], vec![0.0; n_samples]),
    };

    let hat = (0..n_samples)
        .map(|i| {
            let mut h = 0.0;
            for j in 0..n_coefs {
                for k in 0..n_coefs {
                    h += design[[i, j]] * inv[j * n_coefs + k] * design[[i, k]];
                }
            }
            weights[i] * h
        })
        .collect();

    let sigma = matmul(&matmul(&inv, &info, n_coefs), &inv, n_coefs);
    (sigma, hat)
}
