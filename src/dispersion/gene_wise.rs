//! Gene-wise dispersion estimation using the Cox-Reid adjusted profile likelihood

use ndarray::{Array1, Array2};
use rayon::prelude::*;

use super::posterior::{DispersionProblem, LineSearch};
use super::DispersionParams;
use crate::data::CountDataSet;
use crate::error::{PipelineError, Result};
use crate::glm::{fit_single_gene, is_group_model, GlmFitParams, MIN_MU};
use crate::linalg::{solve_spd, xtwx};

/// Estimate gene-wise dispersions and the expected counts they were fitted against
pub fn estimate_gene_dispersions(dds: &mut CountDataSet, params: &DispersionParams) -> Result<()> {
    let size_factors = dds
        .size_factors()
        .ok_or_else(|| PipelineError::InvalidInput {
            reason: "Size factors must be estimated first".to_string(),
        })?
        .to_vec();

    let counts = dds.counts().counts();
    let design = dds.design_matrix();
    let (n_genes, n_samples) = counts.dim();

    let xim = size_factors.iter().map(|&s| 1.0 / s).sum::<f64>() / n_samples as f64;
    let group_model = is_group_model(design);

    let results: Vec<(f64, Vec<f64>)> = (0..n_genes)
        .into_par_iter()
        .map(|i| {
            let y = counts.row(i).to_vec();
            estimate_dispersion_gene(&y, &size_factors, design, xim, group_model, params)
        })
        .collect();

    let mut mu = Array2::zeros((n_genes, n_samples));
    let mut dispersions = Array1::zeros(n_genes);
    for (i, (d, m)) in results.into_iter().enumerate() {
        dispersions[i] = d;
        for (j, v) in m.into_iter().enumerate() {
            mu[[i, j]] = v;
        }
    }

    log::debug!(
        "Gene-wise dispersions: {} finite of {}",
        dispersions.iter().filter(|d| d.is_finite()).count(),
        n_genes
    );
    dds.set_gene_dispersions(dispersions, mu)
}

/// Least squares fit of normalized counts on the design, scaled back to counts
fn linear_model_mu(normalized: &[f64], size_factors: &[f64], design: &Array2<f64>) -> Vec<f64> {
    let p = design.ncols();
    let xtx = xtwx(design, &vec![1.0; normalized.len()]);
    let mut xty = vec![0.0; p];
    for (i, &y) in normalized.iter().enumerate() {
        for (j, v) in xty.iter_mut().enumerate() {
            *v += design[[i, j]] * y;
        }
    }
    let beta = solve_spd(&xtx, &xty, p).unwrap_or_else(|| {
        let mut b = vec![0.0; p];
        b[0] = normalized.iter().sum::<f64>() / normalized.len() as f64;
        b
    });
    (0..normalized.len())
        .map(|i| (0..p).map(|j| design[[i, j]] * beta[j]).sum::<f64>() * size_factors[i])
        .collect()
}

/// sum(((y - mu)^2 - mu) / mu^2) / (m - p) on normalized counts, mu floored at 1
fn rough_disp_estimate(normalized: &[f64], design: &Array2<f64>) -> f64 {
    let (m, p) = design.dim();
    if m <= p {
        return 0.0;
    }
    let mu = linear_model_mu(normalized, &vec![1.0; m], design);
    let sum: f64 = normalized
        .iter()
        .zip(mu.iter())
        .map(|(&y, &mu)| {
            let mu = mu.max(1.0);
            ((y - mu).powi(2) - mu) / (mu * mu)
        })
        .sum();
    (sum / (m - p) as f64).max(0.0)
}

/// (variance - xim * mean) / mean^2 on normalized counts
fn moments_disp_estimate(normalized: &[f64], xim: f64) -> f64 {
    let (mean, var) = crate::stats::mean_var(normalized);
    if mean > 1e-10 {
        (var - xim * mean) / (mean * mean)
    } else {
        f64::INFINITY
    }
}

/// Dispersion of one gene; all-zero genes give NaN
///
/// Returns the estimate and the expected counts used in the likelihood.
pub fn estimate_dispersion_gene(
    counts: &[f64],
    size_factors: &[f64],
    design: &Array2<f64>,
    xim: f64,
    group_model: bool,
    params: &DispersionParams,
) -> (f64, Vec<f64>) {
    let n = counts.len();
    if counts.iter().all(|&c| c == 0.0) {
        return (f64::NAN, vec![0.0; n]);
    }

    let min_disp = params.min_disp;
    let max_disp = (n as f64).max(10.0);

    let normalized: Vec<f64> = counts
        .iter()
        .zip(size_factors.iter())
        .map(|(&c, &s)| c / s)
        .collect();

    let rough = rough_disp_estimate(&normalized, design);
    let moments = moments_disp_estimate(&normalized, xim);
    let alpha_init = rough.min(moments).clamp(min_disp, max_disp);

    let mu: Vec<f64> = if group_model {
        linear_model_mu(&normalized, size_factors, design)
            .into_iter()
            .map(|m| m.max(MIN_MU))
            .collect()
    } else {
        let glm = GlmFitParams {
            maxit: params.maxit,
            beta_tol: params.disp_tol,
        };
        fit_single_gene(counts, design, size_factors, alpha_init, &glm).mu
    };

    let problem = DispersionProblem {
        counts,
        mu: &mu,
        design,
        prior: None,
    };
    let settings = LineSearch {
        kappa_0: params.kappa_0,
        tol: params.disp_tol,
        maxit: params.maxit,
        min_log_alpha: (min_disp / 10.0).ln(),
    };
    let search = problem.line_search(alpha_init, &settings);

    let no_increase = search.last_lp < search.initial_lp + search.initial_lp.abs() / 1e6;
    let mut alpha = if no_increase {
        alpha_init
    } else {
        search.log_alpha.exp()
    };

    let converged = search.iterations < params.maxit && search.iterations != 1;
    if !converged && alpha > min_disp * 10.0 {
        alpha = problem.grid_search(min_disp.ln(), max_disp.ln());
    }

    (alpha.clamp(min_disp, max_disp), mu)
}
