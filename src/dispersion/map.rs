//! Maximum a posteriori dispersions: gene-wise estimates shrunk toward the trend

use ndarray::Array1;
use rayon::prelude::*;

use super::posterior::{DispersionProblem, LineSearch, LogNormalPrior};
use super::DispersionParams;
use crate::data::CountDataSet;
use crate::error::{PipelineError, Result};
use crate::stats::{mad, trigamma};

/// Lower bound on the prior variance of log dispersions
const MIN_PRIOR_VAR: f64 = 0.25;

/// Prior variance and the observed variance of log(gene-wise / trend)
///
/// prior = max(mad^2 - trigamma((m - p) / 2), 0.25)
pub fn estimate_prior_variance(
    gene_disp: &[f64],
    trended: &[f64],
    n_samples: usize,
    n_coefs: usize,
    min_disp: f64,
) -> (f64, f64) {
    let residuals: Vec<f64> = gene_disp
        .iter()
        .zip(trended.iter())
        .filter(|(&g, &t)| g.is_finite() && g >= 100.0 * min_disp && t > 0.0 && t.is_finite())
        .map(|(&g, &t)| g.ln() - t.ln())
        .collect();

    if residuals.len() < 3 {
        return (MIN_PRIOR_VAR, MIN_PRIOR_VAR);
    }

    let var_log_disp = mad(&residuals).powi(2);
    if n_samples <= n_coefs {
        return (MIN_PRIOR_VAR, var_log_disp);
    }
    let expected = trigamma((n_samples - n_coefs) as f64 / 2.0);
    ((var_log_disp - expected).max(MIN_PRIOR_VAR), var_log_disp)
}

/// Shrink gene-wise dispersions toward the trend
///
/// Genes far above the trend (more than `outlier_sd` standard deviations on the
/// log scale) keep their gene-wise value and are flagged as outliers.
pub fn estimate_map_dispersions(dds: &mut CountDataSet, params: &DispersionParams) -> Result<()> {
    let missing = |what: &str| PipelineError::InvalidInput {
        reason: format!("{} required for MAP dispersion estimation", what),
    };
    let gene_disp = dds.gene_dispersions().ok_or_else(|| missing("gene-wise dispersions"))?.to_vec();
    let trended = dds.trended_dispersions().ok_or_else(|| missing("trended dispersions"))?.to_vec();
    let mu = dds.mu().ok_or_else(|| missing("expected counts"))?;
    let counts = dds.counts().counts();
    let design = dds.design_matrix();
    let (n_genes, n_samples) = counts.dim();

    let (prior_var, var_log_disp) =
        estimate_prior_variance(&gene_disp, &trended, n_samples, design.ncols(), params.min_disp);
    log::debug!("Dispersion prior variance {:.4}, log residual variance {:.4}", prior_var, var_log_disp);

    let max_disp = (n_samples as f64).max(10.0);
    let settings = LineSearch {
        kappa_0: params.kappa_0,
        tol: params.disp_tol,
        maxit: params.maxit,
        min_log_alpha: (params.min_disp / 10.0).ln(),
    };

    let map: Vec<f64> = (0..n_genes)
        .into_par_iter()
        .map(|i| {
            if !gene_disp[i].is_finite() {
                return f64::NAN;
            }
            let y = counts.row(i).to_vec();
            let m = mu.row(i).to_vec();
            let problem = DispersionProblem {
                counts: &y,
                mu: &m,
                design,
                prior: Some(LogNormalPrior {
                    mean: trended[i].ln(),
                    variance: prior_var,
                }),
            };
            let start = if gene_disp[i] > 0.1 * trended[i] {
                gene_disp[i]
            } else {
                trended[i]
            };
            let search = problem.line_search(start, &settings);
            let alpha = if search.iterations < params.maxit {
                search.log_alpha.exp()
            } else {
                problem.grid_search(params.min_disp.ln(), max_disp.ln())
            };
            alpha.clamp(params.min_disp, max_disp)
        })
        .collect();

    let threshold = params.outlier_sd * var_log_disp.sqrt();
    let outliers: Vec<bool> = (0..n_genes)
        .map(|i| {
            gene_disp[i].is_finite()
                && gene_disp[i] > 0.0
                && trended[i] > 0.0
                && gene_disp[i].ln() - trended[i].ln() > threshold
        })
        .collect();

    let final_disp: Array1<f64> = (0..n_genes)
        .map(|i| if outliers[i] { gene_disp[i] } else { map[i] })
        .collect();

    log::debug!(
        "Dispersion outliers: {} (threshold {:.3})",
        outliers.iter().filter(|&&o| o).count(),
        threshold
    );
    dds.set_map_dispersions(final_disp, outliers, var_log_disp)
}
