//! Dispersion-mean trend fitting

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::data::CountDataSet;
use crate::error::{PipelineError, Result};
use crate::stats::trimmed_mean;

/// Fitted dispersion as a function of the mean of normalized counts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DispersionTrend {
    /// dispersion(mean) = asympt_disp + extra_pois / mean
    Parametric { asympt_disp: f64, extra_pois: f64 },
    /// One dispersion for every gene
    Mean { dispersion: f64 },
}

impl DispersionTrend {
    pub fn eval(&self, mean: f64) -> f64 {
        match *self {
            DispersionTrend::Parametric {
                asympt_disp,
                extra_pois,
            } => {
                if mean > 0.0 {
                    asympt_disp + extra_pois / mean
                } else {
                    asympt_disp
                }
            }
            DispersionTrend::Mean { dispersion } => dispersion,
        }
    }
}

impl std::fmt::Display for DispersionTrend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispersionTrend::Parametric {
                asympt_disp,
                extra_pois,
            } => write!(f, "parametric: {:.5} + {:.5} / mean", asympt_disp, extra_pois),
            DispersionTrend::Mean { dispersion } => write!(f, "mean: {:.5}", dispersion),
        }
    }
}

/// Fit the trend to the gene-wise dispersions
///
/// The parametric fit is tried first; if it fails the mean of the gene-wise
/// dispersions is used instead.
pub fn fit_dispersion_trend(dds: &mut CountDataSet, min_disp: f64) -> Result<()> {
    let gene_disp = dds
        .gene_dispersions()
        .ok_or_else(|| PipelineError::TrendFittingFailed {
            reason: "Gene-wise dispersions must be estimated first".to_string(),
        })?
        .to_vec();
    let means = dds
        .base_means()
        .ok_or_else(|| PipelineError::TrendFittingFailed {
            reason: "Normalized counts required for trend fitting".to_string(),
        })?;

    let trend = match fit_parametric_trend(means.as_slice().unwrap_or(&[]), &gene_disp, min_disp) {
        Ok(trend) => trend,
        Err(e) => {
            log::warn!("{}; using the mean dispersion instead", e);
            mean_trend(&gene_disp, min_disp)
        }
    };
    log::info!("Dispersion trend {}", trend);

    let trended: Array1<f64> = means.mapv(|m| trend.eval(m));
    dds.set_trended_dispersions(trended, trend)
}

/// Trimmed mean of the gene-wise dispersions above the floor; `min_disp` when
/// every estimate sits at the floor
fn mean_trend(gene_disp: &[f64], min_disp: f64) -> DispersionTrend {
    let usable: Vec<f64> = gene_disp
        .iter()
        .copied()
        .filter(|&d| d.is_finite() && d > 10.0 * min_disp)
        .collect();
    let dispersion = trimmed_mean(&usable, 0.001);
    if usable.is_empty() || !dispersion.is_finite() {
        log::warn!(
            "All gene-wise dispersions are at the floor; using dispersion {:e} for every gene",
            min_disp
        );
        return DispersionTrend::Mean {
            dispersion: min_disp,
        };
    }
    DispersionTrend::Mean { dispersion }
}

/// a0 + a1 / mean by iterated Gamma GLM with residual filtering
fn fit_parametric_trend(means: &[f64], gene_disp: &[f64], min_disp: f64) -> Result<DispersionTrend> {
    let data: Vec<(f64, f64)> = means
        .iter()
        .zip(gene_disp.iter())
        .filter(|(&m, &d)| m > 0.0 && d.is_finite() && d > 100.0 * min_disp)
        .map(|(&m, &d)| (m, d))
        .collect();

    let mut coefs = (0.1_f64, 1.0_f64);
    for iter in 0..11 {
        let old = coefs;
        let good: Vec<(f64, f64)> = data
            .iter()
            .copied()
            .filter(|&(m, d)| {
                let ratio = d / (coefs.0 + coefs.1 / m);
                ratio > 1e-4 && ratio < 15.0
            })
            .collect();

        if good.len() < 3 {
            return Err(PipelineError::TrendFittingFailed {
                reason: format!("only {} genes usable for the parametric fit", good.len()),
            });
        }

        let (fit, glm_converged) = gamma_identity_glm(&good, coefs);
        coefs = fit;
        log::debug!(
            "Parametric trend iteration {}: {} genes, a0={:.6}, a1={:.6}",
            iter + 1,
            good.len(),
            coefs.0,
            coefs.1
        );

        if !(coefs.0 > 0.0 && coefs.1 > 0.0) {
            return Err(PipelineError::TrendFittingFailed {
                reason: format!(
                    "parametric coefficients not positive (a0={:.4}, a1={:.4})",
                    coefs.0, coefs.1
                ),
            });
        }

        let change = (coefs.0 / old.0).ln().powi(2) + (coefs.1 / old.1).ln().powi(2);
        if change < 1e-6 && glm_converged {
            return Ok(DispersionTrend::Parametric {
                asympt_disp: coefs.0,
                extra_pois: coefs.1,
            });
        }
    }

    Err(PipelineError::TrendFittingFailed {
        reason: "parametric dispersion fit did not converge".to_string(),
    })
}

fn gamma_deviance(data: &[(f64, f64)], a0: f64, a1: f64) -> f64 {
    data.iter()
        .map(|&(m, d)| {
            let mu = (a0 + a1 / m).max(1e-8);
            2.0 * (-(d / mu).ln() + (d - mu) / mu)
        })
        .sum()
}

/// Gamma family, identity link, regressor 1/mean; returns ((a0, a1), converged)
fn gamma_identity_glm(data: &[(f64, f64)], start: (f64, f64)) -> ((f64, f64), bool) {
    let (mut a0, mut a1) = start;
    let mut dev_old = gamma_deviance(data, a0, a1);

    for _ in 0..25 {
        let (mut sw, mut swx, mut swz, mut swxx, mut swxz) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for &(m, d) in data {
            let x = 1.0 / m;
            let mu = (a0 + a1 * x).max(1e-8);
            let w = 1.0 / (mu * mu);
            sw += w;
            swx += w * x;
            swz += w * d;
            swxx += w * x * x;
            swxz += w * x * d;
        }
        let det = sw * swxx - swx * swx;
        if det.abs() < 1e-12 {
            return ((a0, a1), false);
        }
        a0 = (swxx * swz - swx * swxz) / det;
        a1 = (sw * swxz - swx * swz) / det;

        let dev = gamma_deviance(data, a0, a1);
        if (dev_old - dev).abs() / (0.1 + dev.abs()) < 1e-8 {
            return ((a0, a1), true);
        }
        dev_old = dev;
    }
    ((a0, a1), false)
}
