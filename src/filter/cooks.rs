//! Cook's distance outlier filtering
//!
//! Cook's distance measures the influence of each count on its gene's fit:
//! `cooks = pearson_res^2 / p * h / (1 - h)^2`, with the Pearson residual taken
//! under a robust method-of-moments dispersion rather than the fitted one.

use ndarray::Array2;
use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, FisherSnedecor};
use std::collections::BTreeMap;

use crate::data::CountDataSet;
use crate::error::{PipelineError, Result};
use crate::io::DeTable;
use crate::stats::trimmed_mean;

/// Floor of the robust method-of-moments dispersion
const MIN_MOM_DISP: f64 = 0.04;

/// Replicates a cell needs before its samples take part in outlier calls
pub const MIN_CELL_REPLICATES: usize = 3;

/// Cook's distance for every gene and sample (genes x samples)
pub fn calculate_cooks_distance(dds: &CountDataSet) -> Result<Array2<f64>> {
    let mu = dds.fitted_mu().ok_or_else(|| PipelineError::InvalidInput {
        reason: "GLM must be fitted before computing Cook's distances".to_string(),
    })?;
    let hat = dds.hat_diagonals().ok_or_else(|| PipelineError::InvalidInput {
        reason: "hat diagonals not available".to_string(),
    })?;
    let p = dds.design_matrix().ncols() as f64;
    let n_samples = dds.n_samples();
    let dispersions = robust_method_of_moments_disp(dds)?;
    let counts = dds.counts().counts();

    let rows: Vec<Vec<f64>> = (0..dds.n_genes())
        .into_par_iter()
        .map(|i| {
            let alpha = dispersions[i];
            (0..n_samples)
                .map(|j| {
                    let m = mu[[i, j]];
                    let h = hat[[i, j]];
                    let v = m + alpha * m * m;
                    let pearson_sq = if v > 0.0 {
                        (counts[[i, j]] - m).powi(2) / v
                    } else {
                        0.0
                    };
                    if h.is_finite() && h < 1.0 && pearson_sq.is_finite() {
                        pearson_sq / p * h / (1.0 - h).powi(2)
                    } else {
                        f64::NAN
                    }
                })
                .collect()
        })
        .collect();

    let mut cooks = Array2::zeros((dds.n_genes(), n_samples));
    for (i, row) in rows.into_iter().enumerate() {
        for (j, v) in row.into_iter().enumerate() {
            cooks[[i, j]] = v;
        }
    }
    Ok(cooks)
}

/// Group samples by identical design matrix rows
fn design_cells(design: &Array2<f64>) -> Vec<Vec<usize>> {
    let mut cells: BTreeMap<Vec<i64>, Vec<usize>> = BTreeMap::new();
    for (j, row) in design.rows().into_iter().enumerate() {
        let key = row.iter().map(|&x| (x * 1e6).round() as i64).collect();
        cells.entry(key).or_default().push(j);
    }
    cells.into_values().collect()
}

/// Samples that sit in a cell with at least [`MIN_CELL_REPLICATES`] members
pub fn replicated_samples(design: &Array2<f64>) -> Vec<usize> {
    let mut samples: Vec<usize> = design_cells(design)
        .into_iter()
        .filter(|c| c.len() >= MIN_CELL_REPLICATES)
        .flatten()
        .collect();
    samples.sort_unstable();
    samples
}

/// Dispersion `(v - m) / m^2` from a trimmed variance, floored at 0.04.
///
/// The variance is the largest trimmed within-cell variance over replicated
/// cells, or a trimmed variance across all samples when no cell is replicated.
pub fn robust_method_of_moments_disp(dds: &CountDataSet) -> Result<Vec<f64>> {
    let norm = dds.normalized_counts().ok_or_else(|| PipelineError::InvalidInput {
        reason: "size factors must be estimated before computing Cook's distances".to_string(),
    })?;
    let cells: Vec<Vec<usize>> = design_cells(dds.design_matrix())
        .into_iter()
        .filter(|c| c.len() >= MIN_CELL_REPLICATES)
        .collect();
    let all: Vec<usize> = (0..dds.n_samples()).collect();

    Ok(norm
        .rows()
        .into_iter()
        .map(|row| {
            let values: Vec<f64> = row.to_vec();
            let variance = if cells.is_empty() {
                trimmed_variance(&values, &all)
            } else {
                cells
                    .iter()
                    .map(|c| trimmed_variance(&values, c))
                    .fold(0.0, f64::max)
            };
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            if mean > 0.0 {
                ((variance - mean) / (mean * mean)).max(MIN_MOM_DISP)
            } else {
                MIN_MOM_DISP
            }
        })
        .collect())
}

/// Scaled trimmed mean of squared deviations from the trimmed mean
fn trimmed_variance(values: &[f64], samples: &[usize]) -> f64 {
    let n = samples.len();
    let (trim, scale) = if n <= 3 {
        (1.0 / 3.0, 2.04)
    } else if n <= 23 {
        (1.0 / 4.0, 1.86)
    } else {
        (1.0 / 8.0, 1.51)
    };
    let x: Vec<f64> = samples.iter().map(|&j| values[j]).collect();
    let center = trimmed_mean(&x, trim);
    let sq: Vec<f64> = x.iter().map(|v| (v - center).powi(2)).collect();
    scale * trimmed_mean(&sq, trim)
}

/// 0.99 quantile of F(p, m - p)
pub fn default_cooks_cutoff(n_samples: usize, n_coefs: usize) -> f64 {
    if n_samples <= n_coefs {
        return f64::INFINITY;
    }
    FisherSnedecor::new(n_coefs as f64, (n_samples - n_coefs) as f64)
        .map_or(f64::INFINITY, |f| f.inverse_cdf(0.99))
}

/// Blank p-values of genes with a Cook's outlier. Returns the number of genes blanked.
///
/// Only samples in replicated cells are considered. For a single two-level
/// factor, a gene is kept when at least three samples have larger counts than
/// the outlying one.
pub fn filter_by_cooks(dds: &CountDataSet, table: &mut DeTable) -> Result<usize> {
    let cooks = calculate_cooks_distance(dds)?;
    let samples = replicated_samples(dds.design_matrix());
    if samples.is_empty() {
        return Ok(0);
    }
    let info = dds.design_info();
    let two_level = info.factors.len() == 1 && info.n_coefs() == 2;
    let cutoff = default_cooks_cutoff(dds.n_samples(), info.n_coefs());
    let counts = dds.counts().counts();

    let mut flagged = 0;
    for (i, row) in table.rows.iter_mut().enumerate() {
        let mut max_cooks = f64::NEG_INFINITY;
        let mut max_sample = samples[0];
        for &j in &samples {
            let c = cooks[[i, j]];
            if c.is_finite() && c > max_cooks {
                max_cooks = c;
                max_sample = j;
            }
        }
        if max_cooks <= cutoff {
            continue;
        }
        if two_level {
            let outlier = counts[[i, max_sample]];
            let larger = counts.row(i).iter().filter(|&&c| c > outlier).count();
            if larger >= 3 {
                continue;
            }
        }
        row.pvalue = f64::NAN;
        row.padj = f64::NAN;
        flagged += 1;
    }
    Ok(flagged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_cutoff_matches_f_quantile() {
        // qf(0.99, 2, 4)
        assert!((default_cooks_cutoff(6, 2) - 18.0).abs() < 1e-3);
        assert!(default_cooks_cutoff(2, 2).is_infinite());
    }

    #[test]
    fn test_replicated_samples() {
        let design = array![
            [1.0, 0.0],
            [1.0, 0.0],
            [1.0, 0.0],
            [1.0, 1.0],
            [1.0, 1.0]
        ];
        assert_eq!(replicated_samples(&design), vec![0, 1, 2]);
    }

    #[test]
    fn test_trimmed_variance_ignores_single_spike() {
        let values = [10.0, 11.0, 9.0, 10.0, 500.0, 10.0];
        let all: Vec<usize> = (0..values.len()).collect();
        let v = trimmed_variance(&values, &all);
        assert!(v < 5.0);
    }
}
