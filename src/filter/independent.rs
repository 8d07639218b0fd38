//! Independent filtering on the mean of normalized counts

use crate::io::DeTable;
use crate::stats::{lowess, quantile_type7};
use crate::testing::benjamini_hochberg;

const N_THETA: usize = 50;

/// Chosen filter cut
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterThreshold {
    /// Quantile of baseMean below which genes are filtered
    pub theta: f64,
    /// baseMean value at that quantile
    pub cutoff: f64,
    pub rejections: usize,
}

/// Choose a baseMean cut that maximizes rejections at `alpha` and rewrite padj.
///
/// Genes below the cut keep their p-value but lose their adjusted p-value.
/// When no cut yields more than ten rejections, nothing is filtered.
pub fn independent_filtering(table: &mut DeTable, alpha: f64) -> Option<FilterThreshold> {
    let n = table.len();
    if n == 0 {
        return None;
    }
    let base_means: Vec<f64> = table.rows.iter().map(|r| r.base_mean).collect();
    let pvalues: Vec<f64> = table.rows.iter().map(|r| r.pvalue).collect();

    let mut sorted: Vec<f64> = base_means.iter().copied().filter(|m| m.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let zeros = base_means.iter().filter(|&&m| m == 0.0 || !m.is_finite()).count();
    let lower = zeros as f64 / n as f64;
    let upper = if lower < 0.95 { 0.95 } else { 1.0 };
    let thetas: Vec<f64> = (0..N_THETA)
        .map(|i| lower + (upper - lower) * i as f64 / (N_THETA - 1) as f64)
        .collect();
    let cutoffs: Vec<f64> = thetas.iter().map(|&t| quantile_type7(&sorted, t)).collect();

    let mut candidates = Vec::with_capacity(N_THETA);
    let mut rejections = Vec::with_capacity(N_THETA);
    for &cutoff in &cutoffs {
        let filtered: Vec<f64> = pvalues
            .iter()
            .zip(&base_means)
            .map(|(&p, &m)| if m >= cutoff { p } else { f64::NAN })
            .collect();
        let padj = benjamini_hochberg(&filtered);
        rejections.push(padj.iter().filter(|&&q| q < alpha).count());
        candidates.push(padj);
    }

    let max_rej = rejections.iter().copied().max().unwrap_or(0);
    let chosen = if max_rej <= 10 {
        0
    } else {
        let y: Vec<f64> = rejections.iter().map(|&r| r as f64).collect();
        let fit = lowess(&thetas, &y, 0.2, 3);
        let residuals: Vec<f64> = y
            .iter()
            .zip(&fit)
            .filter(|(&r, _)| r > 0.0)
            .map(|(r, f)| r - f)
            .collect();
        let rmse = if residuals.is_empty() {
            0.0
        } else {
            (residuals.iter().map(|r| r * r).sum::<f64>() / residuals.len() as f64).sqrt()
        };
        let max_fit = fit.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let first_above = |level: f64| y.iter().position(|&r| r > level);
        first_above(max_fit - rmse)
            .or_else(|| first_above(0.9 * max_fit))
            .or_else(|| first_above(0.8 * max_fit))
            .unwrap_or(0)
    };

    for (row, q) in table.rows.iter_mut().zip(&candidates[chosen]) {
        row.padj = *q;
    }

    let threshold = FilterThreshold {
        theta: thetas[chosen],
        cutoff: cutoffs[chosen],
        rejections: rejections[chosen],
    };
    log::debug!(
        "Independent filtering: theta={:.3}, cutoff={:.3}, rejections={} (max {})",
        threshold.theta,
        threshold.cutoff,
        threshold.rejections,
        max_rej
    );
    Some(threshold)
}
