//! Benjamini-Hochberg adjustment

use std::cmp::Ordering;

/// Benjamini-Hochberg adjusted p-values.
///
/// NaN inputs stay NaN and do not count towards the number of tests.
pub fn benjamini_hochberg(pvalues: &[f64]) -> Vec<f64> {
    let n = pvalues.len();
    let mut padj = vec![f64::NAN; n];

    let mut order: Vec<usize> = (0..n).filter(|&i| !pvalues[i].is_nan()).collect();
    let m = order.len();
    if m == 0 {
        return padj;
    }
    order.sort_by(|&a, &b| pvalues[a].partial_cmp(&pvalues[b]).unwrap_or(Ordering::Equal));

    let mut cummin = f64::INFINITY;
    for (rank, &i) in order.iter().enumerate().rev() {
        let adj = (pvalues[i] * m as f64 / (rank + 1) as f64).min(1.0);
        cummin = cummin.min(adj);
        padj[i] = cummin;
    }
    padj
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bh_matches_reference() {
        // p.adjust(c(0.01, 0.04, 0.03, 0.005), "BH")
        let padj = benjamini_hochberg(&[0.01, 0.04, 0.03, 0.005]);
        let expected = [0.02, 0.04, 0.04, 0.02];
        for (a, b) in padj.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_bh_ignores_nan() {
        let padj = benjamini_hochberg(&[0.01, f64::NAN, 0.02]);
        assert!(padj[1].is_nan());
        assert!((padj[0] - 0.02).abs() < 1e-12);
        assert!((padj[2] - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_bh_monotone_and_capped() {
        let p = [0.9, 0.5, 0.99, 0.001];
        let padj = benjamini_hochberg(&p);
        assert!(padj.iter().all(|&q| q <= 1.0));
        assert!(padj[3] <= padj[1] && padj[1] <= padj[0]);
    }
}
