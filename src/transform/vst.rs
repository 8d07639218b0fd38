//! Variance stabilizing transformation
//!
//! Closed-form transforms that match the fitted dispersion trend:
//!
//! - parametric `a1/mu + a0`:
//!   `log2((1 + a1 + 2 a0 q + 2 sqrt(a0 q (1 + a1 + a0 q))) / (4 a0))`
//! - constant `a`: `(2 asinh(sqrt(a q)) - ln a - ln 4) / ln 2`
//!
//! where `q` is the normalized count.

use ndarray::Array2;

use crate::data::CountDataSet;
use crate::dispersion::DispersionTrend;
use crate::error::{PipelineError, Result};

/// Transformed values (genes x samples) with their labels
#[derive(Debug, Clone, PartialEq)]
pub struct StabilizedMatrix {
    pub data: Array2<f64>,
    pub gene_ids: Vec<String>,
    pub sample_ids: Vec<String>,
}

impl StabilizedMatrix {
    pub fn n_genes(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.data.ncols()
    }

    /// Rows restricted to the given gene indices, in that order
    pub fn select_genes(&self, indices: &[usize]) -> Self {
        let mut data = Array2::zeros((indices.len(), self.n_samples()));
        for (new_i, &i) in indices.iter().enumerate() {
            data.row_mut(new_i).assign(&self.data.row(i));
        }
        Self {
            data,
            gene_ids: indices.iter().map(|&i| self.gene_ids[i].clone()).collect(),
            sample_ids: self.sample_ids.clone(),
        }
    }
}

/// Transform one normalized count
pub fn vst_value(q: f64, trend: &DispersionTrend) -> f64 {
    match *trend {
        DispersionTrend::Parametric {
            asympt_disp: a0,
            extra_pois: a1,
        } => {
            let inner = 1.0 + a1 + 2.0 * a0 * q + 2.0 * (a0 * q * (1.0 + a1 + a0 * q)).sqrt();
            (inner / (4.0 * a0)).log2()
        }
        DispersionTrend::Mean { dispersion: a } => {
            (2.0 * (a * q).sqrt().asinh() - a.ln() - 4f64.ln()) / std::f64::consts::LN_2
        }
    }
}

/// Variance-stabilize the normalized counts of a fitted dataset
pub fn vst(dds: &CountDataSet) -> Result<StabilizedMatrix> {
    let norm = dds.normalized_counts().ok_or_else(|| PipelineError::InvalidInput {
        reason: "size factors must be estimated before VST".to_string(),
    })?;
    let trend = dds.dispersion_trend().ok_or_else(|| PipelineError::InvalidInput {
        reason: "a dispersion trend must be fitted before VST".to_string(),
    })?;
    log::debug!("VST using {} dispersion trend", trend);

    Ok(StabilizedMatrix {
        data: norm.mapv(|q| vst_value(q, trend)),
        gene_ids: dds.counts().gene_ids().to_vec(),
        sample_ids: dds.counts().sample_ids().to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_parametric_is_log2_like_for_large_counts() {
        let trend = DispersionTrend::Parametric {
            asympt_disp: 0.05,
            extra_pois: 2.0,
        };
        let a = vst_value(1e5, &trend);
        let b = vst_value(2e5, &trend);
        assert!((b - a - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_mean_formula_is_monotone() {
        let trend = DispersionTrend::Mean { dispersion: 0.1 };
        let values: Vec<f64> = [0.0, 1.0, 10.0, 100.0]
            .iter()
            .map(|&q| vst_value(q, &trend))
            .collect();
        assert!(values.windows(2).all(|w| w[1] > w[0]));
        // asinh(0) = 0
        let expected = (-(0.1f64).ln() - 4f64.ln()) / std::f64::consts::LN_2;
        assert!((values[0] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_select_genes() {
        let m = StabilizedMatrix {
            data: array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]],
            gene_ids: vec!["a".into(), "b".into(), "c".into()],
            sample_ids: vec!["s1".into(), "s2".into()],
        };
        let sub = m.select_genes(&[2, 0]);
        assert_eq!(sub.gene_ids, vec!["c", "a"]);
        assert_eq!(sub.data, array![[5.0, 6.0], [1.0, 2.0]]);
    }
}
