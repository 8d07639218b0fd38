//! Size factor estimation using the median of ratios method

use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::data::CountDataSet;
use crate::error::{PipelineError, Result};
use crate::stats::median;

/// Method for size factor estimation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeFactorMethod {
    /// Median of ratios over genes with a positive count in every sample
    #[default]
    Ratio,
    /// Geometric means over positive counts only, for sparse data
    PosCounts,
}

/// Estimate size factors and store them (with normalized counts) in the dataset
///
/// `Ratio` falls back to `PosCounts` when no gene is expressed in every sample,
/// which happens in small subsets with many zeros.
pub fn estimate_size_factors(dds: &mut CountDataSet, method: SizeFactorMethod) -> Result<()> {
    let counts = dds.counts().counts();

    let size_factors = match method {
        SizeFactorMethod::Ratio => match median_of_ratios(counts, ratio_geo_mean) {
            Ok(sf) => sf,
            Err(e) => {
                log::warn!("{}; falling back to positive-count geometric means", e);
                poscounts(counts)?
            }
        },
        SizeFactorMethod::PosCounts => poscounts(counts)?,
    };

    log::debug!("Size factors: {:?}", size_factors.to_vec());
    dds.set_size_factors(size_factors)
}

/// Geometric mean when every count is positive
fn ratio_geo_mean(row: ArrayView1<f64>) -> Option<f64> {
    if row.iter().all(|&x| x > 0.0) {
        Some((row.iter().map(|x| x.ln()).sum::<f64>() / row.len() as f64).exp())
    } else {
        None
    }
}

/// Geometric mean of the positive counts, averaged over all samples
fn positive_geo_mean(row: ArrayView1<f64>) -> Option<f64> {
    let log_sum: f64 = row.iter().filter(|&&x| x > 0.0).map(|x| x.ln()).sum();
    if row.iter().any(|&x| x > 0.0) {
        Some((log_sum / row.len() as f64).exp())
    } else {
        None
    }
}

fn median_of_ratios<F>(counts: ArrayView2<f64>, geo_mean: F) -> Result<Array1<f64>>
where
    F: Fn(ArrayView1<f64>) -> Option<f64>,
{
    let (n_genes, n_samples) = counts.dim();
    if n_genes == 0 || n_samples == 0 {
        return Err(PipelineError::EmptyData {
            reason: "Count matrix is empty".to_string(),
        });
    }

    let reference: Vec<(usize, f64)> = counts
        .axis_iter(Axis(0))
        .enumerate()
        .filter_map(|(i, row)| geo_mean(row).map(|g| (i, g)))
        .collect();

    if reference.is_empty() {
        return Err(PipelineError::SizeFactorFailed {
            reason: "no genes usable as a reference".to_string(),
        });
    }

    let mut size_factors = Array1::zeros(n_samples);
    for j in 0..n_samples {
        let ratios: Vec<f64> = reference
            .iter()
            .filter(|(i, _)| counts[[*i, j]] > 0.0)
            .map(|&(i, g)| counts[[i, j]] / g)
            .collect();

        let m = median(&ratios);
        if !(m > 0.0 && m.is_finite()) {
            return Err(PipelineError::SizeFactorFailed {
                reason: format!("no valid ratios for sample {}", j),
            });
        }
        size_factors[j] = m;
    }
    Ok(size_factors)
}

fn poscounts(counts: ArrayView2<f64>) -> Result<Array1<f64>> {
    let sf = median_of_ratios(counts, positive_geo_mean)?;
    // Center to geometric mean 1
    let log_center = sf.iter().map(|x| x.ln()).sum::<f64>() / sf.len() as f64;
    Ok(sf.mapv(|x| x / log_center.exp()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CountMatrix, SampleMetadata};
    use crate::glm::DesignSpec;
    use ndarray::{array, Array2};

    fn dataset(counts: Array2<f64>) -> CountDataSet {
        let n = counts.ncols();
        let genes: Vec<String> = (0..counts.nrows()).map(|i| format!("g{}", i)).collect();
        let samples: Vec<String> = (0..n).map(|j| format!("s{}", j)).collect();
        let mut meta = SampleMetadata::new(samples.clone()).unwrap();
        meta.add_condition("group", (0..n).map(|j| if j < n / 2 { "a" } else { "b" }.to_string()).collect())
            .unwrap();
        let counts = CountMatrix::new(counts, genes, samples).unwrap();
        CountDataSet::new(counts, meta, &DesignSpec::new(&["group"])).unwrap()
    }

    #[test]
    fn test_size_factors_scale_with_depth() {
        let mut dds = dataset(array![
            [10.0, 20.0, 10.0, 20.0],
            [100.0, 200.0, 100.0, 200.0],
            [50.0, 100.0, 50.0, 100.0]
        ]);
        estimate_size_factors(&mut dds, SizeFactorMethod::Ratio).unwrap();
        let sf = dds.size_factors().unwrap();
        assert!((sf[1] / sf[0] - 2.0).abs() < 1e-10);
        assert!((sf[0] * sf[1] * sf[2] * sf[3] - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_ratio_falls_back_when_every_gene_has_a_zero() {
        let mut dds = dataset(array![
            [0.0, 20.0, 10.0, 20.0],
            [100.0, 0.0, 100.0, 200.0],
            [50.0, 100.0, 0.0, 100.0]
        ]);
        estimate_size_factors(&mut dds, SizeFactorMethod::Ratio).unwrap();
        assert!(dds.size_factors().unwrap().iter().all(|&s| s > 0.0));
    }
}
