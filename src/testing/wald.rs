//! Wald test for one contrast

use super::fdr::benjamini_hochberg;
use super::pvalue::wald_pvalue;
use crate::data::CountDataSet;
use crate::error::{PipelineError, Result};
use crate::glm::Contrast;
use crate::io::{DeRow, DeTable};

/// Wald test of c' beta = 0 for every gene.
///
/// Fold changes and standard errors are reported on the log2 scale. Genes
/// with zero counts everywhere get LFC 0, SE 0 and NaN statistics.
pub fn wald_test(dds: &CountDataSet, contrast: &Contrast) -> Result<DeTable> {
    let coefficients = dds.coefficients().ok_or_else(|| PipelineError::InvalidContrast {
        reason: "GLM must be fitted before testing".to_string(),
    })?;
    let covariances = dds.covariances().ok_or_else(|| PipelineError::InvalidContrast {
        reason: "coefficient covariances not available".to_string(),
    })?;
    let base_means = dds.base_means().ok_or_else(|| PipelineError::InvalidInput {
        reason: "size factors must be estimated before testing".to_string(),
    })?;

    let c = dds.design_info().contrast_vector(contrast)?;
    let p = c.len();
    let ln2 = std::f64::consts::LN_2;

    let mut rows = Vec::with_capacity(dds.n_genes());
    for (i, gene_id) in dds.counts().gene_ids().iter().enumerate() {
        let base_mean = base_means[i];
        if base_mean == 0.0 {
            rows.push(DeRow {
                gene_id: gene_id.clone(),
                base_mean,
                log2_fold_change: 0.0,
                lfc_se: 0.0,
                stat: f64::NAN,
                pvalue: f64::NAN,
                padj: f64::NAN,
            });
            continue;
        }

        let beta = coefficients.row(i);
        let estimate: f64 = c.dot(&beta);
        let mut variance = 0.0;
        for j in 0..p {
            for k in 0..p {
                variance += c[j] * covariances[[i, j, k]] * c[k];
            }
        }
        let se = variance.max(0.0).sqrt();
        let stat = if se > 0.0 && se.is_finite() {
            estimate / se
        } else {
            f64::NAN
        };

        rows.push(DeRow {
            gene_id: gene_id.clone(),
            base_mean,
            log2_fold_change: estimate / ln2,
            lfc_se: se / ln2,
            stat,
            pvalue: wald_pvalue(stat),
            padj: f64::NAN,
        });
    }

    let pvalues: Vec<f64> = rows.iter().map(|r| r.pvalue).collect();
    for (row, q) in rows.iter_mut().zip(benjamini_hochberg(&pvalues)) {
        row.padj = q;
    }

    Ok(DeTable::new(rows))
}

/// Recompute padj over the current p-values
pub fn adjust_pvalues(table: &mut DeTable) {
    let pvalues: Vec<f64> = table.rows.iter().map(|r| r.pvalue).collect();
    for (row, q) in table.rows.iter_mut().zip(benjamini_hochberg(&pvalues)) {
        row.padj = q;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CountMatrix, SampleMetadata};
    use crate::dispersion::{estimate_dispersions, DispersionParams};
    use crate::glm::{fit_glm, DesignSpec, GlmFitParams};
    use crate::normalization::{estimate_size_factors, SizeFactorMethod};
    use ndarray::Array2;

    fn fitted_dataset() -> CountDataSet {
        let base = [
            [100.0, 110.0, 95.0, 105.0, 98.0, 102.0],
            [50.0, 55.0, 48.0, 400.0, 420.0, 390.0],
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            [200.0, 190.0, 210.0, 60.0, 50.0, 55.0],
            [30.0, 35.0, 28.0, 33.0, 31.0, 29.0],
            [500.0, 520.0, 480.0, 510.0, 495.0, 505.0],
            [12.0, 15.0, 9.0, 14.0, 11.0, 13.0],
            [80.0, 70.0, 90.0, 85.0, 75.0, 88.0],
        ];
        let mut counts = Array2::zeros((base.len(), 6));
        for (i, row) in base.iter().enumerate() {
            for (j, &v) in row.iter().enumerate() {
                counts[[i, j]] = v;
            }
        }
        let samples: Vec<String> = (1..=6).map(|i| format!("s{}", i)).collect();
        let genes: Vec<String> = (0..base.len()).map(|i| format!("g{}", i)).collect();
        let matrix = CountMatrix::new(counts, genes, samples.clone()).unwrap();

        let mut meta = SampleMetadata::new(samples).unwrap();
        let cond = ["ctrl", "ctrl", "ctrl", "trt", "trt", "trt"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        meta.add_condition("condition", cond).unwrap();

        let mut dds = CountDataSet::new(matrix, meta, &DesignSpec::new(&["condition"])).unwrap();
        estimate_size_factors(&mut dds, SizeFactorMethod::Ratio).unwrap();
        estimate_dispersions(&mut dds, &DispersionParams::default()).unwrap();
        fit_glm(&mut dds, &GlmFitParams::default()).unwrap();
        dds
    }

    #[test]
    fn test_wald_direction_and_zero_gene() {
        let dds = fitted_dataset();
        let table = wald_test(&dds, &Contrast::new("condition", "trt", "ctrl")).unwrap();
        assert_eq!(table.len(), 8);

        let up = &table.rows[1];
        assert!(up.log2_fold_change > 2.0);
        assert!(up.pvalue < 1e-5);

        let down = &table.rows[3];
        assert!(down.log2_fold_change < -1.0);

        let zero = &table.rows[2];
        assert_eq!(zero.log2_fold_change, 0.0);
        assert_eq!(zero.lfc_se, 0.0);
        assert!(zero.pvalue.is_nan() && zero.padj.is_nan());
    }

    #[test]
    fn test_reversed_contrast_flips_sign() {
        let dds = fitted_dataset();
        let fwd = wald_test(&dds, &Contrast::new("condition", "trt", "ctrl")).unwrap();
        let rev = wald_test(&dds, &Contrast::new("condition", "ctrl", "trt")).unwrap();
        for (a, b) in fwd.rows.iter().zip(rev.rows.iter()) {
            if a.base_mean > 0.0 {
                assert!((a.log2_fold_change + b.log2_fold_change).abs() < 1e-10);
                assert!((a.pvalue - b.pvalue).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn test_unknown_level_is_rejected() {
        let dds = fitted_dataset();
        assert!(wald_test(&dds, &Contrast::new("condition", "other", "ctrl")).is_err());
    }
}
