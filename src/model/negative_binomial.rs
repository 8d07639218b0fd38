//! Negative binomial GLM with shrunken dispersions

use serde::{Deserialize, Serialize};

use super::{DispersionDiagnostics, DispersionModel, DispersionRow, FittedModel};
use crate::data::{check_sample_order, CountDataSet, CountMatrix, SampleMetadata};
use crate::dispersion::{estimate_dispersions, DispersionParams};
use crate::error::Result;
use crate::filter::{filter_by_cooks, independent_filtering};
use crate::glm::{fit_glm, Contrast, DesignSpec, GlmFitParams};
use crate::io::DeTable;
use crate::normalization::{estimate_size_factors, SizeFactorMethod};
use crate::testing::{adjust_pvalues, wald_test};
use crate::transform::{vst, StabilizedMatrix};

/// Model settings; each `fit` starts from scratch with these
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegativeBinomialModel {
    pub size_factor_method: SizeFactorMethod,
    pub dispersion: DispersionParams,
    pub glm: GlmFitParams,
    /// Significance level the independent filter optimizes for
    pub alpha: f64,
    pub cooks_filter: bool,
    pub independent_filter: bool,
}

impl Default for NegativeBinomialModel {
    fn default() -> Self {
        Self {
            size_factor_method: SizeFactorMethod::Ratio,
            dispersion: DispersionParams::default(),
            glm: GlmFitParams::default(),
            alpha: 0.1,
            cooks_filter: true,
            independent_filter: true,
        }
    }
}

impl DispersionModel for NegativeBinomialModel {
    type Fit = NegativeBinomialFit;

    fn fit(
        &self,
        counts: &CountMatrix,
        metadata: &SampleMetadata,
        design: &DesignSpec,
    ) -> Result<NegativeBinomialFit> {
        check_sample_order(counts, metadata)?;
        let mut dds = CountDataSet::new(counts.clone(), metadata.clone(), design)?;
        log::info!(
            "Fitting {} genes x {} samples, coefficients {:?}",
            dds.n_genes(),
            dds.n_samples(),
            dds.design_info().coef_names
        );

        estimate_size_factors(&mut dds, self.size_factor_method)?;
        estimate_dispersions(&mut dds, &self.dispersion)?;
        fit_glm(&mut dds, &self.glm)?;

        if let Some(flags) = dds.converged() {
            let failed = flags.iter().filter(|&&c| !c).count();
            if failed > 0 {
                log::warn!("{} genes did not converge in the GLM fit", failed);
            }
        }

        Ok(NegativeBinomialFit {
            dds,
            settings: self.clone(),
        })
    }
}

/// A fitted dataset plus the settings used to test it
#[derive(Debug)]
pub struct NegativeBinomialFit {
    dds: CountDataSet,
    settings: NegativeBinomialModel,
}

impl NegativeBinomialFit {
    pub fn dataset(&self) -> &CountDataSet {
        &self.dds
    }
}

impl FittedModel for NegativeBinomialFit {
    fn dispersion_diagnostics(&self) -> DispersionDiagnostics {
        let dds = &self.dds;
        let n = dds.n_genes();
        let base_means = dds.base_means();
        let pick = |v: Option<&ndarray::Array1<f64>>, i: usize| v.map_or(f64::NAN, |a| a[i]);

        let rows = (0..n)
            .map(|i| DispersionRow {
                gene_id: dds.counts().gene_ids()[i].clone(),
                base_mean: base_means.as_ref().map_or(f64::NAN, |b| b[i]),
                gene_wise: pick(dds.gene_dispersions(), i),
                fitted: pick(dds.trended_dispersions(), i),
                final_disp: pick(dds.dispersions(), i),
                outlier: dds.dispersion_outliers().is_some_and(|o| o[i]),
            })
            .collect();

        DispersionDiagnostics {
            rows,
            trend: dds.dispersion_trend().copied(),
        }
    }

    fn variance_stabilized(&self) -> Result<StabilizedMatrix> {
        vst(&self.dds)
    }

    fn results(&self, contrast: &Contrast) -> Result<DeTable> {
        let mut table = wald_test(&self.dds, contrast)?;
        if self.settings.cooks_filter {
            let flagged = filter_by_cooks(&self.dds, &mut table)?;
            if flagged > 0 {
                log::info!("{} genes flagged by Cook's distance", flagged);
            }
        }
        if self.settings.independent_filter {
            independent_filtering(&mut table, self.settings.alpha);
        } else {
            adjust_pvalues(&mut table);
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn inputs() -> (CountMatrix, SampleMetadata) {
        let n_genes = 40;
        let mut counts = Array2::zeros((n_genes, 6));
        for i in 0..n_genes {
            let base = 20.0 + 15.0 * i as f64;
            for j in 0..6 {
                let wobble = [0.9, 1.1, 1.0, 0.95, 1.05, 1.0][j];
                let effect = if i < 5 && j >= 3 { 6.0 } else { 1.0 };
                counts[[i, j]] = (base * wobble * effect).round();
            }
        }
        let samples: Vec<String> = ["a1", "a2", "a3", "b1", "b2", "b3"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let genes = (0..n_genes).map(|i| format!("gene{}", i)).collect();
        let matrix = CountMatrix::new(counts, genes, samples.clone()).unwrap();
        let mut meta = SampleMetadata::new(samples).unwrap();
        meta.add_condition(
            "treatment",
            ["A", "A", "A", "B", "B", "B"].iter().map(|s| s.to_string()).collect(),
        )
        .unwrap();
        (matrix, meta)
    }

    #[test]
    fn test_fit_and_results() {
        let (counts, meta) = inputs();
        let model = NegativeBinomialModel::default();
        let fit = model
            .fit(&counts, &meta, &DesignSpec::new(&["treatment"]))
            .unwrap();

        let diag = fit.dispersion_diagnostics();
        assert_eq!(diag.rows.len(), 40);
        assert!(diag.trend.is_some());

        let vst = fit.variance_stabilized().unwrap();
        assert_eq!(vst.data.dim(), (40, 6));

        let table = fit.results(&Contrast::new("treatment", "B", "A")).unwrap();
        assert_eq!(table.len(), 40);
        assert!(table.rows[0].log2_fold_change > 2.0);
        assert!(table.rows[0].padj < 0.05);
    }

    #[test]
    fn test_noise_free_counts_fall_back_to_floor_trend() {
        let (noisy, meta) = inputs();
        let mut counts = noisy.counts().to_owned();
        for mut row in counts.rows_mut() {
            let (a, b) = (row[0], row[3]);
            for j in 0..6 {
                row[j] = if j < 3 { a } else { b };
            }
        }
        let counts =
            CountMatrix::new(counts, noisy.gene_ids().to_vec(), noisy.sample_ids().to_vec()).unwrap();

        let fit = NegativeBinomialModel::default()
            .fit(&counts, &meta, &DesignSpec::new(&["treatment"]))
            .unwrap();
        let diag = fit.dispersion_diagnostics();
        assert!(diag.trend.is_some());
        assert!(diag.rows.iter().all(|r| r.final_disp.is_finite()));
        let table = fit.results(&Contrast::new("treatment", "B", "A")).unwrap();
        assert_eq!(table.len(), 40);
        assert!(table.rows[0].log2_fold_change > 2.0);
    }

    #[test]
    fn test_fit_rejects_mismatched_metadata() {
        let (counts, _) = inputs();
        let samples: Vec<String> = ["a2", "a1", "a3", "b1", "b2", "b3"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut meta = SampleMetadata::new(samples).unwrap();
        meta.add_condition(
            "treatment",
            ["A", "A", "A", "B", "B", "B"].iter().map(|s| s.to_string()).collect(),
        )
        .unwrap();
        let err = NegativeBinomialModel::default()
            .fit(&counts, &meta, &DesignSpec::new(&["treatment"]))
            .unwrap_err();
        assert!(matches!(err, crate::error::PipelineError::SampleOrderMismatch { .. }));
    }
}
