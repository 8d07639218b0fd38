//! CountDataSet - counts, sample metadata and the state of one model fit

use ndarray::{Array1, Array2, Array3, Axis};

use super::{CountMatrix, SampleMetadata};
use crate::dispersion::DispersionTrend;
use crate::error::{PipelineError, Result};
use crate::glm::{create_design_matrix, DesignInfo, DesignSpec};

/// Positional check that the count matrix columns are exactly the metadata samples
pub fn check_sample_order(counts: &CountMatrix, metadata: &SampleMetadata) -> Result<()> {
    let in_counts = counts.sample_ids();
    let in_meta = metadata.sample_ids();

    if in_counts == in_meta {
        return Ok(());
    }

    let missing_meta: Vec<&String> = in_counts.iter().filter(|s| !in_meta.contains(s)).collect();
    let missing_counts: Vec<&String> = in_meta.iter().filter(|s| !in_counts.contains(s)).collect();

    let reason = if !missing_meta.is_empty() || !missing_counts.is_empty() {
        let mut msg = String::new();
        if !missing_meta.is_empty() {
            msg.push_str(&format!("in counts but not metadata: {:?}", missing_meta));
        }
        if !missing_counts.is_empty() {
            if !msg.is_empty() {
                msg.push_str("; ");
            }
            msg.push_str(&format!("in metadata but not counts: {:?}", missing_counts));
        }
        msg
    } else {
        let position = in_counts
            .iter()
            .zip(in_meta.iter())
            .position(|(a, b)| a != b)
            .unwrap_or(0);
        format!(
            "same samples in a different order; first difference at column {} ('{}' vs '{}')",
            position, in_counts[position], in_meta[position]
        )
    };

    Err(PipelineError::SampleOrderMismatch { reason })
}

/// Data and intermediate results for one negative binomial fit
#[derive(Debug, Clone)]
pub struct CountDataSet {
    counts: CountMatrix,
    metadata: SampleMetadata,
    design: Array2<f64>,
    design_info: DesignInfo,

    // Normalization
    size_factors: Option<Array1<f64>>,
    normalized_counts: Option<Array2<f64>>,

    // Dispersion estimation
    gene_dispersions: Option<Array1<f64>>,
    trended_dispersions: Option<Array1<f64>>,
    map_dispersions: Option<Array1<f64>>,
    /// Genes whose final dispersion kept the gene-wise value
    dispersion_outliers: Option<Vec<bool>>,
    dispersion_trend: Option<DispersionTrend>,
    var_log_disp_ests: Option<f64>,
    /// Expected counts from gene-wise dispersion estimation
    mu: Option<Array2<f64>>,

    // GLM
    coefficients: Option<Array2<f64>>,
    /// Coefficient covariance per gene (genes x coefs x coefs)
    covariances: Option<Array3<f64>>,
    hat_diagonals: Option<Array2<f64>>,
    fitted_mu: Option<Array2<f64>>,
    converged: Option<Vec<bool>>,
}

impl CountDataSet {
    /// Build a dataset; the metadata must list the count matrix samples in the same order
    pub fn new(counts: CountMatrix, metadata: SampleMetadata, spec: &DesignSpec) -> Result<Self> {
        check_sample_order(&counts, &metadata)?;
        if counts.n_genes() == 0 {
            return Err(PipelineError::EmptyData {
                reason: "count matrix has no genes".to_string(),
            });
        }
        let (design, design_info) = create_design_matrix(&metadata, spec)?;

        if design.nrows() == design.ncols() {
            log::warn!(
                "No replicates: {} samples for {} coefficients; dispersion estimates will be unreliable",
                design.nrows(),
                design.ncols()
            );
        }

        Ok(Self {
            counts,
            metadata,
            design,
            design_info,
            size_factors: None,
            normalized_counts: None,
            gene_dispersions: None,
            trended_dispersions: None,
            map_dispersions: None,
            dispersion_outliers: None,
            dispersion_trend: None,
            var_log_disp_ests: None,
            mu: None,
            coefficients: None,
            covariances: None,
            hat_diagonals: None,
            fitted_mu: None,
            converged: None,
        })
    }

    // Getters
    pub fn counts(&self) -> &CountMatrix {
        &self.counts
    }

    pub fn metadata(&self) -> &SampleMetadata {
        &self.metadata
    }

    pub fn design_matrix(&self) -> &Array2<f64> {
        &self.design
    }

    pub fn design_info(&self) -> &DesignInfo {
        &self.design_info
    }

    pub fn n_genes(&self) -> usize {
        self.counts.n_genes()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.n_samples()
    }

    pub fn size_factors(&self) -> Option<&Array1<f64>> {
        self.size_factors.as_ref()
    }

    pub fn normalized_counts(&self) -> Option<&Array2<f64>> {
        self.normalized_counts.as_ref()
    }

    /// Mean of normalized counts per gene
    pub fn base_means(&self) -> Option<Array1<f64>> {
        self.normalized_counts
            .as_ref()
            .and_then(|nc| nc.mean_axis(Axis(1)))
    }

    pub fn gene_dispersions(&self) -> Option<&Array1<f64>> {
        self.gene_dispersions.as_ref()
    }

    pub fn trended_dispersions(&self) -> Option<&Array1<f64>> {
        self.trended_dispersions.as_ref()
    }

    pub fn map_dispersions(&self) -> Option<&Array1<f64>> {
        self.map_dispersions.as_ref()
    }

    pub fn dispersion_outliers(&self) -> Option<&Vec<bool>> {
        self.dispersion_outliers.as_ref()
    }

    pub fn dispersion_trend(&self) -> Option<&DispersionTrend> {
        self.dispersion_trend.as_ref()
    }

    pub fn var_log_disp_ests(&self) -> Option<f64> {
        self.var_log_disp_ests
    }

    pub fn mu(&self) -> Option<&Array2<f64>> {
        self.mu.as_ref()
    }

    /// Final dispersions: MAP if available, otherwise gene-wise
    pub fn dispersions(&self) -> Option<&Array1<f64>> {
        self.map_dispersions
            .as_ref()
            .or(self.gene_dispersions.as_ref())
    }

    pub fn coefficients(&self) -> Option<&Array2<f64>> {
        self.coefficients.as_ref()
    }

    pub fn covariances(&self) -> Option<&Array3<f64>> {
        self.covariances.as_ref()
    }

    pub fn hat_diagonals(&self) -> Option<&Array2<f64>> {
        self.hat_diagonals.as_ref()
    }

    pub fn fitted_mu(&self) -> Option<&Array2<f64>> {
        self.fitted_mu.as_ref()
    }

    pub fn converged(&self) -> Option<&Vec<bool>> {
        self.converged.as_ref()
    }

    fn check_gene_len(&self, what: &str, len: usize) -> Result<()> {
        if len != self.n_genes() {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} {}", self.n_genes(), what),
                got: format!("{}", len),
            });
        }
        Ok(())
    }

    fn check_gene_sample_dim(&self, what: &str, dim: (usize, usize)) -> Result<()> {
        if dim != (self.n_genes(), self.n_samples()) {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} x {} {}", self.n_genes(), self.n_samples(), what),
                got: format!("{} x {}", dim.0, dim.1),
            });
        }
        Ok(())
    }

    // Setters (used by the fitting steps)
    pub fn set_size_factors(&mut self, size_factors: Array1<f64>) -> Result<()> {
        if size_factors.len() != self.n_samples() {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} size factors", self.n_samples()),
                got: format!("{}", size_factors.len()),
            });
        }
        if size_factors.iter().any(|&x| !x.is_finite() || x <= 0.0) {
            return Err(PipelineError::SizeFactorFailed {
                reason: "size factors must be positive finite values".to_string(),
            });
        }
        let mut normalized = self.counts.counts().to_owned();
        for (mut col, &sf) in normalized.axis_iter_mut(Axis(1)).zip(size_factors.iter()) {
            col.mapv_inplace(|c| c / sf);
        }
        self.normalized_counts = Some(normalized);
        self.size_factors = Some(size_factors);
        Ok(())
    }

    pub fn set_gene_dispersions(&mut self, dispersions: Array1<f64>, mu: Array2<f64>) -> Result<()> {
        self.check_gene_len("dispersions", dispersions.len())?;
        self.check_gene_sample_dim("mu", mu.dim())?;
        self.gene_dispersions = Some(dispersions);
        self.mu = Some(mu);
        Ok(())
    }

    pub fn set_trended_dispersions(
        &mut self,
        dispersions: Array1<f64>,
        trend: DispersionTrend,
    ) -> Result<()> {
        self.check_gene_len("dispersions", dispersions.len())?;
        self.trended_dispersions = Some(dispersions);
        self.dispersion_trend = Some(trend);
        Ok(())
    }

    pub fn set_map_dispersions(
        &mut self,
        dispersions: Array1<f64>,
        outliers: Vec<bool>,
        var_log_disp_ests: f64,
    ) -> Result<()> {
        self.check_gene_len("dispersions", dispersions.len())?;
        self.check_gene_len("outlier flags", outliers.len())?;
        self.map_dispersions = Some(dispersions);
        self.dispersion_outliers = Some(outliers);
        self.var_log_disp_ests = Some(var_log_disp_ests);
        Ok(())
    }

    pub fn set_glm_fit(
        &mut self,
        coefficients: Array2<f64>,
        covariances: Array3<f64>,
        hat_diagonals: Array2<f64>,
        fitted_mu: Array2<f64>,
        converged: Vec<bool>,
    ) -> Result<()> {
        let p = self.design.ncols();
        if coefficients.dim() != (self.n_genes(), p) || covariances.dim() != (self.n_genes(), p, p) {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} genes x {} coefficients", self.n_genes(), p),
                got: format!("{:?}", coefficients.dim()),
            });
        }
        self.check_gene_sample_dim("hat diagonals", hat_diagonals.dim())?;
        self.check_gene_sample_dim("fitted means", fitted_mu.dim())?;
        self.check_gene_len("convergence flags", converged.len())?;
        self.coefficients = Some(coefficients);
        self.covariances = Some(covariances);
        self.hat_diagonals = Some(hat_diagonals);
        self.fitted_mu = Some(fitted_mu);
        self.converged = Some(converged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn create_test_dataset() -> CountDataSet {
        let counts = CountMatrix::new(
            array![[10.0, 20.0, 30.0, 40.0], [5.0, 6.0, 7.0, 8.0]],
            strings(&["g1", "g2"]),
            strings(&["s1", "s2", "s3", "s4"]),
        )
        .unwrap();
        let mut meta = SampleMetadata::new(strings(&["s1", "s2", "s3", "s4"])).unwrap();
        meta.add_condition("treatment", strings(&["A", "A", "B", "B"]))
            .unwrap();
        CountDataSet::new(counts, meta, &DesignSpec::new(&["treatment"])).unwrap()
    }

    #[test]
    fn test_dataset_creation() {
        let dds = create_test_dataset();
        assert_eq!(dds.n_genes(), 2);
        assert_eq!(dds.design_matrix().dim(), (4, 2));
        assert!(dds.size_factors().is_none());
    }

    #[test]
    fn test_size_factor_setting() {
        let mut dds = create_test_dataset();
        dds.set_size_factors(array![1.0, 2.0, 1.0, 2.0]).unwrap();
        let norm = dds.normalized_counts().unwrap();
        assert_eq!(norm[[0, 1]], 10.0);
        assert_eq!(dds.base_means().unwrap()[0], 17.5);
        assert!(dds.set_size_factors(array![1.0, 0.0, 1.0, 1.0]).is_err());
    }

    #[test]
    fn test_sample_order_mismatch_rejected() {
        let counts = CountMatrix::new(
            array![[1.0, 2.0]],
            strings(&["g1"]),
            strings(&["s1", "s2"]),
        )
        .unwrap();
        let mut meta = SampleMetadata::new(strings(&["s2", "s1"])).unwrap();
        meta.add_condition("treatment", strings(&["A", "B"])).unwrap();

        let err = check_sample_order(&counts, &meta).unwrap_err();
        assert!(matches!(err, PipelineError::SampleOrderMismatch { .. }));
        assert!(CountDataSet::new(counts, meta, &DesignSpec::new(&["treatment"])).is_err());
    }

    #[test]
    fn test_sample_set_mismatch_reported() {
        let counts = CountMatrix::new(array![[1.0, 2.0]], strings(&["g1"]), strings(&["s1", "s2"]))
            .unwrap();
        let meta = SampleMetadata::new(strings(&["s1", "s3"])).unwrap();
        let err = check_sample_order(&counts, &meta).unwrap_err().to_string();
        assert!(err.contains("s2") && err.contains("s3"));
    }
}
