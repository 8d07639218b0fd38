//! Capability interfaces for the statistical model
//!
//! The pipeline stages only talk to a [`DispersionModel`] and the
//! [`FittedModel`] it returns, so they can run against a stub in tests.

mod negative_binomial;

pub use negative_binomial::{NegativeBinomialFit, NegativeBinomialModel};

use serde::{Deserialize, Serialize};

use crate::data::{CountMatrix, SampleMetadata};
use crate::dispersion::DispersionTrend;
use crate::error::Result;
use crate::glm::{Contrast, DesignSpec};
use crate::io::DeTable;
use crate::transform::StabilizedMatrix;

/// Fits a mean/dispersion model to a count matrix under a design
pub trait DispersionModel {
    type Fit: FittedModel;

    fn fit(
        &self,
        counts: &CountMatrix,
        metadata: &SampleMetadata,
        design: &DesignSpec,
    ) -> Result<Self::Fit>;
}

/// What the pipeline needs from a fitted model
pub trait FittedModel {
    fn dispersion_diagnostics(&self) -> DispersionDiagnostics;

    fn variance_stabilized(&self) -> Result<StabilizedMatrix>;

    /// One row per gene for `contrast`, in count matrix order
    fn results(&self, contrast: &Contrast) -> Result<DeTable>;
}

/// Per-gene dispersion estimates at each stage of shrinkage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispersionRow {
    pub gene_id: String,
    #[serde(rename = "baseMean")]
    pub base_mean: f64,
    pub gene_wise: f64,
    pub fitted: f64,
    #[serde(rename = "final")]
    pub final_disp: f64,
    /// Final value kept the gene-wise estimate
    pub outlier: bool,
}

impl crate::io::Record for DispersionRow {
    const COLUMNS: &'static [&'static str] =
        &["gene_id", "baseMean", "gene_wise", "fitted", "final", "outlier"];
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispersionDiagnostics {
    pub rows: Vec<DispersionRow>,
    pub trend: Option<DispersionTrend>,
}
