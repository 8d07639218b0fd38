//! Whole-dataset fit for exploratory analysis

mod pca;

pub use pca::{pca, top_variable_rows, PcaResult, PcaRow};

pub use crate::data::check_sample_order;

use crate::data::{CountMatrix, SampleMetadata};
use crate::error::Result;
use crate::glm::DesignSpec;
use crate::model::{DispersionDiagnostics, DispersionModel, FittedModel};
use crate::transform::StabilizedMatrix;

/// Genes used for the PCA projection
pub const PCA_TOP_GENES: usize = 500;

/// Outputs of the global fit. The stabilized matrix is for description only.
#[derive(Debug, Clone)]
pub struct Exploration {
    pub diagnostics: DispersionDiagnostics,
    pub stabilized: StabilizedMatrix,
    pub pca: PcaResult,
}

/// Fit `model` once over all samples and derive the exploratory views
pub fn explore<M: DispersionModel>(
    counts: &CountMatrix,
    metadata: &SampleMetadata,
    model: &M,
    design: &DesignSpec,
) -> Result<Exploration> {
    check_sample_order(counts, metadata)?;
    let fit = model.fit(counts, metadata, design)?;
    let diagnostics = fit.dispersion_diagnostics();
    let stabilized = fit.variance_stabilized()?;
    let pca = pca(&stabilized, PCA_TOP_GENES)?;
    log::info!(
        "PCA over {} genes: PC1 {:.1}%, PC2 {:.1}%",
        pca.n_genes_used,
        pca.percent_var[0],
        pca.percent_var[1]
    );
    Ok(Exploration {
        diagnostics,
        stabilized,
        pca,
    })
}
