//! Dispersion estimation for negative binomial models

mod gene_wise;
mod map;
mod posterior;
mod trend;

pub use gene_wise::{estimate_dispersion_gene, estimate_gene_dispersions};
pub use map::{estimate_map_dispersions, estimate_prior_variance};
pub use trend::{fit_dispersion_trend, DispersionTrend};

use serde::{Deserialize, Serialize};

use crate::data::CountDataSet;
use crate::error::{PipelineError, Result};

/// Configurable parameters for dispersion estimation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispersionParams {
    /// Minimum dispersion value
    pub min_disp: f64,
    /// Convergence tolerance on the log posterior
    pub disp_tol: f64,
    /// Initial step size for the line search
    pub kappa_0: f64,
    /// Maximum line search iterations
    pub maxit: usize,
    /// Gene-wise estimates this many SDs above the trend are not shrunk
    pub outlier_sd: f64,
}

impl Default for DispersionParams {
    fn default() -> Self {
        Self {
            min_disp: 1e-8,
            disp_tol: 1e-6,
            kappa_0: 1.0,
            maxit: 100,
            outlier_sd: 2.0,
        }
    }
}

/// Estimate gene-wise, trended and final (MAP) dispersions
pub fn estimate_dispersions(dds: &mut CountDataSet, params: &DispersionParams) -> Result<()> {
    let design = dds.design_matrix();
    if design.nrows() <= design.ncols() {
        return Err(PipelineError::InvalidDesignMatrix {
            reason: format!(
                "{} samples for {} coefficients leaves no replicates to estimate dispersion",
                design.nrows(),
                design.ncols()
            ),
        });
    }

    estimate_gene_dispersions(dds, params)?;
    fit_dispersion_trend(dds, params.min_disp)?;
    estimate_map_dispersions(dds, params)
}
