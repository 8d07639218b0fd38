//! rnaseq_pipeline: bulk RNA-seq differential expression in Rust
//!
//! Per-sample count files are merged into one matrix, explored with a
//! negative binomial fit over all samples, tested per subset, checked for
//! gene-set enrichment and plotted. Each stage persists its tables so it can
//! be re-run on its own.
//!
//! # Example
//!
//! ```ignore
//! use rnaseq_pipeline::prelude::*;
//!
//! let config = PipelineConfig::from_file("pipeline.json")?;
//! run_all(&config)?;
//! ```

pub mod cli;
pub mod config;
pub mod data;
pub mod diffexp;
pub mod dispersion;
pub mod enrich;
pub mod error;
pub mod explore;
pub mod filter;
pub mod glm;
pub mod ingest;
pub mod io;
pub mod linalg;
pub mod model;
pub mod normalization;
pub mod pipeline;
pub mod plot;
pub mod stats;
pub mod testing;
pub mod transform;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{EnrichmentConfig, PipelineConfig};
    pub use crate::data::{CountMatrix, SampleMetadata};
    pub use crate::diffexp::{analyze_subset, analyze_subsets, Direction, SignificanceFilter, SubsetResult};
    pub use crate::enrich::{EnrichmentService, GeneSetLibrary};
    pub use crate::error::{PipelineError, Result};
    pub use crate::explore::explore;
    pub use crate::glm::{Contrast, DesignSpec};
    pub use crate::ingest::{ingest_directory, IngestOptions};
    pub use crate::io::{read_count_matrix, read_de_table, read_metadata, DeRow, DeTable};
    pub use crate::model::{DispersionModel, FittedModel, NegativeBinomialModel};
    pub use crate::pipeline::{
        configure_threads, run_all, run_differential, run_enrichment, run_explore, run_ingest, run_plots,
    };
}
