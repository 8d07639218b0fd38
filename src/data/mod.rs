//! Count data, sample metadata and per-fit model state

mod count_matrix;
mod dataset;
mod metadata;

pub use count_matrix::CountMatrix;
pub use dataset::{check_sample_order, CountDataSet};
pub use metadata::SampleMetadata;
