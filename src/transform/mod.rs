//! Variance-stabilizing transformation for exploratory analysis

mod vst;

pub use vst::{vst, vst_value, StabilizedMatrix};
