//! Library size normalization

mod size_factors;

pub use size_factors::{estimate_size_factors, SizeFactorMethod};
