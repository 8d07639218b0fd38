//! Statistical testing for differential expression

mod fdr;
mod pvalue;
mod wald;

pub use fdr::benjamini_hochberg;
pub use pvalue::wald_pvalue;
pub use wald::{adjust_pvalues, wald_test};
