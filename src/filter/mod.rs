//! Outlier and low-count filtering of test results

mod cooks;
mod independent;

pub use cooks::{
    calculate_cooks_distance, default_cooks_cutoff, filter_by_cooks, replicated_samples,
    robust_method_of_moments_disp, MIN_CELL_REPLICATES,
};
pub use independent::{independent_filtering, FilterThreshold};
