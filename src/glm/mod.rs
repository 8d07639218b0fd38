//! Generalized Linear Model fitting for negative binomial data

mod design;
mod fitting;
mod negative_binomial;

pub use design::{check_full_rank, create_design_matrix, is_group_model, Contrast, DesignInfo, DesignSpec, FactorCoding};
pub use fitting::{fit_glm, fit_single_gene, GlmFitParams, GlmFitResult};
pub use negative_binomial::{nb_deviance, nb_log_likelihood, nb_mean, nb_variance, nb_weight, MAX_LFC_BETA, MIN_MU};
