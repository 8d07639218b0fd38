//! Design matrix creation for the negative binomial GLM

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::data::SampleMetadata;
use crate::error::{PipelineError, Result};
use crate::linalg::column_rank;

/// Additive design over categorical covariates, e.g. `~ timepoint + treatment`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignSpec {
    /// Factor names in formula order
    pub factors: Vec<String>,
    /// Optional reference level per factor (defaults to the first level alphabetically)
    #[serde(default)]
    pub reference_levels: HashMap<String, String>,
}

impl DesignSpec {
    pub fn new<S: AsRef<str>>(factors: &[S]) -> Self {
        Self {
            factors: factors.iter().map(|f| f.as_ref().to_string()).collect(),
            reference_levels: HashMap::new(),
        }
    }

    /// Set the reference level of one factor
    pub fn with_reference(mut self, factor: &str, level: &str) -> Self {
        self.reference_levels
            .insert(factor.to_string(), level.to_string());
        self
    }
}

/// Pairwise comparison between two levels of one factor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contrast {
    pub variable: String,
    pub numerator: String,
    pub denominator: String,
}

impl Contrast {
    pub fn new(variable: &str, numerator: &str, denominator: &str) -> Self {
        Self {
            variable: variable.to_string(),
            numerator: numerator.to_string(),
            denominator: denominator.to_string(),
        }
    }
}

impl std::fmt::Display for Contrast {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} vs {}", self.variable, self.numerator, self.denominator)
    }
}

/// Treatment coding of one factor in the design matrix
#[derive(Debug, Clone)]
pub struct FactorCoding {
    pub name: String,
    pub reference: String,
    /// Non-reference levels, one design column each
    pub levels: Vec<String>,
    /// Column of the first non-reference level
    pub first_column: usize,
}

impl FactorCoding {
    fn column_of(&self, level: &str) -> Option<usize> {
        self.levels
            .iter()
            .position(|l| l == level)
            .map(|i| self.first_column + i)
    }

    fn has_level(&self, level: &str) -> bool {
        self.reference == level || self.levels.iter().any(|l| l == level)
    }
}

/// Information about the design matrix
#[derive(Debug, Clone)]
pub struct DesignInfo {
    /// Names of the coefficients
    pub coef_names: Vec<String>,
    /// Factors that contributed columns, in formula order
    pub factors: Vec<FactorCoding>,
}

impl DesignInfo {
    pub fn n_coefs(&self) -> usize {
        self.coef_names.len()
    }

    pub fn factor(&self, name: &str) -> Option<&FactorCoding> {
        self.factors.iter().find(|f| f.name == name)
    }

    /// Contrast vector c such that c' beta = log(numerator / denominator)
    pub fn contrast_vector(&self, contrast: &Contrast) -> Result<Array1<f64>> {
        let coding = self
            .factor(&contrast.variable)
            .ok_or_else(|| PipelineError::InvalidContrast {
                reason: format!(
                    "variable '{}' is not a factor of the fitted design",
                    contrast.variable
                ),
            })?;

        for level in [&contrast.numerator, &contrast.denominator] {
            if !coding.has_level(level) {
                return Err(PipelineError::InvalidContrast {
                    reason: format!(
                        "level '{}' not found for '{}' (reference '{}', others {:?})",
                        level, coding.name, coding.reference, coding.levels
                    ),
                });
            }
        }
        if contrast.numerator == contrast.denominator {
            return Err(PipelineError::InvalidContrast {
                reason: format!("numerator and denominator are both '{}'", contrast.numerator),
            });
        }

        let mut c = Array1::zeros(self.n_coefs());
        if let Some(j) = coding.column_of(&contrast.numerator) {
            c[j] += 1.0;
        }
        if let Some(j) = coding.column_of(&contrast.denominator) {
            c[j] -= 1.0;
        }
        Ok(c)
    }
}

/// Create a design matrix from sample metadata
///
/// Intercept plus treatment-coded indicators for each factor. Factors with a
/// single level among the given samples carry no information and are left out.
pub fn create_design_matrix(
    metadata: &SampleMetadata,
    spec: &DesignSpec,
) -> Result<(Array2<f64>, DesignInfo)> {
    let n_samples = metadata.n_samples();
    if n_samples == 0 {
        return Err(PipelineError::InvalidDesignMatrix {
            reason: "no samples".to_string(),
        });
    }

    let mut coef_names = vec!["Intercept".to_string()];
    let mut factors = Vec::new();
    let mut n_cols = 1;

    for name in &spec.factors {
        let values = metadata
            .condition(name)
            .ok_or_else(|| PipelineError::InvalidDesignMatrix {
                reason: format!("Variable '{}' not found in metadata", name),
            })?;
        let levels = metadata.levels(name).unwrap_or_default();
        if levels.len() < 2 {
            log::debug!(
                "Factor '{}' has a single level among {} samples; dropped from design",
                name,
                values.len()
            );
            continue;
        }

        let reference = match spec.reference_levels.get(name) {
            Some(r) if levels.contains(r) => r.clone(),
            Some(r) => {
                return Err(PipelineError::InvalidDesignMatrix {
                    reason: format!("reference level '{}' not present for '{}'", r, name),
                })
            }
            None => levels[0].clone(),
        };
        let non_ref: Vec<String> = levels.into_iter().filter(|l| *l != reference).collect();

        for level in &non_ref {
            coef_names.push(format!("{}_{}_vs_{}", name, level, reference));
        }
        factors.push(FactorCoding {
            name: name.clone(),
            reference,
            first_column: n_cols,
            levels: non_ref,
        });
        n_cols = coef_names.len();
    }

    let mut design = Array2::zeros((n_samples, n_cols));
    for i in 0..n_samples {
        design[[i, 0]] = 1.0;
    }
    for coding in &factors {
        let values = metadata.require_condition(&coding.name)?;
        for (i, value) in values.iter().enumerate() {
            if let Some(j) = coding.column_of(value) {
                design[[i, j]] = 1.0;
            }
        }
    }

    check_full_rank(&design)?;
    Ok((design, DesignInfo { coef_names, factors }))
}

/// Check that the design matrix has full column rank
pub fn check_full_rank(matrix: &Array2<f64>) -> Result<()> {
    let (nrow, ncol) = matrix.dim();
    if nrow == 0 || ncol == 0 {
        return Err(PipelineError::InvalidDesignMatrix {
            reason: "Design matrix has zero rows or columns".to_string(),
        });
    }

    if column_rank(matrix) < ncol {
        let has_zero_column = (0..ncol).any(|j| matrix.column(j).iter().all(|&v| v == 0.0));
        let reason = if has_zero_column {
            "the model matrix is not full rank: a level has no samples"
        } else {
            "the model matrix is not full rank: a variable is a linear combination of the others"
        };
        return Err(PipelineError::InvalidDesignMatrix {
            reason: reason.to_string(),
        });
    }
    Ok(())
}

/// Whether every sample belongs to one of exactly `ncol` distinct design rows
/// (a pure group-means model)
pub fn is_group_model(design: &Array2<f64>) -> bool {
    let mut unique_rows: Vec<Vec<i64>> = Vec::new();
    for row in design.rows() {
        let key: Vec<i64> = row.iter().map(|&v| (v * 1000.0).round() as i64).collect();
        if !unique_rows.contains(&key) {
            unique_rows.push(key);
        }
    }
    unique_rows.len() == design.ncols()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> SampleMetadata {
        let ids: Vec<String> = (1..=6).map(|i| format!("s{}", i)).collect();
        let mut meta = SampleMetadata::new(ids).unwrap();
        let treatment = ["Mock", "Mock", "Mock", "RML", "RML", "RML"];
        let timepoint = ["4w", "8w", "12w", "4w", "8w", "12w"];
        meta.add_condition("treatment", treatment.iter().map(|s| s.to_string()).collect())
            .unwrap();
        meta.add_condition("timepoint", timepoint.iter().map(|s| s.to_string()).collect())
            .unwrap();
        meta
    }

    #[test]
    fn test_two_factor_design() {
        let spec = DesignSpec::new(&["timepoint", "treatment"]).with_reference("timepoint", "4w");
        let (design, info) = create_design_matrix(&metadata(), &spec).unwrap();

        assert_eq!(design.dim(), (6, 4));
        assert_eq!(
            info.coef_names,
            vec![
                "Intercept",
                "timepoint_12w_vs_4w",
                "timepoint_8w_vs_4w",
                "treatment_RML_vs_Mock"
            ]
        );
        // s6 is RML at 12w
        assert_eq!(design.row(5).to_vec(), vec![1.0, 1.0, 0.0, 1.0]);
        assert!(!is_group_model(&design));
    }

    #[test]
    fn test_single_level_factor_dropped() {
        let meta = metadata().subset(&[0, 3]).unwrap();
        let spec = DesignSpec::new(&["timepoint", "treatment"]);
        let (design, info) = create_design_matrix(&meta, &spec).unwrap();
        assert_eq!(info.coef_names, vec!["Intercept", "treatment_RML_vs_Mock"]);
        assert_eq!(design.dim(), (2, 2));
        assert!(is_group_model(&design));
    }

    #[test]
    fn test_contrast_vector() {
        let spec = DesignSpec::new(&["timepoint", "treatment"]);
        let (_, info) = create_design_matrix(&metadata(), &spec).unwrap();

        let c = info.contrast_vector(&Contrast::new("treatment", "RML", "Mock")).unwrap();
        assert_eq!(c.to_vec(), vec![0.0, 0.0, 0.0, 1.0]);

        let reversed = info.contrast_vector(&Contrast::new("treatment", "Mock", "RML")).unwrap();
        assert_eq!(reversed.to_vec(), vec![0.0, 0.0, 0.0, -1.0]);

        // 12w is the reference (alphabetical); 8w vs 4w uses two columns
        let between = info.contrast_vector(&Contrast::new("timepoint", "8w", "4w")).unwrap();
        assert_eq!(between.to_vec(), vec![0.0, -1.0, 1.0, 0.0]);

        assert!(info.contrast_vector(&Contrast::new("treatment", "X", "Mock")).is_err());
        assert!(info.contrast_vector(&Contrast::new("batch", "a", "b")).is_err());
    }

    #[test]
    fn test_check_full_rank_linear_combination() {
        let m = ndarray::array![[1.0, 1.0, 0.0], [1.0, 0.0, 1.0], [1.0, 1.0, 0.0]];
        assert!(check_full_rank(&m).is_err());
        let zero = ndarray::array![[1.0, 0.0], [1.0, 0.0]];
        assert!(check_full_rank(&zero).is_err());
    }
}
