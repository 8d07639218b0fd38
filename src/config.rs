//! JSON pipeline configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::diffexp::SignificanceFilter;
use crate::error::{PipelineError, Result};
use crate::glm::{Contrast, DesignSpec};
use crate::ingest::IngestOptions;
use crate::model::NegativeBinomialModel;

/// Gene-set databases queried for each significant gene list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Directory holding `<database>.gmt`
    pub library_dir: PathBuf,
    pub databases: Vec<String>,
    /// Terms per enrichment dot plot
    pub top_terms: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            library_dir: PathBuf::from("gene_sets"),
            databases: vec![
                "GO_Biological_Process_2023".to_string(),
                "KEGG_2019_Mouse".to_string(),
            ],
            top_terms: 10,
        }
    }
}

/// Everything `run` needs; every field has a default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory of per-sample count files
    pub input_dir: PathBuf,
    pub ingest: IngestOptions,
    pub metadata: PathBuf,
    /// Metadata column holding sample ids
    pub sample_column: String,
    /// Design of the whole-dataset fit
    pub design: DesignSpec,
    /// Covariate whose levels define the subsets
    pub group_by: String,
    pub contrast: Contrast,
    /// Subsets to test, in display order; empty means every level, sorted
    pub subset_order: Vec<String>,
    pub significance: SignificanceFilter,
    pub enrichment: EnrichmentConfig,
    pub output_dir: PathBuf,
    pub model: NegativeBinomialModel,
    /// Worker threads for per-gene fitting; rayon's default when unset
    pub threads: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("counts"),
            ingest: IngestOptions::default(),
            metadata: PathBuf::from("metadata.csv"),
            sample_column: "sample".to_string(),
            design: DesignSpec::new(&["timepoint", "treatment"]),
            group_by: "timepoint".to_string(),
            contrast: Contrast::new("treatment", "RML", "Mock"),
            subset_order: Vec::new(),
            significance: SignificanceFilter::default(),
            enrichment: EnrichmentConfig::default(),
            output_dir: PathBuf::from("results"),
            model: NegativeBinomialModel::default(),
            threads: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        log::debug!("Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(PipelineError::InvalidConfig { reason });
        if self.design.factors.is_empty() {
            return invalid("design needs at least one factor".to_string());
        }
        if !self.design.factors.contains(&self.contrast.variable) {
            return invalid(format!(
                "contrast variable '{}' is not in the design {:?}",
                self.contrast.variable, self.design.factors
            ));
        }
        if self.group_by == self.contrast.variable {
            return invalid(format!(
                "cannot group by the contrast variable '{}'",
                self.group_by
            ));
        }
        let f = &self.significance;
        if !(f.padj_below > 0.0 && f.padj_below <= 1.0) || f.abs_lfc_above < 0.0 {
            return invalid(format!("significance thresholds out of range: {:?}", f));
        }
        if !(self.model.alpha > 0.0 && self.model.alpha < 1.0) {
            return invalid(format!("model alpha {} must be in (0, 1)", self.model.alpha));
        }
        if self.threads == Some(0) {
            return invalid("threads must be at least 1".to_string());
        }
        Ok(())
    }

    /// Design of the per-subset fits: the full design without the grouping covariate
    pub fn subset_design(&self) -> DesignSpec {
        let factors: Vec<&String> = self
            .design
            .factors
            .iter()
            .filter(|f| **f != self.group_by)
            .collect();
        let mut spec = DesignSpec::new(&factors);
        spec.reference_levels = self
            .design
            .reference_levels
            .iter()
            .filter(|(k, _)| **k != self.group_by)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        spec
    }

    /// Configured subset order, `None` when every level should be used
    pub fn subset_levels(&self) -> Option<&[String]> {
        if self.subset_order.is_empty() {
            None
        } else {
            Some(&self.subset_order)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"group_by": "day", "design": {"factors": ["day", "treatment"]}}"#)
                .unwrap();
        assert_eq!(config.group_by, "day");
        assert_eq!(config.significance, SignificanceFilter::default());
        assert_eq!(config.model.alpha, 0.1);
        config.validate().unwrap();
    }

    #[test]
    fn test_round_trip_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = PipelineConfig::default();
        config.subset_order = vec!["4wpi".into(), "8wpi".into()];
        config.to_file(&path).unwrap();
        assert_eq!(PipelineConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_validation() {
        let mut config = PipelineConfig::default();
        config.group_by = "treatment".into();
        assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig { .. })));

        let mut config = PipelineConfig::default();
        config.contrast = Contrast::new("genotype", "KO", "WT");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_subset_design_drops_group() {
        let config = PipelineConfig::default();
        let spec = config.subset_design();
        assert_eq!(spec.factors, vec!["treatment"]);
    }
}
