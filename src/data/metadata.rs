//! Sample metadata: categorical covariates keyed by sample

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{PipelineError, Result};

/// Sample metadata containing experimental conditions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleMetadata {
    /// Sample identifiers
    sample_ids: Vec<String>,
    /// Experimental conditions (column name -> values for each sample)
    conditions: HashMap<String, Vec<String>>,
    /// Condition names in insertion order
    condition_order: Vec<String>,
}

impl SampleMetadata {
    /// Create new sample metadata. Sample identifiers must be unique.
    pub fn new(sample_ids: Vec<String>) -> Result<Self> {
        let mut seen = HashSet::new();
        for id in &sample_ids {
            if !seen.insert(id.as_str()) {
                return Err(PipelineError::InvalidMetadata {
                    reason: format!("duplicate sample ID '{}'", id),
                });
            }
        }
        Ok(Self {
            sample_ids,
            conditions: HashMap::new(),
            condition_order: Vec::new(),
        })
    }

    /// Add a condition column (categorical factor)
    pub fn add_condition(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        if values.len() != self.sample_ids.len() {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} values", self.sample_ids.len()),
                got: format!("{} values", values.len()),
            });
        }
        if self.conditions.insert(name.to_string(), values).is_none() {
            self.condition_order.push(name.to_string());
        }
        Ok(())
    }

    pub fn has_condition(&self, name: &str) -> bool {
        self.conditions.contains_key(name)
    }

    /// Get sample IDs
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Get number of samples
    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    /// Get condition values for a specific column
    pub fn condition(&self, name: &str) -> Option<&Vec<String>> {
        self.conditions.get(name)
    }

    /// Like [`condition`](Self::condition) but reports a missing column as an error
    pub fn require_condition(&self, name: &str) -> Result<&Vec<String>> {
        self.conditions
            .get(name)
            .ok_or_else(|| PipelineError::InvalidMetadata {
                reason: format!(
                    "column '{}' not found (available: {:?})",
                    name, self.condition_order
                ),
            })
    }

    /// Condition names in the order they were added
    pub fn condition_names(&self) -> &[String] {
        &self.condition_order
    }

    /// Get unique levels for a condition (sorted)
    pub fn levels(&self, condition_name: &str) -> Option<Vec<String>> {
        self.conditions.get(condition_name).map(|values| {
            let mut unique: Vec<String> = values.to_vec();
            unique.sort();
            unique.dedup();
            unique
        })
    }

    /// Get sample indices for a specific condition level
    pub fn samples_with_level(&self, condition_name: &str, level: &str) -> Vec<usize> {
        self.conditions
            .get(condition_name)
            .map(|values| {
                values
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.as_str() == level)
                    .map(|(i, _)| i)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Subset metadata to specific samples
    pub fn subset(&self, sample_indices: &[usize]) -> Result<Self> {
        let new_ids: Vec<String> = sample_indices
            .iter()
            .map(|&i| self.sample_ids[i].clone())
            .collect();

        let mut new_meta = SampleMetadata::new(new_ids)?;

        for name in &self.condition_order {
            let values = &self.conditions[name];
            let new_values: Vec<String> = sample_indices
                .iter()
                .map(|&i| values[i].clone())
                .collect();
            new_meta.add_condition(name, new_values)?;
        }

        Ok(new_meta)
    }
}
