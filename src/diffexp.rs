//! Per-subset differential testing, result cleaning and the significance filter

use serde::{Deserialize, Serialize};

use crate::data::{check_sample_order, CountMatrix, SampleMetadata};
use crate::error::{PipelineError, Result};
use crate::glm::{Contrast, DesignSpec};
use crate::io::{DeRow, DeTable};
use crate::model::{DispersionModel, FittedModel};

/// Direction of change relative to the contrast denominator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Up, Direction::Down];

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds a gene must pass to count as differentially expressed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignificanceFilter {
    pub padj_below: f64,
    pub base_mean_above: f64,
    pub abs_lfc_above: f64,
}

impl Default for SignificanceFilter {
    fn default() -> Self {
        Self {
            padj_below: 0.05,
            base_mean_above: 15.0,
            abs_lfc_above: 0.85,
        }
    }
}

impl SignificanceFilter {
    /// Direction of a passing row, `None` if it fails any threshold
    pub fn classify(&self, row: &DeRow) -> Option<Direction> {
        if !(row.padj < self.padj_below && row.base_mean > self.base_mean_above) {
            return None;
        }
        if row.log2_fold_change > self.abs_lfc_above {
            Some(Direction::Up)
        } else if row.log2_fold_change < -self.abs_lfc_above {
            Some(Direction::Down)
        } else {
            None
        }
    }

    /// Gene ids passing in `direction`, in table order
    pub fn select(&self, table: &DeTable, direction: Direction) -> Vec<String> {
        table
            .rows
            .iter()
            .filter(|r| self.classify(r) == Some(direction))
            .map(|r| r.gene_id.clone())
            .collect()
    }
}

/// Drop rows without an adjusted p-value and sort ascending by it (stable)
pub fn clean_results(table: DeTable) -> DeTable {
    let mut rows: Vec<DeRow> = table.rows.into_iter().filter(|r| !r.padj.is_nan()).collect();
    rows.sort_by(|a, b| a.padj.total_cmp(&b.padj));
    DeTable::new(rows)
}

/// Results of one subset
#[derive(Debug, Clone)]
pub struct SubsetResult {
    pub subset: String,
    pub table: DeTable,
}

/// `name` with characters outside `[A-Za-z0-9._-]` replaced by '_'
pub fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// File name of a subset's result table
pub fn subset_file_name(subset: &str) -> String {
    format!("de_{}.csv", file_safe(subset))
}

/// Re-fit `model` on the samples with `group_by == level` and extract the cleaned contrast
#[allow(clippy::too_many_arguments)]
pub fn analyze_subset<M: DispersionModel>(
    counts: &CountMatrix,
    metadata: &SampleMetadata,
    model: &M,
    group_by: &str,
    level: &str,
    design: &DesignSpec,
    contrast: &Contrast,
) -> Result<DeTable> {
    check_sample_order(counts, metadata)?;
    metadata.require_condition(group_by)?;
    let samples = metadata.samples_with_level(group_by, level);
    if samples.is_empty() {
        return Err(PipelineError::EmptyData {
            reason: format!("no samples with {} = '{}'", group_by, level),
        });
    }

    let sub_counts = counts.subset_samples(&samples)?;
    let sub_meta = metadata.subset(&samples)?;
    log::info!(
        "Subset {} = {}: fitting {} samples for {}",
        group_by,
        level,
        samples.len(),
        contrast
    );

    let fit = model.fit(&sub_counts, &sub_meta, design)?;
    let raw = fit.results(contrast)?;
    let n_raw = raw.len();
    let cleaned = clean_results(raw);
    log::debug!(
        "Subset {}: dropped {} genes without adjusted p-value",
        level,
        n_raw - cleaned.len()
    );
    Ok(cleaned)
}

/// Run [`analyze_subset`] for each level of `group_by`.
///
/// `levels` fixes the subsets and their order; otherwise every distinct level is
/// used in sorted order. Subsets share nothing but the inputs.
#[allow(clippy::too_many_arguments)]
pub fn analyze_subsets<M: DispersionModel>(
    counts: &CountMatrix,
    metadata: &SampleMetadata,
    model: &M,
    group_by: &str,
    levels: Option<&[String]>,
    design: &DesignSpec,
    contrast: &Contrast,
    filter: &SignificanceFilter,
) -> Result<Vec<SubsetResult>> {
    let levels: Vec<String> = match levels {
        Some(l) if !l.is_empty() => l.to_vec(),
        _ => metadata.levels(group_by).ok_or_else(|| PipelineError::InvalidMetadata {
            reason: format!("grouping covariate '{}' not found", group_by),
        })?,
    };

    levels
        .into_iter()
        .map(|level| {
            let table =
                analyze_subset(counts, metadata, model, group_by, &level, design, contrast)?;
            let summary = table.summary(filter);
            log::info!(
                "Subset {}: {} genes with padj, {} up, {} down",
                level,
                summary.with_padj,
                summary.up,
                summary.down
            );
            Ok(SubsetResult {
                subset: level,
                table,
            })
        })
        .collect()
}
