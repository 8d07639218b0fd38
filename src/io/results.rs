//! Differential expression result tables

use serde::{Deserialize, Serialize};

use crate::diffexp::{Direction, SignificanceFilter};

/// One gene's test result; serialized with the conventional column names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeRow {
    pub gene_id: String,
    /// Mean of normalized counts over the fitted samples
    #[serde(rename = "baseMean")]
    pub base_mean: f64,
    #[serde(rename = "log2FoldChange")]
    pub log2_fold_change: f64,
    #[serde(rename = "lfcSE")]
    pub lfc_se: f64,
    pub stat: f64,
    pub pvalue: f64,
    pub padj: f64,
}

impl crate::io::Record for DeRow {
    const COLUMNS: &'static [&'static str] =
        &["gene_id", "baseMean", "log2FoldChange", "lfcSE", "stat", "pvalue", "padj"];
}

/// Result rows for one contrast, in the order they were produced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeTable {
    pub rows: Vec<DeRow>,
}

impl DeTable {
    pub fn new(rows: Vec<DeRow>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn gene_ids(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.gene_id.as_str()).collect()
    }

    /// Count of tested genes and of genes passing `filter` in each direction
    pub fn summary(&self, filter: &SignificanceFilter) -> ResultsSummary {
        let count = |dir: Direction| {
            self.rows
                .iter()
                .filter(|r| filter.classify(r) == Some(dir))
                .count()
        };
        ResultsSummary {
            total_genes: self.len(),
            genes_tested: self.rows.iter().filter(|r| r.pvalue.is_finite()).count(),
            with_padj: self.rows.iter().filter(|r| r.padj.is_finite()).count(),
            up: count(Direction::Up),
            down: count(Direction::Down),
            filter: filter.clone(),
        }
    }
}

/// Summary of one result table
#[derive(Debug, Clone)]
pub struct ResultsSummary {
    pub total_genes: usize,
    pub genes_tested: usize,
    pub with_padj: usize,
    pub up: usize,
    pub down: usize,
    pub filter: SignificanceFilter,
}

impl std::fmt::Display for ResultsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Total genes: {}", self.total_genes)?;
        writeln!(f, "Genes tested: {}", self.genes_tested)?;
        writeln!(f, "Genes with adjusted p-value: {}", self.with_padj)?;
        writeln!(
            f,
            "Significant (padj < {}, baseMean > {}, |log2FC| > {}):",
            self.filter.padj_below, self.filter.base_mean_above, self.filter.abs_lfc_above
        )?;
        writeln!(f, "  up: {}", self.up)?;
        write!(f, "  down: {}", self.down)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, lfc: f64, padj: f64) -> DeRow {
        DeRow {
            gene_id: id.to_string(),
            base_mean: 100.0,
            log2_fold_change: lfc,
            lfc_se: 0.2,
            stat: lfc / 0.2,
            pvalue: padj / 2.0,
            padj,
        }
    }

    #[test]
    fn test_summary_counts() {
        let table = DeTable::new(vec![
            row("a", 2.0, 0.001),
            row("b", -1.5, 0.01),
            row("c", 0.1, 0.9),
            row("d", 3.0, f64::NAN),
        ]);
        let summary = table.summary(&SignificanceFilter::default());
        assert_eq!(summary.total_genes, 4);
        assert_eq!(summary.with_padj, 3);
        assert_eq!((summary.up, summary.down), (1, 1));
        assert!(summary.to_string().contains("up: 1"));
    }
}
