//! Gene x sample count matrix

use std::collections::HashSet;

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{PipelineError, Result};

/// Raw read counts, rows are genes and columns are samples
#[derive(Debug, Clone)]
pub struct CountMatrix {
    /// Raw count data (genes x samples)
    counts: Array2<f64>,
    /// Gene identifiers
    gene_ids: Vec<String>,
    /// Sample identifiers
    sample_ids: Vec<String>,
}

fn first_duplicate(ids: &[String]) -> Option<&String> {
    let mut seen = HashSet::new();
    ids.iter().find(|id| !seen.insert(id.as_str()))
}

impl CountMatrix {
    /// Create a new count matrix from raw data
    pub fn new(
        counts: Array2<f64>,
        gene_ids: Vec<String>,
        sample_ids: Vec<String>,
    ) -> Result<Self> {
        let (n_genes, n_samples) = counts.dim();

        if gene_ids.len() != n_genes {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} gene IDs", n_genes),
                got: format!("{} gene IDs", gene_ids.len()),
            });
        }

        if sample_ids.len() != n_samples {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} sample IDs", n_samples),
                got: format!("{} sample IDs", sample_ids.len()),
            });
        }

        if counts.iter().any(|&x| x < 0.0 || !x.is_finite()) {
            return Err(PipelineError::InvalidCountMatrix {
                reason: "Counts must be non-negative finite values".to_string(),
            });
        }

        if let Some(dup) = first_duplicate(&gene_ids) {
            return Err(PipelineError::InvalidCountMatrix {
                reason: format!("gene identifier '{}' appears more than once", dup),
            });
        }

        if let Some(dup) = first_duplicate(&sample_ids) {
            return Err(PipelineError::InvalidCountMatrix {
                reason: format!("sample identifier '{}' appears more than once", dup),
            });
        }

        if counts.iter().any(|&x| x != x.round()) {
            log::warn!("Some count values are not integers; raw read counts are expected");
        }

        Ok(Self {
            counts,
            gene_ids,
            sample_ids,
        })
    }

    /// Get the number of genes
    pub fn n_genes(&self) -> usize {
        self.counts.nrows()
    }

    /// Get the number of samples
    pub fn n_samples(&self) -> usize {
        self.counts.ncols()
    }

    /// Get the raw counts as a view
    pub fn counts(&self) -> ArrayView2<'_, f64> {
        self.counts.view()
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Get counts for a specific gene
    pub fn gene_counts(&self, gene_idx: usize) -> ArrayView1<'_, f64> {
        self.counts.row(gene_idx)
    }

    /// Get gene index by ID
    pub fn gene_index(&self, gene_id: &str) -> Option<usize> {
        self.gene_ids.iter().position(|id| id == gene_id)
    }

    /// Calculate sum of counts per sample (library size)
    pub fn library_sizes(&self) -> Vec<f64> {
        self.counts
            .axis_iter(Axis(1))
            .map(|col| col.sum())
            .collect()
    }

    /// Calculate mean counts per gene across samples
    pub fn gene_means(&self) -> Vec<f64> {
        let n = self.n_samples().max(1) as f64;
        self.counts
            .axis_iter(Axis(0))
            .map(|row| row.sum() / n)
            .collect()
    }

    /// Drop genes whose mean count across samples is exactly zero
    pub fn drop_zero_mean_rows(&self) -> Result<Self> {
        let keep: Vec<usize> = self
            .gene_means()
            .iter()
            .enumerate()
            .filter(|(_, &m)| m != 0.0)
            .map(|(i, _)| i)
            .collect();
        self.subset_genes(&keep)
    }

    /// Reorder genes by descending mean count. Ties keep their current order.
    pub fn sort_by_mean_desc(&self) -> Result<Self> {
        let means = self.gene_means();
        let mut order: Vec<usize> = (0..self.n_genes()).collect();
        order.sort_by(|&a, &b| means[b].total_cmp(&means[a]));
        self.subset_genes(&order)
    }

    /// Subset to specific samples
    pub fn subset_samples(&self, sample_indices: &[usize]) -> Result<Self> {
        let new_counts = self.counts.select(Axis(1), sample_indices);
        let new_sample_ids: Vec<String> = sample_indices
            .iter()
            .map(|&i| self.sample_ids[i].clone())
            .collect();

        Self::new(new_counts, self.gene_ids.clone(), new_sample_ids)
    }

    /// Subset to specific genes
    pub fn subset_genes(&self, gene_indices: &[usize]) -> Result<Self> {
        let new_counts = self.counts.select(Axis(0), gene_indices);
        let new_gene_ids: Vec<String> = gene_indices
            .iter()
            .map(|&i| self.gene_ids[i].clone())
            .collect();

        Self::new(new_counts, new_gene_ids, self.sample_ids.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    #[test]
    fn test_count_matrix_creation() {
        let counts = array![[10.0, 20.0, 30.0], [5.0, 15.0, 25.0]];
        let matrix = CountMatrix::new(counts, ids("gene", 2), ids("s", 3)).unwrap();
        assert_eq!(matrix.n_genes(), 2);
        assert_eq!(matrix.n_samples(), 3);
    }

    #[test]
    fn test_negative_counts_rejected() {
        let counts = array![[10.0, -5.0], [5.0, 15.0]];
        assert!(CountMatrix::new(counts, ids("gene", 2), ids("s", 2)).is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let counts = array![[10.0, 5.0], [5.0, 15.0]];
        let genes = vec!["g".to_string(), "g".to_string()];
        assert!(CountMatrix::new(counts.clone(), genes, ids("s", 2)).is_err());
        let samples = vec!["s".to_string(), "s".to_string()];
        assert!(CountMatrix::new(counts, ids("gene", 2), samples).is_err());
    }

    #[test]
    fn test_library_sizes() {
        let counts = array![[10.0, 20.0], [5.0, 15.0]];
        let matrix = CountMatrix::new(counts, ids("gene", 2), ids("s", 2)).unwrap();
        assert_eq!(matrix.library_sizes(), vec![15.0, 35.0]);
    }

    #[test]
    fn test_drop_zero_and_sort() {
        let counts = array![[1.0, 1.0], [0.0, 0.0], [9.0, 11.0], [2.0, 0.0], [5.0, 5.0]];
        let matrix = CountMatrix::new(counts, ids("g", 5), ids("s", 2)).unwrap();
        let sorted = matrix.drop_zero_mean_rows().unwrap().sort_by_mean_desc().unwrap();

        assert_eq!(sorted.gene_ids(), &["g3", "g5", "g1", "g4"]);
        let means = sorted.gene_means();
        assert!(means.iter().all(|&m| m > 0.0));
        assert!(means.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_sort_is_stable_on_ties() {
        let counts = array![[2.0, 2.0], [4.0, 0.0], [1.0, 3.0]];
        let matrix = CountMatrix::new(counts, ids("g", 3), ids("s", 2)).unwrap();
        let sorted = matrix.sort_by_mean_desc().unwrap();
        assert_eq!(sorted.gene_ids(), &["g1", "g2", "g3"]);
    }
}
