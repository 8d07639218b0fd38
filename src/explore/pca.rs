//! Principal component analysis of samples

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::transform::StabilizedMatrix;

/// Sample coordinates on the first two components
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcaRow {
    pub sample_id: String,
    pub pc1: f64,
    pub pc2: f64,
    pub pc1_percent_var: f64,
    pub pc2_percent_var: f64,
}

impl crate::io::Record for PcaRow {
    const COLUMNS: &'static [&'static str] =
        &["sample_id", "pc1", "pc2", "pc1_percent_var", "pc2_percent_var"];
}

#[derive(Debug, Clone, PartialEq)]
pub struct PcaResult {
    pub rows: Vec<PcaRow>,
    /// Percent of total variance on PC1 and PC2
    pub percent_var: [f64; 2],
    /// Genes that entered the decomposition
    pub n_genes_used: usize,
}

/// Indices of the `ntop` rows with the largest variance, most variable first
pub fn top_variable_rows(data: &Array2<f64>, ntop: usize) -> Vec<usize> {
    let vars: Vec<f64> = data
        .rows()
        .into_iter()
        .map(|row| row.var(1.0))
        .collect();
    let mut order: Vec<usize> = (0..data.nrows()).collect();
    order.sort_by(|&a, &b| vars[b].total_cmp(&vars[a]));
    order.truncate(ntop);
    order
}

/// PCA of the samples over the `ntop` most variable genes.
///
/// Centred, unscaled. The components come from the sample Gram matrix by power
/// iteration with deflation; each component's sign is fixed so its largest
/// coordinate is positive.
pub fn pca(stabilized: &StabilizedMatrix, ntop: usize) -> Result<PcaResult> {
    let n_samples = stabilized.n_samples();
    if n_samples < 2 || stabilized.n_genes() == 0 {
        return Err(PipelineError::EmptyData {
            reason: format!(
                "PCA needs at least two samples and one gene, got {} x {}",
                stabilized.n_genes(),
                n_samples
            ),
        });
    }

    let selected = top_variable_rows(&stabilized.data, ntop);
    // samples x genes
    let x = stabilized.select_genes(&selected).data.reversed_axes();
    let mean = x.mean_axis(Axis(0)).ok_or_else(|| PipelineError::EmptyData {
        reason: "no genes selected for PCA".to_string(),
    })?;
    let centered = &x - &mean;

    let mut gram = centered.dot(&centered.t());
    let total: f64 = gram.diag().sum();

    let mut scores = Vec::with_capacity(2);
    let mut eigenvalues = Vec::with_capacity(2);
    for _ in 0..2.min(n_samples) {
        let (lambda, v) = power_iteration(&gram, 500);
        let sign = v
            .iter()
            .copied()
            .fold(0.0_f64, |acc, x| if x.abs() > acc.abs() { x } else { acc })
            .signum();
        let sign = if sign == 0.0 { 1.0 } else { sign };
        scores.push(v.mapv(|u| sign * u * lambda.sqrt()));
        eigenvalues.push(lambda);

        let col = v.view().insert_axis(Axis(1));
        gram = gram - lambda * col.dot(&col.t());
    }
    while scores.len() < 2 {
        scores.push(Array1::zeros(n_samples));
        eigenvalues.push(0.0);
    }

    let percent = |l: f64| if total > 0.0 { 100.0 * l / total } else { 0.0 };
    let percent_var = [percent(eigenvalues[0]), percent(eigenvalues[1])];
    let rows = stabilized
        .sample_ids
        .iter()
        .enumerate()
        .map(|(j, id)| PcaRow {
            sample_id: id.clone(),
            pc1: scores[0][j],
            pc2: scores[1][j],
            pc1_percent_var: percent_var[0],
            pc2_percent_var: percent_var[1],
        })
        .collect();

    Ok(PcaResult {
        rows,
        percent_var,
        n_genes_used: selected.len(),
    })
}

fn power_iteration(matrix: &Array2<f64>, max_iter: usize) -> (f64, Array1<f64>) {
    let n = matrix.nrows();
    let mut v = Array1::from_vec((0..n).map(|i| 1.0 / ((i + 1) as f64)).collect());
    let norm = v.dot(&v).sqrt();
    v /= norm;

    let mut eigenvalue = 0.0;
    for _ in 0..max_iter {
        let w = matrix.dot(&v);
        let wnorm = w.dot(&w).sqrt();
        if wnorm < 1e-15 {
            break;
        }
        eigenvalue = v.dot(&w);
        let next = &w / wnorm;
        let diff = (&v - &next).mapv(|d| d * d).sum();
        v = next;
        if diff < 1e-14 {
            break;
        }
    }
    (eigenvalue.max(0.0), v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn matrix(data: Array2<f64>) -> StabilizedMatrix {
        let genes = (0..data.nrows()).map(|i| format!("g{}", i)).collect();
        let samples = (0..data.ncols()).map(|j| format!("s{}", j)).collect();
        StabilizedMatrix {
            data,
            gene_ids: genes,
            sample_ids: samples,
        }
    }

    #[test]
    fn test_two_groups_separate_on_pc1() {
        let m = matrix(array![
            [1.0, 1.1, 0.9, 5.0, 5.1, 4.9],
            [2.0, 2.1, 1.9, 8.0, 8.2, 7.9],
            [3.0, 3.0, 3.0, 3.0, 3.0, 3.0]
        ]);
        let result = pca(&m, 500).unwrap();
        assert_eq!(result.rows.len(), 6);
        assert!(result.percent_var[0] > 95.0);
        let left: Vec<f64> = result.rows[..3].iter().map(|r| r.pc1).collect();
        let right: Vec<f64> = result.rows[3..].iter().map(|r| r.pc1).collect();
        assert!(left.iter().all(|&a| right.iter().all(|&b| a.signum() != b.signum())));
    }

    #[test]
    fn test_top_variable_rows() {
        let data = array![[1.0, 1.0], [0.0, 10.0], [0.0, 2.0]];
        assert_eq!(top_variable_rows(&data, 2), vec![1, 2]);
    }

    #[test]
    fn test_single_sample_is_error() {
        let m = matrix(array![[1.0], [2.0]]);
        assert!(pca(&m, 10).is_err());
    }
}
