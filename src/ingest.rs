//! Merge per-sample count files into one gene x sample matrix

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::data::CountMatrix;
use crate::error::{PipelineError, Result};

/// How sample files are recognised and named
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestOptions {
    /// Stripped from the start of each file name
    pub prefix: String,
    /// File extension without the dot; other files are ignored
    pub extension: String,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            extension: "tabular".to_string(),
        }
    }
}

/// Counts read from one sample file
#[derive(Debug, Clone)]
pub struct SampleCounts {
    pub sample_id: String,
    pub source: PathBuf,
    /// (gene id, count) in file order
    pub counts: Vec<(String, f64)>,
}

/// Derive a sample id by stripping `prefix` and `.extension` from the file name
pub fn sample_id_from_path(path: &Path, prefix: &str, extension: &str) -> Result<String> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PipelineError::InvalidInput {
            reason: format!("{} has no usable file name", path.display()),
        })?;
    let suffix = format!(".{}", extension);
    let stem = name.strip_suffix(suffix.as_str()).ok_or_else(|| PipelineError::InvalidInput {
        reason: format!("{} does not end in {}", name, suffix),
    })?;
    let id = stem.strip_prefix(prefix).unwrap_or(stem);
    if id.is_empty() {
        return Err(PipelineError::InvalidInput {
            reason: format!("{} yields an empty sample id", name),
        });
    }
    Ok(id.to_string())
}

/// Read a headerless two-column tab-delimited count file
pub fn read_sample_counts<P: AsRef<Path>>(path: P) -> Result<Vec<(String, f64)>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut seen = HashSet::new();
    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        if record.len() != 2 {
            return Err(PipelineError::InvalidCountMatrix {
                reason: format!(
                    "{} line {}: expected 2 columns, found {}",
                    path.display(),
                    line + 1,
                    record.len()
                ),
            });
        }
        let gene = record[0].trim().to_string();
        let count: u64 = record[1].trim().parse().map_err(|_| PipelineError::InvalidCountMatrix {
            reason: format!(
                "{} line {}: '{}' is not a non-negative integer count",
                path.display(),
                line + 1,
                &record[1]
            ),
        })?;
        if !seen.insert(gene.clone()) {
            return Err(PipelineError::InvalidCountMatrix {
                reason: format!("{}: gene '{}' listed twice", path.display(), gene),
            });
        }
        rows.push((gene, count as f64));
    }
    Ok(rows)
}

/// Merge samples column-wise; columns sorted by sample id, genes in first-seen order
pub fn merge_sample_counts(samples: Vec<SampleCounts>) -> Result<CountMatrix> {
    let mut by_id: BTreeMap<String, SampleCounts> = BTreeMap::new();
    for sample in samples {
        if let Some(prev) = by_id.get(&sample.sample_id) {
            return Err(PipelineError::DuplicateSampleId {
                sample_id: sample.sample_id.clone(),
                first: prev.source.display().to_string(),
                second: sample.source.display().to_string(),
            });
        }
        by_id.insert(sample.sample_id.clone(), sample);
    }
    if by_id.is_empty() {
        return Err(PipelineError::EmptyData {
            reason: "no sample files to merge".to_string(),
        });
    }

    let mut gene_ids: Vec<String> = Vec::new();
    let mut gene_row: HashMap<String, usize> = HashMap::new();
    for sample in by_id.values() {
        for (gene, _) in &sample.counts {
            if !gene_row.contains_key(gene) {
                gene_row.insert(gene.clone(), gene_ids.len());
                gene_ids.push(gene.clone());
            }
        }
    }

    let mut counts = Array2::zeros((gene_ids.len(), by_id.len()));
    for (j, sample) in by_id.values().enumerate() {
        if sample.counts.len() < gene_ids.len() {
            log::warn!(
                "Sample {} lists {} of {} genes; missing genes count as 0",
                sample.sample_id,
                sample.counts.len(),
                gene_ids.len()
            );
        }
        for (gene, count) in &sample.counts {
            counts[[gene_row[gene], j]] = *count;
        }
    }

    CountMatrix::new(counts, gene_ids, by_id.into_keys().collect())
}

/// Read every matching file in `dir`, merge, drop all-zero genes and sort by mean
pub fn ingest_directory<P: AsRef<Path>>(dir: P, options: &IngestOptions) -> Result<CountMatrix> {
    let dir = dir.as_ref();
    let suffix = format!(".{}", options.extension);
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.ends_with(suffix.as_str()))
        })
        .collect();
    paths.sort();
    log::info!("Found {} sample files in {}", paths.len(), dir.display());

    let mut samples = Vec::with_capacity(paths.len());
    for path in paths {
        let sample_id = sample_id_from_path(&path, &options.prefix, &options.extension)?;
        let counts = read_sample_counts(&path)?;
        log::debug!("{}: {} genes as sample {}", path.display(), counts.len(), sample_id);
        samples.push(SampleCounts {
            sample_id,
            source: path,
            counts,
        });
    }

    let merged = merge_sample_counts(samples)?;
    let kept = merged.drop_zero_mean_rows()?;
    log::info!(
        "Merged {} genes x {} samples; dropped {} all-zero genes",
        merged.n_genes(),
        merged.n_samples(),
        merged.n_genes() - kept.n_genes()
    );
    kept.sort_by_mean_desc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::tempdir;

    #[test]
    fn test_sample_id_from_path() {
        let id = sample_id_from_path(Path::new("/data/counts_S1.tabular"), "counts_", "tabular");
        assert_eq!(id.unwrap(), "S1");
        assert!(sample_id_from_path(Path::new("S1.txt"), "", "tabular").is_err());
        assert!(sample_id_from_path(Path::new("x_.tabular"), "x_", "tabular").is_err());
    }

    #[test]
    fn test_two_files_drop_zero_gene() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("B.tabular"), "geneX\t20\ngeneY\t0\n").unwrap();
        std::fs::write(dir.path().join("A.tabular"), "geneX\t10\ngeneY\t0\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let matrix = ingest_directory(dir.path(), &IngestOptions::default()).unwrap();
        assert_eq!(matrix.sample_ids(), &["A".to_string(), "B".to_string()]);
        assert_eq!(matrix.gene_ids(), &["geneX".to_string()]);
        assert_eq!(matrix.counts(), array![[10.0, 20.0]]);
    }

    #[test]
    fn test_multi_part_extension() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("htseq_A.counts.txt"), "g1\t4\n").unwrap();
        std::fs::write(dir.path().join("htseq_B.counts.txt"), "g1\t6\n").unwrap();
        std::fs::write(dir.path().join("summary.txt"), "not counts").unwrap();
        let options = IngestOptions {
            prefix: "htseq_".into(),
            extension: "counts.txt".into(),
        };
        let matrix = ingest_directory(dir.path(), &options).unwrap();
        assert_eq!(matrix.sample_ids(), &["A".to_string(), "B".to_string()]);
        assert_eq!(matrix.counts(), array![[4.0, 6.0]]);
    }

    #[test]
    fn test_rows_sorted_by_mean() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("A.tabular"), "g1\t1\ng2\t50\ng3\t5\ng4\t5\n").unwrap();
        std::fs::write(dir.path().join("B.tabular"), "g1\t1\ng2\t70\ng3\t5\ng4\t5\n").unwrap();
        let matrix = ingest_directory(dir.path(), &IngestOptions::default()).unwrap();
        assert_eq!(matrix.gene_ids(), &["g2", "g3", "g4", "g1"]);
    }

    #[test]
    fn test_duplicate_sample_id_is_error() {
        let samples = vec![
            SampleCounts {
                sample_id: "S1".into(),
                source: PathBuf::from("run1/S1.tabular"),
                counts: vec![("g".into(), 1.0)],
            },
            SampleCounts {
                sample_id: "S1".into(),
                source: PathBuf::from("run2/S1.tabular"),
                counts: vec![("g".into(), 2.0)],
            },
        ];
        let err = merge_sample_counts(samples).unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateSampleId { .. }));
    }

    #[test]
    fn test_prefix_collision_is_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("run_S1.tabular"), "g\t1\n").unwrap();
        std::fs::write(dir.path().join("S1.tabular"), "g\t2\n").unwrap();
        let options = IngestOptions {
            prefix: "run_".into(),
            extension: "tabular".into(),
        };
        assert!(matches!(
            ingest_directory(dir.path(), &options),
            Err(PipelineError::DuplicateSampleId { .. })
        ));
    }

    #[test]
    fn test_missing_gene_counts_zero() {
        let samples = vec![
            SampleCounts {
                sample_id: "A".into(),
                source: PathBuf::from("A.tabular"),
                counts: vec![("g1".into(), 3.0), ("g2".into(), 4.0)],
            },
            SampleCounts {
                sample_id: "B".into(),
                source: PathBuf::from("B.tabular"),
                counts: vec![("g2".into(), 7.0)],
            },
        ];
        let m = merge_sample_counts(samples).unwrap();
        assert_eq!(m.counts(), array![[3.0, 0.0], [4.0, 7.0]]);
    }

    #[test]
    fn test_rejects_fractional_count() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("A.tabular");
        std::fs::write(&path, "g1\t2.5\n").unwrap();
        assert!(read_sample_counts(&path).is_err());
    }
}
