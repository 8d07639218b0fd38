//! CSV readers and writers for every on-disk table

use std::path::Path;

use ndarray::Array2;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::results::DeTable;
use crate::data::{CountMatrix, SampleMetadata};
use crate::error::{PipelineError, Result};
use crate::transform::StabilizedMatrix;

/// Header of the first column in gene x sample tables
pub const GENE_COLUMN: &str = "gene_id";

fn write_labeled_matrix(
    path: &Path,
    data: &Array2<f64>,
    gene_ids: &[String],
    sample_ids: &[String],
) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    let mut header = Vec::with_capacity(sample_ids.len() + 1);
    header.push(GENE_COLUMN);
    header.extend(sample_ids.iter().map(String::as_str));
    writer.write_record(&header)?;

    for (gene, row) in gene_ids.iter().zip(data.rows()) {
        let mut record = Vec::with_capacity(row.len() + 1);
        record.push(gene.clone());
        record.extend(row.iter().map(|v| v.to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

fn read_labeled_matrix(path: &Path) -> Result<(Array2<f64>, Vec<String>, Vec<String>)> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    if headers.len() < 2 {
        return Err(PipelineError::InvalidCountMatrix {
            reason: format!("{}: expected a gene column and at least one sample", path.display()),
        });
    }
    let sample_ids: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();

    let mut gene_ids = Vec::new();
    let mut values = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        if record.len() != headers.len() {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} fields", headers.len()),
                got: format!("{} fields on data row {}", record.len(), line + 1),
            });
        }
        gene_ids.push(record[0].to_string());
        for field in record.iter().skip(1) {
            let v: f64 = field.trim().parse().map_err(|_| PipelineError::InvalidCountMatrix {
                reason: format!("non-numeric value '{}' for gene '{}'", field, &record[0]),
            })?;
            values.push(v);
        }
    }

    let data = Array2::from_shape_vec((gene_ids.len(), sample_ids.len()), values).map_err(|e| {
        PipelineError::InvalidCountMatrix {
            reason: e.to_string(),
        }
    })?;
    Ok((data, gene_ids, sample_ids))
}

pub fn write_count_matrix<P: AsRef<Path>>(path: P, matrix: &CountMatrix) -> Result<()> {
    write_labeled_matrix(
        path.as_ref(),
        &matrix.counts().to_owned(),
        matrix.gene_ids(),
        matrix.sample_ids(),
    )
}

/// Read a merged count matrix (gene column first, one column per sample)
pub fn read_count_matrix<P: AsRef<Path>>(path: P) -> Result<CountMatrix> {
    let (data, genes, samples) = read_labeled_matrix(path.as_ref())?;
    let matrix = CountMatrix::new(data, genes, samples)?;
    log::info!(
        "Loaded count matrix {} ({} genes x {} samples)",
        path.as_ref().display(),
        matrix.n_genes(),
        matrix.n_samples()
    );
    Ok(matrix)
}

pub fn write_stabilized<P: AsRef<Path>>(path: P, matrix: &StabilizedMatrix) -> Result<()> {
    write_labeled_matrix(path.as_ref(), &matrix.data, &matrix.gene_ids, &matrix.sample_ids)
}

pub fn read_stabilized<P: AsRef<Path>>(path: P) -> Result<StabilizedMatrix> {
    let (data, gene_ids, sample_ids) = read_labeled_matrix(path.as_ref())?;
    Ok(StabilizedMatrix {
        data,
        gene_ids,
        sample_ids,
    })
}

/// Read sample metadata; `sample_column` names the identifier column and every
/// other column becomes a categorical covariate. Row order is kept as written.
pub fn read_metadata<P: AsRef<Path>>(path: P, sample_column: &str) -> Result<SampleMetadata> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let id_col = headers
        .iter()
        .position(|h| h.trim() == sample_column)
        .ok_or_else(|| PipelineError::InvalidMetadata {
            reason: format!("{}: no '{}' column", path.display(), sample_column),
        })?;

    let mut sample_ids = Vec::new();
    let mut columns: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    for record in reader.records() {
        let record = record?;
        for (j, field) in record.iter().enumerate() {
            if j == id_col {
                sample_ids.push(field.trim().to_string());
            } else if j < columns.len() {
                columns[j].push(field.trim().to_string());
            }
        }
    }

    let mut metadata = SampleMetadata::new(sample_ids)?;
    for (j, name) in headers.iter().enumerate() {
        if j != id_col {
            metadata.add_condition(name.trim(), std::mem::take(&mut columns[j]))?;
        }
    }
    log::info!(
        "Loaded metadata {} ({} samples, covariates {:?})",
        path.display(),
        metadata.n_samples(),
        metadata.condition_names()
    );
    Ok(metadata)
}

/// A row type persisted as one CSV table
pub trait Record: Serialize {
    /// Header in serialization order; written on its own for an empty table
    const COLUMNS: &'static [&'static str];
}

/// Write records as a CSV table; the header row is present even with no rows
pub fn write_records<P: AsRef<Path>, T: Record>(path: P, rows: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    if rows.is_empty() {
        writer.write_record(T::COLUMNS)?;
    }
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_records<P: AsRef<Path>, T: DeserializeOwned>(path: P) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path)?;
    reader
        .deserialize()
        .map(|r| r.map_err(PipelineError::from))
        .collect()
}

pub fn write_de_table<P: AsRef<Path>>(path: P, table: &DeTable) -> Result<()> {
    write_records(path, &table.rows)
}

pub fn read_de_table<P: AsRef<Path>>(path: P) -> Result<DeTable> {
    Ok(DeTable::new(read_records(path)?))
}
