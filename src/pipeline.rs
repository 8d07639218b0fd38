//! The five stages, connected through files in the output directory
//!
//! Every stage reads its inputs from disk and writes its outputs back, so each
//! one can be re-run on its own.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::data::{CountMatrix, SampleMetadata};
use crate::diffexp::{analyze_subsets, file_safe, subset_file_name, Direction, SubsetResult};
use crate::enrich::{enrich_subsets, top_terms, EnrichmentReport, EnrichmentRow, EnrichmentService, GeneSetLibrary};
use crate::error::{PipelineError, Result};
use crate::explore::{explore, Exploration, PcaRow};
use crate::ingest::ingest_directory;
use crate::io::{
    read_count_matrix, read_de_table, read_metadata, read_records, read_stabilized,
    write_count_matrix, write_de_table, write_records, write_stabilized, Record,
};
use crate::model::{DispersionModel, DispersionRow};
use crate::plot;

pub const COUNT_MATRIX_FILE: &str = "raw_counts.csv";
pub const STABILIZED_FILE: &str = "vst_counts.csv";
pub const DISPERSION_FILE: &str = "dispersion_diagnostics.csv";
pub const PCA_FILE: &str = "pca.csv";
pub const ENRICHMENT_FILE: &str = "enrichment.csv";
pub const SUBSETS_FILE: &str = "subsets.csv";
pub const PLOT_DIR: &str = "plots";

/// One subset the differential stage wrote a table for
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TestedSubset {
    subset: String,
}

impl Record for TestedSubset {
    const COLUMNS: &'static [&'static str] = &["subset"];
}

fn output_path(config: &PipelineConfig, name: &str) -> PathBuf {
    config.output_dir.join(name)
}

fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    Ok(())
}

/// Size the global rayon pool; a pool that already exists is kept
pub fn configure_threads(threads: Option<usize>) {
    if let Some(n) = threads {
        match rayon::ThreadPoolBuilder::new().num_threads(n).build_global() {
            Ok(()) => log::debug!("Using {} worker threads", n),
            Err(e) => log::debug!("Thread pool already configured: {}", e),
        }
    }
}

fn load_inputs(config: &PipelineConfig) -> Result<(CountMatrix, SampleMetadata)> {
    let counts = read_count_matrix(output_path(config, COUNT_MATRIX_FILE))?;
    let metadata = read_metadata(&config.metadata, &config.sample_column)?;
    Ok((counts, metadata))
}

/// Subsets the differential stage last tested; before it has run, the configured
/// order or every level of the grouping covariate
fn subset_names(config: &PipelineConfig, metadata: &SampleMetadata) -> Result<Vec<String>> {
    let tested = output_path(config, SUBSETS_FILE);
    if tested.exists() {
        let rows: Vec<TestedSubset> = read_records(&tested)?;
        log::debug!("{} subsets listed in {}", rows.len(), tested.display());
        return Ok(rows.into_iter().map(|r| r.subset).collect());
    }
    match config.subset_levels() {
        Some(levels) => Ok(levels.to_vec()),
        None => metadata
            .levels(&config.group_by)
            .ok_or_else(|| PipelineError::InvalidMetadata {
                reason: format!("grouping covariate '{}' not found", config.group_by),
            }),
    }
}

fn load_subset_tables(config: &PipelineConfig, subsets: &[String]) -> Result<Vec<SubsetResult>> {
    subsets
        .iter()
        .map(|subset| {
            let table = read_de_table(output_path(config, &subset_file_name(subset)))?;
            Ok(SubsetResult {
                subset: subset.clone(),
                table,
            })
        })
        .collect()
}

/// Stage 1: merge the sample files and write the count matrix
pub fn run_ingest(config: &PipelineConfig) -> Result<CountMatrix> {
    ensure_dir(&config.output_dir)?;
    let matrix = ingest_directory(&config.input_dir, &config.ingest)?;
    let path = output_path(config, COUNT_MATRIX_FILE);
    write_count_matrix(&path, &matrix)?;
    log::info!(
        "Wrote {} ({} genes x {} samples)",
        path.display(),
        matrix.n_genes(),
        matrix.n_samples()
    );
    Ok(matrix)
}

/// Stage 2: whole-dataset fit, dispersion diagnostics, stabilized matrix and PCA
pub fn run_explore<M: DispersionModel>(config: &PipelineConfig, model: &M) -> Result<Exploration> {
    let (counts, metadata) = load_inputs(config)?;
    let exploration = explore(&counts, &metadata, model, &config.design)?;

    write_records(output_path(config, DISPERSION_FILE), &exploration.diagnostics.rows)?;
    write_stabilized(output_path(config, STABILIZED_FILE), &exploration.stabilized)?;
    write_records(output_path(config, PCA_FILE), &exploration.pca.rows)?;
    if let Some(trend) = exploration.diagnostics.trend {
        log::info!("Dispersion trend: {}", trend);
    }
    log::info!("Wrote exploratory tables to {}", config.output_dir.display());
    Ok(exploration)
}

/// Stage 3: per-subset refit and one result table per subset
pub fn run_differential<M: DispersionModel>(
    config: &PipelineConfig,
    model: &M,
) -> Result<Vec<SubsetResult>> {
    let (counts, metadata) = load_inputs(config)?;
    let results = analyze_subsets(
        &counts,
        &metadata,
        model,
        &config.group_by,
        config.subset_levels(),
        &config.subset_design(),
        &config.contrast,
        &config.significance,
    )?;
    for result in &results {
        let path = output_path(config, &subset_file_name(&result.subset));
        write_de_table(&path, &result.table)?;
        log::info!("Wrote {} ({} genes)", path.display(), result.table.len());
    }
    let tested: Vec<TestedSubset> = results
        .iter()
        .map(|r| TestedSubset {
            subset: r.subset.clone(),
        })
        .collect();
    write_records(output_path(config, SUBSETS_FILE), &tested)?;
    Ok(results)
}

/// Stage 4: enrichment of every subset's up and down genes, one combined table
pub fn run_enrichment<S: EnrichmentService + ?Sized>(
    config: &PipelineConfig,
    service: &S,
) -> Result<EnrichmentReport> {
    let metadata = read_metadata(&config.metadata, &config.sample_column)?;
    let subsets = subset_names(config, &metadata)?;
    let tables = load_subset_tables(config, &subsets)?;

    let report = enrich_subsets(
        &tables,
        service,
        &config.enrichment.databases,
        &config.significance,
    );
    let path = output_path(config, ENRICHMENT_FILE);
    write_records(&path, &report.rows)?;
    log::info!(
        "Wrote {} ({} terms, {} failed calls)",
        path.display(),
        report.rows.len(),
        report.failures.len()
    );
    Ok(report)
}

/// Stage 5: render every plot from the persisted tables. Returns the files written.
pub fn run_plots(config: &PipelineConfig) -> Result<Vec<PathBuf>> {
    let plot_dir = config.output_dir.join(PLOT_DIR);
    ensure_dir(&plot_dir)?;
    let metadata = read_metadata(&config.metadata, &config.sample_column)?;
    let mut written = Vec::new();

    let dispersion: Vec<DispersionRow> = read_records(output_path(config, DISPERSION_FILE))?;
    let path = plot_dir.join("dispersion.svg");
    plot::dispersion_plot(&path, &dispersion)?;
    written.push(path);

    let pca: Vec<PcaRow> = read_records(output_path(config, PCA_FILE))?;
    for factor in &config.design.factors {
        let path = plot_dir.join(format!("pca_{}.svg", file_safe(factor)));
        plot::pca_plot(&path, &pca, &metadata, factor)?;
        written.push(path);
    }

    let stabilized = read_stabilized(output_path(config, STABILIZED_FILE))?;
    let subsets = subset_names(config, &metadata)?;
    let tables = load_subset_tables(config, &subsets)?;
    let filter = &config.significance;
    for result in &tables {
        let stem = file_safe(&result.subset);
        let path = plot_dir.join(format!("volcano_{}.svg", stem));
        plot::volcano_plot(&path, &result.table, filter, &format!("{} {}", result.subset, config.contrast))?;
        written.push(path);

        let genes: Vec<String> = result
            .table
            .rows
            .iter()
            .filter(|r| filter.classify(r).is_some())
            .map(|r| r.gene_id.clone())
            .collect();
        if genes.is_empty() {
            log::info!("Subset {}: no significant genes, no heatmap", result.subset);
            continue;
        }
        let path = plot_dir.join(format!("heatmap_{}.svg", stem));
        match plot::heatmap(&path, &stabilized, &genes, &metadata, &config.design.factors, &result.subset) {
            Ok(n) => {
                log::debug!("Heatmap of {} genes for {}", n, result.subset);
                written.push(path);
            }
            Err(e) => log::warn!("Skipping heatmap for {}: {}", result.subset, e),
        }
    }

    let counts = plot::count_significant(&tables, filter);
    let path = plot_dir.join("gene_counts.svg");
    plot::gene_count_plot(&path, &counts, &config.subset_order)?;
    written.push(path);

    let enrichment_path = output_path(config, ENRICHMENT_FILE);
    if enrichment_path.exists() {
        let rows: Vec<EnrichmentRow> = read_records(&enrichment_path)?;
        for subset in &subsets {
            for direction in Direction::ALL {
                for database in &config.enrichment.databases {
                    let top = top_terms(&rows, subset, direction, database, config.enrichment.top_terms);
                    if top.is_empty() {
                        continue;
                    }
                    let path = plot_dir.join(format!(
                        "enrichment_{}_{}_{}.svg",
                        file_safe(subset),
                        direction,
                        file_safe(database)
                    ));
                    let title = format!("{} {} {}", subset, direction, database);
                    plot::enrichment_dot_plot(&path, &top, &title)?;
                    written.push(path);
                }
            }
        }
    }

    log::info!("Wrote {} plots to {}", written.len(), plot_dir.display());
    Ok(written)
}

/// Run all five stages in order with the configured model and gene-set library
pub fn run_all(config: &PipelineConfig) -> Result<()> {
    config.validate()?;
    configure_threads(config.threads);

    run_ingest(config)?;
    run_explore(config, &config.model)?;
    run_differential(config, &config.model)?;
    if config.enrichment.databases.is_empty() {
        log::info!("No gene-set databases configured, skipping enrichment");
    } else {
        let library = GeneSetLibrary::load(&config.enrichment.library_dir, &config.enrichment.databases)?;
        run_enrichment(config, &library)?;
    }
    run_plots(config)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glm::{Contrast, DesignSpec};
    use std::fmt::Write as _;
    use tempfile::tempdir;

    /// 2 timepoints x 2 treatments x 3 replicates; genes 0-5 respond to RML at t2
    fn write_inputs(root: &Path) -> PipelineConfig {
        let counts_dir = root.join("counts");
        std::fs::create_dir_all(&counts_dir).unwrap();
        let mut meta = String::from("sample,timepoint,treatment\n");

        let mut sample = 0;
        for time in ["t1", "t2"] {
            for treatment in ["Mock", "RML"] {
                for rep in 0..3 {
                    sample += 1;
                    let id = format!("S{:02}", sample);
                    writeln!(meta, "{},{},{}", id, time, treatment).unwrap();

                    let mut text = String::new();
                    for g in 0..60 {
                        let base = 30.0 + 12.0 * g as f64;
                        let noise = 1.0 + 0.12 * ((g * 7 + sample * 3 + rep) as f64).sin();
                        let effect = if g < 6 && time == "t2" && treatment == "RML" { 5.0 } else { 1.0 };
                        writeln!(text, "gene{}\t{}", g, (base * noise * effect).round()).unwrap();
                    }
                    writeln!(text, "silent\t0").unwrap();
                    std::fs::write(counts_dir.join(format!("{}.tabular", id)), text).unwrap();
                }
            }
        }
        std::fs::write(root.join("metadata.csv"), meta).unwrap();

        let sets_dir = root.join("gene_sets");
        std::fs::create_dir_all(&sets_dir).unwrap();
        std::fs::write(
            sets_dir.join("Toy.gmt"),
            "response\tx\tgene0\tgene1\tgene2\tgene3\tgene4\tgene5\n\
             background\tx\tgene20\tgene21\tgene22\tgene23\n",
        )
        .unwrap();

        PipelineConfig {
            input_dir: counts_dir,
            metadata: root.join("metadata.csv"),
            design: DesignSpec::new(&["timepoint", "treatment"]),
            group_by: "timepoint".into(),
            contrast: Contrast::new("treatment", "RML", "Mock"),
            subset_order: vec!["t2".into(), "t1".into()],
            output_dir: root.join("out"),
            enrichment: crate::config::EnrichmentConfig {
                library_dir: sets_dir,
                databases: vec!["Toy".into()],
                top_terms: 10,
            },
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_full_pipeline() {
        let dir = tempdir().unwrap();
        let config = write_inputs(dir.path());
        run_all(&config).unwrap();

        let out = &config.output_dir;
        let counts = read_count_matrix(out.join(COUNT_MATRIX_FILE)).unwrap();
        assert_eq!(counts.n_samples(), 12);
        assert_eq!(counts.n_genes(), 60);
        assert!(counts.gene_index("silent").is_none());

        for file in [STABILIZED_FILE, DISPERSION_FILE, PCA_FILE, ENRICHMENT_FILE] {
            assert!(out.join(file).exists(), "{} missing", file);
        }

        let t2 = read_de_table(out.join("de_t2.csv")).unwrap();
        assert!(t2.rows.windows(2).all(|w| w[0].padj <= w[1].padj));
        assert!(t2.rows.iter().all(|r| !r.padj.is_nan()));
        let top: Vec<&str> = t2.rows.iter().take(6).map(|r| r.gene_id.as_str()).collect();
        assert!(top.iter().all(|g| ["gene0", "gene1", "gene2", "gene3", "gene4", "gene5"].contains(g)));

        let enrichment: Vec<EnrichmentRow> = read_records(out.join(ENRICHMENT_FILE)).unwrap();
        assert!(enrichment.iter().any(|r| r.term == "response" && r.subset == "t2"));

        let plots = out.join(PLOT_DIR);
        assert!(plots.join("dispersion.svg").exists());
        assert!(plots.join("volcano_t1.svg").exists());
        assert!(plots.join("heatmap_t2.svg").exists());
        assert!(plots.join("gene_counts.svg").exists());
        assert!(plots.join("enrichment_t2_up_Toy.svg").exists());
    }

    #[test]
    fn test_stages_rerun_from_disk() {
        let dir = tempdir().unwrap();
        let config = write_inputs(dir.path());
        run_ingest(&config).unwrap();
        let first = run_differential(&config, &config.model).unwrap();
        let second = run_differential(&config, &config.model).unwrap();
        assert_eq!(first[0].table, second[0].table);
    }

    #[test]
    fn test_later_stages_follow_tested_subsets() {
        let dir = tempdir().unwrap();
        let config = write_inputs(dir.path());
        run_ingest(&config).unwrap();
        run_explore(&config, &config.model).unwrap();

        let narrowed = PipelineConfig {
            subset_order: vec!["t2".into()],
            ..config.clone()
        };
        run_differential(&narrowed, &narrowed.model).unwrap();
        assert!(!config.output_dir.join("de_t1.csv").exists());

        let library =
            GeneSetLibrary::load(&config.enrichment.library_dir, &config.enrichment.databases).unwrap();
        let report = run_enrichment(&config, &library).unwrap();
        assert!(report.rows.iter().all(|r| r.subset == "t2"));

        let plots = run_plots(&config).unwrap();
        assert!(plots.iter().any(|p| p.ends_with("volcano_t2.svg")));
        assert!(!plots.iter().any(|p| p.ends_with("volcano_t1.svg")));
    }

    #[test]
    fn test_enrichment_without_significant_genes_writes_header() {
        let dir = tempdir().unwrap();
        let mut config = write_inputs(dir.path());
        run_ingest(&config).unwrap();
        run_differential(&config, &config.model).unwrap();

        config.significance.abs_lfc_above = 100.0;
        let library =
            GeneSetLibrary::load(&config.enrichment.library_dir, &config.enrichment.databases).unwrap();
        let report = run_enrichment(&config, &library).unwrap();
        assert!(report.rows.is_empty());

        let text = std::fs::read_to_string(config.output_dir.join(ENRICHMENT_FILE)).unwrap();
        assert_eq!(text.trim_end(), EnrichmentRow::COLUMNS.join(","));
        let back: Vec<EnrichmentRow> = read_records(config.output_dir.join(ENRICHMENT_FILE)).unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn test_metadata_order_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        let mut config = write_inputs(dir.path());
        run_ingest(&config).unwrap();

        let text = std::fs::read_to_string(&config.metadata).unwrap();
        let mut lines: Vec<&str> = text.lines().collect();
        lines.swap(1, 2);
        let shuffled = dir.path().join("shuffled.csv");
        std::fs::write(&shuffled, lines.join("\n")).unwrap();
        config.metadata = shuffled;

        let err = run_explore(&config, &config.model).unwrap_err();
        assert!(matches!(err, PipelineError::SampleOrderMismatch { .. }));
    }
}
