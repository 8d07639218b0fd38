//! Command-line interface for rnaseq_pipeline

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::PipelineConfig;

#[derive(Parser)]
#[command(name = "rnaseq_pipeline")]
#[command(version)]
#[command(about = "Bulk RNA-seq differential expression pipeline")]
#[command(disable_help_flag = true)]
#[command(disable_version_flag = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Options every stage accepts
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// Pipeline configuration (JSON)
    #[arg(short, long, value_name = "FILE",
        long_help = "Pipeline configuration file (JSON).\n\
            Missing fields take their defaults. Write a template with `rnaseq_pipeline init`.")]
    pub config: Option<PathBuf>,

    /// Output directory [default: from config]
    #[arg(short, long, value_name = "DIR",
        long_help = "Directory holding every table and plot the stages exchange.\n\
            Overrides `output_dir` from the configuration.")]
    pub output_dir: Option<PathBuf>,

    /// Sample metadata CSV [default: from config]
    #[arg(short, long, value_name = "FILE")]
    pub metadata: Option<PathBuf>,

    /// Number of threads (default: all cores)
    #[arg(short = 't', long)]
    pub threads: Option<usize>,
}

/// Significance filter overrides
#[derive(Args, Debug, Clone, Default)]
pub struct SignificanceArgs {
    /// Adjusted p-value must be below this [default: 0.05]
    #[arg(long, value_name = "P")]
    pub padj: Option<f64>,

    /// baseMean must be above this [default: 15]
    #[arg(long, value_name = "MEAN")]
    pub min_base_mean: Option<f64>,

    /// |log2FoldChange| must be above this [default: 0.85]
    #[arg(long, value_name = "LFC")]
    pub min_lfc: Option<f64>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a configuration template
    #[command(
        long_about = "Write the default configuration as JSON.\n\n\
            Edit the file to match the experiment, then pass it to every stage with --config.",
        after_long_help = "\
Examples:
  rnaseq_pipeline init -o pipeline.json"
    )]
    Init {
        /// Output file path [default: pipeline.json]
        #[arg(short, long, default_value = "pipeline.json")]
        output: PathBuf,
    },

    /// Merge per-sample count files into one matrix
    #[command(
        long_about = "Merge per-sample count files into one gene x sample matrix.\n\n\
            Each file holds `gene<TAB>count` lines. The sample id is the file name without\n\
            the configured prefix and extension. All-zero genes are dropped and the rest\n\
            sorted by mean count.",
        after_long_help = "\
Examples:
  rnaseq_pipeline ingest -c pipeline.json
  rnaseq_pipeline ingest -i counts/ --prefix htseq_ --extension tabular -o results"
    )]
    Ingest {
        #[command(flatten)]
        common: CommonArgs,

        /// Directory of per-sample count files
        #[arg(short, long, value_name = "DIR")]
        input_dir: Option<PathBuf>,

        /// File name prefix stripped from sample ids
        #[arg(long)]
        prefix: Option<String>,

        /// Extension of count files [default: tabular]
        #[arg(long)]
        extension: Option<String>,
    },

    /// Dispersion diagnostics, stabilized counts and PCA
    #[command(
        long_about = "Fit the model once over all samples.\n\n\
            Writes the per-gene dispersion table, the variance-stabilized matrix and\n\
            the sample coordinates on the first two principal components.",
        after_long_help = "\
Examples:
  rnaseq_pipeline explore -c pipeline.json"
    )]
    Explore {
        #[command(flatten)]
        common: CommonArgs,
    },

    /// Differential expression per subset
    #[command(
        long_about = "Refit the model within each subset and test the contrast.\n\n\
            Subsets are the levels of the grouping covariate. Each subset is fit on its\n\
            own samples only, and genes without an adjusted p-value are dropped.",
        after_long_help = "\
Examples:
  rnaseq_pipeline test -c pipeline.json
  rnaseq_pipeline test -c pipeline.json --group-by timepoint --subsets 7dpi,14dpi"
    )]
    Test {
        #[command(flatten)]
        common: CommonArgs,

        #[command(flatten)]
        significance: SignificanceArgs,

        /// Covariate whose levels define the subsets
        #[arg(short, long, value_name = "COLUMN")]
        group_by: Option<String>,

        /// Subsets to test, in display order (comma separated)
        #[arg(short, long, value_delimiter = ',')]
        subsets: Vec<String>,
    },

    /// Gene-set enrichment of significant genes
    #[command(
        long_about = "Test the up and down genes of every subset against the gene-set library.\n\n\
            The library is a directory of GMT files, one per database. Failed queries\n\
            are reported and skipped.",
        after_long_help = "\
Examples:
  rnaseq_pipeline enrich -c pipeline.json
  rnaseq_pipeline enrich -c pipeline.json -l gene_sets -d GO_Biological_Process_2023"
    )]
    Enrich {
        #[command(flatten)]
        common: CommonArgs,

        #[command(flatten)]
        significance: SignificanceArgs,

        /// Directory of GMT files
        #[arg(short, long, value_name = "DIR")]
        library_dir: Option<PathBuf>,

        /// Databases to query (comma separated)
        #[arg(short, long, value_delimiter = ',')]
        databases: Vec<String>,
    },

    /// Render all plots from the persisted tables
    #[command(
        long_about = "Render SVG plots from the tables the other stages wrote.\n\n\
            Dispersion, PCA, volcano, gene count, heatmap and enrichment dot plots\n\
            are written to <output-dir>/plots.",
        after_long_help = "\
Examples:
  rnaseq_pipeline plot -c pipeline.json"
    )]
    Plot {
        #[command(flatten)]
        common: CommonArgs,

        #[command(flatten)]
        significance: SignificanceArgs,
    },

    /// Run every stage in order
    #[command(
        long_about = "Run ingest, explore, test, enrich and plot in order.",
        after_long_help = "\
Examples:
  rnaseq_pipeline run -c pipeline.json -t 8"
    )]
    Run {
        #[command(flatten)]
        common: CommonArgs,

        #[command(flatten)]
        significance: SignificanceArgs,

        /// Directory of per-sample count files
        #[arg(short, long, value_name = "DIR")]
        input_dir: Option<PathBuf>,
    },
}

impl CommonArgs {
    /// Load the configuration file (or defaults) and apply the overrides
    pub fn load_config(&self) -> crate::error::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_file(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(path) = &self.metadata {
            config.metadata = path.clone();
        }
        if self.threads.is_some() {
            config.threads = self.threads;
        }
        Ok(config)
    }
}

impl SignificanceArgs {
    pub fn apply(&self, config: &mut PipelineConfig) {
        let filter = &mut config.significance;
        if let Some(p) = self.padj {
            filter.padj_below = p;
        }
        if let Some(m) = self.min_base_mean {
            filter.base_mean_above = m;
        }
        if let Some(l) = self.min_lfc {
            filter.abs_lfc_above = l;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_subcommand_with_overrides() {
        let cli = Cli::try_parse_from([
            "rnaseq_pipeline",
            "test",
            "-o",
            "out",
            "--subsets",
            "14dpi,7dpi",
            "--padj",
            "0.01",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Some(Commands::Test {
                common,
                significance,
                subsets,
                group_by,
            }) => {
                assert_eq!(subsets, vec!["14dpi", "7dpi"]);
                assert!(group_by.is_none());
                let mut config = common.load_config().unwrap();
                significance.apply(&mut config);
                assert_eq!(config.output_dir, PathBuf::from("out"));
                assert_eq!(config.significance.padj_below, 0.01);
                assert_eq!(config.significance.base_mean_above, 15.0);
            }
            _ => panic!("expected the test subcommand"),
        }
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, r#"{"group_by": "batch", "threads": 2}"#).unwrap();

        let args = CommonArgs {
            config: Some(path),
            threads: Some(4),
            ..CommonArgs::default()
        };
        let config = args.load_config().unwrap();
        assert_eq!(config.group_by, "batch");
        assert_eq!(config.threads, Some(4));
    }
}
