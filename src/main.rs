//! rnaseq_pipeline command-line interface

use clap::Parser;
use log::{info, LevelFilter};

use rnaseq_pipeline::cli::{Cli, Commands};
use rnaseq_pipeline::prelude::*;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    let args: Vec<String> = std::env::args().collect();

    // Find the first non-flag argument (potential subcommand)
    let first_positional = args.iter().skip(1).find(|a| !a.starts_with('-'));
    let subcommands = ["init", "ingest", "explore", "test", "enrich", "plot", "run", "help"];
    let has_subcommand = first_positional.map_or(false, |a| subcommands.contains(&a.as_str()));

    if !has_subcommand {
        if args.len() == 1 {
            print_no_args();
            return;
        }
        if args.iter().any(|a| a == "--help") {
            print_long_help();
            return;
        }
        if args.iter().any(|a| a == "-h") {
            print_short_help();
            return;
        }
        if args.iter().any(|a| a == "-V" || a == "--version") {
            println!("rnaseq_pipeline {}", VERSION);
            return;
        }
        print_no_args();
        return;
    }

    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Some(Commands::Init { output }) => run_init(&output),
        Some(Commands::Ingest {
            common,
            input_dir,
            prefix,
            extension,
        }) => common.load_config().and_then(|mut config| {
            if let Some(dir) = input_dir {
                config.input_dir = dir;
            }
            if let Some(prefix) = prefix {
                config.ingest.prefix = prefix;
            }
            if let Some(extension) = extension {
                config.ingest.extension = extension;
            }
            config.validate()?;
            run_ingest(&config).map(|_| ())
        }),
        Some(Commands::Explore { common }) => common.load_config().and_then(|config| {
            prepare(&config)?;
            run_explore(&config, &config.model).map(|_| ())
        }),
        Some(Commands::Test {
            common,
            significance,
            group_by,
            subsets,
        }) => common.load_config().and_then(|mut config| {
            significance.apply(&mut config);
            if let Some(column) = group_by {
                config.group_by = column;
            }
            if !subsets.is_empty() {
                config.subset_order = subsets;
            }
            prepare(&config)?;
            run_differential(&config, &config.model).map(|_| ())
        }),
        Some(Commands::Enrich {
            common,
            significance,
            library_dir,
            databases,
        }) => common.load_config().and_then(|mut config| {
            significance.apply(&mut config);
            if let Some(dir) = library_dir {
                config.enrichment.library_dir = dir;
            }
            if !databases.is_empty() {
                config.enrichment.databases = databases;
            }
            prepare(&config)?;
            let library =
                GeneSetLibrary::load(&config.enrichment.library_dir, &config.enrichment.databases)?;
            let report = run_enrichment(&config, &library)?;
            if !report.failures.is_empty() {
                eprintln!("Warning: {} enrichment queries failed", report.failures.len());
            }
            Ok(())
        }),
        Some(Commands::Plot {
            common,
            significance,
        }) => common.load_config().and_then(|mut config| {
            significance.apply(&mut config);
            prepare(&config)?;
            run_plots(&config).map(|_| ())
        }),
        Some(Commands::Run {
            common,
            significance,
            input_dir,
        }) => common.load_config().and_then(|mut config| {
            significance.apply(&mut config);
            if let Some(dir) = input_dir {
                config.input_dir = dir;
            }
            run_all(&config)
        }),
        None => {
            print_no_args();
            return;
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Custom help output
// ---------------------------------------------------------------------------

fn print_no_args() {
    println!("rnaseq_pipeline v{}", VERSION);
    println!("Run `rnaseq_pipeline -h` for usage or `rnaseq_pipeline --help` for detailed information.");
}

fn print_short_help() {
    println!("rnaseq_pipeline v{}", VERSION);
    println!();
    println!("Usage: rnaseq_pipeline <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  init       Write a configuration template");
    println!("  ingest     Merge per-sample count files");
    println!("  explore    Dispersion diagnostics, stabilized counts and PCA");
    println!("  test       Differential expression per subset");
    println!("  enrich     Gene-set enrichment of significant genes");
    println!("  plot       Render all plots");
    println!("  run        Run every stage in order");
    println!();
    println!("Run `rnaseq_pipeline <COMMAND> --help` for command-specific options.");
}

fn print_long_help() {
    println!("rnaseq_pipeline v{}", VERSION);
    println!("Bulk RNA-seq differential expression, from per-sample counts to enrichment plots");
    println!();
    println!("Usage: rnaseq_pipeline <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  init       Write the default configuration as JSON");
    println!("  ingest     Merge per-sample count files into one matrix");
    println!("               - sample ids from file names (prefix and extension stripped)");
    println!("               - all-zero genes dropped, rows sorted by mean count");
    println!("  explore    Fit the model over all samples");
    println!("               - per-gene dispersion diagnostics");
    println!("               - variance-stabilized matrix and PCA");
    println!("  test       Refit and test the contrast within each subset");
    println!("               - Wald test, Cook's distance and independent filtering");
    println!("  enrich     Test up and down genes against a GMT gene-set library");
    println!("  plot       Dispersion, PCA, volcano, gene count, heatmap and dot plots");
    println!("  run        All of the above, in order");
    println!();
    println!("Global Options:");
    println!("  -v, --verbose    Enable verbose output");
    println!("  -h               Print short help");
    println!("      --help       Print detailed help");
    println!("  -V, --version    Print version");
    println!();
    println!("Examples:");
    println!("  rnaseq_pipeline init -o pipeline.json");
    println!();
    println!("  rnaseq_pipeline run -c pipeline.json -t 8");
    println!();
    println!("  rnaseq_pipeline test -c pipeline.json --subsets 7dpi,14dpi --padj 0.01");
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn run_init(output: &std::path::Path) -> Result<()> {
    PipelineConfig::default().to_file(output)?;
    info!("Wrote default configuration to {}", output.display());
    Ok(())
}

fn prepare(config: &PipelineConfig) -> Result<()> {
    config.validate()?;
    configure_threads(config.threads);
    Ok(())
}
