//! CLI entry point for the arbovirus case cleaning pipeline.

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use episcope_processing::{
    CleaningError, CsvSource, Pipeline, PipelineConfig, RunSummary, SourceDiagnosis,
};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Chunked cleaning and class balancing of arbovirus case notifications",
    long_about = "Cleans raw dengue/zika/chikungunya notifications into an exactly \
                  class-balanced, shuffled CSV for classifier training.\n\n\
                  EXAMPLES:\n  \
                  # Full run with a fixed seed\n  \
                  episcope-processing clean -i data/raw_cases.csv --seed 42\n\n  \
                  # Retry the final write from what is already staged\n  \
                  episcope-processing finalize --seed 42\n\n  \
                  # Field coverage per disease\n  \
                  episcope-processing diagnose -i data/raw_cases.csv\n\n  \
                  # Drop leftover staging areas\n  \
                  episcope-processing cleanup"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Suppress progress output (only show warnings, errors and the final result)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output JSON to stdout instead of a human-readable summary
    ///
    /// Disables all logs; only the final JSON document is written.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute the median age, stream the source into staging, then balance and write
    Clean {
        /// Path to the raw CSV file
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        options: RunOptions,

        /// Raw rows per chunk
        #[arg(long, default_value_t = episcope_processing::config::DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,

        /// Keep repeated notifications instead of dropping them
        #[arg(long)]
        no_dedupe: bool,

        /// Attempts per chunk before a staging failure aborts the run
        #[arg(long, default_value_t = episcope_processing::config::DEFAULT_MAX_CHUNK_RETRIES)]
        retries: usize,

        /// Reuse the median age cached in the staging directory
        #[arg(long)]
        reuse_statistic: bool,
    },

    /// Balance and write from existing staging areas without reading the source
    Finalize {
        #[command(flatten)]
        options: RunOptions,
    },

    /// Count non-null values per column for each disease label
    Diagnose {
        /// Path to the raw CSV file
        #[arg(short, long)]
        input: PathBuf,

        /// Raw rows per chunk
        #[arg(long, default_value_t = episcope_processing::config::DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,

        /// Count repeated notifications instead of dropping them
        #[arg(long)]
        no_dedupe: bool,
    },

    /// Remove staging areas and the cached statistic
    Cleanup {
        /// Root directory of the staging areas
        #[arg(long, default_value = "staging")]
        staging_dir: PathBuf,
    },
}

/// Options shared by the commands that write the balanced dataset.
#[derive(Args, Debug)]
struct RunOptions {
    /// Seed for sampling and shuffling (reproducible output)
    #[arg(long)]
    seed: Option<u64>,

    /// Root directory of the staging areas
    #[arg(long, default_value = "staging")]
    staging_dir: PathBuf,

    /// Path of the balanced CSV
    #[arg(short, long, default_value = "output/cleaned_arboviroses_cases.csv")]
    output: PathBuf,
}

/// Initialize the tracing subscriber for logging.
///
/// When `json_output` is true, logging is completely disabled so stdout
/// carries only the JSON document.
fn init_logging(level: &str, quiet: bool, json_output: bool) {
    if json_output {
        return;
    }

    use tracing_subscriber::EnvFilter;

    let effective_level = if quiet { "warn" } else { level };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(effective_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.quiet, cli.json);

    match &cli.command {
        Command::Clean {
            input,
            options,
            chunk_size,
            no_dedupe,
            retries,
            reuse_statistic,
        } => {
            let config = run_config(options)
                .chunk_size(*chunk_size)
                .deduplicate(!*no_dedupe)
                .max_chunk_retries(*retries)
                .reuse_statistic(*reuse_statistic)
                .build()?;
            let source = CsvSource::open(input)?;

            info!("{}", "=".repeat(80));
            info!("Cleaning {}", input.display());
            info!("{}", "=".repeat(80));

            let summary = report_failure(build_pipeline(&cli, config)?.run(&source))?;
            print_summary(&summary, cli.json)
        }
        Command::Finalize { options } => {
            let config = run_config(options).build()?;
            let summary = report_failure(build_pipeline(&cli, config)?.finalize())?;
            print_summary(&summary, cli.json)
        }
        Command::Diagnose {
            input,
            chunk_size,
            no_dedupe,
        } => {
            let config = PipelineConfig::builder()
                .chunk_size(*chunk_size)
                .deduplicate(!*no_dedupe)
                .build()?;
            let source = CsvSource::open(input)?;
            let diagnosis = build_pipeline(&cli, config)?.diagnose(&source)?;
            print_diagnosis(&diagnosis, cli.json)
        }
        Command::Cleanup { staging_dir } => {
            let config = PipelineConfig::builder()
                .staging_dir(staging_dir.clone())
                .build()?;
            build_pipeline(&cli, config)?.cleanup()?;
            if cli.json {
                println!("{}", serde_json::json!({ "cleaned": staging_dir }));
            } else {
                println!("Staging under {} removed", staging_dir.display());
            }
            Ok(())
        }
    }
}

fn run_config(options: &RunOptions) -> episcope_processing::PipelineConfigBuilder {
    let builder = PipelineConfig::builder()
        .staging_dir(options.staging_dir.clone())
        .output_path(options.output.clone());
    match options.seed {
        Some(seed) => builder.seed(seed),
        None => builder,
    }
}

fn build_pipeline(cli: &Cli, config: PipelineConfig) -> Result<Pipeline> {
    let mut builder = Pipeline::builder().config(config);

    if !cli.quiet && !cli.json {
        builder = builder.on_progress(|update| {
            info!(
                "[{:.0}%] {}: {}",
                update.progress * 100.0,
                update.stage.display_name(),
                update.message
            );
        });
    }

    Ok(builder.build()?)
}

/// Log a failed run with a hint on how to resume, then hand the error on.
fn report_failure(result: std::result::Result<RunSummary, CleaningError>) -> Result<RunSummary> {
    result.map_err(|e| {
        if e.is_recoverable() {
            error!(
                "[{}] staging was kept; run `finalize` to retry the write or `cleanup` to drop it",
                e.error_code()
            );
        }
        anyhow!(e)
    })
}

fn print_summary(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(summary).context("Serializing run summary")?;
        println!("{}", out);
        return Ok(());
    }

    println!();
    println!("{}", "=".repeat(80));
    println!("CLEANING COMPLETE");
    println!("{}", "=".repeat(80));
    println!();

    if let Some(path) = &summary.output_path {
        println!("Output: {} ({} rows)", path.display(), summary.rows_written);
    }
    println!(
        "Median age: {}{}",
        summary.median_age,
        if summary.statistic_reused { " (cached)" } else { "" }
    );
    println!("Duration: {}ms", summary.duration_ms);
    println!();

    if summary.chunks > 0 {
        println!("Streaming:");
        println!("  Chunks: {}", summary.chunks);
        println!("  Rows read: {}", summary.rows_read);
        println!("  Rejected (label): {}", summary.rows_rejected);
        println!("  Duplicates dropped: {}", summary.duplicates_dropped);
        println!();
    }

    println!("Classes:");
    for (label, staged) in &summary.staged {
        println!(
            "  {:<12} staged {:>10}  kept {:>10}",
            label, staged, summary.min_count
        );
    }

    if !summary.warnings.is_empty() {
        println!();
        println!("Warnings:");
        for warning in &summary.warnings {
            println!("  - {}", warning);
        }
    }
    println!();
    Ok(())
}

fn print_diagnosis(diagnosis: &SourceDiagnosis, json: bool) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(diagnosis).context("Serializing diagnosis")?;
        println!("{}", out);
        return Ok(());
    }

    println!();
    println!(
        "Rows: {} ({} repeated, {} without label)",
        diagnosis.total_rows, diagnosis.duplicates_dropped, diagnosis.unlabeled_rows
    );

    for (label, rows) in &diagnosis.rows_per_label {
        println!();
        println!("{} ({} rows)", label, rows);
        println!("{}", "-".repeat(40));
        for (column, non_null) in diagnosis.ranked_columns(label) {
            let share = if *rows > 0 {
                non_null as f64 / *rows as f64 * 100.0
            } else {
                0.0
            };
            println!("  {:<20} {:>10} {:>6.1}%", column, non_null, share);
        }
    }
    println!();
    Ok(())
}
