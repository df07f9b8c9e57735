//! Lakehouse ingest - capture and refinement tool

use anyhow::Result;
use clap::{Parser, Subcommand};
use lakehouse_common::logging::{init_logging, LogConfig, LogLevel};
use lakehouse_ingest::{config::PipelineConfig, pipeline::Pipeline};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "lakehouse-ingest")]
#[command(author, version, about = "Bronze/silver lakehouse ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Pipeline configuration file
    #[arg(short, long, env = "LAKEHOUSE_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Land raw data from a configured source into the bronze layer
    Capture {
        /// Source name from the configuration
        source: String,

        /// Only capture this entity
        #[arg(short, long)]
        entity: Option<String>,
    },

    /// Refine a dataset from bronze into silver Parquet
    Normalize {
        /// Dataset name; its schema is `<schema_dir>/<dataset>.toml`
        dataset: String,
    },

    /// Show the stored watermarks of a source
    Checkpoint {
        /// Source name from the configuration
        source: String,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("lakehouse-ingest")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let config = PipelineConfig::load(cli.config.as_deref())?;
    let pipeline = Pipeline::connect(config).await?;

    match cli.command {
        Command::Capture { source, entity } => {
            let report = pipeline.capture(&source, entity.as_deref()).await?;
            print_json(&report.results)?;

            for (entity, err) in &report.failures {
                error!("{}/{} failed: {}", report.source, entity, err);
            }
            info!(
                "Captured {} of {} entities from {} ({} rows)",
                report.artifacts_written(),
                report.total(),
                report.source,
                report.rows_written()
            );
            report.into_result()?;
        },
        Command::Normalize { dataset } => {
            let result = pipeline.normalize(&dataset).await?;
            print_json(&result)?;
        },
        Command::Checkpoint { source } => {
            let watermarks = pipeline.watermarks(&source).await?;
            print_json(&watermarks)?;
        },
    }

    info!("Done");
    Ok(())
}
