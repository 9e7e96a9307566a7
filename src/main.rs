//! CLI entry point for the snap large-test harness
//!
//! # Usage
//!
//! Run the meminfo large test (downloads binaries first):
//! ```bash
//! PLUGINS_DIR=/tmp/plugins SNAP_DIR=/tmp/snap PROJECT_DIR=. snap-large run
//! ```
//!
//! Only fetch the binaries:
//! ```bash
//! snap-large download --force
//! ```
//!
//! The exit status of `run` is the number of failed tests.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use snap_harness::config::HarnessConfig;
use snap_harness::download::{self, DownloadOptions, DownloadOutcome};
use snap_harness::logging::{self, OutputFormat};
use snap_harness::scenario;
use snap_harness::{BinarySet, LargeTest};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "snap-large")]
#[command(about = "Large tests for snap plugins against a live snapd", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./snap-harness.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Override the configured log format: pretty, compact or json
    #[arg(long, global = true)]
    log_format: Option<OutputFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download binaries, start snapd and run the meminfo large test
    Run {
        /// Use binaries already in place
        #[arg(long)]
        skip_download: bool,

        /// Re-download binaries even if present
        #[arg(long, conflicts_with = "skip_download")]
        force_download: bool,
    },

    /// Download snapd, snapctl and the plugins only
    Download {
        /// Re-download binaries even if present
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => HarnessConfig::load_from(path)?,
        None => HarnessConfig::load()?,
    };
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }
    config.validate()?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Run {
            skip_download,
            force_download,
        } => {
            let download = (!skip_download).then(|| DownloadOptions {
                force: force_download,
                ..Default::default()
            });
            run_large_test(&config, download).await
        }
        Commands::Download { force } => {
            download_only(&config, force).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::ShowConfig => {
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render configuration")?;
            print!("{rendered}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_large_test(
    config: &HarnessConfig,
    download: Option<DownloadOptions>,
) -> Result<ExitCode> {
    let mut test = LargeTest::new(config)?;

    let outcome = test.run(download).await;
    match &outcome {
        Ok(report) => tracing::info!(
            task = %report.task_id,
            hits = report.hits,
            metrics = report.metrics,
            "meminfo large test passed"
        ),
        Err(e) if e.is_check_failure() => tracing::error!("meminfo large test failed: {}", e),
        Err(_) => {}
    }

    let failed = scenario::failed_tests(outcome).context("meminfo large test could not run")?;
    Ok(ExitCode::from(failed))
}

async fn download_only(config: &HarnessConfig, force: bool) -> Result<()> {
    let set = BinarySet::from_config(config)?;
    let options = DownloadOptions {
        force,
        ..Default::default()
    };

    for (binary, outcome) in download::download_binaries(&set, options).await? {
        match outcome {
            DownloadOutcome::Fetched(bytes) => {
                println!("fetched  {} ({} bytes)", binary.path().display(), bytes)
            }
            DownloadOutcome::Cached => println!("present  {}", binary.path().display()),
        }
    }
    Ok(())
}
