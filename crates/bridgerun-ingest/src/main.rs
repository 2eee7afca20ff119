//! Bridgerun Ingest - discovery and package extraction tool

use anyhow::{Context, Result};
use bridgerun_common::checksum::compute_file_checksum;
use bridgerun_common::logging::{init_logging, LogConfig, LogLevel};
use bridgerun_ingest::discovery::{discover_packages, Discovery, Layout};
use bridgerun_ingest::package::PackageExtractor;
use chrono::Local;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "bridgerun-ingest")]
#[command(author, version, about = "Bridgerun discovery and package extraction tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Flatten .zip / .ispac / .dtsx inputs into a directory of .dtsx files
    Extract {
        /// Archive, package, or directory of package inputs
        #[arg(short, long)]
        archive: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "./packages/extracted")]
        output: PathBuf,
    },

    /// List the work items a run would process
    Discover {
        /// Source file or directory
        #[arg(short, long)]
        source: PathBuf,

        /// Unit file extension
        #[arg(short, long, default_value = "sql")]
        extension: String,

        /// Layout: auto, flat or folders
        #[arg(short, long, default_value = "auto")]
        layout: Layout,

        /// Exclude subfolders modified yesterday
        #[arg(long)]
        skip_modified_yesterday: bool,
    },

    /// List the package units in an extraction directory
    Packages {
        /// Extraction directory
        #[arg(short, long, default_value = "./packages/extracted")]
        dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("bridgerun-ingest")
        .build()
        .with_env_overrides()?;

    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Extract { archive, output } => {
            info!("Extracting packages from {}", archive.display());
            let extractor = PackageExtractor::new(&output);
            let report = extractor
                .extract_all(&archive)
                .context("Package extraction failed")?;
            info!("Extracted into {}", extractor.destination().display());
            println!("{}", serde_json::to_string_pretty(&report)?);
        },
        Command::Discover {
            source,
            extension,
            layout,
            skip_modified_yesterday,
        } => {
            let mut discovery = Discovery::new(&source, extension).layout(layout);
            if skip_modified_yesterday {
                if let Some(yesterday) = Local::now().date_naive().pred_opt() {
                    discovery = discovery.skip_modified_on(yesterday);
                }
            }
            let plan = discovery.scan().context("Discovery failed")?;
            info!(items = plan.item_count(), mode = ?plan.mode, "Discovery complete");
            for batch in &plan.batches {
                for item in &batch.items {
                    println!("{}", item.id);
                }
            }
            for folder in &plan.skipped {
                for id in &folder.item_ids {
                    println!("{}\t(skipped: modified-yesterday)", id);
                }
            }
            for warning in &plan.warnings {
                eprintln!("warning: {}", warning);
            }
        },
        Command::Packages { dir } => {
            let items = discover_packages(&dir).context("Package listing failed")?;
            for item in &items {
                let checksum = compute_file_checksum(&item.source_path)?;
                println!("{}\t{}\t{}", item.id, short(&checksum), item.source_path.display());
            }
            info!(count = items.len(), "Listed packages");
        },
    }

    info!("Ingest complete");
    Ok(())
}

fn short(checksum: &str) -> &str {
    checksum.get(..12).unwrap_or(checksum)
}
