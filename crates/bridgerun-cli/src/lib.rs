//! Bridgerun CLI Library
//!
//! Drives an external SQL conversion tool over a folder of source files and
//! records what happened to every file.
//!
//! # Overview
//!
//! One `bridgerun run` walks each discovered item through a fixed chain of
//! stages:
//!
//! - **Extract**: flatten package archives (package dialect only)
//! - **Analyze**: one analyzer report per batch or package
//! - **Transpile**: convert each item with the external tool
//! - **Format**: rewrite rules and SQL re-rendering
//! - **GenerateArtifact**: wrap the SQL in a Databricks notebook
//! - **Publish**: import the notebook into the workspace
//!
//! Failures of one item never stop the others. Every run ends with a CSV and
//! JSON summary under `<target>/metadata/<YYYYMMDD>/`.

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod ledger;
pub mod notebook;
pub mod pipeline;
pub mod postprocess;
pub mod progress;
pub mod report;
pub mod runner;

// Re-export commonly used types
pub use config::{CliOverrides, ConfigSource, RunConfig};
pub use error::{CliError, Result};
pub use pipeline::{PipelineController, RunOutcome, RunSummary};

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Bridgerun - batch SQL migration driver
#[derive(Parser, Debug)]
#[command(name = "bridgerun")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print the command reference as markdown
    #[arg(long, hide = true)]
    pub markdown_help: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the migration pipeline
    Run(RunArgs),

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

/// Arguments shared by commands that resolve a run configuration
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub source: ConfigSource,

    #[command(flatten)]
    pub overrides: CliOverrides,
}

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the resolved configuration
    Show(RunArgs),

    /// Write a commented example config file
    Init {
        /// Where to write the file
        #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}
