//! Bridgerun CLI - Main entry point

use bridgerun_cli::{Cli, Commands, ConfigCommand};
use bridgerun_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use clap::Parser;
use colored::Colorize;
use std::process;
use tracing::error;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Values from a local .env feed the BRIDGERUN_* flags
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Handle markdown help generation
    if cli.markdown_help {
        println!("{}", clap_markdown::help_markdown::<Cli>());
        return;
    }

    // Ensure a command is provided
    let Some(command) = &cli.command else {
        eprintln!("Error: A subcommand is required");
        eprintln!();
        eprintln!("For more information, try '--help'.");
        process::exit(2);
    };

    // `run` sets up its own logging once the target folder is known
    let _guard = if matches!(command, Commands::Run(_)) {
        None
    } else {
        let level = if cli.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Warn
        };
        let log_config = LogConfig::builder()
            .level(level)
            .output(LogOutput::Console)
            .log_file_prefix("bridgerun")
            .build();
        let log_config = log_config.clone().with_env_overrides().unwrap_or(log_config);
        // The CLI works without logging
        init_logging(&log_config).ok()
    };

    if let Err(e) = execute_command(command, cli.verbose).await {
        error!(error = %e, "Command failed");
        eprintln!("{} {}", "✗".red(), e);
        process::exit(e.exit_code());
    }
}

/// Execute the CLI command
async fn execute_command(command: &Commands, verbose: bool) -> bridgerun_cli::Result<()> {
    match command {
        Commands::Run(args) => bridgerun_cli::commands::run::run(args, verbose).await,

        Commands::Config { command } => match command {
            ConfigCommand::Show(args) => bridgerun_cli::commands::config::show(args).await,
            ConfigCommand::Init { path, force } => bridgerun_cli::commands::config::init(path, *force),
        },
    }
}
