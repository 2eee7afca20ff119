//! `bridgerun run` command implementation
//!
//! Resolves the configuration, sets up the run's log file and drives the
//! pipeline.

use crate::config::{default_prompter, RunConfig};
use crate::context::RunContext;
use crate::error::{CliError, Result};
use crate::pipeline::{PipelineController, RunOutcome, RunSummary};
use crate::runner::{ProcessLauncher, StageRunner};
use crate::RunArgs;
use bridgerun_common::logging::{init_logging, LogConfig, LogLevel, LogOutput, LogRotation};
use colored::Colorize;
use std::sync::Arc;
use tracing::info;

/// Run the pipeline
pub async fn run(args: &RunArgs, verbose: bool) -> Result<()> {
    let prompter = default_prompter();
    let config = RunConfig::load(&args.source, &args.overrides, prompter.as_ref()).await?;

    if config.nothing_to_run() {
        println!(
            "{} Analyzer and transpiler are both disabled; nothing to run.",
            "ℹ".cyan()
        );
        return Ok(());
    }

    let context = RunContext::new(&config.target_path)?;

    // Held until the run returns; main exits the process without unwinding
    let _guard = init_run_logging(&context, verbose)?;

    info!(run_id = %context.run_id, "Configuration resolved");
    println!("{} {}", "Run".cyan().bold(), context.timestamp);
    println!("  Source:  {}", config.source_path.display());
    println!("  Target:  {}", config.target_path.display());
    println!("  Dialect: {}", config.dialect);

    let runner = StageRunner::new(Arc::new(ProcessLauncher), context.run_log.clone());
    let summary = PipelineController::new(config, context, runner).run().await?;

    print_summary(&summary);
    Ok(())
}

fn init_run_logging(context: &RunContext, verbose: bool) -> Result<bridgerun_common::logging::LogGuard> {
    let (level, output) = if verbose {
        (LogLevel::Debug, LogOutput::Both)
    } else {
        (LogLevel::Info, LogOutput::File)
    };

    let log_config = LogConfig::builder()
        .level(level)
        .output(output)
        .rotation(LogRotation::Never)
        .log_dir(&context.metadata_dir)
        .log_file_prefix("bridgerun_run")
        .run_timestamp(&context.timestamp)
        .filter_directives("reqwest=warn,hyper=warn")
        .build()
        .with_env_overrides()?;

    init_logging(&log_config).map_err(CliError::Other)
}

fn print_summary(summary: &RunSummary) {
    if summary.outcome == RunOutcome::NothingToRun {
        return;
    }

    let Some(report) = &summary.report else {
        return;
    };

    println!();
    if report.is_empty() {
        println!("No items were processed.");
    } else {
        println!("{}", report.render_table());
    }

    println!();
    println!("{}", "Summary:".cyan().bold());
    for stage in &report.columns {
        let counts = report.counts(*stage);
        println!(
            "  {:<14} {} succeeded, {} failed, {} skipped",
            format!("{}:", stage.title()),
            counts.success.to_string().green(),
            counts.failed.to_string().red(),
            counts.skipped
        );
    }

    if let Some(paths) = &summary.report_paths {
        println!();
        println!("  Report: {}", paths.csv.display());
        println!("  JSON:   {}", paths.json.display());
    }

    if report.has_failures() {
        println!();
        println!(
            "{} Some items failed; see the Notes column and the run log.",
            "⚠".yellow()
        );
    } else {
        println!();
        println!("{} Run completed", "✓".green());
    }
}
