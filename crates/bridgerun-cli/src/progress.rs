//! Console progress output
//!
//! Spinners for external commands and colored per-stage result lines.

use bridgerun_common::types::{StageKind, StageOutcome};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

/// Create a spinner for an external command
///
/// Hidden automatically when stderr is not a terminal.
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg} [{elapsed}]")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Print a section banner
pub fn banner(title: &str) {
    println!();
    println!("{}", format!("==> {}", title).cyan().bold());
}

/// One line describing an outcome
pub fn outcome_line(stage: StageKind, item: &str, outcome: &StageOutcome) -> String {
    match outcome {
        StageOutcome::Success => format!("{} {} {}", "✓".green(), stage.title(), item),
        StageOutcome::Failed { reason } => {
            format!("{} {} {}: {}", "✗".red(), stage.title(), item, reason.red())
        },
        StageOutcome::Skipped { reason } => format!(
            "{} {} {} {}",
            "→".dimmed(),
            stage.title().dimmed(),
            item.dimmed(),
            format!("(skipped: {})", reason).dimmed()
        ),
    }
}

pub fn print_outcome(stage: StageKind, item: &str, outcome: &StageOutcome) {
    println!("  {}", outcome_line(stage, item, outcome));
}

pub fn warning(message: &str) {
    println!("{} {}", "⚠".yellow(), message.yellow());
}
