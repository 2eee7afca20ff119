//! `bridgerun config` command implementation
//!
//! Shows the resolved configuration and writes the example file.

use crate::config::{default_prompter, RunConfig, EXAMPLE_CONFIG};
use crate::error::{CliError, Result};
use crate::RunArgs;
use colored::Colorize;
use std::path::Path;

/// Show the resolved configuration as YAML
pub async fn show(args: &RunArgs) -> Result<()> {
    let prompter = default_prompter();
    let config = RunConfig::load(&args.source, &args.overrides, prompter.as_ref()).await?;

    println!("{}", "Resolved configuration:".cyan().bold());
    println!();
    print!("{}", render(&config)?);
    Ok(())
}

/// Write the example configuration to `path`
pub fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(CliError::configuration(format!(
            "{} already exists. Use --force to overwrite",
            path.display()
        )));
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, EXAMPLE_CONFIG)?;

    println!("{} Wrote {}", "✓".green(), path.display());
    println!();
    println!("Next steps:");
    println!("  1. Set source_path, target_path and dialect");
    println!("  2. Run 'bridgerun run'");
    Ok(())
}

fn render(config: &RunConfig) -> Result<String> {
    Ok(serde_yaml::to_string(config)?)
}
