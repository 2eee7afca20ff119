//! SQL post-processing (the Format stage)
//!
//! Literal rewrite rules first, then an optional re-render through
//! `sqlparser`. SQL that does not parse is kept as rewritten.

use crate::error::{CliError, Result};
use serde::{Deserialize, Serialize};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Replace every occurrence of `from` with `to`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteRule {
    pub from: String,
    pub to: String,
}

impl RewriteRule {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SqlPostProcessor {
    rules: Vec<RewriteRule>,
    reformat: bool,
}

impl SqlPostProcessor {
    pub fn new(rules: Vec<RewriteRule>, reformat: bool) -> Self {
        Self { rules, reformat }
    }

    pub fn process(&self, text: &str) -> String {
        let rewritten = self
            .rules
            .iter()
            .filter(|rule| !rule.from.is_empty())
            .fold(text.to_string(), |acc, rule| acc.replace(&rule.from, &rule.to));

        if !self.reformat {
            return rewritten;
        }

        match Parser::parse_sql(&GenericDialect {}, &rewritten) {
            Ok(statements) if !statements.is_empty() => {
                let mut out = statements
                    .iter()
                    .map(|s| format!("{};", s))
                    .collect::<Vec<_>>()
                    .join("\n\n");
                out.push('\n');
                out
            },
            Ok(_) => rewritten,
            Err(e) => {
                debug!(error = %e, "SQL did not parse, keeping rewritten text");
                rewritten
            },
        }
    }

    /// Process `input` into `<output_dir>/<file name>`
    pub fn format_file(&self, input: &Path, output_dir: &Path) -> Result<PathBuf> {
        let name = input
            .file_name()
            .ok_or_else(|| CliError::item_processing(input.display().to_string(), "no file name"))?;
        let item = name.to_string_lossy().into_owned();

        let bytes = std::fs::read(input).map_err(|e| CliError::item_processing(&item, e.to_string()))?;
        let processed = self.process(&String::from_utf8_lossy(&bytes));

        std::fs::create_dir_all(output_dir).map_err(|e| CliError::item_processing(&item, e.to_string()))?;
        let output = output_dir.join(name);
        std::fs::write(&output, processed).map_err(|e| CliError::item_processing(&item, e.to_string()))?;
        Ok(output)
    }
}
