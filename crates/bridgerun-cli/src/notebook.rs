//! Databricks notebook generation (the GenerateArtifact stage)

use crate::error::{CliError, Result};
use bridgerun_common::checksum::hashed_file_name;
use bridgerun_common::types::WorkItem;
use std::path::Path;

/// Python notebook running `sql` through `spark.sql`
pub fn render_notebook(source_name: &str, sql: &str) -> String {
    let escaped = sql.replace('\\', "\\\\").replace("\"\"\"", "\\\"\\\"\\\"");
    format!(
        "# Databricks notebook source\n\
         \"\"\"\n\
         Auto-generated from {source_name}\n\
         \"\"\"\n\
         \n\
         sql_query = \"\"\"\n\
         {sql}\n\
         \"\"\"\n\
         \n\
         display(spark.sql(sql_query))\n",
        source_name = source_name,
        sql = escaped.trim_end(),
    )
}

/// Notebook file name for an item
///
/// `hashed` appends a short hash of the item id so equal file names from
/// different folders stay distinct in the workspace.
pub fn notebook_file_name(item: &WorkItem, stem: &str, hashed: bool) -> String {
    if hashed {
        hashed_file_name(stem, item.id.as_str(), "py")
    } else {
        format!("{}.py", stem)
    }
}

/// Render the notebook for `sql_path` into `output`
pub fn write_notebook(sql_path: &Path, output: &Path) -> Result<()> {
    let item = sql_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| sql_path.display().to_string());

    let bytes = std::fs::read(sql_path).map_err(|e| CliError::item_processing(&item, e.to_string()))?;
    let notebook = render_notebook(&item, &String::from_utf8_lossy(&bytes));

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CliError::item_processing(&item, e.to_string()))?;
    }
    std::fs::write(output, notebook).map_err(|e| CliError::item_processing(&item, e.to_string()))?;
    Ok(())
}
