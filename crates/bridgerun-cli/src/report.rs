//! Report Writer
//!
//! Serializes a finalized ledger: a CSV summary (one row per item, one
//! status column per stage), a JSON file with the full outcomes, and a
//! console table.

use crate::error::Result;
use bridgerun_common::types::{ItemId, OutcomeStatus, StageKind, StageOutcome};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Finalized run results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub columns: Vec<StageKind>,
    pub rows: Vec<ReportRow>,
}

/// One item; `cells` line up with [`Report::columns`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub item: ItemId,
    pub cells: Vec<StageOutcome>,
}

/// Status counts for one column
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Where a report was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub csv: PathBuf,
    pub json: PathBuf,
}

impl Report {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, item: &ItemId) -> Option<&ReportRow> {
        self.rows.iter().find(|row| &row.item == item)
    }

    /// Outcome of `stage` for `item`
    pub fn cell(&self, item: &ItemId, stage: StageKind) -> Option<&StageOutcome> {
        let column = self.columns.iter().position(|c| *c == stage)?;
        self.row(item).and_then(|row| row.cells.get(column))
    }

    pub fn counts(&self, stage: StageKind) -> StatusCounts {
        let mut counts = StatusCounts::default();
        let Some(column) = self.columns.iter().position(|c| *c == stage) else {
            return counts;
        };
        for row in &self.rows {
            match row.cells.get(column).map(StageOutcome::status) {
                Some(OutcomeStatus::Success) => counts.success += 1,
                Some(OutcomeStatus::Failed) => counts.failed += 1,
                Some(OutcomeStatus::Skipped) => counts.skipped += 1,
                None => {},
            }
        }
        counts
    }

    /// Whether any cell failed
    pub fn has_failures(&self) -> bool {
        self.rows
            .iter()
            .flat_map(|row| row.cells.iter())
            .any(|cell| cell.status() == OutcomeStatus::Failed)
    }

    fn header(&self) -> Vec<String> {
        let mut header = vec!["Item".to_string()];
        header.extend(self.columns.iter().map(|c| format!("{} Status", c.title())));
        header.push("Notes".to_string());
        header
    }

    fn notes(&self, row: &ReportRow) -> String {
        self.columns
            .iter()
            .zip(&row.cells)
            .filter_map(|(stage, cell)| cell.detail().map(|d| format!("{}: {}", stage, d)))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Write the CSV summary
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(self.header())?;
        for row in &self.rows {
            let mut record = vec![row.item.to_string()];
            record.extend(row.cells.iter().map(|c| c.status().to_string()));
            record.push(self.notes(row));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Write the full outcomes as JSON
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// Write `<dir>/<prefix>_<timestamp>.csv` and `.json`
    pub fn write_all(&self, dir: &Path, prefix: &str, timestamp: &str) -> Result<ReportPaths> {
        std::fs::create_dir_all(dir)?;
        let stem = format!("{}_{}", prefix, timestamp);
        let paths = ReportPaths {
            csv: dir.join(format!("{}.csv", stem)),
            json: dir.join(format!("{}.json", stem)),
        };
        self.write_csv(&paths.csv)?;
        self.write_json(&paths.json)?;
        Ok(paths)
    }

    /// Console rendering
    pub fn render_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(self.header().into_iter().take(self.columns.len() + 1));

        for row in &self.rows {
            let mut cells = vec![Cell::new(row.item.as_str())];
            cells.extend(row.cells.iter().map(|outcome| {
                let color = match outcome.status() {
                    OutcomeStatus::Success => Color::Green,
                    OutcomeStatus::Failed => Color::Red,
                    OutcomeStatus::Skipped => Color::DarkGrey,
                };
                Cell::new(outcome.status().to_string()).fg(color)
            }));
            table.add_row(cells);
        }
        table
    }
}
