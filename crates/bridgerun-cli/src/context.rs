//! Per-run context and the durable failure log

use crate::error::Result;
use chrono::{DateTime, Local, NaiveDate};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Timestamp format used in per-run file names
pub const RUN_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Whether a logged failure aborted the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Fatal,
    NonFatal,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Fatal => write!(f, "FATAL"),
            Severity::NonFatal => write!(f, "NON-FATAL"),
        }
    }
}

/// Append-only failure log, one line per failure
///
/// Each line is synced to disk before returning.
#[derive(Debug, Clone)]
pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, severity: Severity, title: &str, reason: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(
            file,
            "{} [{}] {}: {}",
            Local::now().to_rfc3339(),
            severity,
            title,
            reason
        )?;
        file.sync_data()?;
        Ok(())
    }
}

/// Everything a run derives once at startup
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Local>,
    pub run_date: NaiveDate,
    /// `%Y%m%d_%H%M%S` of `started_at`, used in file names
    pub timestamp: String,
    pub target_dir: PathBuf,
    /// `<target>/metadata/<YYYYMMDD>`
    pub metadata_dir: PathBuf,
    pub run_log: RunLog,
}

impl RunContext {
    pub fn new(target_dir: &Path) -> Result<Self> {
        Self::at(target_dir, Local::now())
    }

    /// Build a context for a run started at `started_at`
    pub fn at(target_dir: &Path, started_at: DateTime<Local>) -> Result<Self> {
        let timestamp = started_at.format(RUN_TIMESTAMP_FORMAT).to_string();
        let metadata_dir = target_dir
            .join("metadata")
            .join(started_at.format("%Y%m%d").to_string());
        std::fs::create_dir_all(&metadata_dir)?;

        let run_log = RunLog::new(metadata_dir.join(format!("bridgerun_failures_{}.txt", timestamp)));

        Ok(Self {
            run_id: Uuid::new_v4(),
            started_at,
            run_date: started_at.date_naive(),
            timestamp,
            target_dir: target_dir.to_path_buf(),
            metadata_dir,
            run_log,
        })
    }

    /// The day before the run started
    pub fn yesterday(&self) -> Option<NaiveDate> {
        self.run_date.pred_opt()
    }
}
