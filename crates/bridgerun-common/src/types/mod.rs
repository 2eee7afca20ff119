//! Common types used across bridgerun

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ============================================================================
// Work Items
// ============================================================================

/// Identity of a work item: its `/`-separated path relative to the source
/// root, or the extracted file name for legacy packages.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build an id from a path relative to `root`
    ///
    /// Falls back to the file name when `path` is not under `root`.
    pub fn from_relative(root: &Path, path: &Path) -> Self {
        let relative = path.strip_prefix(root).unwrap_or(path);
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Self(parts.join("/"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A convertible unit discovered under the source root
///
/// Immutable once discovered within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Identity used as the ledger key
    pub id: ItemId,

    /// Absolute or root-joined path of the unit on disk
    pub source_path: PathBuf,

    /// Owning subfolder name in per-folder mode
    pub folder: Option<String>,

    /// When discovery saw the item
    pub discovered_at: DateTime<Local>,
}

impl WorkItem {
    pub fn new(id: ItemId, source_path: PathBuf, folder: Option<String>) -> Self {
        Self {
            id,
            source_path,
            folder,
            discovered_at: Local::now(),
        }
    }

    /// File name of the unit (`orders.sql`)
    pub fn file_name(&self) -> String {
        self.source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.id.to_string())
    }

    /// File stem of the unit (`orders`)
    pub fn file_stem(&self) -> String {
        self.source_path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.id.to_string())
    }
}

// ============================================================================
// Stages
// ============================================================================

/// One named phase of the conversion pipeline, in execution order
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Extract,
    Analyze,
    Transpile,
    Format,
    GenerateArtifact,
    Publish,
}

impl StageKind {
    /// Every stage in pipeline order
    pub const ALL: [StageKind; 6] = [
        StageKind::Extract,
        StageKind::Analyze,
        StageKind::Transpile,
        StageKind::Format,
        StageKind::GenerateArtifact,
        StageKind::Publish,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Extract => "extract",
            StageKind::Analyze => "analyze",
            StageKind::Transpile => "transpile",
            StageKind::Format => "format",
            StageKind::GenerateArtifact => "generate_artifact",
            StageKind::Publish => "publish",
        }
    }

    /// Human-readable title used in report headers
    pub fn title(self) -> &'static str {
        match self {
            StageKind::Extract => "Extract",
            StageKind::Analyze => "Analyzer",
            StageKind::Transpile => "Transpile",
            StageKind::Format => "Post-process",
            StageKind::GenerateArtifact => "Notebook",
            StageKind::Publish => "Publish",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StageKind {
    type Err = crate::BridgeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "extract" => Ok(StageKind::Extract),
            "analyze" | "analyzer" => Ok(StageKind::Analyze),
            "transpile" | "transpiler" => Ok(StageKind::Transpile),
            "format" => Ok(StageKind::Format),
            "generate_artifact" | "notebook" => Ok(StageKind::GenerateArtifact),
            "publish" | "upload" => Ok(StageKind::Publish),
            _ => Err(crate::BridgeError::Parse(format!("Unknown stage: {}", s))),
        }
    }
}

// ============================================================================
// Stage Outcomes
// ============================================================================

/// Why a stage was not run for an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// The stage is switched off in the run configuration
    StageDisabled,
    /// The owning folder was modified yesterday and filtered out
    ModifiedYesterday,
    /// The previous stage produced nothing for this stage to consume
    NoUpstreamArtifact,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::StageDisabled => "stage disabled",
            SkipReason::ModifiedYesterday => "modified-yesterday",
            SkipReason::NoUpstreamArtifact => "no upstream artifact",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one stage for one item. Recorded once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome {
    Success,
    Failed { reason: String },
    Skipped { reason: SkipReason },
}

/// Report-level status of an outcome, without its detail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutcomeStatus {
    Success,
    Failed,
    Skipped,
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutcomeStatus::Success => write!(f, "Success"),
            OutcomeStatus::Failed => write!(f, "Failed"),
            OutcomeStatus::Skipped => write!(f, "Skipped"),
        }
    }
}

impl StageOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn skipped(reason: SkipReason) -> Self {
        Self::Skipped { reason }
    }

    pub fn status(&self) -> OutcomeStatus {
        match self {
            StageOutcome::Success => OutcomeStatus::Success,
            StageOutcome::Failed { .. } => OutcomeStatus::Failed,
            StageOutcome::Skipped { .. } => OutcomeStatus::Skipped,
        }
    }

    /// Reason text for failed or skipped outcomes
    pub fn detail(&self) -> Option<String> {
        match self {
            StageOutcome::Success => None,
            StageOutcome::Failed { reason } => Some(reason.clone()),
            StageOutcome::Skipped { reason } => Some(reason.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageOutcome::Success)
    }
}

impl std::fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageOutcome::Success => write!(f, "Success"),
            StageOutcome::Failed { reason } => write!(f, "Failed({})", reason),
            StageOutcome::Skipped { reason } => write!(f, "Skipped({})", reason),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_item_id_from_relative() {
        let root = Path::new("/data/src");
        let id = ItemId::from_relative(root, Path::new("/data/src/sales/orders.sql"));
        assert_eq!(id.as_str(), "sales/orders.sql");

        let outside = ItemId::from_relative(root, Path::new("orders.sql"));
        assert_eq!(outside.as_str(), "orders.sql");
    }

    #[test]
    fn test_stage_order_follows_pipeline() {
        let mut stages = vec![StageKind::Publish, StageKind::Analyze, StageKind::Format];
        stages.sort();
        assert_eq!(stages, vec![StageKind::Analyze, StageKind::Format, StageKind::Publish]);
        assert!(StageKind::Extract < StageKind::Analyze);
    }

    #[test]
    fn test_stage_from_str() {
        assert_eq!("Transpile".parse::<StageKind>().unwrap(), StageKind::Transpile);
        assert_eq!("generate_artifact".parse::<StageKind>().unwrap(), StageKind::GenerateArtifact);
        assert!("compile".parse::<StageKind>().is_err());
    }

    #[test]
    fn test_outcome_display_and_status() {
        let skipped = StageOutcome::skipped(SkipReason::ModifiedYesterday);
        assert_eq!(skipped.to_string(), "Skipped(modified-yesterday)");
        assert_eq!(skipped.status(), OutcomeStatus::Skipped);

        let failed = StageOutcome::failed("exit code 2");
        assert_eq!(failed.to_string(), "Failed(exit code 2)");
        assert_eq!(failed.detail().as_deref(), Some("exit code 2"));

        assert_eq!(StageOutcome::Success.detail(), None);
    }

    #[test]
    fn test_outcome_serializes_tagged() {
        let json = serde_json::to_value(StageOutcome::skipped(SkipReason::StageDisabled)).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "stage-disabled");
    }
}
