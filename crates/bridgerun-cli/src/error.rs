//! Error types for the bridgerun CLI
//!
//! User-facing errors with clear, actionable messages. Three kinds matter to
//! the run itself:
//!
//! - [`CliError::Configuration`]: the run never starts
//! - [`CliError::StageFailure`]: an external command failed and the stage does
//!   not tolerate failure, so the run aborts
//! - [`CliError::ItemProcessing`]: one item's local files could not be
//!   handled; recorded for that item, the run continues

use bridgerun_common::BridgeError;
use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

/// Process exit code for configuration errors
pub const EXIT_CONFIGURATION: i32 = 2;

/// Process exit code for a fatal stage failure
pub const EXIT_STAGE_FAILURE: i32 = 3;

/// Comprehensive error type for CLI operations
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration is missing or invalid, or a required tool is absent
    #[error("Configuration error: {0}. Check config.yaml, the command-line flags, or run 'bridgerun config init'.")]
    Configuration(String),

    /// An external command failed and the stage is fatal
    #[error("{title} failed: {reason}")]
    StageFailure { title: String, reason: String },

    /// One item's local files could not be processed
    #[error("Failed to process '{item}': {reason}")]
    ItemProcessing { item: String, reason: String },

    /// File system operation failed
    #[error("File operation failed: {0}. Check file permissions and disk space.")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("Network request failed: {0}. Check your internet connection or use --offline.")]
    Http(#[from] reqwest::Error),

    /// YAML parsing failed
    #[error("Failed to parse YAML: {0}. Check the file syntax at the indicated line/column.")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON serialization failed
    #[error("Failed to write JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// CSV report could not be written
    #[error("Failed to write CSV report: {0}")]
    Csv(#[from] csv::Error),

    /// Error from discovery or extraction
    #[error(transparent)]
    Common(#[from] BridgeError),

    /// A ledger cell was written twice
    #[error("Status ledger error: {0}")]
    Ledger(#[from] crate::ledger::LedgerError),

    /// Generic anyhow error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a stage failure
    pub fn stage_failure(title: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StageFailure {
            title: title.into(),
            reason: reason.into(),
        }
    }

    /// Create an item processing error
    pub fn item_processing(item: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ItemProcessing {
            item: item.into(),
            reason: reason.into(),
        }
    }

    /// Whether the run must not start because of this error
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::Configuration(_) => true,
            Self::Common(inner) => inner.is_configuration(),
            _ => false,
        }
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        if self.is_configuration() {
            EXIT_CONFIGURATION
        } else if matches!(self, Self::StageFailure { .. }) {
            EXIT_STAGE_FAILURE
        } else {
            1
        }
    }
}
