//! Error types shared across the bridgerun crates

use thiserror::Error;

/// Result type alias for shared operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Main error type for discovery, extraction and shared helpers
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl BridgeError {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an archive error
    pub fn archive(msg: impl Into<String>) -> Self {
        Self::Archive(msg.into())
    }

    /// Whether this error means the run must not start
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
