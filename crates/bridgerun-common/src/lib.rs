//! Bridgerun Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the bridgerun workspace.
//!
//! # Overview
//!
//! This crate provides functionality used by both the ingest tools and the
//! pipeline runner:
//!
//! - **Types**: Work items, stages and stage outcomes
//! - **Error Handling**: Shared error and result types
//! - **Logging**: Tracing subscriber setup (console, per-run files)
//! - **Checksums**: Content digests and short hashes for collision-safe names
//!
//! # Example
//!
//! ```no_run
//! use bridgerun_common::types::{StageKind, StageOutcome};
//!
//! let outcome = StageOutcome::failed("exit code 1");
//! println!("{}: {}", StageKind::Transpile, outcome);
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{BridgeError, Result};
pub use types::{ItemId, SkipReason, StageKind, StageOutcome, WorkItem};
