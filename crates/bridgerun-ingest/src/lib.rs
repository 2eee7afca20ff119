//! Bridgerun Ingest Library
//!
//! Finds the work items a conversion run operates on.
//!
//! # Sources
//!
//! - **SQL trees**: `.sql` files under a root, flat or grouped per subfolder
//! - **Legacy packages**: `.zip` / `.ispac` / `.dtsx` inputs flattened into
//!   one directory of `.dtsx` files
//!
//! # Example
//!
//! ```no_run
//! use bridgerun_ingest::discovery::{Discovery, Layout};
//!
//! fn main() -> bridgerun_common::Result<()> {
//!     let plan = Discovery::new("./queries", "sql").layout(Layout::Auto).scan()?;
//!     println!("{} items", plan.item_count());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod discovery;
pub mod package;

pub use discovery::{discover_packages, Batch, Discovery, DiscoveryMode, DiscoveryPlan, Layout, SkippedFolder};
pub use package::{ExtractionReport, PackageExtractor};
