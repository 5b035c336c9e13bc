//! # actilyze-core
//!
//! Core library for actilyze - runs an external accelerometer analysis
//! script and reconstructs its sleep and activity results.
//!
//! This library provides:
//! - Domain types for snapshots, records and tags
//! - Interpreter discovery with persisted state ([`runtime`])
//! - A self-calibrating run duration estimate ([`estimate`])
//! - Cancellable out-of-process execution ([`runner`])
//! - The snapshot codec and report envelope ([`codec`])
//! - Output directory ingestion ([`ingest`])
//! - Configuration management and logging infrastructure
//!
//! ## Example
//!
//! ```rust,no_run
//! use actilyze_core::{Config, ResultIngestor};
//! use std::path::Path;
//!
//! # async fn run() -> actilyze_core::Result<()> {
//! let config = Config::load()?;
//! let ingestor = ResultIngestor::new(&config.ingest);
//! let report = ingestor.ingest(Path::new("output")).await?;
//! for snapshot in &report.snapshots {
//!     println!("{}: {} nights", snapshot.file_name, snapshot.sleep_records.len());
//! }
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use error::{Error, Result};
pub use estimate::DurationEstimator;
pub use ingest::{Classification, IngestReport, ResultIngestor};
pub use runner::{ExecutionRequest, ExecutionResult, ProcessRunner, ScriptArg};
pub use runtime::{Platform, RuntimeLocator};
pub use types::*;

// Public modules
pub mod codec;
pub mod config;
pub mod error;
pub mod estimate;
pub mod ingest;
pub mod logging;
pub mod runner;
pub mod runtime;
pub mod types;
