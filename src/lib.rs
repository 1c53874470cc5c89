//! `emergy-etl` downloads the EPA emergy (UEV library) workbook through a browser and loads
//! every sheet into a relational table whose schema is derived from the sheet itself.
//!
//! The primary entrypoint is [`pipeline::Pipeline::run`], which sequences the two stages:
//!
//! 1. [`download::DownloadOrchestrator`] drives a [`navigator::Navigator`] to the page, clicks
//!    the download link, waits for the file with [`readiness::ReadinessMonitor`] and renames it
//!    `dados_emergy_<DD-MM-YYYY_HH-MM-SS>.<ext>`
//! 2. [`ingestion::SchemaInferringLoader`] reads each sheet as text, provisions one table per
//!    non-empty sheet and inserts the rows, committing per sheet
//!
//! Every stage polls a shared [`cancel::CancellationToken`] at well-defined checkpoints, and
//! reports progress as [`status::StatusEvent`]s to a [`status::StatusSink`].
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use emergy_etl::config::PipelineOptions;
//! use emergy_etl::navigator::webdriver::WebDriverNavigator;
//! use emergy_etl::pipeline::{Pipeline, RunOutcome};
//! use emergy_etl::status::TracingSink;
//! use emergy_etl::store::SqliteStore;
//!
//! # fn main() -> Result<(), emergy_etl::PipelineError> {
//! let options = PipelineOptions::from_env()?;
//! let navigator = WebDriverNavigator::new(options.webdriver_url.clone())?;
//! let store = SqliteStore::new(options.store.database.clone());
//! let pipeline = Pipeline::new(options, Arc::new(navigator), Arc::new(store), Arc::new(TracingSink));
//!
//! match pipeline.run() {
//!     RunOutcome::Succeeded { report, .. } => println!("rows={}", report.total_rows()),
//!     RunOutcome::Cancelled => println!("cancelled"),
//!     RunOutcome::Failed(e) => eprintln!("failed: {e}"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`pipeline`]: run/cancel entry point and background worker
//! - [`download`]: browser-driven download and artifact rename
//! - [`readiness`]: polling for completed and unlocked files
//! - [`ingestion`]: workbook reading, cell sanitation, table loading
//! - [`navigator`], [`store`]: the browser and database capabilities
//! - [`status`]: status events and sinks
//! - [`config`], [`logging`]: configuration and logging bootstrap

pub mod cancel;
pub mod config;
pub mod download;
pub mod error;
pub mod ingestion;
pub mod logging;
pub mod navigator;
pub mod pipeline;
pub mod readiness;
pub mod status;
pub mod store;
pub mod types;

pub use cancel::CancellationToken;
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{Pipeline, PipelineWorker, RunOutcome};
