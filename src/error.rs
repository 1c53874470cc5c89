use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::status::Severity;
use crate::store::StoreError;

/// Convenience result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Error type returned by every pipeline stage.
///
/// This is a single error enum shared by the readiness monitor, the download orchestrator, the
/// loader and the controller. [`PipelineError::Cancelled`] is the expected outcome of a cancel
/// request and is reported separately from true failures (see [`PipelineError::is_cancelled`]).
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Underlying I/O error (e.g. directory not readable, permission denied).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The downloaded workbook could not be opened or a sheet could not be read.
    #[error("excel error: {0}")]
    Excel(#[from] calamine::Error),

    /// A bounded polling loop gave up.
    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout { what: String, waited: Duration },

    /// The download trigger never became clickable.
    #[error("element not found: {locator} (waited {waited:?})")]
    ElementNotFound { locator: String, waited: Duration },

    /// The browser driver rejected a command or could not be reached.
    #[error("navigator error: {message}")]
    Navigator { message: String },

    /// A stale file in the download directory could not be removed.
    #[error("failed to remove '{}': {source}", path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The completed download could not be renamed to its timestamped name.
    #[error("failed to rename '{}' to '{}': {source}", from.display(), to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The relational store could not be reached.
    #[error("store connection failed: {0}")]
    Connection(#[source] StoreError),

    /// The create-if-absent statement for a sheet's table failed.
    #[error("failed to provision table '{table}': {source}")]
    SchemaProvision {
        table: String,
        #[source]
        source: StoreError,
    },

    /// A row could not be inserted. Carries the offending values for the log.
    #[error("failed to insert row {row} into '{table}': {source} (values={values:?})")]
    RowInsert {
        table: String,
        row: usize,
        values: Vec<String>,
        #[source]
        source: StoreError,
    },

    /// Any other store failure (commit, close).
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid or unreadable configuration.
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// A broken internal invariant (e.g. the worker thread panicked).
    #[error("internal error: {message}")]
    Internal { message: String },

    /// Cancellation was requested and observed at a checkpoint.
    #[error("cancelled")]
    Cancelled,
}

impl PipelineError {
    /// `true` for the expected cancellation outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }

    /// Severity used when the error is reported as a status event.
    pub fn severity(&self) -> Severity {
        match self {
            PipelineError::Cancelled => Severity::Warning,
            _ => Severity::Error,
        }
    }

    pub(crate) fn navigator(message: impl Into<String>) -> Self {
        PipelineError::Navigator {
            message: message.into(),
        }
    }
}
