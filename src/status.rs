//! Status events and the sinks that consume them.
//!
//! The core emits a [`StatusEvent`] at every major transition. Sinks decide what to do with it:
//! log it ([`TracingSink`]), append it to a file ([`FileSink`]), hand it to a presentation layer
//! ([`ChannelSink`]) or fan it out ([`CompositeSink`]).

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};

/// Severity of a status event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Progress information.
    Info,
    /// Something was skipped or the run was cancelled.
    Warning,
    /// A stage failed.
    Error,
    /// The run finished and the data is loaded.
    Success,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Success => "SUCCESS",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which part of the pipeline produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pipeline,
    Download,
    Load,
}

/// A single status update. Emitted, never stored by the core.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEvent {
    pub severity: Severity,
    pub stage: Stage,
    pub message: String,
    /// Rough overall progress (0..=100) when the event marks a milestone.
    pub progress: Option<u8>,
    pub timestamp: DateTime<Local>,
}

impl StatusEvent {
    pub fn new(severity: Severity, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            severity,
            stage,
            message: message.into(),
            progress: None,
            timestamp: Local::now(),
        }
    }

    pub fn info(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, stage, message)
    }

    pub fn warning(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, stage, message)
    }

    pub fn error(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, stage, message)
    }

    pub fn success(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(Severity::Success, stage, message)
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    /// `YYYY-MM-DD HH:MM:SS | LEVEL | message`
    pub fn to_line(&self) -> String {
        format!(
            "{} | {} | {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.severity,
            self.message
        )
    }
}

/// Consumer of status events.
pub trait StatusSink: Send + Sync {
    fn emit(&self, event: &StatusEvent);
}

/// A sink that fans out events to a list of sinks.
#[derive(Default)]
pub struct CompositeSink {
    sinks: Vec<Arc<dyn StatusSink>>,
}

impl CompositeSink {
    pub fn new(sinks: Vec<Arc<dyn StatusSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn StatusSink>) {
        self.sinks.push(sink);
    }
}

impl fmt::Debug for CompositeSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeSink")
            .field("sinks_len", &self.sinks.len())
            .finish()
    }
}

impl StatusSink for CompositeSink {
    fn emit(&self, event: &StatusEvent) {
        for s in &self.sinks {
            s.emit(event);
        }
    }
}

/// Forwards events into `tracing` at the matching level.
#[derive(Debug, Default)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn emit(&self, event: &StatusEvent) {
        let stage = event.stage;
        match event.severity {
            Severity::Info => tracing::info!(?stage, progress = ?event.progress, "{}", event.message),
            Severity::Success => {
                tracing::info!(?stage, progress = ?event.progress, status = "success", "{}", event.message)
            }
            Severity::Warning => tracing::warn!(?stage, "{}", event.message),
            Severity::Error => tracing::error!(?stage, "{}", event.message),
        }
    }
}

/// Appends events to a local file, one line per event.
///
/// Writes are best-effort; failures to open/write the file are ignored.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn append_line(&self, line: &str) {
        let _guard = self.lock.lock().ok();
        if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(f, "{line}");
        }
    }
}

impl StatusSink for FileSink {
    fn emit(&self, event: &StatusEvent) {
        self.append_line(&event.to_line());
    }
}

/// Hands events to another thread (typically a presentation layer).
///
/// A disconnected receiver is not an error: the pipeline keeps running.
#[derive(Debug)]
pub struct ChannelSink {
    tx: Mutex<Sender<StatusEvent>>,
}

impl ChannelSink {
    pub fn new(tx: Sender<StatusEvent>) -> Self {
        Self { tx: Mutex::new(tx) }
    }
}

impl StatusSink for ChannelSink {
    fn emit(&self, event: &StatusEvent) {
        if let Ok(tx) = self.tx.lock() {
            let _ = tx.send(event.clone());
        }
    }
}
