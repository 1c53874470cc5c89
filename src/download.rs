//! Download orchestration.
//!
//! Drives a [`Navigator`] end to end: prepare the download directory, open the page, click the
//! download link, wait for the file via the [`ReadinessMonitor`], then give it a timestamped
//! name. The browser session is held by a [`SessionGuard`], so it is quit on every exit path.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use tracing::{error, info, warn};

use crate::cancel::CancellationToken;
use crate::config::DownloadOptions;
use crate::error::{PipelineError, PipelineResult};
use crate::navigator::{BrowserOptions, Navigator, SessionGuard};
use crate::readiness::{ReadinessMonitor, list_files};
use crate::status::{Stage, StatusEvent, StatusSink};
use crate::types::ArtifactDescriptor;

/// Where a download run currently is.
///
/// `Cancelled` is absorbing: it can be entered from any state in which the token is polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Idle,
    NavigatorConfigured,
    PageLoaded,
    DownloadTriggered,
    DownloadConfirmed,
    Renamed,
    Done,
    Cancelled,
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Timestamped artifact name: `<prefix>_<DD-MM-YYYY_HH-MM-SS>.<ext>`.
pub fn artifact_file_name(prefix: &str, extension: &str) -> String {
    let stamp = Local::now().format("%d-%m-%Y_%H-%M-%S");
    if extension.is_empty() {
        format!("{prefix}_{stamp}")
    } else {
        format!("{prefix}_{stamp}.{extension}")
    }
}

/// Runs one download.
pub struct DownloadOrchestrator {
    navigator: Arc<dyn Navigator>,
    options: DownloadOptions,
    sink: Arc<dyn StatusSink>,
    state: DownloadState,
}

impl DownloadOrchestrator {
    pub fn new(navigator: Arc<dyn Navigator>, options: DownloadOptions, sink: Arc<dyn StatusSink>) -> Self {
        Self {
            navigator,
            options,
            sink,
            state: DownloadState::Idle,
        }
    }

    pub fn state(&self) -> DownloadState {
        self.state
    }

    /// Download the workbook and return its renamed descriptor.
    ///
    /// Fails with [`PipelineError::Cancelled`] if the token is set at a checkpoint; any other
    /// failure is logged with its step and returned after the browser has been quit.
    pub fn run(&mut self, token: &CancellationToken) -> PipelineResult<ArtifactDescriptor> {
        self.state = DownloadState::Idle;
        match self.execute(token) {
            Ok(artifact) => {
                self.transition(DownloadState::Done);
                Ok(artifact)
            }
            Err(PipelineError::Cancelled) => {
                self.transition(DownloadState::Cancelled);
                warn!("download cancelled");
                Err(PipelineError::Cancelled)
            }
            Err(e) => {
                error!(state = %self.state, error = %e, "download failed");
                Err(e)
            }
        }
    }

    fn execute(&mut self, token: &CancellationToken) -> PipelineResult<ArtifactDescriptor> {
        let opts = self.options.clone();
        let monitor = ReadinessMonitor::new(opts.poll_interval())
            .with_partial_suffixes(opts.partial_suffixes.clone())
            .with_cancellation(token.clone());

        let download_dir = prepare_directory(&opts.download_dir)?;
        let browser = BrowserOptions {
            download_dir: download_dir.clone(),
            ..opts.browser.clone()
        };
        let mut session = SessionGuard::new(self.navigator.configure(&browser)?);
        self.transition(DownloadState::NavigatorConfigured);

        let removed = monitor.clear_directory(&download_dir, opts.unlock_attempts, opts.unlock_interval())?;
        if removed > 0 {
            info!(dir = %download_dir.display(), removed, "download directory cleared");
        }
        token.checkpoint()?;

        self.emit(StatusEvent::info(Stage::Download, format!("Opening {}", opts.url)));
        session.navigate(&opts.url)?;
        self.transition(DownloadState::PageLoaded);
        token.checkpoint()?;

        let trigger = session.find_clickable(&opts.trigger, opts.element_wait())?;
        let files_before = list_files(&download_dir)?;
        session.click(&trigger)?;
        self.transition(DownloadState::DownloadTriggered);
        self.emit(StatusEvent::info(Stage::Download, "Download started"));

        let mut artifact = ArtifactDescriptor::new(&download_dir, opts.extensions.clone());
        let found = monitor.await_new_file(&download_dir, &files_before, opts.download_wait(), &opts.extensions)?;
        monitor.await_unlocked(&found, opts.unlock_attempts, opts.unlock_interval())?;
        artifact.discovered_path = Some(found.clone());
        self.transition(DownloadState::DownloadConfirmed);
        self.emit(StatusEvent::info(
            Stage::Download,
            format!("Download completed: {}", found.display()),
        ));

        let renamed = rename_artifact(&found, &opts.artifact_prefix)?;
        artifact.renamed_path = Some(renamed.clone());
        self.transition(DownloadState::Renamed);
        self.emit(StatusEvent::info(
            Stage::Download,
            format!("File renamed to {}", renamed.display()),
        ));

        if let Err(e) = session.release() {
            warn!(error = %e, "browser did not shut down cleanly");
        }
        Ok(artifact)
    }

    fn transition(&mut self, next: DownloadState) {
        info!(from = %self.state, to = %next, "download state");
        self.state = next;
    }

    fn emit(&self, event: StatusEvent) {
        self.sink.emit(&event);
    }
}

/// Create the directory if needed and return its absolute path (browsers require one).
fn prepare_directory(dir: &Path) -> PipelineResult<PathBuf> {
    std::fs::create_dir_all(dir).inspect_err(|e| {
        error!(dir = %dir.display(), error = %e, "cannot create download directory");
    })?;
    Ok(std::fs::canonicalize(dir)?)
}

fn rename_artifact(found: &Path, prefix: &str) -> PipelineResult<PathBuf> {
    let extension = found
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();
    let target = found.with_file_name(artifact_file_name(prefix, &extension));
    std::fs::rename(found, &target).map_err(|source| {
        error!(from = %found.display(), to = %target.display(), error = %source, "rename failed");
        PipelineError::Rename {
            from: found.to_path_buf(),
            to: target.clone(),
            source,
        }
    })?;
    Ok(target)
}
