//! File readiness monitoring.
//!
//! The browser gives no completion callback, so readiness is decided by polling:
//!
//! - a download is *complete* once a new file with a completed extension shows up in the
//!   download directory and it does not carry an in-progress suffix (`.crdownload`, `.part`);
//! - a file is *available* once an exclusive probe succeeds (see [`is_locked`]).
//!
//! Every wait is bounded. When a [`CancellationToken`] is attached, it is polled at every tick,
//! so a cancel request is observed within one tick.

use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::{debug, error, info};

use crate::cancel::CancellationToken;
use crate::error::{PipelineError, PipelineResult};

/// Default polling tick for directory scans.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Suffixes browsers use for downloads still being written.
pub const DEFAULT_PARTIAL_SUFFIXES: &[&str] = &["crdownload", "part"];

/// Returns `true` if another process appears to hold `path`.
///
/// Two probes: rename-to-self, then open-for-append with a non-blocking exclusive lock. Any
/// failure (including a missing file) counts as locked.
pub fn is_locked(path: &Path) -> bool {
    if let Err(e) = std::fs::rename(path, path) {
        debug!(path = %path.display(), error = %e, "rename probe failed");
        return true;
    }
    let file = match OpenOptions::new().append(true).open(path) {
        Ok(f) => f,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "open probe failed");
            return true;
        }
    };
    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = FileExt::unlock(&file);
            debug!(path = %path.display(), "file is free");
            false
        }
        Err(e) => {
            debug!(path = %path.display(), error = %e, "file is held by another process");
            true
        }
    }
}

/// Names of the regular files directly inside `dir`.
pub fn list_files(dir: &Path) -> PipelineResult<BTreeSet<String>> {
    let mut out = BTreeSet::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            out.insert(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(out)
}

/// Polling-based readiness checks.
#[derive(Debug, Clone)]
pub struct ReadinessMonitor {
    poll_interval: Duration,
    partial_suffixes: Vec<String>,
    cancel: Option<CancellationToken>,
}

impl Default for ReadinessMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl ReadinessMonitor {
    /// # Panics
    ///
    /// Panics if `poll_interval` is zero.
    pub fn new(poll_interval: Duration) -> Self {
        assert!(poll_interval > Duration::ZERO, "poll_interval must be > 0");
        Self {
            poll_interval,
            partial_suffixes: DEFAULT_PARTIAL_SUFFIXES.iter().map(|s| s.to_string()).collect(),
            cancel: None,
        }
    }

    /// Replace the in-progress suffixes (without the leading dot).
    pub fn with_partial_suffixes(mut self, suffixes: Vec<String>) -> Self {
        self.partial_suffixes = suffixes;
        self
    }

    /// Observe `token` at every tick; waits then fail with [`PipelineError::Cancelled`].
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Wait until `path` is no longer locked.
    ///
    /// Checks up to `max_attempts + 1` times, `interval` apart, then gives up with
    /// [`PipelineError::Timeout`].
    pub fn await_unlocked(&self, path: &Path, max_attempts: u32, interval: Duration) -> PipelineResult<()> {
        let start = Instant::now();
        for attempt in 0..=max_attempts {
            if !is_locked(path) {
                return Ok(());
            }
            if attempt == max_attempts {
                break;
            }
            info!(
                path = %path.display(),
                attempt = attempt + 1,
                max_attempts,
                "waiting for file to be released"
            );
            self.pause(interval)?;
        }
        error!(path = %path.display(), max_attempts, "file still in use");
        Err(PipelineError::Timeout {
            what: format!("'{}' to be released", path.display()),
            waited: start.elapsed(),
        })
    }

    /// Wait for a completed download to appear in `dir`.
    ///
    /// Returns the first file (in name order) that is not in `files_before`, ends with one of
    /// `done_extensions` and does not end with an in-progress suffix. Fails with
    /// [`PipelineError::Timeout`] once `timeout` elapses.
    pub fn await_new_file(
        &self,
        dir: &Path,
        files_before: &BTreeSet<String>,
        timeout: Duration,
        done_extensions: &[String],
    ) -> PipelineResult<PathBuf> {
        let start = Instant::now();
        loop {
            let current = list_files(dir)?;
            if let Some(name) = current
                .difference(files_before)
                .find(|name| self.is_completed(name, done_extensions))
            {
                debug!(file = %name, elapsed = ?start.elapsed(), "download completed");
                return Ok(dir.join(name));
            }
            if current.iter().any(|name| self.is_partial(name)) {
                debug!("partial download present, waiting");
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                error!(dir = %dir.display(), ?timeout, "no completed download appeared");
                return Err(PipelineError::Timeout {
                    what: format!(
                        "a .{} file in '{}'",
                        done_extensions.join("/."),
                        dir.display()
                    ),
                    waited: elapsed,
                });
            }
            self.pause(self.poll_interval.min(timeout - elapsed))?;
        }
    }

    /// Delete every file in `dir`, waiting for each one to be released first.
    ///
    /// The first file that cannot be removed aborts the cleanup: a stale file left behind would
    /// corrupt the baseline used by [`Self::await_new_file`]. Subdirectories are left alone.
    pub fn clear_directory(&self, dir: &Path, max_attempts: u32, interval: Duration) -> PipelineResult<usize> {
        let files = list_files(dir)?;
        debug!(dir = %dir.display(), ?files, "clearing directory");
        let mut removed = 0usize;
        for name in &files {
            let path = dir.join(name);
            self.await_unlocked(&path, max_attempts, interval)?;
            std::fs::remove_file(&path).map_err(|source| {
                error!(path = %path.display(), error = %source, "failed to remove file");
                PipelineError::Cleanup {
                    path: path.clone(),
                    source,
                }
            })?;
            info!(path = %path.display(), "removed stale file");
            removed += 1;
        }
        Ok(removed)
    }

    fn is_partial(&self, name: &str) -> bool {
        self.partial_suffixes.iter().any(|s| has_extension(name, s))
    }

    fn is_completed(&self, name: &str, done_extensions: &[String]) -> bool {
        !self.is_partial(name) && done_extensions.iter().any(|ext| has_extension(name, ext))
    }

    /// Sleep for `total`, in slices of at most one tick, observing cancellation between slices.
    fn pause(&self, total: Duration) -> PipelineResult<()> {
        let deadline = Instant::now() + total;
        loop {
            if let Some(token) = &self.cancel {
                token.checkpoint()?;
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep(self.poll_interval.min(deadline - now));
        }
    }
}

fn has_extension(name: &str, ext: &str) -> bool {
    let ext = ext.trim_start_matches('.');
    name.len() > ext.len() + 1
        && name
            .rsplit_once('.')
            .is_some_and(|(_, tail)| tail.eq_ignore_ascii_case(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_matching_is_case_insensitive_and_exact() {
        assert!(has_extension("report.xlsx", "xlsx"));
        assert!(has_extension("REPORT.XLSX", ".xlsx"));
        assert!(!has_extension("report.xlsx.crdownload", "xlsx"));
        assert!(has_extension("report.xlsx.crdownload", "crdownload"));
        assert!(!has_extension("xlsx", "xlsx"));
        assert!(!has_extension("report.xls", "xlsx"));
    }

    #[test]
    fn partial_files_never_count_as_completed() {
        let m = ReadinessMonitor::new(Duration::from_millis(10));
        let exts = vec!["xlsx".to_string(), "xls".to_string()];
        assert!(m.is_completed("a.xls", &exts));
        assert!(!m.is_completed("a.xlsx.crdownload", &exts));
        assert!(!m.is_completed("a.xlsx.part", &exts));
        assert!(!m.is_completed("a.csv", &exts));
    }

    #[test]
    fn unlocked_file_is_not_locked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("free.txt");
        std::fs::write(&path, b"x").unwrap();
        assert!(!is_locked(&path));
    }

    #[test]
    fn missing_file_counts_as_locked() {
        let dir = tempfile::tempdir().unwrap();
        assert!(is_locked(&dir.path().join("nope.txt")));
    }

    #[test]
    fn pause_observes_cancellation() {
        let token = CancellationToken::new();
        token.request_cancel();
        let m = ReadinessMonitor::new(Duration::from_millis(5)).with_cancellation(token);
        assert!(m.pause(Duration::from_secs(5)).unwrap_err().is_cancelled());
    }
}
