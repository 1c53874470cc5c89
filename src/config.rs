//! Pipeline configuration.
//!
//! Every field has a default matching the fixed EPA emergy pipeline, so an empty JSON object
//! (or no configuration at all) is a valid configuration. Overrides come from a JSON file
//! ([`PipelineOptions::from_file`]) or from the environment ([`PipelineOptions::from_env`]).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::navigator::{BrowserOptions, Locator};

pub const DEFAULT_URL: &str = "https://www.epa.gov/water-research/uev-library#access";
pub const DEFAULT_TRIGGER_XPATH: &str =
    r#"//*[@id="main"]/div/div[1]/div[2]/div[1]/article/div[2]/div/p[11]/span[2]/a"#;
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";

/// Top-level options for one pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    pub download: DownloadOptions,
    /// W3C WebDriver endpoint.
    pub webdriver_url: String,
    /// When set, a driver process is spawned from this binary for every run.
    pub chromedriver_path: Option<PathBuf>,
    pub store: StoreConfig,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            download: DownloadOptions::default(),
            webdriver_url: DEFAULT_WEBDRIVER_URL.to_string(),
            chromedriver_path: None,
            store: StoreConfig::default(),
        }
    }
}

impl PipelineOptions {
    /// Read options from a JSON file. Missing fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| PipelineError::Config {
            message: format!("cannot read '{}': {e}", path.display()),
        })?;
        let options: Self = serde_json::from_str(&text).map_err(|e| PipelineError::Config {
            message: format!("invalid config '{}': {e}", path.display()),
        })?;
        options.validate()?;
        Ok(options)
    }

    /// Defaults, with overrides from the environment (a `.env` file is loaded first if present).
    ///
    /// Recognized variables: `EMERGY_URL`, `EMERGY_DOWNLOAD_DIR`, `WEBDRIVER_URL`,
    /// `CHROMEDRIVER_PATH`, `DB_PATH`.
    pub fn from_env() -> PipelineResult<Self> {
        let _ = dotenvy::dotenv();
        let mut options = Self::default();
        options.apply_env(|key| std::env::var(key).ok());
        options.validate()?;
        Ok(options)
    }

    /// Apply overrides from `lookup` (an environment reader).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get("EMERGY_URL") {
            self.download.url = v;
        }
        if let Some(v) = get("EMERGY_DOWNLOAD_DIR") {
            self.download.download_dir = PathBuf::from(v);
        }
        if let Some(v) = get("WEBDRIVER_URL") {
            self.webdriver_url = v;
        }
        if let Some(v) = get("CHROMEDRIVER_PATH") {
            self.chromedriver_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("DB_PATH") {
            self.store.database = PathBuf::from(v);
        }
        debug!(options = ?self, "configuration after environment overrides");
    }

    pub fn validate(&self) -> PipelineResult<()> {
        let d = &self.download;
        let invalid = |message: &str| {
            Err(PipelineError::Config {
                message: message.to_string(),
            })
        };
        if d.url.trim().is_empty() {
            return invalid("download.url must not be empty");
        }
        if d.extensions.is_empty() {
            return invalid("download.extensions must list at least one extension");
        }
        if d.poll_interval_ms == 0 {
            return invalid("download.poll_interval_ms must be > 0");
        }
        if d.artifact_prefix.trim().is_empty() {
            return invalid("download.artifact_prefix must not be empty");
        }
        Ok(())
    }
}

/// Options for the download stage.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DownloadOptions {
    /// Page holding the download link.
    pub url: String,
    /// The download link.
    pub trigger: Locator,
    /// Directory the browser downloads into. Cleared at the start of every run.
    pub download_dir: PathBuf,
    /// Renamed artifacts are `<prefix>_<DD-MM-YYYY_HH-MM-SS>.<ext>`.
    pub artifact_prefix: String,
    /// Extensions of a completed download.
    pub extensions: Vec<String>,
    /// Suffixes of a download still being written.
    pub partial_suffixes: Vec<String>,
    pub element_wait_secs: u64,
    pub download_wait_secs: u64,
    pub poll_interval_ms: u64,
    pub unlock_attempts: u32,
    pub unlock_interval_secs: u64,
    pub browser: BrowserOptions,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            trigger: Locator::XPath(DEFAULT_TRIGGER_XPATH.to_string()),
            download_dir: PathBuf::from("download"),
            artifact_prefix: "dados_emergy".to_string(),
            extensions: vec!["xlsx".to_string(), "xls".to_string()],
            partial_suffixes: vec!["crdownload".to_string(), "part".to_string()],
            element_wait_secs: 10,
            download_wait_secs: 60,
            poll_interval_ms: 1000,
            unlock_attempts: 60,
            unlock_interval_secs: 5,
            browser: BrowserOptions::default(),
        }
    }
}

impl DownloadOptions {
    pub fn element_wait(&self) -> Duration {
        Duration::from_secs(self.element_wait_secs)
    }

    pub fn download_wait(&self) -> Duration {
        Duration::from_secs(self.download_wait_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn unlock_interval(&self) -> Duration {
        Duration::from_secs(self.unlock_interval_secs)
    }
}

/// Where loaded tables go.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file.
    pub database: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("emergy.db"),
        }
    }
}
