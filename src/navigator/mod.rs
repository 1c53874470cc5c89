//! Browser navigator capability.
//!
//! The download orchestrator drives a browser through two small traits:
//!
//! - [`Navigator`] configures a browser and hands out a [`BrowserSession`]
//! - [`BrowserSession`] navigates, finds a clickable element, clicks it and quits
//!
//! A session must always be quit, even when a step fails. [`SessionGuard`] owns the session and
//! quits it on drop, so no exit path leaks a browser process.
//!
//! With the `webdriver` feature (default), [`webdriver::WebDriverNavigator`] implements the
//! capability over the W3C WebDriver protocol.

#[cfg(feature = "webdriver")]
pub mod webdriver;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};

/// How to find an element on the page.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "lowercase")]
pub enum Locator {
    XPath(String),
    Css(String),
}

impl Locator {
    /// W3C WebDriver location strategy and selector.
    pub fn strategy(&self) -> (&'static str, &str) {
        match self {
            Locator::XPath(s) => ("xpath", s),
            Locator::Css(s) => ("css selector", s),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (by, value) = self.strategy();
        write!(f, "{by}={value}")
    }
}

/// An element reference handed out by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub id: String,
}

/// Browser settings for one session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BrowserOptions {
    /// Run without a window.
    pub headless: bool,
    /// Extra command-line switches.
    pub args: Vec<String>,
    /// Where downloads land. Set by the orchestrator to the prepared directory.
    #[serde(skip)]
    pub download_dir: PathBuf,
    pub prompt_for_download: bool,
    pub safe_browsing: bool,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            args: [
                "--ignore-certificate-errors",
                "--disable-popup-blocking",
                "--start-maximized",
                "--disable-extensions",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            download_dir: PathBuf::new(),
            prompt_for_download: false,
            safe_browsing: true,
        }
    }
}

impl BrowserOptions {
    /// Command-line switches, including the headless switch when enabled.
    pub fn chrome_args(&self) -> Vec<String> {
        let mut args = self.args.clone();
        if self.headless && !args.iter().any(|a| a.starts_with("--headless")) {
            args.push("--headless=new".to_string());
        }
        args
    }

    /// Download preferences.
    pub fn chrome_prefs(&self) -> Value {
        json!({
            "download.default_directory": self.download_dir.to_string_lossy(),
            "download.prompt_for_download": self.prompt_for_download,
            "download.directory_upgrade": true,
            "safebrowsing.enabled": self.safe_browsing,
        })
    }
}

/// Factory for browser sessions.
pub trait Navigator: Send + Sync {
    /// Start a browser configured with `options`.
    fn configure(&self, options: &BrowserOptions) -> PipelineResult<Box<dyn BrowserSession>>;
}

/// One running browser.
pub trait BrowserSession: Send {
    fn navigate(&mut self, url: &str) -> PipelineResult<()>;

    /// Wait up to `timeout` for `locator` to match a displayed, enabled element.
    ///
    /// Fails with [`PipelineError::ElementNotFound`].
    fn find_clickable(&mut self, locator: &Locator, timeout: Duration) -> PipelineResult<Element>;

    fn click(&mut self, element: &Element) -> PipelineResult<()>;

    /// Shut the browser down and release every resource the session holds.
    fn quit(self: Box<Self>) -> PipelineResult<()>;
}

/// Owns a [`BrowserSession`] and quits it exactly once: on [`SessionGuard::release`] or on drop.
pub struct SessionGuard {
    session: Option<Box<dyn BrowserSession>>,
}

impl SessionGuard {
    pub fn new(session: Box<dyn BrowserSession>) -> Self {
        Self {
            session: Some(session),
        }
    }

    fn active(&mut self) -> PipelineResult<&mut (dyn BrowserSession + 'static)> {
        self.session
            .as_deref_mut()
            .ok_or_else(|| PipelineError::navigator("browser session already released"))
    }

    pub fn navigate(&mut self, url: &str) -> PipelineResult<()> {
        self.active()?.navigate(url)
    }

    pub fn find_clickable(&mut self, locator: &Locator, timeout: Duration) -> PipelineResult<Element> {
        self.active()?.find_clickable(locator, timeout)
    }

    pub fn click(&mut self, element: &Element) -> PipelineResult<()> {
        self.active()?.click(element)
    }

    /// Quit now and report the outcome.
    pub fn release(mut self) -> PipelineResult<()> {
        match self.session.take() {
            Some(session) => {
                debug!("closing browser");
                session.quit()
            }
            None => Ok(()),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            debug!("closing browser on early exit");
            if let Err(e) = session.quit() {
                warn!(error = %e, "failed to close browser");
            }
        }
    }
}
