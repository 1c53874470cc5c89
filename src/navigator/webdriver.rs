//! W3C WebDriver implementation of the navigator capability.
//!
//! Talks JSON over HTTP to a `chromedriver` (or any W3C-compatible driver). The driver is either
//! already running at [`WebDriverNavigator::endpoint`] or spawned per session from a configured
//! binary and killed when the session quits.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use reqwest::Method;
use reqwest::blocking::Client;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{BrowserOptions, BrowserSession, Element, Locator, Navigator};
use crate::error::{PipelineError, PipelineResult};

/// Key under which W3C drivers return element references.
const ELEMENT_KEY: &str = "element-6066-11e4-a6c6-4a4f7b9a5c1b";

const FIND_POLL_INTERVAL: Duration = Duration::from_millis(250);
const DRIVER_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Navigator backed by a WebDriver endpoint.
#[derive(Debug, Clone)]
pub struct WebDriverNavigator {
    endpoint: String,
    driver_binary: Option<PathBuf>,
    client: Client,
}

impl WebDriverNavigator {
    /// Use a driver already listening at `endpoint` (e.g. `http://localhost:9515`).
    pub fn new(endpoint: impl Into<String>) -> PipelineResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PipelineError::navigator(format!("http client: {e}")))?;
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            driver_binary: None,
            client,
        })
    }

    /// Spawn `binary` for every session, listening on the port of the endpoint.
    pub fn with_driver_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.driver_binary = Some(binary.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Navigator for WebDriverNavigator {
    fn configure(&self, options: &BrowserOptions) -> PipelineResult<Box<dyn BrowserSession>> {
        let process = match &self.driver_binary {
            Some(binary) => Some(DriverProcess::spawn(binary, &self.endpoint, &self.client)?),
            None => None,
        };

        let body = new_session_payload(options);
        debug!(endpoint = %self.endpoint, payload = %body, "creating webdriver session");
        let value = send(&self.client, Method::POST, &format!("{}/session", self.endpoint), Some(body))?;
        let session_id = parse_session_id(&value)?;
        info!(%session_id, "browser session started");

        let mut session = WebDriverSession {
            client: self.client.clone(),
            base: format!("{}/session/{session_id}", self.endpoint),
            _process: process,
        };
        session.allow_downloads(&options.download_dir);
        Ok(Box::new(session))
    }
}

struct WebDriverSession {
    client: Client,
    base: String,
    // Killed on drop, after the session is deleted.
    _process: Option<DriverProcess>,
}

impl WebDriverSession {
    fn command(&self, method: Method, path: &str, body: Option<Value>) -> PipelineResult<Value> {
        send(&self.client, method, &format!("{}{path}", self.base), body)
    }

    /// Headless Chrome ignores download prefs unless downloads are allowed explicitly.
    fn allow_downloads(&mut self, dir: &Path) {
        let body = json!({
            "cmd": "Page.setDownloadBehavior",
            "params": { "behavior": "allow", "downloadPath": dir.to_string_lossy() },
        });
        if let Err(e) = self.command(Method::POST, "/chromium/send_command", Some(body)) {
            warn!(error = %e, "driver did not accept download behavior; relying on prefs");
        }
    }

    fn find_element(&self, locator: &Locator) -> PipelineResult<Option<Element>> {
        let (using, value) = locator.strategy();
        match self.command(Method::POST, "/element", Some(json!({ "using": using, "value": value }))) {
            Ok(v) => element_from_value(&v)
                .map(|id| Some(Element { id }))
                .ok_or_else(|| PipelineError::navigator(format!("malformed element reference: {v}"))),
            Err(e) if is_transient(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn element_flag(&self, element: &Element, flag: &str) -> PipelineResult<bool> {
        let v = self.command(Method::GET, &format!("/element/{}/{flag}", element.id), None)?;
        Ok(v.as_bool().unwrap_or(false))
    }

    /// Displayed and enabled. An element detached by a re-render counts as not ready yet.
    fn is_clickable(&self, element: &Element) -> PipelineResult<bool> {
        let ready = match self.element_flag(element, "displayed") {
            Ok(true) => self.element_flag(element, "enabled"),
            other => other,
        };
        match ready {
            Err(e) if is_transient(&e) => Ok(false),
            other => other,
        }
    }
}

impl BrowserSession for WebDriverSession {
    fn navigate(&mut self, url: &str) -> PipelineResult<()> {
        self.command(Method::POST, "/url", Some(json!({ "url": url })))?;
        Ok(())
    }

    fn find_clickable(&mut self, locator: &Locator, timeout: Duration) -> PipelineResult<Element> {
        let start = Instant::now();
        loop {
            if let Some(element) = self.find_element(locator)? {
                if self.is_clickable(&element)? {
                    return Ok(element);
                }
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(PipelineError::ElementNotFound {
                    locator: locator.to_string(),
                    waited: elapsed,
                });
            }
            std::thread::sleep(FIND_POLL_INTERVAL.min(timeout - elapsed));
        }
    }

    fn click(&mut self, element: &Element) -> PipelineResult<()> {
        self.command(Method::POST, &format!("/element/{}/click", element.id), Some(json!({})))?;
        Ok(())
    }

    fn quit(self: Box<Self>) -> PipelineResult<()> {
        let result = self.command(Method::DELETE, "", None).map(|_| ());
        debug!(session = %self.base, ok = result.is_ok(), "browser session deleted");
        result
    }
}

/// A driver process owned by one session.
struct DriverProcess {
    child: Child,
}

impl DriverProcess {
    fn spawn(binary: &Path, endpoint: &str, client: &Client) -> PipelineResult<Self> {
        let port = endpoint_port(endpoint)
            .ok_or_else(|| PipelineError::navigator(format!("endpoint has no port: {endpoint}")))?;
        info!(binary = %binary.display(), port, "starting webdriver");
        let child = Command::new(binary)
            .arg(format!("--port={port}"))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| PipelineError::navigator(format!("failed to start {}: {e}", binary.display())))?;
        let process = Self { child };

        let start = Instant::now();
        let status_url = format!("{endpoint}/status");
        loop {
            let ready = send(client, Method::GET, &status_url, None)
                .map(|v| v["ready"].as_bool().unwrap_or(false))
                .unwrap_or(false);
            if ready {
                return Ok(process);
            }
            if start.elapsed() >= DRIVER_STARTUP_TIMEOUT {
                return Err(PipelineError::Timeout {
                    what: format!("webdriver at {endpoint} to become ready"),
                    waited: start.elapsed(),
                });
            }
            std::thread::sleep(Duration::from_millis(100));
        }
    }
}

impl Drop for DriverProcess {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!(error = %e, "webdriver already exited");
        }
        let _ = self.child.wait();
    }
}

fn send(client: &Client, method: Method, url: &str, body: Option<Value>) -> PipelineResult<Value> {
    let mut req = client.request(method.clone(), url);
    if let Some(body) = body {
        req = req.json(&body);
    }
    let resp = req
        .send()
        .map_err(|e| PipelineError::navigator(format!("{method} {url}: {e}")))?;
    let status = resp.status();
    let body: Value = resp
        .json()
        .map_err(|e| PipelineError::navigator(format!("{method} {url}: invalid response: {e}")))?;
    if !status.is_success() {
        return Err(error_from_body(&body));
    }
    Ok(body.get("value").cloned().unwrap_or(Value::Null))
}

/// `POST /session` body.
fn new_session_payload(options: &BrowserOptions) -> Value {
    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": "chrome",
                "acceptInsecureCerts": true,
                "goog:chromeOptions": {
                    "args": options.chrome_args(),
                    "prefs": options.chrome_prefs(),
                },
            },
        },
    })
}

fn parse_session_id(value: &Value) -> PipelineResult<String> {
    value["sessionId"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| PipelineError::navigator(format!("new session response has no sessionId: {value}")))
}

fn element_from_value(value: &Value) -> Option<String> {
    value[ELEMENT_KEY].as_str().map(str::to_string)
}

/// Map a W3C error body (`{"value": {"error": ..., "message": ...}}`) to a navigator error.
///
/// The message starts with the W3C error code so callers can match on it.
fn error_from_body(body: &Value) -> PipelineError {
    let v = &body["value"];
    let code = v["error"].as_str().unwrap_or("unknown error");
    let message = v["message"].as_str().unwrap_or("");
    PipelineError::navigator(format!("{code}: {message}"))
}

/// Lookup errors worth retrying until the wait times out.
fn is_transient(e: &PipelineError) -> bool {
    matches!(
        e,
        PipelineError::Navigator { message }
            if message.starts_with("no such element") || message.starts_with("stale element reference")
    )
}

fn endpoint_port(endpoint: &str) -> Option<u16> {
    let rest = endpoint.split_once("://").map_or(endpoint, |(_, r)| r);
    let authority = rest.split('/').next()?;
    authority.rsplit_once(':')?.1.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_payload_carries_args_and_prefs() {
        let opts = BrowserOptions {
            download_dir: PathBuf::from("/data/download"),
            ..Default::default()
        };
        let payload = new_session_payload(&opts);
        let chrome = &payload["capabilities"]["alwaysMatch"]["goog:chromeOptions"];
        let args: Vec<&str> = chrome["args"]
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a.as_str().unwrap())
            .collect();
        assert!(args.contains(&"--disable-popup-blocking"));
        assert!(args.contains(&"--headless=new"));
        assert_eq!(chrome["prefs"]["download.default_directory"], "/data/download");
    }

    #[test]
    fn parses_session_and_element_ids() {
        let v = json!({ "sessionId": "abc", "capabilities": {} });
        assert_eq!(parse_session_id(&v).unwrap(), "abc");
        assert!(parse_session_id(&json!({})).is_err());

        let el = json!({ ELEMENT_KEY: "el-1" });
        assert_eq!(element_from_value(&el).as_deref(), Some("el-1"));
        assert_eq!(element_from_value(&json!({})), None);
    }

    #[test]
    fn error_body_keeps_w3c_code_first() {
        let body = json!({ "value": { "error": "no such element", "message": "Unable to locate" } });
        match error_from_body(&body) {
            PipelineError::Navigator { message } => {
                assert!(message.starts_with("no such element"));
                assert!(message.contains("Unable to locate"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_and_stale_elements_are_retried() {
        let stale = json!({ "value": { "error": "stale element reference", "message": "detached" } });
        let missing = json!({ "value": { "error": "no such element", "message": "" } });
        let invalid = json!({ "value": { "error": "invalid selector", "message": "bad xpath" } });
        assert!(is_transient(&error_from_body(&stale)));
        assert!(is_transient(&error_from_body(&missing)));
        assert!(!is_transient(&error_from_body(&invalid)));
        assert!(!is_transient(&PipelineError::Cancelled));
    }

    #[test]
    fn endpoint_port_is_extracted() {
        assert_eq!(endpoint_port("http://localhost:9515"), Some(9515));
        assert_eq!(endpoint_port("http://127.0.0.1:4444/wd/hub"), Some(4444));
        assert_eq!(endpoint_port("http://localhost"), None);
    }
}
