//! Shared fakes for the integration tests: a navigator that emulates a browser download engine,
//! a sink that records events, and workbook fixtures.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use emergy_etl::CancellationToken;
use emergy_etl::config::PipelineOptions;
use emergy_etl::error::{PipelineError, PipelineResult};
use emergy_etl::navigator::{BrowserOptions, BrowserSession, Element, Locator, Navigator};
use emergy_etl::status::{Severity, StatusEvent, StatusSink};

/// What the fake browser does when the link is clicked.
#[derive(Clone)]
pub enum Download {
    /// Write `<name>.crdownload`, then rename it to `<name>` after a short delay.
    File { name: String, bytes: Vec<u8> },
    /// Start a download that never finishes.
    Stalled { name: String },
    /// Nothing happens.
    Nothing,
}

#[derive(Default)]
pub struct Calls {
    pub quits: AtomicUsize,
    pub navigated: Mutex<Vec<String>>,
    pub download_dirs: Mutex<Vec<PathBuf>>,
}

pub struct FakeNavigator {
    pub calls: Arc<Calls>,
    download: Download,
    link_present: bool,
    cancel_on_navigate: Option<CancellationToken>,
}

impl FakeNavigator {
    pub fn new(download: Download) -> Self {
        Self {
            calls: Arc::new(Calls::default()),
            download,
            link_present: true,
            cancel_on_navigate: None,
        }
    }

    pub fn without_link(mut self) -> Self {
        self.link_present = false;
        self
    }

    /// Request cancellation on `token` while the page is loading.
    pub fn cancel_on_navigate(mut self, token: CancellationToken) -> Self {
        self.cancel_on_navigate = Some(token);
        self
    }

    pub fn quits(&self) -> usize {
        self.calls.quits.load(Ordering::SeqCst)
    }
}

impl Navigator for FakeNavigator {
    fn configure(&self, options: &BrowserOptions) -> PipelineResult<Box<dyn BrowserSession>> {
        self.calls
            .download_dirs
            .lock()
            .unwrap()
            .push(options.download_dir.clone());
        Ok(Box::new(FakeSession {
            calls: self.calls.clone(),
            dir: options.download_dir.clone(),
            download: self.download.clone(),
            link_present: self.link_present,
            cancel_on_navigate: self.cancel_on_navigate.clone(),
        }))
    }
}

struct FakeSession {
    calls: Arc<Calls>,
    dir: PathBuf,
    download: Download,
    link_present: bool,
    cancel_on_navigate: Option<CancellationToken>,
}

impl BrowserSession for FakeSession {
    fn navigate(&mut self, url: &str) -> PipelineResult<()> {
        self.calls.navigated.lock().unwrap().push(url.to_string());
        if let Some(token) = &self.cancel_on_navigate {
            token.request_cancel();
        }
        Ok(())
    }

    fn find_clickable(&mut self, locator: &Locator, timeout: Duration) -> PipelineResult<Element> {
        if self.link_present {
            Ok(Element { id: "link".into() })
        } else {
            Err(PipelineError::ElementNotFound {
                locator: locator.to_string(),
                waited: timeout,
            })
        }
    }

    fn click(&mut self, _element: &Element) -> PipelineResult<()> {
        match self.download.clone() {
            Download::File { name, bytes } => {
                let dir = self.dir.clone();
                std::thread::spawn(move || {
                    let partial = dir.join(format!("{name}.crdownload"));
                    std::fs::write(&partial, &bytes).unwrap();
                    std::thread::sleep(Duration::from_millis(60));
                    std::fs::rename(&partial, dir.join(&name)).unwrap();
                });
            }
            Download::Stalled { name } => {
                std::fs::write(self.dir.join(format!("{name}.crdownload")), b"partial").unwrap();
            }
            Download::Nothing => {}
        }
        Ok(())
    }

    fn quit(self: Box<Self>) -> PipelineResult<()> {
        self.calls.quits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

type Hook = Box<dyn Fn(&StatusEvent) + Send + Sync>;

/// Records every event; optionally runs a hook on each one.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<StatusEvent>>,
    hook: Option<Hook>,
}

impl RecordingSink {
    pub fn with_hook(hook: impl Fn(&StatusEvent) + Send + Sync + 'static) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            hook: Some(Box::new(hook)),
        }
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.message).collect()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.events().iter().filter(|e| e.severity == severity).count()
    }
}

impl StatusSink for RecordingSink {
    fn emit(&self, event: &StatusEvent) {
        self.events.lock().unwrap().push(event.clone());
        if let Some(hook) = &self.hook {
            hook(event);
        }
    }
}

/// Options tuned for fast tests, downloading into `dir`.
pub fn fast_options(dir: &Path, db: &Path) -> PipelineOptions {
    let mut options = PipelineOptions::default();
    options.download.download_dir = dir.to_path_buf();
    options.download.poll_interval_ms = 10;
    options.download.download_wait_secs = 5;
    options.download.unlock_attempts = 3;
    options.download.unlock_interval_secs = 0;
    options.store.database = db.to_path_buf();
    options
}

/// A small emergy-like workbook: one data sheet (3 rows x 3 columns) and one empty sheet.
pub fn emergy_workbook() -> rust_xlsxwriter::Workbook {
    let mut wb = rust_xlsxwriter::Workbook::new();

    let ws = wb.add_worksheet();
    ws.set_name("UEV Library").unwrap();
    ws.write_string(0, 0, "Item").unwrap();
    ws.write_string(0, 1, "UEV").unwrap();
    ws.write_string(0, 2, "Unit").unwrap();
    let rows = [("Sunlight", 1.0, "sej/J"), ("Rain", 30500.0, "sej/J"), ("Caf\u{e9}", 2.5e9, "sej/g")];
    for (i, (item, uev, unit)) in rows.iter().enumerate() {
        let r = (i + 1) as u32;
        ws.write_string(r, 0, *item).unwrap();
        ws.write_number(r, 1, *uev).unwrap();
        ws.write_string(r, 2, *unit).unwrap();
    }

    let empty = wb.add_worksheet();
    empty.set_name("Notes").unwrap();
    wb
}

pub fn write_workbook(wb: &mut rust_xlsxwriter::Workbook, path: &Path) {
    wb.save(path).unwrap();
}

pub fn table_count(db: &Path) -> i64 {
    let conn = rusqlite::Connection::open(db).unwrap();
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name <> 'sqlite_sequence'",
        [],
        |r| r.get(0),
    )
    .unwrap()
}

pub fn row_count(db: &Path, table: &str) -> i64 {
    let conn = rusqlite::Connection::open(db).unwrap();
    conn.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |r| r.get(0))
        .unwrap()
}
