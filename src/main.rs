//! emergy-etl - download the EPA emergy workbook and load it into SQLite

use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use emergy_etl::config::PipelineOptions;
use emergy_etl::logging::{LogConfig, LogLevel, init_logging};
use emergy_etl::navigator::webdriver::WebDriverNavigator;
use emergy_etl::status::{ChannelSink, CompositeSink, FileSink, StatusEvent, StatusSink, TracingSink};
use emergy_etl::store::SqliteStore;
use emergy_etl::{CancellationToken, Pipeline, PipelineWorker, RunOutcome};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "emergy-etl")]
#[command(author, version, about = "Download the EPA emergy workbook and load it into SQLite")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error). Overrides LOG_LEVEL.
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline once. Type `c` or `cancel` and Enter to stop it.
    Run(RunArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory the browser downloads into
    #[arg(long, env = "EMERGY_DOWNLOAD_DIR")]
    download_dir: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, env = "DB_PATH")]
    db: Option<PathBuf>,

    /// WebDriver endpoint
    #[arg(long, env = "WEBDRIVER_URL")]
    webdriver_url: Option<String>,

    /// chromedriver binary to spawn for the run
    #[arg(long, env = "CHROMEDRIVER_PATH")]
    chromedriver: Option<PathBuf>,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Also append status lines to this file
    #[arg(long)]
    status_file: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut log_config = LogConfig::from_env().context("invalid logging configuration")?;
    if let Some(level) = cli.log_level {
        log_config.level = level;
    }
    let _log_guard = init_logging(&log_config)?;

    match cli.command {
        Command::Run(args) => run_pipeline(args),
    }
}

fn run_pipeline(args: RunArgs) -> Result<ExitCode> {
    let mut options = match &args.config {
        Some(path) => PipelineOptions::from_file(path)?,
        None => PipelineOptions::from_env()?,
    };
    if let Some(dir) = args.download_dir {
        options.download.download_dir = dir;
    }
    if let Some(db) = args.db {
        options.store.database = db;
    }
    if let Some(url) = args.webdriver_url {
        options.webdriver_url = url;
    }
    if let Some(driver) = args.chromedriver {
        options.chromedriver_path = Some(driver);
    }
    if args.headed {
        options.download.browser.headless = false;
    }
    options.validate()?;

    let mut navigator = WebDriverNavigator::new(options.webdriver_url.clone())?;
    if let Some(driver) = &options.chromedriver_path {
        navigator = navigator.with_driver_binary(driver);
    }
    let store = SqliteStore::new(options.store.database.clone());

    let (tx, rx) = mpsc::channel::<StatusEvent>();
    let sinks: Vec<Arc<dyn StatusSink>> = vec![Arc::new(TracingSink), Arc::new(ChannelSink::new(tx))];
    let mut sink = CompositeSink::new(sinks);
    if let Some(path) = &args.status_file {
        sink.push(Arc::new(FileSink::new(path)));
    }
    let sink: Arc<dyn StatusSink> = Arc::new(sink);

    info!(db = %options.store.database.display(), webdriver = %options.webdriver_url, "starting run");
    let pipeline = Arc::new(Pipeline::new(options, Arc::new(navigator), Arc::new(store), sink));
    listen_for_cancel(pipeline.cancel_handle())?;
    let worker = PipelineWorker::spawn(pipeline).context("failed to start pipeline worker")?;

    loop {
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(event) => print_event(&event),
            Err(RecvTimeoutError::Timeout) if worker.is_finished() => break,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    let outcome = worker.join();
    while let Ok(event) = rx.try_recv() {
        print_event(&event);
    }

    Ok(match outcome {
        RunOutcome::Succeeded { .. } => ExitCode::SUCCESS,
        RunOutcome::Cancelled => ExitCode::from(2),
        RunOutcome::Failed(_) => ExitCode::from(1),
    })
}

fn print_event(event: &StatusEvent) {
    match event.progress {
        Some(p) => println!("{} [{p:>3}%]", event.to_line()),
        None => println!("{}", event.to_line()),
    }
}

/// Read stdin on a detached thread; `c` or `cancel` requests cancellation.
fn listen_for_cancel(token: CancellationToken) -> Result<()> {
    std::thread::Builder::new()
        .name("cancel-listener".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if matches!(line.trim().to_lowercase().as_str(), "c" | "cancel") {
                    warn!("cancel requested from terminal");
                    token.request_cancel();
                }
            }
        })
        .context("failed to start cancel listener")?;
    Ok(())
}
