//! Pipeline controller: download, then load, with one terminal status per run.

use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{error, info, warn};

use crate::cancel::CancellationToken;
use crate::config::PipelineOptions;
use crate::download::DownloadOrchestrator;
use crate::error::{PipelineError, PipelineResult};
use crate::ingestion::{LoadReport, SchemaInferringLoader};
use crate::navigator::Navigator;
use crate::status::{Stage, StatusEvent, StatusSink};
use crate::store::RelationalStore;
use crate::types::ArtifactDescriptor;

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    Succeeded {
        artifact: ArtifactDescriptor,
        report: LoadReport,
    },
    Cancelled,
    Failed(PipelineError),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Succeeded { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunOutcome::Cancelled)
    }
}

/// Sequences the download orchestrator and the loader.
///
/// Runs are single-flight: callers must not start a second run on the same pipeline while one
/// is in progress, since both would share the cancellation token.
pub struct Pipeline {
    options: PipelineOptions,
    navigator: Arc<dyn Navigator>,
    store: Arc<dyn RelationalStore>,
    sink: Arc<dyn StatusSink>,
    token: CancellationToken,
}

impl Pipeline {
    pub fn new(
        options: PipelineOptions,
        navigator: Arc<dyn Navigator>,
        store: Arc<dyn RelationalStore>,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            options,
            navigator,
            store,
            sink,
            token: CancellationToken::new(),
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Ask the current run to stop at its next checkpoint. Never blocks.
    pub fn request_cancel(&self) {
        info!("cancellation requested");
        self.token.request_cancel();
    }

    /// A handle sharing this pipeline's token, for another thread to cancel with.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Run the whole pipeline. Emits exactly one terminal event (success, warning for
    /// cancellation, error) whatever stage fails.
    ///
    /// A cancellation left over from a previous run is cleared first.
    pub fn run(&self) -> RunOutcome {
        self.token.clear();
        self.run_armed()
    }

    /// Run without touching the token; the caller has already cleared it.
    fn run_armed(&self) -> RunOutcome {
        self.emit(StatusEvent::info(Stage::Pipeline, "Starting automation process").with_progress(10));

        let outcome = match self.stages() {
            Ok((artifact, report)) => RunOutcome::Succeeded { artifact, report },
            Err(PipelineError::Cancelled) => RunOutcome::Cancelled,
            Err(e) => RunOutcome::Failed(e),
        };

        let terminal = match &outcome {
            RunOutcome::Succeeded { report, .. } => {
                info!(tables = report.tables.len(), rows = report.total_rows(), "pipeline finished");
                StatusEvent::success(
                    Stage::Pipeline,
                    format!(
                        "Process completed successfully: {} rows in {} tables",
                        report.total_rows(),
                        report.tables.len()
                    ),
                )
                .with_progress(100)
            }
            RunOutcome::Cancelled => {
                warn!("pipeline cancelled");
                StatusEvent::new(
                    PipelineError::Cancelled.severity(),
                    Stage::Pipeline,
                    "Process cancelled by user",
                )
            }
            RunOutcome::Failed(e) => {
                error!(error = %e, "pipeline failed");
                StatusEvent::new(e.severity(), Stage::Pipeline, format!("Process failed: {e}"))
            }
        };
        self.emit(terminal);
        outcome
    }

    fn stages(&self) -> PipelineResult<(ArtifactDescriptor, LoadReport)> {
        let mut orchestrator = DownloadOrchestrator::new(
            self.navigator.clone(),
            self.options.download.clone(),
            self.sink.clone(),
        );
        let artifact = orchestrator.run(&self.token)?;

        // The renamed file stays in place; only the load is skipped.
        if self.token.is_cancelled() {
            warn!("cancellation requested after download, skipping load");
            return Err(PipelineError::Cancelled);
        }

        let path = artifact.path().ok_or_else(|| PipelineError::Internal {
            message: "download produced no file".to_string(),
        })?;
        self.emit(StatusEvent::info(Stage::Load, format!("Loading {}", path.display())).with_progress(50));
        let loader = SchemaInferringLoader::new(self.store.as_ref(), self.sink.as_ref());
        let report = loader.load(path, &self.token)?;
        Ok((artifact, report))
    }

    fn emit(&self, event: StatusEvent) {
        self.sink.emit(&event);
    }
}

/// Runs a [`Pipeline`] on a background thread, keeping the caller's thread free.
pub struct PipelineWorker {
    pipeline: Arc<Pipeline>,
    handle: JoinHandle<RunOutcome>,
}

impl PipelineWorker {
    /// Start a run. The token is cleared here, on the caller's thread, so a cancel requested
    /// any time after `spawn` returns is seen by the run.
    pub fn spawn(pipeline: Arc<Pipeline>) -> PipelineResult<Self> {
        pipeline.token.clear();
        let worker = pipeline.clone();
        let handle = std::thread::Builder::new()
            .name("emergy-pipeline".to_string())
            .spawn(move || worker.run_armed())?;
        Ok(Self { pipeline, handle })
    }

    pub fn request_cancel(&self) {
        self.pipeline.request_cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the run to end.
    pub fn join(self) -> RunOutcome {
        match self.handle.join() {
            Ok(outcome) => outcome,
            Err(_) => {
                error!("pipeline worker panicked");
                let e = PipelineError::Internal {
                    message: "pipeline worker panicked".to_string(),
                };
                self.pipeline.emit(StatusEvent::new(
                    e.severity(),
                    Stage::Pipeline,
                    format!("Process failed: {e}"),
                ));
                RunOutcome::Failed(e)
            }
        }
    }
}
