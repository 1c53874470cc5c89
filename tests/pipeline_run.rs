mod common;

use std::sync::{Arc, OnceLock};

use emergy_etl::status::{Severity, Stage};
use emergy_etl::store::SqliteStore;
use emergy_etl::{CancellationToken, Pipeline, PipelineWorker, RunOutcome};

use common::{Download, FakeNavigator, RecordingSink, emergy_workbook, fast_options, row_count, table_count};

fn workbook_bytes() -> Vec<u8> {
    emergy_workbook().save_to_buffer().unwrap()
}

fn terminal_events(sink: &RecordingSink) -> usize {
    sink.events()
        .iter()
        .filter(|e| e.stage == Stage::Pipeline && e.severity != Severity::Info)
        .count()
}

#[test]
fn full_run_downloads_and_loads() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("emergy.db");
    let options = fast_options(&dir.path().join("download"), &db);
    let navigator = Arc::new(FakeNavigator::new(Download::File {
        name: "UEV_Library.xlsx".into(),
        bytes: workbook_bytes(),
    }));
    let sink = Arc::new(RecordingSink::default());

    let pipeline = Pipeline::new(options, navigator.clone(), Arc::new(SqliteStore::new(&db)), sink.clone());
    let outcome = pipeline.run();

    let RunOutcome::Succeeded { artifact, report } = outcome else {
        panic!("run did not succeed");
    };
    assert!(artifact.path().unwrap().exists());
    assert_eq!(report.total_rows(), 3);
    assert_eq!(row_count(&db, "uev_library"), 3);
    assert_eq!(navigator.quits(), 1);

    let events = sink.events();
    assert_eq!(events.first().unwrap().progress, Some(10));
    let last = events.last().unwrap();
    assert_eq!(last.severity, Severity::Success);
    assert_eq!(last.progress, Some(100));
    assert_eq!(terminal_events(&sink), 1);
}

#[test]
fn cancel_after_rename_skips_the_load() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("emergy.db");
    let download_dir = dir.path().join("download");
    let options = fast_options(&download_dir, &db);
    let navigator = Arc::new(FakeNavigator::new(Download::File {
        name: "UEV_Library.xlsx".into(),
        bytes: workbook_bytes(),
    }));

    // The sink cancels the run as soon as the artifact has been renamed.
    let handle: Arc<OnceLock<CancellationToken>> = Arc::new(OnceLock::new());
    let hook_handle = handle.clone();
    let sink = Arc::new(RecordingSink::with_hook(move |event| {
        if event.message.starts_with("File renamed to") {
            if let Some(token) = hook_handle.get() {
                token.request_cancel();
            }
        }
    }));

    let pipeline = Pipeline::new(options, navigator.clone(), Arc::new(SqliteStore::new(&db)), sink.clone());
    handle.set(pipeline.cancel_handle()).unwrap();
    let outcome = pipeline.run();

    assert!(outcome.is_cancelled(), "{outcome:?}");
    assert_eq!(navigator.quits(), 1);
    assert!(!db.exists() || table_count(&db) == 0);

    // The renamed artifact stays on disk.
    let files = emergy_etl::readiness::list_files(&download_dir).unwrap();
    assert_eq!(files.len(), 1);
    assert!(files.iter().all(|f| f.starts_with("dados_emergy_")));

    let last = sink.events().last().cloned().unwrap();
    assert_eq!(last.severity, Severity::Warning);
    assert_eq!(terminal_events(&sink), 1);
}

#[test]
fn failure_emits_a_single_error_event() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("emergy.db");
    let options = fast_options(&dir.path().join("download"), &db);
    let navigator = Arc::new(FakeNavigator::new(Download::Nothing).without_link());
    let sink = Arc::new(RecordingSink::default());

    let pipeline = Pipeline::new(options, navigator.clone(), Arc::new(SqliteStore::new(&db)), sink.clone());
    let outcome = pipeline.run();

    assert!(matches!(outcome, RunOutcome::Failed(_)), "{outcome:?}");
    assert_eq!(navigator.quits(), 1);
    assert_eq!(sink.count(Severity::Error), 1);
    assert_eq!(terminal_events(&sink), 1);
}

#[test]
fn worker_runs_in_the_background_and_a_new_run_clears_cancellation() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("emergy.db");
    let options = fast_options(&dir.path().join("download"), &db);
    let navigator = Arc::new(FakeNavigator::new(Download::File {
        name: "UEV_Library.xlsx".into(),
        bytes: workbook_bytes(),
    }));
    let sink = Arc::new(RecordingSink::default());

    let pipeline = Arc::new(Pipeline::new(
        options,
        navigator,
        Arc::new(SqliteStore::new(&db)),
        sink,
    ));
    // A cancel left over from a previous run must not leak into the next one.
    pipeline.request_cancel();

    let outcome = PipelineWorker::spawn(pipeline).unwrap().join();
    assert!(outcome.is_success(), "{outcome:?}");
    assert_eq!(row_count(&db, "uev_library"), 3);
}

#[test]
fn cancel_right_after_spawn_is_honored() {
    for _ in 0..20 {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("emergy.db");
        let options = fast_options(&dir.path().join("download"), &db);
        let navigator = Arc::new(FakeNavigator::new(Download::File {
            name: "UEV_Library.xlsx".into(),
            bytes: workbook_bytes(),
        }));
        let sink = Arc::new(RecordingSink::default());
        let pipeline = Arc::new(Pipeline::new(
            options,
            navigator.clone(),
            Arc::new(SqliteStore::new(&db)),
            sink.clone(),
        ));

        let worker = PipelineWorker::spawn(pipeline).unwrap();
        worker.request_cancel();
        let outcome = worker.join();

        assert!(outcome.is_cancelled(), "{outcome:?}");
        assert_eq!(navigator.quits(), 1);
        assert!(!db.exists() || table_count(&db) == 0);
        assert_eq!(sink.count(Severity::Warning), 1);
        assert_eq!(terminal_events(&sink), 1);
    }
}
