//! End-to-end pipeline behavior with scripted adapters.

use async_trait::async_trait;
use lectern::config::Credentials;
use lectern::error::{LecternError, StageError, StageErrorKind};
use lectern::ledger::{RunLedger, RunStatus};
use lectern::orchestrator::{
    Degradation, Orchestrator, OrchestratorOptions, RunOptions, RunReport, RunState,
};
use lectern::stage::{
    parse_diagnostic, Artifact, MarkupAdapter, MarkupOptions, RunContext, Stage, StageAdapter,
    StageRegistry, StageResult,
};
use lectern::store::ArtifactStore;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const TRANSCRIPT: &str = "Today we look at the cardiac cycle. Systole first, then diastole.";

const NOTES: &str = "# Cardiac Cycle

## Systole

The ventricles contract and eject blood.

[INSERT_IMAGE: 'Wiggers diagram']

## Diastole

The ventricles relax and fill.

[INSERT_IMAGE: 'Ventricular filling']
";

const ENRICHED: &str = "# Cardiac Cycle

## Systole

The ventricles contract and eject blood.

## Diastole

The ventricles relax and fill.
";

const BAD_LOG: &str = "(./document.tex\n[1] [2]\n./document.tex:87: Undefined control sequence.\nl.87 \\foo\n";

/// Adapter that writes fixed content, or fails while a failure is scripted.
struct Scripted {
    stage: Stage,
    output: Vec<u8>,
    failure: Mutex<Option<StageError>>,
    calls: AtomicUsize,
}

impl Scripted {
    fn new(stage: Stage, output: impl Into<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            stage,
            output: output.into(),
            failure: Mutex::new(None),
            calls: AtomicUsize::new(0),
        })
    }

    fn fail_with(&self, error: StageError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    fn recover(&self) {
        *self.failure.lock().unwrap() = None;
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageAdapter for Scripted {
    fn stage(&self) -> Stage {
        self.stage
    }

    async fn produce(&self, ctx: &RunContext, _input: &Artifact) -> StageResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failure = self.failure.lock().unwrap().clone();
        if let Some(error) = failure {
            return Err(error);
        }
        Ok(ctx.store.write(&ctx.run_id, self.stage, &self.output).await?)
    }
}

struct Harness {
    dir: TempDir,
    store: Arc<ArtifactStore>,
    ledger: Arc<RunLedger>,
    transcribe: Arc<Scripted>,
    notes: Arc<Scripted>,
    images: Arc<Scripted>,
    compile: Arc<Scripted>,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::new(dir.path().join("runs")));
        Self {
            store,
            ledger: Arc::new(RunLedger::in_memory().unwrap()),
            transcribe: Scripted::new(Stage::Transcribe, TRANSCRIPT),
            notes: Scripted::new(Stage::SynthesizeNotes, NOTES),
            images: Scripted::new(Stage::EnrichImages, ENRICHED),
            compile: Scripted::new(Stage::CompileDocument, b"%PDF-1.5 fake".to_vec()),
            dir,
        }
    }

    fn orchestrator(&self) -> Orchestrator {
        self.orchestrator_with(all_credentials())
    }

    fn orchestrator_with(&self, credentials: Credentials) -> Orchestrator {
        let registry = StageRegistry::new()
            .with(self.transcribe.clone())
            .with(self.notes.clone())
            .with(self.images.clone())
            .with(Arc::new(MarkupAdapter::new(MarkupOptions::default())))
            .with(self.compile.clone());

        Orchestrator::with_components(
            self.store.clone(),
            registry,
            self.ledger.clone(),
            credentials,
            OrchestratorOptions {
                output_dir: Some(self.output_dir()),
                max_concurrent_runs: 2,
            },
        )
    }

    fn output_dir(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    /// Create an input file and return its path as the operator would type it.
    fn input(&self, name: &str, content: &str) -> String {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path.display().to_string()
    }

    fn calls(&self) -> [usize; 4] {
        [
            self.transcribe.calls(),
            self.notes.calls(),
            self.images.calls(),
            self.compile.calls(),
        ]
    }
}

fn all_credentials() -> Credentials {
    Credentials {
        transcription_key: Some("sk-transcribe".into()),
        generation_key: Some("sk-generate".into()),
        image_search_key: Some("google-key".into()),
        image_search_engine: Some("cse-id".into()),
    }
}

fn exists(store: &ArtifactStore, report: &RunReport, stage: Stage) -> bool {
    store.exists(&report.run_id, stage)
}

#[tokio::test]
async fn test_video_runs_every_stage() {
    let h = Harness::new();
    let input = h.input("lecture.mp4", "not really a video");

    let report = h.orchestrator().run(&input, &RunOptions::default()).await.unwrap();

    assert_eq!(report.outcome, RunState::Done);
    assert_eq!(report.status(), RunStatus::Done);
    assert_eq!(report.completed, Stage::ALL.to_vec());
    assert!(report.resumed.is_empty());
    assert_eq!(h.calls(), [1, 1, 1, 1]);
    assert_eq!(h.store.present_stages(&report.run_id), Stage::ALL.to_vec());

    let document = report.document.clone().unwrap();
    assert!(document.is_file());
    let published = report.published.clone().unwrap();
    assert_eq!(published, h.output_dir().join(format!("{}.pdf", report.run_id)));
    assert!(published.is_file());

    let record = h.ledger.find_run(&report.run_id).unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Done);
}

#[tokio::test]
async fn test_markdown_input_starts_at_notes() {
    let h = Harness::new();
    let input = h.input("notes.md", TRANSCRIPT);

    let report = h.orchestrator().run(&input, &RunOptions::default()).await.unwrap();

    assert_eq!(report.outcome, RunState::Done);
    assert_eq!(h.transcribe.calls(), 0);
    assert_eq!(report.completed.first(), Some(&Stage::SynthesizeNotes));
    assert!(!exists(&h.store, &report, Stage::Transcribe));
    assert!(exists(&h.store, &report, Stage::CompileDocument));
}

#[tokio::test]
async fn test_image_quota_degrades_run() {
    let h = Harness::new();
    h.images.fail_with(StageError::new(
        StageErrorKind::QuotaExceeded,
        "HTTP 429: dailyLimitExceeded",
    ));
    let input = h.input("lecture.mp4", "");

    let report = h.orchestrator().run(&input, &RunOptions::default()).await.unwrap();

    assert_eq!(report.outcome, RunState::PartiallySucceeded);
    assert!(!report.is_failed());
    assert!(report.document.as_ref().unwrap().is_file());
    assert_eq!(
        report.unresolved_images(),
        vec!["Wiggers diagram".to_string(), "Ventricular filling".to_string()]
    );
    assert!(report
        .degradations
        .iter()
        .any(|d| matches!(d, Degradation::StageFailed { stage: Stage::EnrichImages, .. })));

    // The fallback artifact has no raw placeholders left for the converter
    let enriched = std::fs::read_to_string(h.store.path_for(&report.run_id, Stage::EnrichImages))
        .unwrap();
    assert!(!enriched.contains("[INSERT_IMAGE"));

    let latex = std::fs::read_to_string(h.store.path_for(&report.run_id, Stage::ConvertMarkup))
        .unwrap();
    assert!(latex.contains("% unresolved image: Wiggers diagram"));

    let events = h.ledger.stage_events(&report.run_id).unwrap();
    assert!(events.iter().any(|e| e.stage == "images" && e.outcome == "degraded"));
    let record = h.ledger.find_run(&report.run_id).unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Partial);
}

#[tokio::test]
async fn test_compile_error_fails_without_document() {
    let h = Harness::new();
    h.compile.fail_with(parse_diagnostic(BAD_LOG));
    let input = h.input("lecture.mp4", "");

    let report = h.orchestrator().run(&input, &RunOptions::default()).await.unwrap();

    match &report.outcome {
        RunState::Failed { stage, error, last_artifact } => {
            assert_eq!(*stage, Stage::CompileDocument);
            assert_eq!(error.diagnostic().and_then(|d| d.line), Some(87));
            assert_eq!(
                last_artifact.as_deref(),
                Some(h.store.path_for(&report.run_id, Stage::ConvertMarkup).as_path())
            );
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(report.document.is_none());
    assert!(report.published.is_none());
    assert!(!exists(&h.store, &report, Stage::CompileDocument));
    assert!(!h.output_dir().join(format!("{}.pdf", report.run_id)).exists());
    assert_eq!(report.status(), RunStatus::Failed);
}

#[tokio::test]
async fn test_fatal_failure_stops_later_stages() {
    let h = Harness::new();
    h.notes.fail_with(StageError::new(StageErrorKind::ContextLength, "too long"));
    let input = h.input("lecture.wav", "");

    let report = h.orchestrator().run(&input, &RunOptions::default()).await.unwrap();

    assert!(matches!(
        report.outcome,
        RunState::Failed { stage: Stage::SynthesizeNotes, .. }
    ));
    assert_eq!(report.completed, vec![Stage::Transcribe]);
    assert_eq!(h.calls(), [1, 1, 0, 0]);
}

#[tokio::test]
async fn test_resume_skips_completed_stages() {
    let h = Harness::new();
    h.compile.fail_with(parse_diagnostic(BAD_LOG));
    let input = h.input("lecture.mp4", "");

    let first = h.orchestrator().run(&input, &RunOptions::default()).await.unwrap();
    assert!(first.is_failed());
    assert_eq!(h.calls(), [1, 1, 1, 1]);

    h.compile.recover();
    let second = h.orchestrator().run(&input, &RunOptions::default()).await.unwrap();

    assert_eq!(second.run_id, first.run_id);
    assert_eq!(second.outcome, RunState::Done);
    assert_eq!(h.calls(), [1, 1, 1, 2]);
    assert_eq!(
        second.resumed,
        vec![
            Stage::Transcribe,
            Stage::SynthesizeNotes,
            Stage::EnrichImages,
            Stage::ConvertMarkup
        ]
    );
    assert_eq!(second.completed, Stage::ALL.to_vec());

    // Same artifact set as an uninterrupted run
    let fresh = Harness::new();
    let fresh_input = fresh.input("lecture.mp4", "");
    let uninterrupted = fresh
        .orchestrator()
        .run(&fresh_input, &RunOptions::default())
        .await
        .unwrap();
    assert_eq!(
        h.store.present_stages(&second.run_id),
        fresh.store.present_stages(&uninterrupted.run_id)
    );

    // A finished run is not reprocessed at all
    let third = h.orchestrator().run(&input, &RunOptions::default()).await.unwrap();
    assert_eq!(third.outcome, RunState::Done);
    assert_eq!(h.calls(), [1, 1, 1, 2]);
    assert_eq!(third.resumed, Stage::ALL.to_vec());
}

#[tokio::test]
async fn test_resumed_degradation_is_still_reported() {
    let h = Harness::new();
    h.images.fail_with(StageError::new(StageErrorKind::QuotaExceeded, "daily cap"));
    let input = h.input("notes.txt", TRANSCRIPT);

    let first = h.orchestrator().run(&input, &RunOptions::default()).await.unwrap();
    assert_eq!(first.outcome, RunState::PartiallySucceeded);

    let again = h.orchestrator().run(&input, &RunOptions::default()).await.unwrap();
    assert_eq!(again.outcome, RunState::PartiallySucceeded);
    assert_eq!(again.unresolved_images().len(), 2);
    assert_eq!(h.images.calls(), 1);
}

#[tokio::test]
async fn test_redo_reruns_from_stage() {
    let h = Harness::new();
    let input = h.input("lecture.mp3", "");
    let orchestrator = h.orchestrator();

    tokio_test::assert_ok!(orchestrator.run(&input, &RunOptions::default()).await);

    let options = RunOptions {
        redo_from: Some(Stage::ConvertMarkup),
    };
    let report = orchestrator.run(&input, &options).await.unwrap();

    assert_eq!(report.outcome, RunState::Done);
    assert_eq!(
        report.resumed,
        vec![Stage::Transcribe, Stage::SynthesizeNotes, Stage::EnrichImages]
    );
    assert_eq!(h.calls(), [1, 1, 1, 2]);
}

#[tokio::test]
async fn test_failed_redo_discards_stale_document() {
    let h = Harness::new();
    let input = h.input("lecture.mp4", "");
    let orchestrator = h.orchestrator();

    let first = orchestrator.run(&input, &RunOptions::default()).await.unwrap();
    assert_eq!(first.outcome, RunState::Done);

    h.compile.fail_with(parse_diagnostic(BAD_LOG));
    let options = RunOptions {
        redo_from: Some(Stage::SynthesizeNotes),
    };
    let redo = orchestrator.run(&input, &options).await.unwrap();

    assert!(redo.is_failed());
    assert!(redo.document.is_none());
    assert!(!exists(&h.store, &redo, Stage::CompileDocument));
    let record = h.ledger.find_run(&redo.run_id).unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Failed);
    assert!(record.document_path.is_none());

    // A plain re-run compiles the new markup instead of reporting the old PDF
    h.compile.recover();
    let again = orchestrator.run(&input, &RunOptions::default()).await.unwrap();

    assert_eq!(again.outcome, RunState::Done);
    assert_eq!(h.calls(), [1, 2, 2, 3]);
    assert_eq!(again.resumed.last(), Some(&Stage::ConvertMarkup));
    assert!(again.document.unwrap().is_file());
}

#[tokio::test]
async fn test_same_label_inputs_publish_separately() {
    let h = Harness::new();
    let inputs = vec![h.input("lecture.mp4", ""), h.input("lecture.md", TRANSCRIPT)];

    let results = h
        .orchestrator()
        .run_batch(&inputs, &RunOptions::default())
        .await;

    let published: Vec<PathBuf> = results
        .iter()
        .map(|(_, r)| r.as_ref().unwrap().published.clone().unwrap())
        .collect();
    assert_ne!(published[0], published[1]);
    for (path, (_, result)) in published.iter().zip(&results) {
        let report = result.as_ref().unwrap();
        assert_eq!(report.label, "lecture");
        assert_eq!(path, &h.output_dir().join(format!("{}.pdf", report.run_id)));
        assert!(path.is_file());
    }
}

#[tokio::test]
async fn test_cleanup_keeps_document() {
    let h = Harness::new();
    let input = h.input("lecture.mp4", "");
    let orchestrator = h.orchestrator();
    let report = orchestrator.run(&input, &RunOptions::default()).await.unwrap();

    let removed = orchestrator.cleanup(&report, false).await.unwrap();

    assert!(!removed.is_empty());
    assert_eq!(
        h.store.present_stages(&report.run_id),
        vec![Stage::CompileDocument]
    );
    assert!(report.document.unwrap().is_file());
}

#[tokio::test]
async fn test_cleanup_of_failed_run_needs_force() {
    let h = Harness::new();
    h.compile.fail_with(parse_diagnostic(BAD_LOG));
    let input = h.input("lecture.mp4", "");
    let orchestrator = h.orchestrator();
    let report = orchestrator.run(&input, &RunOptions::default()).await.unwrap();
    let before = h.store.present_stages(&report.run_id);

    let removed = orchestrator.cleanup(&report, false).await.unwrap();
    assert!(removed.is_empty());
    assert_eq!(h.store.present_stages(&report.run_id), before);

    assert!(orchestrator.clean_run(&report.run_id, false).await.unwrap().is_none());

    let removed = orchestrator.clean_run(&report.run_id, true).await.unwrap().unwrap();
    assert!(!removed.is_empty());
    assert!(h.store.present_stages(&report.run_id).is_empty());
}

#[tokio::test]
async fn test_clean_unknown_run() {
    let h = Harness::new();
    let err = h.orchestrator().clean_run("042-nope", true).await.unwrap_err();
    assert!(matches!(err, LecternError::RunNotFound(_)));
}

#[tokio::test]
async fn test_missing_credentials_stop_before_any_stage() {
    let h = Harness::new();
    let input = h.input("lecture.mp4", "");
    let credentials = Credentials {
        transcription_key: None,
        ..all_credentials()
    };

    let err = h
        .orchestrator_with(credentials)
        .run(&input, &RunOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, LecternError::Config(_)));
    assert!(err.to_string().contains("OPENAI_API_KEY"));
    assert_eq!(h.calls(), [0, 0, 0, 0]);
    assert!(h.ledger.list_runs().unwrap().is_empty());
}

#[tokio::test]
async fn test_text_input_does_not_need_transcription_key() {
    let h = Harness::new();
    let input = h.input("notes.md", TRANSCRIPT);
    let credentials = Credentials {
        transcription_key: None,
        ..all_credentials()
    };

    let report = h
        .orchestrator_with(credentials)
        .run(&input, &RunOptions::default())
        .await
        .unwrap();
    assert_eq!(report.outcome, RunState::Done);
}

#[tokio::test]
async fn test_unsupported_input_is_rejected() {
    let h = Harness::new();
    let input = h.input("slides.pptx", "");

    let err = h
        .orchestrator()
        .run(&input, &RunOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LecternError::UnsupportedInput { .. }));
    assert_eq!(h.calls(), [0, 0, 0, 0]);
}

#[tokio::test]
async fn test_batch_keeps_input_order() {
    let h = Harness::new();
    let inputs = vec![
        h.input("a.md", TRANSCRIPT),
        h.input("b.txt", TRANSCRIPT),
        h.input("c.mp4", ""),
        Path::new("/definitely/missing.mp4").display().to_string(),
    ];

    let results = h
        .orchestrator()
        .run_batch(&inputs, &RunOptions::default())
        .await;

    assert_eq!(results.len(), 4);
    for (i, (input, _)) in results.iter().enumerate() {
        assert_eq!(input, &inputs[i]);
    }
    for (_, result) in &results[..3] {
        assert_eq!(result.as_ref().unwrap().outcome, RunState::Done);
    }
    assert!(results[3].1.is_err());

    let mut run_ids: Vec<String> = results[..3]
        .iter()
        .map(|(_, r)| r.as_ref().unwrap().run_id.clone())
        .collect();
    run_ids.sort();
    run_ids.dedup();
    assert_eq!(run_ids.len(), 3);
}
