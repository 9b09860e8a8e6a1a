//! Pipeline orchestrator for Lectern.
//!
//! Drives one input through its stage plan as an explicit state machine:
//! classify, then one stage at a time until the document is compiled or a
//! fatal stage fails. Existing artifacts are reused so an interrupted run
//! resumes where it stopped.

use crate::config::{Credentials, Prompts, Settings};
use crate::error::{LecternError, Result, StageError};
use crate::input::{classify, InputKind};
use crate::ledger::{RunLedger, RunStatus, StageOutcome};
use crate::stage::{
    strip_placeholders, unresolved_queries, Artifact, CompileAdapter, GoogleImageSearch,
    ImagesAdapter, MarkupAdapter, MarkupOptions, NotesAdapter, RetryPolicy, RunContext, Stage,
    StageRegistry, TranscribeAdapter,
};
use crate::store::ArtifactStore;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Per-invocation choices.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Re-run this stage and every later one even if their artifacts exist.
    pub redo_from: Option<Stage>,
}

/// Orchestrator-wide behavior.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Directory the finished document is copied to, as `<run_id>.pdf`.
    pub output_dir: Option<PathBuf>,
    /// Concurrent runs in batch mode.
    pub max_concurrent_runs: usize,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            output_dir: None,
            max_concurrent_runs: 2,
        }
    }
}

/// Where a run is in the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    Classify,
    /// About to run `stage` on `input`.
    Stage { stage: Stage, input: Artifact },
    Done,
    PartiallySucceeded,
    Failed {
        stage: Stage,
        error: StageError,
        /// Last artifact successfully produced before the failure.
        last_artifact: Option<PathBuf>,
    },
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Done | RunState::PartiallySucceeded | RunState::Failed { .. }
        )
    }

    fn status(&self) -> RunStatus {
        match self {
            RunState::Done => RunStatus::Done,
            RunState::PartiallySucceeded => RunStatus::Partial,
            RunState::Failed { .. } => RunStatus::Failed,
            _ => RunStatus::Pending,
        }
    }
}

/// A non-fatal loss of quality.
#[derive(Debug, Clone, PartialEq)]
pub enum Degradation {
    /// A non-fatal stage failed and was replaced by a fallback artifact.
    StageFailed { stage: Stage, error: StageError },
    /// Image placeholders left unresolved.
    UnresolvedImages(Vec<String>),
}

impl std::fmt::Display for Degradation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Degradation::StageFailed { stage, error } => write!(f, "{} stage failed: {}", stage, error),
            Degradation::UnresolvedImages(queries) => {
                write!(f, "{} unresolved image(s): {}", queries.len(), queries.join("; "))
            }
        }
    }
}

/// Working record of one run.
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub plan: &'static [Stage],
    /// Always a prefix of `plan`.
    pub completed: Vec<Stage>,
    /// Completed stages whose artifacts were reused rather than produced.
    pub resumed: Vec<Stage>,
    pub degradations: Vec<Degradation>,
    pub state: RunState,
    last_artifact: Option<Artifact>,
}

impl PipelineState {
    fn new(plan: &'static [Stage]) -> Self {
        Self {
            plan,
            completed: Vec::new(),
            resumed: Vec::new(),
            degradations: Vec::new(),
            state: RunState::Classify,
            last_artifact: None,
        }
    }

    fn complete(&mut self, stage: Stage, artifact: Artifact) -> Result<()> {
        if self.plan.get(self.completed.len()) != Some(&stage) {
            return Err(LecternError::Ledger(format!(
                "stage {} completed out of order (after {:?})",
                stage, self.completed
            )));
        }
        self.completed.push(stage);
        self.last_artifact = Some(artifact);
        Ok(())
    }

    /// Stage after the completed prefix, if any.
    fn next_stage(&self) -> Option<Stage> {
        self.plan.get(self.completed.len()).copied()
    }

    /// Whether `completed` is a prefix of `plan`.
    pub fn is_consistent(&self) -> bool {
        self.plan.starts_with(&self.completed)
    }
}

/// Outcome of one run, as reported to the operator.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub input: String,
    pub label: String,
    pub kind: InputKind,
    pub completed: Vec<Stage>,
    pub resumed: Vec<Stage>,
    pub degradations: Vec<Degradation>,
    /// Terminal state: Done, PartiallySucceeded or Failed.
    pub outcome: RunState,
    /// The compiled document inside the run directory.
    pub document: Option<PathBuf>,
    /// Copy of the document in the output directory.
    pub published: Option<PathBuf>,
}

impl RunReport {
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, RunState::Failed { .. })
    }

    pub fn status(&self) -> RunStatus {
        self.outcome.status()
    }

    /// Placeholders that did not get an image.
    pub fn unresolved_images(&self) -> Vec<String> {
        self.degradations
            .iter()
            .filter_map(|d| match d {
                Degradation::UnresolvedImages(q) => Some(q.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

/// The main orchestrator for the Lectern pipeline.
pub struct Orchestrator {
    store: Arc<ArtifactStore>,
    registry: StageRegistry,
    ledger: Arc<RunLedger>,
    credentials: Credentials,
    options: OrchestratorOptions,
}

impl Orchestrator {
    /// Create an orchestrator with the real stage adapters.
    pub fn new(settings: &Settings, credentials: Credentials) -> Result<Self> {
        let prompts = Prompts::load(
            settings.prompts.custom_dir.as_deref(),
            Some(&settings.prompts.variables),
        )?;
        let retry = RetryPolicy::from_settings(&settings.retry);
        let key = |k: &Option<String>| k.clone().unwrap_or_default();

        let search = Arc::new(GoogleImageSearch::new(
            &key(&credentials.image_search_key),
            &key(&credentials.image_search_engine),
            &settings.images,
        )?);

        let registry = StageRegistry::new()
            .with(Arc::new(TranscribeAdapter::new(
                &key(&credentials.transcription_key),
                &settings.transcription,
                retry.clone(),
            )?))
            .with(Arc::new(NotesAdapter::new(
                &key(&credentials.generation_key),
                &settings.notes,
                prompts,
                retry.clone(),
            )?))
            .with(Arc::new(ImagesAdapter::new(search, &settings.images, retry)))
            .with(Arc::new(MarkupAdapter::new(MarkupOptions::from(&settings.markup))))
            .with(Arc::new(CompileAdapter::new(&settings.compile)));

        let store = Arc::new(ArtifactStore::new(settings.runs_dir()));
        let ledger = Arc::new(RunLedger::open(&settings.ledger_path())?);

        let options = OrchestratorOptions {
            output_dir: settings.output_dir(),
            max_concurrent_runs: settings.pipeline.max_concurrent_runs,
        };

        Ok(Self::with_components(store, registry, ledger, credentials, options))
    }

    /// Create an orchestrator with custom components.
    pub fn with_components(
        store: Arc<ArtifactStore>,
        registry: StageRegistry,
        ledger: Arc<RunLedger>,
        credentials: Credentials,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            store,
            registry,
            ledger,
            credentials,
            options,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn ledger(&self) -> &RunLedger {
        &self.ledger
    }

    /// Run one input through its stage plan.
    ///
    /// Errors are reserved for problems before the first stage (unsupported
    /// input, missing credentials, ledger failures); stage failures end in a
    /// report with a `Failed` outcome.
    #[instrument(skip(self, options))]
    pub async fn run(&self, input: &str, options: &RunOptions) -> Result<RunReport> {
        let classification = classify(input)?;
        let plan = classification.kind.plan();
        self.credentials.require_for(plan)?;
        let mut pipeline = PipelineState::new(plan);

        let record = self.ledger.open_run(
            &classification.key,
            classification.kind.as_str(),
            &classification.label,
            &classification.slug,
        )?;
        let run_id = record.run_id;
        info!("Run {} ({}) starting at {}", run_id, classification.kind, classification.entry_stage);

        let ctx = RunContext::new(run_id.clone(), classification.label.clone(), self.store.clone());

        pipeline.state = self.resume(&ctx, &mut pipeline, classification.source.clone(), options).await?;

        while let RunState::Stage { stage, input } = pipeline.state.clone() {
            pipeline.state = self.step(&ctx, &mut pipeline, stage, input).await?;
        }

        let document = match pipeline.state {
            RunState::Failed { .. } => None,
            _ => self.store.artifact(&run_id, Stage::CompileDocument).and_then(|a| a.path().map(PathBuf::from)),
        };

        let published = match &document {
            Some(doc) => self.publish(doc, &run_id).await,
            None => None,
        };

        self.ledger
            .finish_run(&run_id, pipeline.state.status(), document.as_deref())?;

        match &pipeline.state {
            RunState::Failed { stage, error, .. } => {
                error!("Run {} failed at {}: {}", run_id, stage, error)
            }
            state => info!("Run {} finished: {}", run_id, state.status()),
        }

        Ok(RunReport {
            run_id,
            input: input.to_string(),
            label: classification.label,
            kind: classification.kind,
            completed: pipeline.completed,
            resumed: pipeline.resumed,
            degradations: pipeline.degradations,
            outcome: pipeline.state,
            document,
            published,
        })
    }

    /// Mark already-produced stages as completed and pick the first stage to run.
    async fn resume(
        &self,
        ctx: &RunContext,
        pipeline: &mut PipelineState,
        source: Artifact,
        options: &RunOptions,
    ) -> Result<RunState> {
        let plan = pipeline.plan;

        // Furthest stage whose artifact is present and not being redone
        let resume_at = plan
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, s)| options.redo_from.map(|from| **s < from).unwrap_or(true))
            .find(|(_, s)| self.store.exists(&ctx.run_id, **s))
            .map(|(i, _)| i);

        // Everything after the resume point is about to be rebuilt
        let rerun = &plan[resume_at.map(|i| i + 1).unwrap_or(0)..];
        let stale: Vec<Stage> = rerun
            .iter()
            .copied()
            .filter(|s| self.store.exists(&ctx.run_id, *s))
            .collect();
        if !stale.is_empty() {
            info!("Discarding stale artifacts of {} for {:?}", ctx.run_id, stale);
            self.store.invalidate(&ctx.run_id, &stale).await?;
        }

        let mut input = source;
        if let Some(last) = resume_at {
            for stage in &plan[..=last] {
                self.ledger
                    .record_stage(&ctx.run_id, *stage, StageOutcome::Skipped, Some("artifact present"))?;
                pipeline.resumed.push(*stage);

                let artifact = self
                    .store
                    .artifact(&ctx.run_id, *stage)
                    .unwrap_or_else(|| Artifact::produced(*stage, self.store.path_for(&ctx.run_id, *stage)));

                if *stage == Stage::EnrichImages && artifact.is_present() {
                    self.note_unresolved(pipeline, &artifact).await;
                }

                pipeline.complete(*stage, artifact.clone())?;
                input = artifact;
            }
            info!("Resuming {} after {}", ctx.run_id, plan[last]);
        }

        Ok(match pipeline.next_stage() {
            Some(stage) => RunState::Stage { stage, input },
            None => self.finished(pipeline),
        })
    }

    /// Run a single stage and decide the next state.
    #[instrument(skip(self, ctx, pipeline, input), fields(run = %ctx.run_id))]
    async fn step(
        &self,
        ctx: &RunContext,
        pipeline: &mut PipelineState,
        stage: Stage,
        input: Artifact,
    ) -> Result<RunState> {
        eprintln!("  [{}] {}...", ctx.run_id, stage);

        let artifact = match self.registry.invoke(stage, ctx, &input).await {
            Ok(artifact) => {
                self.ledger
                    .record_stage(&ctx.run_id, stage, StageOutcome::Completed, None)?;
                artifact
            }
            Err(error) if !stage.is_fatal() => {
                warn!("{} stage failed, continuing without it: {}", stage, error);
                match self.degrade(ctx, stage, &input).await {
                    Ok(artifact) => {
                        self.ledger.record_stage(
                            &ctx.run_id,
                            stage,
                            StageOutcome::Degraded,
                            Some(&error.to_string()),
                        )?;
                        pipeline.degradations.push(Degradation::StageFailed { stage, error });
                        artifact
                    }
                    Err(fallback_error) => {
                        return self.fail(ctx, pipeline, stage, fallback_error);
                    }
                }
            }
            Err(error) => return self.fail(ctx, pipeline, stage, error),
        };

        if stage == Stage::EnrichImages {
            self.note_unresolved(pipeline, &artifact).await;
        }

        pipeline.complete(stage, artifact.clone())?;
        debug!("Completed {:?}", pipeline.completed);

        Ok(match pipeline.next_stage() {
            Some(next) => RunState::Stage { stage: next, input: artifact },
            None => self.finished(pipeline),
        })
    }

    fn fail(
        &self,
        ctx: &RunContext,
        pipeline: &PipelineState,
        stage: Stage,
        error: StageError,
    ) -> Result<RunState> {
        self.ledger.record_stage(
            &ctx.run_id,
            stage,
            StageOutcome::Failed,
            Some(&error.to_string()),
        )?;
        Ok(RunState::Failed {
            stage,
            error,
            last_artifact: pipeline
                .last_artifact
                .as_ref()
                .and_then(|a| a.path().map(PathBuf::from)),
        })
    }

    fn finished(&self, pipeline: &PipelineState) -> RunState {
        if pipeline.degradations.is_empty() {
            RunState::Done
        } else {
            RunState::PartiallySucceeded
        }
    }

    /// Fallback artifact for a failed non-fatal stage: the notes with every
    /// placeholder marked unresolved.
    async fn degrade(
        &self,
        ctx: &RunContext,
        stage: Stage,
        input: &Artifact,
    ) -> std::result::Result<Artifact, StageError> {
        let notes = input.read_text().await?;
        Ok(self
            .store
            .write(&ctx.run_id, stage, strip_placeholders(&notes))
            .await?)
    }

    async fn note_unresolved(&self, pipeline: &mut PipelineState, artifact: &Artifact) {
        match artifact.read_text().await {
            Ok(text) => {
                let unresolved = unresolved_queries(&text);
                if !unresolved.is_empty() {
                    warn!("{} image placeholder(s) unresolved", unresolved.len());
                    pipeline.degradations.push(Degradation::UnresolvedImages(unresolved));
                }
            }
            Err(e) => warn!("Could not scan {} for unresolved images: {}", artifact, e),
        }
    }

    /// Copy the document to the output directory as `<run_id>.pdf`.
    async fn publish(&self, document: &std::path::Path, run_id: &str) -> Option<PathBuf> {
        let dir = self.options.output_dir.as_ref()?;
        let target = dir.join(format!("{}.pdf", run_id));

        let result = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::copy(document, &target).await?;
            Ok::<_, std::io::Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                info!("Published {}", target.display());
                Some(target)
            }
            Err(e) => {
                warn!("Failed to copy document to {}: {}", dir.display(), e);
                None
            }
        }
    }

    /// Run many inputs, at most `max_concurrent_runs` at a time. Results keep input order.
    pub async fn run_batch(
        &self,
        inputs: &[String],
        options: &RunOptions,
    ) -> Vec<(String, Result<RunReport>)> {
        let mut results: Vec<(usize, String, Result<RunReport>)> =
            stream::iter(inputs.iter().cloned().enumerate())
                .map(|(idx, input)| async move {
                    let result = self.run(&input, options).await;
                    (idx, input, result)
                })
                .buffer_unordered(self.options.max_concurrent_runs.max(1))
                .collect()
                .await;

        results.sort_by_key(|(idx, _, _)| *idx);
        results
            .into_iter()
            .map(|(_, input, result)| (input, result))
            .collect()
    }

    /// Delete a finished run's intermediates. A failed run is left alone unless forced.
    pub async fn cleanup(&self, report: &RunReport, force: bool) -> Result<Vec<PathBuf>> {
        if report.is_failed() && !force {
            info!("Keeping artifacts of failed run {}", report.run_id);
            return Ok(Vec::new());
        }
        self.store.purge_intermediates(&report.run_id).await
    }

    /// Cleanup by run id, for runs from earlier invocations.
    ///
    /// Returns `None` when the run failed and `force` was not given.
    pub async fn clean_run(&self, run_id: &str, force: bool) -> Result<Option<Vec<PathBuf>>> {
        let record = self
            .ledger
            .find_run(run_id)?
            .ok_or_else(|| LecternError::RunNotFound(run_id.to_string()))?;

        if record.status == RunStatus::Failed && !force {
            return Ok(None);
        }
        Ok(Some(self.store.purge_intermediates(run_id).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_state_rejects_out_of_order_completion() {
        let plan: &'static [Stage] = InputKind::LocalText.plan();
        let mut state = PipelineState::new(plan);
        let notes = Artifact::produced(Stage::SynthesizeNotes, PathBuf::from("notes.md"));
        let markup = Artifact::produced(Stage::ConvertMarkup, PathBuf::from("document.tex"));

        assert!(state.complete(Stage::ConvertMarkup, markup).is_err());
        assert!(state.complete(Stage::SynthesizeNotes, notes).is_ok());
        assert!(state.is_consistent());
        assert_eq!(state.next_stage(), Some(Stage::EnrichImages));
    }

    #[test]
    fn test_terminal_states() {
        assert!(RunState::Done.is_terminal());
        assert!(RunState::PartiallySucceeded.is_terminal());
        assert!(!RunState::Classify.is_terminal());
        assert_eq!(RunState::PartiallySucceeded.status(), RunStatus::Partial);
    }

    #[test]
    fn test_degradation_display() {
        let d = Degradation::UnresolvedImages(vec!["a".into(), "b".into()]);
        assert_eq!(d.to_string(), "2 unresolved image(s): a; b");
    }
}
