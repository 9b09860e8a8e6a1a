//! Pipeline stages and the adapter contract.
//!
//! Every stage consumes one artifact and produces exactly one artifact in the
//! [`ArtifactStore`]. Adapters are the only code that talks to external
//! services or binaries; the orchestrator only sees [`StageAdapter`].

mod compile;
mod images;
mod markup;
mod notes;
pub mod retry;
mod transcribe;

pub use compile::{parse_diagnostic, CompileAdapter};
pub use images::{
    placeholder_queries, strip_placeholders, unresolved_queries, GoogleImageSearch,
    ImageCandidate, ImageSearch, ImagesAdapter,
};
pub use markup::{markdown_to_latex, MarkupAdapter, MarkupOptions};
pub use notes::{validate_notes, NotesAdapter};
pub use retry::RetryPolicy;
pub use transcribe::TranscribeAdapter;

use crate::error::StageError;
use crate::store::ArtifactStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Outcome of one stage invocation.
pub type StageResult = std::result::Result<Artifact, StageError>;

/// One step of the lecture pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Transcribe,
    SynthesizeNotes,
    EnrichImages,
    ConvertMarkup,
    CompileDocument,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Transcribe,
        Stage::SynthesizeNotes,
        Stage::EnrichImages,
        Stage::ConvertMarkup,
        Stage::CompileDocument,
    ];

    /// Artifact file name inside the run directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            Stage::Transcribe => "transcript.txt",
            Stage::SynthesizeNotes => "notes.md",
            Stage::EnrichImages => "notes_images.md",
            Stage::ConvertMarkup => "document.tex",
            Stage::CompileDocument => "document.pdf",
        }
    }

    /// Auxiliary directory owned by this stage, if any.
    pub fn sidecar_dir(&self) -> Option<&'static str> {
        match self {
            Stage::Transcribe => Some("media"),
            Stage::EnrichImages => Some("images"),
            _ => None,
        }
    }

    /// Content type of the artifact this stage produces.
    pub fn output(&self) -> ContentType {
        match self {
            Stage::Transcribe => ContentType::Transcript,
            Stage::SynthesizeNotes => ContentType::Markdown,
            Stage::EnrichImages => ContentType::Markdown,
            Stage::ConvertMarkup => ContentType::Markup,
            Stage::CompileDocument => ContentType::Pdf,
        }
    }

    /// Whether this stage can consume an artifact of the given type.
    pub fn accepts(&self, content_type: ContentType) -> bool {
        match self {
            Stage::Transcribe => matches!(
                content_type,
                ContentType::Audio | ContentType::Video | ContentType::RemoteVideo
            ),
            Stage::SynthesizeNotes => content_type == ContentType::Transcript,
            Stage::EnrichImages | Stage::ConvertMarkup => content_type == ContentType::Markdown,
            Stage::CompileDocument => content_type == ContentType::Markup,
        }
    }

    /// Whether a failure of this stage ends the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Stage::EnrichImages)
    }

    /// Position in [`Stage::ALL`].
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Transcribe => "transcribe",
            Stage::SynthesizeNotes => "notes",
            Stage::EnrichImages => "images",
            Stage::ConvertMarkup => "markup",
            Stage::CompileDocument => "compile",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "transcribe" | "transcript" => Ok(Stage::Transcribe),
            "notes" | "synthesize" | "synthesize_notes" => Ok(Stage::SynthesizeNotes),
            "images" | "enrich" | "enrich_images" => Ok(Stage::EnrichImages),
            "markup" | "latex" | "convert_markup" => Ok(Stage::ConvertMarkup),
            "compile" | "pdf" | "compile_document" => Ok(Stage::CompileDocument),
            _ => Err(format!(
                "Unknown stage: {} (expected transcribe, notes, images, markup or compile)",
                s
            )),
        }
    }
}

/// Kind of content an artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Audio,
    Video,
    RemoteVideo,
    Transcript,
    Markdown,
    Markup,
    Pdf,
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ContentType::Audio => "audio",
            ContentType::Video => "video",
            ContentType::RemoteVideo => "remote video",
            ContentType::Transcript => "transcript",
            ContentType::Markdown => "markdown",
            ContentType::Markup => "markup",
            ContentType::Pdf => "pdf",
        };
        f.write_str(name)
    }
}

/// Where an artifact lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    File(PathBuf),
    Remote(String),
}

/// The input or output of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Producing stage; `None` for the operator's original input.
    pub stage: Option<Stage>,
    pub location: Location,
    pub content_type: ContentType,
}

impl Artifact {
    /// The operator-supplied input of a run.
    pub fn source(location: Location, content_type: ContentType) -> Self {
        Self {
            stage: None,
            location,
            content_type,
        }
    }

    /// An artifact written by `stage` at `path`.
    pub fn produced(stage: Stage, path: PathBuf) -> Self {
        Self {
            stage: Some(stage),
            location: Location::File(path),
            content_type: stage.output(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            Location::File(p) => Some(p),
            Location::Remote(_) => None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match &self.location {
            Location::Remote(u) => Some(u),
            Location::File(_) => None,
        }
    }

    /// Remote inputs are always considered present; files must exist.
    pub fn is_present(&self) -> bool {
        match &self.location {
            Location::File(p) => p.is_file(),
            Location::Remote(_) => true,
        }
    }

    /// Read a text artifact.
    pub async fn read_text(&self) -> std::result::Result<String, StageError> {
        let path = self.path().ok_or_else(|| {
            StageError::contract(format!("{} artifact is not a local file", self.content_type))
        })?;
        Ok(tokio::fs::read_to_string(path).await?)
    }
}

impl std::fmt::Display for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Location::File(p) => write!(f, "{}", p.display()),
            Location::Remote(u) => write!(f, "{}", u),
        }
    }
}

/// Per-run information handed to each adapter.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: String,
    /// Human-readable name of the input, used in prompts and logs.
    pub title: String,
    pub store: Arc<ArtifactStore>,
}

impl RunContext {
    pub fn new(run_id: impl Into<String>, title: impl Into<String>, store: Arc<ArtifactStore>) -> Self {
        Self {
            run_id: run_id.into(),
            title: title.into(),
            store,
        }
    }

    /// Directory holding this run's artifacts.
    pub fn run_dir(&self) -> PathBuf {
        self.store.run_dir(&self.run_id)
    }
}

/// Uniform wrapper around one external transformation.
#[async_trait]
pub trait StageAdapter: Send + Sync {
    /// The stage this adapter implements.
    fn stage(&self) -> Stage;

    /// Transform `input` and persist the result for this run.
    async fn produce(&self, ctx: &RunContext, input: &Artifact) -> StageResult;
}

/// Reject an input artifact the stage cannot consume.
pub fn check_input(stage: Stage, input: &Artifact) -> std::result::Result<(), StageError> {
    if !stage.accepts(input.content_type) {
        return Err(StageError::contract(format!(
            "{} stage cannot consume {} input",
            stage, input.content_type
        )));
    }
    if !input.is_present() {
        return Err(StageError::contract(format!(
            "{} stage input {} does not exist",
            stage, input
        )));
    }
    Ok(())
}

/// Stage to adapter lookup.
#[derive(Default, Clone)]
pub struct StageRegistry {
    adapters: HashMap<Stage, Arc<dyn StageAdapter>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any previous one for the same stage.
    pub fn register(&mut self, adapter: Arc<dyn StageAdapter>) {
        self.adapters.insert(adapter.stage(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn StageAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, stage: Stage) -> Option<Arc<dyn StageAdapter>> {
        self.adapters.get(&stage).cloned()
    }

    /// Validate the input, then run the stage's adapter.
    pub async fn invoke(&self, stage: Stage, ctx: &RunContext, input: &Artifact) -> StageResult {
        check_input(stage, input)?;

        let adapter = self
            .get(stage)
            .ok_or_else(|| StageError::contract(format!("no adapter registered for {}", stage)))?;

        debug!("Invoking {} adapter on {}", stage, input);
        let artifact = adapter.produce(ctx, input).await?;

        if artifact.stage != Some(stage) || !artifact.is_present() {
            return Err(StageError::contract(format!(
                "{} adapter did not persist its artifact",
                stage
            )));
        }
        Ok(artifact)
    }
}
