//! Transcribe stage: captions or speech-to-text.

use super::{Artifact, ContentType, RetryPolicy, RunContext, Stage, StageAdapter, StageResult};
use crate::config::TranscriptionSettings;
use crate::error::{Result, StageError};
use crate::media::{download_audio, extract_audio, fetch_captions, split_audio};
use crate::openai::{classify_openai_error, create_client};
use async_openai::config::OpenAIConfig;
use async_openai::types::{AudioInput, CreateTranscriptionRequestArgs};
use async_openai::Client;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Whisper-backed transcription with a caption-track shortcut for remote videos.
pub struct TranscribeAdapter {
    client: Client<OpenAIConfig>,
    settings: TranscriptionSettings,
    retry: RetryPolicy,
}

impl TranscribeAdapter {
    pub fn new(api_key: &str, settings: &TranscriptionSettings, retry: RetryPolicy) -> Result<Self> {
        let client = create_client(
            api_key,
            settings.api_base.as_deref(),
            Duration::from_secs(settings.timeout_seconds),
        )?;

        Ok(Self {
            client,
            settings: settings.clone(),
            retry,
        })
    }

    /// Transcribe one audio file (no splitting).
    #[instrument(skip(self), fields(audio_path = %audio_path.display()))]
    async fn transcribe_single(&self, audio_path: &Path) -> std::result::Result<String, StageError> {
        debug!("Transcribing audio file");

        let file_bytes = tokio::fs::read(audio_path).await?;
        let file_name = audio_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.mp3")
            .to_string();

        self.retry
            .run("Transcription request", || {
                let file_bytes = file_bytes.clone();
                let file_name = file_name.clone();
                async move {
                    let request = CreateTranscriptionRequestArgs::default()
                        .file(AudioInput::from_vec_u8(file_name, file_bytes))
                        .model(&self.settings.model)
                        .build()
                        .map_err(|e| StageError::malformed(format!("Failed to build request: {}", e)))?;

                    let response = self
                        .client
                        .audio()
                        .transcribe(request)
                        .await
                        .map_err(|e| classify_openai_error(&e))?;

                    Ok(response.text.trim().to_string())
                }
            })
            .await
    }

    /// Split long audio and transcribe chunks concurrently, in order.
    async fn transcribe_audio(&self, audio_path: &Path, chunk_dir: &Path) -> std::result::Result<String, StageError> {
        let chunks = split_audio(audio_path, chunk_dir, self.settings.chunk_duration_seconds).await?;

        if chunks.len() == 1 {
            return self.transcribe_single(audio_path).await;
        }

        info!("Processing {} audio chunks with {}", chunks.len(), self.settings.model);

        let mut results: Vec<(usize, String)> = Vec::with_capacity(chunks.len());

        let mut stream = stream::iter(chunks.into_iter().enumerate())
            .map(|(idx, (chunk_path, offset))| async move {
                (idx, offset, self.transcribe_single(&chunk_path).await)
            })
            .buffer_unordered(self.settings.max_concurrent_chunks.max(1));

        while let Some((idx, offset, result)) = stream.next().await {
            match result {
                Ok(text) => results.push((idx, text)),
                Err(e) => {
                    return Err(StageError::new(
                        e.kind.clone(),
                        format!("Chunk {} at {:.0}s failed: {}", idx, offset, e.message),
                    ));
                }
            }
        }

        results.sort_by_key(|(idx, _)| *idx);
        Ok(join_chunks(results.into_iter().map(|(_, text)| text)))
    }

    /// Resolve the input to a local audio file, or return captions directly.
    async fn acquire(&self, input: &Artifact, media_dir: &Path) -> std::result::Result<Acquired, StageError> {
        match input.content_type {
            ContentType::RemoteVideo => {
                let url = input
                    .url()
                    .ok_or_else(|| StageError::contract("remote video input has no URL"))?;

                if self.settings.prefer_captions {
                    match fetch_captions(url, media_dir, &self.settings.caption_languages).await {
                        Ok(Some(text)) => {
                            info!("Using caption track ({} chars)", text.len());
                            return Ok(Acquired::Captions(text));
                        }
                        Ok(None) => debug!("No caption track, falling back to audio"),
                        Err(e) => warn!("Caption lookup failed, falling back to audio: {}", e),
                    }
                }

                Ok(Acquired::Audio(download_audio(url, media_dir).await?))
            }
            ContentType::Video => {
                let path = local_path(input)?;
                Ok(Acquired::Audio(extract_audio(path, media_dir).await?))
            }
            ContentType::Audio => Ok(Acquired::Audio(local_path(input)?.to_path_buf())),
            other => Err(StageError::contract(format!(
                "transcribe stage cannot consume {} input",
                other
            ))),
        }
    }
}

enum Acquired {
    Captions(String),
    Audio(PathBuf),
}

fn local_path(input: &Artifact) -> std::result::Result<&Path, StageError> {
    input
        .path()
        .ok_or_else(|| StageError::contract(format!("{} input is not a local file", input.content_type)))
}

fn join_chunks(texts: impl Iterator<Item = String>) -> String {
    texts
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl StageAdapter for TranscribeAdapter {
    fn stage(&self) -> Stage {
        Stage::Transcribe
    }

    #[instrument(skip_all, fields(run = %ctx.run_id))]
    async fn produce(&self, ctx: &RunContext, input: &Artifact) -> StageResult {
        let media_dir = ctx
            .store
            .sidecar_dir(&ctx.run_id, Stage::Transcribe)
            .await?
            .unwrap_or_else(|| ctx.run_dir());

        let text = match self.acquire(input, &media_dir).await? {
            Acquired::Captions(text) => text,
            Acquired::Audio(audio) => self.transcribe_audio(&audio, &media_dir.join("chunks")).await?,
        };

        if text.trim().is_empty() {
            return Err(StageError::empty_output("Transcription returned no text"));
        }

        info!("Transcript has {} words", text.split_whitespace().count());
        Ok(ctx.store.write(&ctx.run_id, Stage::Transcribe, text).await?)
    }
}
