//! Synthesize-notes stage: transcript to structured Markdown via an LLM.

use super::images::placeholder_queries;
use super::{Artifact, RetryPolicy, RunContext, Stage, StageAdapter, StageResult};
use crate::config::{NotesSettings, Prompts};
use crate::error::{Result, StageError};
use crate::openai::{classify_openai_error, create_client};
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Chat-completion backed note synthesis.
pub struct NotesAdapter {
    client: Client<OpenAIConfig>,
    settings: NotesSettings,
    prompts: Prompts,
    retry: RetryPolicy,
}

impl NotesAdapter {
    pub fn new(
        api_key: &str,
        settings: &NotesSettings,
        prompts: Prompts,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = create_client(
            api_key,
            Some(&settings.api_base),
            Duration::from_secs(settings.timeout_seconds),
        )?;

        Ok(Self {
            client,
            settings: settings.clone(),
            prompts,
            retry,
        })
    }

    fn build_request(
        &self,
        title: &str,
        transcript: &str,
    ) -> std::result::Result<CreateChatCompletionRequest, StageError> {
        let mut vars = HashMap::new();
        vars.insert("title".to_string(), title.to_string());
        vars.insert("transcript".to_string(), transcript.to_string());

        let system_prompt = self.prompts.render_with_custom(&self.prompts.notes.system, &vars);
        let user_prompt = self.prompts.render_with_custom(&self.prompts.notes.user, &vars);

        let bad_request = |e: async_openai::error::OpenAIError| StageError::malformed(e.to_string());

        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt)
                .build()
                .map_err(bad_request)?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_prompt)
                .build()
                .map_err(bad_request)?
                .into(),
        ];

        #[allow(deprecated)]
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.settings.model)
            .messages(messages)
            .max_tokens(self.settings.max_tokens)
            .temperature(self.settings.temperature)
            .build()
            .map_err(bad_request)?;

        Ok(request)
    }
}

#[async_trait]
impl StageAdapter for NotesAdapter {
    fn stage(&self) -> Stage {
        Stage::SynthesizeNotes
    }

    #[instrument(skip_all, fields(run = %ctx.run_id, model = %self.settings.model))]
    async fn produce(&self, ctx: &RunContext, input: &Artifact) -> StageResult {
        let transcript = input.read_text().await?;
        if transcript.trim().is_empty() {
            return Err(StageError::malformed("Transcript is empty"));
        }

        let request = self.build_request(&ctx.title, &transcript)?;
        info!("Generating notes from {} chars of transcript", transcript.len());

        let content = self
            .retry
            .run("Notes generation", || {
                let request = request.clone();
                async move {
                    let response = self
                        .client
                        .chat()
                        .create(request)
                        .await
                        .map_err(|e| classify_openai_error(&e))?;

                    Ok(response
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.message.content)
                        .unwrap_or_default())
                }
            })
            .await?;

        let notes = strip_code_fence(&content);
        if notes.trim().is_empty() {
            return Err(StageError::empty_output("Model returned an empty response"));
        }

        for warning in validate_notes(&notes) {
            warn!("Notes check: {}", warning);
        }

        Ok(ctx.store.write(&ctx.run_id, Stage::SynthesizeNotes, notes).await?)
    }
}

/// Remove a ```markdown fence wrapped around the whole response.
fn strip_code_fence(content: &str) -> String {
    let trimmed = content.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }

    let mut lines: Vec<&str> = trimmed.lines().collect();
    lines.remove(0);
    if lines.last().map(|l| l.trim() == "```").unwrap_or(false) {
        lines.pop();
    }
    lines.join("\n").trim().to_string()
}

/// Structural checks on generated notes. Problems are reported, never enforced.
pub fn validate_notes(notes: &str) -> Vec<String> {
    let mut warnings = Vec::new();

    let sections = notes
        .lines()
        .filter(|l| l.trim_start().starts_with("##"))
        .count();
    if sections < 2 {
        warnings.push(format!("only {} section heading(s), expected at least 2", sections));
    }

    let placeholders = placeholder_queries(notes).len();
    if !(3..=6).contains(&placeholders) {
        warnings.push(format!(
            "{} image placeholder(s), expected between 3 and 6",
            placeholders
        ));
    }

    warnings
}
