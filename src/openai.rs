//! OpenAI-compatible client configuration and error classification.
//!
//! Both the transcription service and the generation gateway speak the OpenAI
//! API, so one client type serves both with a different key and base URL.

use crate::error::{LecternError, Result, StageError, StageErrorKind};
use async_openai::error::OpenAIError;
use async_openai::{config::OpenAIConfig, Client};
use std::time::Duration;

/// Default timeout for API requests (5 minutes).
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Create a client for `api_base` (OpenAI itself when `None`) with a request timeout.
pub fn create_client(
    api_key: &str,
    api_base: Option<&str>,
    timeout: Duration,
) -> Result<Client<OpenAIConfig>> {
    let http_client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| LecternError::Config(format!("Failed to create HTTP client: {}", e)))?;

    let mut config = OpenAIConfig::new().with_api_key(api_key);
    if let Some(base) = api_base {
        config = config.with_api_base(base.trim_end_matches('/'));
    }

    Ok(Client::with_config(config).with_http_client(http_client))
}

/// Map a client error onto the stage error taxonomy.
pub fn classify_openai_error(err: &OpenAIError) -> StageError {
    match err {
        OpenAIError::ApiError(api) => {
            let detail = format!("{:?} {:?} {}", api.r#type, api.code, api.message).to_lowercase();
            let kind = if detail.contains("invalid_api_key")
                || detail.contains("incorrect api key")
                || detail.contains("authentication")
                || detail.contains("unauthorized")
            {
                StageErrorKind::Auth
            } else if detail.contains("insufficient_quota") || detail.contains("quota exceeded") {
                StageErrorKind::QuotaExceeded
            } else if detail.contains("rate_limit") || detail.contains("rate limit") {
                StageErrorKind::RateLimit
            } else if detail.contains("context_length") || detail.contains("maximum context") {
                StageErrorKind::ContextLength
            } else if detail.contains("server_error")
                || detail.contains("overloaded")
                || detail.contains("service unavailable")
            {
                StageErrorKind::Service
            } else {
                StageErrorKind::MalformedInput
            };
            StageError::new(kind, api.message.clone())
        }
        OpenAIError::Reqwest(e) => StageError::from_reqwest(e),
        // Gateways occasionally answer 200 with an HTML error page
        OpenAIError::JSONDeserialize(e) => {
            StageError::new(StageErrorKind::Service, format!("Unreadable response: {}", e))
        }
        other => StageError::new(StageErrorKind::MalformedInput, other.to_string()),
    }
}
