//! Error types for Lectern.
//!
//! Two layers: [`LecternError`] for library and CLI plumbing, and
//! [`StageError`] for the outcome of a single stage invocation. Only
//! stage errors carry the retryable / non-retryable split.

use std::fmt;
use thiserror::Error;

/// Library-level error type for Lectern operations.
#[derive(Error, Debug)]
pub enum LecternError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported input '{input}': {reason}")]
    UnsupportedInput { input: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Run ledger error: {0}")]
    Ledger(String),

    #[error("External tool not found: {0}. Please install it and ensure it's in your PATH.")]
    ToolNotFound(String),

    #[error("External tool failed: {0}")]
    ToolFailed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error(transparent)]
    Stage(#[from] StageError),
}

impl LecternError {
    pub fn unsupported(input: impl Into<String>, reason: impl Into<String>) -> Self {
        LecternError::UnsupportedInput {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for Lectern operations.
pub type Result<T> = std::result::Result<T, LecternError>;

/// Location reported by the document compiler for a failed build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileDiagnostic {
    /// Source line in the markup file, when the log names one.
    pub line: Option<u32>,
    /// Output page the compiler was on, when the log names one.
    pub page: Option<u32>,
    /// First error message from the log.
    pub message: String,
}

impl CompileDiagnostic {
    /// `line N, page M`, or whichever half the log named.
    pub fn location(&self) -> Option<String> {
        match (self.line, self.page) {
            (Some(line), Some(page)) => Some(format!("line {line}, page {page}")),
            (Some(line), None) => Some(format!("line {line}")),
            (None, Some(page)) => Some(format!("page {page}")),
            (None, None) => None,
        }
    }
}

impl fmt::Display for CompileDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location() {
            Some(location) => write!(f, "{location}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Classification of a stage failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageErrorKind {
    /// Input not recognized as a lecture source.
    UnsupportedInput,
    /// Stage was handed an artifact of the wrong content type.
    ContractViolation,
    /// Credentials rejected by the external service.
    Auth,
    /// Service asked us to slow down.
    RateLimit,
    /// Hard usage cap reached (daily quota, exhausted billing).
    QuotaExceeded,
    /// Prompt too large for the generation model.
    ContextLength,
    /// Service answered with an empty body.
    EmptyOutput,
    /// Input rejected as structurally invalid.
    MalformedInput,
    /// Document compiler reported an error.
    Compile(CompileDiagnostic),
    /// Document compiler is missing a package.
    MissingPackage(String),
    /// Call exceeded its time budget.
    Timeout,
    /// Connection-level failure.
    Network,
    /// Service-side 5xx error.
    Service,
    /// Required external binary is not installed.
    ToolMissing,
    /// External binary ran but failed.
    ToolFailed,
    /// Local filesystem failure.
    Io,
}

impl StageErrorKind {
    /// Short stable name, used in logs and the run ledger.
    pub fn name(&self) -> &'static str {
        match self {
            StageErrorKind::UnsupportedInput => "unsupported_input",
            StageErrorKind::ContractViolation => "contract_violation",
            StageErrorKind::Auth => "auth",
            StageErrorKind::RateLimit => "rate_limit",
            StageErrorKind::QuotaExceeded => "quota_exceeded",
            StageErrorKind::ContextLength => "context_length",
            StageErrorKind::EmptyOutput => "empty_output",
            StageErrorKind::MalformedInput => "malformed_input",
            StageErrorKind::Compile(_) => "compile_error",
            StageErrorKind::MissingPackage(_) => "missing_package",
            StageErrorKind::Timeout => "timeout",
            StageErrorKind::Network => "network",
            StageErrorKind::Service => "service",
            StageErrorKind::ToolMissing => "tool_missing",
            StageErrorKind::ToolFailed => "tool_failed",
            StageErrorKind::Io => "io",
        }
    }
}

impl fmt::Display for StageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // The message itself is carried by the owning StageError
            StageErrorKind::Compile(diag) => match diag.location() {
                Some(location) => write!(f, "compile error at {location}"),
                None => f.write_str("compile error"),
            },
            StageErrorKind::MissingPackage(pkg) => write!(f, "missing package '{pkg}'"),
            other => f.write_str(other.name()),
        }
    }
}

/// Failure of one stage invocation.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct StageError {
    pub kind: StageErrorKind,
    pub message: String,
}

impl StageError {
    pub fn new(kind: StageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn contract(message: impl Into<String>) -> Self {
        Self::new(StageErrorKind::ContractViolation, message)
    }

    pub fn empty_output(message: impl Into<String>) -> Self {
        Self::new(StageErrorKind::EmptyOutput, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(StageErrorKind::MalformedInput, message)
    }

    pub fn compile(diagnostic: CompileDiagnostic) -> Self {
        let message = diagnostic.message.clone();
        Self::new(StageErrorKind::Compile(diagnostic), message)
    }

    /// Whether a bounded retry may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            StageErrorKind::RateLimit
                | StageErrorKind::Timeout
                | StageErrorKind::Network
                | StageErrorKind::Service
        )
    }

    /// Compiler diagnostic, if this is a compile failure.
    pub fn diagnostic(&self) -> Option<&CompileDiagnostic> {
        match &self.kind {
            StageErrorKind::Compile(diag) => Some(diag),
            _ => None,
        }
    }

    /// Classify an HTTP error response.
    pub fn from_status(status: u16, body: &str) -> Self {
        let lower = body.to_lowercase();
        let kind = match status {
            401 | 403 if is_quota_message(&lower) => StageErrorKind::QuotaExceeded,
            401 | 403 => StageErrorKind::Auth,
            429 if is_quota_message(&lower) => StageErrorKind::QuotaExceeded,
            429 => StageErrorKind::RateLimit,
            400 | 413 if lower.contains("context_length") || lower.contains("maximum context") => {
                StageErrorKind::ContextLength
            }
            408 | 504 => StageErrorKind::Timeout,
            500..=599 => StageErrorKind::Service,
            _ => StageErrorKind::MalformedInput,
        };
        Self::new(kind, format!("HTTP {status}: {}", truncate(body, 300)))
    }

    /// Classify a transport-level HTTP client error.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::new(StageErrorKind::Timeout, err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), &err.to_string())
        } else if err.is_connect() || err.is_request() || err.is_body() {
            Self::new(StageErrorKind::Network, err.to_string())
        } else {
            Self::new(StageErrorKind::MalformedInput, err.to_string())
        }
    }
}

fn is_quota_message(lower: &str) -> bool {
    lower.contains("insufficient_quota")
        || lower.contains("dailylimitexceeded")
        || lower.contains("per day")
        || lower.contains("quota exceeded")
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

impl From<std::io::Error> for StageError {
    fn from(err: std::io::Error) -> Self {
        StageError::new(StageErrorKind::Io, err.to_string())
    }
}

impl From<LecternError> for StageError {
    fn from(err: LecternError) -> Self {
        match err {
            LecternError::Stage(inner) => inner,
            LecternError::ToolNotFound(tool) => {
                StageError::new(StageErrorKind::ToolMissing, format!("{tool} not found in PATH"))
            }
            LecternError::ToolFailed(msg) => StageError::new(StageErrorKind::ToolFailed, msg),
            LecternError::Http(e) => StageError::from_reqwest(&e),
            LecternError::UnsupportedInput { input, reason } => StageError::new(
                StageErrorKind::UnsupportedInput,
                format!("{input}: {reason}"),
            ),
            other => StageError::new(StageErrorKind::Io, other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(StageError::new(StageErrorKind::RateLimit, "slow").is_retryable());
        assert!(StageError::new(StageErrorKind::Timeout, "slow").is_retryable());
        assert!(StageError::new(StageErrorKind::Service, "503").is_retryable());
        assert!(!StageError::new(StageErrorKind::QuotaExceeded, "cap").is_retryable());
        assert!(!StageError::new(StageErrorKind::Auth, "bad key").is_retryable());
        assert!(!StageError::empty_output("nothing").is_retryable());
        assert!(!StageError::contract("wrong type").is_retryable());
    }

    #[test]
    fn test_from_status() {
        assert_eq!(StageError::from_status(401, "").kind, StageErrorKind::Auth);
        assert_eq!(StageError::from_status(429, "slow down").kind, StageErrorKind::RateLimit);
        assert_eq!(
            StageError::from_status(429, r#"{"error":{"code":"insufficient_quota"}}"#).kind,
            StageErrorKind::QuotaExceeded
        );
        assert_eq!(
            StageError::from_status(403, "reason: dailyLimitExceeded").kind,
            StageErrorKind::QuotaExceeded
        );
        assert_eq!(
            StageError::from_status(400, "context_length_exceeded").kind,
            StageErrorKind::ContextLength
        );
        assert_eq!(StageError::from_status(503, "").kind, StageErrorKind::Service);
        assert_eq!(StageError::from_status(404, "").kind, StageErrorKind::MalformedInput);
    }

    #[test]
    fn test_compile_display() {
        let err = StageError::compile(CompileDiagnostic {
            line: Some(42),
            page: Some(3),
            message: "Undefined control sequence".to_string(),
        });
        let display = err.to_string();
        assert!(display.contains("line 42"));
        assert!(display.contains("page 3"));
        assert_eq!(display.matches("Undefined control sequence").count(), 1);
        assert_eq!(err.diagnostic().and_then(|d| d.line), Some(42));
    }

    #[test]
    fn test_compile_display_without_location() {
        let err = StageError::compile(CompileDiagnostic {
            message: "Emergency stop".to_string(),
            ..Default::default()
        });
        assert_eq!(err.to_string(), "compile error: Emergency stop");
    }

    #[test]
    fn test_lectern_error_into_stage_error() {
        let err: StageError = LecternError::ToolNotFound("ffmpeg".into()).into();
        assert_eq!(err.kind, StageErrorKind::ToolMissing);

        let inner = StageError::empty_output("no text");
        let err: StageError = LecternError::Stage(inner.clone()).into();
        assert_eq!(err, inner);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
