//! Configuration settings for Lectern.

use crate::error::LecternError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub pipeline: PipelineSettings,
    pub transcription: TranscriptionSettings,
    pub notes: NotesSettings,
    pub images: ImageSettings,
    pub markup: MarkupSettings,
    pub compile: CompileSettings,
    pub retry: RetrySettings,
    pub prompts: PromptSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory holding run artifacts and the run ledger.
    pub data_dir: String,
    /// Directory finished documents are copied to (unset = leave them in the run directory).
    pub output_dir: Option<String>,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.lectern".to_string(),
            output_dir: None,
            log_level: "info".to_string(),
        }
    }
}

/// Batch and run-level behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Maximum runs processed concurrently in batch mode.
    pub max_concurrent_runs: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 2,
        }
    }
}

/// Transcription settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionSettings {
    /// Speech-to-text model.
    pub model: String,
    /// Base URL of the OpenAI-compatible transcription API (unset = OpenAI).
    pub api_base: Option<String>,
    /// Try the video's caption track before transcribing audio.
    pub prefer_captions: bool,
    /// Caption languages to request, in order of preference.
    pub caption_languages: Vec<String>,
    /// Duration in seconds for splitting long audio files.
    pub chunk_duration_seconds: u32,
    /// Maximum concurrent chunk uploads.
    pub max_concurrent_chunks: usize,
    /// Timeout for a single API request.
    pub timeout_seconds: u64,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            model: "whisper-1".to_string(),
            api_base: None,
            prefer_captions: true,
            caption_languages: vec!["en".to_string()],
            chunk_duration_seconds: 600,
            max_concurrent_chunks: 3,
            timeout_seconds: 300,
        }
    }
}

/// Note synthesis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotesSettings {
    /// Chat completion model.
    pub model: String,
    /// Base URL of the OpenAI-compatible completion API.
    pub api_base: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Timeout for a single API request.
    pub timeout_seconds: u64,
}

impl Default for NotesSettings {
    fn default() -> Self {
        Self {
            model: "google/gemini-2.5-pro".to_string(),
            api_base: "https://openrouter.ai/api/v1".to_string(),
            max_tokens: 15000,
            temperature: 0.7,
            timeout_seconds: 300,
        }
    }
}

/// Image enrichment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSettings {
    /// Image search endpoint (Google Custom Search JSON API).
    pub endpoint: String,
    /// Candidates requested per placeholder.
    pub results_per_query: u32,
    /// Hosts whose images are never downloaded.
    pub blocked_domains: Vec<String>,
    /// Timeout for search and download requests.
    pub timeout_seconds: u64,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://www.googleapis.com/customsearch/v1".to_string(),
            results_per_query: 3,
            blocked_domains: vec!["researchgate.net".to_string()],
            timeout_seconds: 10,
        }
    }
}

/// Markup conversion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkupSettings {
    /// LaTeX document class.
    pub document_class: String,
    /// Emit a table of contents for longer documents.
    pub table_of_contents: bool,
    /// Minimum number of sections before a table of contents is emitted.
    pub toc_min_sections: usize,
}

impl Default for MarkupSettings {
    fn default() -> Self {
        Self {
            document_class: "article".to_string(),
            table_of_contents: true,
            toc_min_sections: 3,
        }
    }
}

/// Document compiler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileSettings {
    /// LaTeX engine binary.
    pub engine: String,
    /// Timeout for a single compiler pass.
    pub timeout_seconds: u64,
}

impl Default for CompileSettings {
    fn default() -> Self {
        Self {
            engine: "pdflatex".to_string(),
            timeout_seconds: 120,
        }
    }
}

/// Retry policy for transient stage failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

/// Prompt customization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct PromptSettings {
    /// Directory for custom prompts (overrides defaults).
    pub custom_dir: Option<String>,
    /// Custom variables available in all prompts as {{variable_name}}.
    pub variables: std::collections::HashMap<String, String>,
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> crate::error::Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Save settings to the default configuration file.
    pub fn save(&self) -> crate::error::Result<()> {
        self.save_to(&Self::default_config_path())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| LecternError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lectern")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Root of the per-run artifact directories.
    pub fn runs_dir(&self) -> PathBuf {
        self.data_dir().join("runs")
    }

    /// Path to the run ledger database.
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir().join("runs.db")
    }

    /// Get the expanded output directory, if configured.
    pub fn output_dir(&self) -> Option<PathBuf> {
        self.general.output_dir.as_deref().map(Self::expand_path)
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.compile.timeout_seconds)
    }
}
