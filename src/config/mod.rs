//! Configuration module for Lectern.
//!
//! Handles loading application settings, prompt templates and API credentials.

mod credentials;
mod prompts;
mod settings;

pub use credentials::{
    Credentials, GENERATION_KEY_VAR, IMAGE_SEARCH_ENGINE_VAR, IMAGE_SEARCH_KEY_VAR,
    TRANSCRIPTION_KEY_VAR,
};
pub use prompts::{NotesPrompts, Prompts};
pub use settings::{
    CompileSettings, GeneralSettings, ImageSettings, MarkupSettings, NotesSettings,
    PipelineSettings, PromptSettings, RetrySettings, Settings, TranscriptionSettings,
};
