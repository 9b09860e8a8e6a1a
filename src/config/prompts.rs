//! Prompt templates for Lectern.
//!
//! Prompts can be customized by placing TOML files in the custom prompts directory.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Collection of all prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Prompts {
    pub notes: NotesPrompts,
    /// Custom variables from config, available in all prompts.
    #[serde(skip)]
    pub variables: std::collections::HashMap<String, String>,
}

/// Prompts for turning a transcript into structured notes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotesPrompts {
    pub system: String,
    pub user: String,
}

impl Default for NotesPrompts {
    fn default() -> Self {
        Self {
            system: r#"You are an expert academic note-taker. You are given a rough transcript of a spoken lecture. It may contain grammatical errors, repetition, filler words and poor formatting.

Convert it into structured, high-quality lecture notes in Markdown.

Instructions:
1. Structure: start with a `## Main Title` for the lecture. Organize the rest into logical sections using `###` sub-headings (e.g. ### Introduction, ### Key Concepts, ### Applications).
2. Clean and summarize: rephrase into concise, grammatically correct sentences. Preserve technical accuracy and detail. Remove filler, tangents and repetition while keeping the speaker's intent.
3. Formatting: use bullet points or numbered lists for definitions, processes and key ideas. Highlight key terms in bold (e.g. **Glasgow Coma Scale**). Avoid deeply nested lists.
4. Image placeholders: identify exactly 4 distinct points where a diagram or image would significantly help understanding. At each, insert a placeholder on its own line in the format [INSERT_IMAGE: 'search query']. Use specific 5 to 8 word queries (e.g. 'Anatomical diagram of the brachial plexus' rather than 'nervous system').
5. Output only the Markdown notes, with no surrounding code fence."#
                .to_string(),

            user: r#"Lecture: {{title}}

Convert the following transcript into cleaned and structured lecture notes:

{{transcript}}"#
                .to_string(),
        }
    }
}

impl Prompts {
    /// Load prompts from the default location, with optional custom directory and variables.
    pub fn load(
        custom_dir: Option<&str>,
        custom_variables: Option<&std::collections::HashMap<String, String>>,
    ) -> crate::error::Result<Self> {
        let mut prompts = Prompts::default();

        if let Some(vars) = custom_variables {
            prompts.variables = vars.clone();
        }

        if let Some(dir) = custom_dir {
            let custom_path = PathBuf::from(shellexpand::tilde(dir).to_string());

            let notes_path = custom_path.join("notes.toml");
            if notes_path.exists() {
                let content = std::fs::read_to_string(&notes_path)?;
                prompts.notes = toml::from_str(&content)?;
            }
        }

        Ok(prompts)
    }

    /// Render a prompt template with the given variables.
    pub fn render(template: &str, vars: &std::collections::HashMap<String, String>) -> String {
        let mut result = template.to_string();
        for (key, value) in vars {
            result = result.replace(&format!("{{{{{}}}}}", key), value);
        }
        result
    }

    /// Render a prompt template with both provided variables and custom config variables.
    /// Provided variables take precedence over custom config variables.
    pub fn render_with_custom(
        &self,
        template: &str,
        vars: &std::collections::HashMap<String, String>,
    ) -> String {
        let mut merged = self.variables.clone();
        for (key, value) in vars {
            merged.insert(key.clone(), value.clone());
        }
        Self::render(template, &merged)
    }
}
