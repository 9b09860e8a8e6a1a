//! API credentials read from the environment.

use crate::error::{LecternError, Result};
use crate::stage::Stage;

pub const TRANSCRIPTION_KEY_VAR: &str = "OPENAI_API_KEY";
pub const GENERATION_KEY_VAR: &str = "OPENROUTER_API_KEY";
pub const IMAGE_SEARCH_KEY_VAR: &str = "GOOGLE_API_KEY";
pub const IMAGE_SEARCH_ENGINE_VAR: &str = "GOOGLE_CSE_ID";

/// Secrets for the external services. Each is optional until a run needs it.
#[derive(Clone, Default)]
pub struct Credentials {
    pub transcription_key: Option<String>,
    pub generation_key: Option<String>,
    pub image_search_key: Option<String>,
    pub image_search_engine: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |v: &Option<String>| if v.is_some() { "set" } else { "unset" };
        f.debug_struct("Credentials")
            .field("transcription_key", &mask(&self.transcription_key))
            .field("generation_key", &mask(&self.generation_key))
            .field("image_search_key", &mask(&self.image_search_key))
            .field("image_search_engine", &mask(&self.image_search_engine))
            .finish()
    }
}

impl Credentials {
    /// Read all four secrets from the process environment. Empty values count as unset.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build credentials from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            transcription_key: get(TRANSCRIPTION_KEY_VAR),
            generation_key: get(GENERATION_KEY_VAR),
            image_search_key: get(IMAGE_SEARCH_KEY_VAR),
            image_search_engine: get(IMAGE_SEARCH_ENGINE_VAR),
        }
    }

    /// Names of the variables a stage needs that are not set.
    pub fn missing_for(&self, stage: Stage) -> Vec<&'static str> {
        let required: Vec<(&'static str, &Option<String>)> = match stage {
            Stage::Transcribe => vec![(TRANSCRIPTION_KEY_VAR, &self.transcription_key)],
            Stage::SynthesizeNotes => vec![(GENERATION_KEY_VAR, &self.generation_key)],
            Stage::EnrichImages => vec![
                (IMAGE_SEARCH_KEY_VAR, &self.image_search_key),
                (IMAGE_SEARCH_ENGINE_VAR, &self.image_search_engine),
            ],
            Stage::ConvertMarkup | Stage::CompileDocument => Vec::new(),
        };
        required
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(name, _)| *name)
            .collect()
    }

    /// Fail with a configuration error if any stage in the plan lacks its secrets.
    pub fn require_for(&self, plan: &[Stage]) -> Result<()> {
        let mut missing: Vec<&'static str> = Vec::new();
        for stage in plan {
            for name in self.missing_for(*stage) {
                if !missing.contains(&name) {
                    missing.push(name);
                }
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(LecternError::Config(format!(
                "missing credentials: {}. Set them in the environment before running.",
                missing.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn creds(vars: &[(&str, &str)]) -> Credentials {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Credentials::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_empty_values_are_unset() {
        let c = creds(&[(TRANSCRIPTION_KEY_VAR, "  ")]);
        assert!(c.transcription_key.is_none());
    }

    #[test]
    fn test_text_plan_does_not_need_transcription_key() {
        let c = creds(&[
            (GENERATION_KEY_VAR, "or-key"),
            (IMAGE_SEARCH_KEY_VAR, "g-key"),
            (IMAGE_SEARCH_ENGINE_VAR, "cse"),
        ]);
        let text_plan = &Stage::ALL[1..];
        assert!(c.require_for(text_plan).is_ok());
        assert!(c.require_for(&Stage::ALL).is_err());
    }

    #[test]
    fn test_missing_names_are_reported() {
        let c = creds(&[(GENERATION_KEY_VAR, "or-key")]);
        let err = c.require_for(&Stage::ALL).unwrap_err().to_string();
        assert!(err.contains(TRANSCRIPTION_KEY_VAR));
        assert!(err.contains(IMAGE_SEARCH_ENGINE_VAR));
        assert!(!err.contains(GENERATION_KEY_VAR));
    }

    #[test]
    fn test_debug_masks_secrets() {
        let c = creds(&[(TRANSCRIPTION_KEY_VAR, "sk-secret")]);
        let debug = format!("{:?}", c);
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("set"));
    }
}
