//! Config command implementation.

use crate::cli::{ConfigAction, Output};
use crate::config::{
    Credentials, Settings, GENERATION_KEY_VAR, IMAGE_SEARCH_ENGINE_VAR, IMAGE_SEARCH_KEY_VAR,
    TRANSCRIPTION_KEY_VAR,
};
use anyhow::Result;
use std::path::PathBuf;

/// Run the config command against the effective config file.
pub fn run_config(action: &ConfigAction, settings: Settings, config_path: PathBuf) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let toml_str = toml::to_string_pretty(&settings)
                .map_err(|e| anyhow::anyhow!("Failed to serialize config: {}", e))?;
            println!("# {}", config_path.display());
            println!("{}", toml_str);

            // Secrets never live in the file; show which ones the environment provides
            let credentials = Credentials::from_env();
            println!("# Credentials (environment)");
            for (name, value) in [
                (TRANSCRIPTION_KEY_VAR, &credentials.transcription_key),
                (GENERATION_KEY_VAR, &credentials.generation_key),
                (IMAGE_SEARCH_KEY_VAR, &credentials.image_search_key),
                (IMAGE_SEARCH_ENGINE_VAR, &credentials.image_search_engine),
            ] {
                let state = if value.is_some() { "set" } else { "unset" };
                println!("# {} = {}", name, state);
            }
        }

        ConfigAction::Edit => {
            if !config_path.exists() {
                settings.save_to(&config_path)?;
                Output::info(&format!("Created default config at {}", config_path.display()));
            }

            let editor = std::env::var("VISUAL")
                .or_else(|_| std::env::var("EDITOR"))
                .unwrap_or_else(|_| "vi".to_string());

            Output::info(&format!("Opening config in {}...", editor));

            match std::process::Command::new(&editor).arg(&config_path).status() {
                Ok(s) if s.success() => match Settings::load_from(Some(&config_path)) {
                    Ok(_) => Output::success("Config saved."),
                    Err(e) => Output::warning(&format!("Config no longer parses: {}", e)),
                },
                Ok(_) => {
                    Output::warning("Editor exited with non-zero status.");
                }
                Err(e) => {
                    Output::error(&format!("Failed to open editor: {}", e));
                    Output::info(&format!("Config file is at: {}", config_path.display()));
                }
            }
        }

        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
    }

    Ok(())
}
