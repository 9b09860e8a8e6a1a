//! Clean command implementation.

use crate::cli::Output;
use crate::config::{Credentials, Settings};
use crate::orchestrator::Orchestrator;
use anyhow::Result;

/// Run the clean command.
pub async fn run_clean(run_id: &str, force: bool, settings: &Settings) -> Result<()> {
    let orchestrator = Orchestrator::new(settings, Credentials::from_env())?;

    let spinner = Output::spinner(&format!("Cleaning {}...", run_id));
    let result = orchestrator.clean_run(run_id, force).await;
    spinner.finish_and_clear();

    match result? {
        Some(removed) if removed.is_empty() => {
            Output::info(&format!("Nothing to clean in {}", run_id));
        }
        Some(removed) => {
            for path in &removed {
                Output::list_item(&path.display().to_string());
            }
            Output::success(&format!(
                "Removed {} intermediate item(s) from {}",
                removed.len(),
                run_id
            ));
        }
        None => {
            Output::warning(&format!(
                "{} failed; its artifacts are kept for inspection. Use --force to clean anyway.",
                run_id
            ));
        }
    }

    Ok(())
}
