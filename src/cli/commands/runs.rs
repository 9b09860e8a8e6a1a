//! Runs command implementation.

use crate::cli::Output;
use crate::config::Settings;
use crate::ledger::RunLedger;
use crate::store::ArtifactStore;
use anyhow::Result;

/// Run the runs command.
pub fn run_runs(settings: &Settings) -> Result<()> {
    let ledger_path = settings.ledger_path();
    if !ledger_path.exists() {
        Output::info("No runs yet. Use 'lectern run <input>' to process a lecture.");
        return Ok(());
    }

    let ledger = RunLedger::open(&ledger_path)?;
    let store = ArtifactStore::new(settings.runs_dir());
    let runs = ledger.list_runs()?;

    if runs.is_empty() {
        Output::info("No runs yet. Use 'lectern run <input>' to process a lecture.");
        return Ok(());
    }

    Output::header(&format!("Runs ({})", runs.len()));
    println!();

    for run in &runs {
        let present: Vec<&str> = store
            .present_stages(&run.run_id)
            .iter()
            .map(|s| s.as_str())
            .collect();
        let stages = if present.is_empty() {
            "no artifacts".to_string()
        } else {
            present.join(", ")
        };
        let updated = format!(
            "{} ({}), updated {}",
            run.input_key,
            run.input_kind,
            run.updated_at.format("%Y-%m-%d %H:%M")
        );
        Output::run_info(&run.run_id, &run.label, run.status, &stages, &updated);
    }

    Ok(())
}
