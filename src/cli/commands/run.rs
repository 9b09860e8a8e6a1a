//! Run command implementation.

use crate::cli::preflight;
use crate::cli::Output;
use crate::config::{Credentials, Settings};
use crate::input::{classify, discover, InputKind};
use crate::orchestrator::{Orchestrator, RunOptions, RunReport};
use crate::stage::Stage;
use anyhow::Result;
use console::style;
use std::io::{self, IsTerminal, Write};
use std::path::Path;

/// What to do with intermediates once a run has succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupChoice {
    Clean,
    Keep,
    Ask,
}

impl CleanupChoice {
    pub fn from_flags(clean: bool, keep: bool) -> Self {
        match (clean, keep) {
            (true, _) => CleanupChoice::Clean,
            (_, true) => CleanupChoice::Keep,
            _ => CleanupChoice::Ask,
        }
    }
}

/// Run the run command. Returns whether every run avoided failure.
pub async fn run_pipeline(
    input: &str,
    redo: Option<&str>,
    cleanup: CleanupChoice,
    output: Option<String>,
    jobs: Option<usize>,
    retry_failed: bool,
    mut settings: Settings,
) -> Result<bool> {
    let redo_from = redo
        .map(|s| s.parse::<Stage>())
        .transpose()
        .map_err(anyhow::Error::msg)?;
    let options = RunOptions { redo_from };

    if let Some(dir) = output {
        settings.general.output_dir = Some(dir);
    }
    if let Some(jobs) = jobs {
        settings.pipeline.max_concurrent_runs = jobs.max(1);
    }

    let credentials = Credentials::from_env();
    let path = Path::new(input);

    if path.is_dir() {
        return run_batch(path, &options, cleanup, retry_failed, settings, credentials).await;
    }

    let classification = match classify(input) {
        Ok(c) => c,
        Err(e) => {
            Output::error(&format!("{}", e));
            return Err(e.into());
        }
    };

    if let Err(e) = preflight::check(classification.kind, &settings, &credentials) {
        Output::error(&format!("{}", e));
        Output::info("Run 'lectern doctor' for detailed diagnostics.");
        return Err(e.into());
    }

    Output::info(&format!("Processing: {}", input));
    let orchestrator = Orchestrator::new(&settings, credentials)?;
    let report = orchestrator.run(input, &options).await?;

    Output::report(&report);
    if !report.is_failed() {
        offer_cleanup(&orchestrator, std::slice::from_ref(&report), cleanup).await?;
    }

    Ok(!report.is_failed())
}

/// Process every recognized file in a directory.
async fn run_batch(
    dir: &Path,
    options: &RunOptions,
    cleanup: CleanupChoice,
    retry_failed: bool,
    settings: Settings,
    credentials: Credentials,
) -> Result<bool> {
    let files = discover(dir)?;
    if files.is_empty() {
        Output::warning(&format!("No lecture files found in {}", dir.display()));
        return Ok(true);
    }

    let inputs: Vec<String> = files.iter().map(|p| p.display().to_string()).collect();

    // Preflight once per kind of input present
    let mut kinds: Vec<InputKind> = Vec::new();
    for input in &inputs {
        if let Ok(c) = classify(input) {
            if !kinds.contains(&c.kind) {
                kinds.push(c.kind);
            }
        }
    }
    for kind in kinds {
        if let Err(e) = preflight::check(kind, &settings, &credentials) {
            Output::error(&format!("{}", e));
            Output::info("Run 'lectern doctor' for detailed diagnostics.");
            return Err(e.into());
        }
    }

    Output::info(&format!(
        "Processing {} file(s) from {} ({} at a time)",
        inputs.len(),
        dir.display(),
        settings.pipeline.max_concurrent_runs
    ));

    let orchestrator = Orchestrator::new(&settings, credentials)?;
    let total = inputs.len();
    let mut pending = inputs;
    let mut succeeded = Vec::new();
    let mut round = 1;

    // Retried inputs resume from the artifacts their failed attempt left behind
    let failed = loop {
        let results = orchestrator.run_batch(&pending, options).await;
        let failed = failed_inputs(&results);

        for (input, result) in results {
            Output::header(&input);
            match result {
                Ok(report) => {
                    Output::report(&report);
                    if !report.is_failed() {
                        succeeded.push(report);
                    }
                }
                Err(e) => Output::error(&format!("{}", e)),
            }
        }

        if failed.is_empty() || !should_retry(failed.len(), round, retry_failed)? {
            break failed;
        }
        Output::info(&format!("Retrying {} failed file(s)", failed.len()));
        pending = failed;
        round += 1;
    };

    println!();
    if !failed.is_empty() {
        Output::warning(&format!("{} of {} run(s) failed", failed.len(), total));
        for input in &failed {
            Output::info(&format!("  {}", input));
        }
    } else {
        Output::success(&format!("All {} run(s) finished", succeeded.len()));
    }

    offer_cleanup(&orchestrator, &succeeded, cleanup).await?;
    Ok(failed.is_empty())
}

/// Inputs whose run errored or ended `Failed`, in batch order.
fn failed_inputs(results: &[(String, crate::Result<RunReport>)]) -> Vec<String> {
    results
        .iter()
        .filter(|(_, result)| result.as_ref().map(RunReport::is_failed).unwrap_or(true))
        .map(|(input, _)| input.clone())
        .collect()
}

/// `--retry-failed` retries once; otherwise an interactive user is asked after every round.
fn should_retry(failed: usize, round: usize, retry_failed: bool) -> Result<bool> {
    if retry_failed {
        return Ok(round == 1);
    }
    if !io::stdin().is_terminal() {
        return Ok(false);
    }
    Ok(prompt_continue(&format!("Retry {} failed file(s)?", failed))?)
}

async fn offer_cleanup(
    orchestrator: &Orchestrator,
    reports: &[RunReport],
    choice: CleanupChoice,
) -> Result<()> {
    if reports.is_empty() {
        return Ok(());
    }

    let clean = match choice {
        CleanupChoice::Clean => true,
        CleanupChoice::Keep => false,
        CleanupChoice::Ask => {
            if !io::stdin().is_terminal() {
                false
            } else {
                prompt_continue(&format!(
                    "Delete intermediate files of {} run(s)? The PDF is kept.",
                    reports.len()
                ))?
            }
        }
    };

    if !clean {
        return Ok(());
    }

    for report in reports {
        let removed = orchestrator.cleanup(report, false).await?;
        Output::info(&format!(
            "Removed {} intermediate item(s) from {}",
            removed.len(),
            report.run_id
        ));
    }
    Ok(())
}

/// Prompt user for yes/no confirmation.
fn prompt_continue(message: &str) -> io::Result<bool> {
    print!("{} {} ", style("?").cyan(), message);
    print!("{} ", style("[y/N]").dim());
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    let answer = input.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}
