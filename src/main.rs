//! Lectern CLI entry point.

use anyhow::Result;
use clap::Parser;
use lectern::cli::{commands, Cli, Commands};
use lectern::config::Settings;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = cli
        .config
        .as_deref()
        .map(Settings::expand_path)
        .unwrap_or_else(Settings::default_config_path);
    let settings = Settings::load_from(Some(&config_path))?;

    // Initialize logging; -v overrides the configured level
    let log_level = match cli.verbose {
        0 => settings.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("lectern={}", log_level)),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Ensure data directories exist
    std::fs::create_dir_all(settings.runs_dir())?;

    let ok = match &cli.command {
        Commands::Run {
            input,
            redo,
            clean,
            keep,
            output,
            jobs,
            retry_failed,
        } => {
            commands::run_pipeline(
                input,
                redo.as_deref(),
                commands::CleanupChoice::from_flags(*clean, *keep),
                output.clone(),
                *jobs,
                *retry_failed,
                settings,
            )
            .await?
        }

        Commands::Runs => {
            commands::run_runs(&settings)?;
            true
        }

        Commands::Clean { run_id, force } => {
            commands::run_clean(run_id, *force, &settings).await?;
            true
        }

        Commands::Doctor => commands::run_doctor(&settings, &config_path)?,

        Commands::Config { action } => {
            commands::run_config(action, settings, config_path.clone())?;
            true
        }
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
