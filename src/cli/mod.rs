//! CLI module for Lectern.

pub mod commands;
mod output;
pub mod preflight;

pub use output::{format_size, Output};

use clap::{Parser, Subcommand};

/// Lectern - turn recorded lectures into illustrated PDF notes
///
/// Transcribes a lecture video, audio file or existing transcript, writes
/// structured study notes, illustrates them and typesets the result.
#[derive(Parser, Debug)]
#[command(name = "lectern")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Turn a lecture into a PDF
    Run {
        /// YouTube/Vimeo URL, local audio/video/.txt/.md file, or a directory to batch
        input: String,

        /// Re-run this stage and every later one (transcribe, notes, images, markup, compile)
        #[arg(long)]
        redo: Option<String>,

        /// Delete intermediate artifacts after a successful run without asking
        #[arg(long, conflicts_with = "keep")]
        clean: bool,

        /// Keep intermediate artifacts without asking
        #[arg(long)]
        keep: bool,

        /// Directory the finished PDF is copied to
        #[arg(short, long)]
        output: Option<String>,

        /// Concurrent runs when INPUT is a directory
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Retry the failed files of a batch once without asking
        #[arg(long)]
        retry_failed: bool,
    },

    /// List runs recorded in the ledger
    Runs,

    /// Delete the intermediate artifacts of a run (the PDF is kept)
    Clean {
        /// Run id as shown by `lectern runs`
        run_id: String,

        /// Also clean failed runs
        #[arg(short, long)]
        force: bool,
    },

    /// Check system requirements and configuration
    Doctor,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Open configuration file in editor
    Edit,

    /// Show configuration file path
    Path,
}
