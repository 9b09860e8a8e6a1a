//! Lectern - lecture recordings to illustrated PDF notes
//!
//! A local-first CLI tool that turns a lecture video, audio file or transcript
//! into a typeset study document.
//!
//! # Overview
//!
//! Each input runs through a fixed chain of stages:
//! - Transcribe the audio (or reuse the video's caption track)
//! - Synthesize structured Markdown notes with an LLM
//! - Replace image placeholders with pictures from an image search
//! - Convert the Markdown to LaTeX
//! - Compile the LaTeX to PDF
//!
//! Every stage persists its output, so an interrupted run resumes at the first
//! missing artifact. Image enrichment may fail without failing the run.
//!
//! # Architecture
//!
//! - `config` - Settings, prompt templates and credentials
//! - `input` - Input classification
//! - `store` - Per-run artifact directories
//! - `ledger` - SQLite record of runs and stage outcomes
//! - `media` - yt-dlp and ffmpeg wrappers
//! - `stage` - The stage adapter contract and its implementations
//! - `orchestrator` - Pipeline state machine
//!
//! # Example
//!
//! ```rust,no_run
//! use lectern::config::{Credentials, Settings};
//! use lectern::orchestrator::{Orchestrator, RunOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let orchestrator = Orchestrator::new(&settings, Credentials::from_env())?;
//!
//!     let report = orchestrator.run("lecture.mp4", &RunOptions::default()).await?;
//!     println!("{}: {:?}", report.run_id, report.document);
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod input;
pub mod ledger;
pub mod media;
pub mod openai;
pub mod orchestrator;
pub mod stage;
pub mod store;

pub use error::{LecternError, Result};
