//! CLI command implementations.

mod clean;
mod config;
mod doctor;
mod run;
mod runs;

pub use clean::run_clean;
pub use config::run_config;
pub use doctor::run_doctor;
pub use run::{run_pipeline, CleanupChoice};
pub use runs::run_runs;
