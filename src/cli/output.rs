//! CLI output formatting utilities.

use crate::ledger::RunStatus;
use crate::orchestrator::{RunReport, RunState};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// Output helper for CLI formatting.
pub struct Output;

impl Output {
    /// Print an info message.
    pub fn info(msg: &str) {
        println!("{} {}", style(">>").cyan().bold(), msg);
    }

    /// Print a success message.
    pub fn success(msg: &str) {
        println!("{} {}", style(">>").green().bold(), msg);
    }

    /// Print a warning message.
    pub fn warning(msg: &str) {
        eprintln!("{} {}", style(">>").yellow().bold(), msg);
    }

    /// Print an error message.
    pub fn error(msg: &str) {
        eprintln!("{} {}", style(">>").red().bold(), msg);
    }

    /// Print a header.
    pub fn header(msg: &str) {
        println!("\n{}", style(msg).bold().underlined());
    }

    /// Print a key-value pair.
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", style(key).dim(), value);
    }

    /// Print a list item.
    pub fn list_item(msg: &str) {
        println!("  {} {}", style("*").cyan(), msg);
    }

    /// Print one ledger run.
    pub fn run_info(run_id: &str, label: &str, status: RunStatus, stages: &str, updated: &str) {
        let status = match status {
            RunStatus::Done => style(status.as_str()).green(),
            RunStatus::Partial => style(status.as_str()).yellow(),
            RunStatus::Failed => style(status.as_str()).red(),
            RunStatus::Pending => style(status.as_str()).dim(),
        };
        println!(
            "  {} {} {} [{}] {}",
            style("*").cyan(),
            style(run_id).bold(),
            style(label).dim(),
            status,
            stages
        );
        println!("      {}", style(updated).dim());
    }

    /// Summarize a finished run.
    pub fn report(report: &RunReport) {
        match &report.outcome {
            RunState::Done => Output::success(&format!("'{}' done", report.label)),
            RunState::PartiallySucceeded => Output::warning(&format!(
                "'{}' finished with {} degradation(s)",
                report.label,
                report.degradations.len()
            )),
            RunState::Failed { stage, error, last_artifact } => {
                Output::error(&format!(
                    "'{}' failed at {} ({})",
                    report.label,
                    stage,
                    error.kind.name()
                ));
                Output::kv("Error", &error.to_string());
                if let Some(path) = last_artifact {
                    Output::kv("Last artifact", &path.display().to_string());
                }
            }
            _ => {}
        }

        Output::kv("Run", &report.run_id);
        if !report.resumed.is_empty() {
            let resumed: Vec<&str> = report.resumed.iter().map(|s| s.as_str()).collect();
            Output::kv("Reused", &resumed.join(", "));
        }
        for degradation in &report.degradations {
            Output::list_item(&degradation.to_string());
        }
        if let Some(doc) = report.published.as_ref().or(report.document.as_ref()) {
            Output::kv("Document", &doc.display().to_string());
        }
    }

    /// Create a spinner.
    pub fn spinner(msg: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    }
}

/// Format file size in human-readable format.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(500), "500 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1024 * 1024), "1.0 MB");
        assert_eq!(format_size(1024 * 1024 * 1024), "1.0 GB");
    }
}
