//! Doctor command - verify system requirements and configuration.

use crate::cli::preflight::version_arg;
use crate::cli::{format_size, Output};
use crate::config::{
    Credentials, Settings, GENERATION_KEY_VAR, IMAGE_SEARCH_ENGINE_VAR, IMAGE_SEARCH_KEY_VAR,
    TRANSCRIPTION_KEY_VAR,
};
use console::style;
use std::path::Path;
use std::process::Command;

/// LaTeX packages the generated documents load.
const LATEX_PACKAGES: [&str; 8] = [
    "inputenc", "fontenc", "graphicx", "geometry", "amsmath", "enumitem", "parskip", "hyperref",
];

/// Check result for a single item.
#[derive(Debug)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, PartialEq)]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl CheckResult {
    fn ok(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Ok,
            message: message.to_string(),
            hint: None,
        }
    }

    fn warning(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warning,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn error(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Error,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn print(&self) {
        let icon = match self.status {
            CheckStatus::Ok => style("✓").green(),
            CheckStatus::Warning => style("!").yellow(),
            CheckStatus::Error => style("✗").red(),
        };

        println!("  {} {} - {}", icon, style(&self.name).bold(), self.message);

        if let Some(hint) = &self.hint {
            println!("    {} {}", style("→").dim(), style(hint).dim());
        }
    }
}

fn section(title: &str, checks: Vec<CheckResult>, all: &mut Vec<CheckResult>) {
    println!("{}", style(title).bold());
    for check in &checks {
        check.print();
    }
    println!();
    all.extend(checks);
}

/// Run all diagnostic checks. Returns false if any check is an error.
pub fn run_doctor(settings: &Settings, config_path: &Path) -> anyhow::Result<bool> {
    Output::header("Lectern Doctor");
    println!();
    println!("Checking system requirements and configuration...\n");

    let mut checks = Vec::new();

    let engine = settings.compile.engine.as_str();
    section(
        "External Tools",
        vec![
            check_tool("yt-dlp", install_hint("yt-dlp")),
            check_tool("ffmpeg", install_hint("ffmpeg")),
            check_tool("ffprobe", install_hint("ffmpeg")),
            check_tool(engine, install_hint(engine)),
        ],
        &mut checks,
    );

    section("LaTeX Packages", check_latex_packages(), &mut checks);
    section("Credentials", check_credentials(&Credentials::from_env()), &mut checks);
    section("Directories", check_directories(settings), &mut checks);
    section("Configuration", vec![check_config_file(config_path)], &mut checks);

    let errors = checks.iter().filter(|c| c.status == CheckStatus::Error).count();
    let warnings = checks.iter().filter(|c| c.status == CheckStatus::Warning).count();

    if errors > 0 {
        Output::error(&format!(
            "{} error(s) found. Some inputs cannot be processed until they are fixed.",
            errors
        ));
        return Ok(false);
    } else if warnings > 0 {
        Output::warning(&format!("All checks passed with {} warning(s).", warnings));
    } else {
        Output::success("All checks passed! Lectern is ready to use.");
    }

    Ok(true)
}

/// Check if an external tool is available.
fn check_tool(name: &str, hint: &str) -> CheckResult {
    match Command::new(name).arg(version_arg(name)).output() {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .unwrap_or("installed")
                .trim()
                .to_string();

            let version_display: String = if version.chars().count() > 50 {
                format!("{}...", version.chars().take(50).collect::<String>())
            } else {
                version
            };

            CheckResult::ok(name, &version_display)
        }
        Ok(_) => CheckResult::error(name, "installed but not working", hint),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            CheckResult::error(name, "not found", hint)
        }
        Err(e) => CheckResult::error(name, &format!("error: {}", e), hint),
    }
}

/// Look up the packages the document preamble needs with kpsewhich.
fn check_latex_packages() -> Vec<CheckResult> {
    let mut missing = Vec::new();
    for package in LATEX_PACKAGES {
        match Command::new("kpsewhich").arg(format!("{}.sty", package)).output() {
            Ok(output) if output.status.success() && !output.stdout.is_empty() => {}
            Ok(_) => missing.push(package),
            Err(_) => {
                return vec![CheckResult::warning(
                    "kpsewhich",
                    "not found, packages not checked",
                    "kpsewhich ships with TeX Live and MiKTeX",
                )]
            }
        }
    }

    if missing.is_empty() {
        vec![CheckResult::ok("Packages", &format!("all {} found", LATEX_PACKAGES.len()))]
    } else {
        vec![CheckResult::error(
            "Packages",
            &format!("missing {}", missing.join(", ")),
            "Install them with your TeX distribution (e.g. tlmgr install <package>)",
        )]
    }
}

/// Which stages each secret unlocks.
fn check_credentials(credentials: &Credentials) -> Vec<CheckResult> {
    [
        (TRANSCRIPTION_KEY_VAR, &credentials.transcription_key, "audio and video inputs"),
        (GENERATION_KEY_VAR, &credentials.generation_key, "every input"),
        (IMAGE_SEARCH_KEY_VAR, &credentials.image_search_key, "every input"),
        (IMAGE_SEARCH_ENGINE_VAR, &credentials.image_search_engine, "every input"),
    ]
    .into_iter()
    .map(|(name, value, needed_for)| match value {
        Some(key) => CheckResult::ok(name, &format!("configured ({})", mask(key))),
        None => CheckResult::error(
            name,
            &format!("not set (needed for {})", needed_for),
            &format!("Set with: export {}='...'", name),
        ),
    })
    .collect()
}

fn mask(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 12 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

/// Check data directories.
fn check_directories(settings: &Settings) -> Vec<CheckResult> {
    let mut results = Vec::new();

    let data_dir = settings.data_dir();
    if data_dir.exists() {
        results.push(CheckResult::ok("Data directory", &data_dir.display().to_string()));
    } else {
        results.push(CheckResult::warning(
            "Data directory",
            &format!("{} (will be created)", data_dir.display()),
            "Directory will be created on first use",
        ));
    }

    let ledger = settings.ledger_path();
    if ledger.exists() {
        let size = std::fs::metadata(&ledger)
            .map(|m| format_size(m.len()))
            .unwrap_or_else(|_| "unknown size".to_string());
        results.push(CheckResult::ok(
            "Run ledger",
            &format!("{} ({})", ledger.display(), size),
        ));
    } else {
        results.push(CheckResult::warning(
            "Run ledger",
            &format!("{} (not created yet)", ledger.display()),
            "The ledger is created on the first run",
        ));
    }

    if let Some(output) = settings.output_dir() {
        if output.is_dir() {
            results.push(CheckResult::ok("Output directory", &output.display().to_string()));
        } else {
            results.push(CheckResult::warning(
                "Output directory",
                &format!("{} (will be created)", output.display()),
                "Finished PDFs are copied here",
            ));
        }
    }

    results
}

/// Check if config file exists.
fn check_config_file(config_path: &Path) -> CheckResult {
    if config_path.exists() {
        CheckResult::ok("Config file", &config_path.display().to_string())
    } else {
        CheckResult::warning(
            "Config file",
            "using defaults",
            "Create with: lectern config edit",
        )
    }
}

/// Platform-specific install hint for a tool.
fn install_hint(tool: &str) -> &'static str {
    match tool {
        "yt-dlp" => {
            if cfg!(target_os = "macos") {
                "Install with: brew install yt-dlp"
            } else if cfg!(target_os = "linux") {
                "Install with: pip install yt-dlp (or your package manager)"
            } else {
                "Install from: https://github.com/yt-dlp/yt-dlp"
            }
        }
        "ffmpeg" | "ffprobe" => {
            if cfg!(target_os = "macos") {
                "Install with: brew install ffmpeg"
            } else if cfg!(target_os = "linux") {
                "Install with: sudo apt install ffmpeg (or your package manager)"
            } else {
                "Install from: https://ffmpeg.org/download.html"
            }
        }
        _ => {
            if cfg!(target_os = "macos") {
                "Install MacTeX: brew install --cask mactex-no-gui"
            } else if cfg!(target_os = "linux") {
                "Install with: sudo apt install texlive-latex-extra (or your package manager)"
            } else {
                "Install MiKTeX from: https://miktex.org/download"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_result_error() {
        let result = CheckResult::error("test", "failed", "fix it");
        assert_eq!(result.status, CheckStatus::Error);
        assert_eq!(result.hint, Some("fix it".to_string()));
    }

    #[test]
    fn test_mask_hides_short_keys() {
        assert_eq!(mask("short"), "****");
        assert_eq!(mask("sk-abcdefghijklmnop"), "sk-a...mnop");
    }

    #[test]
    fn test_missing_credentials_are_errors() {
        let checks = check_credentials(&Credentials::default());
        assert_eq!(checks.len(), 4);
        assert!(checks.iter().all(|c| c.status == CheckStatus::Error));
    }

    #[test]
    fn test_install_hints() {
        assert!(install_hint("yt-dlp").contains("yt-dlp"));
        assert!(install_hint("ffprobe").contains("ffmpeg"));
        assert!(!install_hint("pdflatex").is_empty());
    }

    #[test]
    fn test_missing_tool_is_error() {
        let result = check_tool("lectern-no-such-tool", "hint");
        assert_eq!(result.status, CheckStatus::Error);
        assert_eq!(result.message, "not found");
    }
}
