//! Compile-document stage: LaTeX engine to PDF.

use super::retry::bounded;
use super::{Artifact, RunContext, Stage, StageAdapter, StageResult};
use crate::config::CompileSettings;
use crate::error::{CompileDiagnostic, StageError, StageErrorKind};
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

static MISSING_PACKAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"File `([^']+)\.(?:sty|cls)' not found").expect("Invalid regex")
});

static FILE_LINE_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?:\./)?[^:\s]+\.tex:(\d+):\s*(.+)$").expect("Invalid regex")
});

static TEX_ERROR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^! (.+)$").expect("Invalid regex"));

static ERROR_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^l\.(\d+)").expect("Invalid regex"));

static PAGE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)[\]\s{<]").expect("Invalid regex"));

/// Runs a LaTeX engine in a scratch build directory inside the run directory.
pub struct CompileAdapter {
    engine: String,
    timeout: Duration,
}

impl CompileAdapter {
    pub fn new(settings: &CompileSettings) -> Self {
        Self {
            engine: settings.engine.clone(),
            timeout: Duration::from_secs(settings.timeout_seconds),
        }
    }

    fn is_latexmk(&self) -> bool {
        Path::new(&self.engine)
            .file_stem()
            .map(|s| s == "latexmk")
            .unwrap_or(false)
    }

    /// One engine pass. Returns whether the engine exited successfully.
    async fn run_pass(&self, run_dir: &Path, build_dir: &Path, tex_name: &str) -> Result<bool, StageError> {
        let mut cmd = Command::new(&self.engine);
        if self.is_latexmk() {
            cmd.arg("-pdf");
        }
        cmd.arg("-interaction=nonstopmode")
            .arg("-halt-on-error")
            .arg("-file-line-error")
            .arg(format!("-output-directory={}", build_dir.display()))
            .arg(tex_name)
            .current_dir(run_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = bounded(self.timeout, "Document compilation", async {
            match cmd.output().await {
                Ok(o) => Ok(o),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StageError::new(
                    StageErrorKind::ToolMissing,
                    format!("{} not found in PATH", self.engine),
                )),
                Err(e) => Err(StageError::new(
                    StageErrorKind::ToolFailed,
                    format!("{} failed to start: {}", self.engine, e),
                )),
            }
        })
        .await?;

        Ok(output.status.success())
    }

    /// Keep the log next to the source and turn it into a stage error.
    async fn failure(&self, run_dir: &Path, log_path: &Path) -> StageError {
        let log = match tokio::fs::read(log_path).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => {
                return StageError::new(
                    StageErrorKind::ToolFailed,
                    format!("{} failed without writing a log", self.engine),
                )
            }
        };

        let kept = run_dir.join("document.log");
        if let Err(e) = tokio::fs::write(&kept, &log).await {
            warn!("Could not keep compiler log: {}", e);
        }

        parse_diagnostic(&log)
    }
}

#[async_trait]
impl StageAdapter for CompileAdapter {
    fn stage(&self) -> Stage {
        Stage::CompileDocument
    }

    #[instrument(skip_all, fields(run = %ctx.run_id, engine = %self.engine))]
    async fn produce(&self, ctx: &RunContext, input: &Artifact) -> StageResult {
        let source_path = input
            .path()
            .ok_or_else(|| StageError::contract("markup input is not a local file"))?;
        let source = input.read_text().await?;

        // The engine runs from the run directory so relative image paths resolve
        let run_dir = source_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| ctx.run_dir());
        let tex_name = source_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document.tex")
            .to_string();
        let job = tex_name.trim_end_matches(".tex").to_string();

        let build_dir = tempfile::Builder::new()
            .prefix(".build-")
            .tempdir_in(&run_dir)?;
        let log_path = build_dir.path().join(format!("{}.log", job));
        let pdf_path: PathBuf = build_dir.path().join(format!("{}.pdf", job));

        let passes = if !self.is_latexmk() && needs_second_pass(&source) { 2 } else { 1 };
        for pass in 1..=passes {
            debug!("Compile pass {}/{}", pass, passes);
            if !self.run_pass(&run_dir, build_dir.path(), &tex_name).await? {
                return Err(self.failure(&run_dir, &log_path).await);
            }
        }

        if !pdf_path.is_file() {
            return Err(StageError::new(
                StageErrorKind::ToolFailed,
                format!("{} finished but produced no PDF", self.engine),
            ));
        }

        let artifact = ctx
            .store
            .write_from(&ctx.run_id, Stage::CompileDocument, &pdf_path)
            .await?;
        info!("Compiled {}", artifact);
        Ok(artifact)
    }
}

/// Table of contents and cross-references only settle on a second run.
fn needs_second_pass(source: &str) -> bool {
    source.contains(r"\tableofcontents") || source.contains(r"\ref{") || source.contains(r"\label{")
}

/// Extract the first error from a LaTeX log.
pub fn parse_diagnostic(log: &str) -> StageError {
    if let Some(caps) = MISSING_PACKAGE.captures(log) {
        let package = caps[1].to_string();
        return StageError::new(
            StageErrorKind::MissingPackage(package.clone()),
            format!("LaTeX package '{}' is not installed", package),
        );
    }

    let (line, message, offset) = if let Some(caps) = FILE_LINE_ERROR.captures(log) {
        let offset = caps.get(0).map(|m| m.start()).unwrap_or(0);
        (caps[1].parse::<u32>().ok(), caps[2].trim().to_string(), offset)
    } else if let Some(caps) = TEX_ERROR.captures(log) {
        let offset = caps.get(0).map(|m| m.start()).unwrap_or(0);
        let line = ERROR_LINE
            .captures(&log[offset..])
            .and_then(|c| c[1].parse::<u32>().ok());
        (line, caps[1].trim().to_string(), offset)
    } else {
        (None, "LaTeX compilation failed (see document.log)".to_string(), log.len())
    };

    let page = PAGE_MARKER
        .captures_iter(&log[..offset])
        .last()
        .and_then(|c| c[1].parse::<u32>().ok());

    StageError::compile(CompileDiagnostic { line, page, message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ArtifactStore;
    use std::sync::Arc;

    const UNDEFINED_CONTROL: &str = r"This is pdfTeX, Version 3.141592653
(./document.tex
LaTeX2e <2023-11-01>
[1{/var/lib/texmf/fonts/map/pdftex/updmap/pdftex.map}] [2]
./document.tex:87: Undefined control sequence.
l.87 \foo
          {bar}
No pages of output.
";

    #[test]
    fn test_parse_file_line_error() {
        let err = parse_diagnostic(UNDEFINED_CONTROL);
        let diag = err.diagnostic().unwrap();
        assert_eq!(diag.line, Some(87));
        assert_eq!(diag.page, Some(2));
        assert_eq!(diag.message, "Undefined control sequence.");
    }

    #[test]
    fn test_parse_classic_error() {
        let log = "(./document.tex\n! Missing $ inserted.\n<inserted text>\nl.12 x^\n";
        let err = parse_diagnostic(log);
        let diag = err.diagnostic().unwrap();
        assert_eq!(diag.line, Some(12));
        assert_eq!(diag.page, None);
        assert_eq!(diag.message, "Missing $ inserted.");
    }

    #[test]
    fn test_parse_missing_package() {
        let log = "! LaTeX Error: File `enumitem.sty' not found.\n";
        let err = parse_diagnostic(log);
        assert_eq!(err.kind, StageErrorKind::MissingPackage("enumitem".to_string()));
        assert!(err.diagnostic().is_none());
    }

    #[test]
    fn test_parse_unknown_log() {
        let err = parse_diagnostic("nothing useful");
        assert!(err.diagnostic().unwrap().message.contains("document.log"));
    }

    #[test]
    fn test_needs_second_pass() {
        assert!(needs_second_pass(r"\tableofcontents"));
        assert!(needs_second_pass(r"see \ref{fig:1}"));
        assert!(!needs_second_pass(r"\section{A}"));
    }

    #[tokio::test]
    async fn test_missing_engine_is_tool_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::new(dir.path()));
        let ctx = RunContext::new("001-x", "x", store.clone());
        let tex = store
            .write("001-x", Stage::ConvertMarkup, "\\documentclass{article}")
            .await
            .unwrap();

        let adapter = CompileAdapter::new(&CompileSettings {
            engine: "lectern-no-such-engine".to_string(),
            ..CompileSettings::default()
        });
        let err = adapter.produce(&ctx, &tex).await.unwrap_err();

        assert_eq!(err.kind, StageErrorKind::ToolMissing);
        assert!(!store.exists("001-x", Stage::CompileDocument));
    }
}
