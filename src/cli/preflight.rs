//! Pre-flight checks before a run.
//!
//! Validates that the credentials and external tools a run's stage plan
//! needs are available before any stage starts, so a run never fails
//! midway on something that was knowable up front.

use crate::config::{Credentials, Settings};
use crate::error::{LecternError, Result};
use crate::input::InputKind;
use crate::stage::Stage;
use std::process::Command;

/// External binaries needed for a plan.
pub fn required_tools(kind: InputKind, settings: &Settings) -> Vec<String> {
    let mut tools = Vec::new();
    if kind.plan().contains(&Stage::Transcribe) {
        if kind == InputKind::RemoteVideo {
            tools.push("yt-dlp".to_string());
        }
        tools.push("ffmpeg".to_string());
        tools.push("ffprobe".to_string());
    }
    tools.push(settings.compile.engine.clone());
    tools
}

/// Run pre-flight checks for one kind of input.
///
/// Returns Ok(()) if all checks pass, or an error describing what's missing.
pub fn check(kind: InputKind, settings: &Settings, credentials: &Credentials) -> Result<()> {
    credentials.require_for(kind.plan())?;
    for tool in required_tools(kind, settings) {
        check_tool(&tool)?;
    }
    Ok(())
}

/// Version flag an external tool understands.
pub fn version_arg(name: &str) -> &'static str {
    // ffmpeg/ffprobe use -version (single dash), others use --version
    match name {
        "ffmpeg" | "ffprobe" => "-version",
        _ => "--version",
    }
}

/// Check if an external tool is available.
pub fn check_tool(name: &str) -> Result<()> {
    match Command::new(name).arg(version_arg(name)).output() {
        Ok(output) if output.status.success() => Ok(()),
        Ok(_) => Err(LecternError::ToolNotFound(format!(
            "{} is installed but not working correctly",
            name
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(LecternError::ToolNotFound(name.to_string()))
        }
        Err(e) => Err(LecternError::ToolNotFound(format!("{}: {}", name, e))),
    }
}
