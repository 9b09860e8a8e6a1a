//! Caption track retrieval for remote videos.

use crate::error::{LecternError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, instrument};

const CAPTION_STEM: &str = "captions";

/// Download the video's caption track (manual or auto-generated) and return it as plain text.
///
/// Returns `Ok(None)` when the video has no captions in the requested languages.
#[instrument(skip(output_dir))]
pub async fn fetch_captions(url: &str, output_dir: &Path, languages: &[String]) -> Result<Option<String>> {
    tokio::fs::create_dir_all(output_dir).await?;

    if let Some(existing) = find_caption_file(output_dir)? {
        info!("Using cached caption file");
        let content = tokio::fs::read_to_string(&existing).await?;
        return Ok(non_empty(parse_vtt(&content)));
    }

    let langs = if languages.is_empty() {
        "en".to_string()
    } else {
        languages.join(",")
    };
    let template = output_dir.join(format!("{}.%(ext)s", CAPTION_STEM));

    let result = Command::new("yt-dlp")
        .arg("--skip-download")
        .arg("--write-subs")
        .arg("--write-auto-subs")
        .arg("--sub-langs").arg(&langs)
        .arg("--sub-format").arg("vtt")
        .arg("--output").arg(&template)
        .arg("--no-playlist")
        .arg("--quiet")
        .arg("--no-warnings")
        .arg(url)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await;

    let output = match result {
        Ok(o) => o,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(LecternError::ToolNotFound("yt-dlp".into()));
        }
        Err(e) => {
            return Err(LecternError::ToolFailed(format!("yt-dlp execution failed: {e}")));
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(LecternError::ToolFailed(format!("yt-dlp failed: {stderr}")));
    }

    match find_caption_file(output_dir)? {
        Some(path) => {
            debug!("Caption file at {:?}", path);
            let content = tokio::fs::read_to_string(&path).await?;
            Ok(non_empty(parse_vtt(&content)))
        }
        None => {
            info!("No captions available for {}", url);
            Ok(None)
        }
    }
}

fn non_empty(text: String) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// yt-dlp names the file `captions.<lang>.vtt`.
fn find_caption_file(dir: &Path) -> Result<Option<PathBuf>> {
    let mut found: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            let name = p.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            name.starts_with(CAPTION_STEM) && name.ends_with(".vtt")
        })
        .collect();
    found.sort();
    Ok(found.into_iter().next())
}

/// Flatten a WebVTT document into plain text.
///
/// Drops the header, cue identifiers, timing lines and inline tags, and
/// collapses the line-by-line repetition auto-generated tracks produce.
pub fn parse_vtt(content: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut in_header = true;

    for raw in content.lines() {
        let line = raw.trim();

        if in_header {
            // Header block runs until the first blank line
            if line.is_empty() {
                in_header = false;
            }
            continue;
        }

        if line.is_empty()
            || line.contains("-->")
            || line.chars().all(|c| c.is_ascii_digit())
            || line.starts_with("NOTE")
            || line.starts_with("STYLE")
        {
            continue;
        }

        let text = strip_tags(line);
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        if lines.last().map(|l| l == text).unwrap_or(false) {
            continue;
        }
        lines.push(text.to_string());
    }

    lines.join(" ")
}

fn strip_tags(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_tag = false;
    for c in line.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace("&amp;", "&").replace("&nbsp;", " ")
}
