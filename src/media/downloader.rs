//! Audio download and processing utilities.
//!
//! Downloads audio from video pages with yt-dlp and extracts, converts and
//! splits audio with ffmpeg. Everything is written into a caller-owned
//! directory and reused if already present.

use crate::error::{LecternError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

const AUDIO_STEM: &str = "audio";

/// Downloads audio from a video page URL and saves it as MP3.
///
/// If `output_dir/audio.mp3` already exists it is returned without re-downloading.
#[instrument(skip(output_dir))]
pub async fn download_audio(url: &str, output_dir: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(output_dir).await?;

    let target_path = output_dir.join(format!("{}.mp3", AUDIO_STEM));

    if target_path.exists() {
        info!("Using cached audio file");
        return Ok(target_path);
    }

    info!("Downloading audio from {}", url);

    let template = output_dir.join(format!("{}.%(ext)s", AUDIO_STEM));

    let result = Command::new("yt-dlp")
        .arg("--extract-audio")
        .arg("--audio-format").arg("mp3")
        .arg("--audio-quality").arg("0")
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

    // yt-dlp may output different formats; find and normalize to mp3
    let downloaded = find_audio_file(output_dir)?;

    if downloaded != target_path {
        normalize_to_mp3(&downloaded, &target_path).await?;
        let _ = tokio::fs::remove_file(&downloaded).await;
    }

    Ok(target_path)
}

/// Extracts the audio track of a local video file as MP3.
#[instrument(skip(output_dir), fields(video = %video.display()))]
pub async fn extract_audio(video: &Path, output_dir: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(output_dir).await?;

    let target_path = output_dir.join(format!("{}.mp3", AUDIO_STEM));
    if target_path.exists() {
        info!("Using cached audio file");
        return Ok(target_path);
    }

    info!("Extracting audio track");
    normalize_to_mp3(video, &target_path).await?;
    Ok(target_path)
}

/// Locates the downloaded audio file.
fn find_audio_file(dir: &Path) -> Result<PathBuf> {
    // Common audio formats that yt-dlp may produce
    for ext in &["mp3", "opus", "m4a", "webm", "ogg"] {
        let candidate = dir.join(format!("{}.{}", AUDIO_STEM, ext));
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    // Fallback: scan directory for matching prefix
    let entries = std::fs::read_dir(dir)
        .map_err(|e| LecternError::ToolFailed(format!("Cannot read directory: {e}")))?;

    for entry in entries.flatten() {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with(AUDIO_STEM) {
            return Ok(entry.path());
        }
    }

    Err(LecternError::ToolFailed("Audio file not found after download".into()))
}

/// Converts an audio or video file to MP3 using ffmpeg.
async fn normalize_to_mp3(source: &Path, dest: &Path) -> Result<()> {
    debug!("Converting {:?} to MP3", source);

    let result = Command::new("ffmpeg")
        .arg("-i").arg(source)
        .arg("-vn")
        .arg("-codec:a").arg("libmp3lame")
        .arg("-qscale:a").arg("2")
        .arg("-y")
        .arg("-loglevel").arg("error")
        .arg(dest)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await;

    match result {
        Ok(out) if out.status.success() => Ok(()),
        Ok(out) => {
            let err = String::from_utf8_lossy(&out.stderr);
            Err(LecternError::ToolFailed(format!("ffmpeg conversion failed: {err}")))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(LecternError::ToolNotFound("ffmpeg".into()))
        }
        Err(e) => Err(LecternError::ToolFailed(format!("ffmpeg error: {e}"))),
    }
}

/// Segments a long audio file into smaller chunks for upload.
///
/// Each chunk will be approximately `chunk_seconds` long. Returns tuples of
/// (chunk_path, offset_seconds) for each segment.
#[instrument(skip_all)]
pub async fn split_audio(
    source: &Path,
    output_dir: &Path,
    chunk_seconds: u32,
) -> Result<Vec<(PathBuf, f64)>> {
    tokio::fs::create_dir_all(output_dir).await?;

    let total_duration = media_duration(source).await?;
    info!("Total audio duration: {:.1}s", total_duration);

    let chunk_len = chunk_seconds.max(1) as f64;

    // Short audio doesn't need splitting
    if total_duration <= chunk_len {
        return Ok(vec![(source.to_path_buf(), 0.0)]);
    }

    let mut segments = Vec::new();
    let mut offset = 0.0;
    let mut idx = 0u32;

    while offset < total_duration {
        let segment_path = output_dir.join(format!("{}_{:04}.mp3", AUDIO_STEM, idx));
        let segment_len = chunk_len.min(total_duration - offset);

        if !segment_path.exists() {
            extract_segment(source, &segment_path, offset, segment_len).await?;
        }

        debug!("Segment {} at offset {:.1}s", idx, offset);
        segments.push((segment_path, offset));

        offset += chunk_len;
        idx += 1;
    }

    info!("Created {} audio segments", segments.len());
    Ok(segments)
}

/// Extracts a time segment from an audio file.
async fn extract_segment(source: &Path, dest: &Path, start: f64, length: f64) -> Result<()> {
    // First attempt: stream copy (fast, no quality loss)
    let copy_result = Command::new("ffmpeg")
        .arg("-ss").arg(format!("{:.3}", start))
        .arg("-i").arg(source)
        .arg("-t").arg(format!("{:.3}", length))
        .arg("-c").arg("copy")
        .arg("-y")
        .arg("-loglevel").arg("warning")
        .arg(dest)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    if let Ok(status) = copy_result {
        if status.success() && dest.exists() {
            return Ok(());
        }
    }

    warn!("Stream copy failed, re-encoding segment");

    let encode_result = Command::new("ffmpeg")
        .arg("-ss").arg(format!("{:.3}", start))
        .arg("-i").arg(source)
        .arg("-t").arg(format!("{:.3}", length))
        .arg("-codec:a").arg("libmp3lame")
        .arg("-qscale:a").arg("2")
        .arg("-y")
        .arg("-loglevel").arg("error")
        .arg(dest)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await;

    match encode_result {
        Ok(out) if out.status.success() => Ok(()),
        Ok(out) => {
            let err = String::from_utf8_lossy(&out.stderr);
            Err(LecternError::ToolFailed(format!("Segment extraction failed: {err}")))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(LecternError::ToolNotFound("ffmpeg".into()))
        }
        Err(e) => Err(LecternError::ToolFailed(format!("ffmpeg error: {e}"))),
    }
}

/// Queries the duration of an audio file using ffprobe with JSON output.
async fn media_duration(path: &Path) -> Result<f64> {
    let result = Command::new("ffprobe")
        .arg("-v").arg("quiet")
        .arg("-print_format").arg("json")
        .arg("-show_format")
        .arg(path)
        .output()
        .await;

    let output = match result {
        Ok(o) => o,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(LecternError::ToolNotFound("ffprobe".into()));
        }
        Err(e) => {
            return Err(LecternError::ToolFailed(format!("ffprobe failed: {e}")));
        }
    };

    if !output.status.success() {
        return Err(LecternError::ToolFailed("ffprobe returned error".into()));
    }

    parse_format_duration(&String::from_utf8_lossy(&output.stdout))
}

fn parse_format_duration(json_str: &str) -> Result<f64> {
    let parsed: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|_| LecternError::ToolFailed("Invalid ffprobe output".into()))?;

    parsed["format"]["duration"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| LecternError::ToolFailed("Could not determine audio duration".into()))
}
