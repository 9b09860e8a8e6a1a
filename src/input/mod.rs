//! Input classification.
//!
//! Decides what kind of lecture source the operator handed us and which
//! stage the pipeline starts at. Classification has no side effects.

mod local;
mod remote;

pub use local::{is_audio_file, is_supported_file, is_text_file, is_video_file};
pub use remote::{parse_video_url, RemoteVideo};

use crate::error::{LecternError, Result};
use crate::stage::{Artifact, ContentType, Location, Stage};
use std::path::{Path, PathBuf};

const MEDIA_PLAN: [Stage; 5] = Stage::ALL;
const TEXT_PLAN: [Stage; 4] = [
    Stage::SynthesizeNotes,
    Stage::EnrichImages,
    Stage::ConvertMarkup,
    Stage::CompileDocument,
];

/// Kind of lecture source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    RemoteVideo,
    LocalAudio,
    LocalVideo,
    LocalText,
}

impl InputKind {
    /// Stages run for this kind of input, in order.
    pub fn plan(&self) -> &'static [Stage] {
        match self {
            InputKind::LocalText => &TEXT_PLAN,
            _ => &MEDIA_PLAN,
        }
    }

    /// First stage of the plan.
    pub fn entry_stage(&self) -> Stage {
        self.plan()[0]
    }

    /// Content type of the source artifact.
    pub fn content_type(&self) -> ContentType {
        match self {
            InputKind::RemoteVideo => ContentType::RemoteVideo,
            InputKind::LocalAudio => ContentType::Audio,
            InputKind::LocalVideo => ContentType::Video,
            InputKind::LocalText => ContentType::Transcript,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InputKind::RemoteVideo => "remote_video",
            InputKind::LocalAudio => "local_audio",
            InputKind::LocalVideo => "local_video",
            InputKind::LocalText => "local_text",
        }
    }
}

impl std::fmt::Display for InputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying one input.
#[derive(Debug, Clone)]
pub struct Classification {
    pub kind: InputKind,
    pub entry_stage: Stage,
    /// The input as an artifact the entry stage consumes.
    pub source: Artifact,
    /// Stable identity of the input (canonical path or `host:id`).
    pub key: String,
    /// Human-readable name, also the stem of the published document.
    pub label: String,
    /// Filesystem-safe form of the label.
    pub slug: String,
}

/// Classify an operator-supplied input.
pub fn classify(input: &str) -> Result<Classification> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(LecternError::unsupported(input, "empty input"));
    }

    if remote::looks_like_url(trimmed) {
        let video = parse_video_url(trimmed).ok_or_else(|| {
            LecternError::unsupported(
                trimmed,
                "URL is not a supported video page (YouTube or Vimeo video URLs only)",
            )
        })?;
        let kind = InputKind::RemoteVideo;
        return Ok(Classification {
            kind,
            entry_stage: kind.entry_stage(),
            source: Artifact::source(Location::Remote(video.url.clone()), kind.content_type()),
            key: video.key(),
            label: video.id.clone(),
            slug: slugify(&format!("{}-{}", video.host, video.id)),
        });
    }

    classify_path(Path::new(trimmed))
}

fn classify_path(path: &Path) -> Result<Classification> {
    let shown = path.display().to_string();

    if !path.exists() {
        return Err(LecternError::unsupported(shown, "file not found"));
    }
    if path.is_dir() {
        return Err(LecternError::unsupported(
            shown,
            "is a directory (directories are processed as a batch)",
        ));
    }

    let kind = if is_audio_file(path) {
        InputKind::LocalAudio
    } else if is_video_file(path) {
        InputKind::LocalVideo
    } else if is_text_file(path) {
        InputKind::LocalText
    } else {
        return Err(LecternError::unsupported(
            shown,
            "unrecognized extension (expected audio, video, .txt or .md)",
        ));
    };

    let canonical = path.canonicalize()?;
    let label = canonical
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("lecture")
        .to_string();

    Ok(Classification {
        kind,
        entry_stage: kind.entry_stage(),
        source: Artifact::source(Location::File(canonical.clone()), kind.content_type()),
        key: canonical.to_string_lossy().to_string(),
        slug: slugify(&label),
        label,
    })
}

/// Recognized input files directly inside `dir`, sorted by name.
pub fn discover(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(LecternError::InvalidInput(format!(
            "Not a directory: {}",
            dir.display()
        )));
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_supported_file(p))
        .collect();
    files.sort();
    Ok(files)
}

/// Lowercase ASCII slug: alphanumerics kept, everything else collapsed to `-`.
pub fn slugify(s: &str) -> String {
    let mut slug = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    let slug: String = slug.chars().take(48).collect();
    if slug.is_empty() {
        "input".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_video_starts_at_transcribe() {
        let c = classify("https://youtu.be/dQw4w9WgXcQ").unwrap();
        assert_eq!(c.kind, InputKind::RemoteVideo);
        assert_eq!(c.entry_stage, Stage::Transcribe);
        assert_eq!(c.source.content_type, ContentType::RemoteVideo);
        assert_eq!(c.key, "youtube:dQw4w9WgXcQ");
        assert_eq!(c.slug, "youtube-dqw4w9wgxcq");
    }

    #[test]
    fn test_unsupported_url() {
        let err = classify("https://example.com/page").unwrap_err();
        assert!(matches!(err, LecternError::UnsupportedInput { .. }));
    }

    #[test]
    fn test_local_kinds() {
        let dir = tempfile::tempdir().unwrap();
        for (name, kind, entry) in [
            ("lecture.mp4", InputKind::LocalVideo, Stage::Transcribe),
            ("lecture.mp3", InputKind::LocalAudio, Stage::Transcribe),
            ("notes.md", InputKind::LocalText, Stage::SynthesizeNotes),
            ("transcript.txt", InputKind::LocalText, Stage::SynthesizeNotes),
        ] {
            let path = dir.path().join(name);
            std::fs::write(&path, b"x").unwrap();
            let c = classify(path.to_str().unwrap()).unwrap();
            assert_eq!(c.kind, kind, "{name}");
            assert_eq!(c.entry_stage, entry, "{name}");
            assert!(c.source.is_present());
        }
    }

    #[test]
    fn test_text_plan_skips_transcribe() {
        assert!(!InputKind::LocalText.plan().contains(&Stage::Transcribe));
        assert_eq!(InputKind::LocalVideo.plan().len(), 5);
        assert_eq!(InputKind::LocalText.plan().last(), Some(&Stage::CompileDocument));
    }

    #[test]
    fn test_missing_and_unknown_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.mp4");
        assert!(matches!(
            classify(missing.to_str().unwrap()),
            Err(LecternError::UnsupportedInput { .. })
        ));

        let doc = dir.path().join("slides.docx");
        std::fs::write(&doc, b"x").unwrap();
        assert!(matches!(
            classify(doc.to_str().unwrap()),
            Err(LecternError::UnsupportedInput { .. })
        ));

        assert!(matches!(
            classify(dir.path().to_str().unwrap()),
            Err(LecternError::UnsupportedInput { .. })
        ));
        assert!(classify("   ").is_err());
    }

    #[test]
    fn test_discover_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.mp3", "a.md", "c.mp4", "skip.pdf", "d.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub.mp4")).unwrap();

        let names: Vec<String> = discover(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.md", "b.mp3", "c.mp4", "d.txt"]);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Week 3: Cardiac Cycle"), "week-3-cardiac-cycle");
        assert_eq!(slugify("  --  "), "input");
        assert_eq!(slugify("Ärzte"), "rzte");
    }
}
