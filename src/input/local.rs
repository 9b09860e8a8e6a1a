//! Local file recognition by extension.

use std::path::Path;

/// Supported audio file extensions.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "flac", "ogg", "opus", "aac"];

/// Supported video file extensions (audio will be extracted).
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "mov", "webm", "avi", "m4v"];

/// Plain text and Markdown transcripts.
pub const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown"];

fn has_extension(path: &Path, set: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| set.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

pub fn is_audio_file(path: &Path) -> bool {
    has_extension(path, AUDIO_EXTENSIONS)
}

pub fn is_video_file(path: &Path) -> bool {
    has_extension(path, VIDEO_EXTENSIONS)
}

pub fn is_text_file(path: &Path) -> bool {
    has_extension(path, TEXT_EXTENSIONS)
}

/// Any extension the classifier accepts.
pub fn is_supported_file(path: &Path) -> bool {
    is_audio_file(path) || is_video_file(path) || is_text_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_audio_file() {
        assert!(is_audio_file(Path::new("audio.mp3")));
        assert!(is_audio_file(Path::new("audio.WAV")));
        assert!(is_audio_file(Path::new("/path/to/audio.flac")));
        assert!(!is_audio_file(Path::new("video.mp4")));
        assert!(!is_audio_file(Path::new("document.pdf")));
    }

    #[test]
    fn test_is_video_file() {
        assert!(is_video_file(Path::new("video.mp4")));
        assert!(is_video_file(Path::new("video.MKV")));
        assert!(!is_video_file(Path::new("audio.mp3")));
    }

    #[test]
    fn test_is_text_file() {
        assert!(is_text_file(Path::new("notes.md")));
        assert!(is_text_file(Path::new("transcript.TXT")));
        assert!(!is_text_file(Path::new("slides.pdf")));
        assert!(!is_text_file(Path::new("README")));
    }

    #[test]
    fn test_is_supported_file() {
        assert!(is_supported_file(Path::new("lecture.mp4")));
        assert!(is_supported_file(Path::new("lecture.mp3")));
        assert!(is_supported_file(Path::new("lecture.md")));
        assert!(!is_supported_file(Path::new("lecture.docx")));
    }
}
