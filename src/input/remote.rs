//! Video-hosting URL recognition.

use regex::Regex;
use std::sync::LazyLock;

static YOUTUBE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        ^https?://
        (?:www\.|m\.)?
        (?:
            youtube\.com/(?:watch\?(?:.*&)?v=|embed/|v/|shorts/|live/)
            |
            youtu\.be/
        )
        ([a-zA-Z0-9_-]{11})
        (?:[?&\#/].*)?$
    ",
    )
    .expect("Invalid regex")
});

static VIMEO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:www\.|player\.)?vimeo\.com/(?:video/)?(\d+)(?:[?#/].*)?$")
        .expect("Invalid regex")
});

/// A recognized remote video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteVideo {
    /// Hosting service name.
    pub host: &'static str,
    /// Video identifier on that host.
    pub id: String,
    /// Canonical URL handed to the downloader.
    pub url: String,
}

impl RemoteVideo {
    /// Stable key identifying this video across runs.
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.id)
    }
}

/// Whether the input looks like a URL at all.
pub fn looks_like_url(input: &str) -> bool {
    url::Url::parse(input.trim())
        .map(|u| !u.cannot_be_a_base() && u.scheme().len() > 1)
        .unwrap_or(false)
}

/// Match a URL against the supported video-hosting patterns.
pub fn parse_video_url(input: &str) -> Option<RemoteVideo> {
    let input = input.trim();
    let parsed = url::Url::parse(input).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }

    if let Some(caps) = YOUTUBE.captures(input) {
        let id = caps.get(1)?.as_str().to_string();
        return Some(RemoteVideo {
            host: "youtube",
            url: format!("https://www.youtube.com/watch?v={}", id),
            id,
        });
    }

    if let Some(caps) = VIMEO.captures(input) {
        let id = caps.get(1)?.as_str().to_string();
        return Some(RemoteVideo {
            host: "vimeo",
            url: format!("https://vimeo.com/{}", id),
            id,
        });
    }

    None
}
