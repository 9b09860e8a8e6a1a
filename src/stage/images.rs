//! Enrich-images stage: resolve image placeholders in the notes.
//!
//! Each `[INSERT_IMAGE: 'query']` placeholder is looked up with an
//! [`ImageSearch`] backend; the first candidate that downloads as a valid
//! JPEG or PNG is saved to the run's `images/` sidecar and linked from the
//! Markdown. Placeholders that cannot be resolved become HTML comments so
//! later stages ignore them.

use super::{Artifact, RetryPolicy, RunContext, Stage, StageAdapter, StageResult};
use crate::config::ImageSettings;
use crate::error::{LecternError, Result, StageError, StageErrorKind};
use async_trait::async_trait;
use image::ImageFormat;
use regex::{Captures, Regex};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\[INSERT_IMAGE:\s*(?:'(.+?)'|"(.+?)"|([^\]\n]+?))\s*\]"#).expect("Invalid regex")
});

static UNRESOLVED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!-- unresolved image: '(.*?)' -->").expect("Invalid regex")
});

/// Relative directory images are linked from, matching the sidecar name.
const IMAGE_LINK_DIR: &str = "images";

/// One image search hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCandidate {
    pub url: String,
}

/// Image search and download backend.
#[async_trait]
pub trait ImageSearch: Send + Sync {
    /// Candidate image URLs for `query`, best first. No results is not an error.
    async fn search(&self, query: &str) -> std::result::Result<Vec<ImageCandidate>, StageError>;

    /// Download the bytes behind a candidate URL.
    async fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, StageError>;
}

/// Google Custom Search JSON API backend.
pub struct GoogleImageSearch {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    engine_id: String,
    results_per_query: u32,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    link: String,
}

impl GoogleImageSearch {
    pub fn new(api_key: &str, engine_id: &str, settings: &ImageSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .user_agent(concat!("Mozilla/5.0 (compatible; lectern/", env!("CARGO_PKG_VERSION"), ")"))
            .build()
            .map_err(|e| LecternError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: settings.endpoint.clone(),
            api_key: api_key.to_string(),
            engine_id: engine_id.to_string(),
            // The API caps num at 10
            results_per_query: settings.results_per_query.clamp(1, 10),
        })
    }
}

#[async_trait]
impl ImageSearch for GoogleImageSearch {
    async fn search(&self, query: &str) -> std::result::Result<Vec<ImageCandidate>, StageError> {
        let num = self.results_per_query.to_string();
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("cx", self.engine_id.as_str()),
                ("key", self.api_key.as_str()),
                ("searchType", "image"),
                ("num", num.as_str()),
                ("imgSize", "large"),
            ])
            .send()
            .await
            .map_err(|e| StageError::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StageError::from_status(status.as_u16(), &body));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| StageError::new(StageErrorKind::Service, format!("Invalid search response: {}", e)))?;

        Ok(parsed
            .items
            .into_iter()
            .map(|item| ImageCandidate { url: item.link })
            .collect())
    }

    async fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, StageError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| StageError::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StageError::from_status(status.as_u16(), ""));
        }

        let bytes = response.bytes().await.map_err(|e| StageError::from_reqwest(&e))?;
        Ok(bytes.to_vec())
    }
}

/// Resolves placeholders through an [`ImageSearch`] backend.
pub struct ImagesAdapter {
    search: Arc<dyn ImageSearch>,
    blocked_domains: Vec<String>,
    retry: RetryPolicy,
}

impl ImagesAdapter {
    pub fn new(search: Arc<dyn ImageSearch>, settings: &ImageSettings, retry: RetryPolicy) -> Self {
        Self {
            search,
            blocked_domains: settings.blocked_domains.iter().map(|d| d.to_lowercase()).collect(),
            retry,
        }
    }

    fn is_blocked(&self, candidate: &str) -> bool {
        let host = match url::Url::parse(candidate) {
            Ok(u) => u.host_str().map(|h| h.to_lowercase()),
            Err(_) => return true,
        };
        match host {
            Some(host) => self
                .blocked_domains
                .iter()
                .any(|d| host == *d || host.ends_with(&format!(".{}", d))),
            None => true,
        }
    }

    /// Find, download and save one image. `Ok(None)` means no usable candidate.
    #[instrument(skip(self, images_dir))]
    async fn resolve(
        &self,
        query: &str,
        images_dir: &Path,
    ) -> std::result::Result<Option<String>, StageError> {
        let stem = image_file_stem(query);

        // Reuse an image saved by an earlier attempt
        for ext in ["jpg", "png"] {
            let name = format!("{}.{}", stem, ext);
            if images_dir.join(&name).is_file() {
                debug!("Reusing {}", name);
                return Ok(Some(format!("{}/{}", IMAGE_LINK_DIR, name)));
            }
        }

        let candidates = self
            .retry
            .run("Image search", || self.search.search(query))
            .await?;

        for candidate in candidates {
            if self.is_blocked(&candidate.url) {
                debug!("Skipping blocked source {}", candidate.url);
                continue;
            }

            let bytes = match self.search.fetch(&candidate.url).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!("Download failed for {}: {}", candidate.url, e);
                    continue;
                }
            };

            let Some(ext) = image_extension(&bytes) else {
                debug!("Not a usable image: {}", candidate.url);
                continue;
            };

            let name = format!("{}.{}", stem, ext);
            tokio::fs::write(images_dir.join(&name), &bytes).await?;
            info!("Saved image for '{}' from {}", query, candidate.url);
            return Ok(Some(format!("{}/{}", IMAGE_LINK_DIR, name)));
        }

        Ok(None)
    }
}

#[async_trait]
impl StageAdapter for ImagesAdapter {
    fn stage(&self) -> Stage {
        Stage::EnrichImages
    }

    #[instrument(skip_all, fields(run = %ctx.run_id))]
    async fn produce(&self, ctx: &RunContext, input: &Artifact) -> StageResult {
        let notes = input.read_text().await?;
        let queries = placeholder_queries(&notes);
        info!("Resolving {} image placeholder(s)", queries.len());

        let images_dir = ctx
            .store
            .sidecar_dir(&ctx.run_id, Stage::EnrichImages)
            .await?
            .unwrap_or_else(|| ctx.run_dir());

        let mut resolved: HashMap<String, String> = HashMap::new();

        for query in &queries {
            match self.resolve(query, &images_dir).await {
                Ok(Some(link)) => {
                    resolved.insert(query.clone(), link);
                }
                Ok(None) => warn!("No usable image for '{}'", query),
                Err(e) if e.kind == StageErrorKind::Auth => return Err(e),
                Err(e) if e.kind == StageErrorKind::QuotaExceeded => {
                    warn!("Image search quota exhausted, leaving remaining placeholders unresolved");
                    break;
                }
                Err(e) => warn!("Image lookup for '{}' failed: {}", query, e),
            }
        }

        let enriched = replace_placeholders(&notes, |query| resolved.get(query).cloned());
        Ok(ctx.store.write(&ctx.run_id, Stage::EnrichImages, enriched).await?)
    }
}

/// Distinct placeholder queries in order of first appearance.
pub fn placeholder_queries(text: &str) -> Vec<String> {
    let mut queries: Vec<String> = Vec::new();
    for caps in PLACEHOLDER.captures_iter(text) {
        let query = placeholder_query(&caps).to_string();
        if !query.is_empty() && !queries.contains(&query) {
            queries.push(query);
        }
    }
    queries
}

/// Queries left as unresolved markers.
pub fn unresolved_queries(text: &str) -> Vec<String> {
    UNRESOLVED
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Turn every placeholder into an unresolved marker.
pub fn strip_placeholders(text: &str) -> String {
    replace_placeholders(text, |_| None)
}

fn replace_placeholders(text: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &Captures| {
            let query = placeholder_query(caps);
            match lookup(query) {
                Some(link) => format!("![{}]({})", query, link),
                None => format!("<!-- unresolved image: '{}' -->", query),
            }
        })
        .into_owned()
}

/// The query of a placeholder match. Quoted queries may contain the other quote
/// character or an apostrophe; an unquoted one is taken up to the closing bracket.
fn placeholder_query<'t>(caps: &Captures<'t>) -> &'t str {
    caps.get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .map(|m| m.as_str().trim().trim_matches(|c: char| c == '\'' || c == '"').trim())
        .unwrap_or_default()
}

/// File stem for a query: lowercase, spaces to underscores, `[a-z0-9_,]` only.
fn image_file_stem(query: &str) -> String {
    let stem: String = query
        .to_lowercase()
        .replace(' ', "_")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == ',')
        .collect();
    if stem.is_empty() {
        "image".to_string()
    } else {
        stem
    }
}

/// File extension for bytes that decode as JPEG or PNG.
fn image_extension(bytes: &[u8]) -> Option<&'static str> {
    let format = image::guess_format(bytes).ok()?;
    let ext = match format {
        ImageFormat::Jpeg => "jpg",
        ImageFormat::Png => "png",
        _ => return None,
    };
    image::load_from_memory_with_format(bytes, format).ok()?;
    Some(ext)
}
