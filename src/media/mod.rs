//! Media acquisition: audio download, extraction, splitting and captions.

mod captions;
mod downloader;

pub use captions::{fetch_captions, parse_vtt};
pub use downloader::{download_audio, extract_audio, split_audio};
