//! Documentation ingestion: crawling seed URLs into page files and reading
//! them back as documents.

pub mod crawler;
pub mod html;
pub mod loader;

pub use crawler::{CrawlStats, HttpFetcher, PageFetcher, WebCrawler};
pub use loader::DocumentLoader;

use serde::{Deserialize, Serialize};

/// A unit of source text with the URL or file path it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub source: String,
    pub text: String,
}

impl Document {
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            text: text.into(),
        }
    }
}
