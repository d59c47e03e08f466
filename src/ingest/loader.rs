//! Reads the document store directory, crawling seed URLs into it first when
//! they are given.

use crate::error::{Error, Result};
use crate::ingest::crawler::{WebCrawler, is_page_file};
use crate::ingest::{Document, PageFetcher};

use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Header line the crawler writes at the top of every page file.
const URL_HEADER: &str = "URL: ";

pub struct DocumentLoader {
    directory: PathBuf,
    fetcher: Arc<dyn PageFetcher>,
}

impl DocumentLoader {
    pub fn new(directory: impl Into<PathBuf>, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            directory: directory.into(),
            fetcher,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Load every document in the store directory.
    ///
    /// With non-empty `urls`, page files from earlier crawls are removed and a
    /// fresh crawl is persisted first. Without URLs the directory must
    /// already exist.
    pub async fn load(
        &self,
        urls: &[String],
        crawl_depth: usize,
        max_pages: usize,
    ) -> Result<Vec<Document>> {
        if !urls.is_empty() {
            tokio::fs::create_dir_all(&self.directory).await?;
            self.remove_stale_pages().await?;

            let crawler = WebCrawler::new(self.fetcher.clone()).with_output_dir(&self.directory);
            let (_, stats) = crawler.crawl(urls, crawl_depth, max_pages).await?;
            tracing::info!(
                pages = stats.fetched,
                dir = %self.directory.display(),
                "crawled pages into document store"
            );
        }

        if !tokio::fs::try_exists(&self.directory).await? {
            return Err(Error::Config(format!(
                "document directory does not exist: {}",
                self.directory.display()
            )));
        }

        let documents = self.read_directory().await?;
        tracing::info!(
            count = documents.len(),
            dir = %self.directory.display(),
            "loaded documents"
        );
        Ok(documents)
    }

    async fn remove_stale_pages(&self) -> Result<()> {
        let mut entries = tokio::fs::read_dir(&self.directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_page_file(&path) {
                tokio::fs::remove_file(&path).await?;
            }
        }
        Ok(())
    }

    /// Regular, non-hidden top-level files, in file-name order.
    async fn read_directory(&self) -> Result<Vec<Document>> {
        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if hidden || !entry.file_type().await?.is_file() {
                continue;
            }
            paths.push(entry.path());
        }
        paths.sort();

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(error) => {
                    tracing::warn!(%error, path = %path.display(), "skipping unreadable document");
                    continue;
                }
            };
            documents.push(parse_document(&path, &content));
        }

        Ok(documents)
    }
}

/// A leading `URL: <url>` line names the source; otherwise the file path does.
fn parse_document(path: &Path, content: &str) -> Document {
    if let Some(rest) = content.strip_prefix(URL_HEADER) {
        let (url, body) = rest.split_once('\n').unwrap_or((rest, ""));
        let url = url.trim();
        if !url.is_empty() {
            return Document::new(url, body.trim_start_matches(['\r', '\n']));
        }
    }
    Document::new(path.display().to_string(), content)
}
