//! Bounded breadth-first crawler over documentation sites.

use crate::error::{Error, Result};
use crate::ingest::{Document, html};

use async_trait::async_trait;
use url::Url;

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Maximum length of a persisted page file stem.
const MAX_FILE_STEM: usize = 100;

/// Retrieves the raw body of a page.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<String>;
}

/// reqwest-backed fetcher. Non-2xx responses are failures.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|error| Error::Config(format!("failed to build http client: {error}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<String> {
        let fetch_error = |reason: String| Error::Fetch {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!(
                "HTTP {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            )));
        }

        response.text().await.map_err(|e| fetch_error(e.to_string()))
    }
}

/// Counters from one crawl run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub fetched: usize,
    pub failed: usize,
    pub skipped_foreign: usize,
}

/// Breadth-first crawler.
///
/// Seeds start at depth 0; links are followed while the page depth is below
/// the limit, staying on the page's own host and port. The page budget
/// counts successfully fetched pages only.
pub struct WebCrawler {
    fetcher: Arc<dyn PageFetcher>,
    output_dir: Option<PathBuf>,
}

impl WebCrawler {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            fetcher,
            output_dir: None,
        }
    }

    /// Persist every fetched page as a text file under `dir`.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Crawl from `seeds`. Returns one document per successfully fetched page,
    /// in fetch order.
    pub async fn crawl(
        &self,
        seeds: &[String],
        max_depth: usize,
        max_pages: usize,
    ) -> Result<(Vec<Document>, CrawlStats)> {
        if let Some(dir) = &self.output_dir {
            tokio::fs::create_dir_all(dir).await?;
        }

        let mut frontier: VecDeque<(Url, usize)> = VecDeque::new();
        for seed in seeds {
            match Url::parse(seed) {
                Ok(mut url) => {
                    url.set_fragment(None);
                    frontier.push_back((url, 0));
                }
                Err(error) => tracing::warn!(%error, url = %seed, "skipping invalid seed url"),
            }
        }

        let mut visited: HashSet<String> = HashSet::new();
        let mut documents = Vec::new();
        let mut stats = CrawlStats::default();

        while documents.len() < max_pages {
            let Some((url, depth)) = frontier.pop_front() else {
                break;
            };
            if !visited.insert(url.as_str().to_string()) {
                continue;
            }

            tracing::debug!(url = %url, depth, processed = documents.len(), max_pages, "fetching page");

            let body = match self.fetcher.fetch(&url).await {
                Ok(body) => body,
                Err(error) => {
                    tracing::warn!(%error, url = %url, "failed to fetch page, skipping");
                    stats.failed += 1;
                    continue;
                }
            };

            let text = html::extract_text(&body);
            let document = Document::new(url.as_str(), text);

            if let Some(dir) = &self.output_dir {
                let path = dir.join(page_file_name(documents.len() + 1, &url));
                let content = format!("URL: {}\n\n{}", document.source, document.text);
                if let Err(error) = tokio::fs::write(&path, content).await {
                    tracing::warn!(%error, path = %path.display(), "failed to persist page");
                }
            }

            documents.push(document);
            stats.fetched += 1;

            if depth < max_depth {
                for link in html::extract_links(&body, &url) {
                    if !same_origin(&link, &url) {
                        stats.skipped_foreign += 1;
                        continue;
                    }
                    if !visited.contains(link.as_str()) {
                        frontier.push_back((link, depth + 1));
                    }
                }
            }
        }

        tracing::info!(
            fetched = stats.fetched,
            failed = stats.failed,
            "crawl complete"
        );

        Ok((documents, stats))
    }
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default()
}

/// `page_<seq>_<host>_<path>.txt`, with `.html`/`.htm` dropped and the stem
/// capped in length.
pub(crate) fn page_file_name(sequence: usize, url: &Url) -> String {
    let host = match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}_{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => "local".to_string(),
    };
    let path = url.path().trim_matches('/').replace('/', "_");

    let stem = format!("page_{sequence}_{host}_{path}")
        .replace(".html", "")
        .replace(".htm", "");
    let stem: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILE_STEM)
        .collect();

    format!("{stem}.txt")
}

/// True when `path` looks like a page file written by the crawler.
pub(crate) fn is_page_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("page_") && name.ends_with(".txt"))
}
