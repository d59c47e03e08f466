//! Layered configuration: built-in defaults, an optional TOML file, then
//! `COPILOT__SECTION__KEY` environment overrides.

use crate::error::{Error, Result};

use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "copilot.toml";

/// Environment prefix for overrides.
const ENV_PREFIX: &str = "COPILOT";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub crawl: CrawlConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub retrieval: RetrievalConfig,
    pub llm: LlmConfig,
    pub guard: GuardConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// On-disk locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Persisted crawled pages (one text file per page).
    pub data_dir: PathBuf,
    /// LanceDB database directory.
    pub index_dir: PathBuf,
    /// Per-user conversation records.
    pub history_dir: PathBuf,
    /// Where fastembed keeps downloaded model files.
    pub model_cache_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let model_cache_dir = dirs::cache_dir()
            .map(|dir| dir.join("dataeng-copilot").join("models"))
            .unwrap_or_else(|| PathBuf::from(".fastembed_cache"));

        Self {
            data_dir: PathBuf::from("dataStorage"),
            index_dir: PathBuf::from("indexStorage"),
            history_dir: PathBuf::from("chatHistory"),
            model_cache_dir,
        }
    }
}

/// Documentation crawl settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    pub seed_urls: Vec<String>,
    /// Link hops followed from a seed. 0 fetches only the seeds.
    pub depth: usize,
    /// Upper bound on successfully fetched pages.
    pub max_pages: usize,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            seed_urls: vec![
                "https://spark.apache.org/docs/latest/sql-getting-started.html".into(),
                "https://spark.apache.org/docs/latest/sql-programming-guide.html".into(),
                "https://docs.getdbt.com/reference/references-overview".into(),
                "https://airflow.apache.org/docs/apache-airflow/stable/core-concepts/dags.html"
                    .into(),
            ],
            depth: 1,
            max_pages: 50,
            timeout_secs: 10,
            user_agent: concat!("dataeng-copilot/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Hard cap on chunk length in characters.
    pub max_chunk_size: usize,
    /// Percentile of adjacent-window distances above which a boundary is cut.
    pub breakpoint_percentile: f32,
    /// Neighbouring sentences on each side folded into a comparison window.
    pub buffer_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 768,
            breakpoint_percentile: 95.0,
            buffer_size: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "bge-small-en-v1.5".into(),
            batch_size: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Name of the LanceDB table holding the chunk vectors.
    pub collection: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            collection: "rag_index".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 5 }
    }
}

/// Language model settings. The model is served by a local Ollama daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    /// Reasoning turns before the loop is forced to stop.
    pub max_turns: usize,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            model: "llama3".into(),
            temperature: 0.0,
            max_turns: 2,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Technologies the assistant refuses to discuss. Matched case-insensitively
    /// as substrings, in this order.
    pub denied_topics: Vec<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            denied_topics: [
                "kafka",
                "snowflake",
                "mongodb",
                "redis",
                "elasticsearch",
                "postgres",
                "mysql",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// When set, logs are also written to a daily rolling file here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            dir: None,
        }
    }
}

impl Config {
    /// Load configuration from `path` (if it exists) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("crawl.seed_urls")
                    .with_list_parse_key("guard.denied_topics"),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;

        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Reject values that would make the pipeline misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.crawl.max_pages == 0 {
            return Err(Error::Config("crawl.max_pages must be at least 1".into()));
        }
        if self.chunking.max_chunk_size == 0 {
            return Err(Error::Config(
                "chunking.max_chunk_size must be at least 1".into(),
            ));
        }
        let percentile = self.chunking.breakpoint_percentile;
        if !(percentile > 0.0 && percentile <= 100.0) {
            return Err(Error::Config(format!(
                "chunking.breakpoint_percentile must be in (0, 100], got {percentile}"
            )));
        }
        if self.embedding.batch_size == 0 {
            return Err(Error::Config("embedding.batch_size must be at least 1".into()));
        }
        if self.index.collection.trim().is_empty() {
            return Err(Error::Config("index.collection must not be empty".into()));
        }
        if self.retrieval.top_k == 0 {
            return Err(Error::Config("retrieval.top_k must be at least 1".into()));
        }
        if self.llm.max_turns == 0 {
            return Err(Error::Config("llm.max_turns must be at least 1".into()));
        }
        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|error| Error::Config(error.to_string()))
    }
}
