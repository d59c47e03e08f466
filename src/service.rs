//! Per-user agent registry and the query entry point.

use crate::agent::{DocsAgent, Reasoner, RigReasoner, TopicGuard};
use crate::config::{Config, LlmConfig};
use crate::embedding::{Embedder, FastEmbedder};
use crate::error::{Error, Result};
use crate::history::{HistoryStore, Turn};
use crate::index::{DocIndex, IndexManager, Retriever};
use crate::ingest::{DocumentLoader, HttpFetcher, PageFetcher};

use tokio::sync::{Mutex, OnceCell};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Builds the reasoning capability for a new agent.
pub trait ReasonerFactory: Send + Sync {
    fn create(&self, retriever: Arc<dyn Retriever>) -> Result<Arc<dyn Reasoner>>;
}

/// Produces [`RigReasoner`]s talking to Ollama.
pub struct OllamaReasonerFactory {
    llm: LlmConfig,
    top_k: usize,
    denied_topics: Vec<String>,
}

impl OllamaReasonerFactory {
    pub fn new(config: &Config) -> Self {
        Self {
            llm: config.llm.clone(),
            top_k: config.retrieval.top_k,
            denied_topics: config.guard.denied_topics.clone(),
        }
    }
}

impl ReasonerFactory for OllamaReasonerFactory {
    fn create(&self, retriever: Arc<dyn Retriever>) -> Result<Arc<dyn Reasoner>> {
        let reasoner =
            RigReasoner::new(self.llm.clone(), retriever, self.top_k, &self.denied_topics)?;
        Ok(Arc::new(reasoner))
    }
}

type AgentSlot = Arc<OnceCell<Arc<DocsAgent>>>;

/// Owns the index, the history store and one agent per user.
///
/// The index is loaded on first use. Agents are created lazily; concurrent
/// first requests for a user share a single construction, and a failed
/// construction is retried on the next request.
pub struct CopilotService {
    config: Config,
    index_manager: IndexManager,
    index: OnceCell<DocIndex>,
    history: Arc<HistoryStore>,
    guard: TopicGuard,
    reasoners: Arc<dyn ReasonerFactory>,
    agents: Mutex<HashMap<String, AgentSlot>>,
}

impl CopilotService {
    pub fn new(
        config: Config,
        index_manager: IndexManager,
        history: Arc<HistoryStore>,
        reasoners: Arc<dyn ReasonerFactory>,
    ) -> Self {
        let guard = TopicGuard::new(&config.guard.denied_topics);
        Self {
            config,
            index_manager,
            index: OnceCell::new(),
            history,
            guard,
            reasoners,
            agents: Mutex::new(HashMap::new()),
        }
    }

    /// Wire the production stack: fastembed, reqwest crawler, LanceDB and
    /// Ollama.
    pub async fn from_config(config: Config) -> Result<Self> {
        let model = config.embedding.model.clone();
        let cache_dir = config.paths.model_cache_dir.clone();
        let embedder = tokio::task::spawn_blocking(move || FastEmbedder::new(&model, &cache_dir))
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("embedding init failed: {}", e)))??;
        let embedder: Arc<dyn Embedder> = Arc::new(embedder);

        let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpFetcher::new(
            Duration::from_secs(config.crawl.timeout_secs),
            &config.crawl.user_agent,
        )?);

        let connection = IndexManager::connect(&config.paths.index_dir).await?;
        let index_manager = IndexManager::new(
            connection,
            embedder,
            DocumentLoader::new(&config.paths.data_dir, fetcher),
            config.chunking.clone(),
            config.index.collection.clone(),
            config.embedding.batch_size,
        );

        let history = Arc::new(HistoryStore::new(&config.paths.history_dir));
        let reasoners = Arc::new(OllamaReasonerFactory::new(&config));

        Ok(Self::new(config, index_manager, history, reasoners))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The documentation index, loaded or built on first call.
    pub async fn index(&self) -> Result<DocIndex> {
        self.index
            .get_or_try_init(|| async {
                let crawl = &self.config.crawl;
                self.index_manager
                    .load_or_build(&crawl.seed_urls, crawl.depth, crawl.max_pages)
                    .await?
                    .ok_or_else(|| {
                        Error::Config("no documents could be loaded to build the index".into())
                    })
            })
            .await
            .cloned()
    }

    /// Whether the index has been loaded or built yet.
    pub fn index_loaded(&self) -> bool {
        self.index.initialized()
    }

    /// Crawl and rebuild the collection regardless of its current state.
    /// Agents already handed out see the new contents.
    pub async fn rebuild_index(&self) -> Result<Option<DocIndex>> {
        let crawl = &self.config.crawl;
        let rebuilt = self
            .index_manager
            .rebuild(&crawl.seed_urls, crawl.depth, crawl.max_pages)
            .await?;
        if let Some(index) = &rebuilt {
            if self.index.set(index.clone()).is_err() {
                // The cell already holds a handle onto the same slot.
                tracing::trace!("index handle already initialized");
            }
        }
        Ok(rebuilt)
    }

    /// The agent for `user`, creating it on first use.
    pub async fn agent(&self, user: &str) -> Result<Arc<DocsAgent>> {
        let slot = {
            let mut agents = self.agents.lock().await;
            agents.entry(user.to_string()).or_default().clone()
        };

        slot.get_or_try_init(|| async {
            let index = self.index().await?;
            let reasoner = self.reasoners.create(Arc::new(index))?;
            tracing::info!(user, "created agent");
            Ok::<_, Error>(Arc::new(DocsAgent::new(
                user,
                self.guard.clone(),
                reasoner,
                self.history.clone(),
            )))
        })
        .await
        .cloned()
    }

    /// Answer `text` for `user`. Always returns a string; a failure to set up
    /// the user's agent is reported as `Error: <message>` and recorded.
    pub async fn query(&self, text: &str, user: &str, clear_history: bool) -> String {
        match self.agent(user).await {
            Ok(agent) => agent.query(text, clear_history).await,
            Err(error) => {
                tracing::error!(%error, user, "failed to set up agent");
                let answer = format!("Error: {error}");

                if clear_history {
                    if let Err(error) = self.history.clear(user).await {
                        tracing::warn!(%error, user, "failed to clear history");
                    }
                }
                if let Err(error) = self.history.append(user, Turn::new(text, &answer)).await {
                    tracing::warn!(%error, user, "failed to record turn");
                }
                answer
            }
        }
    }

    pub async fn history(&self, user: &str) -> Vec<Turn> {
        self.history.read_all(user).await
    }

    pub async fn clear_history(&self, user: &str) -> Result<()> {
        self.history.clear(user).await
    }

    /// Number of users with a constructed agent.
    pub async fn agent_count(&self) -> usize {
        self.agents
            .lock()
            .await
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{EchoFactory, service, write_corpus};

    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn answers_from_indexed_documentation() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_corpus(&temp.path().join("data"));
        let service = service(temp.path(), Arc::new(EchoFactory::default())).await;

        let answer = service
            .query("What does a SparkSession provide?", "u1", false)
            .await;

        assert!(answer.starts_with("[Spark]"), "got {answer}");
        assert!(answer.contains("sql-getting-started"));
    }

    #[tokio::test]
    async fn concurrent_first_requests_build_one_agent() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_corpus(&temp.path().join("data"));
        let factory = Arc::new(EchoFactory::default());
        let service = Arc::new(service(temp.path(), factory.clone()).await);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let service = service.clone();
                tokio::spawn(async move {
                    service
                        .query(&format!("What is a DAG? ({i})"), "shared", false)
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.expect("join");
        }

        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert_eq!(service.agent_count().await, 1);
        assert_eq!(service.history("shared").await.len(), 8);
    }

    #[tokio::test]
    async fn clear_flag_resets_history_before_answering() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_corpus(&temp.path().join("data"));
        let service = service(temp.path(), Arc::new(EchoFactory::default())).await;

        service.query("What is a DAG?", "u2", false).await;
        service.query("What is Spark?", "u2", false).await;
        service.query("Tell me about DAG tasks", "u2", true).await;

        let turns = service.history("u2").await;
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].question, "Tell me about DAG tasks");
    }

    #[tokio::test]
    async fn setup_failure_is_reported_recorded_and_retried() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(temp.path().join("data")).expect("mkdir");
        let factory = Arc::new(EchoFactory::default());
        let service = service(temp.path(), factory.clone()).await;

        let answer = service.query("What is a DAG?", "u3", false).await;
        assert!(answer.starts_with("Error: "), "got {answer}");
        assert_eq!(service.history("u3").await[0].answer, answer);
        assert_eq!(factory.created.load(Ordering::SeqCst), 0);

        write_corpus(&temp.path().join("data"));
        let answer = service.query("What is a DAG?", "u3", false).await;
        assert!(answer.starts_with("[Airflow]"), "got {answer}");
        assert_eq!(service.history("u3").await.len(), 2);
    }

    #[tokio::test]
    async fn rebuild_before_first_query_fills_the_index() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_corpus(&temp.path().join("data"));
        let service = service(temp.path(), Arc::new(EchoFactory::default())).await;
        assert!(!service.index_loaded());

        let rebuilt = service
            .rebuild_index()
            .await
            .expect("rebuild")
            .expect("index");
        assert!(service.index_loaded());

        let again = service
            .rebuild_index()
            .await
            .expect("second rebuild")
            .expect("index");
        assert_eq!(
            again.chunk_count().await.expect("count"),
            rebuilt.chunk_count().await.expect("count")
        );

        let answer = service.query("What is a DAG?", "u5", false).await;
        assert!(answer.starts_with("[Airflow]"), "got {answer}");
    }

    #[tokio::test]
    async fn denied_topics_never_reach_the_index() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_corpus(&temp.path().join("data"));
        let service = service(temp.path(), Arc::new(EchoFactory::default())).await;

        let answer = service.query("How do I tune Redis?", "u4", false).await;
        assert!(answer.starts_with("I don't have Redis documentation."));
    }
}
