#![allow(dead_code)]

use dataeng_copilot::agent::{Reasoner, ReasoningOutcome, StopReason};
use dataeng_copilot::embedding::Embedder;
use dataeng_copilot::history::HistoryStore;
use dataeng_copilot::index::{IndexManager, Retriever};
use dataeng_copilot::ingest::{DocumentLoader, PageFetcher};
use dataeng_copilot::service::ReasonerFactory;
use dataeng_copilot::{Config, CopilotService, Error, Result};

use async_trait::async_trait;
use url::Url;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const DIMENSIONS: usize = 128;

/// Bag-of-words embedder: texts sharing vocabulary score as similar.
#[derive(Default)]
pub struct WordEmbedder {
    pub texts_embedded: AtomicUsize,
}

#[async_trait]
impl Embedder for WordEmbedder {
    fn model_name(&self) -> &str {
        "word-bag"
    }

    fn dimensions(&self) -> usize {
        DIMENSIONS
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0_f32; DIMENSIONS];
                for word in text
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|word| word.len() > 2)
                {
                    let bucket = word
                        .to_lowercase()
                        .bytes()
                        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
                    vector[bucket as usize % DIMENSIONS] += 1.0;
                }
                let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
                if norm > 0.0 {
                    vector.iter_mut().for_each(|v| *v /= norm);
                }
                vector
            })
            .collect())
    }
}

pub struct Offline;

#[async_trait]
impl PageFetcher for Offline {
    async fn fetch(&self, url: &Url) -> Result<String> {
        Err(Error::Fetch {
            url: url.to_string(),
            reason: "network disabled in tests".into(),
        })
    }
}

/// Searches once and answers with the top passage's source.
pub struct SourceReasoner {
    retriever: Arc<dyn Retriever>,
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Reasoner for SourceReasoner {
    async fn reason(&self, question: &str) -> Result<ReasoningOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let results = self.retriever.search(question, 3).await?;
        let answer = results
            .first()
            .map(|best| format!("See {}", best.chunk.source))
            .unwrap_or_default();
        Ok(ReasoningOutcome {
            answer,
            retrievals: 1,
            stop: StopReason::Answered,
        })
    }
}

#[derive(Default)]
pub struct CountingFactory {
    pub created: AtomicUsize,
    pub reasoner_calls: Arc<AtomicUsize>,
}

impl ReasonerFactory for CountingFactory {
    fn create(&self, retriever: Arc<dyn Retriever>) -> Result<Arc<dyn Reasoner>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(SourceReasoner {
            retriever,
            calls: self.reasoner_calls.clone(),
        }))
    }
}

pub const PAGES: &[(&str, &str)] = &[
    (
        "https://spark.apache.org/docs/latest/sql-getting-started.html",
        "The SparkSession is the entry point into Spark SQL. \
         Create one with SparkSession builder and call getOrCreate.",
    ),
    (
        "https://docs.getdbt.com/reference/references-overview",
        "The dbt reference covers project configuration, model properties and commands \
         like dbt run and dbt test.",
    ),
    (
        "https://airflow.apache.org/docs/apache-airflow/stable/core-concepts/dags.html",
        "A DAG is the core concept of Airflow. Operators define tasks and the scheduler \
         triggers DAG runs.",
    ),
];

pub fn write_pages(dir: &Path) {
    std::fs::create_dir_all(dir).expect("create data dir");
    for (seq, (url, body)) in PAGES.iter().enumerate() {
        std::fs::write(
            dir.join(format!("page_{}_fixture.txt", seq + 1)),
            format!("URL: {url}\n\n{body}"),
        )
        .expect("write page");
    }
}

pub fn config(root: &Path) -> Config {
    let mut config = Config::default();
    config.paths.data_dir = root.join("dataStorage");
    config.paths.index_dir = root.join("indexStorage");
    config.paths.history_dir = root.join("chatHistory");
    config.crawl.seed_urls.clear();
    config
}

pub async fn service(
    root: &Path,
    embedder: Arc<WordEmbedder>,
    factory: Arc<CountingFactory>,
) -> CopilotService {
    let config = config(root);
    let connection = IndexManager::connect(&config.paths.index_dir)
        .await
        .expect("connect");
    let index_manager = IndexManager::new(
        connection,
        embedder,
        DocumentLoader::new(&config.paths.data_dir, Arc::new(Offline)),
        config.chunking.clone(),
        config.index.collection.clone(),
        config.embedding.batch_size,
    );
    let history = Arc::new(HistoryStore::new(&config.paths.history_dir));
    CopilotService::new(config, index_manager, history, factory)
}
