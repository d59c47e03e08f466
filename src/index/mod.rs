//! Index lifecycle: crawl, chunk, embed and store, or reattach to an existing
//! populated collection.

pub mod table;

pub use table::{ChunkHit, ChunkTable};

use crate::chunker::{Chunk, SemanticChunker};
use crate::config::ChunkingConfig;
use crate::embedding::Embedder;
use crate::error::{DbError, Result};
use crate::ingest::DocumentLoader;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;

use std::sync::Arc;

/// A retrieved chunk with its cosine similarity to the query.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Similarity search over indexed documentation.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// The `k` most similar chunks, best first.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>>;
}

/// Queryable handle onto the collection. Cheap to clone; every clone sees
/// rebuilds performed by the manager that issued it.
#[derive(Clone)]
pub struct DocIndex {
    slot: Arc<RwLock<Option<ChunkTable>>>,
    embedder: Arc<dyn Embedder>,
}

impl DocIndex {
    /// Number of stored chunks.
    pub async fn chunk_count(&self) -> Result<usize> {
        let slot = self.slot.read().await;
        match slot.as_ref() {
            Some(table) => table.count().await,
            None => Ok(0),
        }
    }
}

#[async_trait]
impl Retriever for DocIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        let embedding = self.embedder.embed_one(query).await?;

        let slot = self.slot.read().await;
        let table = slot
            .as_ref()
            .ok_or_else(|| DbError::LanceDb("collection is not available".into()))?;

        let hits = table.vector_search(&embedding, k).await?;
        Ok(hits
            .into_iter()
            .map(|hit| ScoredChunk {
                chunk: hit.chunk,
                score: 1.0 - hit.distance,
            })
            .collect())
    }
}

/// Creates, reuses and rebuilds the documentation collection.
pub struct IndexManager {
    connection: lancedb::Connection,
    embedder: Arc<dyn Embedder>,
    loader: DocumentLoader,
    chunking: ChunkingConfig,
    collection: String,
    batch_size: usize,
    slot: Arc<RwLock<Option<ChunkTable>>>,
}

impl IndexManager {
    pub fn new(
        connection: lancedb::Connection,
        embedder: Arc<dyn Embedder>,
        loader: DocumentLoader,
        chunking: ChunkingConfig,
        collection: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            connection,
            embedder,
            loader,
            chunking,
            collection: collection.into(),
            batch_size: batch_size.max(1),
            slot: Arc::new(RwLock::new(None)),
        }
    }

    /// Open the LanceDB database at `path`.
    pub async fn connect(path: &std::path::Path) -> Result<lancedb::Connection> {
        tokio::fs::create_dir_all(path).await?;
        let uri = path.to_string_lossy();
        lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| DbError::LanceDb(e.to_string()).into())
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn handle(&self) -> DocIndex {
        DocIndex {
            slot: self.slot.clone(),
            embedder: self.embedder.clone(),
        }
    }

    /// Replace the collection with `chunks`.
    ///
    /// Searches wait for the whole drop, create and insert sequence to finish.
    /// A failed build leaves no collection behind, so the next
    /// `load_or_build` starts over instead of reusing a partial one.
    pub async fn build(&self, chunks: &[Chunk]) -> Result<DocIndex> {
        let mut slot = self.slot.write().await;
        *slot = None;

        ChunkTable::drop_if_exists(&self.connection, &self.collection).await?;
        let table = match self.fill(chunks).await {
            Ok(table) => table,
            Err(error) => {
                tracing::warn!(
                    %error,
                    collection = %self.collection,
                    "build failed, dropping partial collection"
                );
                if let Err(drop_error) =
                    ChunkTable::drop_if_exists(&self.connection, &self.collection).await
                {
                    tracing::warn!(%drop_error, "failed to drop partial collection");
                }
                return Err(error);
            }
        };

        tracing::info!(
            collection = %self.collection,
            chunks = chunks.len(),
            model = self.embedder.model_name(),
            "collection built"
        );

        *slot = Some(table);
        drop(slot);
        Ok(self.handle())
    }

    async fn fill(&self, chunks: &[Chunk]) -> Result<ChunkTable> {
        let table =
            ChunkTable::create(&self.connection, &self.collection, self.embedder.dimensions())
                .await?;

        for (batch_number, batch) in chunks.chunks(self.batch_size).enumerate() {
            let texts = batch.iter().map(|chunk| chunk.text.clone()).collect();
            let embeddings = self.embedder.embed(texts).await?;
            table.insert(batch, &embeddings).await?;
            tracing::debug!(batch = batch_number, size = batch.len(), "embedded chunk batch");
        }
        Ok(table)
    }

    /// Attach to the collection if it already holds chunks, otherwise crawl,
    /// chunk and build it. `Ok(None)` when no documents could be obtained.
    pub async fn load_or_build(
        &self,
        seed_urls: &[String],
        crawl_depth: usize,
        max_pages: usize,
    ) -> Result<Option<DocIndex>> {
        if let Some(table) = ChunkTable::open(
            &self.connection,
            &self.collection,
            self.embedder.dimensions(),
        )
        .await?
        {
            let count = table.count().await?;
            if count > 0 {
                tracing::info!(collection = %self.collection, chunks = count, "reusing existing collection");
                *self.slot.write().await = Some(table);
                return Ok(Some(self.handle()));
            }
            tracing::info!(collection = %self.collection, "existing collection is empty, rebuilding");
        }

        self.rebuild(seed_urls, crawl_depth, max_pages).await
    }

    /// Crawl, chunk and build unconditionally. An existing collection is left
    /// untouched when the new corpus turns out empty.
    pub async fn rebuild(
        &self,
        seed_urls: &[String],
        crawl_depth: usize,
        max_pages: usize,
    ) -> Result<Option<DocIndex>> {
        let documents = self.loader.load(seed_urls, crawl_depth, max_pages).await?;
        if documents.is_empty() {
            tracing::warn!(dir = %self.loader.directory().display(), "no documents to index");
            return Ok(None);
        }

        let chunker = SemanticChunker::new(
            self.embedder.clone(),
            self.chunking.clone(),
            self.batch_size,
        );
        let chunks = chunker.chunk_documents(&documents).await?;
        if chunks.is_empty() {
            tracing::warn!(documents = documents.len(), "documents produced no chunks");
            return Ok(None);
        }

        self.build(&chunks).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::testing::{DIMENSIONS, HashEmbedder};
    use crate::ingest::PageFetcher;

    use std::sync::atomic::Ordering;
    use url::Url;

    struct NoNetwork;

    #[async_trait]
    impl PageFetcher for NoNetwork {
        async fn fetch(&self, url: &Url) -> Result<String> {
            Err(crate::error::Error::Fetch {
                url: url.to_string(),
                reason: "offline".into(),
            })
        }
    }

    struct Fixture {
        _temp: tempfile::TempDir,
        data_dir: std::path::PathBuf,
        db_dir: std::path::PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = tempfile::tempdir().expect("tempdir");
            let data_dir = temp.path().join("data");
            let db_dir = temp.path().join("db");
            std::fs::create_dir_all(&data_dir).expect("mkdir");
            Self {
                _temp: temp,
                data_dir,
                db_dir,
            }
        }

        fn write_corpus(&self) {
            std::fs::write(
                self.data_dir.join("page_1_spark.txt"),
                "URL: https://spark.apache.org/docs/sql\n\n\
                 Spark SQL lets you query structured data with DataFrames. \
                 A DataFrame is a distributed collection of rows with named columns.",
            )
            .expect("write spark");
            std::fs::write(
                self.data_dir.join("page_2_airflow.txt"),
                "URL: https://airflow.apache.org/docs/dags\n\n\
                 An Airflow DAG defines tasks and their dependencies. \
                 The scheduler triggers DAG runs on a schedule.",
            )
            .expect("write airflow");
        }

        async fn manager(&self, embedder: Arc<dyn Embedder>) -> IndexManager {
            self.manager_with_batch(embedder, 16).await
        }

        async fn manager_with_batch(
            &self,
            embedder: Arc<dyn Embedder>,
            batch_size: usize,
        ) -> IndexManager {
            let connection = IndexManager::connect(&self.db_dir).await.expect("connect");
            IndexManager::new(
                connection,
                embedder,
                DocumentLoader::new(&self.data_dir, Arc::new(NoNetwork)),
                ChunkingConfig::default(),
                "rag_index",
                batch_size,
            )
        }
    }

    /// Embeds normally for `succeed` calls, then fails every call.
    struct FlakyEmbedder {
        inner: HashEmbedder,
        succeed: usize,
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        fn model_name(&self) -> &str {
            "flaky"
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }

        async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            if self.inner.calls.load(Ordering::SeqCst) >= self.succeed {
                return Err(crate::error::LlmError::EmbeddingFailed("model crashed".into()).into());
            }
            self.inner.embed(texts).await
        }
    }

    /// Hash embeddings padded to twice the usual width.
    #[derive(Default)]
    struct WideEmbedder {
        inner: HashEmbedder,
    }

    #[async_trait]
    impl Embedder for WideEmbedder {
        fn model_name(&self) -> &str {
            "wide"
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions() * 2
        }

        async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            let width = self.dimensions();
            let mut vectors = self.inner.embed(texts).await?;
            vectors.iter_mut().for_each(|vector| vector.resize(width, 0.0));
            Ok(vectors)
        }
    }

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            id: id.into(),
            source: id.into(),
            index: 0,
            text: text.into(),
        }
    }

    #[tokio::test]
    async fn failed_build_leaves_nothing_to_reuse() {
        let fixture = Fixture::new();
        fixture.write_corpus();
        let flaky = Arc::new(FlakyEmbedder {
            inner: HashEmbedder::default(),
            succeed: 1,
        });
        let manager = fixture.manager_with_batch(flaky, 1).await;

        let result = manager
            .build(&[chunk("a", "spark dataframe"), chunk("b", "airflow dag")])
            .await;
        assert!(result.is_err());

        let connection = IndexManager::connect(&fixture.db_dir).await.expect("connect");
        let leftover = ChunkTable::open(&connection, "rag_index", DIMENSIONS)
            .await
            .expect("open");
        assert!(leftover.is_none());

        let healthy = Arc::new(HashEmbedder::default());
        let index = fixture
            .manager(healthy.clone())
            .await
            .load_or_build(&[], 1, 10)
            .await
            .expect("load")
            .expect("index");
        assert!(healthy.texts_embedded.load(Ordering::SeqCst) > 0);
        let results = index.search("Airflow DAG scheduler", 1).await.expect("search");
        assert_eq!(results[0].chunk.source, "https://airflow.apache.org/docs/dags");
    }

    #[tokio::test]
    async fn dimension_change_rebuilds_instead_of_reusing() {
        let fixture = Fixture::new();
        fixture.write_corpus();

        fixture
            .manager(Arc::new(HashEmbedder::default()))
            .await
            .load_or_build(&[], 1, 10)
            .await
            .expect("build")
            .expect("index");

        let wide = Arc::new(WideEmbedder::default());
        let index = fixture
            .manager(wide.clone())
            .await
            .load_or_build(&[], 1, 10)
            .await
            .expect("rebuild")
            .expect("index");

        assert!(wide.inner.texts_embedded.load(Ordering::SeqCst) > 0);
        let results = index.search("Spark DataFrame columns", 1).await.expect("search");
        assert_eq!(results[0].chunk.source, "https://spark.apache.org/docs/sql");
    }

    #[tokio::test]
    async fn empty_corpus_yields_none() {
        let fixture = Fixture::new();
        let manager = fixture.manager(Arc::new(HashEmbedder::default())).await;

        let index = manager.load_or_build(&[], 1, 10).await.expect("load");
        assert!(index.is_none());
    }

    #[tokio::test]
    async fn built_index_finds_relevant_source() {
        let fixture = Fixture::new();
        fixture.write_corpus();
        let manager = fixture.manager(Arc::new(HashEmbedder::default())).await;

        let index = manager
            .load_or_build(&[], 1, 10)
            .await
            .expect("load")
            .expect("index");

        let results = index.search("what is an Airflow DAG", 2).await.expect("search");
        assert_eq!(results[0].chunk.source, "https://airflow.apache.org/docs/dags");
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn building_twice_stays_queryable() {
        let fixture = Fixture::new();
        fixture.write_corpus();
        let manager = fixture.manager(Arc::new(HashEmbedder::default())).await;

        for _ in 0..2 {
            let index = manager
                .rebuild(&[], 1, 10)
                .await
                .expect("rebuild")
                .expect("index");
            let results = index.search("Spark DataFrame columns", 1).await.expect("search");
            assert_eq!(results[0].chunk.source, "https://spark.apache.org/docs/sql");
        }
    }

    #[tokio::test]
    async fn reuse_does_not_reembed_corpus() {
        let fixture = Fixture::new();
        fixture.write_corpus();

        let first = Arc::new(HashEmbedder::default());
        let built = fixture
            .manager(first.clone())
            .await
            .load_or_build(&[], 1, 10)
            .await
            .expect("build")
            .expect("index");
        let chunk_count = built.chunk_count().await.expect("count");
        assert!(first.texts_embedded.load(Ordering::SeqCst) > 0);

        let second = Arc::new(HashEmbedder::default());
        let reused = fixture
            .manager(second.clone())
            .await
            .load_or_build(&[], 1, 10)
            .await
            .expect("reuse")
            .expect("index");

        assert_eq!(second.texts_embedded.load(Ordering::SeqCst), 0);
        assert_eq!(reused.chunk_count().await.expect("count"), chunk_count);
    }

    #[tokio::test]
    async fn build_replaces_previous_contents() {
        let fixture = Fixture::new();
        let manager = fixture.manager(Arc::new(HashEmbedder::default())).await;
        let chunk = |id: &str, text: &str| Chunk {
            id: id.into(),
            source: id.into(),
            index: 0,
            text: text.into(),
        };

        manager
            .build(&[chunk("a", "spark"), chunk("b", "dbt")])
            .await
            .expect("first build");
        let index = manager
            .build(&[chunk("c", "airflow")])
            .await
            .expect("second build");

        assert_eq!(index.chunk_count().await.expect("count"), 1);
    }
}
