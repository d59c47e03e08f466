//! Text embedding providers.

use crate::error::{Error, LlmError, Result};

use async_trait::async_trait;

use std::path::Path;
use std::sync::Arc;

/// Turns text into fixed-dimension vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier of the underlying model.
    fn model_name(&self) -> &str;

    /// Length of every vector this embedder returns.
    fn dimensions(&self) -> usize;

    /// Embed a batch of texts, preserving order.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.embed(vec![text.to_string()]).await?;
        embeddings
            .pop()
            .ok_or_else(|| LlmError::EmbeddingFailed("model returned no vector".into()).into())
    }
}

/// Local ONNX embedding model via fastembed.
///
/// fastembed's TextEmbedding is not Send, so we hold it behind an Arc and
/// use spawn_blocking to call into it from async contexts.
pub struct FastEmbedder {
    model: Arc<fastembed::TextEmbedding>,
    name: String,
    dimensions: usize,
}

impl FastEmbedder {
    /// Load `model_name`, storing downloaded model files in `cache_dir`.
    pub fn new(model_name: &str, cache_dir: &Path) -> Result<Self> {
        let (model, dimensions) = resolve_model(model_name)?;

        // Limit ONNX Runtime threads to prevent memory pressure.
        if std::env::var("OMP_NUM_THREADS").is_err() {
            // SAFETY: Called once during single-threaded init before any ONNX
            // threads are spawned.
            unsafe { std::env::set_var("OMP_NUM_THREADS", "2") };
        }

        let options = fastembed::InitOptions::new(model)
            .with_cache_dir(cache_dir.to_path_buf())
            .with_show_download_progress(true);

        let model = fastembed::TextEmbedding::try_new(options)
            .map_err(|e| LlmError::EmbeddingFailed(e.to_string()))?;

        tracing::info!(model = model_name, dimensions, "embedding model loaded");

        Ok(Self {
            model: Arc::new(model),
            name: model_name.to_string(),
            dimensions,
        })
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.model.clone();
        tokio::task::spawn_blocking(move || {
            model
                .embed(texts, None)
                .map_err(|e| Error::from(LlmError::EmbeddingFailed(e.to_string())))
        })
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("embedding task failed: {}", e)))?
    }
}

/// Map a configured model name onto a fastembed model and its dimension.
fn resolve_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
    let normalized = name
        .trim()
        .trim_start_matches("BAAI/")
        .trim_start_matches("sentence-transformers/")
        .to_ascii_lowercase();

    match normalized.as_str() {
        "bge-small-en-v1.5" => Ok((fastembed::EmbeddingModel::BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Ok((fastembed::EmbeddingModel::BGEBaseENV15, 768)),
        "bge-large-en-v1.5" => Ok((fastembed::EmbeddingModel::BGELargeENV15, 1024)),
        "all-minilm-l6-v2" => Ok((fastembed::EmbeddingModel::AllMiniLML6V2, 384)),
        _ => Err(Error::Config(format!("unsupported embedding model: {name}"))),
    }
}

/// Cosine similarity of two equal-length vectors. Zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
