//! The `docs_search` tool exposed to the reasoning loop.

use crate::index::{Retriever, ScoredChunk};

use rig::completion::ToolDefinition;
use rig::tool::Tool;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use std::sync::{Arc, Mutex};

/// Characters of passage text shown to the model per result.
const PASSAGE_PREVIEW_CHARS: usize = 1200;

/// Records every retrieval made during one reasoning run.
#[derive(Debug, Default)]
pub struct RetrievalLog {
    passages: Mutex<Vec<ScoredChunk>>,
    calls: Mutex<usize>,
    failures: Mutex<Vec<String>>,
}

impl RetrievalLog {
    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Passages returned across all calls, deduplicated by chunk id, best first.
    pub fn passages(&self) -> Vec<ScoredChunk> {
        let passages = self
            .passages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut unique: Vec<ScoredChunk> = Vec::new();
        for passage in passages.iter() {
            if !unique.iter().any(|seen| seen.chunk.id == passage.chunk.id) {
                unique.push(passage.clone());
            }
        }
        unique.sort_by(|a, b| b.score.total_cmp(&a.score));
        unique
    }

    /// First search failure of the run, if any.
    pub fn failure(&self) -> Option<String> {
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .first()
            .cloned()
    }

    fn record_failure(&self, reason: String) {
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(reason);
    }

    fn record(&self, results: &[ScoredChunk]) {
        *self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) += 1;
        self.passages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend_from_slice(results);
    }
}

/// Searches the indexed Spark, dbt and Airflow documentation.
#[derive(Clone)]
pub struct DocsSearchTool {
    retriever: Arc<dyn Retriever>,
    top_k: usize,
    log: Arc<RetrievalLog>,
}

impl DocsSearchTool {
    pub fn new(retriever: Arc<dyn Retriever>, top_k: usize, log: Arc<RetrievalLog>) -> Self {
        Self {
            retriever,
            top_k: top_k.max(1),
            log,
        }
    }
}

/// Error type for the docs search tool.
#[derive(Debug, thiserror::Error)]
#[error("Documentation search failed: {0}")]
pub struct DocsSearchError(String);

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DocsSearchArgs {
    /// What to look up in the documentation.
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct DocsSearchOutput {
    pub results: Vec<DocsSearchResultItem>,
    /// Formatted summary of the results.
    pub summary: String,
}

#[derive(Debug, Serialize)]
pub struct DocsSearchResultItem {
    /// Spark, dbt or Airflow.
    pub collection: String,
    pub source: String,
    pub score: f32,
    pub text: String,
}

impl Tool for DocsSearchTool {
    const NAME: &'static str = "docs_search";

    type Error = DocsSearchError;
    type Args = DocsSearchArgs;
    type Output = DocsSearchOutput;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Search ONLY in indexed Apache Spark, dbt, and Apache Airflow \
                documentation. Use this for every question before answering. Returns the \
                most relevant documentation passages with their source URLs."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "required": ["query"],
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "What to look up in the Spark, dbt, or Airflow documentation."
                    }
                }
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> std::result::Result<Self::Output, Self::Error> {
        let query = args.query.trim();
        if query.is_empty() {
            return Err(DocsSearchError("query must not be empty".to_string()));
        }

        let results = match self.retriever.search(query, self.top_k).await {
            Ok(results) => results,
            Err(error) => {
                tracing::warn!(%error, query, "docs_search failed");
                self.log.record_failure(error.to_string());
                return Err(DocsSearchError(error.to_string()));
            }
        };

        tracing::debug!(query, results = results.len(), "docs_search executed");
        self.log.record(&results);

        let items: Vec<DocsSearchResultItem> = results
            .iter()
            .map(|result| DocsSearchResultItem {
                collection: collection_label(&result.chunk.source).to_string(),
                source: result.chunk.source.clone(),
                score: result.score,
                text: preview(&result.chunk.text, PASSAGE_PREVIEW_CHARS),
            })
            .collect();

        let summary = format_results(&items);
        Ok(DocsSearchOutput {
            results: items,
            summary,
        })
    }
}

/// Which documentation set a source belongs to.
pub fn collection_label(source: &str) -> &'static str {
    let source = source.to_lowercase();
    if source.contains("spark") {
        "Spark"
    } else if source.contains("getdbt") || source.contains("dbt") {
        "dbt"
    } else if source.contains("airflow") {
        "Airflow"
    } else {
        "Docs"
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

fn format_results(results: &[DocsSearchResultItem]) -> String {
    if results.is_empty() {
        return "No matching documentation found.".to_string();
    }

    let mut output = String::from("## Documentation Search Results\n\n");
    for (i, result) in results.iter().enumerate() {
        output.push_str(&format!(
            "{}. [{}] (score: {:.2})\n   {}\n   Source: {}\n\n",
            i + 1,
            result.collection,
            result.score,
            result.text,
            result.source,
        ));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::Chunk;
    use crate::error::Result;

    use async_trait::async_trait;

    struct FixedRetriever;

    #[async_trait]
    impl Retriever for FixedRetriever {
        async fn search(&self, _query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
            Ok(vec![
                ScoredChunk {
                    chunk: Chunk {
                        id: "dag-0".into(),
                        source: "https://airflow.apache.org/docs/dags.html".into(),
                        index: 0,
                        text: "A DAG is a collection of tasks.".into(),
                    },
                    score: 0.9,
                },
                ScoredChunk {
                    chunk: Chunk {
                        id: "ref-0".into(),
                        source: "https://docs.getdbt.com/reference/ref".into(),
                        index: 0,
                        text: "ref() selects from another model.".into(),
                    },
                    score: 0.4,
                },
            ]
            .into_iter()
            .take(k)
            .collect())
        }
    }

    struct BrokenRetriever;

    #[async_trait]
    impl Retriever for BrokenRetriever {
        async fn search(&self, _query: &str, _k: usize) -> Result<Vec<ScoredChunk>> {
            Err(crate::error::DbError::LanceDb("table is gone".into()).into())
        }
    }

    #[tokio::test]
    async fn failed_search_is_logged_as_failure() {
        let log = Arc::new(RetrievalLog::default());
        let tool = DocsSearchTool::new(Arc::new(BrokenRetriever), 5, log.clone());

        let error = tool
            .call(DocsSearchArgs { query: "dag".into() })
            .await
            .expect_err("search must fail");

        assert!(error.to_string().contains("table is gone"));
        assert_eq!(log.calls(), 0);
        assert!(log.failure().is_some_and(|reason| reason.contains("table is gone")));
    }

    #[tokio::test]
    async fn call_labels_collections_and_records_retrievals() {
        let log = Arc::new(RetrievalLog::default());
        let tool = DocsSearchTool::new(Arc::new(FixedRetriever), 5, log.clone());

        let output = tool
            .call(DocsSearchArgs {
                query: "what is a dag".into(),
            })
            .await
            .expect("call");

        assert_eq!(output.results[0].collection, "Airflow");
        assert_eq!(output.results[1].collection, "dbt");
        assert!(output.summary.contains("Source: https://airflow.apache.org/docs/dags.html"));
        assert_eq!(log.calls(), 1);
        assert_eq!(log.passages().len(), 2);
    }

    #[tokio::test]
    async fn repeated_calls_deduplicate_passages() {
        let log = Arc::new(RetrievalLog::default());
        let tool = DocsSearchTool::new(Arc::new(FixedRetriever), 1, log.clone());

        for _ in 0..2 {
            tool.call(DocsSearchArgs { query: "dag".into() })
                .await
                .expect("call");
        }

        assert_eq!(log.calls(), 2);
        assert_eq!(log.passages().len(), 1);
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let log = Arc::new(RetrievalLog::default());
        let tool = DocsSearchTool::new(Arc::new(FixedRetriever), 5, log.clone());

        let result = tool.call(DocsSearchArgs { query: "  ".into() }).await;
        assert!(result.is_err());
        assert_eq!(log.calls(), 0);
        assert!(log.failure().is_none());
    }

    #[test]
    fn labels_follow_source_urls() {
        assert_eq!(
            collection_label("https://spark.apache.org/docs/latest/sql-getting-started.html"),
            "Spark"
        );
        assert_eq!(collection_label("/data/notes.md"), "Docs");
    }
}
