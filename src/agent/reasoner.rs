//! Bounded tool-calling reasoning over the documentation index.

use crate::agent::guard::NO_DOCUMENTATION;
use crate::agent::prompt::system_prompt;
use crate::agent::tool::{DocsSearchTool, RetrievalLog, collection_label};
use crate::config::LlmConfig;
use crate::error::{LlmError, Result};
use crate::index::{Retriever, ScoredChunk};

use async_trait::async_trait;
use rig::agent::{AgentBuilder, HookAction, PromptHook, ToolCallHookAction};
use rig::client::{CompletionClient, Nothing};
use rig::completion::{CompletionModel, CompletionResponse, Message, Prompt, PromptError};
use rig::providers::ollama;
use rig::tool::Tool;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Passages quoted in a best-effort answer.
const BEST_EFFORT_PASSAGES: usize = 3;
/// Characters quoted per passage in a best-effort answer.
const BEST_EFFORT_CHARS: usize = 600;

/// Why the reasoning loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model produced a final answer.
    Answered,
    /// The turn budget ran out after retrieving; the answer was assembled from
    /// the retrieved passages.
    BudgetExhausted,
}

/// Result of one reasoning run.
#[derive(Debug, Clone)]
pub struct ReasoningOutcome {
    pub answer: String,
    /// Number of `docs_search` calls made.
    pub retrievals: usize,
    pub stop: StopReason,
}

/// Answers one question, consulting the documentation index.
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn reason(&self, question: &str) -> Result<ReasoningOutcome>;
}

/// Counts completion turns, logs tool activity and stops the loop once a
/// documentation search has failed.
#[derive(Clone)]
struct TurnCounter {
    turns: Arc<AtomicUsize>,
    log: Arc<RetrievalLog>,
}

impl TurnCounter {
    fn new(log: Arc<RetrievalLog>) -> Self {
        Self {
            turns: Arc::new(AtomicUsize::new(0)),
            log,
        }
    }

    fn turns(&self) -> usize {
        self.turns.load(Ordering::SeqCst)
    }
}

impl<M: CompletionModel> PromptHook<M> for TurnCounter {
    async fn on_tool_call(
        &self,
        tool_name: &str,
        _tool_call_id: Option<String>,
        _internal_call_id: &str,
        args: &str,
    ) -> ToolCallHookAction {
        tracing::debug!(tool = tool_name, args, "tool call");
        ToolCallHookAction::Continue
    }

    async fn on_tool_result(
        &self,
        tool_name: &str,
        _tool_call_id: Option<String>,
        _internal_call_id: &str,
        _args: &str,
        result: &str,
    ) -> HookAction {
        tracing::debug!(tool = tool_name, result_len = result.len(), "tool result");
        match self.log.failure() {
            Some(reason) => HookAction::terminate(reason),
            None => HookAction::Continue,
        }
    }

    async fn on_completion_call(&self, _prompt: &Message, _history: &[Message]) -> HookAction {
        self.turns.fetch_add(1, Ordering::SeqCst);
        HookAction::Continue
    }

    async fn on_completion_response(
        &self,
        _prompt: &Message,
        _response: &CompletionResponse<M::Response>,
    ) -> HookAction {
        HookAction::Continue
    }
}

/// Reasoner backed by a rig agent. In production the model is a local Ollama
/// model.
pub struct RigReasoner<M = ollama::CompletionModel> {
    model: M,
    config: LlmConfig,
    retriever: Arc<dyn Retriever>,
    top_k: usize,
    preamble: String,
}

impl RigReasoner {
    pub fn new(
        config: LlmConfig,
        retriever: Arc<dyn Retriever>,
        top_k: usize,
        denied_topics: &[String],
    ) -> Result<Self> {
        let client = ollama::Client::builder()
            .api_key(Nothing)
            .base_url(&config.base_url)
            .build()
            .map_err(|error| LlmError::CompletionFailed(error.to_string()))?;
        let model = client.completion_model(&config.model);

        Self::with_model(model, config, retriever, top_k, denied_topics)
    }
}

impl<M: CompletionModel + 'static> RigReasoner<M> {
    pub fn with_model(
        model: M,
        config: LlmConfig,
        retriever: Arc<dyn Retriever>,
        top_k: usize,
        denied_topics: &[String],
    ) -> Result<Self> {
        let preamble = system_prompt(DocsSearchTool::NAME, denied_topics, NO_DOCUMENTATION)?;

        Ok(Self {
            model,
            config,
            retriever,
            top_k,
            preamble,
        })
    }
}

#[async_trait]
impl<M: CompletionModel + 'static> Reasoner for RigReasoner<M> {
    async fn reason(&self, question: &str) -> Result<ReasoningOutcome> {
        let log = Arc::new(RetrievalLog::default());
        let tool = DocsSearchTool::new(self.retriever.clone(), self.top_k, log.clone());

        let agent = AgentBuilder::new(self.model.clone())
            .preamble(&self.preamble)
            .temperature(self.config.temperature)
            .default_max_turns(self.config.max_turns)
            .tool(tool)
            .build();

        let hook = TurnCounter::new(log.clone());
        let timeout = Duration::from_secs(self.config.timeout_secs);

        let result = tokio::time::timeout(
            timeout,
            agent.prompt(question).with_hook(hook.clone()),
        )
        .await
        .map_err(|_| LlmError::Timeout(self.config.timeout_secs))?;

        if let Some(reason) = log.failure() {
            return Err(LlmError::ToolFailed {
                tool: DocsSearchTool::NAME.to_string(),
                reason,
            }
            .into());
        }

        match result {
            Ok(answer) => Ok(ReasoningOutcome {
                answer,
                retrievals: log.calls(),
                stop: StopReason::Answered,
            }),
            Err(PromptError::MaxTurnsError { max_turns, .. }) => {
                let passages = log.passages();
                if passages.is_empty() {
                    return Err(LlmError::CompletionFailed(format!(
                        "turn limit of {max_turns} reached without retrieving documentation"
                    ))
                    .into());
                }
                tracing::warn!(
                    max_turns,
                    turns = hook.turns(),
                    retrievals = log.calls(),
                    "turn budget exhausted, answering from retrieved passages"
                );
                Ok(ReasoningOutcome {
                    answer: best_effort_answer(&passages),
                    retrievals: log.calls(),
                    stop: StopReason::BudgetExhausted,
                })
            }
            Err(error) => Err(LlmError::CompletionFailed(error.to_string()).into()),
        }
    }
}

/// Quote the strongest retrieved passages with their collection and source.
pub fn best_effort_answer(passages: &[ScoredChunk]) -> String {
    if passages.is_empty() {
        return NO_DOCUMENTATION.to_string();
    }

    let mut answer = String::from("Here is what the indexed documentation says:\n");
    for passage in passages.iter().take(BEST_EFFORT_PASSAGES) {
        let text = passage.chunk.text.trim();
        let quoted = match text.char_indices().nth(BEST_EFFORT_CHARS) {
            Some((end, _)) => format!("{}...", &text[..end]),
            None => text.to_string(),
        };
        answer.push_str(&format!(
            "\n[{}] {}\nSource: {}\n",
            collection_label(&passage.chunk.source),
            quoted,
            passage.chunk.source
        ));
    }
    answer
}
