//! Retrieval-gated documentation agent.
//!
//! A query moves through a fixed sequence of states:
//!
//! ```text
//! Start -> TopicPrecheck -> Rejected ------------------------> Terminal
//!                        \-> Reasoning -> ResponseFilter -----> Terminal
//! ```
//!
//! Every path ends in exactly one answer string, which is appended to the
//! user's history.

pub mod guard;
pub mod prompt;
pub mod reasoner;
pub mod tool;

pub use guard::TopicGuard;
pub use reasoner::{Reasoner, ReasoningOutcome, RigReasoner, StopReason};
pub use tool::DocsSearchTool;

use crate::history::{HistoryStore, Turn};

use tokio::sync::Mutex;

use std::sync::Arc;

#[derive(Debug)]
enum AgentState {
    Start,
    TopicPrecheck,
    Reasoning,
    ResponseFilter(String),
    Rejected(String),
    Terminal(String),
}

/// One user's agent. Queries for the same user are answered one at a time.
pub struct DocsAgent {
    user: String,
    guard: TopicGuard,
    reasoner: Arc<dyn Reasoner>,
    history: Arc<HistoryStore>,
    turn_lock: Mutex<()>,
}

impl DocsAgent {
    pub fn new(
        user: impl Into<String>,
        guard: TopicGuard,
        reasoner: Arc<dyn Reasoner>,
        history: Arc<HistoryStore>,
    ) -> Self {
        Self {
            user: user.into(),
            guard,
            reasoner,
            history,
            turn_lock: Mutex::new(()),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Answer `question`. Never fails: refusals and errors are answers too.
    ///
    /// With `clear_history`, the user's record is reset before answering so it
    /// ends up holding only this turn.
    pub async fn query(&self, question: &str, clear_history: bool) -> String {
        let _turn = self.turn_lock.lock().await;

        if clear_history {
            if let Err(error) = self.history.clear(&self.user).await {
                tracing::warn!(%error, user = %self.user, "failed to clear history");
            }
        }

        let mut state = AgentState::Start;
        let answer = loop {
            tracing::trace!(?state, user = %self.user, "agent state");
            state = match state {
                AgentState::Start => AgentState::TopicPrecheck,
                AgentState::TopicPrecheck => match self.guard.precheck(question) {
                    Some(refusal) => AgentState::Rejected(refusal),
                    None => AgentState::Reasoning,
                },
                AgentState::Reasoning => self.reason(question).await,
                AgentState::ResponseFilter(answer) => {
                    AgentState::Terminal(self.guard.filter_answer(answer))
                }
                AgentState::Rejected(refusal) => {
                    tracing::info!(user = %self.user, "question rejected by topic precheck");
                    AgentState::Terminal(refusal)
                }
                AgentState::Terminal(answer) => break answer,
            };
        };

        if let Err(error) = self
            .history
            .append(&self.user, Turn::new(question, answer.as_str()))
            .await
        {
            tracing::warn!(%error, user = %self.user, "failed to record turn");
        }

        answer
    }

    async fn reason(&self, question: &str) -> AgentState {
        match self.reasoner.reason(question).await {
            Ok(outcome) if outcome.retrievals == 0 => {
                tracing::info!(user = %self.user, "model answered without searching, discarding");
                AgentState::Terminal(guard::NO_DOCUMENTATION.to_string())
            }
            Ok(outcome) => {
                tracing::debug!(
                    user = %self.user,
                    retrievals = outcome.retrievals,
                    stop = ?outcome.stop,
                    "reasoning finished"
                );
                AgentState::ResponseFilter(outcome.answer)
            }
            Err(error) => {
                tracing::warn!(%error, user = %self.user, "reasoning failed");
                AgentState::Terminal(guard::SEARCH_FAILED.to_string())
            }
        }
    }
}
