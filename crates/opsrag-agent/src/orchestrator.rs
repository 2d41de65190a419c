//! Bounded agentic loop for one user turn.
//!
//! ```text
//! RetrieveContext -> FormatPrompt -> CallLlm -> ParseToolRequest
//!                        ^                          |
//!                        +------- ExecuteTool <-----+
//!                                                   v
//!                                   Finalize -> ApplyFallback
//! ```
//!
//! At most `max_tool_calls` tools run per turn. Retrieval and tool failures
//! are absorbed; an LLM failure ends the turn with an apology and leaves
//! the session untouched.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use opsrag_core::config::{AgentSettings, LlmSettings};
use opsrag_core::error::Error;
use opsrag_core::traits::ContextRetriever;
use opsrag_core::types::{ConversationTurn, RetrievedChunk, ToolRequest};

use crate::directive::{parse_directive, strip_directive};
use crate::fallback;
use crate::llm::{GenerationParams, LlmClient, LlmError};
use crate::prompt::{format_context, format_prompt, PromptParts};
use crate::tools::{ToolExchange, ToolRegistry};

pub const APOLOGY: &str =
    "Sorry, I could not generate a response right now because the language model is unavailable. Please try again.";
pub const CANCELLED: &str = "The request was cancelled.";
const BUDGET_SPENT: &str = "I reached the tool call limit before finishing the analysis.";

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_tool_calls: usize,
    pub context_chunks: usize,
    pub rerank: bool,
    pub llm_timeout: Duration,
    pub generation: GenerationParams,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::from_settings(&AgentSettings::default(), &LlmSettings::default())
    }
}

impl AgentConfig {
    pub fn from_settings(agent: &AgentSettings, llm: &LlmSettings) -> Self {
        Self {
            max_tool_calls: agent.max_tool_calls,
            context_chunks: agent.context_chunks,
            rerank: agent.rerank,
            llm_timeout: Duration::from_secs(agent.llm_timeout_secs),
            generation: GenerationParams::from(llm),
        }
    }
}

/// Dispatches left in this turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolCallBudget {
    used: usize,
    max: usize,
}

impl ToolCallBudget {
    pub fn new(max: usize) -> Self {
        Self { used: 0, max }
    }

    /// Spends one call; false when none are left.
    pub fn try_consume(&mut self) -> bool {
        if self.is_exhausted() {
            return false;
        }
        self.used += 1;
        true
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn remaining(&self) -> usize {
        self.max - self.used
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.max
    }
}

/// Why a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    NoToolRequest,
    ToolBudgetExhausted,
    LlmError,
    Cancelled,
    /// No LLM is configured; the answer lists retrieved context.
    RetrievalOnly,
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub answer: String,
    pub termination: Termination,
    pub exchanges: Vec<ToolExchange>,
    pub context: Vec<RetrievedChunk>,
    pub fallback_applied: bool,
    pub llm_calls: usize,
}

#[derive(Debug, Default, Clone)]
pub struct Session {
    history: Vec<ConversationTurn>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}

enum TurnState {
    RetrieveContext,
    FormatPrompt,
    CallLlm(String),
    ParseToolRequest(String),
    ExecuteTool(ToolRequest),
    Finalize { answer: String, termination: Termination },
    ApplyFallback { answer: String, termination: Termination },
}

pub struct Orchestrator {
    retriever: Arc<dyn ContextRetriever>,
    llm: Option<Arc<dyn LlmClient>>,
    tools: Arc<ToolRegistry>,
    config: AgentConfig,
}

impl Orchestrator {
    pub fn new(
        retriever: Arc<dyn ContextRetriever>,
        llm: Option<Arc<dyn LlmClient>>,
        tools: Arc<ToolRegistry>,
        config: AgentConfig,
    ) -> Self {
        Self { retriever, llm, tools, config }
    }

    pub fn has_llm(&self) -> bool {
        self.llm.is_some()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub async fn run_turn(&self, session: &mut Session, query: &str) -> TurnOutcome {
        self.run_turn_cancellable(session, query, &CancellationToken::new()).await
    }

    /// Runs one turn. Cancelling `cancel` aborts an in-flight LLM call or
    /// tool dispatch; the session is then left as it was.
    #[instrument(skip_all, fields(query_len = query.len()))]
    pub async fn run_turn_cancellable(
        &self,
        session: &mut Session,
        query: &str,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        let catalog = self.tools.describe();
        let mut context = Vec::new();
        let mut exchanges: Vec<ToolExchange> = Vec::new();
        let mut budget = ToolCallBudget::new(self.config.max_tool_calls);
        let mut llm_calls = 0usize;
        let mut state = TurnState::RetrieveContext;

        let (answer, termination) = loop {
            state = match state {
                TurnState::RetrieveContext => {
                    context = self.retrieve(query).await;
                    TurnState::FormatPrompt
                }
                TurnState::FormatPrompt => TurnState::CallLlm(format_prompt(&PromptParts {
                    tool_catalog: &catalog,
                    context: &context,
                    history: &session.history,
                    query,
                    exchanges: &exchanges,
                    tool_calls_left: budget.remaining(),
                })),
                TurnState::CallLlm(prompt) => {
                    let Some(llm) = &self.llm else {
                        break (retrieval_only_answer(query, &context), Termination::RetrievalOnly);
                    };
                    llm_calls += 1;
                    match self.call_llm(&**llm, &prompt, cancel).await {
                        None => {
                            info!("turn cancelled during LLM call");
                            break (CANCELLED.to_string(), Termination::Cancelled);
                        }
                        Some(Ok(output)) => TurnState::ParseToolRequest(output),
                        Some(Err(e)) => {
                            let err = Error::Llm(e.to_string());
                            error!(error = %err, "LLM call failed; ending turn");
                            TurnState::Finalize { answer: APOLOGY.to_string(), termination: Termination::LlmError }
                        }
                    }
                }
                TurnState::ParseToolRequest(output) => match parse_directive(&output) {
                    None => TurnState::Finalize { answer: output, termination: Termination::NoToolRequest },
                    Some(_) if budget.is_exhausted() => {
                        info!(max = self.config.max_tool_calls, "tool call budget exhausted; finalizing");
                        let text = strip_directive(&output);
                        let answer = if text.is_empty() { BUDGET_SPENT.to_string() } else { text.to_string() };
                        TurnState::Finalize { answer, termination: Termination::ToolBudgetExhausted }
                    }
                    Some(directive) => {
                        debug!(tool = %directive.request.tool, stage = ?directive.stage, "tool requested");
                        TurnState::ExecuteTool(directive.request)
                    }
                },
                TurnState::ExecuteTool(request) => {
                    budget.try_consume();
                    // Losing the race drops the dispatch future, which aborts the tool task.
                    let result = tokio::select! {
                        biased;
                        () = cancel.cancelled() => {
                            info!("turn cancelled during tool dispatch");
                            break (CANCELLED.to_string(), Termination::Cancelled);
                        }
                        r = self.tools.dispatch(&request) => r,
                    };
                    exchanges.push(ToolExchange { request, result });
                    TurnState::FormatPrompt
                }
                TurnState::Finalize { answer, termination } => TurnState::ApplyFallback { answer, termination },
                TurnState::ApplyFallback { answer, termination } => break (answer, termination),
            };
        };

        if termination == Termination::Cancelled {
            return TurnOutcome { answer, termination, exchanges, context, fallback_applied: false, llm_calls };
        }

        let fallback_applied = fallback::needs_fallback(&answer, &exchanges);
        let answer = fallback::compose(&answer, &exchanges);

        if termination != Termination::LlmError {
            session.history.push(ConversationTurn::user(query));
            session.history.push(ConversationTurn::assistant(answer.clone()));
        }

        info!(?termination, tool_calls = budget.used(), llm_calls, fallback_applied, "turn finished");
        TurnOutcome { answer, termination, exchanges, context, fallback_applied, llm_calls }
    }

    async fn retrieve(&self, query: &str) -> Vec<RetrievedChunk> {
        match self.retriever.retrieve(query, self.config.context_chunks, self.config.rerank).await {
            Ok(chunks) => chunks,
            Err(e) => {
                let err = Error::Retrieval { leg: "context", reason: format!("{e:#}") };
                warn!(error = %err, "context retrieval failed; continuing without context");
                Vec::new()
            }
        }
    }

    /// `None` when cancelled.
    async fn call_llm(
        &self,
        llm: &dyn LlmClient,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Option<Result<String, LlmError>> {
        let timeout = self.config.llm_timeout;
        let call = tokio::time::timeout(timeout, llm.generate(prompt, &self.config.generation));
        tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            r = call => Some(r.unwrap_or(Err(LlmError::Timeout(timeout)))),
        }
    }
}

fn retrieval_only_answer(query: &str, context: &[RetrievedChunk]) -> String {
    format!(
        "I found the following information that might help with your query about '{query}':\n\n{}\n\n\
Running in retrieval-only mode: no language model is configured, so no further analysis is available.",
        format_context(context)
    )
}
