//! Result of one agent run.

use serde::{Deserialize, Serialize};

use crate::llm::Usage;
use crate::message::Message;

/// How a run terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// The model finished its turn.
    Completed,
    /// The model hit its output token limit; the response is partial.
    Truncated,
    /// The LLM client reported a failure.
    LlmFailed,
    /// The model kept requesting tools past the iteration cap.
    IterationLimit,
    /// The caller cancelled the run.
    Cancelled,
    /// The run exceeded its wall-clock budget.
    TimedOut,
    /// The system prompt could not be loaded or resolved.
    PromptFailed,
}

impl RunOutcome {
    /// `Completed` and `Truncated` are successful outcomes.
    pub fn is_success(self) -> bool {
        matches!(self, RunOutcome::Completed | RunOutcome::Truncated)
    }
}

/// Aggregated result returned to the caller of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRunResult {
    /// Whether the run produced a final answer.
    pub success: bool,
    /// Final assistant text (empty on failure).
    pub response: String,
    /// Number of tool-use iterations performed.
    pub loop_count: usize,
    /// Usage summed over every model call in the run.
    pub total_usage: Usage,
    /// Human-readable failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Set when the final answer was cut at the token limit.
    #[serde(default)]
    pub truncated: bool,
    /// Termination detail.
    pub outcome: RunOutcome,
    /// Full conversation after the run, for caller-side persistence.
    #[serde(default)]
    pub conversation: Vec<Message>,
}

impl AgentRunResult {
    /// A successful run ending on `outcome` (`Completed` or `Truncated`).
    pub fn finished(
        outcome: RunOutcome,
        response: impl Into<String>,
        loop_count: usize,
        total_usage: Usage,
        conversation: Vec<Message>,
    ) -> Self {
        Self {
            success: outcome.is_success(),
            response: response.into(),
            loop_count,
            total_usage,
            error_message: None,
            truncated: outcome == RunOutcome::Truncated,
            outcome,
            conversation,
        }
    }

    /// A failed run.
    pub fn failed(
        outcome: RunOutcome,
        error_message: impl Into<String>,
        loop_count: usize,
        total_usage: Usage,
        conversation: Vec<Message>,
    ) -> Self {
        Self {
            success: false,
            response: String::new(),
            loop_count,
            total_usage,
            error_message: Some(error_message.into()),
            truncated: false,
            outcome,
            conversation,
        }
    }
}
