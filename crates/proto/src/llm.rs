//! Vendor-agnostic model request/response contract.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::message::Message;
use crate::tool::{ToolCall, ToolDefinition};
use crate::LlmError;

/// Why a model response ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural completion.
    EndTurn,
    /// The model is waiting on tool results.
    ToolUse,
    /// Output was cut at the token limit.
    MaxTokens,
    /// The call failed; see `error_message`.
    Error,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::EndTurn => write!(f, "end_turn"),
            StopReason::ToolUse => write!(f, "tool_use"),
            StopReason::MaxTokens => write!(f, "max_tokens"),
            StopReason::Error => write!(f, "error"),
        }
    }
}

/// Token usage for one call, or accumulated over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Usage {
    /// Prompt-side tokens, including cached prompt tokens.
    #[serde(default)]
    pub input_tokens: u64,
    /// Generated tokens.
    #[serde(default)]
    pub output_tokens: u64,
}

impl Usage {
    /// Creates a usage record.
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Sum of input and output tokens.
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Accumulates another usage record into this one.
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }

    /// Estimated cost in USD given per-million-token prices.
    pub fn cost_usd(&self, input_per_mtok: f64, output_per_mtok: f64) -> f64 {
        (self.input_tokens as f64 * input_per_mtok + self.output_tokens as f64 * output_per_mtok)
            / 1_000_000.0
    }
}

impl Serialize for Usage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Usage", 3)?;
        state.serialize_field("input_tokens", &self.input_tokens)?;
        state.serialize_field("output_tokens", &self.output_tokens)?;
        state.serialize_field("total_tokens", &self.total_tokens())?;
        state.end()
    }
}

/// One model call. Rebuilt from the live conversation on every iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Resolved system prompt.
    pub system_prompt: String,
    /// Ordered conversation so far.
    pub messages: Vec<Message>,
    /// Tool schemas the model may call.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    /// Output token limit.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Ask the vendor to cache the stable prompt prefix.
    #[serde(default)]
    pub enable_prompt_caching: bool,
}

/// Normalized model reply.
///
/// `tool_calls` is non-empty exactly when `stop_reason` is
/// [`StopReason::ToolUse`]; the constructors keep that true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Whether the call produced a usable reply.
    pub success: bool,
    /// Assistant text, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Why the reply ended.
    pub stop_reason: StopReason,
    /// Tool calls requested by the model.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Tokens consumed by this call.
    #[serde(default)]
    pub usage: Usage,
    /// Failure description when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Response {
    /// A completed reply.
    pub fn end_turn(content: impl Into<String>, usage: Usage) -> Self {
        Self {
            success: true,
            content: Some(content.into()),
            stop_reason: StopReason::EndTurn,
            tool_calls: Vec::new(),
            usage,
            error_message: None,
        }
    }

    /// A reply cut short by the output token limit.
    pub fn max_tokens(content: impl Into<String>, usage: Usage) -> Self {
        Self {
            stop_reason: StopReason::MaxTokens,
            ..Self::end_turn(content, usage)
        }
    }

    /// A tool-use request. An empty call list is reported as a failure.
    pub fn tool_use(content: Option<String>, tool_calls: Vec<ToolCall>, usage: Usage) -> Self {
        if tool_calls.is_empty() {
            return Self {
                usage,
                ..Self::error("model requested tool use without any tool calls")
            };
        }
        Self {
            success: true,
            content: content.filter(|c| !c.is_empty()),
            stop_reason: StopReason::ToolUse,
            tool_calls,
            usage,
            error_message: None,
        }
    }

    /// A failed call.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            content: None,
            stop_reason: StopReason::Error,
            tool_calls: Vec::new(),
            usage: Usage::default(),
            error_message: Some(message.into()),
        }
    }

    /// Converts a client-internal failure into the boundary shape.
    pub fn from_llm_error(err: &LlmError) -> Self {
        Self::error(err.to_string())
    }

    /// Assembles a reply from vendor-mapped parts, enforcing that tool calls
    /// appear only with [`StopReason::ToolUse`].
    pub fn from_parts(
        content: String,
        stop_reason: StopReason,
        tool_calls: Vec<ToolCall>,
        usage: Usage,
    ) -> Self {
        match stop_reason {
            StopReason::ToolUse => Self::tool_use(Some(content), tool_calls, usage),
            StopReason::EndTurn => Self::end_turn(content, usage),
            StopReason::MaxTokens => Self::max_tokens(content, usage),
            StopReason::Error => Self {
                usage,
                ..Self::error(if content.is_empty() {
                    "model reported an error".to_string()
                } else {
                    content
                })
            },
        }
    }

    /// Returns the text content, or an empty string.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_total_is_sum_of_parts() {
        let usage = Usage::new(120, 30);
        assert_eq!(usage.total_tokens(), 150);
        assert_eq!(Usage::default().total_tokens(), 0);
    }

    #[test]
    fn usage_add_accumulates_values() {
        let mut total = Usage::new(10, 20);
        total.add(&Usage::new(5, 15));
        assert_eq!(total, Usage::new(15, 35));
        assert_eq!(total.total_tokens(), 50);
    }

    #[test]
    fn usage_cost_calculation() {
        let usage = Usage::new(1_000_000, 500_000);
        let cost = usage.cost_usd(3.0, 15.0);
        assert!((cost - 10.5).abs() < 0.001);
    }

    #[test]
    fn usage_serializes_computed_total() {
        let json = serde_json::to_value(Usage::new(7, 3)).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({"input_tokens":7,"output_tokens":3,"total_tokens":10})
        );
    }

    #[test]
    fn tool_use_without_calls_becomes_error() {
        let resp = Response::tool_use(None, Vec::new(), Usage::new(4, 1));
        assert!(!resp.success);
        assert_eq!(resp.stop_reason, StopReason::Error);
        assert!(resp.tool_calls.is_empty());
        assert_eq!(resp.usage, Usage::new(4, 1));
    }

    #[test]
    fn from_parts_drops_calls_unless_tool_use() {
        let call = ToolCall::new("tc1", "ping", serde_json::json!({}));

        let end = Response::from_parts("done".into(), StopReason::EndTurn, vec![call.clone()], Usage::default());
        assert_eq!(end.stop_reason, StopReason::EndTurn);
        assert!(end.tool_calls.is_empty());

        let tool = Response::from_parts(String::new(), StopReason::ToolUse, vec![call], Usage::default());
        assert_eq!(tool.stop_reason, StopReason::ToolUse);
        assert_eq!(tool.tool_calls.len(), 1);
        assert_eq!(tool.content, None);
    }

    #[test]
    fn every_constructor_keeps_tool_call_invariant() {
        let call = ToolCall::new("tc1", "ping", serde_json::json!({}));
        let responses = [
            Response::end_turn("a", Usage::default()),
            Response::max_tokens("b", Usage::default()),
            Response::tool_use(Some("c".into()), vec![call], Usage::default()),
            Response::tool_use(None, Vec::new(), Usage::default()),
            Response::error("boom"),
            Response::from_llm_error(&LlmError::RateLimit),
        ];
        for resp in responses {
            assert_eq!(
                !resp.tool_calls.is_empty(),
                resp.stop_reason == StopReason::ToolUse,
                "invariant broken for {resp:?}"
            );
        }
    }

    #[test]
    fn max_tokens_is_successful_but_distinct() {
        let resp = Response::max_tokens("partial", Usage::default());
        assert!(resp.success);
        assert_eq!(resp.stop_reason, StopReason::MaxTokens);
        assert_eq!(resp.text(), "partial");
    }

    #[test]
    fn from_llm_error_carries_message() {
        let resp = Response::from_llm_error(&LlmError::Auth("invalid x-api-key".into()));
        assert!(!resp.success);
        assert_eq!(resp.stop_reason, StopReason::Error);
        assert!(resp.error_message.as_deref().is_some_and(|m| m.contains("invalid x-api-key")));
    }
}
