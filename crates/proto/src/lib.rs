//! Shared wire types for the agent runtime, LLM clients, and tool providers.
//!
//! This crate defines the vendor-agnostic request/response/tool-call shapes
//! and the strongly-typed error enums shared across the workspace. Every
//! backend mapping and every tool provider speaks these types and nothing
//! else.

pub mod error;
pub mod llm;
pub mod message;
pub mod run;
pub mod tool;

/// Re-export of all protocol error types.
pub use error::*;
/// Re-export of model request/response types.
pub use llm::{Request, Response, StopReason, Usage};
/// Re-export of conversation message types.
pub use message::{Message, Role};
/// Re-export of agent run outcome types.
pub use run::{AgentRunResult, RunOutcome};
/// Re-export of tool definition, call, and result types.
pub use tool::{ToolCall, ToolContext, ToolDefinition, ToolExecutionResult, ToolResult};

/// Returns `true` when the key looks like an Anthropic OAuth access token
/// (`sk-ant-oat*`) rather than a permanent API key (`sk-ant-api*`).
///
/// When this returns `true`, callers should use `Authorization: Bearer`
/// instead of `x-api-key` for Anthropic API requests.
pub fn is_anthropic_oauth_token(key: &str) -> bool {
    key.starts_with("sk-ant-oat")
}
