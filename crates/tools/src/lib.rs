//! Tool provider contract and built-in providers.
//!
//! The agent runtime routes model-issued tool calls to [`ToolProvider`]s.
//! A provider groups related tools, advertises their schemas, and executes
//! them after checking the caller's [`ToolContext`].

pub mod input;
pub mod permission;
pub mod utility;

pub use input::parse_input;
pub use permission::Permissions;
pub use utility::UtilityProvider;

use async_trait::async_trait;
use proto::{ToolContext, ToolDefinition, ToolExecutionResult};

/// Trait that all tool providers must implement
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Unique provider name used for enable/disable.
    fn name(&self) -> &str;
    /// Human-readable description of the tool group.
    fn description(&self) -> &str;
    /// Schemas of every tool this provider exposes.
    fn tools(&self) -> Vec<ToolDefinition>;
    /// Executes `name` with opaque `input` on behalf of `context`.
    ///
    /// Unknown names, bad input, and permission failures are returned as
    /// failed results, never as panics.
    async fn execute_tool(
        &self,
        name: &str,
        input: serde_json::Value,
        context: &ToolContext,
    ) -> ToolExecutionResult;

    /// Returns `true` when this provider exposes a tool called `name`.
    fn has_tool(&self, name: &str) -> bool {
        self.tools().iter().any(|t| t.name == name)
    }
}
