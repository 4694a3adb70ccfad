use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool schema advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name within an enabled tool set.
    pub name: String,
    /// Human-readable description for tool selection.
    pub description: String,
    /// JSON schema for the tool input. Opaque to the runtime.
    pub input_schema: Value,
}

impl ToolDefinition {
    /// Creates a tool definition.
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Vendor-assigned id, unique within one response.
    pub id: String,
    /// Name of the tool to run.
    pub name: String,
    /// Uninterpreted structured input.
    pub input: Value,
}

impl ToolCall {
    /// Creates a tool call.
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }
}

/// Result handed back to the model for one [`ToolCall`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Id of the call this answers, from the preceding assistant turn.
    pub tool_call_id: String,
    /// Tool output, or the error text when `is_error` is set.
    pub content: String,
    /// Marks a failed execution the model should react to.
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    /// Creates a successful result.
    pub fn success(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Creates an error result.
    pub fn error(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: true,
        }
    }

    /// Wraps a provider outcome into a result keyed by the originating call id.
    pub fn from_execution(tool_call_id: impl Into<String>, outcome: ToolExecutionResult) -> Self {
        if outcome.success {
            Self::success(tool_call_id, outcome.output)
        } else {
            let message = outcome
                .error_message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "tool execution failed".to_string());
            Self::error(tool_call_id, message)
        }
    }
}

/// Outcome of a provider executing one tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    /// Whether the tool completed.
    pub success: bool,
    /// Tool output on success.
    pub output: String,
    /// Failure description when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ToolExecutionResult {
    /// Creates a successful outcome.
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error_message: None,
        }
    }

    /// Creates a failed outcome.
    pub fn failure(error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error_message: Some(error_message.into()),
        }
    }

    /// Creates the routing failure used when no provider owns `name`.
    pub fn not_found(name: &str) -> Self {
        Self::failure(crate::ToolError::NotFound(name.to_string()).to_string())
    }
}

impl From<crate::ToolError> for ToolExecutionResult {
    fn from(err: crate::ToolError) -> Self {
        Self::failure(err.to_string())
    }
}

/// Caller identity passed to every tool execution for authorization.
///
/// Never persisted by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolContext {
    /// Requesting user.
    pub user_id: String,
    /// Guild the request originated in, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,
    /// Channel the request originated in, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    /// Roles resolved for the user by the caller.
    #[serde(default)]
    pub user_roles: Vec<String>,
}

impl ToolContext {
    /// Creates a context for a user with no guild, channel, or roles.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    /// Sets the guild id.
    pub fn with_guild(mut self, guild_id: impl Into<String>) -> Self {
        self.guild_id = Some(guild_id.into());
        self
    }

    /// Sets the channel id.
    pub fn with_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    /// Replaces the role list.
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.user_roles = roles.into_iter().map(Into::into).collect();
        self
    }
}
