use thiserror::Error;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration loading/validation error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// LLM client error.
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Tool registration/execution error.
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Prompt template loading/substitution error.
    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field was not provided.
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// A field has an invalid value and reason.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Filesystem read error.
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error.
    #[error("TOML parse error: {0}")]
    Toml(String),
}

/// LLM client errors.
///
/// These never cross the `LlmClient` boundary as errors; clients convert
/// them into a failed [`Response`](crate::Response).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LlmError {
    /// Remote API rejected the request.
    #[error("{0}")]
    Api(String),

    /// Credentials missing or rejected.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Provider throttled the request.
    #[error("Rate limit exceeded")]
    RateLimit,

    /// Provider-side 5xx or overload.
    #[error("Server error: {0}")]
    Server(String),

    /// Connection-level failure.
    #[error("Network error: {0}")]
    Network(String),

    /// Call exceeded its per-request timeout.
    #[error("Request timed out after {0}s")]
    Timeout(u64),

    /// Caller cancelled the run while the call was in flight.
    #[error("Request cancelled")]
    Cancelled,

    /// Provider response schema/content was invalid.
    #[error("Invalid response from LLM: {0}")]
    InvalidResponse(String),

    /// Serialization/deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl LlmError {
    /// Returns `true` for failures worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimit | LlmError::Server(_) | LlmError::Network(_) | LlmError::Timeout(_)
        )
    }
}

/// Tool registration/execution errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    /// Requested tool is unknown.
    #[error("Tool not found: {0}")]
    NotFound(String),

    /// Requested provider is not registered.
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    /// A provider with the same name is already registered.
    #[error("Provider already registered: {0}")]
    DuplicateProvider(String),

    /// Caller lacks the role/scope needed by the tool.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Tool call arguments are invalid.
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    /// Tool operation failed.
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

/// Prompt template errors
#[derive(Debug, Error)]
pub enum PromptError {
    /// No template stored under the requested path.
    #[error("Prompt template not found: {0}")]
    NotFound(String),

    /// Path escapes the store root or is otherwise unusable.
    #[error("Invalid prompt path: {0}")]
    InvalidPath(String),

    /// Filesystem read error.
    #[error("IO error reading prompt: {0}")]
    Io(#[from] std::io::Error),

    /// Strict substitution found placeholders with no value.
    #[error("Unresolved placeholders: {}", .0.join(", "))]
    Unresolved(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_config_error_variant() {
        let err = ConfigError::MissingField("agent.model".to_string());
        assert!(err.to_string().contains("Missing required field"));
    }

    #[test]
    fn wraps_llm_error_into_top_level_error() {
        let err: Error = LlmError::RateLimit.into();
        assert!(err.to_string().contains("LLM error"));
        assert!(err.to_string().contains("Rate limit exceeded"));
    }

    #[test]
    fn wraps_tool_and_prompt_errors() {
        let tool_err: Error = ToolError::InvalidArgs("missing user_id".to_string()).into();
        assert!(tool_err.to_string().contains("Tool error"));

        let prompt_err: Error =
            PromptError::Unresolved(vec!["user".to_string(), "guild".to_string()]).into();
        assert!(prompt_err.to_string().contains("user, guild"));
    }

    #[test]
    fn transient_classification_covers_retryable_failures() {
        assert!(LlmError::RateLimit.is_transient());
        assert!(LlmError::Server("503".to_string()).is_transient());
        assert!(LlmError::Network("reset".to_string()).is_transient());
        assert!(LlmError::Timeout(30).is_transient());

        assert!(!LlmError::Auth("bad key".to_string()).is_transient());
        assert!(!LlmError::Api("400".to_string()).is_transient());
        assert!(!LlmError::Cancelled.is_transient());
        assert!(!LlmError::InvalidResponse("{".to_string()).is_transient());
    }
}
