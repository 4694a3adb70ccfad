//! Agent runtime, tool registry, prompt templates, and LLM clients.

pub mod anthropic;
pub mod llm;
pub mod prompt;
pub mod retry;
pub mod runtime;
pub mod tool_registry;

/// Anthropic Messages API client.
pub use anthropic::AnthropicClient;
/// LLM client interface and the OpenAI Chat Completions client.
pub use llm::{LlmClient, OpenAiClient};
/// Prompt template loading and placeholder substitution.
pub use prompt::{
    FilePromptStore, InMemoryPromptStore, PlaceholderPolicy, PromptStore, PromptTemplate,
};
/// Retry policy shared by the LLM clients.
pub use retry::RetryPolicy;
/// Tool-use loop orchestration.
pub use runtime::{AgentContext, AgentRunner, RunnerConfig, SystemPrompt};
/// Runtime tool registry.
pub use tool_registry::{ProviderInfo, ToolRegistry};

#[cfg(test)]
pub(crate) mod test_support;
