//! Tool-use loop: call the model, run requested tools, feed results back.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use proto::{
    AgentRunResult, Message, Request, Response, RunOutcome, StopReason, ToolCall, ToolContext,
    ToolResult, Usage,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::llm::LlmClient;
use crate::prompt::PromptTemplate;
use crate::tool_registry::ToolRegistry;

pub const DEFAULT_MAX_ITERATIONS: usize = 10;
pub const DEFAULT_MAX_PARALLEL_TOOLS: usize = 4;
pub const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_TEMPERATURE: f32 = 0.2;

/// Loop limits shared by every run of one [`AgentRunner`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    /// Maximum number of tool-use rounds before the run is abandoned.
    pub max_iterations: usize,
    /// Wall-clock budget for a whole run; `None` disables it.
    pub run_timeout: Option<Duration>,
    /// Upper bound on tool calls executing at once.
    pub max_parallel_tools: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            run_timeout: Some(Duration::from_secs(120)),
            max_parallel_tools: DEFAULT_MAX_PARALLEL_TOOLS,
        }
    }
}

/// Where a run's system prompt comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum SystemPrompt {
    /// Used as-is.
    Inline(String),
    /// Rendered from the runner's [`PromptTemplate`] at the start of the run.
    Template {
        path: String,
        placeholders: HashMap<String, String>,
    },
}

impl From<&str> for SystemPrompt {
    fn from(text: &str) -> Self {
        Self::Inline(text.to_string())
    }
}

impl From<String> for SystemPrompt {
    fn from(text: String) -> Self {
        Self::Inline(text)
    }
}

/// Per-run inputs.
#[derive(Clone)]
pub struct AgentContext {
    pub system_prompt: SystemPrompt,
    pub tool_registry: Arc<ToolRegistry>,
    pub tool_context: ToolContext,
    pub max_tokens: u32,
    pub temperature: f32,
    pub enable_prompt_caching: bool,
    /// Earlier turns placed before the new user message.
    pub history: Vec<Message>,
}

impl AgentContext {
    pub fn new(
        system_prompt: impl Into<SystemPrompt>,
        tool_registry: Arc<ToolRegistry>,
        tool_context: ToolContext,
    ) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            tool_registry,
            tool_context,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            enable_prompt_caching: false,
            history: Vec::new(),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_prompt_caching(mut self, enabled: bool) -> Self {
        self.enable_prompt_caching = enabled;
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }
}

/// How the inner loop stopped.
enum RunEnd {
    Finished(RunOutcome, String),
    Failed(RunOutcome, String),
}

impl RunEnd {
    fn cancelled() -> Self {
        Self::Failed(RunOutcome::Cancelled, "run cancelled".to_string())
    }
}

/// Mutable state that must survive a timeout of the inner loop.
struct RunState {
    conversation: Vec<Message>,
    loop_count: usize,
    total_usage: Usage,
}

impl RunState {
    /// Answers a trailing tool-call turn with error results so the
    /// conversation stays replayable after an interrupted tool phase.
    fn close_pending_calls(&mut self, reason: &str) {
        let Some(last) = self.conversation.last() else {
            return;
        };
        if !last.has_tool_calls() {
            return;
        }
        let results = last
            .tool_calls
            .iter()
            .flatten()
            .map(|c| ToolResult::error(&c.id, reason))
            .collect();
        self.conversation.push(Message::tool_results(results));
    }

    fn finish(self, end: RunEnd) -> AgentRunResult {
        match end {
            RunEnd::Finished(outcome, response) => AgentRunResult::finished(
                outcome,
                response,
                self.loop_count,
                self.total_usage,
                self.conversation,
            ),
            RunEnd::Failed(outcome, message) => AgentRunResult::failed(
                outcome,
                message,
                self.loop_count,
                self.total_usage,
                self.conversation,
            ),
        }
    }
}

/// Drives the tool-use loop against one LLM client.
pub struct AgentRunner {
    llm: Arc<dyn LlmClient>,
    prompts: Option<PromptTemplate>,
    config: RunnerConfig,
}

impl AgentRunner {
    pub fn new(llm: Arc<dyn LlmClient>, config: RunnerConfig) -> Self {
        Self {
            llm,
            prompts: None,
            config,
        }
    }

    /// Enables [`SystemPrompt::Template`] resolution.
    pub fn with_prompts(mut self, prompts: PromptTemplate) -> Self {
        self.prompts = Some(prompts);
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Runs one user turn to completion.
    ///
    /// Never returns an error: every failure is reported through
    /// [`AgentRunResult::outcome`] with the usage and conversation
    /// accumulated up to that point.
    pub async fn run(
        &self,
        user_message: &str,
        ctx: &AgentContext,
        cancel: CancellationToken,
    ) -> AgentRunResult {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "agent_run",
            %run_id,
            user_id = %ctx.tool_context.user_id,
            provider = %self.llm.provider_name()
        );
        self.run_inner(user_message, ctx, cancel)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        user_message: &str,
        ctx: &AgentContext,
        cancel: CancellationToken,
    ) -> AgentRunResult {
        let started = Instant::now();
        let mut conversation = ctx.history.clone();
        conversation.push(Message::user(user_message));
        let mut state = RunState {
            conversation,
            loop_count: 0,
            total_usage: Usage::default(),
        };

        let system_prompt = match self.resolve_system_prompt(&ctx.system_prompt).await {
            Ok(prompt) => prompt,
            Err(message) => {
                warn!(error = %message, "System prompt unavailable");
                return state.finish(RunEnd::Failed(RunOutcome::PromptFailed, message));
            }
        };

        let drive = self.drive(&mut state, &system_prompt, ctx, &cancel);
        let driven = match self.config.run_timeout {
            Some(budget) => tokio::time::timeout(budget, drive)
                .await
                .map_err(|_| budget),
            None => Ok(drive.await),
        };
        let end = match driven {
            Ok(end) => end,
            Err(budget) => {
                warn!(budget_secs = budget.as_secs_f64(), "Run timed out");
                state.close_pending_calls("timed out before completion");
                RunEnd::Failed(
                    RunOutcome::TimedOut,
                    format!("run exceeded its {:.1}s budget", budget.as_secs_f64()),
                )
            }
        };

        let result = state.finish(end);
        info!(
            outcome = ?result.outcome,
            loop_count = result.loop_count,
            input_tokens = result.total_usage.input_tokens,
            output_tokens = result.total_usage.output_tokens,
            elapsed_ms = %started.elapsed().as_millis(),
            "Agent run finished"
        );
        result
    }

    async fn resolve_system_prompt(&self, source: &SystemPrompt) -> Result<String, String> {
        match source {
            SystemPrompt::Inline(text) => Ok(text.clone()),
            SystemPrompt::Template { path, placeholders } => {
                let prompts = self
                    .prompts
                    .as_ref()
                    .ok_or_else(|| format!("no prompt store configured for template '{path}'"))?;
                prompts
                    .render(path, placeholders)
                    .await
                    .map_err(|e| format!("failed to render system prompt '{path}': {e}"))
            }
        }
    }

    async fn drive(
        &self,
        state: &mut RunState,
        system_prompt: &str,
        ctx: &AgentContext,
        cancel: &CancellationToken,
    ) -> RunEnd {
        loop {
            if cancel.is_cancelled() {
                return RunEnd::cancelled();
            }

            let tools = if self.llm.supports_tool_use() {
                ctx.tool_registry.enabled_tools()
            } else {
                Vec::new()
            };
            let request = Request {
                system_prompt: system_prompt.to_string(),
                messages: state.conversation.clone(),
                tools,
                max_tokens: ctx.max_tokens,
                temperature: ctx.temperature,
                enable_prompt_caching: ctx.enable_prompt_caching
                    && self.llm.supports_prompt_caching(),
            };

            let round = state.loop_count;
            debug!(
                round = %round,
                messages = %request.messages.len(),
                tools = %request.tools.len(),
                "LLM call"
            );
            let t0 = Instant::now();
            let response: Response = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    state.close_pending_calls("cancelled before completion");
                    return RunEnd::cancelled();
                }
                response = self.llm.complete(&request, cancel) => response,
            };
            debug!(
                elapsed_ms = %t0.elapsed().as_millis(),
                round = %round,
                stop_reason = %response.stop_reason,
                "LLM response received"
            );
            state.total_usage.add(&response.usage);

            if !response.success {
                let message = response
                    .error_message
                    .unwrap_or_else(|| "LLM call failed".to_string());
                warn!(error = %message, round = %round, "LLM call failed");
                return RunEnd::Failed(RunOutcome::LlmFailed, message);
            }

            match response.stop_reason {
                StopReason::EndTurn => {
                    let text = response.content.unwrap_or_default();
                    state.conversation.push(Message::assistant(text.clone()));
                    return RunEnd::Finished(RunOutcome::Completed, text);
                }
                StopReason::MaxTokens => {
                    let text = response.content.unwrap_or_default();
                    warn!(round = %round, "Response truncated at max_tokens");
                    state.conversation.push(Message::assistant(text.clone()));
                    return RunEnd::Finished(RunOutcome::Truncated, text);
                }
                StopReason::Error => {
                    let message = response
                        .error_message
                        .unwrap_or_else(|| "model reported an error".to_string());
                    return RunEnd::Failed(RunOutcome::LlmFailed, message);
                }
                StopReason::ToolUse => {
                    if state.loop_count >= self.config.max_iterations {
                        warn!(
                            max_iterations = self.config.max_iterations,
                            "Tool-use iteration limit reached"
                        );
                        return RunEnd::Failed(
                            RunOutcome::IterationLimit,
                            format!(
                                "tool-use iteration limit ({}) reached",
                                self.config.max_iterations
                            ),
                        );
                    }

                    let calls = response.tool_calls;
                    info!(
                        round = %round,
                        tools = ?calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                        "Executing tool calls"
                    );
                    state.conversation.push(Message::assistant_tool_calls(
                        response.content.unwrap_or_default(),
                        calls.clone(),
                    ));

                    let results = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            state.close_pending_calls("cancelled before completion");
                            return RunEnd::cancelled();
                        }
                        results = self.execute_tools(&calls, ctx) => results,
                    };
                    state.conversation.push(Message::tool_results(results));
                    state.loop_count += 1;
                }
            }
        }
    }

    /// Runs `calls` concurrently, at most `max_parallel_tools` at a time.
    ///
    /// Results come back in call order regardless of completion order. A
    /// panicking tool yields an error result for its call only. Dropping
    /// the returned future aborts every outstanding tool task.
    async fn execute_tools(&self, calls: &[ToolCall], ctx: &AgentContext) -> Vec<ToolResult> {
        let limit = Arc::new(Semaphore::new(self.config.max_parallel_tools.max(1)));
        let mut join_set = JoinSet::new();

        for (index, call) in calls.iter().cloned().enumerate() {
            let registry = Arc::clone(&ctx.tool_registry);
            let tool_context = ctx.tool_context.clone();
            let limit = Arc::clone(&limit);
            join_set.spawn(
                async move {
                    let _permit = limit.acquire_owned().await.ok();
                    let t0 = Instant::now();
                    let outcome = registry
                        .execute_tool(&call.name, call.input, &tool_context)
                        .await;
                    debug!(
                        tool = %call.name,
                        call_id = %call.id,
                        success = outcome.success,
                        elapsed_ms = %t0.elapsed().as_millis(),
                        "Tool finished"
                    );
                    (index, ToolResult::from_execution(call.id, outcome))
                }
                .in_current_span(),
            );
        }

        let mut slots: Vec<Option<ToolResult>> = vec![None; calls.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => error!(error = %e, "Tool task failed"),
            }
        }

        calls
            .iter()
            .zip(slots)
            .map(|(call, slot)| {
                slot.unwrap_or_else(|| {
                    ToolResult::error(&call.id, format!("tool '{}' panicked", call.name))
                })
            })
            .collect()
    }
}
