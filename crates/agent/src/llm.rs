//! LLM client abstraction and OpenAI-compatible implementation.

use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionTool, ChatCompletionToolType, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse, FinishReason, FunctionCall,
        FunctionObjectArgs,
    },
};
use async_trait::async_trait;
use proto::{LlmError, Message, Request, Response, Role, StopReason, ToolCall, ToolDefinition, Usage};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::retry::{RetryPolicy, with_retry};

/// Default OpenAI model.
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

/// Vendor-neutral LLM client.
///
/// `complete` never returns an error: transport and vendor failures come
/// back as a [`Response`] with `success == false` and
/// [`StopReason::Error`].
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Short vendor name used in logs.
    fn provider_name(&self) -> &str;
    /// Whether tool schemas may be sent with requests.
    fn supports_tool_use(&self) -> bool;
    /// Whether [`Request::enable_prompt_caching`] has any effect.
    fn supports_prompt_caching(&self) -> bool;
    /// Sends one request. Cancelling `cancel` ends in-flight work and any
    /// backoff early.
    async fn complete(&self, request: &Request, cancel: &CancellationToken) -> Response;
}

/// OpenAI-compatible Chat Completions client (works with OpenAI, together.ai, etc.)
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    retry: RetryPolicy,
}

impl OpenAiClient {
    /// Creates an OpenAI client using the default API base URL.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        Self {
            client: Client::with_config(config),
            model: model.into(),
            retry: RetryPolicy::default(),
        }
    }

    /// Creates an OpenAI client with a custom API base URL.
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(base_url);
        Self {
            client: Client::with_config(config),
            model: model.into(),
            retry: RetryPolicy::default(),
        }
    }

    /// Replaces the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Model id sent with every request.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, request: &Request) -> Result<CreateChatCompletionRequest, LlmError> {
        let messages = convert_messages(&request.system_prompt, &request.messages)?;
        let tools: Vec<ChatCompletionTool> = request
            .tools
            .iter()
            .map(convert_tool)
            .collect::<Result<_, _>>()?;

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(&self.model)
            .messages(messages)
            .max_completion_tokens(request.max_tokens)
            .temperature(request.temperature);
        if !tools.is_empty() {
            builder.tools(tools);
        }
        builder
            .build()
            .map_err(|e| LlmError::Serialization(e.to_string()))
    }

    async fn send_once(&self, request: CreateChatCompletionRequest) -> Result<Response, LlmError> {
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(classify_error)?;
        map_response(response)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn provider_name(&self) -> &str {
        "openai"
    }

    fn supports_tool_use(&self) -> bool {
        true
    }

    fn supports_prompt_caching(&self) -> bool {
        false
    }

    async fn complete(&self, request: &Request, cancel: &CancellationToken) -> Response {
        let body = match self.build_request(request) {
            Ok(body) => body,
            Err(e) => return Response::from_llm_error(&e),
        };

        debug!(
            model = %self.model,
            messages = %request.messages.len(),
            tools = %request.tools.len(),
            "Sending request to OpenAI"
        );

        match with_retry(&self.retry, "openai.chat", cancel, || {
            self.send_once(body.clone())
        })
        .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "OpenAI request failed");
                Response::from_llm_error(&e)
            }
        }
    }
}

/// Converts conversation messages into Chat Completions format.
///
/// The system prompt leads; each tool result becomes its own `tool` message.
fn convert_messages(
    system_prompt: &str,
    messages: &[Message],
) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
    let mut result = Vec::with_capacity(messages.len() + 1);
    if !system_prompt.is_empty() {
        result.push(system_message(system_prompt)?);
    }

    for msg in messages {
        match msg.role {
            Role::System => result.push(system_message(&msg.content)?),
            Role::User => {
                for tr in msg.tool_results.iter().flatten() {
                    let content = if tr.is_error {
                        format!("Error: {}", tr.content)
                    } else {
                        tr.content.clone()
                    };
                    result.push(ChatCompletionRequestMessage::Tool(
                        ChatCompletionRequestToolMessageArgs::default()
                            .tool_call_id(tr.tool_call_id.clone())
                            .content(content)
                            .build()
                            .map_err(|e| LlmError::Serialization(e.to_string()))?,
                    ));
                }
                if !msg.content.is_empty() || msg.tool_results.is_none() {
                    result.push(ChatCompletionRequestMessage::User(
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(msg.content.clone())
                            .build()
                            .map_err(|e| LlmError::Serialization(e.to_string()))?,
                    ));
                }
            }
            Role::Assistant => {
                let mut builder = ChatCompletionRequestAssistantMessageArgs::default();
                if !msg.content.is_empty() || !msg.has_tool_calls() {
                    builder.content(msg.content.clone());
                }
                if let Some(tool_calls) = msg.tool_calls.as_ref().filter(|c| !c.is_empty()) {
                    let calls: Vec<ChatCompletionMessageToolCall> = tool_calls
                        .iter()
                        .map(|tc| ChatCompletionMessageToolCall {
                            id: tc.id.clone(),
                            r#type: ChatCompletionToolType::Function,
                            function: FunctionCall {
                                name: tc.name.clone(),
                                arguments: tc.input.to_string(),
                            },
                        })
                        .collect();
                    builder.tool_calls(calls);
                }
                result.push(ChatCompletionRequestMessage::Assistant(
                    builder
                        .build()
                        .map_err(|e| LlmError::Serialization(e.to_string()))?,
                ));
            }
        }
    }

    Ok(result)
}

fn system_message(content: &str) -> Result<ChatCompletionRequestMessage, LlmError> {
    Ok(ChatCompletionRequestMessage::System(
        ChatCompletionRequestSystemMessageArgs::default()
            .content(content.to_string())
            .build()
            .map_err(|e| LlmError::Serialization(e.to_string()))?,
    ))
}

/// Converts a tool schema into an OpenAI function-tool declaration.
fn convert_tool(t: &ToolDefinition) -> Result<ChatCompletionTool, LlmError> {
    Ok(ChatCompletionTool {
        r#type: ChatCompletionToolType::Function,
        function: FunctionObjectArgs::default()
            .name(t.name.clone())
            .description(t.description.clone())
            .parameters(t.input_schema.clone())
            .build()
            .map_err(|e| LlmError::Serialization(e.to_string()))?,
    })
}

/// Maps a Chat Completions reply onto the vendor-neutral [`Response`].
fn map_response(response: CreateChatCompletionResponse) -> Result<Response, LlmError> {
    let usage = response.usage.as_ref().map_or_else(Usage::default, |u| {
        Usage::new(u.prompt_tokens as u64, u.completion_tokens as u64)
    });
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse("No choices in response".into()))?;

    let tool_calls: Vec<ToolCall> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            let input = parse_tool_arguments(&tc.function.arguments);
            ToolCall::new(tc.id, tc.function.name, input)
        })
        .collect();
    let content = choice.message.content.unwrap_or_default();

    // Some compatible servers report "stop" while still returning calls.
    let stop_reason = match choice.finish_reason {
        Some(FinishReason::Length) => StopReason::MaxTokens,
        Some(FinishReason::ToolCalls) => StopReason::ToolUse,
        Some(FinishReason::ContentFilter) => {
            return Ok(Response {
                usage,
                ..Response::error("response blocked by content filter")
            });
        }
        _ if !tool_calls.is_empty() => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    };

    Ok(Response::from_parts(content, stop_reason, tool_calls, usage))
}

fn classify_error(err: OpenAIError) -> LlmError {
    let msg = err.to_string();
    match err {
        OpenAIError::Reqwest(_) => LlmError::Network(msg),
        OpenAIError::JSONDeserialize(_) => LlmError::InvalidResponse(msg),
        OpenAIError::InvalidArgument(_) => LlmError::Serialization(msg),
        _ => classify_api_message(msg),
    }
}

/// Classifies an API error by its message, which is all the SDK exposes
/// reliably across OpenAI-compatible servers.
fn classify_api_message(msg: String) -> LlmError {
    let lower = msg.to_lowercase();
    if lower.contains("rate limit") || lower.contains("rate_limit") {
        LlmError::RateLimit
    } else if lower.contains("api key") || lower.contains("invalid_api_key") || lower.contains("unauthorized") {
        LlmError::Auth(msg)
    } else if lower.contains("server_error")
        || lower.contains("overloaded")
        || lower.contains("bad gateway")
        || lower.contains("service unavailable")
    {
        LlmError::Server(msg)
    } else {
        LlmError::Api(msg)
    }
}

/// Parses tool call argument JSON with empty-object fallback.
fn parse_tool_arguments(arguments: &str) -> Value {
    serde_json::from_str(arguments).unwrap_or(Value::Object(Default::default()))
}

#[cfg(test)]
mod tests {
    use proto::ToolResult;

    use super::*;

    fn response_json(message: Value, finish_reason: &str) -> CreateChatCompletionResponse {
        serde_json::from_value(serde_json::json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1_700_000_000,
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": message,
                "finish_reason": finish_reason
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 5, "total_tokens": 17}
        }))
        .expect("chat completion json")
    }

    #[test]
    fn convert_messages_puts_system_prompt_first() {
        let converted =
            convert_messages("You are helpful.", &[Message::user("hello")]).expect("conversion");
        assert_eq!(converted.len(), 2);
        assert!(matches!(converted[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(converted[1], ChatCompletionRequestMessage::User(_)));
    }

    #[test]
    fn convert_messages_skips_empty_system_prompt() {
        let converted = convert_messages("", &[Message::user("hi")]).expect("conversion");
        assert_eq!(converted.len(), 1);
    }

    #[test]
    fn assistant_tool_calls_and_results_round_out_a_turn() {
        let call = ToolCall::new("tc1", "get_user_roles", serde_json::json!({"user_id":"42"}));
        let msgs = vec![
            Message::user("roles?"),
            Message::assistant_tool_calls("", vec![call]),
            Message::tool_results(vec![
                ToolResult::success("tc1", "Member"),
                ToolResult::error("tc2", "boom"),
            ]),
        ];
        let converted = convert_messages("", &msgs).expect("conversion");
        assert_eq!(converted.len(), 4);

        let ChatCompletionRequestMessage::Assistant(ref assistant) = converted[1] else {
            panic!("expected assistant message");
        };
        let calls = assistant.tool_calls.as_ref().expect("tool calls");
        assert_eq!(calls[0].id, "tc1");
        assert_eq!(calls[0].function.name, "get_user_roles");
        assert!(assistant.content.is_none());

        let ChatCompletionRequestMessage::Tool(ref ok) = converted[2] else {
            panic!("expected tool message");
        };
        assert_eq!(ok.tool_call_id, "tc1");
        let ChatCompletionRequestMessage::Tool(ref failed) = converted[3] else {
            panic!("expected tool message");
        };
        assert_eq!(failed.tool_call_id, "tc2");
    }

    #[test]
    fn convert_tool_builds_function_tool_schema() {
        let def = ToolDefinition::new(
            "get_user_roles",
            "Look up roles",
            serde_json::json!({"type":"object"}),
        );
        let converted = convert_tool(&def).expect("tool conversion");
        assert_eq!(converted.r#type, ChatCompletionToolType::Function);
        assert_eq!(converted.function.name, "get_user_roles");
        assert_eq!(converted.function.description.as_deref(), Some("Look up roles"));
    }

    #[test]
    fn maps_text_reply_with_usage() {
        let response = map_response(response_json(
            serde_json::json!({"role":"assistant","content":"Hello!"}),
            "stop",
        ))
        .expect("map");
        assert!(response.success);
        assert_eq!(response.stop_reason, StopReason::EndTurn);
        assert_eq!(response.text(), "Hello!");
        assert_eq!(response.usage, Usage::new(12, 5));
    }

    #[test]
    fn maps_tool_call_reply() {
        let response = map_response(response_json(
            serde_json::json!({
                "role":"assistant",
                "content":null,
                "tool_calls":[{
                    "id":"call_1",
                    "type":"function",
                    "function":{"name":"ping","arguments":"{}"}
                }]
            }),
            "tool_calls",
        ))
        .expect("map");
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].id, "call_1");
        assert_eq!(response.tool_calls[0].name, "ping");
    }

    #[test]
    fn maps_length_to_max_tokens() {
        let response = map_response(response_json(
            serde_json::json!({"role":"assistant","content":"partial"}),
            "length",
        ))
        .expect("map");
        assert_eq!(response.stop_reason, StopReason::MaxTokens);
        assert_eq!(response.text(), "partial");
    }

    #[test]
    fn classifies_api_messages() {
        assert_eq!(
            classify_api_message("Rate limit reached for gpt-4o".into()),
            LlmError::RateLimit
        );
        assert!(matches!(
            classify_api_message("Incorrect API key provided".into()),
            LlmError::Auth(_)
        ));
        assert!(matches!(
            classify_api_message("The server is overloaded".into()),
            LlmError::Server(_)
        ));
        assert!(matches!(
            classify_api_message("model does not exist".into()),
            LlmError::Api(_)
        ));
    }

    #[test]
    fn parse_tool_arguments_handles_valid_and_invalid_json() {
        let valid = parse_tool_arguments(r#"{"x":1}"#);
        assert_eq!(valid["x"], 1);

        let invalid = parse_tool_arguments("{invalid");
        assert!(invalid.is_object());
        assert_eq!(invalid.as_object().expect("object").len(), 0);
    }

    #[test]
    fn client_reports_capabilities() {
        let client = OpenAiClient::with_base_url("k", "https://example.com/v1", "gpt-4o-mini");
        assert_eq!(client.provider_name(), "openai");
        assert_eq!(client.model(), "gpt-4o-mini");
        assert!(client.supports_tool_use());
        assert!(!client.supports_prompt_caching());
    }

    #[tokio::test]
    async fn cancelled_call_returns_error_response() {
        let client = OpenAiClient::with_base_url("k", "http://127.0.0.1:9", "gpt-4o");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let response = client
            .complete(
                &Request {
                    system_prompt: String::new(),
                    messages: vec![Message::user("hi")],
                    tools: Vec::new(),
                    max_tokens: 16,
                    temperature: 0.0,
                    enable_prompt_caching: false,
                },
                &cancel,
            )
            .await;
        assert!(!response.success);
        assert_eq!(response.stop_reason, StopReason::Error);
        assert_eq!(response.error_message.as_deref(), Some("Request cancelled"));
    }
}
