//! Anthropic Messages API client implementation.

use async_trait::async_trait;
use proto::{LlmError, Message, Request, Response, Role, StopReason, ToolCall, ToolDefinition, Usage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::llm::LlmClient;
use crate::retry::{RetryPolicy, with_retry};

const ANTHROPIC_API_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
/// Default Anthropic model.
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";

// ── Request types ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<SystemField>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool>,
}

/// Plain string, or a single cacheable text block when caching is on.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum SystemField {
    Text(String),
    Blocks(Vec<SystemBlock>),
}

#[derive(Debug, Serialize)]
struct SystemBlock {
    #[serde(rename = "type")]
    block_type: &'static str,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

#[derive(Debug, Clone, Serialize)]
struct CacheControl {
    #[serde(rename = "type")]
    kind: &'static str,
}

impl CacheControl {
    fn ephemeral() -> Self {
        Self { kind: "ephemeral" }
    }
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: AnthropicContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl AnthropicContent {
    fn from_blocks(mut blocks: Vec<ContentBlock>) -> Self {
        if blocks.len() == 1
            && matches!(blocks[0], ContentBlock::Text { .. })
            && let Some(ContentBlock::Text { text }) = blocks.pop()
        {
            return Self::Text(text);
        }
        Self::Blocks(blocks)
    }

    fn extend(&mut self, more: Vec<ContentBlock>) {
        let mut blocks = match std::mem::replace(self, Self::Blocks(Vec::new())) {
            Self::Text(text) => vec![ContentBlock::Text { text }],
            Self::Blocks(blocks) => blocks,
        };
        blocks.extend(more);
        *self = Self::Blocks(blocks);
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
    /// Thinking, server-tool, and future block types we do not consume.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

// ── Response types ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: ApiUsage,
}

#[derive(Debug, Default, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: Option<u64>,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(rename = "type", default)]
    kind: String,
    message: String,
}

// ── Client ─────────────────────────────────────────────────────────────────────

/// Anthropic Messages API LLM client.
pub struct AnthropicClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    retry: RetryPolicy,
}

impl AnthropicClient {
    /// Creates a client targeting the default Anthropic API endpoint.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL, model)
    }

    /// Creates a client targeting a custom base URL (useful for proxies/tests).
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
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

    fn build_request(&self, request: &Request) -> AnthropicRequest {
        let caching = request.enable_prompt_caching;
        let system = system_text(&request.system_prompt, &request.messages).map(|text| {
            if caching {
                SystemField::Blocks(vec![SystemBlock {
                    block_type: "text",
                    text,
                    cache_control: Some(CacheControl::ephemeral()),
                }])
            } else {
                SystemField::Text(text)
            }
        });

        let mut tools: Vec<AnthropicTool> = request.tools.iter().map(convert_tool).collect();
        // A breakpoint on the last tool caches the whole tool list.
        if caching && let Some(last) = tools.last_mut() {
            last.cache_control = Some(CacheControl::ephemeral());
        }

        AnthropicRequest {
            model: self.model.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system,
            messages: convert_messages(&request.messages),
            tools,
        }
    }

    async fn send_once(&self, body: &AnthropicRequest) -> Result<Response, LlmError> {
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));

        let mut req_builder = self
            .client
            .post(&url)
            .header("anthropic-version", ANTHROPIC_API_VERSION)
            .header("content-type", "application/json");

        if proto::is_anthropic_oauth_token(&self.api_key) {
            req_builder = req_builder.bearer_auth(&self.api_key);
        } else {
            req_builder = req_builder.header("x-api-key", &self.api_key);
        }

        let response = req_builder.json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(self.retry.request_timeout.as_secs())
            } else {
                LlmError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        debug!(status = %status.as_u16(), "Anthropic response received");

        let text = response
            .text()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &text));
        }

        let parsed: AnthropicResponse = serde_json::from_str(&text).map_err(|e| {
            LlmError::InvalidResponse(format!(
                "Deserialization error: {e}; body: {}",
                text.chars().take(200).collect::<String>()
            ))
        })?;

        Ok(map_response(parsed))
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn provider_name(&self) -> &str {
        "anthropic"
    }

    fn supports_tool_use(&self) -> bool {
        true
    }

    fn supports_prompt_caching(&self) -> bool {
        true
    }

    async fn complete(&self, request: &Request, cancel: &CancellationToken) -> Response {
        let body = self.build_request(request);
        debug!(
            model = %self.model,
            messages = %body.messages.len(),
            tools = %body.tools.len(),
            caching = request.enable_prompt_caching,
            "Sending request to Anthropic"
        );

        match with_retry(&self.retry, "anthropic.messages", cancel, || self.send_once(&body)).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Anthropic request failed");
                Response::from_llm_error(&e)
            }
        }
    }
}

// ── Conversion helpers ─────────────────────────────────────────────────────────

/// Joins the request's system prompt with any system-role messages, which
/// Anthropic only accepts in the top-level `system` field.
fn system_text(system_prompt: &str, messages: &[Message]) -> Option<String> {
    let parts: Vec<&str> = std::iter::once(system_prompt)
        .chain(
            messages
                .iter()
                .filter(|m| m.role == Role::System)
                .map(|m| m.content.as_str()),
        )
        .filter(|s| !s.is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join("\n\n"))
}

/// Converts conversation messages into Anthropic format.
///
/// Consecutive same-role messages are merged (Anthropic forbids them), and
/// tool results always precede text inside a user message.
fn convert_messages(messages: &[Message]) -> Vec<AnthropicMessage> {
    let mut result: Vec<AnthropicMessage> = Vec::new();

    for msg in messages {
        let (role, blocks) = match msg.role {
            Role::System => continue,
            Role::User => ("user", user_blocks(msg)),
            Role::Assistant => ("assistant", assistant_blocks(msg)),
        };
        if blocks.is_empty() {
            continue;
        }
        match result.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => result.push(AnthropicMessage {
                role,
                content: AnthropicContent::from_blocks(blocks),
            }),
        }
    }

    result
}

fn user_blocks(msg: &Message) -> Vec<ContentBlock> {
    let mut blocks: Vec<ContentBlock> = msg
        .tool_results
        .iter()
        .flatten()
        .map(|tr| ContentBlock::ToolResult {
            tool_use_id: tr.tool_call_id.clone(),
            content: tr.content.clone(),
            is_error: tr.is_error,
        })
        .collect();
    if !msg.content.is_empty() {
        blocks.push(ContentBlock::Text {
            text: msg.content.clone(),
        });
    }
    blocks
}

fn assistant_blocks(msg: &Message) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();
    if !msg.content.is_empty() {
        blocks.push(ContentBlock::Text {
            text: msg.content.clone(),
        });
    }
    blocks.extend(msg.tool_calls.iter().flatten().map(|tc| ContentBlock::ToolUse {
        id: tc.id.clone(),
        name: tc.name.clone(),
        input: tc.input.clone(),
    }));
    blocks
}

fn convert_tool(t: &ToolDefinition) -> AnthropicTool {
    AnthropicTool {
        name: t.name.clone(),
        description: t.description.clone(),
        input_schema: t.input_schema.clone(),
        cache_control: None,
    }
}

fn map_stop_reason(stop_reason: Option<&str>) -> StopReason {
    match stop_reason {
        Some("tool_use") => StopReason::ToolUse,
        Some("max_tokens") => StopReason::MaxTokens,
        Some("refusal") => StopReason::Error,
        _ => StopReason::EndTurn,
    }
}

fn map_response(resp: AnthropicResponse) -> Response {
    let usage = Usage::new(
        resp.usage.input_tokens
            + resp.usage.cache_creation_input_tokens.unwrap_or(0)
            + resp.usage.cache_read_input_tokens.unwrap_or(0),
        resp.usage.output_tokens,
    );
    let stop_reason = map_stop_reason(resp.stop_reason.as_deref());

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in resp.content {
        match block {
            ContentBlock::Text { text: t } => text.push_str(&t),
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall::new(id, name, input));
            }
            ContentBlock::ToolResult { .. } | ContentBlock::Unknown => {}
        }
    }

    Response::from_parts(text, stop_reason, tool_calls, usage)
}

fn classify_status(status: u16, body: &str) -> LlmError {
    let message = match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) if parsed.error.kind.is_empty() => parsed.error.message,
        Ok(parsed) => format!("{}: {}", parsed.error.kind, parsed.error.message),
        Err(_) => body.chars().take(500).collect(),
    };
    match status {
        429 => LlmError::RateLimit,
        401 | 403 => LlmError::Auth(message),
        // 529 is Anthropic's "overloaded".
        500..=599 => LlmError::Server(format!("HTTP {status}: {message}")),
        _ => LlmError::Api(format!("HTTP {status}: {message}")),
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use proto::ToolResult;

    use super::*;
    use crate::test_support::serve;

    fn request(messages: Vec<Message>) -> Request {
        Request {
            system_prompt: "You are a concierge.".to_string(),
            messages,
            tools: vec![ToolDefinition::new(
                "ping",
                "Health check",
                serde_json::json!({"type":"object","properties":{}}),
            )],
            max_tokens: 1024,
            temperature: 0.2,
            enable_prompt_caching: false,
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            request_timeout: Duration::from_secs(5),
        }
    }

    // ── constructor tests ──────────────────────────────────────────────────────

    #[test]
    fn client_new_uses_default_url() {
        let c = AnthropicClient::new("sk-test", DEFAULT_ANTHROPIC_MODEL);
        assert_eq!(c.api_key, "sk-test");
        assert_eq!(c.base_url, "https://api.anthropic.com");
        assert_eq!(c.model(), DEFAULT_ANTHROPIC_MODEL);
        assert!(c.supports_prompt_caching());
    }

    // ── message conversion tests ───────────────────────────────────────────────

    #[test]
    fn system_messages_fold_into_system_field() {
        let msgs = vec![Message::system("Be brief."), Message::user("hello")];
        assert_eq!(
            system_text("Base prompt", &msgs).as_deref(),
            Some("Base prompt\n\nBe brief.")
        );
        assert_eq!(system_text("", &[]), None);

        let converted = convert_messages(&msgs);
        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0].role, "user");
    }

    #[test]
    fn tool_turn_converts_to_tool_use_and_tool_result_blocks() {
        let msgs = vec![
            Message::user("roles?"),
            Message::assistant_tool_calls(
                "Checking.",
                vec![ToolCall::new("tu1", "get_user_roles", serde_json::json!({"user_id":"42"}))],
            ),
            Message::tool_results(vec![ToolResult::error("tu1", "lookup failed")]),
        ];
        let converted = convert_messages(&msgs);
        assert_eq!(converted.len(), 3);

        let AnthropicContent::Blocks(ref blocks) = converted[1].content else {
            panic!("expected blocks for assistant with tool calls");
        };
        assert!(matches!(&blocks[0], ContentBlock::Text { text } if text == "Checking."));
        assert!(matches!(&blocks[1], ContentBlock::ToolUse { id, .. } if id == "tu1"));

        let json = serde_json::to_value(&converted[2]).expect("serialize");
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"][0]["type"], "tool_result");
        assert_eq!(json["content"][0]["tool_use_id"], "tu1");
        assert_eq!(json["content"][0]["is_error"], true);
    }

    #[test]
    fn consecutive_user_messages_are_merged() {
        let msgs = vec![
            Message::user("first"),
            Message::tool_results(vec![ToolResult::success("tu1", "ok")]),
            Message::user("second"),
        ];
        let converted = convert_messages(&msgs);
        assert_eq!(converted.len(), 1);
        let AnthropicContent::Blocks(ref blocks) = converted[0].content else {
            panic!("expected merged blocks");
        };
        assert_eq!(blocks.len(), 3);
    }

    #[test]
    fn plain_text_message_stays_a_string() {
        let converted = convert_messages(&[Message::user("test message")]);
        let json = serde_json::to_value(&converted[0]).expect("serialize");
        assert_eq!(json["content"], "test message");
    }

    #[test]
    fn successful_tool_result_omits_is_error() {
        let block = ContentBlock::ToolResult {
            tool_use_id: "tu1".to_string(),
            content: "ok".to_string(),
            is_error: false,
        };
        let json = serde_json::to_string(&block).expect("serialize");
        assert!(json.contains("\"type\":\"tool_result\""));
        assert!(!json.contains("is_error"));
    }

    // ── prompt caching ─────────────────────────────────────────────────────────

    #[test]
    fn caching_marks_system_and_last_tool() {
        let client = AnthropicClient::new("k", "m");
        let mut req = request(vec![Message::user("hi")]);
        req.tools.push(ToolDefinition::new("echo", "Echo", serde_json::json!({})));
        req.enable_prompt_caching = true;

        let json = serde_json::to_value(client.build_request(&req)).expect("serialize");
        assert_eq!(json["system"][0]["type"], "text");
        assert_eq!(json["system"][0]["cache_control"]["type"], "ephemeral");
        assert!(json["tools"][0].get("cache_control").is_none());
        assert_eq!(json["tools"][1]["cache_control"]["type"], "ephemeral");
    }

    #[test]
    fn without_caching_system_is_a_string() {
        let client = AnthropicClient::new("k", "m");
        let json =
            serde_json::to_value(client.build_request(&request(vec![Message::user("hi")])))
                .expect("serialize");
        assert_eq!(json["system"], "You are a concierge.");
        assert_eq!(json["max_tokens"], 1024);
        assert_eq!(json["model"], "m");
    }

    // ── response mapping ───────────────────────────────────────────────────────

    #[test]
    fn maps_tool_use_response_with_cache_usage() {
        let resp: AnthropicResponse = serde_json::from_str(
            r#"{
                "content": [
                    {"type":"thinking","thinking":"..."},
                    {"type":"text","text":"Let me check."},
                    {"type":"tool_use","id":"tu1","name":"ping","input":{}}
                ],
                "stop_reason": "tool_use",
                "usage": {"input_tokens":10,"output_tokens":4,"cache_read_input_tokens":90}
            }"#,
        )
        .expect("parse");
        let mapped = map_response(resp);
        assert_eq!(mapped.stop_reason, StopReason::ToolUse);
        assert_eq!(mapped.text(), "Let me check.");
        assert_eq!(mapped.tool_calls[0].name, "ping");
        assert_eq!(mapped.usage, Usage::new(100, 4));
    }

    #[test]
    fn maps_stop_reasons() {
        assert_eq!(map_stop_reason(Some("end_turn")), StopReason::EndTurn);
        assert_eq!(map_stop_reason(Some("stop_sequence")), StopReason::EndTurn);
        assert_eq!(map_stop_reason(Some("tool_use")), StopReason::ToolUse);
        assert_eq!(map_stop_reason(Some("max_tokens")), StopReason::MaxTokens);
        assert_eq!(map_stop_reason(None), StopReason::EndTurn);
    }

    #[test]
    fn classifies_http_statuses() {
        let body = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        assert_eq!(classify_status(429, ""), LlmError::RateLimit);
        assert!(matches!(classify_status(401, "{}"), LlmError::Auth(_)));
        assert_eq!(
            classify_status(529, body),
            LlmError::Server("HTTP 529: overloaded_error: Overloaded".to_string())
        );
        assert!(matches!(classify_status(400, "bad"), LlmError::Api(m) if m == "HTTP 400: bad"));
    }

    // ── HTTP round trips ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn sends_headers_and_parses_end_turn() {
        let (url, captured) = serve(vec![(
            200,
            r#"{"content":[{"type":"text","text":"Hi there"}],"stop_reason":"end_turn","usage":{"input_tokens":12,"output_tokens":3}}"#.to_string(),
        )])
        .await;
        let client = AnthropicClient::with_base_url("sk-ant-api03-test", url, "claude-test")
            .with_retry(fast_retry());

        let response = client
            .complete(&request(vec![Message::user("hello")]), &CancellationToken::new())
            .await;

        assert!(response.success);
        assert_eq!(response.text(), "Hi there");
        assert_eq!(response.usage.total_tokens(), 15);

        let seen = captured.lock().expect("lock").clone();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].head.starts_with("POST /v1/messages"));
        assert_eq!(seen[0].header("x-api-key"), Some("sk-ant-api03-test"));
        assert_eq!(seen[0].header("anthropic-version"), Some(ANTHROPIC_API_VERSION));
        let body = seen[0].json();
        assert_eq!(body["model"], "claude-test");
        assert_eq!(body["tools"][0]["name"], "ping");
        assert_eq!(body["messages"][0]["content"], "hello");
    }

    #[tokio::test]
    async fn oauth_tokens_use_bearer_auth() {
        let (url, captured) = serve(vec![(
            200,
            r#"{"content":[],"stop_reason":"end_turn"}"#.to_string(),
        )])
        .await;
        let client = AnthropicClient::with_base_url("sk-ant-oat01-abc", url, "m");
        let response = client
            .complete(&request(vec![Message::user("hi")]), &CancellationToken::new())
            .await;
        assert!(response.success);

        let seen = captured.lock().expect("lock").clone();
        assert_eq!(seen[0].header("authorization"), Some("Bearer sk-ant-oat01-abc"));
        assert_eq!(seen[0].header("x-api-key"), None);
    }

    #[tokio::test]
    async fn retries_overloaded_then_succeeds() {
        let (url, captured) = serve(vec![
            (
                529,
                r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#
                    .to_string(),
            ),
            (
                200,
                r#"{"content":[{"type":"text","text":"ok"}],"stop_reason":"end_turn"}"#.to_string(),
            ),
        ])
        .await;
        let client = AnthropicClient::with_base_url("k", url, "m").with_retry(fast_retry());

        let response = client
            .complete(&request(vec![Message::user("hi")]), &CancellationToken::new())
            .await;
        assert!(response.success);
        assert_eq!(response.text(), "ok");
        assert_eq!(captured.lock().expect("lock").len(), 2);
    }

    #[tokio::test]
    async fn auth_failure_is_not_retried() {
        let (url, captured) = serve(vec![
            (
                401,
                r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#
                    .to_string(),
            ),
            (200, r#"{"content":[],"stop_reason":"end_turn"}"#.to_string()),
        ])
        .await;
        let client = AnthropicClient::with_base_url("k", url, "m").with_retry(fast_retry());

        let response = client
            .complete(&request(vec![Message::user("hi")]), &CancellationToken::new())
            .await;
        assert!(!response.success);
        assert_eq!(response.stop_reason, StopReason::Error);
        assert!(response.text().is_empty());
        assert!(
            response
                .error_message
                .as_deref()
                .is_some_and(|m| m.contains("invalid x-api-key"))
        );
        assert_eq!(captured.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn unreachable_server_is_a_failed_response() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let client = AnthropicClient::with_base_url("k", format!("http://{addr}"), "m")
            .with_retry(RetryPolicy::no_retry());
        let response = client
            .complete(&request(vec![Message::user("hi")]), &CancellationToken::new())
            .await;
        assert!(!response.success);
        assert!(
            response
                .error_message
                .as_deref()
                .is_some_and(|m| m.starts_with("Network error"))
        );
    }
}
