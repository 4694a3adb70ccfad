use serde::{Deserialize, Serialize};

use crate::tool::{ToolCall, ToolResult};

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Message authored by an end user (also carries tool results).
    User,
    /// Message authored by the assistant/model.
    Assistant,
    /// System-level instruction message.
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

/// One entry of an append-only conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Semantic role of this message.
    pub role: Role,
    /// Human-readable text content.
    pub content: String,
    /// Tool calls issued by an assistant turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Results answering the tool calls of the preceding assistant turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<Vec<ToolResult>>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: None,
            tool_results: None,
        }
    }

    /// Creates a user-role message with the given content.
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    /// Creates an assistant-role message with the given content.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Creates a system-role message with the given content.
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    /// Creates an assistant message carrying tool calls alongside any
    /// text the model emitted before requesting them.
    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Some(tool_calls),
            tool_results: None,
        }
    }

    /// Creates the user-side follow-up message carrying tool results.
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self {
            role: Role::User,
            content: String::new(),
            tool_calls: None,
            tool_results: Some(results),
        }
    }

    /// Returns `true` when this message carries at least one tool call.
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|calls| !calls.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_expected_roles() {
        assert_eq!(Message::user("u").role, Role::User);
        assert_eq!(Message::assistant("a").role, Role::Assistant);
        assert_eq!(Message::system("s").role, Role::System);
        assert_eq!(Message::tool_results(Vec::new()).role, Role::User);
    }

    #[test]
    fn assistant_tool_calls_keeps_text_and_calls() {
        let call = ToolCall::new("tc1", "ping", serde_json::json!({}));
        let msg = Message::assistant_tool_calls("checking", vec![call.clone()]);

        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.content, "checking");
        assert!(msg.has_tool_calls());
        assert_eq!(msg.tool_calls, Some(vec![call]));
        assert_eq!(msg.tool_results, None);
    }

    #[test]
    fn empty_tool_call_list_is_not_a_tool_turn() {
        let msg = Message::assistant_tool_calls("", Vec::new());
        assert!(!msg.has_tool_calls());
        assert!(!Message::assistant("plain").has_tool_calls());
    }

    #[test]
    fn plain_message_omits_tool_fields_on_the_wire() {
        let json = serde_json::to_value(Message::user("hi")).expect("serialize");
        assert_eq!(json, serde_json::json!({"role":"user","content":"hi"}));
    }

    #[test]
    fn role_display_matches_wire_name() {
        for role in [Role::User, Role::Assistant, Role::System] {
            let wire = serde_json::to_value(role).expect("serialize role");
            assert_eq!(wire, serde_json::Value::String(role.to_string()));
        }
    }
}
