//! Built-in utility tools: health check, echo, clock, and caller identity.

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use proto::{ToolContext, ToolDefinition, ToolExecutionResult};
use serde::Deserialize;
use tracing::debug;

use crate::{ToolProvider, parse_input};

const PROVIDER_NAME: &str = "utility";

#[derive(Debug, Deserialize)]
struct EchoArgs {
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct CurrentTimeArgs {
    /// Offset from UTC in minutes.
    #[serde(default)]
    utc_offset_minutes: Option<i32>,
}

/// Provider exposing `ping`, `echo`, `current_time`, and `whoami`.
#[derive(Debug, Default)]
pub struct UtilityProvider;

impl UtilityProvider {
    /// Creates the utility provider.
    pub fn new() -> Self {
        Self
    }

    fn current_time(&self, args: CurrentTimeArgs) -> ToolExecutionResult {
        let now = Utc::now();
        match args.utc_offset_minutes {
            None => ToolExecutionResult::success(now.to_rfc3339()),
            Some(minutes) => match FixedOffset::east_opt(minutes * 60) {
                Some(offset) => ToolExecutionResult::success(now.with_timezone(&offset).to_rfc3339()),
                None => ToolExecutionResult::failure(format!(
                    "utc_offset_minutes out of range: {minutes}"
                )),
            },
        }
    }

    fn whoami(&self, context: &ToolContext) -> ToolExecutionResult {
        match serde_json::to_string(context) {
            Ok(json) => ToolExecutionResult::success(json),
            Err(e) => ToolExecutionResult::failure(e.to_string()),
        }
    }
}

#[async_trait]
impl ToolProvider for UtilityProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn description(&self) -> &str {
        "General-purpose diagnostics: ping, echo, current time, caller identity"
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                "ping",
                "Health check. Returns 'pong'.",
                serde_json::json!({"type":"object","properties":{}}),
            ),
            ToolDefinition::new(
                "echo",
                "Returns the given value unchanged.",
                serde_json::json!({
                    "type":"object",
                    "properties":{"value":{"type":"string"}},
                    "required":["value"]
                }),
            ),
            ToolDefinition::new(
                "current_time",
                "Returns the current time as RFC 3339, in UTC unless an offset is given.",
                serde_json::json!({
                    "type":"object",
                    "properties":{
                        "utc_offset_minutes":{
                            "type":"integer",
                            "description":"Offset from UTC in minutes, e.g. 540 for UTC+9"
                        }
                    }
                }),
            ),
            ToolDefinition::new(
                "whoami",
                "Returns the requesting user's id, guild, channel, and roles.",
                serde_json::json!({"type":"object","properties":{}}),
            ),
        ]
    }

    async fn execute_tool(
        &self,
        name: &str,
        input: serde_json::Value,
        context: &ToolContext,
    ) -> ToolExecutionResult {
        debug!(tool = %name, user_id = %context.user_id, "Executing utility tool");
        match name {
            "ping" => ToolExecutionResult::success("pong"),
            "echo" => match parse_input::<EchoArgs>(input) {
                Ok(args) => ToolExecutionResult::success(args.value),
                Err(e) => e.into(),
            },
            "current_time" => match parse_input::<CurrentTimeArgs>(input) {
                Ok(args) => self.current_time(args),
                Err(e) => e.into(),
            },
            "whoami" => self.whoami(context),
            other => ToolExecutionResult::not_found(other),
        }
    }
}
