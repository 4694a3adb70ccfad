//! Tool input decoding.

use proto::ToolError;
use serde::de::DeserializeOwned;

/// Decodes a tool's opaque JSON input into its typed argument struct.
///
/// A `null` input (some models send it for argument-less tools) is treated
/// as an empty object.
pub fn parse_input<T: DeserializeOwned>(input: serde_json::Value) -> Result<T, ToolError> {
    let input = if input.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        input
    };
    serde_json::from_value(input).map_err(|e| ToolError::InvalidArgs(e.to_string()))
}
