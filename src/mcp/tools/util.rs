//! Shared utilities for MCP tool handlers.

use chrono::{SecondsFormat, Utc};
use rmcp::model::{CallToolResult, Content, Tool};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use crate::mcp::resources::widgets::{WidgetTemplate, WIDGET_MIME_TYPE};
use crate::{AppError, Result};

/// Build a tool definition carrying the widget's host metadata.
///
/// # Errors
///
/// Returns `AppError::Mcp` if the definition does not form a valid tool.
pub fn tool_definition(widget: &WidgetTemplate, input_schema: Value) -> Result<Tool> {
    serde_json::from_value(json!({
        "name": widget.tool_name,
        "title": widget.title,
        "description": widget.description,
        "inputSchema": input_schema,
        "_meta": widget.tool_meta(),
    }))
    .map_err(|err| AppError::Mcp(format!("invalid definition for {}: {err}", widget.tool_name)))
}

/// Deserialize tool arguments; a missing argument object reads as `{}`.
///
/// # Errors
///
/// Returns `AppError::Validation` describing the first invalid field.
pub fn parse_arguments<T: DeserializeOwned>(arguments: Option<Map<String, Value>>) -> Result<T> {
    serde_json::from_value(Value::Object(arguments.unwrap_or_default()))
        .map_err(|err| AppError::Validation(err.to_string()))
}

/// Tool-level failure result (`isError: true`), not a protocol error.
#[must_use]
pub fn tool_error(message: impl Into<String>) -> CallToolResult {
    CallToolResult::error(vec![Content::text(message.into())])
}

/// Successful result: summary text plus the embedded widget document.
///
/// # Errors
///
/// Returns `rmcp::ErrorData::internal_error` if the result cannot be built.
pub fn widget_result(
    widget: &WidgetTemplate,
    summary: String,
    html: String,
    data: Value,
) -> std::result::Result<CallToolResult, rmcp::ErrorData> {
    serde_json::from_value(json!({
        "content": [
            { "type": "text", "text": summary },
            {
                "type": "resource",
                "resource": {
                    "uri": widget.template_uri,
                    "mimeType": WIDGET_MIME_TYPE,
                    "text": html,
                },
            },
        ],
        "structuredContent": data,
        "isError": false,
        "_meta": widget.tool_meta(),
    }))
    .map_err(|err| {
        rmcp::ErrorData::internal_error(format!("failed to build tool result: {err}"), None)
    })
}

/// Current time as an RFC 3339 UTC timestamp with millisecond precision.
#[must_use]
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
