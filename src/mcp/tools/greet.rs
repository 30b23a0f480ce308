//! `greet-ko` MCP tool handler.
//!
//! Greets a person by name and renders the greeting card widget with the
//! greeting injected as runtime data.

use rmcp::handler::server::tool::ToolCallContext;
use rmcp::model::{CallToolResult, Tool};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, info_span, Instrument};

use super::util::{parse_arguments, timestamp, tool_definition, tool_error, widget_result};
use crate::mcp::handler::WidgetServer;
use crate::mcp::resources::widgets::GREET_KO;
use crate::widget::WidgetRequest;
use crate::{AppError, Result};

/// Greeting language; doubles as the widget locale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// English.
    En,
    /// Korean.
    #[default]
    Ko,
}

impl Language {
    /// Locale segment used for the widget page.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Ko => "ko",
        }
    }

    /// Greeting line for `name`.
    #[must_use]
    pub fn greeting(self, name: &str) -> String {
        match self {
            Self::En => format!("Hello, {name}! Nice to meet you! 🎉"),
            Self::Ko => format!("안녕하세요, {name}님! 만나서 반갑습니다! 🎉"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GreetInput {
    name: String,
    #[serde(default)]
    language: Language,
}

/// Tool definition for `greet-ko`.
///
/// # Errors
///
/// Returns `AppError::Mcp` if the definition is malformed.
pub fn definition() -> Result<Tool> {
    tool_definition(
        &GREET_KO,
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "인사할 사람의 이름" },
                "language": { "type": "string", "enum": ["en", "ko"], "default": "ko" }
            },
            "required": ["name"]
        }),
    )
}

/// Handle the `greet-ko` tool call.
///
/// # Errors
///
/// Returns `rmcp::ErrorData` only if the result cannot be assembled;
/// invalid arguments produce an `isError` result instead.
pub async fn handle(
    context: ToolCallContext<'_, WidgetServer>,
) -> std::result::Result<CallToolResult, rmcp::ErrorData> {
    let input = match parse_arguments::<GreetInput>(context.arguments)
        .and_then(|input| {
            if input.name.trim().is_empty() {
                Err(AppError::Validation("name must not be empty".into()))
            } else {
                Ok(input)
            }
        }) {
        Ok(input) => input,
        Err(err) => return Ok(tool_error(format!("invalid greet-ko arguments: {err}"))),
    };

    let bundler = &context.service.state().bundler;
    let span = info_span!("greet", language = input.language.as_str());

    async move {
        let greeting = input.language.greeting(&input.name);
        let data = json!({
            "toolType": "greet",
            "name": input.name,
            "language": input.language,
            "greeting": greeting,
            "timestamp": timestamp(),
        });

        let request = WidgetRequest::new(
            GREET_KO.source_path,
            input.language.as_str(),
            Some(data.clone()),
        );
        let html = bundler.bundle(&request).await;
        info!(bytes = html.len(), "greeting rendered");

        widget_result(&GREET_KO, greeting, html, data)
    }
    .instrument(span)
    .await
}
