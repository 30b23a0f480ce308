//! `calculate-ko` MCP tool handler.
//!
//! Evaluates one binary arithmetic operation and renders the calculator
//! widget with the expression and result injected as runtime data.

use rmcp::handler::server::tool::ToolCallContext;
use rmcp::model::{CallToolResult, Tool};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, info_span, Instrument};

use super::util::{parse_arguments, timestamp, tool_definition, tool_error, widget_result};
use crate::mcp::handler::WidgetServer;
use crate::mcp::resources::widgets::CALCULATE_KO;
use crate::widget::WidgetRequest;
use crate::Result;

/// Shown when the divisor is zero.
pub const DIVISION_BY_ZERO: &str = "❌ 0으로 나눌 수 없습니다!";

/// Supported arithmetic operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// `a + b`
    Add,
    /// `a - b`
    Subtract,
    /// `a × b`
    Multiply,
    /// `a ÷ b`
    Divide,
}

impl Operation {
    /// Display symbol.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "×",
            Self::Divide => "÷",
        }
    }

    /// Evaluate `a op b`; `None` on division by zero.
    #[must_use]
    pub fn apply(self, a: f64, b: f64) -> Option<f64> {
        match self {
            Self::Add => Some(a + b),
            Self::Subtract => Some(a - b),
            Self::Multiply => Some(a * b),
            Self::Divide if b == 0.0 => None,
            Self::Divide => Some(a / b),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CalculateInput {
    operation: Operation,
    a: f64,
    b: f64,
}

/// Tool definition for `calculate-ko`.
///
/// # Errors
///
/// Returns `AppError::Mcp` if the definition is malformed.
pub fn definition() -> Result<Tool> {
    tool_definition(
        &CALCULATE_KO,
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["add", "subtract", "multiply", "divide"]
                },
                "a": { "type": "number" },
                "b": { "type": "number" }
            },
            "required": ["operation", "a", "b"]
        }),
    )
}

/// Handle the `calculate-ko` tool call.
///
/// # Errors
///
/// Returns `rmcp::ErrorData` only if the result cannot be assembled;
/// invalid arguments and division by zero produce `isError` results.
pub async fn handle(
    context: ToolCallContext<'_, WidgetServer>,
) -> std::result::Result<CallToolResult, rmcp::ErrorData> {
    let input: CalculateInput = match parse_arguments(context.arguments) {
        Ok(input) => input,
        Err(err) => return Ok(tool_error(format!("invalid calculate-ko arguments: {err}"))),
    };

    let Some(result) = input.operation.apply(input.a, input.b) else {
        return Ok(tool_error(DIVISION_BY_ZERO));
    };

    let state = context.service.state();
    let locale = state.config.widgets.default_locale.as_str();
    let span = info_span!("calculate", operation = ?input.operation);

    async move {
        let symbol = input.operation.symbol();
        let expression = format!("{} {symbol} {}", input.a, input.b);
        let data = json!({
            "toolType": "calculate",
            "operation": input.operation,
            "a": input.a,
            "b": input.b,
            "symbol": symbol,
            "result": result,
            "expression": expression,
            "timestamp": timestamp(),
        });

        let request = WidgetRequest::new(CALCULATE_KO.source_path, locale, Some(data.clone()));
        let html = state.bundler.bundle(&request).await;
        info!(bytes = html.len(), "calculation rendered");

        widget_result(&CALCULATE_KO, format!("🧮 {expression} = {result}"), html, data)
    }
    .instrument(span)
    .await
}
