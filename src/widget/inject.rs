//! Runtime data injection and the fallback document.
//!
//! The data script sets `window.__WIDGET_DATA__`, mirrors the payload onto
//! `window.openai.toolOutput` when the host bridge exists, and dispatches a
//! `widgetDataReady` event so already-running widget code can react.

use serde_json::Value;

use super::document::{escape_text, Shell};

/// Global the payload is assigned to.
pub const DATA_GLOBAL: &str = "__WIDGET_DATA__";

/// Host bridge object checked at render time.
pub const HOST_BRIDGE: &str = "openai";

/// Property of the host bridge that receives the payload.
pub const HOST_BRIDGE_PROPERTY: &str = "toolOutput";

/// Custom event dispatched once the payload is in place.
pub const READY_EVENT: &str = "widgetDataReady";

/// `id` attribute of the injected script element.
pub const DATA_SCRIPT_ID: &str = "widget-data";

/// Serialize `data` as JSON that is also safe inside an inline `<script>`.
///
/// `<`, `>`, `&`, U+2028 and U+2029 are emitted as `\uXXXX` escapes, which
/// JSON and JavaScript both decode back to the original characters.
#[must_use]
pub fn script_safe_json(data: &Value) -> String {
    let raw = data.to_string();
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '&' => out.push_str("\\u0026"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            _ => out.push(ch),
        }
    }
    out
}

/// The `<script>` element carrying `data`.
#[must_use]
pub fn data_script(data: &Value) -> String {
    let json = script_safe_json(data);
    format!(
        "<script id=\"{DATA_SCRIPT_ID}\">\n\
         (function () {{\n\
         const data = {json};\n\
         window.{DATA_GLOBAL} = data;\n\
         if (typeof window.{HOST_BRIDGE} !== \"undefined\" && window.{HOST_BRIDGE} !== null) {{\n\
         window.{HOST_BRIDGE}.{HOST_BRIDGE_PROPERTY} = data;\n\
         }}\n\
         window.dispatchEvent(new CustomEvent(\"{READY_EVENT}\", {{ detail: data }}));\n\
         }})();\n\
         </script>"
    )
}

/// Append the data script as the last child of `<head>`.
///
/// Splices at the head offset recorded when the shell was serialized.
/// Shells without a document head get the script prepended.
#[must_use]
pub fn inject_data(shell: &Shell, data: &Value) -> String {
    let script = data_script(data);
    let html = shell.as_str();

    match shell.head_end() {
        Some(at) => {
            let mut out = String::with_capacity(html.len() + script.len());
            out.push_str(&html[..at]);
            out.push_str(&script);
            out.push_str(&html[at..]);
            out
        }
        None => format!("{script}{html}"),
    }
}

/// Minimal styled page rendering `data` as formatted text.
///
/// Still carries the data script so widget hosts see the same global.
#[must_use]
pub fn fallback_document(data: Option<&Value>, reason: &str) -> String {
    let empty = Value::Object(serde_json::Map::new());
    let data = data.unwrap_or(&empty);
    let pretty = serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string());

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Widget Data</title>
<style>
body {{ margin: 0; padding: 20px; font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', sans-serif; background: linear-gradient(135deg, #667eea 0%, #764ba2 100%); min-height: 100vh; display: flex; align-items: center; justify-content: center; }}
.container {{ background: white; border-radius: 16px; padding: 32px; box-shadow: 0 20px 60px rgba(0,0,0,0.3); max-width: 500px; }}
h2 {{ margin: 0 0 16px; color: #333; }}
.reason {{ margin: 0 0 12px; color: #888; font-size: 12px; }}
pre {{ background: #f5f5f5; padding: 16px; border-radius: 8px; overflow: auto; font-size: 14px; }}
</style>
{script}
</head>
<body>
<div class="container">
<h2>Widget Data</h2>
<p class="reason">{reason}</p>
<pre id="data">{pretty}</pre>
</div>
</body>
</html>
"#,
        script = data_script(data),
        reason = escape_text(reason),
        pretty = escape_text(&pretty),
    )
}
