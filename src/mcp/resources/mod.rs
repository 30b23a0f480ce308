//! MCP resource handlers.

pub mod widgets;
