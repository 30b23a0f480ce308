#![forbid(unsafe_code)]

//! Widget relay: an MCP server that multiplexes per-client sessions over
//! stateless HTTP calls and renders tool output as self-contained HTML
//! widgets bundled from a remote source page.

pub mod config;
pub mod errors;
pub mod mcp;
pub mod mode;
pub mod session;
pub mod widget;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
