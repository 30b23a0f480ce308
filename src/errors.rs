//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Session creation, connect, or delivery failure on a transport.
    Transport(String),
    /// Upstream widget page or sub-resource could not be fetched or parsed.
    Upstream(String),
    /// Caller-supplied input failed validation.
    Validation(String),
    /// MCP protocol or tool dispatch failure.
    Mcp(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// JSON-RPC error code reported in boundary error envelopes.
    #[must_use]
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::Transport(_) => -32000,
            Self::Validation(_) => -32600,
            Self::NotFound(_) => -32001,
            _ => -32603,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Upstream(msg) => write!(f, "upstream: {msg}"),
            Self::Validation(msg) => write!(f, "validation: {msg}"),
            Self::Mcp(msg) => write!(f, "mcp: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
