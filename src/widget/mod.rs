//! Widget bundling: remote page → self-contained, data-injected HTML.

pub mod bundler;
pub mod cache;
pub mod document;
pub mod inject;

use serde::{Deserialize, Serialize};

pub use bundler::{BundlerConfig, WidgetBundler};
pub use cache::{ShellCache, ShellKey};
pub use document::Shell;

/// One widget to bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetRequest {
    /// Widget path on the source host, e.g. `/widgets/greet`.
    pub source_path: String,
    /// Locale segment prepended to the path, e.g. `ko`.
    pub locale: String,
    /// Payload injected into the page; `None` yields the bare shell.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl WidgetRequest {
    /// Request a widget, normalizing `source_path` to start with `/`.
    #[must_use]
    pub fn new(source_path: &str, locale: &str, data: Option<serde_json::Value>) -> Self {
        let source_path = if source_path.starts_with('/') {
            source_path.to_owned()
        } else {
            format!("/{source_path}")
        };
        Self {
            source_path,
            locale: locale.trim_matches('/').to_owned(),
            data,
        }
    }
}
