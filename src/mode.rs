//! Deployment mode: whether bundled widget shells are cached.
//!
//! `DeploymentMode` is used as the `--mode` CLI flag value and the `mode`
//! key in `config.toml`.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Top-level deployment mode for the server.
///
/// Defaults to [`DeploymentMode::Production`].
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentMode {
    /// Shells are cached after the first successful bundling pass.
    #[default]
    Production,
    /// Every bundle re-fetches upstream so live edits show up immediately.
    Development,
}

impl DeploymentMode {
    /// Whether bundled shells may be stored in the shell cache.
    #[must_use]
    pub fn caches_shells(self) -> bool {
        matches!(self, Self::Production)
    }
}
