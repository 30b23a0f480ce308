//! Global configuration parsing and validation.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::mode::DeploymentMode;
use crate::{AppError, Result};

/// HTTP listener settings for the boundary endpoint.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HttpConfig {
    /// Interface the listener binds to.
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port of the `/mcp` endpoint.
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_http_port(),
        }
    }
}

/// Upstream widget source and bundling limits.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WidgetConfig {
    /// Origin that serves the widget pages, e.g. `https://refhubs.com`.
    #[serde(default = "default_source_base_url")]
    pub source_base_url: String,
    /// Timeout for the top-level page fetch.
    #[serde(default = "default_page_timeout_ms")]
    pub page_timeout_ms: u64,
    /// Timeout for each stylesheet or script fetch.
    #[serde(default = "default_asset_timeout_ms")]
    pub asset_timeout_ms: u64,
    /// Script paths that provide the host runtime and stay external.
    #[serde(default = "default_runtime_bundles")]
    pub runtime_bundles: Vec<String>,
    /// Path prefix of build-runtime assets emitted by the widget host.
    #[serde(default = "default_bootstrap_prefix")]
    pub bootstrap_prefix: String,
    /// Locale used when a tool call does not name one.
    #[serde(default = "default_locale")]
    pub default_locale: String,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            source_base_url: default_source_base_url(),
            page_timeout_ms: default_page_timeout_ms(),
            asset_timeout_ms: default_asset_timeout_ms(),
            runtime_bundles: default_runtime_bundles(),
            bootstrap_prefix: default_bootstrap_prefix(),
            default_locale: default_locale(),
        }
    }
}

impl WidgetConfig {
    /// Top-level page fetch timeout.
    #[must_use]
    pub fn page_timeout(&self) -> Duration {
        Duration::from_millis(self.page_timeout_ms)
    }

    /// Per sub-resource fetch timeout.
    #[must_use]
    pub fn asset_timeout(&self) -> Duration {
        Duration::from_millis(self.asset_timeout_ms)
    }

    /// Parsed widget source origin.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the URL is malformed or not http(s).
    pub fn source_base(&self) -> Result<Url> {
        let url = Url::parse(&self.source_base_url).map_err(|err| {
            AppError::Config(format!(
                "invalid widgets.source_base_url '{}': {err}",
                self.source_base_url
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::Config(format!(
                "widgets.source_base_url must use http or https, got '{}'",
                url.scheme()
            )));
        }
        Ok(url)
    }
}

/// Session lifetime settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Idle time after which a session is evicted by the sweeper.
    #[serde(default = "default_idle_timeout_seconds")]
    pub idle_timeout_seconds: u64,
    /// Interval between eviction sweeps.
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
    /// Upper bound for a single protocol request to be answered.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_seconds: default_idle_timeout_seconds(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

impl SessionConfig {
    /// Idle threshold as a [`Duration`].
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    /// Sweep interval as a [`Duration`].
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    /// Request timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_http_port() -> u16 {
    3000
}

fn default_source_base_url() -> String {
    "https://refhubs.com".into()
}

fn default_page_timeout_ms() -> u64 {
    10_000
}

fn default_asset_timeout_ms() -> u64 {
    3_000
}

fn default_runtime_bundles() -> Vec<String> {
    vec![
        "/_next/static/chunks/webpack".into(),
        "/_next/static/chunks/framework".into(),
    ]
}

fn default_bootstrap_prefix() -> String {
    "/_next/".into()
}

fn default_locale() -> String {
    "ko".into()
}

fn default_idle_timeout_seconds() -> u64 {
    3600
}

fn default_sweep_interval_seconds() -> u64 {
    600
}

fn default_request_timeout_seconds() -> u64 {
    120
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Deployment mode; controls shell caching.
    #[serde(default)]
    pub mode: DeploymentMode,
    /// HTTP listener.
    #[serde(default)]
    pub http: HttpConfig,
    /// Widget source and bundling.
    #[serde(default)]
    pub widgets: WidgetConfig,
    /// Session lifetime.
    #[serde(default)]
    pub sessions: SessionConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        self.widgets.source_base()?;

        if self.widgets.asset_timeout_ms == 0 || self.widgets.page_timeout_ms == 0 {
            return Err(AppError::Config("widget timeouts must be non-zero".into()));
        }
        if self.widgets.page_timeout_ms <= self.widgets.asset_timeout_ms {
            return Err(AppError::Config(format!(
                "widgets.page_timeout_ms ({}) must exceed widgets.asset_timeout_ms ({})",
                self.widgets.page_timeout_ms, self.widgets.asset_timeout_ms
            )));
        }
        if self.widgets.default_locale.trim().is_empty() {
            return Err(AppError::Config("widgets.default_locale must not be empty".into()));
        }

        let sessions = &self.sessions;
        if sessions.sweep_interval_seconds == 0
            || sessions.idle_timeout_seconds == 0
            || sessions.request_timeout_seconds == 0
        {
            return Err(AppError::Config("session timings must be non-zero".into()));
        }
        if sessions.sweep_interval_seconds >= sessions.idle_timeout_seconds {
            return Err(AppError::Config(format!(
                "sessions.sweep_interval_seconds ({}) must be shorter than \
                 sessions.idle_timeout_seconds ({})",
                sessions.sweep_interval_seconds, sessions.idle_timeout_seconds
            )));
        }

        Ok(())
    }
}
