//! Shared helpers for integration tests.

use std::sync::Arc;

use serde_json::Value;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use widget_relay::config::GlobalConfig;
use widget_relay::mcp::handler::AppState;
use widget_relay::mcp::tools::WidgetToolRegistry;
use widget_relay::mcp::transport::RmcpSessionFactory;
use widget_relay::session::SessionMultiplexer;
use widget_relay::widget::{BundlerConfig, WidgetBundler};

/// A widget page the way the widget host renders it.
pub const WIDGET_PAGE: &str = r##"<!DOCTYPE html><html lang="ko"><head><meta charset="utf-8"><base href="/"><link rel="preload" href="/_next/static/css/app.css" as="style"><link rel="stylesheet" href="/_next/static/css/app.css"><script src="/_next/static/chunks/webpack-1a2b.js" defer></script><script src="/_next/static/chunks/app/page-9f.js" async></script><script nomodule src="/_next/static/chunks/polyfills.js"></script></head><body><div id="root"><img src="/images/hello.png" alt="hello"><a href="/ko/about">About</a><a href="#top">Top</a><a href="https://other.example/x">Other</a></div></body></html>"##;

/// Stylesheet body served for `app.css`.
pub const APP_CSS: &str = "body{color:red}";

/// Script body served for the page chunk.
pub const PAGE_JS: &str = r#"console.log("page")"#;

/// Build a config pointed at `source_base_url` with short timeouts.
pub fn test_config(source_base_url: &str) -> GlobalConfig {
    let mut config = GlobalConfig::default();
    config.widgets.source_base_url = source_base_url.to_owned();
    config.widgets.page_timeout_ms = 2_000;
    config.widgets.asset_timeout_ms = 500;
    config.sessions.request_timeout_seconds = 10;
    config
}

/// Bundler for `server` with shell caching on or off.
pub fn test_bundler(source_base_url: &str, cache_shells: bool) -> WidgetBundler {
    let mut config =
        BundlerConfig::from_config(&test_config(source_base_url)).expect("bundler config");
    config.cache_shells = cache_shells;
    WidgetBundler::new(config).expect("bundler")
}

/// Application state backed by `config`.
pub fn test_app_state(config: GlobalConfig) -> Arc<AppState> {
    let bundler = WidgetBundler::new(BundlerConfig::from_config(&config).expect("bundler config"))
        .expect("bundler");
    Arc::new(AppState {
        config: Arc::new(config),
        bundler: Arc::new(bundler),
    })
}

/// Multiplexer serving real MCP sessions over `state`.
pub fn test_multiplexer(state: Arc<AppState>) -> Arc<SessionMultiplexer<RmcpSessionFactory>> {
    let idle = state.config.sessions.idle_timeout();
    let factory = RmcpSessionFactory::new(state, Arc::new(WidgetToolRegistry));
    Arc::new(SessionMultiplexer::new(factory, idle))
}

/// Serve [`WIDGET_PAGE`] at `/{locale}{page_path}` plus its sub-resources.
pub async fn mount_widget_site(server: &MockServer, page_path: &str) {
    Mock::given(method("GET"))
        .and(path(page_path))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html; charset=utf-8")
                .set_body_string(WIDGET_PAGE),
        )
        .mount(server)
        .await;
    mount_assets(server).await;
}

/// Serve the stylesheet and page chunk referenced by [`WIDGET_PAGE`].
pub async fn mount_assets(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/_next/static/css/app.css"))
        .respond_with(ResponseTemplate::new(200).set_body_string(APP_CSS))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/_next/static/chunks/app/page-9f.js"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PAGE_JS))
        .mount(server)
        .await;
}

/// Recover the payload assigned by the injected data script.
pub fn injected_data(html: &str) -> Value {
    let start = html.find("const data = ").expect("data script present") + "const data = ".len();
    let end = start + html[start..].find(";\n").expect("statement terminator");
    serde_json::from_str(&html[start..end]).expect("injected payload is JSON")
}
