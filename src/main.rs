#![forbid(unsafe_code)]

//! `widget-relay`: MCP widget server binary.
//!
//! Bootstraps configuration, the widget bundler, the session multiplexer
//! and its idle sweeper, then serves the `/mcp` endpoint until SIGINT or
//! SIGTERM.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use widget_relay::config::GlobalConfig;
use widget_relay::mcp::handler::AppState;
use widget_relay::mcp::http::serve_http;
use widget_relay::mcp::tools::WidgetToolRegistry;
use widget_relay::mcp::transport::RmcpSessionFactory;
use widget_relay::mode::DeploymentMode;
use widget_relay::session::{sweeper, SessionMultiplexer};
use widget_relay::widget::{BundlerConfig, WidgetBundler};
use widget_relay::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "widget-relay", about = "MCP widget server", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Built-in defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the HTTP port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the deployment mode (development disables shell caching).
    #[arg(long, value_enum)]
    mode: Option<DeploymentMode>,

    /// Override the widget source base URL.
    #[arg(long)]
    source_url: Option<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("widget-relay server bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

fn load_config(args: &Cli) -> Result<GlobalConfig> {
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };

    if let Some(port) = args.port {
        config.http.port = port;
    }
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(url) = &args.source_url {
        config.widgets.source_base_url.clone_from(url);
    }
    config.validate()?;
    Ok(config)
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = Arc::new(load_config(&args)?);
    info!(
        mode = ?config.mode,
        source = %config.widgets.source_base_url,
        "configuration loaded"
    );

    // ── Build shared application state ──────────────────
    let bundler = WidgetBundler::new(BundlerConfig::from_config(&config)?)?;
    let state = Arc::new(AppState {
        config: Arc::clone(&config),
        bundler: Arc::new(bundler),
    });

    let factory = RmcpSessionFactory::new(Arc::clone(&state), Arc::new(WidgetToolRegistry));
    let multiplexer = Arc::new(SessionMultiplexer::new(
        factory,
        config.sessions.idle_timeout(),
    ));

    // ── Start idle sweeper ──────────────────────────────
    let ct = CancellationToken::new();
    let sweeper_handle = sweeper::spawn_eviction_task(
        Arc::clone(&multiplexer),
        config.sessions.sweep_interval(),
        ct.clone(),
    );
    info!(
        idle_timeout_seconds = config.sessions.idle_timeout_seconds,
        sweep_interval_seconds = config.sessions.sweep_interval_seconds,
        "session sweeper started"
    );

    // ── Start HTTP endpoint ─────────────────────────────
    let bind: SocketAddr = format!("{}:{}", config.http.host, config.http.port)
        .parse()
        .map_err(|err| AppError::Config(format!("invalid http bind address: {err}")))?;
    let http_ct = ct.clone();
    let http_multiplexer = Arc::clone(&multiplexer);
    let http_handle = tokio::spawn(async move {
        if let Err(err) = serve_http(http_multiplexer, bind, http_ct).await {
            error!(%err, "http endpoint failed");
        }
    });

    info!("widget-relay ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    let closed = multiplexer.shutdown_all();
    let _ = tokio::join!(http_handle, sweeper_handle);
    info!(closed_sessions = closed, "widget-relay shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
