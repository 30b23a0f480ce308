//! HTTP boundary for the MCP endpoint.
//!
//! `POST /mcp` carries JSON-RPC bodies plus an optional `mcp-session-id`
//! header and is routed through the [`SessionMultiplexer`]. `GET /mcp` is
//! rejected, `DELETE /mcp` terminates a session, `GET /health` reports
//! liveness and the active session count.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::session::{SessionFactory, SessionMultiplexer, TransportReply};
use crate::{AppError, Result};

/// Header naming the session on requests and responses.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// JSON-RPC parse error code.
pub const PARSE_ERROR: i64 = -32700;

/// Code used for boundary-level rejections.
pub const SERVER_ERROR: i64 = -32000;

/// JSON-RPC error envelope with a null id.
#[must_use]
pub fn error_envelope(code: i64, message: &str, data: Option<Value>) -> Value {
    let mut error = json!({ "code": code, "message": message });
    if let Some(data) = data {
        error["data"] = data;
    }
    json!({ "jsonrpc": "2.0", "error": error, "id": null })
}

/// Build the MCP router around a shared multiplexer.
pub fn router<F: SessionFactory>(multiplexer: Arc<SessionMultiplexer<F>>) -> Router {
    Router::new()
        .route(
            "/mcp",
            post(handle_post::<F>)
                .get(handle_get)
                .delete(handle_delete::<F>),
        )
        .route("/health", get(health::<F>))
        .with_state(multiplexer)
}

fn session_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

async fn handle_post<F: SessionFactory>(
    State(multiplexer): State<Arc<SessionMultiplexer<F>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let message: Value = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(err) => {
            warn!(%err, "rejecting unparsable request body");
            return (
                StatusCode::BAD_REQUEST,
                Json(error_envelope(PARSE_ERROR, "Parse error", Some(json!(err.to_string())))),
            )
                .into_response();
        }
    };

    let presented = session_header(&headers);
    match multiplexer.handle_request(presented, message).await {
        Ok(routed) => {
            let mut response = match routed.reply {
                TransportReply::Message(reply) => (StatusCode::OK, Json(reply)).into_response(),
                TransportReply::Accepted => StatusCode::ACCEPTED.into_response(),
            };
            if let Ok(value) = HeaderValue::from_str(routed.session_id.as_str()) {
                response.headers_mut().insert(SESSION_HEADER, value);
            }
            response
        }
        Err(err) => {
            error!(%err, presented_session = presented, "mcp request failed");
            error_response(&err)
        }
    }
}

fn error_response(err: &AppError) -> Response {
    let (status, message) = match err {
        AppError::Validation(_) => (StatusCode::BAD_REQUEST, "Invalid request"),
        AppError::Transport(_) => (StatusCode::INTERNAL_SERVER_ERROR, "MCP session failed"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
    };
    (
        status,
        Json(error_envelope(
            err.rpc_code(),
            message,
            Some(json!(err.to_string())),
        )),
    )
        .into_response()
}

async fn handle_get() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(error_envelope(
            SERVER_ERROR,
            "Method not allowed. Use POST for MCP requests.",
            None,
        )),
    )
        .into_response()
}

async fn handle_delete<F: SessionFactory>(
    State(multiplexer): State<Arc<SessionMultiplexer<F>>>,
    headers: HeaderMap,
) -> Response {
    if let Some(session_id) = session_header(&headers) {
        let removed = multiplexer.terminate(session_id);
        info!(session_id, removed, "session termination requested");
    }
    Json(json!({
        "jsonrpc": "2.0",
        "result": { "message": "Session terminated" },
        "id": null,
    }))
    .into_response()
}

async fn health<F: SessionFactory>(
    State(multiplexer): State<Arc<SessionMultiplexer<F>>>,
) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "active_sessions": multiplexer.active_sessions(),
    }))
}

/// Serve the MCP endpoint on `bind` until `ct` fires.
///
/// # Errors
///
/// Returns `AppError::Config` if the listener cannot bind, or
/// `AppError::Io` if the server fails while running.
pub async fn serve_http<F: SessionFactory>(
    multiplexer: Arc<SessionMultiplexer<F>>,
    bind: SocketAddr,
    ct: CancellationToken,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind {bind}: {err}")))?;
    info!(%bind, "mcp endpoint listening");

    axum::serve(listener, router(multiplexer))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Io(format!("http server error: {err}")))?;

    info!("mcp endpoint shut down");
    Ok(())
}
