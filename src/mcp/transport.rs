//! In-memory transport between one HTTP-facing session and its MCP server.
//!
//! Each session runs a [`WidgetServer`] over a `tokio::io::duplex` byte
//! stream using rmcp's line-delimited JSON-RPC framing, the same as stdio.
//! [`DuplexTransport`] owns the client half: it writes inbound messages and
//! a reader task routes server responses back to the waiting HTTP call by
//! JSON-RPC id. Server-initiated messages with no waiting call are dropped.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use rmcp::service::ServiceExt;
use serde_json::Value;
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::oneshot;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::codec::JsonLineCodec;
use super::handler::{AppState, ToolRegistry, WidgetServer};
use crate::session::{SessionFactory, SessionId, SessionTransport, TransportReply};
use crate::{AppError, Result};

/// Capacity of each direction of the in-memory pipe.
const DUPLEX_BUFFER_BYTES: usize = 256 * 1024;

type PendingReplies = Arc<Mutex<HashMap<String, oneshot::Sender<Value>>>>;

/// Client half of a session's in-memory channel.
pub struct DuplexTransport {
    session_id: SessionId,
    writer: tokio::sync::Mutex<WriteHalf<DuplexStream>>,
    pending: PendingReplies,
    closed: CancellationToken,
    request_timeout: Duration,
}

impl DuplexTransport {
    /// Connect `server` to a fresh channel and start serving it.
    ///
    /// The server performs capability negotiation on the first request
    /// written to the returned transport, so every tool and resource must
    /// already be registered on `server`.
    #[must_use]
    pub fn connect(session_id: SessionId, server: WidgetServer, request_timeout: Duration) -> Self {
        let (client_end, server_end) = tokio::io::duplex(DUPLEX_BUFFER_BYTES);
        let (client_read, client_write) = tokio::io::split(client_end);
        let closed = CancellationToken::new();
        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(run_server(
            session_id.clone(),
            server,
            server_end,
            closed.clone(),
        ));
        tokio::spawn(run_reader(
            session_id.clone(),
            client_read,
            Arc::clone(&pending),
            closed.clone(),
        ));

        Self {
            session_id,
            writer: tokio::sync::Mutex::new(client_write),
            pending,
            closed,
            request_timeout,
        }
    }

    /// Session this transport is bound to.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    async fn write_message(&self, message: &Value) -> Result<()> {
        let mut bytes = serde_json::to_vec(message)
            .map_err(|err| AppError::Transport(format!("failed to serialize message: {err}")))?;
        bytes.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&bytes).await.map_err(|err| {
            warn!(session_id = %self.session_id, %err, "write to mcp server failed");
            AppError::Transport(format!("session channel closed: {err}"))
        })?;
        writer
            .flush()
            .await
            .map_err(|err| AppError::Transport(format!("session channel closed: {err}")))
    }

    async fn request(&self, key: String, message: Value) -> Result<TransportReply> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if pending.contains_key(&key) {
                return Err(AppError::Validation(format!(
                    "request id {key} is already in flight"
                )));
            }
            pending.insert(key.clone(), tx);
        }
        let _pending = PendingGuard {
            pending: &self.pending,
            key: &key,
        };

        self.write_message(&message).await?;

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => Ok(TransportReply::Message(reply)),
            Ok(Err(_)) => Err(AppError::Transport(format!(
                "session {} closed before answering request {key}",
                self.session_id
            ))),
            Err(_) => Err(AppError::Transport(format!(
                "request {key} timed out after {}s",
                self.request_timeout.as_secs()
            ))),
        }
    }
}

impl SessionTransport for DuplexTransport {
    fn handle_request(
        &self,
        message: Value,
    ) -> Pin<Box<dyn Future<Output = Result<TransportReply>> + Send + '_>> {
        Box::pin(async move {
            if self.closed.is_cancelled() {
                return Err(AppError::Transport(format!(
                    "session {} is closed",
                    self.session_id
                )));
            }

            // Requests carry both a method and an id; anything else is fire-and-forget.
            let request_key = match &message {
                Value::Object(fields) => fields
                    .get("method")
                    .and(fields.get("id"))
                    .map(Value::to_string),
                _ => {
                    return Err(AppError::Validation(
                        "expected a single JSON-RPC message object; batches are not supported"
                            .into(),
                    ))
                }
            };

            match request_key {
                Some(key) => self.request(key, message).await,
                None => {
                    self.write_message(&message).await?;
                    Ok(TransportReply::Accepted)
                }
            }
        })
    }

    fn close(&self) {
        if !self.closed.is_cancelled() {
            debug!(session_id = %self.session_id, "closing session transport");
        }
        self.closed.cancel();
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }
}

/// Drops a pending reply slot when the waiting call finishes or is cancelled.
struct PendingGuard<'a> {
    pending: &'a Mutex<HashMap<String, oneshot::Sender<Value>>>,
    key: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(self.key);
    }
}

/// Serve `server` over the server half of the pipe until it quits or the
/// session is closed, then signal closure.
async fn run_server(
    session_id: SessionId,
    server: WidgetServer,
    stream: DuplexStream,
    closed: CancellationToken,
) {
    match server
        .serve_with_ct(tokio::io::split(stream), closed.child_token())
        .await
    {
        Ok(service) => match service.waiting().await {
            Ok(reason) => debug!(%session_id, ?reason, "mcp server stopped"),
            Err(err) => warn!(%session_id, %err, "mcp server task failed"),
        },
        Err(err) => warn!(%session_id, %err, "mcp initialization failed"),
    }
    closed.cancel();
}

/// Route server responses to waiting calls until EOF or closure.
async fn run_reader(
    session_id: SessionId,
    stream: ReadHalf<DuplexStream>,
    pending: PendingReplies,
    closed: CancellationToken,
) {
    let mut framed = FramedRead::new(stream, JsonLineCodec::new());

    loop {
        tokio::select! {
            biased;

            () = closed.cancelled() => break,

            item = framed.next() => match item {
                None => {
                    debug!(%session_id, "mcp server stream ended");
                    break;
                }
                Some(Err(AppError::Transport(msg))) => {
                    warn!(%session_id, error = msg.as_str(), "oversized frame skipped");
                }
                Some(Err(err)) => {
                    warn!(%session_id, %err, "mcp server stream failed");
                    break;
                }
                Some(Ok(line)) => deliver(&session_id, &pending, &line),
            },
        }
    }

    // Wake every waiting call; their receivers observe the closed channel.
    pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
    closed.cancel();
}

fn deliver(session_id: &SessionId, pending: &PendingReplies, line: &str) {
    if line.trim().is_empty() {
        return;
    }
    let message: Value = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(err) => {
            warn!(%session_id, %err, "malformed frame from mcp server");
            return;
        }
    };

    let is_response = message.get("method").is_none()
        && (message.get("result").is_some() || message.get("error").is_some());
    let Some(id) = message.get("id").filter(|_| is_response) else {
        debug!(%session_id, "server-initiated message dropped");
        return;
    };

    let waiter = pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&id.to_string());
    match waiter {
        Some(tx) => {
            if tx.send(message).is_err() {
                debug!(%session_id, "response arrived after the caller went away");
            }
        }
        None => debug!(%session_id, %id, "response without a waiting call dropped"),
    }
}

/// Builds one registered, connected [`WidgetServer`] per session.
pub struct RmcpSessionFactory {
    state: Arc<AppState>,
    registry: Arc<dyn ToolRegistry>,
    request_timeout: Duration,
}

impl RmcpSessionFactory {
    /// Create a factory sharing `state` across sessions.
    #[must_use]
    pub fn new(state: Arc<AppState>, registry: Arc<dyn ToolRegistry>) -> Self {
        let request_timeout = state.config.sessions.request_timeout();
        Self {
            state,
            registry,
            request_timeout,
        }
    }
}

impl SessionFactory for RmcpSessionFactory {
    type Transport = DuplexTransport;

    fn open(
        &self,
        session_id: &SessionId,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Transport>> + Send + '_>> {
        let session_id = session_id.clone();
        Box::pin(async move {
            let mut server = WidgetServer::new(Arc::clone(&self.state));
            self.registry.register(&mut server).map_err(|err| {
                AppError::Transport(format!("tool registration failed: {err}"))
            })?;

            info!(
                %session_id,
                tools = server.tools().len(),
                resources = server.widgets().len(),
                "mcp server registered; connecting"
            );
            Ok(DuplexTransport::connect(
                session_id,
                server,
                self.request_timeout,
            ))
        })
    }
}
