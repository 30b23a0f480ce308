//! Session multiplexing over stateless HTTP calls.
//!
//! The [`SessionTransport`] and [`SessionFactory`] traits decouple the
//! multiplexer from the protocol server it fronts. The production
//! implementation lives in [`crate::mcp::transport`]; tests substitute
//! in-memory doubles.

pub mod model;
pub mod multiplexer;
pub mod sweeper;

use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;

pub use model::{InFlight, Session, SessionId, SessionState, SessionSummary};
pub use multiplexer::{Routed, SessionMultiplexer};

use crate::Result;

/// Outcome of delegating one inbound message to a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportReply {
    /// The message was a request; this is the protocol response body.
    Message(serde_json::Value),
    /// The message was a notification or response; nothing to return.
    Accepted,
}

/// Duplex channel between one HTTP-facing session and its protocol server.
pub trait SessionTransport: Send + Sync + 'static {
    /// Deliver one client message and wait for its reply, if any.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`](crate::AppError::Transport) if the
    /// channel is closed or the reply does not arrive in time.
    /// Returns [`AppError::Validation`](crate::AppError::Validation) if the
    /// message is not a JSON-RPC message.
    fn handle_request(
        &self,
        message: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<TransportReply>> + Send + '_>>;

    /// Close the channel. Idempotent.
    fn close(&self);

    /// Closure notification.
    ///
    /// The returned token is cancelled once the channel is closed, whether
    /// by [`close`](Self::close) or because the server side went away.
    fn closed(&self) -> CancellationToken;
}

/// Builds a registered, connected transport for a newly minted session.
pub trait SessionFactory: Send + Sync + 'static {
    /// Transport type produced by this factory.
    type Transport: SessionTransport;

    /// Construct a protocol server, run the tool registry against it,
    /// bind a transport to `session_id`, and connect the server to it.
    ///
    /// Registration must complete before the connect step so capability
    /// negotiation sees the full capability set.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`](crate::AppError::Transport) if any
    /// construction step fails.
    fn open(
        &self,
        session_id: &SessionId,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Transport>> + Send + '_>>;
}
