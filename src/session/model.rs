//! Session model and lifecycle helpers.

use std::borrow::Borrow;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

/// Opaque, unguessable session identifier carried in the `mcp-session-id` header.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Mint a new random identifier (UUID v4, 122 random bits).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Lifecycle state of a multiplexed session.
///
/// `Creating → Active → Closing → Closed`; nothing leaves `Closed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Server and transport constructed, first request not yet answered.
    Creating,
    /// Routable; requests are delegated to the transport.
    Active,
    /// Removed from the registry, transport close in progress.
    Closing,
    /// Transport reported closure.
    Closed,
}

impl SessionState {
    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Creating, Self::Active)
                | (Self::Creating | Self::Active, Self::Closing)
                | (Self::Closing, Self::Closed)
        )
    }
}

#[derive(Debug)]
struct Lifecycle {
    state: SessionState,
    last_activity: Instant,
}

/// One client's protocol server/transport pair plus its bookkeeping.
///
/// The protocol server is owned by the transport's connection task, so
/// dropping or closing the transport tears both down together.
#[derive(Debug)]
pub struct Session<T> {
    id: SessionId,
    transport: T,
    created_at: DateTime<Utc>,
    lifecycle: Mutex<Lifecycle>,
    in_flight: AtomicUsize,
}

impl<T> Session<T> {
    /// Wrap a freshly connected transport in `Creating` state.
    #[must_use]
    pub fn new(id: SessionId, transport: T) -> Self {
        Self {
            id,
            transport,
            created_at: Utc::now(),
            lifecycle: Mutex::new(Lifecycle {
                state: SessionState::Creating,
                last_activity: Instant::now(),
            }),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Transport bound to this session.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Wall-clock creation time.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.lifecycle().state
    }

    /// Time of the most recent routed request.
    #[must_use]
    pub fn last_activity(&self) -> Instant {
        self.lifecycle().last_activity
    }

    /// Time elapsed since the most recent routed request.
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity())
    }

    /// Refresh `last_activity`.
    pub fn touch(&self, now: Instant) {
        self.lifecycle().last_activity = now;
    }

    /// Number of requests currently being handled by the transport.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Whether at least one request is being handled.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.in_flight() > 0
    }

    /// `Creating → Active`. Returns `false` if the session already started closing.
    pub fn activate(&self) -> bool {
        self.transition(SessionState::Active)
    }

    /// `Creating | Active → Closing`.
    ///
    /// Returns `true` for exactly one caller; that caller owns closing the transport.
    pub fn begin_close(&self) -> bool {
        self.transition(SessionState::Closing)
    }

    /// `Closing → Closed`.
    pub fn finish_close(&self) -> bool {
        self.transition(SessionState::Closed)
    }

    fn transition(&self, next: SessionState) -> bool {
        let mut lifecycle = self.lifecycle();
        if lifecycle.state.can_transition_to(next) {
            lifecycle.state = next;
            true
        } else {
            false
        }
    }

    fn lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Diagnostic view of this session.
    #[must_use]
    pub fn summary(&self, now: Instant) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            state: self.state(),
            created_at: self.created_at,
            idle_seconds: self.idle_for(now).as_secs(),
            in_flight: self.in_flight(),
        }
    }
}

/// Marks a request as in flight on a session for as long as it is held.
///
/// Dropping the guard (including when the inbound call is aborted)
/// releases the busy mark.
#[derive(Debug)]
pub struct InFlight<T> {
    session: Arc<Session<T>>,
}

impl<T> InFlight<T> {
    /// Mark one more request in flight on `session`.
    #[must_use]
    pub fn enter(session: Arc<Session<T>>) -> Self {
        session.in_flight.fetch_add(1, Ordering::AcqRel);
        Self { session }
    }

    /// Session the request is routed to.
    #[must_use]
    pub fn session(&self) -> &Arc<Session<T>> {
        &self.session
    }
}

impl<T> Drop for InFlight<T> {
    fn drop(&mut self) {
        self.session.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Serializable snapshot of a session for diagnostics.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionSummary {
    /// Session identifier.
    pub id: SessionId,
    /// Lifecycle state at snapshot time.
    pub state: SessionState,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Whole seconds since the last routed request.
    pub idle_seconds: u64,
    /// Requests in flight at snapshot time.
    pub in_flight: usize,
}
