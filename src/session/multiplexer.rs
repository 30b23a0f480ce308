//! Session registry and request routing.
//!
//! Owns the `session id → (server, transport)` map. Every inbound call
//! either resolves a live session or creates one; idle sessions are
//! reclaimed by [`SessionMultiplexer::evict_idle_sessions`].
//!
//! Creation for a presented-but-unknown id is serialized per id: callers
//! racing on the same id share a single creation and are all routed to
//! the resulting session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, Instrument};

use super::model::{InFlight, Session, SessionId, SessionState, SessionSummary};
use super::{SessionFactory, SessionTransport, TransportReply};
use crate::{AppError, Result};

/// Result of routing one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Routed {
    /// Session that handled the message; echoed in the response header.
    pub session_id: SessionId,
    /// Reply produced by the session's transport.
    pub reply: TransportReply,
    /// Whether the session was created by this call.
    pub created: bool,
}

type CreationSlot = Arc<OnceCell<SessionId>>;

struct Registry<T> {
    live: HashMap<SessionId, Arc<Session<T>>>,
    /// Stale ids presented by clients, mapped to the session created for them.
    aliases: HashMap<String, SessionId>,
    creating: HashMap<String, CreationSlot>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            live: HashMap::new(),
            aliases: HashMap::new(),
            creating: HashMap::new(),
        }
    }
}

impl<T> Registry<T> {
    fn resolve(&self, key: &str) -> Option<&Arc<Session<T>>> {
        self.live.get(key).or_else(|| {
            self.aliases
                .get(key)
                .and_then(|id| self.live.get(id.as_str()))
        })
    }

    fn remove(&mut self, id: &SessionId) -> Option<Arc<Session<T>>> {
        let removed = self.live.remove(id.as_str());
        if removed.is_some() {
            self.aliases.retain(|_, target| target != id);
        }
        removed
    }

    fn remove_if_current(&mut self, session: &Arc<Session<T>>) -> bool {
        let current = self
            .live
            .get(session.id().as_str())
            .is_some_and(|entry| Arc::ptr_eq(entry, session));
        if current {
            self.remove(session.id());
        }
        current
    }
}

fn lock<T>(registry: &Mutex<Registry<T>>) -> MutexGuard<'_, Registry<T>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-wide session multiplexer.
///
/// Construct one instance at startup and share it (behind an `Arc`) with
/// every request-handling task.
pub struct SessionMultiplexer<F: SessionFactory> {
    factory: F,
    registry: Arc<Mutex<Registry<F::Transport>>>,
    idle_timeout: Duration,
}

impl<F: SessionFactory> SessionMultiplexer<F> {
    /// Create an empty multiplexer.
    #[must_use]
    pub fn new(factory: F, idle_timeout: Duration) -> Self {
        Self {
            factory,
            registry: Arc::new(Mutex::new(Registry::default())),
            idle_timeout,
        }
    }

    /// Idle threshold used by [`evict_idle_sessions`](Self::evict_idle_sessions).
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Number of live sessions.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        lock(&self.registry).live.len()
    }

    /// Whether `id` names a live session (directly or through an alias).
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        lock(&self.registry).resolve(id).is_some()
    }

    /// Diagnostic snapshot of every live session.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SessionSummary> {
        let now = Instant::now();
        let mut sessions: Vec<SessionSummary> = lock(&self.registry)
            .live
            .values()
            .map(|session| session.summary(now))
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    /// Route one inbound message.
    ///
    /// A `presented_id` naming a live session is delegated to that
    /// session's transport. Otherwise a new session is created and the
    /// message becomes its first request.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if session creation fails (the partial
    /// entry is rolled back) or the transport cannot deliver the message.
    pub async fn handle_request(&self, presented_id: Option<&str>, message: Value) -> Result<Routed> {
        if let Some(guard) = self.checkout(presented_id) {
            return self.dispatch(guard, message, false).await;
        }

        match presented_id {
            Some(key) => {
                debug!(presented_id = key, "unknown session id; creating replacement");
                self.create_for_key(key, message).await
            }
            None => self.create_and_dispatch(message).await,
        }
    }

    /// Close and remove every session idle for longer than the idle threshold.
    ///
    /// Sessions with a request in flight are skipped and reconsidered on
    /// the next sweep. Returns the number of sessions evicted.
    pub fn evict_idle_sessions(&self) -> usize {
        let now = Instant::now();
        let evicted: Vec<Arc<Session<F::Transport>>> = {
            let mut registry = lock(&self.registry);
            let idle: Vec<SessionId> = registry
                .live
                .values()
                .filter(|session| {
                    session.state() == SessionState::Active
                        && !session.is_busy()
                        && session.idle_for(now) > self.idle_timeout
                })
                .map(|session| session.id().clone())
                .collect();
            idle.iter().filter_map(|id| registry.remove(id)).collect()
        };

        for session in &evicted {
            info!(
                session_id = %session.id(),
                idle_seconds = session.idle_for(now).as_secs(),
                "evicting idle session"
            );
            Self::close_session(session);
        }
        evicted.len()
    }

    /// Explicitly close a session. Unknown ids are a no-op.
    ///
    /// Returns `true` if a live session was removed.
    pub fn terminate(&self, id: &str) -> bool {
        let removed = {
            let mut registry = lock(&self.registry);
            let target = registry.resolve(id).map(|session| session.id().clone());
            target.and_then(|target| registry.remove(&target))
        };

        match removed {
            Some(session) => {
                info!(session_id = %session.id(), "session terminated by client");
                Self::close_session(&session);
                true
            }
            None => {
                debug!(session_id = id, "terminate for unknown session ignored");
                false
            }
        }
    }

    /// Close every session; used on process shutdown.
    pub fn shutdown_all(&self) -> usize {
        let drained: Vec<Arc<Session<F::Transport>>> = {
            let mut registry = lock(&self.registry);
            registry.aliases.clear();
            registry.live.drain().map(|(_, session)| session).collect()
        };
        info!(count = drained.len(), "closing all sessions");
        for session in &drained {
            Self::close_session(session);
        }
        drained.len()
    }

    fn close_session(session: &Session<F::Transport>) {
        if session.begin_close() {
            session.transport().close();
        }
    }

    fn checkout(&self, presented_id: Option<&str>) -> Option<InFlight<F::Transport>> {
        let key = presented_id?;
        let registry = lock(&self.registry);
        let session = registry.resolve(key)?;
        if session.state() != SessionState::Active {
            return None;
        }
        session.touch(Instant::now());
        Some(InFlight::enter(Arc::clone(session)))
    }

    async fn dispatch(
        &self,
        guard: InFlight<F::Transport>,
        message: Value,
        created: bool,
    ) -> Result<Routed> {
        let session = guard.session();
        let reply = session.transport().handle_request(message).await?;
        session.touch(Instant::now());
        Ok(Routed {
            session_id: session.id().clone(),
            reply,
            created,
        })
    }

    async fn create_for_key(&self, key: &str, message: Value) -> Result<Routed> {
        let slot = {
            let mut registry = lock(&self.registry);
            Arc::clone(registry.creating.entry(key.to_owned()).or_default())
        };

        let mut first = None;
        let outcome = {
            let first = &mut first;
            let message = &message;
            slot.get_or_try_init(|| async move {
                let routed = self.create_and_dispatch(message.clone()).await?;
                let session_id = routed.session_id.clone();
                *first = Some(routed);
                Ok::<_, AppError>(session_id)
            })
            .await
            .cloned()
        };
        self.release_creation_slot(key, &slot, outcome.as_ref().ok());

        let session_id = outcome?;
        if let Some(routed) = first {
            return Ok(routed);
        }

        // Another caller created the session for this key; join it.
        match self.checkout(Some(session_id.as_str())) {
            Some(guard) => self.dispatch(guard, message, false).await,
            None => self.create_and_dispatch(message).await,
        }
    }

    fn release_creation_slot(&self, key: &str, slot: &CreationSlot, created: Option<&SessionId>) {
        let mut registry = lock(&self.registry);
        if registry
            .creating
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            registry.creating.remove(key);
        }
        if let Some(session_id) = created {
            if registry.live.contains_key(session_id.as_str()) {
                registry.aliases.insert(key.to_owned(), session_id.clone());
            }
        }
    }

    async fn create_and_dispatch(&self, message: Value) -> Result<Routed> {
        let session_id = SessionId::generate();
        let span = info_span!("create_session", session_id = %session_id);

        async move {
            let transport = self.factory.open(&session_id).await.map_err(|err| {
                error!(%err, "session construction failed");
                err
            })?;

            let session = Arc::new(Session::new(session_id.clone(), transport));
            lock(&self.registry)
                .live
                .insert(session_id.clone(), Arc::clone(&session));
            self.watch_closure(&session);

            let rollback = CreationRollback {
                registry: &self.registry,
                session: Some(Arc::clone(&session)),
            };

            let routed = match self
                .dispatch(InFlight::enter(Arc::clone(&session)), message, true)
                .await
            {
                Ok(routed) => routed,
                Err(err) => {
                    error!(%err, "session initialization failed; rolling back");
                    return Err(err);
                }
            };

            if !session.activate() {
                return Err(AppError::Transport(format!(
                    "session {session_id} closed during initialization"
                )));
            }
            rollback.disarm();

            info!(active_sessions = self.active_sessions(), "session created");
            Ok(routed)
        }
        .instrument(span)
        .await
    }

    /// Subscribe to the transport's closure notification and drop the
    /// registry entry when it fires.
    fn watch_closure(&self, session: &Arc<Session<F::Transport>>) {
        let closed = session.transport().closed();
        let registry = Arc::clone(&self.registry);
        let session = Arc::clone(session);

        tokio::spawn(async move {
            closed.cancelled().await;
            let removed = lock(&registry).remove_if_current(&session);
            session.begin_close();
            session.finish_close();
            if removed {
                info!(session_id = %session.id(), "transport closed; session removed");
            } else {
                debug!(session_id = %session.id(), "transport closed");
            }
        });
    }
}

/// Removes and closes a half-initialized session unless disarmed.
///
/// Also fires when the creating call is cancelled mid-flight (the inbound
/// connection aborted), so the session is still reclaimed.
struct CreationRollback<'a, T: SessionTransport> {
    registry: &'a Mutex<Registry<T>>,
    session: Option<Arc<Session<T>>>,
}

impl<T: SessionTransport> CreationRollback<'_, T> {
    fn disarm(mut self) {
        self.session = None;
    }
}

impl<T: SessionTransport> Drop for CreationRollback<'_, T> {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        lock(self.registry).remove_if_current(&session);
        if session.begin_close() {
            session.transport().close();
        }
        info!(session_id = %session.id(), "half-initialized session discarded");
    }
}
