//! Idle-session sweeper.
//!
//! Runs as a background task calling
//! [`SessionMultiplexer::evict_idle_sessions`] on a fixed interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{SessionFactory, SessionMultiplexer};

/// Spawn the eviction background task.
///
/// The first sweep happens one `period` after spawning.
#[must_use]
pub fn spawn_eviction_task<F: SessionFactory>(
    multiplexer: Arc<SessionMultiplexer<F>>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("session sweeper shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let evicted = multiplexer.evict_idle_sessions();
                    let active = multiplexer.active_sessions();
                    if evicted > 0 {
                        info!(evicted, active_sessions = active, "idle sessions evicted");
                    } else {
                        debug!(active_sessions = active, "session sweep complete");
                    }
                }
            }
        }
    })
}
