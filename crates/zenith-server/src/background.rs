//! Background tasks for the Zenith server.
//!
//! Includes:
//! - Reaping real-time sessions that outlived their time budget.

use crate::api_ws::ServerEvent;
use crate::connections::ConnectionTable;
use crate::sessions::SessionRegistry;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};

/// Runs one sweep: evicts expired sessions and tells each client that is
/// still connected. Returns the number of evicted sessions.
pub async fn reap_expired_sessions(
    registry: &SessionRegistry,
    connections: &ConnectionTable,
) -> usize {
    let expired = registry.sweep_expired();

    for session in &expired {
        tracing::info!(
            client_id = %session.client_id,
            session_id = %session.db_session_id,
            duration_minutes = session.duration_minutes,
            elapsed_secs = session.elapsed.as_secs(),
            "auto-ending expired session"
        );

        let event = ServerEvent::SessionExpired {
            message: format!(
                "Voice session expired after {} minutes",
                session.duration_minutes
            ),
            duration: session.duration_minutes,
            session_id: session.db_session_id.clone(),
        };
        if let Some(json) = event.to_json() {
            if !connections.send(&session.client_id, json).await {
                tracing::debug!(
                    client_id = %session.client_id,
                    "expired session's client is no longer reachable"
                );
            }
        }
    }

    expired.len()
}

/// Starts the session reaper.
///
/// Sweeps the registry every `interval` until `shutdown` turns `true` or its
/// sender is dropped. An interval of zero disables the task.
pub async fn start_session_reaper(
    registry: SessionRegistry,
    connections: ConnectionTable,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    if interval.is_zero() {
        tracing::warn!("session reaper disabled (interval=0)");
        return;
    }

    tracing::info!(
        interval_secs = interval.as_secs(),
        "starting session reaper"
    );

    loop {
        tokio::select! {
            () = sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("session reaper stopped");
                    return;
                }
                continue;
            }
        }

        let evicted = reap_expired_sessions(&registry, &connections).await;
        if evicted > 0 {
            tracing::info!(
                count = evicted,
                remaining = registry.len(),
                "reaped expired sessions"
            );
        }
    }
}
