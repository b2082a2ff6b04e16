//! Real-time session registry.
//!
//! Tracks at most one [`RealtimeSession`] per connected client. Entries are
//! created by `start_session`, and leave the registry on `end_session`, on
//! disconnect, or when the reaper finds them past their time budget. Terminal
//! states are reported to the caller and never stored.
//!
//! A single `std::sync::Mutex` guards the map. Every critical section is a
//! short map operation and none spans an `.await`, so the reaper can sweep
//! while connections start and end sessions.

use crate::config::SessionConfig;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use zenith_types::RealtimeStatus;

/// A live-audio interaction and its time budget.
#[derive(Debug, Clone)]
pub struct RealtimeSession {
    /// Connection identity that owns the session.
    pub client_id: String,
    /// Conversational session the live audio belongs to.
    pub db_session_id: String,
    pub duration_minutes: u32,
    /// Monotonic start, used for expiry.
    pub start_time: Instant,
    /// Wall-clock start, for reporting.
    pub started_at: DateTime<Utc>,
    pub status: RealtimeStatus,
    pub chunks_received: u64,
    pub bytes_received: u64,
}

impl RealtimeSession {
    /// The configured time budget.
    pub fn budget(&self) -> Duration {
        Duration::from_secs(u64::from(self.duration_minutes) * 60)
    }

    pub fn elapsed_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.start_time)
    }

    /// A session expires once strictly more than its budget has elapsed.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.elapsed_at(now) > self.budget()
    }
}

/// Returned by a successful start.
#[derive(Debug, Clone)]
pub struct SessionStarted {
    pub session: RealtimeSession,
    /// Conversational id of the session this start displaced, if any.
    pub replaced_session_id: Option<String>,
}

/// Acknowledgement of one inbound audio chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReceipt {
    pub db_session_id: String,
    pub chunks_received: u64,
}

/// Returned by a successful end.
#[derive(Debug, Clone)]
pub struct SessionEnded {
    pub db_session_id: String,
    pub elapsed: Duration,
    pub status: RealtimeStatus,
}

/// A session removed by the reaper.
#[derive(Debug, Clone)]
pub struct ExpiredSession {
    pub client_id: String,
    pub db_session_id: String,
    pub duration_minutes: u32,
    pub elapsed: Duration,
    pub status: RealtimeStatus,
}

/// Protocol misuse reported back to the client as an `error` event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("No active session found")]
    NoActiveSession,
    #[error("No active session to end")]
    NoActiveSessionToEnd,
}

/// Bounds on the duration a client may request, in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    pub default_minutes: u32,
    pub max_minutes: u32,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for SessionLimits {
    fn from(config: &SessionConfig) -> Self {
        Self {
            default_minutes: config.default_duration_minutes,
            max_minutes: config.max_duration_minutes,
        }
    }
}

/// Process-wide table of real-time sessions keyed by client id.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<String, RealtimeSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, RealtimeSession>> {
        // No operation leaves the map half-updated, so a poisoned lock is still usable.
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Acknowledges a new connection. The registry is not touched.
    pub fn on_connect(&self, client_id: &str) {
        tracing::debug!(client_id = %client_id, "client connected");
    }

    pub fn on_start(&self, client_id: &str, duration_minutes: u32) -> SessionStarted {
        self.on_start_at(client_id, duration_minutes, Instant::now())
    }

    /// Starts a session for `client_id`, minting a new conversational id.
    ///
    /// A session already held by the client is replaced; its conversational
    /// id is returned in [`SessionStarted::replaced_session_id`].
    pub fn on_start_at(
        &self,
        client_id: &str,
        duration_minutes: u32,
        now: Instant,
    ) -> SessionStarted {
        let session = RealtimeSession {
            client_id: client_id.to_string(),
            db_session_id: zenith_turns::new_session_id(),
            duration_minutes,
            start_time: now,
            started_at: Utc::now(),
            status: RealtimeStatus::Active,
            chunks_received: 0,
            bytes_received: 0,
        };

        let replaced = self.map().insert(client_id.to_string(), session.clone());

        let replaced_session_id = replaced.map(|old| {
            tracing::warn!(
                client_id = %client_id,
                replaced_session_id = %old.db_session_id,
                "start_session while a session was active; replacing it"
            );
            old.db_session_id
        });

        tracing::info!(
            client_id = %client_id,
            session_id = %session.db_session_id,
            duration_minutes,
            "realtime session started"
        );

        SessionStarted {
            session,
            replaced_session_id,
        }
    }

    /// Records an audio chunk against the client's active session.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NoActiveSession` if the client holds no
    /// session; nothing is mutated in that case.
    pub fn on_audio_chunk(
        &self,
        client_id: &str,
        len: usize,
    ) -> Result<ChunkReceipt, SessionError> {
        let mut map = self.map();
        let session = map
            .get_mut(client_id)
            .ok_or(SessionError::NoActiveSession)?;

        session.chunks_received += 1;
        session.bytes_received += len as u64;

        Ok(ChunkReceipt {
            db_session_id: session.db_session_id.clone(),
            chunks_received: session.chunks_received,
        })
    }

    pub fn on_end(&self, client_id: &str) -> Result<SessionEnded, SessionError> {
        self.on_end_at(client_id, Instant::now())
    }

    /// Ends the client's session and reports how long it ran.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NoActiveSessionToEnd` if the client holds no
    /// session; nothing is mutated in that case.
    pub fn on_end_at(&self, client_id: &str, now: Instant) -> Result<SessionEnded, SessionError> {
        let session = self
            .map()
            .remove(client_id)
            .ok_or(SessionError::NoActiveSessionToEnd)?;

        let elapsed = session.elapsed_at(now);
        tracing::info!(
            client_id = %client_id,
            session_id = %session.db_session_id,
            elapsed_secs = elapsed.as_secs_f64(),
            chunks = session.chunks_received,
            "realtime session ended"
        );

        Ok(SessionEnded {
            db_session_id: session.db_session_id,
            elapsed,
            status: RealtimeStatus::Ended,
        })
    }

    /// Drops whatever the client held. Idempotent.
    pub fn on_disconnect(&self, client_id: &str) -> Option<RealtimeSession> {
        let removed = self.map().remove(client_id);
        match &removed {
            Some(session) => tracing::info!(
                client_id = %client_id,
                session_id = %session.db_session_id,
                "cleaned up session for disconnected client"
            ),
            None => tracing::debug!(client_id = %client_id, "client disconnected"),
        }
        removed
    }

    pub fn sweep_expired(&self) -> Vec<ExpiredSession> {
        self.sweep_expired_at(Instant::now())
    }

    /// Removes and returns every session past its time budget at `now`.
    pub fn sweep_expired_at(&self, now: Instant) -> Vec<ExpiredSession> {
        let mut map = self.map();
        let expired_ids: Vec<String> = map
            .iter()
            .filter(|(_, session)| session.is_expired_at(now))
            .map(|(client_id, _)| client_id.clone())
            .collect();

        expired_ids
            .into_iter()
            .filter_map(|client_id| map.remove(&client_id))
            .map(|session| ExpiredSession {
                elapsed: session.elapsed_at(now),
                client_id: session.client_id,
                db_session_id: session.db_session_id,
                duration_minutes: session.duration_minutes,
                status: RealtimeStatus::Expired,
            })
            .collect()
    }

    pub fn get(&self, client_id: &str) -> Option<RealtimeSession> {
        self.map().get(client_id).cloned()
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.map().contains_key(client_id)
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }
}
