//! WebSocket surface for real-time voice sessions.
//!
//! Every connection gets a fresh UUID `client_id`. Frames are JSON objects
//! tagged by `type`; binary frames are treated as raw audio chunks. Protocol
//! misuse is answered with an `error` event and the connection stays open.

use crate::connections::OUTBOUND_BUFFER;
use crate::sessions::{SessionError, SessionLimits, SessionRegistry};
use crate::AppState;
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        Extension, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Largest decoded audio chunk accepted (1 MiB).
pub const MAX_AUDIO_CHUNK_BYTES: usize = 1024 * 1024;

/// Largest frame accepted, leaving room for base64 overhead.
const MAX_FRAME_BYTES: usize = 2 * MAX_AUDIO_CHUNK_BYTES;

/// Incoming WebSocket message types.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    StartSession {
        /// Minutes. Defaults to the configured session length.
        #[serde(default)]
        duration: Option<f64>,
    },
    AudioChunk {
        /// Base64-encoded audio bytes.
        #[serde(default)]
        data: Option<String>,
    },
    EndSession {},
}

/// Outgoing WebSocket message types.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected {
        message: String,
        client_id: String,
    },
    SessionStarted {
        message: String,
        duration: u32,
        session_id: String,
        client_id: String,
        started_at: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        replaced_session_id: Option<String>,
    },
    AudioReceived {
        status: String,
        session_id: String,
        chunks_received: u64,
    },
    SessionEnded {
        message: String,
        /// Seconds the session ran.
        duration: f64,
        session_id: String,
    },
    SessionExpired {
        message: String,
        /// Configured length in minutes.
        duration: u32,
        session_id: String,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::error!("failed to serialize WebSocket event: {}", e);
                None
            }
        }
    }
}

impl From<SessionError> for ServerEvent {
    fn from(err: SessionError) -> Self {
        ServerEvent::error(err.to_string())
    }
}

/// `requested` as minutes, if it is a whole number within `1..=max`.
fn whole_minutes(requested: f64, max: u32) -> Option<u32> {
    let in_range = requested >= 1.0 && requested <= f64::from(max);
    (in_range && requested.fract() == 0.0).then_some(requested as u32)
}

/// Applies one client event to the registry and returns the reply event.
pub fn handle_client_event(
    registry: &SessionRegistry,
    limits: SessionLimits,
    client_id: &str,
    event: ClientEvent,
) -> ServerEvent {
    match event {
        ClientEvent::StartSession { duration } => {
            let duration = match duration {
                None => limits.default_minutes,
                Some(requested) => match whole_minutes(requested, limits.max_minutes) {
                    Some(minutes) => minutes,
                    None => {
                        return ServerEvent::error(format!(
                            "duration must be a whole number of minutes between 1 and {}",
                            limits.max_minutes
                        ));
                    }
                },
            };

            let started = registry.on_start(client_id, duration);
            ServerEvent::SessionStarted {
                message: format!("Voice session started for {} minutes", duration),
                duration,
                session_id: started.session.db_session_id,
                client_id: client_id.to_string(),
                started_at: started.session.started_at.to_rfc3339(),
                replaced_session_id: started.replaced_session_id,
            }
        }
        ClientEvent::AudioChunk { data } => {
            if !registry.contains(client_id) {
                return SessionError::NoActiveSession.into();
            }
            let len = match data {
                Some(encoded) => {
                    match base64::engine::general_purpose::STANDARD.decode(encoded) {
                        Ok(bytes) => bytes.len(),
                        Err(e) => {
                            return ServerEvent::error(format!("Error processing audio: {}", e));
                        }
                    }
                }
                None => 0,
            };
            handle_audio_bytes(registry, client_id, len)
        }
        ClientEvent::EndSession {} => match registry.on_end(client_id) {
            Ok(ended) => ServerEvent::SessionEnded {
                message: "Voice session ended".to_string(),
                duration: (ended.elapsed.as_secs_f64() * 100.0).round() / 100.0,
                session_id: ended.db_session_id,
            },
            Err(e) => e.into(),
        },
    }
}

/// Acknowledges `len` bytes of audio against the client's session.
pub fn handle_audio_bytes(registry: &SessionRegistry, client_id: &str, len: usize) -> ServerEvent {
    if len > MAX_AUDIO_CHUNK_BYTES {
        return ServerEvent::error(format!(
            "audio chunk exceeds maximum size of {} bytes",
            MAX_AUDIO_CHUNK_BYTES
        ));
    }

    match registry.on_audio_chunk(client_id, len) {
        Ok(receipt) => {
            tracing::debug!(
                client_id = %client_id,
                session_id = %receipt.db_session_id,
                bytes = len,
                "received audio chunk"
            );
            ServerEvent::AudioReceived {
                status: "processing".to_string(),
                session_id: receipt.db_session_id,
                chunks_received: receipt.chunks_received,
            }
        }
        Err(e) => e.into(),
    }
}

/// Queues an event on a connection's outbound channel.
fn send_event(tx: &mpsc::Sender<String>, event: &ServerEvent) {
    if let Some(json) = event.to_json() {
        if let Err(e) = tx.try_send(json) {
            tracing::warn!("failed to queue WebSocket event: {}", e);
        }
    }
}

/// WebSocket handler: `GET /ws`.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let client_id = Uuid::new_v4().to_string();
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);

    state.connections.add(client_id.clone(), tx.clone()).await;

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(AxumMessage::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    state.sessions.on_connect(&client_id);
    tracing::info!(client_id = %client_id, "websocket client connected");
    send_event(
        &tx,
        &ServerEvent::Connected {
            message: "Connected to Zenith voice session server".to_string(),
            client_id: client_id.clone(),
        },
    );

    while let Some(Ok(msg)) = receiver.next().await {
        let reply = match msg {
            AxumMessage::Text(text) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
                Ok(event) => {
                    handle_client_event(&state.sessions, state.session_limits, &client_id, event)
                }
                Err(e) => {
                    tracing::warn!(
                        client_id = %client_id,
                        "failed to parse incoming WebSocket message: {}",
                        e
                    );
                    ServerEvent::error("invalid message format")
                }
            },
            AxumMessage::Binary(bytes) => {
                handle_audio_bytes(&state.sessions, &client_id, bytes.len())
            }
            AxumMessage::Close(_) => break,
            _ => continue,
        };
        send_event(&tx, &reply);
    }

    state.sessions.on_disconnect(&client_id);
    state.connections.remove(&client_id).await;
    send_task.abort();
    tracing::info!(client_id = %client_id, "websocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_parse_from_tagged_json() {
        let start: ClientEvent =
            serde_json::from_str(r#"{"type":"start_session","duration":5}"#).expect("parse");
        match start {
            ClientEvent::StartSession { duration } => assert_eq!(duration, Some(5.0)),
            other => panic!("expected start_session, got {:?}", other),
        }

        let fractional: ClientEvent =
            serde_json::from_str(r#"{"type":"start_session","duration":1.5}"#).expect("parse");
        assert!(matches!(fractional, ClientEvent::StartSession { duration: Some(_) }));

        let default: ClientEvent =
            serde_json::from_str(r#"{"type":"start_session"}"#).expect("parse");
        assert!(matches!(default, ClientEvent::StartSession { duration: None }));

        let end: ClientEvent =
            serde_json::from_str(r#"{"type":"end_session","reason":"done"}"#).expect("parse");
        assert!(matches!(end, ClientEvent::EndSession {}));

        assert!(serde_json::from_str::<ClientEvent>(r#"{"type":"dance"}"#).is_err());
    }

    #[test]
    fn server_event_wraps_with_type_tag() {
        let json = serde_json::to_value(ServerEvent::error("boom")).expect("serialize");
        assert_eq!(json, serde_json::json!({"type": "error", "message": "boom"}));

        let json = serde_json::to_value(ServerEvent::AudioReceived {
            status: "processing".to_string(),
            session_id: "s".to_string(),
            chunks_received: 1,
        })
        .expect("serialize");
        assert_eq!(json["type"], "audio_received");
        assert_eq!(json["status"], "processing");
    }

    #[test]
    fn start_uses_default_duration() {
        let registry = SessionRegistry::new();
        let limits = SessionLimits::default();
        let event = handle_client_event(
            &registry,
            limits,
            "c1",
            ClientEvent::StartSession { duration: None },
        );

        match event {
            ServerEvent::SessionStarted {
                duration,
                client_id,
                replaced_session_id,
                ..
            } => {
                assert_eq!(duration, limits.default_minutes);
                assert_eq!(client_id, "c1");
                assert!(replaced_session_id.is_none());
            }
            other => panic!("expected session_started, got {:?}", other),
        }
        assert!(registry.contains("c1"));
    }

    #[test]
    fn out_of_range_duration_is_rejected() {
        let registry = SessionRegistry::new();
        let limits = SessionLimits {
            default_minutes: 30,
            max_minutes: 60,
        };
        for duration in [0.0, -3.0, 1.5, 61.0, f64::NAN] {
            let event = handle_client_event(
                &registry,
                limits,
                "c1",
                ClientEvent::StartSession {
                    duration: Some(duration),
                },
            );
            match event {
                ServerEvent::Error { message } => {
                    assert!(message.contains("between 1 and 60"), "got: {}", message)
                }
                other => panic!("expected error for {}, got {:?}", duration, other),
            }
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn audio_chunk_requires_session() {
        let registry = SessionRegistry::new();
        let event = handle_client_event(
            &registry,
            SessionLimits::default(),
            "c1",
            ClientEvent::AudioChunk {
                data: Some("AAAA".to_string()),
            },
        );
        assert_eq!(event, ServerEvent::error("No active session found"));
    }

    #[test]
    fn audio_chunk_decodes_base64() {
        let registry = SessionRegistry::new();
        registry.on_start("c1", 5);

        let event = handle_client_event(
            &registry,
            SessionLimits::default(),
            "c1",
            ClientEvent::AudioChunk {
                data: Some("AAECAw==".to_string()),
            },
        );
        assert!(matches!(
            event,
            ServerEvent::AudioReceived {
                chunks_received: 1,
                ..
            }
        ));
        assert_eq!(registry.get("c1").map(|s| s.bytes_received), Some(4));

        let bad = handle_client_event(
            &registry,
            SessionLimits::default(),
            "c1",
            ClientEvent::AudioChunk {
                data: Some("not base64!".to_string()),
            },
        );
        assert!(matches!(bad, ServerEvent::Error { .. }));
    }

    #[test]
    fn oversized_binary_chunk_is_rejected() {
        let registry = SessionRegistry::new();
        registry.on_start("c1", 5);

        let event = handle_audio_bytes(&registry, "c1", MAX_AUDIO_CHUNK_BYTES + 1);
        assert!(matches!(event, ServerEvent::Error { .. }));
        assert_eq!(registry.get("c1").map(|s| s.chunks_received), Some(0));
    }

    #[test]
    fn end_without_session_reports_error() {
        let registry = SessionRegistry::new();
        let event = handle_client_event(
            &registry,
            SessionLimits::default(),
            "c1",
            ClientEvent::EndSession {},
        );
        assert_eq!(event, ServerEvent::error("No active session to end"));
    }
}
