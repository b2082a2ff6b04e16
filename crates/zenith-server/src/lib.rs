//! Zenith server library logic.

pub mod api;
pub mod api_ws;
pub mod background;
pub mod config;
pub mod connections;
pub mod pipeline;
pub mod sessions;
pub mod store;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
    Extension, Router,
};
use connections::ConnectionTable;
use pipeline::Pipeline;
use sessions::{SessionLimits, SessionRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Maximum request body size for JSON endpoints (2 MiB).
const MAX_REQUEST_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Maximum request body size for audio uploads (26 MiB).
const MAX_UPLOAD_BODY_BYTES: usize = 26 * 1024 * 1024;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Turn pipeline with its gateways and store.
    pub pipeline: Pipeline,
    /// Real-time sessions keyed by WebSocket client id.
    pub sessions: SessionRegistry,
    /// Outbound queues of connected WebSocket clients.
    pub connections: ConnectionTable,
    pub session_limits: SessionLimits,
    /// Directory synthesized audio is written to and served from.
    pub audio_dir: PathBuf,
    /// Allowed CORS origins. Empty allows any origin.
    pub cors_origins: Vec<String>,
}

impl AppState {
    pub fn new(pipeline: Pipeline, audio_dir: impl Into<PathBuf>) -> Self {
        Self {
            pipeline,
            sessions: SessionRegistry::new(),
            connections: ConnectionTable::new(),
            session_limits: SessionLimits::default(),
            audio_dir: audio_dir.into(),
            cors_origins: Vec::new(),
        }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(allowed))
    }
}

/// Builds the application router.
pub fn app(state: AppState) -> Router {
    let voice_routes = Router::new()
        .route("/voice-chat", post(api::voice_chat_handler))
        .route(
            "/voice-chat-complete",
            post(api::voice_chat_complete_handler),
        )
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BODY_BYTES));

    let cors = cors_layer(&state.cors_origins);

    Router::new()
        .route("/", get(api::home_handler))
        .route("/health", get(api::health_handler))
        .route("/intro", get(api::intro_handler))
        .route(
            "/chat",
            post(api::chat_handler).layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES)),
        )
        .route("/audio/{filename}", get(api::serve_audio_handler))
        .merge(voice_routes)
        .route("/ws", get(api_ws::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
