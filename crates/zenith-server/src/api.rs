//! HTTP handlers for the Zenith server.

use crate::pipeline::{PipelineError, PipelineResult, StageTimings, TurnRequest};
use crate::AppState;
use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::JsonRejection,
        Extension, Multipart, Path, Query,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use zenith_types::Turn;
use zenith_voice::AudioClip;

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
    /// A 500 whose body carries what was completed before the failure.
    #[error("internal server error: {message}")]
    PartialFailure { message: String, details: Value },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, details) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg, None),
            ApiError::PartialFailure { message, details } => {
                (StatusCode::INTERNAL_SERVER_ERROR, message, Some(details))
            }
        };

        let mut body = match details {
            Some(Value::Object(map)) => Value::Object(map),
            _ => json!({}),
        };
        body["error"] = Value::String(message);

        (status, Json(body)).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::InvalidInput(msg) => ApiError::BadRequest(msg),
            PipelineError::TranscriptionFailed(_) => {
                ApiError::InternalServerError("Failed to transcribe audio".to_string())
            }
            PipelineError::TranscriptionTimedOut(limit) => ApiError::InternalServerError(format!(
                "Transcription timed out after {} seconds",
                limit.as_secs()
            )),
            PipelineError::Storage(e) => {
                tracing::error!("conversation storage failed: {}", e);
                ApiError::InternalServerError("failed to record conversation".to_string())
            }
            PipelineError::SynthesisFailed { result, reason } => ApiError::PartialFailure {
                message: "Failed to generate speech".to_string(),
                details: json!({
                    "session_id": result.session_id,
                    "transcribed_text": result.transcribed_text,
                    "reply": result.reply,
                    "conversation": result.conversation,
                    "timing": result.timings,
                    "reason": reason,
                }),
            },
        }
    }
}

/// Request body for `POST /chat`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub reply: String,
    pub conversation: Vec<Turn>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VoiceChatResponse {
    pub session_id: String,
    pub transcribed_text: String,
    pub reply: String,
    pub conversation: Vec<Turn>,
}

#[derive(Debug, Serialize)]
pub struct VoiceChatCompleteResponse {
    pub session_id: String,
    pub transcribed_text: String,
    pub reply: String,
    pub conversation: Vec<Turn>,
    /// Server-side path of the synthesized file.
    pub audio_file: String,
    /// Where the client fetches the audio.
    pub audio_url: String,
    pub timing: StageTimings,
}

#[derive(Debug, Deserialize)]
pub struct IntroParams {
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IntroResponse {
    pub reply: String,
}

/// Health check handler.
pub async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "message": "Zenith Voice Assistant is running!"
    }))
}

/// Handler for `GET /`.
pub async fn home_handler() -> Json<Value> {
    Json(json!({
        "message": "Zenith Voice Assistant API",
        "status": "ready",
        "version": env!("CARGO_PKG_VERSION"),
        "features": ["text_chat", "voice_chat", "voice_chat_complete", "real_time_sessions"]
    }))
}

/// Handler for `GET /intro?name=`.
pub async fn intro_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<IntroParams>,
) -> Json<IntroResponse> {
    let reply = state.pipeline.introduce(params.name.as_deref()).await;
    Json(IntroResponse { reply })
}

/// Handler for `POST /chat`.
pub async fn chat_handler(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(payload) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let message = payload
        .message
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("message is required".to_string()))?;

    let result = state
        .pipeline
        .handle_turn(TurnRequest::text(payload.session_id, message))
        .await?;

    Ok(Json(ChatResponse {
        session_id: result.session_id,
        reply: result.reply,
        conversation: result.conversation,
    }))
}

/// Fields of a voice upload.
#[derive(Debug, Default)]
struct VoiceForm {
    audio: Option<AudioClip>,
    session_id: Option<String>,
    voice: Option<String>,
}

impl VoiceForm {
    fn into_request(self) -> Result<TurnRequest, ApiError> {
        let clip = self
            .audio
            .filter(|clip| !clip.is_empty())
            .ok_or_else(|| ApiError::BadRequest("No audio file provided".to_string()))?;
        Ok(TurnRequest::audio(self.session_id, clip))
    }
}

async fn read_voice_form(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<VoiceForm, ApiError> {
    let mut multipart = multipart
        .map_err(|e| ApiError::BadRequest(format!("No audio file provided: {}", e.body_text())))?;
    let mut form = VoiceForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "audio" => {
                let file_name = field.file_name().unwrap_or("audio.wav").to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("failed to read upload: {}", e)))?;

                let mut clip = AudioClip::new(data.to_vec(), file_name);
                if let Some(content_type) = content_type {
                    clip = clip.with_content_type(content_type);
                }
                form.audio = Some(clip);
            }
            "session_id" | "voice" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("failed to read {}: {}", name, e)))?;
                let value = Some(value.trim().to_string()).filter(|v| !v.is_empty());
                if name == "session_id" {
                    form.session_id = value;
                } else {
                    form.voice = value;
                }
            }
            other => {
                tracing::debug!(field = %other, "ignoring unknown form field");
            }
        }
    }

    Ok(form)
}

fn transcribed(result: &PipelineResult) -> String {
    result.transcribed_text.clone().unwrap_or_default()
}

/// Handler for `POST /voice-chat`.
pub async fn voice_chat_handler(
    Extension(state): Extension<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<VoiceChatResponse>, ApiError> {
    let request = read_voice_form(multipart).await?.into_request()?;
    let result = state.pipeline.handle_turn(request).await?;

    Ok(Json(VoiceChatResponse {
        transcribed_text: transcribed(&result),
        session_id: result.session_id,
        reply: result.reply,
        conversation: result.conversation,
    }))
}

/// Handler for `POST /voice-chat-complete`.
pub async fn voice_chat_complete_handler(
    Extension(state): Extension<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<VoiceChatCompleteResponse>, ApiError> {
    let form = read_voice_form(multipart).await?;
    let voice = form.voice.clone();
    let request = form.into_request()?.with_speech(voice);

    let result = state.pipeline.handle_turn(request).await?;
    let audio = result.audio.clone().ok_or_else(|| {
        tracing::error!(session_id = %result.session_id, "pipeline returned no audio");
        ApiError::InternalServerError("Failed to generate speech".to_string())
    })?;

    Ok(Json(VoiceChatCompleteResponse {
        transcribed_text: transcribed(&result),
        session_id: result.session_id,
        reply: result.reply,
        conversation: result.conversation,
        audio_file: audio.path.display().to_string(),
        audio_url: format!("/audio/{}", audio.file_name),
        timing: result.timings,
    }))
}

/// A bare file name: no separators, no parent references, not hidden.
fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
        && !name.contains("..")
}

fn audio_content_type(name: &str) -> &'static str {
    match name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "mp3" => "audio/mpeg",
        Some(ext) if ext == "wav" => "audio/wav",
        Some(ext) if ext == "ogg" => "audio/ogg",
        _ => "application/octet-stream",
    }
}

/// Handler for `GET /audio/{filename}`.
pub async fn serve_audio_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    if !is_safe_file_name(&filename) {
        tracing::warn!(filename = %filename, "rejected audio path");
        return Err(ApiError::NotFound("audio file not found".to_string()));
    }

    let path = state.audio_dir.join(&filename);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "audio file not found");
            return Err(ApiError::NotFound("audio file not found".to_string()));
        }
        Err(e) => {
            tracing::error!(path = %path.display(), "failed to read audio file: {}", e);
            return Err(ApiError::InternalServerError(
                "failed to read audio file".to_string(),
            ));
        }
    };

    Ok((
        [(header::CONTENT_TYPE, audio_content_type(&filename))],
        bytes,
    )
        .into_response())
}
