//! The conversation pipeline.
//!
//! One call to [`Pipeline::handle_turn`] takes a user utterance through:
//!
//! 1. session resolution (a new id is minted when none is given),
//! 2. transcription, for audio input,
//! 3. the user-turn append,
//! 4. context building from the most recent turns,
//! 5. reply generation,
//! 6. the assistant-turn append,
//! 7. speech synthesis, for [`PipelineMode::ReplyWithSpeech`].
//!
//! Writes are never rolled back. Once the user turn is appended it stays,
//! whatever happens to the later stages. A failed or slow reply degrades to
//! the configured fallback text instead of failing the request; a failed
//! transcription aborts before anything is written; a failed synthesis is
//! reported together with the reply that was already recorded.
//!
//! Turns on the same conversational session are serialized: a per-session
//! lock is held from the user append through the assistant append, so two
//! concurrent requests never interleave their turns.

use crate::config::Config;
use crate::store::{StoreError, TurnStore};
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tokio::time::{timeout, Instant};
use zenith_types::{Role, Turn};
use zenith_voice::{
    AudioClip, ChatMessage, Responder, SynthesizedAudio, Synthesizer, Transcriber,
};

/// What the user said, before transcription.
#[derive(Debug, Clone)]
pub enum TurnInput {
    Text(String),
    Audio(AudioClip),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineMode {
    /// Reply text only.
    #[default]
    Reply,
    /// Reply text plus a synthesized audio file.
    ReplyWithSpeech,
}

#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// Conversation to continue. `None` or blank starts a new one.
    pub session_id: Option<String>,
    pub input: TurnInput,
    pub mode: PipelineMode,
    /// Voice profile for synthesis. `None` uses the default voice.
    pub voice: Option<String>,
}

impl TurnRequest {
    pub fn text(session_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            session_id,
            input: TurnInput::Text(message.into()),
            mode: PipelineMode::Reply,
            voice: None,
        }
    }

    pub fn audio(session_id: Option<String>, clip: AudioClip) -> Self {
        Self {
            session_id,
            input: TurnInput::Audio(clip),
            mode: PipelineMode::Reply,
            voice: None,
        }
    }

    pub fn with_speech(mut self, voice: Option<String>) -> Self {
        self.mode = PipelineMode::ReplyWithSpeech;
        self.voice = voice;
        self
    }
}

fn round_secs(duration: Duration) -> f64 {
    (duration.as_secs_f64() * 100.0).round() / 100.0
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(round_secs(*duration))
}

fn serialize_opt_secs<S: Serializer>(
    duration: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match duration {
        Some(d) => serializer.serialize_some(&round_secs(*d)),
        None => serializer.serialize_none(),
    }
}

/// Wall time per stage. Serialized as seconds rounded to two decimals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StageTimings {
    #[serde(serialize_with = "serialize_opt_secs")]
    pub transcription: Option<Duration>,
    #[serde(serialize_with = "serialize_secs")]
    pub ai_generation: Duration,
    #[serde(serialize_with = "serialize_opt_secs")]
    pub tts: Option<Duration>,
    #[serde(serialize_with = "serialize_secs")]
    pub total: Duration,
}

#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub session_id: String,
    /// Present for audio input.
    pub transcribed_text: Option<String>,
    pub reply: String,
    /// `true` when `reply` is the fallback text.
    pub reply_degraded: bool,
    pub audio: Option<SynthesizedAudio>,
    /// Full session history, read after the assistant turn was appended.
    pub conversation: Vec<Turn>,
    pub timings: StageTimings,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Nothing was written.
    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),

    /// Nothing was written.
    #[error("transcription timed out after {}s", .0.as_secs())]
    TranscriptionTimedOut(Duration),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Both turns were recorded; `result` carries everything but the audio.
    #[error("speech synthesis failed: {reason}")]
    SynthesisFailed {
        result: Box<PipelineResult>,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// System prompt placed ahead of the history.
    pub persona: String,
    /// Most recent turns sent to the model.
    pub context_turns: usize,
    pub fallback_reply: String,
    pub intro_fallback: String,
    pub transcription_timeout: Duration,
    pub reply_timeout: Duration,
    pub synthesis_timeout: Duration,
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            persona: config.assistant.persona.clone(),
            context_turns: config.assistant.context_turns,
            fallback_reply: config.assistant.fallback_reply.clone(),
            intro_fallback: config.assistant.intro_fallback.clone(),
            transcription_timeout: config.timeouts.transcription(),
            reply_timeout: config.timeouts.reply(),
            synthesis_timeout: config.timeouts.synthesis(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// One async lock per conversational session.
#[derive(Debug, Clone, Default)]
struct SessionLocks {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl SessionLocks {
    async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            // An entry only the map refers to has no holder and no waiter.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(session_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    fn in_use(&self) -> usize {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.len()
    }
}

/// Sequences the gateways and the turn store for one request.
///
/// Cheap to clone; clones share gateways and session locks.
#[derive(Clone)]
pub struct Pipeline {
    store: TurnStore,
    transcriber: Arc<dyn Transcriber>,
    responder: Arc<dyn Responder>,
    synthesizer: Arc<dyn Synthesizer>,
    settings: Arc<PipelineSettings>,
    locks: SessionLocks,
}

impl Pipeline {
    pub fn new(
        store: TurnStore,
        transcriber: Arc<dyn Transcriber>,
        responder: Arc<dyn Responder>,
        synthesizer: Arc<dyn Synthesizer>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            transcriber,
            responder,
            synthesizer,
            settings: Arc::new(settings),
            locks: SessionLocks::default(),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Number of sessions with a turn in flight.
    pub fn sessions_in_flight(&self) -> usize {
        self.locks.in_use()
    }

    /// Runs one turn.
    ///
    /// # Errors
    ///
    /// See [`PipelineError`] for which stages abort and what has been
    /// recorded when they do.
    pub async fn handle_turn(
        &self,
        request: TurnRequest,
    ) -> Result<PipelineResult, PipelineError> {
        let started = Instant::now();
        let TurnRequest {
            session_id,
            input,
            mode,
            voice,
        } = request;

        match &input {
            TurnInput::Text(text) if text.trim().is_empty() => {
                return Err(PipelineError::InvalidInput(
                    "message is required".to_string(),
                ));
            }
            TurnInput::Audio(clip) if clip.is_empty() => {
                return Err(PipelineError::InvalidInput(
                    "No audio file provided".to_string(),
                ));
            }
            _ => {}
        }

        let session_id = match session_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => id,
            None => {
                let id = zenith_turns::new_session_id();
                tracing::info!(session_id = %id, "started new conversation");
                id
            }
        };

        let mut timings = StageTimings::default();

        let (user_text, transcribed_text) = match input {
            TurnInput::Text(text) => (text, None),
            TurnInput::Audio(clip) => {
                let stage = Instant::now();
                let text = self.transcribe(&session_id, &clip).await?;
                timings.transcription = Some(stage.elapsed());
                (text.clone(), Some(text))
            }
        };

        let session_guard = self.locks.acquire(&session_id).await;

        self.store.append(&session_id, Role::User, &user_text).await?;
        let history = self.store.history(&session_id).await?;
        let prompt = self.build_prompt(&history);

        let stage = Instant::now();
        let (reply, reply_degraded) = self.generate_reply(&session_id, &prompt).await;
        timings.ai_generation = stage.elapsed();

        self.store.append(&session_id, Role::Assistant, &reply).await?;
        let conversation = self.store.history(&session_id).await?;
        drop(session_guard);

        let mut result = PipelineResult {
            session_id,
            transcribed_text,
            reply,
            reply_degraded,
            audio: None,
            conversation,
            timings,
        };

        if mode == PipelineMode::ReplyWithSpeech {
            let stage = Instant::now();
            let outcome = self
                .synthesize(&result.session_id, &result.reply, voice.as_deref())
                .await;
            result.timings.tts = Some(stage.elapsed());

            match outcome {
                Ok(audio) => result.audio = Some(audio),
                Err(reason) => {
                    result.timings.total = started.elapsed();
                    return Err(PipelineError::SynthesisFailed {
                        result: Box::new(result),
                        reason,
                    });
                }
            }
        }

        result.timings.total = started.elapsed();

        tracing::info!(
            session_id = %result.session_id,
            turns = result.conversation.len(),
            degraded = result.reply_degraded,
            total_ms = result.timings.total.as_millis() as u64,
            "turn completed"
        );

        Ok(result)
    }

    /// System persona followed by the most recent turns, oldest first.
    ///
    /// `history` already ends with the user turn being answered.
    pub fn build_prompt(&self, history: &[Turn]) -> Vec<ChatMessage> {
        let context = zenith_turns::recent_turns(history, self.settings.context_turns);
        std::iter::once(ChatMessage::system(self.settings.persona.clone()))
            .chain(context.iter().map(ChatMessage::from))
            .collect()
    }

    /// A greeting for a new conversation. Never fails; falls back to the
    /// configured intro text.
    pub async fn introduce(&self, user_name: Option<&str>) -> String {
        let limit = self.settings.reply_timeout;
        match timeout(limit, self.responder.introduce(user_name)).await {
            Ok(Ok(greeting)) if !greeting.trim().is_empty() => greeting,
            Ok(Ok(_)) => {
                tracing::warn!("intro greeting was empty, using fallback");
                self.settings.intro_fallback.clone()
            }
            Ok(Err(e)) => {
                tracing::warn!("intro generation failed, using fallback: {}", e);
                self.settings.intro_fallback.clone()
            }
            Err(_) => {
                tracing::warn!(timeout_secs = limit.as_secs(), "intro generation timed out");
                self.settings.intro_fallback.clone()
            }
        }
    }

    async fn transcribe(
        &self,
        session_id: &str,
        clip: &AudioClip,
    ) -> Result<String, PipelineError> {
        let limit = self.settings.transcription_timeout;
        match timeout(limit, self.transcriber.transcribe(clip)).await {
            Ok(Ok(text)) => {
                let text = text.trim();
                if text.is_empty() {
                    tracing::warn!(
                        session_id = %session_id,
                        bytes = clip.bytes.len(),
                        "transcription was empty"
                    );
                    return Err(PipelineError::TranscriptionFailed(
                        "no speech recognized".to_string(),
                    ));
                }
                Ok(text.to_string())
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    session_id = %session_id,
                    bytes = clip.bytes.len(),
                    "transcription failed: {}",
                    e
                );
                Err(PipelineError::TranscriptionFailed(e.to_string()))
            }
            Err(_) => {
                tracing::warn!(
                    session_id = %session_id,
                    timeout_secs = limit.as_secs(),
                    "transcription timed out"
                );
                Err(PipelineError::TranscriptionTimedOut(limit))
            }
        }
    }

    /// Returns the reply and whether it is the fallback.
    async fn generate_reply(&self, session_id: &str, prompt: &[ChatMessage]) -> (String, bool) {
        let limit = self.settings.reply_timeout;
        match timeout(limit, self.responder.respond(prompt)).await {
            Ok(Ok(reply)) if !reply.trim().is_empty() => (reply.trim().to_string(), false),
            Ok(Ok(_)) => {
                tracing::warn!(session_id = %session_id, "reply was empty, using fallback");
                (self.settings.fallback_reply.clone(), true)
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    session_id = %session_id,
                    "reply generation failed, using fallback: {}",
                    e
                );
                (self.settings.fallback_reply.clone(), true)
            }
            Err(_) => {
                tracing::warn!(
                    session_id = %session_id,
                    timeout_secs = limit.as_secs(),
                    "reply generation timed out, using fallback"
                );
                (self.settings.fallback_reply.clone(), true)
            }
        }
    }

    async fn synthesize(
        &self,
        session_id: &str,
        text: &str,
        voice: Option<&str>,
    ) -> Result<SynthesizedAudio, String> {
        let limit = self.settings.synthesis_timeout;
        let audio = match timeout(limit, self.synthesizer.synthesize(text, voice)).await {
            Ok(Ok(audio)) => audio,
            Ok(Err(e)) => {
                tracing::error!(session_id = %session_id, "speech synthesis failed: {}", e);
                return Err(e.to_string());
            }
            Err(_) => {
                tracing::error!(
                    session_id = %session_id,
                    timeout_secs = limit.as_secs(),
                    "speech synthesis timed out"
                );
                return Err(format!("speech synthesis timed out after {}s", limit.as_secs()));
            }
        };

        // A handle is only useful if the file behind it can be served.
        match tokio::fs::metadata(&audio.path).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(audio),
            _ => {
                tracing::error!(
                    session_id = %session_id,
                    path = %audio.path.display(),
                    "synthesized audio file is missing or empty"
                );
                Err("synthesized audio file is missing or empty".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timings_serialize_as_rounded_seconds() {
        let timings = StageTimings {
            transcription: Some(Duration::from_millis(1234)),
            ai_generation: Duration::from_millis(2006),
            tts: None,
            total: Duration::from_millis(3999),
        };
        let json = serde_json::to_value(timings).expect("serialize");
        assert_eq!(json["transcription"], 1.23);
        assert_eq!(json["ai_generation"], 2.01);
        assert!(json["tts"].is_null());
        assert_eq!(json["total"], 4.0);
    }

    #[test]
    fn with_speech_switches_mode() {
        let request = TurnRequest::text(None, "hi").with_speech(Some("calm".to_string()));
        assert_eq!(request.mode, PipelineMode::ReplyWithSpeech);
        assert_eq!(request.voice.as_deref(), Some("calm"));
    }

    #[tokio::test]
    async fn session_locks_are_pruned_once_released() {
        let locks = SessionLocks::default();
        let guard = locks.acquire("a").await;
        assert_eq!(locks.in_use(), 1);
        drop(guard);
        assert_eq!(locks.in_use(), 0);
    }
}
