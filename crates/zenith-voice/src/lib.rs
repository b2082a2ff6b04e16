//! Speech and language gateways for Zenith.
//!
//! Every external service the assistant depends on sits behind one of three
//! traits defined in [`gateway`]:
//!
//! - [`Transcriber`]: audio bytes in, user text out.
//! - [`Responder`]: a bounded chat history in, the assistant's reply out.
//! - [`Synthesizer`]: reply text in, a playable audio file out.
//!
//! The conversation pipeline only ever sees these traits. Concrete providers
//! are chosen and constructed once at startup and handed to the pipeline, so
//! tests can swap in doubles without touching global state.
//!
//! Providers shipped here:
//!
//! - [`GroqTranscriber`] and [`ChatCompletionClient`] talk to an
//!   OpenAI-compatible HTTP API (Groq by default).
//! - [`WhisperCppTranscriber`] runs a local `whisper.cpp` binary.
//! - [`TtsService`] renders speech with `piper` or `espeak-ng`.

pub mod chat;
pub mod config;
pub mod error;
pub mod gateway;
pub mod stt;
pub mod tts;

pub use chat::ChatCompletionClient;
pub use config::ProviderConfig;
pub use error::VoiceError;
pub use gateway::{
    AudioClip, ChatMessage, ChatRole, Responder, SynthesizedAudio, Synthesizer, Transcriber,
};
pub use stt::{GroqTranscriber, WhisperCppTranscriber};
pub use tts::TtsService;
