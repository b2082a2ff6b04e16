use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("provider returned no usable content")]
    EmptyResponse,

    #[error("STT error: {0}")]
    Stt(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("voice profile not found: {0}")]
    ProfileNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
