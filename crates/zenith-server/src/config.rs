//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;
use zenith_types::VoiceProfile;
use zenith_voice::ProviderConfig;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Language-model and hosted transcription provider.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Conversation behaviour.
    #[serde(default)]
    pub assistant: AssistantConfig,

    /// Speech input and output.
    #[serde(default)]
    pub speech: SpeechConfig,

    /// Upper bounds on each gateway call.
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Real-time session settings.
    #[serde(default)]
    pub sessions: SessionConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origins. Empty allows any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum pooled connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "zenith_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantConfig {
    /// System prompt sent ahead of every conversation.
    #[serde(default = "default_persona")]
    pub persona: String,

    /// How many of the most recent turns are sent to the model.
    #[serde(default = "default_context_turns")]
    pub context_turns: usize,

    /// Reply returned when the language model cannot be reached.
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,

    /// Greeting returned by `/intro` when the language model cannot be reached.
    #[serde(default = "default_intro_fallback")]
    pub intro_fallback: String,
}

/// Which transcription backend handles uploaded audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SttProvider {
    /// Hosted Whisper through the configured provider.
    #[default]
    Groq,
    /// A local `whisper.cpp` binary.
    WhisperCpp,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpeechConfig {
    #[serde(default)]
    pub stt_provider: SttProvider,

    #[serde(default = "default_whisper_binary")]
    pub whisper_binary: String,

    #[serde(default = "default_whisper_model")]
    pub whisper_model: String,

    /// Directory synthesized replies are written to and served from.
    #[serde(default = "default_audio_dir")]
    pub audio_dir: String,

    /// Directory voice model paths are resolved against.
    #[serde(default = "default_voices_dir")]
    pub voices_dir: String,

    #[serde(default = "default_piper_binary")]
    pub piper_binary: String,

    #[serde(default = "default_espeak_binary")]
    pub espeak_binary: String,

    /// Voice used when a request names none. Must match a profile id.
    #[serde(default)]
    pub default_voice: Option<String>,

    /// Extra voice profiles, registered next to the built-in default.
    #[serde(default)]
    pub voices: Vec<VoiceProfile>,
}

/// Gateway call limits, in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_transcription_timeout_secs")]
    pub transcription_secs: u64,

    #[serde(default = "default_reply_timeout_secs")]
    pub reply_secs: u64,

    #[serde(default = "default_synthesis_timeout_secs")]
    pub synthesis_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Seconds between reaper sweeps. 0 disables the reaper.
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,

    /// Duration used when `start_session` carries none.
    #[serde(default = "default_session_minutes")]
    pub default_duration_minutes: u32,

    /// Longest session a client may request.
    #[serde(default = "default_max_session_minutes")]
    pub max_duration_minutes: u32,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    5000
}

fn default_db_path() -> String {
    "zenith.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_persona() -> String {
    "You are Zenith, a warm, emotionally intelligent wellbeing companion. Listen closely, \
     reflect what you hear, keep replies short and conversational, and gently suggest \
     professional help when someone may be at risk."
        .to_string()
}

fn default_context_turns() -> usize {
    6
}

fn default_fallback_reply() -> String {
    "I'm having trouble connecting right now. Could you please try again?".to_string()
}

fn default_intro_fallback() -> String {
    "Hello! I'm Zenith, your wellbeing companion. I'm here to listen and support you. \
     How are you feeling today?"
        .to_string()
}

fn default_whisper_binary() -> String {
    "whisper-cli".to_string()
}

fn default_whisper_model() -> String {
    "models/ggml-base.en.bin".to_string()
}

fn default_audio_dir() -> String {
    "static/audio".to_string()
}

fn default_voices_dir() -> String {
    "assets/voices".to_string()
}

fn default_piper_binary() -> String {
    "piper".to_string()
}

fn default_espeak_binary() -> String {
    "espeak-ng".to_string()
}

fn default_transcription_timeout_secs() -> u64 {
    60
}

fn default_reply_timeout_secs() -> u64 {
    30
}

fn default_synthesis_timeout_secs() -> u64 {
    60
}

fn default_reaper_interval_secs() -> u64 {
    30
}

fn default_session_minutes() -> u32 {
    30
}

fn default_max_session_minutes() -> u32 {
    24 * 60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            persona: default_persona(),
            context_turns: default_context_turns(),
            fallback_reply: default_fallback_reply(),
            intro_fallback: default_intro_fallback(),
        }
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            stt_provider: SttProvider::default(),
            whisper_binary: default_whisper_binary(),
            whisper_model: default_whisper_model(),
            audio_dir: default_audio_dir(),
            voices_dir: default_voices_dir(),
            piper_binary: default_piper_binary(),
            espeak_binary: default_espeak_binary(),
            default_voice: None,
            voices: Vec::new(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            transcription_secs: default_transcription_timeout_secs(),
            reply_secs: default_reply_timeout_secs(),
            synthesis_secs: default_synthesis_timeout_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn transcription(&self) -> Duration {
        Duration::from_secs(self.transcription_secs)
    }

    pub fn reply(&self) -> Duration {
        Duration::from_secs(self.reply_secs)
    }

    pub fn synthesis(&self) -> Duration {
        Duration::from_secs(self.synthesis_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reaper_interval_secs: default_reaper_interval_secs(),
            default_duration_minutes: default_session_minutes(),
            max_duration_minutes: default_max_session_minutes(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// No provider credential was supplied.
    #[error("GROQ_API_KEY is not set; export it or add it to .env before starting the server")]
    MissingApiKey,

    /// A value is present but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Checks the settings the server cannot start without.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingApiKey` when the hosted provider is in use
    /// and no key is configured, or `ConfigError::Invalid` for unusable values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // The chat gateway always needs the key, whichever transcriber is chosen.
        if !self.provider.has_api_key() {
            return Err(ConfigError::MissingApiKey);
        }
        if self.assistant.context_turns == 0 {
            return Err(ConfigError::Invalid(
                "assistant.context_turns must be at least 1".to_string(),
            ));
        }
        if self.sessions.default_duration_minutes == 0
            || self.sessions.default_duration_minutes > self.sessions.max_duration_minutes
        {
            return Err(ConfigError::Invalid(format!(
                "sessions.default_duration_minutes must be between 1 and {}",
                self.sessions.max_duration_minutes
            )));
        }
        Ok(())
    }
}

/// Parses configuration from TOML text, with defaults for missing fields.
///
/// # Errors
///
/// Returns `ConfigError::Parse` if the text is not valid configuration.
pub fn parse_config(contents: &str) -> Result<Config, ConfigError> {
    Ok(toml::from_str(contents)?)
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `ZENITH_HOST` overrides `server.host`
/// - `ZENITH_PORT` overrides `server.port`
/// - `ZENITH_DB_PATH` overrides `database.path`
/// - `ZENITH_LOG_LEVEL` overrides `logging.level`
/// - `ZENITH_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `ZENITH_AUDIO_DIR` overrides `speech.audio_dir`
/// - `GROQ_API_KEY` overrides `provider.api_key`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => parse_config(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    // Environment variable overrides
    if let Ok(host) = std::env::var("ZENITH_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("ZENITH_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(db_path) = std::env::var("ZENITH_DB_PATH") {
        config.database.path = db_path;
    }
    if let Ok(level) = std::env::var("ZENITH_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("ZENITH_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Ok(audio_dir) = std::env::var("ZENITH_AUDIO_DIR") {
        config.speech.audio_dir = audio_dir;
    }
    if let Ok(key) = std::env::var("GROQ_API_KEY") {
        if !key.trim().is_empty() {
            config.provider.api_key = key;
        }
    }

    Ok(config)
}
