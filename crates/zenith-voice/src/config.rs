use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_CHAT_MODEL: &str = "llama-3.3-70b-versatile";
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-large-v3";

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_chat_model() -> String {
    DEFAULT_CHAT_MODEL.to_string()
}

fn default_transcription_model() -> String {
    DEFAULT_TRANSCRIPTION_MODEL.to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    150
}

fn default_top_p() -> f32 {
    0.9
}

fn default_request_timeout_secs() -> u64 {
    60
}

/// Connection settings for an OpenAI-compatible language/transcription provider.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,
    /// ISO-639-1 hint passed to the transcription model.
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    /// HTTP client timeout in seconds. Default: 60.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            chat_model: default_chat_model(),
            transcription_model: default_transcription_model(),
            language: default_language(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("chat_model", &self.chat_model)
            .field("transcription_model", &self.transcription_model)
            .field("language", &self.language)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("top_p", &self.top_p)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl ProviderConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Joins `path` onto the base URL without doubling slashes.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub(crate) fn http_client(&self) -> Result<reqwest::Client, crate::VoiceError> {
        reqwest::Client::builder()
            .timeout(self.request_timeout())
            .build()
            .map_err(crate::VoiceError::Http)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_api_key() {
        let config = ProviderConfig::new("gsk_secret");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("gsk_secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn endpoint_joins_cleanly() {
        let mut config = ProviderConfig::default();
        config.base_url = "http://localhost:9000/v1/".to_string();
        assert_eq!(
            config.endpoint("/chat/completions"),
            "http://localhost:9000/v1/chat/completions"
        );
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: ProviderConfig =
            serde_json::from_str(r#"{"api_key": "k"}"#).expect("deserialize");
        assert_eq!(config.chat_model, DEFAULT_CHAT_MODEL);
        assert_eq!(config.max_tokens, 150);
        assert!(config.has_api_key());
        assert!(!ProviderConfig::default().has_api_key());
    }
}
