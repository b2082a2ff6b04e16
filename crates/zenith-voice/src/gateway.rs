//! Gateway traits and the values that cross them.

use crate::error::VoiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use zenith_types::{Role, Turn};

/// A recorded utterance as uploaded by the client.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    /// Original file name; providers use the extension to sniff the format.
    pub file_name: String,
    pub content_type: Option<String>,
}

impl AudioClip {
    pub fn new(bytes: Vec<u8>, file_name: impl Into<String>) -> Self {
        Self {
            bytes,
            file_name: file_name.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Speaker of a chat-completion message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message of a chat-completion request, in the OpenAI wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

impl From<&Turn> for ChatMessage {
    fn from(turn: &Turn) -> Self {
        match turn.role {
            Role::User => ChatMessage::user(turn.message.clone()),
            Role::Assistant => ChatMessage::assistant(turn.message.clone()),
        }
    }
}

/// A synthesized reply on disk, ready to be served to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedAudio {
    pub path: PathBuf,
    pub file_name: String,
}

/// Speech-to-text provider.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Returns the transcribed text, trimmed. An empty string means the
    /// provider heard nothing usable.
    async fn transcribe(&self, clip: &AudioClip) -> Result<String, VoiceError>;
}

/// Chat-completion provider.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Generates the assistant's next message for the given history.
    async fn respond(&self, messages: &[ChatMessage]) -> Result<String, VoiceError>;

    /// Generates a short greeting that opens a new conversation.
    async fn introduce(&self, user_name: Option<&str>) -> Result<String, VoiceError>;
}

/// Text-to-speech provider.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Renders `text` to an audio file. `voice` selects a named voice; `None`
    /// uses the provider default.
    async fn synthesize(&self, text: &str, voice: Option<&str>)
        -> Result<SynthesizedAudio, VoiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_converts_to_matching_chat_role() {
        let turn = Turn {
            id: 7,
            session_id: "s".to_string(),
            role: Role::Assistant,
            message: "hey".to_string(),
            created_at: String::new(),
        };
        assert_eq!(ChatMessage::from(&turn), ChatMessage::assistant("hey"));
    }

    #[test]
    fn chat_message_uses_openai_shape() {
        let json = serde_json::to_value(ChatMessage::system("be kind")).expect("serialize");
        assert_eq!(json, serde_json::json!({"role": "system", "content": "be kind"}));
    }
}
