//! OpenAI-compatible chat-completion client.

use crate::config::ProviderConfig;
use crate::error::VoiceError;
use crate::gateway::{ChatMessage, Responder};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Sends chat histories to `{base_url}/chat/completions`.
#[derive(Debug, Clone)]
pub struct ChatCompletionClient {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl ChatCompletionClient {
    pub fn new(config: ProviderConfig) -> Result<Self, VoiceError> {
        if !config.has_api_key() {
            return Err(VoiceError::Config(
                "chat completion requires an API key".to_string(),
            ));
        }
        let client = config.http_client()?;
        Ok(Self { config, client })
    }

    pub fn model(&self) -> &str {
        &self.config.chat_model
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, VoiceError> {
        let body = ChatRequest {
            model: &self.config.chat_model,
            messages,
            temperature,
            max_tokens,
            top_p: self.config.top_p,
            stream: false,
        };

        let started = Instant::now();
        let res = self
            .client
            .post(self.config.endpoint("chat/completions"))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Provider { status, body });
        }

        let parsed: ChatResponse = res.json().await?;
        let reply = extract_reply(parsed)?;

        tracing::debug!(
            model = %self.config.chat_model,
            messages = messages.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "chat completion finished"
        );

        Ok(reply)
    }
}

fn extract_reply(response: ChatResponse) -> Result<String, VoiceError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or(VoiceError::EmptyResponse)
}

fn intro_prompt(user_name: Option<&str>) -> String {
    match user_name.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => format!(
            "You are Zenith, a warm and supportive wellbeing companion. Greet {} in two or \
             three sentences, introduce yourself and ask how they are feeling today.",
            name
        ),
        None => "You are Zenith, a warm and supportive wellbeing companion. Introduce yourself \
                 in two or three sentences and ask how the user is feeling today."
            .to_string(),
    }
}

#[async_trait]
impl Responder for ChatCompletionClient {
    async fn respond(&self, messages: &[ChatMessage]) -> Result<String, VoiceError> {
        self.complete(messages, self.config.temperature, self.config.max_tokens)
            .await
    }

    async fn introduce(&self, user_name: Option<&str>) -> Result<String, VoiceError> {
        let messages = [ChatMessage::user(intro_prompt(user_name))];
        self.complete(&messages, 0.8, 100).await
    }
}
