use crate::config::ProviderConfig;
use crate::error::VoiceError;
use crate::gateway::{AudioClip, Transcriber};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Upload cap for hosted transcription (25 MiB, the provider's own limit).
pub const MAX_REMOTE_STT_INPUT_BYTES: usize = 25 * 1024 * 1024;

/// Maximum audio input size for local STT (10 MiB). Prevents OOM from oversized payloads.
const MAX_LOCAL_STT_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// Timeout for local STT process execution.
const STT_TIMEOUT: Duration = Duration::from_secs(120);

fn check_size(clip: &AudioClip, limit: usize) -> Result<(), VoiceError> {
    if clip.bytes.len() > limit {
        return Err(VoiceError::Stt(format!(
            "audio data exceeds maximum size: {} bytes (limit: {} bytes)",
            clip.bytes.len(),
            limit
        )));
    }
    Ok(())
}

/// Hosted Whisper transcription over the OpenAI-compatible
/// `/audio/transcriptions` endpoint.
#[derive(Debug, Clone)]
pub struct GroqTranscriber {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl GroqTranscriber {
    pub fn new(config: ProviderConfig) -> Result<Self, VoiceError> {
        if !config.has_api_key() {
            return Err(VoiceError::Config(
                "transcription requires an API key".to_string(),
            ));
        }
        let client = config.http_client()?;
        Ok(Self { config, client })
    }

    fn form(&self, clip: &AudioClip) -> Result<Form, VoiceError> {
        let mut part = Part::bytes(clip.bytes.clone()).file_name(clip.file_name.clone());
        if let Some(content_type) = &clip.content_type {
            part = part.mime_str(content_type)?;
        }

        Ok(Form::new()
            .part("file", part)
            .text("model", self.config.transcription_model.clone())
            .text("response_format", "text")
            .text("language", self.config.language.clone()))
    }
}

#[async_trait]
impl Transcriber for GroqTranscriber {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String, VoiceError> {
        check_size(clip, MAX_REMOTE_STT_INPUT_BYTES)?;

        let started = Instant::now();
        let res = self
            .client
            .post(self.config.endpoint("audio/transcriptions"))
            .bearer_auth(&self.config.api_key)
            .multipart(self.form(clip)?)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Provider { status, body });
        }

        let text = res.text().await?.trim().to_string();

        tracing::debug!(
            model = %self.config.transcription_model,
            bytes = clip.bytes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "transcription finished"
        );

        Ok(text)
    }
}

/// Local transcription with a `whisper.cpp` binary.
#[derive(Debug, Clone)]
pub struct WhisperCppTranscriber {
    model_path: PathBuf,
    binary_path: PathBuf,
}

impl WhisperCppTranscriber {
    pub fn new(model_path: impl Into<PathBuf>, binary_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            binary_path: binary_path.into(),
        }
    }
}

#[async_trait]
impl Transcriber for WhisperCppTranscriber {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String, VoiceError> {
        check_size(clip, MAX_LOCAL_STT_INPUT_BYTES)?;

        // -m <model>, -f - reads audio from stdin; transcription is printed to stdout.
        let mut command = Command::new(&self.binary_path);
        command
            .arg("-m")
            .arg(&self.model_path)
            .arg("-f")
            .arg("-")
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| VoiceError::Stt(format!("Failed to spawn STT binary: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VoiceError::Stt("Failed to open stdin".to_string()))?;

        stdin
            .write_all(&clip.bytes)
            .await
            .map_err(|e| VoiceError::Stt(format!("Failed to write to stdin: {}", e)))?;
        drop(stdin);

        let output = tokio::time::timeout(STT_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| {
                VoiceError::Stt(format!(
                    "STT process timed out after {} seconds",
                    STT_TIMEOUT.as_secs()
                ))
            })?
            .map_err(|e| VoiceError::Stt(format!("Failed to read stdout: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Stt(format!("STT binary failed: {}", stderr)));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groq_transcriber_requires_api_key() {
        let err = GroqTranscriber::new(ProviderConfig::default()).expect_err("no key");
        assert!(matches!(err, VoiceError::Config(_)));
    }

    #[tokio::test]
    async fn oversized_audio_is_rejected_before_upload() {
        let transcriber =
            GroqTranscriber::new(ProviderConfig::new("k")).expect("client should build");
        let clip = AudioClip::new(vec![0; MAX_REMOTE_STT_INPUT_BYTES + 1], "big.wav");

        match transcriber.transcribe(&clip).await {
            Err(VoiceError::Stt(msg)) => assert!(msg.contains("exceeds maximum size")),
            other => panic!("expected size error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_whisper_binary_is_an_stt_error() {
        let transcriber =
            WhisperCppTranscriber::new("model.bin", "/nonexistent/zenith-whisper-cli");
        let clip = AudioClip::new(vec![1, 2, 3], "clip.wav");

        match transcriber.transcribe(&clip).await {
            Err(VoiceError::Stt(msg)) => assert!(msg.contains("Failed to spawn")),
            other => panic!("expected spawn error, got {:?}", other),
        }
    }
}
