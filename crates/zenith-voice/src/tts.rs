use crate::error::VoiceError;
use crate::gateway::{SynthesizedAudio, Synthesizer};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::RwLock;
use uuid::Uuid;
use zenith_types::{VoiceEngine, VoiceProfile};

/// Maximum text input size for TTS (64 KiB). Prevents resource exhaustion from
/// oversized synthesis requests.
const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

/// Timeout for TTS process execution.
const TTS_TIMEOUT: Duration = Duration::from_secs(60);

/// espeak-ng's default speaking rate in words per minute.
const ESPEAK_BASE_WPM: f32 = 175.0;

/// Renders replies to WAV files in an output directory.
///
/// Each call writes a new `response_<8 hex>.wav` file; the file name is what
/// clients later request from the audio route.
#[derive(Debug, Clone)]
pub struct TtsService {
    profiles: Arc<RwLock<HashMap<String, VoiceProfile>>>,
    default_voice: Arc<RwLock<String>>,
    voices_dir: PathBuf,
    output_dir: PathBuf,
    piper_binary: PathBuf,
    espeak_binary: PathBuf,
}

impl TtsService {
    /// Creates a new `TtsService`. The built-in [`VoiceProfile::default`] is
    /// registered and selected as the default voice.
    pub fn new(
        voices_dir: impl AsRef<Path>,
        output_dir: impl AsRef<Path>,
        piper_binary: impl AsRef<Path>,
    ) -> Self {
        let default_profile = VoiceProfile::default();
        let default_id = default_profile.id.clone();
        let mut profiles = HashMap::new();
        profiles.insert(default_id.clone(), default_profile);

        Self {
            profiles: Arc::new(RwLock::new(profiles)),
            default_voice: Arc::new(RwLock::new(default_id)),
            voices_dir: voices_dir.as_ref().to_path_buf(),
            output_dir: output_dir.as_ref().to_path_buf(),
            piper_binary: piper_binary.as_ref().to_path_buf(),
            espeak_binary: PathBuf::from("espeak-ng"),
        }
    }

    /// Overrides the `espeak-ng` executable used by the system engine.
    pub fn with_espeak_binary(mut self, espeak_binary: impl AsRef<Path>) -> Self {
        self.espeak_binary = espeak_binary.as_ref().to_path_buf();
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Adds (or replaces) a voice profile.
    pub async fn add_profile(&self, profile: VoiceProfile) {
        self.profiles
            .write()
            .await
            .insert(profile.id.clone(), profile);
    }

    /// Retrieves a voice profile by ID.
    pub async fn get_profile(&self, id: &str) -> Option<VoiceProfile> {
        self.profiles.read().await.get(id).cloned()
    }

    /// Lists the registered voice IDs, sorted.
    pub async fn voice_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.profiles.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn default_voice(&self) -> String {
        self.default_voice.read().await.clone()
    }

    /// Makes `id` the voice used when a request does not name one.
    pub async fn set_default_voice(&self, id: &str) -> Result<(), VoiceError> {
        if !self.profiles.read().await.contains_key(id) {
            return Err(VoiceError::ProfileNotFound(id.to_string()));
        }
        *self.default_voice.write().await = id.to_string();
        tracing::info!(voice = id, "default voice changed");
        Ok(())
    }

    /// The requested voice, or the default one when the name is unknown.
    async fn resolve_profile(&self, voice: Option<&str>) -> Result<VoiceProfile, VoiceError> {
        if let Some(id) = voice {
            if let Some(profile) = self.get_profile(id).await {
                return Ok(profile);
            }
            tracing::warn!(voice = id, "unknown voice requested, using default voice");
        }

        let id = self.default_voice().await;
        let profile = self.get_profile(&id).await;
        profile.ok_or(VoiceError::ProfileNotFound(id))
    }

    fn resolve_asset(&self, path: &str) -> PathBuf {
        if Path::new(path).is_absolute() {
            PathBuf::from(path)
        } else {
            self.voices_dir.join(path)
        }
    }

    async fn synthesize_piper(
        &self,
        text: &str,
        profile: &VoiceProfile,
        output: &Path,
    ) -> Result<(), VoiceError> {
        let model_path = self.resolve_asset(&profile.model_path);
        if !model_path.exists() {
            return Err(VoiceError::Tts(format!(
                "Model file not found: {:?}",
                model_path
            )));
        }

        let mut command = Command::new(&self.piper_binary);
        command
            .arg("--model")
            .arg(model_path)
            .arg("--output_file")
            .arg(output)
            // Length scale is the inverse of speed: 2.0x speed means 0.5 length.
            .arg("--length_scale")
            .arg((1.0 / profile.speed).to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(config) = &profile.config_path {
            command.arg("--config").arg(self.resolve_asset(config));
        }

        if let Some(speaker) = profile.speaker_id {
            command.arg("--speaker").arg(speaker.to_string());
        }

        let mut child = command
            .spawn()
            .map_err(|e| VoiceError::Tts(format!("Failed to spawn piper: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VoiceError::Tts("Failed to open stdin".to_string()))?;
        let text_owned = text.to_string();

        // Write from a separate task so a full stdout pipe cannot deadlock us.
        let write_task = tokio::spawn(async move {
            stdin.write_all(text_owned.as_bytes()).await?;
            stdin.shutdown().await
        });

        let output_result = tokio::time::timeout(TTS_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| {
                VoiceError::Tts(format!(
                    "TTS process timed out after {} seconds",
                    TTS_TIMEOUT.as_secs()
                ))
            })?
            .map_err(|e| VoiceError::Tts(format!("Failed to wait for piper: {}", e)))?;

        match write_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(VoiceError::Tts(format!(
                    "Failed to write to piper stdin: {}",
                    e
                )))
            }
            Err(e) => return Err(VoiceError::Tts(format!("Stdin task failed: {}", e))),
        }

        if !output_result.status.success() {
            let stderr = String::from_utf8_lossy(&output_result.stderr);
            return Err(VoiceError::Tts(format!("Piper failed: {}", stderr)));
        }

        Ok(())
    }

    async fn synthesize_system(
        &self,
        text: &str,
        profile: &VoiceProfile,
        output: &Path,
    ) -> Result<(), VoiceError> {
        let words_per_minute = (ESPEAK_BASE_WPM * profile.speed).round() as u32;

        let mut command = Command::new(&self.espeak_binary);
        command
            .arg("-w")
            .arg(output)
            .arg("-s")
            .arg(words_per_minute.to_string())
            .arg("--")
            .arg(text)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| VoiceError::Tts(format!("Failed to spawn espeak-ng: {}", e)))?;

        let output_result = tokio::time::timeout(TTS_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| {
                VoiceError::Tts(format!(
                    "System TTS process timed out after {} seconds",
                    TTS_TIMEOUT.as_secs()
                ))
            })?
            .map_err(|e| VoiceError::Tts(format!("Failed to wait for espeak-ng: {}", e)))?;

        if !output_result.status.success() {
            let stderr = String::from_utf8_lossy(&output_result.stderr);
            return Err(VoiceError::Tts(format!("espeak-ng failed: {}", stderr)));
        }

        Ok(())
    }
}

#[async_trait]
impl Synthesizer for TtsService {
    async fn synthesize(
        &self,
        text: &str,
        voice: Option<&str>,
    ) -> Result<SynthesizedAudio, VoiceError> {
        if text.trim().is_empty() {
            return Err(VoiceError::Tts("nothing to synthesize".to_string()));
        }
        if text.len() > MAX_TTS_INPUT_BYTES {
            return Err(VoiceError::Tts(format!(
                "text exceeds maximum size: {} bytes (limit: {} bytes)",
                text.len(),
                MAX_TTS_INPUT_BYTES
            )));
        }

        let profile = self.resolve_profile(voice).await?;

        if profile.speed < 0.1 || profile.speed > 10.0 {
            return Err(VoiceError::Config(
                "Speed must be between 0.1 and 10.0".to_string(),
            ));
        }

        tokio::fs::create_dir_all(&self.output_dir).await?;

        let simple = Uuid::new_v4().simple().to_string();
        let file_name = format!("response_{}.wav", &simple[..8]);
        let path = self.output_dir.join(&file_name);

        match profile.engine {
            VoiceEngine::Piper => self.synthesize_piper(text, &profile, &path).await?,
            VoiceEngine::System => self.synthesize_system(text, &profile, &path).await?,
        }

        // A zero exit status is not enough: the engine must have left audio behind.
        let written = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
        if written == 0 {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(VoiceError::Tts(format!(
                "engine produced no audio for voice '{}'",
                profile.id
            )));
        }

        tracing::debug!(
            voice = %profile.id,
            file = %file_name,
            bytes = written,
            "synthesized reply"
        );

        Ok(SynthesizedAudio { path, file_name })
    }
}
