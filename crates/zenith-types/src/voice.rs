//! Voice profile and engine definitions.
//!
//! A `VoiceProfile` maps a logical voice name (what clients ask for) to a
//! concrete speech engine and its parameters.

use serde::{Deserialize, Serialize};

/// Supported speech synthesis engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceEngine {
    /// Piper TTS (ONNX-based, fast, local).
    #[default]
    Piper,
    /// `espeak-ng`, available on most systems.
    System,
}

/// A named voice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceProfile {
    /// Identifier clients use to select the voice.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Engine that renders this voice.
    #[serde(default)]
    pub engine: VoiceEngine,
    /// Path to the model file (relative to the voices directory or absolute).
    /// Ignored by the system engine.
    #[serde(default)]
    pub model_path: String,
    /// Path to the model configuration file, if it is not next to the model.
    #[serde(default)]
    pub config_path: Option<String>,
    /// Speech speed multiplier (1.0 is normal).
    #[serde(default = "default_speed")]
    pub speed: f32,
    /// Speaker ID within a multi-speaker model (0-indexed).
    #[serde(default)]
    pub speaker_id: Option<u32>,
}

fn default_speed() -> f32 {
    1.0
}

impl Default for VoiceProfile {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            name: "Default Voice".to_string(),
            engine: VoiceEngine::Piper,
            model_path: "en_US-amy-medium.onnx".to_string(),
            config_path: None,
            speed: default_speed(),
            speaker_id: None,
        }
    }
}
