#![allow(dead_code)]

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use zenith_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings};
use zenith_server::pipeline::{Pipeline, PipelineSettings};
use zenith_server::store::TurnStore;
use zenith_server::AppState;
use zenith_voice::{
    AudioClip, ChatMessage, Responder, SynthesizedAudio, Synthesizer, Transcriber, VoiceError,
};

/// Creates a migrated pool backed by a file in `dir`.
pub fn test_pool(dir: &Path) -> DbPool {
    let path = dir.join("zenith-test.db");
    let pool = create_pool(
        path.to_str().expect("utf-8 temp path"),
        DbRuntimeSettings::default(),
    )
    .expect("pool creation should succeed");
    let conn = pool.get().expect("connection should succeed");
    run_migrations(&conn).expect("migrations should succeed");
    pool
}

#[derive(Debug, Clone)]
pub enum Behavior {
    Reply(String),
    Fail,
    /// Sleeps before answering.
    Slow(Duration, String),
}

/// Transcriber returning canned text.
pub struct FakeTranscriber {
    pub behavior: Behavior,
    pub calls: AtomicUsize,
}

impl FakeTranscriber {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, _clip: &AudioClip) -> Result<String, VoiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Reply(text) => Ok(text.clone()),
            Behavior::Fail => Err(VoiceError::Stt("model unavailable".to_string())),
            Behavior::Slow(delay, text) => {
                tokio::time::sleep(*delay).await;
                Ok(text.clone())
            }
        }
    }
}

/// Responder that records every prompt it is given.
pub struct FakeResponder {
    pub behavior: Behavior,
    pub prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl FakeResponder {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.prompts.lock().expect("prompts lock").clone()
    }

    async fn answer(&self) -> Result<String, VoiceError> {
        match &self.behavior {
            Behavior::Reply(text) => Ok(text.clone()),
            Behavior::Fail => Err(VoiceError::Provider {
                status: 503,
                body: "overloaded".to_string(),
            }),
            Behavior::Slow(delay, text) => {
                tokio::time::sleep(*delay).await;
                Ok(text.clone())
            }
        }
    }
}

#[async_trait]
impl Responder for FakeResponder {
    async fn respond(&self, messages: &[ChatMessage]) -> Result<String, VoiceError> {
        self.prompts
            .lock()
            .expect("prompts lock")
            .push(messages.to_vec());
        self.answer().await
    }

    async fn introduce(&self, user_name: Option<&str>) -> Result<String, VoiceError> {
        let greeting = self.answer().await?;
        Ok(match user_name {
            Some(name) => format!("{} {}", greeting, name),
            None => greeting,
        })
    }
}

/// Synthesizer writing a small WAV-ish file into a directory.
pub struct FakeSynthesizer {
    pub output_dir: PathBuf,
    pub fail: bool,
    pub voices: Mutex<Vec<Option<String>>>,
    rendered: AtomicUsize,
}

impl FakeSynthesizer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            fail: false,
            voices: Mutex::new(Vec::new()),
            rendered: AtomicUsize::new(0),
        }
    }

    pub fn failing(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            fail: true,
            ..Self::new(output_dir)
        }
    }
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    async fn synthesize(
        &self,
        _text: &str,
        voice: Option<&str>,
    ) -> Result<SynthesizedAudio, VoiceError> {
        self.voices
            .lock()
            .expect("voices lock")
            .push(voice.map(str::to_string));
        if self.fail {
            return Err(VoiceError::Tts("engine crashed".to_string()));
        }

        let n = self.rendered.fetch_add(1, Ordering::SeqCst);
        let file_name = format!("response_{:08x}.wav", n);
        let path = self.output_dir.join(&file_name);
        tokio::fs::write(&path, b"RIFFfake").await?;
        Ok(SynthesizedAudio { path, file_name })
    }
}

/// Everything a test needs: the pipeline, its fakes and the temp dir that
/// holds the database and audio output.
pub struct Harness {
    pub dir: TempDir,
    pub pool: DbPool,
    pub transcriber: Arc<FakeTranscriber>,
    pub responder: Arc<FakeResponder>,
    pub synthesizer: Arc<FakeSynthesizer>,
    pub pipeline: Pipeline,
}

impl Harness {
    pub fn audio_dir(&self) -> PathBuf {
        self.dir.path().join("audio")
    }

    pub fn state(&self) -> AppState {
        AppState::new(self.pipeline.clone(), self.audio_dir())
    }
}

pub struct HarnessBuilder {
    transcriber: Behavior,
    responder: Behavior,
    synthesis_fails: bool,
    settings: PipelineSettings,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            transcriber: Behavior::Reply("I feel anxious".to_string()),
            responder: Behavior::Reply("Let's take a slow breath together.".to_string()),
            synthesis_fails: false,
            settings: PipelineSettings::default(),
        }
    }
}

impl HarnessBuilder {
    pub fn transcriber(mut self, behavior: Behavior) -> Self {
        self.transcriber = behavior;
        self
    }

    pub fn responder(mut self, behavior: Behavior) -> Self {
        self.responder = behavior;
        self
    }

    pub fn failing_synthesis(mut self) -> Self {
        self.synthesis_fails = true;
        self
    }

    pub fn settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Harness {
        let dir = tempfile::tempdir().expect("tempdir");
        let audio_dir = dir.path().join("audio");
        std::fs::create_dir_all(&audio_dir).expect("audio dir");

        let pool = test_pool(dir.path());
        let transcriber = Arc::new(FakeTranscriber::new(self.transcriber));
        let responder = Arc::new(FakeResponder::new(self.responder));
        let synthesizer = Arc::new(if self.synthesis_fails {
            FakeSynthesizer::failing(&audio_dir)
        } else {
            FakeSynthesizer::new(&audio_dir)
        });

        let pipeline = Pipeline::new(
            TurnStore::new(pool.clone()),
            transcriber.clone(),
            responder.clone(),
            synthesizer.clone(),
            self.settings,
        );

        Harness {
            dir,
            pool,
            transcriber,
            responder,
            synthesizer,
            pipeline,
        }
    }
}

pub fn harness() -> Harness {
    HarnessBuilder::default().build()
}

pub fn wav_clip() -> AudioClip {
    AudioClip::new(b"RIFF\0\0\0\0WAVEfmt ".to_vec(), "clip.wav").with_content_type("audio/wav")
}
