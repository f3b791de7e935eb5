//! SpeechInputEngine: user speech to text
//!
//! Two mutually exclusive modes, resolved once at construction:
//! single-shot platform recognition, or push-to-record followed by remote
//! transcription. Diagnostic capture records a fixed two seconds and plays
//! it back without touching the turn pipeline.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::capture::Microphone;
use super::mic::{MicConsumer, MicrophoneArbiter};
use super::playback::AudioPlayer;
use crate::service::{LanguageService, TranscriptionRequest};
use crate::{Error, Result};

/// Payloads smaller than this are treated as silence
pub const MIN_PAYLOAD_BYTES: usize = 1024;

/// Diagnostic captures smaller than this count as "no audio"
pub const MIN_DIAGNOSTIC_BYTES: usize = 512;

/// Fixed diagnostic capture length
pub const DIAGNOSTIC_DURATION: Duration = Duration::from_secs(2);

/// Requested input engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    /// Recognition when the platform has it, else record
    #[default]
    Auto,
    Recognition,
    Record,
}

/// Mode actually in use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedMode {
    Recognition,
    Record,
}

/// Platform speech recognition, single result, no interim results
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Listen once; `None` when nothing was recognized
    async fn recognize_once(&self, language: &str) -> Result<Option<String>>;
}

/// Result of a capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputOutcome {
    Transcript(String),
    NoSpeech,
}

/// Push-to-record timing and thresholds
#[derive(Debug, Clone, Copy)]
pub struct RecordingLimits {
    pub tick: Duration,
    pub max_ticks: u32,
    pub min_payload_bytes: usize,
}

impl Default for RecordingLimits {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            max_ticks: 10,
            min_payload_bytes: MIN_PAYLOAD_BYTES,
        }
    }
}

/// Result of a diagnostic capture
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiagnosticReport {
    pub bytes: usize,
    pub seconds: f32,
    /// Whether anything was captured and played back
    pub captured: bool,
}

/// Input engine settings
#[derive(Debug, Clone)]
pub struct InputSettings {
    pub mode: InputMode,
    /// Input device name; system default when `None`
    pub device: Option<String>,
    /// Transcription language, e.g. `zh`
    pub language: String,
    /// Recognition language, e.g. `zh-CN`
    pub recognition_language: String,
    pub stt_model: String,
    pub limits: RecordingLimits,
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            mode: InputMode::Auto,
            device: None,
            language: "zh".to_string(),
            recognition_language: "zh-CN".to_string(),
            stt_model: "gpt-4o-mini-transcribe".to_string(),
            limits: RecordingLimits::default(),
        }
    }
}

/// Captures user speech and resolves it to text
pub struct SpeechInputEngine {
    service: Arc<dyn LanguageService>,
    microphone: Arc<dyn Microphone>,
    arbiter: MicrophoneArbiter,
    recognizer: Option<Arc<dyn SpeechRecognizer>>,
    mode: ResolvedMode,
    settings: InputSettings,
    ticks: watch::Sender<u32>,
}

impl SpeechInputEngine {
    /// Build the engine, resolving `settings.mode` against the platform
    ///
    /// # Errors
    ///
    /// Returns error if recognition is requested but unavailable
    pub fn new(
        service: Arc<dyn LanguageService>,
        microphone: Arc<dyn Microphone>,
        arbiter: MicrophoneArbiter,
        recognizer: Option<Arc<dyn SpeechRecognizer>>,
        settings: InputSettings,
    ) -> Result<Self> {
        let mode = match (settings.mode, recognizer.is_some()) {
            (InputMode::Recognition, false) => {
                return Err(Error::Config(
                    "speech recognition is not available on this platform".to_string(),
                ));
            }
            (InputMode::Recognition | InputMode::Auto, true) => ResolvedMode::Recognition,
            (InputMode::Record, _) | (InputMode::Auto, false) => ResolvedMode::Record,
        };
        tracing::debug!(requested = ?settings.mode, resolved = ?mode, "input mode resolved");

        let (ticks, _) = watch::channel(0);
        Ok(Self {
            service,
            microphone,
            arbiter,
            recognizer,
            mode,
            settings,
            ticks,
        })
    }

    #[must_use]
    pub const fn mode(&self) -> ResolvedMode {
        self.mode
    }

    /// Elapsed ticks of the current recording
    #[must_use]
    pub fn subscribe_ticks(&self) -> watch::Receiver<u32> {
        self.ticks.subscribe()
    }

    /// Input device names, empty when enumeration fails
    #[must_use]
    pub fn devices(&self) -> Vec<String> {
        self.microphone.devices()
    }

    /// Capture one reply in the resolved mode; `release` ends a recording
    ///
    /// # Errors
    ///
    /// Returns error on device, recognition or transcription failure
    pub async fn listen(&self, release: impl Future<Output = ()> + Send) -> Result<InputOutcome> {
        match self.mode {
            ResolvedMode::Recognition => self.recognize().await,
            ResolvedMode::Record => self.record(release).await,
        }
    }

    /// Single-shot platform recognition
    ///
    /// # Errors
    ///
    /// Returns error if recognition is unavailable or fails
    pub async fn recognize(&self) -> Result<InputOutcome> {
        let recognizer = self
            .recognizer
            .as_ref()
            .ok_or_else(|| Error::Stt("speech recognition not available".to_string()))?;

        let text = recognizer
            .recognize_once(&self.settings.recognition_language)
            .await?
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        Ok(text.map_or(InputOutcome::NoSpeech, InputOutcome::Transcript))
    }

    /// Push-to-record: capture until `release` resolves or the tick ceiling
    /// is reached, then transcribe
    ///
    /// # Errors
    ///
    /// Returns error if the microphone is busy or unavailable, or if
    /// transcription fails
    pub async fn record(&self, release: impl Future<Output = ()> + Send) -> Result<InputOutcome> {
        let limits = self.settings.limits;
        let lease = self.arbiter.acquire(MicConsumer::Recording)?;
        let stream = self.microphone.open(self.settings.device.as_deref())?;

        self.ticks.send_replace(0);
        let mut elapsed = 0u32;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + limits.tick, limits.tick);
        tokio::pin!(release);

        loop {
            tokio::select! {
                () = &mut release => {
                    tracing::debug!(ticks = elapsed, "recording released");
                    break;
                }
                _ = ticker.tick() => {
                    elapsed += 1;
                    self.ticks.send_replace(elapsed);
                    if elapsed >= limits.max_ticks {
                        tracing::debug!(ticks = elapsed, "recording ceiling reached");
                        break;
                    }
                }
            }
        }

        let recording = stream.stop()?;
        drop(lease);

        let payload = recording.to_wav()?;
        if payload.len() < limits.min_payload_bytes {
            tracing::debug!(bytes = payload.len(), "payload below threshold");
            return Ok(InputOutcome::NoSpeech);
        }

        tracing::debug!(bytes = payload.len(), seconds = recording.duration_secs(), "transcribing recording");
        let text = self
            .service
            .transcribe(&TranscriptionRequest {
                audio: payload,
                mime: "audio/wav".to_string(),
                language: self.settings.language.clone(),
                model: self.settings.stt_model.clone(),
            })
            .await?;

        let text = text.trim();
        if text.is_empty() {
            return Ok(InputOutcome::NoSpeech);
        }
        Ok(InputOutcome::Transcript(text.to_string()))
    }

    /// Record [`DIAGNOSTIC_DURATION`] and play it back through `player`
    ///
    /// # Errors
    ///
    /// Returns error if the microphone is busy or unavailable, or if
    /// playback fails
    pub async fn diagnostic_capture(&self, player: &dyn AudioPlayer) -> Result<DiagnosticReport> {
        let lease = self.arbiter.acquire(MicConsumer::Diagnostics)?;
        let stream = self.microphone.open(self.settings.device.as_deref())?;
        tokio::time::sleep(DIAGNOSTIC_DURATION).await;
        let recording = stream.stop()?;
        drop(lease);

        let payload = recording.to_wav()?;
        let mut report = DiagnosticReport {
            bytes: payload.len(),
            seconds: recording.duration_secs(),
            captured: false,
        };

        if payload.len() < MIN_DIAGNOSTIC_BYTES {
            tracing::warn!(bytes = payload.len(), "mic test: no audio captured");
            return Ok(report);
        }

        player.play(&payload).await?;
        report.captured = true;
        tracing::info!(bytes = report.bytes, seconds = report.seconds, "mic test played back");
        Ok(report)
    }
}
