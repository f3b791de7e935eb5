//! Language service collaborator
//!
//! The remote chat, synthesis, transcription and romanization endpoints are
//! opaque to the tutor; it talks to them through [`LanguageService`]. The
//! wire types here are shared with the serving layer in [`crate::server`].

mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::voice::Sanitized;

pub use http::HttpLanguageService;

/// Role of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Chat completion request (`POST /api/chat`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Chat completion response in the familiar `choices[0].message.content` shape
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatChoice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatResponse {
    /// Wrap a single reply
    #[must_use]
    pub fn from_content(content: impl Into<String>) -> Self {
        Self {
            choices: vec![ChatChoice {
                message: ChoiceMessage {
                    content: Some(content.into()),
                },
            }],
        }
    }

    /// Trimmed content of the first choice, empty if absent
    #[must_use]
    pub fn content(&self) -> String {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .unwrap_or_default()
            .trim()
            .to_string()
    }
}

/// Speech synthesis request (`POST /api/tts`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechRequest {
    pub text: String,
    pub voice: String,
    pub model: String,
}

/// Synthesized audio plus the voice/model the service actually used
#[derive(Debug, Clone)]
pub struct SynthesizedSpeech {
    /// Encoded audio (audio/mpeg)
    pub audio: Vec<u8>,
    /// Requested vs. final voice
    pub voice: Sanitized,
    /// Requested vs. final model
    pub model: Sanitized,
}

/// Transcription request (`POST /api/transcribe`)
#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    /// Encoded audio payload
    pub audio: Vec<u8>,
    /// MIME type of `audio`
    pub mime: String,
    /// Spoken language (e.g. `zh`)
    pub language: String,
    pub model: String,
}

/// Transcription result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptionResponse {
    #[serde(default)]
    pub text: String,
}

/// Romanization request (`POST /api/pinyin`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RomanizeRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Romanization result; empty on any upstream failure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RomanizeResponse {
    #[serde(default)]
    pub pinyin: String,
}

/// Live session credential request (`POST /api/realtime-session`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeSessionRequest {
    pub model: String,
    pub voice: String,
}

/// Short-lived credential issued for a live session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RealtimeSessionResponse {
    #[serde(default)]
    pub client_secret: Option<ClientSecret>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientSecret {
    #[serde(default)]
    pub value: Option<String>,
}

/// `GET /api/health` response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub ok: bool,
    pub mode: String,
    #[serde(default)]
    pub tts_voices: Vec<String>,
}

/// `GET /api/config` response: client-side model defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    pub chat_model: String,
    pub stt_model: String,
    pub tts_model: String,
    pub realtime_model: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            chat_model: "gpt-4o-mini".to_string(),
            stt_model: "gpt-4o-mini-transcribe".to_string(),
            tts_model: "tts-1".to_string(),
            realtime_model: "gpt-4o-mini-realtime-preview".to_string(),
        }
    }
}

/// Remote chat, speech and romanization endpoints
#[async_trait]
pub trait LanguageService: Send + Sync {
    /// Run a chat completion and return the reply text
    async fn chat(&self, request: &ChatRequest) -> Result<String>;

    /// Synthesize one line of speech
    async fn synthesize(&self, request: &SpeechRequest) -> Result<SynthesizedSpeech>;

    /// Transcribe an audio payload
    async fn transcribe(&self, request: &TranscriptionRequest) -> Result<String>;

    /// Best-effort romanization; `None` on any failure
    async fn romanize(&self, text: &str, model: &str) -> Option<String>;

    /// Issue a short-lived credential for a live session
    async fn realtime_session(&self, model: &str, voice: &str) -> Result<String>;

    /// Liveness and allowed voice list
    async fn health(&self) -> Result<HealthStatus>;

    /// Client model defaults
    async fn config(&self) -> Result<ServiceConfig>;
}
