//! Serving layer
//!
//! The HTTP surface the tutor client talks to: chat completion, speech
//! synthesis with voice/model allow-listing, transcription, romanization,
//! live-session credentials and a test tone. Upstream calls go through
//! [`Upstream`]; the long-lived provider key never leaves this process.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use url::Url;

use crate::service::{
    ChatMessage, ChatResponse, HealthStatus, RealtimeSessionRequest, RealtimeSessionResponse,
    RomanizeRequest, RomanizeResponse, ServiceConfig, TranscriptionResponse,
};
use crate::voice::{ALLOWED_VOICES, DEFAULT_MODEL, DEFAULT_VOICE, sanitize_model, sanitize_voice};
use crate::voice::{samples_to_wav, tone};
use crate::{Error, Result};

/// Default listen port
pub const DEFAULT_PORT: u16 = 8787;

/// Default upstream API base
pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1/";

const DEFAULT_CHAT_TEMPERATURE: f32 = 0.6;

const PINYIN_INSTRUCTION: &str = "You convert Mandarin Chinese Hanzi into Hanyu Pinyin with tone marks. Return ONLY the pinyin, no extra text.";

const TONE_SAMPLE_RATE: u32 = 44_100;
const TONE_FREQUENCY: f32 = 880.0;
const TONE_FADE: usize = 400;
const TONE_AMPLITUDE: f32 = 0.8;

/// Uploads up to 25 MB are accepted for transcription
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Speech and language provider behind the serving layer
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn chat(&self, model: &str, messages: &[ChatMessage], temperature: f32) -> Result<String>;

    /// Synthesize `input`, returning encoded audio (audio/mpeg)
    async fn speech(&self, model: &str, voice: &str, input: &str) -> Result<Vec<u8>>;

    async fn transcribe(&self, upload: AudioUpload) -> Result<String>;

    /// Issue a short-lived realtime credential
    async fn realtime_session(&self, model: &str, voice: &str) -> Result<RealtimeSessionResponse>;
}

/// Audio handed to [`Upstream::transcribe`]
#[derive(Debug, Clone)]
pub struct AudioUpload {
    pub audio: Vec<u8>,
    pub file_name: String,
    pub mime: String,
    pub language: String,
    pub model: String,
}

/// OpenAI-compatible upstream
pub struct OpenAiUpstream {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: Url,
}

impl OpenAiUpstream {
    /// # Errors
    ///
    /// Returns error if `base_url` is not a valid URL
    pub fn new(api_key: SecretString, base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("invalid upstream URL {base_url}: {e}")))?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("invalid upstream path {path}: {e}")))
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        tracing::error!(%status, %body, what, "upstream request failed");
        Err(Error::Service(format!("{what} failed: {status} {body}")))
    }
}

#[derive(Serialize)]
struct UpstreamChat<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Serialize)]
struct UpstreamSpeech<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
}

#[async_trait]
impl Upstream for OpenAiUpstream {
    async fn chat(&self, model: &str, messages: &[ChatMessage], temperature: f32) -> Result<String> {
        let response = self
            .client
            .post(self.endpoint("chat/completions")?)
            .bearer_auth(self.api_key.expose_secret())
            .json(&UpstreamChat {
                model,
                messages,
                temperature,
            })
            .send()
            .await?;
        let completion: ChatResponse = Self::check(response, "chat").await?.json().await?;
        Ok(completion.content())
    }

    async fn speech(&self, model: &str, voice: &str, input: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(self.endpoint("audio/speech")?)
            .bearer_auth(self.api_key.expose_secret())
            .json(&UpstreamSpeech { model, voice, input })
            .send()
            .await?;
        Ok(Self::check(response, "speech").await?.bytes().await?.to_vec())
    }

    async fn transcribe(&self, upload: AudioUpload) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(upload.audio)
            .file_name(upload.file_name)
            .mime_str(&upload.mime)
            .map_err(|e| Error::Stt(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", upload.model)
            .text("language", upload.language);

        let response = self
            .client
            .post(self.endpoint("audio/transcriptions")?)
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await?;
        let result: TranscriptionResponse =
            Self::check(response, "transcription").await?.json().await?;
        Ok(result.text)
    }

    async fn realtime_session(&self, model: &str, voice: &str) -> Result<RealtimeSessionResponse> {
        let response = self
            .client
            .post(self.endpoint("realtime/sessions")?)
            .bearer_auth(self.api_key.expose_secret())
            .json(&RealtimeSessionRequest {
                model: model.to_string(),
                voice: voice.to_string(),
            })
            .send()
            .await?;
        Ok(Self::check(response, "realtime session").await?.json().await?)
    }
}

/// Shared state for handlers
#[derive(Clone)]
pub struct ServerState {
    /// `None` when no provider key is configured
    pub upstream: Option<Arc<dyn Upstream>>,
    pub defaults: ServiceConfig,
}

impl ServerState {
    fn upstream(&self) -> std::result::Result<&Arc<dyn Upstream>, ApiError> {
        self.upstream.as_ref().ok_or(ApiError::MissingKey)
    }
}

/// Handler failures, rendered as `{error, detail?}`
#[derive(Debug)]
pub enum ApiError {
    MissingKey,
    BadRequest(&'static str),
    Upstream { error: &'static str, detail: String },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorBody {
            error: &'static str,
            #[serde(skip_serializing_if = "Option::is_none")]
            detail: Option<String>,
        }

        let (status, error, detail) = match self {
            Self::MissingKey => (StatusCode::BAD_REQUEST, "OpenAI key missing", None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            Self::Upstream { error, detail } => (StatusCode::BAD_REQUEST, error, Some(detail)),
        };

        (status, Json(ErrorBody { error, detail })).into_response()
    }
}

fn upstream_error(error: &'static str) -> impl FnOnce(Error) -> ApiError {
    move |e| {
        tracing::error!(error = %e, context = error, "upstream call failed");
        ApiError::Upstream {
            error,
            detail: e.to_string(),
        }
    }
}

/// Build the router with all routes and layers
pub fn router(state: ServerState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/api/health", get(health))
        .route("/api/config", get(config))
        .route("/api/tone", get(test_tone))
        .route("/api/chat", post(chat))
        .route("/api/tts", post(tts))
        .route("/api/pinyin", post(pinyin))
        .route("/api/transcribe", post(transcribe))
        .route("/api/stt", post(stt))
        .route("/api/realtime-session", post(realtime_session))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

type Shared = State<Arc<ServerState>>;

async fn root() -> &'static str {
    "Huayu Buddy API running.\n"
}

async fn health() -> Json<HealthStatus> {
    Json(HealthStatus {
        ok: true,
        mode: "api-only".to_string(),
        tts_voices: ALLOWED_VOICES.iter().map(ToString::to_string).collect(),
    })
}

async fn config(State(state): Shared) -> Json<ServiceConfig> {
    Json(state.defaults.clone())
}

/// 1 s 880 Hz mono WAV; needs no upstream
async fn test_tone() -> std::result::Result<Response, ApiError> {
    let len = TONE_SAMPLE_RATE as usize;
    let samples = tone(TONE_FREQUENCY, len, TONE_SAMPLE_RATE, TONE_FADE, TONE_AMPLITUDE);
    let wav = samples_to_wav(&samples, TONE_SAMPLE_RATE).map_err(|e| ApiError::Upstream {
        error: "tone failed",
        detail: e.to_string(),
    })?;
    Ok(([(header::CONTENT_TYPE, "audio/wav")], wav).into_response())
}

#[derive(Debug, Deserialize)]
struct ChatBody {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    messages: Vec<ChatMessage>,
    #[serde(default)]
    temperature: Option<f32>,
}

async fn chat(
    State(state): Shared,
    Json(body): Json<ChatBody>,
) -> std::result::Result<Json<ChatResponse>, ApiError> {
    let upstream = state.upstream()?;
    if body.messages.is_empty() {
        return Err(ApiError::BadRequest("messages required"));
    }

    let model = body.model.unwrap_or_else(|| state.defaults.chat_model.clone());
    let temperature = body.temperature.unwrap_or(DEFAULT_CHAT_TEMPERATURE);
    tracing::debug!(%model, messages = body.messages.len(), temperature, "chat");

    let content = upstream
        .chat(&model, &body.messages, temperature)
        .await
        .map_err(upstream_error("chat failed"))?;
    Ok(Json(ChatResponse::from_content(content)))
}

#[derive(Debug, Deserialize)]
struct TtsBody {
    #[serde(default)]
    text: String,
    #[serde(default)]
    voice: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

fn header_value(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static(""))
}

fn flag(coerced: bool) -> HeaderValue {
    HeaderValue::from_static(if coerced { "1" } else { "0" })
}

async fn tts(
    State(state): Shared,
    Json(body): Json<TtsBody>,
) -> std::result::Result<Response, ApiError> {
    let upstream = state.upstream()?;
    if body.text.trim().is_empty() {
        return Err(ApiError::BadRequest("text required"));
    }

    let voice = sanitize_voice(body.voice.as_deref().unwrap_or(DEFAULT_VOICE));
    let model = sanitize_model(body.model.as_deref().unwrap_or(DEFAULT_MODEL));
    if voice.coerced || model.coerced {
        tracing::warn!(
            voice_requested = %voice.requested,
            voice_final = %voice.value,
            model_requested = %model.requested,
            model_final = %model.value,
            "coerced synthesis settings"
        );
    }

    let audio = upstream
        .speech(&model.value, &voice.value, &body.text)
        .await
        .map_err(upstream_error("OpenAI TTS failed"))?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("audio/mpeg"));
    headers.insert(
        HeaderName::from_static("x-voice-requested"),
        header_value(&voice.requested),
    );
    headers.insert(HeaderName::from_static("x-voice-final"), header_value(&voice.value));
    headers.insert(HeaderName::from_static("x-voice-coerced"), flag(voice.coerced));
    headers.insert(
        HeaderName::from_static("x-model-requested"),
        header_value(&model.requested),
    );
    headers.insert(HeaderName::from_static("x-model-final"), header_value(&model.value));
    headers.insert(HeaderName::from_static("x-model-coerced"), flag(model.coerced));

    Ok((StatusCode::OK, headers, audio).into_response())
}

/// Best effort: empty on any failure, 400 only without a key
async fn pinyin(State(state): Shared, Json(body): Json<RomanizeRequest>) -> Response {
    let text = body.text.trim();
    let Some(upstream) = state.upstream.as_ref() else {
        return (StatusCode::BAD_REQUEST, Json(RomanizeResponse::default())).into_response();
    };
    if text.is_empty() {
        return Json(RomanizeResponse::default()).into_response();
    }

    let model = body.model.unwrap_or_else(|| state.defaults.chat_model.clone());
    let messages = [ChatMessage::system(PINYIN_INSTRUCTION), ChatMessage::user(text)];
    match upstream.chat(&model, &messages, 0.0).await {
        Ok(pinyin) => Json(RomanizeResponse {
            pinyin: pinyin.trim().to_string(),
        })
        .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "romanization failed");
            Json(RomanizeResponse::default()).into_response()
        }
    }
}

async fn transcribe(
    State(state): Shared,
    mut multipart: Multipart,
) -> std::result::Result<Json<TranscriptionResponse>, ApiError> {
    let upstream = state.upstream()?;

    let mut upload = AudioUpload {
        audio: Vec::new(),
        file_name: "audio.wav".to_string(),
        mime: "audio/wav".to_string(),
        language: "zh".to_string(),
        model: state.defaults.stt_model.clone(),
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::BadRequest("invalid multipart body"))?
    {
        match field.name().unwrap_or_default() {
            "file" => {
                if let Some(name) = field.file_name() {
                    upload.file_name = name.to_string();
                }
                if let Some(mime) = field.content_type() {
                    upload.mime = mime.to_string();
                }
                upload.audio = field
                    .bytes()
                    .await
                    .map_err(|_| ApiError::BadRequest("unreadable audio field"))?
                    .to_vec();
            }
            "language" => {
                upload.language = field
                    .text()
                    .await
                    .map_err(|_| ApiError::BadRequest("unreadable language field"))?;
            }
            "model" => {
                upload.model = field
                    .text()
                    .await
                    .map_err(|_| ApiError::BadRequest("unreadable model field"))?;
            }
            other => tracing::debug!(field = other, "ignoring multipart field"),
        }
    }

    run_transcription(upstream.as_ref(), upload).await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SttBody {
    #[serde(default)]
    audio_base64: String,
    #[serde(default)]
    mime: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

async fn stt(
    State(state): Shared,
    Json(body): Json<SttBody>,
) -> std::result::Result<Json<TranscriptionResponse>, ApiError> {
    let upstream = state.upstream()?;
    let audio = base64::engine::general_purpose::STANDARD
        .decode(body.audio_base64.trim())
        .map_err(|_| ApiError::BadRequest("invalid base64 audio"))?;

    let mime = body.mime.unwrap_or_else(|| "audio/webm".to_string());
    let extension = mime
        .split('/')
        .nth(1)
        .and_then(|s| s.split(';').next())
        .unwrap_or("webm")
        .to_string();

    let upload = AudioUpload {
        audio,
        file_name: format!("audio.{extension}"),
        mime,
        language: body.language.unwrap_or_else(|| "zh".to_string()),
        model: body.model.unwrap_or_else(|| state.defaults.stt_model.clone()),
    };
    run_transcription(upstream.as_ref(), upload).await
}

async fn run_transcription(
    upstream: &dyn Upstream,
    upload: AudioUpload,
) -> std::result::Result<Json<TranscriptionResponse>, ApiError> {
    if upload.audio.is_empty() {
        return Err(ApiError::BadRequest("audio required"));
    }
    tracing::debug!(bytes = upload.audio.len(), mime = %upload.mime, "transcribing");

    let text = upstream
        .transcribe(upload)
        .await
        .map_err(upstream_error("transcription failed"))?;
    Ok(Json(TranscriptionResponse { text }))
}

async fn realtime_session(
    State(state): Shared,
    Json(body): Json<RealtimeSessionRequest>,
) -> std::result::Result<Json<RealtimeSessionResponse>, ApiError> {
    let upstream = state.upstream()?;
    let session = upstream
        .realtime_session(&body.model, &body.voice)
        .await
        .map_err(upstream_error("realtime session failed"))?;
    Ok(Json(session))
}

/// Serving layer bound to a port
pub struct Server {
    state: ServerState,
    port: u16,
}

impl Server {
    #[must_use]
    pub const fn new(state: ServerState, port: u16) -> Self {
        Self { state, port }
    }

    /// Serve until the listener fails
    ///
    /// # Errors
    ///
    /// Returns error if the port cannot be bound or the server fails
    pub async fn run(self) -> Result<()> {
        if self.state.upstream.is_none() {
            tracing::warn!("no OpenAI key configured; upstream routes will return 400");
        }

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind {addr}: {e}")))?;
        tracing::info!(port = self.port, "serving layer listening");

        axum::serve(listener, router(self.state))
            .await
            .map_err(|e| Error::Config(format!("server error: {e}")))?;
        Ok(())
    }

    /// Run in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_is_bad_request() {
        let response = ApiError::MissingKey.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_header_value_rejects_control_chars() {
        assert_eq!(header_value("nova"), "nova");
        assert_eq!(header_value("bad\nvalue"), "");
    }
}
