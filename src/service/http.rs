//! HTTP client for the serving layer's `/api/*` routes

use async_trait::async_trait;
use url::Url;

use super::{
    ChatRequest, ChatResponse, HealthStatus, LanguageService, RealtimeSessionRequest,
    RealtimeSessionResponse, RomanizeRequest, RomanizeResponse, ServiceConfig, SpeechRequest,
    SynthesizedSpeech, TranscriptionRequest, TranscriptionResponse,
};
use crate::voice::Sanitized;
use crate::{Error, Result};

/// Talks to the serving layer over HTTP
#[derive(Debug, Clone)]
pub struct HttpLanguageService {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpLanguageService {
    /// Create a client for the serving layer at `base_url`
    ///
    /// # Errors
    ///
    /// Returns error if the URL cannot be parsed
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("invalid API base URL {base_url}: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base,
        })
    }

    /// Base URL requests are resolved against
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("invalid endpoint {path}: {e}")))
    }
}

/// Read a header as a string, empty if missing
fn header_str(headers: &reqwest::header::HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Rebuild the sanitization outcome the service reported in its headers
fn sanitized_from_headers(
    headers: &reqwest::header::HeaderMap,
    kind: &str,
    requested: &str,
) -> Sanitized {
    let final_value = header_str(headers, &format!("x-{kind}-final"));
    let reported = header_str(headers, &format!("x-{kind}-requested"));

    Sanitized {
        requested: if reported.is_empty() {
            requested.to_string()
        } else {
            reported
        },
        coerced: header_str(headers, &format!("x-{kind}-coerced")) == "1",
        value: if final_value.is_empty() {
            requested.to_string()
        } else {
            final_value
        },
    }
}

#[async_trait]
impl LanguageService for HttpLanguageService {
    async fn chat(&self, request: &ChatRequest) -> Result<String> {
        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            "sending chat request"
        );

        let response = self
            .client
            .post(self.endpoint("api/chat")?)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat request failed");
            return Err(Error::Chat(format!("chat error {status}: {body}")));
        }

        let result: ChatResponse = response.json().await?;
        Ok(result.content())
    }

    async fn synthesize(&self, request: &SpeechRequest) -> Result<SynthesizedSpeech> {
        let response = self
            .client
            .post(self.endpoint("api/tts")?)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("server tts failed: {status} {body}")));
        }

        let headers = response.headers().clone();
        let voice = sanitized_from_headers(&headers, "voice", &request.voice);
        let model = sanitized_from_headers(&headers, "model", &request.model);
        let audio = response.bytes().await?.to_vec();

        if voice.coerced || model.coerced {
            tracing::warn!(
                voice_requested = %voice.requested,
                voice_final = %voice.value,
                model_requested = %model.requested,
                model_final = %model.value,
                "server coerced synthesis settings"
            );
        }
        tracing::debug!(bytes = audio.len(), voice = %voice.value, "synthesized speech");

        Ok(SynthesizedSpeech {
            audio,
            voice,
            model,
        })
    }

    async fn transcribe(&self, request: &TranscriptionRequest) -> Result<String> {
        tracing::debug!(audio_bytes = request.audio.len(), "starting transcription");

        let extension = request
            .mime
            .split('/')
            .nth(1)
            .and_then(|s| s.split(';').next())
            .unwrap_or("wav");
        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(request.audio.clone())
                    .file_name(format!("audio.{extension}"))
                    .mime_str(&request.mime)
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("language", request.language.clone())
            .text("model", request.model.clone());

        let response = self
            .client
            .post(self.endpoint("api/transcribe")?)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "transcription request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "transcription failed");
            return Err(Error::Stt(format!("transcribe failed {status}: {body}")));
        }

        let result: TranscriptionResponse = response.json().await?;
        let text = result.text.trim().to_string();
        tracing::info!(transcript = %text, "transcription complete");
        Ok(text)
    }

    async fn romanize(&self, text: &str, model: &str) -> Option<String> {
        let request = RomanizeRequest {
            text: text.to_string(),
            model: Some(model.to_string()),
        };

        let response = match self
            .client
            .post(self.endpoint("api/pinyin").ok()?)
            .json(&request)
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                tracing::debug!(status = %r.status(), "romanization unavailable");
                return None;
            }
            Err(e) => {
                tracing::debug!(error = %e, "romanization request failed");
                return None;
            }
        };

        let result: RomanizeResponse = response.json().await.ok()?;
        let pinyin = result.pinyin.trim().to_string();
        (!pinyin.is_empty()).then_some(pinyin)
    }

    async fn realtime_session(&self, model: &str, voice: &str) -> Result<String> {
        let request = RealtimeSessionRequest {
            model: model.to_string(),
            voice: voice.to_string(),
        };

        let response = self
            .client
            .post(self.endpoint("api/realtime-session")?)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Signaling(format!(
                "failed to create realtime session: {}",
                response.status()
            )));
        }

        let session: RealtimeSessionResponse = response.json().await?;
        session
            .client_secret
            .and_then(|s| s.value)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::Signaling("no ephemeral token".to_string()))
    }

    async fn health(&self) -> Result<HealthStatus> {
        let response = self
            .client
            .get(self.endpoint("api/health")?)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn config(&self) -> Result<ServiceConfig> {
        let response = self
            .client
            .get(self.endpoint("api/config")?)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let svc = HttpLanguageService::new("http://localhost:8787/tutor").unwrap();
        assert_eq!(
            svc.endpoint("api/chat").unwrap().as_str(),
            "http://localhost:8787/tutor/api/chat"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            HttpLanguageService::new("not a url"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_sanitized_from_headers() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("x-voice-requested", "verse".parse().unwrap());
        headers.insert("x-voice-final", "alloy".parse().unwrap());
        headers.insert("x-voice-coerced", "1".parse().unwrap());

        let voice = sanitized_from_headers(&headers, "voice", "verse");
        assert_eq!(voice.value, "alloy");
        assert!(voice.coerced);

        // missing headers fall back to the request
        let model = sanitized_from_headers(&headers, "model", "tts-1");
        assert_eq!(model.value, "tts-1");
        assert!(!model.coerced);
    }
}
