//! Serving layer tests
//!
//! Exercises the router in-process and through the HTTP client

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use tower::ServiceExt;

use huayu_buddy::server::{AudioUpload, ServerState, Upstream, router};
use huayu_buddy::service::{
    ChatMessage, ChatRequest, ClientSecret, LanguageService, RealtimeSessionResponse,
    ServiceConfig, SpeechRequest, TranscriptionRequest,
};
use huayu_buddy::{Error, HttpLanguageService, Result};

/// Upstream that records what the handlers forwarded
#[derive(Default)]
struct FakeUpstream {
    chats: Mutex<Vec<(String, Vec<ChatMessage>, f32)>>,
    speech: Mutex<Vec<(String, String, String)>>,
    uploads: Mutex<Vec<AudioUpload>>,
    fail_chat: bool,
}

#[async_trait]
impl Upstream for FakeUpstream {
    async fn chat(&self, model: &str, messages: &[ChatMessage], temperature: f32) -> Result<String> {
        self.chats
            .lock()
            .unwrap()
            .push((model.to_string(), messages.to_vec(), temperature));
        if self.fail_chat {
            return Err(Error::Service("upstream 500".to_string()));
        }
        Ok(" nǐ hǎo ".to_string())
    }

    async fn speech(&self, model: &str, voice: &str, input: &str) -> Result<Vec<u8>> {
        self.speech
            .lock()
            .unwrap()
            .push((model.to_string(), voice.to_string(), input.to_string()));
        Ok(vec![0xFF, 0xFB, 0x90, 0x00])
    }

    async fn transcribe(&self, upload: AudioUpload) -> Result<String> {
        self.uploads.lock().unwrap().push(upload);
        Ok("你好".to_string())
    }

    async fn realtime_session(&self, _model: &str, _voice: &str) -> Result<RealtimeSessionResponse> {
        Ok(RealtimeSessionResponse {
            client_secret: Some(ClientSecret {
                value: Some("ek_abc".to_string()),
            }),
        })
    }
}

fn state(upstream: Option<Arc<FakeUpstream>>) -> ServerState {
    ServerState {
        upstream: upstream.map(|u| u as Arc<dyn Upstream>),
        defaults: ServiceConfig::default(),
    }
}

fn post_json(uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ============================================================================
// Router
// ============================================================================

#[tokio::test]
async fn test_health_lists_voices() {
    let response = router(state(None)).oneshot(get("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["ok"], true);
    assert_eq!(body["mode"], "api-only");
    assert!(
        body["ttsVoices"]
            .as_array()
            .unwrap()
            .iter()
            .any(|v| v == "alloy")
    );
}

#[tokio::test]
async fn test_config_returns_defaults() {
    let response = router(state(None)).oneshot(get("/api/config")).await.unwrap();
    let body = json_body(response).await;
    assert_eq!(body["chatModel"], "gpt-4o-mini");
    assert_eq!(body["sttModel"], "gpt-4o-mini-transcribe");
    assert_eq!(body["ttsModel"], "tts-1");
    assert_eq!(body["realtimeModel"], "gpt-4o-mini-realtime-preview");
}

#[tokio::test]
async fn test_missing_key_rejects_upstream_routes() {
    let chat = serde_json::json!({ "messages": [{ "role": "user", "content": "hi" }] });
    let response = router(state(None))
        .oneshot(post_json("/api/chat", &chat))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "OpenAI key missing");

    let tts = serde_json::json!({ "text": "你好" });
    let response = router(state(None))
        .oneshot(post_json("/api/tts", &tts))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_chat_requires_messages() {
    let upstream = Arc::new(FakeUpstream::default());
    let response = router(state(Some(upstream.clone())))
        .oneshot(post_json("/api/chat", &serde_json::json!({ "messages": [] })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "messages required");
    assert!(upstream.chats.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_chat_uses_default_model_and_temperature() {
    let upstream = Arc::new(FakeUpstream::default());
    let body = serde_json::json!({ "messages": [{ "role": "user", "content": "你好" }] });
    let response = router(state(Some(upstream.clone())))
        .oneshot(post_json("/api/chat", &body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["choices"][0]["message"]["content"], " nǐ hǎo ");

    let chats = upstream.chats.lock().unwrap();
    assert_eq!(chats[0].0, "gpt-4o-mini");
    assert!((chats[0].2 - 0.6).abs() < 1e-6);
}

#[tokio::test]
async fn test_chat_upstream_failure_carries_detail() {
    let upstream = Arc::new(FakeUpstream {
        fail_chat: true,
        ..FakeUpstream::default()
    });
    let body = serde_json::json!({ "messages": [{ "role": "user", "content": "hi" }] });
    let response = router(state(Some(upstream)))
        .oneshot(post_json("/api/chat", &body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "chat failed");
    assert!(body["detail"].as_str().unwrap().contains("upstream 500"));
}

#[tokio::test]
async fn test_tts_requires_text() {
    let upstream = Arc::new(FakeUpstream::default());
    let response = router(state(Some(upstream.clone())))
        .oneshot(post_json("/api/tts", &serde_json::json!({ "text": "   " })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "text required");
    assert!(upstream.speech.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_tts_reports_coercion_in_headers() {
    let upstream = Arc::new(FakeUpstream::default());
    let body = serde_json::json!({ "text": "你好", "voice": "Robot", "model": "TTS-1-HD" });
    let response = router(state(Some(upstream.clone())))
        .oneshot(post_json("/api/tts", &body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::CONTENT_TYPE], "audio/mpeg");
    assert_eq!(headers["x-voice-requested"], "Robot");
    assert_eq!(headers["x-voice-final"], "alloy");
    assert_eq!(headers["x-voice-coerced"], "1");
    assert_eq!(headers["x-model-requested"], "TTS-1-HD");
    assert_eq!(headers["x-model-final"], "tts-1-hd");
    assert_eq!(headers["x-model-coerced"], "0");

    let speech = upstream.speech.lock().unwrap();
    assert_eq!(speech[0], ("tts-1-hd".to_string(), "alloy".to_string(), "你好".to_string()));
}

#[tokio::test]
async fn test_pinyin_is_best_effort_but_needs_a_key() {
    let body = serde_json::json!({ "text": "你好" });
    let response = router(state(None))
        .oneshot(post_json("/api/pinyin", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let missing_key = json_body(response).await;
    assert_eq!(missing_key["pinyin"], "");
    assert!(missing_key.get("error").is_none());

    let failing = Arc::new(FakeUpstream {
        fail_chat: true,
        ..FakeUpstream::default()
    });
    let response = router(state(Some(failing)))
        .oneshot(post_json("/api/pinyin", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["pinyin"], "");

    let upstream = Arc::new(FakeUpstream::default());
    let response = router(state(Some(upstream.clone())))
        .oneshot(post_json("/api/pinyin", &body))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["pinyin"], "nǐ hǎo");
    let chats = upstream.chats.lock().unwrap();
    assert_eq!(chats[0].1.len(), 2);
    assert!(chats[0].2.abs() < f32::EPSILON);
}

#[tokio::test]
async fn test_tone_is_wav() {
    let response = router(state(None)).oneshot(get("/api/tone")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/wav");

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..4], b"RIFF");
    assert_eq!(&bytes[8..12], b"WAVE");
}

#[tokio::test]
async fn test_stt_decodes_base64_audio() {
    use base64::Engine;

    let upstream = Arc::new(FakeUpstream::default());
    let audio = base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3, 4]);
    let body = serde_json::json!({ "audioBase64": audio, "mime": "audio/webm;codecs=opus" });
    let response = router(state(Some(upstream.clone())))
        .oneshot(post_json("/api/stt", &body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["text"], "你好");

    let uploads = upstream.uploads.lock().unwrap();
    assert_eq!(uploads[0].audio, vec![1, 2, 3, 4]);
    assert_eq!(uploads[0].file_name, "audio.webm");
    assert_eq!(uploads[0].language, "zh");
}

#[tokio::test]
async fn test_stt_rejects_bad_payloads() {
    let upstream = Arc::new(FakeUpstream::default());
    let response = router(state(Some(upstream.clone())))
        .oneshot(post_json("/api/stt", &serde_json::json!({ "audioBase64": "%%%" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = router(state(Some(upstream.clone())))
        .oneshot(post_json("/api/stt", &serde_json::json!({ "audioBase64": "" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "audio required");
    assert!(upstream.uploads.lock().unwrap().is_empty());
}

// ============================================================================
// Client against a live listener
// ============================================================================

async fn spawn_server(upstream: Option<Arc<FakeUpstream>>) -> HttpLanguageService {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state(upstream))).await.unwrap();
    });
    HttpLanguageService::new(&format!("http://{addr}")).unwrap()
}

#[tokio::test]
async fn test_client_round_trip() {
    let upstream = Arc::new(FakeUpstream::default());
    let client = spawn_server(Some(upstream.clone())).await;

    let health = client.health().await.unwrap();
    assert!(health.ok);
    assert_eq!(client.config().await.unwrap(), ServiceConfig::default());

    let reply = client
        .chat(&ChatRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![ChatMessage::user("你好")],
            temperature: Some(0.55),
        })
        .await
        .unwrap();
    assert_eq!(reply.trim(), "nǐ hǎo");

    let speech = client
        .synthesize(&SpeechRequest {
            text: "你好".to_string(),
            voice: "Nova".to_string(),
            model: "tts-1".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(speech.audio, vec![0xFF, 0xFB, 0x90, 0x00]);
    assert_eq!(speech.voice.value, "nova");
    assert!(!speech.voice.coerced);

    let text = client
        .transcribe(&TranscriptionRequest {
            audio: vec![0u8; 2048],
            mime: "audio/wav".to_string(),
            language: "zh".to_string(),
            model: "gpt-4o-mini-transcribe".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(text, "你好");
    let uploads = upstream.uploads.lock().unwrap().clone();
    assert_eq!(uploads[0].file_name, "audio.wav");
    assert_eq!(uploads[0].audio.len(), 2048);

    assert_eq!(client.romanize("你好", "gpt-4o-mini").await.as_deref(), Some("nǐ hǎo"));
    assert_eq!(
        client.realtime_session("gpt-4o-mini-realtime-preview", "verse").await.unwrap(),
        "ek_abc"
    );
}

#[tokio::test]
async fn test_client_without_key_degrades() {
    let client = spawn_server(None).await;

    assert!(client.romanize("你好", "gpt-4o-mini").await.is_none());
    assert!(matches!(
        client.realtime_session("gpt-4o-mini-realtime-preview", "verse").await,
        Err(Error::Signaling(_))
    ));
    assert!(matches!(
        client
            .synthesize(&SpeechRequest {
                text: "你好".to_string(),
                voice: "alloy".to_string(),
                model: "tts-1".to_string(),
            })
            .await,
        Err(Error::Tts(_))
    ));
}
