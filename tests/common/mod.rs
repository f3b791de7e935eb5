//! Shared test utilities: in-memory fakes for every collaborator seam
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::Notify;

use huayu_buddy::live::{PeerFactory, PeerLink, RealtimeSignaling};
use huayu_buddy::service::{
    ChatRequest, HealthStatus, LanguageService, ServiceConfig, SpeechRequest, SynthesizedSpeech,
    TranscriptionRequest,
};
use huayu_buddy::voice::{
    CaptureStream, Microphone, Recording, SpeechObserver, SpeechOutcome, Speaker, Utterance,
    sanitize_model, sanitize_voice, Backend,
};
use huayu_buddy::{Error, Result};

/// Scripted language service that records every call
#[derive(Default)]
pub struct FakeService {
    pub chat_replies: Mutex<VecDeque<Result<String>>>,
    pub chat_requests: Mutex<Vec<ChatRequest>>,
    pub romanization: Mutex<Option<String>>,
    pub romanize_calls: AtomicUsize,
    pub transcript: Mutex<String>,
    pub transcribe_calls: AtomicUsize,
    pub synthesize_calls: AtomicUsize,
    pub fail_synthesis: AtomicBool,
    pub fail_credential: AtomicBool,
    /// Held while a chat request is in flight, when set
    pub chat_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_replies(replies: &[&str]) -> Arc<Self> {
        let service = Self::default();
        service
            .chat_replies
            .lock()
            .unwrap()
            .extend(replies.iter().map(|r| Ok((*r).to_string())));
        Arc::new(service)
    }

    pub fn push_reply(&self, reply: Result<String>) {
        self.chat_replies.lock().unwrap().push_back(reply);
    }

    pub fn set_transcript(&self, text: &str) {
        *self.transcript.lock().unwrap() = text.to_string();
    }

    pub fn chat_count(&self) -> usize {
        self.chat_requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> ChatRequest {
        self.chat_requests.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl LanguageService for FakeService {
    async fn chat(&self, request: &ChatRequest) -> Result<String> {
        self.chat_requests.lock().unwrap().push(request.clone());
        let gate = self.chat_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.chat_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Chat("no scripted reply".to_string())))
    }

    async fn synthesize(&self, request: &SpeechRequest) -> Result<SynthesizedSpeech> {
        self.synthesize_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_synthesis.load(Ordering::SeqCst) {
            return Err(Error::Tts("server tts failed: 400".to_string()));
        }
        Ok(SynthesizedSpeech {
            audio: vec![0xFF; 64],
            voice: sanitize_voice(&request.voice),
            model: sanitize_model(&request.model),
        })
    }

    async fn transcribe(&self, _request: &TranscriptionRequest) -> Result<String> {
        self.transcribe_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.transcript.lock().unwrap().clone())
    }

    async fn romanize(&self, _text: &str, _model: &str) -> Option<String> {
        self.romanize_calls.fetch_add(1, Ordering::SeqCst);
        self.romanization.lock().unwrap().clone()
    }

    async fn realtime_session(&self, _model: &str, _voice: &str) -> Result<String> {
        if self.fail_credential.load(Ordering::SeqCst) {
            return Err(Error::Signaling("failed to create realtime session: 400".to_string()));
        }
        Ok("ek_test".to_string())
    }

    async fn health(&self) -> Result<HealthStatus> {
        Ok(HealthStatus {
            ok: true,
            mode: "api-only".to_string(),
            tts_voices: vec!["alloy".to_string()],
        })
    }

    async fn config(&self) -> Result<ServiceConfig> {
        Ok(ServiceConfig::default())
    }
}

/// Speaker that records what it was asked to say
#[derive(Default)]
pub struct FakeSpeaker {
    pub spoken: Mutex<Vec<Utterance>>,
    pub fail: AtomicBool,
}

impl FakeSpeaker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn texts(&self) -> Vec<String> {
        self.spoken
            .lock()
            .unwrap()
            .iter()
            .map(|u| u.text.clone())
            .collect()
    }
}

#[async_trait]
impl Speaker for FakeSpeaker {
    async fn speak(&self, utterance: &Utterance, observer: &dyn SpeechObserver) -> Result<SpeechOutcome> {
        observer.on_start();
        self.spoken.lock().unwrap().push(utterance.clone());
        if self.fail.load(Ordering::SeqCst) {
            let error = Error::Tts("speaker unavailable".to_string());
            observer.on_error(&error);
            return Err(error);
        }
        for index in 0..utterance.tokens.len() {
            observer.on_progress(index);
        }
        observer.on_end();
        Ok(SpeechOutcome {
            backend: Backend::Local,
            voice: None,
            model: None,
            local_voice: None,
        })
    }
}

/// Microphone that "captures" a fixed buffer
pub struct FakeMicrophone {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub opened: AtomicUsize,
    pub stopped: Arc<AtomicUsize>,
}

impl FakeMicrophone {
    /// `seconds` of a quiet tone at 16kHz
    pub fn with_audio(seconds: f32) -> Arc<Self> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let len = (16_000.0 * seconds) as usize;
        let samples = (0..len).map(|i| ((i % 32) as f32 / 32.0) * 0.2).collect();
        Arc::new(Self {
            samples,
            sample_rate: 16_000,
            opened: AtomicUsize::new(0),
            stopped: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Captures nothing at all
    pub fn silent() -> Arc<Self> {
        Arc::new(Self {
            samples: Vec::new(),
            sample_rate: 16_000,
            opened: AtomicUsize::new(0),
            stopped: Arc::new(AtomicUsize::new(0)),
        })
    }
}

struct FakeCapture {
    samples: Mutex<Vec<f32>>,
    sample_rate: u32,
    stopped: Arc<AtomicUsize>,
}

impl CaptureStream for FakeCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn take_samples(&self) -> Vec<f32> {
        std::mem::take(&mut *self.samples.lock().unwrap())
    }

    fn stop(self: Box<Self>) -> Result<Recording> {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(Recording {
            samples: self.take_samples(),
            sample_rate: self.sample_rate,
        })
    }
}

impl Microphone for FakeMicrophone {
    fn open(&self, _device: Option<&str>) -> Result<Box<dyn CaptureStream>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeCapture {
            samples: Mutex::new(self.samples.clone()),
            sample_rate: self.sample_rate,
            stopped: Arc::clone(&self.stopped),
        }))
    }

    fn devices(&self) -> Vec<String> {
        vec!["Fake Mic".to_string()]
    }
}

/// Where a fake peer should fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerFailure {
    #[default]
    None,
    Offer,
    Answer,
}

/// Counters shared by every peer a [`FakePeerFactory`] creates
#[derive(Default)]
pub struct PeerStats {
    pub created: AtomicUsize,
    pub closed: AtomicUsize,
    pub answers: Mutex<Vec<String>>,
}

pub struct FakePeerFactory {
    pub stats: Arc<PeerStats>,
    pub failure: PeerFailure,
}

impl FakePeerFactory {
    pub fn new(failure: PeerFailure) -> Arc<Self> {
        Arc::new(Self {
            stats: Arc::new(PeerStats::default()),
            failure,
        })
    }
}

struct FakePeer {
    stats: Arc<PeerStats>,
    failure: PeerFailure,
    mic: AtomicBool,
}

#[async_trait]
impl PeerLink for FakePeer {
    async fn create_offer(&self) -> Result<String> {
        if self.failure == PeerFailure::Offer {
            return Err(Error::Live("offer failed".to_string()));
        }
        Ok("v=0\r\no=- offer".to_string())
    }

    async fn apply_answer(&self, sdp: String) -> Result<()> {
        if self.failure == PeerFailure::Answer {
            return Err(Error::Live("bad answer".to_string()));
        }
        self.stats.answers.lock().unwrap().push(sdp);
        Ok(())
    }

    fn set_microphone_enabled(&self, enabled: bool) {
        self.mic.store(enabled, Ordering::SeqCst);
    }

    fn microphone_enabled(&self) -> bool {
        self.mic.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl PeerFactory for FakePeerFactory {
    async fn create(&self) -> Result<Box<dyn PeerLink>> {
        self.stats.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakePeer {
            stats: Arc::clone(&self.stats),
            failure: self.failure,
            mic: AtomicBool::new(false),
        }))
    }
}

/// Signaling that answers every offer, optionally after a gate opens
#[derive(Default)]
pub struct FakeSignaling {
    pub fail_exchange: AtomicBool,
    pub fail_credential: AtomicBool,
    pub exchanges: AtomicUsize,
    pub gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeSignaling {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Block SDP exchange until the returned notify fires
    pub fn gated() -> (Arc<Self>, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let signaling = Self::default();
        *signaling.gate.lock().unwrap() = Some(Arc::clone(&gate));
        (Arc::new(signaling), gate)
    }
}

#[async_trait]
impl RealtimeSignaling for FakeSignaling {
    async fn credential(&self, _model: &str, _voice: &str) -> Result<SecretString> {
        if self.fail_credential.load(Ordering::SeqCst) {
            return Err(Error::Signaling("no ephemeral token".to_string()));
        }
        Ok(SecretString::from("ek_test".to_string()))
    }

    async fn exchange(&self, _model: &str, _credential: &SecretString, offer_sdp: &str) -> Result<String> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_exchange.load(Ordering::SeqCst) {
            return Err(Error::Signaling("SDP exchange failed: 401 Unauthorized".to_string()));
        }
        Ok(format!("answer-to:{offer_sdp}"))
    }
}
