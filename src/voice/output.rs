//! SpeechOutputEngine: one line of text to audible speech
//!
//! Chooses between remote synthesis (bytes from [`LanguageService`], played
//! through an [`AudioPlayer`]) and a [`LocalSynthesizer`]. Remote is used when
//! forced or when no local voices exist; a failed remote request falls
//! through to local only when `allow_fallback` is set.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::local::{LocalSynthesizer, LocalVoice, SynthesisEvent, filter_voices};
use super::playback::AudioPlayer;
use super::sanitize::{Sanitized, sanitize_model, sanitize_voice};
use crate::service::{LanguageService, SpeechRequest};
use crate::{Error, Result};

/// Name/language pattern used to find a Mandarin local voice
const ZH_VOICE_HINT: &str = r"(?i)zh|cmn|中文|Xiao|Ting|Mei|Google|Microsoft";

static ZH_HINT: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(ZH_VOICE_HINT).ok());

/// Default hint for Mandarin voices
#[must_use]
pub fn zh_voice_hint() -> Option<Regex> {
    ZH_HINT.clone()
}

/// Preferred synthesis backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Local,
    Remote,
}

/// Which voice to use on each backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceSelection {
    pub backend: Backend,
    /// Exact local voice id, if one was chosen
    pub local_voice_id: Option<String>,
    pub remote_voice_id: String,
    pub remote_model_id: String,
}

impl Default for VoiceSelection {
    fn default() -> Self {
        Self {
            backend: Backend::Local,
            local_voice_id: None,
            remote_voice_id: super::sanitize::DEFAULT_VOICE.to_string(),
            remote_model_id: super::sanitize::DEFAULT_MODEL.to_string(),
        }
    }
}

/// One line to speak
#[derive(Debug, Clone)]
pub struct Utterance {
    pub text: String,
    /// Language tag, e.g. `zh-CN`
    pub language: String,
    pub selection: VoiceSelection,
    pub rate: f32,
    /// Tokens for progressive highlighting; boundary events map onto these
    pub tokens: Vec<String>,
    /// Fallback pattern for local voice resolution
    pub voice_hint: Option<Regex>,
    pub allow_fallback: bool,
}

impl Utterance {
    #[must_use]
    pub fn new(text: impl Into<String>, language: impl Into<String>, selection: VoiceSelection) -> Self {
        Self {
            text: text.into(),
            language: language.into(),
            selection,
            rate: 1.0,
            tokens: Vec::new(),
            voice_hint: None,
            allow_fallback: true,
        }
    }

    #[must_use]
    pub const fn with_rate(mut self, rate: f32) -> Self {
        self.rate = rate;
        self
    }

    #[must_use]
    pub fn with_tokens(mut self, tokens: Vec<String>) -> Self {
        self.tokens = tokens;
        self
    }

    #[must_use]
    pub fn with_hint(mut self, hint: Option<Regex>) -> Self {
        self.voice_hint = hint;
        self
    }

    #[must_use]
    pub const fn with_fallback(mut self, allow: bool) -> Self {
        self.allow_fallback = allow;
        self
    }
}

/// Lifecycle notifications for one `speak` call
///
/// `on_start` precedes any audio request. On success `on_end` fires once;
/// on failure `on_error` fires once and `on_end` does not.
pub trait SpeechObserver: Send + Sync {
    fn on_start(&self) {}
    fn on_progress(&self, _token_index: usize) {}
    fn on_end(&self) {}
    fn on_error(&self, _error: &Error) {}
}

/// Observer that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl SpeechObserver for NoopObserver {}

/// What a successful `speak` actually did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechOutcome {
    pub backend: Backend,
    /// Server-observed voice (remote only)
    pub voice: Option<Sanitized>,
    /// Server-observed model (remote only)
    pub model: Option<Sanitized>,
    /// Local voice used, when one was resolved
    pub local_voice: Option<String>,
}

/// Speaks a line of text
#[async_trait]
pub trait Speaker: Send + Sync {
    /// Speak `utterance` to completion
    ///
    /// # Errors
    ///
    /// Returns error if no backend could produce audio
    async fn speak(&self, utterance: &Utterance, observer: &dyn SpeechObserver) -> Result<SpeechOutcome>;
}

/// Pick a local voice: exact id, then hint match on name or language
#[must_use]
pub fn resolve_local_voice<'a>(
    voices: &'a [LocalVoice],
    id: Option<&str>,
    hint: Option<&Regex>,
) -> Option<&'a LocalVoice> {
    id.and_then(|id| voices.iter().find(|v| v.id == id))
        .or_else(|| {
            hint.and_then(|h| {
                voices
                    .iter()
                    .find(|v| h.is_match(&v.name) || h.is_match(&v.language))
            })
        })
}

/// Token index for a boundary at `char_index`
#[must_use]
pub fn boundary_token(char_index: usize, token_count: usize) -> Option<usize> {
    (token_count > 0).then(|| char_index.min(token_count - 1))
}

/// Remote/local synthesis with fallback
pub struct SpeechOutputEngine {
    service: Arc<dyn LanguageService>,
    player: Arc<dyn AudioPlayer>,
    local: Option<Arc<dyn LocalSynthesizer>>,
}

impl SpeechOutputEngine {
    #[must_use]
    pub fn new(
        service: Arc<dyn LanguageService>,
        player: Arc<dyn AudioPlayer>,
        local: Option<Arc<dyn LocalSynthesizer>>,
    ) -> Self {
        Self {
            service,
            player,
            local,
        }
    }

    /// Local voices filtered by language prefix; empty without a local backend
    pub async fn local_voices(&self, language_prefix: &str) -> Vec<LocalVoice> {
        match &self.local {
            Some(local) => filter_voices(local.voices().await, language_prefix),
            None => Vec::new(),
        }
    }

    async fn speak_remote(&self, utterance: &Utterance) -> Result<SpeechOutcome> {
        let voice = sanitize_voice(&utterance.selection.remote_voice_id);
        let model = sanitize_model(&utterance.selection.remote_model_id);
        if voice.coerced || model.coerced {
            tracing::warn!(
                voice_requested = %voice.requested,
                voice = %voice.value,
                model_requested = %model.requested,
                model = %model.value,
                "coerced remote voice selection"
            );
        }

        let request = SpeechRequest {
            text: utterance.text.clone(),
            voice: voice.value.clone(),
            model: model.value.clone(),
        };
        let speech = self.service.synthesize(&request).await?;

        self.player.play(&speech.audio).await?;

        Ok(SpeechOutcome {
            backend: Backend::Remote,
            voice: Some(voice.then(speech.voice)),
            model: Some(model.then(speech.model)),
            local_voice: None,
        })
    }

    async fn speak_local(
        &self,
        local: &dyn LocalSynthesizer,
        voices: &[LocalVoice],
        utterance: &Utterance,
        observer: &dyn SpeechObserver,
    ) -> Result<SpeechOutcome> {
        let voice = resolve_local_voice(
            voices,
            utterance.selection.local_voice_id.as_deref(),
            utterance.voice_hint.as_ref(),
        );

        let mut stream = local.speak(&utterance.text, &utterance.language, voice, utterance.rate)?;
        while let Some(event) = stream.next().await {
            match event {
                SynthesisEvent::Boundary { char_index, .. } => {
                    if let Some(idx) = boundary_token(char_index, utterance.tokens.len()) {
                        observer.on_progress(idx);
                    }
                }
                SynthesisEvent::Finished => {
                    return Ok(SpeechOutcome {
                        backend: Backend::Local,
                        voice: None,
                        model: None,
                        local_voice: voice.map(|v| v.id.clone()),
                    });
                }
                SynthesisEvent::Failed(reason) => return Err(Error::Tts(reason)),
            }
        }
        Err(Error::Tts("local synthesis ended without completing".to_string()))
    }

    async fn run(&self, utterance: &Utterance, observer: &dyn SpeechObserver) -> Result<SpeechOutcome> {
        let voices = match &self.local {
            Some(local) => local.voices().await,
            None => Vec::new(),
        };
        let use_remote = utterance.selection.backend == Backend::Remote || voices.is_empty();

        if use_remote {
            match self.speak_remote(utterance).await {
                Ok(outcome) => return Ok(outcome),
                Err(e @ Error::Playback(_)) => return Err(e),
                Err(e) if !utterance.allow_fallback => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, "remote synthesis failed, falling back to local");
                }
            }
        }

        let local = self
            .local
            .as_deref()
            .ok_or_else(|| Error::Tts("no local synthesizer available".to_string()))?;
        self.speak_local(local, &voices, utterance, observer).await
    }
}

#[async_trait]
impl Speaker for SpeechOutputEngine {
    async fn speak(&self, utterance: &Utterance, observer: &dyn SpeechObserver) -> Result<SpeechOutcome> {
        observer.on_start();
        match self.run(utterance, observer).await {
            Ok(outcome) => {
                tracing::debug!(backend = ?outcome.backend, chars = utterance.text.chars().count(), "spoke line");
                observer.on_end();
                Ok(outcome)
            }
            Err(e) => {
                tracing::warn!(error = %e, "speech output failed");
                observer.on_error(&e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voices() -> Vec<LocalVoice> {
        vec![
            LocalVoice {
                id: "gmw/en-US".to_string(),
                name: "English (America)".to_string(),
                language: "en-us".to_string(),
            },
            LocalVoice {
                id: "sit/cmn".to_string(),
                name: "Chinese (Mandarin)".to_string(),
                language: "cmn".to_string(),
            },
        ]
    }

    #[test]
    fn test_resolve_exact_id_first() {
        let voices = voices();
        let hint = zh_voice_hint();
        let v = resolve_local_voice(&voices, Some("gmw/en-US"), hint.as_ref()).unwrap();
        assert_eq!(v.id, "gmw/en-US");
    }

    #[test]
    fn test_resolve_falls_back_to_hint_then_default() {
        let voices = voices();
        let hint = zh_voice_hint();
        let v = resolve_local_voice(&voices, Some("missing"), hint.as_ref()).unwrap();
        assert_eq!(v.id, "sit/cmn");
        assert!(resolve_local_voice(&voices, None, None).is_none());
    }

    #[test]
    fn test_boundary_token_clamps() {
        assert_eq!(boundary_token(0, 3), Some(0));
        assert_eq!(boundary_token(7, 3), Some(2));
        assert_eq!(boundary_token(1, 0), None);
    }
}
