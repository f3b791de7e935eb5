//! TurnController: one conversational turn from user input to spoken reply
//!
//! State machine: `Idle → AwaitingReply → Speaking → Idle`. Overlapping
//! `submit_turn` calls are not excluded here; input engines issue one turn
//! at a time. After [`TurnController::shutdown`] any pending continuation is
//! discarded instead of mutating the store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{RwLock, broadcast, watch};

use super::policy::DifficultyPolicy;
use super::prompt::{
    AUTO_TOPIC, GREETING_INSTRUCTION, PromptSpec, build_messages, effective_temperature,
    system_instruction,
};
use super::reply::ParsedReply;
use super::store::{ConversationTurn, SharedStore};
use crate::service::{ChatMessage, ChatRequest, LanguageService};
use crate::vocab::{VocabEntry, VocabularySource};
use crate::voice::{NoopObserver, Speaker, SpeechObserver, Utterance, VoiceSelection, zh_voice_hint};
use crate::{Error, Result};

/// Default creativity for user turns
pub const DEFAULT_TEMPERATURE: f32 = 0.4;

/// Upper bound for the delay before the gloss line
pub const MAX_GLOSS_DELAY: Duration = Duration::from_millis(2000);

/// Language tag for the primary line
const PRIMARY_LANGUAGE: &str = "zh-CN";

/// Language tag for the gloss line
const GLOSS_LANGUAGE: &str = "en-US";

/// Primary-line rate when slow speech is on
const SLOW_RATE: f32 = 0.9;

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TurnState {
    Idle,
    AwaitingReply,
    Speaking,
}

/// Severity of a user-visible notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warn,
    Error,
}

/// Session-scoped event for presentation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TutorEvent {
    Notice { level: NoticeLevel, message: String },
    TurnState { state: TurnState },
    /// Highlighted romanization token; `None` resets before speaking
    Highlight { index: Option<usize> },
}

/// Per-call turn options
#[derive(Debug, Clone)]
pub struct TurnOptions {
    /// Creativity in `[0, 1]`
    pub temperature: f32,
    /// Subset of vocabulary to emphasize
    pub practice_focus: Option<Vec<VocabEntry>>,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            practice_focus: None,
        }
    }
}

/// Tutor behaviour that may change between turns
#[derive(Debug, Clone)]
pub struct TutorSettings {
    pub chat_model: String,
    /// Difficulty slider, 0–100
    pub difficulty: u8,
    /// Topic constraint; `auto` or empty for none
    pub topic: String,
    /// Ask for and display the gloss line
    pub show_gloss: bool,
    /// Speak the gloss line after the primary line
    pub speak_gloss: bool,
    pub gloss_delay: Duration,
    pub slow_speech: bool,
    pub allow_fallback: bool,
    pub primary_voice: VoiceSelection,
    pub gloss_voice: VoiceSelection,
}

impl Default for TutorSettings {
    fn default() -> Self {
        Self {
            chat_model: "gpt-4o-mini".to_string(),
            difficulty: 35,
            topic: AUTO_TOPIC.to_string(),
            show_gloss: true,
            speak_gloss: false,
            gloss_delay: Duration::ZERO,
            slow_speech: false,
            allow_fallback: true,
            primary_voice: VoiceSelection::default(),
            gloss_voice: VoiceSelection::default(),
        }
    }
}

/// Publishes highlight progress for the primary line
struct HighlightObserver {
    events: broadcast::Sender<TutorEvent>,
    token_count: usize,
}

impl SpeechObserver for HighlightObserver {
    fn on_start(&self) {
        let _ = self.events.send(TutorEvent::Highlight { index: None });
    }

    fn on_progress(&self, token_index: usize) {
        let _ = self.events.send(TutorEvent::Highlight {
            index: Some(token_index),
        });
    }

    fn on_end(&self) {
        if self.token_count > 0 {
            let _ = self.events.send(TutorEvent::Highlight {
                index: Some(self.token_count - 1),
            });
        }
    }
}

/// Orchestrates turns against the language service and speaker
pub struct TurnController {
    service: Arc<dyn LanguageService>,
    speaker: Arc<dyn Speaker>,
    store: SharedStore,
    settings: RwLock<TutorSettings>,
    state: watch::Sender<TurnState>,
    events: broadcast::Sender<TutorEvent>,
    greeted: AtomicBool,
    alive: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl TurnController {
    #[must_use]
    pub fn new(
        service: Arc<dyn LanguageService>,
        speaker: Arc<dyn Speaker>,
        store: SharedStore,
        mut settings: TutorSettings,
    ) -> Self {
        settings.difficulty = settings.difficulty.min(100);
        settings.gloss_delay = settings.gloss_delay.min(MAX_GLOSS_DELAY);
        let (state, _) = watch::channel(TurnState::Idle);
        let (events, _) = broadcast::channel(64);
        let (shutdown, _) = watch::channel(false);
        Self {
            service,
            speaker,
            store,
            settings: RwLock::new(settings),
            state,
            events,
            greeted: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            shutdown,
        }
    }

    #[must_use]
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    #[must_use]
    pub fn state(&self) -> TurnState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<TurnState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TutorEvent> {
        self.events.subscribe()
    }

    /// Current settings snapshot
    pub async fn settings(&self) -> TutorSettings {
        self.settings.read().await.clone()
    }

    /// Change settings for subsequent turns
    pub async fn update_settings(&self, update: impl FnOnce(&mut TutorSettings) + Send) {
        let mut settings = self.settings.write().await;
        update(&mut settings);
        settings.difficulty = settings.difficulty.min(100);
        settings.gloss_delay = settings.gloss_delay.min(MAX_GLOSS_DELAY);
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Tear down: pending continuations are discarded, delays cancelled
    pub fn shutdown(&self) {
        self.alive.store(false, Ordering::Release);
        self.shutdown.send_replace(true);
        tracing::debug!("turn controller shut down");
    }

    fn set_state(&self, state: TurnState) {
        self.state.send_replace(state);
        let _ = self.events.send(TutorEvent::TurnState { state });
    }

    fn notice(&self, level: NoticeLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            NoticeLevel::Error => tracing::error!(%message, "notice"),
            NoticeLevel::Warn => tracing::warn!(%message, "notice"),
            NoticeLevel::Info => tracing::info!(%message, "notice"),
        }
        let _ = self.events.send(TutorEvent::Notice { level, message });
    }

    /// Replace the vocabulary; the first non-empty list triggers the greeting
    /// turn exactly once
    ///
    /// # Errors
    ///
    /// Returns error if the greeting turn fails
    pub async fn set_vocabulary(&self, entries: Vec<VocabEntry>) -> Result<Option<ConversationTurn>> {
        let non_empty = !entries.is_empty();
        self.store.write().await.set_vocabulary(entries);

        if non_empty && !self.greeted.swap(true, Ordering::AcqRel) {
            tracing::info!("vocabulary loaded, greeting");
            return self
                .submit_turn(GREETING_INSTRUCTION, TurnOptions::default())
                .await
                .map(Some);
        }
        Ok(None)
    }

    /// Load vocabulary from `source` and apply it
    ///
    /// # Errors
    ///
    /// Returns error if loading or the greeting turn fails
    pub async fn load_vocabulary(&self, source: &dyn VocabularySource) -> Result<Option<ConversationTurn>> {
        let entries = source.load().await?;
        self.set_vocabulary(entries).await
    }

    /// Record a recognized or typed user response
    pub async fn record_user_response(&self, response: &str) {
        self.store.write().await.set_user_response(response.trim());
    }

    /// Empty turn history and last user response
    pub async fn clear_history(&self) {
        self.store.write().await.clear_history();
        tracing::info!("history cleared");
    }

    /// Run one turn for `input`
    ///
    /// # Errors
    ///
    /// Returns error if the chat request fails (state is left unchanged) or
    /// if the controller was shut down while the request was in flight
    pub async fn submit_turn(&self, input: &str, options: TurnOptions) -> Result<ConversationTurn> {
        if !self.is_alive() {
            return Err(Error::Cancelled("turn controller shut down".to_string()));
        }
        let settings = self.settings().await;

        let (request, user_reply_text) = {
            let store = self.store.read().await;
            let system = system_instruction(&PromptSpec {
                policy: DifficultyPolicy::from_difficulty(settings.difficulty),
                topic: &settings.topic,
                with_gloss: settings.show_gloss,
                vocabulary: store.vocabulary(),
                practice_focus: options.practice_focus.as_deref(),
            });
            let request = ChatRequest {
                model: settings.chat_model.clone(),
                messages: build_messages(system, store.messages(), input),
                temperature: Some(effective_temperature(options.temperature)),
            };
            (request, store.user_response().to_string())
        };

        self.set_state(TurnState::AwaitingReply);
        tracing::debug!(messages = request.messages.len(), "submitting turn");

        let raw = match self.service.chat(&request).await {
            Ok(raw) => raw,
            Err(e) => {
                if self.is_alive() {
                    self.notice(NoticeLevel::Error, "Chat request failed");
                    self.set_state(TurnState::Idle);
                }
                return Err(e);
            }
        };
        if !self.is_alive() {
            return Err(Error::Cancelled("reply arrived after shutdown".to_string()));
        }

        let mut parsed = ParsedReply::parse(&raw, settings.show_gloss);
        if !parsed.primary_text.is_empty() && parsed.romanized_text.is_empty() {
            match self.service.romanize(&parsed.primary_text, &settings.chat_model).await {
                Some(pinyin) => parsed.romanized_text = pinyin,
                None => tracing::debug!("romanization unavailable, continuing without"),
            }
            if !self.is_alive() {
                return Err(Error::Cancelled("reply arrived after shutdown".to_string()));
            }
        }

        let turn = {
            let mut store = self.store.write().await;
            let turn = ConversationTurn {
                timestamp: Utc::now(),
                prompt_text: input.to_string(),
                raw_reply_text: raw.clone(),
                used_vocab: parsed.used_vocabulary(store.vocabulary()),
                parsed_reply: parsed,
                user_reply_text,
            };
            store.push_turn(turn.clone());
            store.push_messages([ChatMessage::assistant(raw)]);
            store.set_speaking(true);
            turn
        };
        tracing::info!(
            primary = %turn.parsed_reply.primary_text,
            used_vocab = turn.used_vocab.len(),
            "turn complete"
        );

        self.set_state(TurnState::Speaking);
        self.speak_reply(&turn.parsed_reply, &settings).await;

        if self.is_alive() {
            self.store.write().await.set_speaking(false);
            self.set_state(TurnState::Idle);
        }
        Ok(turn)
    }

    /// Speak the last reply again
    ///
    /// # Errors
    ///
    /// Returns error if there is no reply yet or speech fails
    pub async fn repeat_last(&self) -> Result<()> {
        let reply = self
            .store
            .read()
            .await
            .last_turn()
            .map(|t| t.parsed_reply.clone())
            .ok_or_else(|| Error::Service("nothing to repeat".to_string()))?;
        let settings = self.settings().await;
        self.speak_primary(&reply, &settings).await
    }

    async fn speak_primary(&self, reply: &ParsedReply, settings: &TutorSettings) -> Result<()> {
        let text = if reply.primary_text.is_empty() {
            &reply.romanized_text
        } else {
            &reply.primary_text
        };
        if text.is_empty() {
            return Ok(());
        }

        let tokens = reply.romanized_tokens();
        let observer = HighlightObserver {
            events: self.events.clone(),
            token_count: tokens.len(),
        };
        let utterance = Utterance::new(text.clone(), PRIMARY_LANGUAGE, settings.primary_voice.clone())
            .with_rate(if settings.slow_speech { SLOW_RATE } else { 1.0 })
            .with_tokens(tokens)
            .with_hint(zh_voice_hint())
            .with_fallback(settings.allow_fallback);

        self.speaker.speak(&utterance, &observer).await.map(|_| ())
    }

    async fn speak_reply(&self, reply: &ParsedReply, settings: &TutorSettings) {
        if let Err(e) = self.speak_primary(reply, settings).await {
            tracing::warn!(error = %e, "primary line speech failed");
            self.notice(NoticeLevel::Error, "Chinese TTS failed.");
        }

        let Some(gloss) = reply.gloss_text.as_deref().filter(|g| !g.is_empty()) else {
            return;
        };
        if !(settings.show_gloss && settings.speak_gloss) || !self.is_alive() {
            return;
        }

        if !settings.gloss_delay.is_zero() {
            let mut shutdown = self.shutdown.subscribe();
            tokio::select! {
                () = tokio::time::sleep(settings.gloss_delay) => {}
                _ = shutdown.wait_for(|down| *down) => {
                    tracing::debug!("gloss delay cancelled");
                    return;
                }
            }
        }

        let utterance = Utterance::new(gloss, GLOSS_LANGUAGE, settings.gloss_voice.clone())
            .with_fallback(settings.allow_fallback);
        if let Err(e) = self.speaker.speak(&utterance, &NoopObserver).await {
            tracing::warn!(error = %e, "gloss line speech failed");
            self.notice(NoticeLevel::Error, "TTS failed.");
        }
    }
}
