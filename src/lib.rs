//! Huayu Buddy - spoken Mandarin conversation tutor
//!
//! This library provides the core functionality for the tutor:
//! - Turn orchestration (difficulty policy, prompt assembly, reply parsing)
//! - Speech output with remote synthesis and local fallback
//! - Speech input via recognition or push-to-record and transcription
//! - Live bidirectional voice sessions over WebRTC
//! - The HTTP serving layer that fronts the speech and language provider
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   Presentation                       │
//! │        CLI  │  TutorEvent  │  MeterEvent             │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Huayu client                         │
//! │  TurnController │ Speech I/O │ LiveSessionManager    │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │            Serving layer (/api/*)                    │
//! │   Chat  │  TTS  │  STT  │  Pinyin  │  Realtime      │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod live;
pub mod server;
pub mod service;
pub mod tutor;
pub mod vocab;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use live::{LiveSessionManager, LiveState};
pub use service::{HttpLanguageService, LanguageService};
pub use tutor::{ConversationStore, ConversationTurn, ParsedReply, TurnController, TutorEvent};
pub use vocab::{TextFileVocabulary, VocabEntry, VocabularySource};
