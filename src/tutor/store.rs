//! Conversation state container
//!
//! Created at session start, owned by the application and shared with the
//! controller and presentation through [`SharedStore`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::reply::ParsedReply;
use crate::service::ChatMessage;
use crate::vocab::VocabEntry;

/// Store handle shared across the session
pub type SharedStore = Arc<RwLock<ConversationStore>>;

/// One completed turn; never mutated after it is appended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    pub timestamp: DateTime<Utc>,
    pub prompt_text: String,
    pub raw_reply_text: String,
    pub parsed_reply: ParsedReply,
    pub user_reply_text: String,
    pub used_vocab: Vec<VocabEntry>,
}

/// Vocabulary, turn history, running message log and speaking flag
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    vocabulary: Vec<VocabEntry>,
    history: Vec<ConversationTurn>,
    messages: Vec<ChatMessage>,
    user_response: String,
    speaking: bool,
}

impl ConversationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a fresh store for sharing
    #[must_use]
    pub fn shared() -> SharedStore {
        Arc::new(RwLock::new(Self::new()))
    }

    #[must_use]
    pub fn vocabulary(&self) -> &[VocabEntry] {
        &self.vocabulary
    }

    pub fn set_vocabulary(&mut self, entries: Vec<VocabEntry>) {
        self.vocabulary = entries;
    }

    /// Completed turns, oldest first
    #[must_use]
    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    #[must_use]
    pub fn last_turn(&self) -> Option<&ConversationTurn> {
        self.history.last()
    }

    pub(crate) fn push_turn(&mut self, turn: ConversationTurn) {
        self.history.push(turn);
    }

    /// Running non-system message log
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub(crate) fn push_messages(&mut self, messages: impl IntoIterator<Item = ChatMessage>) {
        self.messages.extend(messages);
    }

    /// Last recognized or typed user response
    #[must_use]
    pub fn user_response(&self) -> &str {
        &self.user_response
    }

    pub fn set_user_response(&mut self, response: impl Into<String>) {
        self.user_response = response.into();
    }

    #[must_use]
    pub const fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn set_speaking(&mut self, speaking: bool) {
        self.speaking = speaking;
    }

    /// Empty the turn history and last user response; vocabulary is kept
    pub fn clear_history(&mut self) {
        self.history.clear();
        self.user_response.clear();
    }
}
