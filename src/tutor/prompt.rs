//! System instruction assembly for tutor turns

use crate::service::{ChatMessage, ChatRole};
use crate::vocab::{VocabEntry, format_vocab};

use super::policy::DifficultyPolicy;

/// Instruction used for the automatic first turn
pub const GREETING_INSTRUCTION: &str =
    "Greet me briefly and ask a very simple question that uses the uploaded vocabulary.";

/// Topic value meaning "no constraint"
pub const AUTO_TOPIC: &str = "auto";

/// Inputs for one system instruction
#[derive(Debug, Clone, Copy)]
pub struct PromptSpec<'a> {
    pub policy: DifficultyPolicy,
    pub topic: &'a str,
    pub with_gloss: bool,
    pub vocabulary: &'a [VocabEntry],
    pub practice_focus: Option<&'a [VocabEntry]>,
}

/// Build the system instruction for a turn
#[must_use]
pub fn system_instruction(spec: &PromptSpec<'_>) -> String {
    let format_lines = if spec.with_gloss {
        "Reply in EXACTLY 3 lines:\nHanzi: ...\nPinyin: ...\nEnglish: ..."
    } else {
        "Reply in EXACTLY 2 lines:\nHanzi: ...\nPinyin: ...\nNO English."
    };

    let topic = spec.topic.trim();
    let topic_line = if topic.is_empty() || topic.eq_ignore_ascii_case(AUTO_TOPIC) {
        "Topic: general daily conversation.".to_string()
    } else {
        format!("Topic: {topic}. Focus your questions on this topic.")
    };

    let vocab_line = if spec.vocabulary.is_empty() {
        String::new()
    } else {
        format!("Vocabulary list: {}.", format_vocab(spec.vocabulary))
    };

    let focus_line = spec
        .practice_focus
        .filter(|f| !f.is_empty())
        .map(|f| format!("Practice focus (use these words heavily): {}.", format_vocab(f)))
        .unwrap_or_default();

    format!(
        "{format_lines}\n{}\n{topic_line}\nKeep sentences short and beginner-friendly.\n{vocab_line}\n{focus_line}",
        spec.policy.instruction()
    )
}

/// Assemble the outgoing message list: fresh system instruction, prior
/// non-system history, then the user input
#[must_use]
pub fn build_messages(system: String, history: &[ChatMessage], user_input: &str) -> Vec<ChatMessage> {
    std::iter::once(ChatMessage::system(system))
        .chain(
            history
                .iter()
                .filter(|m| m.role != ChatRole::System)
                .cloned(),
        )
        .chain(std::iter::once(ChatMessage::user(user_input.trim())))
        .collect()
}

/// Map the 0–1 creativity setting onto the model temperature range
#[must_use]
pub fn effective_temperature(creativity: f32) -> f32 {
    0.75f32.mul_add(creativity.clamp(0.0, 1.0), 0.25)
}
