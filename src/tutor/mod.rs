//! Turn orchestration
//!
//! Difficulty policy, reply parsing, prompt assembly, the conversation store
//! and the [`TurnController`] that ties them to the language service and the
//! speech output engine.

mod controller;
mod policy;
mod prompt;
mod reply;
mod store;

pub use controller::{
    DEFAULT_TEMPERATURE, MAX_GLOSS_DELAY, NoticeLevel, TurnController, TurnOptions, TurnState,
    TutorEvent, TutorSettings,
};
pub use policy::DifficultyPolicy;
pub use prompt::{
    AUTO_TOPIC, GREETING_INSTRUCTION, PromptSpec, build_messages, effective_temperature,
    system_instruction,
};
pub use reply::ParsedReply;
pub use store::{ConversationStore, ConversationTurn, SharedStore};
