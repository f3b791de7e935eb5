//! Difficulty policy: how strictly replies must reuse the vocabulary list

/// Vocabulary reuse policy derived from the 0–100 difficulty slider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifficultyPolicy {
    /// `[0, 10]`: listed vocabulary only
    Strict,
    /// `(10, 35]`: strongly prefer listed vocabulary
    PreferListed,
    /// `(35, 70]`: at most one new word per reply
    Guided,
    /// `(70, 100]`: at most two new words per reply
    Loose,
}

impl DifficultyPolicy {
    /// Band a difficulty value; out-of-range input is clamped to `[0, 100]`
    #[must_use]
    pub const fn from_difficulty(difficulty: u8) -> Self {
        let d = if difficulty > 100 { 100 } else { difficulty };
        match d {
            0..=10 => Self::Strict,
            11..=35 => Self::PreferListed,
            36..=70 => Self::Guided,
            _ => Self::Loose,
        }
    }

    /// Prompt instruction for this policy
    #[must_use]
    pub const fn instruction(self) -> &'static str {
        match self {
            Self::Strict => {
                "STRICT MODE: Use ONLY the listed vocabulary and their obvious forms (particles like 吗/呢/的 allowed). No new words."
            }
            Self::PreferListed => {
                "PREFER LISTED VOCAB: Strongly prefer the listed vocabulary; any new word must be extremely common and simple."
            }
            Self::Guided => {
                "GUIDED MODE: Prefer the listed vocabulary; introduce at most ONE new very simple A1 word per reply."
            }
            Self::Loose => {
                "LOOSE MODE: Use listed vocabulary when possible; you may introduce up to TWO new simple words if it improves naturalness."
            }
        }
    }
}
