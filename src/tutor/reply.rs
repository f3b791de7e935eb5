//! Line-tagged reply parsing
//!
//! Replies are requested as `Hanzi: …` / `Pinyin: …` / `English: …` lines.
//! Untagged or partial replies fall back positionally and never fail.

use serde::{Deserialize, Serialize};

use crate::vocab::VocabEntry;

const PRIMARY_TAG: &str = "Hanzi";
const ROMANIZED_TAG: &str = "Pinyin";
const GLOSS_TAG: &str = "English";

/// Value after `tag:` when `line` starts with the tag (ASCII case-insensitive)
fn strip_tag<'a>(line: &'a str, tag: &str) -> Option<&'a str> {
    let head = line.get(..tag.len())?;
    if !head.eq_ignore_ascii_case(tag) {
        return None;
    }
    line[tag.len()..]
        .trim_start()
        .strip_prefix(':')
        .map(str::trim)
}

/// Tutor reply split into its three renderings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedReply {
    /// Native-script line
    pub primary_text: String,
    /// Phonetic transcription line
    pub romanized_text: String,
    /// Translation gloss, when present
    pub gloss_text: Option<String>,
}

impl ParsedReply {
    /// Parse a raw reply
    ///
    /// Tagged lines win; missing fields are filled from lines 1, 2 and 3 in
    /// order. The gloss is only considered when `with_gloss` is set.
    #[must_use]
    pub fn parse(raw: &str, with_gloss: bool) -> Self {
        let lines: Vec<&str> = raw.split('\n').map(str::trim).collect();

        let mut primary = String::new();
        let mut romanized = String::new();
        let mut gloss = String::new();

        for line in &lines {
            if let Some(value) = strip_tag(line, PRIMARY_TAG) {
                primary = value.to_string();
            } else if let Some(value) = strip_tag(line, ROMANIZED_TAG) {
                romanized = value.to_string();
            } else if let Some(value) = strip_tag(line, GLOSS_TAG) {
                gloss = value.to_string();
            }
        }

        let positional = |idx: usize| lines.get(idx).filter(|l| !l.is_empty()).map(ToString::to_string);

        if primary.is_empty() {
            primary = positional(0).unwrap_or_default();
        }
        if romanized.is_empty() {
            romanized = positional(1).unwrap_or_default();
        }
        if with_gloss && gloss.is_empty() {
            gloss = positional(2).unwrap_or_default();
        }

        Self {
            primary_text: primary,
            romanized_text: romanized,
            gloss_text: (with_gloss && !gloss.is_empty()).then_some(gloss),
        }
    }

    /// Romanization split into whitespace tokens for progressive highlighting
    #[must_use]
    pub fn romanized_tokens(&self) -> Vec<String> {
        self.romanized_text
            .split_whitespace()
            .map(ToString::to_string)
            .collect()
    }

    /// Entries whose term occurs in the primary line, in vocabulary order
    #[must_use]
    pub fn used_vocabulary(&self, vocabulary: &[VocabEntry]) -> Vec<VocabEntry> {
        if self.primary_text.is_empty() {
            return Vec::new();
        }
        vocabulary
            .iter()
            .filter(|v| {
                let term = v.term.trim();
                !term.is_empty() && self.primary_text.contains(term)
            })
            .cloned()
            .collect()
    }
}
