//! Vocabulary entries and the sources that produce them
//!
//! Document extraction lives outside this crate; anything that can yield an
//! ordered list of `{term, romanization}` pairs implements [`VocabularySource`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Maximum number of entries embedded in a prompt
pub const MAX_PROMPT_ENTRIES: usize = 80;

/// A single vocabulary item (e.g. `你好` / `nǐ hǎo`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabEntry {
    /// Native-script term
    pub term: String,
    /// Phonetic transcription of the term
    pub romanization: String,
}

impl VocabEntry {
    /// Create a new entry
    #[must_use]
    pub fn new(term: impl Into<String>, romanization: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            romanization: romanization.into(),
        }
    }
}

/// Yields an ordered vocabulary list
#[async_trait]
pub trait VocabularySource: Send + Sync {
    /// Load the vocabulary. Duplicates are returned as-is.
    async fn load(&self) -> Result<Vec<VocabEntry>>;
}

/// Reads `term<TAB>romanization` (or comma separated) lines from a text file
///
/// Blank lines and lines starting with `#` are skipped.
#[derive(Debug, Clone)]
pub struct TextFileVocabulary {
    path: PathBuf,
}

impl TextFileVocabulary {
    /// Create a source for the given file
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl VocabularySource for TextFileVocabulary {
    async fn load(&self) -> Result<Vec<VocabEntry>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::Vocabulary(format!("failed to read {}: {e}", self.path.display()))
        })?;

        let entries = parse_vocab_lines(&content);
        tracing::info!(
            path = %self.path.display(),
            entries = entries.len(),
            "loaded vocabulary"
        );
        Ok(entries)
    }
}

/// Parse vocabulary lines into entries
#[must_use]
pub fn parse_vocab_lines(content: &str) -> Vec<VocabEntry> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|line| {
            let (term, romanization) = line
                .split_once('\t')
                .or_else(|| line.split_once(','))
                .unwrap_or((line, ""));
            let term = term.trim();
            if term.is_empty() {
                return None;
            }
            Some(VocabEntry::new(term, romanization.trim()))
        })
        .collect()
}

/// Format entries as `term(romanization)` pairs for a prompt, capped at
/// [`MAX_PROMPT_ENTRIES`]
///
/// An entry missing either half is rendered with whichever half is present.
#[must_use]
pub fn format_vocab(entries: &[VocabEntry]) -> String {
    entries
        .iter()
        .take(MAX_PROMPT_ENTRIES)
        .filter_map(|v| {
            let term = v.term.trim();
            let rom = v.romanization.trim();
            match (term.is_empty(), rom.is_empty()) {
                (false, false) => Some(format!("{term}({rom})")),
                (false, true) => Some(term.to_string()),
                (true, false) => Some(rom.to_string()),
                (true, true) => None,
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_vocab_pairs() {
        let entries = vec![
            VocabEntry::new("你好", "nǐ hǎo"),
            VocabEntry::new("谢谢", ""),
            VocabEntry::new("", "zàijiàn"),
            VocabEntry::new(" ", " "),
        ];
        assert_eq!(format_vocab(&entries), "你好(nǐ hǎo), 谢谢, zàijiàn");
    }

    #[test]
    fn test_format_vocab_caps_entries() {
        let entries: Vec<VocabEntry> = (0..100)
            .map(|i| VocabEntry::new(format!("t{i}"), "r"))
            .collect();
        let formatted = format_vocab(&entries);
        assert_eq!(formatted.split(", ").count(), MAX_PROMPT_ENTRIES);
        assert!(formatted.ends_with("t79(r)"));
    }

    #[test]
    fn test_parse_vocab_lines() {
        let parsed = parse_vocab_lines("# header\n你好\tnǐ hǎo\n\n谢谢, xièxie\n再见\n");
        assert_eq!(
            parsed,
            vec![
                VocabEntry::new("你好", "nǐ hǎo"),
                VocabEntry::new("谢谢", "xièxie"),
                VocabEntry::new("再见", ""),
            ]
        );
    }

    #[tokio::test]
    async fn test_text_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.txt");
        std::fs::write(&path, "你好\tnǐ hǎo\n你好\tnǐ hǎo\n").unwrap();

        let entries = TextFileVocabulary::new(&path).load().await.unwrap();
        // duplicates are tolerated
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn test_text_file_missing() {
        let source = TextFileVocabulary::new("/nonexistent/vocab.txt");
        assert!(matches!(source.load().await, Err(Error::Vocabulary(_))));
    }
}
