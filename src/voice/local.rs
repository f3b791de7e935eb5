//! Local speech synthesis
//!
//! Synthesis is a cancellable operation yielding an ordered stream of
//! [`SynthesisEvent`]s: zero or more word boundaries, then exactly one
//! terminal `Finished` or `Failed`. The desktop backend shells out to
//! espeak-ng, whose command line reports no word timings, so its boundaries
//! are paced from the speaking rate while the process runs.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{Error, Result};

/// Words per minute at rate 1.0
const BASE_WPM: f32 = 175.0;

/// An installed local voice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalVoice {
    /// Stable identifier used for exact selection
    pub id: String,
    pub name: String,
    /// Language tag, e.g. `cmn` or `en-us`
    pub language: String,
}

/// Progress of one local utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisEvent {
    /// A word started at `char_index` in the spoken text
    Boundary { char_index: usize, char_length: usize },
    Finished,
    Failed(String),
}

/// Event stream of a single utterance; dropping it cancels synthesis
#[derive(Debug)]
pub struct SynthesisStream {
    rx: mpsc::Receiver<SynthesisEvent>,
    task: Option<JoinHandle<()>>,
}

impl SynthesisStream {
    /// Stream fed by `rx`, optionally driven by `task`
    #[must_use]
    pub const fn new(rx: mpsc::Receiver<SynthesisEvent>, task: Option<JoinHandle<()>>) -> Self {
        Self { rx, task }
    }

    /// Next event; `None` once the producer is gone
    pub async fn next(&mut self) -> Option<SynthesisEvent> {
        self.rx.recv().await
    }

    /// Stop the utterance
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.rx.close();
    }
}

impl Drop for SynthesisStream {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Platform speech synthesis
#[async_trait]
pub trait LocalSynthesizer: Send + Sync {
    /// Installed voices; empty when unavailable
    async fn voices(&self) -> Vec<LocalVoice>;

    /// Start speaking `text`
    ///
    /// # Errors
    ///
    /// Returns error if synthesis cannot be started
    fn speak(
        &self,
        text: &str,
        language: &str,
        voice: Option<&LocalVoice>,
        rate: f32,
    ) -> Result<SynthesisStream>;
}

/// Voices whose language starts with `prefix` (case-insensitive); all when empty
#[must_use]
pub fn filter_voices(voices: Vec<LocalVoice>, prefix: &str) -> Vec<LocalVoice> {
    if prefix.is_empty() {
        return voices;
    }
    let prefix = prefix.to_lowercase();
    voices
        .into_iter()
        .filter(|v| {
            let lang = v.language.to_lowercase();
            lang.starts_with(&prefix) || (prefix == "zh" && lang.starts_with("cmn"))
        })
        .collect()
}

/// espeak-ng command line synthesizer
#[derive(Debug, Clone)]
pub struct EspeakSynthesizer {
    binary: PathBuf,
}

impl EspeakSynthesizer {
    /// Locate `espeak-ng` (or `espeak`) on `PATH`
    #[must_use]
    pub fn detect() -> Option<Self> {
        which::which("espeak-ng")
            .or_else(|_| which::which("espeak"))
            .ok()
            .map(|binary| {
                tracing::debug!(binary = %binary.display(), "local synthesizer found");
                Self { binary }
            })
    }
}

/// espeak voice name for a BCP-47 style tag
fn espeak_language(language: &str) -> String {
    let lower = language.to_lowercase();
    if lower.starts_with("zh") {
        "cmn".to_string()
    } else {
        lower
    }
}

/// Parse `espeak-ng --voices` output
fn parse_voices(output: &str) -> Vec<LocalVoice> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            match fields.as_slice() {
                [_, language, _, name, file, ..] => Some(LocalVoice {
                    id: (*file).to_string(),
                    name: name.replace('_', " "),
                    language: (*language).to_string(),
                }),
                _ => None,
            }
        })
        .collect()
}

fn is_han(c: char) -> bool {
    matches!(c, '\u{3400}'..='\u{4DBF}' | '\u{4E00}'..='\u{9FFF}' | '\u{F900}'..='\u{FAFF}')
}

/// Spoken units of `text` as `(char_index, char_length)`
///
/// Each Han character is its own unit; other letters and digits group into
/// words. Whitespace and punctuation are skipped.
#[must_use]
pub fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut word: Option<(usize, usize)> = None;

    for (index, c) in text.chars().enumerate() {
        if is_han(c) {
            spans.extend(word.take());
            spans.push((index, 1));
        } else if c.is_alphanumeric() {
            match word.as_mut() {
                Some((_, len)) => *len += 1,
                None => word = Some((index, 1)),
            }
        } else {
            spans.extend(word.take());
        }
    }
    spans.extend(word);
    spans
}

/// Time per spoken unit at `wpm`
#[must_use]
pub fn word_interval(wpm: u32) -> Duration {
    Duration::from_secs_f64(60.0 / f64::from(wpm.max(1)))
}

/// Emit one boundary per span every `interval` until `done` resolves, then
/// its terminal event
///
/// Spans left over when `done` resolves are dropped. Returns early if the
/// receiver is gone.
async fn pace_boundaries<F>(
    spans: Vec<(usize, usize)>,
    interval: Duration,
    tx: &mpsc::Sender<SynthesisEvent>,
    done: F,
) where
    F: Future<Output = SynthesisEvent>,
{
    let mut spans = spans.into_iter();
    let mut ticker = tokio::time::interval(interval);
    tokio::pin!(done);

    let terminal = loop {
        tokio::select! {
            event = &mut done => break event,
            _ = ticker.tick() => {
                if let Some((char_index, char_length)) = spans.next() {
                    let boundary = SynthesisEvent::Boundary { char_index, char_length };
                    if tx.send(boundary).await.is_err() {
                        return;
                    }
                }
            }
        }
    };
    let _ = tx.send(terminal).await;
}

#[async_trait]
impl LocalSynthesizer for EspeakSynthesizer {
    async fn voices(&self) -> Vec<LocalVoice> {
        match tokio::process::Command::new(&self.binary)
            .arg("--voices")
            .output()
            .await
        {
            Ok(out) if out.status.success() => parse_voices(&String::from_utf8_lossy(&out.stdout)),
            Ok(out) => {
                tracing::debug!(status = %out.status, "voice listing failed");
                Vec::new()
            }
            Err(e) => {
                tracing::debug!(error = %e, "voice listing failed");
                Vec::new()
            }
        }
    }

    fn speak(
        &self,
        text: &str,
        language: &str,
        voice: Option<&LocalVoice>,
        rate: f32,
    ) -> Result<SynthesisStream> {
        let voice_name = voice.map_or_else(|| espeak_language(language), |v| v.id.clone());
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let wpm = (BASE_WPM * rate.clamp(0.5, 2.0)).round() as u32;

        let mut child = tokio::process::Command::new(&self.binary)
            .args(["-v", &voice_name, "-s", &wpm.to_string(), "--stdin"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Tts(format!("failed to start local synthesis: {e}")))?;

        tracing::debug!(voice = %voice_name, wpm, "local synthesis started");

        let (tx, rx) = mpsc::channel(16);
        let spans = word_spans(text);
        let interval = word_interval(wpm);
        let text = text.to_string();
        let task = tokio::spawn(async move {
            if let Some(mut stdin) = child.stdin.take() {
                if let Err(e) = stdin.write_all(text.as_bytes()).await {
                    let _ = tx.send(SynthesisEvent::Failed(e.to_string())).await;
                    return;
                }
            }

            let exited = async move {
                match child.wait_with_output().await {
                    Ok(out) if out.status.success() => SynthesisEvent::Finished,
                    Ok(out) => SynthesisEvent::Failed(format!(
                        "local synthesis exited with {}: {}",
                        out.status,
                        String::from_utf8_lossy(&out.stderr).trim()
                    )),
                    Err(e) => SynthesisEvent::Failed(e.to_string()),
                }
            };
            pace_boundaries(spans, interval, &tx, exited).await;
        });

        Ok(SynthesisStream::new(rx, Some(task)))
    }
}
