//! Amplitude metering for playback visualization
//!
//! Publishes typed [`MeterEvent`]s on a session-scoped broadcast channel.
//! Presentation subscribes with [`AmplitudeMeter::subscribe`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::broadcast;

/// Level polling cadence (roughly one animation frame)
pub const LEVEL_INTERVAL: Duration = Duration::from_millis(16);

/// Samples inspected per level reading
const WINDOW: usize = 1024;

/// Gain applied to the mean absolute amplitude before clamping
const LEVEL_GAIN: f32 = 2.5;

/// Visualization event
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeterEvent {
    /// Playback became active or inactive
    Activity(bool),
    /// Normalized 0–1 output level
    Level(f32),
}

/// Normalized level of a block of samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s.abs()).sum();
    (sum / samples.len() as f32 * LEVEL_GAIN).min(1.0)
}

/// Shared view of a buffer being played
#[derive(Debug, Clone)]
pub struct PlaybackCursor {
    samples: Arc<[f32]>,
    position: Arc<AtomicUsize>,
    finished: Arc<AtomicBool>,
}

impl PlaybackCursor {
    #[must_use]
    pub fn new(samples: Arc<[f32]>) -> Self {
        Self {
            samples,
            position: Arc::new(AtomicUsize::new(0)),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Advance by `n` samples, returning the previous position
    pub fn advance(&self, n: usize) -> usize {
        let prev = self.position.fetch_add(n, Ordering::AcqRel);
        if prev + n >= self.samples.len() {
            self.finished.store(true, Ordering::Release);
        }
        prev
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.position.load(Ordering::Acquire).min(self.samples.len())
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }

    /// Level of the window ending at the current position
    #[must_use]
    pub fn current_level(&self) -> f32 {
        let end = self.position();
        let start = end.saturating_sub(WINDOW);
        level(&self.samples[start..end])
    }
}

/// Broadcasts activity and level events
#[derive(Debug, Clone)]
pub struct AmplitudeMeter {
    tx: broadcast::Sender<MeterEvent>,
}

impl Default for AmplitudeMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl AmplitudeMeter {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    /// Subscribe to meter events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MeterEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, event: MeterEvent) {
        // no subscribers is fine
        let _ = self.tx.send(event);
    }

    /// Publish levels for `cursor` until it finishes, framed by activity events
    pub async fn follow(&self, cursor: PlaybackCursor) {
        self.publish(MeterEvent::Activity(true));
        let mut ticker = tokio::time::interval(LEVEL_INTERVAL);
        while !cursor.is_finished() {
            ticker.tick().await;
            self.publish(MeterEvent::Level(cursor.current_level()));
        }
        self.publish(MeterEvent::Activity(false));
        self.publish(MeterEvent::Level(0.0));
    }
}
