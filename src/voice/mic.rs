//! Microphone arbitration
//!
//! Diagnostics, push-to-record and the live session all open the input
//! device. Each acquires a [`MicLease`] first; a second consumer is rejected
//! while a lease is held. Dropping the lease releases the device.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::{Error, Result};

/// Who holds the microphone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicConsumer {
    Diagnostics,
    Recording,
    LiveSession,
}

impl fmt::Display for MicConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Diagnostics => "diagnostics",
            Self::Recording => "recording",
            Self::LiveSession => "live session",
        };
        f.write_str(name)
    }
}

/// Single arbitration point for the input device
#[derive(Debug, Clone, Default)]
pub struct MicrophoneArbiter {
    holder: Arc<Mutex<Option<MicConsumer>>>,
}

impl MicrophoneArbiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the microphone for `consumer`
    ///
    /// # Errors
    ///
    /// Returns `Error::Microphone` if another consumer holds it
    pub fn acquire(&self, consumer: MicConsumer) -> Result<MicLease> {
        let mut holder = self
            .holder
            .lock()
            .map_err(|_| Error::Microphone("arbiter lock poisoned".to_string()))?;

        if let Some(current) = *holder {
            tracing::debug!(%current, requested = %consumer, "microphone busy");
            return Err(Error::Microphone(format!("busy: held by {current}")));
        }

        *holder = Some(consumer);
        tracing::debug!(%consumer, "microphone acquired");
        Ok(MicLease {
            holder: Arc::clone(&self.holder),
            consumer,
        })
    }

    /// Current holder, if any
    #[must_use]
    pub fn holder(&self) -> Option<MicConsumer> {
        self.holder.lock().ok().and_then(|h| *h)
    }
}

/// Exclusive use of the microphone until dropped
#[derive(Debug)]
pub struct MicLease {
    holder: Arc<Mutex<Option<MicConsumer>>>,
    consumer: MicConsumer,
}

impl MicLease {
    #[must_use]
    pub const fn consumer(&self) -> MicConsumer {
        self.consumer
    }
}

impl Drop for MicLease {
    fn drop(&mut self) {
        if let Ok(mut holder) = self.holder.lock() {
            if *holder == Some(self.consumer) {
                *holder = None;
                tracing::debug!(consumer = %self.consumer, "microphone released");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_consumer_rejected() {
        let arbiter = MicrophoneArbiter::new();
        let lease = arbiter.acquire(MicConsumer::Recording).unwrap();
        assert_eq!(arbiter.holder(), Some(MicConsumer::Recording));

        let err = arbiter.acquire(MicConsumer::LiveSession).unwrap_err();
        assert!(err.to_string().contains("busy: held by recording"));

        drop(lease);
        assert_eq!(arbiter.holder(), None);
        let lease = arbiter.acquire(MicConsumer::LiveSession).unwrap();
        assert_eq!(lease.consumer(), MicConsumer::LiveSession);
    }

    #[test]
    fn test_clones_share_state() {
        let arbiter = MicrophoneArbiter::new();
        let other = arbiter.clone();
        let _lease = arbiter.acquire(MicConsumer::Diagnostics).unwrap();
        assert!(other.acquire(MicConsumer::Recording).is_err());
    }
}
