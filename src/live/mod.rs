//! Live voice session
//!
//! A persistent bidirectional audio channel with the realtime service that
//! runs alongside the turn-by-turn flow. [`LiveSessionManager`] owns the
//! peer connection and its microphone lease exclusively; nothing else holds
//! a reference to either.
//!
//! ```text
//! Idle --connect--> Negotiating --answer applied--> Live
//!   ^                    |                            |
//!   +------ failure -----+-------- disconnect --------+
//! ```

mod peer;
mod signaling;

use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, watch};

pub use peer::{PeerFactory, PeerLink, WebRtcPeer, WebRtcPeerFactory};
pub use signaling::{DEFAULT_REALTIME_ENDPOINT, HttpSignaling, RealtimeSignaling};

use crate::voice::{MicConsumer, MicLease, MicrophoneArbiter};
use crate::{Error, Result};

/// Live session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LiveState {
    #[default]
    Idle,
    Negotiating,
    Live,
}

impl fmt::Display for LiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Negotiating => write!(f, "negotiating"),
            Self::Live => write!(f, "live"),
        }
    }
}

/// A connected peer plus the microphone it holds
struct Session {
    peer: Box<dyn PeerLink>,
    _lease: MicLease,
}

impl Session {
    async fn close(self) {
        if let Err(e) = self.peer.close().await {
            tracing::warn!(error = %e, "error closing live session");
        }
    }
}

#[derive(Default)]
struct Inner {
    /// Bumped by every connect and disconnect; a negotiation whose
    /// generation no longer matches is discarded
    generation: u64,
    session: Option<Session>,
    /// Closes once the in-flight negotiation has released its resources
    negotiating: Option<watch::Receiver<()>>,
}

fn cancelled() -> Error {
    Error::Cancelled("live session disconnected during negotiation".to_string())
}

/// Owns at most one live session per client instance
pub struct LiveSessionManager {
    signaling: Arc<dyn RealtimeSignaling>,
    factory: Arc<dyn PeerFactory>,
    arbiter: MicrophoneArbiter,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<LiveState>,
    /// Generation of the latest disconnect
    cancel_tx: watch::Sender<u64>,
}

impl LiveSessionManager {
    #[must_use]
    pub fn new(
        signaling: Arc<dyn RealtimeSignaling>,
        factory: Arc<dyn PeerFactory>,
        arbiter: MicrophoneArbiter,
    ) -> Self {
        let (state_tx, _) = watch::channel(LiveState::Idle);
        let (cancel_tx, _) = watch::channel(0);
        Self {
            signaling,
            factory,
            arbiter,
            inner: Mutex::new(Inner::default()),
            state_tx,
            cancel_tx,
        }
    }

    #[must_use]
    pub fn state(&self) -> LiveState {
        *self.state_tx.borrow()
    }

    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<LiveState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: LiveState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::info!(from = %previous, to = %state, "live session state");
        }
    }

    /// Negotiate a live session
    ///
    /// A no-op while already negotiating or live. On failure every resource
    /// acquired so far is released and the manager returns to idle.
    ///
    /// # Errors
    ///
    /// Returns error if the microphone is busy, the credential or SDP
    /// exchange fails, the peer cannot be built, or the session was
    /// disconnected while negotiating
    pub async fn connect(&self, model: &str, voice: &str) -> Result<()> {
        // dropped on return, which wakes a disconnect waiting on teardown
        let (generation, _negotiating) = {
            let mut inner = self.inner.lock().await;
            if self.state() != LiveState::Idle {
                tracing::debug!(state = %self.state(), "connect ignored");
                return Ok(());
            }
            inner.generation += 1;
            let (done_tx, done_rx) = watch::channel(());
            inner.negotiating = Some(done_rx);
            self.set_state(LiveState::Negotiating);
            (inner.generation, done_tx)
        };

        let outcome = self.negotiate(generation, model, voice).await;

        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            drop(inner);
            if let Ok(session) = outcome {
                session.close().await;
            }
            return Err(cancelled());
        }
        inner.negotiating = None;

        match outcome {
            Ok(session) => {
                inner.session = Some(session);
                self.set_state(LiveState::Live);
                tracing::info!(model, voice, "live session connected");
                Ok(())
            }
            Err(e) => {
                self.set_state(LiveState::Idle);
                tracing::warn!(error = %e, "live session negotiation failed");
                Err(e)
            }
        }
    }

    /// Build a session, abandoning it as soon as a disconnect supersedes
    /// `generation`
    async fn negotiate(&self, generation: u64, model: &str, voice: &str) -> Result<Session> {
        let mut cancel_rx = self.cancel_tx.subscribe();
        let superseded = async move {
            let _ = cancel_rx.wait_for(|latest| *latest > generation).await;
        };
        tokio::pin!(superseded);

        let lease = self.arbiter.acquire(MicConsumer::LiveSession)?;
        let (credential, peer) = tokio::select! {
            biased;
            () = &mut superseded => return Err(cancelled()),
            built = async {
                let credential = self.signaling.credential(model, voice).await?;
                let peer = self.factory.create().await?;
                Ok::<_, Error>((credential, peer))
            } => built?,
        };

        let handshake = async {
            let offer = peer.create_offer().await?;
            let answer = self.signaling.exchange(model, &credential, &offer).await?;
            peer.apply_answer(answer).await?;
            peer.set_microphone_enabled(true);
            Ok::<_, Error>(())
        };
        let outcome = tokio::select! {
            biased;
            () = &mut superseded => Err(cancelled()),
            result = handshake => result,
        };

        match outcome {
            Ok(()) => Ok(Session {
                peer,
                _lease: lease,
            }),
            Err(e) => {
                if let Err(close_err) = peer.close().await {
                    tracing::debug!(error = %close_err, "teardown after failed negotiation");
                }
                Err(e)
            }
        }
    }

    /// Flip the outgoing microphone track, returning the new enabled flag
    ///
    /// # Errors
    ///
    /// Returns error if no session is live
    pub async fn toggle_push_to_talk(&self) -> Result<bool> {
        let inner = self.inner.lock().await;
        let session = inner
            .session
            .as_ref()
            .ok_or_else(|| Error::Live("no live session".to_string()))?;

        let enabled = !session.peer.microphone_enabled();
        session.peer.set_microphone_enabled(enabled);
        tracing::debug!(enabled, "push-to-talk toggled");
        Ok(enabled)
    }

    /// Whether the live microphone track is currently enabled
    pub async fn microphone_enabled(&self) -> Option<bool> {
        let inner = self.inner.lock().await;
        inner.session.as_ref().map(|s| s.peer.microphone_enabled())
    }

    /// Tear down whatever exists and return to idle; safe from any state
    ///
    /// An in-flight negotiation is abandoned, and this returns only after it
    /// has closed its peer and released the microphone.
    pub async fn disconnect(&self) {
        let (session, negotiating) = {
            let mut inner = self.inner.lock().await;
            inner.generation += 1;
            self.cancel_tx.send_replace(inner.generation);
            self.set_state(LiveState::Idle);
            (inner.session.take(), inner.negotiating.take())
        };

        if let Some(mut negotiating) = negotiating {
            // resolves with an error once the negotiating side drops its sender
            let _ = negotiating.changed().await;
            tracing::info!("live negotiation cancelled");
        }

        if let Some(session) = session {
            session.close().await;
            tracing::info!("live session disconnected");
        }
    }
}
