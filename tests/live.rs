//! Live session lifecycle tests
//!
//! Drives the session manager with fake signaling and peers

use std::sync::Arc;
use std::sync::atomic::Ordering;

use huayu_buddy::live::LiveSessionManager;
use huayu_buddy::voice::{MicConsumer, MicrophoneArbiter};
use huayu_buddy::{Error, LiveState};

mod common;

use common::{FakePeerFactory, FakeSignaling, PeerFailure};

const MODEL: &str = "gpt-4o-mini-realtime-preview";
const VOICE: &str = "verse";

fn manager(
    signaling: &Arc<FakeSignaling>,
    factory: &Arc<FakePeerFactory>,
    arbiter: &MicrophoneArbiter,
) -> Arc<LiveSessionManager> {
    Arc::new(LiveSessionManager::new(
        signaling.clone(),
        factory.clone(),
        arbiter.clone(),
    ))
}

#[tokio::test]
async fn test_connect_goes_live_with_microphone_enabled() {
    let signaling = FakeSignaling::new();
    let factory = FakePeerFactory::new(PeerFailure::None);
    let arbiter = MicrophoneArbiter::new();
    let live = manager(&signaling, &factory, &arbiter);

    live.connect(MODEL, VOICE).await.unwrap();

    assert_eq!(live.state(), LiveState::Live);
    assert_eq!(live.microphone_enabled().await, Some(true));
    assert_eq!(arbiter.holder(), Some(MicConsumer::LiveSession));
    assert_eq!(
        factory.stats.answers.lock().unwrap().clone(),
        vec!["answer-to:v=0\r\no=- offer".to_string()]
    );
}

#[tokio::test]
async fn test_second_connect_is_noop() {
    let signaling = FakeSignaling::new();
    let factory = FakePeerFactory::new(PeerFailure::None);
    let live = manager(&signaling, &factory, &MicrophoneArbiter::new());

    live.connect(MODEL, VOICE).await.unwrap();
    live.connect(MODEL, VOICE).await.unwrap();

    assert_eq!(factory.stats.created.load(Ordering::SeqCst), 1);
    assert_eq!(signaling.exchanges.load(Ordering::SeqCst), 1);
    assert_eq!(live.state(), LiveState::Live);
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let signaling = FakeSignaling::new();
    let factory = FakePeerFactory::new(PeerFailure::None);
    let arbiter = MicrophoneArbiter::new();
    let live = manager(&signaling, &factory, &arbiter);

    // Nothing to tear down yet
    live.disconnect().await;
    assert_eq!(live.state(), LiveState::Idle);

    live.connect(MODEL, VOICE).await.unwrap();
    live.disconnect().await;
    live.disconnect().await;

    assert_eq!(live.state(), LiveState::Idle);
    assert_eq!(factory.stats.closed.load(Ordering::SeqCst), 1);
    assert!(arbiter.holder().is_none());
    assert_eq!(live.microphone_enabled().await, None);
}

#[tokio::test]
async fn test_reconnect_after_disconnect() {
    let signaling = FakeSignaling::new();
    let factory = FakePeerFactory::new(PeerFailure::None);
    let live = manager(&signaling, &factory, &MicrophoneArbiter::new());

    live.connect(MODEL, VOICE).await.unwrap();
    live.disconnect().await;
    live.connect(MODEL, VOICE).await.unwrap();

    assert_eq!(live.state(), LiveState::Live);
    assert_eq!(factory.stats.created.load(Ordering::SeqCst), 2);
    assert_eq!(factory.stats.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_offer_failure_tears_down() {
    let signaling = FakeSignaling::new();
    let factory = FakePeerFactory::new(PeerFailure::Offer);
    let arbiter = MicrophoneArbiter::new();
    let live = manager(&signaling, &factory, &arbiter);

    let result = live.connect(MODEL, VOICE).await;

    assert!(matches!(result, Err(Error::Live(_))));
    assert_eq!(live.state(), LiveState::Idle);
    assert_eq!(factory.stats.closed.load(Ordering::SeqCst), 1);
    assert_eq!(signaling.exchanges.load(Ordering::SeqCst), 0);
    assert!(arbiter.holder().is_none());
}

#[tokio::test]
async fn test_exchange_failure_tears_down() {
    let signaling = FakeSignaling::new();
    signaling.fail_exchange.store(true, Ordering::SeqCst);
    let factory = FakePeerFactory::new(PeerFailure::None);
    let arbiter = MicrophoneArbiter::new();
    let live = manager(&signaling, &factory, &arbiter);

    let result = live.connect(MODEL, VOICE).await;

    assert!(matches!(result, Err(Error::Signaling(_))));
    assert_eq!(live.state(), LiveState::Idle);
    assert_eq!(factory.stats.closed.load(Ordering::SeqCst), 1);
    assert!(arbiter.holder().is_none());
}

#[tokio::test]
async fn test_bad_answer_tears_down() {
    let signaling = FakeSignaling::new();
    let factory = FakePeerFactory::new(PeerFailure::Answer);
    let arbiter = MicrophoneArbiter::new();
    let live = manager(&signaling, &factory, &arbiter);

    let result = live.connect(MODEL, VOICE).await;

    assert!(result.is_err());
    assert_eq!(live.state(), LiveState::Idle);
    assert_eq!(factory.stats.closed.load(Ordering::SeqCst), 1);
    assert!(arbiter.holder().is_none());

    // A failed attempt leaves the manager ready for another one
    assert!(live.connect(MODEL, VOICE).await.is_err());
    assert_eq!(factory.stats.created.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_credential_failure_creates_no_peer() {
    let signaling = FakeSignaling::new();
    signaling.fail_credential.store(true, Ordering::SeqCst);
    let factory = FakePeerFactory::new(PeerFailure::None);
    let arbiter = MicrophoneArbiter::new();
    let live = manager(&signaling, &factory, &arbiter);

    let result = live.connect(MODEL, VOICE).await;

    assert!(matches!(result, Err(Error::Signaling(_))));
    assert_eq!(factory.stats.created.load(Ordering::SeqCst), 0);
    assert_eq!(live.state(), LiveState::Idle);
    assert!(arbiter.holder().is_none());
}

#[tokio::test]
async fn test_busy_microphone_blocks_connect() {
    let signaling = FakeSignaling::new();
    let factory = FakePeerFactory::new(PeerFailure::None);
    let arbiter = MicrophoneArbiter::new();
    let live = manager(&signaling, &factory, &arbiter);

    let _recording = arbiter.acquire(MicConsumer::Recording).unwrap();
    let result = live.connect(MODEL, VOICE).await;

    assert!(matches!(result, Err(Error::Microphone(_))));
    assert_eq!(factory.stats.created.load(Ordering::SeqCst), 0);
    assert_eq!(live.state(), LiveState::Idle);
}

#[tokio::test]
async fn test_push_to_talk_toggles() {
    let signaling = FakeSignaling::new();
    let factory = FakePeerFactory::new(PeerFailure::None);
    let live = manager(&signaling, &factory, &MicrophoneArbiter::new());

    assert!(matches!(
        live.toggle_push_to_talk().await,
        Err(Error::Live(_))
    ));

    live.connect(MODEL, VOICE).await.unwrap();
    assert!(!live.toggle_push_to_talk().await.unwrap());
    assert_eq!(live.microphone_enabled().await, Some(false));
    assert!(live.toggle_push_to_talk().await.unwrap());
    assert_eq!(live.microphone_enabled().await, Some(true));
}

#[tokio::test]
async fn test_disconnect_during_negotiation_cancels() {
    let (signaling, gate) = FakeSignaling::gated();
    let factory = FakePeerFactory::new(PeerFailure::None);
    let arbiter = MicrophoneArbiter::new();
    let live = manager(&signaling, &factory, &arbiter);
    let mut states = live.subscribe_state();

    let pending = {
        let live = Arc::clone(&live);
        tokio::spawn(async move { live.connect(MODEL, VOICE).await })
    };
    while signaling.exchanges.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(*states.borrow_and_update(), LiveState::Negotiating);

    // the exchange is still blocked, yet disconnect already tore everything down
    live.disconnect().await;
    assert_eq!(live.state(), LiveState::Idle);
    assert_eq!(factory.stats.closed.load(Ordering::SeqCst), 1);
    assert!(arbiter.holder().is_none());
    assert!(arbiter.acquire(MicConsumer::Recording).is_ok());

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(Error::Cancelled(_))));
    assert_eq!(live.state(), LiveState::Idle);
    assert_eq!(factory.stats.closed.load(Ordering::SeqCst), 1);
    assert_eq!(live.microphone_enabled().await, None);

    // releasing the stalled exchange afterwards changes nothing
    gate.notify_one();
    tokio::task::yield_now().await;
    assert_eq!(factory.stats.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_connect_after_cancelled_negotiation() {
    let (signaling, gate) = FakeSignaling::gated();
    let factory = FakePeerFactory::new(PeerFailure::None);
    let arbiter = MicrophoneArbiter::new();
    let live = manager(&signaling, &factory, &arbiter);

    let pending = {
        let live = Arc::clone(&live);
        tokio::spawn(async move { live.connect(MODEL, VOICE).await })
    };
    while signaling.exchanges.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    live.disconnect().await;
    assert!(matches!(pending.await.unwrap(), Err(Error::Cancelled(_))));

    // the next attempt gets the gate permit and completes
    gate.notify_one();
    live.connect(MODEL, VOICE).await.unwrap();
    assert_eq!(live.state(), LiveState::Live);
    assert_eq!(arbiter.holder(), Some(MicConsumer::LiveSession));
    assert_eq!(factory.stats.created.load(Ordering::SeqCst), 2);
}
