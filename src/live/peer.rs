//! WebRTC peer for the live session
//!
//! Sends the microphone as a 48kHz mono Opus track and plays the first
//! remote audio track through the default output device. The microphone
//! track is gated by a flag: when disabled, silence is sent in its place
//! and the connection is left untouched.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::task::JoinHandle;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MediaEngine};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use crate::voice::{CaptureStream, Microphone, StreamResampler};
use crate::{Error, Result};

/// Opus clock rate
const OPUS_RATE: u32 = 48_000;

/// 20 ms of 48kHz mono
const FRAME_SAMPLES: usize = 960;

const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Largest decoded Opus frame (120 ms at 48kHz)
const MAX_DECODED_SAMPLES: usize = 5760;

const STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// A negotiated (or negotiating) media connection
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Create the local offer, waiting for ICE gathering to finish
    async fn create_offer(&self) -> Result<String>;

    /// Apply the remote answer
    async fn apply_answer(&self, sdp: String) -> Result<()>;

    /// Gate the outgoing microphone track
    fn set_microphone_enabled(&self, enabled: bool);

    fn microphone_enabled(&self) -> bool;

    /// Stop local tracks and close the connection
    async fn close(&self) -> Result<()>;
}

/// Opens peers with a local microphone track attached (initially enabled)
#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn PeerLink>>;
}

/// Builds [`WebRtcPeer`]s capturing from `microphone`
pub struct WebRtcPeerFactory {
    microphone: Arc<dyn Microphone>,
    device: Option<String>,
}

impl WebRtcPeerFactory {
    #[must_use]
    pub fn new(microphone: Arc<dyn Microphone>, device: Option<String>) -> Self {
        Self { microphone, device }
    }
}

#[async_trait]
impl PeerFactory for WebRtcPeerFactory {
    async fn create(&self) -> Result<Box<dyn PeerLink>> {
        let capture = self.microphone.open(self.device.as_deref())?;
        match WebRtcPeer::connect(capture).await {
            Ok(peer) => Ok(Box::new(peer)),
            Err(e) => {
                tracing::warn!(error = %e, "peer setup failed");
                Err(e)
            }
        }
    }
}

fn audio_error(e: impl std::fmt::Display) -> Error {
    Error::Audio(e.to_string())
}

/// Remote audio sink: a cpal output stream on its own thread fed by a queue
struct RemotePlayback {
    queue: Arc<Mutex<VecDeque<f32>>>,
    resampler: StreamResampler,
    stop_tx: std::sync::mpsc::Sender<()>,
}

impl RemotePlayback {
    fn start() -> Result<Self> {
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<u32>>(1);
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let feed = Arc::clone(&queue);
        std::thread::Builder::new()
            .name("huayu-remote-audio".to_string())
            .spawn(move || {
                let started = (|| -> Result<(cpal::Stream, u32)> {
                    let device = cpal::default_host()
                        .default_output_device()
                        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;
                    let config: cpal::StreamConfig =
                        device.default_output_config().map_err(audio_error)?.into();
                    let channels = usize::from(config.channels.max(1));
                    let stream = device
                        .build_output_stream(
                            &config,
                            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                                let mut queue = feed.lock().ok();
                                for frame in data.chunks_mut(channels) {
                                    let sample = queue
                                        .as_mut()
                                        .and_then(|q| q.pop_front())
                                        .unwrap_or(0.0);
                                    frame.fill(sample);
                                }
                            },
                            |err| tracing::error!(error = %err, "remote audio error"),
                            None,
                        )
                        .map_err(audio_error)?;
                    stream.play().map_err(audio_error)?;
                    Ok((stream, config.sample_rate.0))
                })();

                match started {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        let _ = stop_rx.recv();
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })?;

        let rate = ready_rx
            .recv()
            .map_err(|_| Error::Audio("remote audio thread exited".to_string()))??;
        Ok(Self {
            queue,
            resampler: StreamResampler::new(OPUS_RATE, rate)?,
            stop_tx,
        })
    }

    fn push(&mut self, samples: &[f32]) {
        let resampled = match self.resampler.push(samples) {
            Ok(resampled) => resampled,
            Err(e) => {
                tracing::debug!(error = %e, "remote audio dropped");
                return;
            }
        };
        if let Ok(mut queue) = self.queue.lock() {
            queue.extend(resampled);
        }
    }
}

impl Drop for RemotePlayback {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

/// webrtc-rs peer connection with an Opus microphone track
pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    mic_enabled: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WebRtcPeer {
    /// Build the peer connection and start streaming from `capture`
    ///
    /// # Errors
    ///
    /// Returns error if the peer connection or codecs cannot be set up
    pub async fn connect(capture: Box<dyn CaptureStream>) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: vec![STUN_SERVER.to_string()],
                ..Default::default()
            }],
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(config).await?);

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: OPUS_RATE,
                channels: 1,
                ..Default::default()
            },
            "audio".to_string(),
            "huayu-mic".to_string(),
        ));
        if let Err(e) = pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
        {
            let _ = pc.close().await;
            return Err(e.into());
        }

        let remote_attached = Arc::new(AtomicBool::new(false));
        pc.on_track(Box::new(move |remote: Arc<TrackRemote>, _, _| {
            let first = !remote_attached.swap(true, Ordering::AcqRel);
            Box::pin(async move {
                if first {
                    tracing::info!(codec = %remote.codec().capability.mime_type, "remote audio attached");
                    tokio::spawn(play_remote(remote));
                }
            })
        }));

        let mic_enabled = Arc::new(AtomicBool::new(true));
        let sender = tokio::spawn(send_microphone(capture, track, Arc::clone(&mic_enabled)));

        Ok(Self {
            pc,
            mic_enabled,
            tasks: Mutex::new(vec![sender]),
        })
    }
}

/// Encode captured audio into 20 ms Opus samples until the track is gone
async fn send_microphone(
    capture: Box<dyn CaptureStream>,
    track: Arc<TrackLocalStaticSample>,
    enabled: Arc<AtomicBool>,
) {
    let encoder = match audiopus::coder::Encoder::new(
        audiopus::SampleRate::Hz48000,
        audiopus::Channels::Mono,
        audiopus::Application::Voip,
    ) {
        Ok(encoder) => encoder,
        Err(e) => {
            tracing::error!(error = %e, "opus encoder unavailable");
            return;
        }
    };

    let mut resampler = match StreamResampler::new(capture.sample_rate(), OPUS_RATE) {
        Ok(resampler) => resampler,
        Err(e) => {
            tracing::error!(error = %e, "microphone resampler unavailable");
            return;
        }
    };
    let mut pending: Vec<f32> = Vec::new();
    let mut packet = vec![0u8; 1500];
    let mut ticker = tokio::time::interval(FRAME_DURATION);

    loop {
        ticker.tick().await;
        match resampler.push(&capture.take_samples()) {
            Ok(resampled) => pending.extend(resampled),
            Err(e) => tracing::warn!(error = %e, "microphone resampling failed"),
        }

        while pending.len() >= FRAME_SAMPLES {
            let mut frame: Vec<f32> = pending.drain(..FRAME_SAMPLES).collect();
            if !enabled.load(Ordering::Acquire) {
                frame.fill(0.0);
            }

            let len = match encoder.encode_float(&frame, &mut packet) {
                Ok(len) => len,
                Err(e) => {
                    tracing::warn!(error = %e, "opus encode failed");
                    continue;
                }
            };

            let sample = Sample {
                data: packet[..len].to_vec().into(),
                duration: FRAME_DURATION,
                ..Default::default()
            };
            if let Err(e) = track.write_sample(&sample).await {
                tracing::debug!(error = %e, "microphone track closed");
                return;
            }
        }
    }
}

/// Decode the remote track and feed it to the output device
async fn play_remote(remote: Arc<TrackRemote>) {
    let mut playback = match RemotePlayback::start() {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "remote audio sink unavailable");
            return;
        }
    };
    let mut decoder =
        match audiopus::coder::Decoder::new(audiopus::SampleRate::Hz48000, audiopus::Channels::Mono) {
            Ok(d) => d,
            Err(e) => {
                tracing::error!(error = %e, "opus decoder unavailable");
                return;
            }
        };
    let mut pcm = vec![0f32; MAX_DECODED_SAMPLES];

    loop {
        let (rtp, _) = match remote.read_rtp().await {
            Ok(read) => read,
            Err(e) => {
                tracing::debug!(error = %e, "remote track ended");
                return;
            }
        };
        if rtp.payload.is_empty() {
            continue;
        }

        let decoded = audiopus::packet::Packet::try_from(&rtp.payload[..])
            .and_then(|packet| {
                let signals = audiopus::MutSignals::try_from(&mut pcm[..])?;
                decoder.decode_float(Some(packet), signals, false)
            });
        match decoded {
            Ok(n) => playback.push(&pcm[..n]),
            Err(e) => tracing::debug!(error = %e, "opus decode failed"),
        }
    }
}

#[async_trait]
impl PeerLink for WebRtcPeer {
    async fn create_offer(&self) -> Result<String> {
        let offer = self.pc.create_offer(None).await?;
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(offer).await?;
        let _ = gathered.recv().await;

        self.pc
            .local_description()
            .await
            .map(|d| d.sdp)
            .ok_or_else(|| Error::Live("no local description after gathering".to_string()))
    }

    async fn apply_answer(&self, sdp: String) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp)?;
        self.pc.set_remote_description(answer).await?;
        Ok(())
    }

    fn set_microphone_enabled(&self, enabled: bool) {
        self.mic_enabled.store(enabled, Ordering::Release);
    }

    fn microphone_enabled(&self) -> bool {
        self.mic_enabled.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<()> {
        self.set_microphone_enabled(false);
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        self.pc.close().await?;
        tracing::debug!("peer connection closed");
        Ok(())
    }
}
