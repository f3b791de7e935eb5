//! Audio playback to speakers
//!
//! Two paths: a metered cpal path that decodes MP3 (minimp3) or WAV (hound) and reports
//! live levels through [`AmplitudeMeter`], and a simple rodio path used when
//! the metered one fails for any reason.

use std::io::Cursor;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::meter::{AmplitudeMeter, PlaybackCursor};
use super::resample::resample;
use crate::{Error, Result};

/// Beep frequency used to unlock output before recording
pub const BEEP_FREQUENCY: f32 = 880.0;

/// Beep length
pub const BEEP_DURATION: Duration = Duration::from_millis(120);

/// Process-wide output device settings, created on first use
static SHARED_OUTPUT: OnceLock<std::result::Result<AudioOutput, String>> = OnceLock::new();

/// Default output device configuration
#[derive(Debug, Clone)]
pub struct AudioOutput {
    device_name: String,
    config: StreamConfig,
}

impl AudioOutput {
    /// The shared output, opened lazily once and reused
    ///
    /// # Errors
    ///
    /// Returns error if no output device could be opened
    pub fn shared() -> Result<&'static Self> {
        SHARED_OUTPUT
            .get_or_init(|| Self::open().map_err(|e| e.to_string()))
            .as_ref()
            .map_err(|e| Error::Audio(e.clone()))
    }

    fn open() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let config: StreamConfig = device
            .default_output_config()
            .map_err(|e| Error::Audio(e.to_string()))?
            .into();
        let device_name = device.name().unwrap_or_default();

        tracing::debug!(
            device = %device_name,
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "audio output initialized"
        );

        Ok(Self {
            device_name,
            config,
        })
    }

    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Play mono samples through the cursor, blocking until done
    fn play_blocking(&self, cursor: &PlaybackCursor) -> Result<()> {
        if cursor.samples().is_empty() {
            cursor.finish();
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device".to_string()))?;

        let channels = usize::from(self.config.channels);
        let feed = cursor.clone();

        let stream = device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / channels.max(1);
                    let start = feed.advance(frames);
                    let samples = feed.samples();
                    for (i, frame) in data.chunks_mut(channels.max(1)).enumerate() {
                        let sample = samples.get(start + i).copied().unwrap_or(0.0);
                        frame.fill(sample);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Playback(e.to_string()))?;

        stream.play().map_err(|e| Error::Playback(e.to_string()))?;

        let sample_count = cursor.samples().len();
        let duration_ms = (sample_count as u64 * 1000) / u64::from(self.sample_rate().max(1));
        let start = Instant::now();
        let timeout = Duration::from_millis(duration_ms + 500);

        while !cursor.is_finished() {
            if start.elapsed() > timeout {
                cursor.finish();
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }

        // let the device drain its last buffer
        std::thread::sleep(Duration::from_millis(100));
        drop(stream);

        tracing::debug!(samples = sample_count, "playback complete");
        Ok(())
    }

    /// Play mono samples at `sample_rate`, publishing levels on `meter`
    ///
    /// # Errors
    ///
    /// Returns error if the output stream cannot be built
    pub async fn play(
        &'static self,
        samples: Vec<f32>,
        sample_rate: u32,
        meter: &AmplitudeMeter,
    ) -> Result<()> {
        let samples = resample(&samples, sample_rate, self.sample_rate())?;
        let cursor = PlaybackCursor::new(Arc::from(samples));

        let follower = {
            let meter = meter.clone();
            let cursor = cursor.clone();
            tokio::spawn(async move { meter.follow(cursor).await })
        };

        let playing = cursor.clone();
        let result = tokio::task::spawn_blocking(move || self.play_blocking(&playing))
            .await
            .map_err(|e| Error::Playback(format!("playback task failed: {e}")));

        cursor.finish();
        let _ = follower.await;
        result?
    }

    /// Short 880 Hz beep
    ///
    /// # Errors
    ///
    /// Returns error if the output stream cannot be built
    pub async fn beep(&'static self, meter: &AmplitudeMeter) -> Result<()> {
        let rate = self.sample_rate();
        #[allow(clippy::cast_possible_truncation)]
        let len = (u128::from(rate) * BEEP_DURATION.as_millis() / 1000) as usize;
        let samples = tone(BEEP_FREQUENCY, len, rate, len / 12, 0.2);
        self.play(samples, rate, meter).await
    }
}

/// Sine tone of `len` samples with linear fade in/out over `fade` samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn tone(frequency: f32, len: usize, sample_rate: u32, fade: usize, amplitude: f32) -> Vec<f32> {
    let rate = sample_rate as f32;
    (0..len)
        .map(|i| {
            let t = i as f32 / rate;
            let mut gain = 1.0;
            if fade > 0 {
                if i < fade {
                    gain = i as f32 / fade as f32;
                } else if i >= len.saturating_sub(fade) {
                    gain = (len - i) as f32 / fade as f32;
                }
            }
            amplitude * gain * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Decode MP3 bytes to mono f32 samples and their sample rate
///
/// # Errors
///
/// Returns error if the data is empty or not decodable
pub fn decode_mp3(mp3_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    if mp3_data.is_empty() {
        return Err(Error::Playback("empty audio buffer".to_string()));
    }

    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or(sample_rate);
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Playback(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() || sample_rate == 0 {
        return Err(Error::Playback("no decodable audio frames".to_string()));
    }
    Ok((samples, sample_rate))
}

/// Decode 16-bit PCM WAV bytes to mono f32 samples and their sample rate
///
/// # Errors
///
/// Returns error if the data is not a readable WAV file
pub fn decode_wav(wav_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let reader =
        hound::WavReader::new(Cursor::new(wav_data)).map_err(|e| Error::Playback(e.to_string()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));
    let raw: Vec<f32> = reader
        .into_samples::<i16>()
        .filter_map(std::result::Result::ok)
        .map(|s| f32::from(s) / 32768.0)
        .collect();
    #[allow(clippy::cast_precision_loss)]
    let samples = raw
        .chunks(channels)
        .map(|f| f.iter().sum::<f32>() / f.len() as f32)
        .collect();
    Ok((samples, spec.sample_rate))
}

/// Decode WAV (by `RIFF` magic) or MP3 bytes
///
/// # Errors
///
/// Returns error if the payload cannot be decoded
pub fn decode_audio(data: &[u8]) -> Result<(Vec<f32>, u32)> {
    if data.starts_with(b"RIFF") {
        decode_wav(data)
    } else {
        decode_mp3(data)
    }
}

/// Plays an encoded audio payload to completion
#[async_trait]
pub trait AudioPlayer: Send + Sync {
    /// Play `audio` and return once playback has finished
    async fn play(&self, audio: &[u8]) -> Result<()>;
}

/// minimp3/hound decode + cpal output with live amplitude metering
#[derive(Debug, Clone)]
pub struct MeteredPlayer {
    meter: AmplitudeMeter,
}

impl MeteredPlayer {
    #[must_use]
    pub const fn new(meter: AmplitudeMeter) -> Self {
        Self { meter }
    }
}

#[async_trait]
impl AudioPlayer for MeteredPlayer {
    async fn play(&self, audio: &[u8]) -> Result<()> {
        let (samples, rate) = decode_audio(audio)?;
        AudioOutput::shared()?.play(samples, rate, &self.meter).await
    }
}

/// Plain rodio playback without metering
#[derive(Debug, Clone, Copy, Default)]
pub struct SimplePlayer;

impl SimplePlayer {
    fn play_blocking(audio: Vec<u8>) -> Result<()> {
        let stream = rodio::OutputStreamBuilder::open_default_stream()
            .map_err(|e| Error::Playback(e.to_string()))?;
        let sink = rodio::Sink::connect_new(stream.mixer());
        let source =
            rodio::Decoder::new(Cursor::new(audio)).map_err(|e| Error::Playback(e.to_string()))?;
        sink.append(source);
        sink.sleep_until_end();
        Ok(())
    }
}

#[async_trait]
impl AudioPlayer for SimplePlayer {
    async fn play(&self, audio: &[u8]) -> Result<()> {
        if audio.is_empty() {
            return Err(Error::Playback("empty audio buffer".to_string()));
        }
        let audio = audio.to_vec();
        tokio::task::spawn_blocking(move || Self::play_blocking(audio))
            .await
            .map_err(|e| Error::Playback(format!("playback task failed: {e}")))?
    }
}

/// Tries `primary`, then `secondary` on any failure
pub struct FallbackPlayer {
    primary: Arc<dyn AudioPlayer>,
    secondary: Arc<dyn AudioPlayer>,
}

impl FallbackPlayer {
    #[must_use]
    pub fn new(primary: Arc<dyn AudioPlayer>, secondary: Arc<dyn AudioPlayer>) -> Self {
        Self { primary, secondary }
    }

    /// Metered cpal output falling back to rodio
    #[must_use]
    pub fn system(meter: AmplitudeMeter) -> Self {
        Self::new(
            Arc::new(MeteredPlayer::new(meter)),
            Arc::new(SimplePlayer),
        )
    }
}

#[async_trait]
impl AudioPlayer for FallbackPlayer {
    async fn play(&self, audio: &[u8]) -> Result<()> {
        match self.primary.play(audio).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "metered playback failed, using simple playback");
                self.secondary.play(audio).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingPlayer {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingPlayer {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl AudioPlayer for CountingPlayer {
        async fn play(&self, _audio: &[u8]) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(Error::Playback("decode failed".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_fallback_only_on_failure() {
        let primary = CountingPlayer::new(false);
        let secondary = CountingPlayer::new(false);
        let player = FallbackPlayer::new(primary.clone(), secondary.clone());
        player.play(b"abc").await.unwrap();
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 0);

        let primary = CountingPlayer::new(true);
        let player = FallbackPlayer::new(primary.clone(), secondary.clone());
        player.play(b"abc").await.unwrap();
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_both_paths_failing_surfaces_error() {
        let player = FallbackPlayer::new(CountingPlayer::new(true), CountingPlayer::new(true));
        assert!(matches!(player.play(b"abc").await, Err(Error::Playback(_))));
    }

    #[test]
    fn test_decode_rejects_empty_and_garbage() {
        assert!(decode_mp3(&[]).is_err());
        assert!(decode_mp3(&[0u8; 64]).is_err());
    }

    #[test]
    fn test_decode_wav_payload() {
        let wav = crate::voice::samples_to_wav(&[0.5; 160], 16_000).unwrap();
        let (samples, rate) = decode_audio(&wav).unwrap();
        assert_eq!(rate, 16_000);
        assert_eq!(samples.len(), 160);
        assert!((samples[0] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_tone_fades_to_silence() {
        let samples = tone(880.0, 1000, 48_000, 100, 0.5);
        assert_eq!(samples.len(), 1000);
        assert!(samples[0].abs() < f32::EPSILON);
        assert!(samples.iter().all(|s| s.abs() <= 0.5));
    }
}
