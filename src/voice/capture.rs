//! Audio capture from microphone
//!
//! cpal streams are not `Send`, so each capture owns a dedicated thread that
//! builds the stream, keeps it alive until stopped, then drops it.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};

use super::resample::resample;
use crate::{Error, Result};

/// Sample rate for speech payloads (16kHz)
pub const SAMPLE_RATE: u32 = 16000;

/// Captured mono audio
#[derive(Debug, Clone, Default)]
pub struct Recording {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Recording {
    /// Encode as 16kHz 16-bit WAV for transcription
    ///
    /// # Errors
    ///
    /// Returns error if resampling or WAV encoding fails
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        let samples = resample(&self.samples, self.sample_rate, SAMPLE_RATE)?;
        samples_to_wav(&samples, SAMPLE_RATE)
    }

    /// Length in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// A running capture
pub trait CaptureStream: Send {
    /// Native rate of the captured samples
    fn sample_rate(&self) -> u32;

    /// Samples captured since the last call
    fn take_samples(&self) -> Vec<f32>;

    /// Stop capturing and return everything not yet taken
    ///
    /// # Errors
    ///
    /// Returns error if the capture thread failed
    fn stop(self: Box<Self>) -> Result<Recording>;
}

/// Source of capture streams
pub trait Microphone: Send + Sync {
    /// Open a capture on the named device, or the system default
    ///
    /// # Errors
    ///
    /// Returns error if the device is missing or cannot be opened
    fn open(&self, device: Option<&str>) -> Result<Box<dyn CaptureStream>>;

    /// Input device names; empty when enumeration fails
    fn devices(&self) -> Vec<String>;
}

/// Microphone backed by the default cpal host
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalMicrophone;

fn find_device(name: Option<&str>) -> Result<Device> {
    let host = cpal::default_host();
    match name.filter(|n| !n.is_empty()) {
        None => host
            .default_input_device()
            .ok_or_else(|| Error::Microphone("no input device available".to_string())),
        Some(wanted) => host
            .input_devices()
            .map_err(|e| Error::Microphone(e.to_string()))?
            .find(|d| d.name().is_ok_and(|n| n == wanted))
            .ok_or_else(|| Error::Microphone(format!("input device not found: {wanted}"))),
    }
}

/// Prefer a 16kHz mono config; otherwise take the device default
fn input_config(device: &Device) -> Result<StreamConfig> {
    let speech = device
        .supported_input_configs()
        .map_err(|e| Error::Microphone(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        });

    if let Some(config) = speech {
        return Ok(config.with_sample_rate(SampleRate(SAMPLE_RATE)).config());
    }

    Ok(device
        .default_input_config()
        .map_err(|e| Error::Microphone(e.to_string()))?
        .into())
}

/// Build and start an input stream; runs on the capture thread
fn start_stream(
    device_name: Option<&str>,
    buffer: Arc<Mutex<Vec<f32>>>,
) -> Result<(cpal::Stream, u32)> {
    let device = find_device(device_name)?;
    let config = input_config(&device)?;
    let channels = usize::from(config.channels.max(1));

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = buffer.lock() {
                    #[allow(clippy::cast_precision_loss)]
                    buf.extend(
                        data.chunks(channels)
                            .map(|f| f.iter().sum::<f32>() / f.len() as f32),
                    );
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Microphone(e.to_string()))?;
    stream.play().map_err(|e| Error::Microphone(e.to_string()))?;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = config.sample_rate.0,
        channels = config.channels,
        "audio capture started"
    );
    Ok((stream, config.sample_rate.0))
}

impl Microphone for CpalMicrophone {
    fn open(&self, device: Option<&str>) -> Result<Box<dyn CaptureStream>> {
        let device_name = device.map(ToString::to_string);
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<u32>>(1);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread_buffer = Arc::clone(&buffer);
        let thread = std::thread::Builder::new()
            .name("huayu-capture".to_string())
            .spawn(move || {
                let started = start_stream(device_name.as_deref(), thread_buffer);
                match started {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        let _ = stop_rx.recv();
                        drop(stream);
                        tracing::debug!("audio capture stopped");
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })?;

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| Error::Microphone("capture thread exited".to_string()))??;

        Ok(Box::new(CpalCapture {
            buffer,
            sample_rate,
            stop_tx,
            thread: Some(thread),
        }))
    }

    fn devices(&self) -> Vec<String> {
        match cpal::default_host().input_devices() {
            Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
            Err(e) => {
                tracing::debug!(error = %e, "input device enumeration failed");
                Vec::new()
            }
        }
    }
}

struct CpalCapture {
    buffer: Arc<Mutex<Vec<f32>>>,
    sample_rate: u32,
    stop_tx: mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureStream for CpalCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn take_samples(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }

    fn stop(mut self: Box<Self>) -> Result<Recording> {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| Error::Microphone("capture thread panicked".to_string()))?;
        }
        Ok(Recording {
            samples: self.take_samples(),
            sample_rate: self.sample_rate,
        })
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
