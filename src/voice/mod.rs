//! Voice processing module
//!
//! Speech output (remote synthesis or local espeak-ng), speech input
//! (recognition or push-to-record + transcription), device capture and
//! playback, amplitude metering and microphone arbitration.

mod capture;
mod input;
mod local;
mod meter;
mod mic;
mod output;
mod playback;
mod resample;
mod sanitize;

pub use capture::{CaptureStream, CpalMicrophone, Microphone, Recording, SAMPLE_RATE, samples_to_wav};
pub use input::{
    DIAGNOSTIC_DURATION, DiagnosticReport, InputMode, InputOutcome, InputSettings,
    MIN_DIAGNOSTIC_BYTES, MIN_PAYLOAD_BYTES, RecordingLimits, ResolvedMode, SpeechInputEngine,
    SpeechRecognizer,
};
pub use local::{
    EspeakSynthesizer, LocalSynthesizer, LocalVoice, SynthesisEvent, SynthesisStream,
    filter_voices,
};
pub use meter::{AmplitudeMeter, LEVEL_INTERVAL, MeterEvent, PlaybackCursor, level};
pub use mic::{MicConsumer, MicLease, MicrophoneArbiter};
pub use output::{
    Backend, NoopObserver, Speaker, SpeechObserver, SpeechOutcome, SpeechOutputEngine, Utterance,
    VoiceSelection, boundary_token, resolve_local_voice, zh_voice_hint,
};
pub use playback::{
    AudioOutput, AudioPlayer, BEEP_DURATION, BEEP_FREQUENCY, FallbackPlayer, MeteredPlayer,
    SimplePlayer, decode_audio, decode_mp3, decode_wav, tone,
};
pub use resample::{StreamResampler, resample};
pub use sanitize::{
    ALLOWED_MODELS, ALLOWED_VOICES, DEFAULT_MODEL, DEFAULT_VOICE, Sanitized, sanitize_model,
    sanitize_voice,
};
