//! Error types for the Huayu tutor

use thiserror::Error;

/// Result type alias for tutor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the tutor client and serving layer
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Language service returned a non-success result
    #[error("service error: {0}")]
    Service(String),

    /// Chat completion failed
    #[error("chat error: {0}")]
    Chat(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Microphone acquisition error
    #[error("microphone error: {0}")]
    Microphone(String),

    /// Decode or playback error
    #[error("playback error: {0}")]
    Playback(String),

    /// Live session error
    #[error("live session error: {0}")]
    Live(String),

    /// Live session signaling error (credential or SDP exchange)
    #[error("signaling error: {0}")]
    Signaling(String),

    /// Vocabulary source error
    #[error("vocabulary error: {0}")]
    Vocabulary(String),

    /// Operation abandoned because its owner was torn down
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML encoding error
    #[error("toml encode error: {0}")]
    TomlEncode(#[from] toml::ser::Error),

    /// WebRTC error
    #[error("webrtc error: {0}")]
    WebRtc(#[from] webrtc::Error),
}
