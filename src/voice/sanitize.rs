//! Allow-list guards for remote synthesis voices and models
//!
//! Out-of-list values are coerced to a default rather than rejected; the
//! coercion is carried in [`Sanitized`] so callers can surface it.

use serde::Serialize;

/// Voices accepted by the remote synthesis backend
pub const ALLOWED_VOICES: &[&str] = &[
    "nova", "shimmer", "echo", "onyx", "fable", "alloy", "ash", "sage", "coral",
];

/// Models accepted by the remote synthesis backend
pub const ALLOWED_MODELS: &[&str] = &["tts-1", "tts-1-hd", "gpt-4o-mini-tts"];

/// Voice used when the requested one is not allowed
pub const DEFAULT_VOICE: &str = "alloy";

/// Model used when the requested one is not allowed
pub const DEFAULT_MODEL: &str = "tts-1";

/// Outcome of checking a value against an allow-list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sanitized {
    /// Value as supplied by the caller
    pub requested: String,
    /// Canonical value actually used
    pub value: String,
    /// Whether `value` differs from what was requested
    pub coerced: bool,
}

impl Sanitized {
    /// Fold a later stage's result into this one
    ///
    /// Keeps the first request, takes the final value, and stays coerced if
    /// either stage coerced.
    #[must_use]
    pub fn then(self, later: Self) -> Self {
        Self {
            requested: self.requested,
            value: later.value,
            coerced: self.coerced || later.coerced,
        }
    }
}

fn sanitize(requested: &str, allowed: &[&str], default: &str) -> Sanitized {
    let lowered = requested.trim().to_lowercase();
    let canonical = allowed.iter().find(|a| **a == lowered);

    match canonical {
        Some(value) => Sanitized {
            requested: requested.to_string(),
            value: (*value).to_string(),
            coerced: false,
        },
        None => Sanitized {
            requested: requested.to_string(),
            value: default.to_string(),
            coerced: true,
        },
    }
}

/// Check a synthesis voice against [`ALLOWED_VOICES`] (case-insensitive)
#[must_use]
pub fn sanitize_voice(requested: &str) -> Sanitized {
    sanitize(requested, ALLOWED_VOICES, DEFAULT_VOICE)
}

/// Check a synthesis model against [`ALLOWED_MODELS`] (case-insensitive)
#[must_use]
pub fn sanitize_model(requested: &str) -> Sanitized {
    sanitize(requested, ALLOWED_MODELS, DEFAULT_MODEL)
}
