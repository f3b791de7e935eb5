//! Configuration for the Huayu tutor
//!
//! Layered env > TOML file > defaults. Stored remote voices are passed
//! through the synthesis allow-list on load so a stale preference never
//! reaches the serving layer.

pub mod file;

use std::time::Duration;

use secrecy::SecretString;

use crate::live::DEFAULT_REALTIME_ENDPOINT;
use crate::server::DEFAULT_PORT;
use crate::service::ServiceConfig;
use crate::tutor::{AUTO_TOPIC, MAX_GLOSS_DELAY, TutorSettings};
use crate::voice::{
    Backend, DEFAULT_VOICE, InputMode, InputSettings, VoiceSelection, sanitize_model,
    sanitize_voice,
};

pub use file::{HuayuConfigFile, config_file_path, load_config_file, save_config_file};

/// Default serving layer URL
pub const DEFAULT_API_URL: &str = "http://localhost:8787";

/// Default slider position
pub const DEFAULT_DIFFICULTY: u8 = 35;

/// Huayu configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub models: ServiceConfig,
    pub voice: VoiceConfig,
    pub tutor: TutorConfig,
    pub input: InputConfig,
}

/// Serving layer configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Base URL the client talks to
    pub api_url: String,

    /// Port to listen on (from `HUAYU_PORT` or `PORT`)
    pub port: u16,

    /// Realtime SDP endpoint
    pub realtime_endpoint: String,

    /// Provider key, only needed by `huayu serve` (from `OPENAI_API_KEY`)
    pub openai_api_key: Option<SecretString>,
}

/// Speech output configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Force remote synthesis
    pub remote_tts: bool,
    pub allow_fallback: bool,
    /// Remote voice for the primary line, always allow-listed
    pub primary_remote: String,
    /// Remote voice for the gloss line, always allow-listed
    pub gloss_remote: String,
    pub primary_local: Option<String>,
    pub gloss_local: Option<String>,
    pub slow_speech: bool,
    pub realtime_voice: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            remote_tts: false,
            allow_fallback: true,
            primary_remote: DEFAULT_VOICE.to_string(),
            gloss_remote: DEFAULT_VOICE.to_string(),
            primary_local: None,
            gloss_local: None,
            slow_speech: false,
            realtime_voice: DEFAULT_VOICE.to_string(),
        }
    }
}

/// Conversation preferences
#[derive(Debug, Clone)]
pub struct TutorConfig {
    /// 0–100
    pub difficulty: u8,
    pub topic: String,
    pub show_gloss: bool,
    pub speak_gloss: bool,
    /// Clamped to [`MAX_GLOSS_DELAY`]
    pub gloss_delay: Duration,
}

impl Default for TutorConfig {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            topic: AUTO_TOPIC.to_string(),
            show_gloss: true,
            speak_gloss: false,
            gloss_delay: Duration::ZERO,
        }
    }
}

/// Speech input preferences
#[derive(Debug, Clone, Default)]
pub struct InputConfig {
    pub engine: InputMode,
    pub device: Option<String>,
    /// Transcription language; `zh` when unset
    pub language: Option<String>,
}

/// Remote voice from a stored preference, coerced onto the allow-list
fn stored_voice(value: Option<String>) -> String {
    value.map_or_else(
        || DEFAULT_VOICE.to_string(),
        |v| {
            let sanitized = sanitize_voice(&v);
            if sanitized.coerced {
                tracing::warn!(stored = %v, using = %sanitized.value, "replacing invalid stored voice");
            }
            sanitized.value
        },
    )
}

fn clamp_difficulty(value: i64) -> u8 {
    u8::try_from(value.clamp(0, 100)).unwrap_or(DEFAULT_DIFFICULTY)
}

impl Config {
    /// Load configuration from the environment and the standard config file
    #[must_use]
    pub fn load() -> Self {
        Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    pub fn from_sources(fc: HuayuConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = ServiceConfig::default();

        let server = ServerConfig {
            api_url: env("HUAYU_API_URL")
                .or(fc.server.api_url)
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            port: env("HUAYU_PORT")
                .or_else(|| env("PORT"))
                .and_then(|s| s.parse().ok())
                .or(fc.server.port)
                .unwrap_or(DEFAULT_PORT),
            realtime_endpoint: fc
                .server
                .realtime_endpoint
                .unwrap_or_else(|| DEFAULT_REALTIME_ENDPOINT.to_string()),
            openai_api_key: env("OPENAI_API_KEY")
                .filter(|k| !k.trim().is_empty())
                .map(SecretString::from),
        };

        let models = ServiceConfig {
            chat_model: env("HUAYU_CHAT_MODEL")
                .or(fc.models.chat)
                .unwrap_or(defaults.chat_model),
            stt_model: env("HUAYU_STT_MODEL")
                .or(fc.models.stt)
                .unwrap_or(defaults.stt_model),
            tts_model: env("HUAYU_TTS_MODEL")
                .or(fc.models.tts)
                .unwrap_or(defaults.tts_model),
            realtime_model: env("HUAYU_REALTIME_MODEL")
                .or(fc.models.realtime)
                .unwrap_or(defaults.realtime_model),
        };

        let voice = VoiceConfig {
            remote_tts: fc.voice.remote_tts.unwrap_or(false),
            allow_fallback: fc.voice.allow_fallback.unwrap_or(true),
            primary_remote: stored_voice(fc.voice.primary_remote),
            gloss_remote: stored_voice(fc.voice.gloss_remote),
            primary_local: fc.voice.primary_local.filter(|v| !v.is_empty()),
            gloss_local: fc.voice.gloss_local.filter(|v| !v.is_empty()),
            slow_speech: fc.voice.slow_speech.unwrap_or(false),
            realtime_voice: fc
                .voice
                .realtime_voice
                .unwrap_or_else(|| DEFAULT_VOICE.to_string()),
        };

        let tutor = TutorConfig {
            difficulty: fc
                .tutor
                .difficulty
                .map_or(DEFAULT_DIFFICULTY, clamp_difficulty),
            topic: fc
                .tutor
                .topic
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| AUTO_TOPIC.to_string()),
            show_gloss: fc.tutor.show_gloss.unwrap_or(true),
            speak_gloss: fc.tutor.speak_gloss.unwrap_or(false),
            gloss_delay: fc
                .tutor
                .gloss_delay_ms
                .map_or(Duration::ZERO, Duration::from_millis)
                .min(MAX_GLOSS_DELAY),
        };

        let input = InputConfig {
            engine: fc.input.engine.unwrap_or_default(),
            device: fc.input.device.filter(|d| !d.is_empty()),
            language: fc.input.language,
        };

        Self {
            server,
            models,
            voice,
            tutor,
            input,
        }
    }

    /// Voice selection for one line of a turn
    fn selection(&self, remote: &str, local: Option<&String>) -> VoiceSelection {
        VoiceSelection {
            backend: if self.voice.remote_tts {
                Backend::Remote
            } else {
                Backend::Local
            },
            local_voice_id: local.cloned(),
            remote_voice_id: remote.to_string(),
            remote_model_id: sanitize_model(&self.models.tts_model).value,
        }
    }

    /// Settings for the turn controller
    #[must_use]
    pub fn tutor_settings(&self) -> TutorSettings {
        TutorSettings {
            chat_model: self.models.chat_model.clone(),
            difficulty: self.tutor.difficulty,
            topic: self.tutor.topic.clone(),
            show_gloss: self.tutor.show_gloss,
            speak_gloss: self.tutor.speak_gloss,
            gloss_delay: self.tutor.gloss_delay,
            slow_speech: self.voice.slow_speech,
            allow_fallback: self.voice.allow_fallback,
            primary_voice: self.selection(&self.voice.primary_remote, self.voice.primary_local.as_ref()),
            gloss_voice: self.selection(&self.voice.gloss_remote, self.voice.gloss_local.as_ref()),
        }
    }

    /// Settings for the speech input engine
    #[must_use]
    pub fn input_settings(&self) -> InputSettings {
        let mut settings = InputSettings {
            mode: self.input.engine,
            device: self.input.device.clone(),
            stt_model: self.models.stt_model.clone(),
            ..InputSettings::default()
        };
        if let Some(language) = &self.input.language {
            settings.language.clone_from(language);
        }
        settings
    }

    /// Adopt the serving layer's model defaults for anything not set locally
    pub fn apply_service_defaults(&mut self, remote: &ServiceConfig) {
        let builtin = ServiceConfig::default();
        for (current, builtin, remote) in [
            (&mut self.models.chat_model, builtin.chat_model, &remote.chat_model),
            (&mut self.models.stt_model, builtin.stt_model, &remote.stt_model),
            (&mut self.models.tts_model, builtin.tts_model, &remote.tts_model),
            (
                &mut self.models.realtime_model,
                builtin.realtime_model,
                &remote.realtime_model,
            ),
        ] {
            if *current == builtin && !remote.is_empty() {
                current.clone_from(remote);
            }
        }
    }

    /// Preferences in their persisted form
    #[must_use]
    pub fn to_file(&self) -> HuayuConfigFile {
        let mut fc = HuayuConfigFile::default();
        fc.server.api_url = Some(self.server.api_url.clone());
        fc.server.port = Some(self.server.port);
        fc.server.realtime_endpoint = Some(self.server.realtime_endpoint.clone());

        fc.models.chat = Some(self.models.chat_model.clone());
        fc.models.stt = Some(self.models.stt_model.clone());
        fc.models.tts = Some(self.models.tts_model.clone());
        fc.models.realtime = Some(self.models.realtime_model.clone());

        fc.voice.remote_tts = Some(self.voice.remote_tts);
        fc.voice.allow_fallback = Some(self.voice.allow_fallback);
        fc.voice.primary_remote = Some(self.voice.primary_remote.clone());
        fc.voice.gloss_remote = Some(self.voice.gloss_remote.clone());
        fc.voice.primary_local.clone_from(&self.voice.primary_local);
        fc.voice.gloss_local.clone_from(&self.voice.gloss_local);
        fc.voice.slow_speech = Some(self.voice.slow_speech);
        fc.voice.realtime_voice = Some(self.voice.realtime_voice.clone());

        fc.tutor.difficulty = Some(i64::from(self.tutor.difficulty));
        fc.tutor.topic = Some(self.tutor.topic.clone());
        fc.tutor.show_gloss = Some(self.tutor.show_gloss);
        fc.tutor.speak_gloss = Some(self.tutor.speak_gloss);
        fc.tutor.gloss_delay_ms =
            Some(u64::try_from(self.tutor.gloss_delay.as_millis()).unwrap_or(0));

        fc.input.engine = Some(self.input.engine);
        fc.input.device.clone_from(&self.input.device);
        fc.input.language.clone_from(&self.input.language);
        fc
    }
}
