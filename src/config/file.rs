//! TOML configuration file
//!
//! `~/.config/huayu/config.toml` holds persisted preferences. Every field is
//! optional; the file is a partial overlay on top of defaults.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::voice::InputMode;

/// Top-level TOML configuration file schema
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct HuayuConfigFile {
    /// Serving layer and endpoints
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Model identifiers
    #[serde(default)]
    pub models: ModelsFileConfig,

    /// Speech output and live-session voices
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Conversation preferences
    #[serde(default)]
    pub tutor: TutorFileConfig,

    /// Speech input preferences
    #[serde(default)]
    pub input: InputFileConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerFileConfig {
    /// Base URL of the serving layer (e.g. "http://localhost:8787")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Port `huayu serve` listens on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Realtime SDP endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realtime_endpoint: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ModelsFileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realtime: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct VoiceFileConfig {
    /// Force remote synthesis
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_tts: Option<bool>,

    /// Fall back to local synthesis when remote fails
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_fallback: Option<bool>,

    /// Remote voice for the primary (Mandarin) line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_remote: Option<String>,

    /// Remote voice for the gloss (English) line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gloss_remote: Option<String>,

    /// Local voice id for the primary line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_local: Option<String>,

    /// Local voice id for the gloss line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gloss_local: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub slow_speech: Option<bool>,

    /// Voice for live sessions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realtime_voice: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TutorFileConfig {
    /// 0–100
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_gloss: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speak_gloss: Option<bool>,
    /// Milliseconds, 0–2000
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gloss_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct InputFileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<InputMode>,
    /// Input device name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// Transcription language (e.g. "zh")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Load the config file from the standard path
///
/// Returns `HuayuConfigFile::default()` if the file doesn't exist or can't be parsed.
#[must_use]
pub fn load_config_file() -> HuayuConfigFile {
    config_file_path().map_or_else(HuayuConfigFile::default, |path| load_config_file_from(&path))
}

/// Load the config file at `path`, degrading to defaults on any problem
#[must_use]
pub fn load_config_file_from(path: &Path) -> HuayuConfigFile {
    if !path.exists() {
        return HuayuConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                HuayuConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            HuayuConfigFile::default()
        }
    }
}

/// Persist preferences to the standard path
///
/// # Errors
///
/// Returns error if no config directory is known or the write fails
pub fn save_config_file(config: &HuayuConfigFile) -> Result<PathBuf> {
    let path = config_file_path()
        .ok_or_else(|| crate::Error::Config("no config directory available".to_string()))?;
    save_config_file_to(&path, config)?;
    Ok(path)
}

/// Write `config` to `path` atomically (temp file in the same directory, then rename)
///
/// # Errors
///
/// Returns error if the directory cannot be created or the file cannot be written
pub fn save_config_file_to(path: &Path, config: &HuayuConfigFile) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let content = toml::to_string_pretty(config)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.persist(path).map_err(|e| e.error)?;

    tracing::debug!(path = %path.display(), "saved config file");
    Ok(())
}

/// Return the config file path: `~/.config/huayu/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("huayu").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_parses() {
        let fc: HuayuConfigFile = toml::from_str(
            r#"
            [tutor]
            difficulty = 80

            [input]
            engine = "record"
            "#,
        )
        .unwrap();
        assert_eq!(fc.tutor.difficulty, Some(80));
        assert_eq!(fc.input.engine, Some(InputMode::Record));
        assert!(fc.models.chat.is_none());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut fc = HuayuConfigFile::default();
        fc.voice.primary_remote = Some("nova".to_string());
        fc.tutor.gloss_delay_ms = Some(500);
        save_config_file_to(&path, &fc).unwrap();

        assert_eq!(load_config_file_from(&path), fc);
    }

    #[test]
    fn test_unparsable_file_degrades_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[tutor\ndifficulty = ").unwrap();
        assert_eq!(load_config_file_from(&path), HuayuConfigFile::default());
    }
}
