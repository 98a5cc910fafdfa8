//! Coaching settings structs, defaults and TOML persistence.
//!
//! [`CoachConfig`] is the on-disk `settings.toml`.  [`SessionSettings`] is the
//! slice of it that a single coaching session consumes; it is read once when
//! the session opens and handed to the orchestrator by value, so nothing in
//! the turn engine reads settings ambiently.

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::AppPaths;
use crate::recording::AudioEncoding;

// ---------------------------------------------------------------------------
// SettingsError
// ---------------------------------------------------------------------------

/// A [`SessionSettings`] value that the turn engine cannot run with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("silence timeout must be greater than zero seconds")]
    ZeroSilenceTimeout,

    #[error("maximum recording length must be greater than zero seconds")]
    ZeroMaxRecording,
}

// ---------------------------------------------------------------------------
// SessionSettings
// ---------------------------------------------------------------------------

/// Per-user turn-taking preferences for one coaching session.
///
/// Immutable for the lifetime of a session: changing any of these requires
/// closing the session and opening a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Seconds counted down after the coach finishes speaking before the
    /// microphone opens automatically.  `0` opens it immediately.
    pub auto_record_delay_secs: u32,
    /// Seconds of continuous quiet before the user is warned.  The warning
    /// never stops the recording.
    pub silence_timeout_secs: u32,
    /// Play short audio cues on countdown ticks and recording start/stop.
    pub audio_cues_enabled: bool,
    /// Read coach replies aloud.  When off the engine rests in
    /// `ManualReady` after each reply.
    pub auto_speak: bool,
    /// Hard cap on a single recording; reaching it stops the recording as if
    /// the user had pressed stop.
    pub max_recording_secs: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            auto_record_delay_secs: 3,
            silence_timeout_secs: 5,
            audio_cues_enabled: true,
            auto_speak: true,
            max_recording_secs: 120,
        }
    }
}

impl SessionSettings {
    /// Check the bounds the turn engine relies on.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.silence_timeout_secs == 0 {
            return Err(SettingsError::ZeroSilenceTimeout);
        }
        if self.max_recording_secs == 0 {
            return Err(SettingsError::ZeroMaxRecording);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Microphone capture and level-metering settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device name; `None` uses the system default.
    pub input_device: Option<String>,
    /// Normalised level (0–100) that counts as the user speaking.  Anything
    /// at or below it accumulates silence.
    pub amplitude_floor: u8,
    /// How often the live level is sampled, in milliseconds.
    pub level_sample_ms: u64,
    /// Encodings to negotiate with the device, most preferred first.
    pub preferred_encodings: Vec<AudioEncoding>,
    /// Sample rate of the audio handed to the transcription service.
    pub target_sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            amplitude_floor: 20,
            level_sample_ms: 100,
            preferred_encodings: vec![AudioEncoding::Wav, AudioEncoding::PcmF32Le],
            target_sample_rate: 16_000,
        }
    }
}

// ---------------------------------------------------------------------------
// SpeechConfig
// ---------------------------------------------------------------------------

/// Text-to-speech settings for the coach voice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Master switch; when off the speech engine reports itself unsupported.
    pub enabled: bool,
    /// Synthesis program override.  `None` picks `say` on macOS and
    /// `espeak-ng` / `espeak` elsewhere.
    pub program: Option<String>,
    /// Voice name passed to the synthesis program.
    pub voice: Option<String>,
    /// Speaking rate in words per minute.
    pub rate_wpm: u32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: None,
            voice: None,
            rate_wpm: 175,
        }
    }
}

// ---------------------------------------------------------------------------
// ServiceConfig
// ---------------------------------------------------------------------------

/// Connection settings for the transcription / coaching backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base URL of an OpenAI-compatible API.
    pub base_url: String,
    /// API key; `None` for local providers.
    pub api_key: Option<String>,
    /// Model used for coach replies and knowledge extraction.
    pub chat_model: String,
    /// Model used for speech transcription.
    pub transcription_model: String,
    /// Sampling temperature for coach replies.
    pub temperature: f32,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".into(),
            api_key: None,
            chat_model: "gpt-4o-mini".into(),
            transcription_model: "whisper-1".into(),
            temperature: 0.7,
            timeout_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// HotkeyConfig
// ---------------------------------------------------------------------------

/// Global hotkey bindings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HotkeyConfig {
    /// Starts a recording, or stops the active one.
    pub record_key: String,
    /// Skips the auto-record countdown and records now.
    pub skip_key: String,
    /// Aborts the countdown without recording.
    pub abort_key: String,
    /// Ends the session.
    pub complete_key: String,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            record_key: "F9".into(),
            skip_key: "F10".into(),
            abort_key: "Escape".into(),
            complete_key: "F12".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// CoachConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoachConfig {
    pub session: SessionSettings,
    pub audio: AudioConfig,
    pub speech: SpeechConfig,
    pub services: ServiceConfig,
    pub hotkey: HotkeyConfig,
}

impl CoachConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// A missing file is the first-run case and yields the defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SettingsProvider
// ---------------------------------------------------------------------------

/// Source of [`SessionSettings`], consulted once when a session opens.
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    async fn session_settings(&self) -> Result<SessionSettings>;
}

/// Reads the `[session]` table of a `settings.toml` file.
pub struct FileSettingsProvider {
    path: PathBuf,
}

impl FileSettingsProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for FileSettingsProvider {
    fn default() -> Self {
        Self::new(AppPaths::new().settings_file)
    }
}

#[async_trait]
impl SettingsProvider for FileSettingsProvider {
    async fn session_settings(&self) -> Result<SessionSettings> {
        let path = self.path.clone();
        let config = tokio::task::spawn_blocking(move || CoachConfig::load_from(&path)).await??;
        config.session.validate()?;
        Ok(config.session)
    }
}

/// Fixed settings, for embedding and tests.
pub struct StaticSettings(pub SessionSettings);

#[async_trait]
impl SettingsProvider for StaticSettings {
    async fn session_settings(&self) -> Result<SessionSettings> {
        self.0.validate()?;
        Ok(self.0.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
