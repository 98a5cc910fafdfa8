//! Configuration for the voice coach.
//!
//! `CoachConfig` is the persisted `settings.toml`; `SessionSettings` is the
//! per-session slice injected into the turn orchestrator through a
//! `SettingsProvider`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{
    AudioConfig, CoachConfig, FileSettingsProvider, HotkeyConfig, ServiceConfig, SessionSettings,
    SettingsError, SettingsProvider, SpeechConfig, StaticSettings,
};
