//! Global hotkeys for hands-free turn control, backed by `rdev`.
//!
//! `rdev::listen()` blocks its thread forever, so [`HotkeyListener`] runs it on
//! a dedicated OS thread and forwards matching key presses over a
//! `tokio::sync::mpsc` channel.
//!
//! ```no_run
//! use tokio::sync::mpsc;
//! use voice_coach::config::HotkeyConfig;
//! use voice_coach::hotkey::{HotkeyBindings, HotkeyListener};
//!
//! let bindings = HotkeyBindings::from_config(&HotkeyConfig::default()).unwrap();
//! let (tx, mut rx) = mpsc::channel(16);
//! let _listener = HotkeyListener::start(bindings, tx).unwrap();
//! // while let Some(event) = rx.recv().await { ... }
//! ```

pub mod listener;

pub use listener::HotkeyListener;

use thiserror::Error;

use crate::config::HotkeyConfig;

/// Turn actions a key can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyEvent {
    /// Record when idle, stop when recording.
    RecordToggle,
    SkipCountdown,
    AbortCountdown,
    EndSession,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HotkeyError {
    #[error("unknown key name {0:?} for {1}")]
    UnknownKey(String, &'static str),

    #[error("{0:?} is bound to more than one action")]
    DuplicateKey(String),
}

// ---------------------------------------------------------------------------
// HotkeyBindings
// ---------------------------------------------------------------------------

/// Resolved key → action table.
#[derive(Debug, Clone, PartialEq)]
pub struct HotkeyBindings {
    bindings: Vec<(rdev::Key, HotkeyEvent)>,
}

impl HotkeyBindings {
    pub fn from_config(config: &HotkeyConfig) -> Result<Self, HotkeyError> {
        let named = [
            (&config.record_key, HotkeyEvent::RecordToggle, "record_key"),
            (&config.skip_key, HotkeyEvent::SkipCountdown, "skip_key"),
            (&config.abort_key, HotkeyEvent::AbortCountdown, "abort_key"),
            (&config.complete_key, HotkeyEvent::EndSession, "complete_key"),
        ];

        let mut bindings: Vec<(rdev::Key, HotkeyEvent)> = Vec::with_capacity(named.len());
        for (name, event, field) in named {
            let key = parse_key(name).ok_or_else(|| HotkeyError::UnknownKey(name.clone(), field))?;
            if bindings.iter().any(|(bound, _)| *bound == key) {
                return Err(HotkeyError::DuplicateKey(name.clone()));
            }
            bindings.push((key, event));
        }
        Ok(Self { bindings })
    }

    pub fn event_for(&self, key: rdev::Key) -> Option<HotkeyEvent> {
        self.bindings
            .iter()
            .find(|(bound, _)| *bound == key)
            .map(|(_, event)| *event)
    }
}

// ---------------------------------------------------------------------------
// parse_key
// ---------------------------------------------------------------------------

/// Parse a key name from `settings.toml`.
///
/// Accepts F1–F12, a handful of named keys (case-insensitive) and single
/// letters or digits.
///
/// ```
/// use voice_coach::hotkey::parse_key;
///
/// assert_eq!(parse_key("F9"), Some(rdev::Key::F9));
/// assert_eq!(parse_key("escape"), Some(rdev::Key::Escape));
/// assert_eq!(parse_key("r"), Some(rdev::Key::KeyR));
/// assert_eq!(parse_key("Hyper"), None);
/// ```
pub fn parse_key(name: &str) -> Option<rdev::Key> {
    use rdev::Key;

    const FUNCTION_KEYS: [Key; 12] = [
        Key::F1,
        Key::F2,
        Key::F3,
        Key::F4,
        Key::F5,
        Key::F6,
        Key::F7,
        Key::F8,
        Key::F9,
        Key::F10,
        Key::F11,
        Key::F12,
    ];
    const LETTERS: [Key; 26] = [
        Key::KeyA,
        Key::KeyB,
        Key::KeyC,
        Key::KeyD,
        Key::KeyE,
        Key::KeyF,
        Key::KeyG,
        Key::KeyH,
        Key::KeyI,
        Key::KeyJ,
        Key::KeyK,
        Key::KeyL,
        Key::KeyM,
        Key::KeyN,
        Key::KeyO,
        Key::KeyP,
        Key::KeyQ,
        Key::KeyR,
        Key::KeyS,
        Key::KeyT,
        Key::KeyU,
        Key::KeyV,
        Key::KeyW,
        Key::KeyX,
        Key::KeyY,
        Key::KeyZ,
    ];
    const DIGITS: [Key; 10] = [
        Key::Num0,
        Key::Num1,
        Key::Num2,
        Key::Num3,
        Key::Num4,
        Key::Num5,
        Key::Num6,
        Key::Num7,
        Key::Num8,
        Key::Num9,
    ];

    let name = name.trim();
    let lower = name.to_ascii_lowercase();

    if let Some(n) = lower.strip_prefix('f').and_then(|n| n.parse::<usize>().ok()) {
        return n.checked_sub(1).and_then(|i| FUNCTION_KEYS.get(i)).copied();
    }

    let mut chars = lower.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return match c {
            'a'..='z' => Some(LETTERS[(c as u8 - b'a') as usize]),
            '0'..='9' => Some(DIGITS[(c as u8 - b'0') as usize]),
            _ => None,
        };
    }

    let key = match lower.as_str() {
        "escape" | "esc" => Key::Escape,
        "space" => Key::Space,
        "enter" | "return" => Key::Return,
        "tab" => Key::Tab,
        "backspace" => Key::Backspace,
        "pause" => Key::Pause,
        "scrolllock" => Key::ScrollLock,
        "insert" => Key::Insert,
        "home" => Key::Home,
        "end" => Key::End,
        "pageup" => Key::PageUp,
        "pagedown" => Key::PageDown,
        "capslock" => Key::CapsLock,
        "rightalt" | "altgr" => Key::AltGr,
        "rightcontrol" | "rightctrl" => Key::ControlRight,
        _ => return None,
    };
    Some(key)
}
