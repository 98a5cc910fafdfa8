//! Best-effort platform surface: audio cues and system notifications.
//!
//! Nothing here is required for correctness; every method defaults to a
//! no-op and failures are swallowed.

use std::io::Write;

/// Short sounds that mark turn boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCue {
    CountdownTick,
    RecordingStarted,
    RecordingStopped,
    SilenceWarning,
}

pub trait PlatformSurface: Send + Sync {
    fn play_cue(&self, _cue: AudioCue) {}

    fn notify(&self, _title: &str, _body: &str) {}
}

/// No cues, no notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentSurface;

impl PlatformSurface for SilentSurface {}

/// Terminal bell for cues; notifications go to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalSurface;

impl PlatformSurface for TerminalSurface {
    fn play_cue(&self, cue: AudioCue) {
        // one bell per tick, two to mark the microphone opening
        let bells = match cue {
            AudioCue::CountdownTick | AudioCue::RecordingStopped => "\x07",
            AudioCue::RecordingStarted | AudioCue::SilenceWarning => "\x07\x07",
        };
        let mut out = std::io::stderr();
        let _ = out.write_all(bells.as_bytes());
        let _ = out.flush();
    }

    fn notify(&self, title: &str, body: &str) {
        log::info!("notify: {title}: {body}");
    }
}

// ---------------------------------------------------------------------------
// RecordingSurface (test-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub use mock::RecordingSurface;
