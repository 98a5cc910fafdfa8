//! Recording lifecycle state and the read-only snapshot exposed to callers.
//!
//! ```text
//! Idle ──start──▶ RequestingPermission ──granted──▶ Recording
//!                                                   ──stop──▶ Processing ──▶ Idle
//! Idle / RequestingPermission / Recording ──failure──▶ Error
//! any state ──cancel──▶ Idle
//! Error ──start──▶ RequestingPermission
//! ```

use serde::Serialize;

/// Lifecycle of a single microphone capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum RecordingState {
    #[default]
    Idle,
    RequestingPermission,
    Recording,
    Processing,
    /// The last attempt failed; the message lives in
    /// [`RecordingSnapshot::error`].  Recoverable by calling `start` again.
    Error,
}

impl RecordingState {
    /// `true` while the session holds (or is acquiring) the device.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RecordingState::RequestingPermission
                | RecordingState::Recording
                | RecordingState::Processing
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            RecordingState::Idle => "Idle",
            RecordingState::RequestingPermission => "Requesting permission",
            RecordingState::Recording => "Recording",
            RecordingState::Processing => "Processing",
            RecordingState::Error => "Error",
        }
    }
}

/// Whether the platform has granted microphone access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PermissionStatus {
    #[default]
    Unknown,
    Granted,
    Denied,
}

/// Point-in-time view of a [`RecordingSession`](super::RecordingSession).
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RecordingSnapshot {
    pub state: RecordingState,
    /// Whole seconds since the current recording started.
    pub elapsed_seconds: u32,
    /// Normalised input level, 0–100.
    pub audio_level: u8,
    /// Seconds since the level was last above the amplitude floor.
    pub silence_seconds: f32,
    pub permission: PermissionStatus,
    /// Human-readable reason for the `Error` state, or for the last
    /// permission denial.
    pub error: Option<String>,
}
