//! Capability traits over the platform microphone.
//!
//! [`RecordingSession`](super::RecordingSession) never touches a device API
//! directly.  It talks to a [`MicrophoneBackend`] that can probe permission
//! and open a [`CaptureStream`]; the stream owns the device until it is
//! finished or dropped.  The production backend is
//! [`CpalMicrophone`](crate::audio::CpalMicrophone); tests use
//! [`MockMicrophone`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// AudioEncoding
// ---------------------------------------------------------------------------

/// Payload encodings a captured recording can be converted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    /// 16-bit PCM WAV.
    Wav,
    /// Headerless little-endian `f32` samples.
    PcmF32Le,
}

impl AudioEncoding {
    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioEncoding::Wav => "audio/wav",
            AudioEncoding::PcmF32Le => "audio/pcm",
        }
    }

    /// File extension used when the payload is uploaded as a file.
    pub fn extension(&self) -> &'static str {
        match self {
            AudioEncoding::Wav => "wav",
            AudioEncoding::PcmF32Le => "pcm",
        }
    }
}

/// Pick the first of `preferred` that the device also `offered`.
pub fn negotiate_encoding(
    preferred: &[AudioEncoding],
    offered: &[AudioEncoding],
) -> Option<AudioEncoding> {
    preferred.iter().copied().find(|enc| offered.contains(enc))
}

// ---------------------------------------------------------------------------
// RecordingError
// ---------------------------------------------------------------------------

/// Everything that can keep a recording from starting or finishing.
///
/// None of these are fatal; the session lands in `Error` (or stays `Idle`)
/// and `start` may be called again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordingError {
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("audio input device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("no supported audio encoding could be negotiated")]
    EncodingUnsupported,

    #[error("failed to encode captured audio: {0}")]
    Encoding(String),

    #[error("a recording is already in progress")]
    Busy,

    #[error("recording was cancelled before it started")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// Shape of the interleaved samples a [`CaptureStream`] delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Platform microphone access.
#[async_trait]
pub trait MicrophoneBackend: Send + Sync {
    /// Probe (and if needed prompt for) microphone permission without
    /// starting capture.
    async fn request_permission(&self) -> Result<(), RecordingError>;

    /// Encodings this platform can produce from a capture.
    fn supported_encodings(&self) -> Vec<AudioEncoding>;

    /// Acquire the input device and start capturing.
    async fn open(&self) -> Result<Box<dyn CaptureStream>, RecordingError>;
}

/// An open capture.  Dropping it releases the device without output.
pub trait CaptureStream: Send {
    fn format(&self) -> CaptureFormat;

    /// Most recent RMS amplitude in `[0.0, 1.0]`, or the error that cost us
    /// the device.
    fn level(&mut self) -> Result<f32, RecordingError>;

    /// Stop capturing, release the device and return every interleaved
    /// sample captured so far.
    fn finish(self: Box<Self>) -> Vec<f32>;
}

// ---------------------------------------------------------------------------
// MockMicrophone (tests only)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub use mock::MockMicrophone;
