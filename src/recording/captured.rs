//! The output of a successful recording.

use base64::Engine;

use super::backend::{AudioEncoding, CaptureFormat, RecordingError};
use crate::audio::{downmix_to_mono, encode_pcm_f32, encode_wav, resample};

/// An encoded recording, owned by whoever stopped the session.
///
/// Dropping it releases the payload and every [`PlaybackRef`] derived from
/// it becomes the caller's to discard.
#[derive(Clone, PartialEq)]
pub struct CapturedAudio {
    payload: Vec<u8>,
    encoding: AudioEncoding,
    sample_rate: u32,
    duration_seconds: f32,
}

impl std::fmt::Debug for CapturedAudio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedAudio")
            .field("bytes", &self.payload.len())
            .field("encoding", &self.encoding)
            .field("duration_seconds", &self.duration_seconds)
            .finish()
    }
}

impl CapturedAudio {
    /// Fold interleaved device samples to mono at `target_rate` and encode.
    pub fn encode(
        samples: &[f32],
        format: CaptureFormat,
        encoding: AudioEncoding,
        target_rate: u32,
    ) -> Result<Self, RecordingError> {
        let mono = downmix_to_mono(samples, format.channels);
        let converted = resample(&mono, format.sample_rate, target_rate);
        let duration_seconds = if target_rate == 0 {
            0.0
        } else {
            converted.len() as f32 / target_rate as f32
        };

        let payload = match encoding {
            AudioEncoding::Wav => encode_wav(&converted, target_rate)
                .map_err(|e| RecordingError::Encoding(e.to_string()))?,
            AudioEncoding::PcmF32Le => encode_pcm_f32(&converted),
        };

        Ok(Self {
            payload,
            encoding,
            sample_rate: target_rate,
            duration_seconds,
        })
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn encoding(&self) -> AudioEncoding {
        self.encoding
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_seconds(&self) -> f32 {
        self.duration_seconds
    }

    pub fn mime_type(&self) -> &'static str {
        self.encoding.mime_type()
    }

    /// Self-contained `data:` URI a player can load directly.
    pub fn playable_ref(&self) -> PlaybackRef {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&self.payload);
        PlaybackRef(format!("data:{};base64,{encoded}", self.mime_type()))
    }
}

/// Playable reference to a [`CapturedAudio`] payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackRef(String);

impl PlaybackRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
