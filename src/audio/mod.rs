//! Audio plumbing beneath the recording session.
//!
//! ```text
//! Microphone → cpal callback → CpalStream (samples + RMS level)
//!           → downmix_to_mono → resample → encode_wav / encode_pcm_f32
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use voice_coach::audio::{normalized_level, rms};
//!
//! let quiet = [0.0_f32; 160];
//! assert_eq!(normalized_level(rms(&quiet)), 0);
//! ```

pub mod capture;
pub mod encode;
pub mod level;
pub mod resample;

pub use capture::CpalMicrophone;
pub use encode::{encode_pcm_f32, encode_wav};
pub use level::{normalized_level, rms};
pub use resample::{downmix_to_mono, resample};
