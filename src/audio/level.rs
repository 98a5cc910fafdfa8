//! Live input level metering.
//!
//! The recording session samples the microphone's RMS amplitude on a fixed
//! cadence and reports it as a 0–100 level.  RMS is mapped logarithmically
//! from −60 dBFS (0) to 0 dBFS (100) so that normal speech lands in the
//! upper half of the range and room noise near the bottom.

/// Quietest level that still registers above zero, in dBFS.
const FLOOR_DBFS: f32 = -60.0;

/// Root-mean-square amplitude of `samples`.
///
/// Returns `0.0` for an empty slice.
///
/// ```rust
/// use voice_coach::audio::rms;
///
/// assert_eq!(rms(&[]), 0.0);
/// assert!((rms(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-6);
/// ```
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let mean_sq: f32 = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    mean_sq.sqrt()
}

/// Map an RMS amplitude in `[0.0, 1.0]` onto the 0–100 level scale.
///
/// ```rust
/// use voice_coach::audio::normalized_level;
///
/// assert_eq!(normalized_level(0.0), 0);
/// assert_eq!(normalized_level(1.0), 100);
/// assert!(normalized_level(0.1) > normalized_level(0.01));
/// ```
pub fn normalized_level(rms: f32) -> u8 {
    if !rms.is_finite() || rms <= 0.0 {
        return 0;
    }
    let dbfs = 20.0 * rms.min(1.0).log10();
    let scaled = (dbfs - FLOOR_DBFS) / -FLOOR_DBFS * 100.0;
    scaled.clamp(0.0, 100.0).round() as u8
}
