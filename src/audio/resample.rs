//! Channel down-mixing and sample-rate conversion for captured audio.
//!
//! Devices capture at whatever rate and channel count they prefer (commonly
//! 48 kHz stereo).  Before a recording is encoded for the transcription
//! service it is folded to mono and converted to the configured target rate.

/// Average interleaved channels into a single mono track.
///
/// `channels == 0` yields an empty vector; `channels == 1` copies the input.
///
/// ```rust
/// use voice_coach::audio::downmix_to_mono;
///
/// let stereo = vec![0.5_f32, -0.5, 0.2, 0.4]; // L R L R
/// let mono = downmix_to_mono(&stereo, 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[1] - 0.3).abs() < 1e-6);
/// ```
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let width = n as usize;
            samples
                .chunks_exact(width)
                .map(|frame| frame.iter().sum::<f32>() / width as f32)
                .collect()
        }
    }
}

/// Convert mono `samples` from `from_rate` to `to_rate` by linear
/// interpolation.
///
/// Equal rates return a copy.  A zero rate on either side yields an empty
/// vector since there is no meaningful conversion.
///
/// ```rust
/// use voice_coach::audio::resample;
///
/// let one_ms_at_48k = vec![0.25_f32; 48];
/// assert_eq!(resample(&one_ms_at_48k, 48_000, 16_000).len(), 16);
/// ```
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return samples.to_vec();
    }
    if samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return Vec::new();
    }

    let step = from_rate as f64 / to_rate as f64;
    let out_len = (samples.len() as f64 / step).ceil() as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = (pos as usize).min(last);
            let frac = (pos - idx as f64) as f32;
            match samples.get(idx + 1) {
                Some(&next) => samples[idx] + (next - samples[idx]) * frac,
                None => samples[idx],
            }
        })
        .collect()
}
