//! One-shot silence warning driven by the sampled input level.
//!
//! [`SilenceTracker`] accumulates quiet time while the level stays at or
//! below the amplitude floor.  Once the accumulated quiet first reaches the
//! armed timeout it reports a warning; it stays quiet after that until the
//! level rises above the floor again, which resets the count and re-arms the
//! warning.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SilenceTracker {
    floor: u8,
    timeout: Option<Duration>,
    silent_for: Duration,
    warned: bool,
}

impl SilenceTracker {
    /// `floor` is the normalised level (0–100) that still counts as silence.
    pub fn new(floor: u8) -> Self {
        Self {
            floor,
            timeout: None,
            silent_for: Duration::ZERO,
            warned: false,
        }
    }

    /// Start a fresh recording.  `None` tracks silence without warning.
    pub fn arm(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
        self.reset();
    }

    pub fn reset(&mut self) {
        self.silent_for = Duration::ZERO;
        self.warned = false;
    }

    /// Feed one level sample covering `elapsed` of wall time.
    ///
    /// Returns `true` exactly when the warning should be raised.
    pub fn observe(&mut self, level: u8, elapsed: Duration) -> bool {
        if level > self.floor {
            self.reset();
            return false;
        }

        self.silent_for += elapsed;
        match self.timeout {
            Some(timeout) if !self.warned && self.silent_for >= timeout => {
                self.warned = true;
                true
            }
            _ => false,
        }
    }

    /// A warning was raised and has not been re-armed by activity yet.
    pub fn is_warned(&self) -> bool {
        self.warned
    }

    pub fn silent_secs(&self) -> f32 {
        self.silent_for.as_secs_f32()
    }
}
