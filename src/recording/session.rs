//! [`RecordingSession`]: one microphone capture lifecycle at a time.
//!
//! A session is reusable across turns.  Each `start` opens a new capture
//! tagged with a generation number; `stop`, `cancel`, device failure and the
//! duration cap all bump the generation, so a duration tick or level sample
//! that was already in flight sees a stale generation and does nothing.
//!
//! While recording, two timers run side by side:
//!
//! * a 1 s duration ticker that advances `elapsed_seconds` and auto-stops at
//!   the configured cap, and
//! * a level sampler that updates `audio_level`, tracks silence and raises a
//!   one-shot [`RecordingEvent::SilenceDetected`].
//!
//! Anything the caller did not ask for directly (silence, cap reached,
//! device lost) is reported on the event channel returned by
//! [`RecordingSession::new`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::backend::{
    negotiate_encoding, AudioEncoding, CaptureStream, MicrophoneBackend, RecordingError,
};
use super::captured::CapturedAudio;
use super::silence::SilenceTracker;
use super::state::{PermissionStatus, RecordingSnapshot, RecordingState};
use crate::audio::normalized_level;
use crate::config::AudioConfig;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Identifies one capture; events carry it so callers can drop stale ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureId(u64);

/// Notifications raised by the session's own timers.
#[derive(Debug)]
pub enum RecordingEvent {
    /// The input has been quiet for the armed timeout.  Advisory only: the
    /// recording keeps running.
    SilenceDetected { capture: CaptureId, silent_secs: f32 },
    /// The input rose above the floor after a silence warning; the warning
    /// is re-armed.
    SpeechResumed { capture: CaptureId },
    /// The duration cap was hit and the session stopped itself.
    LimitReached {
        capture: CaptureId,
        audio: CapturedAudio,
    },
    /// The device failed mid-recording, or the capture stopped at the cap
    /// could not be encoded; the session is now in `Error`.
    Failed {
        capture: CaptureId,
        error: RecordingError,
    },
}

/// Tunables for a [`RecordingSession`].
#[derive(Debug, Clone)]
pub struct RecordingOptions {
    pub max_duration: Duration,
    /// Normalised level (0–100) at or below which input counts as silence.
    pub amplitude_floor: u8,
    pub sample_interval: Duration,
    pub preferred_encodings: Vec<AudioEncoding>,
    pub target_sample_rate: u32,
}

impl Default for RecordingOptions {
    fn default() -> Self {
        Self::from_config(&AudioConfig::default())
    }
}

impl RecordingOptions {
    pub fn from_config(config: &AudioConfig) -> Self {
        Self {
            max_duration: Duration::from_secs(120),
            amplitude_floor: config.amplitude_floor.min(100),
            sample_interval: Duration::from_millis(config.level_sample_ms.max(10)),
            preferred_encodings: config.preferred_encodings.clone(),
            target_sample_rate: config.target_sample_rate,
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingSession
// ---------------------------------------------------------------------------

/// Owns the microphone for the coaching session.  Cheap to clone; all clones
/// drive the same capture.
#[derive(Clone)]
pub struct RecordingSession {
    shared: Arc<Shared>,
}

struct Shared {
    backend: Arc<dyn MicrophoneBackend>,
    options: RecordingOptions,
    events: mpsc::UnboundedSender<RecordingEvent>,
    inner: Mutex<Inner>,
}

struct Inner {
    snapshot: RecordingSnapshot,
    generation: u64,
    stream: Option<Box<dyn CaptureStream>>,
    encoding: AudioEncoding,
    silence: SilenceTracker,
    timers: Vec<JoinHandle<()>>,
}

impl RecordingSession {
    pub fn new(
        backend: Arc<dyn MicrophoneBackend>,
        options: RecordingOptions,
    ) -> (Self, mpsc::UnboundedReceiver<RecordingEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let inner = Inner {
            snapshot: RecordingSnapshot::default(),
            generation: 0,
            stream: None,
            encoding: AudioEncoding::Wav,
            silence: SilenceTracker::new(options.amplitude_floor),
            timers: Vec::new(),
        };
        let session = Self {
            shared: Arc::new(Shared {
                backend,
                options,
                events,
                inner: Mutex::new(inner),
            }),
        };
        (session, events_rx)
    }

    pub fn snapshot(&self) -> RecordingSnapshot {
        self.lock().snapshot.clone()
    }

    pub fn state(&self) -> RecordingState {
        self.lock().snapshot.state
    }

    /// `true` while a capture stream holds the input device.
    pub fn holds_device(&self) -> bool {
        self.lock().stream.is_some()
    }

    /// Duration ticker and level sampler handles currently owned.
    pub fn active_timers(&self) -> usize {
        self.lock().timers.len()
    }

    /// Probe microphone permission without starting capture.
    ///
    /// Never fails: a denial is recorded in the snapshot and reported as
    /// `false`.
    pub async fn request_permission(&self) -> bool {
        let result = self.shared.backend.request_permission().await;
        let mut inner = self.lock();
        match result {
            Ok(()) => {
                inner.snapshot.permission = PermissionStatus::Granted;
                true
            }
            Err(err) => {
                log::warn!("recording: permission probe failed: {err}");
                inner.snapshot.permission = PermissionStatus::Denied;
                inner.snapshot.error = Some(err.to_string());
                false
            }
        }
    }

    /// Acquire the microphone and begin capturing.
    ///
    /// `silence_timeout` arms the one-shot silence warning for this capture.
    /// On failure the session is left in `Error` with a message, except when
    /// a `cancel` raced the start, which leaves it `Idle` and returns
    /// [`RecordingError::Cancelled`].
    pub async fn start(
        &self,
        silence_timeout: Option<Duration>,
    ) -> Result<CaptureId, RecordingError> {
        let generation = {
            let mut inner = self.lock();
            if inner.snapshot.state.is_active() {
                return Err(RecordingError::Busy);
            }
            inner.generation += 1;
            inner.snapshot = RecordingSnapshot {
                state: RecordingState::RequestingPermission,
                permission: inner.snapshot.permission,
                ..RecordingSnapshot::default()
            };
            inner.generation
        };

        if let Err(err) = self.shared.backend.request_permission().await {
            return Err(self.fail_start(generation, err, Some(PermissionStatus::Denied)));
        }
        {
            let mut inner = self.lock();
            if inner.generation != generation {
                return Err(RecordingError::Cancelled);
            }
            inner.snapshot.permission = PermissionStatus::Granted;
        }

        let offered = self.shared.backend.supported_encodings();
        let Some(encoding) = negotiate_encoding(&self.shared.options.preferred_encodings, &offered)
        else {
            return Err(self.fail_start(generation, RecordingError::EncodingUnsupported, None));
        };

        let stream = match self.shared.backend.open().await {
            Ok(stream) => stream,
            Err(err) => return Err(self.fail_start(generation, err, None)),
        };

        let mut inner = self.lock();
        if inner.generation != generation {
            // cancelled while the device was being acquired
            drop(stream);
            return Err(RecordingError::Cancelled);
        }
        inner.stream = Some(stream);
        inner.encoding = encoding;
        inner.snapshot.state = RecordingState::Recording;
        inner.silence.arm(silence_timeout);
        inner.timers = vec![
            self.spawn_duration_ticker(generation),
            self.spawn_level_sampler(generation),
        ];
        drop(inner);

        log::info!("recording: capture {generation} started ({encoding:?})");
        Ok(CaptureId(generation))
    }

    /// Stop the active recording and hand back the encoded audio.
    ///
    /// Returns `None` when nothing was recording, when encoding failed (the
    /// session is then in `Error`), or when `cancel` was called while the
    /// audio was being encoded.
    pub async fn stop(&self) -> Option<CapturedAudio> {
        self.stop_capture(None).await
    }

    /// Hard stop without output.  Safe from any state, idempotent, and
    /// releases the device before returning.
    pub fn cancel(&self) {
        let mut inner = self.lock();
        inner.generation += 1;
        for timer in inner.timers.drain(..) {
            timer.abort();
        }
        let released = inner.stream.take().is_some();
        let previous = inner.snapshot.state;
        inner.snapshot = RecordingSnapshot {
            permission: inner.snapshot.permission,
            ..RecordingSnapshot::default()
        };
        if previous != RecordingState::Idle {
            log::debug!("recording: cancelled from {previous:?} (device released: {released})");
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: RecordingEvent) {
        // The receiver goes away with its owner; nothing to report to then.
        let _ = self.shared.events.send(event);
    }

    fn fail_start(
        &self,
        generation: u64,
        err: RecordingError,
        permission: Option<PermissionStatus>,
    ) -> RecordingError {
        let mut inner = self.lock();
        if inner.generation != generation {
            return RecordingError::Cancelled;
        }
        if let Some(permission) = permission {
            inner.snapshot.permission = permission;
        }
        inner.snapshot.state = RecordingState::Error;
        inner.snapshot.error = Some(err.to_string());
        log::warn!("recording: start failed: {err}");
        err
    }

    /// Drop the device after a mid-recording failure.
    fn fail_active(inner: &mut Inner, err: &RecordingError) {
        inner.generation += 1;
        for timer in inner.timers.drain(..) {
            timer.abort();
        }
        inner.stream = None;
        inner.snapshot.state = RecordingState::Error;
        inner.snapshot.audio_level = 0;
        inner.snapshot.error = Some(err.to_string());
        log::warn!("recording: device failed mid-recording: {err}");
    }

    async fn stop_capture(&self, expected: Option<u64>) -> Option<CapturedAudio> {
        let (generation, stream, encoding) = {
            let mut inner = self.lock();
            if inner.snapshot.state != RecordingState::Recording {
                return None;
            }
            if expected.is_some_and(|g| g != inner.generation) {
                return None;
            }
            let stream = inner.stream.take()?;
            inner.generation += 1;
            for timer in inner.timers.drain(..) {
                timer.abort();
            }
            inner.snapshot.state = RecordingState::Processing;
            inner.snapshot.audio_level = 0;
            (inner.generation, stream, inner.encoding)
        };

        let target_rate = self.shared.options.target_sample_rate;
        let encoded = tokio::task::spawn_blocking(move || {
            let format = stream.format();
            let samples = stream.finish();
            CapturedAudio::encode(&samples, format, encoding, target_rate)
        })
        .await;

        let mut inner = self.lock();
        if inner.generation != generation {
            log::debug!("recording: discarded capture cancelled during processing");
            return None;
        }
        match encoded {
            Ok(Ok(audio)) => {
                inner.snapshot.state = RecordingState::Idle;
                log::info!(
                    "recording: stopped after {}s ({:.1}s of audio)",
                    inner.snapshot.elapsed_seconds,
                    audio.duration_seconds()
                );
                Some(audio)
            }
            Ok(Err(err)) => {
                log::error!("recording: {err}");
                inner.snapshot.state = RecordingState::Error;
                inner.snapshot.error = Some(err.to_string());
                None
            }
            Err(join_err) => {
                log::error!("recording: encoder task failed: {join_err}");
                inner.snapshot.state = RecordingState::Error;
                inner.snapshot.error = Some(format!("encoder task failed: {join_err}"));
                None
            }
        }
    }

    fn spawn_duration_ticker(&self, generation: u64) -> JoinHandle<()> {
        let session = self.clone();
        let max_secs = self.shared.options.max_duration.as_secs().max(1);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let reached = {
                    let mut inner = session.lock();
                    if inner.generation != generation
                        || inner.snapshot.state != RecordingState::Recording
                    {
                        return;
                    }
                    inner.snapshot.elapsed_seconds += 1;
                    u64::from(inner.snapshot.elapsed_seconds) >= max_secs
                };
                if reached {
                    log::info!("recording: capture {generation} hit the {max_secs}s limit");
                    // stop() aborts this ticker, so it runs on its own task
                    tokio::spawn(async move { session.finish_at_limit(generation).await });
                    return;
                }
            }
        })
    }

    async fn finish_at_limit(&self, generation: u64) {
        let capture = CaptureId(generation);
        match self.stop_capture(Some(generation)).await {
            Some(audio) => self.emit(RecordingEvent::LimitReached { capture, audio }),
            None => {
                // a caller's stop or cancel got there first unless encoding failed
                let snapshot = self.snapshot();
                if snapshot.state == RecordingState::Error {
                    let reason = snapshot.error.unwrap_or_default();
                    self.emit(RecordingEvent::Failed {
                        capture,
                        error: RecordingError::Encoding(reason),
                    });
                }
            }
        }
    }

    fn spawn_level_sampler(&self, generation: u64) -> JoinHandle<()> {
        let session = self.clone();
        let period = self.shared.options.sample_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !session.sample_level(generation, period) {
                    return;
                }
            }
        })
    }

    /// One level sample.  Returns `false` once the sampler should exit.
    fn sample_level(&self, generation: u64, period: Duration) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation || inner.snapshot.state != RecordingState::Recording {
            return false;
        }
        let reading = match inner.stream.as_mut() {
            Some(stream) => stream.level(),
            None => return false,
        };

        match reading {
            Ok(rms) => {
                let level = normalized_level(rms);
                let was_warned = inner.silence.is_warned();
                let warn = inner.silence.observe(level, period);
                let resumed = was_warned && !inner.silence.is_warned();
                inner.snapshot.audio_level = level;
                inner.snapshot.silence_seconds = inner.silence.silent_secs();
                if resumed {
                    drop(inner);
                    log::debug!("recording: speech resumed, silence warning re-armed");
                    self.emit(RecordingEvent::SpeechResumed {
                        capture: CaptureId(generation),
                    });
                } else if warn {
                    let silent_secs = inner.snapshot.silence_seconds;
                    drop(inner);
                    log::info!("recording: no speech for {silent_secs:.1}s");
                    self.emit(RecordingEvent::SilenceDetected {
                        capture: CaptureId(generation),
                        silent_secs,
                    });
                }
                true
            }
            Err(err) => {
                Self::fail_active(&mut inner, &err);
                drop(inner);
                self.emit(RecordingEvent::Failed {
                    capture: CaptureId(generation),
                    error: err,
                });
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
