//! Turn orchestrator. Drives the coach-speaks / user-answers loop.
//!
//! [`TurnOrchestrator`] is an actor.  It owns the [`RecordingSession`], the
//! [`SpeechQueue`] and the countdown timer, and reacts to three inputs in a
//! single `select!` loop:
//!
//! * [`TurnCommand`]s from any number of [`TurnHandle`]s,
//! * completions of the work it spawned (speech, recording start/stop,
//!   service calls, countdown ticks),
//! * [`RecordingEvent`]s raised by the recording session itself.
//!
//! # Turn flow
//!
//! ```text
//! Open ─▶ coach line ─▶ Speaking ─speech done─▶ CountingDown ─0─▶ Recording
//! Stop / cap reached ─▶ AwaitingResponse
//!   └─▶ stop capture ─▶ transcribe ─▶ user message ─▶ respond ─▶ coach message
//!         └─ auto-speak    ─▶ Speaking ─▶ CountingDown ─▶ …
//!         └─ no auto-speak ─▶ ManualReady
//!   └─ empty transcript / failure ─▶ ManualReady
//! Complete ─▶ (≥ 3 messages) extraction, fire-and-forget ─▶ Closed
//! Close ─▶ Closed
//! ```
//!
//! Every phase entry bumps an epoch.  Spawned work carries the epoch it was
//! started under and its completion is dropped when the epoch has moved on,
//! so a tick or reply from an abandoned phase never touches a later one.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::kind::SessionKind;
use super::message::Message;
use super::state::{lock_view, new_shared_turn_state, SharedTurnState, TurnPhase, TurnView};
use crate::config::{SessionSettings, SettingsError, SettingsProvider};
use crate::platform::{AudioCue, PlatformSurface};
use crate::recording::{
    CaptureId, CapturedAudio, MicrophoneBackend, RecordingError, RecordingEvent,
    RecordingOptions, RecordingSession, RecordingSnapshot, RecordingState,
};
use crate::services::{CoachReply, CoachServices, ResponseContext, ServiceError};
use crate::speech::{SpeechEngine, SpeechQueue};

const COMMAND_QUEUE_DEPTH: usize = 32;

const EMPTY_TRANSCRIPT_NOTICE: &str = "I didn't catch that. Press record to try again.";

// ---------------------------------------------------------------------------
// TurnError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("the coaching session is closed")]
    Closed,

    #[error("no audio was captured")]
    NoAudio,

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("recording failed: {0}")]
    Recording(#[from] RecordingError),

    #[error("coach service failed: {0}")]
    Service(#[from] ServiceError),
}

// ---------------------------------------------------------------------------
// Commands and wiring
// ---------------------------------------------------------------------------

/// User actions, sent through a [`TurnHandle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnCommand {
    /// Start the session.  `None` uses the session kind's opening line; an
    /// empty string opens without one.
    Open { prompt: Option<String> },
    Record,
    Stop,
    /// Record when idle, stop when recording.
    ToggleRecord,
    SkipCountdown,
    AbortCountdown,
    Complete,
    Close,
}

/// Platform capabilities the orchestrator is built from.
#[derive(Clone)]
pub struct TurnDeps {
    pub microphone: Arc<dyn MicrophoneBackend>,
    pub speech: Arc<dyn SpeechEngine>,
    pub services: CoachServices,
    pub platform: Arc<dyn PlatformSurface>,
}

/// Completions of work the orchestrator spawned.
enum Internal {
    SpeechDone {
        epoch: u64,
    },
    CountdownTick {
        epoch: u64,
    },
    RecordingStarted {
        epoch: u64,
        result: Result<CaptureId, RecordingError>,
    },
    AudioReady {
        epoch: u64,
        audio: Option<CapturedAudio>,
    },
    Transcribed {
        epoch: u64,
        result: Result<String, ServiceError>,
    },
    Replied {
        epoch: u64,
        result: Result<CoachReply, ServiceError>,
    },
}

/// Decrements the shared timer count when the timer task ends or is aborted.
struct TimerGuard(Arc<AtomicUsize>);

impl TimerGuard {
    fn new(count: &Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(count))
    }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// TurnHandle
// ---------------------------------------------------------------------------

/// Cheap-to-clone front door to a running [`TurnOrchestrator`].
#[derive(Clone)]
pub struct TurnHandle {
    commands: mpsc::Sender<TurnCommand>,
    view: SharedTurnState,
    recording: RecordingSession,
    speech: SpeechQueue,
    countdown_timers: Arc<AtomicUsize>,
}

impl TurnHandle {
    async fn send(&self, command: TurnCommand) -> Result<(), TurnError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| TurnError::Closed)
    }

    pub async fn open(&self, prompt: Option<String>) -> Result<(), TurnError> {
        self.send(TurnCommand::Open { prompt }).await
    }

    pub async fn record(&self) -> Result<(), TurnError> {
        self.send(TurnCommand::Record).await
    }

    pub async fn stop(&self) -> Result<(), TurnError> {
        self.send(TurnCommand::Stop).await
    }

    pub async fn toggle_record(&self) -> Result<(), TurnError> {
        self.send(TurnCommand::ToggleRecord).await
    }

    pub async fn skip(&self) -> Result<(), TurnError> {
        self.send(TurnCommand::SkipCountdown).await
    }

    pub async fn abort(&self) -> Result<(), TurnError> {
        self.send(TurnCommand::AbortCountdown).await
    }

    pub async fn complete(&self) -> Result<(), TurnError> {
        self.send(TurnCommand::Complete).await
    }

    /// Release the microphone and silence speech right away, then close the
    /// session.  Closing a closed session is fine.
    pub async fn close(&self) -> Result<(), TurnError> {
        self.recording.cancel();
        self.speech.cancel();
        let _ = self.commands.send(TurnCommand::Close).await;
        Ok(())
    }

    /// Snapshot of the conversation and current phase.
    pub fn view(&self) -> TurnView {
        lock_view(&self.view).clone()
    }

    pub fn shared_state(&self) -> SharedTurnState {
        Arc::clone(&self.view)
    }

    pub fn recording(&self) -> RecordingSnapshot {
        self.recording.snapshot()
    }

    pub fn is_speaking(&self) -> bool {
        self.speech.is_speaking()
    }

    /// Voices the speech engine can use.
    pub async fn voices(&self) -> Vec<String> {
        self.speech.load_voices().await
    }

    /// Countdown, duration and level timers still alive.
    pub fn active_timers(&self) -> usize {
        self.countdown_timers.load(Ordering::SeqCst) + self.recording.active_timers()
    }
}

// ---------------------------------------------------------------------------
// TurnOrchestrator
// ---------------------------------------------------------------------------

/// Drives one coaching session from open to close.
///
/// Create with [`TurnOrchestrator::new`] (or [`open_session`] to pull the
/// settings from a provider), then spawn [`run`](Self::run) as a tokio task.
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use voice_coach::turn::{SessionKind, TurnDeps, TurnOrchestrator};
/// # use voice_coach::config::SessionSettings;
/// # use voice_coach::recording::RecordingOptions;
/// # async fn example(deps: TurnDeps) {
/// let (orchestrator, handle) = TurnOrchestrator::new(
///     SessionKind::Planning,
///     SessionSettings::default(),
///     RecordingOptions::default(),
///     deps,
/// )
/// .expect("default settings are valid");
/// tokio::spawn(orchestrator.run());
///
/// handle.open(None).await.unwrap();
/// # }
/// ```
pub struct TurnOrchestrator {
    kind: SessionKind,
    settings: SessionSettings,
    view: SharedTurnState,
    recording: RecordingSession,
    speech: SpeechQueue,
    services: CoachServices,
    platform: Arc<dyn PlatformSurface>,

    commands: mpsc::Receiver<TurnCommand>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    recorder_rx: mpsc::UnboundedReceiver<RecordingEvent>,

    /// Bumped on every phase entry.
    epoch: u64,
    capture: Option<CaptureId>,
    countdown: Option<JoinHandle<()>>,
    countdown_timers: Arc<AtomicUsize>,
    /// Recording start/stop and service calls in flight.
    work: Vec<JoinHandle<()>>,
}

/// Read the settings once from `provider` and build the orchestrator.
pub async fn open_session(
    provider: &dyn SettingsProvider,
    kind: SessionKind,
    options: RecordingOptions,
    deps: TurnDeps,
) -> anyhow::Result<(TurnOrchestrator, TurnHandle)> {
    let settings = provider.session_settings().await?;
    Ok(TurnOrchestrator::new(kind, settings, options, deps)?)
}

impl TurnOrchestrator {
    /// Build an orchestrator for one session.
    ///
    /// `settings.max_recording_secs` overrides `options.max_duration`.
    pub fn new(
        kind: SessionKind,
        settings: SessionSettings,
        options: RecordingOptions,
        deps: TurnDeps,
    ) -> Result<(Self, TurnHandle), TurnError> {
        settings.validate()?;

        let options = RecordingOptions {
            max_duration: Duration::from_secs(u64::from(settings.max_recording_secs)),
            ..options
        };
        let (recording, recorder_rx) = RecordingSession::new(deps.microphone, options);
        let speech = SpeechQueue::new(deps.speech);
        let view = new_shared_turn_state(kind);
        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let countdown_timers = Arc::new(AtomicUsize::new(0));

        let handle = TurnHandle {
            commands: command_tx,
            view: Arc::clone(&view),
            recording: recording.clone(),
            speech: speech.clone(),
            countdown_timers: Arc::clone(&countdown_timers),
        };

        let orchestrator = Self {
            kind,
            settings,
            view,
            recording,
            speech,
            services: deps.services,
            platform: deps.platform,
            commands,
            internal_tx,
            internal_rx,
            recorder_rx,
            epoch: 0,
            capture: None,
            countdown: None,
            countdown_timers,
            work: Vec::new(),
        };
        Ok((orchestrator, handle))
    }

    // -----------------------------------------------------------------------
    // Main async loop
    // -----------------------------------------------------------------------

    /// Run until the session is closed or every [`TurnHandle`] is dropped.
    pub async fn run(mut self) {
        log::info!("turn: {} session started", self.kind);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        log::debug!("turn: every handle dropped, closing");
                        self.close();
                    }
                },
                Some(event) = self.internal_rx.recv() => self.handle_internal(event),
                Some(event) = self.recorder_rx.recv() => self.handle_recorder(event),
            }

            if self.phase() == TurnPhase::Closed {
                break;
            }
        }

        log::info!("turn: session closed, orchestrator stopped");
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    fn handle_command(&mut self, command: TurnCommand) {
        log::debug!("turn: {command:?} in {:?}", self.phase());
        match command {
            TurnCommand::Open { prompt } => self.open(prompt),
            TurnCommand::Record => self.record_manually(),
            TurnCommand::Stop => self.stop_recording(),
            TurnCommand::ToggleRecord => {
                if self.phase() == TurnPhase::Recording {
                    self.stop_recording();
                } else {
                    self.record_manually();
                }
            }
            TurnCommand::SkipCountdown => {
                if self.phase() == TurnPhase::CountingDown {
                    self.start_recording(false);
                }
            }
            TurnCommand::AbortCountdown => {
                if self.phase() == TurnPhase::CountingDown {
                    self.enter(TurnPhase::ManualReady);
                }
            }
            TurnCommand::Complete => self.complete(),
            TurnCommand::Close => self.close(),
        }
    }

    fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::SpeechDone { epoch } => {
                if self.is_current(epoch, TurnPhase::Speaking) {
                    self.begin_countdown();
                }
            }
            Internal::CountdownTick { epoch } => {
                if self.is_current(epoch, TurnPhase::CountingDown) {
                    self.countdown_tick();
                }
            }
            Internal::RecordingStarted { epoch, result } => {
                if self.is_current(epoch, TurnPhase::Recording) {
                    self.recording_started(result);
                }
            }
            Internal::AudioReady { epoch, audio } => {
                if self.is_current(epoch, TurnPhase::AwaitingResponse) {
                    self.audio_ready(audio);
                }
            }
            Internal::Transcribed { epoch, result } => {
                if self.is_current(epoch, TurnPhase::AwaitingResponse) {
                    self.transcribed(result);
                }
            }
            Internal::Replied { epoch, result } => {
                if self.is_current(epoch, TurnPhase::AwaitingResponse) {
                    self.replied(result);
                }
            }
        }
    }

    fn handle_recorder(&mut self, event: RecordingEvent) {
        let recording_now = self.phase() == TurnPhase::Recording;
        match event {
            RecordingEvent::SilenceDetected {
                capture,
                silent_secs,
            } => {
                if recording_now && self.capture == Some(capture) {
                    log::info!("turn: user quiet for {silent_secs:.1}s, still recording");
                    lock_view(&self.view).silence_warning = true;
                    self.cue(AudioCue::SilenceWarning);
                }
            }
            RecordingEvent::SpeechResumed { capture } => {
                if recording_now && self.capture == Some(capture) {
                    lock_view(&self.view).silence_warning = false;
                }
            }
            RecordingEvent::LimitReached { capture, audio } => {
                if self.owes(capture) {
                    log::info!("turn: recording cap reached");
                    self.capture = None;
                    if recording_now {
                        self.enter(TurnPhase::AwaitingResponse);
                        self.cue(AudioCue::RecordingStopped);
                    }
                    self.transcribe(audio);
                }
            }
            RecordingEvent::Failed { capture, error } => {
                if self.owes(capture) {
                    self.capture = None;
                    self.rest_with_error(TurnError::Recording(error).to_string());
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    fn open(&mut self, prompt: Option<String>) {
        if self.phase() != TurnPhase::AwaitingOpen {
            log::warn!("turn: session already open");
            return;
        }
        let prompt = prompt.unwrap_or_else(|| self.kind.opening_prompt().to_string());
        let prompt = prompt.trim();
        if prompt.is_empty() {
            self.begin_countdown();
            return;
        }

        // the opening line does not count towards the question streak
        lock_view(&self.view)
            .messages
            .push(Message::coach(prompt.to_string()));

        if self.settings.auto_speak && self.speech.is_supported() {
            self.speak(prompt.to_string());
        } else {
            self.begin_countdown();
        }
    }

    fn speak(&mut self, text: String) {
        self.enter(TurnPhase::Speaking);
        let epoch = self.epoch;
        let tx = self.internal_tx.clone();
        self.speech.speak(
            text,
            Some(Box::new(move || {
                let _ = tx.send(Internal::SpeechDone { epoch });
            })),
        );
    }

    fn begin_countdown(&mut self) {
        let delay = self.settings.auto_record_delay_secs;
        if delay == 0 {
            self.start_recording(true);
            return;
        }

        self.enter(TurnPhase::CountingDown);
        lock_view(&self.view).countdown_remaining = Some(delay);
        self.cue(AudioCue::CountdownTick);

        let epoch = self.epoch;
        let tx = self.internal_tx.clone();
        let guard = TimerGuard::new(&self.countdown_timers);
        self.countdown = Some(tokio::spawn(async move {
            let _guard = guard;
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if tx.send(Internal::CountdownTick { epoch }).is_err() {
                    return;
                }
            }
        }));
    }

    fn countdown_tick(&mut self) {
        let remaining = {
            let mut view = lock_view(&self.view);
            let remaining = view.countdown_remaining.unwrap_or(1).saturating_sub(1);
            view.countdown_remaining = Some(remaining);
            remaining
        };

        if remaining == 0 {
            self.start_recording(true);
        } else {
            self.cue(AudioCue::CountdownTick);
        }
    }

    fn record_manually(&mut self) {
        let phase = self.phase();
        if !phase.accepts_record() {
            log::debug!("turn: record ignored in {phase:?}");
            return;
        }
        self.start_recording(false);
    }

    /// Cancel countdown and speech, then open the microphone.
    fn start_recording(&mut self, auto: bool) {
        self.speech.cancel();
        self.enter(TurnPhase::Recording);
        self.capture = None;
        {
            let mut view = lock_view(&self.view);
            view.is_auto_turn = auto;
            view.silence_warning = false;
            view.last_error = None;
            view.notice = None;
        }

        let epoch = self.epoch;
        let tx = self.internal_tx.clone();
        let recording = self.recording.clone();
        let silence = Duration::from_secs(u64::from(self.settings.silence_timeout_secs));
        self.spawn_work(async move {
            let result = recording.start(Some(silence)).await;
            let _ = tx.send(Internal::RecordingStarted { epoch, result });
        });
    }

    fn recording_started(&mut self, result: Result<CaptureId, RecordingError>) {
        match result {
            Ok(capture) => {
                log::info!(
                    "turn: listening ({})",
                    if lock_view(&self.view).is_auto_turn {
                        "auto"
                    } else {
                        "manual"
                    }
                );
                self.capture = Some(capture);
                self.cue(AudioCue::RecordingStarted);
            }
            // never retried: another attempt would prompt for permission again
            Err(err) => self.rest_with_error(TurnError::Recording(err).to_string()),
        }
    }

    fn stop_recording(&mut self) {
        if self.phase() != TurnPhase::Recording {
            return;
        }
        if self.capture.is_none() {
            // still acquiring the device
            self.recording.cancel();
            self.enter(TurnPhase::ManualReady);
            return;
        }

        self.enter(TurnPhase::AwaitingResponse);
        self.cue(AudioCue::RecordingStopped);

        let epoch = self.epoch;
        let tx = self.internal_tx.clone();
        let recording = self.recording.clone();
        self.spawn_work(async move {
            let audio = recording.stop().await;
            let _ = tx.send(Internal::AudioReady { epoch, audio });
        });
    }

    /// Result of our own `stop`.  `None` while the capture is still owed
    /// means the duration cap stopped it first and its event will follow.
    fn audio_ready(&mut self, audio: Option<CapturedAudio>) {
        if self.capture.is_none() {
            // already delivered by the cap
            return;
        }
        if let Some(audio) = audio {
            self.capture = None;
            self.transcribe(audio);
            return;
        }

        let snapshot = self.recording.snapshot();
        let cap_pending = match snapshot.state {
            RecordingState::Processing => true,
            RecordingState::Idle => snapshot.error.is_none(),
            _ => false,
        };
        if cap_pending {
            log::debug!("turn: capture already stopping at the cap, waiting for its audio");
            return;
        }

        self.capture = None;
        let reason = snapshot
            .error
            .unwrap_or_else(|| TurnError::NoAudio.to_string());
        self.rest_with_error(reason);
    }

    fn transcribe(&mut self, audio: CapturedAudio) {
        let epoch = self.epoch;
        let tx = self.internal_tx.clone();
        let transcriber = Arc::clone(&self.services.transcriber);
        let kind = self.kind;
        self.spawn_work(async move {
            let result = transcriber.transcribe(&audio, kind).await;
            let _ = tx.send(Internal::Transcribed { epoch, result });
        });
    }

    fn transcribed(&mut self, result: Result<String, ServiceError>) {
        let text = match result {
            Ok(text) => text.trim().to_string(),
            Err(err) => {
                self.fail_turn(err);
                return;
            }
        };

        if text.is_empty() {
            log::info!("turn: empty transcript");
            lock_view(&self.view).notice = Some(EMPTY_TRANSCRIPT_NOTICE.to_string());
            self.enter(TurnPhase::ManualReady);
            return;
        }

        let (history, context) = {
            let mut view = lock_view(&self.view);
            let history = view.history();
            view.messages.push(Message::user(text.clone()));
            let context = ResponseContext {
                question_streak: view.question_streak,
            };
            (history, context)
        };

        let epoch = self.epoch;
        let tx = self.internal_tx.clone();
        let responder = Arc::clone(&self.services.responder);
        let kind = self.kind;
        self.spawn_work(async move {
            let result = responder.respond(kind, &text, &history, &context).await;
            let _ = tx.send(Internal::Replied { epoch, result });
        });
    }

    fn replied(&mut self, result: Result<CoachReply, ServiceError>) {
        let reply = match result {
            Ok(reply) => reply,
            Err(err) => {
                self.fail_turn(err);
                return;
            }
        };

        let message = Message::coach(reply.text.clone());
        {
            let mut view = lock_view(&self.view);
            view.question_streak = if message.is_question {
                view.question_streak + 1
            } else {
                0
            };
            view.references = reply.references;
            view.messages.push(message);
        }
        self.platform.notify("Coach", &reply.text);

        if !self.settings.auto_speak {
            self.enter(TurnPhase::ManualReady);
        } else if self.speech.is_supported() {
            self.speak(reply.text);
        } else {
            self.begin_countdown();
        }
    }

    /// A service call failed: report it inline and wait for the user.
    fn fail_turn(&mut self, err: ServiceError) {
        let err = TurnError::Service(err);
        log::warn!("turn: {err}");
        lock_view(&self.view)
            .messages
            .push(Message::error(format!("Sorry, something went wrong: {err}")));
        self.rest_with_error(err.to_string());
    }

    fn rest_with_error(&mut self, reason: String) {
        log::warn!("turn: {reason}");
        lock_view(&self.view).last_error = Some(reason);
        self.enter(TurnPhase::ManualReady);
    }

    fn complete(&mut self) {
        if self.phase() == TurnPhase::Closed {
            return;
        }
        let (session_id, history) = {
            let view = lock_view(&self.view);
            (view.session_id, view.history())
        };

        if history.len() >= 3 {
            let extractor = Arc::clone(&self.services.extractor);
            let kind = self.kind;
            // detached: close never waits on extraction
            tokio::spawn(async move {
                match extractor.extract(session_id, &history, kind).await {
                    Ok(_) => log::info!("turn: session {session_id} handed to extraction"),
                    Err(err) => log::warn!("turn: knowledge extraction failed: {err}"),
                }
            });
        } else {
            log::debug!("turn: {} messages, skipping extraction", history.len());
        }

        self.close();
    }

    fn close(&mut self) {
        self.epoch += 1;
        self.stop_countdown();
        self.speech.cancel();
        self.recording.cancel();
        self.capture = None;
        for task in self.work.drain(..) {
            task.abort();
        }

        let mut view = lock_view(&self.view);
        if view.phase != TurnPhase::Closed {
            log::debug!("turn: {:?} → Closed", view.phase);
        }
        view.phase = TurnPhase::Closed;
        view.messages.clear();
        view.countdown_remaining = None;
        view.silence_warning = false;
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn phase(&self) -> TurnPhase {
        lock_view(&self.view).phase
    }

    /// The capture stays owed until its audio or failure arrives, even after
    /// a manual stop moved the turn on.
    fn owes(&self, capture: CaptureId) -> bool {
        self.capture == Some(capture)
            && matches!(
                self.phase(),
                TurnPhase::Recording | TurnPhase::AwaitingResponse
            )
    }

    fn is_current(&self, epoch: u64, phase: TurnPhase) -> bool {
        epoch == self.epoch && self.phase() == phase
    }

    /// Switch phase, invalidating everything started under the old one.
    fn enter(&mut self, phase: TurnPhase) {
        self.epoch += 1;
        self.stop_countdown();

        let mut view = lock_view(&self.view);
        log::debug!("turn: {:?} → {phase:?}", view.phase);
        view.phase = phase;
        view.countdown_remaining = None;
    }

    fn stop_countdown(&mut self) {
        if let Some(timer) = self.countdown.take() {
            timer.abort();
        }
    }

    fn spawn_work<F>(&mut self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.work.retain(|task| !task.is_finished());
        self.work.push(tokio::spawn(work));
    }

    fn cue(&self, cue: AudioCue) {
        if self.settings.audio_cues_enabled {
            self.platform.play_cue(cue);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticSettings;
    use crate::platform::RecordingSurface;
    use crate::recording::MockMicrophone;
    use crate::services::MockServices;
    use crate::speech::MockSpeechEngine;
    use crate::turn::Role;
    use tokio::time::sleep;

    const PROMPT: &str = "What matters most today?";

    struct Harness {
        handle: TurnHandle,
        mic: MockMicrophone,
        engine: MockSpeechEngine,
        services: Arc<MockServices>,
        surface: Arc<RecordingSurface>,
    }

    impl Harness {
        fn phase(&self) -> TurnPhase {
            self.handle.view().phase
        }

        /// Poll the view on the paused clock until `done` holds.
        async fn wait_for(&self, what: &str, done: impl Fn(&TurnView) -> bool) {
            // sleeping first lets every ready task settle before checking
            for _ in 0..1_000 {
                sleep(Duration::from_millis(10)).await;
                if done(&self.handle.view()) {
                    return;
                }
            }
            panic!("timed out waiting for {what}: {:?}", self.handle.view());
        }

        async fn wait_for_phase(&self, phase: TurnPhase) {
            self.wait_for(&format!("{phase:?}"), |v| v.phase == phase)
                .await;
        }

        async fn assert_fully_released(&self) {
            sleep(Duration::from_millis(20)).await;
            let view = self.handle.view();
            assert_eq!(view.phase, TurnPhase::Closed);
            assert!(view.messages.is_empty());
            assert_eq!(self.handle.active_timers(), 0, "timers leaked");
            assert_eq!(self.mic.open_streams(), 0, "microphone leaked");
            assert_eq!(self.engine.active_utterances(), 0, "speech leaked");
            assert!(!self.handle.is_speaking());
        }
    }

    fn settings(delay: u32, auto_speak: bool) -> SessionSettings {
        SessionSettings {
            auto_record_delay_secs: delay,
            silence_timeout_secs: 5,
            audio_cues_enabled: true,
            auto_speak,
            max_recording_secs: 120,
        }
    }

    fn harness(
        settings: SessionSettings,
        mic: MockMicrophone,
        engine: MockSpeechEngine,
        services: Arc<MockServices>,
    ) -> Harness {
        let surface = Arc::new(RecordingSurface::default());
        let deps = TurnDeps {
            microphone: Arc::new(mic.clone()),
            speech: Arc::new(engine.clone()),
            services: CoachServices::from_client(Arc::clone(&services)),
            platform: surface.clone(),
        };
        let (orchestrator, handle) = TurnOrchestrator::new(
            SessionKind::Planning,
            settings,
            RecordingOptions::default(),
            deps,
        )
        .expect("valid settings");
        tokio::spawn(orchestrator.run());

        Harness {
            handle,
            mic,
            engine,
            services,
            surface,
        }
    }

    /// Silent coach, mic opens straight after the countdown.
    fn quiet_harness(delay: u32) -> Harness {
        harness(
            settings(delay, true),
            MockMicrophone::new(),
            MockSpeechEngine::unsupported(),
            MockServices::new(),
        )
    }

    // ---- full turn -------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn opening_line_countdown_recording_and_reply() {
        let services = MockServices::new();
        services.push_transcript(Ok("Finish the report"));
        services.push_reply(Ok("Great, what's the first step?"));
        let h = harness(
            settings(2, true),
            MockMicrophone::new(),
            MockSpeechEngine::new(Duration::from_secs(1)),
            services,
        );

        h.handle.open(Some(PROMPT.into())).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        let view = h.handle.view();
        assert_eq!(view.phase, TurnPhase::Speaking);
        assert_eq!(view.messages.len(), 1);
        assert_eq!(view.messages[0].role, Role::Coach);
        assert_eq!(view.messages[0].content, PROMPT);

        sleep(Duration::from_secs(1)).await;
        let view = h.handle.view();
        assert_eq!(view.phase, TurnPhase::CountingDown);
        assert_eq!(view.countdown_remaining, Some(2));

        sleep(Duration::from_secs(1)).await;
        assert_eq!(h.handle.view().countdown_remaining, Some(1));

        sleep(Duration::from_secs(1)).await;
        let view = h.handle.view();
        assert_eq!(view.phase, TurnPhase::Recording);
        assert!(view.is_auto_turn);
        assert_eq!(view.countdown_remaining, None);
        assert_eq!(h.handle.recording().state, RecordingState::Recording);

        h.handle.stop().await.unwrap();
        h.wait_for("coach reply", |v| v.messages.len() == 3).await;

        let view = h.handle.view();
        assert_eq!(view.messages[1].role, Role::User);
        assert_eq!(view.messages[1].content, "Finish the report");
        assert_eq!(view.messages[2].role, Role::Coach);
        assert_eq!(view.messages[2].content, "Great, what's the first step?");
        assert!(view.messages[2].is_question);
        assert_eq!(view.question_streak, 1);
        assert_eq!(view.phase, TurnPhase::Speaking);

        assert_eq!(
            h.engine.spoken(),
            [PROMPT, "Great, what's the first step?"]
        );
        assert_eq!(h.mic.total_opens(), 1);
        assert_eq!(h.mic.open_streams(), 0);
        assert_eq!(h.surface.notifications().len(), 1);

        // the reply's end loops back into the countdown
        sleep(Duration::from_millis(1_100)).await;
        assert_eq!(h.phase(), TurnPhase::CountingDown);
    }

    #[tokio::test(start_paused = true)]
    async fn responder_sees_history_before_the_new_line() {
        let h = quiet_harness(0);
        h.services.push_transcript(Ok("Finish the report"));

        h.handle.open(Some(PROMPT.into())).await.unwrap();
        h.wait_for_phase(TurnPhase::Recording).await;
        h.handle.stop().await.unwrap();
        h.wait_for("reply", |v| v.messages.len() == 3).await;

        let calls = h.services.respond_calls();
        assert_eq!(calls.len(), 1);
        let (user_text, history, context) = &calls[0];
        assert_eq!(user_text, "Finish the report");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, PROMPT);
        assert_eq!(context.question_streak, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn statement_reply_resets_question_streak() {
        let h = harness(
            settings(0, false),
            MockMicrophone::new(),
            MockSpeechEngine::unsupported(),
            MockServices::new(),
        );
        h.services.push_reply(Ok("What would help?"));
        h.services.push_reply(Ok("Why that one?"));
        h.services.push_reply(Ok("That sounds like a plan."));

        h.handle.open(Some(PROMPT.into())).await.unwrap();
        for expected in [1, 2, 0] {
            h.wait_for_phase(TurnPhase::Recording).await;
            h.handle.stop().await.unwrap();
            h.wait_for_phase(TurnPhase::ManualReady).await;
            assert_eq!(h.handle.view().question_streak, expected);
            h.handle.record().await.unwrap();
        }

        let calls = h.services.respond_calls();
        assert_eq!(calls[2].2.question_streak, 2);
    }

    // ---- countdown -------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn skip_starts_recording_without_waiting() {
        let h = quiet_harness(5);
        h.handle.open(None).await.unwrap();
        sleep(Duration::from_millis(1_500)).await;
        assert_eq!(h.handle.view().countdown_remaining, Some(4));

        h.handle.skip().await.unwrap();
        sleep(Duration::from_millis(10)).await;
        let view = h.handle.view();
        assert_eq!(view.phase, TurnPhase::Recording);
        assert!(!view.is_auto_turn);
        assert_eq!(view.countdown_remaining, None);

        sleep(Duration::from_secs(6)).await;
        assert_eq!(h.phase(), TurnPhase::Recording);
        assert_eq!(h.mic.total_opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_record_at_one_second_left_cancels_countdown() {
        let h = quiet_harness(2);
        h.handle.open(None).await.unwrap();
        sleep(Duration::from_millis(1_050)).await;
        assert_eq!(h.handle.view().countdown_remaining, Some(1));

        h.handle.record().await.unwrap();
        sleep(Duration::from_millis(10)).await;
        let view = h.handle.view();
        assert_eq!(view.phase, TurnPhase::Recording);
        assert!(!view.is_auto_turn);

        sleep(Duration::from_secs(3)).await;
        assert_eq!(h.mic.total_opens(), 1);
        assert_eq!(h.surface.count(AudioCue::RecordingStarted), 1);
        assert_eq!(h.handle.active_timers(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_rests_without_recording() {
        let h = quiet_harness(3);
        h.handle.open(None).await.unwrap();
        sleep(Duration::from_millis(500)).await;

        h.handle.abort().await.unwrap();
        sleep(Duration::from_secs(5)).await;
        assert_eq!(h.phase(), TurnPhase::ManualReady);
        assert_eq!(h.mic.total_opens(), 0);
        assert_eq!(h.handle.active_timers(), 0);

        h.handle.record().await.unwrap();
        h.wait_for_phase(TurnPhase::Recording).await;
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_ticks_play_cues() {
        let h = quiet_harness(3);
        h.handle.open(None).await.unwrap();
        sleep(Duration::from_millis(3_100)).await;
        assert_eq!(h.phase(), TurnPhase::Recording);
        assert_eq!(h.surface.count(AudioCue::CountdownTick), 3);
        assert_eq!(h.surface.count(AudioCue::RecordingStarted), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cues_respect_the_setting() {
        let h = harness(
            SessionSettings {
                audio_cues_enabled: false,
                ..settings(2, true)
            },
            MockMicrophone::new(),
            MockSpeechEngine::unsupported(),
            MockServices::new(),
        );
        h.handle.open(None).await.unwrap();
        sleep(Duration::from_secs(3)).await;
        assert!(h.surface.cues().is_empty());
    }

    // ---- speech settings -------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn without_auto_speak_replies_rest_in_manual_ready() {
        let h = harness(
            settings(1, false),
            MockMicrophone::new(),
            MockSpeechEngine::new(Duration::from_secs(1)),
            MockServices::new(),
        );
        h.handle.open(Some(PROMPT.into())).await.unwrap();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(h.phase(), TurnPhase::CountingDown);

        h.wait_for_phase(TurnPhase::Recording).await;
        h.handle.stop().await.unwrap();
        h.wait_for_phase(TurnPhase::ManualReady).await;

        sleep(Duration::from_secs(5)).await;
        assert_eq!(h.phase(), TurnPhase::ManualReady);
        assert!(h.engine.spoken().is_empty());
        assert_eq!(h.handle.view().messages.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_speech_skips_straight_to_countdown() {
        let h = quiet_harness(2);
        h.handle.open(Some(PROMPT.into())).await.unwrap();
        sleep(Duration::from_millis(10)).await;
        let view = h.handle.view();
        assert_eq!(view.phase, TurnPhase::CountingDown);
        assert_eq!(view.messages.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_prompt_opens_without_a_coach_line() {
        let h = quiet_harness(2);
        h.handle.open(Some("  ".into())).await.unwrap();
        sleep(Duration::from_millis(10)).await;
        let view = h.handle.view();
        assert_eq!(view.phase, TurnPhase::CountingDown);
        assert!(view.messages.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn default_prompt_comes_from_the_session_kind() {
        let h = quiet_harness(2);
        h.handle.open(None).await.unwrap();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(
            h.handle.view().messages[0].content,
            SessionKind::Planning.opening_prompt()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn second_open_is_ignored() {
        let h = quiet_harness(2);
        h.handle.open(None).await.unwrap();
        h.handle.open(Some("Again?".into())).await.unwrap();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(h.handle.view().messages.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn record_during_speech_silences_the_coach() {
        let h = harness(
            settings(3, true),
            MockMicrophone::new(),
            MockSpeechEngine::new(Duration::from_secs(5)),
            MockServices::new(),
        );
        h.handle.open(Some(PROMPT.into())).await.unwrap();
        sleep(Duration::from_millis(500)).await;
        assert_eq!(h.engine.active_utterances(), 1);

        h.handle.record().await.unwrap();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(h.phase(), TurnPhase::Recording);
        assert_eq!(h.engine.active_utterances(), 0);

        // the interrupted utterance never restarts the countdown
        sleep(Duration::from_secs(6)).await;
        assert_eq!(h.phase(), TurnPhase::Recording);
    }

    // ---- recording edge cases -------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn silence_warning_is_advisory() {
        let mic = MockMicrophone::new();
        mic.set_level(0.0);
        let h = harness(
            SessionSettings {
                silence_timeout_secs: 2,
                ..settings(0, true)
            },
            mic,
            MockSpeechEngine::unsupported(),
            MockServices::new(),
        );
        h.handle.open(None).await.unwrap();
        sleep(Duration::from_millis(2_200)).await;

        let view = h.handle.view();
        assert_eq!(view.phase, TurnPhase::Recording);
        assert!(view.silence_warning);
        assert_eq!(h.surface.count(AudioCue::SilenceWarning), 1);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(h.phase(), TurnPhase::Recording);
        assert_eq!(h.surface.count(AudioCue::SilenceWarning), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn speaking_again_clears_the_silence_warning() {
        let mic = MockMicrophone::new();
        mic.set_level(0.0);
        let h = harness(
            SessionSettings {
                silence_timeout_secs: 2,
                ..settings(0, true)
            },
            mic,
            MockSpeechEngine::unsupported(),
            MockServices::new(),
        );
        h.handle.open(None).await.unwrap();
        sleep(Duration::from_millis(2_200)).await;
        assert!(h.handle.view().silence_warning);

        h.mic.set_level(0.2);
        h.wait_for("warning cleared", |v| !v.silence_warning).await;
        assert_eq!(h.phase(), TurnPhase::Recording);

        // quiet again: the warning is raised a second time
        h.mic.set_level(0.0);
        h.wait_for("second warning", |v| v.silence_warning).await;
        assert_eq!(h.surface.count(AudioCue::SilenceWarning), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn recording_cap_runs_the_normal_stop_path() {
        let h = harness(
            SessionSettings {
                max_recording_secs: 2,
                ..settings(0, false)
            },
            MockMicrophone::new(),
            MockSpeechEngine::unsupported(),
            MockServices::new(),
        );
        h.services.push_transcript(Ok("Long answer"));
        h.handle.open(None).await.unwrap();

        h.wait_for_phase(TurnPhase::ManualReady).await;
        let view = h.handle.view();
        assert_eq!(view.messages[1].content, "Long answer");
        assert_eq!(view.messages.len(), 3);
        assert!(view.last_error.is_none());
        assert_eq!(h.mic.open_streams(), 0);
        assert_eq!(h.surface.count(AudioCue::RecordingStopped), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_stop_during_cap_encode_still_transcribes_the_answer() {
        let h = harness(
            SessionSettings {
                max_recording_secs: 2,
                ..settings(0, false)
            },
            MockMicrophone::new(),
            MockSpeechEngine::unsupported(),
            MockServices::new(),
        );
        h.services.push_transcript(Ok("Long answer"));
        let release = h.mic.hold_finish();
        h.handle.open(None).await.unwrap();
        h.wait_for_phase(TurnPhase::Recording).await;

        // the cap fires and its encode is held open; no sleeping from here
        // on, a pending blocking task stops the paused clock from advancing
        sleep(Duration::from_millis(1_950)).await;
        tokio::time::advance(Duration::from_millis(100)).await;
        for _ in 0..1_000 {
            if h.handle.recording().state == RecordingState::Processing {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(h.handle.recording().state, RecordingState::Processing);
        assert_eq!(h.phase(), TurnPhase::Recording);

        h.handle.stop().await.unwrap();
        for _ in 0..1_000 {
            if h.phase() == TurnPhase::AwaitingResponse {
                break;
            }
            tokio::task::yield_now().await;
        }
        for _ in 0..100 {
            tokio::task::yield_now().await;
        }
        let view = h.handle.view();
        assert_eq!(view.phase, TurnPhase::AwaitingResponse);
        assert!(view.last_error.is_none());

        release.send(()).unwrap();
        h.wait_for_phase(TurnPhase::ManualReady).await;
        let view = h.handle.view();
        assert_eq!(h.services.transcribe_count(), 1);
        assert_eq!(view.messages[1].content, "Long answer");
        assert!(view.last_error.is_none());
        assert_eq!(h.mic.open_streams(), 0);
        assert_eq!(h.surface.count(AudioCue::RecordingStopped), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn permission_denied_rests_without_retrying() {
        let h = harness(
            settings(0, true),
            MockMicrophone::denied(),
            MockSpeechEngine::unsupported(),
            MockServices::new(),
        );
        h.handle.open(None).await.unwrap();
        h.wait_for_phase(TurnPhase::ManualReady).await;

        let view = h.handle.view();
        assert!(view.last_error.unwrap().contains("permission denied"));
        assert_eq!(h.handle.recording().state, RecordingState::Error);

        sleep(Duration::from_secs(10)).await;
        assert_eq!(h.phase(), TurnPhase::ManualReady);
        assert_eq!(h.mic.total_opens(), 0);
        assert_eq!(h.surface.count(AudioCue::RecordingStarted), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn device_loss_mid_recording_rests_with_error() {
        let h = quiet_harness(0);
        h.handle.open(None).await.unwrap();
        h.wait_for_phase(TurnPhase::Recording).await;
        sleep(Duration::from_millis(50)).await;

        h.mic
            .fail_device(RecordingError::DeviceUnavailable("unplugged".into()));
        h.wait_for_phase(TurnPhase::ManualReady).await;
        assert!(h.handle.view().last_error.unwrap().contains("unplugged"));
        assert_eq!(h.mic.open_streams(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_records_then_stops() {
        let h = harness(
            settings(5, false),
            MockMicrophone::new(),
            MockSpeechEngine::unsupported(),
            MockServices::new(),
        );
        h.handle.open(None).await.unwrap();
        h.handle.toggle_record().await.unwrap();
        h.wait_for_phase(TurnPhase::Recording).await;
        sleep(Duration::from_millis(50)).await;

        h.handle.toggle_record().await.unwrap();
        h.wait_for_phase(TurnPhase::ManualReady).await;
        assert_eq!(h.services.transcribe_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_outside_recording_is_ignored() {
        let h = quiet_harness(3);
        h.handle.open(None).await.unwrap();
        h.handle.stop().await.unwrap();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(h.phase(), TurnPhase::CountingDown);
    }

    // ---- service failures ------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn empty_transcript_posts_a_notice() {
        let h = quiet_harness(0);
        h.services.push_transcript(Ok("   "));
        h.handle.open(None).await.unwrap();
        h.wait_for_phase(TurnPhase::Recording).await;
        h.handle.stop().await.unwrap();
        h.wait_for_phase(TurnPhase::ManualReady).await;

        let view = h.handle.view();
        assert_eq!(view.notice.as_deref(), Some(EMPTY_TRANSCRIPT_NOTICE));
        assert_eq!(view.messages.len(), 1);
        assert!(h.services.respond_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn response_failure_is_reported_inline_and_kept_out_of_history() {
        let h = quiet_harness(0);
        h.services.push_transcript(Ok("Finish the report"));
        h.services.push_reply(Err(ServiceError::Timeout));
        h.handle.open(Some(PROMPT.into())).await.unwrap();
        h.wait_for_phase(TurnPhase::Recording).await;
        h.handle.stop().await.unwrap();
        h.wait_for_phase(TurnPhase::ManualReady).await;

        let view = h.handle.view();
        assert_eq!(view.messages.len(), 3);
        assert!(view.messages[2].is_error);
        assert!(view.last_error.unwrap().contains("timed out"));

        // the user retries manually
        h.handle.record().await.unwrap();
        h.wait_for_phase(TurnPhase::Recording).await;
        h.handle.stop().await.unwrap();
        h.wait_for("second reply", |v| v.messages.len() == 5).await;

        let calls = h.services.respond_calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].1.iter().all(|m| !m.is_error));
        assert_eq!(calls[1].1.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transcription_failure_rests_in_manual_ready() {
        let h = quiet_harness(0);
        h.services
            .push_transcript(Err(ServiceError::Request("connection refused".into())));
        h.handle.open(None).await.unwrap();
        h.wait_for_phase(TurnPhase::Recording).await;
        h.handle.stop().await.unwrap();
        h.wait_for_phase(TurnPhase::ManualReady).await;

        let view = h.handle.view();
        assert!(view.messages.last().unwrap().is_error);
        assert!(h.services.respond_calls().is_empty());
    }

    // ---- complete / close ------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn complete_hands_a_long_enough_log_to_extraction() {
        let h = quiet_harness(0);
        h.handle.open(Some(PROMPT.into())).await.unwrap();
        h.wait_for_phase(TurnPhase::Recording).await;
        h.handle.stop().await.unwrap();
        h.wait_for("reply", |v| v.messages.len() == 3).await;
        let session_id = h.handle.view().session_id;

        h.handle.complete().await.unwrap();
        h.wait_for_phase(TurnPhase::Closed).await;
        sleep(Duration::from_millis(10)).await;

        let calls = h.services.extract_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, session_id);
        assert_eq!(calls[0].1.len(), 3);
        h.assert_fully_released().await;
    }

    #[tokio::test(start_paused = true)]
    async fn complete_with_short_log_skips_extraction() {
        let h = quiet_harness(3);
        h.handle.open(None).await.unwrap();
        h.handle.complete().await.unwrap();
        h.wait_for_phase(TurnPhase::Closed).await;
        sleep(Duration::from_millis(10)).await;
        assert!(h.services.extract_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn extraction_failure_does_not_block_close() {
        let services = MockServices::with_latency(Duration::from_secs(2));
        services.fail_extraction(ServiceError::Timeout);
        let h = harness(
            settings(0, false),
            MockMicrophone::new(),
            MockSpeechEngine::unsupported(),
            services,
        );
        h.handle.open(None).await.unwrap();
        h.wait_for_phase(TurnPhase::Recording).await;
        h.handle.stop().await.unwrap();
        h.wait_for_phase(TurnPhase::ManualReady).await;

        h.handle.complete().await.unwrap();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(h.phase(), TurnPhase::Closed);

        sleep(Duration::from_secs(3)).await;
        assert_eq!(h.services.extract_calls().len(), 1);
        h.assert_fully_released().await;
    }

    #[tokio::test(start_paused = true)]
    async fn close_from_every_reachable_phase_releases_everything() {
        for target in [
            TurnPhase::AwaitingOpen,
            TurnPhase::Speaking,
            TurnPhase::CountingDown,
            TurnPhase::Recording,
            TurnPhase::AwaitingResponse,
            TurnPhase::ManualReady,
        ] {
            let h = harness(
                settings(if target == TurnPhase::Recording { 0 } else { 3 }, true),
                MockMicrophone::new(),
                MockSpeechEngine::new(Duration::from_secs(5)),
                MockServices::with_latency(Duration::from_secs(5)),
            );

            match target {
                TurnPhase::AwaitingOpen => {}
                TurnPhase::Speaking | TurnPhase::Recording => {
                    h.handle.open(None).await.unwrap();
                    if target == TurnPhase::Recording {
                        h.handle.record().await.unwrap();
                    }
                }
                TurnPhase::CountingDown | TurnPhase::ManualReady => {
                    h.handle.open(Some(String::new())).await.unwrap();
                    if target == TurnPhase::ManualReady {
                        h.handle.abort().await.unwrap();
                    }
                }
                TurnPhase::AwaitingResponse => {
                    h.handle.open(Some(String::new())).await.unwrap();
                    h.handle.skip().await.unwrap();
                    h.wait_for_phase(TurnPhase::Recording).await;
                    sleep(Duration::from_millis(50)).await;
                    h.handle.stop().await.unwrap();
                }
                _ => unreachable!(),
            }
            h.wait_for_phase(target).await;
            sleep(Duration::from_millis(50)).await;
            assert_eq!(h.phase(), target);

            h.handle.close().await.unwrap();
            h.assert_fully_released().await;

            // late completions from the old phase change nothing
            sleep(Duration::from_secs(10)).await;
            h.assert_fully_released().await;

            h.handle.close().await.unwrap();
            assert!(matches!(h.handle.record().await, Err(TurnError::Closed)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_every_handle_closes_the_session() {
        let mic = MockMicrophone::new();
        let engine = MockSpeechEngine::unsupported();
        let services = MockServices::new();
        let surface = Arc::new(RecordingSurface::default());
        let (orchestrator, handle) = TurnOrchestrator::new(
            SessionKind::Coaching,
            settings(0, true),
            RecordingOptions::default(),
            TurnDeps {
                microphone: Arc::new(mic.clone()),
                speech: Arc::new(engine),
                services: CoachServices::from_client(services),
                platform: surface,
            },
        )
        .unwrap();
        let task = tokio::spawn(orchestrator.run());

        handle.open(None).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(mic.open_streams(), 1);

        let state = handle.shared_state();
        drop(handle);
        task.await.unwrap();
        assert_eq!(lock_view(&state).phase, TurnPhase::Closed);
        assert_eq!(mic.open_streams(), 0);
    }

    // ---- construction ----------------------------------------------------

    #[tokio::test]
    async fn invalid_settings_are_refused() {
        let deps = TurnDeps {
            microphone: Arc::new(MockMicrophone::new()),
            speech: Arc::new(MockSpeechEngine::unsupported()),
            services: CoachServices::from_client(MockServices::new()),
            platform: Arc::new(RecordingSurface::default()),
        };
        let result = TurnOrchestrator::new(
            SessionKind::Planning,
            SessionSettings {
                silence_timeout_secs: 0,
                ..SessionSettings::default()
            },
            RecordingOptions::default(),
            deps,
        );
        assert!(matches!(
            result,
            Err(TurnError::Settings(SettingsError::ZeroSilenceTimeout))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn open_session_reads_settings_from_the_provider() {
        let mic = MockMicrophone::new();
        let provider = StaticSettings(settings(4, true));
        let deps = TurnDeps {
            microphone: Arc::new(mic),
            speech: Arc::new(MockSpeechEngine::unsupported()),
            services: CoachServices::from_client(MockServices::new()),
            platform: Arc::new(RecordingSurface::default()),
        };
        let (orchestrator, handle) = open_session(
            &provider,
            SessionKind::Reflection,
            RecordingOptions::default(),
            deps,
        )
        .await
        .unwrap();
        tokio::spawn(orchestrator.run());

        handle.open(None).await.unwrap();
        sleep(Duration::from_millis(10)).await;
        let view = handle.view();
        assert_eq!(view.kind, SessionKind::Reflection);
        assert_eq!(view.countdown_remaining, Some(4));
    }
}
