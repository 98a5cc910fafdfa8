//! Turn-taking phases and the shared view the UI reads.
//!
//! [`TurnPhase`] drives the orchestrator's state machine.  The front end
//! reads [`TurnView`] through [`SharedTurnState`] to render the conversation
//! and the current phase.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use super::kind::SessionKind;
use super::message::Message;
use crate::services::Reference;

// ---------------------------------------------------------------------------
// TurnPhase
// ---------------------------------------------------------------------------

/// Phases of a coaching session.
///
/// ```text
/// AwaitingOpen ──open──▶ Speaking ──done──▶ CountingDown ──0──▶ Recording
///                                              │ skip ──────────▶ Recording
///                                              │ abort ─▶ ManualReady
/// Recording ──stop / cap──▶ AwaitingResponse ──reply──▶ Speaking
///                                            ──reply, no auto-speak──▶ ManualReady
///                                            ──failure / empty──▶ ManualReady
/// ManualReady ──record──▶ Recording
/// any phase ──close / complete──▶ Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnPhase {
    #[default]
    AwaitingOpen,
    Speaking,
    CountingDown,
    Recording,
    AwaitingResponse,
    /// Resting; nothing happens until the user records.
    ManualReady,
    Closed,
}

impl TurnPhase {
    /// Phases in which a manual "record" is accepted.
    pub fn accepts_record(&self) -> bool {
        matches!(
            self,
            TurnPhase::AwaitingOpen
                | TurnPhase::Speaking
                | TurnPhase::CountingDown
                | TurnPhase::ManualReady
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            TurnPhase::AwaitingOpen => "Not started",
            TurnPhase::Speaking => "Coach speaking",
            TurnPhase::CountingDown => "Get ready",
            TurnPhase::Recording => "Listening",
            TurnPhase::AwaitingResponse => "Thinking",
            TurnPhase::ManualReady => "Ready",
            TurnPhase::Closed => "Session ended",
        }
    }
}

// ---------------------------------------------------------------------------
// TurnView
// ---------------------------------------------------------------------------

/// Everything a front end needs to render a session.
#[derive(Debug, Clone)]
pub struct TurnView {
    pub session_id: Uuid,
    pub kind: SessionKind,
    pub phase: TurnPhase,
    pub messages: Vec<Message>,
    /// Seconds left before the microphone opens; `Some` only in
    /// `CountingDown`.
    pub countdown_remaining: Option<u32>,
    /// The current or last recording was started by the countdown.  Labels
    /// only; never affects control flow.
    pub is_auto_turn: bool,
    pub question_streak: u32,
    /// The user has been quiet for the silence timeout in this recording.
    pub silence_warning: bool,
    pub last_error: Option<String>,
    /// Informational line, e.g. "didn't catch that".
    pub notice: Option<String>,
    /// References attached to the latest coach reply.
    pub references: Vec<Reference>,
}

impl TurnView {
    pub fn new(kind: SessionKind) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            kind,
            phase: TurnPhase::AwaitingOpen,
            messages: Vec::new(),
            countdown_remaining: None,
            is_auto_turn: false,
            question_streak: 0,
            silence_warning: false,
            last_error: None,
            notice: None,
            references: Vec::new(),
        }
    }

    /// Messages the services may see: failed turns are left out.
    pub fn history(&self) -> Vec<Message> {
        self.messages.iter().filter(|m| !m.is_error).cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// SharedTurnState
// ---------------------------------------------------------------------------

/// Cheap to clone.  Hold the lock briefly and never across `.await`.
pub type SharedTurnState = Arc<Mutex<TurnView>>;

pub fn new_shared_turn_state(kind: SessionKind) -> SharedTurnState {
    Arc::new(Mutex::new(TurnView::new(kind)))
}

pub(crate) fn lock_view(state: &SharedTurnState) -> MutexGuard<'_, TurnView> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
