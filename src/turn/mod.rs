//! The turn-taking engine: session kinds, the conversation log and the
//! orchestrator that alternates coach speech with user recordings.

pub mod kind;
pub mod message;
pub mod runner;
pub mod state;

pub use kind::{SessionKind, UnknownSessionKind};
pub use message::{is_question, Message, Role};
pub use runner::{open_session, TurnCommand, TurnDeps, TurnError, TurnHandle, TurnOrchestrator};
pub use state::{new_shared_turn_state, SharedTurnState, TurnPhase, TurnView};
