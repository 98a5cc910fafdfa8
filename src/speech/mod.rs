//! Coach voice output.
//!
//! [`SpeechQueue`] owns the [`SpeechEngine`] and enforces one utterance at a
//! time; nothing else talks to the engine.

pub mod engine;
pub mod queue;

pub use engine::{CommandSpeechEngine, SpeechEngine, SpeechError};
pub use queue::{SpeechCallback, SpeechQueue};

#[cfg(test)]
pub use engine::MockSpeechEngine;
