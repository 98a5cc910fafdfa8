//! Voice coach: a spoken turn-taking loop between a coaching model and the
//! user.  The coach speaks, a countdown opens the microphone, the answer is
//! transcribed and replied to, and the loop repeats until the session ends.

pub mod audio;
pub mod config;
pub mod hotkey;
pub mod platform;
pub mod recording;
pub mod services;
pub mod speech;
pub mod turn;
