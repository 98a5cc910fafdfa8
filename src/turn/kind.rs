//! The closed set of coaching modes.
//!
//! A kind only selects prompt text and is passed through to the services;
//! it never changes how turns are taken.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    #[default]
    Planning,
    Reflection,
    Coaching,
    Motivation,
    Clarification,
}

impl SessionKind {
    pub const ALL: [SessionKind; 5] = [
        SessionKind::Planning,
        SessionKind::Reflection,
        SessionKind::Coaching,
        SessionKind::Motivation,
        SessionKind::Clarification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Planning => "planning",
            SessionKind::Reflection => "reflection",
            SessionKind::Coaching => "coaching",
            SessionKind::Motivation => "motivation",
            SessionKind::Clarification => "clarification",
        }
    }

    /// Line the coach opens the session with when the caller gives none.
    pub fn opening_prompt(&self) -> &'static str {
        match self {
            SessionKind::Planning => "What matters most to you today?",
            SessionKind::Reflection => "Looking back on this week, what stands out to you?",
            SessionKind::Coaching => "What would you like to work through together?",
            SessionKind::Motivation => "What is one thing you are excited to move forward on?",
            SessionKind::Clarification => "What feels unclear right now?",
        }
    }

    /// What the coach is trying to do in this mode.
    pub fn focus(&self) -> &'static str {
        match self {
            SessionKind::Planning => {
                "Help the user turn intentions into a small number of concrete, \
                 scheduled next actions."
            }
            SessionKind::Reflection => {
                "Help the user notice patterns in what happened, what worked and \
                 what they would change."
            }
            SessionKind::Coaching => {
                "Help the user explore a challenge and find their own way forward. \
                 Prefer questions over advice."
            }
            SessionKind::Motivation => {
                "Reconnect the user with why their goals matter and help them pick \
                 one energising step."
            }
            SessionKind::Clarification => {
                "Help the user untangle a vague goal or decision into something \
                 specific they can act on."
            }
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown session kind {0:?} (expected planning, reflection, coaching, motivation or clarification)")]
pub struct UnknownSessionKind(pub String);

impl FromStr for SessionKind {
    type Err = UnknownSessionKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        SessionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| UnknownSessionKind(s.to_string()))
    }
}
