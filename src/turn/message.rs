//! Conversation log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Coach,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Coach messages only: the line asks the user something.
    pub is_question: bool,
    /// A failed turn reported inline.  Never sent back to the services.
    pub is_error: bool,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into(), false)
    }

    pub fn coach(content: impl Into<String>) -> Self {
        let content = content.into();
        let question = is_question(&content);
        Self::new(Role::Coach, content, question)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::new(Role::Coach, content.into(), false)
        }
    }

    fn new(role: Role, content: String, is_question: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content,
            timestamp: Utc::now(),
            is_question,
            is_error: false,
        }
    }
}

const QUESTION_WORDS: &[&str] = &[
    "what", "why", "how", "when", "where", "who", "which", "could", "would", "can", "does", "did",
    "is", "are",
];

/// Interrogative cue scan: a `?` anywhere, or a sentence that opens with a
/// question word.
pub fn is_question(text: &str) -> bool {
    if text.contains('?') {
        return true;
    }
    text.split(['.', '!', '\n'])
        .filter_map(|sentence| sentence.split_whitespace().next())
        .map(|word| {
            word.trim_matches(|c: char| !c.is_alphanumeric())
                .to_ascii_lowercase()
        })
        .any(|word| QUESTION_WORDS.contains(&word.as_str()))
}
