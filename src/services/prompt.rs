//! Chat prompts for the coach reply and the end-of-session summary.
//!
//! [`PromptBuilder`] renders OpenAI-style `messages` arrays.  The system
//! message is fixed per [`SessionKind`]; the history is replayed with coach
//! lines as `assistant` turns.

use serde_json::{json, Value};

use super::ResponseContext;
use crate::turn::{Message, Role, SessionKind};

// ---------------------------------------------------------------------------
// System instructions
// ---------------------------------------------------------------------------

const COACH_INSTRUCTION: &str = "\
You are a warm, concise voice coach helping someone plan and reflect on their life.
Your replies are read aloud, so:
1. Keep each reply to two or three short sentences.
2. Ask at most one question per reply.
3. No lists, markdown, emoji or headings.
4. Build on what the user just said; do not repeat earlier questions.";

/// Past this many questions in a row the coach is nudged to reflect back.
const DEPTH_HINT_STREAK: u32 = 2;

const DEPTH_HINT: &str = "\
You have asked several questions in a row. Before asking another, briefly \
reflect back what you have heard and offer one concrete observation.";

const EXTRACTION_INSTRUCTION: &str = "\
Summarise the coaching conversation below for the user's journal.
Reply with ONLY a JSON object of the form
{\"summary\": \"<two or three sentences>\", \"insights\": [\"<short insight>\", ...]}
with at most five insights. No prose outside the JSON.";

// ---------------------------------------------------------------------------
// PromptBuilder
// ---------------------------------------------------------------------------

/// Builds chat-completion message lists for one session kind.
///
/// # Example
/// ```rust
/// use voice_coach::services::{PromptBuilder, ResponseContext};
/// use voice_coach::turn::SessionKind;
///
/// let builder = PromptBuilder::new(SessionKind::Planning);
/// let messages = builder.reply_messages("Finish the report", &[], &ResponseContext::default());
/// assert_eq!(messages.last().unwrap()["content"], "Finish the report");
/// ```
#[derive(Debug, Clone, Copy)]
pub struct PromptBuilder {
    kind: SessionKind,
}

impl PromptBuilder {
    pub fn new(kind: SessionKind) -> Self {
        Self { kind }
    }

    pub fn system_prompt(&self, context: &ResponseContext) -> String {
        let mut prompt = format!(
            "{COACH_INSTRUCTION}\n\nSession type: {}.\n{}",
            self.kind,
            self.kind.focus()
        );
        if context.question_streak >= DEPTH_HINT_STREAK {
            prompt.push_str("\n\n");
            prompt.push_str(DEPTH_HINT);
        }
        prompt
    }

    /// System prompt, replayed history, then the new user line.
    pub fn reply_messages(
        &self,
        user_text: &str,
        history: &[Message],
        context: &ResponseContext,
    ) -> Vec<Value> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(json!({ "role": "system", "content": self.system_prompt(context) }));
        messages.extend(history_messages(history));

        // The orchestrator may already have logged the user line.
        let already_last = history
            .last()
            .is_some_and(|m| m.role == Role::User && m.content == user_text);
        if !already_last {
            messages.push(json!({ "role": "user", "content": user_text }));
        }
        messages
    }

    pub fn extraction_messages(&self, history: &[Message]) -> Vec<Value> {
        let transcript = history
            .iter()
            .filter(|m| !m.is_error)
            .map(|m| {
                let speaker = match m.role {
                    Role::User => "User",
                    Role::Coach => "Coach",
                };
                format!("{speaker}: {}", m.content)
            })
            .collect::<Vec<_>>()
            .join("\n");

        vec![
            json!({ "role": "system", "content": EXTRACTION_INSTRUCTION }),
            json!({
                "role": "user",
                "content": format!("Session type: {}\n\n{transcript}", self.kind),
            }),
        ]
    }
}

fn history_messages(history: &[Message]) -> impl Iterator<Item = Value> + '_ {
    history.iter().filter(|m| !m.is_error).map(|m| {
        let role = match m.role {
            Role::User => "user",
            Role::Coach => "assistant",
        };
        json!({ "role": role, "content": m.content })
    })
}
