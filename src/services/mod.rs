//! External collaborators of the turn engine.
//!
//! * [`Transcriber`]: captured audio → transcript text.
//! * [`Responder`]: user text + history → coach reply.
//! * [`KnowledgeExtractor`]: end-of-session summary, fire-and-forget.
//!
//! [`ApiCoachClient`] implements all three against an OpenAI-compatible API.
//! The orchestrator only sees the traits, bundled as [`CoachServices`].

pub mod client;
pub mod prompt;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::recording::CapturedAudio;
use crate::turn::{Message, SessionKind};

pub use client::ApiCoachClient;
pub use prompt::PromptBuilder;

// ---------------------------------------------------------------------------
// ServiceError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("request timed out")]
    Timeout,

    #[error("service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to parse service response: {0}")]
    Parse(String),

    #[error("service returned an empty response")]
    EmptyResponse,
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ServiceError::Timeout
        } else {
            ServiceError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Reference material the responder thinks is relevant to the reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub excerpt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CoachReply {
    pub text: String,
    pub references: Vec<Reference>,
}

/// Turn-level hints handed to the responder alongside the history.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseContext {
    /// Consecutive coach questions so far.
    pub question_streak: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionSummary {
    pub summary: String,
    #[serde(default)]
    pub insights: Vec<String>,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Near-silent audio yields an empty transcript, not an error.
    async fn transcribe(
        &self,
        audio: &CapturedAudio,
        kind: SessionKind,
    ) -> Result<String, ServiceError>;
}

#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(
        &self,
        kind: SessionKind,
        user_text: &str,
        history: &[Message],
        context: &ResponseContext,
    ) -> Result<CoachReply, ServiceError>;
}

#[async_trait]
pub trait KnowledgeExtractor: Send + Sync {
    async fn extract(
        &self,
        session_id: Uuid,
        history: &[Message],
        kind: SessionKind,
    ) -> Result<Option<SessionSummary>, ServiceError>;
}

/// The three collaborators the orchestrator talks to.
#[derive(Clone)]
pub struct CoachServices {
    pub transcriber: Arc<dyn Transcriber>,
    pub responder: Arc<dyn Responder>,
    pub extractor: Arc<dyn KnowledgeExtractor>,
}

impl CoachServices {
    /// One client serving all three roles.
    pub fn from_client<C>(client: Arc<C>) -> Self
    where
        C: Transcriber + Responder + KnowledgeExtractor + 'static,
    {
        Self {
            transcriber: client.clone(),
            responder: client.clone(),
            extractor: client,
        }
    }
}

// ---------------------------------------------------------------------------
// MockServices (test-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub use mock::MockServices;
