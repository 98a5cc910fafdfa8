//! [`ApiCoachClient`]: the three services over an OpenAI-compatible API.
//!
//! * transcription: `POST {base_url}/v1/audio/transcriptions` (multipart)
//! * replies and summaries: `POST {base_url}/v1/chat/completions`
//!
//! Works with OpenAI, Groq, LM Studio, vLLM, a local whisper server, or
//! anything else that speaks the same wire format.  Connection details come
//! only from [`ServiceConfig`].

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use uuid::Uuid;

use super::prompt::PromptBuilder;
use super::{
    CoachReply, KnowledgeExtractor, Reference, Responder, ResponseContext, ServiceError,
    SessionSummary, Transcriber,
};
use crate::config::ServiceConfig;
use crate::recording::CapturedAudio;
use crate::turn::{Message, SessionKind};

pub struct ApiCoachClient {
    client: reqwest::Client,
    config: ServiceConfig,
}

impl ApiCoachClient {
    /// The HTTP client carries `config.timeout_secs` as its per-request
    /// timeout.
    pub fn from_config(config: &ServiceConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            config: config.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.api_key.as_deref() {
            Some(key) if !key.is_empty() => req.bearer_auth(key),
            _ => req,
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Value, ServiceError> {
        let response = self.authorize(req).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json()
            .await
            .map_err(|e| ServiceError::Parse(e.to_string()))
    }

    async fn chat(&self, messages: Vec<Value>, temperature: f32) -> Result<Value, ServiceError> {
        let body = serde_json::json!({
            "model":       self.config.chat_model,
            "messages":    messages,
            "stream":      false,
            "temperature": temperature,
        });
        let req = self
            .client
            .post(self.url("/v1/chat/completions"))
            .json(&body);
        self.send(req).await
    }
}

#[async_trait]
impl Transcriber for ApiCoachClient {
    async fn transcribe(
        &self,
        audio: &CapturedAudio,
        kind: SessionKind,
    ) -> Result<String, ServiceError> {
        let file_name = format!("turn.{}", audio.encoding().extension());
        let part = Part::bytes(audio.payload().to_vec())
            .file_name(file_name)
            .mime_str(audio.mime_type())?;
        let form = Form::new()
            .text("model", self.config.transcription_model.clone())
            .text("response_format", "json")
            .part("file", part);

        log::debug!(
            "services: transcribing {:.1}s of {} audio ({kind})",
            audio.duration_seconds(),
            audio.mime_type()
        );
        let req = self
            .client
            .post(self.url("/v1/audio/transcriptions"))
            .multipart(form);
        let json = self.send(req).await?;

        // An empty `text` is a valid answer for silent audio.
        json["text"]
            .as_str()
            .map(|t| t.trim().to_string())
            .ok_or_else(|| ServiceError::Parse("missing \"text\" field".into()))
    }
}

#[async_trait]
impl Responder for ApiCoachClient {
    async fn respond(
        &self,
        kind: SessionKind,
        user_text: &str,
        history: &[Message],
        context: &ResponseContext,
    ) -> Result<CoachReply, ServiceError> {
        let messages = PromptBuilder::new(kind).reply_messages(user_text, history, context);
        let json = self.chat(messages, self.config.temperature).await?;
        parse_reply(&json)
    }
}

#[async_trait]
impl KnowledgeExtractor for ApiCoachClient {
    async fn extract(
        &self,
        session_id: Uuid,
        history: &[Message],
        kind: SessionKind,
    ) -> Result<Option<SessionSummary>, ServiceError> {
        let messages = PromptBuilder::new(kind).extraction_messages(history);
        let json = self.chat(messages, 0.2).await?;
        let summary = parse_summary(chat_content(&json).unwrap_or_default());
        if let Some(summary) = &summary {
            log::info!(
                "services: session {session_id} summarised with {} insights",
                summary.insights.len()
            );
        }
        Ok(summary)
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

fn chat_content(json: &Value) -> Option<&str> {
    json["choices"][0]["message"]["content"].as_str()
}

/// Reply text plus an optional top-level `references` array.
fn parse_reply(json: &Value) -> Result<CoachReply, ServiceError> {
    let text = chat_content(json)
        .ok_or(ServiceError::EmptyResponse)?
        .trim()
        .to_string();
    if text.is_empty() {
        return Err(ServiceError::EmptyResponse);
    }

    let references = json
        .get("references")
        .and_then(|refs| serde_json::from_value::<Vec<Reference>>(refs.clone()).ok())
        .unwrap_or_default();

    Ok(CoachReply { text, references })
}

/// The model is asked for JSON but may wrap it in a code fence or ignore the
/// format; plain text becomes a summary with no insights.
fn parse_summary(content: &str) -> Option<SessionSummary> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return None;
    }
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);

    match serde_json::from_str::<SessionSummary>(unfenced) {
        Ok(summary) => Some(summary),
        Err(_) => Some(SessionSummary {
            summary: trimmed.to_string(),
            insights: Vec::new(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(api_key: Option<&str>) -> ServiceConfig {
        ServiceConfig {
            base_url: "http://localhost:8080/".into(),
            api_key: api_key.map(str::to_string),
            ..ServiceConfig::default()
        }
    }

    #[test]
    fn from_config_builds_with_or_without_key() {
        let _ = ApiCoachClient::from_config(&config(None));
        let _ = ApiCoachClient::from_config(&config(Some("")));
        let _ = ApiCoachClient::from_config(&config(Some("sk-test")));
    }

    #[test]
    fn url_joins_without_double_slash() {
        let client = ApiCoachClient::from_config(&config(None));
        assert_eq!(
            client.url("/v1/chat/completions"),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[test]
    fn client_serves_every_role() {
        let client = std::sync::Arc::new(ApiCoachClient::from_config(&config(None)));
        let _services = super::super::CoachServices::from_client(client);
    }

    #[test]
    fn reply_text_is_trimmed() {
        let json = json!({
            "choices": [{ "message": { "content": "  Great, what's the first step? \n" } }]
        });
        let reply = parse_reply(&json).unwrap();
        assert_eq!(reply.text, "Great, what's the first step?");
        assert!(reply.references.is_empty());
    }

    #[test]
    fn reply_carries_references_when_present() {
        let json = json!({
            "choices": [{ "message": { "content": "Try time-blocking." } }],
            "references": [{ "title": "Deep Work", "url": "https://example.org/deep-work" }]
        });
        let reply = parse_reply(&json).unwrap();
        assert_eq!(reply.references.len(), 1);
        assert_eq!(reply.references[0].title, "Deep Work");
        assert!(reply.references[0].excerpt.is_none());
    }

    #[test]
    fn empty_or_missing_reply_is_an_error() {
        let blank = json!({ "choices": [{ "message": { "content": "   " } }] });
        assert_eq!(parse_reply(&blank), Err(ServiceError::EmptyResponse));
        assert_eq!(parse_reply(&json!({})), Err(ServiceError::EmptyResponse));
    }

    #[test]
    fn summary_parses_fenced_json() {
        let content = "```json\n{\"summary\": \"Planned the week.\", \"insights\": [\"Mornings work best\"]}\n```";
        let summary = parse_summary(content).unwrap();
        assert_eq!(summary.summary, "Planned the week.");
        assert_eq!(summary.insights, ["Mornings work best"]);
    }

    #[test]
    fn summary_falls_back_to_plain_text() {
        let summary = parse_summary("We talked about the report.").unwrap();
        assert_eq!(summary.summary, "We talked about the report.");
        assert!(summary.insights.is_empty());
        assert!(parse_summary("  ").is_none());
    }
}
