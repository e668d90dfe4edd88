//! Gemini `generateContent` client (https://generativelanguage.googleapis.com by default).
//! Non-streaming only; one HTTP call per attempt.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;

use super::{AttemptOutcome, CompletionBackend, CompletionRequest, ResponseMode};

/// Client for the Gemini REST API. The API key travels as the `key` query parameter.
#[derive(Clone)]
pub struct GeminiClient {
    base_url: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, thiserror::Error)]
pub enum GeminiError {
    #[error("gemini request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("gemini api error: {status} {body}")]
    Api { status: StatusCode, body: String },
}

impl GeminiClient {
    /// `timeout` bounds each attempt from connect to the end of the body.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GeminiError> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    /// POST models/{model}:generateContent — one attempt, classified for the retry driver.
    pub async fn generate_content(&self, request: &CompletionRequest) -> AttemptOutcome {
        let body = GenerateContentRequest::from(request);
        let res = match self
            .client
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
        {
            Ok(res) => res,
            Err(e) => return AttemptOutcome::Transport(GeminiError::Request(e)),
        };
        let status = res.status();
        if status.is_success() {
            // 2xx is final, even when the body cannot be read.
            return match res.text().await {
                Ok(text) => AttemptOutcome::Success(text),
                Err(e) => AttemptOutcome::UnreadableBody(GeminiError::Request(e)),
            };
        }
        classify(status, res.text().await.unwrap_or_default())
    }
}

#[async_trait]
impl CompletionBackend for GeminiClient {
    async fn generate(&self, request: &CompletionRequest) -> AttemptOutcome {
        self.generate_content(request).await
    }
}

/// Map an HTTP status and body to an attempt outcome.
fn classify(status: StatusCode, body: String) -> AttemptOutcome {
    if status.is_success() {
        AttemptOutcome::Success(body)
    } else if status == StatusCode::SERVICE_UNAVAILABLE {
        AttemptOutcome::Overloaded(GeminiError::Api { status, body })
    } else {
        AttemptOutcome::Fatal(GeminiError::Api { status, body })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    system_instruction: SystemInstruction,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_schema: serde_json::Value,
}

/// Schema for structured answers: three strings in a fixed order.
fn structured_answer_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "OBJECT",
        "properties": {
            "title": { "type": "STRING" },
            "body": { "type": "STRING" },
            "question": { "type": "STRING" }
        },
        "propertyOrdering": ["title", "body", "question"]
    })
}

impl From<&CompletionRequest> for GenerateContentRequest {
    fn from(request: &CompletionRequest) -> Self {
        let generation_config = match request.mode {
            ResponseMode::Structured => Some(GenerationConfig {
                response_mime_type: "application/json",
                response_schema: structured_answer_schema(),
            }),
            ResponseMode::Plain => None,
        };
        Self {
            contents: vec![Content {
                role: "user",
                parts: vec![Part {
                    text: request.user_text.clone(),
                }],
            }],
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: request.system_instruction.clone(),
                }],
            },
            generation_config,
        }
    }
}
