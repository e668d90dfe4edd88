//! Completion backend abstraction and the Gemini client.
//!
//! The relay talks to a [`CompletionBackend`]; each call is one attempt and reports an
//! [`AttemptOutcome`] so the retry driver can decide without inspecting errors.

mod gemini;

pub use gemini::{GeminiClient, GeminiError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::reply;

/// How the model is asked to answer and how its answer is shaped for Messenger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseMode {
    /// JSON with title, body and question fields, joined with blank lines.
    #[default]
    Structured,
    /// Free text; markdown emphasis stripped and bullets converted.
    Plain,
}

impl ResponseMode {
    pub fn default_system_instruction(self) -> &'static str {
        match self {
            ResponseMode::Structured => reply::TUTOR_INSTRUCTION,
            ResponseMode::Plain => reply::SOCIAL_INSTRUCTION,
        }
    }

    pub fn welcome_text(self) -> &'static str {
        match self {
            ResponseMode::Structured => reply::WELCOME_TUTOR,
            ResponseMode::Plain => reply::WELCOME_SOCIAL,
        }
    }
}

/// One completion request. Built fresh for every user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub user_text: String,
    pub system_instruction: String,
    pub mode: ResponseMode,
}

/// Result of a single upstream attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// 2xx; carries the raw response body.
    Success(String),
    /// 503: the model is overloaded. Retried after backoff.
    Overloaded(GeminiError),
    /// 2xx whose body could not be read. Not retried; the user gets the processing apology.
    UnreadableBody(GeminiError),
    /// The request never produced a response (connect or timeout). Retried without delay.
    Transport(GeminiError),
    /// Any other status. Not retried.
    Fatal(GeminiError),
}

/// Anything that can run one completion attempt (Gemini in production, fakes in tests).
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn generate(&self, request: &CompletionRequest) -> AttemptOutcome;
}
