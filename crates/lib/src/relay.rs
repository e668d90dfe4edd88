//! Completion relay: ask Gemini with bounded retry, shape the answer, send exactly one reply.
//!
//! Attempt loop: 503 backs off (initial, 2x, 4x, ...) while attempts remain, transport errors
//! retry immediately, any other status or an unreadable 2xx body stops. Whatever happens,
//! the user gets one message: the answer, a "no answer" note, or an apology.

use std::sync::Arc;
use std::time::Duration;

use crate::channels::MessageSender;
use crate::config::RetryPolicy;
use crate::llm::{AttemptOutcome, CompletionBackend, CompletionRequest, GeminiError, ResponseMode};
use crate::reply;

/// Which reply the user received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Answer,
    NoAnswer,
    ProcessingApology,
    ConnectionApology,
}

/// What one relay invocation did. Returned for logging and tests; nothing is retained.
#[derive(Debug, Clone)]
pub struct RelayOutcome {
    pub attempts: u32,
    pub backoffs: Vec<Duration>,
    pub reply: ReplyKind,
    pub text: String,
    /// False when the Send API call failed. The failure is logged and not retried.
    pub delivered: bool,
}

/// Upstream result after the retry loop.
struct Fetched {
    attempts: u32,
    backoffs: Vec<Duration>,
    result: Upstream,
}

enum Upstream {
    Body(String),
    /// The model answered 2xx but the body could not be read.
    Unreadable(GeminiError),
    Failed(GeminiError),
}

pub struct CompletionRelay {
    backend: Arc<dyn CompletionBackend>,
    sender: Arc<dyn MessageSender>,
    mode: ResponseMode,
    system_instruction: String,
    retry: RetryPolicy,
}

impl CompletionRelay {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        sender: Arc<dyn MessageSender>,
        mode: ResponseMode,
        system_instruction: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            sender,
            mode,
            system_instruction: system_instruction.into(),
            retry,
        }
    }

    pub fn mode(&self) -> ResponseMode {
        self.mode
    }

    pub fn sender(&self) -> &dyn MessageSender {
        self.sender.as_ref()
    }

    /// Answer `user_text` for `sender_id`. Always issues exactly one send.
    pub async fn relay(&self, sender_id: &str, user_text: &str) -> RelayOutcome {
        let request = CompletionRequest {
            user_text: user_text.to_string(),
            system_instruction: self.system_instruction.clone(),
            mode: self.mode,
        };
        let fetched = self.fetch(&request).await;
        let (kind, text) = match fetched.result {
            Upstream::Body(body) => shape_reply(self.mode, &body),
            Upstream::Unreadable(e) => {
                log::warn!("relay: completion body unreadable: {}", e);
                (
                    ReplyKind::ProcessingApology,
                    reply::PROCESSING_APOLOGY.to_string(),
                )
            }
            Upstream::Failed(e) => {
                log::warn!(
                    "relay: completion failed after {} attempt(s): {}",
                    fetched.attempts,
                    e
                );
                (
                    ReplyKind::ConnectionApology,
                    reply::CONNECTION_APOLOGY.to_string(),
                )
            }
        };
        let delivered = send_best_effort(self.sender.as_ref(), sender_id, &text).await;
        RelayOutcome {
            attempts: fetched.attempts,
            backoffs: fetched.backoffs,
            reply: kind,
            text,
            delivered,
        }
    }

    async fn fetch(&self, request: &CompletionRequest) -> Fetched {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut backoffs = Vec::new();
        let mut attempt = 0;
        loop {
            let outcome = self.backend.generate(request).await;
            let last = attempt + 1 >= max_attempts;
            match outcome {
                AttemptOutcome::Success(body) => {
                    return Fetched {
                        attempts: attempt + 1,
                        backoffs,
                        result: Upstream::Body(body),
                    };
                }
                AttemptOutcome::UnreadableBody(e) => {
                    return Fetched {
                        attempts: attempt + 1,
                        backoffs,
                        result: Upstream::Unreadable(e),
                    };
                }
                AttemptOutcome::Overloaded(e) if !last => {
                    let delay = self.retry.backoff_for(attempt);
                    log::info!(
                        "relay: {} (attempt {}/{}), retrying in {:?}",
                        e,
                        attempt + 1,
                        max_attempts,
                        delay
                    );
                    backoffs.push(delay);
                    tokio::time::sleep(delay).await;
                }
                AttemptOutcome::Transport(e) if !last => {
                    log::warn!(
                        "relay: {} (attempt {}/{}), retrying",
                        e,
                        attempt + 1,
                        max_attempts
                    );
                }
                AttemptOutcome::Overloaded(e)
                | AttemptOutcome::Transport(e)
                | AttemptOutcome::Fatal(e) => {
                    return Fetched {
                        attempts: attempt + 1,
                        backoffs,
                        result: Upstream::Failed(e),
                    };
                }
            }
            attempt += 1;
        }
    }
}

/// Turn a successful response body into the text sent to the user.
fn shape_reply(mode: ResponseMode, body: &str) -> (ReplyKind, String) {
    let response: serde_json::Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            log::warn!("relay: completion response is not JSON: {}", e);
            return (
                ReplyKind::ProcessingApology,
                reply::PROCESSING_APOLOGY.to_string(),
            );
        }
    };
    let Some(raw) = reply::candidate_text(&response).filter(|t| !t.is_empty()) else {
        return (ReplyKind::NoAnswer, reply::NO_ANSWER.to_string());
    };
    match mode {
        ResponseMode::Structured => match reply::assemble_structured(raw) {
            Ok(text) => (ReplyKind::Answer, text),
            Err(e) => {
                log::warn!("relay: structured answer did not parse: {}", e);
                (
                    ReplyKind::ProcessingApology,
                    reply::PROCESSING_APOLOGY.to_string(),
                )
            }
        },
        ResponseMode::Plain => (ReplyKind::Answer, reply::sanitize_plain_text(raw)),
    }
}

/// Send once; log and swallow failures. Returns whether the Send API accepted the message.
pub(crate) async fn send_best_effort(sender: &dyn MessageSender, recipient_id: &str, text: &str) -> bool {
    match sender.send_message(recipient_id, text).await {
        Ok(()) => true,
        Err(e) => {
            log::warn!("send to {} failed: {}", recipient_id, e);
            false
        }
    }
}
