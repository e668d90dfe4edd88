//! Event dispatcher: subscription verification and webhook delivery routing.
//!
//! HTTP-agnostic; the gateway maps [`AuthMismatch`] and [`UnknownPayload`] to status codes. Delivery never fails
//! because of what happens to a single event: relay problems reach the user as a chat
//! message, not the platform as an error status.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::channels::{EventKind, InboundEvent, WebhookPayload, PAGE_OBJECT};
use crate::relay::{self, CompletionRelay};
use crate::reply::GET_STARTED_PAYLOAD;

/// Which events of an entry's `messaging` list are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventPolicy {
    /// Only the first event of each entry; later ones are dropped.
    #[default]
    FirstOnly,
    /// Every event, in order.
    All,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("verify token mismatch")]
pub struct AuthMismatch;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unrecognized webhook payload: {0}")]
pub struct UnknownPayload(pub String);

/// Query of a subscription verification request. `hub.mode` is not checked.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VerifyQuery {
    pub verify_token: Option<String>,
    pub challenge: Option<String>,
}

impl VerifyQuery {
    /// Pick the hub.* fields out of decoded query parameters. A repeated key keeps its last value.
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        Self {
            verify_token: params.get("hub.verify_token").cloned(),
            challenge: params.get("hub.challenge").cloned(),
        }
    }
}

/// What a delivery did, per event class.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub relayed: usize,
    pub welcomed: usize,
    pub ignored: usize,
    /// Events beyond the first of an entry under [`EventPolicy::FirstOnly`].
    pub skipped: usize,
}

pub struct Dispatcher {
    verify_token: String,
    policy: EventPolicy,
    relay: Arc<CompletionRelay>,
}

impl Dispatcher {
    pub fn new(verify_token: impl Into<String>, policy: EventPolicy, relay: Arc<CompletionRelay>) -> Self {
        Self {
            verify_token: verify_token.into(),
            policy,
            relay,
        }
    }

    /// Echo the challenge when the supplied token matches the configured one.
    pub fn verify(&self, query: &VerifyQuery) -> Result<String, AuthMismatch> {
        match query.verify_token.as_deref() {
            Some(token) if token == self.verify_token => {
                log::info!("webhook verified");
                Ok(query.challenge.clone().unwrap_or_default())
            }
            _ => {
                log::warn!("webhook verification failed: token mismatch");
                Err(AuthMismatch)
            }
        }
    }

    /// Parse a webhook POST body and handle its events one at a time, in order.
    pub async fn deliver(&self, body: &[u8]) -> Result<DeliveryReport, UnknownPayload> {
        let payload: WebhookPayload = serde_json::from_slice(body)
            .map_err(|e| UnknownPayload(e.to_string()))?;
        if payload.object != PAGE_OBJECT {
            return Err(UnknownPayload(format!(
                "object {:?}",
                payload.object
            )));
        }

        let mut report = DeliveryReport::default();
        for entry in &payload.entry {
            let take = match self.policy {
                EventPolicy::FirstOnly => entry.messaging.len().min(1),
                EventPolicy::All => entry.messaging.len(),
            };
            report.skipped += entry.messaging.len() - take;
            for event in entry.messaging.iter().take(take) {
                match event.to_inbound() {
                    Some(inbound) => self.handle_event(inbound, &mut report).await,
                    None => report.ignored += 1,
                }
            }
        }
        if report.skipped > 0 {
            log::debug!("dispatch: skipped {} batched event(s)", report.skipped);
        }
        Ok(report)
    }

    async fn handle_event(&self, event: InboundEvent, report: &mut DeliveryReport) {
        match event.kind {
            EventKind::Message { text } => {
                let text = text.trim().to_lowercase();
                if text.is_empty() {
                    report.ignored += 1;
                    return;
                }
                log::debug!("dispatch: message from {}: {}", event.sender_id, text);
                let outcome = self.relay.relay(&event.sender_id, &text).await;
                log::info!(
                    "dispatch: replied to {} ({:?}, {} attempt(s), delivered: {})",
                    event.sender_id,
                    outcome.reply,
                    outcome.attempts,
                    outcome.delivered
                );
                report.relayed += 1;
            }
            EventKind::Postback { payload } if payload == GET_STARTED_PAYLOAD => {
                let welcome = self.relay.mode().welcome_text();
                relay::send_best_effort(self.relay.sender(), &event.sender_id, welcome).await;
                log::info!("dispatch: welcomed {}", event.sender_id);
                report.welcomed += 1;
            }
            EventKind::Postback { .. } => report.ignored += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::llm::ResponseMode;
    use crate::relay::tests::{success, RecordingSender, ScriptedBackend};
    use crate::reply;

    fn dispatcher(
        backend: Arc<ScriptedBackend>,
        sender: Arc<RecordingSender>,
        policy: EventPolicy,
    ) -> Dispatcher {
        let relay = CompletionRelay::new(
            backend,
            sender,
            ResponseMode::Plain,
            "be kind",
            RetryPolicy::default(),
        );
        Dispatcher::new("secret", policy, Arc::new(relay))
    }

    fn fixtures() -> (Arc<ScriptedBackend>, Arc<RecordingSender>) {
        (
            ScriptedBackend::new(vec![success("one"), success("two")]),
            Arc::new(RecordingSender::default()),
        )
    }

    fn query(token: Option<&str>, challenge: Option<&str>) -> VerifyQuery {
        VerifyQuery {
            verify_token: token.map(str::to_string),
            challenge: challenge.map(str::to_string),
        }
    }

    #[test]
    fn verify_echoes_challenge_on_match() {
        let (b, s) = fixtures();
        let d = dispatcher(b, s, EventPolicy::FirstOnly);
        assert_eq!(d.verify(&query(Some("secret"), Some("abc"))), Ok("abc".to_string()));
    }

    #[test]
    fn verify_rejects_mismatch_or_missing_token() {
        let (b, s) = fixtures();
        let d = dispatcher(b, s, EventPolicy::FirstOnly);
        assert_eq!(
            d.verify(&query(Some("wrong"), Some("abc"))),
            Err(AuthMismatch)
        );
        assert_eq!(
            d.verify(&query(None, Some("abc"))),
            Err(AuthMismatch)
        );
        assert_eq!(
            d.verify(&query(Some("secret "), Some("abc"))),
            Err(AuthMismatch)
        );
    }

    #[test]
    fn verify_query_keeps_last_repeated_token() {
        let uri: axum::http::Uri =
            "/webhook?hub.mode=subscribe&hub.verify_token=secret&hub.verify_token=x&hub.challenge=c"
                .parse()
                .unwrap();
        let axum::extract::Query(params) =
            axum::extract::Query::<HashMap<String, String>>::try_from_uri(&uri).unwrap();
        let q = VerifyQuery::from_params(&params);
        assert_eq!(q.verify_token.as_deref(), Some("x"));
        assert_eq!(q.challenge.as_deref(), Some("c"));

        let (b, s) = fixtures();
        let d = dispatcher(b, s, EventPolicy::FirstOnly);
        assert_eq!(d.verify(&q), Err(AuthMismatch));
    }

    #[tokio::test]
    async fn unknown_object_is_rejected_without_sends() {
        let (b, s) = fixtures();
        let d = dispatcher(b.clone(), s.clone(), EventPolicy::FirstOnly);
        let body = br#"{"object":"instagram","entry":[{"messaging":[{"sender":{"id":"1"},"message":{"text":"hi"}}]}]}"#;
        assert!(matches!(
            d.deliver(body).await,
            Err(UnknownPayload(_))
        ));
        assert!(matches!(
            d.deliver(b"not json").await,
            Err(UnknownPayload(_))
        ));
        assert_eq!(b.calls(), 0);
        assert!(s.sent().is_empty());
    }

    #[tokio::test]
    async fn message_text_is_trimmed_and_lowercased() {
        let (b, s) = fixtures();
        let d = dispatcher(b.clone(), s.clone(), EventPolicy::FirstOnly);
        let body = br#"{"object":"page","entry":[{"messaging":[{"sender":{"id":"42"},"message":{"text":"  What IS Rust?  "}}]}]}"#;
        let report = d.deliver(body).await.unwrap();
        assert_eq!(report.relayed, 1);
        assert_eq!(b.requests()[0].user_text, "what is rust?");
        assert_eq!(s.sent(), vec![("42".to_string(), "one".to_string())]);
    }

    #[tokio::test]
    async fn blank_text_is_dropped_silently() {
        let (b, s) = fixtures();
        let d = dispatcher(b.clone(), s.clone(), EventPolicy::FirstOnly);
        let body = br#"{"object":"page","entry":[
            {"messaging":[{"sender":{"id":"1"},"message":{"text":"   \n\t "}}]},
            {"messaging":[{"sender":{"id":"2"},"message":{"attachments":[]}}]}
        ]}"#;
        let report = d.deliver(body).await.unwrap();
        assert_eq!(report.relayed, 0);
        assert_eq!(report.ignored, 2);
        assert_eq!(b.calls(), 0);
        assert!(s.sent().is_empty());
    }

    #[tokio::test]
    async fn get_started_postback_sends_welcome_only() {
        let (b, s) = fixtures();
        let d = dispatcher(b.clone(), s.clone(), EventPolicy::FirstOnly);
        let body = br#"{"object":"page","entry":[{"messaging":[{"sender":{"id":"7"},"postback":{"payload":"GET_STARTED_PAYLOAD"}}]}]}"#;
        let report = d.deliver(body).await.unwrap();
        assert_eq!(report.welcomed, 1);
        assert_eq!(b.calls(), 0);
        assert_eq!(
            s.sent(),
            vec![("7".to_string(), reply::WELCOME_SOCIAL.to_string())]
        );
    }

    #[tokio::test]
    async fn other_postbacks_are_ignored() {
        let (b, s) = fixtures();
        let d = dispatcher(b.clone(), s.clone(), EventPolicy::FirstOnly);
        let body = br#"{"object":"page","entry":[{"messaging":[{"sender":{"id":"7"},"postback":{"payload":"MENU"}}]}]}"#;
        let report = d.deliver(body).await.unwrap();
        assert_eq!(report.ignored, 1);
        assert!(s.sent().is_empty());
    }

    const BATCH: &[u8] = br#"{"object":"page","entry":[
        {"messaging":[
            {"sender":{"id":"1"},"message":{"text":"a"}},
            {"sender":{"id":"2"},"message":{"text":"b"}}
        ]},
        {"messaging":[]}
    ]}"#;

    #[tokio::test]
    async fn first_only_policy_drops_batched_events() {
        let (b, s) = fixtures();
        let d = dispatcher(b.clone(), s.clone(), EventPolicy::FirstOnly);
        let report = d.deliver(BATCH).await.unwrap();
        assert_eq!(report.relayed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(s.sent(), vec![("1".to_string(), "one".to_string())]);
    }

    #[tokio::test]
    async fn all_policy_handles_every_event_in_order() {
        let (b, s) = fixtures();
        let d = dispatcher(b.clone(), s.clone(), EventPolicy::All);
        let report = d.deliver(BATCH).await.unwrap();
        assert_eq!(report.relayed, 2);
        assert_eq!(report.skipped, 0);
        assert_eq!(
            s.sent(),
            vec![
                ("1".to_string(), "one".to_string()),
                ("2".to_string(), "two".to_string())
            ]
        );
    }
}
