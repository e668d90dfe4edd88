//! Messenger channel: webhook payload types and the Send API (`me/messages`).

use crate::channels::inbound::{EventKind, InboundEvent};
use crate::channels::sender::{ChannelError, MessageSender};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// `object` tag of page subscriptions; anything else is rejected.
pub const PAGE_OBJECT: &str = "page";

/// Webhook POST body: `{ "object": "page", "entry": [...] }`.
#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub object: String,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub messaging: Vec<MessagingEvent>,
}

/// One item of `entry[].messaging`. Fields Messenger sends that we do not use are ignored.
#[derive(Debug, Deserialize)]
pub struct MessagingEvent {
    #[serde(default)]
    pub sender: Option<Participant>,
    #[serde(default)]
    pub message: Option<MessengerMessage>,
    #[serde(default)]
    pub postback: Option<Postback>,
}

#[derive(Debug, Deserialize)]
pub struct Participant {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct MessengerMessage {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Postback {
    #[serde(default)]
    pub payload: Option<String>,
}

impl MessagingEvent {
    /// Convert to an inbound event. A message wins over a postback; events without a sender or either part yield None.
    pub fn to_inbound(&self) -> Option<InboundEvent> {
        let sender_id = self.sender.as_ref()?.id.clone();
        let kind = if let Some(ref msg) = self.message {
            EventKind::Message {
                text: msg.text.clone().unwrap_or_default(),
            }
        } else if let Some(ref postback) = self.postback {
            EventKind::Postback {
                payload: postback.payload.clone().unwrap_or_default(),
            }
        } else {
            return None;
        };
        Some(InboundEvent { sender_id, kind })
    }
}

/// Messenger Send API client for one page.
pub struct MessengerChannel {
    graph_api_base: String,
    graph_api_version: String,
    page_access_token: String,
    client: reqwest::Client,
}

impl MessengerChannel {
    pub fn new(
        graph_api_base: impl Into<String>,
        graph_api_version: impl Into<String>,
        page_access_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ChannelError> {
        Ok(Self {
            graph_api_base: graph_api_base.into().trim_end_matches('/').to_string(),
            graph_api_version: graph_api_version.into(),
            page_access_token: page_access_token.into(),
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/{}/me/messages",
            self.graph_api_base, self.graph_api_version
        )
    }

    /// Send a text message to a page-scoped user id.
    pub async fn send_message(&self, recipient_id: &str, text: &str) -> Result<(), ChannelError> {
        let body = serde_json::json!({
            "recipient": { "id": recipient_id },
            "message": { "text": text },
        });
        let res = self
            .client
            .post(self.messages_url())
            .query(&[("access_token", self.page_access_token.as_str())])
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ChannelError::Api(format!("{} {}", status, body)));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageSender for MessengerChannel {
    async fn send_message(&self, recipient_id: &str, text: &str) -> Result<(), ChannelError> {
        MessengerChannel::send_message(self, recipient_id, text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(json: &str) -> MessagingEvent {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn parses_page_payload() {
        let payload: WebhookPayload = serde_json::from_str(
            r#"{
                "object": "page",
                "entry": [
                    { "id": "1", "time": 1, "messaging": [
                        { "sender": { "id": "42" }, "recipient": { "id": "7" },
                          "message": { "mid": "m1", "text": "Hi" } }
                    ] },
                    { "id": "2" }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(payload.object, PAGE_OBJECT);
        assert_eq!(payload.entry.len(), 2);
        assert!(payload.entry[1].messaging.is_empty());
        assert_eq!(
            payload.entry[0].messaging[0].to_inbound(),
            Some(InboundEvent {
                sender_id: "42".to_string(),
                kind: EventKind::Message {
                    text: "Hi".to_string()
                },
            })
        );
    }

    #[test]
    fn message_takes_precedence_over_postback() {
        let e = event(
            r#"{ "sender": { "id": "1" }, "message": { "text": "x" }, "postback": { "payload": "GET_STARTED_PAYLOAD" } }"#,
        );
        assert!(matches!(
            e.to_inbound().map(|i| i.kind),
            Some(EventKind::Message { .. })
        ));
    }

    #[test]
    fn attachment_only_message_has_empty_text() {
        let e = event(r#"{ "sender": { "id": "1" }, "message": { "attachments": [] } }"#);
        assert_eq!(
            e.to_inbound().map(|i| i.kind),
            Some(EventKind::Message {
                text: String::new()
            })
        );
    }

    #[test]
    fn events_without_sender_or_content_are_skipped() {
        assert_eq!(event(r#"{ "message": { "text": "x" } }"#).to_inbound(), None);
        assert_eq!(
            event(r#"{ "sender": { "id": "1" }, "read": { "watermark": 1 } }"#).to_inbound(),
            None
        );
    }

    #[test]
    fn messages_url_uses_version() {
        let channel =
            MessengerChannel::new("https://graph.example/", "v16.0", "t", Duration::from_secs(5)).unwrap();
        assert_eq!(channel.messages_url(), "https://graph.example/v16.0/me/messages");
    }
}
