//! Outbound send seam.

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("send request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("send api error: {0}")]
    Api(String),
}

/// Delivers one text message to a recipient. Callers treat delivery as best effort.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_message(&self, recipient_id: &str, text: &str) -> Result<(), ChannelError>;
}
