//! Messaging channel: Facebook Messenger (page webhooks in, Send API out).
//!
//! Inbound webhook payloads are parsed into [`InboundEvent`]s for the dispatcher.
//! Outbound replies go through the [`MessageSender`] trait so the relay can be tested without Graph API.

mod inbound;
mod messenger;
mod sender;

pub use inbound::{EventKind, InboundEvent};
pub use messenger::{
    MessagingEvent, MessengerChannel, WebhookEntry, WebhookPayload, PAGE_OBJECT,
};
pub use sender::{ChannelError, MessageSender};
