//! Inbound event from Messenger: delivered to the dispatcher for routing.

/// What the user did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A text message (raw, before trimming). Empty when the message had no text (e.g. an attachment).
    Message { text: String },
    /// A button postback.
    Postback { payload: String },
}

/// A single messaging event, valid only for the request that carried it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub sender_id: String,
    pub kind: EventKind,
}
