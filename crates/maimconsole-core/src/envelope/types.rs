//! Message envelope types exchanged with MaimCore.

use serde_json::Value;

/// Label shown for inbound messages that do not carry a sender.
pub const GENERIC_SENDER_LABEL: &str = "MaimCore";

/// One message as exchanged with the remote service.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub message_id: String,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub platform: String,
    pub sender: Option<Sender>,
    pub group: Option<Group>,
    pub segments: Vec<Segment>,
}

/// Author of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub user_id: String,
    pub nickname: String,
}

/// Group context. Both fields are always set; a private chat has no `Group`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub group_id: String,
    pub group_name: String,
}

/// One content part of a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    /// Any segment kind this adapter does not render (images, emoji, ...).
    Other { kind: String, data: Value },
}

impl Segment {
    /// Wire name of the segment kind.
    pub fn kind(&self) -> &str {
        match self {
            Self::Text(_) => "text",
            Self::Other { kind, .. } => kind,
        }
    }
}

/// Session-fixed metadata stamped on every outbound envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub platform: String,
    pub sender: Sender,
    pub group: Option<Group>,
}

impl Identity {
    /// Whether outbound messages simulate a private conversation.
    pub const fn is_private(&self) -> bool {
        self.group.is_none()
    }
}
