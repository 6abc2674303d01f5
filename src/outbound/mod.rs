//! Outbound pipeline building blocks
//!
//! Local-first send: the message is constructed and admitted optimistically
//! before the network hears about it. The session actor orchestrates the
//! actual transmit and failure marking; the pieces here are pure so the
//! double-submit and identity-preservation properties are testable without
//! a socket.

use chrono::{DateTime, Utc};

use crate::identity::Identity;
use crate::models::{Attachment, DeliveryStatus, Direction, Message, PushEvent, WireMessage};

/// Session-monotonic provisional id generator.
///
/// Ids are epoch-millis based so they are unique within a conversation and
/// roughly sortable, and strictly increasing even when two sends land in
/// the same millisecond.
pub struct ProvisionalIds {
    last: i64,
}

impl ProvisionalIds {
    pub fn new() -> Self {
        Self { last: 0 }
    }

    pub fn next(&mut self, now: DateTime<Utc>) -> i64 {
        let id = now.timestamp_millis().max(self.last + 1);
        self.last = id;
        id
    }
}

impl Default for ProvisionalIds {
    fn default() -> Self {
        Self::new()
    }
}

/// An empty send is silently rejected: no message, no error dialog.
pub fn sendable(body: &str, attachments: &[Attachment]) -> bool {
    !body.trim().is_empty() || !attachments.is_empty()
}

/// Build the optimistic local message for a send.
pub fn build_outbound(
    identity: &Identity,
    id: i64,
    body: String,
    attachments: Vec<Attachment>,
    sent_at: DateTime<Utc>,
) -> Message {
    Message {
        id,
        body,
        sender_id: identity.user_id.unwrap_or_default(),
        sender_name: identity.user_name.clone(),
        sent_at,
        direction: Direction::Outbound,
        delivery_status: DeliveryStatus::Sent,
        attachments,
    }
}

/// Serialize the wire frame for a message. A retry calls this on the
/// stored message, so the payload is byte-identical to the original send.
pub fn outbound_frame(msg: &Message) -> String {
    let event = PushEvent::Message(WireMessage::from_message(msg));
    // PushEvent serialization cannot fail: all fields are plain data.
    serde_json::to_string(&event).expect("push event serializes")
}

/// Wire frame for a local typing signal.
pub fn typing_frame(identity: &Identity) -> String {
    let event = PushEvent::Typing(crate::models::WireTyping {
        sender_id: identity.user_id,
        recipient_id: None,
        is_admin_recipient: Some(true),
    });
    serde_json::to_string(&event).expect("push event serializes")
}
