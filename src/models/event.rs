//! Wire payloads for the push channel
//!
//! Inbound payloads are loosely shaped (everything optional) and coerced
//! into the strict [`Message`] model at the ingest boundary. Malformed
//! payloads are rejected there rather than propagated partially into the
//! timeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::models::message::{
    Attachment, DeliveryStatus, Direction, Message,
};

/// Tagged push event as carried over the duplex channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PushEvent {
    Message(WireMessage),
    Typing(WireTyping),
    Join(WireJoin),
}

/// Loose inbound/outbound message shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireMessage {
    pub id: Option<i64>,
    pub body: Option<String>,
    pub sender_id: Option<i64>,
    pub sender_name: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub attachments: Vec<Attachment>,
    /// Advisory only; direction is derived from the sender comparison.
    pub outgoing: Option<bool>,
    pub status: Option<DeliveryStatus>,
    // Recipient routing, used only for filtering in multi-admin deployments.
    pub recipient_id: Option<i64>,
    pub is_admin_recipient: Option<bool>,
}

/// Peer-typing signal. Carries no content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireTyping {
    pub sender_id: Option<i64>,
    pub recipient_id: Option<i64>,
    pub is_admin_recipient: Option<bool>,
}

/// A peer joined the conversation. Surfaced as a notification, never
/// admitted to the timeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireJoin {
    pub sender_id: Option<i64>,
    pub sender_name: Option<String>,
}

impl WireMessage {
    /// Routing filter: whether this payload is for the local consumer.
    ///
    /// Admin-recipient payloads are broadcast to every support console, so
    /// they always pass. A payload explicitly addressed to another user is
    /// dropped before ingest.
    pub fn addressed_to(&self, local_user_id: i64) -> bool {
        if self.is_admin_recipient == Some(true) {
            return true;
        }
        match self.recipient_id {
            Some(recipient) => recipient == local_user_id,
            None => true,
        }
    }

    /// Validate and coerce into the strict message shape.
    ///
    /// Requires `id`, `sender_id` and `sent_at`; a message with neither
    /// body text nor attachments is rejected too. Direction comes from the
    /// sender comparison, never from the `outgoing` flag.
    pub fn into_message(self, local_user_id: i64) -> Result<Message, ChatError> {
        let id = self
            .id
            .ok_or_else(|| ChatError::Validation("payload missing id".into()))?;
        let sender_id = self
            .sender_id
            .ok_or_else(|| ChatError::Validation(format!("payload {} missing senderId", id)))?;
        let sent_at = self
            .sent_at
            .ok_or_else(|| ChatError::Validation(format!("payload {} missing sentAt", id)))?;

        let body = self.body.unwrap_or_default();
        if body.trim().is_empty() && self.attachments.is_empty() {
            return Err(ChatError::Validation(format!("payload {} has no content", id)));
        }

        let direction = if sender_id == local_user_id {
            Direction::Outbound
        } else {
            Direction::Inbound
        };

        let sender_name = self
            .sender_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("User {}", sender_id));

        Ok(Message {
            id,
            body,
            sender_id,
            sender_name,
            sent_at,
            direction,
            delivery_status: self.status.unwrap_or(DeliveryStatus::Sent),
            attachments: self.attachments,
        })
    }

    /// Wire shape for an outbound send. Payload content is carried
    /// unchanged so a retry re-transmits the exact original frame.
    pub fn from_message(msg: &Message) -> Self {
        Self {
            id: Some(msg.id),
            body: Some(msg.body.clone()),
            sender_id: Some(msg.sender_id),
            sender_name: Some(msg.sender_name.clone()),
            sent_at: Some(msg.sent_at),
            attachments: msg.attachments.clone(),
            outgoing: Some(msg.is_outbound()),
            status: None,
            recipient_id: None,
            is_admin_recipient: Some(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(id: i64, sender: i64, body: &str) -> WireMessage {
        WireMessage {
            id: Some(id),
            body: Some(body.to_string()),
            sender_id: Some(sender),
            sent_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    #[test]
    fn test_direction_from_sender_not_flag() {
        let mut w = wire(1, 42, "hi");
        // Flag lies; sender comparison wins.
        w.outgoing = Some(false);
        let msg = w.into_message(42).unwrap();
        assert_eq!(msg.direction, Direction::Outbound);

        let mut w = wire(2, 7, "hi");
        w.outgoing = Some(true);
        let msg = w.into_message(42).unwrap();
        assert_eq!(msg.direction, Direction::Inbound);
    }

    #[test]
    fn test_rejects_missing_fields() {
        let mut w = wire(1, 42, "hi");
        w.id = None;
        assert!(w.into_message(42).is_err());

        let mut w = wire(1, 42, "hi");
        w.sent_at = None;
        assert!(w.into_message(42).is_err());

        let w = wire(1, 42, "   ");
        assert!(w.into_message(42).is_err());
    }

    #[test]
    fn test_sender_name_fallback() {
        let mut w = wire(1, 7, "hi");
        w.sender_name = Some("  ".to_string());
        let msg = w.into_message(42).unwrap();
        assert_eq!(msg.sender_name, "User 7");
    }

    #[test]
    fn test_routing_filter() {
        let mut w = wire(1, 7, "hi");
        assert!(w.addressed_to(42));

        w.recipient_id = Some(9);
        assert!(!w.addressed_to(42));
        assert!(w.addressed_to(9));

        // Admin broadcast passes regardless of recipient id.
        w.is_admin_recipient = Some(true);
        assert!(w.addressed_to(42));
    }

    #[test]
    fn test_push_event_tagging() {
        let json = r#"{"type":"typing","senderId":7}"#;
        match serde_json::from_str::<PushEvent>(json).unwrap() {
            PushEvent::Typing(t) => assert_eq!(t.sender_id, Some(7)),
            other => panic!("unexpected event: {:?}", other),
        }

        let json = r#"{"type":"message","id":3,"body":"hey","senderId":7,"sentAt":"2024-05-01T12:00:00Z"}"#;
        match serde_json::from_str::<PushEvent>(json).unwrap() {
            PushEvent::Message(m) => assert_eq!(m.id, Some(3)),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
