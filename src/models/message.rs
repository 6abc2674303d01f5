//! Canonical message model and content fingerprinting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether the local user authored the message.
///
/// Always derived from `sender_id == local_user_id`. Wire payloads carry an
/// `outgoing` flag as well, but it can disagree with the sender comparison
/// during identity-resolution races early in a session, so it is advisory
/// only and never trusted for this field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outbound,
    Inbound,
}

/// Delivery state of an outbound message. Meaningless for inbound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Seen,
    Failed,
}

impl DeliveryStatus {
    /// Progress rank for merge decisions. `Failed` ranks lowest so that a
    /// delivery receipt arriving after a local failure still advances it.
    fn rank(self) -> u8 {
        match self {
            DeliveryStatus::Failed => 0,
            DeliveryStatus::Pending => 1,
            DeliveryStatus::Sent => 2,
            DeliveryStatus::Delivered => 3,
            DeliveryStatus::Seen => 4,
        }
    }

    /// True if `other` represents strictly more progress than `self`.
    /// A history copy still reporting `sent` must not revert `delivered`.
    pub fn advanced_by(self, other: DeliveryStatus) -> bool {
        other.rank() > self.rank()
    }
}

/// Attachment kind as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    File,
}

/// A file or image attached to a message. The URL points at already
/// uploaded content; uploads happen before any message is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: i64,
    pub kind: AttachmentKind,
    pub url: String,
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

/// The canonical unit of the timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i64,
    /// Possibly empty if the message carries only attachments.
    pub body: String,
    pub sender_id: i64,
    pub sender_name: String,
    /// Source of truth for timeline ordering.
    pub sent_at: DateTime<Utc>,
    pub direction: Direction,
    pub delivery_status: DeliveryStatus,
    pub attachments: Vec<Attachment>,
}

impl Message {
    pub fn is_outbound(&self) -> bool {
        self.direction == Direction::Outbound
    }

    /// Dedup key for suppressing near-duplicates whose ids differ across
    /// sources (client-provisional vs. server-assigned).
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::new(self.sender_id, &self.body)
    }
}

/// Derived dedup key: sender plus normalized body. The coarse-time part of
/// the key is realized as a windowed last-seen comparison in the ledger,
/// which avoids missing duplicates that straddle a fixed bucket boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    sender_id: i64,
    body_key: String,
}

impl Fingerprint {
    pub fn new(sender_id: i64, body: &str) -> Self {
        Self {
            sender_id,
            body_key: normalize_body(body),
        }
    }
}

/// Normalize a body for fingerprinting: trim, collapse runs of whitespace,
/// case-fold. "Hi  there " and "hi there" are the same logical content.
pub fn normalize_body(body: &str) -> String {
    body.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_whitespace_and_case() {
        assert_eq!(normalize_body("  Hi   there \n"), "hi there");
        assert_eq!(normalize_body("hi there"), "hi there");
        assert_eq!(normalize_body(""), "");
    }

    #[test]
    fn test_fingerprint_equality() {
        assert_eq!(
            Fingerprint::new(7, "Hello  World"),
            Fingerprint::new(7, "hello world")
        );
        assert_ne!(Fingerprint::new(7, "hello"), Fingerprint::new(8, "hello"));
        assert_ne!(Fingerprint::new(7, "hello"), Fingerprint::new(7, "goodbye"));
    }

    #[test]
    fn test_status_rank_never_downgrades() {
        use DeliveryStatus::*;
        assert!(Sent.advanced_by(Delivered));
        assert!(Delivered.advanced_by(Seen));
        assert!(!Delivered.advanced_by(Sent));
        assert!(!Seen.advanced_by(Seen));
        // A receipt after a local failure still advances.
        assert!(Failed.advanced_by(Sent));
        assert!(!Sent.advanced_by(Failed));
    }
}
