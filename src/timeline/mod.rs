//! Reconciliation engine: the canonical, deduplicated, time-ordered
//! timeline
//!
//! This is the single writer. Three producers feed it — the paginated
//! history loader, the push connection's inbound stream, and the outbound
//! pipeline's optimistic inserts — and only the ingest functions here get
//! to decide whether a candidate message is new.

pub mod ledger;

use chrono::Duration;

use crate::config::DedupConfig;
use crate::models::{DeliveryStatus, Direction, Message};
use ledger::DedupLedger;

/// What happened to one ingested candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// New message, inserted at its sort-correct position.
    Admitted,
    /// Same id already present; statuses merged, missing fields
    /// backfilled. `true` if anything visible changed.
    DuplicateId(bool),
    /// Near-duplicate suppressed by the fingerprint window.
    DuplicateContent,
}

/// Result of a bulk ingest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub inserted: usize,
    pub updated: usize,
}

pub struct Timeline {
    entries: Vec<Message>,
    ledger: DedupLedger,
    outbound_window: Duration,
    inbound_window: Duration,
}

impl Timeline {
    pub fn new(cfg: &DedupConfig) -> Self {
        Self {
            entries: Vec::new(),
            ledger: DedupLedger::new(cfg.max_ids, cfg.max_fingerprints),
            outbound_window: Duration::seconds(cfg.outbound_window_secs),
            inbound_window: Duration::seconds(cfg.inbound_window_secs),
        }
    }

    /// Ingest one candidate from any producer.
    ///
    /// Exact-id check first (the primary echo-suppression path), then the
    /// fingerprint window, then admission. The window is picked by the
    /// candidate's direction: self-echoes arrive within about a second,
    /// while re-delivered history can trail a live push by tens of
    /// seconds.
    pub fn ingest(&mut self, candidate: Message) -> IngestOutcome {
        if let Some(idx) = self.position_of(candidate.id) {
            let changed = merge_into(&mut self.entries[idx], &candidate);
            return IngestOutcome::DuplicateId(changed);
        }
        if self.ledger.contains_id(candidate.id) {
            tracing::debug!("dropping echo of message {}", candidate.id);
            return IngestOutcome::DuplicateId(false);
        }

        let window = match candidate.direction {
            Direction::Outbound => self.outbound_window,
            Direction::Inbound => self.inbound_window,
        };
        let fp = candidate.fingerprint();
        if self
            .ledger
            .fingerprint_seen_within(&fp, candidate.sent_at, window)
        {
            tracing::debug!(
                "dropping near-duplicate of message {} (content match)",
                candidate.id
            );
            return IngestOutcome::DuplicateContent;
        }

        self.ledger.register_id(candidate.id);
        self.ledger.register_fingerprint(fp, candidate.sent_at);
        self.insert_sorted(candidate);
        IngestOutcome::Admitted
    }

    /// Bulk ingest for a history page. Statuses already advanced by live
    /// events are never clobbered; see [`IngestOutcome::DuplicateId`].
    pub fn ingest_batch(&mut self, batch: Vec<Message>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for msg in batch {
            match self.ingest(msg) {
                IngestOutcome::Admitted => outcome.inserted += 1,
                IngestOutcome::DuplicateId(true) => outcome.updated += 1,
                _ => {}
            }
        }
        outcome
    }

    /// Admit a locally-sent message.
    ///
    /// Returns `false` when an identical fingerprint was sent within the
    /// outbound window — the fast double-submit case. Otherwise the id and
    /// fingerprint are registered and the message inserted in one step, so
    /// a server echo arriving right after transmit is already recognized.
    pub fn admit_outbound(&mut self, msg: Message) -> bool {
        let fp = msg.fingerprint();
        if self
            .ledger
            .fingerprint_seen_within(&fp, msg.sent_at, self.outbound_window)
        {
            tracing::debug!("dropping double-submit of \"{}\"", msg.body);
            return false;
        }
        self.ledger.register_id(msg.id);
        self.ledger.register_fingerprint(fp, msg.sent_at);
        self.insert_sorted(msg);
        true
    }

    /// Set a message's delivery status directly. Only the outbound
    /// pipeline uses this, for its own send attempts.
    pub fn mark_status(&mut self, id: i64, status: DeliveryStatus) -> bool {
        match self.position_of(id) {
            Some(idx) => {
                self.entries[idx].delivery_status = status;
                true
            }
            None => false,
        }
    }

    /// Re-register an id in the ledger (retry path; eviction may have
    /// dropped the tracking entry).
    pub fn reregister_id(&mut self, id: i64) {
        self.ledger.register_id(id);
    }

    pub fn get(&self, id: i64) -> Option<&Message> {
        self.position_of(id).map(|idx| &self.entries[idx])
    }

    /// Read-only view, ascending by `sent_at`.
    pub fn entries(&self) -> &[Message] {
        &self.entries
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position_of(&self, id: i64) -> Option<usize> {
        self.entries.iter().position(|m| m.id == id)
    }

    /// Insert keeping `sent_at` ascending; ties go after existing equals,
    /// preserving insertion order. A late history batch lands earlier in
    /// the list without disturbing already-admitted entries.
    fn insert_sorted(&mut self, msg: Message) {
        let idx = self.entries.partition_point(|m| m.sent_at <= msg.sent_at);
        self.entries.insert(idx, msg);
    }
}

/// Merge a duplicate-id candidate into the existing entry. Content is
/// immutable after admission; only the status may advance and missing
/// fields may be backfilled.
fn merge_into(existing: &mut Message, candidate: &Message) -> bool {
    let mut changed = false;
    if existing.delivery_status.advanced_by(candidate.delivery_status) {
        existing.delivery_status = candidate.delivery_status;
        changed = true;
    }
    if existing.sender_name.is_empty() && !candidate.sender_name.is_empty() {
        existing.sender_name = candidate.sender_name.clone();
        changed = true;
    }
    if existing.attachments.is_empty() && !candidate.attachments.is_empty() {
        existing.attachments = candidate.attachments.clone();
        changed = true;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn cfg() -> DedupConfig {
        DedupConfig::default()
    }

    fn msg(id: i64, sender: i64, body: &str, secs: i64) -> Message {
        Message {
            id,
            body: body.to_string(),
            sender_id: sender,
            sender_name: format!("User {}", sender),
            sent_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            direction: if sender == 1 {
                Direction::Outbound
            } else {
                Direction::Inbound
            },
            delivery_status: DeliveryStatus::Sent,
            attachments: Vec::new(),
        }
    }

    #[test]
    fn test_idempotent_ingest() {
        let mut tl = Timeline::new(&cfg());
        let m = msg(1, 2, "hello", 0);
        assert_eq!(tl.ingest(m.clone()), IngestOutcome::Admitted);
        assert_eq!(tl.ingest(m), IngestOutcome::DuplicateId(false));
        assert_eq!(tl.len(), 1);
    }

    #[test]
    fn test_fingerprint_suppression_different_ids() {
        let mut tl = Timeline::new(&cfg());
        assert_eq!(tl.ingest(msg(1, 2, "Hi there", 0)), IngestOutcome::Admitted);
        // Different id, same normalized content, 3s later: suppressed.
        assert_eq!(
            tl.ingest(msg(2, 2, "hi  THERE", 3)),
            IngestOutcome::DuplicateContent
        );
        assert_eq!(tl.len(), 1);
    }

    #[test]
    fn test_inbound_window_wider_than_outbound() {
        let mut tl = Timeline::new(&cfg());
        // Inbound duplicate 30s apart is still inside the inbound window.
        tl.ingest(msg(1, 2, "history copy", 0));
        assert_eq!(
            tl.ingest(msg(2, 2, "history copy", 30)),
            IngestOutcome::DuplicateContent
        );

        // Outbound 30s apart is far outside the ~1s echo window.
        tl.ingest(msg(10, 1, "sent twice", 100));
        assert_eq!(tl.ingest(msg(11, 1, "sent twice", 130)), IngestOutcome::Admitted);
    }

    #[test]
    fn test_order_invariant_with_ties() {
        let mut tl = Timeline::new(&cfg());
        tl.ingest(msg(1, 2, "a", 10));
        tl.ingest(msg(2, 2, "b", 5));
        tl.ingest(msg(3, 2, "c", 10)); // tie with id=1, inserts after it
        tl.ingest(msg(4, 2, "d", 1));

        let ids: Vec<i64> = tl.entries().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![4, 2, 1, 3]);
        for pair in tl.entries().windows(2) {
            assert!(pair[0].sent_at <= pair[1].sent_at);
        }
    }

    #[test]
    fn test_history_live_race_keeps_advanced_status() {
        let mut tl = Timeline::new(&cfg());

        // Live push admits id=42 as delivered first.
        let mut live = msg(42, 1, "on my way", 0);
        live.delivery_status = DeliveryStatus::Delivered;
        tl.ingest(live);

        // History copy of the same id still says sent: ignored.
        let outcome = tl.ingest_batch(vec![msg(42, 1, "on my way", 0)]);
        assert_eq!(outcome.inserted, 0);
        assert_eq!(tl.get(42).unwrap().delivery_status, DeliveryStatus::Delivered);

        // And the other order: history first, live receipt advances it.
        tl.ingest(msg(43, 1, "second", 10));
        let mut receipt = msg(43, 1, "second", 10);
        receipt.delivery_status = DeliveryStatus::Delivered;
        assert_eq!(tl.ingest(receipt), IngestOutcome::DuplicateId(true));
        assert_eq!(tl.get(43).unwrap().delivery_status, DeliveryStatus::Delivered);
    }

    #[test]
    fn test_echo_suppression_after_outbound_admit() {
        let mut tl = Timeline::new(&cfg());
        let sent = msg(100, 1, "ping", 0);
        assert!(tl.admit_outbound(sent.clone()));

        // Server echo with the same id: recognized, nothing downgraded.
        tl.mark_status(100, DeliveryStatus::Delivered);
        assert_eq!(tl.ingest(sent), IngestOutcome::DuplicateId(false));
        assert_eq!(tl.len(), 1);
        assert_eq!(tl.get(100).unwrap().delivery_status, DeliveryStatus::Delivered);
    }

    #[test]
    fn test_double_submit_guard() {
        let mut tl = Timeline::new(&cfg());
        assert!(tl.admit_outbound(msg(1, 1, "hi", 0)));
        // Same content, new provisional id, within the outbound window.
        assert!(!tl.admit_outbound(msg(2, 1, "hi", 0)));
        assert_eq!(tl.len(), 1);
    }

    #[test]
    fn test_batch_backfills_missing_fields() {
        let mut tl = Timeline::new(&cfg());
        let mut bare = msg(5, 2, "see attachment", 0);
        bare.sender_name = String::new();
        tl.ingest(bare);

        let mut full = msg(5, 2, "see attachment", 0);
        full.attachments.push(crate::models::Attachment {
            id: 9,
            kind: crate::models::AttachmentKind::Image,
            url: "https://cdn.example/9.png".into(),
            name: "screen.png".into(),
            size: 1024,
        });
        let outcome = tl.ingest_batch(vec![full]);
        assert_eq!(outcome.updated, 1);

        let merged = tl.get(5).unwrap();
        assert_eq!(merged.sender_name, "User 2");
        assert_eq!(merged.attachments.len(), 1);
    }

    #[test]
    fn test_ledger_eviction_keeps_timeline_entries() {
        let mut tl = Timeline::new(&DedupConfig {
            max_ids: 2,
            ..DedupConfig::default()
        });
        for i in 0..5 {
            tl.ingest(msg(i, 2, &format!("msg {}", i), i * 120));
        }
        // Tracking entries were evicted but the messages persist, and the
        // timeline itself still rejects duplicates by id.
        assert_eq!(tl.len(), 5);
        assert_eq!(
            tl.ingest(msg(0, 2, "msg 0", 0)),
            IngestOutcome::DuplicateId(false)
        );
        assert_eq!(tl.len(), 5);
    }
}
