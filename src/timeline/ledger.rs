//! Bounded ledger of seen message ids and content fingerprints
//!
//! Tracking entries are evicted FIFO past the size caps so a long session
//! never grows without bound. Eviction only forgets *tracking* state; a
//! message already admitted to the timeline stays there.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::models::Fingerprint;

pub struct DedupLedger {
    max_ids: usize,
    max_fingerprints: usize,
    ids: HashSet<i64>,
    id_order: VecDeque<i64>,
    /// Fingerprint -> last time content with this key was seen.
    fingerprints: HashMap<Fingerprint, DateTime<Utc>>,
    fp_order: VecDeque<Fingerprint>,
}

impl DedupLedger {
    pub fn new(max_ids: usize, max_fingerprints: usize) -> Self {
        Self {
            max_ids,
            max_fingerprints,
            ids: HashSet::new(),
            id_order: VecDeque::new(),
            fingerprints: HashMap::new(),
            fp_order: VecDeque::new(),
        }
    }

    pub fn contains_id(&self, id: i64) -> bool {
        self.ids.contains(&id)
    }

    /// Register an id. Re-registering an already-tracked id is a no-op,
    /// so a retry cannot double-count against the cap.
    pub fn register_id(&mut self, id: i64) {
        if !self.ids.insert(id) {
            return;
        }
        self.id_order.push_back(id);
        while self.id_order.len() > self.max_ids {
            if let Some(oldest) = self.id_order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    /// True if content with this fingerprint was seen within `window` of
    /// `at`. The comparison is absolute-valued because a late-arriving
    /// history copy can carry an *earlier* timestamp than the live echo
    /// already registered.
    pub fn fingerprint_seen_within(
        &self,
        fp: &Fingerprint,
        at: DateTime<Utc>,
        window: Duration,
    ) -> bool {
        match self.fingerprints.get(fp) {
            Some(&seen) => (at - seen).abs() <= window,
            None => false,
        }
    }

    /// Record (or refresh) a fingerprint sighting.
    pub fn register_fingerprint(&mut self, fp: Fingerprint, at: DateTime<Utc>) {
        if self.fingerprints.insert(fp.clone(), at).is_some() {
            return;
        }
        self.fp_order.push_back(fp);
        while self.fp_order.len() > self.max_fingerprints {
            if let Some(oldest) = self.fp_order.pop_front() {
                self.fingerprints.remove(&oldest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(s: &str) -> Fingerprint {
        Fingerprint::new(1, s)
    }

    #[test]
    fn test_id_tracking_and_eviction() {
        let mut ledger = DedupLedger::new(3, 3);
        for id in 1..=3 {
            ledger.register_id(id);
        }
        assert!(ledger.contains_id(1));

        // Fourth id evicts the oldest.
        ledger.register_id(4);
        assert!(!ledger.contains_id(1));
        assert!(ledger.contains_id(2));
        assert!(ledger.contains_id(4));
    }

    #[test]
    fn test_reregister_does_not_duplicate_order() {
        let mut ledger = DedupLedger::new(2, 2);
        ledger.register_id(1);
        ledger.register_id(1);
        ledger.register_id(2);
        // Cap is 2; both survive because the re-register was a no-op.
        assert!(ledger.contains_id(1));
        assert!(ledger.contains_id(2));
    }

    #[test]
    fn test_fingerprint_window() {
        let mut ledger = DedupLedger::new(10, 10);
        let t0 = Utc::now();
        ledger.register_fingerprint(fp("hi"), t0);

        let window = Duration::seconds(5);
        assert!(ledger.fingerprint_seen_within(&fp("hi"), t0 + Duration::seconds(4), window));
        assert!(!ledger.fingerprint_seen_within(&fp("hi"), t0 + Duration::seconds(6), window));
        // Earlier-timestamped history copy still matches.
        assert!(ledger.fingerprint_seen_within(&fp("hi"), t0 - Duration::seconds(4), window));
        assert!(!ledger.fingerprint_seen_within(&fp("other"), t0, window));
    }

    #[test]
    fn test_fingerprint_eviction() {
        let mut ledger = DedupLedger::new(10, 2);
        let t0 = Utc::now();
        ledger.register_fingerprint(fp("a"), t0);
        ledger.register_fingerprint(fp("b"), t0);
        ledger.register_fingerprint(fp("c"), t0);
        let window = Duration::seconds(60);
        assert!(!ledger.fingerprint_seen_within(&fp("a"), t0, window));
        assert!(ledger.fingerprint_seen_within(&fp("b"), t0, window));
        assert!(ledger.fingerprint_seen_within(&fp("c"), t0, window));
    }
}
