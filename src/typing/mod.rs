//! Typing signals: debounced local emission, expiring peer flag
//!
//! A pure state machine over injected instants, independent of the
//! reconciliation engine. The session supplies `Instant::now()` and wires
//! the expiry deadline into its event loop.

use std::time::{Duration, Instant};

use crate::config::TypingConfig;

pub struct TypingCoordinator {
    cooldown: Duration,
    expiry: Duration,
    last_emit: Option<Instant>,
    peer_until: Option<Instant>,
}

impl TypingCoordinator {
    pub fn new(cfg: &TypingConfig) -> Self {
        Self {
            cooldown: Duration::from_secs(cfg.cooldown_secs),
            expiry: Duration::from_secs(cfg.expiry_secs),
            last_emit: None,
            peer_until: None,
        }
    }

    /// Whether a keystroke with this draft should emit a typing event.
    /// Empty drafts never emit; during the cooldown nothing emits, which
    /// keeps a fast typist from flooding the channel.
    pub fn should_emit(&mut self, draft: &str, now: Instant) -> bool {
        if draft.trim().is_empty() {
            return false;
        }
        if let Some(last) = self.last_emit {
            if now.duration_since(last) < self.cooldown {
                return false;
            }
        }
        self.last_emit = Some(now);
        true
    }

    /// A typing event arrived from the peer: raise the flag and restart
    /// the expiry timer.
    pub fn on_peer_typing(&mut self, now: Instant) {
        self.peer_until = Some(now + self.expiry);
    }

    pub fn peer_typing(&self, now: Instant) -> bool {
        matches!(self.peer_until, Some(until) if now < until)
    }

    /// Deadline the session should sleep until, if any.
    pub fn peer_deadline(&self) -> Option<Instant> {
        self.peer_until
    }

    /// Clear the flag if it has expired. Returns `true` when the flag
    /// actually flipped off.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.peer_until {
            Some(until) if now >= until => {
                self.peer_until = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator() -> TypingCoordinator {
        TypingCoordinator::new(&TypingConfig::default())
    }

    #[test]
    fn test_local_cooldown() {
        let mut t = coordinator();
        let t0 = Instant::now();
        assert!(t.should_emit("h", t0));
        // Keystrokes inside the cooldown emit nothing.
        assert!(!t.should_emit("he", t0 + Duration::from_secs(1)));
        assert!(!t.should_emit("hel", t0 + Duration::from_secs(2)));
        // Cooldown elapsed.
        assert!(t.should_emit("hell", t0 + Duration::from_secs(3)));
    }

    #[test]
    fn test_empty_draft_never_emits() {
        let mut t = coordinator();
        assert!(!t.should_emit("", Instant::now()));
        assert!(!t.should_emit("   ", Instant::now()));
    }

    #[test]
    fn test_peer_flag_expires() {
        let mut t = coordinator();
        let t0 = Instant::now();
        assert!(!t.peer_typing(t0));

        t.on_peer_typing(t0);
        assert!(t.peer_typing(t0 + Duration::from_secs(2)));
        assert!(!t.peer_typing(t0 + Duration::from_secs(4)));

        assert!(!t.expire(t0 + Duration::from_secs(2)));
        assert!(t.expire(t0 + Duration::from_secs(3)));
        assert!(t.peer_deadline().is_none());
    }

    #[test]
    fn test_fresh_signal_restarts_expiry() {
        let mut t = coordinator();
        let t0 = Instant::now();
        t.on_peer_typing(t0);
        t.on_peer_typing(t0 + Duration::from_secs(2));
        // Still typing at t0+4 because the second signal restarted the timer.
        assert!(t.peer_typing(t0 + Duration::from_secs(4)));
        assert!(!t.peer_typing(t0 + Duration::from_secs(6)));
    }
}
