//! Viewport policy: auto-scroll or raise a "new messages" affordance
//!
//! Decides, for each timeline growth event, whether the consumer should
//! jump to the newest message or be shown a non-intrusive flag. The
//! consumer reports its scroll position; the policy never measures
//! anything itself.

use crate::config::ViewportConfig;

/// What the rendering layer should do after a timeline mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAction {
    /// Jump to the newest message.
    ScrollToBottom,
    /// Leave the scroll position alone and show the "new messages" flag.
    NotifyNewMessages,
    /// Nothing visible changed (a resync, or no growth).
    None,
}

pub struct ViewportPolicy {
    near_bottom_px: u32,
    scroll_from_bottom: u32,
    new_messages: bool,
}

impl ViewportPolicy {
    pub fn new(cfg: &ViewportConfig) -> Self {
        Self {
            near_bottom_px: cfg.near_bottom_px,
            scroll_from_bottom: 0,
            new_messages: false,
        }
    }

    /// Decide on a growth event. The initial bulk load always scrolls
    /// unconditionally; the near-bottom rule applies only to incremental
    /// growth after that.
    pub fn on_growth(&mut self, inserted: usize, initial: bool) -> ScrollAction {
        if initial {
            self.new_messages = false;
            return ScrollAction::ScrollToBottom;
        }
        if inserted == 0 {
            return ScrollAction::None;
        }
        if self.scroll_from_bottom <= self.near_bottom_px {
            self.new_messages = false;
            ScrollAction::ScrollToBottom
        } else {
            self.new_messages = true;
            ScrollAction::NotifyNewMessages
        }
    }

    /// Consumer reported a scroll position, in pixels above the bottom.
    pub fn on_scroll(&mut self, from_bottom_px: u32) {
        self.scroll_from_bottom = from_bottom_px;
    }

    /// Consumer explicitly reached the bottom: clears the flag.
    pub fn on_bottom_reached(&mut self) {
        self.scroll_from_bottom = 0;
        self.new_messages = false;
    }

    pub fn has_new_messages(&self) -> bool {
        self.new_messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ViewportPolicy {
        ViewportPolicy::new(&ViewportConfig::default())
    }

    #[test]
    fn test_initial_load_always_scrolls() {
        let mut p = policy();
        // Even when scrolled far up, the initial load jumps to bottom.
        p.on_scroll(5_000);
        assert_eq!(p.on_growth(50, true), ScrollAction::ScrollToBottom);
        assert!(!p.has_new_messages());
    }

    #[test]
    fn test_near_bottom_auto_scrolls() {
        let mut p = policy();
        p.on_growth(50, true);
        p.on_scroll(40); // within the 100px threshold
        assert_eq!(p.on_growth(1, false), ScrollAction::ScrollToBottom);
        assert!(!p.has_new_messages());
    }

    #[test]
    fn test_scrolled_up_raises_flag_until_bottom() {
        let mut p = policy();
        p.on_growth(50, true);
        p.on_scroll(400);
        assert_eq!(p.on_growth(2, false), ScrollAction::NotifyNewMessages);
        assert!(p.has_new_messages());

        // Flag persists over further growth, clears on explicit bottom.
        assert_eq!(p.on_growth(1, false), ScrollAction::NotifyNewMessages);
        p.on_bottom_reached();
        assert!(!p.has_new_messages());
        assert_eq!(p.on_growth(1, false), ScrollAction::ScrollToBottom);
    }

    #[test]
    fn test_resync_changes_nothing() {
        let mut p = policy();
        p.on_growth(50, true);
        p.on_scroll(400);
        assert_eq!(p.on_growth(0, false), ScrollAction::None);
        assert!(!p.has_new_messages());
    }
}
