//! Per-peer offer rate limiting.

use std::time::{Duration, Instant};

/// Sliding-window counter for inbound offers from one peer. The window
/// resets when more than its duration has passed since the first counted
/// offer.
#[derive(Debug)]
pub struct OfferWindow {
    count: u32,
    window_start: Instant,
}

impl Default for OfferWindow {
    fn default() -> Self {
        Self {
            count: 0,
            window_start: Instant::now(),
        }
    }
}

impl OfferWindow {
    /// Count one offer. Returns false when the peer is over budget; the
    /// offer must then be dropped silently.
    pub fn allow(&mut self, limit: u32, window: Duration) -> bool {
        let now = Instant::now();
        if now.duration_since(self.window_start) > window {
            self.count = 0;
            self.window_start = now;
        }
        if self.count >= limit {
            return false;
        }
        self.count += 1;
        true
    }
}
