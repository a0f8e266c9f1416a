//! Frame-slot bookkeeping independent of the device

use crate::config::MAX_FRAMES_IN_FLIGHT;

/// Index of the current frame in flight, cycling modulo [`MAX_FRAMES_IN_FLIGHT`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCounter {
    current: usize,
    presented: u64,
}

impl FrameCounter {
    /// Counter at slot 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Current slot
    pub fn current(&self) -> usize {
        self.current
    }

    /// Frames completed since creation
    pub fn presented(&self) -> u64 {
        self.presented
    }

    /// Move to the next slot
    pub fn advance(&mut self) -> usize {
        self.current = (self.current + 1) % MAX_FRAMES_IN_FLIGHT;
        self.presented += 1;
        self.current
    }

    /// Back to slot 0
    pub fn reset(&mut self) {
        self.current = 0;
    }
}

/// Coalesces resize signals into at most one pending recreation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResizeTracker {
    pending: bool,
    signals: u32,
}

impl ResizeTracker {
    /// Nothing pending
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a resize; repeated calls before [`ResizeTracker::take_pending`] collapse
    pub fn require(&mut self) {
        self.pending = true;
        self.signals = self.signals.saturating_add(1);
    }

    /// Whether a recreation is pending
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Consume the pending flag, returning whether it was set
    pub fn take_pending(&mut self) -> bool {
        let pending = self.pending;
        self.clear();
        pending
    }

    /// Drop any pending request, e.g. after a recreation triggered elsewhere
    pub fn clear(&mut self) {
        self.pending = false;
        self.signals = 0;
    }

    /// Signals received since the last clear
    pub fn signals(&self) -> u32 {
        self.signals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_wraps_at_frames_in_flight() {
        let mut counter = FrameCounter::new();
        let seen: Vec<usize> = (0..MAX_FRAMES_IN_FLIGHT * 3).map(|_| counter.advance()).collect();

        for (i, &slot) in seen.iter().enumerate() {
            assert_eq!(slot, (i + 1) % MAX_FRAMES_IN_FLIGHT);
            assert!(slot < MAX_FRAMES_IN_FLIGHT);
        }
        assert_eq!(counter.presented(), (MAX_FRAMES_IN_FLIGHT * 3) as u64);
    }

    #[test]
    fn counter_keeps_cycling_across_recreation() {
        let mut counter = FrameCounter::new();
        counter.advance();
        // Recreating render data does not touch the counter
        let before = counter.current();
        let mut tracker = ResizeTracker::new();
        tracker.require();
        assert!(tracker.take_pending());
        assert_eq!(counter.current(), before);
        assert_eq!(counter.advance(), (before + 1) % MAX_FRAMES_IN_FLIGHT);
    }

    #[test]
    fn counter_reset() {
        let mut counter = FrameCounter::new();
        counter.advance();
        counter.reset();
        assert_eq!(counter.current(), 0);
    }

    #[test]
    fn resize_signals_coalesce() {
        let mut tracker = ResizeTracker::new();
        for _ in 0..5 {
            tracker.require();
        }
        assert_eq!(tracker.signals(), 5);
        assert!(tracker.take_pending());
        assert!(!tracker.take_pending());
        assert!(!tracker.is_pending());
    }

    #[test]
    fn clear_drops_request() {
        let mut tracker = ResizeTracker::new();
        tracker.require();
        tracker.clear();
        assert!(!tracker.take_pending());
    }
}
