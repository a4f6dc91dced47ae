//! Per-key event history for sliding window rate limiting.

use std::collections::VecDeque;

use super::clock::Timestamp;

/// The admitted event timestamps of a single key, oldest first.
///
/// A window holds no synchronization of its own; the owning
/// [`RateLimiter`](super::RateLimiter) serializes access per key.
#[derive(Debug, Clone, Default)]
pub struct SlidingWindow {
    events: VecDeque<Timestamp>,
}

impl SlidingWindow {
    /// Create an empty window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every event older than `window_secs` as seen from `now`.
    ///
    /// An event exactly `window_secs` old is kept. Returns the number of
    /// events removed.
    pub fn evict_expired(&mut self, now: Timestamp, window_secs: f64) -> usize {
        let mut evicted = 0;
        while let Some(&front) = self.events.front() {
            if now - front > window_secs {
                self.events.pop_front();
                evicted += 1;
            } else {
                break;
            }
        }
        evicted
    }

    /// Append an event at `at`.
    ///
    /// If `at` is earlier than the newest event (the wall clock stepped
    /// back) the newest timestamp is reused so the sequence stays sorted.
    pub fn push(&mut self, at: Timestamp) {
        let at = match self.events.back() {
            Some(&newest) if newest > at => newest,
            _ => at,
        };
        self.events.push_back(at);
    }

    /// The oldest event still held.
    pub fn oldest(&self) -> Option<Timestamp> {
        self.events.front().copied()
    }

    /// The newest event still held.
    pub fn newest(&self) -> Option<Timestamp> {
        self.events.back().copied()
    }

    /// Number of events held.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether no events are held.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
