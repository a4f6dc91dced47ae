//! Core rate limiter implementation.

use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace, warn};

use super::clock::{self, Timestamp};
use super::window::SlidingWindow;
use crate::error::{Result, SlidegateError};

/// A per-key sliding window rate limiter.
///
/// Each key may have at most `max_requests` admitted events within any
/// trailing `window_size` interval. History is cleaned up lazily on every
/// call for the key being touched; there is no background sweep.
///
/// This struct is thread-safe and can be shared across multiple tasks. Calls
/// for one key are serialized on that key's shard, so `record` checks and
/// appends atomically.
pub struct RateLimiter {
    /// Admitted event history indexed by key
    history: DashMap<String, SlidingWindow>,
    /// Length of the trailing window
    window_size: Duration,
    /// `window_size` in seconds, used for timestamp arithmetic
    window_secs: f64,
    /// Maximum admitted events per key per window
    max_requests: u32,
}

impl RateLimiter {
    /// Create a new rate limiter.
    ///
    /// Returns [`SlidegateError::InvalidLimit`] if `window_size` is zero or
    /// `max_requests` is zero.
    pub fn new(window_size: Duration, max_requests: u32) -> Result<Self> {
        if window_size.is_zero() {
            return Err(SlidegateError::InvalidLimit(
                "window size must be greater than zero".to_string(),
            ));
        }
        if max_requests == 0 {
            return Err(SlidegateError::InvalidLimit(
                "max_requests must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            history: DashMap::new(),
            window_size,
            window_secs: window_size.as_secs_f64(),
            max_requests,
        })
    }

    /// Create a new rate limiter from a window length in seconds.
    pub fn from_secs(window_secs: f64, max_requests: u32) -> Result<Self> {
        if !(window_secs.is_finite() && window_secs > 0.0) {
            return Err(SlidegateError::InvalidLimit(format!(
                "window size must be a positive number of seconds, got {}",
                window_secs
            )));
        }
        let window_size = Duration::try_from_secs_f64(window_secs)
            .map_err(|e| SlidegateError::InvalidLimit(e.to_string()))?;
        Self::new(window_size, max_requests)
    }

    /// Whether `key` may act now.
    pub fn can_send(&self, key: &str) -> bool {
        self.can_send_at(key, clock::now())
    }

    /// Whether `key` may act at `now`.
    ///
    /// Expired history for the key is discarded, but no event is recorded.
    /// A non-finite `now` is never admitted and leaves history untouched.
    pub fn can_send_at(&self, key: &str, now: Timestamp) -> bool {
        if !now.is_finite() {
            warn!(key = %key, now = now, "Ignoring non-finite timestamp");
            return false;
        }

        match self.history.entry(key.to_owned()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().evict_expired(now, self.window_secs);
                if entry.get().is_empty() {
                    entry.remove();
                    debug!(key = %key, "Window drained, key removed");
                    return true;
                }

                let count = entry.get().len();
                trace!(key = %key, count = count, limit = self.max_requests, "Checking rate limit");
                count < self.capacity()
            }
            Entry::Vacant(_) => true,
        }
    }

    /// Record an event for `key` now if it is admitted.
    ///
    /// Returns `true` if the event was admitted and recorded.
    pub fn record(&self, key: &str) -> bool {
        self.record_at(key, clock::now())
    }

    /// Record an event for `key` at `now` if it is admitted.
    ///
    /// Cleanup, the admission check and the append happen under one lock on
    /// the key, so concurrent callers can never exceed `max_requests`.
    /// A non-finite `now` is rejected without touching history.
    pub fn record_at(&self, key: &str, now: Timestamp) -> bool {
        if !now.is_finite() {
            warn!(key = %key, now = now, "Ignoring non-finite timestamp");
            return false;
        }

        match self.history.entry(key.to_owned()) {
            Entry::Occupied(mut entry) => {
                let window = entry.get_mut();
                window.evict_expired(now, self.window_secs);

                let count = window.len();
                if count < self.capacity() {
                    window.push(now);
                    trace!(key = %key, count = count + 1, "Event recorded");
                    true
                } else {
                    debug!(
                        key = %key,
                        count = count,
                        limit = self.max_requests,
                        "Rate limit exceeded"
                    );
                    false
                }
            }
            Entry::Vacant(entry) => {
                debug!(key = %key, "Creating new sliding window");
                let mut window = SlidingWindow::new();
                window.push(now);
                entry.insert(window);
                true
            }
        }
    }

    /// How long `key` must wait before it may act again.
    pub fn time_until_next_allowed(&self, key: &str) -> Duration {
        self.time_until_next_allowed_at(key, clock::now())
    }

    /// How long `key` must wait, as seen from `now`, before it may act again.
    ///
    /// Zero when the key is below capacity. Otherwise the time until the
    /// oldest event in the window expires, never negative. Waits too long
    /// for a [`Duration`] saturate at [`Duration::MAX`], which is also the
    /// answer for a non-finite `now`.
    pub fn time_until_next_allowed_at(&self, key: &str, now: Timestamp) -> Duration {
        if !now.is_finite() {
            warn!(key = %key, now = now, "Ignoring non-finite timestamp");
            return Duration::MAX;
        }

        match self.history.entry(key.to_owned()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().evict_expired(now, self.window_secs);
                if entry.get().is_empty() {
                    entry.remove();
                    debug!(key = %key, "Window drained, key removed");
                    return Duration::ZERO;
                }

                let window = entry.get();
                if window.len() < self.capacity() {
                    return Duration::ZERO;
                }

                window.oldest().map_or(Duration::ZERO, |oldest| {
                    let wait = (oldest + self.window_secs) - now;
                    Duration::try_from_secs_f64(wait.max(0.0)).unwrap_or(Duration::MAX)
                })
            }
            Entry::Vacant(_) => Duration::ZERO,
        }
    }

    /// The trailing window length.
    pub fn window_size(&self) -> Duration {
        self.window_size
    }

    /// Maximum admitted events per key per window.
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Number of events currently held for `key`, without cleanup.
    pub fn history_len(&self, key: &str) -> usize {
        self.history.get(key).map_or(0, |window| window.len())
    }

    /// Number of keys with live history.
    ///
    /// Keys whose events have all expired are only dropped when they are
    /// next touched, so this may include idle keys.
    pub fn tracked_keys(&self) -> usize {
        self.history.len()
    }

    /// Drop all history.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.history.clear();
    }

    fn capacity(&self) -> usize {
        self.max_requests as usize
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("window_size", &self.window_size)
            .field("max_requests", &self.max_requests)
            .field("tracked_keys", &self.history.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const T0: Timestamp = 1_000.0;

    fn limiter(window_secs: u64, max_requests: u32) -> RateLimiter {
        RateLimiter::new(Duration::from_secs(window_secs), max_requests).unwrap()
    }

    fn assert_secs(actual: Duration, expected: f64) {
        let diff = (actual.as_secs_f64() - expected).abs();
        assert!(diff < 1e-6, "expected {}s, got {:?}", expected, actual);
    }

    #[test]
    fn test_rejects_zero_window() {
        let result = RateLimiter::new(Duration::ZERO, 1);
        assert!(matches!(result, Err(SlidegateError::InvalidLimit(_))));
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let result = RateLimiter::new(Duration::from_secs(10), 0);
        assert!(matches!(result, Err(SlidegateError::InvalidLimit(_))));
    }

    #[test]
    fn test_from_secs_validation() {
        assert!(RateLimiter::from_secs(-1.0, 1).is_err());
        assert!(RateLimiter::from_secs(0.0, 1).is_err());
        assert!(RateLimiter::from_secs(f64::NAN, 1).is_err());
        assert!(RateLimiter::from_secs(f64::INFINITY, 1).is_err());

        let limiter = RateLimiter::from_secs(0.5, 3).unwrap();
        assert_eq!(limiter.window_size(), Duration::from_millis(500));
        assert_eq!(limiter.max_requests(), 3);
    }

    #[test]
    fn test_reference_scenario() {
        let limiter = limiter(10, 1);

        assert!(limiter.record_at("A", 0.0));
        assert!(!limiter.record_at("A", 0.0));
        assert_secs(limiter.time_until_next_allowed_at("A", 0.0), 10.0);

        assert!(limiter.can_send_at("A", 10.1));
        assert!(limiter.record_at("A", 10.1));
        assert!(limiter.record_at("B", 10.1));
    }

    #[test]
    fn test_event_exactly_window_old_still_counts() {
        let limiter = limiter(10, 1);
        assert!(limiter.record_at("user", T0));

        assert!(!limiter.can_send_at("user", T0 + 10.0));
        assert!(!limiter.record_at("user", T0 + 10.0));
        assert_eq!(limiter.time_until_next_allowed_at("user", T0 + 10.0), Duration::ZERO);

        assert!(limiter.record_at("user", T0 + 10.001));
    }

    #[test]
    fn test_capacity_within_window() {
        let limiter = limiter(60, 5);

        for i in 0..5 {
            assert!(limiter.record_at("api", T0 + i as f64), "request {} should pass", i);
        }
        assert!(!limiter.record_at("api", T0 + 5.0));
        assert_eq!(limiter.history_len("api"), 5);
    }

    #[test]
    fn test_capacity_bound_over_any_trailing_window() {
        let window = 2.0;
        let max = 3;
        let limiter = RateLimiter::from_secs(window, max).unwrap();

        let admitted: Vec<Timestamp> = (0..200)
            .map(|i| T0 + i as f64 * 0.3)
            .filter(|&at| limiter.record_at("k", at))
            .collect();

        assert!(!admitted.is_empty());
        for &end in &admitted {
            let in_window = admitted
                .iter()
                .filter(|&&at| at <= end && end - at <= window)
                .count();
            assert!(in_window <= max as usize, "{} events in window ending at {}", in_window, end);
        }
    }

    #[test]
    fn test_release_after_oldest_expires() {
        let limiter = limiter(10, 1);
        assert!(limiter.record_at("k", T0));

        assert!(!limiter.record_at("k", T0 + 9.9));
        assert_secs(limiter.time_until_next_allowed_at("k", T0 + 9.9), 0.1);

        assert!(limiter.record_at("k", T0 + 10.05));
    }

    #[test]
    fn test_wait_uses_oldest_event() {
        let limiter = limiter(10, 2);
        assert!(limiter.record_at("k", T0));
        assert!(limiter.record_at("k", T0 + 4.0));

        assert_secs(limiter.time_until_next_allowed_at("k", T0 + 5.0), 5.0);

        // The oldest expires first, then the key waits on the second event.
        assert!(limiter.record_at("k", T0 + 10.5));
        assert_secs(limiter.time_until_next_allowed_at("k", T0 + 11.0), 3.0);
    }

    #[test]
    fn test_can_send_does_not_consume_capacity() {
        let limiter = limiter(10, 2);
        assert!(limiter.record_at("k", T0));

        for _ in 0..10 {
            assert!(limiter.can_send_at("k", T0 + 1.0));
        }
        assert_eq!(limiter.history_len("k"), 1);
        assert!(limiter.record_at("k", T0 + 1.0));
        assert!(!limiter.can_send_at("k", T0 + 1.0));
    }

    #[test]
    fn test_zero_wait_when_unthrottled() {
        let limiter = limiter(10, 3);
        assert_eq!(limiter.time_until_next_allowed_at("fresh", T0), Duration::ZERO);

        assert!(limiter.record_at("k", T0));
        assert!(limiter.can_send_at("k", T0 + 1.0));
        assert_eq!(limiter.time_until_next_allowed_at("k", T0 + 1.0), Duration::ZERO);
    }

    #[test]
    fn test_wait_never_negative() {
        let limiter = limiter(5, 1);
        assert!(limiter.record_at("k", T0));

        for step in 0..100 {
            let now = T0 + step as f64 * 0.1;
            let wait = limiter.time_until_next_allowed_at("k", now);
            assert!(wait.as_secs_f64() >= 0.0);
            assert!(wait.as_secs_f64() <= 5.0);
        }
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = limiter(10, 1);
        assert!(limiter.record_at("k1", T0));
        assert!(!limiter.record_at("k1", T0));

        assert!(limiter.can_send_at("k2", T0));
        assert_eq!(limiter.time_until_next_allowed_at("k2", T0), Duration::ZERO);
        assert!(limiter.record_at("k2", T0));
        assert_eq!(limiter.history_len("k1"), 1);
    }

    #[test]
    fn test_drained_key_is_removed() {
        let limiter = limiter(1, 2);
        assert!(limiter.record_at("a", T0));
        assert!(limiter.record_at("b", T0));
        assert_eq!(limiter.tracked_keys(), 2);

        assert!(limiter.can_send_at("a", T0 + 2.0));
        assert_eq!(limiter.tracked_keys(), 1);

        assert_eq!(limiter.time_until_next_allowed_at("b", T0 + 2.0), Duration::ZERO);
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn test_queries_do_not_create_keys() {
        let limiter = limiter(10, 1);
        assert!(limiter.can_send_at("ghost", T0));
        assert_eq!(limiter.time_until_next_allowed_at("ghost", T0), Duration::ZERO);
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn test_rejected_record_leaves_state_unchanged() {
        let limiter = limiter(10, 1);
        assert!(limiter.record_at("k", T0));
        assert!(!limiter.record_at("k", T0 + 3.0));

        assert_eq!(limiter.history_len("k"), 1);
        assert_secs(limiter.time_until_next_allowed_at("k", T0 + 3.0), 7.0);
    }

    #[test]
    fn test_non_finite_timestamps_leave_key_free() {
        let limiter = limiter(10, 1);

        assert!(!limiter.record_at("k", f64::NAN));
        assert!(!limiter.record_at("k", f64::INFINITY));
        assert!(!limiter.record_at("k", f64::NEG_INFINITY));
        assert_eq!(limiter.tracked_keys(), 0);

        assert!(limiter.can_send_at("k", 1e6));
        assert_eq!(limiter.time_until_next_allowed_at("k", 1e6), Duration::ZERO);
        assert!(limiter.record_at("k", 1e6));
        assert_eq!(limiter.history_len("k"), 1);
    }

    #[test]
    fn test_non_finite_queries_do_not_change_history() {
        let limiter = limiter(10, 1);
        assert!(limiter.record_at("k", T0));

        assert!(!limiter.can_send_at("k", f64::NAN));
        assert_eq!(limiter.time_until_next_allowed_at("k", f64::NAN), Duration::MAX);
        assert_eq!(limiter.history_len("k"), 1);
        assert_secs(limiter.time_until_next_allowed_at("k", T0 + 4.0), 6.0);
    }

    #[test]
    fn test_huge_wait_saturates() {
        let limiter = limiter(10, 1);
        assert!(limiter.record_at("k", T0));

        assert_eq!(limiter.time_until_next_allowed_at("k", -1e20), Duration::MAX);
        assert!(!limiter.can_send_at("k", -1e20));
        assert_eq!(limiter.history_len("k"), 1);
    }

    #[test]
    fn test_wall_clock_operations() {
        let limiter = limiter(60, 1);
        assert!(limiter.can_send("live"));
        assert!(limiter.record("live"));
        assert!(!limiter.record("live"));

        let wait = limiter.time_until_next_allowed("live");
        assert!(wait > Duration::from_secs(59));
        assert!(wait <= Duration::from_secs(60));
    }

    #[test]
    fn test_clear() {
        let limiter = limiter(10, 1);
        limiter.record_at("a", T0);
        limiter.record_at("b", T0);
        assert_eq!(limiter.tracked_keys(), 2);

        limiter.clear();
        assert_eq!(limiter.tracked_keys(), 0);
        assert!(limiter.record_at("a", T0));
    }

    #[test]
    fn test_concurrent_record_never_exceeds_capacity() {
        let limiter = Arc::new(limiter(60, 10));
        let admitted = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let limiter = Arc::clone(&limiter);
                let admitted = Arc::clone(&admitted);
                scope.spawn(move || {
                    for _ in 0..50 {
                        if limiter.record_at("shared", T0) {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(admitted.load(Ordering::SeqCst), 10);
        assert_eq!(limiter.history_len("shared"), 10);
    }

    #[tokio::test]
    async fn test_shared_across_tasks() {
        let limiter = Arc::new(limiter(60, 3));

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { limiter.record_at(&format!("user-{}", i % 2), T0) })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 6);
        assert!(!limiter.can_send_at("user-0", T0));
        assert!(!limiter.can_send_at("user-1", T0));
    }
}
