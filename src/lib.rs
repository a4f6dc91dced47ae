//! Slidegate - Per-key Sliding Window Admission Control
//!
//! This crate decides whether an event tagged with a key (a user, a client,
//! an API token) may proceed, tracks admitted events per key, and reports how
//! long a rejected caller must wait. Each key may have at most `max_requests`
//! admitted events within any trailing `window_size` interval.
//!
//! ```
//! use std::time::Duration;
//! use slidegate::ratelimit::RateLimiter;
//!
//! let limiter = RateLimiter::new(Duration::from_secs(10), 1).unwrap();
//! assert!(limiter.record("alice"));
//! assert!(!limiter.record("alice"));
//! assert!(limiter.record("bob"));
//! assert!(limiter.time_until_next_allowed("alice") > Duration::ZERO);
//! ```

pub mod config;
pub mod demo;
pub mod error;
pub mod ratelimit;
