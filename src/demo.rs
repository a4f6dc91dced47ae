//! Synthetic traffic driver.
//!
//! Sends rounds of keyed events through a [`RateLimiter`] with a random delay
//! between events and reports which ones were admitted. Delays are either
//! slept for real or applied to a virtual clock, which makes runs fast and
//! (with a seed) reproducible.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::DemoConfig;
use crate::ratelimit::{clock, RateLimiter, Timestamp};

/// How delays between events are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayMode {
    /// Sleep on the runtime and read the wall clock
    Real,
    /// Advance a virtual clock; nothing sleeps
    Simulated,
}

/// The result of sending one event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventOutcome {
    /// Round the event belongs to, starting at 1
    pub round: u32,
    /// Message number, continuous across rounds, starting at 1
    pub message_id: u32,
    /// The key the event was sent for
    pub key: String,
    /// Whether the limiter admitted the event
    pub admitted: bool,
    /// Wait reported for the key right after the event, in seconds
    pub wait_secs: f64,
}

impl EventOutcome {
    /// The reported wait as a duration.
    pub fn wait(&self) -> Duration {
        Duration::try_from_secs_f64(self.wait_secs).unwrap_or(Duration::MAX)
    }
}

impl fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Message {:2} | User {} | ", self.message_id, self.key)?;
        if self.admitted {
            write!(f, "accepted")
        } else {
            write!(f, "rejected (wait {:.1}s)", self.wait_secs)
        }
    }
}

/// Progress notifications emitted while the demo runs.
#[derive(Debug, Clone)]
pub enum DemoEvent {
    /// A round is about to start
    RoundStarted { round: u32 },
    /// An event was sent
    Sent(EventOutcome),
    /// The driver is pausing between rounds
    Pausing { pause: Duration },
}

/// Per-round totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RoundSummary {
    /// Round number, starting at 1
    pub round: u32,
    /// Events admitted in this round
    pub admitted: u32,
    /// Events rejected in this round
    pub rejected: u32,
}

/// Summary of a complete demo run.
#[derive(Debug, Clone, Serialize)]
pub struct DemoReport {
    /// When the run started (RFC 3339)
    pub started_at: String,
    /// Whether delays advanced a virtual clock
    pub simulated: bool,
    /// Window length of the limiter under test
    pub window_size_secs: f64,
    /// Capacity of the limiter under test
    pub max_requests: u32,
    /// Totals for each round, in order
    pub rounds: Vec<RoundSummary>,
    /// Events admitted across all rounds
    pub admitted: u32,
    /// Events rejected across all rounds
    pub rejected: u32,
    /// Every event, in the order sent
    pub outcomes: Vec<EventOutcome>,
}

impl DemoReport {
    /// Render the report as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Drives synthetic keyed traffic through a rate limiter.
pub struct TrafficSimulator {
    limiter: Arc<RateLimiter>,
    config: DemoConfig,
    mode: DelayMode,
    rng: StdRng,
    virtual_now: Timestamp,
}

impl TrafficSimulator {
    /// Create a simulator for `limiter`.
    ///
    /// Uses [`DelayMode::Simulated`] when `config.simulated` is set and seeds
    /// the delay generator from `config.seed` when present.
    pub fn new(limiter: Arc<RateLimiter>, config: DemoConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mode = if config.simulated {
            DelayMode::Simulated
        } else {
            DelayMode::Real
        };

        Self {
            limiter,
            config,
            mode,
            rng,
            virtual_now: clock::now(),
        }
    }

    /// Start the virtual clock at `start` instead of the current time.
    ///
    /// Only affects [`DelayMode::Simulated`].
    pub fn starting_at(mut self, start: Timestamp) -> Self {
        self.virtual_now = start;
        self
    }

    /// The delay mode in use.
    pub fn mode(&self) -> DelayMode {
        self.mode
    }

    /// The key that message `message_id` is sent for.
    ///
    /// A `users` of zero is treated as one.
    pub fn key_for(message_id: u32, users: u32) -> String {
        ((message_id % users.max(1)) + 1).to_string()
    }

    /// Run every configured round, reporting progress to `on_event`.
    pub async fn run<F>(&mut self, mut on_event: F) -> DemoReport
    where
        F: FnMut(&DemoEvent),
    {
        let started_at = chrono::Utc::now().to_rfc3339();
        let per_round = self.config.messages_per_round;
        let mut rounds = Vec::with_capacity(self.config.rounds as usize);
        let mut outcomes = Vec::new();

        info!(
            rounds = self.config.rounds,
            messages_per_round = per_round,
            users = self.config.users,
            mode = ?self.mode,
            "Starting demo traffic"
        );

        for round in 1..=self.config.rounds {
            if round > 1 {
                let pause = Duration::from_millis(self.config.round_pause_ms);
                on_event(&DemoEvent::Pausing { pause });
                self.delay(pause).await;
            }

            on_event(&DemoEvent::RoundStarted { round });
            let mut summary = RoundSummary {
                round,
                ..RoundSummary::default()
            };

            // Saturates for configs that skipped validation; ids stop at u32::MAX.
            let first_id = (round - 1).saturating_mul(per_round).saturating_add(1);
            for message_id in first_id..first_id.saturating_add(per_round) {
                let outcome = self.send(round, message_id);
                if outcome.admitted {
                    summary.admitted += 1;
                } else {
                    summary.rejected += 1;
                }
                on_event(&DemoEvent::Sent(outcome.clone()));
                outcomes.push(outcome);

                let delay = self.next_delay();
                self.delay(delay).await;
            }

            info!(
                round = round,
                admitted = summary.admitted,
                rejected = summary.rejected,
                "Round complete"
            );
            rounds.push(summary);
        }

        let admitted = rounds.iter().map(|r| r.admitted).sum();
        let rejected = rounds.iter().map(|r| r.rejected).sum();

        DemoReport {
            started_at,
            simulated: self.mode == DelayMode::Simulated,
            window_size_secs: self.limiter.window_size().as_secs_f64(),
            max_requests: self.limiter.max_requests(),
            rounds,
            admitted,
            rejected,
            outcomes,
        }
    }

    /// Send one event and ask for the key's wait right after.
    fn send(&self, round: u32, message_id: u32) -> EventOutcome {
        let key = Self::key_for(message_id, self.config.users);
        let (admitted, wait) = match self.mode {
            DelayMode::Real => (
                self.limiter.record(&key),
                self.limiter.time_until_next_allowed(&key),
            ),
            DelayMode::Simulated => (
                self.limiter.record_at(&key, self.virtual_now),
                self.limiter.time_until_next_allowed_at(&key, self.virtual_now),
            ),
        };

        debug!(
            message_id = message_id,
            key = %key,
            admitted = admitted,
            wait_secs = wait.as_secs_f64(),
            "Event sent"
        );

        EventOutcome {
            round,
            message_id,
            key,
            admitted,
            wait_secs: wait.as_secs_f64(),
        }
    }

    fn next_delay(&mut self) -> Duration {
        let millis = self
            .rng
            .gen_range(self.config.min_delay_ms..=self.config.max_delay_ms);
        Duration::from_millis(millis)
    }

    async fn delay(&mut self, duration: Duration) {
        match self.mode {
            DelayMode::Real => tokio::time::sleep(duration).await,
            DelayMode::Simulated => self.virtual_now += duration.as_secs_f64(),
        }
    }
}
