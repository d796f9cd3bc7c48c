//! Per-app circuit breaker.
//!
//! Guards calls to the Scaling Engine: a consistently failing app trips
//! its breaker open, suppressing further triggers until an exponential
//! (capped) backoff elapses, after which a single half-open trial
//! decides whether to close again. Time is injected by the caller so
//! transitions are deterministic under test.

use std::time::Duration;

use tracing::{debug, warn};

use crate::config::BreakerConfig;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Requests flow normally.
    Closed,
    /// Requests are suppressed until backoff elapses.
    Open,
    /// One trial request is in flight.
    HalfOpen,
}

/// Failure-isolation state machine for a single app.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: BreakerState,
    consecutive_failures: u32,
    failure_threshold: u32,
    /// Backoff applied to the current open period.
    backoff: Duration,
    initial_backoff: Duration,
    max_backoff: Duration,
    /// When the breaker last opened (unix nanos).
    opened_at: i64,
    /// When the current half-open trial was granted (unix nanos).
    half_open_since: i64,
}

impl CircuitBreaker {
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            failure_threshold: config.consecutive_failure_threshold,
            backoff: config.initial_backoff(),
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            opened_at: 0,
            half_open_since: 0,
        }
    }

    /// Whether a request may proceed at `now` (unix nanos).
    ///
    /// In the open state this also performs the Open → HalfOpen
    /// transition once backoff has elapsed; the half-open trial is
    /// granted to exactly one caller.
    pub fn allow_request(&mut self, now: i64) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => {
                // A trial whose outcome never came back (e.g. the
                // trigger was dropped for lack of data) must not wedge
                // the breaker; re-arm after another backoff period.
                if now >= self.half_open_since + self.backoff.as_nanos() as i64 {
                    debug!("half-open trial outcome lost, granting another");
                    self.half_open_since = now;
                    true
                } else {
                    false
                }
            }
            BreakerState::Open => {
                if now >= self.opened_at + self.backoff.as_nanos() as i64 {
                    debug!("breaker half-open, allowing one trial");
                    self.state = BreakerState::HalfOpen;
                    self.half_open_since = now;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call: close and reset backoff.
    pub fn record_success(&mut self) {
        self.state = BreakerState::Closed;
        self.consecutive_failures = 0;
        self.backoff = self.initial_backoff;
    }

    /// Record a failed call at `now` (unix nanos).
    pub fn record_failure(&mut self, now: i64) {
        self.consecutive_failures += 1;
        match self.state {
            BreakerState::HalfOpen => {
                // Failed trial: reopen with doubled backoff.
                self.backoff = (self.backoff * 2).min(self.max_backoff);
                self.opened_at = now;
                self.state = BreakerState::Open;
                warn!(backoff_secs = self.backoff.as_secs(), "breaker reopened");
            }
            BreakerState::Closed => {
                if self.consecutive_failures >= self.failure_threshold {
                    self.opened_at = now;
                    self.state = BreakerState::Open;
                    warn!(
                        failures = self.consecutive_failures,
                        backoff_secs = self.backoff.as_secs(),
                        "breaker opened"
                    );
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: i64 = 1_000_000_000;

    fn breaker(threshold: u32, initial_secs: u64, max_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(&BreakerConfig {
            consecutive_failure_threshold: threshold,
            initial_backoff_secs: initial_secs,
            max_backoff_secs: max_secs,
        })
    }

    #[test]
    fn closed_allows_requests() {
        let mut b = breaker(3, 30, 600);
        assert!(b.allow_request(0));
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn opens_after_exactly_threshold_failures() {
        let mut b = breaker(3, 30, 600);
        b.record_failure(0);
        b.record_failure(0);
        assert_eq!(b.state(), BreakerState::Closed);
        b.record_failure(0);
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.allow_request(SEC));
    }

    #[test]
    fn half_open_after_backoff_allows_one_trial() {
        let mut b = breaker(1, 30, 600);
        b.record_failure(0);
        assert!(!b.allow_request(29 * SEC));
        assert!(b.allow_request(30 * SEC));
        assert_eq!(b.state(), BreakerState::HalfOpen);
        // Second caller during the trial is refused.
        assert!(!b.allow_request(31 * SEC));
    }

    #[test]
    fn lost_half_open_trial_is_rearmed_after_backoff() {
        let mut b = breaker(1, 30, 600);
        b.record_failure(0);
        assert!(b.allow_request(30 * SEC));
        // The trial's outcome never comes back.
        assert!(!b.allow_request(59 * SEC));
        assert!(b.allow_request(60 * SEC));
        assert_eq!(b.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn successful_trial_closes_and_resets_backoff() {
        let mut b = breaker(1, 30, 600);
        b.record_failure(0);
        assert!(b.allow_request(30 * SEC));
        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.consecutive_failures(), 0);

        // Backoff is back at the initial value for the next trip.
        b.record_failure(100 * SEC);
        assert!(!b.allow_request(129 * SEC));
        assert!(b.allow_request(130 * SEC));
    }

    #[test]
    fn failed_trial_reopens_with_doubled_backoff() {
        let mut b = breaker(1, 30, 600);
        b.record_failure(0);
        assert!(b.allow_request(30 * SEC));
        b.record_failure(30 * SEC);
        assert_eq!(b.state(), BreakerState::Open);
        // Doubled: 60s from the reopen point.
        assert!(!b.allow_request(89 * SEC));
        assert!(b.allow_request(90 * SEC));
    }

    #[test]
    fn backoff_is_capped() {
        let mut b = breaker(1, 30, 100);
        let mut now = 0;
        b.record_failure(now);
        // Trip repeatedly; backoff would be 30 → 60 → 120 uncapped.
        for _ in 0..3 {
            now += 1000 * SEC;
            assert!(b.allow_request(now));
            b.record_failure(now);
        }
        assert!(!b.allow_request(now + 99 * SEC));
        assert!(b.allow_request(now + 100 * SEC));
    }
}
