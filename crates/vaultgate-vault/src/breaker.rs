//! Circuit breaker guarding vault calls.
//!
//! The breaker trips when the failure rate over a sliding window of recent
//! calls crosses a threshold, short-circuits while open, and probes with a
//! single call once the cool-down elapses.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use vaultgate_types::Clock;

/// Breaker tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Number of recent calls considered.
    pub window_size: usize,
    /// Failure ratio within the window that trips the breaker.
    pub failure_threshold: f64,
    /// Minimum calls in the window before the breaker may trip.
    pub min_calls: usize,
    /// How long the breaker stays open before probing.
    pub open_cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            failure_threshold: 0.5,
            min_calls: 20,
            open_cooldown: Duration::from_secs(30),
        }
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls flow normally.
    Closed,
    /// Calls are short-circuited.
    Open,
    /// Cool-down elapsed; one probe call is allowed through.
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    window: VecDeque<bool>,
    state: BreakerState,
    opened_at: Option<DateTime<Utc>>,
    probe_in_flight: bool,
}

/// Sliding-window circuit breaker.
#[derive(Clone)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Arc<Mutex<Inner>>,
    clock: Arc<dyn Clock>,
    name: &'static str,
}

impl CircuitBreaker {
    /// Create a breaker named for its upstream (used in logs only).
    pub fn new(name: &'static str, config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(Inner {
                window: VecDeque::with_capacity(config.window_size),
                state: BreakerState::Closed,
                opened_at: None,
                probe_in_flight: false,
            })),
            clock,
            name,
        }
    }

    /// Whether a call may proceed right now. Transitions open → half-open
    /// when the cool-down has elapsed; in half-open only one probe passes.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| self.clock.now() - at)
                    .unwrap_or_else(chrono::Duration::zero);
                if elapsed.to_std().unwrap_or(Duration::ZERO) >= self.config.open_cooldown {
                    debug!(breaker = self.name, "cool-down elapsed, entering half-open");
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                debug!(breaker = self.name, "probe succeeded, closing breaker");
                inner.state = BreakerState::Closed;
                inner.window.clear();
                inner.opened_at = None;
                inner.probe_in_flight = false;
            }
            _ => self.push_outcome(&mut inner, true),
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                warn!(breaker = self.name, "probe failed, reopening breaker");
                inner.state = BreakerState::Open;
                inner.opened_at = Some(self.clock.now());
                inner.probe_in_flight = false;
            }
            BreakerState::Open => {}
            BreakerState::Closed => {
                self.push_outcome(&mut inner, false);
                if self.should_trip(&inner) {
                    warn!(breaker = self.name, "failure threshold crossed, opening breaker");
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(self.clock.now());
                }
            }
        }
    }

    /// Current state (open → half-open transition is *not* forced here;
    /// only [`allow`](Self::allow) moves the state machine).
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    fn push_outcome(&self, inner: &mut Inner, success: bool) {
        if inner.window.len() == self.config.window_size {
            inner.window.pop_front();
        }
        inner.window.push_back(success);
    }

    fn should_trip(&self, inner: &Inner) -> bool {
        if inner.window.len() < self.config.min_calls {
            return false;
        }
        let failures = inner.window.iter().filter(|ok| !**ok).count();
        failures as f64 / inner.window.len() as f64 >= self.config.failure_threshold
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultgate_types::ManualClock;

    fn breaker_with_clock() -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::from_system();
        let breaker = CircuitBreaker::new("vault", BreakerConfig::default(), Arc::new(clock.clone()));
        (breaker, clock)
    }

    fn drive_to_open(breaker: &CircuitBreaker) {
        for _ in 0..10 {
            breaker.record_success();
        }
        for _ in 0..10 {
            breaker.record_failure();
        }
    }

    #[test]
    fn trips_at_half_failures_over_full_window() {
        let (breaker, _clock) = breaker_with_clock();
        drive_to_open(&breaker);
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.allow());
    }

    #[test]
    fn does_not_trip_below_min_calls() {
        let (breaker, _clock) = breaker_with_clock();
        for _ in 0..10 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_after_cooldown_allows_single_probe() {
        let (breaker, clock) = breaker_with_clock();
        drive_to_open(&breaker);
        clock.advance(chrono::Duration::seconds(31));

        assert!(breaker.allow());
        // Second caller must wait for the probe's outcome.
        assert!(!breaker.allow());
    }

    #[test]
    fn probe_success_closes_breaker() {
        let (breaker, clock) = breaker_with_clock();
        drive_to_open(&breaker);
        clock.advance(chrono::Duration::seconds(31));
        assert!(breaker.allow());
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.allow());
    }

    #[test]
    fn probe_failure_reopens_breaker() {
        let (breaker, clock) = breaker_with_clock();
        drive_to_open(&breaker);
        clock.advance(chrono::Duration::seconds(31));
        assert!(breaker.allow());
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.allow());

        // A fresh cool-down applies after reopening.
        clock.advance(chrono::Duration::seconds(31));
        assert!(breaker.allow());
    }
}
