use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::UtcDateTime;

/// Runtime circuit state for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker thresholds and timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    #[serde(with = "crate::config::duration_secs")]
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            open_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<UtcDateTime>,
    /// Set while the single half-open trial is outstanding.
    trial_started_at: Option<UtcDateTime>,
}

impl Default for CircuitInner {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_started_at: None,
        }
    }
}

/// Thread-safe circuit breaker guarding one provider's upstream calls.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<CircuitInner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            inner: Mutex::new(CircuitInner::default()),
        }
    }

    /// Returns whether a call may proceed.
    ///
    /// Once `open_timeout` has elapsed an open circuit turns half-open and
    /// admits exactly one trial. Further callers are refused until the trial
    /// reports back, or until it has been outstanding for `open_timeout`, in
    /// which case it is presumed lost and a new trial is admitted.
    pub fn allow_request(&self) -> bool {
        let mut inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        let now = self.clock.now();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                let trial_free = inner
                    .trial_started_at
                    .map_or(true, |started| self.timeout_elapsed(started, now));
                if trial_free {
                    inner.trial_started_at = Some(now);
                }
                trial_free
            }
            CircuitState::Open => {
                let trial_due = inner
                    .opened_at
                    .is_some_and(|opened_at| self.timeout_elapsed(opened_at, now));

                if trial_due {
                    inner.state = CircuitState::HalfOpen;
                    inner.opened_at = None;
                    inner.trial_started_at = Some(now);
                    tracing::debug!("circuit half-open, allowing trial");
                }
                trial_due
            }
        }
    }

    fn timeout_elapsed(&self, since: UtcDateTime, now: UtcDateTime) -> bool {
        now >= since && (now - since).unsigned_abs() >= self.config.open_timeout
    }

    /// Frees the trial slot of an admitted call whose outcome says nothing
    /// about provider health, e.g. a rate limit.
    pub fn release_trial(&self) {
        let mut inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        inner.trial_started_at = None;
    }

    pub fn record_success(&self) {
        let mut inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        if inner.state != CircuitState::Closed {
            tracing::info!("circuit closed after successful call");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_started_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.trial_started_at = None;

        if inner.state == CircuitState::HalfOpen
            || (inner.state == CircuitState::Closed
                && inner.consecutive_failures >= self.config.failure_threshold)
        {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(self.clock.now());
            tracing::warn!(
                consecutive_failures = inner.consecutive_failures,
                "circuit opened"
            );
        }
    }

    pub fn state(&self) -> CircuitState {
        let inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        inner.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        let inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        inner.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn breaker(threshold: u32, open_secs: u64) -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            UtcDateTime::parse("2024-06-01T00:00:00Z").expect("valid"),
        ));
        let breaker = CircuitBreaker::with_clock(
            CircuitBreakerConfig {
                failure_threshold: threshold,
                open_timeout: Duration::from_secs(open_secs),
            },
            clock.clone(),
        );
        (breaker, clock)
    }

    #[test]
    fn opens_after_threshold_failures() {
        let (breaker, _clock) = breaker(2, 30);

        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn half_open_trial_after_timeout_then_closes_on_success() {
        let (breaker, clock) = breaker(1, 30);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance(time::Duration::seconds(29));
        assert!(!breaker.allow_request());

        clock.advance(time::Duration::seconds(1));
        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[test]
    fn failed_trial_reopens() {
        let (breaker, clock) = breaker(3, 10);
        for _ in 0..3 {
            breaker.record_failure();
        }
        clock.advance(time::Duration::seconds(10));
        assert!(breaker.allow_request());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn half_open_admits_a_single_trial() {
        let (breaker, clock) = breaker(1, 30);
        breaker.record_failure();
        clock.advance(time::Duration::seconds(30));

        assert!(breaker.allow_request());
        assert!(!breaker.allow_request());
        assert!(!breaker.allow_request());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn released_trial_admits_the_next_caller() {
        let (breaker, clock) = breaker(1, 30);
        breaker.record_failure();
        clock.advance(time::Duration::seconds(30));
        assert!(breaker.allow_request());

        breaker.release_trial();

        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.allow_request());
        assert!(!breaker.allow_request());
    }

    #[test]
    fn lost_trial_is_replaced_after_open_timeout() {
        let (breaker, clock) = breaker(1, 30);
        breaker.record_failure();
        clock.advance(time::Duration::seconds(30));
        assert!(breaker.allow_request());

        clock.advance(time::Duration::seconds(29));
        assert!(!breaker.allow_request());
        clock.advance(time::Duration::seconds(1));
        assert!(breaker.allow_request());
    }
}
