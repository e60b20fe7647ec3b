//! Circuit breaker in front of the J-Quants API.
//!
//! J-Quants answers abuse with HTTP 403 (account blocked for a while) and
//! throttling with 429, sometimes carrying `Retry-After`. Each trip reason gets
//! its own cooldown from [`BreakerPolicy`]. While open, requests are refused
//! locally and [`CircuitBreaker::open_reason`] says why.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Cooldowns applied per trip reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerPolicy {
    /// After HTTP 403.
    pub block_cooldown: Duration,
    /// After `failure_threshold` consecutive 429/5xx/connect failures.
    pub failure_cooldown: Duration,
    pub failure_threshold: u32,
    /// Cap on a server-sent `Retry-After`.
    pub max_retry_after: Duration,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            block_cooldown: Duration::from_secs(10 * 60),
            failure_cooldown: Duration::from_secs(60),
            failure_threshold: 3,
            max_retry_after: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripReason {
    /// HTTP 403 from the API.
    Blocked,
    /// HTTP 429 with a `Retry-After` the server asked us to honor.
    RetryAfter(Duration),
    /// Consecutive transient failures reached the threshold.
    RepeatedFailures(u32),
}

#[derive(Debug, Clone, Copy)]
enum State {
    Closed { consecutive_failures: u32 },
    Open { until: Instant, reason: TripReason },
}

/// Shared breaker guarding one upstream API.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<State>,
    policy: BreakerPolicy,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerPolicy::default())
    }
}

impl CircuitBreaker {
    pub fn new(policy: BreakerPolicy) -> Self {
        Self {
            state: Mutex::new(State::Closed {
                consecutive_failures: 0,
            }),
            policy: BreakerPolicy {
                failure_threshold: policy.failure_threshold.max(1),
                ..policy
            },
        }
    }

    pub fn policy(&self) -> &BreakerPolicy {
        &self.policy
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Plain counters only; a poisoned guard is still consistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether a request may be sent now. Closes the breaker once its cooldown is over.
    pub fn is_allowed(&self) -> bool {
        let mut state = self.lock();
        match *state {
            State::Closed { .. } => true,
            State::Open { until, reason } if Instant::now() >= until => {
                tracing::info!(?reason, "circuit breaker closed after cooldown");
                *state = State::Closed {
                    consecutive_failures: 0,
                };
                true
            }
            State::Open { .. } => false,
        }
    }

    pub fn record_success(&self) {
        let mut state = self.lock();
        if let State::Closed {
            consecutive_failures,
        } = &mut *state
        {
            *consecutive_failures = 0;
        }
    }

    /// Count a transient failure (5xx, connect error, 429 without `Retry-After`).
    pub fn record_failure(&self) {
        let mut state = self.lock();
        let State::Closed {
            consecutive_failures,
        } = &mut *state
        else {
            return;
        };
        *consecutive_failures += 1;
        let failures = *consecutive_failures;
        if failures >= self.policy.failure_threshold {
            tracing::warn!(
                failures,
                cooldown_secs = self.policy.failure_cooldown.as_secs(),
                "J-Quants circuit breaker opened after consecutive failures"
            );
            *state = State::Open {
                until: Instant::now() + self.policy.failure_cooldown,
                reason: TripReason::RepeatedFailures(failures),
            };
        }
    }

    /// HTTP 429. A `Retry-After` opens the breaker for that long (capped);
    /// without one the response counts as an ordinary failure.
    pub fn record_rate_limited(&self, retry_after: Option<Duration>) {
        let Some(wait) = retry_after else {
            self.record_failure();
            return;
        };
        let wait = wait.min(self.policy.max_retry_after);
        tracing::warn!(wait_secs = wait.as_secs(), "J-Quants asked us to back off");
        self.open_for(wait, TripReason::RetryAfter(wait));
    }

    /// HTTP 403: the account is blocked for the block cooldown.
    pub fn trip(&self) {
        tracing::warn!(
            cooldown_secs = self.policy.block_cooldown.as_secs(),
            "J-Quants circuit breaker opened by access block"
        );
        self.open_for(self.policy.block_cooldown, TripReason::Blocked);
    }

    fn open_for(&self, cooldown: Duration, reason: TripReason) {
        let until = Instant::now() + cooldown;
        let mut state = self.lock();
        // Never shorten an existing open window.
        if let State::Open { until: current, .. } = *state {
            if current >= until {
                return;
            }
        }
        *state = State::Open { until, reason };
    }

    /// Why the breaker is open, if it is.
    pub fn open_reason(&self) -> Option<TripReason> {
        match *self.lock() {
            State::Open { until, reason } if Instant::now() < until => Some(reason),
            _ => None,
        }
    }

    pub fn remaining_cooldown(&self) -> Duration {
        match *self.lock() {
            State::Closed { .. } => Duration::ZERO,
            State::Open { until, .. } => until.saturating_duration_since(Instant::now()),
        }
    }
}

/// Parse a `Retry-After` value given in seconds. HTTP-date forms are ignored.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
