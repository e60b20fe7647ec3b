//! Retry scheduling for evaluator calls.
//!
//! The schedule is a pure function of the attempt number, and the actual
//! waiting goes through a [`Sleeper`], so tests can assert the exact delays
//! without waiting for them.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;

/// Delay before the next attempt, given the 1-based number of the attempt that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `attempt × base`: 2s, 4s, 6s, ...
    Linear { base: Duration },
    /// Always `delay`.
    Constant { delay: Duration },
    /// `base × 2^(attempt-1)`, capped at `max`.
    Exponential { base: Duration, max: Duration },
    /// Retry immediately.
    None,
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Linear { base } => base.saturating_mul(attempt),
            Backoff::Constant { delay } => delay,
            Backoff::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                base.saturating_mul(factor).min(max)
            }
            Backoff::None => Duration::ZERO,
        }
    }
}

/// Bounded retry budget plus backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl Default for RetryPolicy {
    /// 5 attempts, linear 2s backoff.
    fn default() -> Self {
        Self::new(
            5,
            Backoff::Linear {
                base: Duration::from_secs(2),
            },
        )
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Wait before the attempt after `failed_attempt`, or `None` when the budget is spent.
    pub fn delay_after(&self, failed_attempt: u32) -> Option<Duration> {
        (failed_attempt < self.max_attempts).then(|| self.backoff.delay(failed_attempt))
    }
}

/// Blocking wait used between attempts.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps on the calling thread in short slices, waking early on cancellation.
#[derive(Debug, Clone)]
pub struct ThreadSleeper {
    cancel: CancelToken,
}

impl ThreadSleeper {
    const SLICE: Duration = Duration::from_millis(100);

    pub fn new(cancel: CancelToken) -> Self {
        Self { cancel }
    }
}

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        let until = Instant::now() + duration;
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            let now = Instant::now();
            if now >= until {
                return;
            }
            std::thread::sleep((until - now).min(Self::SLICE));
        }
    }
}

/// Records requested delays instead of sleeping.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn total(&self) -> Duration {
        self.delays().iter().sum()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.delays
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(duration);
    }
}

/// Enforces a minimum interval between consecutive evaluator calls.
#[derive(Debug)]
pub struct Throttle {
    min_interval: Duration,
    last_call: Option<Instant>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: None,
        }
    }

    /// Wait (through `sleeper`) until the next call is allowed, then mark it.
    pub fn acquire(&mut self, sleeper: &dyn Sleeper) {
        if !self.min_interval.is_zero() {
            if let Some(last) = self.last_call {
                let elapsed = last.elapsed();
                if elapsed < self.min_interval {
                    sleeper.sleep(self.min_interval - elapsed);
                }
            }
        }
        self.last_call = Some(Instant::now());
    }
}
