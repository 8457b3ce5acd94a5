use crate::stage::Ack;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Determines how a consumer waits for work on its inbound connection.
///
/// Selected once per stage at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumptionStrategy {
    /// Suspend until data arrives or the connection drains
    BlockingWait,
    /// Wake at least every `timeout` so the stage can check for cancellation
    BoundedPoll(Duration),
    /// Take only the newest pending task, discarding older ones
    LatestOnly,
}

impl Default for ConsumptionStrategy {
    fn default() -> Self {
        ConsumptionStrategy::BlockingWait
    }
}

impl ConsumptionStrategy {
    /// Whether this strategy may discard pending tasks
    pub fn is_lossy(&self) -> bool {
        matches!(self, ConsumptionStrategy::LatestOnly)
    }
}

/// How many times a consumer re-invokes its domain logic on a payload it
/// reported as [`Ack::Retry`] before acknowledging the failure.
///
/// [`Ack::Fail`] is never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one, at least 1
    pub max_attempts: u32,
    /// Pause between attempts in milliseconds
    pub backoff_ms: u64,
}

impl RetryPolicy {
    /// Single attempt, failures are acknowledged immediately
    pub const fn never() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
        }
    }

    pub const fn attempts(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff_ms: backoff.as_millis() as u64,
        }
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// Run `attempt` while it asks for a retry and the attempt budget lasts.
    ///
    /// Returns whether the final outcome was [`Ack::Ok`].
    pub fn run<F>(&self, mut attempt: F) -> bool
    where
        F: FnMut(u32) -> Ack,
    {
        let max = self.max_attempts.max(1);
        for n in 1..=max {
            match attempt(n) {
                Ack::Ok => return true,
                Ack::Fail => return false,
                Ack::Retry => {}
            }
            if n < max && self.backoff_ms > 0 {
                std::thread::sleep(self.backoff());
            }
        }
        false
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::never()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_strategy_blocks() {
        assert_eq!(ConsumptionStrategy::default(), ConsumptionStrategy::BlockingWait);
        assert!(ConsumptionStrategy::LatestOnly.is_lossy());
        assert!(!ConsumptionStrategy::BoundedPoll(Duration::from_millis(5)).is_lossy());
    }

    #[test]
    fn test_retry_never_runs_once() {
        let mut calls = 0;
        assert!(!RetryPolicy::never().run(|_| {
            calls += 1;
            Ack::Retry
        }));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_retry_stops_on_success() {
        let mut calls = 0;
        let policy = RetryPolicy::attempts(5, Duration::ZERO);
        assert!(policy.run(|n| {
            calls += 1;
            if n == 3 {
                Ack::Ok
            } else {
                Ack::Retry
            }
        }));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_permanent_failure_not_retried() {
        let mut calls = 0;
        let policy = RetryPolicy::attempts(4, Duration::from_millis(200));
        let started = std::time::Instant::now();
        assert!(!policy.run(|_| {
            calls += 1;
            Ack::Fail
        }));
        assert_eq!(calls, 1);
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[test]
    fn test_retry_exhausts_budget() {
        let mut calls = 0;
        let policy = RetryPolicy::attempts(3, Duration::ZERO);
        assert!(!policy.run(|_| {
            calls += 1;
            Ack::Retry
        }));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_retry_zero_attempts_treated_as_one() {
        let mut calls = 0;
        let policy = RetryPolicy {
            max_attempts: 0,
            backoff_ms: 0,
        };
        policy.run(|_| {
            calls += 1;
            Ack::Retry
        });
        assert_eq!(calls, 1);
    }
}
