use backoff::backoff::Backoff;
use backoff::exponential::ExponentialBackoff;
use std::time::Duration;

/// Bounded retry policy for per-item summarization.
///
/// The orchestrator owns the attempt loop (so every failed attempt is
/// recorded durably); this object only answers "how many attempts" and
/// "how long to wait before the next one". Delays grow exponentially with
/// the backoff crate's built-in randomization providing jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff,
            multiplier: 2.0,
        }
    }

    /// Fresh delay sequence for one item's attempt loop.
    pub fn delays(&self) -> RetryDelays {
        let backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: self.initial_backoff,
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: self.multiplier,
            // Attempts are bounded by count, not elapsed time.
            max_elapsed_time: None,
            ..Default::default()
        };
        RetryDelays {
            backoff,
            remaining: self.max_attempts.saturating_sub(1),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500), Duration::from_secs(30))
    }
}

/// Iterator over the waits between attempts; yields `max_attempts - 1`
/// delays, i.e. nothing after the final attempt.
pub struct RetryDelays {
    backoff: ExponentialBackoff<backoff::SystemClock>,
    remaining: u32,
}

impl Iterator for RetryDelays {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.backoff.next_backoff()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_one_less_delay_than_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10), Duration::from_secs(1));
        assert_eq!(policy.delays().count(), 2);

        let single = RetryPolicy::new(1, Duration::from_millis(10), Duration::from_secs(1));
        assert_eq!(single.delays().count(), 0);
    }

    #[test]
    fn delays_grow_but_stay_bounded() {
        let policy = RetryPolicy::new(6, Duration::from_millis(100), Duration::from_millis(400));
        for delay in policy.delays() {
            // Randomization factor is 0.5, so an interval capped at 400ms
            // never produces a delay above 600ms.
            assert!(delay <= Duration::from_millis(600));
        }
    }
}
