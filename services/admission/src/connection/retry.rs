use std::time::Duration;

use super::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS, DEFAULT_MAX_RETRIES};

/// Bounded exponential backoff: `min(base * 2^(attempt-1), max)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Extra random delay as a fraction of the computed delay, 0.0 disables it.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    pub fn with_jitter(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let extra = delay.mul_f64(rand::random::<f64>() * self.jitter);
        (delay + extra).min(self.max_delay)
    }

    pub fn schedule(&self) -> RetrySchedule {
        RetrySchedule::new(self.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStep {
    Attempt(u32),
    Backoff { failed_attempt: u32, delay: Duration },
    Succeeded { attempts: u32 },
    Exhausted { attempts: u32 },
}

/// State machine driving one connection attempt sequence.
///
/// `Attempt(n)` moves to `Backoff` or `Exhausted` on failure, to `Succeeded`
/// on success; `Backoff` moves to `Attempt(n + 1)` once the delay elapsed.
/// Terminal steps ignore further events.
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    policy: RetryPolicy,
    step: RetryStep,
}

impl RetrySchedule {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            step: RetryStep::Attempt(1),
        }
    }

    pub fn step(&self) -> RetryStep {
        self.step
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.step,
            RetryStep::Succeeded { .. } | RetryStep::Exhausted { .. }
        )
    }

    pub fn on_failure(&mut self) -> RetryStep {
        if let RetryStep::Attempt(attempt) = self.step {
            self.step = if attempt >= self.policy.max_attempts {
                RetryStep::Exhausted { attempts: attempt }
            } else {
                RetryStep::Backoff {
                    failed_attempt: attempt,
                    delay: self.policy.delay_for(attempt),
                }
            };
        }
        self.step
    }

    pub fn on_backoff_elapsed(&mut self) -> RetryStep {
        if let RetryStep::Backoff { failed_attempt, .. } = self.step {
            self.step = RetryStep::Attempt(failed_attempt + 1);
        }
        self.step
    }

    pub fn on_success(&mut self) -> RetryStep {
        if let RetryStep::Attempt(attempt) = self.step {
            self.step = RetryStep::Succeeded { attempts: attempt };
        }
        self.step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_until_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(5000));
        assert_eq!(policy.delay_for(64), Duration::from_millis(5000));
    }

    #[test]
    fn test_jitter_never_exceeds_cap() {
        let policy = RetryPolicy {
            jitter: 1.0,
            ..RetryPolicy::default()
        };
        for attempt in 1..=5 {
            let base = policy.delay_for(attempt);
            let jittered = policy.with_jitter(base);
            assert!(jittered >= base);
            assert!(jittered <= policy.max_delay);
        }
    }

    #[test]
    fn test_schedule_exhausts_after_max_attempts() {
        let mut schedule = RetryPolicy::default().schedule();
        assert_eq!(schedule.step(), RetryStep::Attempt(1));

        assert_eq!(
            schedule.on_failure(),
            RetryStep::Backoff {
                failed_attempt: 1,
                delay: Duration::from_millis(1000)
            }
        );
        assert_eq!(schedule.on_backoff_elapsed(), RetryStep::Attempt(2));
        assert_eq!(
            schedule.on_failure(),
            RetryStep::Backoff {
                failed_attempt: 2,
                delay: Duration::from_millis(2000)
            }
        );
        assert_eq!(schedule.on_backoff_elapsed(), RetryStep::Attempt(3));
        assert_eq!(schedule.on_failure(), RetryStep::Exhausted { attempts: 3 });
        assert!(schedule.is_terminal());

        // terminal steps are sticky
        assert_eq!(schedule.on_backoff_elapsed(), RetryStep::Exhausted { attempts: 3 });
        assert_eq!(schedule.on_success(), RetryStep::Exhausted { attempts: 3 });
    }

    #[test]
    fn test_schedule_success_on_second_attempt() {
        let mut schedule = RetryPolicy::default().schedule();
        schedule.on_failure();
        schedule.on_backoff_elapsed();
        assert_eq!(schedule.on_success(), RetryStep::Succeeded { attempts: 2 });
        assert!(schedule.is_terminal());
    }

    #[test]
    fn test_single_attempt_policy() {
        let mut schedule = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        }
        .schedule();
        assert_eq!(schedule.on_failure(), RetryStep::Exhausted { attempts: 1 });
    }
}
