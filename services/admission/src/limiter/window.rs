use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

use super::policy::{ActionClass, RateLimitKey, WindowRule};
use super::MAX_WINDOW;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowEntry {
    pub count: u32,
    pub window_reset_at: Instant,
}

impl WindowEntry {
    fn open(now: Instant, window: Duration) -> Self {
        let window = window.min(MAX_WINDOW);
        Self {
            count: 1,
            window_reset_at: now.checked_add(window).unwrap_or(now),
        }
    }

    /// Windows are half-open: `[start, window_reset_at)`.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.window_reset_at
    }
}

/// In-memory fixed-window counter per key.
///
/// The read-check-increment for one key runs under the dashmap shard lock
/// for that key, so concurrent `admit` calls on the same key serialize.
#[derive(Clone, Default)]
pub struct WindowLimiter {
    entries: Arc<DashMap<String, WindowEntry>>,
}

impl WindowLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admit(&self, key: &str, max_attempts: u32, window: Duration) -> bool {
        self.admit_at(key, max_attempts, window, Instant::now())
    }

    pub fn admit_at(&self, key: &str, max_attempts: u32, window: Duration, now: Instant) -> bool {
        if max_attempts == 0 {
            return false;
        }

        match self.entries.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(WindowEntry::open(now, window));
                true
            }
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_expired(now) {
                    *entry = WindowEntry::open(now, window);
                    true
                } else if entry.count < max_attempts {
                    entry.count += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn admit_action(&self, action: ActionClass, identity: &str, rule: WindowRule) -> bool {
        let key = RateLimitKey::new(action, identity);
        self.admit(key.as_str(), rule.max_attempts, rule.window)
    }

    /// Attempts left in the current window; a missing or expired window
    /// leaves the full allowance.
    pub fn remaining(&self, key: &str, max_attempts: u32) -> u32 {
        self.remaining_at(key, max_attempts, Instant::now())
    }

    pub fn remaining_at(&self, key: &str, max_attempts: u32, now: Instant) -> u32 {
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => max_attempts.saturating_sub(entry.count),
            _ => max_attempts,
        }
    }

    pub fn retry_after(&self, key: &str) -> Option<Duration> {
        self.retry_after_at(key, Instant::now())
    }

    pub fn retry_after_at(&self, key: &str, now: Instant) -> Option<Duration> {
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.window_reset_at.saturating_duration_since(now))
    }

    pub fn reset(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Instant::now())
    }

    pub fn cleanup_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn start_cleanup_task(&self, period: Duration) -> JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let removed = limiter.cleanup();
                if removed > 0 {
                    debug!(removed, remaining = limiter.len(), "swept expired rate-limit windows");
                }
            }
        })
    }
}
