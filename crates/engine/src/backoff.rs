//! Per-key retry counters (the work-queue rate limiter).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::Retry;

#[derive(Debug)]
pub struct BackoffTracker {
    base: Duration,
    ceiling: Duration,
    attempts: Mutex<HashMap<String, u32>>,
}

impl BackoffTracker {
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        Self { base, ceiling: ceiling.max(base), attempts: Mutex::new(HashMap::new()) }
    }

    /// Delay before the next attempt for `key`; `None` means wait for a change.
    pub fn next_delay(&self, key: &str, retry: Retry) -> Option<Duration> {
        match retry {
            Retry::Never => None,
            Retry::Fast => Some(self.base),
            Retry::Slow => Some(self.ceiling),
            Retry::Backoff => Some(self.bump(key)),
            Retry::After(floor) => Some(floor.max(self.bump(key))),
        }
    }

    pub fn reset(&self, key: &str) {
        self.attempts.lock().unwrap_or_else(|e| e.into_inner()).remove(key);
    }

    fn bump(&self, key: &str) -> Duration {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        let n = attempts.entry(key.to_string()).or_insert(0);
        *n = n.saturating_add(1);
        let shift = (*n - 1).min(20);
        self.base.saturating_mul(1u32 << shift).min(self.ceiling)
    }
}
