//! Delay-based throttle for network and LLM calls.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

/// Enforces a minimum spacing between calls.
///
/// One limiter is shared (behind an `Arc`) by every Task that spends the
/// calls-per-minute budget. The first call never waits.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
    granted: AtomicU64,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
            granted: AtomicU64::new(0),
        }
    }

    /// Limiter allowing `calls_per_minute` calls (clamped to at least one).
    pub fn per_minute(calls_per_minute: u32) -> Self {
        let calls = calls_per_minute.max(1);
        Self::new(Duration::from_secs(60) / calls)
    }

    /// Limiter that never waits.
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Number of calls let through so far.
    pub fn granted(&self) -> u64 {
        self.granted.load(Ordering::Relaxed)
    }

    /// Block until the next call is allowed, then record it.
    ///
    /// The lock is held while sleeping so concurrent callers queue up instead
    /// of all waking at the same instant.
    pub fn wait_until_allowed(&self) {
        let mut last_call = match self.last_call.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(last) = *last_call {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "rate limiting");
                thread::sleep(wait);
            }
        }
        *last_call = Some(Instant::now());
        self.granted.fetch_add(1, Ordering::Relaxed);
    }
}
