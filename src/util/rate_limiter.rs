//! Sliding-window rate limiter (spec.md §4.2).
//!
//! `checkLimit` is the only mutator: it records an event (monotonic clock)
//! iff fewer than `limit` events fall inside the trailing `period`, and
//! returns whether it did. Scoped to an owning object (spec.md §9
//! "Global-ish rate limiters") so callers — and tests — can hold one per
//! channel or reset it in isolation.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

pub struct RateLimiter {
    limit: u32,
    period: Duration,
    events: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(limit: u32, period: Duration) -> Self {
        Self {
            limit,
            period,
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Returns `true` and records the event if there is room in the
    /// current window; otherwise returns `false` without recording.
    pub async fn check_limit(&self) -> bool {
        self.check_limit_at(Instant::now()).await
    }

    async fn check_limit_at(&self, now: Instant) -> bool {
        let mut events = self.events.lock().await;
        while let Some(&oldest) = events.front() {
            if now.duration_since(oldest) > self.period {
                events.pop_front();
            } else {
                break;
            }
        }

        if events.len() < self.limit as usize {
            events.push_back(now);
            true
        } else {
            false
        }
    }

    /// Test-only: forget all recorded events.
    pub async fn reset(&self) {
        self.events.lock().await.clear();
    }

    pub async fn current_count(&self) -> usize {
        self.events.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_up_to_limit_events_per_window() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.check_limit().await);
        assert!(limiter.check_limit().await);
        assert!(!limiter.check_limit().await);
    }

    #[tokio::test]
    async fn rejected_calls_do_not_record() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check_limit().await);
        assert!(!limiter.check_limit().await);
        assert_eq!(limiter.current_count().await, 1);
    }

    #[tokio::test]
    async fn window_expiry_frees_capacity() {
        let limiter = RateLimiter::new(1, Duration::from_millis(1));
        assert!(limiter.check_limit().await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(limiter.check_limit().await);
    }

    #[tokio::test]
    async fn reset_clears_recorded_events() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check_limit().await);
        limiter.reset().await;
        assert!(limiter.check_limit().await);
    }

    #[tokio::test]
    async fn at_most_limit_calls_succeed_over_contiguous_window() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        let mut successes = 0;
        for _ in 0..20 {
            if limiter.check_limit().await {
                successes += 1;
            }
        }
        assert_eq!(successes, 5);
    }
}
