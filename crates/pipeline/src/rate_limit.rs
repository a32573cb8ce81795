//! Per-user sliding-window rate limiting.

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use {
    async_trait::async_trait,
    dashmap::{DashMap, mapref::entry::Entry},
    stickerbot_common::{Error, Result},
    tracing::{debug, warn},
};

use {
    crate::{
        context::MessageContext,
        middleware::{Middleware, Next},
    },
    stickerbot_metrics::{admission, counter, gauge},
};

/// Idle users are swept once every this many checks.
const SWEEP_EVERY_CHECKS: u64 = 512;

/// Sliding-window limiter keyed by user id.
///
/// Each user keeps the timestamps of admitted requests inside the window. A
/// request is rejected when the window already holds `max_requests` entries;
/// the reported wait is the time until the oldest entry leaves the window.
pub struct RateLimiter {
    window: Duration,
    max_requests: usize,
    windows: DashMap<String, VecDeque<Instant>>,
    checks_seen: AtomicU64,
}

impl RateLimiter {
    #[must_use]
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests: max_requests.max(1) as usize,
            windows: DashMap::new(),
            checks_seen: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    #[must_use]
    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Admit or reject a request from `user` now.
    pub fn check(&self, user: &str) -> Result<()> {
        self.check_at(user, Instant::now())
    }

    /// [`check`](Self::check) against an explicit clock reading.
    pub fn check_at(&self, user: &str, now: Instant) -> Result<()> {
        self.sweep_if_needed(now);

        let mut entry = self.windows.entry(user.to_string()).or_default();
        let timestamps = entry.value_mut();
        while let Some(&oldest) = timestamps.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if timestamps.len() >= self.max_requests {
            let oldest = timestamps.front().copied().unwrap_or(now);
            let wait = (oldest + self.window).saturating_duration_since(now);
            drop(entry);
            counter!(admission::RATE_LIMIT_REJECTIONS_TOTAL).increment(1);
            warn!(
                user_id = user,
                wait_ms = wait.as_millis() as u64,
                "rate limit exceeded"
            );
            return Err(Error::rate_limited(wait));
        }

        timestamps.push_back(now);
        Ok(())
    }

    /// Requests `user` has left in the current window.
    #[must_use]
    pub fn remaining(&self, user: &str) -> usize {
        self.remaining_at(user, Instant::now())
    }

    #[must_use]
    pub fn remaining_at(&self, user: &str, now: Instant) -> usize {
        let used = self.windows.get(user).map_or(0, |timestamps| {
            timestamps
                .iter()
                .filter(|&&t| now.saturating_duration_since(t) < self.window)
                .count()
        });
        self.max_requests.saturating_sub(used)
    }

    /// Forget `user`'s history.
    pub fn reset(&self, user: &str) {
        if let Entry::Occupied(entry) = self.windows.entry(user.to_string()) {
            entry.remove();
        }
    }

    #[must_use]
    pub fn tracked_users(&self) -> usize {
        self.windows.len()
    }

    fn sweep_if_needed(&self, now: Instant) {
        let seen = self.checks_seen.fetch_add(1, Ordering::Relaxed) + 1;
        if !seen.is_multiple_of(SWEEP_EVERY_CHECKS) {
            return;
        }
        let before = self.windows.len();
        self.windows.retain(|_, timestamps| {
            timestamps
                .back()
                .is_some_and(|&newest| now.saturating_duration_since(newest) < self.window)
        });
        let after = self.windows.len();
        gauge!(admission::TRACKED_USERS).set(after as f64);
        if after < before {
            debug!(removed = before - after, tracked = after, "swept idle rate-limit windows");
        }
    }
}

#[async_trait]
impl Middleware for RateLimiter {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn handle(&self, ctx: &mut MessageContext, next: Next<'_>) -> Result<()> {
        self.check(ctx.user_id())?;
        next.run(ctx).await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const USER: &str = "5511999999999@c.us";

    #[test]
    fn eleventh_request_in_window_is_rejected() {
        let limiter = RateLimiter::new(Duration::from_millis(60_000), 10);
        let start = Instant::now();
        for i in 0..10 {
            limiter
                .check_at(USER, start + Duration::from_millis(i * 100))
                .unwrap();
        }
        let err = limiter
            .check_at(USER, start + Duration::from_millis(1_000))
            .unwrap_err();
        let wait = err.retry_after().unwrap();
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_secs(60));
        // Oldest entry at t=0 expires at t=60s; 59s left, already whole.
        assert_eq!(wait, Duration::from_secs(59));
    }

    #[test]
    fn wait_rounds_up_to_whole_seconds() {
        let limiter = RateLimiter::new(Duration::from_millis(10_000), 1);
        let start = Instant::now();
        limiter.check_at(USER, start).unwrap();
        let err = limiter
            .check_at(USER, start + Duration::from_millis(8_500))
            .unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn entry_exactly_one_window_old_has_expired() {
        let limiter = RateLimiter::new(Duration::from_secs(10), 1);
        let start = Instant::now();
        limiter.check_at(USER, start).unwrap();
        let err = limiter
            .check_at(USER, start + Duration::from_millis(9_999))
            .unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(1)));
        limiter.check_at(USER, start + Duration::from_secs(10)).unwrap();
    }

    #[test]
    fn rejected_requests_do_not_extend_the_window() {
        let limiter = RateLimiter::new(Duration::from_secs(10), 2);
        let start = Instant::now();
        limiter.check_at(USER, start).unwrap();
        limiter.check_at(USER, start + Duration::from_secs(1)).unwrap();
        for s in 2..10 {
            assert!(limiter.check_at(USER, start + Duration::from_secs(s)).is_err());
        }
        // The first entry has left the window.
        limiter.check_at(USER, start + Duration::from_secs(10)).unwrap();
        assert!(limiter.check_at(USER, start + Duration::from_secs(10)).is_err());
        // And the second one too.
        limiter.check_at(USER, start + Duration::from_secs(11)).unwrap();
    }

    #[test]
    fn users_are_independent() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        let now = Instant::now();
        limiter.check_at("1@c.us", now).unwrap();
        assert!(limiter.check_at("1@c.us", now).is_err());
        limiter.check_at("2@c.us", now).unwrap();
        assert_eq!(limiter.remaining_at("1@c.us", now), 0);
        assert_eq!(limiter.remaining_at("3@c.us", now), 1);
    }

    #[test]
    fn reset_clears_history() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        limiter.check(USER).unwrap();
        assert!(limiter.check(USER).is_err());
        limiter.reset(USER);
        limiter.check(USER).unwrap();
    }

    #[test]
    fn idle_users_are_swept() {
        let limiter = RateLimiter::new(Duration::from_secs(1), 5);
        let start = Instant::now();
        for i in 0..100 {
            limiter.check_at(&format!("{i}@c.us"), start).unwrap();
        }
        assert_eq!(limiter.tracked_users(), 100);

        let later = start + Duration::from_secs(5);
        for _ in 100..SWEEP_EVERY_CHECKS {
            limiter.check_at(USER, later).ok();
        }
        assert_eq!(limiter.tracked_users(), 1);
    }
}
