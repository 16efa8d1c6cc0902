//! Process restart contract and rate limiting.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::RestartLimit;
use crate::error::RecoveryError;

/// Asks the process supervisor to restart the service.
#[async_trait]
pub trait RestartSignal: Send + Sync {
    async fn request_restart(&self, reason: &str) -> Result<(), RecoveryError>;
}

/// Sliding-window restart limiter.
#[derive(Debug)]
pub struct RestartLimiter {
    /// Times of recent restarts.
    restarts: VecDeque<DateTime<Utc>>,
    max_restarts: u32,
    window: chrono::Duration,
}

impl RestartLimiter {
    pub fn new(limit: &RestartLimit) -> Self {
        Self {
            restarts: VecDeque::new(),
            max_restarts: limit.max_restarts,
            window: limit.window(),
        }
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        // Remove old restarts outside the window
        while let Some(front) = self.restarts.front() {
            if now - *front > self.window {
                self.restarts.pop_front();
            } else {
                break;
            }
        }
    }

    /// Record a restart at `now` if the limit allows it.
    pub fn try_acquire(&mut self, now: DateTime<Utc>) -> bool {
        self.prune(now);
        if self.restarts.len() as u32 >= self.max_restarts {
            return false;
        }
        self.restarts.push_back(now);
        true
    }

    /// Restarts counted in the current window.
    pub fn count(&mut self, now: DateTime<Utc>) -> u32 {
        self.prune(now);
        self.restarts.len() as u32
    }

    pub fn max_restarts(&self) -> u32 {
        self.max_restarts
    }

    pub fn window(&self) -> chrono::Duration {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_within_window() {
        let mut limiter = RestartLimiter::new(&RestartLimit {
            max_restarts: 2,
            window_secs: 600,
        });
        let t0 = Utc::now();

        assert!(limiter.try_acquire(t0));
        assert!(limiter.try_acquire(t0 + chrono::Duration::minutes(1)));
        assert!(!limiter.try_acquire(t0 + chrono::Duration::minutes(2)));
        assert_eq!(limiter.count(t0 + chrono::Duration::minutes(2)), 2);

        // First restart leaves the window.
        assert!(limiter.try_acquire(t0 + chrono::Duration::minutes(11)));
        assert_eq!(limiter.count(t0 + chrono::Duration::minutes(11)), 2);
    }

    #[test]
    fn test_zero_limit_blocks_everything() {
        let mut limiter = RestartLimiter::new(&RestartLimit {
            max_restarts: 0,
            window_secs: 60,
        });
        assert!(!limiter.try_acquire(Utc::now()));
    }
}
