//! Per-vendor call budget.
//!
//! Each vendor keeps a sliding log of recent dispatch instants. A call is
//! admitted only while fewer than `max_calls` dispatches fall inside the
//! trailing `window`, so no window anywhere in time ever sees more than the
//! configured number of requests, however many workers share the limiter.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, warn};
use tokio::time::Instant;

use crate::vendors::Vendor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_calls: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls: 5,
            window: Duration::from_secs(1),
        }
    }
}

/// Read-only view of a vendor's budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateBudget {
    pub vendor: Vendor,
    pub max_calls: u32,
    pub window: Duration,
    /// Oldest dispatch still inside the window, if any.
    pub window_start: Option<Instant>,
    pub calls_used: u32,
}

/// Proof that a call slot was granted.
#[derive(Debug, Clone, Copy)]
pub struct RatePermit {
    pub vendor: Vendor,
    pub granted_at: Instant,
}

#[derive(Debug)]
struct CallLog {
    config: RateLimitConfig,
    calls: VecDeque<Instant>,
}

impl CallLog {
    fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            calls: VecDeque::with_capacity(config.max_calls as usize),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.calls.front() {
            if now.duration_since(*oldest) >= self.config.window {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }

    fn try_acquire(&mut self, now: Instant) -> bool {
        self.prune(now);
        if (self.calls.len() as u32) < self.config.max_calls {
            self.calls.push_back(now);
            true
        } else {
            false
        }
    }

    fn time_until_available(&mut self, now: Instant) -> Duration {
        self.prune(now);
        if (self.calls.len() as u32) < self.config.max_calls {
            return Duration::ZERO;
        }
        match self.calls.front() {
            Some(oldest) => (*oldest + self.config.window).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }
}

/// Thread-safe limiter shared by every worker of a process.
pub struct RateLimiter {
    logs: Mutex<HashMap<Vendor, CallLog>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            logs: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_configs(configs: impl IntoIterator<Item = (Vendor, RateLimitConfig)>) -> Self {
        let limiter = Self::new();
        for (vendor, config) in configs {
            limiter.configure(vendor, config);
        }
        limiter
    }

    fn lock_logs(&self) -> MutexGuard<'_, HashMap<Vendor, CallLog>> {
        self.logs.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Replace the budget for a vendor, discarding its call history.
    pub fn configure(&self, vendor: Vendor, config: RateLimitConfig) {
        let config = RateLimitConfig {
            max_calls: config.max_calls.max(1),
            window: config.window,
        };
        self.lock_logs().insert(vendor, CallLog::new(config));
    }

    /// Wait until the vendor's budget has room, then consume one slot.
    pub async fn acquire(&self, vendor: Vendor) -> RatePermit {
        loop {
            let wait = {
                let mut logs = self.lock_logs();
                let log = logs
                    .entry(vendor)
                    .or_insert_with(|| CallLog::new(RateLimitConfig::default()));
                let now = Instant::now();
                if log.try_acquire(now) {
                    return RatePermit {
                        vendor,
                        granted_at: now,
                    };
                }
                log.time_until_available(now)
            };

            debug!("Rate limiter: waiting {:?} for {}", wait, vendor);
            tokio::time::sleep(wait).await;
        }
    }

    /// Consume a slot only if one is free right now.
    pub fn try_acquire(&self, vendor: Vendor) -> Option<RatePermit> {
        let mut logs = self.lock_logs();
        let log = logs
            .entry(vendor)
            .or_insert_with(|| CallLog::new(RateLimitConfig::default()));
        let now = Instant::now();
        log.try_acquire(now).then_some(RatePermit {
            vendor,
            granted_at: now,
        })
    }

    pub fn budget(&self, vendor: Vendor) -> RateBudget {
        let mut logs = self.lock_logs();
        let log = logs
            .entry(vendor)
            .or_insert_with(|| CallLog::new(RateLimitConfig::default()));
        log.prune(Instant::now());
        RateBudget {
            vendor,
            max_calls: log.config.max_calls,
            window: log.config.window,
            window_start: log.calls.front().copied(),
            calls_used: log.calls.len() as u32,
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn config(max_calls: u32, window_ms: u64) -> RateLimitConfig {
        RateLimitConfig {
            max_calls,
            window: Duration::from_millis(window_ms),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn blocks_once_budget_is_spent() {
        let limiter = RateLimiter::with_configs([(Vendor::Kiwoom, config(2, 1_000))]);

        assert!(limiter.try_acquire(Vendor::Kiwoom).is_some());
        assert!(limiter.try_acquire(Vendor::Kiwoom).is_some());
        assert!(limiter.try_acquire(Vendor::Kiwoom).is_none());

        let budget = limiter.budget(Vendor::Kiwoom);
        assert_eq!(budget.calls_used, 2);
        assert_eq!(budget.max_calls, 2);

        let started = Instant::now();
        limiter.acquire(Vendor::Kiwoom).await;
        assert!(started.elapsed() >= Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn vendors_have_independent_budgets() {
        let limiter = RateLimiter::with_configs([
            (Vendor::Kiwoom, config(1, 1_000)),
            (Vendor::KoreaInvestment, config(1, 1_000)),
        ]);

        assert!(limiter.try_acquire(Vendor::Kiwoom).is_some());
        assert!(limiter.try_acquire(Vendor::Kiwoom).is_none());
        assert!(limiter.try_acquire(Vendor::KoreaInvestment).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn window_never_exceeds_budget_under_concurrency() {
        let limiter = Arc::new(RateLimiter::with_configs([(
            Vendor::KoreaInvestment,
            config(5, 1_000),
        )]));

        let mut handles = Vec::new();
        for _ in 0..23 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.acquire(Vendor::KoreaInvestment).await.granted_at
            }));
        }

        let mut grants = Vec::new();
        for handle in handles {
            grants.push(handle.await.unwrap());
        }
        grants.sort();

        for (idx, granted) in grants.iter().enumerate().skip(5) {
            let earlier = grants[idx - 5];
            assert!(
                granted.duration_since(earlier) >= Duration::from_millis(1_000),
                "six calls inside one window"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reconfigure_resets_history() {
        let limiter = RateLimiter::with_configs([(Vendor::Kiwoom, config(1, 60_000))]);
        assert!(limiter.try_acquire(Vendor::Kiwoom).is_some());
        assert!(limiter.try_acquire(Vendor::Kiwoom).is_none());

        limiter.configure(Vendor::Kiwoom, config(1, 60_000));
        assert!(limiter.try_acquire(Vendor::Kiwoom).is_some());
    }
}
