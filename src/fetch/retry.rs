//! Backoff schedule and retry classification for vendor calls.

use std::time::Duration;

use rand::Rng;

/// What the client does after a failed attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Terminal for this request: malformed payload, rejected request, deadline.
    Never,
    /// Token was refused; drop it and retry once with a freshly issued one.
    Reauthenticate,
    /// Rate limited or transient; sleep per the backoff schedule and retry.
    WithBackoff,
}

/// Retry budget and exponential backoff with jitter.
///
/// The delay for retry `n` (0-based) is `min(base * 2^n, cap)` plus a random
/// jitter in `[0, delay / 2)`. Uncapped delays therefore strictly increase from
/// one attempt to the next even with jitter applied. A server hint may
/// lengthen a wait, but never past `max_hint`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub base: Duration,
    pub cap: Duration,
    pub jitter: bool,
    /// Longest `Retry-After` hint that is honoured as given.
    pub max_hint: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base: Duration::from_millis(500),
            cap: Duration::from_secs(8),
            jitter: true,
            max_hint: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based), ignoring server hints.
    pub fn delay(&self, attempt: u32) -> Duration {
        let scale = 2_f64.powi(attempt.min(30) as i32);
        let seconds = (self.base.as_secs_f64() * scale).min(self.cap.as_secs_f64());
        let delay = Duration::from_secs_f64(seconds);

        if !self.jitter {
            return delay;
        }

        let spread_ms = (delay.as_millis() / 2) as u64;
        if spread_ms == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..spread_ms))
    }

    /// Delay honouring a `Retry-After` style hint when it asks for longer,
    /// clamped to `max_hint`.
    pub fn delay_with_hint(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let scheduled = self.delay(attempt);
        match hint {
            Some(hint) if hint > scheduled => hint.min(self.max_hint.max(scheduled)),
            _ => scheduled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_cap_without_jitter() {
        let policy = RetryPolicy {
            max_retries: 5,
            base: Duration::from_millis(100),
            cap: Duration::from_secs(1),
            jitter: false,
            ..RetryPolicy::default()
        };

        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
        assert_eq!(policy.delay(3), Duration::from_millis(800));
        assert_eq!(policy.delay(4), Duration::from_secs(1));
        assert_eq!(policy.delay(40), Duration::from_secs(1));
    }

    #[test]
    fn jittered_delays_still_increase() {
        let policy = RetryPolicy {
            max_retries: 4,
            base: Duration::from_millis(100),
            cap: Duration::from_secs(60),
            jitter: true,
            ..RetryPolicy::default()
        };

        for _ in 0..50 {
            let delays: Vec<Duration> = (0..4).map(|attempt| policy.delay(attempt)).collect();
            for pair in delays.windows(2) {
                assert!(pair[0] < pair[1], "{:?} !< {:?}", pair[0], pair[1]);
            }
            assert!(delays[0] >= Duration::from_millis(100));
            assert!(delays[0] < Duration::from_millis(150));
        }
    }

    #[test]
    fn server_hint_only_extends_the_wait() {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(
            policy.delay_with_hint(0, Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
        assert_eq!(
            policy.delay_with_hint(0, Some(Duration::from_millis(10))),
            Duration::from_millis(500)
        );
        assert_eq!(policy.delay_with_hint(1, None), Duration::from_secs(1));
    }

    #[test]
    fn oversized_hint_is_clamped() {
        let policy = RetryPolicy {
            jitter: false,
            max_hint: Duration::from_secs(30),
            ..RetryPolicy::default()
        };
        assert_eq!(
            policy.delay_with_hint(0, Some(Duration::from_secs(86_400))),
            Duration::from_secs(30)
        );

        let tight = RetryPolicy {
            jitter: false,
            max_hint: Duration::ZERO,
            ..RetryPolicy::default()
        };
        assert_eq!(
            tight.delay_with_hint(2, Some(Duration::from_secs(86_400))),
            Duration::from_secs(2)
        );
    }
}
