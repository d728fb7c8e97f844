use flux_config::ReconnectConfig;
use std::time::Duration;

/// 重连尝试计数上限
pub const MAX_RECONNECT_ATTEMPTS: u32 = 1000;

/// 指数退避：delay(n) = min(base * 2^(n-1), max)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    max_attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            max_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        let mut backoff = Self::new(config.base_delay(), config.max_delay());
        backoff.max_attempts = config.max_attempts.max(1);
        backoff
    }

    /// 第 `attempt` 次失败后的等待时间，attempt 从 1 开始，0 按 1 处理
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exp)
            .map_or(self.max, |d| d.min(self.max))
    }

    /// 下一次尝试编号，封顶于 `max_attempts`
    pub fn next_attempt(&self, attempt: u32) -> u32 {
        attempt.saturating_add(1).min(self.max_attempts)
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sequence() {
        let backoff = Backoff::default();
        let delays: Vec<u64> = (1..=8).map(|n| backoff.delay(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 8000, 16000, 30000, 30000]);
    }

    #[test]
    fn test_monotonic_and_capped() {
        let backoff = Backoff::new(Duration::from_millis(250), Duration::from_secs(10));
        let mut previous = Duration::ZERO;
        for attempt in 1..=MAX_RECONNECT_ATTEMPTS {
            let delay = backoff.delay(attempt);
            assert!(delay >= previous);
            assert!(delay <= Duration::from_secs(10));
            previous = delay;
        }
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let backoff = Backoff::new(Duration::from_secs(3600), Duration::from_secs(7200));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(7200));
        assert_eq!(backoff.delay(0), Duration::from_secs(3600));
    }

    #[test]
    fn test_attempt_counter_is_capped() {
        let backoff = Backoff::default();
        assert_eq!(backoff.next_attempt(1), 2);
        assert_eq!(backoff.next_attempt(MAX_RECONNECT_ATTEMPTS), MAX_RECONNECT_ATTEMPTS);
        assert_eq!(backoff.next_attempt(u32::MAX), MAX_RECONNECT_ATTEMPTS);
    }
}
