use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 采样策略
#[derive(Debug, Clone, PartialEq)]
pub enum SamplingStrategy {
    /// 始终记录
    Always,

    /// 从不记录
    Never,

    /// 每 N 次记录一次（第 1 次总是记录）
    EveryNth(u64),

    /// 指数递减：第 1、2、4、8... 次记录
    Exponential,

    /// 时间窗口限流：每个窗口内最多记录一次
    Interval(Duration),
}

/// 日志采样器
///
/// 用于重连失败、写入失败这类会持续重复的日志，避免刷屏。
pub struct LogSampler {
    strategy: SamplingStrategy,
    counter: AtomicU64,
    suppressed: AtomicU64,
    last_emit: Mutex<Option<Instant>>,
}

impl LogSampler {
    pub fn new(strategy: SamplingStrategy) -> Self {
        Self {
            strategy,
            counter: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
            last_emit: Mutex::new(None),
        }
    }

    pub fn exponential() -> Self {
        Self::new(SamplingStrategy::Exponential)
    }

    pub fn every_nth(n: u64) -> Self {
        Self::new(SamplingStrategy::EveryNth(n.max(1)))
    }

    /// 判断本次事件是否应该输出日志
    pub fn should_sample(&self) -> bool {
        let occurrence = self.counter.fetch_add(1, Ordering::Relaxed) + 1;

        let sampled = match &self.strategy {
            SamplingStrategy::Always => true,
            SamplingStrategy::Never => false,
            SamplingStrategy::EveryNth(n) => {
                let n = (*n).max(1);
                occurrence == 1 || occurrence % n == 0
            }
            SamplingStrategy::Exponential => occurrence.is_power_of_two(),
            SamplingStrategy::Interval(window) => {
                let now = Instant::now();
                let mut last = self.last_emit.lock();
                match *last {
                    Some(prev) if now.duration_since(prev) < *window => false,
                    _ => {
                        *last = Some(now);
                        true
                    }
                }
            }
        };

        if !sampled {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
        }
        sampled
    }

    /// 取出并清零被抑制的条数，便于在下一条日志中汇报
    pub fn take_suppressed(&self) -> u64 {
        self.suppressed.swap(0, Ordering::Relaxed)
    }

    /// 事件序列结束（例如重连成功）后重置
    pub fn reset(&self) {
        self.counter.store(0, Ordering::Relaxed);
        self.suppressed.store(0, Ordering::Relaxed);
        *self.last_emit.lock() = None;
    }

    /// 获取当前计数
    pub fn get_count(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}

impl Default for LogSampler {
    fn default() -> Self {
        Self::new(SamplingStrategy::Always)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_always_sampler() {
        let sampler = LogSampler::new(SamplingStrategy::Always);
        assert!(sampler.should_sample());
        assert!(sampler.should_sample());
        assert_eq!(sampler.take_suppressed(), 0);
    }

    #[test]
    fn test_never_sampler() {
        let sampler = LogSampler::new(SamplingStrategy::Never);
        assert!(!sampler.should_sample());
        assert!(!sampler.should_sample());
        assert_eq!(sampler.take_suppressed(), 2);
    }

    #[test]
    fn test_exponential_sampler() {
        let sampler = LogSampler::exponential();

        let sampled: Vec<u64> = (1..=20u64).filter(|_| sampler.should_sample()).collect();
        // 第 1、2、4、8、16 次被记录
        assert_eq!(sampled, vec![1, 2, 4, 8, 16]);
        assert_eq!(sampler.take_suppressed(), 15);
    }

    #[test]
    fn test_every_nth_sampler() {
        let sampler = LogSampler::every_nth(100);

        let mut sampled = 0;
        for _ in 0..250 {
            if sampler.should_sample() {
                sampled += 1;
            }
        }

        // 第 1、100、200 次
        assert_eq!(sampled, 3);
    }

    #[test]
    fn test_interval_sampler() {
        let sampler = LogSampler::new(SamplingStrategy::Interval(Duration::from_secs(60)));

        assert!(sampler.should_sample());
        assert!(!sampler.should_sample());
        assert!(!sampler.should_sample());

        sampler.reset();
        assert!(sampler.should_sample());
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let sampler = LogSampler::exponential();
        for _ in 0..5 {
            sampler.should_sample();
        }
        assert_eq!(sampler.get_count(), 5);

        sampler.reset();
        assert_eq!(sampler.get_count(), 0);
        assert!(sampler.should_sample());
    }
}
