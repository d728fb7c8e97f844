use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 接入层配置
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct IngestConfig {
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// 超过该时长未收到数据包即判定连接失效（毫秒）
    #[serde(default = "default_stale_timeout")]
    pub stale_timeout_ms: u64,

    #[serde(default)]
    pub distributor: DistributorConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub detection: DetectionSamplingConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            stale_timeout_ms: default_stale_timeout(),
            distributor: DistributorConfig::default(),
            lifecycle: LifecycleConfig::default(),
            detection: DetectionSamplingConfig::default(),
        }
    }
}

impl IngestConfig {
    pub fn stale_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_timeout_ms)
    }
}

/// 重连退避配置
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// 重连计数上限（防止溢出，不代表放弃重连）
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ReconnectConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// 数据包分发队列配置
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DistributorConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// 数据包保留时长（毫秒）
    #[serde(default = "default_retention")]
    pub retention_ms: u64,

    #[serde(default = "default_max_consumers")]
    pub max_consumers: usize,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            retention_ms: default_retention(),
            max_consumers: default_max_consumers(),
        }
    }
}

impl DistributorConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }
}

/// 生命周期配置
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LifecycleConfig {
    /// 停止流时等待接入任务退出的上限
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    /// 停止流时留给输出写入器收尾的时间
    #[serde(default = "default_writer_grace")]
    pub writer_grace_secs: u64,

    #[serde(default = "default_watchdog_interval")]
    pub watchdog_interval_secs: u64,

    #[serde(default = "default_watchdog_max_restarts")]
    pub watchdog_max_restarts: u32,

    #[serde(default = "default_watchdog_cooldown")]
    pub watchdog_cooldown_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            stop_timeout_secs: default_stop_timeout(),
            writer_grace_secs: default_writer_grace(),
            watchdog_interval_secs: default_watchdog_interval(),
            watchdog_max_restarts: default_watchdog_max_restarts(),
            watchdog_cooldown_secs: default_watchdog_cooldown(),
        }
    }
}

impl LifecycleConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn writer_grace(&self) -> Duration {
        Duration::from_secs(self.writer_grace_secs)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }

    pub fn watchdog_cooldown(&self) -> Duration {
        Duration::from_secs(self.watchdog_cooldown_secs)
    }
}

/// 检测采样配置
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DetectionSamplingConfig {
    /// 同一路流两次提交检测的最小间隔（毫秒）
    #[serde(default = "default_min_interval")]
    pub min_interval_ms: u64,

    /// 受限硬件：检测器繁忙时直接跳过
    #[serde(default)]
    pub constrained_hardware: bool,
}

impl Default for DetectionSamplingConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval(),
            constrained_hardware: false,
        }
    }
}

impl DetectionSamplingConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

fn default_stale_timeout() -> u64 {
    5_000
}

fn default_base_delay() -> u64 {
    500
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    1_000
}

fn default_capacity() -> usize {
    200
}

fn default_retention() -> u64 {
    5_000
}

fn default_max_consumers() -> usize {
    3
}

fn default_stop_timeout() -> u64 {
    15
}

fn default_writer_grace() -> u64 {
    5
}

fn default_watchdog_interval() -> u64 {
    30
}

fn default_watchdog_max_restarts() -> u32 {
    5
}

fn default_watchdog_cooldown() -> u64 {
    300
}

fn default_min_interval() -> u64 {
    1_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_defaults() {
        let config = IngestConfig::default();
        assert_eq!(config.reconnect.base_delay(), Duration::from_millis(500));
        assert_eq!(config.reconnect.max_delay(), Duration::from_secs(30));
        assert_eq!(config.stale_timeout(), Duration::from_secs(5));
        assert_eq!(config.distributor.capacity, 200);
        assert_eq!(config.distributor.max_consumers, 3);
        assert_eq!(config.lifecycle.stop_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn test_partial_override() {
        let config: IngestConfig = toml::from_str(
            r#"
stale_timeout_ms = 8000

[distributor]
capacity = 64
"#,
        )
        .unwrap();

        assert_eq!(config.stale_timeout_ms, 8000);
        assert_eq!(config.distributor.capacity, 64);
        assert_eq!(config.distributor.retention_ms, 5000);
        assert_eq!(config.reconnect.base_delay_ms, 500);
    }
}
