use crate::state::{Feature, StreamState};
use crate::stream::{CodecParameters, MediaPacket};
use async_trait::async_trait;
use flux_config::{DetectionSamplingConfig, StreamConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// 检测提交结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    /// 检测器忙，本帧跳过
    Busy,
}

/// 目标检测采样器（外部协作者）
#[async_trait]
pub trait DetectionSampler: Send + Sync {
    async fn submit(
        &self,
        stream: &str,
        packet: &MediaPacket,
        codec: &CodecParameters,
    ) -> SubmitOutcome;
}

/// 检测触发器
///
/// 只提交关键帧，且仅在检测开启时、每个间隔最多一次。
pub struct DetectionTrigger {
    sampler: Arc<dyn DetectionSampler>,
    interval: Duration,
    last_submit: Option<Instant>,
}

impl DetectionTrigger {
    pub fn new(sampler: Arc<dyn DetectionSampler>, interval: Duration) -> Self {
        Self {
            sampler,
            interval,
            last_submit: None,
        }
    }

    /// 实际间隔取流配置与全局下限的较大值，受限硬件上加倍
    pub fn effective_interval(stream: &StreamConfig, sampling: &DetectionSamplingConfig) -> Duration {
        let configured = Duration::from_secs(stream.detection.interval_secs as u64);
        let interval = configured.max(sampling.min_interval());
        if sampling.constrained_hardware {
            interval * 2
        } else {
            interval
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// 提交一个候选包，未提交时返回 None
    pub async fn offer(
        &mut self,
        state: &StreamState,
        packet: &MediaPacket,
        codec: &CodecParameters,
    ) -> Option<SubmitOutcome> {
        if !packet.is_keyframe || !packet.is_video() {
            return None;
        }
        if !state.is_feature_enabled(Feature::Detection) {
            return None;
        }

        let now = Instant::now();
        if let Some(last) = self.last_submit {
            if now.duration_since(last) < self.interval {
                return None;
            }
        }

        let outcome = self.sampler.submit(state.name(), packet, codec).await;
        match outcome {
            SubmitOutcome::Accepted => {
                self.last_submit = Some(now);
                state.record_detection(true);
            }
            SubmitOutcome::Busy => {
                state.record_detection(false);
                debug!(stream = %state.name(), "Detection busy, skipping key frame");
            }
        }
        Some(outcome)
    }
}
