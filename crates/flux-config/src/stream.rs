use serde::{Deserialize, Serialize};
use std::fmt;

/// 传输协议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    #[default]
    Tcp,
    Udp,
    Multicast,
}

impl TransportProtocol {
    /// 是否基于 UDP（单播或组播）
    pub fn is_udp(&self) -> bool {
        matches!(self, TransportProtocol::Udp | TransportProtocol::Multicast)
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportProtocol::Tcp => write!(f, "tcp"),
            TransportProtocol::Udp => write!(f, "udp"),
            TransportProtocol::Multicast => write!(f, "multicast"),
        }
    }
}

/// 目标检测参数
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DetectionConfig {
    #[serde(default)]
    pub enabled: bool,

    /// 模型名称或路径
    #[serde(default)]
    pub model: Option<String>,

    /// 置信度阈值（0.0-1.0）
    #[serde(default = "default_threshold")]
    pub threshold: f32,

    /// 两次检测之间的最小间隔（秒）
    #[serde(default = "default_detection_interval")]
    pub interval_secs: u32,

    /// 检测前预录时长（秒）
    #[serde(default = "default_pre_buffer")]
    pub pre_buffer_secs: u32,

    /// 检测后延录时长（秒）
    #[serde(default = "default_post_buffer")]
    pub post_buffer_secs: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: None,
            threshold: default_threshold(),
            interval_secs: default_detection_interval(),
            pre_buffer_secs: default_pre_buffer(),
            post_buffer_secs: default_post_buffer(),
        }
    }
}

/// 单路流配置（会话期间只读）
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StreamConfig {
    /// 流名称，全局唯一
    pub name: String,

    /// 源地址，例如 rtsp://192.168.1.100:554/stream1
    pub url: String,

    #[serde(default)]
    pub protocol: TransportProtocol,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// 分片时长（秒）
    #[serde(default = "default_segment_duration")]
    pub segment_duration: u32,

    /// 帧率提示，用于推算下一帧 PTS
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// HLS 直播
    #[serde(default = "default_true")]
    pub streaming_enabled: bool,

    /// MP4 录像
    #[serde(default)]
    pub record: bool,

    /// 录像是否包含音频
    #[serde(default)]
    pub record_audio: bool,

    #[serde(default)]
    pub motion_detection: bool,

    #[serde(default)]
    pub detection: DetectionConfig,
}

impl StreamConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            protocol: TransportProtocol::default(),
            enabled: true,
            segment_duration: default_segment_duration(),
            fps: default_fps(),
            streaming_enabled: true,
            record: false,
            record_audio: false,
            motion_detection: false,
            detection: DetectionConfig::default(),
        }
    }

    pub fn with_protocol(mut self, protocol: TransportProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_recording(mut self, record: bool) -> Self {
        self.record = record;
        self
    }

    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.streaming_enabled = enabled;
        self
    }

    pub fn with_detection(mut self, detection: DetectionConfig) -> Self {
        self.detection = detection;
        self
    }
}

fn default_true() -> bool {
    true
}

fn default_threshold() -> f32 {
    0.5
}

fn default_detection_interval() -> u32 {
    10
}

fn default_pre_buffer() -> u32 {
    5
}

fn default_post_buffer() -> u32 {
    10
}

fn default_segment_duration() -> u32 {
    6
}

fn default_fps() -> u32 {
    15
}
