use bytes::Bytes;
use serde::Serialize;

/// 数据包类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PacketType {
    Video,
    Audio,
}

/// 媒体数据包
///
/// PTS/DTS 使用 90 kHz 时基。
#[derive(Debug, Clone)]
pub struct MediaPacket {
    pub data: Bytes,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub is_keyframe: bool,
    pub stream_index: usize,
    pub packet_type: PacketType,
}

impl MediaPacket {
    pub fn video(data: impl Into<Bytes>, pts: Option<i64>, is_keyframe: bool) -> Self {
        Self {
            data: data.into(),
            pts,
            dts: pts,
            is_keyframe,
            stream_index: 0,
            packet_type: PacketType::Video,
        }
    }

    pub fn audio(data: impl Into<Bytes>, pts: Option<i64>, stream_index: usize) -> Self {
        Self {
            data: data.into(),
            pts,
            dts: pts,
            is_keyframe: false,
            stream_index,
            packet_type: PacketType::Audio,
        }
    }

    pub fn with_dts(mut self, dts: Option<i64>) -> Self {
        self.dts = dts;
        self
    }

    pub fn with_stream_index(mut self, index: usize) -> Self {
        self.stream_index = index;
        self
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_video(&self) -> bool {
        self.packet_type == PacketType::Video
    }
}

/// 编解码参数
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CodecParameters {
    pub codec: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub clock_rate: u32,
    #[serde(skip)]
    pub extra_data: Bytes,
}

/// 已打开源的描述信息
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceInfo {
    pub video_index: usize,
    pub video: CodecParameters,
    pub audio_index: Option<usize>,
    pub audio: Option<CodecParameters>,
}

impl SourceInfo {
    pub fn video_only(codec: impl Into<String>) -> Self {
        Self {
            video_index: 0,
            video: CodecParameters {
                codec: codec.into(),
                clock_rate: 90_000,
                ..Default::default()
            },
            audio_index: None,
            audio: None,
        }
    }

    pub fn has_audio(&self) -> bool {
        self.audio_index.is_some()
    }
}
