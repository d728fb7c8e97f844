#[cfg(feature = "rtsp")]
pub mod rtsp;

use crate::error::TransportError;
use crate::stream::{MediaPacket, SourceInfo};
use async_trait::async_trait;
use flux_config::TransportProtocol;

#[cfg(feature = "rtsp")]
pub use rtsp::RtspTransport;

/// 媒体传输库抽象：负责打开源
#[async_trait]
pub trait MediaTransport: Send + Sync {
    async fn open(
        &self,
        url: &str,
        protocol: TransportProtocol,
    ) -> Result<Box<dyn MediaSource>, TransportError>;
}

/// 已打开的媒体源
#[async_trait]
pub trait MediaSource: Send {
    fn source_info(&self) -> &SourceInfo;

    /// 读取下一个包，`Ok(None)` 表示 EOF
    async fn read_packet(&mut self) -> Result<Option<MediaPacket>, TransportError>;

    async fn close(&mut self);
}
