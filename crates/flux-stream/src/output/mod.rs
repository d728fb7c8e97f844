pub mod pump;

use crate::error::WriteError;
use crate::stream::{MediaPacket, SourceInfo};
use async_trait::async_trait;

pub use pump::WriterPump;

/// 输出写入器（HLS 分片、MP4 录像等）
#[async_trait]
pub trait OutputWriter: Send {
    fn name(&self) -> &str;

    async fn write_packet(
        &mut self,
        packet: &MediaPacket,
        source: &SourceInfo,
    ) -> Result<(), WriteError>;

    /// 是否已开始写出（收到首个关键帧之后）
    fn is_writing(&self) -> bool;

    async fn flush(&mut self) -> Result<(), WriteError>;
}
