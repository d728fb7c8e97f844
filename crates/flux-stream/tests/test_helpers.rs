#![allow(dead_code)]

use async_trait::async_trait;
use flux_config::TransportProtocol;
use flux_stream::{
    MediaPacket, MediaSource, MediaTransport, OutputWriter, SourceInfo, StreamEvent,
    TransportError, WriteError,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// 永远连不上的源
pub struct UnreachableTransport {
    pub opens: Arc<AtomicU32>,
}

impl UnreachableTransport {
    pub fn new() -> Self {
        Self {
            opens: Arc::new(AtomicU32::new(0)),
        }
    }
}

#[async_trait]
impl MediaTransport for UnreachableTransport {
    async fn open(
        &self,
        _url: &str,
        _protocol: TransportProtocol,
    ) -> Result<Box<dyn MediaSource>, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Err(TransportError::Open("connection refused".into()))
    }
}

/// 按固定间隔产出视频包的源，每 `gop` 个包一个关键帧
pub struct SteadyTransport {
    pub frame_interval: Duration,
    pub gop: i64,
}

impl SteadyTransport {
    pub fn new(frame_interval: Duration, gop: i64) -> Self {
        Self {
            frame_interval,
            gop,
        }
    }
}

struct SteadySource {
    info: SourceInfo,
    frame_interval: Duration,
    gop: i64,
    n: i64,
}

#[async_trait]
impl MediaTransport for SteadyTransport {
    async fn open(
        &self,
        _url: &str,
        _protocol: TransportProtocol,
    ) -> Result<Box<dyn MediaSource>, TransportError> {
        Ok(Box::new(SteadySource {
            info: SourceInfo::video_only("h264"),
            frame_interval: self.frame_interval,
            gop: self.gop,
            n: 0,
        }))
    }
}

#[async_trait]
impl MediaSource for SteadySource {
    fn source_info(&self) -> &SourceInfo {
        &self.info
    }

    async fn read_packet(&mut self) -> Result<Option<MediaPacket>, TransportError> {
        tokio::time::sleep(self.frame_interval).await;
        let n = self.n;
        self.n += 1;
        Ok(Some(MediaPacket::video(
            vec![0u8; 64],
            Some(n * 3000),
            n % self.gop == 0,
        )))
    }

    async fn close(&mut self) {}
}

/// 记录写入情况的慢写入器
#[derive(Clone, Default)]
pub struct WriteRecord {
    pub written: Arc<Mutex<Vec<Option<i64>>>>,
    pub in_flight: Arc<AtomicUsize>,
    pub flushed: Arc<AtomicUsize>,
}

pub struct SlowWriter {
    pub record: WriteRecord,
    pub write_delay: Duration,
}

#[async_trait]
impl OutputWriter for SlowWriter {
    fn name(&self) -> &str {
        "slow-writer"
    }

    async fn write_packet(
        &mut self,
        packet: &MediaPacket,
        _source: &SourceInfo,
    ) -> Result<(), WriteError> {
        self.record.in_flight.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.write_delay).await;
        self.record.written.lock().push(packet.pts);
        self.record.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_writing(&self) -> bool {
        !self.record.written.lock().is_empty()
    }

    async fn flush(&mut self) -> Result<(), WriteError> {
        self.record.flushed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 第一次写入就卡住、永不返回的写入器
pub struct StalledWriter {
    pub entered: Arc<AtomicBool>,
}

#[async_trait]
impl OutputWriter for StalledWriter {
    fn name(&self) -> &str {
        "stalled-writer"
    }

    async fn write_packet(
        &mut self,
        _packet: &MediaPacket,
        _source: &SourceInfo,
    ) -> Result<(), WriteError> {
        self.entered.store(true, Ordering::SeqCst);
        std::future::pending().await
    }

    fn is_writing(&self) -> bool {
        self.entered.load(Ordering::SeqCst)
    }

    async fn flush(&mut self) -> Result<(), WriteError> {
        Ok(())
    }
}

/// 取出当前已收到的全部事件
pub fn drain_events(rx: &mut broadcast::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}
