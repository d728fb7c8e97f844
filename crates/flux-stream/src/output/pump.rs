use super::OutputWriter;
use crate::distributor::{ConsumerId, PacketDistributor, ReceiveOutcome};
use crate::error::DistributorError;
use crate::state::{ComponentKind, StreamRef, StreamState};
use flux_logging::LogSampler;
use flux_shutdown::ComponentHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 写入错误每隔多少次记一条日志（关键帧上的错误总是记录）
const WRITE_ERROR_LOG_EVERY: u64 = 100;

/// 写入泵：从分发队列拉取数据包交给写入器
///
/// 一个写入器一个任务。只有回调开启且对应功能打开时才投递，
/// 投递期间持有投递闸门的读锁。
pub struct WriterPump {
    stream: Arc<StreamState>,
    distributor: Arc<PacketDistributor>,
    consumer: ConsumerId,
    kind: ComponentKind,
    writer: Box<dyn OutputWriter>,
    cancel: CancellationToken,
    poll_timeout: Duration,
    stream_ref: StreamRef,
    component: Option<ComponentHandle>,
    pressure_log: LogSampler,
}

impl WriterPump {
    pub fn new(
        stream_ref: StreamRef,
        distributor: Arc<PacketDistributor>,
        consumer: ConsumerId,
        writer: Box<dyn OutputWriter>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            stream: Arc::clone(stream_ref.stream()),
            kind: stream_ref.kind(),
            distributor,
            consumer,
            writer,
            cancel,
            poll_timeout: Duration::from_millis(500),
            stream_ref,
            component: None,
            pressure_log: LogSampler::exponential(),
        }
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_component(mut self, handle: ComponentHandle) -> Self {
        self.component = Some(handle);
        self
    }

    pub async fn run(mut self) {
        let name = self.stream.name().to_string();
        let writer_name = self.writer.name().to_string();
        info!(stream = %name, writer = %writer_name, kind = %self.kind, "Writer pump started");

        let mut waiting_for_keyframe = true;
        let mut delivered: u64 = 0;
        let mut write_errors: u64 = 0;

        loop {
            let cancel = self.cancel.clone();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                r = self.distributor.get(self.consumer, self.poll_timeout) => r,
            };

            let queued = match outcome {
                Ok(ReceiveOutcome::Packet(queued)) => queued,
                Ok(ReceiveOutcome::Timeout) => continue,
                Ok(ReceiveOutcome::UnderPressure { skipped }) => {
                    self.stream.record_dropped(skipped);
                    waiting_for_keyframe = true;
                    if self.pressure_log.should_sample() {
                        warn!(
                            stream = %name,
                            writer = %writer_name,
                            skipped,
                            "Writer fell behind, waiting for next key frame"
                        );
                    }
                    continue;
                }
                Ok(ReceiveOutcome::Abort) => break,
                Err(DistributorError::ConsumerNotFound(_)) | Err(DistributorError::Closed) => break,
                Err(e) => {
                    warn!(stream = %name, writer = %writer_name, error = %e, "Distributor error");
                    break;
                }
            };

            let packet = &queued.packet;
            if !self.stream.features().allows(self.kind) {
                // 功能关闭期间丢弃，重新开启后从关键帧恢复
                waiting_for_keyframe = true;
                continue;
            }
            if waiting_for_keyframe {
                if !(packet.is_keyframe && packet.is_video()) {
                    continue;
                }
                waiting_for_keyframe = false;
            }

            let gate = self.stream.delivery_gate().read().await;
            if !*gate {
                waiting_for_keyframe = true;
                continue;
            }

            let source = self.stream.source_info().unwrap_or_default();
            let cancel = self.cancel.clone();
            let written = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                r = self.writer.write_packet(packet, &source) => r,
            };
            match written {
                Ok(()) => delivered += 1,
                Err(e) => {
                    write_errors += 1;
                    self.stream.record_write_error();
                    if packet.is_keyframe || write_errors % WRITE_ERROR_LOG_EVERY == 0 {
                        warn!(
                            stream = %name,
                            writer = %writer_name,
                            errors = write_errors,
                            error = %e,
                            "Failed to write packet"
                        );
                    }
                }
            }
            drop(gate);
        }

        if let Err(e) = self.writer.flush().await {
            warn!(stream = %name, writer = %writer_name, error = %e, "Failed to flush writer");
        }

        info!(
            stream = %name,
            writer = %writer_name,
            delivered,
            write_errors,
            "Writer pump exited"
        );

        if let Some(component) = self.component.take() {
            component.mark_stopped();
        }
        self.stream_ref.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WriteError;
    use crate::stream::{MediaPacket, SourceInfo};
    use async_trait::async_trait;
    use flux_config::StreamConfig;
    use parking_lot::Mutex;
    use tokio::sync::broadcast;

    struct CollectingWriter {
        packets: Arc<Mutex<Vec<Option<i64>>>>,
        fail: bool,
    }

    #[async_trait]
    impl OutputWriter for CollectingWriter {
        fn name(&self) -> &str {
            "collect"
        }

        async fn write_packet(
            &mut self,
            packet: &MediaPacket,
            _source: &SourceInfo,
        ) -> Result<(), WriteError> {
            if self.fail {
                return Err(WriteError::Rejected("disk full".into()));
            }
            self.packets.lock().push(packet.pts);
            Ok(())
        }

        fn is_writing(&self) -> bool {
            !self.packets.lock().is_empty()
        }

        async fn flush(&mut self) -> Result<(), WriteError> {
            Ok(())
        }
    }

    fn setup(
        fail: bool,
    ) -> (
        Arc<StreamState>,
        Arc<PacketDistributor>,
        Arc<Mutex<Vec<Option<i64>>>>,
        CancellationToken,
        tokio::task::JoinHandle<()>,
    ) {
        let (tx, _) = broadcast::channel(16);
        let stream = Arc::new(StreamState::new(
            StreamConfig::new("cam1", "rtsp://cam/1"),
            1,
            tx,
        ));
        let distributor =
            Arc::new(PacketDistributor::new("cam1", 16, Duration::from_secs(5), 2).unwrap());
        let consumer = distributor.register_consumer().unwrap();
        let packets = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();

        let pump = WriterPump::new(
            stream.acquire_ref(ComponentKind::Hls),
            distributor.clone(),
            consumer,
            Box::new(CollectingWriter {
                packets: packets.clone(),
                fail,
            }),
            cancel.clone(),
        )
        .with_poll_timeout(Duration::from_millis(20));

        let task = tokio::spawn(pump.run());
        (stream, distributor, packets, cancel, task)
    }

    #[tokio::test]
    async fn test_pump_starts_at_keyframe_and_releases_ref() {
        let (stream, distributor, packets, cancel, task) = setup(false);
        assert_eq!(stream.component_refs(ComponentKind::Hls), 1);

        distributor.push(MediaPacket::video(vec![0u8; 4], Some(0), false));
        distributor.push(MediaPacket::video(vec![1u8; 4], Some(3000), true));
        distributor.push(MediaPacket::video(vec![2u8; 4], Some(6000), false));

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(*packets.lock(), vec![Some(3000), Some(6000)]);
        assert_eq!(stream.ref_count(), 0);
    }

    #[tokio::test]
    async fn test_pump_respects_feature_flag() {
        let (stream, distributor, packets, cancel, task) = setup(false);
        stream.set_feature(crate::state::Feature::Streaming, false);

        distributor.push(MediaPacket::video(vec![1u8; 4], Some(0), true));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(packets.lock().is_empty());

        stream.set_feature(crate::state::Feature::Streaming, true);
        distributor.push(MediaPacket::video(vec![2u8; 4], Some(3000), false));
        distributor.push(MediaPacket::video(vec![3u8; 4], Some(6000), true));
        tokio::time::sleep(Duration::from_millis(60)).await;

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(*packets.lock(), vec![Some(6000)]);
    }

    #[tokio::test]
    async fn test_write_errors_counted() {
        let (stream, distributor, _packets, _cancel, task) = setup(true);

        distributor.push(MediaPacket::video(vec![1u8; 4], Some(0), true));
        distributor.push(MediaPacket::video(vec![2u8; 4], Some(3000), false));
        tokio::time::sleep(Duration::from_millis(60)).await;

        distributor.shutdown();
        task.await.unwrap();
        assert_eq!(stream.statistics().write_errors, 2);
        assert_eq!(stream.ref_count(), 0);
    }
}
