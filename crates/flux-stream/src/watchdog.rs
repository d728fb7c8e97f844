use crate::events::StreamEvent;
use crate::manager::StreamStateManager;
use flux_config::LifecycleConfig;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 看门狗放弃重启时记录的错误码
pub const WATCHDOG_GAVE_UP_CODE: i32 = 100;

/// 采集任务看门狗
///
/// 定期检查采集任务是否在没有停止请求的情况下退出（例如任务 panic），
/// 并在冷却窗口内的重启次数未超限时重启该流。
pub struct Watchdog {
    manager: StreamStateManager,
    interval: Duration,
    max_restarts: u32,
    cooldown: Duration,
    history: HashMap<String, VecDeque<Instant>>,
}

impl Watchdog {
    pub fn new(manager: StreamStateManager, lifecycle: &LifecycleConfig) -> Self {
        Self {
            manager,
            interval: lifecycle.watchdog_interval().max(Duration::from_millis(100)),
            max_restarts: lifecycle.watchdog_max_restarts,
            cooldown: lifecycle.watchdog_cooldown(),
            history: HashMap::new(),
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            max_restarts = self.max_restarts,
            "Stream watchdog started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let restarted = self.check_once().await;
                    if restarted > 0 {
                        debug!(restarted, "Watchdog pass finished");
                    }
                }
            }
        }

        info!("Stream watchdog stopped");
    }

    /// 执行一轮检查，返回重启的流数量
    pub async fn check_once(&mut self) -> usize {
        let now = Instant::now();
        let mut restarted = 0;

        for stream in self.manager.list() {
            if !stream.ingest_task_exited() {
                continue;
            }
            let name = stream.name().to_string();

            let history = self.history.entry(name.clone()).or_default();
            while history
                .front()
                .map_or(false, |t| now.duration_since(*t) >= self.cooldown)
            {
                history.pop_front();
            }

            if history.len() as u32 >= self.max_restarts {
                error!(
                    stream = %name,
                    restarts = history.len(),
                    cooldown_secs = self.cooldown.as_secs(),
                    "Ingest task keeps exiting, giving up"
                );
                if let Err(e) = self.manager.stop(&stream, true).await {
                    warn!(stream = %name, error = %e, "Failed to stop stream");
                }
                let message = "ingest task restart limit reached";
                stream.record_error(WATCHDOG_GAVE_UP_CODE, message);
                stream.emit(StreamEvent::Error {
                    stream: name,
                    code: WATCHDOG_GAVE_UP_CODE,
                    message: message.to_string(),
                    recoverable: false,
                });
                continue;
            }

            history.push_back(now);
            let restarts = history.len() as u32;
            warn!(stream = %name, restarts, "Ingest task exited unexpectedly, restarting");

            if let Err(e) = self.manager.stop(&stream, true).await {
                warn!(stream = %name, error = %e, "Stream did not stop cleanly");
            }
            match self.manager.start(&stream) {
                Ok(()) => {
                    restarted += 1;
                    stream.emit(StreamEvent::WatchdogRestart {
                        stream: name,
                        restarts,
                    });
                }
                Err(e) => warn!(stream = %name, error = %e, "Watchdog restart failed"),
            }
        }

        let manager = &self.manager;
        self.history.retain(|name, _| manager.get(name).is_some());
        restarted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::state::OperationalState;
    use crate::stream::{MediaPacket, SourceInfo};
    use crate::transport::{MediaSource, MediaTransport};
    use async_trait::async_trait;
    use flux_config::{IngestConfig, StreamConfig, TransportProtocol};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct PanickingTransport {
        opens: Arc<AtomicU32>,
    }

    struct PanickingSource {
        info: SourceInfo,
    }

    #[async_trait]
    impl MediaTransport for PanickingTransport {
        async fn open(
            &self,
            _url: &str,
            _protocol: TransportProtocol,
        ) -> Result<Box<dyn MediaSource>, TransportError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(PanickingSource {
                info: SourceInfo::video_only("h264"),
            }))
        }
    }

    #[async_trait]
    impl MediaSource for PanickingSource {
        fn source_info(&self) -> &SourceInfo {
            &self.info
        }

        async fn read_packet(&mut self) -> Result<Option<MediaPacket>, TransportError> {
            panic!("demuxer crashed");
        }

        async fn close(&mut self) {}
    }

    async fn wait_exited(stream: &crate::state::StreamState) {
        for _ in 0..100 {
            if stream.ingest_task_exited() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("ingest task never exited");
    }

    #[tokio::test(start_paused = true)]
    async fn test_restarts_until_limit() {
        let opens = Arc::new(AtomicU32::new(0));
        let mut ingest = IngestConfig::default();
        ingest.lifecycle.watchdog_max_restarts = 2;
        let manager = StreamStateManager::builder(Arc::new(PanickingTransport {
            opens: opens.clone(),
        }))
        .with_ingest_config(ingest.clone())
        .build();

        let stream = manager
            .create(StreamConfig::new("cam1", "rtsp://cam/1"))
            .unwrap();
        manager.start(&stream).unwrap();
        let mut watchdog = Watchdog::new(manager.clone(), &ingest.lifecycle);

        wait_exited(&stream).await;
        assert_eq!(watchdog.check_once().await, 1);
        wait_exited(&stream).await;
        assert_eq!(watchdog.check_once().await, 1);

        // 重启后的任务打开源并崩溃后才算退出
        wait_exited(&stream).await;
        assert_eq!(opens.load(Ordering::SeqCst), 3);
        assert_eq!(watchdog.check_once().await, 0);
        assert!(!stream.has_runtime());
        assert_eq!(stream.state(), OperationalState::Inactive);
        assert_eq!(
            stream.statistics().last_error_code,
            Some(WATCHDOG_GAVE_UP_CODE)
        );
    }

    #[tokio::test]
    async fn test_healthy_stream_left_alone() {
        let opens = Arc::new(AtomicU32::new(0));
        let manager = StreamStateManager::builder(Arc::new(PanickingTransport {
            opens: opens.clone(),
        }))
        .build();
        manager
            .create(StreamConfig::new("idle", "rtsp://cam/idle"))
            .unwrap();

        let mut watchdog = Watchdog::new(manager.clone(), &LifecycleConfig::default());
        assert_eq!(watchdog.check_once().await, 0);
        assert_eq!(opens.load(Ordering::SeqCst), 0);
    }
}
