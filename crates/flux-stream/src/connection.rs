use crate::backoff::Backoff;
use crate::context::ConnectionContext;
use crate::distributor::PacketDistributor;
use crate::error::TransportError;
use crate::events::StreamEvent;
use crate::protocol::ProtocolSettings;
use crate::state::{Feature, OperationalState, StreamState};
use crate::stream::{CodecParameters, MediaPacket};
use crate::transport::{MediaSource, MediaTransport};
use crate::trigger::DetectionTrigger;
use flux_config::IngestConfig;
use flux_logging::LogSampler;
use flux_shutdown::ComponentHandle;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 连接状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Initializing,
    Connecting,
    Running,
    Reconnecting,
    Stopping,
    Stopped,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Initializing => "initializing",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Running => "running",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Stopping => "stopping",
            ConnectionState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// 单路流的连接管理器
///
/// 负责打开源、读取数据包并推入分发队列，断线后按指数退避重连。
/// 只有外部停止请求（取消令牌）才会让它退出。
pub struct ConnectionManager {
    ctx: ConnectionContext,
    stream: Arc<StreamState>,
    transport: Arc<dyn MediaTransport>,
    distributor: Arc<PacketDistributor>,
    backoff: Backoff,
    stale_timeout: Duration,
    open_timeout: Duration,
    cancel: CancellationToken,
    detection: Option<DetectionTrigger>,
    source: Option<Box<dyn MediaSource>>,
    video_codec: CodecParameters,
    failures: LogSampler,
    component: Option<ComponentHandle>,
}

impl ConnectionManager {
    pub fn new(
        stream: Arc<StreamState>,
        transport: Arc<dyn MediaTransport>,
        distributor: Arc<PacketDistributor>,
        ingest: &IngestConfig,
        cancel: CancellationToken,
    ) -> Self {
        let config = stream.config();
        let protocol = stream.protocol_state().protocol;
        stream.set_connection_state(ConnectionState::Initializing);

        Self {
            ctx: ConnectionContext::new(config.url, protocol),
            stream,
            transport,
            distributor,
            backoff: Backoff::from_config(&ingest.reconnect),
            stale_timeout: ingest.stale_timeout(),
            open_timeout: ProtocolSettings::for_protocol(protocol).timeout,
            cancel,
            detection: None,
            source: None,
            video_codec: CodecParameters::default(),
            failures: LogSampler::exponential(),
            component: None,
        }
    }

    pub fn with_detection(mut self, trigger: DetectionTrigger) -> Self {
        self.detection = Some(trigger);
        self
    }

    /// 关联关闭协调器中的组件，退出时报告 Stopped
    pub fn with_component(mut self, handle: ComponentHandle) -> Self {
        self.component = Some(handle);
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.ctx.state
    }

    pub async fn run(mut self) {
        info!(
            stream = %self.stream.name(),
            url = %self.ctx.url,
            protocol = %self.ctx.protocol,
            "Connection manager started"
        );

        loop {
            if self.cancel.is_cancelled()
                && !matches!(
                    self.ctx.state,
                    ConnectionState::Stopping | ConnectionState::Stopped
                )
            {
                self.set_state(ConnectionState::Stopping);
            }

            match self.ctx.state {
                ConnectionState::Initializing => {
                    self.ctx.reconnect_attempt = 0;
                    self.set_state(ConnectionState::Connecting);
                }
                ConnectionState::Connecting => self.connect(false).await,
                ConnectionState::Running => self.read_next().await,
                ConnectionState::Reconnecting => self.connect(true).await,
                ConnectionState::Stopping => {
                    self.close_source().await;
                    self.ctx.mark_stopped();
                    self.set_state(ConnectionState::Stopped);
                }
                ConnectionState::Stopped => break,
            }
        }

        if let Some(component) = self.component.take() {
            component.mark_stopped();
        }
        info!(stream = %self.stream.name(), "Connection manager exited");
    }

    fn set_state(&mut self, to: ConnectionState) {
        let from = self.ctx.state;
        if from == to {
            return;
        }
        self.ctx.state = to;
        self.stream.set_connection_state(to);

        info!(stream = %self.stream.name(), from = %from, to = %to, "Connection state changed");
        self.stream.emit(StreamEvent::ConnectionStateChanged {
            stream: self.stream.name().to_string(),
            from,
            to,
        });
    }

    fn set_stream_state(&self, to: OperationalState) {
        if let Err(e) = self.stream.transition(to) {
            debug!(stream = %self.stream.name(), to = %to, error = %e, "Stream state not updated");
        }
    }

    /// 可被取消的退避等待，被取消时返回 false 并进入 Stopping
    async fn backoff_sleep(&mut self, attempt: u32, delay: Duration) -> bool {
        self.stream.emit(StreamEvent::ReconnectScheduled {
            stream: self.stream.name().to_string(),
            attempt,
            delay,
        });

        let cancel = self.cancel.clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.set_state(ConnectionState::Stopping);
                false
            }
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn connect(&mut self, reconnecting: bool) {
        self.close_source().await;

        if reconnecting {
            let attempt = self.ctx.reconnect_attempt.max(1);
            let delay = self.backoff.delay(attempt);
            if !self.backoff_sleep(attempt, delay).await {
                return;
            }
        }

        let transport = Arc::clone(&self.transport);
        let cancel = self.cancel.clone();
        let url = self.ctx.url.clone();
        let protocol = self.ctx.protocol;
        let open_timeout = self.open_timeout;

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            r = tokio::time::timeout(open_timeout, transport.open(&url, protocol)) => {
                Some(r.unwrap_or(Err(TransportError::Timeout(open_timeout))))
            }
        };

        match opened {
            None => self.set_state(ConnectionState::Stopping),
            Some(Ok(source)) => self.on_connected(source, reconnecting),
            Some(Err(e)) => self.on_open_failed(e, reconnecting).await,
        }
    }

    fn on_connected(&mut self, source: Box<dyn MediaSource>, reconnected: bool) {
        let info = source.source_info().clone();
        self.video_codec = info.video.clone();
        self.stream.set_source_info(Some(info));
        self.source = Some(source);

        let attempts = self.ctx.reconnect_attempt;
        self.ctx.mark_connected(Instant::now());
        let suppressed = self.failures.take_suppressed();
        self.failures.reset();
        self.stream.record_connected(reconnected);

        info!(
            stream = %self.stream.name(),
            protocol = %self.ctx.protocol,
            codec = %self.video_codec.codec,
            attempts,
            suppressed_failures = suppressed,
            reconnected,
            "Connected to source"
        );

        self.set_stream_state(OperationalState::Active);
        self.set_state(ConnectionState::Running);
    }

    async fn on_open_failed(&mut self, err: TransportError, reconnecting: bool) {
        let attempt = self.backoff.next_attempt(self.ctx.reconnect_attempt);
        let delay = self.backoff.delay(attempt);
        self.ctx.reconnect_attempt = attempt;
        self.ctx.connection_valid = false;

        self.stream.record_error(err.code(), &err.to_string());
        self.stream.record_reconnect_attempt(attempt);
        self.set_stream_state(OperationalState::Reconnecting);

        if self.failures.should_sample() {
            warn!(
                stream = %self.stream.name(),
                url = %self.ctx.url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                suppressed = self.failures.take_suppressed(),
                error = %err,
                "Failed to connect to source"
            );
        } else {
            debug!(stream = %self.stream.name(), attempt, error = %err, "Connect attempt failed");
        }

        // Reconnecting 在下一轮开始时等待；Connecting 原地等待后重试
        if !reconnecting {
            self.backoff_sleep(attempt, delay).await;
        }
    }

    async fn read_next(&mut self) {
        if self.source.is_none() {
            self.on_read_failed(TransportError::Closed).await;
            return;
        }
        let Some(source) = self.source.as_mut() else {
            return;
        };

        let since_last = self
            .ctx
            .last_packet
            .map_or(Duration::ZERO, |t| t.elapsed());
        let remaining = self.stale_timeout.saturating_sub(since_last);
        let cancel = self.cancel.clone();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            r = tokio::time::timeout(remaining, source.read_packet()) => Some(r),
        };

        match outcome {
            None => self.set_state(ConnectionState::Stopping),
            Some(Err(_)) => {
                let stale = TransportError::Timeout(self.stale_timeout);
                self.on_read_failed(stale).await;
            }
            Some(Ok(Err(e))) => self.on_read_failed(e).await,
            Some(Ok(Ok(None))) => self.on_read_failed(TransportError::Eof).await,
            Some(Ok(Ok(Some(packet)))) => self.on_packet(packet).await,
        }
    }

    async fn on_read_failed(&mut self, err: TransportError) {
        self.close_source().await;
        self.ctx.mark_read_failed();
        self.stream.record_error(err.code(), &err.to_string());

        warn!(
            stream = %self.stream.name(),
            consecutive_failures = self.ctx.consecutive_failures,
            error = %err,
            "Lost connection to source"
        );

        self.set_stream_state(OperationalState::Reconnecting);
        self.set_state(ConnectionState::Reconnecting);
    }

    async fn on_packet(&mut self, packet: MediaPacket) {
        let is_video = packet.is_video();
        if is_video {
            self.ctx.last_packet = Some(Instant::now());
        }
        self.stream.record_packet(&packet);

        if is_video && packet.is_keyframe {
            if let Some(trigger) = self.detection.as_mut() {
                let cancel = self.cancel.clone();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    _ = trigger.offer(&self.stream, &packet, &self.video_codec) => {}
                }
            }
        }

        let deliver = is_video || self.stream.is_feature_enabled(Feature::RecordAudio);
        if deliver && self.stream.callbacks_enabled() {
            self.distributor.push(packet);
        }
    }

    async fn close_source(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.close().await;
            self.stream.set_source_info(None);
            debug!(stream = %self.stream.name(), "Source closed");
        }
    }
}
