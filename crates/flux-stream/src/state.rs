use crate::connection::ConnectionState;
use crate::distributor::{ConsumerId, PacketDistributor};
use crate::error::StreamError;
use crate::events::StreamEvent;
use crate::protocol::{effective_protocol, is_multicast_url, ProtocolSettings};
use crate::stream::{MediaPacket, SourceInfo};
use chrono::{DateTime, Utc};
use flux_config::{StreamConfig, TransportProtocol};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// PTS 时基（90 kHz）
pub const PTS_TIMEBASE: i64 = 90_000;

/// 超过多少个帧间隔视为时间戳跳变
const DISCONTINUITY_FRAMES: i64 = 10;

/// 流的运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationalState {
    Inactive,
    Starting,
    Active,
    Stopping,
    Error,
    Reconnecting,
}

impl OperationalState {
    pub fn can_transition_to(self, to: OperationalState) -> bool {
        use OperationalState::*;
        matches!(
            (self, to),
            (Inactive, Starting)
                | (Starting, Active | Reconnecting | Error | Stopping | Inactive)
                | (Active, Reconnecting | Error | Stopping)
                | (Reconnecting, Active | Error | Stopping)
                | (Error, Active | Reconnecting | Stopping)
                | (Stopping, Inactive)
        )
    }

    /// 是否存在运行实例
    pub fn is_running(self) -> bool {
        matches!(
            self,
            OperationalState::Starting
                | OperationalState::Active
                | OperationalState::Reconnecting
                | OperationalState::Error
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationalState::Inactive => "inactive",
            OperationalState::Starting => "starting",
            OperationalState::Active => "active",
            OperationalState::Stopping => "stopping",
            OperationalState::Error => "error",
            OperationalState::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for OperationalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const COMPONENT_KINDS: usize = 6;

/// 持有流引用的组件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Reader,
    Hls,
    Mp4,
    Detection,
    Api,
    Other,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; COMPONENT_KINDS] = [
        ComponentKind::Reader,
        ComponentKind::Hls,
        ComponentKind::Mp4,
        ComponentKind::Detection,
        ComponentKind::Api,
        ComponentKind::Other,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Reader => "reader",
            ComponentKind::Hls => "hls",
            ComponentKind::Mp4 => "mp4",
            ComponentKind::Detection => "detection",
            ComponentKind::Api => "api",
            ComponentKind::Other => "other",
        }
    }

    /// 对应的关闭协调器组件类型
    pub fn shutdown_kind(&self) -> flux_shutdown::ComponentKind {
        match self {
            ComponentKind::Reader => flux_shutdown::ComponentKind::StreamReader,
            ComponentKind::Hls => flux_shutdown::ComponentKind::HlsWriter,
            ComponentKind::Mp4 => flux_shutdown::ComponentKind::Mp4Writer,
            ComponentKind::Detection => flux_shutdown::ComponentKind::Detection,
            ComponentKind::Api => flux_shutdown::ComponentKind::Server,
            ComponentKind::Other => flux_shutdown::ComponentKind::Other,
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 可运行时切换的功能
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    Streaming,
    Recording,
    Detection,
    MotionDetection,
    RecordAudio,
}

impl FromStr for Feature {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "streaming" | "hls" => Ok(Feature::Streaming),
            "recording" | "record" => Ok(Feature::Recording),
            "detection" => Ok(Feature::Detection),
            "motion_detection" | "motion" => Ok(Feature::MotionDetection),
            "record_audio" => Ok(Feature::RecordAudio),
            other => Err(StreamError::UnknownFeature(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamFeatures {
    pub streaming: bool,
    pub recording: bool,
    pub detection: bool,
    pub motion_detection: bool,
    pub record_audio: bool,
}

impl StreamFeatures {
    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            streaming: config.streaming_enabled,
            recording: config.record,
            detection: config.detection.enabled,
            motion_detection: config.motion_detection,
            record_audio: config.record_audio,
        }
    }

    pub fn is_enabled(&self, feature: Feature) -> bool {
        match feature {
            Feature::Streaming => self.streaming,
            Feature::Recording => self.recording,
            Feature::Detection => self.detection,
            Feature::MotionDetection => self.motion_detection,
            Feature::RecordAudio => self.record_audio,
        }
    }

    fn set(&mut self, feature: Feature, enabled: bool) -> bool {
        let slot = match feature {
            Feature::Streaming => &mut self.streaming,
            Feature::Recording => &mut self.recording,
            Feature::Detection => &mut self.detection,
            Feature::MotionDetection => &mut self.motion_detection,
            Feature::RecordAudio => &mut self.record_audio,
        };
        std::mem::replace(slot, enabled)
    }

    /// 某类写入器当前是否允许投递
    pub fn allows(&self, kind: ComponentKind) -> bool {
        match kind {
            ComponentKind::Hls => self.streaming,
            ComponentKind::Mp4 => self.recording,
            ComponentKind::Detection => self.detection,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProtocolState {
    pub protocol: TransportProtocol,
    pub is_multicast: bool,
    pub reconnect_attempts: u32,
    pub last_reconnect: Option<DateTime<Utc>>,
    pub buffer_size: usize,
    pub timeout_ms: u64,
}

impl ProtocolState {
    pub fn from_config(config: &StreamConfig) -> Self {
        let protocol = effective_protocol(config.protocol, &config.url);
        let settings = ProtocolSettings::for_protocol(protocol);
        Self {
            protocol,
            is_multicast: is_multicast_url(&config.url),
            reconnect_attempts: 0,
            last_reconnect: None,
            buffer_size: settings.buffer_size,
            timeout_ms: settings.timeout.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TimestampState {
    pub last_pts: Option<i64>,
    pub last_dts: Option<i64>,
    pub expected_next_pts: Option<i64>,
    pub discontinuities: u64,
    pub initialized: bool,
}

impl TimestampState {
    /// 一帧在 90 kHz 时基下的时长
    pub fn frame_duration(fps: u32) -> i64 {
        if fps == 0 {
            3000
        } else {
            PTS_TIMEBASE / fps as i64
        }
    }

    /// 记录新的时间戳，返回是否检测到跳变（回退或间隔超过 10 帧）
    pub fn update(&mut self, pts: Option<i64>, dts: Option<i64>, fps: u32) -> bool {
        if dts.is_some() {
            self.last_dts = dts;
        }
        let Some(pts) = pts else {
            return false;
        };

        let frame = Self::frame_duration(fps);
        let discontinuity = match self.last_pts {
            Some(last) if self.initialized => {
                pts < last || pts - last > DISCONTINUITY_FRAMES * frame
            }
            _ => false,
        };
        if discontinuity {
            self.discontinuities += 1;
        }

        self.last_pts = Some(pts);
        self.expected_next_pts = Some(pts + frame);
        self.initialized = true;
        discontinuity
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    pub frames_received: u64,
    pub bytes_received: u64,
    pub errors: u64,
    pub reconnects: u64,
    pub dropped_packets: u64,
    pub write_errors: u64,
    pub detection_submitted: u64,
    pub detection_skipped: u64,
    pub last_frame_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_code: Option<i32>,
}

/// 带代数的流句柄，流被删除后重建时旧句柄失效
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamHandle {
    pub name: String,
    pub generation: u64,
}

/// 整个流记录的可序列化快照
#[derive(Debug, Clone, Serialize)]
pub struct StreamSnapshot {
    pub name: String,
    pub url: String,
    pub generation: u64,
    pub state: OperationalState,
    pub connection: ConnectionState,
    pub features: StreamFeatures,
    pub protocol: ProtocolState,
    pub timestamps: TimestampState,
    pub stats: StreamStats,
    pub ref_count: u32,
    pub component_refs: BTreeMap<ComponentKind, u32>,
    pub writers: Vec<(ComponentKind, String)>,
    pub callbacks_enabled: bool,
    pub stopping: bool,
}

pub(crate) struct WriterSlot {
    pub kind: ComponentKind,
    pub name: String,
    pub consumer: ConsumerId,
    pub cancel: CancellationToken,
    pub task: JoinHandle<()>,
}

/// 一次启动对应的运行实例
pub(crate) struct StreamRuntime {
    pub distributor: Arc<PacketDistributor>,
    pub cancel: CancellationToken,
    pub task: Option<JoinHandle<()>>,
    pub writers: Vec<WriterSlot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopBegin {
    NotRunning,
    AlreadyStopping,
    Started,
}

struct Lifecycle {
    state: OperationalState,
    component_refs: [u32; COMPONENT_KINDS],
    ref_count: u32,
    runtime: Option<StreamRuntime>,
}

struct StreamData {
    config: StreamConfig,
    features: StreamFeatures,
    protocol: ProtocolState,
    timestamps: TimestampState,
    stats: StreamStats,
    connection: ConnectionState,
    source: Option<SourceInfo>,
}

/// 单路流的状态记录
///
/// 两把互斥锁：`lifecycle` 保护运行状态、引用计数与运行实例，
/// `data` 保护配置、功能开关、协议、时间戳与统计。需要同时持有时先取 `lifecycle`。
/// 投递闸门是异步读写锁，关闭回调时会等待正在进行的写入完成。
pub struct StreamState {
    name: String,
    generation: u64,
    lifecycle: Mutex<Lifecycle>,
    data: Mutex<StreamData>,
    state_tx: watch::Sender<OperationalState>,
    callbacks_enabled: AtomicBool,
    delivery_gate: RwLock<bool>,
    stopping: AtomicBool,
    events: broadcast::Sender<StreamEvent>,
}

impl StreamState {
    pub(crate) fn new(
        config: StreamConfig,
        generation: u64,
        events: broadcast::Sender<StreamEvent>,
    ) -> Self {
        let (state_tx, _) = watch::channel(OperationalState::Inactive);
        Self {
            name: config.name.clone(),
            generation,
            lifecycle: Mutex::new(Lifecycle {
                state: OperationalState::Inactive,
                component_refs: [0; COMPONENT_KINDS],
                ref_count: 0,
                runtime: None,
            }),
            data: Mutex::new(StreamData {
                features: StreamFeatures::from_config(&config),
                protocol: ProtocolState::from_config(&config),
                timestamps: TimestampState::default(),
                stats: StreamStats::default(),
                connection: ConnectionState::Stopped,
                source: None,
                config,
            }),
            state_tx,
            callbacks_enabled: AtomicBool::new(true),
            delivery_gate: RwLock::new(true),
            stopping: AtomicBool::new(false),
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn handle(&self) -> StreamHandle {
        StreamHandle {
            name: self.name.clone(),
            generation: self.generation,
        }
    }

    pub fn state(&self) -> OperationalState {
        self.lifecycle.lock().state
    }

    pub fn subscribe_state(&self) -> watch::Receiver<OperationalState> {
        self.state_tx.subscribe()
    }

    /// 等待进入指定状态，超时返回 false
    pub async fn wait_for_state(&self, target: OperationalState, timeout: Duration) -> bool {
        let mut rx = self.state_tx.subscribe();
        let reached = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|s| *s == target)).await,
            Ok(Ok(_))
        );
        reached
    }

    /// 按允许的边迁移状态，相同状态视为无操作
    pub fn transition(&self, to: OperationalState) -> Result<OperationalState, StreamError> {
        let mut lc = self.lifecycle.lock();
        self.transition_locked(&mut lc, to)
    }

    fn transition_locked(
        &self,
        lc: &mut Lifecycle,
        to: OperationalState,
    ) -> Result<OperationalState, StreamError> {
        let from = lc.state;
        if from == to {
            return Ok(from);
        }

        // 停止过程中只允许走向 Stopping / Inactive
        if self.stopping.load(Ordering::SeqCst)
            && !matches!(to, OperationalState::Stopping | OperationalState::Inactive)
        {
            return Err(StreamError::Stopping(self.name.clone()));
        }

        if !from.can_transition_to(to) {
            return Err(StreamError::InvalidTransition {
                stream: self.name.clone(),
                from,
                to,
            });
        }

        lc.state = to;
        self.state_tx.send_replace(to);
        info!(stream = %self.name, from = %from, to = %to, "Stream state changed");
        self.emit(StreamEvent::StateChanged {
            stream: self.name.clone(),
            from,
            to,
        });
        Ok(from)
    }

    pub(crate) fn emit(&self, event: StreamEvent) {
        let _ = self.events.send(event);
    }

    // ---- 引用计数 ----

    pub fn add_ref(&self, kind: ComponentKind) -> u32 {
        let mut lc = self.lifecycle.lock();
        lc.component_refs[kind.index()] += 1;
        lc.ref_count += 1;
        debug!(stream = %self.name, component = %kind, refs = lc.ref_count, "Reference added");
        lc.ref_count
    }

    pub fn release_ref(&self, kind: ComponentKind) -> Result<u32, StreamError> {
        let mut lc = self.lifecycle.lock();
        if lc.component_refs[kind.index()] == 0 || lc.ref_count == 0 {
            warn!(stream = %self.name, component = %kind, "Reference underflow rejected");
            return Err(StreamError::RefUnderflow {
                stream: self.name.clone(),
                component: kind,
            });
        }
        lc.component_refs[kind.index()] -= 1;
        lc.ref_count -= 1;
        debug!(stream = %self.name, component = %kind, refs = lc.ref_count, "Reference released");
        Ok(lc.ref_count)
    }

    /// 获取一个 RAII 引用，析构时恰好释放一次
    pub fn acquire_ref(self: &Arc<Self>, kind: ComponentKind) -> StreamRef {
        self.add_ref(kind);
        StreamRef {
            stream: Arc::clone(self),
            kind,
            released: false,
        }
    }

    pub fn ref_count(&self) -> u32 {
        self.lifecycle.lock().ref_count
    }

    pub fn component_refs(&self, kind: ComponentKind) -> u32 {
        self.lifecycle.lock().component_refs[kind.index()]
    }

    // ---- 回调闸门 ----

    pub fn callbacks_enabled(&self) -> bool {
        self.callbacks_enabled.load(Ordering::SeqCst)
    }

    pub fn delivery_gate(&self) -> &RwLock<bool> {
        &self.delivery_gate
    }

    /// 关闭回调；返回时已没有写入器处于投递中
    ///
    /// 先拿到写锁再清标志，持读锁的投递看到的标志与闸门一致。
    /// 等待写锁期间被丢弃不会改变任何状态。
    pub(crate) async fn disable_callbacks(&self) {
        let mut gate = self.delivery_gate.write().await;
        self.callbacks_enabled.store(false, Ordering::SeqCst);
        *gate = false;
        drop(gate);
        debug!(stream = %self.name, "Callbacks disabled");
    }

    pub(crate) async fn enable_callbacks(&self) {
        *self.delivery_gate.write().await = true;
        self.callbacks_enabled.store(true, Ordering::SeqCst);
        debug!(stream = %self.name, "Callbacks enabled");
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    // ---- 运行实例 ----

    /// 在生命周期锁内启动：已有运行实例时返回 Ok(false)
    pub(crate) fn try_begin_start<F>(&self, build: F) -> Result<bool, StreamError>
    where
        F: FnOnce() -> Result<StreamRuntime, StreamError>,
    {
        let mut lc = self.lifecycle.lock();
        if self.stopping.load(Ordering::SeqCst) {
            return Err(StreamError::Stopping(self.name.clone()));
        }
        if lc.runtime.is_some() {
            return Ok(false);
        }

        self.transition_locked(&mut lc, OperationalState::Starting)?;
        match build() {
            Ok(runtime) => {
                lc.runtime = Some(runtime);
                Ok(true)
            }
            Err(e) => {
                warn!(stream = %self.name, error = %e, "Stream setup failed, rolling back");
                let _ = self.transition_locked(&mut lc, OperationalState::Inactive);
                Err(e)
            }
        }
    }

    pub(crate) fn begin_stop(&self) -> StopBegin {
        let lc = self.lifecycle.lock();
        if self.stopping.load(Ordering::SeqCst) {
            return StopBegin::AlreadyStopping;
        }
        if lc.runtime.is_none() {
            return StopBegin::NotRunning;
        }
        self.stopping.store(true, Ordering::SeqCst);
        StopBegin::Started
    }

    pub(crate) fn take_runtime(&self) -> Option<StreamRuntime> {
        self.lifecycle.lock().runtime.take()
    }

    pub(crate) fn with_runtime<R>(&self, f: impl FnOnce(&mut StreamRuntime) -> R) -> Option<R> {
        self.lifecycle.lock().runtime.as_mut().map(f)
    }

    /// 停止收尾：进入 Inactive 并清除停止标记
    pub(crate) fn complete_stop(&self) {
        let mut lc = self.lifecycle.lock();
        let _ = self.transition_locked(&mut lc, OperationalState::Stopping);
        if let Err(e) = self.transition_locked(&mut lc, OperationalState::Inactive) {
            warn!(stream = %self.name, error = %e, "Forcing stream inactive");
            lc.state = OperationalState::Inactive;
            self.state_tx.send_replace(OperationalState::Inactive);
        }
        self.stopping.store(false, Ordering::SeqCst);
    }

    pub fn has_runtime(&self) -> bool {
        self.lifecycle.lock().runtime.is_some()
    }

    pub fn distributor(&self) -> Option<Arc<PacketDistributor>> {
        self.with_runtime(|rt| Arc::clone(&rt.distributor))
    }

    /// 采集任务已退出但没有收到停止请求
    pub fn ingest_task_exited(&self) -> bool {
        let lc = self.lifecycle.lock();
        if self.stopping.load(Ordering::SeqCst) {
            return false;
        }
        lc.runtime
            .as_ref()
            .and_then(|rt| rt.task.as_ref())
            .map_or(false, |task| task.is_finished())
    }

    pub fn attached_writers(&self) -> Vec<(ComponentKind, String)> {
        self.with_runtime(|rt| {
            rt.writers
                .iter()
                .map(|w| (w.kind, w.name.clone()))
                .collect()
        })
        .unwrap_or_default()
    }

    // ---- 数据 ----

    pub fn config(&self) -> StreamConfig {
        self.data.lock().config.clone()
    }

    pub(crate) fn apply_config(&self, config: StreamConfig) {
        let mut data = self.data.lock();
        data.features = StreamFeatures::from_config(&config);
        let attempts = data.protocol.reconnect_attempts;
        data.protocol = ProtocolState::from_config(&config);
        data.protocol.reconnect_attempts = attempts;
        data.config = config;
    }

    pub fn features(&self) -> StreamFeatures {
        self.data.lock().features
    }

    pub fn is_feature_enabled(&self, feature: Feature) -> bool {
        self.data.lock().features.is_enabled(feature)
    }

    pub(crate) fn set_feature(&self, feature: Feature, enabled: bool) -> bool {
        self.data.lock().features.set(feature, enabled)
    }

    pub fn protocol_state(&self) -> ProtocolState {
        self.data.lock().protocol.clone()
    }

    pub fn timestamps(&self) -> TimestampState {
        self.data.lock().timestamps.clone()
    }

    pub fn statistics(&self) -> StreamStats {
        self.data.lock().stats.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.data.lock().connection
    }

    pub(crate) fn set_connection_state(&self, state: ConnectionState) {
        self.data.lock().connection = state;
    }

    pub fn source_info(&self) -> Option<SourceInfo> {
        self.data.lock().source.clone()
    }

    pub(crate) fn set_source_info(&self, info: Option<SourceInfo>) {
        self.data.lock().source = info;
    }

    /// 更新时间戳跟踪，返回是否检测到跳变
    pub fn update_timestamps(&self, pts: Option<i64>, dts: Option<i64>) -> bool {
        let mut data = self.data.lock();
        let fps = data.config.fps;
        let discontinuity = data.timestamps.update(pts, dts, fps);
        if discontinuity {
            debug!(
                stream = %self.name,
                pts = ?pts,
                discontinuities = data.timestamps.discontinuities,
                "Timestamp discontinuity"
            );
        }
        discontinuity
    }

    /// 记录一个采集到的包
    pub(crate) fn record_packet(&self, packet: &MediaPacket) {
        {
            let mut data = self.data.lock();
            data.stats.bytes_received += packet.size() as u64;
            if !packet.is_video() {
                return;
            }
            data.stats.frames_received += 1;
            data.stats.last_frame_time = Some(Utc::now());
        }
        self.update_timestamps(packet.pts, packet.dts);
    }

    pub(crate) fn record_error(&self, code: i32, message: &str) {
        let mut data = self.data.lock();
        data.stats.errors += 1;
        data.stats.last_error = Some(message.to_string());
        data.stats.last_error_code = Some(code);
    }

    pub(crate) fn record_reconnect_attempt(&self, attempt: u32) {
        let mut data = self.data.lock();
        data.protocol.reconnect_attempts = attempt;
        data.protocol.last_reconnect = Some(Utc::now());
    }

    pub(crate) fn record_connected(&self, reconnected: bool) {
        let mut data = self.data.lock();
        data.protocol.reconnect_attempts = 0;
        if reconnected {
            data.stats.reconnects += 1;
        }
        // 重连后时间戳重新起算
        data.timestamps = TimestampState::default();
    }

    pub(crate) fn record_dropped(&self, count: u64) {
        self.data.lock().stats.dropped_packets += count;
    }

    /// 返回累计写入错误数
    pub(crate) fn record_write_error(&self) -> u64 {
        let mut data = self.data.lock();
        data.stats.write_errors += 1;
        data.stats.write_errors
    }

    pub(crate) fn record_detection(&self, accepted: bool) {
        let mut data = self.data.lock();
        if accepted {
            data.stats.detection_submitted += 1;
        } else {
            data.stats.detection_skipped += 1;
        }
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        let lc = self.lifecycle.lock();
        let data = self.data.lock();

        StreamSnapshot {
            name: self.name.clone(),
            url: data.config.url.clone(),
            generation: self.generation,
            state: lc.state,
            connection: data.connection,
            features: data.features,
            protocol: data.protocol.clone(),
            timestamps: data.timestamps.clone(),
            stats: data.stats.clone(),
            ref_count: lc.ref_count,
            component_refs: ComponentKind::ALL
                .iter()
                .map(|k| (*k, lc.component_refs[k.index()]))
                .collect(),
            writers: lc
                .runtime
                .as_ref()
                .map(|rt| rt.writers.iter().map(|w| (w.kind, w.name.clone())).collect())
                .unwrap_or_default(),
            callbacks_enabled: self.callbacks_enabled(),
            stopping: self.is_stopping(),
        }
    }
}

/// 流引用守卫
pub struct StreamRef {
    stream: Arc<StreamState>,
    kind: ComponentKind,
    released: bool,
}

impl StreamRef {
    pub fn stream(&self) -> &Arc<StreamState> {
        &self.stream
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.stream.release_ref(self.kind) {
            warn!(stream = %self.stream.name(), error = %e, "Failed to release stream reference");
        }
    }
}

impl Drop for StreamRef {
    fn drop(&mut self) {
        self.release_once();
    }
}
