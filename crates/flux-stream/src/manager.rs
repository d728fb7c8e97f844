use crate::connection::ConnectionManager;
use crate::distributor::{ConsumerId, PacketDistributor, StartPosition};
use crate::error::{Result, StreamError};
use crate::events::StreamEvent;
use crate::output::{OutputWriter, WriterPump};
use crate::state::{
    ComponentKind, Feature, OperationalState, StopBegin, StreamHandle, StreamRef, StreamRuntime,
    StreamSnapshot, StreamState, StreamStats, WriterSlot,
};
use crate::transport::MediaTransport;
use crate::trigger::{DetectionSampler, DetectionTrigger};
use crate::watchdog::Watchdog;
use flux_config::{validate_stream, ConfigProvider, IngestConfig, StreamConfig, TransportProtocol};
use flux_shutdown::ShutdownCoordinator;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const DEFAULT_EVENT_CAPACITY: usize = 256;

struct ManagerInner {
    streams: RwLock<HashMap<String, Arc<StreamState>>>,
    transport: Arc<dyn MediaTransport>,
    coordinator: ShutdownCoordinator,
    ingest: IngestConfig,
    detection: Option<Arc<dyn DetectionSampler>>,
    events: broadcast::Sender<StreamEvent>,
    next_generation: AtomicU64,
}

/// 流状态管理器
///
/// 流注册表与生命周期入口：创建、启动、停止、引用计数和写入器挂载都经由这里，
/// 保证任何消费者都不会在流开始拆除后再访问数据源或写入器。
#[derive(Clone)]
pub struct StreamStateManager {
    inner: Arc<ManagerInner>,
}

impl StreamStateManager {
    pub fn builder(transport: Arc<dyn MediaTransport>) -> StreamStateManagerBuilder {
        StreamStateManagerBuilder::new(transport)
    }

    pub fn coordinator(&self) -> &ShutdownCoordinator {
        &self.inner.coordinator
    }

    pub fn ingest_config(&self) -> &IngestConfig {
        &self.inner.ingest
    }

    /// 订阅流事件
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.inner.events.subscribe()
    }

    // ---- 注册表 ----

    /// 注册一路流，初始状态 Inactive
    pub fn create(&self, config: StreamConfig) -> Result<Arc<StreamState>> {
        validate_stream(&config).map_err(|e| StreamError::Config(e.to_string()))?;

        let mut streams = self.inner.streams.write();
        if streams.contains_key(&config.name) {
            return Err(StreamError::AlreadyExists(config.name));
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let name = config.name.clone();
        let url = config.url.clone();
        let state = Arc::new(StreamState::new(
            config,
            generation,
            self.inner.events.clone(),
        ));
        streams.insert(name.clone(), Arc::clone(&state));
        drop(streams);

        info!(stream = %name, url = %url, generation, "Stream created");
        let _ = self.inner.events.send(StreamEvent::Created {
            stream: name,
            generation,
        });
        Ok(state)
    }

    pub fn get(&self, name: &str) -> Option<Arc<StreamState>> {
        self.inner.streams.read().get(name).cloned()
    }

    /// 按句柄查找，代数不一致（流已被删除重建）时返回 None
    pub fn get_by_handle(&self, handle: &StreamHandle) -> Option<Arc<StreamState>> {
        self.get(&handle.name)
            .filter(|s| s.generation() == handle.generation)
    }

    pub fn list(&self) -> Vec<Arc<StreamState>> {
        let mut streams: Vec<Arc<StreamState>> =
            self.inner.streams.read().values().cloned().collect();
        streams.sort_by(|a, b| a.name().cmp(b.name()));
        streams
    }

    pub fn names(&self) -> Vec<String> {
        self.list().iter().map(|s| s.name().to_string()).collect()
    }

    pub fn count(&self) -> usize {
        self.inner.streams.read().len()
    }

    /// 删除流：仍被引用时拒绝，运行中的流先停止
    pub async fn remove(&self, name: &str) -> Result<()> {
        let stream = self
            .get(name)
            .ok_or_else(|| StreamError::NotFound(name.to_string()))?;

        let refs = stream.ref_count();
        if refs > 0 {
            return Err(StreamError::InUse {
                stream: name.to_string(),
                refs,
            });
        }

        if let Err(e) = self.stop(&stream, true).await {
            warn!(stream = %name, error = %e, "Stream did not stop cleanly before removal");
        }

        let mut streams = self.inner.streams.write();
        let refs = stream.ref_count();
        if refs > 0 {
            return Err(StreamError::InUse {
                stream: name.to_string(),
                refs,
            });
        }
        match streams.get(name) {
            Some(current) if Arc::ptr_eq(current, &stream) => {
                streams.remove(name);
            }
            _ => return Err(StreamError::NotFound(name.to_string())),
        }
        drop(streams);

        info!(stream = %name, "Stream removed");
        let _ = self.inner.events.send(StreamEvent::Removed {
            stream: name.to_string(),
        });
        Ok(())
    }

    /// 从配置提供者同步流，`autostart` 时启动已启用的流，返回启动的流名
    pub fn sync_from_provider(
        &self,
        provider: &dyn ConfigProvider,
        autostart: bool,
    ) -> Result<Vec<String>> {
        let mut started = Vec::new();
        for name in provider.stream_names() {
            let Some(config) = provider.stream_config(&name) else {
                continue;
            };
            let enabled = config.enabled;
            let stream = match self.get(&name) {
                Some(existing) => existing,
                None => self.create(config)?,
            };
            if autostart && enabled {
                self.start(&stream)?;
                started.push(name);
            }
        }
        Ok(started)
    }

    // ---- 生命周期 ----

    /// 启动流；已有运行实例时为无操作
    pub fn start(&self, stream: &Arc<StreamState>) -> Result<()> {
        let name = stream.name().to_string();
        let ingest = &self.inner.ingest;

        let started = stream.try_begin_start(|| {
            let distributor = Arc::new(PacketDistributor::from_config(
                name.as_str(),
                &ingest.distributor,
            )?);
            let component = self.inner.coordinator.register_kind(
                format!("{}/reader", name),
                flux_shutdown::ComponentKind::StreamReader,
                ingest.lifecycle.stop_timeout(),
            )?;
            let cancel = self.inner.coordinator.child_token();

            let mut connection = ConnectionManager::new(
                Arc::clone(stream),
                Arc::clone(&self.inner.transport),
                Arc::clone(&distributor),
                ingest,
                cancel.clone(),
            )
            .with_component(component);

            if let Some(sampler) = &self.inner.detection {
                let interval =
                    DetectionTrigger::effective_interval(&stream.config(), &ingest.detection);
                connection =
                    connection.with_detection(DetectionTrigger::new(Arc::clone(sampler), interval));
            }

            let task = tokio::spawn(connection.run());
            Ok(StreamRuntime {
                distributor,
                cancel,
                task: Some(task),
                writers: Vec::new(),
            })
        })?;

        if started {
            info!(stream = %name, "Stream started");
        } else {
            debug!(stream = %name, "Stream already running");
        }
        Ok(())
    }

    /// 停止流
    ///
    /// 先关闭回调并等待投递中的写入完成，再标记 Stopping 并取消采集任务。
    /// 写入超过宽限期仍未结束时直接中止写入器。
    /// `wait_for_completion` 为 false 时拆除在后台进行。
    pub async fn stop(&self, stream: &Arc<StreamState>, wait_for_completion: bool) -> Result<()> {
        let name = stream.name().to_string();
        let lifecycle = &self.inner.ingest.lifecycle;

        match stream.begin_stop() {
            StopBegin::NotRunning => {
                debug!(stream = %name, "Stream not running, nothing to stop");
                return Ok(());
            }
            StopBegin::AlreadyStopping => {
                if wait_for_completion {
                    let limit = lifecycle.stop_timeout() + lifecycle.writer_grace();
                    if !stream.wait_for_state(OperationalState::Inactive, limit).await {
                        return Err(StreamError::StopTimeout {
                            stream: name,
                            waited: limit,
                        });
                    }
                }
                return Ok(());
            }
            StopBegin::Started => {}
        }

        info!(stream = %name, wait = wait_for_completion, "Stopping stream");
        let grace = lifecycle.writer_grace();
        if tokio::time::timeout(grace, stream.disable_callbacks()).await.is_err() {
            warn!(
                stream = %name,
                grace_secs = grace.as_secs(),
                "Writers still delivering after grace period, aborting them"
            );
            let slots = stream
                .with_runtime(|rt| std::mem::take(&mut rt.writers))
                .unwrap_or_default();
            let distributor = stream.distributor();
            for slot in slots {
                Self::stop_writer(stream, distributor.as_ref(), slot, Duration::ZERO).await;
            }
            stream.disable_callbacks().await;
        }
        if let Err(e) = stream.transition(OperationalState::Stopping) {
            warn!(stream = %name, error = %e, "Unexpected state while stopping");
        }
        stream.with_runtime(|rt| rt.cancel.cancel());

        if wait_for_completion {
            self.finish_stop(Arc::clone(stream)).await
        } else {
            let manager = self.clone();
            let stream = Arc::clone(stream);
            tokio::spawn(async move {
                if let Err(e) = manager.finish_stop(stream).await {
                    warn!(error = %e, "Background stop finished with error");
                }
            });
            Ok(())
        }
    }

    async fn finish_stop(&self, stream: Arc<StreamState>) -> Result<()> {
        let name = stream.name().to_string();
        let stop_timeout = self.inner.ingest.lifecycle.stop_timeout();
        let grace = self.inner.ingest.lifecycle.writer_grace();

        let Some(mut runtime) = stream.take_runtime() else {
            stream.enable_callbacks().await;
            stream.complete_stop();
            return Ok(());
        };

        let mut timed_out = false;
        if let Some(mut task) = runtime.task.take() {
            if tokio::time::timeout(stop_timeout, &mut task).await.is_err() {
                error!(
                    stream = %name,
                    timeout_secs = stop_timeout.as_secs(),
                    "Ingest task did not stop in time, aborting"
                );
                task.abort();
                // 确认任务已退出后再释放资源
                let _ = task.await;
                timed_out = true;
            }
        }

        for slot in runtime.writers.drain(..) {
            Self::stop_writer(&stream, Some(&runtime.distributor), slot, grace).await;
        }
        runtime.distributor.shutdown();
        stream.set_source_info(None);

        stream.enable_callbacks().await;
        stream.complete_stop();
        info!(stream = %name, timed_out, "Stream stopped");

        if timed_out {
            Err(StreamError::StopTimeout {
                stream: name,
                waited: stop_timeout,
            })
        } else {
            Ok(())
        }
    }

    async fn stop_writer(
        stream: &StreamState,
        distributor: Option<&Arc<PacketDistributor>>,
        slot: WriterSlot,
        grace: Duration,
    ) {
        let WriterSlot {
            kind,
            name,
            consumer,
            cancel,
            mut task,
        } = slot;

        cancel.cancel();
        if tokio::time::timeout(grace, &mut task).await.is_err() {
            warn!(stream = %stream.name(), writer = %name, "Writer did not stop within grace period, aborting");
            task.abort();
            let _ = task.await;
        }
        if let Some(distributor) = distributor {
            let _ = distributor.unregister_consumer(consumer);
        }

        debug!(stream = %stream.name(), writer = %name, kind = %kind, "Writer detached");
        stream.emit(StreamEvent::WriterDetached {
            stream: stream.name().to_string(),
            kind,
        });
    }

    /// 停止全部流，返回未能正常停止的数量
    pub async fn shutdown_all(&self) -> usize {
        let streams = self.list();
        info!(count = streams.len(), "Stopping all streams");

        let results =
            futures::future::join_all(streams.iter().map(|s| self.stop(s, true))).await;

        let mut failed = 0;
        for (stream, result) in streams.iter().zip(results) {
            if let Err(e) = result {
                warn!(stream = %stream.name(), error = %e, "Stream did not stop cleanly");
                failed += 1;
            }
        }
        failed
    }

    // ---- 功能与错误 ----

    pub fn set_feature(&self, stream: &StreamState, feature: &str, enabled: bool) -> Result<()> {
        let feature: Feature = feature.parse()?;
        let previous = stream.set_feature(feature, enabled);
        if previous != enabled {
            info!(stream = %stream.name(), feature = ?feature, enabled, "Stream feature changed");
        }
        Ok(())
    }

    /// 记录错误并迁移状态：可恢复时进入 Reconnecting，否则 Error
    pub fn handle_error(
        &self,
        stream: &StreamState,
        code: i32,
        message: &str,
        recoverable: bool,
    ) -> Result<OperationalState> {
        stream.record_error(code, message);
        stream.emit(StreamEvent::Error {
            stream: stream.name().to_string(),
            code,
            message: message.to_string(),
            recoverable,
        });

        if stream.is_stopping() {
            debug!(stream = %stream.name(), code, "Error reported while stopping");
            return Ok(stream.state());
        }

        let current = stream.state();
        let target = if recoverable
            && matches!(
                current,
                OperationalState::Active
                    | OperationalState::Starting
                    | OperationalState::Error
                    | OperationalState::Reconnecting
            ) {
            OperationalState::Reconnecting
        } else {
            OperationalState::Error
        };

        warn!(
            stream = %stream.name(),
            code,
            reason = message,
            recoverable,
            to = %target,
            "Stream error"
        );
        stream.transition(target)?;
        Ok(target)
    }

    // ---- 引用计数 ----

    pub fn add_ref(&self, stream: &StreamState, kind: ComponentKind) -> u32 {
        stream.add_ref(kind)
    }

    pub fn release_ref(&self, stream: &StreamState, kind: ComponentKind) -> Result<u32> {
        stream.release_ref(kind)
    }

    pub fn acquire_ref(&self, stream: &Arc<StreamState>, kind: ComponentKind) -> StreamRef {
        stream.acquire_ref(kind)
    }

    // ---- 配置 ----

    /// 更新流配置，运行中且地址或协议变化时重启
    pub async fn update_config(&self, stream: &Arc<StreamState>, config: StreamConfig) -> Result<()> {
        validate_stream(&config).map_err(|e| StreamError::Config(e.to_string()))?;
        if config.name != stream.name() {
            return Err(StreamError::Config(format!(
                "stream name cannot change ({} -> {})",
                stream.name(),
                config.name
            )));
        }

        let previous = stream.config();
        let needs_restart = previous.url != config.url || previous.protocol != config.protocol;
        stream.apply_config(config);

        if needs_restart && stream.has_runtime() {
            info!(stream = %stream.name(), "Source settings changed, restarting stream");
            self.stop(stream, true).await?;
            self.start(stream)?;
        }
        Ok(())
    }

    pub async fn update_protocol(
        &self,
        stream: &Arc<StreamState>,
        protocol: TransportProtocol,
    ) -> Result<()> {
        let mut config = stream.config();
        config.protocol = protocol;
        self.update_config(stream, config).await
    }

    pub fn update_timestamps(&self, stream: &StreamState, pts: Option<i64>, dts: Option<i64>) -> bool {
        stream.update_timestamps(pts, dts)
    }

    pub fn statistics(&self, stream: &StreamState) -> StreamStats {
        stream.statistics()
    }

    /// 全部流的快照，按名称排序
    pub fn snapshot(&self) -> Vec<StreamSnapshot> {
        self.list().iter().map(|s| s.snapshot()).collect()
    }

    // ---- 写入器 ----

    /// 挂载写入器：注册消费者、占用引用并启动写入泵
    pub fn attach_writer(
        &self,
        stream: &Arc<StreamState>,
        kind: ComponentKind,
        writer: Box<dyn OutputWriter>,
    ) -> Result<ConsumerId> {
        let name = stream.name().to_string();
        if stream.is_stopping() {
            return Err(StreamError::Stopping(name));
        }
        let distributor = stream
            .distributor()
            .ok_or_else(|| StreamError::NotRunning(name.clone()))?;
        if stream.attached_writers().iter().any(|(k, _)| *k == kind) {
            return Err(StreamError::WriterExists { stream: name, kind });
        }

        let consumer = distributor.register_consumer_at(StartPosition::LatestKeyframe)?;
        let component = match self.inner.coordinator.register_kind(
            format!("{}/{}", name, kind),
            kind.shutdown_kind(),
            self.inner.ingest.lifecycle.writer_grace(),
        ) {
            Ok(component) => component,
            Err(e) => {
                let _ = distributor.unregister_consumer(consumer);
                return Err(e.into());
            }
        };

        let writer_name = writer.name().to_string();
        let cancel = self.inner.coordinator.child_token();
        let pump = WriterPump::new(
            stream.acquire_ref(kind),
            Arc::clone(&distributor),
            consumer,
            writer,
            cancel.clone(),
        )
        .with_component(component);
        let task = tokio::spawn(pump.run());

        let mut pending = Some(WriterSlot {
            kind,
            name: writer_name.clone(),
            consumer,
            cancel,
            task,
        });
        stream.with_runtime(|rt| {
            if !rt.writers.iter().any(|w| w.kind == kind) {
                if let Some(slot) = pending.take() {
                    rt.writers.push(slot);
                }
            }
        });

        if let Some(slot) = pending {
            // 并发挂载或流已开始拆除
            slot.cancel.cancel();
            let _ = distributor.unregister_consumer(slot.consumer);
            return Err(if stream.has_runtime() {
                StreamError::WriterExists { stream: name, kind }
            } else {
                StreamError::NotRunning(name)
            });
        }

        info!(stream = %name, writer = %writer_name, kind = %kind, consumer, "Writer attached");
        stream.emit(StreamEvent::WriterAttached {
            stream: name,
            kind,
            writer: writer_name,
        });
        Ok(consumer)
    }

    /// 卸载写入器，不影响其他消费者
    pub async fn detach_writer(&self, stream: &Arc<StreamState>, kind: ComponentKind) -> Result<()> {
        let slot = stream
            .with_runtime(|rt| {
                rt.writers
                    .iter()
                    .position(|w| w.kind == kind)
                    .map(|i| rt.writers.remove(i))
            })
            .flatten()
            .ok_or_else(|| StreamError::WriterNotFound {
                stream: stream.name().to_string(),
                kind,
            })?;

        let distributor = stream.distributor();
        Self::stop_writer(
            stream,
            distributor.as_ref(),
            slot,
            self.inner.ingest.lifecycle.writer_grace(),
        )
        .await;
        Ok(())
    }

    // ---- 看门狗 ----

    /// 启动看门狗任务，随全局关闭令牌退出
    pub fn spawn_watchdog(&self) -> JoinHandle<()> {
        let watchdog = Watchdog::new(self.clone(), &self.inner.ingest.lifecycle);
        let cancel = self.inner.coordinator.shutdown_token();
        tokio::spawn(watchdog.run(cancel))
    }
}

/// 流状态管理器构建器
pub struct StreamStateManagerBuilder {
    transport: Arc<dyn MediaTransport>,
    coordinator: Option<ShutdownCoordinator>,
    ingest: IngestConfig,
    detection: Option<Arc<dyn DetectionSampler>>,
    event_capacity: usize,
}

impl StreamStateManagerBuilder {
    pub fn new(transport: Arc<dyn MediaTransport>) -> Self {
        Self {
            transport,
            coordinator: None,
            ingest: IngestConfig::default(),
            detection: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    pub fn with_coordinator(mut self, coordinator: ShutdownCoordinator) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn with_ingest_config(mut self, ingest: IngestConfig) -> Self {
        self.ingest = ingest;
        self
    }

    pub fn with_detection_sampler(mut self, sampler: Arc<dyn DetectionSampler>) -> Self {
        self.detection = Some(sampler);
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> StreamStateManager {
        let (events, _) = broadcast::channel(self.event_capacity);
        StreamStateManager {
            inner: Arc::new(ManagerInner {
                streams: RwLock::new(HashMap::new()),
                transport: self.transport,
                coordinator: self.coordinator.unwrap_or_default(),
                ingest: self.ingest,
                detection: self.detection,
                events,
                next_generation: AtomicU64::new(1),
            }),
        }
    }
}
