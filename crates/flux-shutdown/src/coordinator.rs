use crate::component::{ComponentId, ComponentInfo, ComponentKind, ComponentState};
use crate::error::ShutdownError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_MAX_COMPONENTS: usize = 64;

struct Inner {
    components: Mutex<Vec<ComponentInfo>>,
    next_id: AtomicU64,
    initiated: AtomicBool,
    token: CancellationToken,
    changed: Notify,
    max_components: usize,
}

impl Inner {
    /// 状态只前进不后退，返回是否发生了变化
    fn advance(&self, id: ComponentId, state: ComponentState) -> Result<bool, ShutdownError> {
        let mut components = self.components.lock();
        let info = components
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(ShutdownError::ComponentNotFound(id.0))?;

        if state <= info.state {
            return Ok(false);
        }

        debug!(
            component = %info.name,
            id = %id,
            from = %info.state,
            to = %state,
            "Component state changed"
        );
        info.state = state;
        drop(components);

        self.changed.notify_waiters();
        Ok(true)
    }
}

/// 关闭协调器
///
/// 进程内所有长期运行的组件（流读取、写入器、检测等）在此注册，
/// 关闭时按优先级从高到低进入 Stopping，再等待全部报告 Stopped。
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> ShutdownCoordinatorBuilder {
        ShutdownCoordinatorBuilder::new()
    }

    /// 注册组件
    pub fn register(
        &self,
        name: impl Into<String>,
        kind: ComponentKind,
        priority: u32,
        grace: Duration,
    ) -> Result<ComponentHandle, ShutdownError> {
        let name = name.into();

        if self.is_shutdown_initiated() {
            return Err(ShutdownError::ShuttingDown(name));
        }

        let mut components = self.inner.components.lock();
        if components.len() >= self.inner.max_components {
            components.retain(|c| c.state != ComponentState::Stopped);
            if components.len() >= self.inner.max_components {
                warn!(
                    component = %name,
                    max = self.inner.max_components,
                    "Component registry full"
                );
                return Err(ShutdownError::CapacityExceeded(self.inner.max_components));
            }
        }

        let id = ComponentId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        components.push(ComponentInfo {
            id,
            name: name.clone(),
            kind,
            priority,
            grace,
            state: ComponentState::Running,
        });
        drop(components);

        debug!(component = %name, id = %id, kind = %kind, priority, "Component registered");

        Ok(ComponentHandle {
            id,
            name,
            coordinator: self.clone(),
            reported: false,
        })
    }

    /// 以组件类型的默认优先级注册
    pub fn register_kind(
        &self,
        name: impl Into<String>,
        kind: ComponentKind,
        grace: Duration,
    ) -> Result<ComponentHandle, ShutdownError> {
        self.register(name, kind, kind.default_priority(), grace)
    }

    /// 更新组件状态（单调）
    pub fn update_state(&self, id: ComponentId, state: ComponentState) -> Result<(), ShutdownError> {
        self.inner.advance(id, state).map(|_| ())
    }

    pub fn component_state(&self, id: ComponentId) -> Option<ComponentState> {
        self.inner
            .components
            .lock()
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.state)
    }

    /// 发起关闭
    ///
    /// 按优先级降序将运行中的组件标记为 Stopping，然后取消全局令牌。
    /// 重复调用无副作用。
    pub fn initiate_shutdown(&self) {
        if self.inner.initiated.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already initiated");
            return;
        }

        let mut order: Vec<(u32, ComponentId, String)> = self
            .inner
            .components
            .lock()
            .iter()
            .filter(|c| c.state == ComponentState::Running)
            .map(|c| (c.priority, c.id, c.name.clone()))
            .collect();
        order.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        info!(components = order.len(), "Initiating shutdown");

        for (priority, id, name) in order {
            debug!(component = %name, priority, "Requesting component stop");
            let _ = self.inner.advance(id, ComponentState::Stopping);
        }

        self.inner.token.cancel();
        self.inner.changed.notify_waiters();
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.inner.initiated.load(Ordering::SeqCst)
    }

    /// 全局关闭令牌
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// 派生子令牌：全局关闭时一并取消，单独取消不影响其他组件
    pub fn child_token(&self) -> CancellationToken {
        self.inner.token.child_token()
    }

    /// 等待关闭发起
    pub async fn wait_for_shutdown(&self) {
        self.inner.token.cancelled().await;
    }

    /// 等待所有组件停止
    ///
    /// 超时后将未停止的组件强制标记为 Stopped 并返回 false。
    pub async fn wait_for_all_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.pending_count() == 0 {
                info!("All components stopped");
                return true;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => {
                    if self.pending_count() == 0 {
                        return true;
                    }
                    self.force_stop_remaining(timeout);
                    return false;
                }
            }
        }
    }

    fn force_stop_remaining(&self, waited: Duration) {
        let mut components = self.inner.components.lock();
        for info in components
            .iter_mut()
            .filter(|c| c.state != ComponentState::Stopped)
        {
            warn!(
                component = %info.name,
                kind = %info.kind,
                state = %info.state,
                waited_ms = waited.as_millis() as u64,
                "Component did not stop in time, forcing stopped"
            );
            info.state = ComponentState::Stopped;
        }
        drop(components);
        self.inner.changed.notify_waiters();
    }

    /// 尚未停止的组件数量
    pub fn pending_count(&self) -> usize {
        self.inner
            .components
            .lock()
            .iter()
            .filter(|c| c.state != ComponentState::Stopped)
            .count()
    }

    pub fn snapshot(&self) -> Vec<ComponentInfo> {
        self.inner.components.lock().clone()
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// 关闭协调器构建器
pub struct ShutdownCoordinatorBuilder {
    max_components: usize,
    token: Option<CancellationToken>,
}

impl ShutdownCoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            max_components: DEFAULT_MAX_COMPONENTS,
            token: None,
        }
    }

    pub fn with_max_components(mut self, max: usize) -> Self {
        self.max_components = max.max(1);
        self
    }

    /// 挂接到外部令牌之下
    pub fn with_parent_token(mut self, parent: &CancellationToken) -> Self {
        self.token = Some(parent.child_token());
        self
    }

    pub fn build(self) -> ShutdownCoordinator {
        ShutdownCoordinator {
            inner: Arc::new(Inner {
                components: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                initiated: AtomicBool::new(false),
                token: self.token.unwrap_or_default(),
                changed: Notify::new(),
                max_components: self.max_components,
            }),
        }
    }
}

impl Default for ShutdownCoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 组件句柄
///
/// 恰好报告一次 Stopped：显式调用 `mark_stopped` 或在析构时自动报告。
pub struct ComponentHandle {
    id: ComponentId,
    name: String,
    coordinator: ShutdownCoordinator,
    reported: bool,
}

impl ComponentHandle {
    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> Option<ComponentState> {
        self.coordinator.component_state(self.id)
    }

    pub fn mark_stopping(&self) {
        let _ = self.coordinator.update_state(self.id, ComponentState::Stopping);
    }

    pub fn mark_stopped(mut self) {
        self.report_stopped();
    }

    fn report_stopped(&mut self) {
        if self.reported {
            return;
        }
        self.reported = true;
        if let Err(e) = self.coordinator.update_state(self.id, ComponentState::Stopped) {
            debug!(component = %self.name, error = %e, "Stopped report ignored");
        }
    }
}

impl Drop for ComponentHandle {
    fn drop(&mut self) {
        self.report_stopped();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready};

    #[tokio::test]
    async fn test_register_and_stop() {
        let coordinator = ShutdownCoordinator::new();
        let handle = coordinator
            .register("cam1-reader", ComponentKind::StreamReader, 60, Duration::from_secs(5))
            .unwrap();
        let id = handle.id();

        assert_eq!(coordinator.component_state(id), Some(ComponentState::Running));
        assert_eq!(coordinator.pending_count(), 1);

        handle.mark_stopped();
        assert_eq!(coordinator.component_state(id), Some(ComponentState::Stopped));
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_handle_drop_reports_stopped() {
        let coordinator = ShutdownCoordinator::new();
        let id = {
            let handle = coordinator
                .register_kind("cam1-hls", ComponentKind::HlsWriter, Duration::from_secs(1))
                .unwrap();
            handle.id()
        };
        assert_eq!(coordinator.component_state(id), Some(ComponentState::Stopped));
    }

    #[tokio::test]
    async fn test_state_is_monotonic() {
        let coordinator = ShutdownCoordinator::new();
        let handle = coordinator
            .register_kind("x", ComponentKind::Other, Duration::from_secs(1))
            .unwrap();

        coordinator
            .update_state(handle.id(), ComponentState::Stopped)
            .unwrap();
        coordinator
            .update_state(handle.id(), ComponentState::Running)
            .unwrap();
        assert_eq!(handle.state(), Some(ComponentState::Stopped));
    }

    #[tokio::test]
    async fn test_initiate_shutdown_marks_stopping_and_cancels() {
        let coordinator = ShutdownCoordinator::new();
        let token = coordinator.child_token();
        let reader = coordinator
            .register_kind("reader", ComponentKind::StreamReader, Duration::from_secs(1))
            .unwrap();
        let writer = coordinator
            .register_kind("writer", ComponentKind::Mp4Writer, Duration::from_secs(1))
            .unwrap();

        coordinator.initiate_shutdown();

        assert!(coordinator.is_shutdown_initiated());
        assert!(token.is_cancelled());
        assert_eq!(reader.state(), Some(ComponentState::Stopping));
        assert_eq!(writer.state(), Some(ComponentState::Stopping));

        let rejected = coordinator.register_kind("late", ComponentKind::Other, Duration::ZERO);
        assert!(matches!(rejected, Err(ShutdownError::ShuttingDown(_))));
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let coordinator = ShutdownCoordinator::builder().with_max_components(2).build();
        let _a = coordinator
            .register_kind("a", ComponentKind::Other, Duration::ZERO)
            .unwrap();
        let b = coordinator
            .register_kind("b", ComponentKind::Other, Duration::ZERO)
            .unwrap();

        let err = coordinator.register_kind("c", ComponentKind::Other, Duration::ZERO);
        assert!(matches!(err, Err(ShutdownError::CapacityExceeded(2))));

        // 已停止的组件腾出位置
        b.mark_stopped();
        assert!(coordinator
            .register_kind("c", ComponentKind::Other, Duration::ZERO)
            .is_ok());
    }

    #[tokio::test]
    async fn test_wait_wakes_on_last_stop() {
        let coordinator = ShutdownCoordinator::new();
        let handle = coordinator
            .register_kind("writer", ComponentKind::HlsWriter, Duration::from_secs(1))
            .unwrap();
        coordinator.initiate_shutdown();

        let mut wait =
            tokio_test::task::spawn(coordinator.wait_for_all_stopped(Duration::from_secs(30)));
        assert_pending!(wait.poll());

        handle.mark_stopped();
        assert!(wait.is_woken());
        assert!(assert_ready!(wait.poll()));
    }

    #[tokio::test]
    async fn test_wait_for_all_stopped() {
        let coordinator = ShutdownCoordinator::new();
        let handle = coordinator
            .register_kind("reader", ComponentKind::StreamReader, Duration::from_secs(1))
            .unwrap();

        let token = coordinator.shutdown_token();
        let task = tokio::spawn(async move {
            token.cancelled().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.mark_stopped();
        });

        coordinator.initiate_shutdown();
        assert!(coordinator.wait_for_all_stopped(Duration::from_secs(2)).await);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_all_stopped_forces_on_timeout() {
        let coordinator = ShutdownCoordinator::new();
        let handle = coordinator
            .register_kind("stuck", ComponentKind::Detection, Duration::from_secs(1))
            .unwrap();

        coordinator.initiate_shutdown();
        let all_stopped = coordinator.wait_for_all_stopped(Duration::from_secs(3)).await;

        assert!(!all_stopped);
        assert_eq!(handle.state(), Some(ComponentState::Stopped));
        assert_eq!(coordinator.pending_count(), 0);
    }
}
