use crate::coordinator::ShutdownCoordinator;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;

/// 关闭信号类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGTERM
    Term,

    /// SIGINT - Ctrl+C
    Interrupt,

    /// 手动触发
    Manual,
}

/// 信号处理器
///
/// 收到信号后广播给订阅者，并通知关闭协调器。
pub struct SignalHandler {
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    coordinator: Option<ShutdownCoordinator>,
}

impl SignalHandler {
    pub fn new() -> (Self, broadcast::Receiver<ShutdownSignal>) {
        let (tx, rx) = broadcast::channel(16);
        (
            Self {
                shutdown_tx: tx,
                coordinator: None,
            },
            rx,
        )
    }

    /// 信号到达时调用 `initiate_shutdown`
    pub fn with_coordinator(mut self, coordinator: ShutdownCoordinator) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    fn dispatch(&self, signal: ShutdownSignal) -> ShutdownSignal {
        let _ = self.shutdown_tx.send(signal);
        if let Some(coordinator) = &self.coordinator {
            coordinator.initiate_shutdown();
        }
        signal
    }

    /// 等待广播通道上的信号
    pub async fn wait_for_signal(&self) -> ShutdownSignal {
        let mut rx = self.shutdown_tx.subscribe();
        rx.recv().await.unwrap_or(ShutdownSignal::Manual)
    }

    /// 等待系统信号
    #[cfg(unix)]
    pub async fn wait_for_system_signal(&self) -> std::io::Result<ShutdownSignal> {
        use signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        let received = tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
                ShutdownSignal::Term
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
                ShutdownSignal::Interrupt
            }
        };

        Ok(self.dispatch(received))
    }

    /// 等待系统信号（Windows 版本）
    #[cfg(not(unix))]
    pub async fn wait_for_system_signal(&self) -> std::io::Result<ShutdownSignal> {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C");
        Ok(self.dispatch(ShutdownSignal::Interrupt))
    }

    /// 手动触发关闭
    pub fn trigger_shutdown(&self) {
        info!("Manual shutdown triggered");
        self.dispatch(ShutdownSignal::Manual);
    }

    /// 订阅关闭信号
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.shutdown_tx.subscribe()
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new().0
    }
}
