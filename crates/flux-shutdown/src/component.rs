use std::fmt;
use std::time::Duration;

/// 组件标识，注册时分配，单调递增
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub u64);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 组件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    StreamReader,
    HlsWriter,
    Mp4Writer,
    Detection,
    Server,
    Other,
}

impl ComponentKind {
    /// 默认关闭优先级，数值越大越先进入 Stopping
    ///
    /// 消费者先于生产者停止，服务端最后停止。
    pub fn default_priority(&self) -> u32 {
        match self {
            ComponentKind::Detection => 100,
            ComponentKind::HlsWriter | ComponentKind::Mp4Writer => 80,
            ComponentKind::StreamReader => 60,
            ComponentKind::Other => 40,
            ComponentKind::Server => 20,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::StreamReader => "stream_reader",
            ComponentKind::HlsWriter => "hls_writer",
            ComponentKind::Mp4Writer => "mp4_writer",
            ComponentKind::Detection => "detection",
            ComponentKind::Server => "server",
            ComponentKind::Other => "other",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 组件状态，只能前进：Running -> Stopping -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ComponentState {
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComponentState::Running => "running",
            ComponentState::Stopping => "stopping",
            ComponentState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// 注册表中的组件快照
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    pub id: ComponentId,
    pub name: String,
    pub kind: ComponentKind,
    pub priority: u32,
    pub grace: Duration,
    pub state: ComponentState,
}
