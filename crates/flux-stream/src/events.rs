use crate::connection::ConnectionState;
use crate::state::{ComponentKind, OperationalState};
use std::time::Duration;

/// 流事件总线上的事件
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Created {
        stream: String,
        generation: u64,
    },
    Removed {
        stream: String,
    },
    StateChanged {
        stream: String,
        from: OperationalState,
        to: OperationalState,
    },
    ConnectionStateChanged {
        stream: String,
        from: ConnectionState,
        to: ConnectionState,
    },
    ReconnectScheduled {
        stream: String,
        attempt: u32,
        delay: Duration,
    },
    WriterAttached {
        stream: String,
        kind: ComponentKind,
        writer: String,
    },
    WriterDetached {
        stream: String,
        kind: ComponentKind,
    },
    Error {
        stream: String,
        code: i32,
        message: String,
        recoverable: bool,
    },
    WatchdogRestart {
        stream: String,
        restarts: u32,
    },
}

impl StreamEvent {
    pub fn stream(&self) -> &str {
        match self {
            StreamEvent::Created { stream, .. }
            | StreamEvent::Removed { stream }
            | StreamEvent::StateChanged { stream, .. }
            | StreamEvent::ConnectionStateChanged { stream, .. }
            | StreamEvent::ReconnectScheduled { stream, .. }
            | StreamEvent::WriterAttached { stream, .. }
            | StreamEvent::WriterDetached { stream, .. }
            | StreamEvent::Error { stream, .. }
            | StreamEvent::WatchdogRestart { stream, .. } => stream,
        }
    }
}
