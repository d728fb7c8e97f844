use crate::state::{ComponentKind, OperationalState};
use flux_shutdown::ShutdownError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Stream not found: {0}")]
    NotFound(String),

    #[error("Stream already exists: {0}")]
    AlreadyExists(String),

    #[error("Stream {0} is stopping")]
    Stopping(String),

    #[error("Stream {0} is not running")]
    NotRunning(String),

    #[error("Stream {stream}: invalid transition {from} -> {to}")]
    InvalidTransition {
        stream: String,
        from: OperationalState,
        to: OperationalState,
    },

    #[error("Stream {stream}: reference underflow for component {component}")]
    RefUnderflow {
        stream: String,
        component: ComponentKind,
    },

    #[error("Stream {stream} still has {refs} active references")]
    InUse { stream: String, refs: u32 },

    #[error("Stream {stream} did not stop within {waited:?}")]
    StopTimeout { stream: String, waited: Duration },

    #[error("Stream {stream} already has a {kind} writer attached")]
    WriterExists { stream: String, kind: ComponentKind },

    #[error("Stream {stream} has no {kind} writer attached")]
    WriterNotFound { stream: String, kind: ComponentKind },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unknown feature: {0}")]
    UnknownFeature(String),

    #[error("Distributor error: {0}")]
    Distributor(#[from] DistributorError),

    #[error("Shutdown error: {0}")]
    Shutdown(#[from] ShutdownError),
}

/// 传输层错误，全部视为可重试
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Failed to open source: {0}")]
    Open(String),

    #[error("No video stream found")]
    NoVideoStream,

    #[error("Read error: {0}")]
    Read(String),

    #[error("End of stream")]
    Eof,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Source closed")]
    Closed,
}

impl TransportError {
    /// 记录到流统计里的错误码
    pub fn code(&self) -> i32 {
        match self {
            TransportError::Open(_) => 1,
            TransportError::NoVideoStream => 2,
            TransportError::Read(_) => 3,
            TransportError::Eof => 4,
            TransportError::Timeout(_) => 5,
            TransportError::Closed => 6,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DistributorError {
    #[error("No consumer slot available (max {max})")]
    NoSlot { max: usize },

    #[error("Consumer not found: {0}")]
    ConsumerNotFound(u64),

    #[error("Invalid capacity: {0}")]
    InvalidCapacity(usize),

    #[error("Distributor is shut down")]
    Closed,
}

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Packet rejected: {0}")]
    Rejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StreamError>;
