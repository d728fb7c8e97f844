//! 视频流接入核心
//!
//! 连接管理（断线重连与退避）、多消费者分发队列、流状态与引用计数，
//! 以及与关闭协调器配合的有序停止流程。

pub mod backoff;
pub mod connection;
pub mod context;
pub mod distributor;
pub mod error;
pub mod events;
pub mod manager;
pub mod output;
pub mod protocol;
pub mod state;
pub mod stream;
pub mod transport;
pub mod trigger;
pub mod watchdog;

pub use backoff::{Backoff, MAX_RECONNECT_ATTEMPTS};
pub use connection::{ConnectionManager, ConnectionState};
pub use distributor::{
    ConsumerId, ConsumerStats, DistributorStats, PacketDistributor, QueuedPacket, ReceiveOutcome,
    StartPosition,
};
pub use error::{DistributorError, Result, StreamError, TransportError, WriteError};
pub use events::StreamEvent;
pub use manager::{StreamStateManager, StreamStateManagerBuilder};
pub use output::{OutputWriter, WriterPump};
pub use protocol::{effective_protocol, is_multicast_url, ProtocolSettings};
pub use state::{
    ComponentKind, Feature, OperationalState, ProtocolState, StreamFeatures, StreamHandle,
    StreamRef, StreamSnapshot, StreamState, StreamStats, TimestampState,
};
pub use stream::{CodecParameters, MediaPacket, PacketType, SourceInfo};
pub use transport::{MediaSource, MediaTransport};
pub use trigger::{DetectionSampler, DetectionTrigger, SubmitOutcome};
pub use watchdog::Watchdog;

#[cfg(feature = "rtsp")]
pub use transport::RtspTransport;
