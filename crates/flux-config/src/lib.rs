pub mod global;
pub mod ingest;
pub mod loader;
pub mod provider;
pub mod stream;

pub use global::{GlobalConfig, LoggingConfig, SystemConfig};
pub use ingest::{
    DetectionSamplingConfig, DistributorConfig, IngestConfig, LifecycleConfig, ReconnectConfig,
};
pub use loader::{validate_config, validate_stream, ConfigLoader};
pub use provider::{ConfigProvider, StaticConfigProvider};
pub use stream::{DetectionConfig, StreamConfig, TransportProtocol};
