pub mod component;
pub mod coordinator;
pub mod error;
pub mod signal;

pub use component::{ComponentId, ComponentInfo, ComponentKind, ComponentState};
pub use coordinator::{ComponentHandle, ShutdownCoordinator, ShutdownCoordinatorBuilder};
pub use error::ShutdownError;
pub use signal::{ShutdownSignal, SignalHandler};
pub use tokio_util::sync::CancellationToken;
