use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShutdownError {
    #[error("Component registry is full (max {0})")]
    CapacityExceeded(usize),

    #[error("Shutdown already initiated, rejecting component '{0}'")]
    ShuttingDown(String),

    #[error("Component not found: {0}")]
    ComponentNotFound(u64),
}
