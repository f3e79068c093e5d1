use std::time::Duration;

use thiserror::Error;

use adr_core::CoreError;
use adr_wire::WireError;

/// Errors surfaced by the controller daemon.
///
/// Only `Startup` and `Config` end the process. `Connection` ends one
/// session; everything else is handled per message.
#[derive(Error, Debug)]
pub enum ControllerError {
    /// Bad configuration or listen address unavailable
    #[error("startup failed: {0}")]
    Startup(String),

    /// Configuration sources could not be merged or parsed
    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Transport failure on one session
    #[error("connection error: {0}")]
    Connection(#[from] WireError),

    /// No decision was produced within the deadline
    #[error("no decision within {0:?}")]
    Timeout(Duration),

    /// The policy owner thread is gone
    #[error("policy engine unavailable")]
    PolicyUnavailable,

    /// Catalog, reward, policy or registry error
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Socket I/O failed outside a session
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type for controller operations
pub type Result<T> = std::result::Result<T, ControllerError>;
