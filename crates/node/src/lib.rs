//! Adaptive SF/TP controller daemon: configuration, dispatcher and the
//! session server the simulated network connects to.

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod server;
pub mod stats;

pub use config::{ConfigLoader, ControllerArgs, ControllerConfig};
pub use dispatcher::{Admission, Dispatcher};
pub use engine::{PolicyHandle, StepOutcome};
pub use error::{ControllerError, Result};
pub use server::Server;
pub use stats::{ControllerStats, StatsTracker};
