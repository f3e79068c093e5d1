use thiserror::Error;

use crate::catalog::ActionId;
use crate::id::DeviceId;

/// Errors raised by the controller core: action catalog, reward aggregation,
/// policy updates and the device registry.
///
/// None of these are fatal to a running controller. The dispatcher recovers
/// from each one locally and keeps serving other devices.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Action id outside `[0, arms)`
    #[error("invalid action {action}: catalog has {arms} actions")]
    InvalidAction { action: ActionId, arms: usize },

    /// Spreading factor / power pair not present in the configured option sets
    #[error("invalid action pair: SF{sf} / {tp_dbm} dBm is not in the catalog")]
    InvalidActionPair { sf: u8, tp_dbm: i8 },

    /// Index pair outside the `sf x tp` grid
    #[error("invalid action index ({sf_idx}, {tp_idx}): catalog is {sf_count}x{tp_count}")]
    InvalidActionIndex {
        sf_idx: usize,
        tp_idx: usize,
        sf_count: usize,
        tp_count: usize,
    },

    /// Outcome telemetry is missing fields or cannot be turned into a reward
    #[error("invalid outcome: {0}")]
    InvalidOutcome(String),

    /// An outcome was reported for a device with no outstanding request
    #[error("no pending request for device {0}")]
    NoPendingRequest(DeviceId),

    /// A second observation arrived while the device is still awaiting its decision
    #[error("device {0} already has a pending request")]
    AlreadyPending(DeviceId),

    /// Device is not present in the registry
    #[error("unknown device: {0}")]
    UnknownDevice(DeviceId),

    /// Registry has no free slot for a new device
    #[error("device registry full ({capacity} devices)")]
    RegistryFull { capacity: usize },

    /// Device identifier is empty or contains reserved characters
    #[error("invalid device id: {0:?}")]
    InvalidDeviceId(String),

    /// Catalog, reward or policy parameters are out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Convenience Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
