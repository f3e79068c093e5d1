//! Learning core of the adaptive SF/TP controller: action catalog, reward
//! aggregation, bandit policies and the per-device registry.

pub mod catalog;
pub mod error;
pub mod id;
pub mod policy;
pub mod registry;
pub mod reward;

pub use catalog::{ActionCatalog, ActionId, TxParams};
pub use error::{CoreError, Result};
pub use id::{DeviceId, SessionId};
pub use policy::{
    EpsilonGreedyConfig, Exp3Config, Policy, PolicyEngine, PolicySnapshot, StrategyConfig,
};
pub use registry::{Completion, DevicePhase, DeviceRecord, DeviceRegistry};
pub use reward::{Outcome, Reward, RewardAggregator, RewardSample, RewardWeights};
