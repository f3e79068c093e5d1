//! Controller Dispatcher
//!
//! Routes each observation through the per-device state machine:
//!
//! ```text
//! Idle --observation--> AwaitingResponse --decision-----------> Idle
//!                                        --deadline (fallback)-> Idle
//! ```
//!
//! The registry and counters sit behind short `parking_lot` locks that are
//! never held across an await. The policy is reached through its owner
//! thread, with the wait bounded by the configured deadline.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use adr_core::{
    ActionCatalog, ActionId, Completion, DeviceId, DeviceRecord, DeviceRegistry, Policy,
    PolicyEngine, PolicySnapshot, Reward, RewardAggregator, RewardSample, SessionId,
};
use adr_wire::{Decision, Observation};

use crate::config::ControllerConfig;
use crate::engine::PolicyHandle;
use crate::error::{ControllerError, Result};
use crate::stats::{ControllerStats, StatsTracker};

pub struct Dispatcher {
    catalog: ActionCatalog,
    aggregator: RewardAggregator,
    registry: Mutex<DeviceRegistry>,
    policy: PolicyHandle,
    stats: StatsTracker,
    timeout: Duration,
}

/// An observation that passed registration and holds its device's pending
/// slot. Produced by [`Dispatcher::admit`], consumed by [`Dispatcher::decide`].
pub struct Admission {
    obs: Observation,
    credited: Option<ActionId>,
    fallback: ActionId,
}

impl Admission {
    pub fn device(&self) -> &DeviceId {
        &self.obs.device
    }
}

impl Dispatcher {
    /// Build the configured strategy and start its owner thread.
    pub fn from_config(config: &ControllerConfig) -> Result<Self> {
        let catalog = config.catalog()?;
        let engine = PolicyEngine::new(catalog.len(), &config.strategy, &config.reward, config.seed)
            .map_err(|e| ControllerError::Startup(e.to_string()))?;
        info!(
            strategy = engine.name(),
            arms = catalog.len(),
            timeout_ms = config.timeout_ms,
            "policy engine ready"
        );
        Self::with_policy(config, engine)
    }

    /// Use a caller-supplied policy instead of the configured strategy.
    pub fn with_policy<P>(config: &ControllerConfig, policy: P) -> Result<Self>
    where
        P: Policy + 'static,
    {
        let catalog = config.catalog()?;
        if policy.arms() != catalog.len() {
            return Err(ControllerError::Startup(format!(
                "policy has {} arms but the catalog has {}",
                policy.arms(),
                catalog.len()
            )));
        }
        if config.max_devices == 0 {
            return Err(ControllerError::Startup("max_devices must be positive".into()));
        }
        let aggregator = RewardAggregator::new(config.reward)
            .map_err(|e| ControllerError::Startup(e.to_string()))?;

        Ok(Self {
            catalog,
            aggregator,
            registry: Mutex::new(DeviceRegistry::new(config.max_devices)),
            policy: PolicyHandle::spawn(policy)?,
            stats: StatsTracker::new(config.history_len),
            timeout: config.timeout(),
        })
    }

    pub fn catalog(&self) -> &ActionCatalog {
        &self.catalog
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Handle one observation and produce the decision to send back.
    ///
    /// Returns `None` when the observation is discarded: duplicate while a
    /// request is pending, registry full, or the device was evicted while
    /// its decision was being computed.
    pub async fn handle_observation(&self, session: SessionId, obs: Observation) -> Option<Decision> {
        let admission = self.admit(session, obs)?;
        self.decide(admission).await
    }

    /// Register the device, mark it pending and work out which action the
    /// reported outcome belongs to. Synchronous, so callers can admit in
    /// arrival order and decide concurrently.
    pub fn admit(&self, session: SessionId, obs: Observation) -> Option<Admission> {
        self.stats.record(|s| s.observations += 1);
        let device = &obs.device;
        let mut registry = self.registry.lock();

        match registry.get_or_create(device, session) {
            Ok(record) if record.session != session => {
                info!(device = %device, from = %record.session, to = %session, "device moved to reporting session");
                record.session = session;
            }
            Ok(_) => {}
            Err(e) => {
                self.stats.record(|s| s.registry_rejections += 1);
                warn!(device = %device, error = %e, "observation dropped");
                return None;
            }
        }

        if let Err(e) = registry.mark_pending(device, Instant::now()) {
            self.stats.record(|s| s.duplicates += 1);
            warn!(device = %device, error = %e, "duplicate observation discarded");
            return None;
        }

        let last = match registry.resolve(device) {
            Ok(last) => last,
            Err(e) => {
                warn!(device = %device, error = %e, "observation discarded");
                return None;
            }
        };
        drop(registry);

        let reported = match obs.previous_action.map(|a| self.catalog.check(a)) {
            Some(Ok(a)) => Some(a),
            Some(Err(e)) => {
                self.stats.record(|s| s.invalid_actions += 1);
                warn!(device = %device, error = %e, "reported action ignored");
                None
            }
            None => None,
        };

        let credited = match (last, reported) {
            (Some(last), Some(reported)) if last != reported => {
                warn!(
                    device = %device,
                    assigned = %last,
                    reported = %reported,
                    "reported action differs from the assigned one, crediting the assigned action"
                );
                Some(last)
            }
            (Some(last), _) => Some(last),
            (None, reported) => reported,
        };

        Some(Admission {
            credited,
            fallback: last.or(reported).unwrap_or(ActionId(0)),
            obs,
        })
    }

    /// Update the policy with the outcome, draw the next action within the
    /// deadline and return the device to `Idle`.
    pub async fn decide(&self, admission: Admission) -> Option<Decision> {
        let Admission {
            obs,
            credited,
            fallback,
        } = admission;
        let device = obs.device.clone();

        let reward = credited.map(|_| self.reward_for(&device, &obs));
        let update = credited.zip(reward.map(|(r, _)| r));

        let (action, how) = match tokio::time::timeout(self.timeout, self.policy.step(update)).await {
            Ok(Ok(step)) => {
                if let Some(e) = step.update_error {
                    self.stats.record(|s| s.invalid_actions += 1);
                    warn!(device = %device, error = %e, "update rejected");
                }
                self.stats.record(|s| s.decisions += 1);
                (step.action, Completion::Decided)
            }
            Ok(Err(e)) => {
                self.stats.record(|s| s.timeouts += 1);
                error!(device = %device, error = %e, fallback = %fallback, "sending fallback action");
                (fallback, Completion::Fallback)
            }
            Err(_) => {
                self.stats.record(|s| s.timeouts += 1);
                warn!(
                    device = %device,
                    error = %ControllerError::Timeout(self.timeout),
                    fallback = %fallback,
                    "sending fallback action"
                );
                (fallback, Completion::Fallback)
            }
        };

        let reward_value = reward.map(|(r, _)| r.value);
        if let Err(e) = self.registry.lock().complete(&device, action, reward_value, how) {
            debug!(device = %device, error = %e, "device gone before its decision was ready");
            return None;
        }

        if let Some((reward, neutral)) = reward {
            self.stats.push_sample(RewardSample {
                device: device.clone(),
                outcome: obs.outcome,
                reward,
                neutral,
            });
        }

        debug!(
            device = %device,
            action = %action,
            params = %self.describe(action),
            fallback = how == Completion::Fallback,
            "decision"
        );
        Some(Decision {
            device,
            action,
            seq: obs.seq,
        })
    }

    /// Reward for the outcome, or a neutral one when the outcome is unusable.
    fn reward_for(&self, device: &DeviceId, obs: &Observation) -> (Reward, bool) {
        match self.aggregator.combine(&obs.outcome) {
            Ok(reward) => (reward, false),
            Err(e) => {
                self.stats.record(|s| s.invalid_outcomes += 1);
                warn!(device = %device, error = %e, "using neutral reward");
                (Reward::neutral(), true)
            }
        }
    }

    fn describe(&self, action: ActionId) -> String {
        self.catalog
            .decode(action)
            .map(|p| p.to_string())
            .unwrap_or_else(|_| "?".to_string())
    }

    /// Drop every device owned by a closed session.
    pub fn evict_session(&self, session: SessionId) -> Vec<DeviceId> {
        let evicted = self.registry.lock().evict_session(session);
        if !evicted.is_empty() {
            info!(session = %session, devices = evicted.len(), "evicted session devices");
        }
        evicted
    }

    pub fn session_opened(&self) {
        self.stats.record(|s| {
            s.sessions_opened += 1;
            s.sessions_active += 1;
        });
    }

    pub fn session_closed(&self, session: SessionId) {
        self.evict_session(session);
        self.stats
            .record(|s| s.sessions_active = s.sessions_active.saturating_sub(1));
    }

    pub fn record_malformed(&self) {
        self.stats.record(|s| s.malformed += 1);
    }

    pub fn device(&self, id: &DeviceId) -> Option<DeviceRecord> {
        self.registry.lock().get(id).cloned()
    }

    pub fn device_count(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn pending_count(&self) -> usize {
        self.registry.lock().pending_count()
    }

    pub fn stats(&self) -> ControllerStats {
        self.stats.snapshot()
    }

    pub fn history(&self) -> Vec<RewardSample> {
        self.stats.history()
    }

    pub fn mean_reward(&self) -> Option<f64> {
        self.stats.mean_reward()
    }

    pub async fn snapshot(&self) -> Result<PolicySnapshot> {
        self.policy.snapshot().await
    }

    /// Stop the policy owner and return its final state.
    pub async fn shutdown(&self) -> Result<PolicySnapshot> {
        self.policy.shutdown().await
    }
}
