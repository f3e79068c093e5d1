//! Single owner of the learning state.
//!
//! The policy lives on one dedicated thread and is reached only through a
//! command channel. Select and update calls are therefore serialized without a
//! lock, each select sees a fully recomputed distribution, and a slow policy
//! never occupies a tokio worker.

use adr_core::{ActionId, CoreError, Policy, PolicySnapshot, Reward};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::error::{ControllerError, Result};

const COMMAND_QUEUE_DEPTH: usize = 1024;

enum Command {
    Step {
        update: Option<(ActionId, Reward)>,
        reply: oneshot::Sender<StepOutcome>,
    },
    Snapshot {
        reply: oneshot::Sender<PolicySnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<PolicySnapshot>,
    },
}

/// Result of one update-then-select round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub action: ActionId,
    /// Set when the update was rejected; the selection still happened
    pub update_error: Option<CoreError>,
}

/// Cloneable handle to the policy owner thread.
#[derive(Clone)]
pub struct PolicyHandle {
    tx: mpsc::Sender<Command>,
    arms: usize,
}

impl PolicyHandle {
    pub fn spawn<P>(policy: P) -> Result<Self>
    where
        P: Policy + 'static,
    {
        let arms = policy.arms();
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        std::thread::Builder::new()
            .name("adr-policy".into())
            .spawn(move || run(policy, rx))
            .map_err(|e| ControllerError::Startup(format!("cannot start policy thread: {}", e)))?;
        Ok(Self { tx, arms })
    }

    pub fn arms(&self) -> usize {
        self.arms
    }

    /// Apply `update` (if any), then draw the next action.
    pub async fn step(&self, update: Option<(ActionId, Reward)>) -> Result<StepOutcome> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Step { update, reply })
            .await
            .map_err(|_| ControllerError::PolicyUnavailable)?;
        rx.await.map_err(|_| ControllerError::PolicyUnavailable)
    }

    pub async fn snapshot(&self) -> Result<PolicySnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Snapshot { reply })
            .await
            .map_err(|_| ControllerError::PolicyUnavailable)?;
        rx.await.map_err(|_| ControllerError::PolicyUnavailable)
    }

    /// Stop the owner after it drains queued commands. Returns the final state.
    pub async fn shutdown(&self) -> Result<PolicySnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Shutdown { reply })
            .await
            .map_err(|_| ControllerError::PolicyUnavailable)?;
        rx.await.map_err(|_| ControllerError::PolicyUnavailable)
    }
}

fn run<P: Policy>(mut policy: P, mut rx: mpsc::Receiver<Command>) {
    debug!(arms = policy.arms(), "policy owner started");

    while let Some(command) = rx.blocking_recv() {
        match command {
            Command::Step { update, reply } => {
                let update_error = update.and_then(|(action, reward)| policy.update(action, &reward).err());
                let action = policy.select_action();
                // receiver gone means the request already timed out
                let _ = reply.send(StepOutcome { action, update_error });
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(policy.snapshot());
            }
            Command::Shutdown { reply } => {
                let snapshot = policy.snapshot();
                info!(updates = snapshot.updates, "policy owner stopping");
                let _ = reply.send(snapshot);
                break;
            }
        }
    }

    debug!("policy owner stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use adr_core::{PolicyEngine, RewardWeights, StrategyConfig};

    fn engine(arms: usize) -> PolicyEngine {
        PolicyEngine::new(arms, &StrategyConfig::default(), &RewardWeights::default(), Some(11))
            .unwrap()
    }

    #[tokio::test]
    async fn test_step_updates_then_selects() {
        let handle = PolicyHandle::spawn(engine(4)).unwrap();
        assert_eq!(handle.arms(), 4);

        let first = handle.step(None).await.unwrap();
        assert!(first.action.index() < 4);
        assert_eq!(first.update_error, None);

        handle
            .step(Some((first.action, Reward::scalar(1.0))))
            .await
            .unwrap();
        assert_eq!(handle.snapshot().await.unwrap().updates, 1);
    }

    #[tokio::test]
    async fn test_rejected_update_still_selects() {
        let handle = PolicyHandle::spawn(engine(4)).unwrap();
        let step = handle
            .step(Some((ActionId(9), Reward::scalar(1.0))))
            .await
            .unwrap();
        assert!(matches!(
            step.update_error,
            Some(CoreError::InvalidAction { arms: 4, .. })
        ));
        assert!(step.action.index() < 4);
        assert_eq!(handle.snapshot().await.unwrap().updates, 0);
    }

    #[tokio::test]
    async fn test_shutdown_returns_final_state() {
        let handle = PolicyHandle::spawn(engine(3)).unwrap();
        let a = handle.step(None).await.unwrap().action;
        handle.step(Some((a, Reward::scalar(0.5)))).await.unwrap();

        let last = handle.shutdown().await.unwrap();
        assert_eq!(last.updates, 1);
        assert!(matches!(
            handle.step(None).await,
            Err(ControllerError::PolicyUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_steps_are_serialized() {
        let handle = PolicyHandle::spawn(engine(30)).unwrap();
        let mut tasks = Vec::new();
        for i in 0..32u32 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                handle
                    .step(Some((ActionId(i % 30), Reward::scalar(0.2))))
                    .await
                    .unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.updates, 32);
        let sum: f64 = snapshot.probabilities.iter().sum();
        assert!((sum - 1.0).abs() < adr_core::policy::PROBABILITY_TOLERANCE);
    }
}
