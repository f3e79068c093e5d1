//! Policy Engine
//!
//! Learning state over the action catalog behind a two-operation contract:
//! [`Policy::select_action`] and [`Policy::update`]. Concrete strategies are
//! tagged variants of [`PolicyEngine`], so callers never depend on which one
//! is installed.
//!
//! The engine is not internally synchronized. Whoever owns it must serialize
//! calls (one lock around each call, or a single owner task).

mod epsilon_greedy;
mod exp3;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::catalog::ActionId;
use crate::error::{CoreError, Result};
use crate::reward::{Reward, RewardWeights};

pub use epsilon_greedy::{EpsilonGreedyConfig, EpsilonGreedyPolicy};
pub use exp3::{Exp3Config, Exp3Policy};

/// Absolute tolerance used when checking that probabilities sum to one.
pub const PROBABILITY_TOLERANCE: f64 = 1e-9;

/// The contract every learning strategy implements.
pub trait Policy: Send {
    /// Number of arms the policy was built for.
    fn arms(&self) -> usize;

    /// Draw the next action.
    fn select_action(&mut self) -> ActionId;

    /// Feed back the reward observed for `action`.
    ///
    /// Fails only for an out-of-range action. Out-of-range reward components
    /// are clamped and logged, never rejected.
    fn update(&mut self, action: ActionId, reward: &Reward) -> Result<()>;

    /// Copy of the current learning state.
    fn snapshot(&self) -> PolicySnapshot;
}

/// Immutable copy of a policy's state, for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    pub strategy: String,
    /// Exp3 weights, or scalarized action values for value-based policies
    pub weights: Vec<f64>,
    pub probabilities: Vec<f64>,
    pub updates: u64,
}

impl PolicySnapshot {
    /// Arm with the highest selection probability.
    pub fn best_action(&self) -> Option<ActionId> {
        self.probabilities
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| ActionId(i as u32))
    }
}

/// Which strategy to install, with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StrategyConfig {
    Exp3(Exp3Config),
    EpsilonGreedy(EpsilonGreedyConfig),
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self::Exp3(Exp3Config::default())
    }
}

impl StrategyConfig {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Exp3(_) => "exp3",
            Self::EpsilonGreedy(_) => "epsilon-greedy",
        }
    }
}

/// Installed strategy.
#[derive(Debug)]
pub enum PolicyEngine {
    Exp3(Exp3Policy),
    EpsilonGreedy(EpsilonGreedyPolicy),
}

impl PolicyEngine {
    /// Build the configured strategy over `arms` actions.
    ///
    /// `reward` tells the strategy how the scalar reward is composed: Exp3
    /// rescales from its bounds, epsilon-greedy scalarizes its vector
    /// estimates with the same weights.
    pub fn new(
        arms: usize,
        strategy: &StrategyConfig,
        reward: &RewardWeights,
        seed: Option<u64>,
    ) -> Result<Self> {
        if arms == 0 {
            return Err(CoreError::InvalidConfig("policy needs at least one arm".into()));
        }
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        match strategy {
            StrategyConfig::Exp3(config) => {
                let (min, max) = reward.scalar_range();
                let config = Exp3Config {
                    reward_min: config.reward_min.or(Some(min)),
                    reward_max: config.reward_max.or(Some(max)),
                    ..config.clone()
                };
                Ok(Self::Exp3(Exp3Policy::new(arms, config, rng)?))
            }
            StrategyConfig::EpsilonGreedy(config) => Ok(Self::EpsilonGreedy(
                EpsilonGreedyPolicy::new(arms, config.clone(), *reward, rng)?,
            )),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Exp3(_) => "exp3",
            Self::EpsilonGreedy(_) => "epsilon-greedy",
        }
    }
}

impl Policy for PolicyEngine {
    fn arms(&self) -> usize {
        match self {
            Self::Exp3(p) => p.arms(),
            Self::EpsilonGreedy(p) => p.arms(),
        }
    }

    fn select_action(&mut self) -> ActionId {
        match self {
            Self::Exp3(p) => p.select_action(),
            Self::EpsilonGreedy(p) => p.select_action(),
        }
    }

    fn update(&mut self, action: ActionId, reward: &Reward) -> Result<()> {
        match self {
            Self::Exp3(p) => p.update(action, reward),
            Self::EpsilonGreedy(p) => p.update(action, reward),
        }
    }

    fn snapshot(&self) -> PolicySnapshot {
        match self {
            Self::Exp3(p) => p.snapshot(),
            Self::EpsilonGreedy(p) => p.snapshot(),
        }
    }
}

impl<P: Policy + ?Sized> Policy for Box<P> {
    fn arms(&self) -> usize {
        (**self).arms()
    }

    fn select_action(&mut self) -> ActionId {
        (**self).select_action()
    }

    fn update(&mut self, action: ActionId, reward: &Reward) -> Result<()> {
        (**self).update(action, reward)
    }

    fn snapshot(&self) -> PolicySnapshot {
        (**self).snapshot()
    }
}

pub(crate) fn check_action(action: ActionId, arms: usize) -> Result<usize> {
    if action.index() < arms {
        Ok(action.index())
    } else {
        Err(CoreError::InvalidAction { action, arms })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_builds_both_strategies() {
        let weights = RewardWeights::default();
        let exp3 = PolicyEngine::new(30, &StrategyConfig::default(), &weights, Some(1)).unwrap();
        assert_eq!(exp3.name(), "exp3");
        assert_eq!(exp3.arms(), 30);

        let eg = PolicyEngine::new(
            30,
            &StrategyConfig::EpsilonGreedy(EpsilonGreedyConfig::default()),
            &weights,
            Some(1),
        )
        .unwrap();
        assert_eq!(eg.name(), "epsilon-greedy");
        assert_eq!(eg.snapshot().probabilities.len(), 30);
    }

    #[test]
    fn test_engine_rejects_zero_arms() {
        let weights = RewardWeights::default();
        assert!(PolicyEngine::new(0, &StrategyConfig::default(), &weights, None).is_err());
    }

    #[test]
    fn test_engine_rejects_out_of_range_update() {
        let weights = RewardWeights::default();
        let mut engine =
            PolicyEngine::new(4, &StrategyConfig::default(), &weights, Some(3)).unwrap();
        let err = engine.update(ActionId(4), &Reward::scalar(1.0)).unwrap_err();
        assert_eq!(
            err,
            CoreError::InvalidAction {
                action: ActionId(4),
                arms: 4
            }
        );
        assert_eq!(engine.snapshot().updates, 0);
    }

    #[test]
    fn test_neutral_update_leaves_weights_unchanged() {
        let weights = RewardWeights::default();
        let mut exp3 =
            PolicyEngine::new(30, &StrategyConfig::default(), &weights, Some(5)).unwrap();
        let before = exp3.snapshot();
        exp3.select_action();
        exp3.update(ActionId(3), &Reward::neutral()).unwrap();
        let after = exp3.snapshot();
        assert!(after.weights.iter().all(|&w| w == 1.0));
        assert_eq!(after.probabilities, before.probabilities);
        assert_eq!(after.updates, 1);

        let mut eg = PolicyEngine::new(
            30,
            &StrategyConfig::EpsilonGreedy(EpsilonGreedyConfig::default()),
            &weights,
            Some(5),
        )
        .unwrap();
        eg.update(ActionId(0), &Reward::scalar(1.0)).unwrap();
        let before = eg.snapshot().weights;
        eg.update(ActionId(0), &Reward::neutral()).unwrap();
        assert_eq!(eg.snapshot().weights, before);
        assert_eq!(eg.snapshot().updates, 2);
    }

    #[test]
    fn test_boxed_policy_delegates() {
        let weights = RewardWeights::default();
        let engine = PolicyEngine::new(3, &StrategyConfig::default(), &weights, Some(9)).unwrap();
        let mut boxed: Box<dyn Policy> = Box::new(engine);
        let action = boxed.select_action();
        assert!(action.index() < 3);
        boxed.update(action, &Reward::scalar(0.5)).unwrap();
        assert_eq!(boxed.snapshot().updates, 1);
    }

    #[test]
    fn test_strategy_config_from_toml_shape() {
        let json = r#"{"kind":"epsilon-greedy","epsilon":0.2}"#;
        let config: StrategyConfig = serde_json::from_str(json).unwrap();
        match config {
            StrategyConfig::EpsilonGreedy(c) => assert_eq!(c.epsilon, 0.2),
            other => panic!("unexpected strategy {:?}", other),
        }
    }
}
