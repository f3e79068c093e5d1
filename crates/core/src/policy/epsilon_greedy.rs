//! Value-based strategy: epsilon-greedy over per-arm reward estimates.
//!
//! Estimates are kept as vectors `(delivery, energy)` and only scalarized
//! with the reward weights when choosing the greedy arm.

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{check_action, Policy, PolicySnapshot};
use crate::catalog::ActionId;
use crate::error::{CoreError, Result};
use crate::reward::{Reward, RewardWeights};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpsilonGreedyConfig {
    /// Probability of a uniform exploratory draw
    pub epsilon: f64,
    /// Constant step size; `None` means sample averages
    pub step_size: Option<f64>,
}

impl Default for EpsilonGreedyConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.1,
            step_size: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct ArmValue {
    delivery: f64,
    energy: f64,
    count: u64,
}

#[derive(Debug)]
pub struct EpsilonGreedyPolicy {
    config: EpsilonGreedyConfig,
    weights: RewardWeights,
    values: Vec<ArmValue>,
    updates: u64,
    rng: StdRng,
}

impl EpsilonGreedyPolicy {
    pub fn new(
        arms: usize,
        config: EpsilonGreedyConfig,
        weights: RewardWeights,
        rng: StdRng,
    ) -> Result<Self> {
        if arms == 0 {
            return Err(CoreError::InvalidConfig(
                "epsilon-greedy needs at least one arm".into(),
            ));
        }
        if !(0.0..=1.0).contains(&config.epsilon) {
            return Err(CoreError::InvalidConfig(format!(
                "epsilon must lie in [0, 1], got {}",
                config.epsilon
            )));
        }
        if let Some(step) = config.step_size {
            if !(step > 0.0 && step <= 1.0) {
                return Err(CoreError::InvalidConfig(format!(
                    "step size must lie in (0, 1], got {}",
                    step
                )));
            }
        }

        Ok(Self {
            config,
            weights,
            values: vec![ArmValue::default(); arms],
            updates: 0,
            rng,
        })
    }

    /// Scalarized value estimate per arm.
    pub fn values(&self) -> Vec<f64> {
        self.values
            .iter()
            .map(|v| self.weights.scalarize(v.delivery, v.energy))
            .collect()
    }

    /// Arms sharing the best estimate. Untried arms win over tried ones.
    fn greedy_set(&self) -> Vec<usize> {
        let untried: Vec<usize> = self
            .values
            .iter()
            .enumerate()
            .filter(|(_, v)| v.count == 0)
            .map(|(i, _)| i)
            .collect();
        if !untried.is_empty() {
            return untried;
        }

        let values = self.values();
        let best = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        values
            .iter()
            .enumerate()
            .filter(|(_, v)| **v >= best)
            .map(|(i, _)| i)
            .collect()
    }

    fn clamp_components(reward: &Reward) -> (f64, f64) {
        let delivery = if reward.delivery.is_nan() { 0.0 } else { reward.delivery.clamp(0.0, 1.0) };
        let energy = if reward.energy.is_nan() { 0.0 } else { reward.energy.max(0.0) };
        if delivery != reward.delivery || energy != reward.energy {
            warn!(
                delivery = reward.delivery,
                energy = reward.energy,
                "reward components outside expected range, clamped"
            );
        }
        (delivery, energy)
    }
}

impl Policy for EpsilonGreedyPolicy {
    fn arms(&self) -> usize {
        self.values.len()
    }

    fn select_action(&mut self) -> ActionId {
        let idx = if self.rng.gen::<f64>() < self.config.epsilon {
            self.rng.gen_range(0..self.values.len())
        } else {
            let greedy = self.greedy_set();
            greedy[self.rng.gen_range(0..greedy.len())]
        };
        ActionId(idx as u32)
    }

    fn update(&mut self, action: ActionId, reward: &Reward) -> Result<()> {
        let idx = check_action(action, self.arms())?;
        if reward.neutral {
            self.updates += 1;
            debug!(action = %action, "neutral reward, estimates unchanged");
            return Ok(());
        }
        let (delivery, energy) = Self::clamp_components(reward);

        let v = &mut self.values[idx];
        v.count += 1;
        let step = self.config.step_size.unwrap_or(1.0 / v.count as f64);
        v.delivery += step * (delivery - v.delivery);
        v.energy += step * (energy - v.energy);
        self.updates += 1;

        debug!(action = %action, delivery, energy, count = v.count, "value update");
        Ok(())
    }

    fn snapshot(&self) -> PolicySnapshot {
        let arms = self.values.len() as f64;
        let greedy = self.greedy_set();
        let share = (1.0 - self.config.epsilon) / greedy.len() as f64;
        let mut probabilities = vec![self.config.epsilon / arms; self.values.len()];
        for i in greedy {
            probabilities[i] += share;
        }

        PolicySnapshot {
            strategy: "epsilon-greedy".to_string(),
            weights: self.values(),
            probabilities,
            updates: self.updates,
        }
    }
}
