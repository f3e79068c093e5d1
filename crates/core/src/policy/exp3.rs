//! Exponential-weights bandit (Exp3).
//!
//! Weights are kept in log space and probabilities are computed with a
//! max-shifted softmax, so long runs of high rewards cannot overflow.
//!
//! ```text
//! p[i] = (1 - gamma) * w[i] / sum(w) + gamma / A
//! w[a] <- w[a] * exp(gamma * (r / p[a]) / A)
//! ```
//!
//! The importance weight uses the distribution the arm was last drawn from.
//! Updates never change that distribution, so updates to distinct arms
//! commute exactly between two draws.

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{check_action, Policy, PolicySnapshot};
use crate::catalog::ActionId;
use crate::error::{CoreError, Result};
use crate::reward::Reward;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Exp3Config {
    /// Exploration rate in `(0, 1]`
    pub gamma: f64,
    /// Lower bound of the scalar reward, mapped to 0
    pub reward_min: Option<f64>,
    /// Upper bound of the scalar reward, mapped to 1
    pub reward_max: Option<f64>,
}

impl Default for Exp3Config {
    fn default() -> Self {
        Self {
            gamma: 0.1,
            reward_min: None,
            reward_max: None,
        }
    }
}

#[derive(Debug)]
pub struct Exp3Policy {
    gamma: f64,
    reward_min: f64,
    reward_max: f64,
    log_weights: Vec<f64>,
    probabilities: Vec<f64>,
    /// Distribution used for the most recent draw
    sampling: Vec<f64>,
    updates: u64,
    rng: StdRng,
}

impl Exp3Policy {
    pub fn new(arms: usize, config: Exp3Config, rng: StdRng) -> Result<Self> {
        if arms == 0 {
            return Err(CoreError::InvalidConfig("exp3 needs at least one arm".into()));
        }
        if !(config.gamma > 0.0 && config.gamma <= 1.0) {
            return Err(CoreError::InvalidConfig(format!(
                "exp3 gamma must lie in (0, 1], got {}",
                config.gamma
            )));
        }
        let reward_min = config.reward_min.unwrap_or(0.0);
        let reward_max = config.reward_max.unwrap_or(1.0);
        if !reward_min.is_finite() || !reward_max.is_finite() || reward_max <= reward_min {
            return Err(CoreError::InvalidConfig(format!(
                "exp3 reward bounds must satisfy min < max, got [{}, {}]",
                reward_min, reward_max
            )));
        }

        let uniform = vec![1.0 / arms as f64; arms];
        Ok(Self {
            gamma: config.gamma,
            reward_min,
            reward_max,
            log_weights: vec![0.0; arms],
            probabilities: uniform.clone(),
            sampling: uniform,
            updates: 0,
            rng,
        })
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    pub fn weights(&self) -> Vec<f64> {
        self.log_weights.iter().map(|lw| lw.exp()).collect()
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    fn floor(&self) -> f64 {
        self.gamma / self.log_weights.len() as f64
    }

    /// Map a scalar reward onto `[0, 1]`, clamping what falls outside the bounds.
    fn normalize(&self, value: f64) -> f64 {
        let clamped = if value.is_nan() {
            warn!(reward = value, "NaN reward, treating as lower bound");
            self.reward_min
        } else if value < self.reward_min || value > self.reward_max {
            let c = value.clamp(self.reward_min, self.reward_max);
            warn!(
                reward = value,
                clamped = c,
                min = self.reward_min,
                max = self.reward_max,
                "reward outside expected range"
            );
            c
        } else {
            value
        };
        (clamped - self.reward_min) / (self.reward_max - self.reward_min)
    }

    fn recompute(&mut self) {
        let arms = self.log_weights.len() as f64;
        let max = self
            .log_weights
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let shifted: Vec<f64> = self.log_weights.iter().map(|lw| (lw - max).exp()).collect();
        let total: f64 = shifted.iter().sum();

        for (p, w) in self.probabilities.iter_mut().zip(&shifted) {
            *p = (1.0 - self.gamma) * w / total + self.gamma / arms;
        }

        let sum: f64 = self.probabilities.iter().sum();
        for p in self.probabilities.iter_mut() {
            *p /= sum;
        }
    }
}

impl Policy for Exp3Policy {
    fn arms(&self) -> usize {
        self.log_weights.len()
    }

    fn select_action(&mut self) -> ActionId {
        self.sampling.copy_from_slice(&self.probabilities);
        let idx = match WeightedIndex::new(&self.probabilities) {
            Ok(dist) => dist.sample(&mut self.rng),
            Err(e) => {
                warn!(error = %e, "degenerate distribution, drawing uniformly");
                self.rng.gen_range(0..self.log_weights.len())
            }
        };
        ActionId(idx as u32)
    }

    fn update(&mut self, action: ActionId, reward: &Reward) -> Result<()> {
        let idx = check_action(action, self.arms())?;
        if reward.neutral {
            self.updates += 1;
            debug!(action = %action, "neutral reward, weights unchanged");
            return Ok(());
        }
        let arms = self.arms() as f64;

        let r = self.normalize(reward.value);
        let p = self.sampling[idx].max(self.floor());
        let estimate = r / p;

        self.log_weights[idx] += self.gamma * estimate / arms;
        self.recompute();
        self.updates += 1;

        debug!(
            action = %action,
            reward = r,
            estimate,
            probability = self.probabilities[idx],
            "exp3 update"
        );
        Ok(())
    }

    fn snapshot(&self) -> PolicySnapshot {
        PolicySnapshot {
            strategy: "exp3".to_string(),
            weights: self.weights(),
            probabilities: self.probabilities.clone(),
            updates: self.updates,
        }
    }
}
