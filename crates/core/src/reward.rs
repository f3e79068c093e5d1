//! Reward Aggregator
//!
//! Turns raw outcome telemetry into the reward consumed by the policy.
//! `reward = alpha * delivery_ratio - beta * energy / energy_reference`.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::id::DeviceId;

/// Weights used to blend delivery and energy into one scalar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardWeights {
    /// Weight on the delivery ratio
    pub alpha: f64,
    /// Weight on normalized energy
    pub beta: f64,
    /// Energy (J) that maps to a normalized energy of 1.0
    pub energy_reference_j: f64,
}

impl Default for RewardWeights {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 0.5,
            energy_reference_j: 0.05,
        }
    }
}

impl RewardWeights {
    pub fn validate(&self) -> Result<()> {
        if !self.alpha.is_finite() || !self.beta.is_finite() || self.alpha < 0.0 || self.beta < 0.0 {
            return Err(CoreError::InvalidConfig(format!(
                "reward weights must be finite and non-negative (alpha={}, beta={})",
                self.alpha, self.beta
            )));
        }
        if self.alpha + self.beta <= 0.0 {
            return Err(CoreError::InvalidConfig(
                "reward weights alpha and beta cannot both be zero".into(),
            ));
        }
        if self.energy_reference_j <= 0.0 || !self.energy_reference_j.is_finite() {
            return Err(CoreError::InvalidConfig(format!(
                "energy reference must be positive, got {}",
                self.energy_reference_j
            )));
        }
        Ok(())
    }

    /// Bounds of the scalar reward for in-range telemetry: `[-beta, alpha]`.
    pub fn scalar_range(&self) -> (f64, f64) {
        (-self.beta, self.alpha)
    }

    pub fn scalarize(&self, delivery: f64, energy: f64) -> f64 {
        self.alpha * delivery - self.beta * energy
    }
}

/// Measured result of the previously applied action.
///
/// Fields are optional because the environment may omit or garble them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Success flag (0/1) or packet delivery ratio
    pub delivery: Option<f64>,
    /// Energy consumed by the transmission, in Joules
    pub energy_j: Option<f64>,
}

impl Outcome {
    pub fn new(delivery: f64, energy_j: f64) -> Self {
        Self {
            delivery: Some(delivery),
            energy_j: Some(energy_j),
        }
    }
}

/// Reward handed to the policy: the scalar blend plus its components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reward {
    pub value: f64,
    pub delivery: f64,
    pub energy: f64,
    /// Counts as an update but carries no information about the arm
    #[serde(default)]
    pub neutral: bool,
}

impl Reward {
    /// Substituted when telemetry is unusable.
    pub fn neutral() -> Self {
        Self {
            value: 0.0,
            delivery: 0.0,
            energy: 0.0,
            neutral: true,
        }
    }

    pub fn scalar(value: f64) -> Self {
        Self {
            value,
            delivery: 0.0,
            energy: 0.0,
            neutral: false,
        }
    }
}

/// One aggregated outcome, kept briefly for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardSample {
    pub device: DeviceId,
    pub outcome: Outcome,
    pub reward: Reward,
    /// True when the reward was substituted because the outcome was invalid
    pub neutral: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RewardAggregator {
    weights: RewardWeights,
}

impl RewardAggregator {
    pub fn new(weights: RewardWeights) -> Result<Self> {
        weights.validate()?;
        Ok(Self { weights })
    }

    pub fn weights(&self) -> &RewardWeights {
        &self.weights
    }

    /// Combine an outcome into a reward. Pure and deterministic.
    ///
    /// Out-of-range components are passed through unchanged; clamping is the
    /// policy's job.
    pub fn combine(&self, outcome: &Outcome) -> Result<Reward> {
        let delivery = outcome
            .delivery
            .ok_or_else(|| CoreError::InvalidOutcome("missing delivery field".into()))?;
        let energy_j = outcome
            .energy_j
            .ok_or_else(|| CoreError::InvalidOutcome("missing energy field".into()))?;

        if !delivery.is_finite() || !energy_j.is_finite() {
            return Err(CoreError::InvalidOutcome(format!(
                "non-finite telemetry (delivery={}, energy={})",
                delivery, energy_j
            )));
        }
        if self.weights.energy_reference_j == 0.0 || !self.weights.energy_reference_j.is_finite() {
            return Err(CoreError::InvalidOutcome(
                "energy reference is zero, cannot normalize".into(),
            ));
        }

        let energy = energy_j / self.weights.energy_reference_j;
        Ok(Reward {
            value: self.weights.scalarize(delivery, energy),
            delivery,
            energy,
            neutral: false,
        })
    }
}
