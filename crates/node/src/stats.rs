use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::Serialize;

use adr_core::RewardSample;

/// Controller counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ControllerStats {
    /// Sessions accepted since start
    pub sessions_opened: u64,
    /// Sessions currently connected
    pub sessions_active: u64,
    /// Observations handed to the dispatcher
    pub observations: u64,
    /// Decisions produced by the policy in time
    pub decisions: u64,
    /// Requests answered with the fallback action
    pub timeouts: u64,
    /// Observations discarded because the device already had a pending request
    pub duplicates: u64,
    /// Frames that could not be parsed or exceeded the size limit
    pub malformed: u64,
    /// Outcomes replaced by a neutral reward
    pub invalid_outcomes: u64,
    /// Updates rejected for an out-of-range action
    pub invalid_actions: u64,
    /// Observations dropped because the registry was full
    pub registry_rejections: u64,
}

impl ControllerStats {
    /// Fraction of answered requests that fell back (0.0 to 1.0)
    pub fn timeout_rate(&self) -> f64 {
        let answered = self.decisions + self.timeouts;
        if answered == 0 {
            return 0.0;
        }
        self.timeouts as f64 / answered as f64
    }
}

/// Counters plus a bounded history of recent reward samples.
pub struct StatsTracker {
    stats: Mutex<ControllerStats>,
    history: Mutex<VecDeque<RewardSample>>,
    history_len: usize,
}

impl StatsTracker {
    pub fn new(history_len: usize) -> Self {
        Self {
            stats: Mutex::new(ControllerStats::default()),
            history: Mutex::new(VecDeque::with_capacity(history_len)),
            history_len,
        }
    }

    pub fn record(&self, f: impl FnOnce(&mut ControllerStats)) {
        f(&mut self.stats.lock());
    }

    pub fn push_sample(&self, sample: RewardSample) {
        if self.history_len == 0 {
            return;
        }
        let mut history = self.history.lock();
        if history.len() == self.history_len {
            history.pop_front();
        }
        history.push_back(sample);
    }

    pub fn snapshot(&self) -> ControllerStats {
        self.stats.lock().clone()
    }

    /// Recent samples, oldest first.
    pub fn history(&self) -> Vec<RewardSample> {
        self.history.lock().iter().cloned().collect()
    }

    /// Mean scalar reward over the retained history.
    pub fn mean_reward(&self) -> Option<f64> {
        let history = self.history.lock();
        if history.is_empty() {
            return None;
        }
        let total: f64 = history.iter().map(|s| s.reward.value).sum();
        Some(total / history.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adr_core::{DeviceId, Outcome, Reward};

    fn sample(value: f64) -> RewardSample {
        RewardSample {
            device: DeviceId::new("ed-1").unwrap(),
            outcome: Outcome::default(),
            reward: Reward::scalar(value),
            neutral: false,
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let tracker = StatsTracker::new(3);
        for v in [1.0, 2.0, 3.0, 4.0] {
            tracker.push_sample(sample(v));
        }
        let values: Vec<f64> = tracker.history().iter().map(|s| s.reward.value).collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
        assert_eq!(tracker.mean_reward(), Some(3.0));
    }

    #[test]
    fn test_zero_history_keeps_nothing() {
        let tracker = StatsTracker::new(0);
        tracker.push_sample(sample(1.0));
        assert!(tracker.history().is_empty());
        assert_eq!(tracker.mean_reward(), None);
    }

    #[test]
    fn test_counters() {
        let tracker = StatsTracker::new(1);
        tracker.record(|s| s.decisions += 3);
        tracker.record(|s| s.timeouts += 1);
        let stats = tracker.snapshot();
        assert_eq!(stats.decisions, 3);
        assert!((stats.timeout_rate() - 0.25).abs() < 1e-12);
        assert_eq!(ControllerStats::default().timeout_rate(), 0.0);
    }
}
