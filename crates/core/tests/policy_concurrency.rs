use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use adr_core::{ActionId, Exp3Config, Policy, PolicyEngine, Reward, RewardWeights, StrategyConfig};

fn engine(gamma: f64) -> PolicyEngine {
    let strategy = StrategyConfig::Exp3(Exp3Config {
        gamma,
        reward_min: Some(0.0),
        reward_max: Some(1.0),
    });
    PolicyEngine::new(8, &strategy, &RewardWeights::default(), Some(11)).unwrap()
}

/// Each thread owns one arm and pushes its updates through a shared lock.
fn run_interleaved(threads: usize, per_thread: usize) -> Vec<f64> {
    let shared = Arc::new(Mutex::new(engine(0.2)));

    let handles: Vec<_> = (0..threads)
        .map(|arm| {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                for i in 0..per_thread {
                    let reward = Reward::scalar(((arm + i) % 5) as f64 / 4.0);
                    shared.lock().update(ActionId(arm as u32), &reward).unwrap();
                    if i % 3 == 0 {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let snapshot = shared.lock().snapshot();
    assert_eq!(snapshot.updates, (threads * per_thread) as u64);
    snapshot.weights
}

fn run_sequential(threads: usize, per_thread: usize) -> Vec<f64> {
    let mut policy = engine(0.2);
    for arm in (0..threads).rev() {
        for i in 0..per_thread {
            let reward = Reward::scalar(((arm + i) % 5) as f64 / 4.0);
            policy.update(ActionId(arm as u32), &reward).unwrap();
        }
    }
    policy.snapshot().weights
}

#[test]
fn test_interleaved_updates_for_distinct_arms_agree() {
    let expected = run_sequential(6, 50);
    for _ in 0..5 {
        let weights = run_interleaved(6, 50);
        for (got, want) in weights.iter().zip(&expected) {
            assert!(
                (got - want).abs() <= 1e-12 * want.abs().max(1.0),
                "{} != {}",
                got,
                want
            );
        }
    }
}

#[test]
fn test_snapshot_is_always_normalized_under_contention() {
    let shared = Arc::new(Mutex::new(engine(0.1)));

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                for i in 0..500 {
                    let mut guard = shared.lock();
                    let action = guard.select_action();
                    let reward = Reward::scalar(if action.0 as usize == t { 1.0 } else { (i % 2) as f64 * 0.2 });
                    guard.update(action, &reward).unwrap();
                }
            })
        })
        .collect();

    let reader = {
        let shared = Arc::clone(&shared);
        thread::spawn(move || {
            for _ in 0..500 {
                let snapshot = shared.lock().snapshot();
                let sum: f64 = snapshot.probabilities.iter().sum();
                assert!((sum - 1.0).abs() < 1e-9);
                assert!(snapshot.probabilities.iter().all(|p| *p >= 0.1 / 8.0 - 1e-9));
            }
        })
    };

    for w in writers {
        w.join().unwrap();
    }
    reader.join().unwrap();
}
