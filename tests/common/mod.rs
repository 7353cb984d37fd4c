#![allow(dead_code)]

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use tutor_analytics::analytics::knowledge::BktParameters;
use tutor_analytics::analytics::{Observation, PerformanceEvent};

pub const BASE_TS: f64 = 1_700_000_000.0;

/// Correctness sequence drawn from a known BKT process.
pub fn simulate_sequence(params: &BktParameters, len: usize, rng: &mut ChaCha8Rng) -> Vec<Observation> {
    let mut mastered = rng.random::<f64>() < params.p_init;
    (0..len)
        .map(|t| {
            let p_correct = if mastered { 1.0 - params.p_slip } else { params.p_guess };
            let correct = rng.random::<f64>() < p_correct;
            if !mastered && rng.random::<f64>() < params.p_transit {
                mastered = true;
            }
            Observation::new(BASE_TS + t as f64 * 30.0, correct)
        })
        .collect()
}

pub fn simulate_cohort(params: &BktParameters, learners: usize, len: usize, seed: u64) -> Vec<Vec<Observation>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..learners).map(|_| simulate_sequence(params, len, &mut rng)).collect()
}

pub fn attempt(success: bool, difficulty: f64, timestamp: f64) -> PerformanceEvent {
    PerformanceEvent {
        timestamp: Some(timestamp),
        success,
        time_spent: Some(45.0),
        difficulty: Some(difficulty),
        attempts: Some(1),
        hint_used: false,
        confidence: None,
    }
}
