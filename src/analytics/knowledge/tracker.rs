use serde::{Deserialize, Serialize};

use crate::analytics::types::Observation;

pub const PARAM_MIN: f64 = 0.01;
pub const PARAM_MAX: f64 = 0.99;
const DENOMINATOR_FLOOR: f64 = 1e-10;
const DIFFICULTY_PENALTY: f64 = 0.3;
const STABILITY_WINDOW: usize = 5;

/// The four BKT parameters of one knowledge point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BktParameters {
    #[serde(rename = "P_L0")]
    pub p_init: f64,
    #[serde(rename = "P_T")]
    pub p_transit: f64,
    #[serde(rename = "P_G")]
    pub p_guess: f64,
    #[serde(rename = "P_S")]
    pub p_slip: f64,
}

impl Default for BktParameters {
    fn default() -> Self {
        Self {
            p_init: 0.1,
            p_transit: 0.3,
            p_guess: 0.1,
            p_slip: 0.1,
        }
    }
}

impl BktParameters {
    pub fn new(p_init: f64, p_transit: f64, p_guess: f64, p_slip: f64) -> Self {
        Self {
            p_init,
            p_transit,
            p_guess,
            p_slip,
        }
        .clamped()
    }

    pub fn from_array(values: [f64; 4]) -> Self {
        Self::new(values[0], values[1], values[2], values[3])
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.p_init, self.p_transit, self.p_guess, self.p_slip]
    }

    /// Boundary values mean a degenerate fit; keep every parameter inside the box.
    pub fn clamped(self) -> Self {
        let clamp = |v: f64| {
            if v.is_finite() {
                v.clamp(PARAM_MIN, PARAM_MAX)
            } else {
                PARAM_MIN
            }
        };
        Self {
            p_init: clamp(self.p_init),
            p_transit: clamp(self.p_transit),
            p_guess: clamp(self.p_guess),
            p_slip: clamp(self.p_slip),
        }
    }

    /// P(observed outcome | mastery before the update).
    pub fn outcome_probability(&self, mastery: f64, correct: bool) -> f64 {
        if correct {
            mastery * (1.0 - self.p_slip) + (1.0 - mastery) * self.p_guess
        } else {
            mastery * self.p_slip + (1.0 - mastery) * (1.0 - self.p_guess)
        }
    }

    /// Posterior update on one outcome followed by the learning transition.
    pub fn step(&self, mastery: f64, correct: bool) -> f64 {
        let (p_mastered, p_unmastered) = if correct {
            (1.0 - self.p_slip, self.p_guess)
        } else {
            (self.p_slip, 1.0 - self.p_guess)
        };

        let numerator = p_mastered * mastery;
        let denominator = (p_mastered * mastery + p_unmastered * (1.0 - mastery)).max(DENOMINATOR_FLOOR);
        let posterior = numerator / denominator;

        (posterior + self.p_transit * (1.0 - posterior)).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningTrajectory {
    pub total_attempts: usize,
    pub accuracy: f64,
    pub current_mastery: f64,
    pub learning_rate: f64,
    pub stability: f64,
}

/// Per-knowledge-point hidden Markov tracker.
#[derive(Debug, Clone)]
pub struct KnowledgeTracker {
    knowledge_point: String,
    params: BktParameters,
    observations: Vec<Observation>,
    mastery_history: Vec<f64>,
    current_mastery: f64,
}

impl KnowledgeTracker {
    pub fn new(knowledge_point: impl Into<String>, params: BktParameters) -> Self {
        let params = params.clamped();
        let knowledge_point = knowledge_point.into();
        tracing::debug!(knowledge_point = %knowledge_point, p_init = params.p_init, "knowledge tracker created");
        Self {
            knowledge_point,
            current_mastery: params.p_init,
            params,
            observations: Vec::new(),
            mastery_history: Vec::new(),
        }
    }

    pub(crate) fn restore(
        knowledge_point: String,
        params: BktParameters,
        observations: Vec<Observation>,
        mastery_history: Vec<f64>,
        current_mastery: f64,
    ) -> Self {
        Self {
            knowledge_point,
            params: params.clamped(),
            observations,
            mastery_history,
            current_mastery: current_mastery.clamp(0.0, 1.0),
        }
    }

    pub fn update(&mut self, observation: Observation) -> f64 {
        let observation = observation.sanitized();
        self.current_mastery = self.params.step(self.current_mastery, observation.correct);
        self.observations.push(observation);
        self.mastery_history.push(self.current_mastery);

        tracing::debug!(
            knowledge_point = %self.knowledge_point,
            correct = observation.correct,
            mastery = self.current_mastery,
            "mastery updated"
        );

        self.current_mastery
    }

    /// Returns `(success_probability, mastery_probability)` for an item of the given difficulty.
    pub fn predict_performance(&self, difficulty: f64) -> (f64, f64) {
        let m = self.current_mastery;
        let base = m * (1.0 - self.params.p_slip) + (1.0 - m) * self.params.p_guess;
        let difficulty = if difficulty.is_finite() { difficulty.clamp(0.0, 1.0) } else { 0.5 };
        let adjusted = base * (1.0 - DIFFICULTY_PENALTY * difficulty);
        (adjusted.clamp(0.01, 0.99), m)
    }

    pub fn trajectory(&self) -> Option<LearningTrajectory> {
        if self.observations.is_empty() {
            return None;
        }

        let correct = self.observations.iter().filter(|o| o.correct).count();
        let accuracy = correct as f64 / self.observations.len() as f64;

        let learning_rate = match (self.mastery_history.first(), self.mastery_history.last()) {
            (Some(first), Some(last)) if self.mastery_history.len() > 1 => {
                (last - first) / self.mastery_history.len() as f64
            }
            _ => 0.0,
        };

        let start = self.mastery_history.len().saturating_sub(STABILITY_WINDOW);
        let recent = &self.mastery_history[start..];
        let stability = if recent.len() > 1 {
            1.0 - population_variance(recent)
        } else {
            1.0
        };

        Some(LearningTrajectory {
            total_attempts: self.observations.len(),
            accuracy,
            current_mastery: self.current_mastery,
            learning_rate,
            stability,
        })
    }

    pub fn knowledge_point(&self) -> &str {
        &self.knowledge_point
    }

    pub fn parameters(&self) -> &BktParameters {
        &self.params
    }

    pub fn set_parameters(&mut self, params: BktParameters) {
        self.params = params.clamped();
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn mastery_history(&self) -> &[f64] {
        &self.mastery_history
    }

    pub fn current_mastery(&self) -> f64 {
        self.current_mastery
    }
}

pub(crate) fn population_variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(correct: bool) -> Observation {
        Observation::new(0.0, correct)
    }

    #[test]
    fn single_correct_observation_golden_value() {
        let mut tracker = KnowledgeTracker::new("html_basics", BktParameters::new(0.1, 0.3, 0.1, 0.1));
        let m = tracker.update(obs(true));
        let posterior = 0.1 * 0.9 / (0.1 * 0.9 + 0.9 * 0.1);
        let expected = posterior + 0.3 * (1.0 - posterior);
        assert!((m - expected).abs() < 1e-6);
        assert!((m - 0.650000).abs() < 1e-6);
        assert_eq!(tracker.mastery_history(), &[m]);
    }

    #[test]
    fn first_update_uses_prior() {
        let tracker = KnowledgeTracker::new("kp", BktParameters::new(0.42, 0.3, 0.1, 0.1));
        assert!((tracker.current_mastery() - 0.42).abs() < 1e-12);
    }

    #[test]
    fn predict_performance_is_idempotent() {
        let mut tracker = KnowledgeTracker::new("kp", BktParameters::default());
        tracker.update(obs(true));
        let first = tracker.predict_performance(0.6);
        let second = tracker.predict_performance(0.6);
        assert_eq!(first, second);
    }

    #[test]
    fn predict_performance_applies_difficulty_penalty() {
        let tracker = KnowledgeTracker::new("kp", BktParameters::new(0.5, 0.3, 0.2, 0.1));
        let base = 0.5 * 0.9 + 0.5 * 0.2;
        let (easy, _) = tracker.predict_performance(0.0);
        let (hard, _) = tracker.predict_performance(1.0);
        assert!((easy - base).abs() < 1e-12);
        assert!((hard - base * 0.7).abs() < 1e-12);
    }

    #[test]
    fn extreme_parameters_are_clamped() {
        let params = BktParameters::new(0.0, 1.0, -0.5, f64::NAN);
        for v in params.to_array() {
            assert!((PARAM_MIN..=PARAM_MAX).contains(&v));
        }
    }

    #[test]
    fn trajectory_statistics() {
        let mut tracker = KnowledgeTracker::new("kp", BktParameters::default());
        assert!(tracker.trajectory().is_none());
        for correct in [true, false, true, true] {
            tracker.update(obs(correct));
        }
        let trajectory = tracker.trajectory().unwrap();
        assert_eq!(trajectory.total_attempts, 4);
        assert!((trajectory.accuracy - 0.75).abs() < 1e-12);
        let history = tracker.mastery_history();
        let expected_rate = (history[3] - history[0]) / 4.0;
        assert!((trajectory.learning_rate - expected_rate).abs() < 1e-12);
        assert!(trajectory.stability <= 1.0 && trajectory.stability > 0.0);
    }
}
