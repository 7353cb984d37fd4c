use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analytics::config::{BktConfig, EstimatorConfig};
use crate::analytics::knowledge::estimator::{FitOutcome, ParameterEstimator};
use crate::analytics::knowledge::tracker::{BktParameters, KnowledgeTracker, LearningTrajectory};
use crate::analytics::types::Observation;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterySummary {
    pub average_mastery: f64,
    pub well_mastered: usize,
    pub struggling: usize,
    pub total_points: usize,
    pub per_point: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerExport {
    pub parameters: BktParameters,
    pub observations: Vec<Observation>,
    pub mastery_history: Vec<f64>,
    pub current_mastery: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningDataExport {
    pub exported_at: DateTime<Utc>,
    pub trackers: BTreeMap<String, TrackerExport>,
    #[serde(default)]
    pub fitted_params: BTreeMap<String, BktParameters>,
}

/// Result of recording an observation without refitting inline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KnowledgeUpdate {
    pub mastery: f64,
    pub refit_due: bool,
}

/// Detached refit work; owns copies of everything it needs so it can run off-thread.
#[derive(Debug, Clone)]
pub struct RefitJob {
    pub knowledge_point: String,
    observations: Vec<Observation>,
    estimator: ParameterEstimator,
}

impl RefitJob {
    pub fn run(self) -> (String, FitOutcome) {
        let outcome = self
            .estimator
            .fit_sequences(&self.knowledge_point, &[self.observations.as_slice()]);
        (self.knowledge_point, outcome)
    }
}

/// Owns one tracker per knowledge point and refits their parameters periodically.
#[derive(Debug, Clone)]
pub struct AdaptiveBktSystem {
    config: BktConfig,
    estimator: ParameterEstimator,
    trackers: HashMap<String, KnowledgeTracker>,
    fitted_params: HashMap<String, BktParameters>,
}

impl Default for AdaptiveBktSystem {
    fn default() -> Self {
        Self::new(BktConfig::default(), EstimatorConfig::default())
    }
}

impl AdaptiveBktSystem {
    pub fn new(config: BktConfig, estimator_config: EstimatorConfig) -> Self {
        Self {
            config,
            estimator: ParameterEstimator::new(estimator_config),
            trackers: HashMap::new(),
            fitted_params: HashMap::new(),
        }
    }

    /// Parameters a new tracker starts from: the last fit for the point if any.
    fn initial_parameters(&self, knowledge_point: &str) -> BktParameters {
        self.fitted_params
            .get(knowledge_point)
            .copied()
            .unwrap_or(self.config.default_parameters)
    }

    pub fn register_knowledge_point(&mut self, knowledge_point: &str, params: Option<BktParameters>) {
        let params = params.unwrap_or_else(|| self.initial_parameters(knowledge_point));
        self.trackers
            .insert(knowledge_point.to_string(), KnowledgeTracker::new(knowledge_point, params));
    }

    pub fn get_tracker(&mut self, knowledge_point: &str) -> &mut KnowledgeTracker {
        let initial = self.initial_parameters(knowledge_point);
        self.trackers
            .entry(knowledge_point.to_string())
            .or_insert_with(|| KnowledgeTracker::new(knowledge_point, initial))
    }

    pub fn tracker(&self, knowledge_point: &str) -> Option<&KnowledgeTracker> {
        self.trackers.get(knowledge_point)
    }

    pub fn knowledge_points(&self) -> impl Iterator<Item = &str> {
        self.trackers.keys().map(String::as_str)
    }

    /// Refits at the threshold and every `refit_interval` observations after it.
    fn refit_due(&self, count: usize) -> bool {
        let min = self.config.min_observations_for_fitting;
        let interval = self.config.refit_interval.max(1);
        count >= min && (count - min) % interval == 0
    }

    /// Updates mastery and refits parameters inline when due.
    pub fn update_knowledge(&mut self, knowledge_point: &str, observation: Observation) -> f64 {
        let update = self.record_observation(knowledge_point, observation);
        if update.refit_due {
            if let Some(job) = self.refit_job(knowledge_point) {
                let (kp, outcome) = job.run();
                self.apply_fitted(&kp, &outcome);
            }
        }
        update.mastery
    }

    /// Updates mastery and reports whether a refit is due; the caller schedules it.
    pub fn record_observation(&mut self, knowledge_point: &str, observation: Observation) -> KnowledgeUpdate {
        let tracker = self.get_tracker(knowledge_point);
        let mastery = tracker.update(observation);
        let count = tracker.observations().len();
        KnowledgeUpdate {
            mastery,
            refit_due: self.refit_due(count),
        }
    }

    pub fn refit_job(&self, knowledge_point: &str) -> Option<RefitJob> {
        let tracker = self.trackers.get(knowledge_point)?;
        Some(RefitJob {
            knowledge_point: knowledge_point.to_string(),
            observations: tracker.observations().to_vec(),
            estimator: self.estimator.clone(),
        })
    }

    /// Swaps in fitted parameters. Non-converged or data-starved fits leave the tracker untouched.
    pub fn apply_fitted(&mut self, knowledge_point: &str, outcome: &FitOutcome) -> bool {
        let Some(params) = outcome.params() else {
            return false;
        };
        match self.trackers.get_mut(knowledge_point) {
            Some(tracker) => {
                tracker.set_parameters(params);
                self.fitted_params.insert(knowledge_point.to_string(), *tracker.parameters());
                true
            }
            None => false,
        }
    }

    pub fn predict_performance(&self, knowledge_point: &str, difficulty: f64) -> (f64, f64) {
        match self.trackers.get(knowledge_point) {
            Some(tracker) => tracker.predict_performance(difficulty),
            None => KnowledgeTracker::new(knowledge_point, self.initial_parameters(knowledge_point))
                .predict_performance(difficulty),
        }
    }

    pub fn learning_trajectory(&self, knowledge_point: &str) -> Option<LearningTrajectory> {
        self.trackers.get(knowledge_point).and_then(|t| t.trajectory())
    }

    /// Aggregates mastery over the given points, or over every tracked point when none are given.
    pub fn get_overall_mastery<S: AsRef<str>>(&self, knowledge_points: &[S]) -> MasterySummary {
        let per_point: BTreeMap<String, f64> = if knowledge_points.is_empty() {
            self.trackers
                .iter()
                .map(|(kp, t)| (kp.clone(), t.current_mastery()))
                .collect()
        } else {
            knowledge_points
                .iter()
                .map(|kp| {
                    let kp = kp.as_ref();
                    let mastery = self
                        .trackers
                        .get(kp)
                        .map(|t| t.current_mastery())
                        .unwrap_or(self.config.unknown_point_mastery);
                    (kp.to_string(), mastery)
                })
                .collect()
        };

        let total_points = per_point.len();
        let average_mastery = if total_points == 0 {
            0.0
        } else {
            per_point.values().sum::<f64>() / total_points as f64
        };

        MasterySummary {
            average_mastery,
            well_mastered: per_point
                .values()
                .filter(|m| **m > self.config.well_mastered_threshold)
                .count(),
            struggling: per_point
                .values()
                .filter(|m| **m < self.config.struggling_threshold)
                .count(),
            total_points,
            per_point,
        }
    }

    pub fn fitted_params(&self, knowledge_point: &str) -> Option<BktParameters> {
        self.fitted_params.get(knowledge_point).copied()
    }

    pub fn export_learning_data(&self) -> LearningDataExport {
        let trackers = self
            .trackers
            .iter()
            .map(|(kp, t)| {
                (
                    kp.clone(),
                    TrackerExport {
                        parameters: *t.parameters(),
                        observations: t.observations().to_vec(),
                        mastery_history: t.mastery_history().to_vec(),
                        current_mastery: t.current_mastery(),
                    },
                )
            })
            .collect();

        LearningDataExport {
            exported_at: Utc::now(),
            trackers,
            fitted_params: self
                .fitted_params
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        }
    }

    pub fn from_export(config: BktConfig, estimator_config: EstimatorConfig, export: LearningDataExport) -> Self {
        let mut system = Self::new(config, estimator_config);
        for (kp, data) in export.trackers {
            let tracker = KnowledgeTracker::restore(
                kp.clone(),
                data.parameters,
                data.observations,
                data.mastery_history,
                data.current_mastery,
            );
            system.trackers.insert(kp, tracker);
        }
        system.fitted_params = export.fitted_params.into_iter().collect();
        tracing::debug!(trackers = system.trackers.len(), "learning data imported");
        system
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(correct: bool) -> Observation {
        Observation::new(0.0, correct)
    }

    #[test]
    fn trackers_are_created_lazily() {
        let mut system = AdaptiveBktSystem::default();
        assert!(system.tracker("flexbox").is_none());
        system.update_knowledge("flexbox", obs(true));
        assert_eq!(system.tracker("flexbox").unwrap().observations().len(), 1);
    }

    #[test]
    fn refit_schedule_follows_threshold_and_interval() {
        let system = AdaptiveBktSystem::default();
        let due: Vec<usize> = (1..=60).filter(|n| system.refit_due(*n)).collect();
        assert_eq!(due, vec![10, 30, 50]);
    }

    #[test]
    fn overall_mastery_uses_default_for_unknown_points() {
        let mut system = AdaptiveBktSystem::default();
        system.register_knowledge_point("known", Some(BktParameters::new(0.9, 0.3, 0.1, 0.1)));
        let summary = system.get_overall_mastery(&["known", "unknown"]);
        assert_eq!(summary.total_points, 2);
        assert!((summary.average_mastery - (0.9 + 0.1) / 2.0).abs() < 1e-12);
        assert_eq!(summary.well_mastered, 1);
        assert_eq!(summary.struggling, 1);
    }

    #[test]
    fn empty_selection_covers_all_tracked_points() {
        let mut system = AdaptiveBktSystem::default();
        system.update_knowledge("a", obs(true));
        system.update_knowledge("b", obs(false));
        let summary = system.get_overall_mastery::<&str>(&[]);
        assert_eq!(summary.total_points, 2);
    }

    #[test]
    fn failed_fit_leaves_parameters_unchanged() {
        let mut system = AdaptiveBktSystem::default();
        system.register_knowledge_point("kp", Some(BktParameters::new(0.4, 0.2, 0.2, 0.1)));
        let before = *system.tracker("kp").unwrap().parameters();
        let applied = system.apply_fitted("kp", &FitOutcome::InsufficientData { observations: 3 });
        assert!(!applied);
        assert_eq!(*system.tracker("kp").unwrap().parameters(), before);
        assert!(system.fitted_params("kp").is_none());
    }

    #[test]
    fn new_trackers_start_from_fitted_parameters() {
        let fitted = BktParameters::new(0.5, 0.2, 0.15, 0.05);
        let export = LearningDataExport {
            exported_at: Utc::now(),
            trackers: BTreeMap::new(),
            fitted_params: BTreeMap::from([("closures".to_string(), fitted)]),
        };
        let mut system = AdaptiveBktSystem::from_export(BktConfig::default(), EstimatorConfig::default(), export);

        let expected = KnowledgeTracker::new("closures", fitted).predict_performance(0.4);
        assert_eq!(system.predict_performance("closures", 0.4), expected);

        system.update_knowledge("closures", obs(true));
        assert_eq!(*system.tracker("closures").unwrap().parameters(), fitted);
        system.update_knowledge("promises", obs(true));
        assert_eq!(
            *system.tracker("promises").unwrap().parameters(),
            BktConfig::default().default_parameters
        );
    }

    #[test]
    fn export_round_trip_preserves_mastery() {
        let mut system = AdaptiveBktSystem::default();
        for (i, correct) in [true, false, true, true, false].into_iter().enumerate() {
            system.update_knowledge(if i % 2 == 0 { "grid" } else { "dom" }, obs(correct));
        }
        let export = system.export_learning_data();
        let json = serde_json::to_string(&export).unwrap();
        let restored = AdaptiveBktSystem::from_export(
            BktConfig::default(),
            EstimatorConfig::default(),
            serde_json::from_str(&json).unwrap(),
        );
        for kp in ["grid", "dom"] {
            assert_eq!(
                restored.tracker(kp).unwrap().current_mastery(),
                system.tracker(kp).unwrap().current_mastery()
            );
        }
    }
}
