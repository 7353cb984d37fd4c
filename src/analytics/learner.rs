//! Per-learner model: knowledge tracing, behavior, state predictors and profile
//! behind one synchronous façade. Callers serialize writes per learner.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::analytics::config::AnalyticsConfig;
use crate::analytics::decision::{plan_quiz, LearnerStateSummary, QuizPlan, StateFusion};
use crate::analytics::knowledge::{AdaptiveBktSystem, FitOutcome, KnowledgeUpdate, MasterySummary, RefitJob};
use crate::analytics::modeling::{
    evaluate_submissions, BehaviorEvent, BehaviorLog, FeatureEngineer, FeatureVector, HeuristicAssessment,
    LearnerProfile, PredictorError, StatePredictions, StatePredictor, StateTrainingReport,
};
use crate::analytics::persistence::LearnerSnapshot;
use crate::analytics::scheduler::{TrainingBuffer, TrainingSample, TrainingScheduler};
use crate::analytics::types::{LearningPreference, Observation, PerformanceEvent};

/// Window used for the recency-based behavior features.
const RECENT_WINDOW_SECS: f64 = 300.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttemptOutcome {
    pub mastery: f64,
    pub refit_due: bool,
    pub training_due: bool,
}

/// Detached predictor retraining; runs against a clone so the live predictor
/// keeps serving until the result is installed.
#[derive(Debug, Clone)]
pub struct TrainingJob {
    predictor: StatePredictor,
    samples: Vec<TrainingSample>,
    pending: usize,
}

impl TrainingJob {
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Samples recorded since the previous training that this job accounts for.
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn run(mut self) -> Result<(StatePredictor, StateTrainingReport), PredictorError> {
        let report = self.predictor.train(self.samples.iter())?;
        Ok((self.predictor, report))
    }
}

#[derive(Debug, Clone)]
pub struct LearnerModel {
    learner_id: String,
    config: AnalyticsConfig,
    knowledge: AdaptiveBktSystem,
    predictor: StatePredictor,
    fusion: StateFusion,
    profile: LearnerProfile,
    behavior: BehaviorLog,
    training: TrainingBuffer,
    scheduler: TrainingScheduler,
    last_features: Option<FeatureVector>,
    last_assessment: Option<HeuristicAssessment>,
    samples_since_training: usize,
    training_in_flight: bool,
    last_activity: DateTime<Utc>,
    revision: u64,
}

impl LearnerModel {
    pub fn new(learner_id: impl Into<String>, config: AnalyticsConfig) -> Self {
        let scheduler = TrainingScheduler::new(config.scheduler.clone());
        Self {
            learner_id: learner_id.into(),
            knowledge: AdaptiveBktSystem::new(config.bkt.clone(), config.estimator.clone()),
            predictor: StatePredictor::new(config.predictor.clone(), config.forest.clone(), config.features.clone()),
            fusion: StateFusion::new(config.fusion.clone()),
            profile: LearnerProfile::default(),
            behavior: BehaviorLog::new(config.scheduler.behavior_log_capacity),
            training: scheduler.new_buffer(),
            scheduler,
            last_features: None,
            last_assessment: None,
            samples_since_training: 0,
            training_in_flight: false,
            last_activity: Utc::now(),
            revision: 0,
            config,
        }
    }

    pub fn learner_id(&self) -> &str {
        &self.learner_id
    }

    pub fn knowledge(&self) -> &AdaptiveBktSystem {
        &self.knowledge
    }

    pub fn profile(&self) -> &LearnerProfile {
        &self.profile
    }

    pub fn behavior(&self) -> &BehaviorLog {
        &self.behavior
    }

    pub fn predictor(&self) -> &StatePredictor {
        &self.predictor
    }

    pub fn training_samples(&self) -> usize {
        self.training.len()
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    /// Bumped by every change that a snapshot would capture.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn touch(&mut self) {
        self.last_activity = Utc::now();
        self.revision += 1;
    }

    /// Updates mastery and refits inline when due.
    pub fn update_knowledge(&mut self, knowledge_point: &str, observation: Observation) -> f64 {
        self.touch();
        self.knowledge.update_knowledge(knowledge_point, observation.sanitized())
    }

    pub fn record_observation(&mut self, knowledge_point: &str, observation: Observation) -> KnowledgeUpdate {
        self.touch();
        self.knowledge.record_observation(knowledge_point, observation.sanitized())
    }

    /// Full attempt pipeline: mastery update, submission event for the heuristics
    /// and a weak-labelled training sample from the latest feature vector.
    /// Refits and retraining are only reported, never run here.
    pub fn record_attempt(
        &mut self,
        knowledge_point: &str,
        session_id: &str,
        event: &PerformanceEvent,
        now: f64,
    ) -> AttemptOutcome {
        let observation = event.to_observation(now);
        let update = self.record_observation(knowledge_point, observation);

        self.behavior.record(BehaviorEvent::submission(
            observation.timestamp,
            session_id,
            knowledge_point,
            observation.correct,
        ));

        let features = self.last_features.clone().unwrap_or_default();
        self.training.push(TrainingSample::from_outcome(
            features,
            observation.correct,
            observation.difficulty,
            observation.timestamp,
        ));
        self.scheduler.trim_buffer(&mut self.training);
        self.samples_since_training += 1;

        tracing::debug!(
            learner_id = %self.learner_id,
            knowledge_point,
            correct = observation.correct,
            mastery = update.mastery,
            "attempt recorded"
        );

        AttemptOutcome {
            mastery: update.mastery,
            refit_due: update.refit_due,
            training_due: self.training_due(),
        }
    }

    pub fn refit_job(&self, knowledge_point: &str) -> Option<RefitJob> {
        self.knowledge.refit_job(knowledge_point)
    }

    pub fn apply_fitted(&mut self, knowledge_point: &str, outcome: &FitOutcome) -> bool {
        let applied = self.knowledge.apply_fitted(knowledge_point, outcome);
        if applied {
            self.revision += 1;
        }
        applied
    }

    pub fn predict_performance(&self, knowledge_point: &str, difficulty: f64) -> (f64, f64) {
        self.knowledge.predict_performance(knowledge_point, difficulty)
    }

    pub fn get_overall_mastery<S: AsRef<str>>(&self, knowledge_points: &[S]) -> MasterySummary {
        self.knowledge.get_overall_mastery(knowledge_points)
    }

    pub fn record_behavior(&mut self, event: BehaviorEvent) {
        self.touch();
        self.behavior.record(event);
    }

    pub fn record_interaction(&mut self, preference: LearningPreference) {
        self.touch();
        self.profile.record_interaction(preference);
    }

    /// Point-in-time signals that do not come from the session aggregates.
    fn behavior_signals(&self, now: f64) -> HashMap<String, f64> {
        let observations: Vec<&Observation> = self
            .knowledge
            .knowledge_points()
            .filter_map(|kp| self.knowledge.tracker(kp))
            .flat_map(|t| t.observations())
            .collect();

        let mut signals = HashMap::new();
        signals.insert("timestamp".to_string(), now);
        if let Some(last) = self.behavior.last_timestamp() {
            signals.insert("idle_time".to_string(), (now - last).max(0.0));
        }
        if !observations.is_empty() {
            let n = observations.len() as f64;
            let correct = observations.iter().filter(|o| o.correct).count() as f64;
            let hints = observations.iter().filter(|o| o.hint_used).count() as f64;
            let response: f64 = observations.iter().map(|o| o.response_time).sum();
            signals.insert("historical_success_rate".to_string(), correct / n);
            signals.insert("hint_usage_rate".to_string(), hints / n);
            signals.insert("avg_response_time".to_string(), response / n);
            signals.insert(
                "recent_attempts".to_string(),
                observations
                    .iter()
                    .filter(|o| now - o.timestamp <= RECENT_WINDOW_SECS)
                    .count() as f64,
            );
            if let Some(latest) = observations.iter().max_by(|a, b| a.timestamp.total_cmp(&b.timestamp)) {
                signals.insert("task_difficulty".to_string(), latest.difficulty);
            }
        }
        signals
    }

    pub fn extract_features(&self, session_id: &str, now: f64) -> FeatureVector {
        let session = self.behavior.session_summary(session_id);
        FeatureEngineer::extract(&self.behavior_signals(now), &session)
    }

    pub fn predict_states(&self, features: &FeatureVector) -> StatePredictions {
        self.predictor.predict_states(features)
    }

    /// Extracts features for the session, predicts, and fuses confident model
    /// output into the profile. Focus follows the idle signal.
    pub fn update_from_behavior(&mut self, session_id: &str, now: f64) -> StatePredictions {
        let features = self.extract_features(session_id, now);
        let predictions = self.predictor.predict_states(&features);
        self.fusion.integrate(&mut self.profile.cognitive, &predictions);
        self.profile.update_focus(features.idle_time, &self.config.heuristics);
        self.last_features = Some(features);
        self.touch();
        predictions
    }

    pub fn assess(&mut self, task_id: &str, now: f64) -> HeuristicAssessment {
        self.touch();
        let assessment = evaluate_submissions(&self.behavior, task_id, now, &self.config.heuristics);
        if assessment.error_burst {
            tracing::info!(learner_id = %self.learner_id, task_id, "error burst detected");
        }
        self.last_assessment = Some(assessment.clone());
        assessment
    }

    pub fn get_model_summary(&self) -> LearnerStateSummary {
        self.summary_at(crate::analytics::types::now_secs())
    }

    pub fn summary_at(&self, now: f64) -> LearnerStateSummary {
        let mastery = self.knowledge.get_overall_mastery::<&str>(&[]);
        let engagement = self
            .behavior
            .learning_signals(now, self.config.heuristics.evaluation_window_secs)
            .engagement;
        self.fusion
            .summarize(mastery, &self.profile, self.last_assessment.as_ref(), engagement)
    }

    pub fn plan_quiz<R: Rng + ?Sized>(&self, target_points: &[String], count: usize, rng: &mut R) -> QuizPlan {
        plan_quiz(&self.get_model_summary(), target_points, count, rng)
    }

    /// False while a retraining job is outstanding.
    pub fn training_due(&self) -> bool {
        !self.training_in_flight && self.scheduler.should_train(self.samples_since_training)
    }

    /// Snapshots the buffer for retraining. Until the job is installed or
    /// aborted, `training_due` stays false.
    pub fn begin_training(&mut self) -> TrainingJob {
        self.training_in_flight = true;
        TrainingJob {
            predictor: self.predictor.clone(),
            samples: self.training.iter().cloned().collect(),
            pending: self.samples_since_training,
        }
    }

    /// Swaps in a retrained predictor. Samples recorded while the job ran stay pending.
    pub fn install_predictor(&mut self, predictor: StatePredictor, consumed: usize) {
        self.predictor = predictor;
        self.samples_since_training = self.samples_since_training.saturating_sub(consumed);
        self.training_in_flight = false;
        self.revision += 1;
    }

    pub fn abort_training(&mut self) {
        self.training_in_flight = false;
    }

    pub fn train_predictors(&mut self) -> Result<StateTrainingReport, PredictorError> {
        let job = self.begin_training();
        let consumed = job.pending();
        let trained_on = job.sample_count();
        match job.run() {
            Ok((predictor, report)) => {
                self.install_predictor(predictor, consumed);
                tracing::info!(learner_id = %self.learner_id, samples = trained_on, "state predictors retrained");
                Ok(report)
            }
            Err(e) => {
                self.abort_training();
                Err(e)
            }
        }
    }

    pub fn should_save(&self) -> bool {
        self.scheduler.should_save()
    }

    pub fn mark_saved(&mut self) {
        self.scheduler.mark_saved();
    }

    pub fn snapshot(&self) -> LearnerSnapshot {
        LearnerSnapshot {
            learner_id: self.learner_id.clone(),
            saved_at: Utc::now(),
            knowledge: self.knowledge.export_learning_data(),
            predictor: self.predictor.clone(),
            training_buffer: self.training.clone(),
            profile: self.profile.clone(),
            behavior: Some(self.behavior.clone()),
            last_features: self.last_features.clone(),
        }
    }

    pub fn from_snapshot(config: AnalyticsConfig, snapshot: LearnerSnapshot) -> Self {
        let mut model = Self::new(snapshot.learner_id, config);
        model.knowledge =
            AdaptiveBktSystem::from_export(model.config.bkt.clone(), model.config.estimator.clone(), snapshot.knowledge);
        model.predictor = snapshot.predictor;
        model.training = snapshot.training_buffer;
        model.scheduler.trim_buffer(&mut model.training);
        model.profile = snapshot.profile;
        if let Some(behavior) = snapshot.behavior {
            model.behavior = behavior;
        }
        model.last_features = snapshot.last_features;
        model
    }
}
