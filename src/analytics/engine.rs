use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tokio::task::JoinSet;

use crate::analytics::config::AnalyticsConfig;
use crate::analytics::decision::{LearnerStateSummary, QuizPlan};
use crate::analytics::error::{AnalyticsError, AnalyticsResult};
use crate::analytics::knowledge::MasterySummary;
use crate::analytics::learner::{AttemptOutcome, LearnerModel};
use crate::analytics::modeling::{BehaviorEvent, FeatureVector, HeuristicAssessment, StatePredictions};
use crate::analytics::persistence::{LearnerSnapshot, SnapshotStore, StoreError};
use crate::analytics::types::{now_secs, LearningPreference, Observation, PerformanceEvent};

type SharedLearner = Arc<RwLock<LearnerModel>>;

/// Process-wide context owning every learner's model. Writes to one learner are
/// serialized by its lock; different learners never contend.
///
/// Lock order: `persist_lock`, then `learners`, then a learner's own lock.
pub struct AnalyticsEngine {
    config: Arc<AnalyticsConfig>,
    learners: RwLock<HashMap<String, SharedLearner>>,
    store: Option<Arc<dyn SnapshotStore>>,
    background: Mutex<JoinSet<()>>,
    /// Learners whose stored snapshot could be neither read nor moved aside.
    save_blocked: Mutex<HashSet<String>>,
    /// One writer to the store at a time, so an older snapshot never lands
    /// after a newer one.
    persist_lock: AsyncMutex<()>,
}

impl AnalyticsEngine {
    pub fn new(config: AnalyticsConfig, store: Option<Arc<dyn SnapshotStore>>) -> Self {
        Self {
            config: Arc::new(config),
            learners: RwLock::new(HashMap::new()),
            store,
            background: Mutex::new(JoinSet::new()),
            save_blocked: Mutex::new(HashSet::new()),
            persist_lock: AsyncMutex::new(()),
        }
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    pub async fn learner_count(&self) -> usize {
        self.learners.read().await.len()
    }

    pub async fn learner_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.learners.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Loaded learner, restored from the store on first touch or created fresh.
    async fn learner(&self, learner_id: &str) -> SharedLearner {
        {
            let learners = self.learners.read().await;
            if let Some(learner) = learners.get(learner_id) {
                return Arc::clone(learner);
            }
        }

        let restored = match self.load_snapshot(learner_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.set_aside_unreadable(learner_id, &e).await;
                None
            }
        };

        let mut learners = self.learners.write().await;
        let entry = learners.entry(learner_id.to_string()).or_insert_with(|| {
            let model = match restored {
                Some(snapshot) => {
                    tracing::info!(learner_id, "learner restored from snapshot");
                    LearnerModel::from_snapshot((*self.config).clone(), snapshot)
                }
                None => LearnerModel::new(learner_id, (*self.config).clone()),
            };
            Arc::new(RwLock::new(model))
        });
        Arc::clone(entry)
    }

    async fn existing(&self, learner_id: &str) -> AnalyticsResult<SharedLearner> {
        self.learners
            .read()
            .await
            .get(learner_id)
            .cloned()
            .ok_or_else(|| AnalyticsError::UnknownLearner(learner_id.to_string()))
    }

    /// Keeps a snapshot that failed to load from being overwritten by the fresh
    /// learner: undecodable blobs are moved aside, anything else blocks saving.
    async fn set_aside_unreadable(&self, learner_id: &str, error: &AnalyticsError) {
        let moved = match (error, self.store.clone()) {
            (AnalyticsError::Store(StoreError::Serialization(_)), Some(store)) => {
                let key = learner_id.to_string();
                match tokio::task::spawn_blocking(move || store.quarantine(&key)).await {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        tracing::error!(learner_id, error = %e, "failed to move unreadable snapshot aside");
                        false
                    }
                    Err(e) => {
                        tracing::error!(learner_id, error = %e, "snapshot quarantine panicked");
                        false
                    }
                }
            }
            _ => false,
        };

        if moved {
            tracing::warn!(learner_id, error = %error, "learner snapshot unreadable, starting fresh");
        } else {
            self.save_blocked.lock().insert(learner_id.to_string());
            tracing::error!(learner_id, error = %error, "learner snapshot unavailable, serving from memory with saving blocked");
        }
    }

    async fn load_snapshot(&self, learner_id: &str) -> AnalyticsResult<Option<LearnerSnapshot>> {
        let Some(store) = self.store.clone() else {
            return Ok(None);
        };
        let key = learner_id.to_string();
        let blob = tokio::task::spawn_blocking(move || store.load(&key)).await??;
        match blob {
            Some(bytes) => Ok(Some(LearnerSnapshot::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn update_knowledge(
        &self,
        learner_id: &str,
        knowledge_point: &str,
        observation: Observation,
    ) -> f64 {
        let learner = self.learner(learner_id).await;
        let update = learner.write().await.record_observation(knowledge_point, observation);
        if update.refit_due {
            self.spawn_refit(learner, knowledge_point).await;
        }
        update.mastery
    }

    pub async fn record_attempt(
        &self,
        learner_id: &str,
        knowledge_point: &str,
        session_id: &str,
        event: &PerformanceEvent,
    ) -> AttemptOutcome {
        let learner = self.learner(learner_id).await;
        let outcome = learner
            .write()
            .await
            .record_attempt(knowledge_point, session_id, event, now_secs());
        if outcome.refit_due {
            self.spawn_refit(Arc::clone(&learner), knowledge_point).await;
        }
        if outcome.training_due {
            self.spawn_training(learner).await;
        }
        outcome
    }

    pub async fn record_behavior(&self, learner_id: &str, event: BehaviorEvent) {
        let learner = self.learner(learner_id).await;
        learner.write().await.record_behavior(event);
    }

    pub async fn record_interaction(&self, learner_id: &str, preference: LearningPreference) {
        let learner = self.learner(learner_id).await;
        learner.write().await.record_interaction(preference);
    }

    pub async fn predict_performance(&self, learner_id: &str, knowledge_point: &str, difficulty: f64) -> (f64, f64) {
        let learner = self.learner(learner_id).await;
        let guard = learner.read().await;
        guard.predict_performance(knowledge_point, difficulty)
    }

    pub async fn get_overall_mastery(&self, learner_id: &str, knowledge_points: &[String]) -> MasterySummary {
        let learner = self.learner(learner_id).await;
        let guard = learner.read().await;
        guard.get_overall_mastery(knowledge_points)
    }

    pub async fn predict_states(&self, learner_id: &str, features: &FeatureVector) -> StatePredictions {
        let learner = self.learner(learner_id).await;
        let guard = learner.read().await;
        guard.predict_states(features)
    }

    pub async fn update_from_behavior(&self, learner_id: &str, session_id: &str) -> StatePredictions {
        let learner = self.learner(learner_id).await;
        let predictions = learner.write().await.update_from_behavior(session_id, now_secs());
        predictions
    }

    pub async fn assess(&self, learner_id: &str, task_id: &str) -> HeuristicAssessment {
        let learner = self.learner(learner_id).await;
        let assessment = learner.write().await.assess(task_id, now_secs());
        assessment
    }

    pub async fn get_model_summary(&self, learner_id: &str) -> LearnerStateSummary {
        let learner = self.learner(learner_id).await;
        let guard = learner.read().await;
        guard.get_model_summary()
    }

    /// Seeded when `seed` is given so plans can be reproduced.
    pub async fn plan_quiz(&self, learner_id: &str, targets: &[String], count: usize, seed: Option<u64>) -> QuizPlan {
        let seed = seed.unwrap_or_else(|| rand::rng().random());
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let learner = self.learner(learner_id).await;
        let guard = learner.read().await;
        guard.plan_quiz(targets, count, &mut rng)
    }

    /// Runs the fit on the blocking pool and swaps the parameters in afterwards.
    async fn spawn_refit(&self, learner: SharedLearner, knowledge_point: &str) {
        let Some(job) = learner.read().await.refit_job(knowledge_point) else {
            return;
        };
        let mut jobs = self.background.lock();
        reap_finished(&mut jobs);
        jobs.spawn(async move {
            match tokio::task::spawn_blocking(move || job.run()).await {
                Ok((kp, outcome)) => {
                    let applied = learner.write().await.apply_fitted(&kp, &outcome);
                    tracing::debug!(knowledge_point = %kp, applied, "background refit finished");
                }
                Err(e) => tracing::error!(error = %e, "background refit panicked"),
            }
        });
    }

    async fn spawn_training(&self, learner: SharedLearner) {
        let job = learner.write().await.begin_training();
        let trained_on = job.sample_count();
        let consumed = job.pending();
        let mut jobs = self.background.lock();
        reap_finished(&mut jobs);
        jobs.spawn(async move {
            match tokio::task::spawn_blocking(move || job.run()).await {
                Ok(Ok((predictor, report))) => {
                    let mut guard = learner.write().await;
                    guard.install_predictor(predictor, consumed);
                    tracing::info!(
                        learner_id = %guard.learner_id(),
                        samples = trained_on,
                        load_trained = report.cognitive_load.is_trained(),
                        confusion_trained = report.confusion.is_trained(),
                        "state predictors retrained"
                    );
                }
                Ok(Err(e)) => {
                    learner.write().await.abort_training();
                    tracing::warn!(error = %e, "predictor training failed, keeping previous models");
                }
                Err(e) => {
                    learner.write().await.abort_training();
                    tracing::error!(error = %e, "predictor training panicked");
                }
            }
        });
    }

    /// Outstanding refit and training jobs; finished ones are reaped first.
    pub fn pending_background(&self) -> usize {
        let mut jobs = self.background.lock();
        reap_finished(&mut jobs);
        jobs.len()
    }

    /// Waits for every refit and training job, including ones spawned while draining.
    pub async fn drain_background(&self) {
        loop {
            let mut jobs = std::mem::take(&mut *self.background.lock());
            if jobs.is_empty() {
                return;
            }
            while let Some(result) = jobs.join_next().await {
                if let Err(e) = result {
                    tracing::error!(error = %e, "background job aborted");
                }
            }
        }
    }

    pub async fn save_learner(&self, learner_id: &str) -> AnalyticsResult<()> {
        let learner = self.existing(learner_id).await?;
        self.persist(learner_id, &learner).await
    }

    async fn persist(&self, learner_id: &str, learner: &SharedLearner) -> AnalyticsResult<()> {
        if self.store.is_none() {
            return Ok(());
        }
        let _persisting = self.persist_lock.lock().await;
        let bytes = learner.read().await.snapshot().to_bytes()?;
        self.write_snapshot(learner_id, bytes).await?;
        learner.write().await.mark_saved();
        Ok(())
    }

    async fn write_snapshot(&self, learner_id: &str, bytes: Vec<u8>) -> AnalyticsResult<()> {
        let Some(store) = self.store.clone() else {
            return Ok(());
        };
        if self.save_blocked.lock().contains(learner_id) {
            return Err(AnalyticsError::SaveBlocked(learner_id.to_string()));
        }
        let key = learner_id.to_string();
        tokio::task::spawn_blocking(move || store.save(&key, &bytes)).await??;
        Ok(())
    }

    /// Persistence poll: saves every learner whose save interval elapsed.
    /// Failures are logged and the in-memory state keeps serving.
    pub async fn save_due(&self) -> usize {
        reap_finished(&mut self.background.lock());
        let learners: Vec<(String, SharedLearner)> = self
            .learners
            .read()
            .await
            .iter()
            .map(|(id, l)| (id.clone(), Arc::clone(l)))
            .collect();

        let mut saved = 0;
        for (learner_id, learner) in learners {
            if !learner.read().await.should_save() {
                continue;
            }
            match self.persist(&learner_id, &learner).await {
                Ok(()) => saved += 1,
                Err(e) => tracing::warn!(learner_id = %learner_id, error = %e, "learner snapshot save failed"),
            }
        }
        saved
    }

    pub async fn save_all(&self) -> usize {
        let ids = self.learner_ids().await;
        let mut saved = 0;
        for learner_id in ids {
            match self.save_learner(&learner_id).await {
                Ok(()) => saved += 1,
                Err(e) => tracing::warn!(learner_id = %learner_id, error = %e, "learner snapshot save failed"),
            }
        }
        saved
    }

    /// Saves and drops learners idle for longer than `max_idle_secs`. Without a
    /// store nothing is evicted.
    ///
    /// A learner is only dropped when nobody else holds it and its revision is
    /// unchanged between the snapshot and the removal; otherwise it stays
    /// loaded and the next poll saves the newer state. A learner whose save
    /// fails stays loaded too.
    pub async fn evict_idle(&self, max_idle_secs: u64) -> usize {
        if self.store.is_none() {
            return 0;
        }
        let cutoff = Utc::now() - Duration::seconds(max_idle_secs as i64);
        let _persisting = self.persist_lock.lock().await;

        let candidates: Vec<(String, u64, Vec<u8>)> = {
            // exclusive so no request can clone a learner while counts are checked
            let learners = self.learners.write().await;
            learners
                .iter()
                .filter(|(_, learner)| Arc::strong_count(learner) == 1)
                .filter_map(|(learner_id, learner)| {
                    let guard = learner.try_read().ok()?;
                    if guard.last_activity() > cutoff {
                        return None;
                    }
                    match guard.snapshot().to_bytes() {
                        Ok(bytes) => Some((learner_id.clone(), guard.revision(), bytes)),
                        Err(e) => {
                            tracing::warn!(learner_id = %learner_id, error = %e, "eviction skipped, snapshot failed");
                            None
                        }
                    }
                })
                .collect()
        };

        let mut saved = Vec::with_capacity(candidates.len());
        for (learner_id, revision, bytes) in candidates {
            match self.write_snapshot(&learner_id, bytes).await {
                Ok(()) => saved.push((learner_id, revision)),
                Err(e) => tracing::warn!(learner_id = %learner_id, error = %e, "eviction skipped, save failed"),
            }
        }

        let mut evicted = 0;
        let mut learners = self.learners.write().await;
        for (learner_id, revision) in saved {
            let unchanged = learners.get(&learner_id).is_some_and(|learner| {
                Arc::strong_count(learner) == 1
                    && learner
                        .try_read()
                        .map(|guard| guard.revision() == revision)
                        .unwrap_or(false)
            });
            if unchanged {
                learners.remove(&learner_id);
                evicted += 1;
            } else {
                tracing::debug!(learner_id = %learner_id, "learner changed during eviction, kept loaded");
            }
        }
        drop(learners);

        if evicted > 0 {
            tracing::info!(evicted, "idle learners evicted");
        }
        evicted
    }
}

fn reap_finished(jobs: &mut JoinSet<()>) {
    while let Some(result) = jobs.try_join_next() {
        if let Err(e) = result {
            tracing::error!(error = %e, "background job aborted");
        }
    }
}
