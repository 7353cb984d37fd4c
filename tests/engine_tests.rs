//! Async engine: per-learner isolation, background refits, persistence and eviction.

mod common;

use std::sync::{mpsc, Arc};
use std::time::Duration;

use parking_lot::Mutex;

use common::{attempt, BASE_TS};
use tutor_analytics::analytics::{
    AnalyticsConfig, AnalyticsEngine, AnalyticsError, FileStore, LearnerSnapshot, MemoryStore, Observation,
    SnapshotStore, StoreError,
};

/// Memory store whose first save blocks until the test releases it.
struct GatedStore {
    inner: MemoryStore,
    gate: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
}

impl SnapshotStore for GatedStore {
    fn save(&self, key: &str, blob: &[u8]) -> Result<(), StoreError> {
        let gate = self.gate.lock().take();
        if let Some((entered, release)) = gate {
            let _ = entered.send(());
            let _ = release.recv();
        }
        self.inner.save(key, blob)
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.load(key)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.inner.remove(key)
    }

    fn quarantine(&self, key: &str) -> Result<(), StoreError> {
        self.inner.quarantine(key)
    }
}

/// Store that cannot be read; records whether anything tried to write.
#[derive(Default)]
struct UnreadableStore {
    writes: Mutex<usize>,
}

impl SnapshotStore for UnreadableStore {
    fn save(&self, _key: &str, _blob: &[u8]) -> Result<(), StoreError> {
        *self.writes.lock() += 1;
        Ok(())
    }

    fn load(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into())
    }

    fn remove(&self, _key: &str) -> Result<(), StoreError> {
        Ok(())
    }

    fn quarantine(&self, _key: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

fn engine_with(store: Arc<dyn SnapshotStore>) -> AnalyticsEngine {
    AnalyticsEngine::new(AnalyticsConfig::default(), Some(store))
}

#[tokio::test]
async fn learners_are_isolated() {
    let engine = AnalyticsEngine::new(AnalyticsConfig::default(), None);
    engine.update_knowledge("alice", "loops", Observation::new(BASE_TS, true)).await;
    engine.update_knowledge("bob", "loops", Observation::new(BASE_TS, false)).await;

    let (_, alice) = engine.predict_performance("alice", "loops", 0.5).await;
    let (_, bob) = engine.predict_performance("bob", "loops", 0.5).await;
    assert!(alice > bob);
    assert_eq!(engine.learner_ids().await, vec!["alice".to_string(), "bob".to_string()]);
}

#[tokio::test]
async fn background_refit_swaps_parameters_after_threshold() {
    let engine = AnalyticsEngine::new(AnalyticsConfig::default(), None);
    for t in 0..10 {
        engine
            .update_knowledge("alice", "loops", Observation::new(BASE_TS + t as f64, t % 2 == 0))
            .await;
    }
    engine.drain_background().await;

    let summary = engine.get_overall_mastery("alice", &["loops".to_string()]).await;
    assert_eq!(summary.total_points, 1);
    let m = summary.per_point["loops"];
    assert!((0.0..=1.0).contains(&m));
}

#[tokio::test]
async fn attempts_trigger_background_training() {
    let mut config = AnalyticsConfig::default();
    config.scheduler.train_sample_threshold = 12;
    config.forest.n_estimators = 10;
    let engine = AnalyticsEngine::new(config, None);

    for i in 0..12 {
        let ts = BASE_TS + i as f64 * 90.0;
        engine
            .record_attempt("alice", "recursion", "s1", &attempt(i % 2 == 0, 0.9, ts))
            .await;
    }
    engine.drain_background().await;

    let summary = engine.get_model_summary("alice").await;
    assert_eq!(summary.mastery.total_points, 1);
}

#[tokio::test]
async fn snapshot_survives_eviction_and_reload() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_with(store.clone());
    for t in 0..4 {
        engine
            .update_knowledge("alice", "css_grid", Observation::new(BASE_TS + t as f64, true))
            .await;
    }
    let (_, before) = engine.predict_performance("alice", "css_grid", 0.3).await;

    assert_eq!(engine.evict_idle(0).await, 1);
    assert_eq!(engine.learner_count().await, 0);
    assert_eq!(store.len(), 1);

    let (_, after) = engine.predict_performance("alice", "css_grid", 0.3).await;
    assert_eq!(before, after);
}

#[tokio::test]
async fn file_store_snapshots_are_readable() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::new(dir.path()).unwrap());
    let engine = engine_with(store.clone());
    engine.update_knowledge("learner-1", "flexbox", Observation::new(BASE_TS, true)).await;
    engine.save_learner("learner-1").await.unwrap();

    let bytes = store.load("learner-1").unwrap().expect("snapshot written");
    let snapshot = LearnerSnapshot::from_bytes(&bytes).unwrap();
    assert_eq!(snapshot.learner_id, "learner-1");
    assert!(snapshot.knowledge.trackers.contains_key("flexbox"));
}

#[tokio::test]
async fn saving_unknown_learner_is_an_error() {
    let engine = engine_with(Arc::new(MemoryStore::new()));
    assert!(engine.save_learner("ghost").await.is_err());
}

#[tokio::test]
async fn save_poll_respects_interval() {
    let store = Arc::new(MemoryStore::new());
    let mut config = AnalyticsConfig::default();
    config.scheduler.save_interval_secs = 3600;
    let engine = AnalyticsEngine::new(config, Some(store.clone()));
    engine.update_knowledge("alice", "loops", Observation::new(BASE_TS, true)).await;

    assert_eq!(engine.save_due().await, 0);
    assert!(store.is_empty());
    assert_eq!(engine.save_all().await, 1);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn concurrent_updates_on_one_learner_are_serialized() {
    let engine = Arc::new(AnalyticsEngine::new(AnalyticsConfig::default(), None));
    let mut handles = Vec::new();
    for t in 0..8 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine
                .update_knowledge("alice", "loops", Observation::new(BASE_TS + t as f64, true))
                .await
        }));
    }
    for handle in handles {
        let mastery = handle.await.unwrap();
        assert!((0.0..=1.0).contains(&mastery));
    }
    engine.drain_background().await;
    let summary = engine.get_overall_mastery("alice", &[]).await;
    assert_eq!(summary.total_points, 1);
}

#[tokio::test]
async fn finished_background_jobs_are_reaped() {
    let engine = AnalyticsEngine::new(AnalyticsConfig::default(), None);
    for learner in 0..20 {
        let learner_id = format!("learner-{learner}");
        for t in 0..10 {
            engine
                .update_knowledge(&learner_id, "loops", Observation::new(BASE_TS + t as f64, t % 3 != 0))
                .await;
        }
    }

    let mut pending = engine.pending_background();
    for _ in 0..500 {
        if pending == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        pending = engine.pending_background();
    }
    assert_eq!(pending, 0);
}

#[tokio::test]
async fn learner_changed_during_eviction_stays_loaded() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let store = Arc::new(GatedStore {
        inner: MemoryStore::new(),
        gate: Mutex::new(Some((entered_tx, release_rx))),
    });
    let engine = Arc::new(engine_with(store.clone()));
    engine.update_knowledge("alice", "loops", Observation::new(BASE_TS, true)).await;

    let evicting = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.evict_idle(0).await }
    });
    tokio::task::spawn_blocking(move || entered_rx.recv())
        .await
        .unwrap()
        .unwrap();

    // lands after the eviction snapshot was taken
    engine
        .update_knowledge("alice", "loops", Observation::new(BASE_TS + 1.0, false))
        .await;
    release_tx.send(()).unwrap();

    assert_eq!(evicting.await.unwrap(), 0);
    assert_eq!(engine.learner_count().await, 1);

    assert_eq!(engine.save_all().await, 1);
    let bytes = store.inner.load("alice").unwrap().unwrap();
    let snapshot = LearnerSnapshot::from_bytes(&bytes).unwrap();
    assert_eq!(snapshot.knowledge.trackers["loops"].observations.len(), 2);
}

#[tokio::test]
async fn unreadable_snapshot_is_moved_aside_not_overwritten() {
    let store = Arc::new(MemoryStore::new());
    store.save("alice", b"{\"learner_id\": null}").unwrap();
    let engine = engine_with(store.clone());

    engine.update_knowledge("alice", "loops", Observation::new(BASE_TS, true)).await;
    assert_eq!(store.quarantined("alice").as_deref(), Some(&b"{\"learner_id\": null}"[..]));
    assert!(store.load("alice").unwrap().is_none());

    engine.save_learner("alice").await.unwrap();
    let bytes = store.load("alice").unwrap().unwrap();
    assert!(LearnerSnapshot::from_bytes(&bytes).is_ok());
    assert_eq!(store.quarantined("alice").as_deref(), Some(&b"{\"learner_id\": null}"[..]));
}

#[tokio::test]
async fn unreachable_snapshot_blocks_saving() {
    let store = Arc::new(UnreadableStore::default());
    let engine = engine_with(store.clone());
    engine.update_knowledge("alice", "loops", Observation::new(BASE_TS, true)).await;

    assert!(matches!(
        engine.save_learner("alice").await,
        Err(AnalyticsError::SaveBlocked(id)) if id == "alice"
    ));
    assert_eq!(engine.save_all().await, 0);
    assert_eq!(engine.evict_idle(0).await, 0);
    assert_eq!(engine.learner_count().await, 1);
    assert_eq!(*store.writes.lock(), 0);
}

#[tokio::test]
async fn email_style_ids_are_persisted_and_evicted() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::new(dir.path()).unwrap());
    let engine = engine_with(store.clone());
    let learner_id = "ana.lima+css@example.com";
    engine.update_knowledge(learner_id, "css_grid", Observation::new(BASE_TS, true)).await;
    let (_, before) = engine.predict_performance(learner_id, "css_grid", 0.5).await;

    assert_eq!(engine.evict_idle(0).await, 1);
    assert!(store.load(learner_id).unwrap().is_some());

    let (_, after) = engine.predict_performance(learner_id, "css_grid", 0.5).await;
    assert_eq!(before, after);
}
