use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::analytics::AnalyticsEngine;

/// Periodic side loops over the engine: snapshot persistence and idle eviction.
pub struct WorkerManager {
    scheduler: Mutex<JobScheduler>,
    shutdown_tx: broadcast::Sender<()>,
    engine: Arc<AnalyticsEngine>,
    save_poll: Duration,
    learner_idle_secs: u64,
}

impl WorkerManager {
    pub async fn new(
        engine: Arc<AnalyticsEngine>,
        save_poll: Duration,
        learner_idle_secs: u64,
    ) -> Result<Self, WorkerError> {
        let scheduler = JobScheduler::new().await.map_err(WorkerError::Scheduler)?;
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            shutdown_tx,
            engine,
            save_poll,
            learner_idle_secs,
        })
    }

    pub async fn start(&self) -> Result<(), WorkerError> {
        let enable_eviction = std::env::var("ENABLE_EVICTION_WORKER")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let scheduler = self.scheduler.lock().await;

        {
            let engine = Arc::clone(&self.engine);
            let shutdown_rx = self.shutdown_tx.subscribe();
            let job = Job::new_repeated_async(self.save_poll, move |_uuid, _lock| {
                let engine = Arc::clone(&engine);
                let mut rx = shutdown_rx.resubscribe();
                Box::pin(async move {
                    tokio::select! {
                        _ = rx.recv() => {},
                        saved = engine.save_due() => {
                            if saved > 0 {
                                info!(saved, "learner snapshots persisted");
                            }
                        }
                    }
                })
            })
            .map_err(WorkerError::Scheduler)?;
            scheduler.add(job).await.map_err(WorkerError::Scheduler)?;
            info!(interval_secs = self.save_poll.as_secs(), "Persistence worker scheduled");
        }

        if enable_eviction {
            let schedule = std::env::var("EVICTION_SCHEDULE").unwrap_or_else(|_| "0 */10 * * * *".to_string());
            let engine = Arc::clone(&self.engine);
            let shutdown_rx = self.shutdown_tx.subscribe();
            let max_idle = self.learner_idle_secs;
            let job = Job::new_async(schedule.as_str(), move |_uuid, _lock| {
                let engine = Arc::clone(&engine);
                let mut rx = shutdown_rx.resubscribe();
                Box::pin(async move {
                    tokio::select! {
                        _ = rx.recv() => {},
                        evicted = engine.evict_idle(max_idle) => {
                            if evicted > 0 {
                                let remaining = engine.learner_count().await;
                                info!(evicted, remaining, "Idle learner eviction");
                            }
                        }
                    }
                })
            })
            .map_err(WorkerError::Scheduler)?;
            scheduler.add(job).await.map_err(WorkerError::Scheduler)?;
            info!(schedule = %schedule, "Eviction worker scheduled");
        }

        scheduler.start().await.map_err(WorkerError::Scheduler)?;
        info!("All workers started");

        Ok(())
    }

    /// Stops the jobs, lets background fits finish and flushes every learner.
    pub async fn stop(&self) {
        info!("Stopping workers...");
        let _ = self.shutdown_tx.send(());

        let mut scheduler = self.scheduler.lock().await;
        if let Err(e) = scheduler.shutdown().await {
            warn!(error = %e, "Error shutting down scheduler");
        }

        self.engine.drain_background().await;
        let saved = self.engine.save_all().await;
        if saved == 0 && self.engine.learner_count().await > 0 {
            error!("No learner snapshots could be saved on shutdown");
        }
        info!(saved, "Workers stopped");
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),
}
