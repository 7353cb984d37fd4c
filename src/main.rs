use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use tutor_analytics::analytics::{AnalyticsConfig, AnalyticsEngine, FileStore, PerformanceEvent, SnapshotStore};
use tutor_analytics::config::Config;
use tutor_analytics::logging::init_tracing;
use tutor_analytics::workers::WorkerManager;

#[derive(Debug, Deserialize)]
struct ReplayRecord {
    learner_id: String,
    knowledge_point: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(flatten)]
    event: PerformanceEvent,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = init_tracing(&config.log_level);

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [cmd, path] if cmd == "replay" => {
            if let Err(e) = replay(Path::new(path)).await {
                tracing::error!(error = %e, "replay failed");
                std::process::exit(1);
            }
        }
        [] => serve(config).await,
        _ => {
            eprintln!("usage: tutor-analytics [replay <events.jsonl>]");
            std::process::exit(2);
        }
    }
}

/// Feeds recorded attempts through a fresh in-memory engine and prints each
/// learner's summary as JSON.
async fn replay(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let content = tokio::fs::read_to_string(path).await?;
    let engine = AnalyticsEngine::new(AnalyticsConfig::from_env(), None);
    // Lines without a session id share one session per replay run.
    let run_session = uuid::Uuid::new_v4().to_string();

    let mut records = 0usize;
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: ReplayRecord = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(line = line_no + 1, error = %e, "skipping malformed replay line");
                continue;
            }
        };
        let session_id = record.session_id.as_deref().unwrap_or(&run_session);
        engine
            .record_attempt(&record.learner_id, &record.knowledge_point, session_id, &record.event)
            .await;
        records += 1;
    }
    engine.drain_background().await;

    let mut summaries = BTreeMap::new();
    for learner_id in engine.learner_ids().await {
        summaries.insert(learner_id.clone(), engine.get_model_summary(&learner_id).await);
    }
    tracing::info!(records, learners = summaries.len(), "replay complete");
    println!("{}", serde_json::to_string_pretty(&summaries)?);
    Ok(())
}

async fn serve(config: Config) {
    let store: Option<Arc<dyn SnapshotStore>> = match FileStore::new(&config.data_dir) {
        Ok(store) => Some(Arc::new(store)),
        Err(err) => {
            tracing::warn!(error = %err, dir = %config.data_dir.display(), "snapshot store unavailable, running in memory");
            None
        }
    };
    let engine = Arc::new(AnalyticsEngine::new(AnalyticsConfig::from_env(), store));

    let worker_manager = match WorkerManager::new(
        Arc::clone(&engine),
        Duration::from_secs(config.save_poll_secs),
        config.learner_idle_secs,
    )
    .await
    {
        Ok(manager) => {
            if let Err(e) = manager.start().await {
                tracing::error!(error = %e, "failed to start workers");
            }
            Some(manager)
        }
        Err(e) => {
            tracing::warn!(error = %e, "worker manager not initialized");
            None
        }
    };

    tracing::info!(data_dir = %config.data_dir.display(), "tutor-analytics running");
    shutdown_signal().await;
    tracing::info!("Shutdown signal received");

    match worker_manager {
        Some(ref manager) => manager.stop().await,
        None => {
            engine.drain_background().await;
            engine.save_all().await;
        }
    }

    tracing::info!("Graceful shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
