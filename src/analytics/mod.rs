pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod evaluation;
pub mod knowledge;
pub mod learner;
pub mod modeling;
pub mod persistence;
pub mod scheduler;
pub mod types;

pub use config::AnalyticsConfig;
pub use engine::AnalyticsEngine;
pub use error::{AnalyticsError, AnalyticsResult};
pub use learner::{AttemptOutcome, LearnerModel};
pub use persistence::{FileStore, LearnerSnapshot, MemoryStore, SnapshotStore, StoreError};
pub use scheduler::{RingBuffer, TrainingSample, TrainingScheduler};
pub use types::*;
