pub mod estimator;
pub mod system;
pub mod tracker;

pub use estimator::{FitOutcome, ParameterEstimator};
pub use system::{
    AdaptiveBktSystem, KnowledgeUpdate, LearningDataExport, MasterySummary, RefitJob, TrackerExport,
};
pub use tracker::{BktParameters, KnowledgeTracker, LearningTrajectory};
