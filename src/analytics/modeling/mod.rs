pub mod behavior;
pub mod features;
pub mod forest;
pub mod heuristic;
pub mod predictor;
pub mod profile;

pub use behavior::{
    categorize_pause, BehaviorEvent, BehaviorLog, EventKind, LearningSignals, PauseCategory,
};
pub use features::{FeatureEngineer, FeatureError, FeatureVector, Labels};
pub use forest::{ModelError, RandomForestClassifier, RandomForestRegressor};
pub use heuristic::{evaluate_submissions, HeuristicAssessment};
pub use predictor::{
    CognitiveLoadPredictor, ConfusionPredictor, ModelEstimate, PredictionResult, PredictorError,
    RuleBasedEstimate, StateEstimate, StatePredictions, StatePredictor, StateTrainingReport,
    TrainOutcome,
};
pub use profile::{CognitiveState, LearnerProfile};
