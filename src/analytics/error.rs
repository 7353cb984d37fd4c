use crate::analytics::modeling::{FeatureError, ModelError, PredictorError};
use crate::analytics::persistence::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    #[error(transparent)]
    Feature(#[from] FeatureError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Predictor(#[from] PredictorError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("unknown learner: {0}")]
    UnknownLearner(String),
    #[error("saving blocked for {0}: stored snapshot could not be read or moved aside")]
    SaveBlocked(String),
}

pub type AnalyticsResult<T> = Result<T, AnalyticsError>;
