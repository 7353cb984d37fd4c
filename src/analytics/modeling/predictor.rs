use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::analytics::config::{ConfusionRuleWeights, FeatureConfig, ForestConfig, LoadRuleWeights, PredictorConfig};
use crate::analytics::modeling::features::{FeatureEngineer, FeatureError, FeatureVector, Labels};
use crate::analytics::modeling::forest::{
    argmax, cross_val_accuracy, ModelError, RandomForestClassifier, RandomForestRegressor,
};
use crate::analytics::scheduler::TrainingSample;
use crate::analytics::types::CognitiveLoad;

const MIN_REGRESSION_CONFIDENCE: f64 = 0.1;
const MAX_REGRESSION_CONFIDENCE: f64 = 0.95;

/// Common view over rule-based and model-backed estimates.
pub trait StateEstimate {
    type Value;

    fn value(&self) -> &Self::Value;
    fn confidence(&self) -> f64;
    fn is_model(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleBasedEstimate<T> {
    pub value: T,
    pub confidence: f64,
    /// Weighted-sum score the rule was thresholded on, clamped to [0,1].
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEstimate<T> {
    pub value: T,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probabilities: Option<BTreeMap<String, f64>>,
    pub feature_importance: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum PredictionResult<T> {
    RuleBased(RuleBasedEstimate<T>),
    Model(ModelEstimate<T>),
}

impl<T> StateEstimate for RuleBasedEstimate<T> {
    type Value = T;

    fn value(&self) -> &T {
        &self.value
    }

    fn confidence(&self) -> f64 {
        self.confidence
    }

    fn is_model(&self) -> bool {
        false
    }
}

impl<T> StateEstimate for ModelEstimate<T> {
    type Value = T;

    fn value(&self) -> &T {
        &self.value
    }

    fn confidence(&self) -> f64 {
        self.confidence
    }

    fn is_model(&self) -> bool {
        true
    }
}

impl<T> StateEstimate for PredictionResult<T> {
    type Value = T;

    fn value(&self) -> &T {
        match self {
            Self::RuleBased(e) => e.value(),
            Self::Model(e) => e.value(),
        }
    }

    fn confidence(&self) -> f64 {
        match self {
            Self::RuleBased(e) => e.confidence(),
            Self::Model(e) => e.confidence(),
        }
    }

    fn is_model(&self) -> bool {
        matches!(self, Self::Model(_))
    }
}

impl<T> PredictionResult<T> {
    pub fn probabilities(&self) -> Option<&BTreeMap<String, f64>> {
        match self {
            Self::Model(e) => e.probabilities.as_ref(),
            Self::RuleBased(_) => None,
        }
    }

    pub fn feature_importance(&self) -> Option<&BTreeMap<String, f64>> {
        match self {
            Self::Model(e) => Some(&e.feature_importance),
            Self::RuleBased(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrainOutcome {
    Trained { samples: usize, cv_accuracy: Option<f64> },
    Skipped { samples: usize, required: usize },
}

impl TrainOutcome {
    pub fn is_trained(&self) -> bool {
        matches!(self, Self::Trained { .. })
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PredictorError {
    #[error(transparent)]
    Feature(#[from] FeatureError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

pub fn rule_cognitive_load(feature: &FeatureVector, weights: &LoadRuleWeights) -> (CognitiveLoad, f64) {
    let pause_term = (1.0 - feature.avg_pause_duration / weights.pause_scale_secs).max(0.0);
    let score = weights.edit_frequency * feature.edit_frequency / weights.edit_frequency_scale
        + weights.error_rate * feature.error_rate
        + weights.pause * pause_term;

    let level = if score > weights.high_threshold {
        CognitiveLoad::High
    } else if score > weights.medium_threshold {
        CognitiveLoad::Medium
    } else {
        CognitiveLoad::Low
    };
    (level, score)
}

pub fn rule_confusion(feature: &FeatureVector, weights: &ConfusionRuleWeights) -> f64 {
    let help = (feature.help_frequency / weights.help_frequency_scale).min(1.0);
    let score = weights.help_frequency * help
        + weights.error_rate * feature.error_rate
        + weights.edit_variance * feature.edit_variance;
    score.clamp(0.0, 1.0)
}

fn importance_map(names: &[&'static str], importances: &[f64]) -> BTreeMap<String, f64> {
    names
        .iter()
        .zip(importances)
        .map(|(name, v)| (name.to_string(), *v))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TrainedClassifier {
    engineer: FeatureEngineer,
    forest: RandomForestClassifier,
    classes: Vec<CognitiveLoad>,
    cv_accuracy: Option<f64>,
}

/// Three-way cognitive-load classifier with a weighted-signal fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CognitiveLoadPredictor {
    config: PredictorConfig,
    forest_config: ForestConfig,
    features: FeatureConfig,
    model: Option<TrainedClassifier>,
}

impl CognitiveLoadPredictor {
    pub fn new(config: PredictorConfig, forest_config: ForestConfig, features: FeatureConfig) -> Self {
        Self {
            config,
            forest_config,
            features,
            model: None,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.model.is_some()
    }

    pub fn cv_accuracy(&self) -> Option<f64> {
        self.model.as_ref().and_then(|m| m.cv_accuracy)
    }

    pub fn train(&mut self, features: &[FeatureVector], labels: &[CognitiveLoad]) -> Result<TrainOutcome, PredictorError> {
        if features.len() != labels.len() {
            return Err(ModelError::DimensionMismatch {
                expected: features.len(),
                actual: labels.len(),
            }
            .into());
        }
        if features.len() < self.config.min_training_samples {
            tracing::warn!(
                samples = features.len(),
                required = self.config.min_training_samples,
                "not enough samples to train cognitive load classifier"
            );
            return Ok(TrainOutcome::Skipped {
                samples: features.len(),
                required: self.config.min_training_samples,
            });
        }

        let mut classes: Vec<CognitiveLoad> = labels.to_vec();
        classes.sort();
        classes.dedup();
        let encoded: Vec<usize> = labels
            .iter()
            .map(|l| classes.iter().position(|c| c == l).unwrap_or(0))
            .collect();

        let mut engineer = FeatureEngineer::new(self.features.clone());
        let x = engineer.fit_transform(features, Labels::Classes(&encoded))?;

        let mut forest = RandomForestClassifier::new(self.forest_config.clone());
        forest.fit(&x, &encoded, classes.len())?;
        let cv_accuracy = cross_val_accuracy(&self.forest_config, &x, &encoded, classes.len(), self.config.cv_folds);

        tracing::info!(
            samples = features.len(),
            classes = classes.len(),
            cv_accuracy = cv_accuracy.unwrap_or(f64::NAN),
            "cognitive load classifier trained"
        );

        self.model = Some(TrainedClassifier {
            engineer,
            forest,
            classes,
            cv_accuracy,
        });
        Ok(TrainOutcome::Trained {
            samples: features.len(),
            cv_accuracy,
        })
    }

    pub fn predict(&self, feature: &FeatureVector) -> PredictionResult<CognitiveLoad> {
        if let Some(model) = &self.model {
            match Self::predict_with(model, feature) {
                Ok(estimate) => return PredictionResult::Model(estimate),
                Err(e) => tracing::warn!(error = %e, "cognitive load model failed, using rule"),
            }
        }
        self.predict_rule(feature)
    }

    pub fn predict_rule(&self, feature: &FeatureVector) -> PredictionResult<CognitiveLoad> {
        let (value, score) = rule_cognitive_load(feature, &self.config.load_rule);
        PredictionResult::RuleBased(RuleBasedEstimate {
            value,
            confidence: self.config.rule_confidence,
            score: score.clamp(0.0, 1.0),
        })
    }

    fn predict_with(model: &TrainedClassifier, feature: &FeatureVector) -> Result<ModelEstimate<CognitiveLoad>, PredictorError> {
        let row = model.engineer.transform_one(feature)?;
        let proba = model.forest.predict_proba(&row)?;
        let best = argmax(&proba);
        let value = model.classes.get(best).copied().unwrap_or_default();

        Ok(ModelEstimate {
            value,
            confidence: proba.get(best).copied().unwrap_or(0.0).clamp(0.0, 1.0),
            probabilities: Some(
                model
                    .classes
                    .iter()
                    .zip(&proba)
                    .map(|(c, p)| (c.as_str().to_string(), *p))
                    .collect(),
            ),
            feature_importance: importance_map(&model.engineer.output_names(), model.forest.feature_importances()),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TrainedRegressor {
    engineer: FeatureEngineer,
    forest: RandomForestRegressor,
}

/// Continuous confusion score in [0,1]; confidence comes from tree disagreement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfusionPredictor {
    config: PredictorConfig,
    forest_config: ForestConfig,
    features: FeatureConfig,
    model: Option<TrainedRegressor>,
}

impl ConfusionPredictor {
    pub fn new(config: PredictorConfig, forest_config: ForestConfig, features: FeatureConfig) -> Self {
        Self {
            config,
            forest_config,
            features,
            model: None,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.model.is_some()
    }

    pub fn train(&mut self, features: &[FeatureVector], scores: &[f64]) -> Result<TrainOutcome, PredictorError> {
        if features.len() != scores.len() {
            return Err(ModelError::DimensionMismatch {
                expected: features.len(),
                actual: scores.len(),
            }
            .into());
        }
        if features.len() < self.config.min_training_samples {
            tracing::warn!(
                samples = features.len(),
                required = self.config.min_training_samples,
                "not enough samples to train confusion regressor"
            );
            return Ok(TrainOutcome::Skipped {
                samples: features.len(),
                required: self.config.min_training_samples,
            });
        }

        let targets: Vec<f64> = scores
            .iter()
            .map(|s| if s.is_finite() { s.clamp(0.0, 1.0) } else { 0.0 })
            .collect();
        let mut engineer = FeatureEngineer::new(self.features.clone());
        let x = engineer.fit_transform(features, Labels::Values(&targets))?;
        let mut forest = RandomForestRegressor::new(self.forest_config.clone());
        forest.fit(&x, &targets)?;

        tracing::info!(samples = features.len(), "confusion regressor trained");
        self.model = Some(TrainedRegressor { engineer, forest });
        Ok(TrainOutcome::Trained {
            samples: features.len(),
            cv_accuracy: None,
        })
    }

    pub fn predict(&self, feature: &FeatureVector) -> PredictionResult<f64> {
        if let Some(model) = &self.model {
            match Self::predict_with(model, feature) {
                Ok(estimate) => return PredictionResult::Model(estimate),
                Err(e) => tracing::warn!(error = %e, "confusion model failed, using rule"),
            }
        }
        self.predict_rule(feature)
    }

    pub fn predict_rule(&self, feature: &FeatureVector) -> PredictionResult<f64> {
        let score = rule_confusion(feature, &self.config.confusion_rule);
        PredictionResult::RuleBased(RuleBasedEstimate {
            value: score,
            confidence: self.config.rule_confidence,
            score,
        })
    }

    fn predict_with(model: &TrainedRegressor, feature: &FeatureVector) -> Result<ModelEstimate<f64>, PredictorError> {
        let row = model.engineer.transform_one(feature)?;
        let preds = model.forest.tree_predictions(&row)?;
        let n = preds.len() as f64;
        let mean = preds.iter().sum::<f64>() / n;
        let std = (preds.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n).sqrt();

        Ok(ModelEstimate {
            value: mean.clamp(0.0, 1.0),
            confidence: (1.0 - std).clamp(MIN_REGRESSION_CONFIDENCE, MAX_REGRESSION_CONFIDENCE),
            probabilities: None,
            feature_importance: importance_map(&model.engineer.output_names(), model.forest.feature_importances()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatePredictions {
    pub cognitive_load: PredictionResult<CognitiveLoad>,
    pub confusion: PredictionResult<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTrainingReport {
    pub cognitive_load: TrainOutcome,
    pub confusion: TrainOutcome,
}

/// Both state predictors behind one feature schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatePredictor {
    pub cognitive_load: CognitiveLoadPredictor,
    pub confusion: ConfusionPredictor,
}

impl StatePredictor {
    pub fn new(config: PredictorConfig, forest_config: ForestConfig, features: FeatureConfig) -> Self {
        Self {
            cognitive_load: CognitiveLoadPredictor::new(config.clone(), forest_config.clone(), features.clone()),
            confusion: ConfusionPredictor::new(config, forest_config, features),
        }
    }

    pub fn predict_states(&self, feature: &FeatureVector) -> StatePredictions {
        StatePredictions {
            cognitive_load: self.cognitive_load.predict(feature),
            confusion: self.confusion.predict(feature),
        }
    }

    pub fn is_trained(&self) -> bool {
        self.cognitive_load.is_trained() || self.confusion.is_trained()
    }

    /// Refits both predictors on the accumulated sample buffer.
    pub fn train<'a>(&mut self, samples: impl IntoIterator<Item = &'a TrainingSample>) -> Result<StateTrainingReport, PredictorError> {
        let samples: Vec<&TrainingSample> = samples.into_iter().collect();
        let features: Vec<FeatureVector> = samples.iter().map(|s| s.features.clone()).collect();
        let loads: Vec<CognitiveLoad> = samples.iter().map(|s| s.cognitive_load).collect();
        let scores: Vec<f64> = samples.iter().map(|s| s.confusion_score).collect();

        Ok(StateTrainingReport {
            cognitive_load: self.cognitive_load.train(&features, &loads)?,
            confusion: self.confusion.train(&features, &scores)?,
        })
    }
}
