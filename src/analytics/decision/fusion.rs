//! Merges BKT mastery, predictor output and heuristics into one learner summary.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analytics::config::FusionConfig;
use crate::analytics::decision::strategy::TeachingStrategy;
use crate::analytics::knowledge::MasterySummary;
use crate::analytics::modeling::behavior::EngagementSignals;
use crate::analytics::modeling::heuristic::HeuristicAssessment;
use crate::analytics::modeling::predictor::{StateEstimate, StatePredictions};
use crate::analytics::modeling::profile::{CognitiveState, LearnerProfile};
use crate::analytics::types::{CognitiveLoad, ConfusionLevel, FocusLevel, FrustrationLevel, LearningPreference};

/// Predictions at or below this confidence never override the current state.
pub const CONFIDENCE_GATE: f64 = 0.7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusionOutcome {
    pub load_applied: bool,
    pub confusion_applied: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CognitiveSection {
    pub average_mastery: f64,
    /// 1 to 5 scale derived from average mastery.
    pub knowledge_level: f64,
    pub cognitive_load: CognitiveLoad,
    pub load_confidence: f64,
    pub confusion_level: ConfusionLevel,
    pub confusion_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionalSection {
    pub focus: FocusLevel,
    pub frustration: FrustrationLevel,
    pub error_burst: bool,
    pub engagement: Option<EngagementSignals>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceSection {
    pub main_preference: LearningPreference,
    pub weights: BTreeMap<LearningPreference, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerStateSummary {
    pub generated_at: DateTime<Utc>,
    pub mastery: MasterySummary,
    pub cognitive: CognitiveSection,
    pub emotional: EmotionalSection,
    pub preferences: PreferenceSection,
    pub strategy: TeachingStrategy,
    pub recommendations: Vec<String>,
}

pub fn knowledge_level(average_mastery: f64) -> f64 {
    1.0 + 4.0 * average_mastery.clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Default)]
pub struct StateFusion {
    config: FusionConfig,
}

impl StateFusion {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    pub fn confusion_bucket(&self, score: f64) -> ConfusionLevel {
        if score > self.config.severe_cutoff {
            ConfusionLevel::Severe
        } else if score > self.config.moderate_cutoff {
            ConfusionLevel::Moderate
        } else if score > self.config.slight_cutoff {
            ConfusionLevel::Slight
        } else {
            ConfusionLevel::None
        }
    }

    /// Applies model predictions that clear the confidence gate; everything else
    /// leaves the current state as it was.
    pub fn integrate(&self, state: &mut CognitiveState, predictions: &StatePredictions) -> FusionOutcome {
        let mut outcome = FusionOutcome::default();

        let load = &predictions.cognitive_load;
        if load.is_model() && load.confidence() > CONFIDENCE_GATE {
            state.cognitive_load = *load.value();
            state.load_confidence = load.confidence();
            outcome.load_applied = true;
        }

        let confusion = &predictions.confusion;
        if confusion.is_model() && confusion.confidence() > CONFIDENCE_GATE {
            let score = confusion.value().clamp(0.0, 1.0);
            state.confusion_score = score;
            state.confusion_level = self.confusion_bucket(score);
            outcome.confusion_applied = true;
        }

        tracing::debug!(
            load_applied = outcome.load_applied,
            confusion_applied = outcome.confusion_applied,
            load = state.cognitive_load.as_str(),
            confusion = state.confusion_level.as_str(),
            "state predictions fused"
        );
        outcome
    }

    pub fn summarize(
        &self,
        mastery: MasterySummary,
        profile: &LearnerProfile,
        heuristic: Option<&HeuristicAssessment>,
        engagement: Option<EngagementSignals>,
    ) -> LearnerStateSummary {
        let state = &profile.cognitive;
        // heuristics can only raise the confusion bucket
        let confusion_level = heuristic
            .map(|h| h.confusion.max(state.confusion_level))
            .unwrap_or(state.confusion_level);
        let confusion_score = if confusion_level > state.confusion_level {
            state.confusion_score.max(confusion_level.nominal_score())
        } else {
            state.confusion_score
        };
        let frustration = heuristic.map(|h| h.frustration).unwrap_or_default();
        let main_preference = profile.main_preference();

        let strategy = TeachingStrategy::select(state.cognitive_load, confusion_level, profile.focus, frustration);
        let recommendations = self.recommendations(&mastery, state.cognitive_load, confusion_level, main_preference);

        LearnerStateSummary {
            generated_at: Utc::now(),
            cognitive: CognitiveSection {
                average_mastery: mastery.average_mastery,
                knowledge_level: knowledge_level(mastery.average_mastery),
                cognitive_load: state.cognitive_load,
                load_confidence: state.load_confidence,
                confusion_level,
                confusion_score,
            },
            emotional: EmotionalSection {
                focus: profile.focus,
                frustration,
                error_burst: heuristic.map(|h| h.error_burst).unwrap_or(false),
                engagement,
            },
            preferences: PreferenceSection {
                main_preference,
                weights: profile.preferences.clone(),
            },
            mastery,
            strategy,
            recommendations,
        }
    }

    fn recommendations(
        &self,
        mastery: &MasterySummary,
        load: CognitiveLoad,
        confusion: ConfusionLevel,
        preference: LearningPreference,
    ) -> Vec<String> {
        let mut out = Vec::new();

        match load {
            CognitiveLoad::High => {
                out.push("Cognitive load is high; take a short break or switch to an easier exercise".to_string())
            }
            CognitiveLoad::Low => out.push("Current state looks good; try a more challenging task".to_string()),
            CognitiveLoad::Medium => {}
        }
        if confusion.is_troubled() {
            out.push("Confusion detected; review the underlying concepts or ask for help".to_string());
        }
        if mastery.struggling > 0 {
            out.push(format!("{} knowledge point(s) need more practice", mastery.struggling));
        }
        if mastery.well_mastered > 0 {
            out.push(format!(
                "{} knowledge point(s) are well mastered; ready for the next stage",
                mastery.well_mastered
            ));
        }
        match preference {
            LearningPreference::CodeExamples => out.push("Learn through more code examples".to_string()),
            LearningPreference::TextExplanations => out.push("Read detailed concept explanations".to_string()),
            _ => {}
        }

        if out.is_empty() {
            out.push("Keep going and keep a steady study rhythm".to_string());
        }
        out.truncate(self.config.max_recommendations.max(1));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::modeling::predictor::{ModelEstimate, PredictionResult, RuleBasedEstimate};

    fn model<T>(value: T, confidence: f64) -> PredictionResult<T> {
        PredictionResult::Model(ModelEstimate {
            value,
            confidence,
            probabilities: None,
            feature_importance: BTreeMap::new(),
        })
    }

    fn rule<T>(value: T, confidence: f64) -> PredictionResult<T> {
        PredictionResult::RuleBased(RuleBasedEstimate {
            value,
            confidence,
            score: 0.0,
        })
    }

    fn mastery(avg: f64, well: usize, struggling: usize) -> MasterySummary {
        MasterySummary {
            average_mastery: avg,
            well_mastered: well,
            struggling,
            total_points: well + struggling,
            per_point: BTreeMap::new(),
        }
    }

    #[test]
    fn gate_rejects_low_confidence_and_rules() {
        let fusion = StateFusion::default();
        let mut state = CognitiveState::default();
        let predictions = StatePredictions {
            cognitive_load: model(CognitiveLoad::High, 0.7),
            confusion: rule(0.95, 0.99),
        };
        let outcome = fusion.integrate(&mut state, &predictions);
        assert_eq!(outcome, FusionOutcome::default());
        assert_eq!(state, CognitiveState::default());
    }

    #[test]
    fn gate_accepts_confident_models() {
        let fusion = StateFusion::default();
        let mut state = CognitiveState::default();
        let predictions = StatePredictions {
            cognitive_load: model(CognitiveLoad::High, 0.9),
            confusion: model(0.6, 0.8),
        };
        let outcome = fusion.integrate(&mut state, &predictions);
        assert!(outcome.load_applied && outcome.confusion_applied);
        assert_eq!(state.cognitive_load, CognitiveLoad::High);
        assert_eq!(state.confusion_level, ConfusionLevel::Moderate);
    }

    #[test]
    fn confusion_buckets() {
        let fusion = StateFusion::default();
        assert_eq!(fusion.confusion_bucket(0.71), ConfusionLevel::Severe);
        assert_eq!(fusion.confusion_bucket(0.7), ConfusionLevel::Moderate);
        assert_eq!(fusion.confusion_bucket(0.3), ConfusionLevel::Slight);
        assert_eq!(fusion.confusion_bucket(0.2), ConfusionLevel::None);
    }

    #[test]
    fn heuristics_raise_confusion_and_set_frustration() {
        let fusion = StateFusion::default();
        let heuristic = HeuristicAssessment {
            confusion: ConfusionLevel::Severe,
            frustration: FrustrationLevel::High,
            ..Default::default()
        };
        let summary = fusion.summarize(mastery(0.2, 0, 1), &LearnerProfile::default(), Some(&heuristic), None);
        assert_eq!(summary.cognitive.confusion_level, ConfusionLevel::Severe);
        assert!((summary.cognitive.confusion_score - 0.9).abs() < 1e-12);
        assert_eq!(summary.emotional.frustration, FrustrationLevel::High);
        assert!(summary.strategy.guided_discovery);
    }

    #[test]
    fn recommendations_are_capped() {
        let fusion = StateFusion::new(FusionConfig {
            max_recommendations: 2,
            ..FusionConfig::default()
        });
        let mut profile = LearnerProfile::default();
        profile.cognitive.cognitive_load = CognitiveLoad::High;
        profile.cognitive.confusion_level = ConfusionLevel::Severe;
        let summary = fusion.summarize(mastery(0.5, 1, 1), &profile, None, None);
        assert_eq!(summary.recommendations.len(), 2);
        assert!(summary.recommendations[0].contains("Cognitive load is high"));
    }

    #[test]
    fn knowledge_level_scale() {
        assert_eq!(knowledge_level(0.0), 1.0);
        assert_eq!(knowledge_level(1.0), 5.0);
        assert_eq!(knowledge_level(0.5), 3.0);
    }
}
