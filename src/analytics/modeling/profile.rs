use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::analytics::config::HeuristicThresholds;
use crate::analytics::types::{CognitiveLoad, ConfusionLevel, FocusLevel, LearningPreference};

const INITIAL_PREFERENCE_WEIGHT: f64 = 0.33;
const PREFERENCE_BOOST: f64 = 0.05;
const PREFERENCE_DECAY: f64 = 0.01;

/// The learner's current cognitive state as last accepted by fusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CognitiveState {
    pub cognitive_load: CognitiveLoad,
    pub load_confidence: f64,
    pub confusion_level: ConfusionLevel,
    pub confusion_score: f64,
}

impl Default for CognitiveState {
    fn default() -> Self {
        Self {
            cognitive_load: CognitiveLoad::Medium,
            load_confidence: 0.5,
            confusion_level: ConfusionLevel::None,
            confusion_score: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerProfile {
    pub cognitive: CognitiveState,
    pub focus: FocusLevel,
    pub preferences: BTreeMap<LearningPreference, f64>,
}

impl Default for LearnerProfile {
    fn default() -> Self {
        Self {
            cognitive: CognitiveState::default(),
            focus: FocusLevel::Medium,
            preferences: LearningPreference::ALL
                .into_iter()
                .map(|p| (p, INITIAL_PREFERENCE_WEIGHT))
                .collect(),
        }
    }
}

impl LearnerProfile {
    pub fn update_focus(&mut self, idle_time_secs: f64, thresholds: &HeuristicThresholds) -> FocusLevel {
        self.focus = if idle_time_secs > thresholds.idle_low_secs {
            FocusLevel::Low
        } else if idle_time_secs > thresholds.idle_medium_secs {
            FocusLevel::Medium
        } else {
            FocusLevel::High
        };
        self.focus
    }

    /// Nudges the used preference up and every other one down.
    pub fn record_interaction(&mut self, used: LearningPreference) {
        for (pref, weight) in self.preferences.iter_mut() {
            *weight = if *pref == used {
                (*weight + PREFERENCE_BOOST).min(1.0)
            } else {
                (*weight - PREFERENCE_DECAY).max(0.0)
            };
        }
    }

    /// Highest-weighted preference; ties resolve to the first in declaration order.
    pub fn main_preference(&self) -> LearningPreference {
        LearningPreference::ALL
            .into_iter()
            .fold(None::<(LearningPreference, f64)>, |best, p| {
                let w = self.preferences.get(&p).copied().unwrap_or(0.0);
                match best {
                    Some((_, bw)) if bw >= w => best,
                    _ => Some((p, w)),
                }
            })
            .map(|(p, _)| p)
            .unwrap_or(LearningPreference::CodeExamples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn focus_follows_idle_time() {
        let mut profile = LearnerProfile::default();
        let t = HeuristicThresholds::default();
        assert_eq!(profile.update_focus(10.0, &t), FocusLevel::High);
        assert_eq!(profile.update_focus(200.0, &t), FocusLevel::Medium);
        assert_eq!(profile.update_focus(400.0, &t), FocusLevel::Low);
    }

    #[test]
    fn interactions_shift_main_preference() {
        let mut profile = LearnerProfile::default();
        assert_eq!(profile.main_preference(), LearningPreference::CodeExamples);
        profile.record_interaction(LearningPreference::VisualAids);
        assert_eq!(profile.main_preference(), LearningPreference::VisualAids);
        assert!((profile.preferences[&LearningPreference::VisualAids] - 0.38).abs() < 1e-12);
        assert!((profile.preferences[&LearningPreference::Analogies] - 0.32).abs() < 1e-12);
    }

    #[test]
    fn weights_stay_in_unit_range() {
        let mut profile = LearnerProfile::default();
        for _ in 0..100 {
            profile.record_interaction(LearningPreference::Interactive);
        }
        assert_eq!(profile.preferences[&LearningPreference::Interactive], 1.0);
        assert_eq!(profile.preferences[&LearningPreference::CodeExamples], 0.0);
    }
}
