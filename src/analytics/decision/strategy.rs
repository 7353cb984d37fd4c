use serde::{Deserialize, Serialize};

use crate::analytics::types::{CognitiveLoad, ConfusionLevel, FocusLevel, FrustrationLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplanationDepth {
    Brief,
    Standard,
    Detailed,
    Foundational,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncouragementLevel {
    Minimal,
    Moderate,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentLength {
    Short,
    Medium,
    Long,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackTone {
    Reassuring,
    StepByStep,
    Encouraging,
    Neutral,
}

impl FeedbackTone {
    pub fn from_state(frustration: FrustrationLevel, confusion: ConfusionLevel) -> Self {
        if frustration == FrustrationLevel::High {
            Self::Reassuring
        } else if confusion == ConfusionLevel::Severe {
            Self::StepByStep
        } else if confusion == ConfusionLevel::Moderate {
            Self::Encouraging
        } else {
            Self::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reassuring => "reassuring",
            Self::StepByStep => "step_by_step",
            Self::Encouraging => "encouraging",
            Self::Neutral => "neutral",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeachingStrategy {
    pub explanation_depth: ExplanationDepth,
    pub encouragement: EncouragementLevel,
    pub content_length: ContentLength,
    pub tone: FeedbackTone,
    /// Walk the learner towards the fix instead of handing over the final answer.
    pub guided_discovery: bool,
    pub include_minimal_example: bool,
}

impl TeachingStrategy {
    pub fn select(
        load: CognitiveLoad,
        confusion: ConfusionLevel,
        focus: FocusLevel,
        frustration: FrustrationLevel,
    ) -> Self {
        let explanation_depth = match (confusion, load) {
            (ConfusionLevel::Severe, _) => ExplanationDepth::Foundational,
            (ConfusionLevel::Moderate, _) => ExplanationDepth::Detailed,
            (ConfusionLevel::Slight, _) => ExplanationDepth::Standard,
            (ConfusionLevel::None, CognitiveLoad::Low) => ExplanationDepth::Brief,
            (ConfusionLevel::None, _) => ExplanationDepth::Standard,
        };

        let encouragement = if frustration == FrustrationLevel::High || confusion == ConfusionLevel::Severe {
            EncouragementLevel::High
        } else if confusion == ConfusionLevel::Moderate
            || load == CognitiveLoad::High
            || frustration == FrustrationLevel::Medium
        {
            EncouragementLevel::Moderate
        } else {
            EncouragementLevel::Minimal
        };

        let content_length = match (load, focus) {
            (CognitiveLoad::High, _) | (_, FocusLevel::Low) => ContentLength::Short,
            (CognitiveLoad::Low, FocusLevel::High) => ContentLength::Long,
            _ => ContentLength::Medium,
        };

        let guided = confusion == ConfusionLevel::Severe;

        Self {
            explanation_depth,
            encouragement,
            content_length,
            tone: FeedbackTone::from_state(frustration, confusion),
            guided_discovery: guided,
            include_minimal_example: guided,
        }
    }
}

impl Default for TeachingStrategy {
    fn default() -> Self {
        Self::select(
            CognitiveLoad::Medium,
            ConfusionLevel::None,
            FocusLevel::Medium,
            FrustrationLevel::None,
        )
    }
}
