use serde::{Deserialize, Serialize};

const DEFAULT_CONFIDENCE: f64 = 0.5;
const DEFAULT_TIME_SPENT_SECS: f64 = 30.0;
const DEFAULT_DIFFICULTY: f64 = 0.5;

fn default_confidence() -> f64 {
    DEFAULT_CONFIDENCE
}

fn default_attempts() -> u32 {
    1
}

/// A single learning event. Never mutated once recorded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: f64,
    pub correct: bool,
    pub response_time: f64,
    pub difficulty: f64,
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default)]
    pub hint_used: bool,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

impl Observation {
    pub fn new(timestamp: f64, correct: bool) -> Self {
        Self {
            timestamp,
            correct,
            response_time: DEFAULT_TIME_SPENT_SECS,
            difficulty: DEFAULT_DIFFICULTY,
            attempts: 1,
            hint_used: false,
            confidence: DEFAULT_CONFIDENCE,
        }
    }

    pub fn with_response_time(mut self, secs: f64) -> Self {
        self.response_time = secs;
        self
    }

    pub fn with_difficulty(mut self, difficulty: f64) -> Self {
        self.difficulty = difficulty;
        self
    }

    pub fn with_hint(mut self, hint_used: bool) -> Self {
        self.hint_used = hint_used;
        self
    }

    /// Clamps noisy upstream values into their documented ranges.
    pub fn sanitized(mut self) -> Self {
        if !self.response_time.is_finite() || self.response_time < 0.0 {
            self.response_time = 0.0;
        }
        self.difficulty = clamp_unit(self.difficulty, DEFAULT_DIFFICULTY);
        self.confidence = clamp_unit(self.confidence, DEFAULT_CONFIDENCE);
        self.attempts = self.attempts.max(1);
        self
    }
}

fn clamp_unit(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        fallback
    }
}

/// Raw per-attempt payload as delivered by the performance event provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceEvent {
    #[serde(default)]
    pub timestamp: Option<f64>,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub time_spent: Option<f64>,
    #[serde(default)]
    pub difficulty: Option<f64>,
    #[serde(default)]
    pub attempts: Option<u32>,
    #[serde(default)]
    pub hint_used: bool,
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl PerformanceEvent {
    pub fn to_observation(&self, now: f64) -> Observation {
        Observation {
            timestamp: self.timestamp.unwrap_or(now),
            correct: self.success,
            response_time: self.time_spent.unwrap_or(DEFAULT_TIME_SPENT_SECS),
            difficulty: self.difficulty.unwrap_or(DEFAULT_DIFFICULTY),
            attempts: self.attempts.unwrap_or(1),
            hint_used: self.hint_used,
            confidence: self.confidence.unwrap_or(DEFAULT_CONFIDENCE),
        }
        .sanitized()
    }
}

pub fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum CognitiveLoad {
    Low,
    #[default]
    Medium,
    High,
}

impl CognitiveLoad {
    pub const ALL: [CognitiveLoad; 3] = [Self::Low, Self::Medium, Self::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum ConfusionLevel {
    #[default]
    None,
    Slight,
    Moderate,
    Severe,
}

impl ConfusionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Slight => "slight",
            Self::Moderate => "moderate",
            Self::Severe => "severe",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" => Some(Self::None),
            "slight" => Some(Self::Slight),
            "moderate" => Some(Self::Moderate),
            "severe" => Some(Self::Severe),
            _ => None,
        }
    }

    /// Representative score used when only the bucket is known.
    pub fn nominal_score(&self) -> f64 {
        match self {
            Self::None => 0.0,
            Self::Slight => 0.3,
            Self::Moderate => 0.6,
            Self::Severe => 0.9,
        }
    }

    pub fn is_troubled(&self) -> bool {
        matches!(self, Self::Moderate | Self::Severe)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum FrustrationLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl FrustrationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum FocusLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl FocusLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningPreference {
    CodeExamples,
    TextExplanations,
    Analogies,
    VisualAids,
    Interactive,
}

impl LearningPreference {
    pub const ALL: [LearningPreference; 5] = [
        Self::CodeExamples,
        Self::TextExplanations,
        Self::Analogies,
        Self::VisualAids,
        Self::Interactive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CodeExamples => "code_examples",
            Self::TextExplanations => "text_explanations",
            Self::Analogies => "analogies",
            Self::VisualAids => "visual_aids",
            Self::Interactive => "interactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum DifficultyLevel {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl DifficultyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }

    pub fn time_multiplier(&self) -> f64 {
        match self {
            Self::Easy => 0.8,
            Self::Medium => 1.0,
            Self::Hard => 1.5,
        }
    }

    pub fn hint_level(&self) -> u8 {
        match self {
            Self::Easy => 3,
            Self::Medium => 2,
            Self::Hard => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[derive(Default)]
pub enum QuestionType {
    #[default]
    FillInBlank,
    ErrorCorrection,
    CodeImplementation,
    ConceptExplanation,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FillInBlank => "fill_in_blank",
            Self::ErrorCorrection => "error_correction",
            Self::CodeImplementation => "code_implementation",
            Self::ConceptExplanation => "concept_explanation",
        }
    }

    pub fn base_minutes(&self) -> f64 {
        match self {
            Self::FillInBlank => 5.0,
            Self::ErrorCorrection => 8.0,
            Self::CodeImplementation => 15.0,
            Self::ConceptExplanation => 3.0,
        }
    }
}
