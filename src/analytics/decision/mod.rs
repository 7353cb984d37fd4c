pub mod fusion;
pub mod quiz;
pub mod strategy;

pub use fusion::{
    knowledge_level, CognitiveSection, EmotionalSection, FusionOutcome, LearnerStateSummary, PreferenceSection,
    StateFusion, CONFIDENCE_GATE,
};
pub use quiz::{difficulty_distribution, plan_quiz, question_type_distribution, Distribution, QuestionSlot, QuizPlan};
pub use strategy::{ContentLength, EncouragementLevel, ExplanationDepth, FeedbackTone, TeachingStrategy};
