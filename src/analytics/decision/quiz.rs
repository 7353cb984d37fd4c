//! Adaptive quiz planning: difficulty and question-type mixes plus categorical sampling.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::analytics::decision::fusion::LearnerStateSummary;
use crate::analytics::types::{CognitiveLoad, ConfusionLevel, DifficultyLevel, LearningPreference, QuestionType};

const STRUGGLE_SHIFT: f64 = 0.2;

/// Ordered categorical distribution. Sampling walks buckets in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution<K> {
    entries: Vec<(K, f64)>,
}

impl<K: Copy + PartialEq> Distribution<K> {
    pub fn new(entries: Vec<(K, f64)>) -> Self {
        Self { entries }
    }

    /// Floors negative or non-finite weights at zero and rescales to sum to one.
    /// An all-zero distribution becomes uniform.
    pub fn normalized(mut self) -> Self {
        for (_, w) in self.entries.iter_mut() {
            if !w.is_finite() || *w < 0.0 {
                *w = 0.0;
            }
        }
        let total: f64 = self.entries.iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            let uniform = 1.0 / self.entries.len().max(1) as f64;
            self.entries.iter_mut().for_each(|(_, w)| *w = uniform);
        } else {
            self.entries.iter_mut().for_each(|(_, w)| *w /= total);
        }
        self
    }

    pub fn probability(&self, key: K) -> f64 {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, w)| *w)
            .unwrap_or(0.0)
    }

    pub fn entries(&self) -> &[(K, f64)] {
        &self.entries
    }

    /// First bucket whose running cumulative sum exceeds a uniform draw; `fallback`
    /// when rounding leaves no bucket selected.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, fallback: K) -> K {
        let draw: f64 = rng.random();
        let mut cumulative = 0.0;
        for (key, weight) in &self.entries {
            cumulative += weight;
            if draw < cumulative {
                return *key;
            }
        }
        fallback
    }
}

pub fn difficulty_distribution(
    knowledge_level: f64,
    confusion: ConfusionLevel,
    load: CognitiveLoad,
) -> Distribution<DifficultyLevel> {
    let (mut easy, medium, mut hard) = if knowledge_level < 2.0 {
        (0.7, 0.3, 0.0)
    } else if knowledge_level < 3.5 {
        (0.4, 0.5, 0.1)
    } else {
        (0.2, 0.5, 0.3)
    };

    if confusion.is_troubled() || load == CognitiveLoad::High {
        easy += STRUGGLE_SHIFT;
        hard = (hard - STRUGGLE_SHIFT).max(0.0);
    }

    Distribution::new(vec![
        (DifficultyLevel::Easy, easy),
        (DifficultyLevel::Medium, medium),
        (DifficultyLevel::Hard, hard),
    ])
    .normalized()
}

pub fn question_type_distribution(preference: LearningPreference, knowledge_level: f64) -> Distribution<QuestionType> {
    let mut fill = 0.4;
    let correction = 0.3;
    let mut implementation = 0.2;
    let mut concept = 0.1;

    match preference {
        LearningPreference::CodeExamples => {
            fill += 0.2;
            implementation += 0.1;
        }
        LearningPreference::TextExplanations => concept += 0.2,
        _ => {}
    }

    if knowledge_level < 2.0 {
        fill += 0.2;
        implementation -= 0.1;
    } else if knowledge_level > 3.5 {
        implementation += 0.2;
        fill -= 0.1;
    }

    Distribution::new(vec![
        (QuestionType::FillInBlank, fill),
        (QuestionType::ErrorCorrection, correction),
        (QuestionType::CodeImplementation, implementation),
        (QuestionType::ConceptExplanation, concept),
    ])
    .normalized()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionSlot {
    pub index: usize,
    pub knowledge_point: String,
    pub difficulty: DifficultyLevel,
    pub question_type: QuestionType,
    pub estimated_minutes: f64,
    pub hint_level: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizPlan {
    pub difficulty: Distribution<DifficultyLevel>,
    pub question_types: Distribution<QuestionType>,
    pub slots: Vec<QuestionSlot>,
}

/// Plans `count` questions cycling through `target_points`.
pub fn plan_quiz<R: Rng + ?Sized>(
    summary: &LearnerStateSummary,
    target_points: &[String],
    count: usize,
    rng: &mut R,
) -> QuizPlan {
    let level = summary.cognitive.knowledge_level;
    let difficulty = difficulty_distribution(level, summary.cognitive.confusion_level, summary.cognitive.cognitive_load);
    let question_types = question_type_distribution(summary.preferences.main_preference, level);

    let slots: Vec<QuestionSlot> = if target_points.is_empty() {
        Vec::new()
    } else {
        (0..count)
            .map(|index| {
                let d = difficulty.sample(rng, DifficultyLevel::Medium);
                let q = question_types.sample(rng, QuestionType::FillInBlank);
                QuestionSlot {
                    index,
                    knowledge_point: target_points[index % target_points.len()].clone(),
                    difficulty: d,
                    question_type: q,
                    estimated_minutes: q.base_minutes() * d.time_multiplier(),
                    hint_level: d.hint_level(),
                }
            })
            .collect()
    };

    tracing::info!(
        questions = slots.len(),
        knowledge_level = level,
        easy = difficulty.probability(DifficultyLevel::Easy),
        "quiz planned"
    );

    QuizPlan {
        difficulty,
        question_types,
        slots,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn sampling_never_picks_zero_weight_buckets() {
        let dist = Distribution::new(vec![
            (DifficultyLevel::Easy, 0.7),
            (DifficultyLevel::Medium, 0.3),
            (DifficultyLevel::Hard, 0.0),
        ])
        .normalized();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut counts = [0usize; 3];
        for _ in 0..10_000 {
            match dist.sample(&mut rng, DifficultyLevel::Medium) {
                DifficultyLevel::Easy => counts[0] += 1,
                DifficultyLevel::Medium => counts[1] += 1,
                DifficultyLevel::Hard => counts[2] += 1,
            }
        }
        assert_eq!(counts[2], 0);
        let easy_share = counts[0] as f64 / 10_000.0;
        assert!((easy_share - 0.7).abs() < 0.03, "easy share {easy_share}");
    }

    #[test]
    fn all_zero_weights_become_uniform() {
        let dist = Distribution::new(vec![(1u8, 0.0), (2u8, -1.0)]).normalized();
        assert_eq!(dist.probability(1), 0.5);
        assert_eq!(dist.probability(2), 0.5);
    }

    #[test]
    fn empty_distribution_uses_fallback() {
        let dist: Distribution<u8> = Distribution::new(Vec::new());
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(dist.sample(&mut rng, 9), 9);
    }

    #[test]
    fn struggling_learners_get_easier_mix() {
        let calm = difficulty_distribution(4.0, ConfusionLevel::None, CognitiveLoad::Medium);
        let troubled = difficulty_distribution(4.0, ConfusionLevel::Severe, CognitiveLoad::Medium);
        assert!(troubled.probability(DifficultyLevel::Easy) > calm.probability(DifficultyLevel::Easy));
        assert!(troubled.probability(DifficultyLevel::Hard) < calm.probability(DifficultyLevel::Hard));
        let beginner = difficulty_distribution(1.0, ConfusionLevel::None, CognitiveLoad::High);
        assert_eq!(beginner.probability(DifficultyLevel::Hard), 0.0);
    }

    #[test]
    fn question_types_follow_preference_and_level() {
        let code = question_type_distribution(LearningPreference::CodeExamples, 3.0);
        let text = question_type_distribution(LearningPreference::TextExplanations, 3.0);
        assert!(code.probability(QuestionType::FillInBlank) > text.probability(QuestionType::FillInBlank));
        assert!(text.probability(QuestionType::ConceptExplanation) > code.probability(QuestionType::ConceptExplanation));
        let total: f64 = code.entries().iter().map(|(_, w)| w).sum();
        assert!((total - 1.0).abs() < 1e-12);
    }
}
