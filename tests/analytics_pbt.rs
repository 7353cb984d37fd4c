//! Property-based tests for the tracker and the decision distributions.

use proptest::prelude::*;

use tutor_analytics::analytics::config::{BktConfig, EstimatorConfig};
use tutor_analytics::analytics::decision::{difficulty_distribution, question_type_distribution};
use tutor_analytics::analytics::knowledge::{AdaptiveBktSystem, BktParameters, KnowledgeTracker, LearningDataExport};
use tutor_analytics::analytics::{CognitiveLoad, ConfusionLevel, LearningPreference, Observation};

fn arb_param() -> impl Strategy<Value = f64> {
    (1u32..=99u32).prop_map(|v| v as f64 / 100.0)
}

fn arb_params() -> impl Strategy<Value = BktParameters> {
    (arb_param(), arb_param(), arb_param(), arb_param()).prop_map(|(a, b, c, d)| BktParameters::new(a, b, c, d))
}

fn arb_observation() -> impl Strategy<Value = Observation> {
    (any::<bool>(), 0.0f64..=1.0, 0.0f64..600.0).prop_map(|(correct, difficulty, response)| {
        Observation::new(0.0, correct)
            .with_difficulty(difficulty)
            .with_response_time(response)
    })
}

fn arb_confusion() -> impl Strategy<Value = ConfusionLevel> {
    prop_oneof![
        Just(ConfusionLevel::None),
        Just(ConfusionLevel::Slight),
        Just(ConfusionLevel::Moderate),
        Just(ConfusionLevel::Severe),
    ]
}

fn arb_load() -> impl Strategy<Value = CognitiveLoad> {
    prop_oneof![Just(CognitiveLoad::Low), Just(CognitiveLoad::Medium), Just(CognitiveLoad::High)]
}

proptest! {
    #[test]
    fn mastery_stays_in_unit_interval(params in arb_params(), seq in prop::collection::vec(arb_observation(), 1..60)) {
        let mut tracker = KnowledgeTracker::new("kp", params);
        for obs in seq {
            let m = tracker.update(obs);
            prop_assert!((0.0..=1.0).contains(&m));
            prop_assert!(m.is_finite());
        }
    }

    #[test]
    fn predicted_success_is_clamped(params in arb_params(), difficulty in 0.0f64..=1.0) {
        let tracker = KnowledgeTracker::new("kp", params);
        let (p, m) = tracker.predict_performance(difficulty);
        prop_assert!((0.01..=0.99).contains(&p));
        prop_assert!((0.0..=1.0).contains(&m));
    }

    #[test]
    fn parameters_are_clamped_into_box(a in -1.0f64..2.0, b in -1.0f64..2.0, c in -1.0f64..2.0, d in -1.0f64..2.0) {
        let params = BktParameters::new(a, b, c, d);
        for v in params.to_array() {
            prop_assert!((0.01..=0.99).contains(&v));
        }
    }

    #[test]
    fn export_round_trip_is_exact(seq in prop::collection::vec(any::<bool>(), 1..9)) {
        let mut system = AdaptiveBktSystem::default();
        for (t, correct) in seq.iter().enumerate() {
            system.update_knowledge("kp", Observation::new(t as f64, *correct));
        }
        let json = serde_json::to_string(&system.export_learning_data()).unwrap();
        let export: LearningDataExport = serde_json::from_str(&json).unwrap();
        let restored = AdaptiveBktSystem::from_export(BktConfig::default(), EstimatorConfig::default(), export);
        prop_assert_eq!(
            restored.tracker("kp").map(|t| t.current_mastery()),
            system.tracker("kp").map(|t| t.current_mastery())
        );
    }

    #[test]
    fn distributions_are_normalized(level in 1.0f64..=5.0, confusion in arb_confusion(), load in arb_load(), pref_idx in 0usize..5) {
        let difficulty = difficulty_distribution(level, confusion, load);
        let total: f64 = difficulty.entries().iter().map(|(_, w)| w).sum();
        prop_assert!((total - 1.0).abs() < 1e-9);
        prop_assert!(difficulty.entries().iter().all(|(_, w)| *w >= 0.0));

        let types = question_type_distribution(LearningPreference::ALL[pref_idx], level);
        let total: f64 = types.entries().iter().map(|(_, w)| w).sum();
        prop_assert!((total - 1.0).abs() < 1e-9);
        prop_assert!(types.entries().iter().all(|(_, w)| *w >= 0.0));
    }
}
