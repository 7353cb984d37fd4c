//! Offline accuracy evaluation of the mastery tracker and the state predictors
//! against externally collected ground truth.

use serde::{Deserialize, Serialize};

use crate::analytics::types::{CognitiveLoad, ConfusionLevel};

/// Predictions and labels further apart than this are never paired.
pub const MATCH_WINDOW_SECS: f64 = 300.0;
/// Mastery above this counts as "mastered" for the binary metrics.
pub const MASTERY_THRESHOLD: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionMethod {
    SelfReport,
    ExpertAnnotation,
    TestScore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruth {
    pub timestamp: f64,
    pub learner_id: String,
    pub knowledge_point: String,
    pub cognitive_load: CognitiveLoad,
    pub confusion: ConfusionLevel,
    pub mastery: f64,
    pub succeeded: bool,
    pub score: f64,
    pub method: CollectionMethod,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PredictedValue {
    Mastery(f64),
    CognitiveLoad(CognitiveLoad),
    ConfusionScore(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PredictionKind {
    Mastery,
    CognitiveLoad,
    Confusion,
}

impl PredictedValue {
    fn kind(&self) -> PredictionKind {
        match self {
            Self::Mastery(_) => PredictionKind::Mastery,
            Self::CognitiveLoad(_) => PredictionKind::CognitiveLoad,
            Self::ConfusionScore(_) => PredictionKind::Confusion,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub timestamp: f64,
    pub learner_id: String,
    pub knowledge_point: String,
    pub value: PredictedValue,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub mse: f64,
    pub correlation: f64,
    pub sample_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    InsufficientData,
    Excellent,
    Good,
    NeedsImprovement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub ground_truth_samples: usize,
    pub prediction_samples: usize,
    pub evaluation_period_days: f64,
    pub mastery: EvaluationMetrics,
    pub mastery_verdict: Verdict,
    pub cognitive_load: EvaluationMetrics,
    pub confusion: EvaluationMetrics,
    pub state_verdict: Verdict,
}

#[derive(Debug, Clone, Default)]
pub struct OfflineEvaluator {
    ground_truth: Vec<GroundTruth>,
    predictions: Vec<PredictionRecord>,
}

impl OfflineEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_ground_truth(&mut self, record: GroundTruth) {
        self.ground_truth.push(record);
    }

    pub fn add_prediction(&mut self, record: PredictionRecord) {
        self.predictions.push(record);
    }

    fn matching(&self, truth: &GroundTruth, kind: PredictionKind) -> Option<&PredictedValue> {
        self.predictions
            .iter()
            .find(|p| {
                p.learner_id == truth.learner_id
                    && p.knowledge_point == truth.knowledge_point
                    && p.value.kind() == kind
                    && (p.timestamp - truth.timestamp).abs() < MATCH_WINDOW_SECS
            })
            .map(|p| &p.value)
    }

    pub fn evaluate_mastery(&self) -> EvaluationMetrics {
        let (truth, predicted): (Vec<f64>, Vec<f64>) = self
            .ground_truth
            .iter()
            .filter_map(|gt| match self.matching(gt, PredictionKind::Mastery) {
                Some(PredictedValue::Mastery(m)) => Some((gt.mastery, *m)),
                _ => None,
            })
            .unzip();
        if truth.is_empty() {
            tracing::warn!("no matched mastery predictions to evaluate");
            return EvaluationMetrics::default();
        }

        let truth_bin: Vec<bool> = truth.iter().map(|m| *m > MASTERY_THRESHOLD).collect();
        let pred_bin: Vec<bool> = predicted.iter().map(|m| *m > MASTERY_THRESHOLD).collect();
        let (precision, recall, f1_score) = binary_prf(&truth_bin, &pred_bin);

        EvaluationMetrics {
            accuracy: accuracy(&truth_bin, &pred_bin),
            precision,
            recall,
            f1_score,
            mse: mse(&truth, &predicted),
            correlation: pearson(&truth, &predicted),
            sample_size: truth.len(),
        }
    }

    pub fn evaluate_cognitive_load(&self) -> EvaluationMetrics {
        let (truth, predicted): (Vec<CognitiveLoad>, Vec<CognitiveLoad>) = self
            .ground_truth
            .iter()
            .filter_map(|gt| match self.matching(gt, PredictionKind::CognitiveLoad) {
                Some(PredictedValue::CognitiveLoad(load)) => Some((gt.cognitive_load, *load)),
                _ => None,
            })
            .unzip();
        if truth.is_empty() {
            return EvaluationMetrics::default();
        }

        let (precision, recall, f1_score) = weighted_prf(&truth, &predicted, &CognitiveLoad::ALL);
        EvaluationMetrics {
            accuracy: accuracy(&truth, &predicted),
            precision,
            recall,
            f1_score,
            sample_size: truth.len(),
            ..Default::default()
        }
    }

    pub fn evaluate_confusion(&self) -> EvaluationMetrics {
        let (truth, predicted): (Vec<f64>, Vec<f64>) = self
            .ground_truth
            .iter()
            .filter_map(|gt| match self.matching(gt, PredictionKind::Confusion) {
                Some(PredictedValue::ConfusionScore(s)) => Some((gt.confusion.nominal_score(), *s)),
                _ => None,
            })
            .unzip();
        if truth.is_empty() {
            return EvaluationMetrics::default();
        }
        EvaluationMetrics {
            mse: mse(&truth, &predicted),
            correlation: pearson(&truth, &predicted),
            sample_size: truth.len(),
            ..Default::default()
        }
    }

    fn evaluation_period_days(&self) -> f64 {
        let mut stamps = self.ground_truth.iter().map(|g| g.timestamp);
        let Some(first) = stamps.next() else {
            return 0.0;
        };
        let (lo, hi) = stamps.fold((first, first), |(lo, hi), t| (lo.min(t), hi.max(t)));
        (hi - lo) / 86_400.0
    }

    pub fn report(&self) -> EvaluationReport {
        let mastery = self.evaluate_mastery();
        let cognitive_load = self.evaluate_cognitive_load();
        let confusion = self.evaluate_confusion();

        let mastery_verdict = if mastery.sample_size == 0 {
            Verdict::InsufficientData
        } else if mastery.accuracy > 0.8 && mastery.correlation > 0.7 {
            Verdict::Excellent
        } else if mastery.accuracy > 0.6 && mastery.correlation > 0.5 {
            Verdict::Good
        } else {
            Verdict::NeedsImprovement
        };

        let state_verdict = if cognitive_load.sample_size == 0 {
            Verdict::InsufficientData
        } else if cognitive_load.accuracy > 0.75 {
            Verdict::Excellent
        } else if cognitive_load.accuracy > 0.6 {
            Verdict::Good
        } else {
            Verdict::NeedsImprovement
        };

        let report = EvaluationReport {
            ground_truth_samples: self.ground_truth.len(),
            prediction_samples: self.predictions.len(),
            evaluation_period_days: self.evaluation_period_days(),
            mastery,
            mastery_verdict,
            cognitive_load,
            confusion,
            state_verdict,
        };
        tracing::info!(
            samples = report.ground_truth_samples,
            mastery_accuracy = report.mastery.accuracy,
            load_accuracy = report.cognitive_load.accuracy,
            "offline evaluation complete"
        );
        report
    }
}

fn accuracy<T: PartialEq>(truth: &[T], predicted: &[T]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let hits = truth.iter().zip(predicted).filter(|(t, p)| t == p).count();
    hits as f64 / truth.len() as f64
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

fn f1(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

fn binary_prf(truth: &[bool], predicted: &[bool]) -> (f64, f64, f64) {
    let tp = truth.iter().zip(predicted).filter(|(t, p)| **t && **p).count();
    let fp = truth.iter().zip(predicted).filter(|(t, p)| !**t && **p).count();
    let fn_ = truth.iter().zip(predicted).filter(|(t, p)| **t && !**p).count();
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    (precision, recall, f1(precision, recall))
}

/// Per-class precision, recall and F1 averaged with weights proportional to true-class support.
fn weighted_prf<T: PartialEq + Copy>(truth: &[T], predicted: &[T], classes: &[T]) -> (f64, f64, f64) {
    let n = truth.len();
    if n == 0 {
        return (0.0, 0.0, 0.0);
    }
    let mut out = (0.0, 0.0, 0.0);
    for class in classes {
        let support = truth.iter().filter(|t| *t == class).count();
        if support == 0 {
            continue;
        }
        let tp = truth
            .iter()
            .zip(predicted)
            .filter(|(t, p)| *t == class && *p == class)
            .count();
        let predicted_pos = predicted.iter().filter(|p| *p == class).count();
        let precision = ratio(tp, predicted_pos);
        let recall = ratio(tp, support);
        let weight = support as f64 / n as f64;
        out.0 += weight * precision;
        out.1 += weight * recall;
        out.2 += weight * f1(precision, recall);
    }
    out
}

fn mse(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>() / a.len() as f64
}

/// Pearson correlation; 0 when undefined.
fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len();
    if n < 2 {
        return 0.0;
    }
    let ma = a.iter().sum::<f64>() / n as f64;
    let mb = b.iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for (x, y) in a.iter().zip(b) {
        cov += (x - ma) * (y - mb);
        va += (x - ma).powi(2);
        vb += (y - mb).powi(2);
    }
    let denom = (va * vb).sqrt();
    if denom <= f64::EPSILON {
        0.0
    } else {
        cov / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn truth(ts: f64, mastery: f64, load: CognitiveLoad, confusion: ConfusionLevel) -> GroundTruth {
        GroundTruth {
            timestamp: ts,
            learner_id: "s1".into(),
            knowledge_point: "loops".into(),
            cognitive_load: load,
            confusion,
            mastery,
            succeeded: mastery > 0.5,
            score: mastery,
            method: CollectionMethod::TestScore,
        }
    }

    fn prediction(ts: f64, value: PredictedValue) -> PredictionRecord {
        PredictionRecord {
            timestamp: ts,
            learner_id: "s1".into(),
            knowledge_point: "loops".into(),
            value,
        }
    }

    #[test]
    fn empty_evaluator_reports_insufficient_data() {
        let report = OfflineEvaluator::new().report();
        assert_eq!(report.mastery.sample_size, 0);
        assert_eq!(report.mastery_verdict, Verdict::InsufficientData);
        assert_eq!(report.evaluation_period_days, 0.0);
    }

    #[test]
    fn mastery_metrics_match_only_within_window() {
        let mut eval = OfflineEvaluator::new();
        eval.add_ground_truth(truth(1000.0, 0.9, CognitiveLoad::Low, ConfusionLevel::None));
        eval.add_ground_truth(truth(5000.0, 0.2, CognitiveLoad::High, ConfusionLevel::Severe));
        eval.add_prediction(prediction(1100.0, PredictedValue::Mastery(0.8)));
        eval.add_prediction(prediction(5200.0, PredictedValue::Mastery(0.7)));
        // outside the window
        eval.add_prediction(prediction(9000.0, PredictedValue::Mastery(0.1)));

        let m = eval.evaluate_mastery();
        assert_eq!(m.sample_size, 2);
        assert_eq!(m.accuracy, 0.5);
        assert_eq!(m.precision, 0.5);
        assert_eq!(m.recall, 1.0);
        assert!((m.mse - (0.01 + 0.25) / 2.0).abs() < 1e-12);
        assert!((m.correlation - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cognitive_load_uses_support_weighted_scores() {
        let mut eval = OfflineEvaluator::new();
        let cases = [
            (CognitiveLoad::Low, CognitiveLoad::Low),
            (CognitiveLoad::Low, CognitiveLoad::Low),
            (CognitiveLoad::High, CognitiveLoad::Low),
            (CognitiveLoad::High, CognitiveLoad::High),
        ];
        for (i, (t, p)) in cases.iter().enumerate() {
            let ts = i as f64 * 1000.0;
            eval.add_ground_truth(truth(ts, 0.5, *t, ConfusionLevel::None));
            eval.add_prediction(prediction(ts, PredictedValue::CognitiveLoad(*p)));
        }
        let m = eval.evaluate_cognitive_load();
        assert_eq!(m.accuracy, 0.75);
        // low: p=2/3 r=1; high: p=1 r=0.5; equal support
        assert!((m.precision - (2.0 / 3.0 + 1.0) / 2.0).abs() < 1e-12);
        assert!((m.recall - 0.75).abs() < 1e-12);
    }

    #[test]
    fn confusion_maps_buckets_to_scores() {
        let mut eval = OfflineEvaluator::new();
        eval.add_ground_truth(truth(0.0, 0.5, CognitiveLoad::Medium, ConfusionLevel::Severe));
        eval.add_prediction(prediction(10.0, PredictedValue::ConfusionScore(0.8)));
        let m = eval.evaluate_confusion();
        assert_eq!(m.sample_size, 1);
        assert!((m.mse - 0.01).abs() < 1e-12);
        assert_eq!(m.correlation, 0.0);
    }

    #[test]
    fn pearson_is_zero_for_constant_series() {
        assert_eq!(pearson(&[0.5, 0.5, 0.5], &[0.1, 0.2, 0.3]), 0.0);
    }
}
