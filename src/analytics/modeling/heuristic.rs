use serde::{Deserialize, Serialize};

use crate::analytics::config::HeuristicThresholds;
use crate::analytics::modeling::behavior::{BehaviorEvent, BehaviorLog, EventKind};
use crate::analytics::types::{ConfusionLevel, FrustrationLevel};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeuristicAssessment {
    pub confusion: ConfusionLevel,
    pub frustration: FrustrationLevel,
    pub error_burst: bool,
    pub failed_submissions: usize,
    pub successful_submissions: usize,
}

/// Rule-based confusion and frustration from recent code submissions on one task.
pub fn evaluate_submissions(
    log: &BehaviorLog,
    task_id: &str,
    now: f64,
    thresholds: &HeuristicThresholds,
) -> HeuristicAssessment {
    let mut submissions: Vec<&BehaviorEvent> = log
        .events()
        .filter(|e| e.kind == EventKind::CodeSubmission)
        .filter(|e| e.task_id.as_deref() == Some(task_id))
        .filter(|e| now - e.timestamp <= thresholds.evaluation_window_secs)
        .collect();
    submissions.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

    let failures: Vec<f64> = submissions
        .iter()
        .filter(|e| e.success == Some(false))
        .map(|e| e.timestamp)
        .collect();
    let successes = submissions.iter().filter(|e| e.success == Some(true)).count();

    let mut assessment = HeuristicAssessment {
        failed_submissions: failures.len(),
        successful_submissions: successes,
        ..Default::default()
    };

    if successes == 0 {
        if failures.len() >= thresholds.confusion_error_count {
            assessment.confusion = ConfusionLevel::Severe;
        } else if !failures.is_empty() {
            assessment.confusion = ConfusionLevel::Moderate;
        }

        let [low, medium, high] = thresholds.frustration_failure_steps;
        assessment.frustration = match failures.len() {
            n if n >= high => FrustrationLevel::High,
            n if n >= medium => FrustrationLevel::Medium,
            n if n >= low => FrustrationLevel::Low,
            _ => FrustrationLevel::None,
        };
    }

    if let [.., previous, last] = failures.as_slice() {
        if last - previous < thresholds.frustration_window_secs {
            assessment.frustration = FrustrationLevel::High;
            let n = thresholds.burst_error_count;
            if n >= 2 && failures.len() >= n {
                let burst_start = failures[failures.len() - n];
                assessment.error_burst = last - burst_start < thresholds.burst_window_secs;
            }
        }
    }

    if assessment.confusion.is_troubled() || assessment.frustration != FrustrationLevel::None {
        tracing::debug!(
            task_id = %task_id,
            confusion = assessment.confusion.as_str(),
            frustration = assessment.frustration.as_str(),
            error_burst = assessment.error_burst,
            "heuristic state evaluated"
        );
    }

    assessment
}
