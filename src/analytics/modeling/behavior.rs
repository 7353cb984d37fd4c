//! Behavior event log and the aggregated signals derived from it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::analytics::scheduler::RingBuffer;
use crate::analytics::knowledge::tracker::population_variance;

const RAPID_EDIT_PER_MIN: f64 = 10.0;
const LONG_PAUSE_SECS: f64 = 15.0;
const HIGH_HELP_PER_MIN: f64 = 2.0;
const ERROR_CLUSTER_GAP_SECS: f64 = 30.0;
const SUSTAINED_ACTIVITY_PER_MIN: f64 = 5.0;

const CODE_QUERY_KEYWORDS: [&str; 5] = ["code", "syntax", "implement", "how to write", "example"];
const CONCEPT_QUERY_KEYWORDS: [&str; 5] = ["what is", "why", "concept", "understand", "explain"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CodeEdit,
    CodeDelete,
    CodePaste,
    PauseStart,
    PauseEnd,
    CursorMove,
    ErrorOccurred,
    ErrorFixed,
    HelpRequest,
    AiChat,
    CodeExecute,
    TaskStart,
    TaskComplete,
    TaskAbandon,
    CodeSubmission,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CodeEdit => "code_edit",
            Self::CodeDelete => "code_delete",
            Self::CodePaste => "code_paste",
            Self::PauseStart => "pause_start",
            Self::PauseEnd => "pause_end",
            Self::CursorMove => "cursor_move",
            Self::ErrorOccurred => "error_occurred",
            Self::ErrorFixed => "error_fixed",
            Self::HelpRequest => "help_request",
            Self::AiChat => "ai_chat",
            Self::CodeExecute => "code_execute",
            Self::TaskStart => "task_start",
            Self::TaskComplete => "task_complete",
            Self::TaskAbandon => "task_abandon",
            Self::CodeSubmission => "code_submission",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::CodeEdit | Self::CodeExecute | Self::AiChat)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorEvent {
    pub timestamp: f64,
    pub session_id: String,
    pub kind: EventKind,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub edit_length: Option<u32>,
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub help_query: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub success: Option<bool>,
}

impl BehaviorEvent {
    pub fn new(timestamp: f64, session_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            timestamp,
            session_id: session_id.into(),
            kind,
            duration: None,
            edit_length: None,
            error_type: None,
            help_query: None,
            task_id: None,
            success: None,
        }
    }

    pub fn edit(timestamp: f64, session_id: impl Into<String>, edit_length: u32) -> Self {
        let mut event = Self::new(timestamp, session_id, EventKind::CodeEdit);
        event.edit_length = Some(edit_length);
        event
    }

    pub fn pause(timestamp: f64, session_id: impl Into<String>, duration: f64) -> Self {
        let mut event = Self::new(timestamp, session_id, EventKind::PauseEnd);
        event.duration = Some(duration.max(0.0));
        event
    }

    pub fn error(timestamp: f64, session_id: impl Into<String>, error_type: impl Into<String>) -> Self {
        let mut event = Self::new(timestamp, session_id, EventKind::ErrorOccurred);
        event.error_type = Some(error_type.into());
        event
    }

    pub fn help(timestamp: f64, session_id: impl Into<String>, query: impl Into<String>) -> Self {
        let mut event = Self::new(timestamp, session_id, EventKind::HelpRequest);
        event.help_query = Some(query.into());
        event
    }

    pub fn submission(timestamp: f64, session_id: impl Into<String>, task_id: impl Into<String>, success: bool) -> Self {
        let mut event = Self::new(timestamp, session_id, EventKind::CodeSubmission);
        event.task_id = Some(task_id.into());
        event.success = Some(success);
        event
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PauseCategory {
    Brief,
    Thinking,
    Confused,
    Distracted,
}

pub fn categorize_pause(duration: f64) -> PauseCategory {
    if duration < 2.0 {
        PauseCategory::Brief
    } else if duration < 10.0 {
        PauseCategory::Thinking
    } else if duration < 30.0 {
        PauseCategory::Confused
    } else {
        PauseCategory::Distracted
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CognitiveLoadSignals {
    pub edit_frequency: f64,
    pub avg_pause_duration: f64,
    pub error_rate: f64,
    pub rapid_editing: bool,
    pub long_pauses: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfusionSignals {
    pub help_frequency: f64,
    pub error_clustering: bool,
    pub edit_randomness: f64,
    pub high_help_seeking: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementSignals {
    pub activity_ratio: f64,
    pub activity_density: f64,
    pub sustained_engagement: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceSignals {
    pub prefers_code_examples: f64,
    pub prefers_explanations: f64,
}

/// Signals extracted from a recent window of behavior. A group is absent when
/// the window holds none of the events it is computed from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningSignals {
    pub cognitive_load: Option<CognitiveLoadSignals>,
    pub confusion: Option<ConfusionSignals>,
    pub engagement: Option<EngagementSignals>,
    pub preference: Option<PreferenceSignals>,
}

impl LearningSignals {
    pub fn is_empty(&self) -> bool {
        self.cognitive_load.is_none()
            && self.confusion.is_none()
            && self.engagement.is_none()
            && self.preference.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorLog {
    events: RingBuffer<BehaviorEvent>,
}

impl Default for BehaviorLog {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl BehaviorLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: RingBuffer::new(capacity),
        }
    }

    pub fn record(&mut self, event: BehaviorEvent) {
        if let Some(evicted) = self.events.push(event) {
            tracing::trace!(session_id = %evicted.session_id, "behavior log full, oldest event evicted");
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> impl Iterator<Item = &BehaviorEvent> {
        self.events.iter()
    }

    pub fn last_timestamp(&self) -> Option<f64> {
        self.events.last().map(|e| e.timestamp)
    }

    pub fn session_events(&self, session_id: &str) -> Vec<&BehaviorEvent> {
        self.events.iter().filter(|e| e.session_id == session_id).collect()
    }

    pub fn recent_events(&self, now: f64, window_secs: f64) -> Vec<&BehaviorEvent> {
        self.events
            .iter()
            .filter(|e| now - e.timestamp <= window_secs)
            .collect()
    }

    /// Flat numeric summary of one session. Empty when the session has no events.
    pub fn session_summary(&self, session_id: &str) -> HashMap<String, f64> {
        let events = self.session_events(session_id);
        let mut summary = HashMap::new();
        let Some((start, end)) = time_span(&events) else {
            return summary;
        };

        let duration = end - start;
        let minutes = (duration / 60.0).max(1.0);

        let edits: Vec<&BehaviorEvent> = of_kind(&events, EventKind::CodeEdit);
        let pauses: Vec<f64> = of_kind(&events, EventKind::PauseEnd)
            .iter()
            .map(|e| e.duration.unwrap_or(0.0))
            .collect();
        let errors = of_kind(&events, EventKind::ErrorOccurred);
        let helps = of_kind(&events, EventKind::HelpRequest);
        let active = events.iter().filter(|e| e.kind.is_active()).count();
        let edit_chars: f64 = edits.iter().map(|e| e.edit_length.unwrap_or(0) as f64).sum();

        summary.insert("timestamp".into(), end);
        summary.insert("session_duration".into(), duration);
        summary.insert("total_events".into(), events.len() as f64);
        summary.insert("edit_frequency".into(), edits.len() as f64 / minutes);
        summary.insert("edit_chars_per_minute".into(), edit_chars / minutes);
        summary.insert("avg_pause_duration".into(), mean(&pauses));
        summary.insert("pause_variance".into(), population_variance(&pauses));
        summary.insert("error_rate".into(), errors.len() as f64 / edits.len().max(1) as f64);
        summary.insert("help_frequency".into(), helps.len() as f64 / minutes);
        summary.insert("activity_ratio".into(), active as f64 / events.len() as f64);
        summary.insert("activity_density".into(), active as f64 / minutes);
        summary.insert("edit_variance".into(), edit_variance(&edits));
        summary.insert(
            "error_clustering".into(),
            if errors_clustered(&errors) { 1.0 } else { 0.0 },
        );
        summary
    }

    pub fn learning_signals(&self, now: f64, window_secs: f64) -> LearningSignals {
        let events = self.recent_events(now, window_secs);
        let Some((start, end)) = time_span(&events) else {
            return LearningSignals::default();
        };
        let duration = end - start;
        let minutes = (duration / 60.0).max(1.0);

        let edits = of_kind(&events, EventKind::CodeEdit);
        let errors = of_kind(&events, EventKind::ErrorOccurred);
        let helps = of_kind(&events, EventKind::HelpRequest);

        let (cognitive_load, confusion) = if edits.is_empty() {
            (None, None)
        } else {
            let pauses: Vec<f64> = of_kind(&events, EventKind::PauseEnd)
                .iter()
                .map(|e| e.duration.unwrap_or(0.0))
                .collect();
            let edit_frequency = edits.len() as f64 / minutes;
            let avg_pause_duration = mean(&pauses);
            let help_frequency = helps.len() as f64 / minutes;
            (
                Some(CognitiveLoadSignals {
                    edit_frequency,
                    avg_pause_duration,
                    error_rate: errors.len() as f64 / edits.len() as f64,
                    rapid_editing: edit_frequency > RAPID_EDIT_PER_MIN,
                    long_pauses: avg_pause_duration > LONG_PAUSE_SECS,
                }),
                Some(ConfusionSignals {
                    help_frequency,
                    error_clustering: errors_clustered(&errors),
                    edit_randomness: edit_variance(&edits),
                    high_help_seeking: help_frequency > HIGH_HELP_PER_MIN,
                }),
            )
        };

        let active = events.iter().filter(|e| e.kind.is_active()).count() as f64;
        let activity_density = active / minutes;
        let engagement = Some(EngagementSignals {
            activity_ratio: active / events.len() as f64,
            activity_density,
            sustained_engagement: activity_density > SUSTAINED_ACTIVITY_PER_MIN,
        });

        let preference = (!helps.is_empty()).then(|| {
            let mut code = 0usize;
            let mut concept = 0usize;
            for event in &helps {
                let query = event.help_query.as_deref().unwrap_or_default().to_lowercase();
                if CODE_QUERY_KEYWORDS.iter().any(|k| query.contains(k)) {
                    code += 1;
                } else if CONCEPT_QUERY_KEYWORDS.iter().any(|k| query.contains(k)) {
                    concept += 1;
                }
            }
            PreferenceSignals {
                prefers_code_examples: code as f64 / helps.len() as f64,
                prefers_explanations: concept as f64 / helps.len() as f64,
            }
        });

        LearningSignals {
            cognitive_load,
            confusion,
            engagement,
            preference,
        }
    }
}

fn time_span(events: &[&BehaviorEvent]) -> Option<(f64, f64)> {
    let first = events.first()?.timestamp;
    Some(events.iter().fold((first, first), |(lo, hi), e| {
        (lo.min(e.timestamp), hi.max(e.timestamp))
    }))
}

fn of_kind<'a>(events: &[&'a BehaviorEvent], kind: EventKind) -> Vec<&'a BehaviorEvent> {
    events.iter().copied().filter(|e| e.kind == kind).collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Edit-length variance scaled by 100 and capped at 1.
fn edit_variance(edits: &[&BehaviorEvent]) -> f64 {
    if edits.len() < 2 {
        return 0.0;
    }
    let lengths: Vec<f64> = edits.iter().map(|e| e.edit_length.unwrap_or(0) as f64).collect();
    (population_variance(&lengths) / 100.0).min(1.0)
}

fn errors_clustered(errors: &[&BehaviorEvent]) -> bool {
    if errors.len() < 2 {
        return false;
    }
    let gaps: Vec<f64> = errors
        .windows(2)
        .map(|w| w[1].timestamp - w[0].timestamp)
        .collect();
    mean(&gaps) < ERROR_CLUSTER_GAP_SECS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_log() -> BehaviorLog {
        let mut log = BehaviorLog::new(100);
        log.record(BehaviorEvent::edit(0.0, "s1", 10));
        log.record(BehaviorEvent::edit(20.0, "s1", 30));
        log.record(BehaviorEvent::pause(40.0, "s1", 12.0));
        log.record(BehaviorEvent::error(50.0, "s1", "TypeError"));
        log.record(BehaviorEvent::help(60.0, "s1", "How to write a grid template?"));
        log.record(BehaviorEvent::edit(120.0, "s1", 20));
        log.record(BehaviorEvent::edit(5.0, "other", 3));
        log
    }

    #[test]
    fn session_summary_metrics() {
        let summary = sample_log().session_summary("s1");
        assert_eq!(summary["session_duration"], 120.0);
        assert_eq!(summary["total_events"], 6.0);
        assert!((summary["edit_frequency"] - 1.5).abs() < 1e-12);
        assert!((summary["error_rate"] - 1.0 / 3.0).abs() < 1e-12);
        assert!((summary["avg_pause_duration"] - 12.0).abs() < 1e-12);
        assert!((summary["activity_ratio"] - 0.5).abs() < 1e-12);
        assert_eq!(summary["timestamp"], 120.0);
    }

    #[test]
    fn unknown_session_is_empty() {
        assert!(sample_log().session_summary("missing").is_empty());
    }

    #[test]
    fn ring_capacity_bounds_the_log() {
        let mut log = BehaviorLog::new(3);
        for i in 0..10 {
            log.record(BehaviorEvent::edit(i as f64, "s", 1));
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.events().next().map(|e| e.timestamp), Some(7.0));
    }

    #[test]
    fn learning_signals_group_by_concern() {
        let signals = sample_log().learning_signals(120.0, 300.0);
        let load = signals.cognitive_load.unwrap();
        assert!(!load.rapid_editing);
        let preference = signals.preference.unwrap();
        assert_eq!(preference.prefers_code_examples, 1.0);
        assert!(signals.engagement.is_some());
    }

    #[test]
    fn pause_categories() {
        assert_eq!(categorize_pause(1.0), PauseCategory::Brief);
        assert_eq!(categorize_pause(5.0), PauseCategory::Thinking);
        assert_eq!(categorize_pause(20.0), PauseCategory::Confused);
        assert_eq!(categorize_pause(45.0), PauseCategory::Distracted);
    }
}
