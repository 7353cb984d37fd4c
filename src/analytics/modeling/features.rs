//! Fixed-schema feature vectors plus the scaling/selection pipeline in front of the predictors.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Datelike, Timelike};
use serde::{Deserialize, Serialize};

use crate::analytics::config::FeatureConfig;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FeatureError {
    #[error("feature pipeline used before fit_transform")]
    NotFitted,
    #[error("expected {expected} rows/columns, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("no feature rows supplied")]
    EmptyInput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureVector {
    pub edit_frequency: f64,
    pub edit_chars_per_minute: f64,
    pub avg_pause_duration: f64,
    pub pause_variance: f64,
    pub error_rate: f64,
    pub help_frequency: f64,
    pub session_duration: f64,
    pub activity_ratio: f64,
    pub activity_density: f64,
    pub edit_variance: f64,
    pub error_clustering: f64,
    pub historical_success_rate: f64,
    pub avg_response_time: f64,
    pub task_difficulty: f64,
    pub hint_usage_rate: f64,
    pub recent_attempts: f64,
    pub idle_time: f64,
    pub time_of_day: f64,
    pub day_of_week: f64,
}

impl Default for FeatureVector {
    fn default() -> Self {
        Self {
            edit_frequency: 0.0,
            edit_chars_per_minute: 0.0,
            avg_pause_duration: 0.0,
            pause_variance: 0.0,
            error_rate: 0.0,
            help_frequency: 0.0,
            session_duration: 0.0,
            activity_ratio: 0.0,
            activity_density: 0.0,
            edit_variance: 0.0,
            error_clustering: 0.0,
            historical_success_rate: 0.5,
            avg_response_time: 30.0,
            task_difficulty: 0.5,
            hint_usage_rate: 0.0,
            recent_attempts: 0.0,
            idle_time: 0.0,
            time_of_day: 0.5,
            day_of_week: 0.0,
        }
    }
}

impl FeatureVector {
    pub const DIM: usize = 19;

    pub const NAMES: [&'static str; Self::DIM] = [
        "edit_frequency",
        "edit_chars_per_minute",
        "avg_pause_duration",
        "pause_variance",
        "error_rate",
        "help_frequency",
        "session_duration",
        "activity_ratio",
        "activity_density",
        "edit_variance",
        "error_clustering",
        "historical_success_rate",
        "avg_response_time",
        "task_difficulty",
        "hint_usage_rate",
        "recent_attempts",
        "idle_time",
        "time_of_day",
        "day_of_week",
    ];

    pub fn to_array(&self) -> [f64; Self::DIM] {
        [
            self.edit_frequency,
            self.edit_chars_per_minute,
            self.avg_pause_duration,
            self.pause_variance,
            self.error_rate,
            self.help_frequency,
            self.session_duration,
            self.activity_ratio,
            self.activity_density,
            self.edit_variance,
            self.error_clustering,
            self.historical_success_rate,
            self.avg_response_time,
            self.task_difficulty,
            self.hint_usage_rate,
            self.recent_attempts,
            self.idle_time,
            self.time_of_day,
            self.day_of_week,
        ]
    }

    fn slot(&mut self, name: &str) -> Option<&mut f64> {
        let slot = match name {
            "edit_frequency" => &mut self.edit_frequency,
            "edit_chars_per_minute" => &mut self.edit_chars_per_minute,
            "avg_pause_duration" => &mut self.avg_pause_duration,
            "pause_variance" => &mut self.pause_variance,
            "error_rate" => &mut self.error_rate,
            "help_frequency" => &mut self.help_frequency,
            "session_duration" => &mut self.session_duration,
            "activity_ratio" => &mut self.activity_ratio,
            "activity_density" => &mut self.activity_density,
            "edit_variance" => &mut self.edit_variance,
            "error_clustering" => &mut self.error_clustering,
            "historical_success_rate" => &mut self.historical_success_rate,
            "avg_response_time" => &mut self.avg_response_time,
            "task_difficulty" => &mut self.task_difficulty,
            "hint_usage_rate" => &mut self.hint_usage_rate,
            "recent_attempts" => &mut self.recent_attempts,
            "idle_time" => &mut self.idle_time,
            "time_of_day" => &mut self.time_of_day,
            "day_of_week" => &mut self.day_of_week,
            _ => return None,
        };
        Some(slot)
    }

    /// Overwrites every known key; unknown keys and non-finite values are ignored.
    pub fn apply(&mut self, signals: &HashMap<String, f64>) {
        for (key, value) in signals {
            if !value.is_finite() {
                continue;
            }
            if let Some(slot) = self.slot(key) {
                *slot = *value;
            }
        }
    }

    /// Clamps rates into [0,1] and magnitudes to be non-negative.
    pub fn sanitized(mut self) -> Self {
        for rate in [
            &mut self.error_rate,
            &mut self.activity_ratio,
            &mut self.edit_variance,
            &mut self.error_clustering,
            &mut self.historical_success_rate,
            &mut self.task_difficulty,
            &mut self.hint_usage_rate,
            &mut self.time_of_day,
            &mut self.day_of_week,
        ] {
            *rate = rate.clamp(0.0, 1.0);
        }
        for magnitude in [
            &mut self.edit_frequency,
            &mut self.edit_chars_per_minute,
            &mut self.avg_pause_duration,
            &mut self.pause_variance,
            &mut self.help_frequency,
            &mut self.session_duration,
            &mut self.activity_density,
            &mut self.avg_response_time,
            &mut self.recent_attempts,
            &mut self.idle_time,
        ] {
            *magnitude = magnitude.max(0.0);
        }
        self
    }
}

/// Which labels accompany a fit; decides whether univariate selection runs.
#[derive(Debug, Clone, Copy)]
pub enum Labels<'a> {
    Absent,
    Classes(&'a [usize]),
    Values(&'a [f64]),
}

impl Labels<'_> {
    fn len(&self) -> Option<usize> {
        match self {
            Self::Absent => None,
            Self::Classes(c) => Some(c.len()),
            Self::Values(v) => Some(v.len()),
        }
    }

    fn is_degenerate(&self) -> bool {
        match self {
            Self::Absent => true,
            Self::Classes(c) => c.iter().collect::<BTreeSet<_>>().len() < 2,
            Self::Values(v) => v.windows(2).all(|w| w[0] == w[1]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    fn fit(rows: &[[f64; FeatureVector::DIM]]) -> Self {
        let n = rows.len() as f64;
        let mut mean = vec![0.0; FeatureVector::DIM];
        let mut scale = vec![1.0; FeatureVector::DIM];
        for j in 0..FeatureVector::DIM {
            let m = rows.iter().map(|r| r[j]).sum::<f64>() / n;
            let var = rows.iter().map(|r| (r[j] - m).powi(2)).sum::<f64>() / n;
            mean[j] = m;
            // constant columns pass through centred
            scale[j] = if var > 0.0 { var.sqrt() } else { 1.0 };
        }
        Self { mean, scale }
    }

    fn transform(&self, row: &[f64; FeatureVector::DIM]) -> Vec<f64> {
        row.iter()
            .enumerate()
            .map(|(j, x)| (x - self.mean[j]) / self.scale[j])
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureEngineer {
    config: FeatureConfig,
    scaler: Option<StandardScaler>,
    selected: Option<Vec<usize>>,
    scores: Option<Vec<f64>>,
}

impl Default for FeatureEngineer {
    fn default() -> Self {
        Self::new(FeatureConfig::default())
    }
}

impl FeatureEngineer {
    pub fn new(config: FeatureConfig) -> Self {
        Self {
            config,
            scaler: None,
            selected: None,
            scores: None,
        }
    }

    /// Builds a vector from session aggregates, then lets point-in-time behavior
    /// signals override them. A `timestamp` key drives the calendar features.
    pub fn extract(behavior: &HashMap<String, f64>, session: &HashMap<String, f64>) -> FeatureVector {
        let mut vector = FeatureVector::default();
        vector.apply(session);
        vector.apply(behavior);

        let timestamp = behavior
            .get("timestamp")
            .or_else(|| session.get("timestamp"))
            .copied()
            .filter(|t| t.is_finite());
        if let Some(dt) = timestamp.and_then(|t| DateTime::from_timestamp(t.floor() as i64, 0)) {
            vector.time_of_day = dt.hour() as f64 / 24.0;
            vector.day_of_week = dt.weekday().num_days_from_monday() as f64 / 6.0;
        }

        vector.sanitized()
    }

    pub fn is_fitted(&self) -> bool {
        self.scaler.is_some()
    }

    pub fn fit_transform(&mut self, features: &[FeatureVector], labels: Labels<'_>) -> Result<Vec<Vec<f64>>, FeatureError> {
        if features.is_empty() {
            return Err(FeatureError::EmptyInput);
        }
        if let Some(len) = labels.len() {
            if len != features.len() {
                return Err(FeatureError::DimensionMismatch {
                    expected: features.len(),
                    actual: len,
                });
            }
        }

        let rows: Vec<[f64; FeatureVector::DIM]> = features.iter().map(FeatureVector::to_array).collect();
        let scaler = StandardScaler::fit(&rows);
        let scaled: Vec<Vec<f64>> = rows.iter().map(|r| scaler.transform(r)).collect();
        self.scaler = Some(scaler);

        if labels.is_degenerate() {
            tracing::debug!(rows = features.len(), "labels degenerate, feature selection skipped");
            self.selected = None;
            self.scores = None;
            return Ok(scaled);
        }

        let scores: Vec<f64> = (0..FeatureVector::DIM)
            .map(|j| {
                let column: Vec<f64> = scaled.iter().map(|r| r[j]).collect();
                let score = match labels {
                    Labels::Classes(classes) => anova_f(&column, classes),
                    Labels::Values(values) => f_regression(&column, values),
                    Labels::Absent => 0.0,
                };
                if score.is_nan() { 0.0 } else { score.min(f64::MAX) }
            })
            .collect();

        let k = self.config.select_k.clamp(1, FeatureVector::DIM);
        let mut ranked: Vec<usize> = (0..FeatureVector::DIM).collect();
        ranked.sort_by(|a, b| scores[*b].total_cmp(&scores[*a]).then(a.cmp(b)));
        let mut selected: Vec<usize> = ranked.into_iter().take(k).collect();
        selected.sort_unstable();

        let output = scaled
            .iter()
            .map(|row| selected.iter().map(|j| row[*j]).collect())
            .collect();
        self.selected = Some(selected);
        self.scores = Some(scores);
        Ok(output)
    }

    pub fn transform(&self, features: &[FeatureVector]) -> Result<Vec<Vec<f64>>, FeatureError> {
        features.iter().map(|f| self.transform_one(f)).collect()
    }

    pub fn transform_one(&self, feature: &FeatureVector) -> Result<Vec<f64>, FeatureError> {
        let scaler = self.scaler.as_ref().ok_or(FeatureError::NotFitted)?;
        let scaled = scaler.transform(&feature.to_array());
        Ok(match &self.selected {
            Some(selected) => selected.iter().map(|j| scaled[*j]).collect(),
            None => scaled,
        })
    }

    pub fn output_dim(&self) -> usize {
        self.selected
            .as_ref()
            .map(Vec::len)
            .unwrap_or(FeatureVector::DIM)
    }

    /// Names of the columns `transform` emits, in order.
    pub fn output_names(&self) -> Vec<&'static str> {
        match &self.selected {
            Some(selected) => selected.iter().map(|j| FeatureVector::NAMES[*j]).collect(),
            None => FeatureVector::NAMES.to_vec(),
        }
    }

    pub fn selection_scores(&self) -> Option<&[f64]> {
        self.scores.as_deref()
    }
}

/// One-way ANOVA F statistic of one column against class labels.
fn anova_f(column: &[f64], classes: &[usize]) -> f64 {
    let n = column.len();
    let mut groups: HashMap<usize, Vec<f64>> = HashMap::new();
    for (x, c) in column.iter().zip(classes) {
        groups.entry(*c).or_default().push(*x);
    }
    let k = groups.len();
    if k < 2 || n <= k {
        return 0.0;
    }

    let grand_mean = column.iter().sum::<f64>() / n as f64;
    let mut ss_between = 0.0;
    let mut ss_within = 0.0;
    for values in groups.values() {
        let m = values.iter().sum::<f64>() / values.len() as f64;
        ss_between += values.len() as f64 * (m - grand_mean).powi(2);
        ss_within += values.iter().map(|x| (x - m).powi(2)).sum::<f64>();
    }

    let between = ss_between / (k - 1) as f64;
    let within = ss_within / (n - k) as f64;
    if within > 0.0 {
        between / within
    } else if between > 0.0 {
        // perfect separation; kept finite so fitted state serializes
        f64::MAX
    } else {
        0.0
    }
}

/// Univariate linear-regression F statistic of one column against a target.
fn f_regression(column: &[f64], target: &[f64]) -> f64 {
    let n = column.len();
    if n < 3 {
        return 0.0;
    }
    let mx = column.iter().sum::<f64>() / n as f64;
    let my = target.iter().sum::<f64>() / n as f64;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (x, y) in column.iter().zip(target) {
        sxy += (x - mx) * (y - my);
        sxx += (x - mx).powi(2);
        syy += (y - my).powi(2);
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return 0.0;
    }
    let r2 = (sxy * sxy / (sxx * syy)).min(1.0);
    if r2 >= 1.0 {
        return f64::MAX;
    }
    r2 / (1.0 - r2) * (n - 2) as f64
}
