use serde::{Deserialize, Serialize};

use crate::analytics::knowledge::BktParameters;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BktConfig {
    pub default_parameters: BktParameters,
    pub min_observations_for_fitting: usize,
    pub refit_interval: usize,
    pub well_mastered_threshold: f64,
    pub struggling_threshold: f64,
    pub unknown_point_mastery: f64,
}

impl Default for BktConfig {
    fn default() -> Self {
        Self {
            default_parameters: BktParameters::default(),
            min_observations_for_fitting: 10,
            refit_interval: 20,
            well_mastered_threshold: 0.8,
            struggling_threshold: 0.3,
            unknown_point_mastery: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimatorConfig {
    pub initial_guess: [f64; 4],
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub out_of_bounds_penalty: f64,
    pub min_observations: usize,
    pub max_iterations: usize,
    pub history_size: usize,
    pub gradient_tolerance: f64,
    pub function_tolerance: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            initial_guess: [0.1, 0.3, 0.1, 0.1],
            lower_bound: 0.01,
            upper_bound: 0.99,
            out_of_bounds_penalty: 1e6,
            min_observations: 10,
            max_iterations: 200,
            history_size: 10,
            gradient_tolerance: 1e-5,
            function_tolerance: 2.2e-9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub select_k: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self { select_k: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestConfig {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: 50,
            max_depth: 10,
            min_samples_split: 2,
            min_samples_leaf: 1,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadRuleWeights {
    pub edit_frequency: f64,
    pub error_rate: f64,
    pub pause: f64,
    pub edit_frequency_scale: f64,
    pub pause_scale_secs: f64,
    pub high_threshold: f64,
    pub medium_threshold: f64,
}

impl Default for LoadRuleWeights {
    fn default() -> Self {
        Self {
            edit_frequency: 0.3,
            error_rate: 0.4,
            pause: 0.3,
            edit_frequency_scale: 10.0,
            pause_scale_secs: 30.0,
            high_threshold: 0.7,
            medium_threshold: 0.4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfusionRuleWeights {
    pub help_frequency: f64,
    pub error_rate: f64,
    pub edit_variance: f64,
    pub help_frequency_scale: f64,
}

impl Default for ConfusionRuleWeights {
    fn default() -> Self {
        Self {
            help_frequency: 0.4,
            error_rate: 0.4,
            edit_variance: 0.2,
            help_frequency_scale: 3.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorConfig {
    pub min_training_samples: usize,
    pub rule_confidence: f64,
    pub cv_folds: usize,
    pub load_rule: LoadRuleWeights,
    pub confusion_rule: ConfusionRuleWeights,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            min_training_samples: 10,
            rule_confidence: 0.5,
            cv_folds: 5,
            load_rule: LoadRuleWeights::default(),
            confusion_rule: ConfusionRuleWeights::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    pub severe_cutoff: f64,
    pub moderate_cutoff: f64,
    pub slight_cutoff: f64,
    pub max_recommendations: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            severe_cutoff: 0.7,
            moderate_cutoff: 0.5,
            slight_cutoff: 0.2,
            max_recommendations: 5,
        }
    }
}

/// Hand-tuned heuristics for the rule-based behavior evaluator.
/// None of these values come with calibration data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeuristicThresholds {
    pub evaluation_window_secs: f64,
    pub confusion_error_count: usize,
    pub frustration_window_secs: f64,
    /// Failed submissions without a success that raise frustration to low, medium, high.
    pub frustration_failure_steps: [usize; 3],
    pub burst_error_count: usize,
    pub burst_window_secs: f64,
    pub idle_medium_secs: f64,
    pub idle_low_secs: f64,
}

impl Default for HeuristicThresholds {
    fn default() -> Self {
        Self {
            evaluation_window_secs: 300.0,
            confusion_error_count: 3,
            frustration_window_secs: 60.0,
            frustration_failure_steps: [2, 3, 4],
            burst_error_count: 4,
            burst_window_secs: 120.0,
            idle_medium_secs: 120.0,
            idle_low_secs: 300.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub save_interval_secs: u64,
    pub train_sample_threshold: usize,
    pub max_buffer_size: usize,
    pub behavior_log_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            save_interval_secs: 60,
            train_sample_threshold: 20,
            max_buffer_size: 500,
            behavior_log_capacity: 1000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    pub bkt: BktConfig,
    pub estimator: EstimatorConfig,
    pub features: FeatureConfig,
    pub forest: ForestConfig,
    pub predictor: PredictorConfig,
    pub fusion: FusionConfig,
    pub heuristics: HeuristicThresholds,
    pub scheduler: SchedulerConfig,
}

impl AnalyticsConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = env_parse::<usize>("BKT_MIN_OBSERVATIONS") {
            config.bkt.min_observations_for_fitting = val;
        }
        if let Some(val) = env_parse::<usize>("BKT_REFIT_INTERVAL") {
            config.bkt.refit_interval = val.max(1);
        }
        if let Some(val) = env_parse::<usize>("FEATURE_SELECT_K") {
            config.features.select_k = val.max(1);
        }
        if let Some(val) = env_parse::<usize>("FOREST_ESTIMATORS") {
            config.forest.n_estimators = val.max(1);
        }
        if let Some(val) = env_parse::<u64>("FOREST_SEED") {
            config.forest.seed = val;
        }
        if let Some(val) = env_parse::<usize>("PREDICTOR_MIN_SAMPLES") {
            config.predictor.min_training_samples = val;
        }
        if let Some(val) = env_parse::<u64>("SAVE_INTERVAL_SECS") {
            config.scheduler.save_interval_secs = val;
        }
        if let Some(val) = env_parse::<usize>("TRAIN_SAMPLE_THRESHOLD") {
            config.scheduler.train_sample_threshold = val.max(1);
        }
        if let Some(val) = env_parse::<usize>("MAX_BUFFER_SIZE") {
            config.scheduler.max_buffer_size = val.max(1);
        }
        if let Some(val) = env_parse::<usize>("CONFUSION_ERROR_COUNT") {
            config.heuristics.confusion_error_count = val.max(1);
        }
        if let Some(val) = env_parse::<f64>("FRUSTRATION_WINDOW_SECS") {
            config.heuristics.frustration_window_secs = val;
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
