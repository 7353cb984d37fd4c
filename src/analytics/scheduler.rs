use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::analytics::config::SchedulerConfig;
use crate::analytics::modeling::FeatureVector;
use crate::analytics::types::CognitiveLoad;

/// Fixed-capacity FIFO; pushing into a full buffer evicts the oldest entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RingBuffer<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Drops the oldest entries until at most `max_len` remain. Returns how many were dropped.
    pub fn truncate_oldest(&mut self, max_len: usize) -> usize {
        let excess = self.items.len().saturating_sub(max_len);
        self.items.drain(..excess);
        excess
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// A weakly labelled (features, outcome) pair for the state predictors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSample {
    pub features: FeatureVector,
    pub cognitive_load: CognitiveLoad,
    pub confusion_score: f64,
    pub timestamp: f64,
}

impl TrainingSample {
    /// Labels an attempt from its outcome and difficulty.
    pub fn from_outcome(features: FeatureVector, success: bool, difficulty: f64, timestamp: f64) -> Self {
        let (cognitive_load, confusion_score) = if success && difficulty > 0.7 {
            (CognitiveLoad::Low, 0.1)
        } else if !success && difficulty > 0.5 {
            (CognitiveLoad::High, 0.8)
        } else {
            (CognitiveLoad::Medium, 0.4)
        };
        Self {
            features,
            cognitive_load,
            confusion_score,
            timestamp,
        }
    }
}

pub type TrainingBuffer = RingBuffer<TrainingSample>;

/// Decides when learner state is persisted and when predictors are retrained.
#[derive(Debug, Clone)]
pub struct TrainingScheduler {
    config: SchedulerConfig,
    last_save: DateTime<Utc>,
}

impl TrainingScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            last_save: Utc::now(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn should_save(&self) -> bool {
        self.should_save_at(Utc::now())
    }

    pub fn should_save_at(&self, now: DateTime<Utc>) -> bool {
        now - self.last_save >= Duration::seconds(self.config.save_interval_secs as i64)
    }

    pub fn mark_saved(&mut self) {
        self.mark_saved_at(Utc::now());
    }

    pub fn mark_saved_at(&mut self, now: DateTime<Utc>) {
        self.last_save = now;
    }

    pub fn last_save(&self) -> DateTime<Utc> {
        self.last_save
    }

    pub fn should_train(&self, sample_count: usize) -> bool {
        sample_count >= self.config.train_sample_threshold
    }

    pub fn new_buffer(&self) -> TrainingBuffer {
        RingBuffer::new(self.config.max_buffer_size)
    }

    /// Drops the oldest samples beyond `max_buffer_size`.
    pub fn trim_buffer<T>(&self, buffer: &mut RingBuffer<T>) -> usize {
        let dropped = buffer.truncate_oldest(self.config.max_buffer_size);
        if dropped > 0 {
            tracing::debug!(dropped, remaining = buffer.len(), "training buffer trimmed");
        }
        dropped
    }
}

impl Default for TrainingScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}
