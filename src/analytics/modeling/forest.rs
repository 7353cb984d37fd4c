//! Bagged CART ensembles: a class-balanced Gini classifier and an MSE regressor.

use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::analytics::config::ForestConfig;

const MIN_IMPURITY_DECREASE: f64 = 1e-12;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ModelError {
    #[error("model used before it was trained")]
    NotFitted,
    #[error("empty training set")]
    EmptyTrainingSet,
    #[error("expected {expected} values, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, Copy)]
enum Target<'a> {
    Classes { labels: &'a [usize], n_classes: usize },
    Values(&'a [f64]),
}

struct BuildContext<'a> {
    x: &'a [Vec<f64>],
    target: Target<'a>,
    weights: &'a [f64],
    max_depth: usize,
    min_samples_split: usize,
    min_samples_leaf: usize,
    max_features: usize,
    total_weight: f64,
}

/// Running weighted statistics of one side of a split.
#[derive(Clone)]
enum Accumulator {
    Classes { counts: Vec<f64>, weight: f64 },
    Values { weight: f64, sum: f64, sum_sq: f64 },
}

impl Accumulator {
    fn empty(target: Target<'_>) -> Self {
        match target {
            Target::Classes { n_classes, .. } => Self::Classes {
                counts: vec![0.0; n_classes],
                weight: 0.0,
            },
            Target::Values(_) => Self::Values {
                weight: 0.0,
                sum: 0.0,
                sum_sq: 0.0,
            },
        }
    }

    fn add(&mut self, ctx: &BuildContext<'_>, i: usize, sign: f64) {
        let w = ctx.weights[i] * sign;
        match (self, ctx.target) {
            (Self::Classes { counts, weight }, Target::Classes { labels, .. }) => {
                counts[labels[i]] += w;
                *weight += w;
            }
            (Self::Values { weight, sum, sum_sq }, Target::Values(values)) => {
                *weight += w;
                *sum += w * values[i];
                *sum_sq += w * values[i] * values[i];
            }
            _ => {}
        }
    }

    fn weight(&self) -> f64 {
        match self {
            Self::Classes { weight, .. } | Self::Values { weight, .. } => *weight,
        }
    }

    fn impurity(&self) -> f64 {
        match self {
            Self::Classes { counts, weight } => {
                if *weight <= 0.0 {
                    return 0.0;
                }
                1.0 - counts.iter().map(|c| (c / weight).powi(2)).sum::<f64>()
            }
            Self::Values { weight, sum, sum_sq } => {
                if *weight <= 0.0 {
                    return 0.0;
                }
                let mean = sum / weight;
                (sum_sq / weight - mean * mean).max(0.0)
            }
        }
    }

    fn leaf_value(&self) -> Vec<f64> {
        match self {
            Self::Classes { counts, weight } => {
                if *weight <= 0.0 {
                    let n = counts.len().max(1) as f64;
                    return vec![1.0 / n; counts.len()];
                }
                counts.iter().map(|c| c / weight).collect()
            }
            Self::Values { weight, sum, .. } => {
                vec![if *weight > 0.0 { sum / weight } else { 0.0 }]
            }
        }
    }
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    decrease: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    fn fit(ctx: &BuildContext<'_>, indices: Vec<usize>, importances: &mut [f64], rng: &mut ChaCha8Rng) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow(ctx, indices, 0, importances, rng);
        tree
    }

    fn grow(
        &mut self,
        ctx: &BuildContext<'_>,
        indices: Vec<usize>,
        depth: usize,
        importances: &mut [f64],
        rng: &mut ChaCha8Rng,
    ) -> usize {
        let mut stats = Accumulator::empty(ctx.target);
        for &i in &indices {
            stats.add(ctx, i, 1.0);
        }

        let node_id = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: stats.leaf_value(),
        });

        let impurity = stats.impurity();
        if depth >= ctx.max_depth
            || indices.len() < ctx.min_samples_split
            || indices.len() < 2 * ctx.min_samples_leaf
            || impurity <= MIN_IMPURITY_DECREASE
        {
            return node_id;
        }

        let Some(best) = Self::best_split(ctx, &indices, &stats, rng) else {
            return node_id;
        };

        importances[best.feature] += best.decrease / ctx.total_weight;

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| ctx.x[i][best.feature] <= best.threshold);

        let left = self.grow(ctx, left_idx, depth + 1, importances, rng);
        let right = self.grow(ctx, right_idx, depth + 1, importances, rng);
        self.nodes[node_id] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        node_id
    }

    fn best_split(
        ctx: &BuildContext<'_>,
        indices: &[usize],
        parent: &Accumulator,
        rng: &mut ChaCha8Rng,
    ) -> Option<BestSplit> {
        let n_features = ctx.x[indices[0]].len();
        let candidates = sample(rng, n_features, ctx.max_features.clamp(1, n_features));
        let parent_term = parent.weight() * parent.impurity();
        let mut best: Option<BestSplit> = None;

        for feature in candidates.iter() {
            let mut order = indices.to_vec();
            order.sort_by(|a, b| ctx.x[*a][feature].total_cmp(&ctx.x[*b][feature]));

            let mut left = Accumulator::empty(ctx.target);
            let mut right = parent.clone();

            for pos in 0..order.len() - 1 {
                let i = order[pos];
                left.add(ctx, i, 1.0);
                right.add(ctx, i, -1.0);

                let current = ctx.x[i][feature];
                let next = ctx.x[order[pos + 1]][feature];
                if next <= current {
                    continue;
                }
                let n_left = pos + 1;
                if n_left < ctx.min_samples_leaf || order.len() - n_left < ctx.min_samples_leaf {
                    continue;
                }

                let decrease = parent_term - left.weight() * left.impurity() - right.weight() * right.impurity();
                if decrease > MIN_IMPURITY_DECREASE && best.as_ref().map_or(true, |b| decrease > b.decrease) {
                    best = Some(BestSplit {
                        feature,
                        threshold: (current + next) / 2.0,
                        decrease,
                    });
                }
            }
        }
        best
    }

    fn leaf(&self, row: &[f64]) -> &[f64] {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                Node::Leaf { value } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    id = if row.get(*feature).copied().unwrap_or(0.0) <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

fn check_training_set(x: &[Vec<f64>], targets: usize) -> Result<usize, ModelError> {
    let first = x.first().ok_or(ModelError::EmptyTrainingSet)?;
    if targets != x.len() {
        return Err(ModelError::DimensionMismatch {
            expected: x.len(),
            actual: targets,
        });
    }
    let n_features = first.len();
    if n_features == 0 {
        return Err(ModelError::EmptyTrainingSet);
    }
    if let Some(row) = x.iter().find(|r| r.len() != n_features) {
        return Err(ModelError::DimensionMismatch {
            expected: n_features,
            actual: row.len(),
        });
    }
    Ok(n_features)
}

/// Fits `n_estimators` trees on bootstrap resamples; returns trees and normalised importances.
fn fit_ensemble(
    config: &ForestConfig,
    x: &[Vec<f64>],
    target: Target<'_>,
    weights: &[f64],
    max_features: usize,
) -> (Vec<DecisionTree>, Vec<f64>) {
    let n = x.len();
    let n_features = x[0].len();
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let total_weight: f64 = weights.iter().sum::<f64>().max(f64::MIN_POSITIVE);
    let ctx = BuildContext {
        x,
        target,
        weights,
        max_depth: config.max_depth.max(1),
        min_samples_split: config.min_samples_split.max(2),
        min_samples_leaf: config.min_samples_leaf.max(1),
        max_features,
        total_weight,
    };

    let mut importances = vec![0.0; n_features];
    let mut trees = Vec::with_capacity(config.n_estimators.max(1));
    for _ in 0..config.n_estimators.max(1) {
        let bootstrap: Vec<usize> = (0..n).map(|_| rng.random_range(0..n)).collect();
        let mut tree_importance = vec![0.0; n_features];
        trees.push(DecisionTree::fit(&ctx, bootstrap, &mut tree_importance, &mut rng));
        let total: f64 = tree_importance.iter().sum();
        if total > 0.0 {
            for (acc, v) in importances.iter_mut().zip(&tree_importance) {
                *acc += v / total;
            }
        }
    }

    let total: f64 = importances.iter().sum();
    if total > 0.0 {
        importances.iter_mut().for_each(|v| *v /= total);
    }
    (trees, importances)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForestClassifier {
    config: ForestConfig,
    trees: Vec<DecisionTree>,
    n_classes: usize,
    n_features: usize,
    importances: Vec<f64>,
}

impl RandomForestClassifier {
    pub fn new(config: ForestConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            n_classes: 0,
            n_features: 0,
            importances: Vec::new(),
        }
    }

    /// `labels` must already be encoded into `0..n_classes`. Classes are reweighted
    /// inversely to their frequency.
    pub fn fit(&mut self, x: &[Vec<f64>], labels: &[usize], n_classes: usize) -> Result<(), ModelError> {
        let n_features = check_training_set(x, labels.len())?;
        if let Some(bad) = labels.iter().find(|l| **l >= n_classes) {
            return Err(ModelError::DimensionMismatch {
                expected: n_classes,
                actual: bad + 1,
            });
        }

        let mut counts = vec![0usize; n_classes];
        for l in labels {
            counts[*l] += 1;
        }
        let present = counts.iter().filter(|c| **c > 0).count().max(1);
        let class_weight: Vec<f64> = counts
            .iter()
            .map(|c| if *c > 0 { labels.len() as f64 / (present * c) as f64 } else { 0.0 })
            .collect();
        let weights: Vec<f64> = labels.iter().map(|l| class_weight[*l]).collect();

        let max_features = ((n_features as f64).sqrt().floor() as usize).max(1);
        let (trees, importances) = fit_ensemble(
            &self.config,
            x,
            Target::Classes { labels, n_classes },
            &weights,
            max_features,
        );
        self.trees = trees;
        self.importances = importances;
        self.n_classes = n_classes;
        self.n_features = n_features;
        Ok(())
    }

    pub fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    pub fn predict_proba(&self, row: &[f64]) -> Result<Vec<f64>, ModelError> {
        if !self.is_fitted() {
            return Err(ModelError::NotFitted);
        }
        if row.len() != self.n_features {
            return Err(ModelError::DimensionMismatch {
                expected: self.n_features,
                actual: row.len(),
            });
        }
        let mut proba = vec![0.0; self.n_classes];
        for tree in &self.trees {
            for (acc, p) in proba.iter_mut().zip(tree.leaf(row)) {
                *acc += p;
            }
        }
        let n = self.trees.len() as f64;
        proba.iter_mut().for_each(|p| *p /= n);
        Ok(proba)
    }

    pub fn predict(&self, row: &[f64]) -> Result<usize, ModelError> {
        let proba = self.predict_proba(row)?;
        Ok(argmax(&proba))
    }

    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForestRegressor {
    config: ForestConfig,
    trees: Vec<DecisionTree>,
    n_features: usize,
    importances: Vec<f64>,
}

impl RandomForestRegressor {
    pub fn new(config: ForestConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            n_features: 0,
            importances: Vec::new(),
        }
    }

    pub fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<(), ModelError> {
        let n_features = check_training_set(x, y.len())?;
        let weights = vec![1.0; y.len()];
        let (trees, importances) = fit_ensemble(&self.config, x, Target::Values(y), &weights, n_features);
        self.trees = trees;
        self.importances = importances;
        self.n_features = n_features;
        Ok(())
    }

    pub fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    /// One prediction per tree; callers derive mean and spread from these.
    pub fn tree_predictions(&self, row: &[f64]) -> Result<Vec<f64>, ModelError> {
        if !self.is_fitted() {
            return Err(ModelError::NotFitted);
        }
        if row.len() != self.n_features {
            return Err(ModelError::DimensionMismatch {
                expected: self.n_features,
                actual: row.len(),
            });
        }
        Ok(self
            .trees
            .iter()
            .map(|t| t.leaf(row).first().copied().unwrap_or(0.0))
            .collect())
    }

    pub fn predict(&self, row: &[f64]) -> Result<f64, ModelError> {
        let preds = self.tree_predictions(row)?;
        Ok(preds.iter().sum::<f64>() / preds.len() as f64)
    }

    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }
}

pub(crate) fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(bi, bv), (i, v)| if *v > bv { (i, *v) } else { (bi, bv) })
        .0
}

/// Stratified k-fold accuracy with `k = min(folds, n)`. `None` when fewer than two folds fit.
pub fn cross_val_accuracy(
    config: &ForestConfig,
    x: &[Vec<f64>],
    labels: &[usize],
    n_classes: usize,
    folds: usize,
) -> Option<f64> {
    let n = x.len();
    let k = folds.min(n);
    if k < 2 || labels.len() != n {
        return None;
    }

    let mut by_class: Vec<usize> = (0..n).collect();
    by_class.sort_by_key(|i| labels[*i]);
    let mut fold_of = vec![0usize; n];
    for (pos, i) in by_class.into_iter().enumerate() {
        fold_of[i] = pos % k;
    }

    let mut scores = Vec::with_capacity(k);
    for fold in 0..k {
        let (train, test): (Vec<usize>, Vec<usize>) = (0..n).partition(|i| fold_of[*i] != fold);
        if train.is_empty() || test.is_empty() {
            continue;
        }
        let train_x: Vec<Vec<f64>> = train.iter().map(|i| x[*i].clone()).collect();
        let train_y: Vec<usize> = train.iter().map(|i| labels[*i]).collect();
        let mut model = RandomForestClassifier::new(config.clone());
        if model.fit(&train_x, &train_y, n_classes).is_err() {
            continue;
        }
        let correct = test
            .iter()
            .filter(|i| model.predict(&x[**i]).ok() == Some(labels[**i]))
            .count();
        scores.push(correct as f64 / test.len() as f64);
    }

    if scores.is_empty() {
        None
    } else {
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    }
}
