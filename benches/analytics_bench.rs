//! Hot paths of the learner model.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use tutor_analytics::analytics::config::{EstimatorConfig, ForestConfig};
use tutor_analytics::analytics::knowledge::{BktParameters, KnowledgeTracker, ParameterEstimator};
use tutor_analytics::analytics::modeling::RandomForestClassifier;
use tutor_analytics::analytics::Observation;

fn observations(len: usize, seed: u64) -> Vec<Observation> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..len)
        .map(|t| Observation::new(t as f64 * 30.0, rng.random::<f64>() < 0.6))
        .collect()
}

fn bench_tracker_update(c: &mut Criterion) {
    let obs = observations(200, 7);
    c.bench_function("KnowledgeTracker::update x200", |b| {
        b.iter(|| {
            let mut tracker = KnowledgeTracker::new("kp", BktParameters::default());
            for o in &obs {
                black_box(tracker.update(*o));
            }
        })
    });
}

fn bench_estimator_fit(c: &mut Criterion) {
    let sequences: Vec<Vec<Observation>> = (0..20).map(|i| observations(40, i)).collect();
    let refs: Vec<&[Observation]> = sequences.iter().map(|s| s.as_slice()).collect();
    let estimator = ParameterEstimator::new(EstimatorConfig::default());
    c.bench_function("ParameterEstimator::fit_sequences 20x40", |b| {
        b.iter(|| black_box(estimator.fit_sequences("kp", &refs)))
    });
}

fn bench_forest_predict(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let x: Vec<Vec<f64>> = (0..200)
        .map(|_| (0..8).map(|_| rng.random::<f64>()).collect())
        .collect();
    let labels: Vec<usize> = x.iter().map(|row| if row[0] + row[1] > 1.0 { 1 } else { 0 }).collect();
    let mut forest = RandomForestClassifier::new(ForestConfig::default());
    if forest.fit(&x, &labels, 2).is_err() {
        return;
    }
    let row = vec![0.4; 8];
    c.bench_function("RandomForestClassifier::predict_proba", |b| {
        b.iter(|| black_box(forest.predict_proba(&row)))
    });
}

criterion_group!(benches, bench_tracker_update, bench_estimator_fit, bench_forest_predict);
criterion_main!(benches);
