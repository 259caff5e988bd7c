//! Criterion benchmarks for ltrees-core: ensemble training and batch prediction.

use criterion::{Criterion, criterion_group, criterion_main};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use ltrees_core::{AttributeTable, Target, TrainConfig};

fn make_classification(
    n_rows: usize,
    n_attributes: usize,
    n_classes: usize,
    seed: u64,
) -> (AttributeTable, Target, Vec<Vec<f32>>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut rows = Vec::with_capacity(n_rows);
    let mut labels = Vec::with_capacity(n_rows);
    for i in 0..n_rows {
        let class = i % n_classes;
        labels.push(class);
        let row: Vec<f32> = (0..n_attributes)
            .map(|a| {
                let base = if a < 3 { class as f32 * 3.0 } else { 0.0 };
                base + rng.r#gen::<f32>() * 0.5
            })
            .collect();
        rows.push(row);
    }
    let columns = (0..n_attributes)
        .map(|a| rows.iter().map(|row| row[a]).collect())
        .collect();
    (
        AttributeTable::numerical(columns).unwrap(),
        Target::classes(labels),
        rows,
    )
}

fn bench_extra_trees_train(c: &mut Criterion) {
    let (table, target, _) = make_classification(500, 20, 5, 42);
    let cfg = TrainConfig::extra_trees(50).unwrap().with_seed(42);

    c.bench_function("extra_trees_train_500x20_5class_50trees", |b| {
        b.iter(|| cfg.fit(&table, &target).unwrap());
    });
}

fn bench_random_forest_train(c: &mut Criterion) {
    let (table, target, _) = make_classification(500, 20, 5, 42);
    let cfg = TrainConfig::random_forest(50).unwrap().with_seed(42);

    c.bench_function("random_forest_train_500x20_5class_50trees", |b| {
        b.iter(|| cfg.fit(&table, &target).unwrap());
    });
}

fn bench_single_tree(c: &mut Criterion) {
    // Proxy for exhaustive split search on one node set.
    let (table, target, _) = make_classification(500, 20, 5, 42);
    let cfg = TrainConfig::single_tree();

    c.bench_function("single_tree_500x20_5class", |b| {
        b.iter(|| cfg.fit(&table, &target).unwrap());
    });
}

fn bench_predict_batch(c: &mut Criterion) {
    let (table, target, rows) = make_classification(500, 20, 5, 42);
    let ensemble = TrainConfig::extra_trees(50)
        .unwrap()
        .with_seed(42)
        .fit(&table, &target)
        .unwrap()
        .into_ensemble();

    c.bench_function("extra_trees_predict_batch_500x20_50trees", |b| {
        b.iter(|| ensemble.predict_batch(&rows).unwrap());
    });
}

criterion_group!(
    benches,
    bench_extra_trees_train,
    bench_random_forest_train,
    bench_single_tree,
    bench_predict_batch,
);
criterion_main!(benches);
