//! Accuracy regression tests for ltrees-core.
//!
//! These tests verify that algorithmic changes do not degrade the accuracy of
//! each ensemble method on deterministic synthetic datasets.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use ltrees_core::{
    AttributeTable, MISSING, MissingValues, OobMode, Prediction, StopReason, Target, TrainConfig,
    TreeError,
};

// ---------------------------------------------------------------------------
// Helpers: deterministic synthetic datasets
// ---------------------------------------------------------------------------

/// Generate an `n`-row, 10-attribute, 3-class classification table.
///
/// Attributes 0-2 are informative (class * 3.0 + noise in [0, 0.5]).
/// Attributes 3-9 are pure noise in [0, 0.5].
/// Rows are assigned round-robin across classes.
fn make_classification(n: usize, seed: u64) -> (AttributeTable, Target) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let n_attributes = 10;
    let mut columns = vec![Vec::with_capacity(n); n_attributes];
    let mut labels = Vec::with_capacity(n);
    for i in 0..n {
        let class = i % 3;
        labels.push(class);
        for (a, column) in columns.iter_mut().enumerate() {
            let base = if a < 3 { class as f32 * 3.0 } else { 0.0 };
            column.push(base + rng.r#gen::<f32>() * 0.5);
        }
    }
    (
        AttributeTable::numerical(columns).unwrap(),
        Target::classes(labels),
    )
}

/// Two classes overlapping on `x0` over a third of their range; `x1` is noise.
fn make_binary(n: usize, seed: u64) -> (AttributeTable, Target) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut x0 = Vec::with_capacity(n);
    let mut x1 = Vec::with_capacity(n);
    let mut labels = Vec::with_capacity(n);
    for i in 0..n {
        let class = i % 2;
        labels.push(class);
        x0.push(class as f32 + rng.r#gen::<f32>() * 1.5);
        x1.push(rng.r#gen::<f32>());
    }
    (
        AttributeTable::numerical(vec![x0, x1]).unwrap(),
        Target::classes(labels),
    )
}

/// `y = 2·x0 + sin(x1)` on `x0, x1` uniform in `[0, 10)`.
fn make_regression(n: usize, seed: u64) -> (AttributeTable, Target) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let x0: Vec<f32> = (0..n).map(|_| rng.r#gen::<f32>() * 10.0).collect();
    let x1: Vec<f32> = (0..n).map(|_| rng.r#gen::<f32>() * 10.0).collect();
    let y: Vec<f64> = x0
        .iter()
        .zip(&x1)
        .map(|(&a, &b)| 2.0 * f64::from(a) + f64::from(b).sin())
        .collect();
    (
        AttributeTable::numerical(vec![x0, x1]).unwrap(),
        Target::values(y),
    )
}

fn accuracy(predictions: &[Prediction], target: &Target) -> f64 {
    let Target::Classes { labels, .. } = target else {
        panic!("classification target expected");
    };
    let correct = predictions
        .iter()
        .zip(labels)
        .filter(|(p, l)| p.classes().unwrap().predicted_class() == **l)
        .count();
    correct as f64 / labels.len() as f64
}

fn mse(predictions: &[Prediction], target: &Target) -> f64 {
    let Target::Values(values) = target else {
        panic!("regression target expected");
    };
    predictions
        .iter()
        .zip(values)
        .map(|(p, v)| (p.value().unwrap() - v).powi(2))
        .sum::<f64>()
        / values.len() as f64
}

/// Blank out roughly one cell in eight of the first three attributes.
fn with_missing(table: &AttributeTable) -> AttributeTable {
    let columns = (0..table.n_attributes())
        .map(|a| {
            table
                .column(a)
                .iter()
                .enumerate()
                .map(|(r, &v)| if a < 3 && (r * 7 + a) % 8 == 0 { MISSING } else { v })
                .collect()
        })
        .collect();
    AttributeTable::numerical(columns).unwrap()
}

// ---------------------------------------------------------------------------
// a) averaging methods
// ---------------------------------------------------------------------------

/// Extra-Trees with the default uniform threshold must generalize.
#[test]
fn extra_trees_accuracy_above_threshold() {
    let (train, train_y) = make_classification(300, 42);
    let (test, test_y) = make_classification(150, 7);
    let result = TrainConfig::extra_trees(50).unwrap().fit(&train, &train_y).unwrap();
    let acc = accuracy(&result.ensemble().predict_table(&test).unwrap(), &test_y);
    assert!(acc > 0.9, "extra-trees accuracy {acc} <= 0.9");
    assert_eq!(result.metadata().stop_reason, StopReason::Completed);
    assert_eq!(result.metadata().attribute_sample_resolved, 3);
}

/// Random forests with OOB evaluation.
#[test]
fn random_forest_oob_accuracy_above_threshold() {
    let (train, train_y) = make_classification(300, 42);
    let result = TrainConfig::random_forest(60)
        .unwrap()
        .with_oob_mode(OobMode::Enabled)
        .fit(&train, &train_y)
        .unwrap();
    let oob = result.oob_score().unwrap();
    assert!(oob.error < 10.0, "oob error {}% >= 10%", oob.error);
    assert_eq!(oob.n_oob_rows, 300);
    assert_eq!(result.oob_error(&train, &train_y).unwrap(), *oob);
}

/// Informative attributes 0-2 must dominate impurity importance.
#[test]
fn informative_attributes_rank_first() {
    let (train, train_y) = make_classification(300, 42);
    let result = TrainConfig::random_forest(40).unwrap().fit(&train, &train_y).unwrap();
    let top: Vec<usize> = result.importances()[..3]
        .iter()
        .map(|r| r.attribute.index())
        .collect();
    for a in 0..3 {
        assert!(top.contains(&a), "attribute {a} not in top 3: {top:?}");
    }
    let total: f64 = result.importances().iter().map(|r| r.importance).sum();
    assert!((total - 1.0).abs() < 1e-9);
}

// ---------------------------------------------------------------------------
// b) boosting methods
// ---------------------------------------------------------------------------

/// Separable data gives a perfect first boosting round; only that tree is kept.
#[test]
fn boosting_stops_on_perfect_model() {
    let (train, train_y) = make_classification(150, 42);
    let result = TrainConfig::boosting(20).unwrap().fit(&train, &train_y).unwrap();
    assert_eq!(result.metadata().stop_reason, StopReason::PerfectModel { round: 0 });
    assert_eq!(result.ensemble().n_trees(), 1);
    assert_eq!(result.ensemble().tree_weights(), vec![1.0]);
}

/// Boosting on overlapping classes must stay accurate.
#[test]
fn boosting_accuracy_on_overlapping_classes() {
    let (train, train_y) = make_binary(300, 42);
    let (test, test_y) = make_binary(200, 7);
    let result = TrainConfig::boosting(25)
        .unwrap()
        .with_min_node_size(20)
        .fit(&train, &train_y)
        .unwrap();
    let acc = accuracy(&result.ensemble().predict_table(&test).unwrap(), &test_y);
    assert!(acc > 0.7, "boosting accuracy {acc} <= 0.7");
}

/// MART must drive the test MSE far below the target variance (~33).
#[test]
fn mart_mse_below_threshold() {
    let (train, train_y) = make_regression(400, 42);
    let (test, test_y) = make_regression(200, 7);
    let result = TrainConfig::mart(150).unwrap().fit(&train, &train_y).unwrap();
    let error = mse(&result.ensemble().predict_table(&test).unwrap(), &test_y);
    assert!(error < 2.0, "mart mse {error} >= 2.0");
    assert_eq!(result.ensemble().tree_weights()[0], 1.0);
}

/// LogitBoost on overlapping two-class data.
#[test]
fn logit_boost_accuracy_above_threshold() {
    let (train, train_y) = make_binary(300, 42);
    let (test, test_y) = make_binary(200, 7);
    let result = TrainConfig::logit_boost(100).unwrap().fit(&train, &train_y).unwrap();
    let predictions = result.ensemble().predict_table(&test).unwrap();
    let acc = accuracy(&predictions, &test_y);
    assert!(acc > 0.7, "logit-boost accuracy {acc} <= 0.7");
    for p in &predictions {
        let probs = p.classes().unwrap().as_slice();
        assert!((probs[0] + probs[1] - 1.0).abs() < 1e-12);
    }
}

#[test]
fn logit_boost_rejects_three_classes() {
    let (train, train_y) = make_classification(30, 42);
    let err = TrainConfig::logit_boost(5).unwrap().fit(&train, &train_y).unwrap_err();
    assert!(matches!(err, TreeError::IncompatibleGoal { .. }));
}

// ---------------------------------------------------------------------------
// c) early stopping
// ---------------------------------------------------------------------------

/// The kept prefix ends at the first minimum of the held-out error curve.
#[test]
fn early_stopping_keeps_best_prefix() {
    let (train, train_y) = make_regression(200, 42);
    let (valid, valid_y) = make_regression(100, 7);
    let result = TrainConfig::mart(80)
        .unwrap()
        .with_min_node_size(1)
        .with_early_stopping(true)
        .fit_with_validation(&train, &train_y, &valid, &valid_y)
        .unwrap();

    let errors = result.validation_errors();
    assert_eq!(errors.len(), 80);
    let n_trees = result.ensemble().n_trees();
    let best = errors.iter().copied().fold(f64::INFINITY, f64::min);
    assert_eq!(errors[n_trees - 1], best);
    assert!(errors[..n_trees - 1].iter().all(|&e| e > best));
    if n_trees < 80 {
        assert_eq!(
            result.metadata().stop_reason,
            StopReason::EarlyStopping { best_round: n_trees - 1 }
        );
    }
}

// ---------------------------------------------------------------------------
// d) missing values during training
// ---------------------------------------------------------------------------

#[test]
fn missing_values_rejected_without_strategy() {
    let (train, train_y) = make_classification(60, 42);
    let err = TrainConfig::extra_trees(5)
        .unwrap()
        .fit(&with_missing(&train), &train_y)
        .unwrap_err();
    assert!(matches!(err, TreeError::UnhandledMissingValue { .. }));
}

/// Every imputation strategy must still learn the informative attributes.
#[test]
fn imputation_strategies_keep_accuracy() {
    let (train, train_y) = make_classification(240, 42);
    let (test, test_y) = make_classification(120, 7);
    let incomplete = with_missing(&train);

    for strategy in [
        MissingValues::Median,
        MissingValues::Random,
        MissingValues::Proximity { iterations: 2 },
    ] {
        let result = TrainConfig::extra_trees(30)
            .unwrap()
            .with_missing_values(strategy)
            .fit(&incomplete, &train_y)
            .unwrap();
        let acc = accuracy(&result.ensemble().predict_table(&test).unwrap(), &test_y);
        assert!(acc > 0.9, "{strategy:?} accuracy {acc} <= 0.9");

        let degraded = with_missing(&test);
        let acc = accuracy(&result.ensemble().predict_table(&degraded).unwrap(), &test_y);
        assert!(acc > 0.85, "{strategy:?} accuracy on incomplete rows {acc} <= 0.85");
    }
}

// ---------------------------------------------------------------------------
// e) determinism
// ---------------------------------------------------------------------------

#[test]
fn same_seed_same_model() {
    let (train, train_y) = make_classification(120, 42);
    let config = TrainConfig::extra_trees(10).unwrap().with_seed(99);
    let a = config.fit(&train, &train_y).unwrap().into_ensemble();
    let b = config.fit(&train, &train_y).unwrap().into_ensemble();
    assert_eq!(a.to_bytes().unwrap(), b.to_bytes().unwrap());
}
