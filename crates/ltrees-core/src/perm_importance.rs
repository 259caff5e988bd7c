//! Permutation-based variable importance on out-of-bag rows.

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use tracing::{debug, instrument};

use crate::ensemble::{Ensemble, TreeEntry};
use crate::error::TreeError;
use crate::node::AttributeIndex;
use crate::predict::accumulate_tree;
use crate::resample::argmax;
use crate::table::{AttributeTable, Target};

/// Permutation importance of one attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct PermutationImportance {
    /// Attribute column.
    pub attribute: AttributeIndex,
    /// Mean degradation divided by its standard error; 0 when the error is 0.
    pub importance: f64,
    /// Mean per-tree error increase, as a fraction of OOB rows.
    pub mean: f64,
    /// Standard error of the mean increase across trees.
    pub std: f64,
    /// Rank (1 = most important).
    pub rank: usize,
}

/// Error of one tree on `rows`: misclassified count or summed squared error.
fn tree_error(
    ensemble: &Ensemble,
    tree: &TreeEntry,
    target: &Target,
    rows: &[usize],
    value: impl Fn(usize, usize) -> f32,
) -> f64 {
    let mut out = vec![0.0; ensemble.arena.slot_width()];
    rows.iter()
        .map(|&r| {
            out.fill(0.0);
            accumulate_tree(&ensemble.arena, tree.root, |a| value(r, a), 1.0, &mut out);
            match target {
                Target::Classes { labels, .. } => f64::from(u8::from(argmax(&out) != labels[r])),
                Target::Values(values) => (out[0] - values[r]).powi(2),
                Target::Unsupervised => 0.0,
            }
        })
        .sum()
}

/// Compute z-scored permutation importances.
///
/// Each attribute column is shuffled across all rows once; every tree is
/// then re-scored on its own OOB rows. Trees with no OOB row are skipped.
#[instrument(skip_all, fields(n_trees = ensemble.n_trees(), n_attributes = table.n_attributes()))]
pub(crate) fn compute_permutation_importance(
    ensemble: &Ensemble,
    table: &AttributeTable,
    target: &Target,
    oob_rows_per_tree: &[Vec<usize>],
    seed: u64,
) -> Result<Vec<PermutationImportance>, TreeError> {
    if oob_rows_per_tree.is_empty() {
        return Err(TreeError::OobUnavailable {
            reason: "permutation importance needs per-tree learning sets (bagging)".to_string(),
        });
    }
    if target.goal() == crate::table::Goal::Unsupervised {
        return Err(TreeError::IncompatibleGoal {
            operation: "permutation importance",
            goal: "unsupervised",
        });
    }
    if table.n_attributes() != ensemble.kinds.len() {
        return Err(TreeError::PredictionAttributeMismatch {
            expected: ensemble.kinds.len(),
            got: table.n_attributes(),
        });
    }
    target.validate(table.n_rows())?;

    let scored: Vec<(&TreeEntry, &Vec<usize>)> = ensemble
        .trees
        .iter()
        .zip(oob_rows_per_tree)
        .filter(|(_, rows)| !rows.is_empty())
        .collect();
    if scored.is_empty() {
        return Err(TreeError::OobUnavailable {
            reason: "no tree has an out-of-bag row".to_string(),
        });
    }
    let baseline: Vec<f64> = scored
        .iter()
        .map(|(tree, rows)| tree_error(ensemble, tree, target, rows, |r, a| table.value(r, a)))
        .collect();
    let n_trees = scored.len() as f64;

    let mut results: Vec<PermutationImportance> = (0..table.n_attributes())
        .into_par_iter()
        .map(|attribute| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(attribute as u64));
            let mut permuted = table.column(attribute).to_vec();
            permuted.shuffle(&mut rng);
            let value = |r: usize, a: usize| {
                if a == attribute {
                    permuted[r]
                } else {
                    table.value(r, a)
                }
            };
            let (sum, sum_sq) = scored.iter().zip(&baseline).fold(
                (0.0, 0.0),
                |(s, s2), ((tree, rows), e0)| {
                    let d = (tree_error(ensemble, tree, target, rows, value) - e0) / rows.len() as f64;
                    (s + d, s2 + d * d)
                },
            );
            let mean = sum / n_trees;
            let std = ((sum_sq / n_trees - mean * mean).max(0.0) / n_trees).sqrt();
            let importance = if std > 0.0 { mean / std } else { 0.0 };
            PermutationImportance {
                attribute: AttributeIndex::new(attribute),
                importance,
                mean,
                std,
                rank: 0,
            }
        })
        .collect();

    results.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    for (i, result) in results.iter_mut().enumerate() {
        result.rank = i + 1;
    }
    debug!(top = ?results.first().map(|r| r.attribute), "permutation importance done");
    Ok(results)
}
