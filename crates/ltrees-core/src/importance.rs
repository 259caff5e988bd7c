//! Impurity-decrease variable importance aggregated across trees.

use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use tracing::instrument;

use crate::ensemble::{Ensemble, TreeEntry};
use crate::grow::partition;
use crate::node::{AttributeIndex, Node};
use crate::score::{Criterion, Response, Scorer};
use crate::table::{AttributeTable, Target};

/// An attribute with its importance score and rank.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedAttribute {
    /// Attribute column.
    pub attribute: AttributeIndex,
    /// Importance score.
    pub importance: f64,
    /// 1-based rank (1 = most important).
    pub rank: usize,
}

/// Sort scores descending and assign 1-based ranks. Ties keep column order.
pub(crate) fn rank_attributes(scores: &[f64]) -> Vec<RankedAttribute> {
    let mut ranked: Vec<RankedAttribute> = scores
        .iter()
        .enumerate()
        .map(|(a, &importance)| RankedAttribute {
            attribute: AttributeIndex::new(a),
            importance,
            rank: 0,
        })
        .collect();
    ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    for (i, r) in ranked.iter_mut().enumerate() {
        r.rank = i + 1;
    }
    ranked
}

/// Sum per-tree importances, normalize to 1 and rank.
pub(crate) fn aggregate_importances(per_tree: &[Vec<f64>], n_attributes: usize) -> Vec<RankedAttribute> {
    let mut totals = vec![0.0f64; n_attributes];
    for tree in per_tree {
        for (t, v) in totals.iter_mut().zip(tree) {
            *t += v;
        }
    }
    let sum: f64 = totals.iter().sum();
    if sum > 0.0 {
        totals.iter_mut().for_each(|v| *v /= sum);
    }
    rank_attributes(&totals)
}

/// Replay every active tree on the reference set `table` and credit each
/// split's impurity decrease, times the tree weight, to its tested attribute.
///
/// The reference rows are partitioned as they flow down; a node that
/// receives no reference row adds nothing.
#[instrument(skip_all, fields(n_trees = ensemble.active_trees(), n_rows = table.n_rows()))]
pub(crate) fn impurity_importances(
    ensemble: &Ensemble,
    table: &AttributeTable,
    target: &Target,
) -> Vec<RankedAttribute> {
    let n_attributes = table.n_attributes();
    let response = match target {
        Target::Classes { labels, .. } => Response::Classes(labels),
        Target::Values(values) => Response::Values(values),
        Target::Unsupervised => return rank_attributes(&vec![0.0; n_attributes]),
    };
    let scorer = Scorer::new(target.goal(), Criterion::Entropy, 0.0, 0.0, 1.0);
    let per_tree: Vec<Vec<f64>> = ensemble.trees[..ensemble.active]
        .par_iter()
        .map(|tree| tree_importances(ensemble, tree, table, response, &scorer))
        .collect();
    aggregate_importances(&per_tree, n_attributes)
}

/// Weighted impurity decrease per attribute for one tree.
fn tree_importances(
    ensemble: &Ensemble,
    tree: &TreeEntry,
    table: &AttributeTable,
    response: Response<'_>,
    scorer: &Scorer,
) -> Vec<f64> {
    let mut totals = vec![0.0; table.n_attributes()];
    let mut score_table = scorer.table();
    let weights = vec![1.0; table.n_rows()];
    let mut rows: Vec<usize> = (0..table.n_rows()).collect();
    let mut stack = vec![(tree.root, 0, rows.len())];
    while let Some((id, start, end)) = stack.pop() {
        let Node::Split {
            attribute,
            threshold,
            ..
        } = ensemble.arena.node(id)
        else {
            continue;
        };
        let Some((left, right)) = ensemble.arena.children(id) else {
            continue;
        };
        let range = &mut rows[start..end];
        if range.is_empty() {
            continue;
        }
        let n_left = partition(range, table.column(attribute.index()), threshold);
        scorer.summarize(&mut score_table, range, &weights, response);
        score_table.clear_row(1);
        for &r in &range[..n_left] {
            score_table.add(1, response, r, 1.0);
        }
        let gain = scorer.importance_gain(&mut score_table).max(0.0);
        totals[attribute.index()] += tree.weight * gain;
        stack.push((left, start, start + n_left));
        stack.push((right, start + n_left, end));
    }
    totals
}
