//! Post-pruning of single trees.
//!
//! Cost-complexity pruning builds the nested sequence of subtrees obtained by
//! repeatedly collapsing the weakest link, then picks an `alpha` from a
//! pruning set, by cross-validation, or as given. Error-based pruning walks
//! the tree once with C4.5's pessimistic error estimate.
//!
//! Collapsed nodes keep their id and become leaves; their former
//! descendants stay in the arena but are no longer reachable.

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, instrument};

use crate::config::TrainConfig;
use crate::ensemble::{Aggregation, Ensemble};
use crate::error::TreeError;
use crate::grow::partition;
use crate::node::{Node, NodeArena, NodeId};
use crate::resample::argmax;
use crate::table::{AttributeTable, Goal, Target, is_missing};

/// Default number of cross-validation folds.
pub const DEFAULT_CV_FOLDS: usize = 10;

/// Quinlan's default confidence factor for error-based pruning.
pub const DEFAULT_C45_CONFIDENCE: f64 = 0.25;

const EPSILON: f64 = 1e-12;

/// How to choose the pruned subtree.
#[derive(Debug, Clone, Copy)]
pub enum PruneMethod<'a> {
    /// Keep the cost-complexity subtree with the lowest error on a held-out set.
    PruningSet {
        /// Held-out attribute table.
        table: &'a AttributeTable,
        /// Held-out target.
        target: &'a Target,
    },
    /// Pick `alpha` by k-fold cross-validation over the learning set.
    CrossValidation {
        /// Number of folds.
        folds: usize,
        /// Config used to grow each fold's tree.
        config: &'a TrainConfig,
    },
    /// Prune at a caller-chosen `alpha`.
    FixedAlpha(f64),
    /// C4.5 error-based pruning on the learning set (classification only).
    ErrorBased {
        /// Confidence factor in `(0, 1)`.
        confidence: f64,
    },
}

/// Outcome of a pruning call.
#[derive(Debug, Clone, PartialEq)]
pub struct PruneReport {
    /// Cost-complexity `alpha_k` of each subtree in the sequence.
    pub alphas: Vec<f64>,
    /// Held-out (or summed cross-validation) error of each subtree; empty
    /// when no error was measured.
    pub errors: Vec<f64>,
    /// Selected `alpha`, `None` for error-based pruning.
    pub best_alpha: Option<f64>,
    /// Leaves before pruning.
    pub n_leaves_before: usize,
    /// Leaves after pruning.
    pub n_leaves: usize,
}

/// How node statistics are read from leaf slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatKind {
    /// Class proportions.
    Classes,
    /// `[mean, variance]`.
    Values,
}

impl StatKind {
    fn of(ensemble: &Ensemble) -> Result<Self, TreeError> {
        match (ensemble.goal, ensemble.aggregation) {
            (Goal::Unsupervised, _) => Err(TreeError::IncompatibleGoal {
                operation: "pruning",
                goal: "unsupervised",
            }),
            (_, Aggregation::Logistic) => Err(TreeError::IncompatibleGoal {
                operation: "pruning of logit-boost trees",
                goal: "classification",
            }),
            (Goal::Classification { .. }, _) => Ok(StatKind::Classes),
            (Goal::Regression, _) => Ok(StatKind::Values),
        }
    }

    /// Combine two children's statistics weighted by their sizes.
    fn combine(self, left: &[f64], nl: f64, right: &[f64], nr: f64) -> Vec<f64> {
        let n = nl + nr;
        let (pl, pr) = if n > 0.0 { (nl / n, nr / n) } else { (0.5, 0.5) };
        match self {
            StatKind::Classes => left.iter().zip(right).map(|(l, r)| pl * l + pr * r).collect(),
            StatKind::Values => {
                let mean = pl * left[0] + pr * right[0];
                let second = pl * (left[1] + left[0] * left[0]) + pr * (right[1] + right[0] * right[0]);
                vec![mean, (second - mean * mean).max(0.0)]
            }
        }
    }

    /// Error of a node turned into a leaf predicting `values` for `n` rows.
    fn node_error(self, values: &[f64], n: f64) -> f64 {
        match self {
            StatKind::Classes => {
                let best = values.iter().copied().fold(0.0, f64::max);
                n * (1.0 - best)
            }
            StatKind::Values => n * values[1],
        }
    }

    /// Error of predicting `values` for one held-out row.
    fn row_error(self, values: &[f64], target: &Target, row: usize) -> f64 {
        match (self, target) {
            (StatKind::Classes, Target::Classes { labels, .. }) => {
                f64::from(u8::from(argmax(values) != labels[row]))
            }
            (StatKind::Values, Target::Values(y)) => (y[row] - values[0]).powi(2),
            _ => 0.0,
        }
    }
}

/// Working state of the weakest-link sequence for one tree.
#[derive(Debug)]
struct Sequence {
    base: usize,
    ids: Vec<usize>,
    values: Vec<Vec<f64>>,
    children: Vec<Option<(usize, usize)>>,
    parent: Vec<usize>,
    complexity: Vec<usize>,
    r_node: Vec<f64>,
    r_subtree: Vec<f64>,
    r_node_test: Vec<f64>,
    r_subtree_test: Vec<f64>,
    g_local: Vec<f64>,
    g_global: Vec<f64>,
    /// `alpha` at which each node was collapsed, infinite if never.
    stamp: Vec<f64>,
    alphas: Vec<f64>,
    errors: Vec<f64>,
}

impl Sequence {
    /// Build the sequence of `root`, optionally measuring each subtree on a held-out set.
    fn build(
        arena: &NodeArena,
        root: NodeId,
        kind: StatKind,
        test: Option<(&AttributeTable, &Target)>,
    ) -> Self {
        let ids: Vec<usize> = arena.subtree(root).into_iter().map(NodeId::index).collect();
        let bottom_up: Vec<usize> = ids.iter().rev().copied().collect();
        let base = root.index();
        let len = ids.last().map_or(1, |&last| last - base + 1);
        let mut seq = Self {
            base,
            ids,
            values: vec![Vec::new(); len],
            children: vec![None; len],
            parent: vec![0; len],
            complexity: vec![1; len],
            r_node: vec![0.0; len],
            r_subtree: vec![0.0; len],
            r_node_test: vec![0.0; len],
            r_subtree_test: vec![0.0; len],
            g_local: vec![f64::INFINITY; len],
            g_global: vec![f64::INFINITY; len],
            stamp: vec![f64::INFINITY; len],
            alphas: Vec::new(),
            errors: Vec::new(),
        };

        for id in bottom_up {
            let t = id - base;
            let node_id = NodeId::new(id);
            let size = arena.node(node_id).size();
            match arena.children(node_id) {
                None => {
                    seq.values[t] = arena.leaf_values(node_id).map(<[f64]>::to_vec).unwrap_or_default();
                    seq.r_node[t] = kind.node_error(&seq.values[t], size);
                    seq.r_subtree[t] = seq.r_node[t];
                }
                Some((l, r)) => {
                    let (l, r) = (l.index() - base, r.index() - base);
                    seq.children[t] = Some((l, r));
                    seq.parent[l] = t;
                    seq.parent[r] = t;
                    let nl = arena.node(NodeId::new(l + base)).size();
                    let nr = arena.node(NodeId::new(r + base)).size();
                    seq.values[t] = kind.combine(&seq.values[l], nl, &seq.values[r], nr);
                    seq.r_node[t] = kind.node_error(&seq.values[t], size);
                    seq.refresh(t);
                }
            }
        }

        if let Some((table, target)) = test {
            seq.measure(arena, root, kind, table, target);
        }
        seq.run();
        seq
    }

    /// Recompute the aggregates of internal node `t` from its children.
    fn refresh(&mut self, t: usize) {
        let Some((l, r)) = self.children[t] else {
            return;
        };
        self.complexity[t] = self.complexity[l] + self.complexity[r];
        self.r_subtree[t] = self.r_subtree[l] + self.r_subtree[r];
        self.r_subtree_test[t] = self.r_subtree_test[l] + self.r_subtree_test[r];
        self.g_local[t] = (self.r_node[t] - self.r_subtree[t]) / (self.complexity[t] - 1) as f64;
        self.g_global[t] = if self.g_local[t] <= self.g_global[l] && self.g_local[t] <= self.g_global[r] {
            self.g_local[t]
        } else {
            self.g_global[l].min(self.g_global[r])
        };
    }

    /// Accumulate held-out errors along each row's path.
    fn measure(
        &mut self,
        arena: &NodeArena,
        root: NodeId,
        kind: StatKind,
        table: &AttributeTable,
        target: &Target,
    ) {
        self.r_node_test.fill(0.0);
        for row in 0..table.n_rows() {
            let mut id = root;
            loop {
                let t = id.index() - self.base;
                self.r_node_test[t] += kind.row_error(&self.values[t], target, row);
                let Node::Split { attribute, threshold, .. } = arena.node(id) else {
                    break;
                };
                let Some((left, right)) = arena.children(id) else {
                    break;
                };
                let v = table.value(row, attribute.index());
                id = if is_missing(v) {
                    if arena.node(left).size() >= arena.node(right).size() {
                        left
                    } else {
                        right
                    }
                } else if threshold.goes_left(v) {
                    left
                } else {
                    right
                };
            }
        }
        for &id in self.ids.iter().rev() {
            let t = id - self.base;
            match self.children[t] {
                None => self.r_subtree_test[t] = self.r_node_test[t],
                Some((l, r)) => self.r_subtree_test[t] = self.r_subtree_test[l] + self.r_subtree_test[r],
            }
        }
    }

    /// Collapse weakest links until only the root is left.
    fn run(&mut self) {
        let mut alpha = 0.0;
        loop {
            if self.g_global[0] > alpha + EPSILON {
                self.alphas.push(alpha);
                self.errors.push(self.r_subtree_test[0]);
                alpha = self.g_global[0];
            }
            if self.complexity[0] == 1 {
                break;
            }
            let mut t = 0;
            while self.g_global[t] < self.g_local[t] - EPSILON {
                let Some((l, r)) = self.children[t] else {
                    break;
                };
                t = if self.g_global[t] == self.g_global[l] { l } else { r };
            }
            self.complexity[t] = 1;
            self.stamp[t] = alpha;
            self.g_local[t] = alpha;
            self.r_subtree[t] = self.r_node[t];
            self.r_subtree_test[t] = self.r_node_test[t];
            self.g_global[t] = f64::INFINITY;
            while t > 0 {
                t = self.parent[t];
                self.refresh(t);
            }
        }
    }

    /// Collapse, top-down, every reachable node stamped at or below `alpha`.
    fn apply(&self, arena: &mut NodeArena, alpha: f64) {
        let mut stack = vec![0usize];
        while let Some(t) = stack.pop() {
            let Some((l, r)) = self.children[t] else {
                continue;
            };
            if self.stamp[t] <= alpha {
                arena.make_leaf(NodeId::new(t + self.base), &self.values[t]);
            } else {
                stack.push(l);
                stack.push(r);
            }
        }
    }

    /// Pruning-set choice: lowest error, ties go to the larger alpha.
    fn best_alpha(&self) -> f64 {
        let mut best = 0;
        for k in 1..self.alphas.len() {
            if self.errors[k] <= self.errors[best] {
                best = k;
            }
        }
        self.alphas[best]
    }
}

/// Quinlan's pessimistic extra error count for `e` errors among `n` cases.
pub(crate) fn adderrs(n: f64, e: f64, confidence: f64) -> f64 {
    const VAL: [f64; 9] = [0.0, 0.001, 0.005, 0.01, 0.05, 0.10, 0.20, 0.40, 1.00];
    const DEV: [f64; 9] = [4.0, 3.09, 2.58, 2.33, 1.65, 1.28, 0.84, 0.25, 0.00];
    let i = VAL.iter().position(|&v| confidence <= v).unwrap_or(VAL.len() - 1).max(1);
    let dev = DEV[i - 1] + (DEV[i] - DEV[i - 1]) * (confidence - VAL[i - 1]) / (VAL[i] - VAL[i - 1]);
    let coeff = dev * dev;

    if e < 1e-6 {
        n * (1.0 - (confidence.ln() / n).exp())
    } else if e < 0.9999 {
        let val0 = n * (1.0 - (confidence.ln() / n).exp());
        val0 + e * (adderrs(n, 1.0, confidence) - val0)
    } else if e + 0.5 >= n {
        0.67 * (n - e)
    } else {
        let pr = (e + 0.5 + coeff / 2.0
            + (coeff * ((e + 0.5) * (1.0 - (e + 0.5) / n) + coeff / 4.0)).sqrt())
            / (n + coeff);
        n * pr - e
    }
}

/// C4.5 error-based pruning of one tree on its learning rows.
struct ErrorBased<'a> {
    arena: &'a mut NodeArena,
    table: &'a AttributeTable,
    labels: &'a [usize],
    n_classes: usize,
    confidence: f64,
}

impl ErrorBased<'_> {
    fn class_counts(&self, rows: &[usize]) -> Vec<f64> {
        let mut counts = vec![0.0; self.n_classes];
        for &r in rows {
            counts[self.labels[r]] += 1.0;
        }
        counts
    }

    /// Estimated errors of the subtree at `node`; prunes it when `update` is set.
    fn estimate(&mut self, node: NodeId, rows: &mut [usize], update: bool) -> f64 {
        let counts = self.class_counts(rows);
        let n = rows.len() as f64;
        let e = n - counts[argmax(&counts)];
        let as_leaf = adderrs(n, e, self.confidence) + e;

        let (attribute, threshold) = match self.arena.node(node) {
            Node::Split { attribute, threshold, .. } => (*attribute, *threshold),
            Node::Leaf { .. } => return as_leaf,
        };
        let Some((left, right)) = self.arena.children(node) else {
            return as_leaf;
        };
        let n_left = partition(rows, self.table.column(attribute.index()), &threshold);
        let (lrows, rrows) = rows.split_at_mut(n_left);
        let n_right = rrows.len();
        let subtree = self.estimate(left, lrows, update) + self.estimate(right, rrows, update);
        if !update {
            return subtree;
        }

        let largest = if n_left > n_right { left } else { right };
        let branch = self.estimate(largest, rows, false);

        if as_leaf <= branch + 0.1 && as_leaf <= subtree + 0.1 {
            let values = if n > 0.0 {
                counts.iter().map(|c| c / n).collect()
            } else {
                combined_classes(self.arena, node)
            };
            self.arena.make_leaf(node, &values);
            as_leaf
        } else if branch <= subtree + 0.1 {
            self.arena.adopt(node, largest);
            self.estimate(node, rows, true)
        } else {
            subtree
        }
    }
}

/// Size-weighted class proportions of a subtree.
fn combined_classes(arena: &NodeArena, node: NodeId) -> Vec<f64> {
    match arena.children(node) {
        None => arena.leaf_values(node).map(<[f64]>::to_vec).unwrap_or_default(),
        Some((l, r)) => StatKind::Classes.combine(
            &combined_classes(arena, l),
            arena.node(l).size(),
            &combined_classes(arena, r),
            arena.node(r).size(),
        ),
    }
}

impl Ensemble {
    /// Prune tree `tree` in place.
    ///
    /// `table` and `target` are the tree's learning set; cross-validation and
    /// error-based pruning use them, the other methods ignore them.
    ///
    /// # Errors
    ///
    /// | Variant                              | When                                          |
    /// |--------------------------------------|-----------------------------------------------|
    /// | [`TreeError::TreeOutOfRange`]        | `tree` does not exist                         |
    /// | [`TreeError::IncompatibleGoal`]      | unsupervised or LogitBoost trees; C4.5 on regression |
    /// | [`TreeError::InvalidFoldCount`]      | `folds < 2` or more folds than rows           |
    /// | [`TreeError::InvalidConfidence`]     | C4.5 confidence outside `(0, 1)`              |
    #[instrument(skip_all, fields(tree = tree))]
    pub fn prune_tree(
        &mut self,
        tree: usize,
        method: PruneMethod<'_>,
        table: &AttributeTable,
        target: &Target,
    ) -> Result<PruneReport, TreeError> {
        let root = self
            .trees
            .get(tree)
            .ok_or(TreeError::TreeOutOfRange {
                index: tree,
                n_trees: self.trees.len(),
            })?
            .root;
        let kind = StatKind::of(self)?;
        let n_leaves_before = self.arena.n_leaves(root);

        let (alphas, errors, best_alpha) = match method {
            PruneMethod::PruningSet {
                table: p_table,
                target: p_target,
            } => {
                self.check_table(p_table)?;
                p_target.validate(p_table.n_rows())?;
                let seq = Sequence::build(&self.arena, root, kind, Some((p_table, p_target)));
                let best = seq.best_alpha();
                seq.apply(&mut self.arena, best);
                (seq.alphas, seq.errors, Some(best))
            }
            PruneMethod::CrossValidation { folds, config } => {
                self.check_table(table)?;
                target.validate(table.n_rows())?;
                let (seq, errors, best) = cross_validate(&self.arena, root, kind, table, target, folds, config)?;
                seq.apply(&mut self.arena, best);
                (seq.alphas, errors, Some(best))
            }
            PruneMethod::FixedAlpha(alpha) => {
                let seq = Sequence::build(&self.arena, root, kind, None);
                seq.apply(&mut self.arena, alpha);
                (seq.alphas, Vec::new(), Some(alpha))
            }
            PruneMethod::ErrorBased { confidence } => {
                if !(confidence > 0.0 && confidence < 1.0) {
                    return Err(TreeError::InvalidConfidence { confidence });
                }
                let Target::Classes { labels, n_classes } = target else {
                    return Err(TreeError::IncompatibleGoal {
                        operation: "error-based pruning",
                        goal: target.goal().name(),
                    });
                };
                if kind != StatKind::Classes {
                    return Err(TreeError::IncompatibleGoal {
                        operation: "error-based pruning",
                        goal: self.goal.name(),
                    });
                }
                self.check_table(table)?;
                target.validate(table.n_rows())?;
                let mut rows: Vec<usize> = (0..table.n_rows()).collect();
                let mut pruner = ErrorBased {
                    arena: &mut self.arena,
                    table,
                    labels,
                    n_classes: *n_classes,
                    confidence,
                };
                let estimate = pruner.estimate(root, &mut rows, true);
                debug!(estimate, "error-based pruning estimate");
                (Vec::new(), Vec::new(), None)
            }
        };

        let n_leaves = self.arena.n_leaves(root);
        info!(?best_alpha, n_leaves_before, n_leaves, "tree pruned");
        Ok(PruneReport {
            alphas,
            errors,
            best_alpha,
            n_leaves_before,
            n_leaves,
        })
    }

    fn check_table(&self, table: &AttributeTable) -> Result<(), TreeError> {
        if table.n_attributes() != self.kinds.len() {
            return Err(TreeError::PredictionAttributeMismatch {
                expected: self.kinds.len(),
                got: table.n_attributes(),
            });
        }
        Ok(())
    }
}

/// Choose `alpha` for `root` by k-fold cross-validation.
///
/// Returns the full tree's sequence, the summed fold error of each of its
/// alphas, and the chosen alpha.
fn cross_validate(
    arena: &NodeArena,
    root: NodeId,
    kind: StatKind,
    table: &AttributeTable,
    target: &Target,
    folds: usize,
    config: &TrainConfig,
) -> Result<(Sequence, Vec<f64>, f64), TreeError> {
    let n_rows = table.n_rows();
    if folds < 2 || folds > n_rows {
        return Err(TreeError::InvalidFoldCount { n_folds: folds, n_rows });
    }
    let mut rows: Vec<usize> = (0..n_rows).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed());
    rows.shuffle(&mut rng);
    let part = n_rows.div_ceil(folds);
    let fold_config = config.clone().with_n_trees(1)?;

    let mut fold_sequences = Vec::with_capacity(folds);
    for i in 0..folds {
        let lo = (i * part).min(n_rows);
        let hi = if i == folds - 1 { n_rows } else { ((i + 1) * part).min(n_rows) };
        let learn: Vec<usize> = rows[..lo].iter().chain(&rows[hi..]).copied().collect();
        let test = &rows[lo..hi];
        let fold = crate::ensemble::train(
            &table.select_rows(&learn),
            &target.select_rows(&learn),
            None,
            &fold_config,
        )?;
        let ensemble = fold.ensemble();
        let Some(entry) = ensemble.trees.first() else {
            continue;
        };
        let held_out = (table.select_rows(test), target.select_rows(test));
        let seq = Sequence::build(&ensemble.arena, entry.root, kind, Some((&held_out.0, &held_out.1)));
        debug!(fold = i, n_test = test.len(), n_alphas = seq.alphas.len(), "fold sequence");
        fold_sequences.push((seq.alphas, seq.errors));
    }

    let full = Sequence::build(arena, root, kind, None);
    let mut cv_errors = Vec::with_capacity(full.alphas.len());
    let mut best = (f64::INFINITY, 0.0);
    for k in 0..full.alphas.len() {
        let probe = match full.alphas.get(k + 1) {
            Some(next) => (full.alphas[k] * next).sqrt(),
            None => f64::INFINITY,
        };
        let error: f64 = fold_sequences
            .iter()
            .map(|(alphas, errors)| {
                let mut l = 0;
                while l + 1 < alphas.len() && alphas[l + 1] <= probe {
                    l += 1;
                }
                errors[l]
            })
            .sum();
        cv_errors.push(error);
        if error <= best.0 {
            best = (error, full.alphas[k]);
        }
    }
    info!(best_alpha = best.1, cv_error = best.0, "cross-validation pruning");
    Ok((full, cv_errors, best.1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{AttributeIndex, Threshold};

    /// Root splits off a pure left leaf; the right child splits a 3:1 node
    /// into two pure leaves.
    fn classification_tree() -> Ensemble {
        let mut arena = NodeArena::with_capacity(5, 2).unwrap();
        let root = arena.allocate(8.0);
        let l = arena.allocate(4.0);
        let r = arena.allocate(4.0);
        arena.make_split(root, AttributeIndex::new(0), Threshold::Numeric(4.5), l, r);
        arena.make_leaf(l, &[1.0, 0.0]);
        let rl = arena.allocate(3.0);
        let rr = arena.allocate(1.0);
        arena.make_split(r, AttributeIndex::new(0), Threshold::Numeric(7.5), rl, rr);
        arena.make_leaf(rl, &[0.0, 1.0]);
        arena.make_leaf(rr, &[1.0, 0.0]);
        Ensemble::new(
            arena,
            vec![crate::ensemble::TreeEntry { root, weight: 1.0 }],
            Goal::Classification { n_classes: 2 },
            Aggregation::Average,
            vec![crate::table::AttributeKind::Numerical],
        )
    }

    #[test]
    fn weakest_link_sequence() {
        let ensemble = classification_tree();
        let seq = Sequence::build(&ensemble.arena, NodeId::new(0), StatKind::Classes, None);
        // Right node: r_node = 1, subtree error 0, one leaf saved ⇒ g = 1.
        // Root after that: r_node = 8·(1 - 5/8) = 3, subtree 1, one leaf saved ⇒ g = 2.
        assert_eq!(seq.alphas, vec![0.0, 1.0, 2.0]);
        assert_eq!(seq.stamp[2], 1.0);
        assert_eq!(seq.stamp[0], 2.0);
    }

    #[test]
    fn fixed_alpha_collapses_weak_links() {
        let mut ensemble = classification_tree();
        let table = AttributeTable::numerical(vec![vec![0.0]]).unwrap();
        let target = Target::classes(vec![0]);
        let report = ensemble
            .prune_tree(0, PruneMethod::FixedAlpha(1.0), &table, &target)
            .unwrap();
        assert_eq!(report.n_leaves_before, 3);
        assert_eq!(report.n_leaves, 2);
        let values = ensemble.arena.leaf_values(NodeId::new(2)).unwrap();
        assert!((values[0] - 0.25).abs() < 1e-12);
        assert!((values[1] - 0.75).abs() < 1e-12);
    }

    #[test]
    fn fixed_alpha_is_idempotent() {
        let mut ensemble = classification_tree();
        let table = AttributeTable::numerical(vec![vec![0.0]]).unwrap();
        let target = Target::classes(vec![0]);
        ensemble.prune_tree(0, PruneMethod::FixedAlpha(1.0), &table, &target).unwrap();
        let before = ensemble.arena.clone();
        let report = ensemble.prune_tree(0, PruneMethod::FixedAlpha(1.0), &table, &target).unwrap();
        assert_eq!(report.n_leaves_before, report.n_leaves);
        assert_eq!(ensemble.arena.nodes(), before.nodes());
    }

    #[test]
    fn pruning_set_prefers_larger_alpha_on_ties() {
        let mut ensemble = classification_tree();
        // Held-out rows agree with both the full tree and the one-split tree.
        let p_table = AttributeTable::numerical(vec![vec![1.0, 6.0]]).unwrap();
        let p_target = Target::classes(vec![0, 1]);
        let report = ensemble
            .prune_tree(
                0,
                PruneMethod::PruningSet {
                    table: &p_table,
                    target: &p_target,
                },
                &p_table,
                &p_target,
            )
            .unwrap();
        assert_eq!(report.errors, vec![0.0, 0.0, 1.0]);
        assert_eq!(report.best_alpha, Some(1.0));
        assert_eq!(report.n_leaves, 2);
    }

    #[test]
    fn adderrs_reference_values() {
        // No error: n·(1 - cf^(1/n)).
        let n = 4.0;
        assert!((adderrs(n, 0.0, 0.25) - n * (1.0 - 0.25f64.powf(1.0 / n))).abs() < 1e-12);
        // All wrong: 0.67·(n - e).
        assert!((adderrs(2.0, 2.0, 0.25) - 0.0).abs() < 1e-12);
        assert!(adderrs(10.0, 2.0, 0.25) > 0.0);
    }

    #[test]
    fn error_based_collapses_unsupported_split() {
        let mut ensemble = classification_tree();
        // On these rows the right split separates nothing useful.
        let table = AttributeTable::numerical(vec![vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]]).unwrap();
        let target = Target::classes(vec![0, 0, 0, 0, 1, 0, 1, 1]);
        ensemble
            .prune_tree(
                0,
                PruneMethod::ErrorBased {
                    confidence: DEFAULT_C45_CONFIDENCE,
                },
                &table,
                &target,
            )
            .unwrap();
        assert!(ensemble.arena.node(NodeId::new(2)).is_leaf());
        assert!(!ensemble.arena.node(NodeId::new(0)).is_leaf());
    }

    #[test]
    fn invalid_fold_count() {
        let mut ensemble = classification_tree();
        let table = AttributeTable::numerical(vec![vec![1.0, 2.0]]).unwrap();
        let target = Target::classes(vec![0, 1]);
        let config = TrainConfig::single_tree();
        assert!(matches!(
            ensemble.prune_tree(
                0,
                PruneMethod::CrossValidation {
                    folds: 3,
                    config: &config
                },
                &table,
                &target
            ),
            Err(TreeError::InvalidFoldCount { n_folds: 3, n_rows: 2 })
        ));
    }

    #[test]
    fn unsupervised_cannot_be_pruned() {
        let mut ensemble = classification_tree();
        ensemble.goal = Goal::Unsupervised;
        let table = AttributeTable::numerical(vec![vec![1.0]]).unwrap();
        assert!(matches!(
            ensemble.prune_tree(0, PruneMethod::FixedAlpha(0.0), &table, &Target::Unsupervised),
            Err(TreeError::IncompatibleGoal { .. })
        ));
    }
}
