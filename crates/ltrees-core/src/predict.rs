//! Tree walks and ensemble prediction.

use rayon::iter::{IntoParallelIterator, IntoParallelRefIterator, ParallelIterator};

use crate::ensemble::{Aggregation, Ensemble};
use crate::error::TreeError;
use crate::node::{Node, NodeArena, NodeId};
use crate::resample::{argmax, logistic};
use crate::table::{AttributeTable, Goal, is_missing};

/// Class probability distribution from a prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDistribution {
    probs: Vec<f64>,
}

impl ClassDistribution {
    pub(crate) fn new(probs: Vec<f64>) -> Self {
        Self { probs }
    }

    /// Return the predicted class (argmax of probabilities, first wins ties).
    #[must_use]
    pub fn predicted_class(&self) -> usize {
        argmax(&self.probs)
    }

    /// Return the top-k classes sorted by descending probability.
    #[must_use]
    pub fn top_k(&self, k: usize) -> Vec<(usize, f64)> {
        let mut indexed: Vec<(usize, f64)> = self.probs.iter().copied().enumerate().collect();
        indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
        indexed.truncate(k);
        indexed
    }

    /// Return the probability distribution as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.probs
    }
}

/// Output of an ensemble for one row.
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    /// Class probabilities.
    Classes(ClassDistribution),
    /// Regression output.
    Value(f64),
}

impl Prediction {
    /// Return the class distribution, if this is a classification output.
    #[must_use]
    pub fn classes(&self) -> Option<&ClassDistribution> {
        match self {
            Prediction::Classes(d) => Some(d),
            Prediction::Value(_) => None,
        }
    }

    /// Return the regression output, if this is one.
    #[must_use]
    pub fn value(&self) -> Option<f64> {
        match self {
            Prediction::Value(v) => Some(*v),
            Prediction::Classes(_) => None,
        }
    }
}

/// Follow single branches from `root` to a leaf using a training table row.
///
/// Training tables never hold missing codes, so the walk never forks.
pub(crate) fn descend(arena: &NodeArena, root: NodeId, table: &AttributeTable, row: usize) -> NodeId {
    let mut id = root;
    while let Node::Split {
        attribute,
        threshold,
        left_offset,
        right_offset,
        ..
    } = arena.node(id)
    {
        let value = table.value(row, attribute.index());
        id = id.offset(if threshold.goes_left(value) {
            *left_offset
        } else {
            *right_offset
        });
    }
    id
}

/// Add `weight ×` the tree's output for one row into `out`.
///
/// A missing tested value forks the walk; each branch carries the fraction
/// of training rows that went that way.
pub(crate) fn accumulate_tree(
    arena: &NodeArena,
    root: NodeId,
    value: impl Fn(usize) -> f32,
    weight: f64,
    out: &mut [f64],
) {
    let mut stack = vec![(root, weight)];
    while let Some((id, w)) = stack.pop() {
        match arena.node(id) {
            Node::Leaf { .. } => {
                if let Some(values) = arena.leaf_values(id) {
                    for (o, v) in out.iter_mut().zip(values) {
                        *o += w * v;
                    }
                }
            }
            Node::Split {
                attribute,
                threshold,
                left_offset,
                right_offset,
                size,
            } => {
                let left = id.offset(*left_offset);
                let right = id.offset(*right_offset);
                let v = value(attribute.index());
                if is_missing(v) {
                    let (ls, rs) = (arena.node(left).size(), arena.node(right).size());
                    let total = if *size > 0.0 { *size } else { ls + rs };
                    if total > 0.0 {
                        stack.push((right, w * rs / total));
                        stack.push((left, w * ls / total));
                    }
                } else if threshold.goes_left(v) {
                    stack.push((left, w));
                } else {
                    stack.push((right, w));
                }
            }
        }
    }
}

impl Ensemble {
    fn check_row(&self, row: &[f32]) -> Result<(), TreeError> {
        if row.len() != self.kinds.len() {
            return Err(TreeError::PredictionAttributeMismatch {
                expected: self.kinds.len(),
                got: row.len(),
            });
        }
        if self.goal == Goal::Unsupervised {
            return Err(TreeError::NoPrediction);
        }
        Ok(())
    }

    /// Combine the first `n_trees` trees for one row given by an accessor.
    fn combine(&self, value: impl Fn(usize) -> f32 + Copy, n_trees: usize) -> Prediction {
        let mut acc = vec![0.0; self.arena.slot_width()];
        let mut total_weight = 0.0;
        for tree in &self.trees[..n_trees] {
            accumulate_tree(&self.arena, tree.root, value, tree.weight, &mut acc);
            total_weight += tree.weight;
        }
        match self.aggregation {
            Aggregation::Average => {
                if total_weight > 0.0 {
                    acc.iter_mut().for_each(|v| *v /= total_weight);
                }
            }
            Aggregation::Sum | Aggregation::Logistic => {}
        }
        match (self.goal, self.aggregation) {
            (_, Aggregation::Logistic) => {
                let p = logistic(acc.first().copied().unwrap_or(0.0));
                Prediction::Classes(ClassDistribution::new(vec![1.0 - p, p]))
            }
            (Goal::Classification { .. }, _) => Prediction::Classes(ClassDistribution::new(acc)),
            _ => Prediction::Value(acc.first().copied().unwrap_or(0.0)),
        }
    }

    /// Predict one row with the active trees.
    ///
    /// Missing codes (`NaN`) split the row across both branches of any node
    /// that tests them.
    ///
    /// # Errors
    ///
    /// | Variant                                      | When                                |
    /// |----------------------------------------------|-------------------------------------|
    /// | [`TreeError::PredictionAttributeMismatch`]   | `row.len() != n_attributes`         |
    /// | [`TreeError::NoPrediction`]                  | the ensemble is unsupervised        |
    pub fn predict(&self, row: &[f32]) -> Result<Prediction, TreeError> {
        self.predict_first(row, self.active)
    }

    /// Predict one row with only the first `n_trees` trees.
    ///
    /// # Errors
    ///
    /// Same as [`Ensemble::predict`], plus [`TreeError::TreeOutOfRange`] when
    /// `n_trees` exceeds the ensemble size.
    pub fn predict_first(&self, row: &[f32], n_trees: usize) -> Result<Prediction, TreeError> {
        self.check_row(row)?;
        if n_trees > self.trees.len() {
            return Err(TreeError::TreeOutOfRange {
                index: n_trees,
                n_trees: self.trees.len(),
            });
        }
        Ok(self.combine(|a| row[a], n_trees))
    }

    /// Predict one row with a single tree, ignoring the ensemble weights.
    ///
    /// # Errors
    ///
    /// Same as [`Ensemble::predict`], plus [`TreeError::TreeOutOfRange`].
    pub fn predict_tree(&self, tree: usize, row: &[f32]) -> Result<Prediction, TreeError> {
        self.check_row(row)?;
        let entry = self.trees.get(tree).ok_or(TreeError::TreeOutOfRange {
            index: tree,
            n_trees: self.trees.len(),
        })?;
        let mut acc = vec![0.0; self.arena.slot_width()];
        accumulate_tree(&self.arena, entry.root, |a| row[a], 1.0, &mut acc);
        Ok(match self.goal {
            Goal::Classification { .. } if self.aggregation != Aggregation::Logistic => {
                Prediction::Classes(ClassDistribution::new(acc))
            }
            _ => Prediction::Value(acc.first().copied().unwrap_or(0.0)),
        })
    }

    /// Predict rows in parallel with the active trees.
    ///
    /// # Errors
    ///
    /// Same as [`Ensemble::predict`] for the first failing row.
    pub fn predict_batch(&self, rows: &[Vec<f32>]) -> Result<Vec<Prediction>, TreeError> {
        rows.par_iter().map(|row| self.predict(row)).collect()
    }

    /// Predict every row of a table in parallel with the active trees.
    ///
    /// # Errors
    ///
    /// Same as [`Ensemble::predict`].
    pub fn predict_table(&self, table: &AttributeTable) -> Result<Vec<Prediction>, TreeError> {
        if table.n_attributes() != self.kinds.len() {
            return Err(TreeError::PredictionAttributeMismatch {
                expected: self.kinds.len(),
                got: table.n_attributes(),
            });
        }
        if self.goal == Goal::Unsupervised {
            return Err(TreeError::NoPrediction);
        }
        Ok((0..table.n_rows())
            .into_par_iter()
            .map(|r| self.combine(|a| table.value(r, a), self.active))
            .collect())
    }

    /// Return the leaf reached by `row` in each active tree.
    ///
    /// Missing codes follow the branch that received more training rows.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::PredictionAttributeMismatch`] when the row length is wrong.
    pub fn leaf_ids(&self, row: &[f32]) -> Result<Vec<NodeId>, TreeError> {
        if row.len() != self.kinds.len() {
            return Err(TreeError::PredictionAttributeMismatch {
                expected: self.kinds.len(),
                got: row.len(),
            });
        }
        Ok(self.trees[..self.active]
            .iter()
            .map(|tree| self.leaf_of(tree.root, |a| row[a]))
            .collect())
    }

    pub(crate) fn leaf_of(&self, root: NodeId, value: impl Fn(usize) -> f32) -> NodeId {
        let mut id = root;
        while let Node::Split {
            attribute,
            threshold,
            ..
        } = self.arena.node(id)
        {
            let Some((left, right)) = self.arena.children(id) else {
                break;
            };
            let v = value(attribute.index());
            id = if is_missing(v) {
                if self.arena.node(left).size() >= self.arena.node(right).size() {
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
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{AttributeIndex, Threshold};
    use crate::table::MISSING;

    fn stump() -> (NodeArena, NodeId) {
        let mut arena = NodeArena::with_capacity(3, 2).unwrap();
        let root = arena.allocate(4.0);
        let l = arena.allocate(1.0);
        let r = arena.allocate(3.0);
        arena.make_split(root, AttributeIndex::new(0), Threshold::Numeric(1.5), l, r);
        arena.make_leaf(l, &[1.0, 0.0]);
        arena.make_leaf(r, &[0.0, 1.0]);
        (arena, root)
    }

    #[test]
    fn classical_walk() {
        let (arena, root) = stump();
        let mut out = [0.0; 2];
        accumulate_tree(&arena, root, |_| 1.0, 1.0, &mut out);
        assert_eq!(out, [1.0, 0.0]);
    }

    #[test]
    fn missing_value_forks_by_size() {
        let (arena, root) = stump();
        let mut out = [0.0; 2];
        accumulate_tree(&arena, root, |_| MISSING, 1.0, &mut out);
        assert!((out[0] - 0.25).abs() < 1e-12);
        assert!((out[1] - 0.75).abs() < 1e-12);
    }

    #[test]
    fn distribution_helpers() {
        let d = ClassDistribution::new(vec![0.2, 0.5, 0.3]);
        assert_eq!(d.predicted_class(), 1);
        assert_eq!(d.top_k(2), vec![(1, 0.5), (2, 0.3)]);
    }
}
