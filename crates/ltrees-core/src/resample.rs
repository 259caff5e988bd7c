//! Per-round learning-set rewriting and tree weighting for every ensemble method.

use rand::Rng;
use tracing::debug;

use crate::node::{NodeArena, NodeId};
use crate::predict::descend;
use crate::score::Response;
use crate::split::LearningData;
use crate::table::{AttributeTable, Target};

/// Floor applied to LogitBoost weights `p(1-p)`.
const LOGIT_MIN_WEIGHT: f64 = 1e-14;

/// Initial LogitBoost weight of every row.
const LOGIT_INITIAL_WEIGHT: f64 = 0.5;

/// How each round's learning set is built and how finished trees are weighted.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Resampling {
    /// Every row with weight 1, every tree with weight 1.
    Identity,
    /// Bootstrap: `n` draws with replacement, weight = multiplicity.
    Bagging,
    /// AdaBoost.M1 reweighting by the weighted error of each tree.
    Boosting,
    /// Least-squares gradient boosting on residuals.
    Mart {
        /// Weight given to every tree after the initial constant.
        shrinkage: f64,
    },
    /// Two-class LogitBoost with regression trees on the working response.
    LogitBoost {
        /// Weight given to every tree.
        shrinkage: f64,
        /// Clamp applied to the working response.
        z_max: f64,
    },
}

impl Resampling {
    /// Return `true` when tree outputs are summed instead of averaged.
    #[must_use]
    pub fn sums_predictions(self) -> bool {
        matches!(self, Resampling::Mart { .. } | Resampling::LogitBoost { .. })
    }

    /// Return `true` when trees are fitted to a working regression response.
    #[must_use]
    pub fn fits_working_response(self) -> bool {
        self.sums_predictions()
    }

    /// Short name used in logs and errors.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Resampling::Identity => "identity",
            Resampling::Bagging => "bagging",
            Resampling::Boosting => "boosting",
            Resampling::Mart { .. } => "mart",
            Resampling::LogitBoost { .. } => "logit-boost",
        }
    }
}

/// Outcome of weighting one finished tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum TreeWeight {
    /// Keep the tree with this weight and continue.
    Keep(f64),
    /// The tree is too weak: discard it and stop.
    Discard,
    /// The tree is perfect: keep only this tree and stop.
    Perfect,
}

/// Mutable resampling state for one training call.
#[derive(Debug, Clone)]
pub(crate) struct RoundSampler {
    method: Resampling,
    n_rows: usize,
    weights: Vec<f64>,
    rows: Vec<usize>,
    /// Residuals (MART) or working response `z` (LogitBoost).
    working: Vec<f64>,
    /// Accumulated LogitBoost output `F`.
    output: Vec<f64>,
    misclassified: Vec<bool>,
    round: usize,
}

impl RoundSampler {
    pub(crate) fn new(method: Resampling, target: &Target, n_rows: usize) -> Self {
        let mut working = Vec::new();
        let mut output = Vec::new();
        let mut weights = vec![1.0; n_rows];
        match (method, target) {
            (Resampling::Mart { .. }, Target::Values(values)) => working = values.clone(),
            (Resampling::LogitBoost { .. }, Target::Classes { labels, .. }) => {
                working = labels.iter().map(|&c| 4.0 * (c as f64 - 0.5)).collect();
                output = vec![0.0; n_rows];
                weights.fill(LOGIT_INITIAL_WEIGHT);
            }
            _ => {}
        }
        Self {
            method,
            n_rows,
            weights,
            rows: (0..n_rows).collect(),
            working,
            output,
            misclassified: Vec::new(),
            round: 0,
        }
    }

    /// Return `true` when the coming round must be a single leaf.
    pub(crate) fn wants_single_leaf(&self) -> bool {
        matches!(self.method, Resampling::Mart { .. }) && self.round == 0
    }

    /// Rewrite the learning set for the coming round.
    pub(crate) fn prepare(&mut self, rng: &mut impl Rng) {
        if self.method == Resampling::Bagging {
            self.weights.fill(0.0);
            for _ in 0..self.n_rows {
                self.weights[rng.gen_range(0..self.n_rows)] += 1.0;
            }
            self.keep_weighted_rows();
        }
    }

    /// Rows of the current learning set.
    pub(crate) fn rows(&self) -> &[usize] {
        &self.rows
    }

    /// Borrow the learning data and the mutable row set together.
    pub(crate) fn parts<'a>(
        &'a mut self,
        table: &'a AttributeTable,
        target: &'a Target,
    ) -> (LearningData<'a>, &'a mut [usize]) {
        let response = if self.method.fits_working_response() {
            Response::Values(&self.working)
        } else {
            match target {
                Target::Classes { labels, .. } => Response::Classes(labels),
                Target::Values(values) => Response::Values(values),
                Target::Unsupervised => Response::None,
            }
        };
        let data = LearningData {
            table,
            weights: &self.weights,
            response,
        };
        (data, &mut self.rows)
    }

    /// Weight the tree grown this round and update state for the next one.
    pub(crate) fn finish_round(
        &mut self,
        arena: &NodeArena,
        root: NodeId,
        table: &AttributeTable,
        target: &Target,
    ) -> TreeWeight {
        let round = self.round;
        self.round += 1;
        match self.method {
            Resampling::Identity | Resampling::Bagging => TreeWeight::Keep(1.0),
            Resampling::Boosting => self.reweight_boosting(arena, root, table, target),
            Resampling::Mart { shrinkage } => {
                let mu = if round == 0 { 1.0 } else { shrinkage };
                for row in 0..self.n_rows {
                    self.working[row] -= mu * leaf_output(arena, root, table, row);
                }
                TreeWeight::Keep(mu)
            }
            Resampling::LogitBoost { shrinkage, z_max } => {
                let Target::Classes { labels, .. } = target else {
                    return TreeWeight::Keep(shrinkage);
                };
                for row in 0..self.n_rows {
                    self.output[row] += shrinkage * leaf_output(arena, root, table, row);
                    let p = logistic(self.output[row]);
                    let w = p * (1.0 - p);
                    self.weights[row] = w.max(LOGIT_MIN_WEIGHT);
                    let residual = labels[row] as f64 - p;
                    self.working[row] = if w > 0.0 {
                        (residual / w).clamp(-z_max, z_max)
                    } else if residual == 0.0 {
                        0.0
                    } else {
                        z_max.copysign(residual)
                    };
                }
                TreeWeight::Keep(shrinkage)
            }
        }
    }

    fn reweight_boosting(
        &mut self,
        arena: &NodeArena,
        root: NodeId,
        table: &AttributeTable,
        target: &Target,
    ) -> TreeWeight {
        let Target::Classes { labels, .. } = target else {
            return TreeWeight::Keep(1.0);
        };
        self.misclassified.clear();
        let mut total = 0.0;
        let mut error = 0.0;
        for row in 0..self.n_rows {
            let leaf = descend(arena, root, table, row);
            let predicted = arena.leaf_values(leaf).map_or(0, argmax);
            let wrong = predicted != labels[row];
            total += self.weights[row];
            if wrong {
                error += self.weights[row];
            }
            self.misclassified.push(wrong);
        }
        let error = if total > 0.0 { error / total } else { 0.0 };
        debug!(round = self.round - 1, weighted_error = error, "boosting round");
        if error > 0.5 {
            return TreeWeight::Discard;
        }
        if error == 0.0 {
            return TreeWeight::Perfect;
        }
        let on_error = 0.5 / error;
        let on_correct = 0.5 / (1.0 - error);
        for (w, &wrong) in self.weights.iter_mut().zip(&self.misclassified) {
            *w *= if wrong { on_error } else { on_correct };
        }
        self.keep_weighted_rows();
        TreeWeight::Keep(((1.0 - error) / error).ln())
    }

    fn keep_weighted_rows(&mut self) {
        self.rows.clear();
        let weights = &self.weights;
        self.rows.extend((0..self.n_rows).filter(|&i| weights[i] > 0.0));
    }
}

/// Index of the largest value; first wins ties.
pub(crate) fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// `e^f / (1 + e^f)`.
pub(crate) fn logistic(f: f64) -> f64 {
    1.0 / (1.0 + (-f).exp())
}

fn leaf_output(arena: &NodeArena, root: NodeId, table: &AttributeTable, row: usize) -> f64 {
    let leaf = descend(arena, root, table, row);
    arena.leaf_values(leaf).map_or(0.0, |v| v[0])
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::node::{AttributeIndex, Threshold};

    /// One split on attribute 0 at 1.5 with the given leaf vectors.
    fn stump(left: &[f64], right: &[f64]) -> (NodeArena, NodeId) {
        let mut arena = NodeArena::with_capacity(3, left.len()).unwrap();
        let root = arena.allocate(4.0);
        let l = arena.allocate(2.0);
        let r = arena.allocate(2.0);
        arena.make_split(root, AttributeIndex::new(0), Threshold::Numeric(1.5), l, r);
        arena.make_leaf(l, left);
        arena.make_leaf(r, right);
        (arena, root)
    }

    #[test]
    fn bagging_weights_are_multiplicities() {
        let target = Target::classes(vec![0; 10]);
        let mut sampler = RoundSampler::new(Resampling::Bagging, &target, 10);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        sampler.prepare(&mut rng);
        let total: f64 = sampler.weights.iter().sum();
        assert_eq!(total, 10.0);
        assert!(sampler.rows().iter().all(|&r| sampler.weights[r] > 0.0));
        let positive = sampler.weights.iter().filter(|&&w| w > 0.0).count();
        assert_eq!(sampler.rows().len(), positive);
    }

    #[test]
    fn bagging_single_row_keeps_it() {
        let target = Target::values(vec![3.0]);
        let mut sampler = RoundSampler::new(Resampling::Bagging, &target, 1);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        sampler.prepare(&mut rng);
        assert_eq!(sampler.rows(), &[0]);
        assert_eq!(sampler.weights, vec![1.0]);
    }

    #[test]
    fn boosting_reweights_errors() {
        let table = AttributeTable::numerical(vec![vec![1.0, 1.0, 2.0, 2.0]]).unwrap();
        // Row 3 is misclassified by the stump.
        let target = Target::classes(vec![0, 0, 1, 0]);
        let (arena, root) = stump(&[1.0, 0.0], &[0.0, 1.0]);
        let mut sampler = RoundSampler::new(Resampling::Boosting, &target, 4);
        let weight = sampler.finish_round(&arena, root, &table, &target);
        let TreeWeight::Keep(w) = weight else {
            panic!("expected a kept tree, got {weight:?}");
        };
        assert!((w - 3.0f64.ln()).abs() < 1e-12);
        assert!((sampler.weights[3] - 2.0).abs() < 1e-12);
        assert!((sampler.weights[0] - 2.0 / 3.0).abs() < 1e-12);
        let total: f64 = sampler.weights.iter().sum();
        assert!((total - 4.0).abs() < 1e-12);
    }

    #[test]
    fn boosting_signals_perfect_and_weak_trees() {
        let table = AttributeTable::numerical(vec![vec![1.0, 1.0, 2.0, 2.0]]).unwrap();
        let (arena, root) = stump(&[1.0, 0.0], &[0.0, 1.0]);

        let perfect = Target::classes(vec![0, 0, 1, 1]);
        let mut sampler = RoundSampler::new(Resampling::Boosting, &perfect, 4);
        assert_eq!(sampler.finish_round(&arena, root, &table, &perfect), TreeWeight::Perfect);

        let inverted = Target::classes(vec![1, 1, 0, 0]);
        let mut sampler = RoundSampler::new(Resampling::Boosting, &inverted, 4);
        assert_eq!(sampler.finish_round(&arena, root, &table, &inverted), TreeWeight::Discard);
    }

    #[test]
    fn mart_subtracts_residuals() {
        let table = AttributeTable::numerical(vec![vec![1.0, 1.0, 2.0, 2.0]]).unwrap();
        let target = Target::values(vec![1.0, 3.0, 10.0, 12.0]);
        let mut sampler = RoundSampler::new(Resampling::Mart { shrinkage: 0.5 }, &target, 4);
        assert!(sampler.wants_single_leaf());

        let mut constant = NodeArena::with_capacity(1, 2).unwrap();
        let root = constant.allocate(4.0);
        constant.make_leaf(root, &[6.5, 0.0]);
        assert_eq!(sampler.finish_round(&constant, root, &table, &target), TreeWeight::Keep(1.0));
        assert_eq!(sampler.working, vec![-5.5, -3.5, 3.5, 5.5]);
        assert!(!sampler.wants_single_leaf());

        let (arena, root) = stump(&[-4.5, 1.0], &[4.5, 1.0]);
        assert_eq!(sampler.finish_round(&arena, root, &table, &target), TreeWeight::Keep(0.5));
        assert_eq!(sampler.working, vec![-3.25, -1.25, 1.25, 3.25]);
    }

    #[test]
    fn logit_boost_working_response() {
        let target = Target::classes(vec![0, 1]);
        let sampler = RoundSampler::new(
            Resampling::LogitBoost {
                shrinkage: 1.0,
                z_max: 10.0,
            },
            &target,
            2,
        );
        assert_eq!(sampler.working, vec![-2.0, 2.0]);
        assert_eq!(sampler.weights, vec![0.5, 0.5]);
    }

    #[test]
    fn logit_boost_clamps_response() {
        let table = AttributeTable::numerical(vec![vec![1.0, 2.0]]).unwrap();
        let target = Target::classes(vec![0, 1]);
        let mut sampler = RoundSampler::new(
            Resampling::LogitBoost {
                shrinkage: 1.0,
                z_max: 3.0,
            },
            &target,
            2,
        );
        let (arena, root) = stump(&[-2.0, 0.0], &[2.0, 0.0]);
        sampler.finish_round(&arena, root, &table, &target);
        let p = logistic(2.0);
        assert!((sampler.weights[1] - p * (1.0 - p)).abs() < 1e-12);
        assert!(sampler.working.iter().all(|z| z.abs() <= 3.0));
        assert!(sampler.working[0] < 0.0 && sampler.working[1] > 0.0);
    }

    #[test]
    fn argmax_prefers_first() {
        assert_eq!(argmax(&[0.5, 0.5]), 0);
        assert_eq!(argmax(&[0.1, 0.7, 0.2]), 1);
    }
}
