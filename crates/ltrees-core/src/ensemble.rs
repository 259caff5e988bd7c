//! The fitted ensemble and the training driver that builds it.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::{OobMode, TrainConfig};
use crate::error::TreeError;
use crate::grow::TreeGrower;
use crate::importance::impurity_importances;
use crate::missing::{Imputer, MissingValues};
use crate::node::{Checkpoint, NodeArena, NodeId};
use crate::oob::compute_oob;
use crate::predict::accumulate_tree;
use crate::resample::{Resampling, RoundSampler, TreeWeight, argmax};
use crate::result::{StopReason, TrainingMetadata, TrainingResult};
use crate::score::Scorer;
use crate::split::SplitFinder;
use crate::table::{AttributeKind, AttributeTable, Goal, Target};

/// How per-tree outputs are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Aggregation {
    /// `Σ w·pred / Σ w`.
    Average,
    /// `Σ w·pred`, no normalization.
    Sum,
    /// `Σ w·pred` mapped through the logistic function to a class-1 probability.
    Logistic,
}

impl Aggregation {
    pub(crate) fn for_resampling(resampling: Resampling) -> Self {
        match resampling {
            Resampling::Mart { .. } => Aggregation::Sum,
            Resampling::LogitBoost { .. } => Aggregation::Logistic,
            Resampling::Identity | Resampling::Bagging | Resampling::Boosting => {
                Aggregation::Average
            }
        }
    }
}

/// Root and weight of one tree.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TreeEntry {
    /// Root node id in the shared arena.
    pub root: NodeId,
    /// Ensemble weight of the tree.
    pub weight: f64,
}

/// A fitted tree ensemble sharing one node arena.
///
/// Read-only after training apart from the active-tree cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct Ensemble {
    pub(crate) arena: NodeArena,
    pub(crate) trees: Vec<TreeEntry>,
    pub(crate) goal: Goal,
    pub(crate) aggregation: Aggregation,
    pub(crate) kinds: Vec<AttributeKind>,
    pub(crate) active: usize,
}

impl Ensemble {
    pub(crate) fn new(
        arena: NodeArena,
        trees: Vec<TreeEntry>,
        goal: Goal,
        aggregation: Aggregation,
        kinds: Vec<AttributeKind>,
    ) -> Self {
        let active = trees.len();
        Self {
            arena,
            trees,
            goal,
            aggregation,
            kinds,
            active,
        }
    }

    /// Return the number of trees.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Return the number of node records across all trees.
    #[must_use]
    pub fn n_nodes(&self) -> usize {
        self.arena.len()
    }

    /// Return the learning goal.
    #[must_use]
    pub fn goal(&self) -> Goal {
        self.goal
    }

    /// Return how tree outputs are combined.
    #[must_use]
    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    /// Return the attribute descriptors the ensemble was trained with.
    #[must_use]
    pub fn attribute_kinds(&self) -> &[AttributeKind] {
        &self.kinds
    }

    /// Return every tree's root and weight.
    #[must_use]
    pub fn trees(&self) -> &[TreeEntry] {
        &self.trees
    }

    /// Return every tree's weight.
    #[must_use]
    pub fn tree_weights(&self) -> Vec<f64> {
        self.trees.iter().map(|t| t.weight).collect()
    }

    /// Borrow the node arena.
    #[must_use]
    pub fn arena(&self) -> &NodeArena {
        &self.arena
    }

    /// Return how many leading trees predictions use.
    #[must_use]
    pub fn active_trees(&self) -> usize {
        self.active
    }

    /// Restrict predictions to the first `n` trees.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::TreeOutOfRange`] when `n` exceeds the tree count.
    pub fn set_active_trees(&mut self, n: usize) -> Result<(), TreeError> {
        if n > self.trees.len() {
            return Err(TreeError::TreeOutOfRange {
                index: n,
                n_trees: self.trees.len(),
            });
        }
        self.active = n;
        Ok(())
    }
}

/// Lifecycle of one training call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DriverState {
    Idle,
    Initializing,
    Growing,
    Reweighting,
    Finalized,
}

/// Running combined prediction on a held-out set.
#[derive(Debug)]
struct HeldOut<'a> {
    table: &'a AttributeTable,
    target: &'a Target,
    aggregation: Aggregation,
    width: usize,
    acc: Vec<f64>,
    total_weight: f64,
}

impl<'a> HeldOut<'a> {
    fn new(
        table: &'a AttributeTable,
        target: &'a Target,
        aggregation: Aggregation,
        width: usize,
    ) -> Self {
        Self {
            table,
            target,
            aggregation,
            width,
            acc: vec![0.0; table.n_rows() * width],
            total_weight: 0.0,
        }
    }

    fn reset(&mut self) {
        self.acc.fill(0.0);
        self.total_weight = 0.0;
    }

    /// Add one tree and return the combined error: % misclassified or MSE.
    fn add_tree(&mut self, arena: &NodeArena, root: NodeId, weight: f64) -> f64 {
        let n = self.table.n_rows();
        let table = self.table;
        for r in 0..n {
            let out = &mut self.acc[r * self.width..(r + 1) * self.width];
            accumulate_tree(arena, root, |a| table.value(r, a), weight, out);
        }
        self.total_weight += weight;
        if n == 0 {
            return 0.0;
        }
        match self.target {
            Target::Classes { labels, .. } => {
                let wrong = (0..n)
                    .filter(|&r| {
                        let out = &self.acc[r * self.width..(r + 1) * self.width];
                        let predicted = match self.aggregation {
                            Aggregation::Logistic => usize::from(out[0] > 0.0),
                            _ => argmax(out),
                        };
                        predicted != labels[r]
                    })
                    .count();
                100.0 * wrong as f64 / n as f64
            }
            Target::Values(values) => {
                let sq: f64 = (0..n)
                    .map(|r| {
                        let mut pred = self.acc[r * self.width];
                        if self.aggregation == Aggregation::Average && self.total_weight > 0.0 {
                            pred /= self.total_weight;
                        }
                        (pred - values[r]).powi(2)
                    })
                    .sum();
                sq / n as f64
            }
            Target::Unsupervised => 0.0,
        }
    }
}

fn validate_held_out(
    table: &AttributeTable,
    target: &Target,
    held_out: Option<(&AttributeTable, &Target)>,
) -> Result<(), TreeError> {
    let Some((h_table, h_target)) = held_out else {
        return Ok(());
    };
    if target.goal() == Goal::Unsupervised || h_target.goal() != target.goal() {
        return Err(TreeError::IncompatibleGoal {
            operation: "validation",
            goal: h_target.goal().name(),
        });
    }
    if h_table.n_attributes() != table.n_attributes() {
        return Err(TreeError::PredictionAttributeMismatch {
            expected: table.n_attributes(),
            got: h_table.n_attributes(),
        });
    }
    if h_table.kinds() != table.kinds() {
        return Err(TreeError::DescriptorCountMismatch {
            expected: table.n_attributes(),
            got: h_table.n_attributes(),
        });
    }
    h_target.validate(h_table.n_rows())
}

/// Validate inputs, build the working table and run the driver.
#[instrument(skip_all, fields(n_trees = config.n_trees, n_rows = table.n_rows()))]
pub(crate) fn train(
    table: &AttributeTable,
    target: &Target,
    held_out: Option<(&AttributeTable, &Target)>,
    config: &TrainConfig,
) -> Result<TrainingResult, TreeError> {
    // --- Validate inputs ---
    if table.n_rows() == 0 {
        return Err(TreeError::EmptyTrainingSet);
    }
    target.validate(table.n_rows())?;
    config.validate(table, target)?;
    validate_held_out(table, target, held_out)?;
    if config.missing_values == MissingValues::None
        && let Some((row, attribute)) = table.first_missing()
    {
        return Err(TreeError::UnhandledMissingValue { row, attribute });
    }

    info!(
        n_trees = config.n_trees,
        n_rows = table.n_rows(),
        n_attributes = table.n_attributes(),
        goal = %target.goal(),
        resampling = config.resampling.name(),
        "training ensemble"
    );

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut imputer = Imputer::new(config.missing_values, table, target, config, &mut rng)?;
    let result = run(table, target, held_out, config, &mut imputer, &mut rng)?;

    info!(
        n_trees = result.ensemble().n_trees(),
        n_nodes = result.ensemble().n_nodes(),
        stop = ?result.metadata().stop_reason,
        "ensemble trained"
    );
    Ok(result)
}

/// Train on a table that needs no imputation. Used for inner rough ensembles.
pub(crate) fn train_complete(
    table: &AttributeTable,
    target: &Target,
    config: &TrainConfig,
    rng: &mut ChaCha8Rng,
) -> Result<TrainingResult, TreeError> {
    let mut imputer = Imputer::identity(table);
    run(table, target, None, config, &mut imputer, rng)
}

/// The round loop: `Idle → Initializing → {Growing, Reweighting}* → Finalized`.
fn run(
    table: &AttributeTable,
    target: &Target,
    held_out: Option<(&AttributeTable, &Target)>,
    config: &TrainConfig,
    imputer: &mut Imputer,
    rng: &mut ChaCha8Rng,
) -> Result<TrainingResult, TreeError> {
    let mut state = DriverState::Idle;
    debug!(?state, "driver created");

    // --- Initializing ---
    state = DriverState::Initializing;
    let n_rows = table.n_rows();
    let n_attributes = table.n_attributes();
    let goal = target.goal();
    let tree_goal = if config.resampling.fits_working_response() {
        Goal::Regression
    } else {
        goal
    };
    let aggregation = Aggregation::for_resampling(config.resampling);
    let k = config.attribute_sample.resolve(n_attributes);

    let capacity = config
        .n_trees
        .saturating_mul(config.growth_order.max_nodes(n_rows));
    let mut arena = NodeArena::with_capacity(capacity, tree_goal.slot_width())?;

    let scorer = Scorer::new(tree_goal, config.criterion, config.h_min, config.v_min, config.alpha);
    let finder = SplitFinder::new(scorer, config.split_search, k);
    let mut grower = TreeGrower::new(
        finder,
        config.growth_order,
        config.min_node_size,
        config.max_open_nodes,
    );
    let mut sampler = RoundSampler::new(config.resampling, target, n_rows);
    let mut tracker =
        held_out.map(|(t, y)| HeldOut::new(t, y, aggregation, tree_goal.slot_width()));

    let mut trees: Vec<TreeEntry> = Vec::with_capacity(config.n_trees);
    let mut checkpoints: Vec<Checkpoint> = Vec::with_capacity(config.n_trees);
    let mut in_bag: Vec<Vec<usize>> = Vec::new();
    let mut errors: Vec<f64> = Vec::new();
    let mut stop_reason = StopReason::Completed;
    debug!(?state, capacity, k, "driver initialized");

    for round in 0..config.n_trees {
        // --- Growing ---
        state = DriverState::Growing;
        trace!(round, ?state, "round started");
        imputer.before_tree(rng);
        let working = imputer.table();
        sampler.prepare(rng);
        if sampler.rows().is_empty() {
            warn!(round, "learning set is empty, stopping");
            break;
        }
        if config.resampling == Resampling::Bagging {
            in_bag.push(sampler.rows().to_vec());
        }
        let checkpoint = arena.checkpoint();
        let single_leaf = sampler.wants_single_leaf();
        let root = {
            let (data, rows) = sampler.parts(working, target);
            if single_leaf {
                grower.grow_leaf(&mut arena, &data, rows)
            } else {
                grower.grow(&mut arena, &data, rows, rng)?
            }
        };

        // --- Reweighting ---
        state = DriverState::Reweighting;
        match sampler.finish_round(&arena, root, working, target) {
            TreeWeight::Keep(weight) => {
                trees.push(TreeEntry { root, weight });
                checkpoints.push(checkpoint);
                let error = tracker.as_mut().map(|h| h.add_tree(&arena, root, weight));
                if let Some(e) = error {
                    errors.push(e);
                }
                debug!(
                    round,
                    ?state,
                    n_nodes = arena.len() - checkpoint.nodes(),
                    weight,
                    held_out_error = ?error,
                    "tree added"
                );
            }
            TreeWeight::Discard => {
                arena.rollback(checkpoint);
                if config.resampling == Resampling::Bagging {
                    in_bag.pop();
                }
                info!(round, "degenerate model, tree discarded and training stopped");
                stop_reason = StopReason::WeakModel { round };
                break;
            }
            TreeWeight::Perfect => {
                arena.keep_from(checkpoint);
                let root = NodeId::new(root.index() - checkpoint.nodes());
                trees.clear();
                trees.push(TreeEntry { root, weight: 1.0 });
                checkpoints.clear();
                checkpoints.push(Checkpoint::default());
                errors.clear();
                if let Some(h) = tracker.as_mut() {
                    h.reset();
                    errors.push(h.add_tree(&arena, root, 1.0));
                }
                info!(round, "perfect model, keeping only this tree");
                stop_reason = StopReason::PerfectModel { round };
                break;
            }
        }
    }

    // --- Finalized ---
    if config.early_stopping
        && let Some(best) = first_min(&errors)
        && best + 1 < trees.len()
    {
        arena.rollback(checkpoints[best + 1]);
        trees.truncate(best + 1);
        in_bag.truncate(best + 1);
        info!(best_round = best, error = errors[best], "early stopping");
        stop_reason = StopReason::EarlyStopping { best_round: best };
    }
    state = DriverState::Finalized;
    debug!(?state, n_trees = trees.len(), "driver finished");

    let working = imputer.table();
    let ensemble = Ensemble::new(
        arena,
        trees,
        goal,
        aggregation,
        table.kinds().to_vec(),
    );
    let importances = impurity_importances(&ensemble, working, target);
    let oob_rows: Vec<Vec<usize>> = in_bag.iter().map(|rows| out_of_bag(rows, n_rows)).collect();
    let oob_score = match config.oob_mode {
        OobMode::Enabled => Some(compute_oob(&ensemble, working, target, &oob_rows)?),
        OobMode::Disabled => None,
    };
    let metadata = TrainingMetadata {
        n_trees_requested: config.n_trees,
        n_trees: ensemble.n_trees(),
        n_rows,
        n_attributes,
        goal,
        attribute_sample_resolved: k,
        stop_reason,
    };
    Ok(TrainingResult::new(
        ensemble,
        importances,
        oob_score,
        oob_rows,
        errors,
        metadata,
    ))
}

/// Rows never drawn into an in-bag set, ascending.
fn out_of_bag(in_bag: &[usize], n_rows: usize) -> Vec<usize> {
    let mut seen = vec![false; n_rows];
    for &r in in_bag {
        seen[r] = true;
    }
    (0..n_rows).filter(|&r| !seen[r]).collect()
}

/// Index of the first minimum.
fn first_min(values: &[f64]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, &v) in values.iter().enumerate() {
        if best.is_none_or(|b| v < values[b]) {
            best = Some(i);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_min_takes_earliest() {
        assert_eq!(first_min(&[3.0, 1.0, 2.0, 1.0]), Some(1));
        assert_eq!(first_min(&[]), None);
    }

    #[test]
    fn out_of_bag_complements() {
        assert_eq!(out_of_bag(&[0, 2, 2], 4), vec![1, 3]);
    }

    #[test]
    fn aggregation_per_method() {
        assert_eq!(
            Aggregation::for_resampling(Resampling::Bagging),
            Aggregation::Average
        );
        assert_eq!(
            Aggregation::for_resampling(Resampling::Mart { shrinkage: 0.1 }),
            Aggregation::Sum
        );
    }

    #[test]
    fn active_cursor_bounds() {
        let arena = NodeArena::with_capacity(0, 2).unwrap();
        let mut ensemble = Ensemble::new(arena, vec![], Goal::Regression, Aggregation::Average, vec![]);
        assert!(ensemble.set_active_trees(0).is_ok());
        assert!(matches!(
            ensemble.set_active_trees(1),
            Err(TreeError::TreeOutOfRange { index: 1, n_trees: 0 })
        ));
    }
}
