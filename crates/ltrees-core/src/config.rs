//! Configuration builder for ensemble training.

use crate::error::TreeError;
use crate::grow::{DEFAULT_MAX_OPEN_NODES, GrowthOrder};
use crate::missing::MissingValues;
use crate::resample::Resampling;
use crate::result::TrainingResult;
use crate::score::Criterion;
use crate::split::{RandomThreshold, SplitSearch};
use crate::table::{AttributeTable, Goal, Target};

/// Number of attributes drawn at each node by randomized searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AttributeSample {
    /// Rounded square root of the attribute count (at least 1).
    Sqrt,
    /// Every attribute.
    All,
    /// A fixed count in `[1, n_attributes]`.
    Fixed(usize),
}

impl AttributeSample {
    /// Resolve to a concrete `K` for a table with `n_attributes` columns.
    #[must_use]
    pub fn resolve(self, n_attributes: usize) -> usize {
        match self {
            AttributeSample::Sqrt => ((n_attributes as f64).sqrt().round() as usize).max(1),
            AttributeSample::All => n_attributes,
            AttributeSample::Fixed(k) => k,
        }
    }
}

/// Whether to compute out-of-bag evaluation during training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OobMode {
    /// Score every row with the trees that never saw it. Requires bagging.
    Enabled,
    /// Skip OOB evaluation.
    Disabled,
}

/// Configuration for ensemble training.
///
/// Construct via [`TrainConfig::new`] or one of the method presets, then
/// chain `with_*` methods.
///
/// # Defaults
///
/// | Parameter          | Default          |
/// |--------------------|------------------|
/// | `criterion`        | `Gini`           |
/// | `split_search`     | `Exhaustive`     |
/// | `attribute_sample` | `Sqrt`           |
/// | `min_node_size`    | 2                |
/// | `growth_order`     | `DepthFirst`     |
/// | `resampling`       | `Identity`       |
/// | `missing_values`   | `None`           |
/// | `alpha`            | 1.0 (no test)    |
/// | `h_min`            | 0.0              |
/// | `v_min`            | 0.0              |
/// | `early_stopping`   | `false`          |
/// | `oob_mode`         | `Disabled`       |
/// | `max_open_nodes`   | 15 000           |
/// | `seed`             | 42               |
#[derive(Debug, Clone, PartialEq)]
pub struct TrainConfig {
    pub(crate) n_trees: usize,
    pub(crate) criterion: Criterion,
    pub(crate) split_search: SplitSearch,
    pub(crate) attribute_sample: AttributeSample,
    pub(crate) min_node_size: usize,
    pub(crate) growth_order: GrowthOrder,
    pub(crate) resampling: Resampling,
    pub(crate) missing_values: MissingValues,
    pub(crate) alpha: f64,
    pub(crate) h_min: f64,
    pub(crate) v_min: f64,
    pub(crate) early_stopping: bool,
    pub(crate) oob_mode: OobMode,
    pub(crate) max_open_nodes: usize,
    pub(crate) seed: u64,
}

impl TrainConfig {
    /// Create a new config with the given number of trees.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::InvalidTreeCount`] if `n_trees` is zero.
    pub fn new(n_trees: usize) -> Result<Self, TreeError> {
        if n_trees == 0 {
            return Err(TreeError::InvalidTreeCount { n_trees });
        }
        Ok(Self::default_for(n_trees))
    }

    // --- Presets ---

    /// One fully grown tree with exhaustive search.
    #[must_use]
    pub fn single_tree() -> Self {
        Self::default_for(1).with_attribute_sample(AttributeSample::All)
    }

    /// Bootstrap aggregation of exhaustive trees.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::InvalidTreeCount`] if `n_trees` is zero.
    pub fn bagging(n_trees: usize) -> Result<Self, TreeError> {
        Ok(Self::new(n_trees)?.with_resampling(Resampling::Bagging))
    }

    /// Breiman's random forests: bootstrap plus best split among `sqrt(n)` attributes.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::InvalidTreeCount`] if `n_trees` is zero.
    pub fn random_forest(n_trees: usize) -> Result<Self, TreeError> {
        Ok(Self::new(n_trees)?
            .with_resampling(Resampling::Bagging)
            .with_split_search(SplitSearch::RandomForest))
    }

    /// Extremely randomized trees on the full learning set.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::InvalidTreeCount`] if `n_trees` is zero.
    pub fn extra_trees(n_trees: usize) -> Result<Self, TreeError> {
        Ok(Self::new(n_trees)?.with_split_search(SplitSearch::ExtraTrees {
            threshold: RandomThreshold::Uniform,
            early_accept_score: None,
        }))
    }

    /// AdaBoost.M1 over exhaustive trees.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::InvalidTreeCount`] if `n_trees` is zero.
    pub fn boosting(n_trees: usize) -> Result<Self, TreeError> {
        Ok(Self::new(n_trees)?.with_resampling(Resampling::Boosting))
    }

    /// Least-squares gradient boosting of small best-first trees.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::InvalidTreeCount`] if `n_trees` is zero.
    pub fn mart(n_trees: usize) -> Result<Self, TreeError> {
        Ok(Self::new(n_trees)?
            .with_resampling(Resampling::Mart { shrinkage: 0.1 })
            .with_growth_order(GrowthOrder::BestFirst { max_splits: 5 }))
    }

    /// Two-class LogitBoost of small best-first trees.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::InvalidTreeCount`] if `n_trees` is zero.
    pub fn logit_boost(n_trees: usize) -> Result<Self, TreeError> {
        Ok(Self::new(n_trees)?
            .with_resampling(Resampling::LogitBoost {
                shrinkage: 0.1,
                z_max: 10.0,
            })
            .with_growth_order(GrowthOrder::BestFirst { max_splits: 5 }))
    }

    fn default_for(n_trees: usize) -> Self {
        Self {
            n_trees,
            criterion: Criterion::Gini,
            split_search: SplitSearch::Exhaustive,
            attribute_sample: AttributeSample::Sqrt,
            min_node_size: 2,
            growth_order: GrowthOrder::DepthFirst,
            resampling: Resampling::Identity,
            missing_values: MissingValues::None,
            alpha: 1.0,
            h_min: 0.0,
            v_min: 0.0,
            early_stopping: false,
            oob_mode: OobMode::Disabled,
            max_open_nodes: DEFAULT_MAX_OPEN_NODES,
            seed: 42,
        }
    }

    // --- Setters ---

    /// Set the number of trees.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::InvalidTreeCount`] if `n_trees` is zero.
    pub fn with_n_trees(mut self, n_trees: usize) -> Result<Self, TreeError> {
        if n_trees == 0 {
            return Err(TreeError::InvalidTreeCount { n_trees });
        }
        self.n_trees = n_trees;
        Ok(self)
    }

    /// Set the classification split criterion.
    #[must_use]
    pub fn with_criterion(mut self, criterion: Criterion) -> Self {
        self.criterion = criterion;
        self
    }

    /// Set the split-search strategy.
    #[must_use]
    pub fn with_split_search(mut self, split_search: SplitSearch) -> Self {
        self.split_search = split_search;
        self
    }

    /// Set the number of attributes drawn per node by randomized searches.
    #[must_use]
    pub fn with_attribute_sample(mut self, attribute_sample: AttributeSample) -> Self {
        self.attribute_sample = attribute_sample;
        self
    }

    /// Set the minimum row count a node needs before it may be split.
    #[must_use]
    pub fn with_min_node_size(mut self, min_node_size: usize) -> Self {
        self.min_node_size = min_node_size;
        self
    }

    /// Set the node expansion order.
    #[must_use]
    pub fn with_growth_order(mut self, growth_order: GrowthOrder) -> Self {
        self.growth_order = growth_order;
        self
    }

    /// Set the resampling method.
    #[must_use]
    pub fn with_resampling(mut self, resampling: Resampling) -> Self {
        self.resampling = resampling;
        self
    }

    /// Set the training-time missing-value strategy.
    #[must_use]
    pub fn with_missing_values(mut self, missing_values: MissingValues) -> Self {
        self.missing_values = missing_values;
        self
    }

    /// Set the significance level of the split tests; `1.0` disables them.
    #[must_use]
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Set the entropy/Gini threshold below which classification nodes stop.
    #[must_use]
    pub fn with_h_min(mut self, h_min: f64) -> Self {
        self.h_min = h_min;
        self
    }

    /// Set the variance threshold below which regression nodes stop.
    #[must_use]
    pub fn with_v_min(mut self, v_min: f64) -> Self {
        self.v_min = v_min;
        self
    }

    /// Truncate the ensemble to the best held-out prefix.
    #[must_use]
    pub fn with_early_stopping(mut self, early_stopping: bool) -> Self {
        self.early_stopping = early_stopping;
        self
    }

    /// Set whether out-of-bag evaluation runs after training.
    #[must_use]
    pub fn with_oob_mode(mut self, oob_mode: OobMode) -> Self {
        self.oob_mode = oob_mode;
        self
    }

    /// Set the maximum number of simultaneously open nodes per tree.
    #[must_use]
    pub fn with_max_open_nodes(mut self, max_open_nodes: usize) -> Self {
        self.max_open_nodes = max_open_nodes;
        self
    }

    /// Set the random seed for reproducibility.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    // --- Getters ---

    /// Return the number of trees.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.n_trees
    }

    /// Return the classification split criterion.
    #[must_use]
    pub fn criterion(&self) -> Criterion {
        self.criterion
    }

    /// Return the split-search strategy.
    #[must_use]
    pub fn split_search(&self) -> SplitSearch {
        self.split_search
    }

    /// Return the attribute sample size rule.
    #[must_use]
    pub fn attribute_sample(&self) -> AttributeSample {
        self.attribute_sample
    }

    /// Return the minimum splittable node size.
    #[must_use]
    pub fn min_node_size(&self) -> usize {
        self.min_node_size
    }

    /// Return the node expansion order.
    #[must_use]
    pub fn growth_order(&self) -> GrowthOrder {
        self.growth_order
    }

    /// Return the resampling method.
    #[must_use]
    pub fn resampling(&self) -> Resampling {
        self.resampling
    }

    /// Return the missing-value strategy.
    #[must_use]
    pub fn missing_values(&self) -> MissingValues {
        self.missing_values
    }

    /// Return the significance level.
    #[must_use]
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Return the classification stop threshold.
    #[must_use]
    pub fn h_min(&self) -> f64 {
        self.h_min
    }

    /// Return the regression stop threshold.
    #[must_use]
    pub fn v_min(&self) -> f64 {
        self.v_min
    }

    /// Return whether early stopping is enabled.
    #[must_use]
    pub fn early_stopping(&self) -> bool {
        self.early_stopping
    }

    /// Return the OOB evaluation mode.
    #[must_use]
    pub fn oob_mode(&self) -> OobMode {
        self.oob_mode
    }

    /// Return the open-node limit.
    #[must_use]
    pub fn max_open_nodes(&self) -> usize {
        self.max_open_nodes
    }

    /// Return the random seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Check the config against a table and its target.
    ///
    /// # Errors
    ///
    /// | Variant                                | When                                               |
    /// |----------------------------------------|----------------------------------------------------|
    /// | [`TreeError::InvalidMinNodeSize`]      | `min_node_size` is zero                            |
    /// | [`TreeError::InvalidAlpha`]            | `alpha` is outside `(0, 1]`                        |
    /// | [`TreeError::InvalidMaxOpenNodes`]     | `max_open_nodes` is zero                           |
    /// | [`TreeError::InvalidSplitBudget`]      | a best-first `max_splits` is zero                  |
    /// | [`TreeError::InvalidAttributeSample`]  | a fixed `K` is outside `[1, n_attributes]`         |
    /// | [`TreeError::InvalidShrinkage`]        | MART/LogitBoost shrinkage not in `(0, 1]`          |
    /// | [`TreeError::IncompatibleGoal`]        | resampling method does not fit the target          |
    /// | [`TreeError::OobUnavailable`]          | OOB evaluation without bagging or a target         |
    pub(crate) fn validate(&self, table: &AttributeTable, target: &Target) -> Result<(), TreeError> {
        if self.min_node_size == 0 {
            return Err(TreeError::InvalidMinNodeSize {
                min_node_size: self.min_node_size,
            });
        }
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(TreeError::InvalidAlpha { alpha: self.alpha });
        }
        if self.max_open_nodes == 0 {
            return Err(TreeError::InvalidMaxOpenNodes {
                max_open_nodes: self.max_open_nodes,
            });
        }
        if let GrowthOrder::BestFirst { max_splits } | GrowthOrder::TrueBestFirst { max_splits } =
            self.growth_order
            && max_splits == 0
        {
            return Err(TreeError::InvalidSplitBudget { max_splits });
        }
        let n_attributes = table.n_attributes();
        let k = self.attribute_sample.resolve(n_attributes);
        if k == 0 || k > n_attributes {
            return Err(TreeError::InvalidAttributeSample { k, n_attributes });
        }
        let goal = target.goal();
        let incompatible = |operation: &'static str| TreeError::IncompatibleGoal {
            operation,
            goal: goal.name(),
        };
        match self.resampling {
            Resampling::Boosting => {
                if !matches!(goal, Goal::Classification { .. }) {
                    return Err(incompatible("boosting"));
                }
            }
            Resampling::Mart { shrinkage } => {
                check_shrinkage(shrinkage)?;
                if goal != Goal::Regression {
                    return Err(incompatible("mart"));
                }
            }
            Resampling::LogitBoost { shrinkage, .. } => {
                check_shrinkage(shrinkage)?;
                if goal != (Goal::Classification { n_classes: 2 }) {
                    return Err(incompatible("logit-boost"));
                }
            }
            Resampling::Identity | Resampling::Bagging => {}
        }
        if self.oob_mode == OobMode::Enabled {
            if self.resampling != Resampling::Bagging {
                return Err(TreeError::OobUnavailable {
                    reason: format!("{} ensembles have no out-of-bag rows", self.resampling.name()),
                });
            }
            if goal == Goal::Unsupervised {
                return Err(incompatible("out-of-bag evaluation"));
            }
        }
        Ok(())
    }

    /// Train an ensemble on `table` and `target`.
    ///
    /// # Errors
    ///
    /// Any input or config validation error listed on [`TreeError`], plus
    /// [`TreeError::AllocationFailure`] and [`TreeError::OpenNodeOverflow`].
    pub fn fit(&self, table: &AttributeTable, target: &Target) -> Result<TrainingResult, TreeError> {
        crate::ensemble::train(table, target, None, self)
    }

    /// Train while tracking the error on a held-out set after every round.
    ///
    /// With early stopping enabled the ensemble is truncated to the prefix
    /// with the lowest held-out error.
    ///
    /// # Errors
    ///
    /// Same as [`TrainConfig::fit`], plus validation errors on the held-out
    /// set and [`TreeError::IncompatibleGoal`] for unsupervised targets.
    pub fn fit_with_validation(
        &self,
        table: &AttributeTable,
        target: &Target,
        validation_table: &AttributeTable,
        validation_target: &Target,
    ) -> Result<TrainingResult, TreeError> {
        crate::ensemble::train(table, target, Some((validation_table, validation_target)), self)
    }
}

fn check_shrinkage(shrinkage: f64) -> Result<(), TreeError> {
    if shrinkage > 0.0 && shrinkage <= 1.0 {
        Ok(())
    } else {
        Err(TreeError::InvalidShrinkage { shrinkage })
    }
}
