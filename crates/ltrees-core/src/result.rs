//! Training result types.

use crate::ensemble::Ensemble;
use crate::error::TreeError;
use crate::importance::{RankedAttribute, impurity_importances};
use crate::oob::{OobScore, compute_oob};
use crate::perm_importance::{PermutationImportance, compute_permutation_importance};
use crate::table::{AttributeTable, Goal, Target};

/// Why the round loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every requested tree was grown.
    Completed,
    /// A boosting round produced a model no better than chance; its tree was dropped.
    WeakModel {
        /// Zero-based round that was discarded.
        round: usize,
    },
    /// A boosting round classified every row correctly; only that tree is kept.
    PerfectModel {
        /// Zero-based round of the kept tree.
        round: usize,
    },
    /// The ensemble was truncated to the prefix with the lowest held-out error.
    EarlyStopping {
        /// Zero-based index of the last kept tree.
        best_round: usize,
    },
}

/// Metadata about the training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingMetadata {
    /// Number of trees requested by the config.
    pub n_trees_requested: usize,
    /// Number of trees in the final ensemble.
    pub n_trees: usize,
    /// Number of training rows.
    pub n_rows: usize,
    /// Number of attributes.
    pub n_attributes: usize,
    /// Learning goal of the ensemble.
    pub goal: Goal,
    /// Resolved attribute sample size `K`.
    pub attribute_sample_resolved: usize,
    /// Why training ended.
    pub stop_reason: StopReason,
}

/// Result of ensemble training.
///
/// Contains the fitted ensemble, impurity importances, the optional OOB
/// score, per-tree OOB rows (bagging only), the held-out error curve and
/// training metadata.
#[derive(Debug)]
pub struct TrainingResult {
    pub(crate) ensemble: Ensemble,
    importances: Vec<RankedAttribute>,
    oob_score: Option<OobScore>,
    oob_rows_per_tree: Vec<Vec<usize>>,
    validation_errors: Vec<f64>,
    metadata: TrainingMetadata,
}

impl TrainingResult {
    pub(crate) fn new(
        ensemble: Ensemble,
        importances: Vec<RankedAttribute>,
        oob_score: Option<OobScore>,
        oob_rows_per_tree: Vec<Vec<usize>>,
        validation_errors: Vec<f64>,
        metadata: TrainingMetadata,
    ) -> Self {
        Self {
            ensemble,
            importances,
            oob_score,
            oob_rows_per_tree,
            validation_errors,
            metadata,
        }
    }

    /// Borrow the fitted ensemble.
    #[must_use]
    pub fn ensemble(&self) -> &Ensemble {
        &self.ensemble
    }

    /// Mutably borrow the fitted ensemble, e.g. to prune its trees.
    pub fn ensemble_mut(&mut self) -> &mut Ensemble {
        &mut self.ensemble
    }

    /// Consume the result and return the fitted ensemble.
    #[must_use]
    pub fn into_ensemble(self) -> Ensemble {
        self.ensemble
    }

    /// Return the impurity-decrease importances computed on the training set.
    #[must_use]
    pub fn importances(&self) -> &[RankedAttribute] {
        &self.importances
    }

    /// Return the OOB score, if computed.
    #[must_use]
    pub fn oob_score(&self) -> Option<&OobScore> {
        self.oob_score.as_ref()
    }

    /// Return the rows each tree never saw (empty unless bagging).
    #[must_use]
    pub fn oob_rows_per_tree(&self) -> &[Vec<usize>] {
        &self.oob_rows_per_tree
    }

    /// Return the held-out error after each kept round (empty without a validation set).
    #[must_use]
    pub fn validation_errors(&self) -> &[f64] {
        &self.validation_errors
    }

    /// Return training metadata.
    #[must_use]
    pub fn metadata(&self) -> &TrainingMetadata {
        &self.metadata
    }

    /// Evaluate the ensemble on its out-of-bag rows.
    ///
    /// The table and target must be the ones used for training; they are
    /// not stored in the result.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::OobUnavailable`] when the ensemble was not
    /// trained with bagging or no row has an OOB tree.
    pub fn oob_error(&self, table: &AttributeTable, target: &Target) -> Result<OobScore, TreeError> {
        if self.oob_rows_per_tree.is_empty() {
            return Err(TreeError::OobUnavailable {
                reason: "ensemble was not trained with bagging".to_string(),
            });
        }
        target.validate(table.n_rows())?;
        compute_oob(&self.ensemble, table, target, &self.oob_rows_per_tree)
    }

    /// Compute permutation importance using OOB rows.
    ///
    /// # Errors
    ///
    /// | Variant                                     | When                                  |
    /// |---------------------------------------------|---------------------------------------|
    /// | [`TreeError::OobUnavailable`]               | no per-tree learning sets are recorded |
    /// | [`TreeError::IncompatibleGoal`]             | the target is unsupervised            |
    /// | [`TreeError::PredictionAttributeMismatch`]  | the table has the wrong width         |
    pub fn permutation_importances(
        &self,
        table: &AttributeTable,
        target: &Target,
        seed: u64,
    ) -> Result<Vec<PermutationImportance>, TreeError> {
        compute_permutation_importance(&self.ensemble, table, target, &self.oob_rows_per_tree, seed)
    }

    /// Recompute impurity importances on another reference set.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::PredictionAttributeMismatch`] when the table has
    /// the wrong width, or a target validation error.
    pub fn importances_on(
        &self,
        table: &AttributeTable,
        target: &Target,
    ) -> Result<Vec<RankedAttribute>, TreeError> {
        if table.n_attributes() != self.ensemble.kinds.len() {
            return Err(TreeError::PredictionAttributeMismatch {
                expected: self.ensemble.kinds.len(),
                got: table.n_attributes(),
            });
        }
        target.validate(table.n_rows())?;
        Ok(impurity_importances(&self.ensemble, table, target))
    }
}
