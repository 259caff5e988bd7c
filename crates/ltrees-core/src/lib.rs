//! Decision-tree ensembles over a shared node arena.
//!
//! One training driver covers single trees, bagging, Random Forests,
//! Extra-Trees (totally or partially randomized thresholds), discrete
//! boosting, MART and LogitBoost. Every tree of an ensemble lives in one
//! [`NodeArena`]; children are linked by relative offsets so a model can be
//! saved, loaded and truncated without rewriting links.
//!
//! Around the driver sit missing-value handling (NaN is the missing code),
//! weakest-link and error-based pruning, impurity and permutation
//! importances, out-of-bag evaluation and bincode persistence.
//!
//! ```no_run
//! use ltrees_core::{AttributeTable, Target, TrainConfig};
//!
//! # fn main() -> Result<(), ltrees_core::TreeError> {
//! let table = AttributeTable::numerical(vec![vec![1.0, 2.0, 3.0, 4.0]])?;
//! let target = Target::classes(vec![0, 0, 1, 1]);
//! let result = TrainConfig::extra_trees(100)?.fit(&table, &target)?;
//! let prediction = result.ensemble().predict(&[3.5])?;
//! # let _ = prediction;
//! # Ok(())
//! # }
//! ```

mod config;
mod ensemble;
mod error;
mod grow;
mod importance;
mod missing;
mod node;
mod oob;
mod perm_importance;
mod predict;
mod prune;
mod resample;
mod result;
mod score;
mod serialize;
mod split;
mod stats;
mod table;

pub use config::{AttributeSample, OobMode, TrainConfig};
pub use ensemble::{Aggregation, Ensemble, TreeEntry};
pub use error::TreeError;
pub use grow::{DEFAULT_MAX_OPEN_NODES, GrowthOrder};
pub use importance::RankedAttribute;
pub use missing::MissingValues;
pub use node::{AttributeIndex, CategorySet, Node, NodeArena, NodeId, Threshold};
pub use oob::OobScore;
pub use perm_importance::PermutationImportance;
pub use predict::{ClassDistribution, Prediction};
pub use prune::{DEFAULT_C45_CONFIDENCE, DEFAULT_CV_FOLDS, PruneMethod, PruneReport};
pub use resample::Resampling;
pub use result::{StopReason, TrainingMetadata, TrainingResult};
pub use score::Criterion;
pub use split::{RandomThreshold, SplitSearch};
pub use stats::{chi_square_threshold, f_threshold};
pub use table::{AttributeKind, AttributeTable, Goal, MAX_CARDINALITY, MISSING, Target, is_missing};
