use std::path::PathBuf;

/// Errors from tree and ensemble operations.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// Returned when the table has no row, or no row carries a positive weight.
    #[error("training set is empty (no row with positive weight)")]
    EmptyTrainingSet,

    /// Returned when the attribute table has no column.
    #[error("attribute table has zero attributes")]
    ZeroAttributes,

    /// Returned when a column length differs from the first column.
    #[error("attribute {attribute} has {got} rows, expected {expected}")]
    ColumnLengthMismatch {
        /// The zero-based attribute index.
        attribute: usize,
        /// The expected number of rows.
        expected: usize,
        /// The actual number of rows in the column.
        got: usize,
    },

    /// Returned when the number of descriptors differs from the number of columns.
    #[error("{got} attribute descriptors for {expected} columns")]
    DescriptorCountMismatch {
        /// The number of columns.
        expected: usize,
        /// The number of descriptors supplied.
        got: usize,
    },

    /// Returned when the target length differs from the table's row count.
    #[error("target has {got} rows, table has {expected}")]
    TargetLengthMismatch {
        /// The number of rows in the table.
        expected: usize,
        /// The number of target values.
        got: usize,
    },

    /// Returned when a categorical code falls outside `[0, cardinality)`.
    #[error("row {row}, attribute {attribute}: code {value} outside [0, {cardinality})")]
    CategoricalOutOfRange {
        /// The zero-based row index.
        row: usize,
        /// The zero-based attribute index.
        attribute: usize,
        /// The offending stored value.
        value: f32,
        /// The declared cardinality of the attribute.
        cardinality: usize,
    },

    /// Returned when a categorical attribute declares more values than a subset test can hold.
    #[error("attribute {attribute} has cardinality {cardinality}, maximum is {max}")]
    CardinalityTooLarge {
        /// The zero-based attribute index.
        attribute: usize,
        /// The declared cardinality.
        cardinality: usize,
        /// The largest supported cardinality.
        max: usize,
    },

    /// Returned when a class label is not below the declared class count.
    #[error("row {row} has class {class}, but only {n_classes} classes are declared")]
    InvalidClassLabel {
        /// The zero-based row index.
        row: usize,
        /// The offending class label.
        class: usize,
        /// The declared number of classes.
        n_classes: usize,
    },

    /// Returned when a regression target is NaN or infinite.
    #[error("non-finite regression target at row {row}")]
    NonFiniteTarget {
        /// The zero-based row index.
        row: usize,
    },

    /// Returned when the table holds a missing code and no missing-value strategy is set.
    #[error("missing value at row {row}, attribute {attribute} with no missing-value strategy")]
    UnhandledMissingValue {
        /// The zero-based row index.
        row: usize,
        /// The zero-based attribute index.
        attribute: usize,
    },

    /// Returned when n_trees is zero.
    #[error("n_trees must be at least 1, got {n_trees}")]
    InvalidTreeCount {
        /// The invalid n_trees value provided.
        n_trees: usize,
    },

    /// Returned when the attribute sample size resolves to 0 or exceeds the attribute count.
    #[error("attribute sample resolved to {k}, but must be in [1, {n_attributes}]")]
    InvalidAttributeSample {
        /// The resolved sample size.
        k: usize,
        /// The number of attributes in the table.
        n_attributes: usize,
    },

    /// Returned when min_node_size is zero.
    #[error("min_node_size must be at least 1, got {min_node_size}")]
    InvalidMinNodeSize {
        /// The invalid value provided.
        min_node_size: usize,
    },

    /// Returned when the number of cross-validation folds is below 2 or above the row count.
    #[error("fold count {n_folds} is invalid for {n_rows} rows")]
    InvalidFoldCount {
        /// The requested number of folds.
        n_folds: usize,
        /// The number of learning rows.
        n_rows: usize,
    },

    /// Returned when a confidence or significance level is outside (0, 1).
    #[error("confidence level must be in (0, 1), got {confidence}")]
    InvalidConfidence {
        /// The invalid level provided.
        confidence: f64,
    },

    /// Returned when a boosting shrinkage factor is outside (0, 1].
    #[error("shrinkage must be in (0, 1], got {shrinkage}")]
    InvalidShrinkage {
        /// The invalid shrinkage provided.
        shrinkage: f64,
    },

    /// Returned when the split significance level is outside (0, 1].
    #[error("significance level alpha must be in (0, 1], got {alpha}")]
    InvalidAlpha {
        /// The invalid level provided.
        alpha: f64,
    },

    /// Returned when the open-node limit is zero.
    #[error("max_open_nodes must be at least 1, got {max_open_nodes}")]
    InvalidMaxOpenNodes {
        /// The invalid limit provided.
        max_open_nodes: usize,
    },

    /// Returned when a best-first growth order allows no split.
    #[error("best-first growth needs max_splits of at least 1, got {max_splits}")]
    InvalidSplitBudget {
        /// The invalid budget provided.
        max_splits: usize,
    },

    /// Returned when an operation does not apply to the model's goal.
    #[error("{operation} is not available for {goal} targets")]
    IncompatibleGoal {
        /// The requested operation.
        operation: &'static str,
        /// The goal the model or target was built for.
        goal: &'static str,
    },

    /// Returned when the node arena cannot be reserved up front.
    #[error("could not reserve {requested} arena nodes")]
    AllocationFailure {
        /// The number of node records requested.
        requested: usize,
    },

    /// Returned when the growth stack holds more open nodes than allowed.
    #[error("more than {limit} open nodes during tree growth")]
    OpenNodeOverflow {
        /// The configured open-node limit.
        limit: usize,
    },

    /// Returned when a prediction row has the wrong number of attributes.
    #[error("prediction input has {got} attributes, expected {expected}")]
    PredictionAttributeMismatch {
        /// The expected number of attributes.
        expected: usize,
        /// The actual number of attributes supplied.
        got: usize,
    },

    /// Returned when predicting with a model whose leaves carry no values.
    #[error("unsupervised ensembles do not produce predictions")]
    NoPrediction,

    /// Returned when a tree index is past the end of the ensemble.
    #[error("tree {index} does not exist, ensemble has {n_trees} trees")]
    TreeOutOfRange {
        /// The requested tree index.
        index: usize,
        /// The number of trees in the ensemble.
        n_trees: usize,
    },

    /// Returned when out-of-bag estimates cannot be computed.
    #[error("out-of-bag evaluation failed: {reason}")]
    OobUnavailable {
        /// Human-readable description of why OOB evaluation failed.
        reason: String,
    },

    /// Returned when model serialization fails.
    #[error("failed to serialize model")]
    SerializeModel {
        /// The underlying bincode error.
        source: Box<bincode::ErrorKind>,
    },

    /// Returned when model deserialization fails.
    #[error("failed to deserialize model from {path}")]
    DeserializeModel {
        /// Path to the model file (empty for in-memory buffers).
        path: PathBuf,
        /// The underlying bincode error.
        source: Box<bincode::ErrorKind>,
    },

    /// Returned when writing the model file fails.
    #[error("failed to write model to {path}")]
    WriteModel {
        /// Path to the file that could not be written.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when reading the model file fails.
    #[error("failed to read model from {path}")]
    ReadModel {
        /// Path to the file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when loading a model with an incompatible format version.
    #[error("incompatible model version in {path}: expected {expected}, found {found}")]
    IncompatibleModelVersion {
        /// The model format version this build expects.
        expected: u32,
        /// The model format version found in the file.
        found: u32,
        /// Path to the model file with the incompatible version.
        path: PathBuf,
    },

    /// Returned when a loaded model violates an arena invariant.
    #[error("corrupt model: {reason}")]
    CorruptModel {
        /// Description of the violated invariant.
        reason: String,
    },
}
