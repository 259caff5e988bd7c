//! Column-major attribute table, attribute descriptors and training targets.

use std::fmt;

use crate::error::TreeError;

/// Largest categorical cardinality a subset test can represent.
pub const MAX_CARDINALITY: usize = 1024;

/// Code stored in a column when the value is unobserved.
pub const MISSING: f32 = f32::NAN;

/// Return `true` when `value` is the missing code.
#[inline]
#[must_use]
pub fn is_missing(value: f32) -> bool {
    value.is_nan()
}

/// Per-attribute descriptor: numeric, or categorical with its cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AttributeKind {
    /// Real-valued attribute tested with `value < threshold`.
    Numerical,
    /// Enumerated attribute whose codes lie in `[0, cardinality)`.
    Categorical {
        /// Number of distinct codes.
        cardinality: usize,
    },
}

impl AttributeKind {
    /// Return `true` for categorical attributes.
    #[must_use]
    pub fn is_categorical(self) -> bool {
        matches!(self, AttributeKind::Categorical { .. })
    }
}

/// Learning goal, fixed once per training call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Goal {
    /// Class labels in `[0, n_classes)`.
    Classification {
        /// Number of classes.
        n_classes: usize,
    },
    /// Real-valued target.
    Regression,
    /// No target; trees only partition the input space.
    Unsupervised,
}

impl Goal {
    /// Number of values stored per leaf prediction slot.
    #[must_use]
    pub fn slot_width(self) -> usize {
        match self {
            Goal::Classification { n_classes } => n_classes,
            Goal::Regression => 2,
            Goal::Unsupervised => 0,
        }
    }

    /// Short name used in error messages.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Goal::Classification { .. } => "classification",
            Goal::Regression => "regression",
            Goal::Unsupervised => "unsupervised",
        }
    }
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Immutable column-major table: `columns[attribute][row]`.
#[derive(Debug, Clone)]
pub struct AttributeTable {
    columns: Vec<Vec<f32>>,
    kinds: Vec<AttributeKind>,
    n_rows: usize,
}

impl AttributeTable {
    /// Build a table from columns and their descriptors.
    ///
    /// # Errors
    ///
    /// | Variant                                 | When                                        |
    /// |-----------------------------------------|---------------------------------------------|
    /// | [`TreeError::ZeroAttributes`]           | `columns` is empty                          |
    /// | [`TreeError::DescriptorCountMismatch`]  | `kinds.len() != columns.len()`              |
    /// | [`TreeError::ColumnLengthMismatch`]     | columns have different lengths              |
    /// | [`TreeError::CardinalityTooLarge`]      | a cardinality exceeds [`MAX_CARDINALITY`]   |
    /// | [`TreeError::CategoricalOutOfRange`]    | a categorical code is not in range          |
    pub fn new(columns: Vec<Vec<f32>>, kinds: Vec<AttributeKind>) -> Result<Self, TreeError> {
        if columns.is_empty() {
            return Err(TreeError::ZeroAttributes);
        }
        if kinds.len() != columns.len() {
            return Err(TreeError::DescriptorCountMismatch {
                expected: columns.len(),
                got: kinds.len(),
            });
        }
        let n_rows = columns[0].len();
        for (attribute, (column, kind)) in columns.iter().zip(&kinds).enumerate() {
            if column.len() != n_rows {
                return Err(TreeError::ColumnLengthMismatch {
                    attribute,
                    expected: n_rows,
                    got: column.len(),
                });
            }
            if let AttributeKind::Categorical { cardinality } = *kind {
                if cardinality > MAX_CARDINALITY {
                    return Err(TreeError::CardinalityTooLarge {
                        attribute,
                        cardinality,
                        max: MAX_CARDINALITY,
                    });
                }
                for (row, &value) in column.iter().enumerate() {
                    if is_missing(value) {
                        continue;
                    }
                    if value < 0.0 || value.fract() != 0.0 || value as usize >= cardinality {
                        return Err(TreeError::CategoricalOutOfRange {
                            row,
                            attribute,
                            value,
                            cardinality,
                        });
                    }
                }
            }
        }
        Ok(Self {
            columns,
            kinds,
            n_rows,
        })
    }

    /// Build a table where every attribute is numerical.
    ///
    /// # Errors
    ///
    /// Same as [`AttributeTable::new`].
    pub fn numerical(columns: Vec<Vec<f32>>) -> Result<Self, TreeError> {
        let kinds = vec![AttributeKind::Numerical; columns.len()];
        Self::new(columns, kinds)
    }

    /// Return the number of rows.
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Return the number of attributes.
    #[must_use]
    pub fn n_attributes(&self) -> usize {
        self.columns.len()
    }

    /// Return the descriptor of one attribute.
    #[must_use]
    pub fn kind(&self, attribute: usize) -> AttributeKind {
        self.kinds[attribute]
    }

    /// Return all attribute descriptors.
    #[must_use]
    pub fn kinds(&self) -> &[AttributeKind] {
        &self.kinds
    }

    /// Return one column.
    #[must_use]
    pub fn column(&self, attribute: usize) -> &[f32] {
        &self.columns[attribute]
    }

    /// Return `value(row, attribute)`.
    #[inline]
    #[must_use]
    pub fn value(&self, row: usize, attribute: usize) -> f32 {
        self.columns[attribute][row]
    }

    /// Copy one row out of the table.
    #[must_use]
    pub fn row(&self, row: usize) -> Vec<f32> {
        self.columns.iter().map(|c| c[row]).collect()
    }

    /// Return the first `(row, attribute)` holding a missing code, if any.
    #[must_use]
    pub fn first_missing(&self) -> Option<(usize, usize)> {
        self.columns.iter().enumerate().find_map(|(attribute, column)| {
            column
                .iter()
                .position(|&v| is_missing(v))
                .map(|row| (row, attribute))
        })
    }

    pub(crate) fn column_mut(&mut self, attribute: usize) -> &mut [f32] {
        &mut self.columns[attribute]
    }

    /// Copy the given rows, in order, into a new table.
    pub(crate) fn select_rows(&self, rows: &[usize]) -> AttributeTable {
        AttributeTable {
            columns: self
                .columns
                .iter()
                .map(|c| rows.iter().map(|&r| c[r]).collect())
                .collect(),
            kinds: self.kinds.clone(),
            n_rows: rows.len(),
        }
    }
}

/// Training target, one entry per table row.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// Class labels in `[0, n_classes)`.
    Classes {
        /// Label per row.
        labels: Vec<usize>,
        /// Number of classes.
        n_classes: usize,
    },
    /// Real-valued outputs.
    Values(Vec<f64>),
    /// No target.
    Unsupervised,
}

impl Target {
    /// Build a classification target, inferring `n_classes` as `max + 1`.
    #[must_use]
    pub fn classes(labels: Vec<usize>) -> Self {
        let n_classes = labels.iter().max().copied().unwrap_or(0) + 1;
        Target::Classes { labels, n_classes }
    }

    /// Build a classification target with an explicit class count.
    #[must_use]
    pub fn classes_with_count(labels: Vec<usize>, n_classes: usize) -> Self {
        Target::Classes { labels, n_classes }
    }

    /// Build a regression target.
    #[must_use]
    pub fn values(values: Vec<f64>) -> Self {
        Target::Values(values)
    }

    /// Return the goal this target implies.
    #[must_use]
    pub fn goal(&self) -> Goal {
        match self {
            Target::Classes { n_classes, .. } => Goal::Classification {
                n_classes: *n_classes,
            },
            Target::Values(_) => Goal::Regression,
            Target::Unsupervised => Goal::Unsupervised,
        }
    }

    /// Copy the given rows, in order, into a new target.
    pub(crate) fn select_rows(&self, rows: &[usize]) -> Target {
        match self {
            Target::Classes { labels, n_classes } => Target::Classes {
                labels: rows.iter().map(|&r| labels[r]).collect(),
                n_classes: *n_classes,
            },
            Target::Values(values) => Target::Values(rows.iter().map(|&r| values[r]).collect()),
            Target::Unsupervised => Target::Unsupervised,
        }
    }

    /// Check the target against a table with `n_rows` rows.
    pub(crate) fn validate(&self, n_rows: usize) -> Result<(), TreeError> {
        match self {
            Target::Classes { labels, n_classes } => {
                if labels.len() != n_rows {
                    return Err(TreeError::TargetLengthMismatch {
                        expected: n_rows,
                        got: labels.len(),
                    });
                }
                if let Some((row, &class)) =
                    labels.iter().enumerate().find(|&(_, &c)| c >= *n_classes)
                {
                    return Err(TreeError::InvalidClassLabel {
                        row,
                        class,
                        n_classes: *n_classes,
                    });
                }
            }
            Target::Values(values) => {
                if values.len() != n_rows {
                    return Err(TreeError::TargetLengthMismatch {
                        expected: n_rows,
                        got: values.len(),
                    });
                }
                if let Some(row) = values.iter().position(|v| !v.is_finite()) {
                    return Err(TreeError::NonFiniteTarget { row });
                }
            }
            Target::Unsupervised => {}
        }
        Ok(())
    }
}
