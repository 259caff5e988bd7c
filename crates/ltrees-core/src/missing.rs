//! Training-time replacement of missing attribute values.
//!
//! The caller's table is never modified. Imputed values live in a working
//! copy owned by the training call; prediction keeps using the fractional
//! walk for missing codes.

use std::borrow::Cow;

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::config::{OobMode, TrainConfig};
use crate::error::TreeError;
use crate::node::NodeId;
use crate::table::{AttributeKind, AttributeTable, Target, is_missing};

/// How missing codes in the training table are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MissingValues {
    /// Missing codes are rejected at training time.
    None,
    /// Numeric median or categorical mode of the observed rows, applied once.
    Median,
    /// Uniform draw in `[min, max]` or a uniform category, redrawn before every tree.
    Random,
    /// Median first, then `iterations` rounds of proximity-weighted refinement
    /// driven by a rough ensemble trained on the current working table.
    Proximity {
        /// Number of refinement rounds.
        iterations: usize,
    },
}

/// Owns the working copy of the training table.
#[derive(Debug)]
pub(crate) struct Imputer<'a> {
    strategy: MissingValues,
    original: &'a AttributeTable,
    working: Cow<'a, AttributeTable>,
    /// `(row, attribute)` cells holding a missing code in `original`, sorted
    /// by row then attribute.
    cells: Vec<(usize, usize)>,
}

impl<'a> Imputer<'a> {
    /// Imputer that never rewrites the table.
    pub(crate) fn identity(table: &'a AttributeTable) -> Self {
        Self {
            strategy: MissingValues::None,
            original: table,
            working: Cow::Borrowed(table),
            cells: Vec::new(),
        }
    }

    /// Build the working table for `strategy`.
    ///
    /// Up-front strategies (median, proximity) are fully applied here.
    pub(crate) fn new(
        strategy: MissingValues,
        table: &'a AttributeTable,
        target: &Target,
        config: &TrainConfig,
        rng: &mut ChaCha8Rng,
    ) -> Result<Self, TreeError> {
        let cells = missing_cells(table);
        if strategy == MissingValues::None || cells.is_empty() {
            return Ok(Self {
                cells,
                ..Self::identity(table)
            });
        }
        debug!(n_missing = cells.len(), ?strategy, "imputing missing values");
        let mut imputer = Self {
            strategy,
            original: table,
            working: Cow::Owned(table.clone()),
            cells,
        };
        match strategy {
            MissingValues::Median => imputer.fill_median(),
            MissingValues::Proximity { iterations } => {
                imputer.fill_median();
                let rough = config
                    .clone()
                    .with_missing_values(MissingValues::None)
                    .with_early_stopping(false)
                    .with_oob_mode(OobMode::Disabled);
                for iteration in 0..iterations {
                    let result =
                        crate::ensemble::train_complete(imputer.table(), target, &rough, rng)?;
                    let leaves = leaf_matrix(&result.ensemble, imputer.table());
                    imputer.fill_proximity(&leaves);
                    debug!(iteration, "proximity imputation round");
                }
            }
            MissingValues::Random | MissingValues::None => {}
        }
        Ok(imputer)
    }

    /// Borrow the current working table.
    pub(crate) fn table(&self) -> &AttributeTable {
        &self.working
    }

    /// Refresh per-tree imputations.
    pub(crate) fn before_tree(&mut self, rng: &mut impl Rng) {
        if self.strategy == MissingValues::Random && !self.cells.is_empty() {
            self.fill_random(rng);
        }
    }

    fn fill_median(&mut self) {
        let original = self.original;
        let fills: Vec<f32> = (0..original.n_attributes())
            .map(|a| match original.kind(a) {
                AttributeKind::Numerical => median(original.column(a)),
                AttributeKind::Categorical { cardinality } => {
                    mode(original.column(a), cardinality, |_| 1.0)
                }
            })
            .collect();
        let table = self.working.to_mut();
        for &(row, attribute) in &self.cells {
            table.column_mut(attribute)[row] = fills[attribute];
        }
    }

    fn fill_random(&mut self, rng: &mut impl Rng) {
        let original = self.original;
        let ranges: Vec<(f32, f32)> = (0..original.n_attributes())
            .map(|a| observed_range(original.column(a)))
            .collect();
        let table = self.working.to_mut();
        for &(row, attribute) in &self.cells {
            let value = match original.kind(attribute) {
                AttributeKind::Categorical { cardinality } => {
                    rng.gen_range(0..cardinality.max(1)) as f32
                }
                AttributeKind::Numerical => {
                    let (min, max) = ranges[attribute];
                    min + (max - min) * rng.r#gen::<f32>()
                }
            };
            table.column_mut(attribute)[row] = value;
        }
    }

    /// Replace each missing cell by the proximity-weighted average (or mode)
    /// of the observed values of rows sharing leaves with it.
    fn fill_proximity(&mut self, leaves: &[Vec<NodeId>]) {
        let original = self.original;
        let n_rows = original.n_rows();
        debug_assert!(self.cells.is_sorted());
        let mut updates = Vec::new();
        for group in self.cells.chunk_by(|a, b| a.0 == b.0) {
            let row = group[0].0;
            let proximity: Vec<f64> = (0..n_rows).map(|j| shared_fraction(&leaves[row], &leaves[j])).collect();
            for &(_, attribute) in group {
                let column = original.column(attribute);
                let value = match original.kind(attribute) {
                    AttributeKind::Categorical { cardinality } => {
                        let best = weighted_mode(column, cardinality, &proximity);
                        best.map(|c| c as f32)
                    }
                    AttributeKind::Numerical => {
                        let (sum, weight) = column
                            .iter()
                            .zip(&proximity)
                            .filter(|&(v, &p)| !is_missing(*v) && p > 0.0)
                            .fold((0.0, 0.0), |(s, w), (&v, &p)| (s + p * f64::from(v), w + p));
                        (weight > 0.0).then(|| (sum / weight) as f32)
                    }
                };
                if let Some(v) = value {
                    updates.push((row, attribute, v));
                }
            }
        }
        let table = self.working.to_mut();
        for (row, attribute, value) in updates {
            table.column_mut(attribute)[row] = value;
        }
    }
}

/// Missing cells in row-major order; proximity filling groups them by row.
fn missing_cells(table: &AttributeTable) -> Vec<(usize, usize)> {
    let mut cells = Vec::new();
    for row in 0..table.n_rows() {
        for attribute in 0..table.n_attributes() {
            if is_missing(table.value(row, attribute)) {
                cells.push((row, attribute));
            }
        }
    }
    cells
}

/// Leaf reached by every row in every tree, `leaves[row][tree]`.
fn leaf_matrix(ensemble: &crate::ensemble::Ensemble, table: &AttributeTable) -> Vec<Vec<NodeId>> {
    (0..table.n_rows())
        .map(|r| {
            ensemble
                .trees()
                .iter()
                .map(|t| ensemble.leaf_of(t.root, |a| table.value(r, a)))
                .collect()
        })
        .collect()
}

fn shared_fraction(a: &[NodeId], b: &[NodeId]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    let shared = a.iter().zip(b).filter(|(x, y)| x == y).count();
    shared as f64 / a.len() as f64
}

/// Median of the observed values, `0.0` when none is observed.
fn median(column: &[f32]) -> f32 {
    let mut observed: Vec<f32> = column.iter().copied().filter(|v| !is_missing(*v)).collect();
    if observed.is_empty() {
        return 0.0;
    }
    observed.sort_by(f32::total_cmp);
    let k = observed.len();
    if k % 2 == 1 {
        observed[(k - 1) / 2]
    } else {
        0.5 * (observed[k / 2 - 1] + observed[k / 2])
    }
}

/// Most frequent observed code; the lowest code wins ties, `0` when none.
fn mode(column: &[f32], cardinality: usize, weight: impl Fn(usize) -> f64) -> f32 {
    let mut counts = vec![0.0; cardinality.max(1)];
    for (row, &v) in column.iter().enumerate() {
        if !is_missing(v) {
            counts[v as usize] += weight(row);
        }
    }
    first_max(&counts).map_or(0.0, |c| c as f32)
}

fn weighted_mode(column: &[f32], cardinality: usize, proximity: &[f64]) -> Option<usize> {
    let mut counts = vec![0.0; cardinality.max(1)];
    for (&v, &p) in column.iter().zip(proximity) {
        if !is_missing(v) {
            counts[v as usize] += p;
        }
    }
    first_max(&counts)
}

fn first_max(counts: &[f64]) -> Option<usize> {
    let mut best = None;
    let mut best_count = 0.0;
    for (i, &c) in counts.iter().enumerate() {
        if c > best_count {
            best_count = c;
            best = Some(i);
        }
    }
    best
}

fn observed_range(column: &[f32]) -> (f32, f32) {
    let mut range: Option<(f32, f32)> = None;
    for &v in column.iter().filter(|v| !is_missing(**v)) {
        range = Some(match range {
            Some((lo, hi)) => (lo.min(v), hi.max(v)),
            None => (v, v),
        });
    }
    range.unwrap_or((0.0, 0.0))
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;
    use crate::table::MISSING;

    fn table() -> AttributeTable {
        AttributeTable::new(
            vec![
                vec![1.0, MISSING, 3.0, 10.0],
                vec![2.0, 2.0, MISSING, 0.0],
            ],
            vec![
                AttributeKind::Numerical,
                AttributeKind::Categorical { cardinality: 3 },
            ],
        )
        .unwrap()
    }

    #[test]
    fn median_and_mode() {
        assert_eq!(median(&[1.0, MISSING, 3.0, 10.0]), 3.0);
        assert_eq!(median(&[4.0, 1.0]), 2.5);
        assert_eq!(median(&[MISSING]), 0.0);
        assert_eq!(mode(&[2.0, 2.0, MISSING, 0.0], 3, |_| 1.0), 2.0);
    }

    #[test]
    fn median_imputation_leaves_original_untouched() {
        let original = table();
        let target = Target::classes(vec![0, 1, 0, 1]);
        let config = TrainConfig::single_tree();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let imputer =
            Imputer::new(MissingValues::Median, &original, &target, &config, &mut rng).unwrap();
        assert_eq!(imputer.table().value(1, 0), 3.0);
        assert_eq!(imputer.table().value(2, 1), 2.0);
        assert!(imputer.table().first_missing().is_none());
        assert!(is_missing(original.value(1, 0)));
    }

    #[test]
    fn random_imputation_stays_in_range() {
        let original = table();
        let target = Target::classes(vec![0, 1, 0, 1]);
        let config = TrainConfig::single_tree();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut imputer =
            Imputer::new(MissingValues::Random, &original, &target, &config, &mut rng).unwrap();
        for _ in 0..20 {
            imputer.before_tree(&mut rng);
            let v = imputer.table().value(1, 0);
            assert!((1.0..=10.0).contains(&v));
            let c = imputer.table().value(2, 1);
            assert!(c < 3.0 && c.fract() == 0.0);
        }
    }

    #[test]
    fn proximity_imputation_fills_every_cell() {
        let original = table();
        let target = Target::classes(vec![0, 1, 0, 1]);
        let config = TrainConfig::bagging(5).unwrap().with_min_node_size(1);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let imputer = Imputer::new(
            MissingValues::Proximity { iterations: 2 },
            &original,
            &target,
            &config,
            &mut rng,
        )
        .unwrap();
        assert!(imputer.table().first_missing().is_none());
    }

    #[test]
    fn proximity_fills_rows_missing_several_cells() {
        let original = AttributeTable::numerical(vec![
            vec![1.0, MISSING, 3.0, 4.0, MISSING, 6.0],
            vec![1.0, MISSING, 1.0, MISSING, MISSING, 0.0],
            vec![MISSING, 5.0, 5.0, 6.0, 6.0, 7.0],
        ])
        .unwrap();
        let cells = missing_cells(&original);
        assert_eq!(cells, vec![(0, 2), (1, 0), (1, 1), (3, 1), (4, 0), (4, 1)]);

        let target = Target::classes(vec![0, 0, 0, 1, 1, 1]);
        let config = TrainConfig::bagging(5).unwrap().with_min_node_size(1);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let imputer = Imputer::new(
            MissingValues::Proximity { iterations: 1 },
            &original,
            &target,
            &config,
            &mut rng,
        )
        .unwrap();
        assert!(imputer.table().first_missing().is_none());
        for (row, attribute) in [(0, 0), (2, 1), (5, 2)] {
            assert_eq!(imputer.table().value(row, attribute), original.value(row, attribute));
        }
    }

    #[test]
    fn shared_leaf_fraction() {
        let a = [NodeId::new(1), NodeId::new(5)];
        let b = [NodeId::new(1), NodeId::new(6)];
        assert!((shared_fraction(&a, &b) - 0.5).abs() < 1e-12);
    }
}
