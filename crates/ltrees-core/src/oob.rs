//! Out-of-bag (OOB) evaluation for bagged ensembles.

use crate::ensemble::Ensemble;
use crate::error::TreeError;
use crate::predict::accumulate_tree;
use crate::resample::argmax;
use crate::table::{AttributeTable, Target};

/// Out-of-bag evaluation result.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OobScore {
    /// Percentage of misclassified OOB rows, or the OOB mean squared error.
    pub error: f64,
    /// OOB confusion matrix `confusion_matrix[true][predicted]`, classification only.
    pub confusion_matrix: Option<Vec<Vec<usize>>>,
    /// Number of rows that had at least one OOB tree.
    pub n_oob_rows: usize,
}

/// Score every row with the trees whose learning set excluded it.
///
/// Rows that were in every bootstrap are skipped.
pub(crate) fn compute_oob(
    ensemble: &Ensemble,
    table: &AttributeTable,
    target: &Target,
    oob_rows_per_tree: &[Vec<usize>],
) -> Result<OobScore, TreeError> {
    let n_rows = table.n_rows();
    let width = ensemble.arena.slot_width();
    let mut acc = vec![0.0; n_rows * width];
    let mut total_weight = vec![0.0; n_rows];

    for (tree, oob_rows) in ensemble.trees.iter().zip(oob_rows_per_tree) {
        for &r in oob_rows {
            let out = &mut acc[r * width..(r + 1) * width];
            accumulate_tree(&ensemble.arena, tree.root, |a| table.value(r, a), tree.weight, out);
            total_weight[r] += tree.weight;
        }
    }

    let scored: Vec<usize> = (0..n_rows).filter(|&r| total_weight[r] > 0.0).collect();
    if scored.is_empty() {
        return Err(TreeError::OobUnavailable {
            reason: "no row has any out-of-bag tree".to_string(),
        });
    }
    let n_oob_rows = scored.len();

    match target {
        Target::Classes { labels, n_classes } => {
            let mut confusion = vec![vec![0usize; *n_classes]; *n_classes];
            let mut wrong = 0usize;
            for &r in &scored {
                let predicted = argmax(&acc[r * width..(r + 1) * width]);
                confusion[labels[r]][predicted] += 1;
                if predicted != labels[r] {
                    wrong += 1;
                }
            }
            Ok(OobScore {
                error: 100.0 * wrong as f64 / n_oob_rows as f64,
                confusion_matrix: Some(confusion),
                n_oob_rows,
            })
        }
        Target::Values(values) => {
            let sq: f64 = scored
                .iter()
                .map(|&r| (acc[r * width] / total_weight[r] - values[r]).powi(2))
                .sum();
            Ok(OobScore {
                error: sq / n_oob_rows as f64,
                confusion_matrix: None,
                n_oob_rows,
            })
        }
        Target::Unsupervised => Err(TreeError::IncompatibleGoal {
            operation: "out-of-bag evaluation",
            goal: "unsupervised",
        }),
    }
}
