//! Node summaries, split scores, stopping rules and significance tests.
//!
//! Every candidate split is scored from a three-row table: row 0 holds the
//! whole node, row 1 the left side, row 2 the right side (`row0 - row1`).
//! Row layout per goal:
//!
//! | Goal           | Columns                          |
//! |----------------|----------------------------------|
//! | Classification | `w, w_class0, .., w_classK-1`    |
//! | Regression     | `w, Σ w·y, Σ w·y²`               |
//! | Unsupervised   | `w`                              |

use crate::stats::{chi_square_threshold, f_threshold};
use crate::table::Goal;

/// Split quality measure for classification trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Criterion {
    /// Normalized Shannon information gain, chi-square significance test.
    Entropy,
    /// Normalized Gini gain.
    Gini,
    /// Gini gain relative to the node's Gini impurity.
    GiniUnnormalized,
    /// Quinlan's gain ratio.
    C45,
}

/// Target values as seen by the scorer for one training round.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Response<'a> {
    /// Class label per table row.
    Classes(&'a [usize]),
    /// Real value per table row.
    Values(&'a [f64]),
    /// No target.
    None,
}

impl Response<'_> {
    #[inline]
    fn accumulate(&self, row: &mut [f64], id: usize, w: f64) {
        row[0] += w;
        match self {
            Response::Classes(labels) => row[1 + labels[id]] += w,
            Response::Values(values) => {
                let y = values[id];
                row[1] += w * y;
                row[2] += w * y * y;
            }
            Response::None => {}
        }
    }
}

/// Three-row additive score table.
#[derive(Debug, Clone)]
pub(crate) struct ScoreTable {
    width: usize,
    data: Vec<f64>,
}

impl ScoreTable {
    fn new(width: usize) -> Self {
        Self {
            width,
            data: vec![0.0; 3 * width],
        }
    }

    #[inline]
    pub(crate) fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.width..(i + 1) * self.width]
    }

    #[inline]
    pub(crate) fn row_mut(&mut self, i: usize) -> &mut [f64] {
        &mut self.data[i * self.width..(i + 1) * self.width]
    }

    pub(crate) fn clear_row(&mut self, i: usize) {
        self.row_mut(i).fill(0.0);
    }

    /// Add one row-id with weight `w` to table row `i`.
    #[inline]
    pub(crate) fn add(&mut self, i: usize, response: Response<'_>, id: usize, w: f64) {
        let width = self.width;
        response.accumulate(&mut self.data[i * width..(i + 1) * width], id, w);
    }

    /// Add a per-value summary into table row `i`.
    pub(crate) fn add_summary(&mut self, i: usize, summary: &[f64]) {
        for (dst, src) in self.row_mut(i).iter_mut().zip(summary) {
            *dst += src;
        }
    }

    /// Fill row 2 as `row0 - row1`.
    pub(crate) fn complete(&mut self) {
        let w = self.width;
        for j in 0..w {
            self.data[2 * w + j] = self.data[j] - self.data[w + j];
        }
    }

    /// Total weight of row `i`.
    #[inline]
    pub(crate) fn weight(&self, i: usize) -> f64 {
        self.data[i * self.width]
    }

    pub(crate) fn width(&self) -> usize {
        self.width
    }
}

/// Score of one candidate test plus the side value used by significance tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SplitScore {
    pub(crate) score: f64,
    pub(crate) info: f64,
}

impl SplitScore {
    /// Marker for "no usable test".
    pub(crate) const NONE: SplitScore = SplitScore {
        score: -1.0,
        info: -1.0,
    };

    pub(crate) fn is_usable(self) -> bool {
        self.score >= 0.0
    }
}

/// Shannon entropy of the class columns of `row`, natural log.
fn class_entropy(row: &[f64]) -> f64 {
    let n = row[0];
    let s: f64 = row[1..].iter().filter(|&&c| c > 0.0).map(|&c| c * c.ln()).sum();
    n.ln() - s / n
}

/// Gini impurity `2(1 - Σp²)` of the class columns of `row`.
fn class_gini(row: &[f64]) -> f64 {
    let n = row[0];
    let s: f64 = row[1..].iter().map(|&c| c * c).sum();
    2.0 * (1.0 - s / (n * n))
}

/// Total weighted variance `Σwy² - (Σwy)²/w` of a regression row.
fn total_variance(row: &[f64]) -> f64 {
    row[2] - row[1] * row[1] / row[0]
}

/// Goal-specific scoring behaviour, selected once per training call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Scorer {
    goal: Goal,
    criterion: Criterion,
    h_min: f64,
    v_min: f64,
    alpha: f64,
}

impl Scorer {
    pub(crate) fn new(goal: Goal, criterion: Criterion, h_min: f64, v_min: f64, alpha: f64) -> Self {
        Self {
            goal,
            criterion,
            h_min,
            v_min,
            alpha,
        }
    }

    pub(crate) fn goal(&self) -> Goal {
        self.goal
    }

    /// A zeroed table sized for this goal.
    pub(crate) fn table(&self) -> ScoreTable {
        ScoreTable::new(self.row_width())
    }

    pub(crate) fn row_width(&self) -> usize {
        match self.goal {
            Goal::Classification { n_classes } => 1 + n_classes,
            Goal::Regression => 3,
            Goal::Unsupervised => 1,
        }
    }

    /// Fill row 0 with the summary of `rows`.
    pub(crate) fn summarize(
        &self,
        table: &mut ScoreTable,
        rows: &[usize],
        weights: &[f64],
        response: Response<'_>,
    ) {
        table.clear_row(0);
        for &id in rows {
            table.add(0, response, id, weights[id]);
        }
    }

    /// Stopping criterion evaluated on row 0.
    pub(crate) fn stop(&self, table: &ScoreTable) -> bool {
        let row = table.row(0);
        if row[0] <= 0.0 {
            return true;
        }
        match self.goal {
            Goal::Classification { .. } => {
                if row[1..].iter().filter(|&&c| c > 0.0).count() <= 1 {
                    return true;
                }
                match self.criterion {
                    Criterion::Entropy => class_entropy(row) <= self.h_min,
                    Criterion::C45 => class_entropy(row) < self.h_min,
                    Criterion::Gini | Criterion::GiniUnnormalized => class_gini(row) < self.h_min,
                }
            }
            Goal::Regression => {
                let variance = total_variance(row) / row[0];
                // Rounding noise on a constant target must not count as spread.
                variance <= self.v_min || variance <= 1e-12 * (row[2] / row[0]).abs()
            }
            Goal::Unsupervised => false,
        }
    }

    /// Score the split described by row 1 (row 2 is derived).
    pub(crate) fn score(&self, table: &mut ScoreTable) -> SplitScore {
        table.complete();
        if table.weight(1) <= 0.0 || table.weight(2) <= 0.0 {
            return SplitScore::NONE;
        }
        match self.goal {
            Goal::Classification { .. } => self.classification_score(table),
            Goal::Regression => {
                let v_tot = total_variance(table.row(0));
                if v_tot <= 0.0 {
                    return SplitScore::NONE;
                }
                let left = total_variance(table.row(1)).abs();
                let right = total_variance(table.row(2)).abs();
                let info = v_tot - (left + right);
                SplitScore {
                    score: info / v_tot,
                    info,
                }
            }
            Goal::Unsupervised => SplitScore {
                score: 1.0,
                info: 1.0,
            },
        }
    }

    fn classification_score(&self, table: &ScoreTable) -> SplitScore {
        let whole = table.row(0);
        let n = whole[0];
        match self.criterion {
            Criterion::Entropy | Criterion::C45 => {
                let hs = class_entropy(whole);
                let ht = {
                    let s: f64 = (1..=2)
                        .map(|i| table.weight(i))
                        .filter(|&w| w > 0.0)
                        .map(|w| w * w.ln())
                        .sum();
                    n.ln() - s / n
                };
                let mut h = n * n.ln();
                for i in 1..=2 {
                    for &c in &table.row(i)[1..] {
                        if c > 0.0 {
                            h -= c * c.ln();
                        }
                    }
                }
                h /= n;
                let info = hs + ht - h;
                let score = if self.criterion == Criterion::Entropy {
                    2.0 * (1.0 - h / (hs + ht))
                } else {
                    info / ht
                };
                SplitScore { score, info }
            }
            Criterion::Gini | Criterion::GiniUnnormalized => {
                let hc = class_gini(whole);
                let hct = {
                    let s: f64 = (1..=2)
                        .map(|i| {
                            let side = table.row(i);
                            side[1..].iter().map(|&c| c * c).sum::<f64>() / side[0]
                        })
                        .sum();
                    2.0 * (1.0 - s / n)
                };
                if self.criterion == Criterion::GiniUnnormalized {
                    let score = (hc - hct) / hc;
                    return SplitScore { score, info: score };
                }
                let ht = {
                    let (l, r) = (table.weight(1), table.weight(2));
                    2.0 * (1.0 - (l * l + r * r) / (n * n))
                };
                let htc = {
                    let left = table.row(1);
                    let right = table.row(2);
                    let s: f64 = (1..whole.len())
                        .filter(|&c| whole[c] != 0.0)
                        .map(|c| (left[c] * left[c] + right[c] * right[c]) / whole[c])
                        .sum();
                    2.0 * (1.0 - s / n)
                };
                let score = (ht - htc + hc - hct) / (ht + hc);
                SplitScore { score, info: score }
            }
        }
    }

    /// Return `true` when the chosen split fails the significance test.
    pub(crate) fn not_significant(&self, table: &ScoreTable, best: SplitScore) -> bool {
        if !best.is_usable() {
            return true;
        }
        let whole = table.row(0);
        match self.goal {
            Goal::Classification { .. } => match self.criterion {
                Criterion::Entropy => {
                    let present = whole[1..].iter().filter(|&&c| c > 0.0).count();
                    let df = present.saturating_sub(1);
                    2.0 * whole[0] * best.info <= chi_square_threshold(df, 1.0 - self.alpha)
                }
                Criterion::Gini | Criterion::GiniUnnormalized => best.score < 0.0,
                Criterion::C45 => false,
            },
            Goal::Regression => {
                if self.alpha >= 1.0 {
                    return false;
                }
                let v_tot = total_variance(whole);
                let residual = (v_tot - best.info).max(0.0);
                if residual <= 0.0 {
                    return false;
                }
                let df2 = (whole[0].round() as usize).saturating_sub(2).max(1);
                let f = best.info * df2 as f64 / residual;
                f <= f_threshold(df2, self.alpha)
            }
            Goal::Unsupervised => false,
        }
    }

    /// Leaf prediction computed from row 0.
    pub(crate) fn leaf_values(&self, table: &ScoreTable, out: &mut Vec<f64>) {
        out.clear();
        let row = table.row(0);
        match self.goal {
            Goal::Classification { .. } => out.extend(row[1..].iter().map(|&c| c / row[0])),
            Goal::Regression => {
                let mean = row[1] / row[0];
                let variance = (row[2] / row[0] - mean * mean).max(0.0);
                out.push(mean);
                out.push(variance);
            }
            Goal::Unsupervised => {}
        }
    }

    /// Best-first priority of an unsplit node (larger expands first).
    pub(crate) fn priority(&self, table: &ScoreTable) -> f64 {
        let row = table.row(0);
        if row[0] <= 0.0 {
            return 0.0;
        }
        match self.goal {
            Goal::Classification { .. } => match self.criterion {
                Criterion::Gini | Criterion::GiniUnnormalized => row[0] * class_gini(row),
                Criterion::Entropy | Criterion::C45 => row[0] * class_entropy(row),
            },
            Goal::Regression => total_variance(row),
            Goal::Unsupervised => row[0],
        }
    }

    /// Absolute impurity decrease expected from `best` on the summarized node.
    ///
    /// Regression `info` is already a variance total; classification `info`
    /// is per unit of weight and is scaled by `N`.
    pub(crate) fn expected_gain(&self, table: &ScoreTable, best: SplitScore) -> f64 {
        match self.goal {
            Goal::Regression => best.info,
            Goal::Classification { .. } | Goal::Unsupervised => table.weight(0) * best.info,
        }
    }

    /// Impurity decrease credited to a split for variable importance.
    ///
    /// Classification uses `N·info` of the entropy measure whatever the
    /// growth criterion; regression uses the variance reduction.
    pub(crate) fn importance_gain(&self, table: &mut ScoreTable) -> f64 {
        table.complete();
        if table.weight(1) <= 0.0 || table.weight(2) <= 0.0 {
            return 0.0;
        }
        match self.goal {
            Goal::Classification { .. } => {
                let entropy = Scorer {
                    criterion: Criterion::Entropy,
                    ..*self
                };
                let n = table.weight(0);
                n * entropy.classification_score(table).info
            }
            Goal::Regression => {
                let v_tot = total_variance(table.row(0));
                v_tot - total_variance(table.row(1)).abs() - total_variance(table.row(2)).abs()
            }
            Goal::Unsupervised => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier(criterion: Criterion) -> Scorer {
        Scorer::new(Goal::Classification { n_classes: 2 }, criterion, 0.0, 0.0, 1.0)
    }

    fn fill(scorer: &Scorer, labels: &[usize], left: &[usize]) -> ScoreTable {
        let rows: Vec<usize> = (0..labels.len()).collect();
        let weights = vec![1.0; labels.len()];
        let mut table = scorer.table();
        scorer.summarize(&mut table, &rows, &weights, Response::Classes(labels));
        table.clear_row(1);
        for &id in left {
            table.add(1, Response::Classes(labels), id, 1.0);
        }
        table
    }

    #[test]
    fn perfect_entropy_split_scores_one() {
        let scorer = classifier(Criterion::Entropy);
        let mut table = fill(&scorer, &[0, 0, 1, 1], &[0, 1]);
        let s = scorer.score(&mut table);
        assert!((s.score - 1.0).abs() < 1e-12, "score = {}", s.score);
        assert!((s.info - 2.0_f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn perfect_gini_split_scores_one() {
        let scorer = classifier(Criterion::Gini);
        let mut table = fill(&scorer, &[0, 0, 1, 1], &[0, 1]);
        let s = scorer.score(&mut table);
        assert!((s.score - 1.0).abs() < 1e-12, "score = {}", s.score);
    }

    #[test]
    fn useless_split_scores_zero() {
        let scorer = classifier(Criterion::Gini);
        let mut table = fill(&scorer, &[0, 1, 0, 1], &[0, 1]);
        let s = scorer.score(&mut table);
        assert!(s.score.abs() < 1e-12, "score = {}", s.score);
    }

    #[test]
    fn empty_side_is_unusable() {
        let scorer = classifier(Criterion::Entropy);
        let mut table = fill(&scorer, &[0, 1], &[]);
        assert!(!scorer.score(&mut table).is_usable());
    }

    #[test]
    fn pure_node_stops() {
        for criterion in [Criterion::Entropy, Criterion::Gini, Criterion::C45] {
            let scorer = classifier(criterion);
            let table = fill(&scorer, &[1, 1, 1], &[]);
            assert!(scorer.stop(&table), "{criterion:?}");
        }
        let scorer = classifier(Criterion::Gini);
        assert!(!scorer.stop(&fill(&scorer, &[0, 1], &[])));
    }

    #[test]
    fn regression_variance_reduction() {
        let scorer = Scorer::new(Goal::Regression, Criterion::Entropy, 0.0, 0.0, 1.0);
        let y = [0.0, 0.0, 10.0, 10.0];
        let rows = [0, 1, 2, 3];
        let weights = [1.0; 4];
        let mut table = scorer.table();
        scorer.summarize(&mut table, &rows, &weights, Response::Values(&y));
        assert!(!scorer.stop(&table));
        table.clear_row(1);
        table.add(1, Response::Values(&y), 0, 1.0);
        table.add(1, Response::Values(&y), 1, 1.0);
        let s = scorer.score(&mut table);
        assert!((s.score - 1.0).abs() < 1e-12);
        assert!((s.info - 100.0).abs() < 1e-9);

        let mut leaf = Vec::new();
        scorer.leaf_values(&table, &mut leaf);
        assert_eq!(leaf, vec![5.0, 25.0]);
    }

    #[test]
    fn chi_square_rejects_weak_split() {
        // 2·N·info for a 6/4 vs 4/6 split on 20 rows is about 0.8, below 3.84.
        let scorer = Scorer::new(
            Goal::Classification { n_classes: 2 },
            Criterion::Entropy,
            0.0,
            0.0,
            0.05,
        );
        let mut labels = vec![0; 6];
        labels.extend([1; 4]);
        labels.extend([0; 4]);
        labels.extend([1; 6]);
        let left: Vec<usize> = (0..10).collect();
        let mut table = fill(&scorer, &labels, &left);
        let s = scorer.score(&mut table);
        assert!(s.is_usable());
        assert!(scorer.not_significant(&table, s));
    }

    #[test]
    fn f_test_accepts_strong_split() {
        let scorer = Scorer::new(Goal::Regression, Criterion::Entropy, 0.0, 0.0, 0.05);
        let y: Vec<f64> = (0..20)
            .map(|i| (if i < 10 { 0.0 } else { 10.0 }) + (i % 3) as f64 * 0.1)
            .collect();
        let rows: Vec<usize> = (0..20).collect();
        let weights = vec![1.0; 20];
        let mut table = scorer.table();
        scorer.summarize(&mut table, &rows, &weights, Response::Values(&y));
        table.clear_row(1);
        for id in 0..10 {
            table.add(1, Response::Values(&y), id, 1.0);
        }
        let s = scorer.score(&mut table);
        assert!(!scorer.not_significant(&table, s));
    }

    #[test]
    fn priorities_grow_with_impurity() {
        let scorer = classifier(Criterion::Entropy);
        let mixed = fill(&scorer, &[0, 1, 0, 1], &[]);
        let skewed = fill(&scorer, &[0, 0, 0, 1], &[]);
        assert!(scorer.priority(&mixed) > scorer.priority(&skewed));
    }
}
