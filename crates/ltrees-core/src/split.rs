//! Split-search strategies: which attributes to examine and how to pick a threshold.

use rand::Rng;

use crate::node::{AttributeIndex, CategorySet, Threshold};
use crate::score::{Response, ScoreTable, Scorer, SplitScore};
use crate::table::{AttributeKind, AttributeTable};

/// Present-value count above which categorical subsets are no longer enumerated.
const MAX_EXHAUSTIVE_VALUES: usize = 16;

/// Attempts at drawing a non-trivial random subset before forcing one.
const MAX_SUBSET_DRAWS: usize = 10;

/// How a random numeric threshold is drawn by Extra-Trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RandomThreshold {
    /// Uniform in the node's observed `(min, max]` range.
    Uniform,
    /// One observed value above the node minimum.
    ObservedValue,
    /// Mean plus a standard-normal multiple of the standard deviation, clamped into range.
    Gaussian,
}

/// Attribute selection and threshold search used at every node.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum SplitSearch {
    /// Best threshold of every attribute; first attribute wins ties.
    Exhaustive,
    /// Best threshold of `K` attributes drawn without replacement.
    RandomForest,
    /// One random threshold for each of `K` non-constant attributes.
    ExtraTrees {
        /// Threshold draw.
        threshold: RandomThreshold,
        /// Stop drawing attributes once a candidate reaches this score.
        early_accept_score: Option<f64>,
    },
    /// One random threshold on one random non-constant attribute.
    TotallyRandom,
}

/// The training data one tree is grown from.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LearningData<'a> {
    pub(crate) table: &'a AttributeTable,
    pub(crate) weights: &'a [f64],
    pub(crate) response: Response<'a>,
}

/// A chosen test and its score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SplitCandidate {
    pub(crate) attribute: AttributeIndex,
    pub(crate) threshold: Threshold,
    pub(crate) score: SplitScore,
}

/// Per-tree split search state: scorer, scratch tables and attribute pool.
#[derive(Debug, Clone)]
pub(crate) struct SplitFinder {
    scorer: Scorer,
    search: SplitSearch,
    k: usize,
    table: ScoreTable,
    value_summaries: Vec<f64>,
    present: Vec<usize>,
    pool: Vec<usize>,
}

impl SplitFinder {
    pub(crate) fn new(scorer: Scorer, search: SplitSearch, k: usize) -> Self {
        let table = scorer.table();
        Self {
            scorer,
            search,
            k,
            table,
            value_summaries: Vec::new(),
            present: Vec::new(),
            pool: Vec::new(),
        }
    }

    pub(crate) fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    /// Summarize `rows` into row 0 of the scratch table.
    pub(crate) fn summarize(&mut self, data: &LearningData<'_>, rows: &[usize]) {
        self.scorer
            .summarize(&mut self.table, rows, data.weights, data.response);
    }

    /// Weight of the last summarized node.
    pub(crate) fn node_weight(&self) -> f64 {
        self.table.weight(0)
    }

    pub(crate) fn should_stop(&self) -> bool {
        self.scorer.stop(&self.table)
    }

    pub(crate) fn leaf_values(&self, out: &mut Vec<f64>) {
        self.scorer.leaf_values(&self.table, out);
    }

    pub(crate) fn priority(&self) -> f64 {
        self.scorer.priority(&self.table)
    }

    /// Gain of `candidate` on the node summarized last, comparable across nodes.
    pub(crate) fn expected_gain(&self, candidate: &SplitCandidate) -> f64 {
        self.scorer.expected_gain(&self.table, candidate.score)
    }

    pub(crate) fn not_significant(&self, candidate: &SplitCandidate) -> bool {
        self.scorer.not_significant(&self.table, candidate.score)
    }

    /// Search a test for the node summarized last. `rows` may be reordered.
    pub(crate) fn find_split(
        &mut self,
        data: &LearningData<'_>,
        rows: &mut [usize],
        rng: &mut impl Rng,
    ) -> Option<SplitCandidate> {
        let n_attributes = data.table.n_attributes();
        match self.search {
            SplitSearch::Exhaustive => {
                let mut best: Option<SplitCandidate> = None;
                for attribute in 0..n_attributes {
                    let candidate = self.best_threshold(data, attribute, rows);
                    keep_better(&mut best, candidate);
                }
                best
            }
            SplitSearch::RandomForest => {
                self.reset_pool(n_attributes);
                let mut best: Option<SplitCandidate> = None;
                for _ in 0..self.k.min(n_attributes) {
                    let attribute = self.draw_attribute(rng)?;
                    let candidate = self.best_threshold(data, attribute, rows);
                    keep_better(&mut best, candidate);
                }
                best
            }
            SplitSearch::ExtraTrees {
                threshold,
                early_accept_score,
            } => self.random_search(data, rows, rng, self.k, threshold, early_accept_score),
            SplitSearch::TotallyRandom => {
                self.random_search(data, rows, rng, 1, RandomThreshold::Uniform, None)
            }
        }
    }

    /// Draw random tests on up to `k` non-constant attributes; constants are
    /// dropped from the pool without counting against `k`.
    fn random_search(
        &mut self,
        data: &LearningData<'_>,
        rows: &[usize],
        rng: &mut impl Rng,
        k: usize,
        variant: RandomThreshold,
        early_accept_score: Option<f64>,
    ) -> Option<SplitCandidate> {
        self.reset_pool(data.table.n_attributes());
        let mut best: Option<SplitCandidate> = None;
        let mut tested = 0;
        while tested < k {
            let Some(attribute) = self.draw_attribute(rng) else {
                break;
            };
            let Some(candidate) = self.random_threshold(data, attribute, rows, variant, rng)
            else {
                continue;
            };
            tested += 1;
            keep_better(&mut best, Some(candidate));
            if let (Some(limit), Some(b)) = (early_accept_score, &best)
                && b.score.score >= limit
            {
                break;
            }
        }
        best
    }

    fn reset_pool(&mut self, n_attributes: usize) {
        self.pool.clear();
        self.pool.extend(0..n_attributes);
    }

    /// Remove and return a uniformly drawn attribute from the pool.
    fn draw_attribute(&mut self, rng: &mut impl Rng) -> Option<usize> {
        if self.pool.is_empty() {
            return None;
        }
        let i = rng.gen_range(0..self.pool.len());
        Some(self.pool.swap_remove(i))
    }

    // --- Best threshold ---

    fn best_threshold(
        &mut self,
        data: &LearningData<'_>,
        attribute: usize,
        rows: &mut [usize],
    ) -> Option<SplitCandidate> {
        match data.table.kind(attribute) {
            AttributeKind::Numerical => self.best_numeric(data, attribute, rows),
            AttributeKind::Categorical { cardinality } => {
                self.summarize_values(data, attribute, cardinality, rows);
                if self.present.len() < 2 {
                    return None;
                }
                if self.present.len() > MAX_EXHAUSTIVE_VALUES {
                    self.best_ordered_subset(attribute)
                } else {
                    self.best_subset(attribute)
                }
            }
        }
    }

    fn best_numeric(
        &mut self,
        data: &LearningData<'_>,
        attribute: usize,
        rows: &mut [usize],
    ) -> Option<SplitCandidate> {
        let column = data.table.column(attribute);
        rows.sort_unstable_by(|&a, &b| column[a].total_cmp(&column[b]));

        self.table.clear_row(1);
        let mut best = SplitScore::NONE;
        let mut best_threshold = 0.0f32;
        let mut previous: Option<f32> = None;
        for &id in rows.iter() {
            let w = data.weights[id];
            if w <= 0.0 {
                continue;
            }
            let value = column[id];
            if let Some(low) = previous
                && low < value
            {
                let score = self.scorer.score(&mut self.table);
                if score.score > best.score {
                    best = score;
                    best_threshold = midpoint(low, value);
                }
            }
            self.table.add(1, data.response, id, w);
            previous = Some(value);
        }
        best.is_usable().then(|| SplitCandidate {
            attribute: AttributeIndex::new(attribute),
            threshold: Threshold::Numeric(best_threshold),
            score: best,
        })
    }

    /// Fill per-value summaries and the list of values present with positive weight.
    fn summarize_values(
        &mut self,
        data: &LearningData<'_>,
        attribute: usize,
        cardinality: usize,
        rows: &[usize],
    ) {
        let width = self.table.width();
        self.value_summaries.clear();
        self.value_summaries.resize(cardinality * width, 0.0);
        let column = data.table.column(attribute);
        for &id in rows {
            let v = column[id] as usize;
            let summary = &mut self.value_summaries[v * width..(v + 1) * width];
            accumulate(summary, data.response, id, data.weights[id]);
        }
        self.present.clear();
        self.present
            .extend((0..cardinality).filter(|&v| self.value_summaries[v * width] > 0.0));
    }

    /// Score the subset of present values selected by `mask` (bit i = `present[i]`).
    fn score_mask(&mut self, mask: u64) -> SplitScore {
        let width = self.table.width();
        self.table.clear_row(1);
        for (i, &v) in self.present.iter().enumerate() {
            if mask & (1 << i) != 0 {
                let summary = &self.value_summaries[v * width..(v + 1) * width];
                self.table.add_summary(1, summary);
            }
        }
        self.scorer.score(&mut self.table)
    }

    fn mask_to_set(&self, mask: u64) -> CategorySet {
        let mut set = CategorySet::empty();
        for (i, &v) in self.present.iter().enumerate() {
            if mask & (1 << i) != 0 {
                set.insert(v);
            }
        }
        set
    }

    /// Enumerate every subset that keeps the last present value on the right.
    fn best_subset(&mut self, attribute: usize) -> Option<SplitCandidate> {
        let m = self.present.len();
        let mut best = SplitScore::NONE;
        let mut best_mask = 0u64;
        for mask in 1..(1u64 << (m - 1)) {
            let score = self.score_mask(mask);
            if score.score > best.score {
                best = score;
                best_mask = mask;
            }
        }
        best.is_usable().then(|| SplitCandidate {
            attribute: AttributeIndex::new(attribute),
            threshold: Threshold::Subset(self.mask_to_set(best_mask)),
            score: best,
        })
    }

    /// Order present values by mean response and scan the prefix subsets.
    fn best_ordered_subset(&mut self, attribute: usize) -> Option<SplitCandidate> {
        let width = self.table.width();
        let whole = self.table.row(0).to_vec();
        let key_column = match self.scorer.goal() {
            crate::table::Goal::Classification { .. } => {
                // Column of the node's majority class.
                1 + whole[1..]
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(b.1))
                    .map_or(0, |(c, _)| c)
            }
            crate::table::Goal::Regression => 1,
            crate::table::Goal::Unsupervised => 0,
        };
        let summaries = &self.value_summaries;
        let mut ordered = self.present.clone();
        ordered.sort_by(|&a, &b| {
            let ka = summaries[a * width + key_column] / summaries[a * width];
            let kb = summaries[b * width + key_column] / summaries[b * width];
            ka.total_cmp(&kb)
        });

        self.table.clear_row(1);
        let mut best = SplitScore::NONE;
        let mut best_len = 0;
        for (len, &v) in ordered.iter().enumerate().take(ordered.len() - 1) {
            let summary = &self.value_summaries[v * width..(v + 1) * width];
            self.table.add_summary(1, summary);
            let score = self.scorer.score(&mut self.table);
            if score.score > best.score {
                best = score;
                best_len = len + 1;
            }
        }
        if !best.is_usable() {
            return None;
        }
        let mut set = CategorySet::empty();
        for &v in &ordered[..best_len] {
            set.insert(v);
        }
        Some(SplitCandidate {
            attribute: AttributeIndex::new(attribute),
            threshold: Threshold::Subset(set),
            score: best,
        })
    }

    // --- Random threshold ---

    fn random_threshold(
        &mut self,
        data: &LearningData<'_>,
        attribute: usize,
        rows: &[usize],
        variant: RandomThreshold,
        rng: &mut impl Rng,
    ) -> Option<SplitCandidate> {
        let threshold = match data.table.kind(attribute) {
            AttributeKind::Numerical => {
                Threshold::Numeric(random_numeric(data, attribute, rows, variant, rng)?)
            }
            AttributeKind::Categorical { cardinality } => {
                self.summarize_values(data, attribute, cardinality, rows);
                if self.present.len() < 2 {
                    return None;
                }
                Threshold::Subset(self.random_subset(cardinality, rng))
            }
        };

        let column = data.table.column(attribute);
        self.table.clear_row(1);
        for &id in rows {
            if threshold.goes_left(column[id]) {
                self.table.add(1, data.response, id, data.weights[id]);
            }
        }
        let score = self.scorer.score(&mut self.table);
        score.is_usable().then(|| SplitCandidate {
            attribute: AttributeIndex::new(attribute),
            threshold,
            score,
        })
    }

    /// Random non-trivial subset of the present values; absent codes get coin flips.
    fn random_subset(&self, cardinality: usize, rng: &mut impl Rng) -> CategorySet {
        let m = self.present.len();
        let mut set = CategorySet::empty();
        if m < 5 {
            let mask: u64 = rng.gen_range(1..(1u64 << m) - 1);
            set = self.mask_to_set(mask);
        } else {
            let mut chosen = 0usize;
            for _ in 0..MAX_SUBSET_DRAWS {
                set = CategorySet::empty();
                chosen = 0;
                for &v in &self.present {
                    if rng.r#gen::<bool>() {
                        set.insert(v);
                        chosen += 1;
                    }
                }
                if chosen > 0 && chosen < m {
                    break;
                }
            }
            if chosen == 0 || chosen == m {
                set = CategorySet::empty();
                set.insert(self.present[rng.gen_range(0..m)]);
            }
        }
        let mut next_present = 0;
        for code in 0..cardinality {
            if next_present < m && self.present[next_present] == code {
                next_present += 1;
            } else if rng.r#gen::<bool>() {
                set.insert(code);
            }
        }
        set
    }
}

fn keep_better(best: &mut Option<SplitCandidate>, candidate: Option<SplitCandidate>) {
    if let Some(c) = candidate
        && best.as_ref().is_none_or(|b| c.score.score > b.score.score)
    {
        *best = Some(c);
    }
}

fn accumulate(summary: &mut [f64], response: Response<'_>, id: usize, w: f64) {
    summary[0] += w;
    match response {
        Response::Classes(labels) => summary[1 + labels[id]] += w,
        Response::Values(values) => {
            summary[1] += w * values[id];
            summary[2] += w * values[id] * values[id];
        }
        Response::None => {}
    }
}

/// Threshold strictly above `low`, at most `high`.
pub(crate) fn midpoint(low: f32, high: f32) -> f32 {
    let t = low + (high - low) / 2.0;
    if t <= low { high } else { t }
}

/// Standard normal draw (Box-Muller).
pub(crate) fn standard_normal(rng: &mut impl Rng) -> f64 {
    let u1: f64 = 1.0 - rng.r#gen::<f64>();
    let u2: f64 = rng.r#gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

fn random_numeric(
    data: &LearningData<'_>,
    attribute: usize,
    rows: &[usize],
    variant: RandomThreshold,
    rng: &mut impl Rng,
) -> Option<f32> {
    let column = data.table.column(attribute);
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    let mut n = 0usize;
    for &id in rows {
        if data.weights[id] > 0.0 {
            min = min.min(column[id]);
            max = max.max(column[id]);
            n += 1;
        }
    }
    if n == 0 || min >= max {
        return None;
    }
    let t = match variant {
        RandomThreshold::Uniform => max - (max - min) * rng.r#gen::<f32>(),
        RandomThreshold::ObservedValue => {
            let above: Vec<f32> = rows
                .iter()
                .filter(|&&id| data.weights[id] > 0.0 && column[id] > min)
                .map(|&id| column[id])
                .collect();
            above[rng.gen_range(0..above.len())]
        }
        RandomThreshold::Gaussian => {
            let values = rows
                .iter()
                .filter(|&&id| data.weights[id] > 0.0)
                .map(|&id| f64::from(column[id]));
            let (sum, sum_sq) = values.fold((0.0, 0.0), |(s, q), v| (s + v, q + v * v));
            let mean = sum / n as f64;
            let std = (sum_sq / n as f64 - mean * mean).max(0.0).sqrt();
            let t = (mean + std * standard_normal(rng)) as f32;
            if t <= min {
                min + (max - min) / n as f32
            } else if t > max {
                max
            } else {
                t
            }
        }
    };
    Some(t)
}
