//! Explicit-stack tree growth over an in-place partitioned row range.

use rand::Rng;
use tracing::trace;

use crate::error::TreeError;
use crate::node::{NodeArena, NodeId, Threshold};
use crate::split::{LearningData, SplitCandidate, SplitFinder};

/// Default bound on the number of simultaneously open nodes.
pub const DEFAULT_MAX_OPEN_NODES: usize = 15_000;

/// Order in which open nodes are expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum GrowthOrder {
    /// Expand until every leaf meets a stopping rule.
    DepthFirst,
    /// Expand the open node with the largest impurity first, up to `max_splits` tests.
    BestFirst {
        /// Maximum number of split nodes per tree.
        max_splits: usize,
    },
    /// Expand the open node whose own best split removes the most impurity,
    /// up to `max_splits` tests.
    TrueBestFirst {
        /// Maximum number of split nodes per tree.
        max_splits: usize,
    },
}

impl GrowthOrder {
    /// Worst-case node count of one tree grown on `n_rows` rows.
    #[must_use]
    pub fn max_nodes(self, n_rows: usize) -> usize {
        match self {
            GrowthOrder::DepthFirst => (2 * n_rows).saturating_sub(1).max(1),
            GrowthOrder::BestFirst { max_splits } | GrowthOrder::TrueBestFirst { max_splits } => {
                2 * max_splits + 1
            }
        }
    }

    fn split_budget(self) -> Option<usize> {
        match self {
            GrowthOrder::DepthFirst => None,
            GrowthOrder::BestFirst { max_splits } | GrowthOrder::TrueBestFirst { max_splits } => {
                Some(max_splits)
            }
        }
    }
}

/// A node waiting on the growth stack with its row range.
#[derive(Debug, Clone, Copy)]
struct OpenNode {
    id: NodeId,
    start: usize,
    end: usize,
    priority: f64,
    /// Pre-computed test, only used by true best-first growth.
    split: Option<SplitCandidate>,
}

/// Grows trees into a shared arena.
#[derive(Debug, Clone)]
pub(crate) struct TreeGrower {
    finder: SplitFinder,
    order: GrowthOrder,
    min_node_size: usize,
    max_open_nodes: usize,
    stack: Vec<OpenNode>,
    leaf: Vec<f64>,
}

impl TreeGrower {
    pub(crate) fn new(
        finder: SplitFinder,
        order: GrowthOrder,
        min_node_size: usize,
        max_open_nodes: usize,
    ) -> Self {
        Self {
            finder,
            order,
            min_node_size,
            max_open_nodes,
            stack: Vec::new(),
            leaf: Vec::new(),
        }
    }

    pub(crate) fn finder(&self) -> &SplitFinder {
        &self.finder
    }

    /// Grow one tree on `rows` and return its root.
    ///
    /// `rows` is reordered so that every node's rows are contiguous.
    pub(crate) fn grow(
        &mut self,
        arena: &mut NodeArena,
        data: &LearningData<'_>,
        rows: &mut [usize],
        rng: &mut impl Rng,
    ) -> Result<NodeId, TreeError> {
        let root = arena.allocate(rows.len() as f64);
        let split = match self.order {
            GrowthOrder::TrueBestFirst { .. } => self.evaluate(data, rows, rng),
            _ => None,
        };
        self.stack.clear();
        self.stack.push(OpenNode {
            id: root,
            start: 0,
            end: rows.len(),
            priority: 0.0,
            split,
        });

        let budget = self.order.split_budget();
        let mut n_splits = 0usize;
        while let Some(open) = self.stack.pop() {
            let range = &mut rows[open.start..open.end];
            let exhausted = budget.is_some_and(|b| n_splits >= b);
            let split = if exhausted {
                None
            } else {
                match self.order {
                    GrowthOrder::TrueBestFirst { .. } => open.split,
                    _ => self.evaluate(data, range, rng),
                }
            };
            let Some(split) = split else {
                self.finish_leaf(arena, data, open.id, range);
                continue;
            };

            let column = data.table.column(split.attribute.index());
            let n_left = partition(range, column, &split.threshold);
            let left = arena.allocate(n_left as f64);
            let right = arena.allocate((range.len() - n_left) as f64);
            arena.make_split(open.id, split.attribute, split.threshold, left, right);
            n_splits += 1;

            let mid = open.start + n_left;
            self.open(data, rows, left, open.start, mid, rng)?;
            self.open(data, rows, right, mid, open.end, rng)?;
        }
        trace!(root = root.index(), n_splits, "tree grown");
        Ok(root)
    }

    /// Grow a tree made of a single leaf over `rows`.
    pub(crate) fn grow_leaf(
        &mut self,
        arena: &mut NodeArena,
        data: &LearningData<'_>,
        rows: &[usize],
    ) -> NodeId {
        let root = arena.allocate(rows.len() as f64);
        self.finish_leaf(arena, data, root, rows);
        root
    }

    /// Push a child range onto the stack according to the growth order.
    fn open(
        &mut self,
        data: &LearningData<'_>,
        rows: &mut [usize],
        id: NodeId,
        start: usize,
        end: usize,
        rng: &mut impl Rng,
    ) -> Result<(), TreeError> {
        let range = &mut rows[start..end];
        let (priority, split) = match self.order {
            GrowthOrder::DepthFirst => (0.0, None),
            GrowthOrder::BestFirst { .. } => {
                self.finder.summarize(data, range);
                (self.finder.priority(), None)
            }
            GrowthOrder::TrueBestFirst { .. } => {
                let split = self.evaluate(data, range, rng);
                let gain = split.map_or(-1.0, |s| self.finder.expected_gain(&s));
                (gain, split)
            }
        };
        let node = OpenNode {
            id,
            start,
            end,
            priority,
            split,
        };
        match self.order {
            GrowthOrder::DepthFirst => self.stack.push(node),
            _ => {
                // Ascending by priority; ties land above existing entries.
                let at = self.stack.partition_point(|o| o.priority <= priority);
                self.stack.insert(at, node);
            }
        }
        if self.stack.len() > self.max_open_nodes {
            return Err(TreeError::OpenNodeOverflow {
                limit: self.max_open_nodes,
            });
        }
        Ok(())
    }

    /// Summarize a range and return its test, or `None` when it must be a leaf.
    fn evaluate(
        &mut self,
        data: &LearningData<'_>,
        range: &mut [usize],
        rng: &mut impl Rng,
    ) -> Option<SplitCandidate> {
        let n = range.len();
        if n <= 1 || n < self.min_node_size {
            return None;
        }
        self.finder.summarize(data, range);
        if self.finder.should_stop() {
            return None;
        }
        let split = self.finder.find_split(data, range, rng)?;
        if self.finder.not_significant(&split) {
            trace!(score = split.score.score, "split not significant");
            return None;
        }
        Some(split)
    }

    fn finish_leaf(
        &mut self,
        arena: &mut NodeArena,
        data: &LearningData<'_>,
        id: NodeId,
        range: &[usize],
    ) {
        self.finder.summarize(data, range);
        self.finder.leaf_values(&mut self.leaf);
        arena.make_leaf(id, &self.leaf);
    }
}

/// Move rows that go left to the front of `range`; return how many did.
pub(crate) fn partition(range: &mut [usize], column: &[f32], threshold: &Threshold) -> usize {
    let mut i = 0;
    let mut j = range.len();
    while i < j {
        if threshold.goes_left(column[range[i]]) {
            i += 1;
        } else {
            j -= 1;
            range.swap(i, j);
        }
    }
    i
}
