use std::fmt;

use crate::error::TreeError;
use crate::table::MAX_CARDINALITY;

const SUBSET_WORDS: usize = MAX_CARDINALITY / 64;

/// Zero-based attribute column index.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    serde::Serialize, serde::Deserialize,
)]
pub struct AttributeIndex(usize);

impl AttributeIndex {
    /// Create a new attribute index from a zero-based column position.
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// Return the zero-based attribute column index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for AttributeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a node in the forest-wide arena.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    serde::Serialize, serde::Deserialize,
)]
pub struct NodeId(usize);

impl NodeId {
    /// Create a node id from a zero-based arena position.
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// Return the zero-based arena position.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }

    /// Resolve a relative child offset.
    #[must_use]
    pub fn offset(self, offset: usize) -> NodeId {
        NodeId(self.0 + offset)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed-width bitset over categorical codes `[0, 1024)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CategorySet([u64; SUBSET_WORDS]);

impl CategorySet {
    /// The empty set.
    #[must_use]
    pub fn empty() -> Self {
        Self([0; SUBSET_WORDS])
    }

    /// Build a set from its raw words.
    #[must_use]
    pub fn from_words(words: [u64; SUBSET_WORDS]) -> Self {
        Self(words)
    }

    /// Return the raw words, lowest codes first.
    #[must_use]
    pub fn words(&self) -> &[u64; SUBSET_WORDS] {
        &self.0
    }

    /// Add `code` to the set.
    pub fn insert(&mut self, code: usize) {
        self.0[code / 64] |= 1 << (code % 64);
    }

    /// Return `true` when `code` is in the set.
    #[inline]
    #[must_use]
    pub fn contains(&self, code: usize) -> bool {
        code < MAX_CARDINALITY && self.0[code / 64] & (1 << (code % 64)) != 0
    }

    /// Number of codes in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Return `true` when no code is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&w| w == 0)
    }
}

impl fmt::Debug for CategorySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let codes: Vec<usize> = (0..MAX_CARDINALITY).filter(|&c| self.contains(c)).collect();
        f.debug_set().entries(codes).finish()
    }
}

/// Test stored on a split node.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Threshold {
    /// Numeric test: `value < threshold` goes left.
    Numeric(f32),
    /// Categorical test: codes in the subset go left.
    Subset(CategorySet),
}

impl Threshold {
    /// Evaluate the test on a non-missing value.
    #[inline]
    #[must_use]
    pub fn goes_left(&self, value: f32) -> bool {
        match self {
            Threshold::Numeric(t) => value < *t,
            Threshold::Subset(set) => set.contains(value as usize),
        }
    }
}

/// A node record in the arena.
///
/// Children are stored as offsets relative to the node's own id, so a tree
/// can be copied or serialized without rewriting its links.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Node {
    /// An interior test node.
    Split {
        /// Attribute tested at this node.
        attribute: AttributeIndex,
        /// Threshold or subset of the test.
        threshold: Threshold,
        /// `left child id - own id`.
        left_offset: usize,
        /// `right child id - own id`.
        right_offset: usize,
        /// Total learning weight that reached this node.
        size: f64,
    },
    /// A terminal node.
    Leaf {
        /// Index into the leaf-prediction table, `None` for unsupervised trees.
        slot: Option<usize>,
        /// Total learning weight that reached this node.
        size: f64,
    },
}

impl Node {
    /// Return the learning weight that reached this node.
    #[must_use]
    pub fn size(&self) -> f64 {
        match self {
            Node::Split { size, .. } | Node::Leaf { size, .. } => *size,
        }
    }

    /// Return `true` if this node is a leaf.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    /// Return the tested attribute, or `None` for leaves.
    #[must_use]
    pub fn tested_attribute(&self) -> Option<AttributeIndex> {
        match self {
            Node::Split { attribute, .. } => Some(*attribute),
            Node::Leaf { .. } => None,
        }
    }
}

/// Arena position/length pair used to roll back a discarded tree.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Checkpoint {
    nodes: usize,
    values: usize,
}

impl Checkpoint {
    /// Number of node records before the checkpoint.
    pub(crate) fn nodes(self) -> usize {
        self.nodes
    }
}

/// Flat store of every node of a forest plus the leaf-prediction table.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeArena {
    nodes: Vec<Node>,
    values: Vec<f64>,
    slot_width: usize,
}

impl NodeArena {
    /// Reserve room for `capacity` nodes up front.
    pub(crate) fn with_capacity(capacity: usize, slot_width: usize) -> Result<Self, TreeError> {
        let mut nodes = Vec::new();
        nodes
            .try_reserve_exact(capacity)
            .map_err(|_| TreeError::AllocationFailure {
                requested: capacity,
            })?;
        Ok(Self {
            nodes,
            values: Vec::new(),
            slot_width,
        })
    }

    /// Rebuild an arena from decoded parts, checking every link.
    pub(crate) fn from_parts(
        nodes: Vec<Node>,
        values: Vec<f64>,
        slot_width: usize,
    ) -> Result<Self, TreeError> {
        let n_slots = if slot_width == 0 { 0 } else { values.len() / slot_width };
        for (id, node) in nodes.iter().enumerate() {
            match node {
                Node::Split {
                    left_offset,
                    right_offset,
                    ..
                } => {
                    if *left_offset == 0
                        || *right_offset == 0
                        || id + left_offset >= nodes.len()
                        || id + right_offset >= nodes.len()
                    {
                        return Err(TreeError::CorruptModel {
                            reason: format!("node {id} has a child outside the arena"),
                        });
                    }
                }
                Node::Leaf { slot, .. } => {
                    if let Some(s) = slot
                        && *s >= n_slots
                    {
                        return Err(TreeError::CorruptModel {
                            reason: format!("leaf {id} points at missing slot {s}"),
                        });
                    }
                }
            }
        }
        Ok(Self {
            nodes,
            values,
            slot_width,
        })
    }

    /// Number of node records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Return `true` when the arena holds no node.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of values per leaf slot.
    #[must_use]
    pub fn slot_width(&self) -> usize {
        self.slot_width
    }

    /// Borrow one node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// Borrow every node in arena order.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Return the `(left, right)` children of a split node.
    #[must_use]
    pub fn children(&self, id: NodeId) -> Option<(NodeId, NodeId)> {
        match &self.nodes[id.0] {
            Node::Split {
                left_offset,
                right_offset,
                ..
            } => Some((id.offset(*left_offset), id.offset(*right_offset))),
            Node::Leaf { .. } => None,
        }
    }

    /// Return the prediction values of a leaf.
    #[must_use]
    pub fn leaf_values(&self, id: NodeId) -> Option<&[f64]> {
        match &self.nodes[id.0] {
            Node::Leaf { slot: Some(s), .. } => Some(self.slot(*s)),
            _ => None,
        }
    }

    /// Borrow one row of the leaf-prediction table.
    #[must_use]
    pub fn slot(&self, slot: usize) -> &[f64] {
        &self.values[slot * self.slot_width..(slot + 1) * self.slot_width]
    }

    /// Borrow the whole leaf-prediction table.
    pub(crate) fn values(&self) -> &[f64] {
        &self.values
    }

    /// Append an open node that will be finalized later.
    pub(crate) fn allocate(&mut self, size: f64) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::Leaf { slot: None, size });
        id
    }

    pub(crate) fn set_size(&mut self, id: NodeId, new_size: f64) {
        match &mut self.nodes[id.0] {
            Node::Split { size, .. } | Node::Leaf { size, .. } => *size = new_size,
        }
    }

    fn push_slot(&mut self, values: &[f64]) -> Option<usize> {
        if self.slot_width == 0 {
            return None;
        }
        debug_assert_eq!(values.len(), self.slot_width);
        let slot = self.values.len() / self.slot_width;
        self.values.extend_from_slice(values);
        Some(slot)
    }

    /// Turn `id` into a leaf predicting `values`; keeps the node's size.
    pub(crate) fn make_leaf(&mut self, id: NodeId, values: &[f64]) {
        let size = self.nodes[id.0].size();
        let slot = self.push_slot(values);
        self.nodes[id.0] = Node::Leaf { slot, size };
    }

    /// Turn `id` into a split whose children were allocated after it.
    pub(crate) fn make_split(
        &mut self,
        id: NodeId,
        attribute: AttributeIndex,
        threshold: Threshold,
        left: NodeId,
        right: NodeId,
    ) {
        debug_assert!(left.0 > id.0 && right.0 > id.0);
        let size = self.nodes[id.0].size();
        self.nodes[id.0] = Node::Split {
            attribute,
            threshold,
            left_offset: left.0 - id.0,
            right_offset: right.0 - id.0,
            size,
        };
    }

    /// Copy the test of descendant `from` onto `id`, adopting its children.
    pub(crate) fn adopt(&mut self, id: NodeId, from: NodeId) {
        let size = self.nodes[id.0].size();
        match self.nodes[from.0].clone() {
            Node::Split {
                attribute,
                threshold,
                left_offset,
                right_offset,
                ..
            } => {
                let shift = from.0 - id.0;
                self.nodes[id.0] = Node::Split {
                    attribute,
                    threshold,
                    left_offset: left_offset + shift,
                    right_offset: right_offset + shift,
                    size,
                };
            }
            Node::Leaf { slot, .. } => {
                self.nodes[id.0] = Node::Leaf { slot, size };
            }
        }
    }

    pub(crate) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            nodes: self.nodes.len(),
            values: self.values.len(),
        }
    }

    pub(crate) fn rollback(&mut self, checkpoint: Checkpoint) {
        self.nodes.truncate(checkpoint.nodes);
        self.values.truncate(checkpoint.values);
    }

    /// Drop every node and slot recorded before `checkpoint`.
    pub(crate) fn keep_from(&mut self, checkpoint: Checkpoint) {
        self.nodes.drain(..checkpoint.nodes);
        self.values.drain(..checkpoint.values);
        if self.slot_width > 0 {
            let shift = checkpoint.values / self.slot_width;
            for node in &mut self.nodes {
                if let Node::Leaf { slot: Some(s), .. } = node {
                    *s -= shift;
                }
            }
        }
    }

    /// Collect the ids of the subtree rooted at `root`, in arena order.
    #[must_use]
    pub fn subtree(&self, root: NodeId) -> Vec<NodeId> {
        let mut ids = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            ids.push(id);
            if let Some((l, r)) = self.children(id) {
                stack.push(l);
                stack.push(r);
            }
        }
        ids.sort_unstable();
        ids
    }

    /// Number of leaves reachable from `root`.
    #[must_use]
    pub fn n_leaves(&self, root: NodeId) -> usize {
        self.subtree(root)
            .into_iter()
            .filter(|&id| self.node(id).is_leaf())
            .count()
    }

    /// Maximum depth below `root`; a lone leaf has depth 0.
    #[must_use]
    pub fn depth(&self, root: NodeId) -> usize {
        let mut max_depth = 0usize;
        let mut queue = std::collections::VecDeque::new();
        queue.push_back((root, 0usize));
        while let Some((id, d)) = queue.pop_front() {
            match self.children(id) {
                Some((l, r)) => {
                    queue.push_back((l, d + 1));
                    queue.push_back((r, d + 1));
                }
                None => max_depth = max_depth.max(d),
            }
        }
        max_depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- Newtypes ---

    #[test]
    fn attribute_index_display() {
        assert_eq!(format!("{}", AttributeIndex::new(3)), "3");
    }

    #[test]
    fn node_id_offset() {
        assert_eq!(NodeId::new(4).offset(3).index(), 7);
    }

    // --- CategorySet ---

    #[test]
    fn category_set_membership() {
        let mut set = CategorySet::empty();
        assert!(set.is_empty());
        set.insert(0);
        set.insert(65);
        set.insert(1023);
        assert!(set.contains(65));
        assert!(!set.contains(64));
        assert!(!set.contains(4096));
        assert_eq!(set.len(), 3);
        assert_eq!(format!("{set:?}"), "{0, 65, 1023}");
    }

    #[test]
    fn threshold_tests() {
        assert!(Threshold::Numeric(2.5).goes_left(2.0));
        assert!(!Threshold::Numeric(2.5).goes_left(2.5));
        let mut set = CategorySet::empty();
        set.insert(2);
        assert!(Threshold::Subset(set).goes_left(2.0));
        assert!(!Threshold::Subset(set).goes_left(1.0));
    }

    // --- Arena ---

    fn two_leaf_tree() -> NodeArena {
        let mut arena = NodeArena::with_capacity(3, 2).unwrap();
        let root = arena.allocate(4.0);
        let left = arena.allocate(1.0);
        let right = arena.allocate(3.0);
        arena.make_split(
            root,
            AttributeIndex::new(0),
            Threshold::Numeric(1.5),
            left,
            right,
        );
        arena.make_leaf(right, &[0.0, 1.0]);
        arena.make_leaf(left, &[1.0, 0.0]);
        arena
    }

    #[test]
    fn relative_offsets_resolve() {
        let arena = two_leaf_tree();
        let (l, r) = arena.children(NodeId::new(0)).unwrap();
        assert_eq!((l.index(), r.index()), (1, 2));
        assert_eq!(arena.leaf_values(l).unwrap(), &[1.0, 0.0]);
        assert_eq!(arena.leaf_values(r).unwrap(), &[0.0, 1.0]);
        assert_eq!(arena.node(NodeId::new(0)).size(), 4.0);
    }

    #[test]
    fn shape_queries() {
        let arena = two_leaf_tree();
        assert_eq!(arena.n_leaves(NodeId::new(0)), 2);
        assert_eq!(arena.depth(NodeId::new(0)), 1);
        assert_eq!(arena.subtree(NodeId::new(0)).len(), 3);
    }

    #[test]
    fn rollback_discards_tree() {
        let mut arena = two_leaf_tree();
        let cp = arena.checkpoint();
        let extra = arena.allocate(2.0);
        arena.make_leaf(extra, &[0.5, 0.5]);
        arena.rollback(cp);
        assert_eq!(arena.len(), 3);
        assert_eq!(arena.values().len(), 4);
    }

    #[test]
    fn keep_from_rebases_slots() {
        let mut arena = two_leaf_tree();
        let cp = arena.checkpoint();
        let root = arena.allocate(2.0);
        arena.make_leaf(root, &[0.25, 0.75]);
        arena.keep_from(cp);
        assert_eq!(arena.len(), 1);
        assert_eq!(arena.leaf_values(NodeId::new(0)).unwrap(), &[0.25, 0.75]);
    }

    #[test]
    fn unsupervised_leaves_have_no_slot() {
        let mut arena = NodeArena::with_capacity(1, 0).unwrap();
        let id = arena.allocate(5.0);
        arena.make_leaf(id, &[]);
        assert_eq!(arena.node(id), &Node::Leaf { slot: None, size: 5.0 });
        assert!(arena.leaf_values(id).is_none());
    }

    #[test]
    fn corrupt_links_rejected() {
        let nodes = vec![Node::Split {
            attribute: AttributeIndex::new(0),
            threshold: Threshold::Numeric(0.0),
            left_offset: 1,
            right_offset: 2,
            size: 1.0,
        }];
        assert!(matches!(
            NodeArena::from_parts(nodes, vec![], 1),
            Err(TreeError::CorruptModel { .. })
        ));
    }
}
