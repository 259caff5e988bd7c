//! Property tests for structural invariants of grown trees.

use proptest::collection::vec as prop_vec;
use proptest::prelude::*;

use ltrees_core::{AttributeTable, Ensemble, NodeId, Target, TrainConfig};

// =============================================================================
// Generators
// =============================================================================

/// Rows of two small-range numeric attributes plus a label in `0..3`.
fn arb_rows() -> impl Strategy<Value = Vec<(f32, f32, usize)>> {
    prop_vec((-20i32..20, -5i32..5, 0usize..3), 2..60)
        .prop_map(|rows| rows.into_iter().map(|(a, b, c)| (a as f32, b as f32 * 0.5, c)).collect())
}

fn to_table(rows: &[(f32, f32, usize)]) -> (AttributeTable, Target) {
    let x0 = rows.iter().map(|r| r.0).collect();
    let x1 = rows.iter().map(|r| r.1).collect();
    let labels = rows.iter().map(|r| r.2).collect();
    (
        AttributeTable::numerical(vec![x0, x1]).unwrap(),
        Target::classes_with_count(labels, 3),
    )
}

/// Every split node reachable from any tree root.
fn split_nodes(ensemble: &Ensemble) -> Vec<NodeId> {
    ensemble
        .trees()
        .iter()
        .flat_map(|t| ensemble.arena().subtree(t.root))
        .filter(|&id| !ensemble.arena().node(id).is_leaf())
        .collect()
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Children sizes add up to the parent size for every search strategy.
    #[test]
    fn child_sizes_sum_to_parent(rows in arb_rows(), seed in 0u64..1000) {
        let (table, target) = to_table(&rows);
        let configs = [
            TrainConfig::single_tree().with_min_node_size(1),
            TrainConfig::extra_trees(3).unwrap().with_seed(seed),
            TrainConfig::random_forest(3).unwrap().with_seed(seed),
        ];
        for config in &configs {
            let ensemble = config.fit(&table, &target).unwrap().into_ensemble();
            let arena = ensemble.arena();
            for id in split_nodes(&ensemble) {
                let (left, right) = arena.children(id).unwrap();
                let sum = arena.node(left).size() + arena.node(right).size();
                prop_assert!(
                    (sum - arena.node(id).size()).abs() < 1e-9,
                    "node {} has size {} but children sum to {}",
                    id, arena.node(id).size(), sum
                );
            }
        }
    }

    /// Each training row lands in exactly one leaf, and leaf sizes count those rows.
    #[test]
    fn rows_partition_into_leaves(rows in arb_rows(), seed in 0u64..1000) {
        let (table, target) = to_table(&rows);
        let ensemble = TrainConfig::extra_trees(4)
            .unwrap()
            .with_seed(seed)
            .with_min_node_size(1)
            .fit(&table, &target)
            .unwrap()
            .into_ensemble();
        let arena = ensemble.arena();

        for (t, tree) in ensemble.trees().iter().enumerate() {
            let leaves: Vec<NodeId> = arena
                .subtree(tree.root)
                .into_iter()
                .filter(|&id| arena.node(id).is_leaf())
                .collect();
            let mut counts = vec![0usize; leaves.len()];
            for r in 0..table.n_rows() {
                let leaf = ensemble.leaf_ids(&table.row(r)).unwrap()[t];
                let pos = leaves.iter().position(|&l| l == leaf);
                prop_assert!(pos.is_some(), "row {} reached {} outside tree {}", r, leaf, t);
                if let Some(p) = pos {
                    counts[p] += 1;
                }
            }
            for (leaf, count) in leaves.iter().zip(&counts) {
                prop_assert_eq!(arena.node(*leaf).size(), *count as f64);
            }
        }
    }
}
