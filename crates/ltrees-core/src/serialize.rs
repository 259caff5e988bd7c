//! Model persistence via bincode.
//!
//! The model is written record by record in a fixed order:
//!
//! 1. format version (`u32`)
//! 2. header: goal, slot width, aggregation, tree count, node count, leaf count,
//!    attribute count
//! 3. one `(node count, weight)` record per tree
//! 4. one record per node in arena order; a leaf is followed by exactly
//!    `slot width` values
//! 5. one descriptor per attribute
//!
//! Readers size every vector from the header before reading the body.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument};

use crate::ensemble::{Aggregation, Ensemble, TreeEntry};
use crate::error::TreeError;
use crate::node::{AttributeIndex, Node, NodeArena, NodeId, Threshold};
use crate::table::{AttributeKind, Goal};

/// Current binary format version.
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct Header {
    goal: Goal,
    slot_width: usize,
    aggregation: Aggregation,
    n_trees: usize,
    n_nodes: usize,
    n_leaves: usize,
    n_attributes: usize,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct TreeRecord {
    n_nodes: usize,
    weight: f64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
enum NodeRecord {
    Split {
        attribute: AttributeIndex,
        threshold: Threshold,
        left_offset: usize,
        right_offset: usize,
        size: f64,
    },
    Leaf {
        size: f64,
    },
}

fn put<W: Write, T: serde::Serialize>(writer: &mut W, value: &T) -> Result<(), TreeError> {
    bincode::serialize_into(writer, value).map_err(|e| TreeError::SerializeModel { source: e })
}

fn get<R: Read, T: DeserializeOwned>(reader: &mut R, path: &Path) -> Result<T, TreeError> {
    bincode::deserialize_from(reader).map_err(|e| TreeError::DeserializeModel {
        path: path.to_path_buf(),
        source: e,
    })
}

fn reserve<T>(n: usize) -> Result<Vec<T>, TreeError> {
    let mut v = Vec::new();
    v.try_reserve_exact(n)
        .map_err(|_| TreeError::AllocationFailure { requested: n })?;
    Ok(v)
}

impl Ensemble {
    /// Write the model to `writer`.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::SerializeModel`] when encoding or writing fails.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), TreeError> {
        let slot_width = self.arena.slot_width();
        put(&mut writer, &FORMAT_VERSION)?;
        put(
            &mut writer,
            &Header {
                goal: self.goal,
                slot_width,
                aggregation: self.aggregation,
                n_trees: self.trees.len(),
                n_nodes: self.arena.len(),
                n_leaves: self.arena.nodes().iter().filter(|n| n.is_leaf()).count(),
                n_attributes: self.kinds.len(),
            },
        )?;

        for (i, tree) in self.trees.iter().enumerate() {
            let end = self
                .trees
                .get(i + 1)
                .map_or(self.arena.len(), |next| next.root.index());
            put(
                &mut writer,
                &TreeRecord {
                    n_nodes: end - tree.root.index(),
                    weight: tree.weight,
                },
            )?;
        }

        for (id, node) in self.arena.nodes().iter().enumerate() {
            match node {
                Node::Split {
                    attribute,
                    threshold,
                    left_offset,
                    right_offset,
                    size,
                } => put(
                    &mut writer,
                    &NodeRecord::Split {
                        attribute: *attribute,
                        threshold: *threshold,
                        left_offset: *left_offset,
                        right_offset: *right_offset,
                        size: *size,
                    },
                )?,
                Node::Leaf { size, .. } => {
                    put(&mut writer, &NodeRecord::Leaf { size: *size })?;
                    let values = self.arena.leaf_values(NodeId::new(id)).unwrap_or_default();
                    for k in 0..slot_width {
                        put(&mut writer, &values.get(k).copied().unwrap_or(0.0))?;
                    }
                }
            }
        }

        for kind in &self.kinds {
            put(&mut writer, kind)?;
        }
        Ok(())
    }

    /// Read a model written by [`Ensemble::write_to`].
    ///
    /// `path` only labels errors; pass an empty path for in-memory sources.
    ///
    /// # Errors
    ///
    /// | Variant                                   | When                              |
    /// |-------------------------------------------|-----------------------------------|
    /// | [`TreeError::DeserializeModel`]           | a record cannot be decoded        |
    /// | [`TreeError::IncompatibleModelVersion`]   | the format version differs        |
    /// | [`TreeError::AllocationFailure`]          | header counts cannot be reserved  |
    /// | [`TreeError::CorruptModel`]               | counts or links are inconsistent  |
    pub fn read_from<R: Read>(mut reader: R, path: &Path) -> Result<Self, TreeError> {
        let version: u32 = get(&mut reader, path)?;
        if version != FORMAT_VERSION {
            return Err(TreeError::IncompatibleModelVersion {
                expected: FORMAT_VERSION,
                found: version,
                path: path.to_path_buf(),
            });
        }
        let header: Header = get(&mut reader, path)?;
        if header.slot_width != header.goal.slot_width()
            && header.aggregation != Aggregation::Logistic
        {
            return Err(TreeError::CorruptModel {
                reason: format!(
                    "slot width {} does not match a {} model",
                    header.slot_width, header.goal
                ),
            });
        }

        if header.n_leaves > header.n_nodes {
            return Err(TreeError::CorruptModel {
                reason: format!(
                    "{} leaves declared for {} nodes",
                    header.n_leaves, header.n_nodes
                ),
            });
        }
        let n_values = header
            .n_leaves
            .checked_mul(header.slot_width)
            .ok_or(TreeError::AllocationFailure {
                requested: usize::MAX,
            })?;
        let mut values: Vec<f64> = reserve(n_values)?;

        let mut trees: Vec<TreeEntry> = reserve(header.n_trees)?;
        let mut next_root = 0usize;
        for _ in 0..header.n_trees {
            let record: TreeRecord = get(&mut reader, path)?;
            trees.push(TreeEntry {
                root: NodeId::new(next_root),
                weight: record.weight,
            });
            next_root += record.n_nodes;
        }
        if next_root != header.n_nodes {
            return Err(TreeError::CorruptModel {
                reason: format!(
                    "trees cover {next_root} nodes, header declares {}",
                    header.n_nodes
                ),
            });
        }

        let mut nodes: Vec<Node> = reserve(header.n_nodes)?;
        let mut n_leaves = 0usize;
        for _ in 0..header.n_nodes {
            let record: NodeRecord = get(&mut reader, path)?;
            nodes.push(match record {
                NodeRecord::Split {
                    attribute,
                    threshold,
                    left_offset,
                    right_offset,
                    size,
                } => Node::Split {
                    attribute,
                    threshold,
                    left_offset,
                    right_offset,
                    size,
                },
                NodeRecord::Leaf { size } => {
                    n_leaves += 1;
                    if n_leaves > header.n_leaves {
                        return Err(TreeError::CorruptModel {
                            reason: format!("more than {} leaf records", header.n_leaves),
                        });
                    }
                    let slot = if header.slot_width == 0 {
                        None
                    } else {
                        let slot = values.len() / header.slot_width;
                        for _ in 0..header.slot_width {
                            values.push(get(&mut reader, path)?);
                        }
                        Some(slot)
                    };
                    Node::Leaf { slot, size }
                }
            });
        }

        if n_leaves != header.n_leaves {
            return Err(TreeError::CorruptModel {
                reason: format!("{n_leaves} leaf records, header declares {}", header.n_leaves),
            });
        }

        let mut kinds: Vec<AttributeKind> = reserve(header.n_attributes)?;
        for _ in 0..header.n_attributes {
            kinds.push(get(&mut reader, path)?);
        }
        if let Some(attribute) = nodes
            .iter()
            .filter_map(Node::tested_attribute)
            .find(|a| a.index() >= header.n_attributes)
        {
            return Err(TreeError::CorruptModel {
                reason: format!("node tests attribute {attribute} of {}", header.n_attributes),
            });
        }

        let arena = NodeArena::from_parts(nodes, values, header.slot_width)?;
        Ok(Ensemble::new(arena, trees, header.goal, header.aggregation, kinds))
    }

    /// Encode the model into a byte buffer.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::SerializeModel`] when encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TreeError> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)?;
        Ok(bytes)
    }

    /// Decode a model from a byte buffer.
    ///
    /// # Errors
    ///
    /// Same as [`Ensemble::read_from`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TreeError> {
        Self::read_from(bytes, &PathBuf::new())
    }

    /// Save the model to a binary file.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`TreeError::SerializeModel`] | bincode encoding failed |
    /// | [`TreeError::WriteModel`] | file write failed |
    #[instrument(skip(self), fields(path = %path.as_ref().display()))]
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), TreeError> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;
        std::fs::write(path, &bytes).map_err(|e| TreeError::WriteModel {
            path: path.to_path_buf(),
            source: e,
        })?;
        info!(
            size_bytes = bytes.len(),
            n_trees = self.trees.len(),
            n_nodes = self.arena.len(),
            "model saved"
        );
        Ok(())
    }

    /// Load a model from a binary file.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`TreeError::ReadModel`] | file read failed |
    /// | [`TreeError::DeserializeModel`] | bincode decoding failed |
    /// | [`TreeError::IncompatibleModelVersion`] | format version mismatch |
    /// | [`TreeError::CorruptModel`] | inconsistent counts or links |
    #[instrument(fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TreeError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| TreeError::ReadModel {
            path: path.to_path_buf(),
            source: e,
        })?;
        let ensemble = Self::read_from(bytes.as_slice(), path)?;
        debug!(
            n_trees = ensemble.n_trees(),
            n_nodes = ensemble.n_nodes(),
            goal = %ensemble.goal,
            "model loaded"
        );
        Ok(ensemble)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::config::TrainConfig;
    use crate::table::{AttributeTable, Target};

    fn train_simple_model() -> Ensemble {
        let table = AttributeTable::numerical(vec![
            vec![1.0, 2.0, 3.0, 10.0, 11.0, 12.0],
            vec![0.0; 6],
        ])
        .unwrap();
        let target = Target::classes(vec![0, 0, 0, 1, 1, 1]);
        TrainConfig::bagging(5)
            .unwrap()
            .with_seed(42)
            .fit(&table, &target)
            .unwrap()
            .into_ensemble()
    }

    #[test]
    fn round_trip_identical_predictions() {
        let dir = TempDir::new().unwrap();
        let model_path = dir.path().join("test_model.bin");

        let ensemble = train_simple_model();
        ensemble.save(&model_path).unwrap();
        let loaded = Ensemble::load(&model_path).unwrap();

        assert_eq!(loaded.n_trees(), ensemble.n_trees());
        assert_eq!(loaded.tree_weights(), ensemble.tree_weights());
        for row in [vec![1.5, 0.0], vec![11.0, 0.0], vec![5.0, f32::NAN]] {
            assert_eq!(
                ensemble.predict(&row).unwrap(),
                loaded.predict(&row).unwrap(),
                "predictions differ for row {row:?}"
            );
        }
    }

    #[test]
    fn bytes_round_trip() {
        let ensemble = train_simple_model();
        let bytes = ensemble.to_bytes().unwrap();
        let loaded = Ensemble::from_bytes(&bytes).unwrap();
        assert_eq!(loaded.arena().nodes(), ensemble.arena().nodes());
    }

    #[test]
    fn version_mismatch_rejected() {
        let mut bytes = train_simple_model().to_bytes().unwrap();
        bytes[0] = 9;
        assert!(matches!(
            Ensemble::from_bytes(&bytes),
            Err(TreeError::IncompatibleModelVersion { found: 9, .. })
        ));
    }

    #[test]
    fn truncated_buffer_rejected() {
        let bytes = train_simple_model().to_bytes().unwrap();
        assert!(matches!(
            Ensemble::from_bytes(&bytes[..bytes.len() / 2]),
            Err(TreeError::DeserializeModel { .. })
        ));
    }

    fn header_only(n_nodes: usize, n_leaves: usize) -> Vec<u8> {
        let mut bytes = Vec::new();
        put(&mut bytes, &FORMAT_VERSION).unwrap();
        put(
            &mut bytes,
            &Header {
                goal: Goal::Regression,
                slot_width: 2,
                aggregation: Aggregation::Average,
                n_trees: 0,
                n_nodes,
                n_leaves,
                n_attributes: 1,
            },
        )
        .unwrap();
        bytes
    }

    #[test]
    fn oversized_leaf_count_fails_allocation() {
        let huge = usize::MAX / 4;
        assert!(matches!(
            Ensemble::from_bytes(&header_only(huge, huge)),
            Err(TreeError::AllocationFailure { .. })
        ));
    }

    #[test]
    fn more_leaves_than_nodes_rejected() {
        assert!(matches!(
            Ensemble::from_bytes(&header_only(1, 2)),
            Err(TreeError::CorruptModel { .. })
        ));
    }

    #[test]
    fn load_nonexistent_file_error() {
        let dir = TempDir::new().unwrap();
        let err = Ensemble::load(dir.path().join("missing.bin")).unwrap_err();
        assert!(matches!(err, TreeError::ReadModel { .. }));
    }
}
