//! Invariant checking for deterministic simulation testing.
//!
//! The checker walks a committed version of the tree and verifies:
//!
//! - keys are strictly ascending within every node, and every key in a
//!   subtree lies within the separators that lead to it
//! - internal nodes hold one more child than keys
//! - every node except the root is within the occupancy bounds of the order
//! - all leaves sit at the same depth
//! - the tree's contents equal an in-memory model

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::storage::Offset;
use crate::tree::{Head, LeafEntry, Node, Tree, TreeError};

/// An invariant violation detected during simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    /// Description of the violation.
    pub description: String,
    /// Version of the tree where it was detected.
    pub version: u64,
    /// Additional context.
    pub context: String,
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "version {}: {}", self.version, self.description)?;
        if !self.context.is_empty() {
            write!(f, " ({})", self.context)?;
        }
        Ok(())
    }
}

/// Separator bounds a subtree's keys must respect.
#[derive(Clone, Copy)]
struct Bounds<'a> {
    /// Inclusive lower bound.
    lower: Option<&'a [u8]>,
    /// Exclusive upper bound.
    upper: Option<&'a [u8]>,
}

/// Walk state for one version.
struct Walk<'a> {
    tree: &'a Tree,
    version: u64,
    leaf_depth: Option<usize>,
    entries: Vec<LeafEntry>,
}

/// Checker for tree invariants.
#[derive(Debug, Default)]
pub struct InvariantChecker {
    /// Detected violations.
    violations: Vec<InvariantViolation>,
}

impl InvariantChecker {
    /// Create a new invariant checker.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            violations: Vec::new(),
        }
    }

    /// Get all violations.
    #[must_use]
    pub fn violations(&self) -> &[InvariantViolation] {
        &self.violations
    }

    /// Check if any violations were detected.
    #[must_use]
    pub const fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }

    /// Take all recorded violations, leaving none.
    pub fn take_violations(&mut self) -> Vec<InvariantViolation> {
        std::mem::take(&mut self.violations)
    }

    /// Add a violation.
    pub fn add_violation(&mut self, violation: InvariantViolation) {
        self.violations.push(violation);
    }

    /// Check the structure of the version `head` and return its entries in
    /// key order.
    ///
    /// Read errors are returned as errors, not recorded as violations.
    pub fn check_structure(
        &mut self,
        tree: &Tree,
        head: Head,
    ) -> Result<Vec<LeafEntry>, TreeError> {
        let mut walk = Walk {
            tree,
            version: head.version,
            leaf_depth: None,
            entries: Vec::new(),
        };
        if let Some(root) = head.root {
            let unbounded = Bounds {
                lower: None,
                upper: None,
            };
            self.visit(&mut walk, root, 0, unbounded, true)?;
        }
        Ok(walk.entries)
    }

    /// Check that `entries` hold exactly the contents of `model`.
    pub fn check_contents(
        &mut self,
        version: u64,
        entries: &[LeafEntry],
        model: &BTreeMap<Vec<u8>, Vec<u8>>,
    ) {
        if entries.len() != model.len() {
            self.violations.push(InvariantViolation {
                description: "Entry count differs from model".to_string(),
                version,
                context: format!("tree has {}, model has {}", entries.len(), model.len()),
            });
        }
        for (entry, (key, value)) in entries.iter().zip(model) {
            if entry.key != *key || entry.value != *value {
                self.violations.push(InvariantViolation {
                    description: "Entry differs from model".to_string(),
                    version,
                    context: format!(
                        "tree has {:?}={:?}, model has {:?}={:?}",
                        entry.key, entry.value, key, value
                    ),
                });
                return;
            }
        }
    }

    /// Check structure and contents of `head` against `model`.
    pub fn check_version(
        &mut self,
        tree: &Tree,
        head: Head,
        model: &BTreeMap<Vec<u8>, Vec<u8>>,
    ) -> Result<(), TreeError> {
        let entries = self.check_structure(tree, head)?;
        self.check_contents(head.version, &entries, model);
        Ok(())
    }

    fn visit(
        &mut self,
        walk: &mut Walk<'_>,
        offset: Offset,
        depth: usize,
        bounds: Bounds<'_>,
        is_root: bool,
    ) -> Result<(), TreeError> {
        let node = walk.tree.store().read_node(offset)?;
        self.check_occupancy(walk, offset, &node, is_root);

        match node {
            Node::Leaf(leaf) => {
                let keys: Vec<&[u8]> = leaf.entries.iter().map(|e| e.key.as_slice()).collect();
                self.check_keys(walk, offset, &keys, bounds);
                match walk.leaf_depth {
                    None => walk.leaf_depth = Some(depth),
                    Some(expected) if expected != depth => {
                        self.violations.push(InvariantViolation {
                            description: "Leaves at different depths".to_string(),
                            version: walk.version,
                            context: format!("leaf {offset} at depth {depth}, expected {expected}"),
                        });
                    }
                    Some(_) => {}
                }
                walk.entries.extend(leaf.entries);
            }
            Node::Internal(internal) => {
                let keys: Vec<&[u8]> = internal.keys.iter().map(Vec::as_slice).collect();
                self.check_keys(walk, offset, &keys, bounds);
                if internal.children.len() != internal.keys.len() + 1 {
                    self.violations.push(InvariantViolation {
                        description: "Internal node child count mismatch".to_string(),
                        version: walk.version,
                        context: format!(
                            "node {offset} has {} keys and {} children",
                            internal.keys.len(),
                            internal.children.len()
                        ),
                    });
                    return Ok(());
                }
                for (i, &child) in internal.children.iter().enumerate() {
                    let child_bounds = Bounds {
                        lower: if i == 0 {
                            bounds.lower
                        } else {
                            Some(keys[i - 1])
                        },
                        upper: keys.get(i).copied().or(bounds.upper),
                    };
                    self.visit(walk, child, depth + 1, child_bounds, false)?;
                }
            }
        }
        Ok(())
    }

    fn check_occupancy(&mut self, walk: &Walk<'_>, offset: Offset, node: &Node, is_root: bool) {
        let layout = walk.tree.layout();
        let len = node.len();
        let min = match (is_root, node) {
            (true, Node::Leaf(_)) => 1,
            (true, Node::Internal(_)) => 2,
            (false, _) => layout.min(),
        };
        if len < min || len > layout.max() {
            self.violations.push(InvariantViolation {
                description: "Node occupancy out of bounds".to_string(),
                version: walk.version,
                context: format!(
                    "node {offset} holds {len}, bounds {min}..={}{}",
                    layout.max(),
                    if is_root { " (root)" } else { "" }
                ),
            });
        }
    }

    fn check_keys(&mut self, walk: &Walk<'_>, offset: Offset, keys: &[&[u8]], bounds: Bounds<'_>) {
        let order = walk.tree.key_order();
        if keys
            .windows(2)
            .any(|pair| order.compare(pair[0], pair[1]) != Ordering::Less)
        {
            self.violations.push(InvariantViolation {
                description: "Keys not strictly ascending".to_string(),
                version: walk.version,
                context: format!("node {offset}"),
            });
        }
        let below_lower = |key: &[u8]| {
            bounds
                .lower
                .is_some_and(|lower| order.compare(key, lower) == Ordering::Less)
        };
        let above_upper = |key: &[u8]| {
            bounds
                .upper
                .is_some_and(|upper| order.compare(key, upper) != Ordering::Less)
        };
        if keys.iter().any(|&key| below_lower(key) || above_upper(key)) {
            self.violations.push(InvariantViolation {
                description: "Key outside separator bounds".to_string(),
                version: walk.version,
                context: format!("node {offset}"),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::codec::ByteOrder;
    use crate::config::TreeConfig;
    use crate::storage::{Log, MemoryLog};
    use crate::tree::{
        Block, Change, CodecIds, CommitRecord, HEADER_FORMAT, Header, InternalNode, LeafNode,
    };

    fn open(log: Arc<MemoryLog>) -> Tree {
        Tree::open(
            log,
            &TreeConfig::default().with_order(4),
            Arc::new(ByteOrder),
            CodecIds {
                key: "binary",
                value: "binary",
            },
        )
        .expect("open tree")
    }

    fn key(i: u32) -> Vec<u8> {
        format!("k{i:04}").into_bytes()
    }

    #[test]
    fn test_valid_tree_has_no_violations() {
        let tree = open(Arc::new(MemoryLog::new()));
        let mut model = BTreeMap::new();
        let mut head = tree.head().expect("head");
        for i in 0..200 {
            let change = Change {
                key: key(i * 7 % 200),
                value: Some(vec![1]),
            };
            model.insert(change.key.clone(), vec![1]);
            head = tree.flush(head, vec![change]).expect("flush");
        }
        for i in 0..150 {
            model.remove(&key(i));
            head = tree
                .flush(
                    head,
                    vec![Change {
                        key: key(i),
                        value: None,
                    }],
                )
                .expect("flush");
        }

        let mut checker = InvariantChecker::new();
        checker.check_version(&tree, head, &model).expect("walk");
        assert!(!checker.has_violations(), "{:?}", checker.violations());
    }

    #[test]
    fn test_detects_model_mismatch() {
        let tree = open(Arc::new(MemoryLog::new()));
        let head = tree
            .flush(
                Head::default(),
                vec![Change {
                    key: b"a".to_vec(),
                    value: Some(b"1".to_vec()),
                }],
            )
            .expect("flush");

        let mut model = BTreeMap::new();
        model.insert(b"a".to_vec(), b"2".to_vec());
        let mut checker = InvariantChecker::new();
        checker.check_version(&tree, head, &model).expect("walk");
        assert_eq!(checker.violations().len(), 1);
        assert_eq!(checker.violations()[0].version, head.version);
    }

    #[test]
    fn test_detects_unordered_and_underfull_nodes() {
        let log = Arc::new(MemoryLog::new());
        let header = Header {
            format: HEADER_FORMAT,
            protocol: "beetree".to_string(),
            order: 4,
            key_codec: "binary".to_string(),
            value_codec: "binary".to_string(),
            key_order: "bytes".to_string(),
        };
        log.append(&Block::Header(header).encode()).expect("append");

        let leaf = |keys: &[&[u8]]| {
            Block::Node(Node::Leaf(LeafNode {
                entries: keys
                    .iter()
                    .map(|k| LeafEntry {
                        key: k.to_vec(),
                        value: Vec::new(),
                    })
                    .collect(),
            }))
            .encode()
        };
        // An unordered leaf, and a leaf below the minimum for order 4.
        let left = log.append(&leaf(&[b"b", b"a"])).expect("append");
        let right = log.append(&leaf(&[b"m"])).expect("append");
        let root = Block::Node(Node::Internal(InternalNode::with_children(
            left,
            b"m".to_vec(),
            right,
        )));
        let root = log.append(&root.encode()).expect("append");
        let commit = Block::Commit(CommitRecord {
            root: Some(root),
            prev: None,
            seq: 1,
            changes: Vec::new(),
        });
        log.append(&commit.encode()).expect("append");

        let tree = open(log);
        let head = tree.head().expect("head");
        let mut checker = InvariantChecker::new();
        let entries = checker.check_structure(&tree, head).expect("walk");
        assert_eq!(entries.len(), 3);

        let descriptions: Vec<&str> = checker
            .violations()
            .iter()
            .map(|v| v.description.as_str())
            .collect();
        assert_eq!(
            descriptions,
            vec!["Keys not strictly ascending", "Node occupancy out of bounds"]
        );
    }
}
