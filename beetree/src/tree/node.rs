//! B-tree node types.
//!
//! - Leaf nodes: store key-value entries in ascending key order
//! - Internal nodes: store N separator keys and N+1 children
//!
//! Nodes are plain values. Once a node has been written to the log it is
//! never changed again; edits produce a modified copy that is written as a
//! new block. Internal nodes are generic over their child reference so the
//! same split/insert logic serves both stored nodes (children are log
//! offsets) and nodes being rebuilt by a flush.

use crate::codec::KeyOrder;
use crate::storage::Offset;

/// Smallest order that keeps split and merge results within bounds.
pub const MIN_ORDER: usize = 3;

/// Largest supported order.
pub const MAX_ORDER: usize = 1024;

/// Occupancy bounds derived from the tree order `M`.
///
/// Every node except the root holds between `⌈M/2⌉` and `M` entries (leaves)
/// or children (internal nodes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    order: usize,
}

impl Layout {
    /// Create a layout, returning `None` if the order is out of range.
    #[must_use]
    pub const fn new(order: usize) -> Option<Self> {
        if order < MIN_ORDER || order > MAX_ORDER {
            None
        } else {
            Some(Self { order })
        }
    }

    /// The tree order `M`.
    #[must_use]
    pub const fn order(self) -> usize {
        self.order
    }

    /// Maximum entries in a leaf / children in an internal node.
    #[must_use]
    pub const fn max(self) -> usize {
        self.order
    }

    /// Minimum entries in a non-root leaf / children in a non-root internal node.
    #[must_use]
    pub const fn min(self) -> usize {
        self.order.div_ceil(2)
    }
}

/// A key-value entry in a leaf node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// A leaf B-tree node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeafNode {
    /// Entries in ascending key order.
    pub entries: Vec<LeafEntry>,
}

impl LeafNode {
    /// Find the index where a key is (`Ok`) or should be inserted (`Err`).
    pub fn find_index(&self, order: &dyn KeyOrder, key: &[u8]) -> Result<usize, usize> {
        self.entries.binary_search_by(|e| order.compare(&e.key, key))
    }

    /// Get an entry by key.
    #[must_use]
    pub fn get(&self, order: &dyn KeyOrder, key: &[u8]) -> Option<&LeafEntry> {
        self.find_index(order, key).ok().map(|i| &self.entries[i])
    }

    /// Insert or overwrite an entry.
    ///
    /// Returns the old value if the key was present.
    pub fn insert(
        &mut self,
        order: &dyn KeyOrder,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> Option<Vec<u8>> {
        match self.find_index(order, &key) {
            Ok(i) => Some(std::mem::replace(&mut self.entries[i].value, value)),
            Err(i) => {
                self.entries.insert(i, LeafEntry { key, value });
                None
            }
        }
    }

    /// Remove an entry by key, returning its value if found.
    pub fn remove(&mut self, order: &dyn KeyOrder, key: &[u8]) -> Option<Vec<u8>> {
        self.find_index(order, key)
            .ok()
            .map(|i| self.entries.remove(i).value)
    }

    /// Split the node at the median, returning the separator key and the new
    /// right node. The separator is the first key of the right node.
    #[must_use]
    pub fn split(&mut self) -> (Vec<u8>, Self) {
        let mid = self.entries.len() / 2;
        let right_entries: Vec<LeafEntry> = self.entries.drain(mid..).collect();
        let separator = right_entries[0].key.clone();
        (
            separator,
            Self {
                entries: right_entries,
            },
        )
    }
}

/// An internal (non-leaf) B-tree node.
///
/// Stores N keys and N+1 children.
/// `children[i]` holds keys < `keys[i]`
/// `children[i+1]` holds keys >= `keys[i]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalNode<C = Offset> {
    /// Separator keys in ascending order.
    pub keys: Vec<Vec<u8>>,
    /// Child references. `children.len()` == `keys.len()` + 1
    pub children: Vec<C>,
}

impl<C> InternalNode<C> {
    /// Create an internal node with two children, as produced by a root split.
    #[must_use]
    pub fn with_children(left: C, key: Vec<u8>, right: C) -> Self {
        Self {
            keys: vec![key],
            children: vec![left, right],
        }
    }

    /// Index of the child whose key range contains `key`.
    pub fn find_child_index(&self, order: &dyn KeyOrder, key: &[u8]) -> usize {
        match self.keys.binary_search_by(|k| order.compare(k, key)) {
            Ok(i) => i + 1, // Exact match, go right
            Err(i) => i,
        }
    }

    /// Index of the child holding the greatest keys strictly below `key`.
    pub fn find_child_index_before(&self, order: &dyn KeyOrder, key: &[u8]) -> usize {
        match self.keys.binary_search_by(|k| order.compare(k, key)) {
            Ok(i) | Err(i) => i,
        }
    }

    /// Insert a separator and the child to its right after a child split at `index`.
    pub fn insert_split(&mut self, index: usize, key: Vec<u8>, right_child: C) {
        self.keys.insert(index, key);
        self.children.insert(index + 1, right_child);
    }

    /// Split the node, returning the median key and the new right node.
    ///
    /// The median moves up to the parent; it is kept by neither half.
    #[must_use]
    pub fn split(&mut self) -> (Vec<u8>, Self) {
        let mid = self.keys.len() / 2;
        let right_keys: Vec<Vec<u8>> = self.keys.drain(mid + 1..).collect();
        let right_children: Vec<C> = self.children.drain(mid + 1..).collect();
        let median = self.keys.remove(mid);
        (
            median,
            Self {
                keys: right_keys,
                children: right_children,
            },
        )
    }

    /// Map the child references, keeping the keys.
    pub fn map_children<D, E>(
        self,
        f: impl FnMut(C) -> Result<D, E>,
    ) -> Result<InternalNode<D>, E> {
        Ok(InternalNode {
            keys: self.keys,
            children: self.children.into_iter().map(f).collect::<Result<_, _>>()?,
        })
    }
}

/// A stored B-tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Leaf(LeafNode),
    Internal(InternalNode),
}

impl Node {
    /// Number of entries (leaf) or children (internal).
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Leaf(leaf) => leaf.entries.len(),
            Self::Internal(internal) => internal.children.len(),
        }
    }

    /// Whether the node holds no entries or children.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Errors that can occur when decoding a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// The block ended before a field was complete.
    Truncated,
    /// The block tag is not a known block type.
    UnknownTag(u8),
    /// Bytes were left over after the block was decoded.
    TrailingBytes(usize),
    /// The block decoded, but as a different type than required.
    WrongBlockType {
        expected: &'static str,
        found: &'static str,
    },
    /// A string field was not valid UTF-8.
    InvalidUtf8,
    /// A presence flag was neither 0 nor 1.
    InvalidFlag(u8),
    /// An internal node with no children.
    EmptyInternal,
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated => write!(f, "block truncated"),
            Self::UnknownTag(tag) => write!(f, "unknown block tag {tag:#04x}"),
            Self::TrailingBytes(n) => write!(f, "{n} trailing bytes after block"),
            Self::WrongBlockType { expected, found } => {
                write!(f, "expected {expected} block, found {found} block")
            }
            Self::InvalidUtf8 => write!(f, "invalid UTF-8 in string field"),
            Self::InvalidFlag(flag) => write!(f, "invalid presence flag {flag}"),
            Self::EmptyInternal => write!(f, "internal node has no children"),
        }
    }
}

impl std::error::Error for NodeError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ByteOrder;

    fn leaf_with(keys: &[u8]) -> LeafNode {
        let mut leaf = LeafNode::default();
        for &k in keys {
            leaf.insert(&ByteOrder, vec![k], vec![k; 4]);
        }
        leaf
    }

    #[test]
    fn test_layout_bounds() {
        assert!(Layout::new(2).is_none());
        assert!(Layout::new(MAX_ORDER + 1).is_none());

        let layout = Layout::new(8).expect("valid order");
        assert_eq!(layout.max(), 8);
        assert_eq!(layout.min(), 4);

        let layout = Layout::new(5).expect("valid order");
        assert_eq!(layout.min(), 3);
    }

    #[test]
    fn test_leaf_node_insert_update() {
        let mut node = LeafNode::default();

        let old = node.insert(&ByteOrder, b"a".to_vec(), b"value1".to_vec());
        assert!(old.is_none());

        let old = node.insert(&ByteOrder, b"a".to_vec(), b"updated".to_vec());
        assert_eq!(old, Some(b"value1".to_vec()));
        assert_eq!(node.entries.len(), 1);
        assert_eq!(
            node.get(&ByteOrder, b"a").map(|e| e.value.as_slice()),
            Some(b"updated".as_slice())
        );
    }

    #[test]
    fn test_leaf_node_keeps_keys_sorted() {
        let node = leaf_with(&[5, 3, 9, 1, 7]);
        let keys: Vec<u8> = node.entries.iter().map(|e| e.key[0]).collect();
        assert_eq!(keys, vec![1, 3, 5, 7, 9]);
    }

    #[test]
    fn test_leaf_node_remove() {
        let mut node = leaf_with(&[1, 2]);
        assert_eq!(node.remove(&ByteOrder, &[1]), Some(vec![1; 4]));
        assert_eq!(node.remove(&ByteOrder, &[1]), None);
        assert_eq!(node.entries.len(), 1);
    }

    #[test]
    fn test_leaf_node_split() {
        let mut node = leaf_with(&[0, 1, 2, 3, 4, 5, 6, 7, 8]);
        let (separator, right) = node.split();

        assert_eq!(node.entries.len(), 4);
        assert_eq!(right.entries.len(), 5);
        assert_eq!(separator, right.entries[0].key);
        assert!(node.entries.iter().all(|e| e.key < separator));
    }

    #[test]
    fn test_internal_node_find_child() {
        let node = InternalNode {
            keys: vec![vec![10], vec![20], vec![30]],
            children: vec![100u64, 200, 300, 400],
        };

        assert_eq!(node.find_child_index(&ByteOrder, &[5]), 0);
        assert_eq!(node.find_child_index(&ByteOrder, &[10]), 1);
        assert_eq!(node.find_child_index(&ByteOrder, &[15]), 1);
        assert_eq!(node.find_child_index(&ByteOrder, &[35]), 3);

        // Keys strictly below a separator live left of it.
        assert_eq!(node.find_child_index_before(&ByteOrder, &[10]), 0);
        assert_eq!(node.find_child_index_before(&ByteOrder, &[15]), 1);
        assert_eq!(node.find_child_index_before(&ByteOrder, &[35]), 3);
    }

    #[test]
    fn test_internal_node_split() {
        // Order 8 overflows at 9 children / 8 keys.
        let mut node = InternalNode {
            keys: (1..=8u8).map(|k| vec![k * 10]).collect(),
            children: (0..9u64).collect(),
        };

        let (median, right) = node.split();

        assert_eq!(median, vec![50]);
        assert_eq!(node.keys.len() + 1, node.children.len());
        assert_eq!(right.keys.len() + 1, right.children.len());
        assert_eq!(node.children, vec![0, 1, 2, 3, 4]);
        assert_eq!(right.children, vec![5, 6, 7, 8]);
        assert!(node.keys.iter().all(|k| *k < median));
        assert!(right.keys.iter().all(|k| *k > median));
    }

    #[test]
    fn test_internal_node_insert_split() {
        let mut node = InternalNode::with_children(1u64, vec![20], 2);
        node.insert_split(0, vec![10], 3);
        assert_eq!(node.keys, vec![vec![10], vec![20]]);
        assert_eq!(node.children, vec![1, 3, 2]);
    }
}
