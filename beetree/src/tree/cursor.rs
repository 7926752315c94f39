//! Bounded range traversal over one version of the tree.
//!
//! Nodes carry no sibling links, so the cursor keeps the path from the root
//! to the current leaf as an explicit stack of `(internal node, child index)`
//! frames. When a leaf runs out, the cursor pops frames until one has a
//! further child in the iteration direction, then descends to the nearest
//! leaf of that child.
//!
//! # Fetch Discipline
//!
//! The cursor fetches a node only if its subtree can hold a key inside the
//! bounds:
//!
//! - an interval that is empty by its bounds alone fetches nothing
//! - the first descent follows the same binary search as a point lookup
//! - before moving to a sibling subtree, the separator between them is
//!   checked against the far bound; if the whole sibling lies outside, the
//!   cursor stops without fetching it

use std::cmp::Ordering;
use std::ops::Bound;
use std::sync::Arc;

use crate::codec::KeyOrder;
use crate::storage::Offset;
use crate::tree::engine::Tree;
use crate::tree::error::TreeError;
use crate::tree::node::{InternalNode, LeafEntry, Node};

/// Key bounds and direction of a range scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub lower: Bound<Vec<u8>>,
    pub upper: Bound<Vec<u8>>,
    pub reverse: bool,
}

impl Default for KeyRange {
    fn default() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
            reverse: false,
        }
    }
}

impl KeyRange {
    /// Whether the bounds alone rule out every key.
    #[must_use]
    pub fn is_empty(&self, order: &dyn KeyOrder) -> bool {
        let (lower, lower_inclusive) = match &self.lower {
            Bound::Included(key) => (key, true),
            Bound::Excluded(key) => (key, false),
            Bound::Unbounded => return false,
        };
        let (upper, upper_inclusive) = match &self.upper {
            Bound::Included(key) => (key, true),
            Bound::Excluded(key) => (key, false),
            Bound::Unbounded => return false,
        };
        match order.compare(lower, upper) {
            Ordering::Greater => true,
            Ordering::Equal => !(lower_inclusive && upper_inclusive),
            Ordering::Less => false,
        }
    }

    fn above_lower(&self, order: &dyn KeyOrder, key: &[u8]) -> bool {
        match &self.lower {
            Bound::Included(bound) => order.compare(key, bound) != Ordering::Less,
            Bound::Excluded(bound) => order.compare(key, bound) == Ordering::Greater,
            Bound::Unbounded => true,
        }
    }

    fn below_upper(&self, order: &dyn KeyOrder, key: &[u8]) -> bool {
        match &self.upper {
            Bound::Included(bound) => order.compare(key, bound) != Ordering::Greater,
            Bound::Excluded(bound) => order.compare(key, bound) == Ordering::Less,
            Bound::Unbounded => true,
        }
    }

    /// Child to start from in an internal node.
    fn start_child(&self, order: &dyn KeyOrder, node: &InternalNode) -> usize {
        if self.reverse {
            match &self.upper {
                Bound::Included(key) => node.find_child_index(order, key),
                Bound::Excluded(key) => node.find_child_index_before(order, key),
                Bound::Unbounded => node.children.len() - 1,
            }
        } else {
            match &self.lower {
                Bound::Included(key) | Bound::Excluded(key) => node.find_child_index(order, key),
                Bound::Unbounded => 0,
            }
        }
    }

    /// Position to start from in a leaf. Forward, the index of the first
    /// entry to yield; reverse, the number of entries left to yield.
    fn start_position(&self, order: &dyn KeyOrder, entries: &[LeafEntry]) -> usize {
        let search = |key: &[u8]| entries.binary_search_by(|e| order.compare(&e.key, key));
        if self.reverse {
            match &self.upper {
                Bound::Included(key) => search(key).map_or_else(|i| i, |i| i + 1),
                Bound::Excluded(key) => search(key).unwrap_or_else(|i| i),
                Bound::Unbounded => entries.len(),
            }
        } else {
            match &self.lower {
                Bound::Included(key) => search(key).unwrap_or_else(|i| i),
                Bound::Excluded(key) => search(key).map_or_else(|i| i, |i| i + 1),
                Bound::Unbounded => 0,
            }
        }
    }
}

#[derive(Debug)]
struct Frame {
    node: InternalNode,
    index: usize,
}

#[derive(Debug)]
enum State {
    /// Not started; holds the root to descend from.
    Start(Option<Offset>),
    Active,
    Done,
}

/// Lazy iterator over the entries of one version within a [`KeyRange`].
///
/// Dropping the cursor stops it; nothing is fetched ahead of demand.
pub struct RangeCursor {
    tree: Arc<Tree>,
    range: KeyRange,
    stack: Vec<Frame>,
    leaf: Vec<LeafEntry>,
    position: usize,
    state: State,
}

impl RangeCursor {
    /// Create a cursor over the tree rooted at `root`.
    #[must_use]
    pub const fn new(tree: Arc<Tree>, root: Option<Offset>, range: KeyRange) -> Self {
        Self {
            tree,
            range,
            stack: Vec::new(),
            leaf: Vec::new(),
            position: 0,
            state: State::Start(root),
        }
    }

    fn start(&mut self, root: Option<Offset>) -> Result<(), TreeError> {
        let Some(root) = root else {
            self.finish("empty tree");
            return Ok(());
        };
        if self.range.is_empty(self.tree.key_order()) {
            self.finish("empty interval");
            return Ok(());
        }
        self.state = State::Active;
        let mut offset = root;
        loop {
            match self.tree.store().read_node(offset)? {
                Node::Internal(node) => {
                    let index = self.range.start_child(self.tree.key_order(), &node);
                    offset = node.children[index];
                    self.stack.push(Frame { node, index });
                }
                Node::Leaf(leaf) => {
                    self.position = self
                        .range
                        .start_position(self.tree.key_order(), &leaf.entries);
                    self.leaf = leaf.entries;
                    return Ok(());
                }
            }
        }
    }

    /// Move to the next leaf in the iteration direction. Returns `false` when
    /// no remaining subtree can hold a key within bounds.
    fn next_leaf(&mut self) -> Result<bool, TreeError> {
        let order = self.tree.key_order();
        let offset = loop {
            let Some(frame) = self.stack.last_mut() else {
                return Ok(false);
            };
            if self.range.reverse {
                if frame.index == 0 {
                    self.stack.pop();
                    continue;
                }
                frame.index -= 1;
                // Every key in the new child is below this separator.
                let separator = &frame.node.keys[frame.index];
                let exhausted = match &self.range.lower {
                    Bound::Included(bound) | Bound::Excluded(bound) => {
                        order.compare(separator, bound) != Ordering::Greater
                    }
                    Bound::Unbounded => false,
                };
                if exhausted {
                    return Ok(false);
                }
            } else {
                if frame.index + 1 >= frame.node.children.len() {
                    self.stack.pop();
                    continue;
                }
                frame.index += 1;
                // Every key in the new child is at or above this separator.
                let separator = &frame.node.keys[frame.index - 1];
                if !self.range.below_upper(order, separator) {
                    return Ok(false);
                }
            }
            break frame.node.children[frame.index];
        };

        let mut offset = offset;
        loop {
            match self.tree.store().read_node(offset)? {
                Node::Internal(node) => {
                    let index = if self.range.reverse {
                        node.children.len() - 1
                    } else {
                        0
                    };
                    offset = node.children[index];
                    self.stack.push(Frame { node, index });
                }
                Node::Leaf(leaf) => {
                    self.position = if self.range.reverse {
                        leaf.entries.len()
                    } else {
                        0
                    };
                    self.leaf = leaf.entries;
                    return Ok(true);
                }
            }
        }
    }

    fn advance(&mut self) -> Result<Option<LeafEntry>, TreeError> {
        loop {
            let has_entry = if self.range.reverse {
                self.position > 0
            } else {
                self.position < self.leaf.len()
            };
            if !has_entry {
                if self.next_leaf()? {
                    continue;
                }
                self.finish("no further subtree in range");
                return Ok(None);
            }

            let index = if self.range.reverse {
                self.position - 1
            } else {
                self.position
            };
            let key = &self.leaf[index].key;
            let order = self.tree.key_order();
            let in_range = if self.range.reverse {
                self.range.above_lower(order, key)
            } else {
                self.range.below_upper(order, key)
            };
            if !in_range {
                self.finish("passed the far bound");
                return Ok(None);
            }

            if self.range.reverse {
                self.position -= 1;
            } else {
                self.position += 1;
            }
            return Ok(Some(LeafEntry {
                key: std::mem::take(&mut self.leaf[index].key),
                value: std::mem::take(&mut self.leaf[index].value),
            }));
        }
    }

    fn finish(&mut self, reason: &str) {
        tracing::trace!("range cursor done: {reason}");
        self.state = State::Done;
        self.stack.clear();
        self.leaf.clear();
    }
}

impl Iterator for RangeCursor {
    type Item = Result<LeafEntry, TreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = match self.state {
            State::Done => return None,
            State::Start(root) => self.start(root).and_then(|()| match self.state {
                State::Done => Ok(None),
                _ => self.advance(),
            }),
            State::Active => self.advance(),
        };
        match result {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => {
                self.finish("error");
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ByteOrder;
    use crate::config::TreeConfig;
    use crate::storage::MemoryLog;
    use crate::tree::block::Change;
    use crate::tree::engine::{CodecIds, Head};

    fn build(keys: &[u32], order: usize) -> (Arc<MemoryLog>, Arc<Tree>, Head) {
        let log = Arc::new(MemoryLog::new());
        let tree = Tree::open(
            log.clone(),
            &TreeConfig::default().with_order(order),
            Arc::new(ByteOrder),
            CodecIds {
                key: "binary",
                value: "binary",
            },
        )
        .expect("open");
        let changes = keys
            .iter()
            .map(|k| Change {
                key: k.to_be_bytes().to_vec(),
                value: Some(vec![1]),
            })
            .collect();
        let head = tree.flush(Head::default(), changes).expect("flush");
        (log, Arc::new(tree), head)
    }

    fn scan(tree: &Arc<Tree>, head: Head, range: KeyRange) -> Vec<u32> {
        RangeCursor::new(tree.clone(), head.root, range)
            .map(|entry| {
                let key = entry.expect("entry").key;
                u32::from_be_bytes([key[0], key[1], key[2], key[3]])
            })
            .collect()
    }

    fn k(v: u32) -> Vec<u8> {
        v.to_be_bytes().to_vec()
    }

    #[test]
    fn test_full_scan_both_directions() {
        let keys: Vec<u32> = (0..300).map(|i| i * 2).collect();
        let (_log, tree, head) = build(&keys, 4);

        assert_eq!(scan(&tree, head, KeyRange::default()), keys);

        let reversed: Vec<u32> = keys.iter().rev().copied().collect();
        let range = KeyRange {
            reverse: true,
            ..KeyRange::default()
        };
        assert_eq!(scan(&tree, head, range), reversed);
    }

    #[test]
    fn test_bounds_between_keys() {
        let keys: Vec<u32> = (0..100).map(|i| i * 10).collect();
        let (_log, tree, head) = build(&keys, 4);

        for reverse in [false, true] {
            let range = KeyRange {
                lower: Bound::Excluded(k(105)),
                upper: Bound::Included(k(155)),
                reverse,
            };
            let mut expected = vec![110, 120, 130, 140, 150];
            if reverse {
                expected.reverse();
            }
            assert_eq!(scan(&tree, head, range), expected);
        }
    }

    #[test]
    fn test_empty_interval_fetches_nothing() {
        let (log, tree, head) = build(&[1, 2, 3], 4);
        log.reset_stats();

        let range = KeyRange {
            lower: Bound::Included(k(2)),
            upper: Bound::Excluded(k(2)),
            reverse: false,
        };
        assert!(scan(&tree, head, range).is_empty());

        let range = KeyRange {
            lower: Bound::Included(k(3)),
            upper: Bound::Included(k(1)),
            reverse: true,
        };
        assert!(scan(&tree, head, range).is_empty());
        assert_eq!(log.stats().reads, 0);
    }

    #[test]
    fn test_out_of_range_bound_fetches_one_path() {
        let keys: Vec<u32> = (0..500).collect();
        let (log, tree, head) = build(&keys, 4);

        let mut height = 0;
        let mut offset = head.root;
        while let Some(o) = offset {
            height += 1;
            offset = match tree.store().read_node(o).expect("read") {
                Node::Internal(node) => Some(node.children[0]),
                Node::Leaf(_) => None,
            };
        }

        log.reset_stats();
        let range = KeyRange {
            lower: Bound::Excluded(k(499)),
            ..KeyRange::default()
        };
        assert!(scan(&tree, head, range).is_empty());
        assert_eq!(log.stats().reads, height);

        log.reset_stats();
        let range = KeyRange {
            upper: Bound::Excluded(k(0)),
            reverse: true,
            ..KeyRange::default()
        };
        assert!(scan(&tree, head, range).is_empty());
        assert_eq!(log.stats().reads, height);
    }

    #[test]
    fn test_stops_before_sibling_outside_bounds() {
        let keys: Vec<u32> = (0..500).collect();
        let (log, tree, head) = build(&keys, 4);

        log.reset_stats();
        let range = KeyRange {
            lower: Bound::Included(k(10)),
            upper: Bound::Excluded(k(12)),
            reverse: false,
        };
        assert_eq!(scan(&tree, head, range), vec![10, 11]);
        let narrow = log.stats().reads;

        log.reset_stats();
        assert_eq!(
            scan(&tree, head, KeyRange::default()).len(),
            500,
            "full scan"
        );
        assert!(narrow * 10 < log.stats().reads);
    }

    #[test]
    fn test_early_drop_stops_fetching() {
        let keys: Vec<u32> = (0..500).collect();
        let (log, tree, head) = build(&keys, 4);

        log.reset_stats();
        let mut cursor = RangeCursor::new(tree, head.root, KeyRange::default());
        assert!(cursor.next().is_some());
        let reads = log.stats().reads;
        drop(cursor);
        assert_eq!(log.stats().reads, reads);
    }
}
