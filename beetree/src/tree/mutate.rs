//! Copy-on-write mutation of a stored tree.
//!
//! A [`Mutation`] starts from the root of a committed version and applies
//! puts and deletes without ever changing a stored node. Every node on a
//! touched root-to-leaf path is copied into an in-memory arena the first time
//! it is reached; later operations in the same flush edit the copy. Untouched
//! subtrees stay referenced by their log offset and are shared with the base
//! version.
//!
//! # Rebalancing
//!
//! Leaves and internal nodes hold between `⌈M/2⌉` and `M` entries/children,
//! except the root.
//!
//! - Overflow: split at the median and insert the separator into the parent;
//!   a root split adds a level.
//! - Underflow: borrow from the left sibling if it can spare an entry, else
//!   from the right sibling, else merge into the left sibling, else merge the
//!   right sibling in. An internal root left with one child is replaced by
//!   that child; an empty leaf root leaves the tree empty.
//!
//! [`Mutation::write`] appends the dirty nodes children-first, so the root is
//! always the last node block of a flush.

use std::mem;

use crate::codec::KeyOrder;
use crate::storage::Offset;
use crate::tree::error::TreeError;
use crate::tree::node::{InternalNode, Layout, LeafNode, Node, NodeError};
use crate::tree::store::NodeStore;

/// Reference to a child during a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// Unchanged node, shared with the base version.
    Stored(Offset),
    /// Copied node in the arena.
    Dirty(usize),
}

#[derive(Debug)]
enum WorkNode {
    Leaf(LeafNode),
    Internal(InternalNode<Slot>),
}

impl WorkNode {
    fn len(&self) -> usize {
        match self {
            Self::Leaf(leaf) => leaf.entries.len(),
            Self::Internal(internal) => internal.children.len(),
        }
    }

    const fn kind(&self) -> &'static str {
        match self {
            Self::Leaf(_) => "leaf",
            Self::Internal(_) => "internal",
        }
    }
}

/// An arena node and the offset it was copied from, if any.
#[derive(Debug)]
struct Work {
    node: WorkNode,
    origin: Option<Offset>,
}

/// One step of a recorded descent: an internal node in the arena, the child
/// index taken, and the child reference it held before the descent.
#[derive(Debug, Clone, Copy)]
struct Step {
    parent: usize,
    index: usize,
    original: Slot,
}

/// Result of writing a mutation to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Written {
    /// New root, or `None` if the tree is now empty.
    pub root: Option<Offset>,
    /// Number of node blocks appended.
    pub nodes: usize,
}

/// A set of copy-on-write edits against one base root.
pub struct Mutation<'a> {
    store: &'a NodeStore,
    order: &'a dyn KeyOrder,
    layout: Layout,
    arena: Vec<Work>,
    root: Option<Slot>,
}

impl<'a> Mutation<'a> {
    /// Start a mutation from `root`.
    pub fn new(
        store: &'a NodeStore,
        order: &'a dyn KeyOrder,
        layout: Layout,
        root: Option<Offset>,
    ) -> Self {
        Self {
            store,
            order,
            layout,
            arena: Vec::new(),
            root: root.map(Slot::Stored),
        }
    }

    /// Insert or overwrite `key`.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), TreeError> {
        let Some(root) = self.root else {
            let mut leaf = LeafNode::default();
            leaf.insert(self.order, key, value);
            self.root = Some(Slot::Dirty(self.push(WorkNode::Leaf(leaf), None)));
            return Ok(());
        };

        let (mut path, leaf) = self.descend(root, &key)?;
        let top = path.first().map_or(leaf, |step| step.parent);
        let WorkNode::Leaf(node) = &mut self.arena[leaf].node else {
            return Err(self.corrupt(leaf, "leaf"));
        };
        node.insert(self.order, key, value);

        let mut split = if node.entries.len() > self.layout.max() {
            let (separator, right) = node.split();
            Some((separator, Slot::Dirty(self.push(WorkNode::Leaf(right), None))))
        } else {
            None
        };

        while let Some((separator, right)) = split.take() {
            let Some(step) = path.pop() else {
                // The root itself split.
                let new_root = InternalNode::with_children(Slot::Dirty(top), separator, right);
                self.root = Some(Slot::Dirty(self.push(WorkNode::Internal(new_root), None)));
                break;
            };
            let max = self.layout.max();
            let parent = self.internal_mut(step.parent)?;
            parent.insert_split(step.index, separator, right);
            if parent.children.len() > max {
                let (median, sibling) = parent.split();
                let sibling = self.push(WorkNode::Internal(sibling), None);
                split = Some((median, Slot::Dirty(sibling)));
            }
        }
        Ok(())
    }

    /// Remove `key`. Returns `false`, leaving the tree untouched, if the key
    /// was absent.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool, TreeError> {
        let Some(root) = self.root else {
            return Ok(false);
        };

        let (mut path, leaf) = self.descend(root, key)?;
        let WorkNode::Leaf(node) = &mut self.arena[leaf].node else {
            return Err(self.corrupt(leaf, "leaf"));
        };
        if node.remove(self.order, key).is_none() {
            // Point the path back at the nodes it was copied from.
            for step in path.iter().rev() {
                self.internal_mut(step.parent)?.children[step.index] = step.original;
            }
            self.root = Some(root);
            return Ok(false);
        }

        let mut child = leaf;
        while let Some(step) = path.pop() {
            if self.arena[child].node.len() >= self.layout.min() {
                break;
            }
            self.rebalance(step.parent, step.index)?;
            child = step.parent;
        }

        self.collapse_root();
        Ok(true)
    }

    /// Append every dirty node to the log, children first.
    pub fn write(mut self) -> Result<Written, TreeError> {
        let mut nodes = 0;
        let root = match self.root {
            Some(slot) => Some(self.write_slot(slot, &mut nodes)?),
            None => None,
        };
        Ok(Written { root, nodes })
    }

    fn write_slot(&mut self, slot: Slot, nodes: &mut usize) -> Result<Offset, TreeError> {
        let index = match slot {
            Slot::Stored(offset) => return Ok(offset),
            Slot::Dirty(index) => index,
        };
        let node = match self.take(index) {
            WorkNode::Leaf(leaf) => Node::Leaf(leaf),
            WorkNode::Internal(internal) => {
                Node::Internal(internal.map_children(|child| self.write_slot(child, nodes))?)
            }
        };
        *nodes += 1;
        self.store.write_node(node)
    }

    /// Descend from `root` to the leaf for `key`, copying every node on the
    /// way and pointing each copied parent at its copied child.
    fn descend(&mut self, root: Slot, key: &[u8]) -> Result<(Vec<Step>, usize), TreeError> {
        let mut path = Vec::new();
        let mut current = self.load(root)?;
        self.root = Some(Slot::Dirty(current));

        loop {
            let (index, original) = match &self.arena[current].node {
                WorkNode::Leaf(_) => return Ok((path, current)),
                WorkNode::Internal(internal) => {
                    let index = internal.find_child_index(self.order, key);
                    (index, internal.children[index])
                }
            };
            let child = self.load(original)?;
            self.internal_mut(current)?.children[index] = Slot::Dirty(child);
            path.push(Step {
                parent: current,
                index,
                original,
            });
            current = child;
        }
    }

    /// Restore the occupancy of `parent.children[index]`, which is one short
    /// of the minimum.
    fn rebalance(&mut self, parent: usize, index: usize) -> Result<(), TreeError> {
        let (child, left, right) = {
            let node = self.internal_mut(parent)?;
            let Slot::Dirty(child) = node.children[index] else {
                return Ok(());
            };
            let left = index.checked_sub(1).map(|i| node.children[i]);
            let right = node.children.get(index + 1).copied();
            (child, left, right)
        };
        let min = self.layout.min();

        let left = match left {
            Some(slot) => Some(self.load_sibling(slot, child)?),
            None => None,
        };
        if let Some(left) = left.filter(|&l| self.arena[l].node.len() > min) {
            self.internal_mut(parent)?.children[index - 1] = Slot::Dirty(left);
            return self.borrow_from_left(parent, index, left, child);
        }

        let right = match right {
            Some(slot) => Some(self.load_sibling(slot, child)?),
            None => None,
        };
        if let Some(right) = right.filter(|&r| self.arena[r].node.len() > min) {
            self.internal_mut(parent)?.children[index + 1] = Slot::Dirty(right);
            return self.borrow_from_right(parent, index, child, right);
        }

        if let Some(left) = left {
            self.internal_mut(parent)?.children[index - 1] = Slot::Dirty(left);
            self.merge(parent, index - 1, left, child)
        } else if let Some(right) = right {
            self.merge(parent, index, child, right)
        } else {
            // A lone child only happens under a root about to collapse.
            Ok(())
        }
    }

    /// Move the last entry of `left` to the front of `child`.
    fn borrow_from_left(
        &mut self,
        parent: usize,
        index: usize,
        left: usize,
        child: usize,
    ) -> Result<(), TreeError> {
        match (self.take(left), self.take(child)) {
            (WorkNode::Leaf(mut l), WorkNode::Leaf(mut c)) => {
                if let Some(entry) = l.entries.pop() {
                    c.entries.insert(0, entry);
                }
                self.internal_mut(parent)?.keys[index - 1] = c.entries[0].key.clone();
                self.put_back(left, WorkNode::Leaf(l));
                self.put_back(child, WorkNode::Leaf(c));
            }
            (WorkNode::Internal(mut l), WorkNode::Internal(mut c)) => {
                if let (Some(up), Some(moved)) = (l.keys.pop(), l.children.pop()) {
                    let down = mem::replace(&mut self.internal_mut(parent)?.keys[index - 1], up);
                    c.keys.insert(0, down);
                    c.children.insert(0, moved);
                }
                self.put_back(left, WorkNode::Internal(l));
                self.put_back(child, WorkNode::Internal(c));
            }
            (l, c) => {
                self.put_back(left, l);
                self.put_back(child, c);
                return Err(self.corrupt(left, self.arena[child].node.kind()));
            }
        }
        Ok(())
    }

    /// Move the first entry of `right` to the end of `child`.
    fn borrow_from_right(
        &mut self,
        parent: usize,
        index: usize,
        child: usize,
        right: usize,
    ) -> Result<(), TreeError> {
        match (self.take(child), self.take(right)) {
            (WorkNode::Leaf(mut c), WorkNode::Leaf(mut r)) => {
                c.entries.push(r.entries.remove(0));
                self.internal_mut(parent)?.keys[index] = r.entries[0].key.clone();
                self.put_back(child, WorkNode::Leaf(c));
                self.put_back(right, WorkNode::Leaf(r));
            }
            (WorkNode::Internal(mut c), WorkNode::Internal(mut r)) => {
                let moved = r.children.remove(0);
                let up = r.keys.remove(0);
                let down = mem::replace(&mut self.internal_mut(parent)?.keys[index], up);
                c.keys.push(down);
                c.children.push(moved);
                self.put_back(child, WorkNode::Internal(c));
                self.put_back(right, WorkNode::Internal(r));
            }
            (c, r) => {
                self.put_back(child, c);
                self.put_back(right, r);
                return Err(self.corrupt(right, self.arena[child].node.kind()));
            }
        }
        Ok(())
    }

    /// Merge `right` into `left`, removing `parent.keys[separator]` and the
    /// child pointer to its right.
    fn merge(
        &mut self,
        parent: usize,
        separator: usize,
        left: usize,
        right: usize,
    ) -> Result<(), TreeError> {
        let node = self.internal_mut(parent)?;
        let down = node.keys.remove(separator);
        node.children.remove(separator + 1);

        match (self.take(left), self.take(right)) {
            (WorkNode::Leaf(mut l), WorkNode::Leaf(r)) => {
                l.entries.extend(r.entries);
                self.put_back(left, WorkNode::Leaf(l));
            }
            (WorkNode::Internal(mut l), WorkNode::Internal(r)) => {
                l.keys.push(down);
                l.keys.extend(r.keys);
                l.children.extend(r.children);
                self.put_back(left, WorkNode::Internal(l));
            }
            (l, r) => {
                self.put_back(left, l);
                self.put_back(right, r);
                return Err(self.corrupt(right, self.arena[left].node.kind()));
            }
        }
        Ok(())
    }

    fn collapse_root(&mut self) {
        let Some(Slot::Dirty(root)) = self.root else {
            return;
        };
        match &self.arena[root].node {
            WorkNode::Internal(internal) if internal.children.len() == 1 => {
                self.root = Some(internal.children[0]);
            }
            WorkNode::Leaf(leaf) if leaf.entries.is_empty() => self.root = None,
            _ => {}
        }
    }

    /// Copy the node behind `slot` into the arena, returning its index.
    /// Dirty slots are already in the arena.
    fn load(&mut self, slot: Slot) -> Result<usize, TreeError> {
        match slot {
            Slot::Dirty(index) => Ok(index),
            Slot::Stored(offset) => {
                let node = match self.store.read_node(offset)? {
                    Node::Leaf(leaf) => WorkNode::Leaf(leaf),
                    Node::Internal(internal) => WorkNode::Internal(
                        internal.map_children(|c| Ok::<_, TreeError>(Slot::Stored(c)))?,
                    ),
                };
                Ok(self.push(node, Some(offset)))
            }
        }
    }

    /// Load a sibling of `child`, checking both sit at the same level.
    fn load_sibling(&mut self, slot: Slot, child: usize) -> Result<usize, TreeError> {
        let sibling = self.load(slot)?;
        let expected = self.arena[child].node.kind();
        if self.arena[sibling].node.kind() == expected {
            Ok(sibling)
        } else {
            Err(self.corrupt(sibling, expected))
        }
    }

    fn push(&mut self, node: WorkNode, origin: Option<Offset>) -> usize {
        self.arena.push(Work { node, origin });
        self.arena.len() - 1
    }

    fn take(&mut self, index: usize) -> WorkNode {
        mem::replace(
            &mut self.arena[index].node,
            WorkNode::Leaf(LeafNode::default()),
        )
    }

    fn put_back(&mut self, index: usize, node: WorkNode) {
        self.arena[index].node = node;
    }

    fn internal_mut(&mut self, index: usize) -> Result<&mut InternalNode<Slot>, TreeError> {
        let origin = self.arena[index].origin;
        match &mut self.arena[index].node {
            WorkNode::Internal(internal) => Ok(internal),
            WorkNode::Leaf(_) => Err(TreeError::CorruptNode {
                offset: origin.unwrap_or_default(),
                source: NodeError::WrongBlockType {
                    expected: "internal",
                    found: "leaf",
                },
            }),
        }
    }

    fn corrupt(&self, index: usize, expected: &'static str) -> TreeError {
        let work = &self.arena[index];
        TreeError::CorruptNode {
            offset: work.origin.unwrap_or_default(),
            source: NodeError::WrongBlockType {
                expected,
                found: work.node.kind(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::*;
    use crate::codec::ByteOrder;
    use crate::storage::{Log, MemoryLog};

    fn setup() -> (Arc<MemoryLog>, NodeStore) {
        let log = Arc::new(MemoryLog::new());
        let store = NodeStore::new(log.clone(), false);
        (log, store)
    }

    fn layout() -> Layout {
        Layout::new(4).expect("valid order")
    }

    fn key(i: u32) -> Vec<u8> {
        format!("{i:05}").into_bytes()
    }

    fn collect(store: &NodeStore, root: Option<Offset>, out: &mut Vec<(Vec<u8>, Vec<u8>)>) {
        let Some(root) = root else { return };
        match store.read_node(root).expect("read node") {
            Node::Leaf(leaf) => out.extend(leaf.entries.into_iter().map(|e| (e.key, e.value))),
            Node::Internal(internal) => {
                for child in internal.children {
                    collect(store, Some(child), out);
                }
            }
        }
    }

    fn contents(store: &NodeStore, root: Option<Offset>) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut out = Vec::new();
        collect(store, root, &mut out);
        out
    }

    fn height(store: &NodeStore, root: Offset) -> usize {
        match store.read_node(root).expect("read node") {
            Node::Leaf(_) => 1,
            Node::Internal(internal) => 1 + height(store, internal.children[0]),
        }
    }

    #[test]
    fn test_bulk_insert_in_one_mutation() {
        let (_log, store) = setup();
        let mut mutation = Mutation::new(&store, &ByteOrder, layout(), None);
        for i in (0..200).rev() {
            mutation.put(key(i), i.to_le_bytes().to_vec()).expect("put");
        }
        let written = mutation.write().expect("write");

        let expected: Vec<_> = (0..200).map(|i| (key(i), i.to_le_bytes().to_vec())).collect();
        assert_eq!(contents(&store, written.root), expected);
    }

    #[test]
    fn test_incremental_inserts_and_deletes_match_model() {
        let (_log, store) = setup();
        let mut model = BTreeMap::new();
        let mut root = None;

        for i in 0..150 {
            let k = key((i * 37) % 150);
            let mut mutation = Mutation::new(&store, &ByteOrder, layout(), root);
            mutation.put(k.clone(), vec![1]).expect("put");
            root = mutation.write().expect("write").root;
            model.insert(k, vec![1]);
        }
        for i in (0..150).filter(|i| i % 3 != 0) {
            let mut mutation = Mutation::new(&store, &ByteOrder, layout(), root);
            assert!(mutation.delete(&key(i)).expect("delete"));
            root = mutation.write().expect("write").root;
            model.remove(&key(i));

            let expected: Vec<_> = model.clone().into_iter().collect();
            assert_eq!(contents(&store, root), expected);
        }
    }

    #[test]
    fn test_single_put_rewrites_only_one_path() {
        let (log, store) = setup();
        let mut mutation = Mutation::new(&store, &ByteOrder, layout(), None);
        for i in 0..100 {
            mutation.put(key(i), vec![0]).expect("put");
        }
        let root = mutation.write().expect("write").root.expect("non-empty");
        let levels = height(&store, root);
        assert!(levels >= 3);

        let before = log.len();
        let mut mutation = Mutation::new(&store, &ByteOrder, layout(), Some(root));
        mutation.put(key(50), vec![9]).expect("put");
        let written = mutation.write().expect("write");

        assert_eq!(written.nodes, levels);
        assert_eq!(log.len() - before, levels as u64);

        // The old version is untouched.
        assert!(contents(&store, Some(root)).iter().all(|(_, v)| v == &vec![0]));
    }

    #[test]
    fn test_deleting_absent_key_writes_nothing() {
        let (log, store) = setup();
        let mut mutation = Mutation::new(&store, &ByteOrder, layout(), None);
        for i in 0..20 {
            mutation.put(key(i * 2), vec![0]).expect("put");
        }
        let root = mutation.write().expect("write").root;

        let before = log.len();
        let mut mutation = Mutation::new(&store, &ByteOrder, layout(), root);
        assert!(!mutation.delete(&key(7)).expect("delete"));
        let written = mutation.write().expect("write");

        assert_eq!(written.root, root);
        assert_eq!(written.nodes, 0);
        assert_eq!(log.len(), before);
    }

    #[test]
    fn test_delete_everything_empties_tree() {
        let (_log, store) = setup();
        let mut mutation = Mutation::new(&store, &ByteOrder, layout(), None);
        for i in 0..64 {
            mutation.put(key(i), vec![0]).expect("put");
        }
        let mut root = mutation.write().expect("write").root;

        for i in 0..64 {
            let mut mutation = Mutation::new(&store, &ByteOrder, layout(), root);
            assert!(mutation.delete(&key(i)).expect("delete"));
            root = mutation.write().expect("write").root;
        }
        assert_eq!(root, None);
    }
}
