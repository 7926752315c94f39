//! The tree handle: versions, lookups and commits.
//!
//! # Log Layout
//!
//! ```text
//! block 0        Header (written by the first commit)
//! block 1..k     node blocks of commit 1, leaves before their parents
//! block k+1      Commit 1
//! ...            node blocks of commit 2
//! ...            Commit 2
//! ```
//!
//! A version is the log length right after a commit block. Version 0 is the
//! empty tree. The head is found on open by scanning back from the end of the
//! log for the last commit block; node blocks after it belong to a flush that
//! never committed and are ignored.
//!
//! # Concurrency
//!
//! One writer, many readers. Readers copy the head out of a short-lived read
//! lock and then only read immutable blocks. A flush computes its new nodes
//! without any lock, then takes the commit lock to check its base is still
//! the head, append, and publish the new head.
//!
//! The commit lock belongs to one `Tree`. If another handle has committed to
//! the same log since this one last looked, the flush fails as stale and the
//! head is refreshed from the log. Two handles appending at the same moment
//! are not detected; share one `Tree` (clone the view) to write concurrently.

use std::sync::{Arc, Mutex, OnceLock, RwLock};

use crate::codec::KeyOrder;
use crate::config::TreeConfig;
use crate::storage::{Log, Offset};
use crate::tree::block::{Block, Change, CommitRecord, HEADER_FORMAT, Header};
use crate::tree::error::{NotFound, TreeError};
use crate::tree::mutate::Mutation;
use crate::tree::node::{Layout, Node};
use crate::tree::store::NodeStore;

/// A committed version of the tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Head {
    /// Log length right after the commit block (0 for the empty tree).
    pub version: u64,
    /// Root node, `None` if the tree is empty.
    pub root: Option<Offset>,
    /// Offset of the commit block.
    pub commit: Option<Offset>,
    /// Commit sequence number (0 for the empty tree).
    pub seq: u64,
}

impl Head {
    fn from_commit(offset: Offset, commit: &CommitRecord) -> Self {
        Self {
            version: offset + 1,
            root: commit.root,
            commit: Some(offset),
            seq: commit.seq,
        }
    }
}

/// Codec identifiers recorded in the header of a new log.
#[derive(Debug, Clone, Copy)]
pub struct CodecIds<'a> {
    pub key: &'a str,
    pub value: &'a str,
}

/// A persistent copy-on-write B-tree over an append-only log.
pub struct Tree {
    store: NodeStore,
    layout: Layout,
    key_order: Arc<dyn KeyOrder>,
    /// Header to write with the first commit.
    template: Header,
    header: OnceLock<Header>,
    head: RwLock<Head>,
    commit_lock: Mutex<()>,
}

impl Tree {
    /// Open a tree over `log`.
    ///
    /// An empty log stays empty until the first commit. For an existing log
    /// the stored header decides the order; its protocol and key order must
    /// match the configuration.
    pub fn open(
        log: Arc<dyn Log>,
        config: &TreeConfig,
        key_order: Arc<dyn KeyOrder>,
        codecs: CodecIds<'_>,
    ) -> Result<Self, TreeError> {
        let store = NodeStore::new(log, config.readonly);
        let template = Header {
            format: HEADER_FORMAT,
            protocol: config.protocol.clone(),
            order: u32::try_from(config.order)
                .map_err(|_| TreeError::InvalidOrder(config.order))?,
            key_codec: codecs.key.to_string(),
            value_codec: codecs.value.to_string(),
            key_order: key_order.id().to_string(),
        };

        let header = OnceLock::new();
        let (order, head) = if store.is_empty() {
            (config.order, Head::default())
        } else {
            let stored = store.read_header(0)?;
            check_header(&stored, &template)?;
            let order = usize::try_from(stored.order)
                .map_err(|_| TreeError::InvalidOrder(usize::MAX))?;
            let head = find_head(&store)?;
            let _ = header.set(stored);
            (order, head)
        };
        let layout = Layout::new(order).ok_or(TreeError::InvalidOrder(order))?;

        tracing::info!(
            "opened tree: log length {}, version {}, order {}, readonly {}",
            store.len(),
            head.version,
            order,
            config.readonly
        );

        Ok(Self {
            store,
            layout,
            key_order,
            template,
            header,
            head: RwLock::new(head),
            commit_lock: Mutex::new(()),
        })
    }

    /// The latest committed version.
    pub fn head(&self) -> Result<Head, TreeError> {
        self.head
            .read()
            .map(|head| *head)
            .map_err(|_| TreeError::LockPoisoned)
    }

    /// The header, or `None` if nothing has been committed yet.
    pub fn header(&self) -> Result<Option<Header>, TreeError> {
        if let Some(header) = self.header.get() {
            return Ok(Some(header.clone()));
        }
        if self.store.is_empty() {
            return Ok(None);
        }
        let header = self.store.read_header(0)?;
        Ok(Some(self.header.get_or_init(|| header).clone()))
    }

    #[must_use]
    pub const fn store(&self) -> &NodeStore {
        &self.store
    }

    #[must_use]
    pub fn key_order(&self) -> &dyn KeyOrder {
        self.key_order.as_ref()
    }

    #[must_use]
    pub const fn layout(&self) -> Layout {
        self.layout
    }

    #[must_use]
    pub const fn is_readonly(&self) -> bool {
        self.store.is_readonly()
    }

    #[must_use]
    pub const fn log(&self) -> &Arc<dyn Log> {
        self.store.log()
    }

    /// Find `key` in the tree rooted at `root`.
    pub fn lookup(&self, root: Option<Offset>, key: &[u8]) -> Result<Option<Vec<u8>>, TreeError> {
        let Some(mut offset) = root else {
            return Ok(None);
        };
        let order = self.key_order();
        loop {
            match self.store.read_node(offset)? {
                Node::Leaf(mut leaf) => {
                    return Ok(leaf
                        .find_index(order, key)
                        .ok()
                        .map(|i| leaf.entries.swap_remove(i).value));
                }
                Node::Internal(internal) => {
                    offset = internal.children[internal.find_child_index(order, key)];
                }
            }
        }
    }

    /// Resolve the state of the tree when the log was `length` blocks long:
    /// the newest commit whose block lies below `length`.
    pub fn checkout(&self, length: u64) -> Result<Head, TreeError> {
        let log_length = self.store.len();
        if length > log_length {
            return Err(TreeError::NotFound(NotFound::Version {
                version: length,
                length: log_length,
            }));
        }

        let mut head = self.head()?;
        while head.version > length {
            head = match head.commit {
                Some(offset) => self.previous(offset)?,
                None => break,
            };
        }
        tracing::debug!("checkout {length} resolved to version {}", head.version);
        Ok(head)
    }

    /// The commit before the one at `offset`, or the empty tree.
    pub fn previous(&self, offset: Offset) -> Result<Head, TreeError> {
        match self.store.read_commit(offset)?.prev {
            Some(prev) => Ok(Head::from_commit(prev, &self.store.read_commit(prev)?)),
            None => Ok(Head::default()),
        }
    }

    /// Apply `changes` on top of `base` and commit them as one new version.
    ///
    /// `changes` must hold each key at most once. Deletes of absent keys are
    /// dropped; if nothing is left, no version is created and `base` is
    /// returned.
    pub fn flush(&self, base: Head, mut changes: Vec<Change>) -> Result<Head, TreeError> {
        if self.is_readonly() {
            return Err(TreeError::ReadOnlyViolation);
        }

        let order = self.key_order();
        changes.sort_by(|a, b| order.compare(&a.key, &b.key));

        let mut mutation = Mutation::new(&self.store, order, self.layout, base.root);
        let mut applied = Vec::with_capacity(changes.len());
        for change in changes {
            let effective = match &change.value {
                Some(value) => {
                    mutation.put(change.key.clone(), value.clone())?;
                    true
                }
                None => mutation.delete(&change.key)?,
            };
            if effective {
                applied.push(change);
            }
        }
        if applied.is_empty() {
            return Ok(base);
        }

        let _guard = self.commit_lock.lock().map_err(|_| TreeError::LockPoisoned)?;
        let latest = self.refresh_head()?;
        if latest.version != base.version {
            return Err(TreeError::StaleBase {
                base: base.version,
                latest: latest.version,
            });
        }

        if self.store.is_empty() {
            self.store.write_block(&Block::Header(self.template.clone()))?;
            let _ = self.header.set(self.template.clone());
            tracing::debug!("wrote header for protocol {}", self.template.protocol);
        }

        let written = mutation.write()?;
        let record = CommitRecord {
            root: written.root,
            prev: base.commit,
            seq: base.seq + 1,
            changes: applied,
        };
        let change_count = record.changes.len();
        let offset = self.store.write_block(&Block::Commit(record.clone()))?;
        self.store.sync()?;

        let head = Head::from_commit(offset, &record);
        *self.head.write().map_err(|_| TreeError::LockPoisoned)? = head;

        tracing::debug!(
            "committed version {} (seq {}): {} changes, {} node blocks",
            head.version,
            head.seq,
            change_count,
            written.nodes
        );
        Ok(head)
    }
}

impl Tree {
    /// The head, re-read from the log if it has grown past the last commit
    /// this handle knows about. Must be called under the commit lock.
    fn refresh_head(&self) -> Result<Head, TreeError> {
        let known = self.head()?;
        if self.store.len() <= known.version.max(1) {
            return Ok(known);
        }
        let found = find_head(&self.store)?;
        if found.version != known.version {
            tracing::warn!(
                "log has version {} committed by another handle, this one was at {}",
                found.version,
                known.version
            );
            *self.head.write().map_err(|_| TreeError::LockPoisoned)? = found;
        }
        Ok(found)
    }
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("store", &self.store)
            .field("layout", &self.layout)
            .field("head", &self.head)
            .finish_non_exhaustive()
    }
}

fn check_header(stored: &Header, configured: &Header) -> Result<(), TreeError> {
    let mismatch = |field, stored: &str, configured: &str| TreeError::HeaderMismatch {
        field,
        stored: stored.to_string(),
        configured: configured.to_string(),
    };
    if stored.protocol != configured.protocol {
        return Err(mismatch("protocol", &stored.protocol, &configured.protocol));
    }
    if stored.key_order != configured.key_order {
        return Err(mismatch("key order", &stored.key_order, &configured.key_order));
    }
    if stored.key_codec != configured.key_codec || stored.value_codec != configured.value_codec {
        tracing::warn!(
            "codecs {}/{} differ from stored header {}/{}",
            configured.key_codec,
            configured.value_codec,
            stored.key_codec,
            stored.value_codec
        );
    }
    Ok(())
}

/// Scan back from the end of the log for the last commit block.
fn find_head(store: &NodeStore) -> Result<Head, TreeError> {
    let length = store.len();
    for offset in (1..length).rev() {
        if let Block::Commit(commit) = store.read_block(offset)? {
            let ignored = length - offset - 1;
            if ignored > 0 {
                tracing::warn!("ignoring {ignored} blocks after the last commit");
            }
            return Ok(Head::from_commit(offset, &commit));
        }
    }
    if length > 1 {
        tracing::warn!("ignoring {} blocks with no commit", length - 1);
    }
    Ok(Head::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ByteOrder;
    use crate::storage::MemoryLog;
    use crate::tree::node::{LeafEntry, LeafNode};

    const CODECS: CodecIds<'static> = CodecIds {
        key: "binary",
        value: "binary",
    };

    fn open(log: &Arc<MemoryLog>, config: &TreeConfig) -> Tree {
        Tree::open(log.clone(), config, Arc::new(ByteOrder), CODECS).expect("open tree")
    }

    fn put(key: &str, value: &str) -> Change {
        Change {
            key: key.as_bytes().to_vec(),
            value: Some(value.as_bytes().to_vec()),
        }
    }

    fn del(key: &str) -> Change {
        Change {
            key: key.as_bytes().to_vec(),
            value: None,
        }
    }

    #[test]
    fn test_first_commit_writes_header() {
        let log = Arc::new(MemoryLog::new());
        let tree = open(&log, &TreeConfig::default());
        assert_eq!(tree.header().expect("header"), None);

        let head = tree
            .flush(Head::default(), vec![put("a", "1")])
            .expect("flush");

        // Header, one leaf, one commit.
        assert_eq!(log.len(), 3);
        assert_eq!(head.version, 3);
        assert_eq!(head.seq, 1);
        let header = tree.header().expect("header").expect("written");
        assert_eq!(header.protocol, "beetree");
        assert_eq!(header.order, 8);
        assert_eq!(
            tree.lookup(head.root, b"a").expect("lookup"),
            Some(b"1".to_vec())
        );
    }

    #[test]
    fn test_reopen_restores_head_and_order() {
        let log = Arc::new(MemoryLog::new());
        let head = {
            let tree = open(&log, &TreeConfig::default().with_order(4));
            let changes = (0..50).map(|i| put(&format!("{i:03}"), "x")).collect();
            tree.flush(Head::default(), changes).expect("flush")
        };

        let tree = open(&log, &TreeConfig::default().with_order(16));
        assert_eq!(tree.head().expect("head"), head);
        assert_eq!(tree.layout().order(), 4);
        assert_eq!(
            tree.lookup(head.root, b"042").expect("lookup"),
            Some(b"x".to_vec())
        );
    }

    #[test]
    fn test_protocol_mismatch_is_rejected() {
        let log = Arc::new(MemoryLog::new());
        let tree = open(&log, &TreeConfig::default());
        tree.flush(Head::default(), vec![put("a", "1")])
            .expect("flush");

        let result = Tree::open(
            log,
            &TreeConfig::default().with_protocol("other"),
            Arc::new(ByteOrder),
            CODECS,
        );
        assert!(matches!(
            result,
            Err(TreeError::HeaderMismatch {
                field: "protocol",
                ..
            })
        ));
    }

    #[test]
    fn test_stale_base_is_rejected() {
        let log = Arc::new(MemoryLog::new());
        let tree = open(&log, &TreeConfig::default());
        let base = tree.head().expect("head");
        tree.flush(base, vec![put("a", "1")]).expect("flush");

        let result = tree.flush(base, vec![put("b", "2")]);
        assert!(matches!(
            result,
            Err(TreeError::StaleBase {
                base: 0,
                latest: 3
            })
        ));
    }

    #[test]
    fn test_commit_from_another_handle_makes_base_stale() {
        let log = Arc::new(MemoryLog::new());
        let first = open(&log, &TreeConfig::default());
        let second = open(&log, &TreeConfig::default());

        let v1 = first
            .flush(Head::default(), vec![put("a", "1")])
            .expect("flush");

        // The second handle still believes the tree is empty.
        let base = second.head().expect("head");
        assert_eq!(base, Head::default());
        let result = second.flush(base, vec![put("b", "2")]);
        assert!(matches!(
            result,
            Err(TreeError::StaleBase { base: 0, latest }) if latest == v1.version
        ));
        assert_eq!(log.len(), v1.version);

        // The failed flush refreshed the head, so a retry chains onto v1.
        assert_eq!(second.head().expect("head"), v1);
        let v2 = second.flush(v1, vec![put("b", "2")]).expect("flush");
        assert_eq!(v2.seq, 2);
        assert_eq!(second.previous(v2.commit.expect("commit")).expect("prev"), v1);
        assert_eq!(
            second.lookup(v2.root, b"a").expect("lookup"),
            Some(b"1".to_vec())
        );
    }

    #[test]
    fn test_orphaned_blocks_do_not_make_base_stale() {
        let log = Arc::new(MemoryLog::new());
        let tree = open(&log, &TreeConfig::default());
        let v1 = tree
            .flush(Head::default(), vec![put("a", "1")])
            .expect("flush");

        // Node blocks of a flush that never wrote its commit.
        let leaf = LeafNode {
            entries: vec![LeafEntry {
                key: b"z".to_vec(),
                value: b"orphan".to_vec(),
            }],
        };
        tree.store().write_node(Node::Leaf(leaf)).expect("write");
        assert_eq!(log.len(), v1.version + 1);

        let v2 = tree.flush(v1, vec![put("b", "2")]).expect("flush");
        assert_eq!(v2.seq, 2);
        assert_eq!(tree.lookup(v2.root, b"z").expect("lookup"), None);
    }

    #[test]
    fn test_noop_flush_creates_no_version() {
        let log = Arc::new(MemoryLog::new());
        let tree = open(&log, &TreeConfig::default());
        let head = tree
            .flush(Head::default(), vec![put("a", "1")])
            .expect("flush");

        let after = tree.flush(head, vec![del("missing")]).expect("flush");
        assert_eq!(after, head);
        assert_eq!(log.len(), head.version);
    }

    #[test]
    fn test_checkout_resolves_to_commit_below_length() {
        let log = Arc::new(MemoryLog::new());
        let tree = open(&log, &TreeConfig::default());
        let v1 = tree
            .flush(Head::default(), vec![put("a", "1")])
            .expect("flush");
        let v2 = tree.flush(v1, vec![put("a", "2")]).expect("flush");

        assert_eq!(tree.checkout(v2.version).expect("checkout"), v2);
        assert_eq!(tree.checkout(v2.version - 1).expect("checkout"), v1);
        assert_eq!(tree.checkout(v1.version).expect("checkout"), v1);
        assert_eq!(tree.checkout(1).expect("checkout"), Head::default());
        assert!(matches!(
            tree.checkout(v2.version + 1),
            Err(TreeError::NotFound(NotFound::Version { .. }))
        ));
    }

    #[test]
    fn test_uncommitted_tail_is_ignored() {
        let log = Arc::new(MemoryLog::new());
        let head = {
            let tree = open(&log, &TreeConfig::default());
            tree.flush(Head::default(), vec![put("a", "1")])
                .expect("flush")
        };

        // A flush that appended a node but crashed before its commit.
        let store = NodeStore::new(log.clone(), false);
        store
            .write_node(Node::Leaf(crate::tree::node::LeafNode::default()))
            .expect("write");

        let tree = open(&log, &TreeConfig::default());
        assert_eq!(tree.head().expect("head"), head);

        let next = tree.flush(head, vec![put("b", "2")]).expect("flush");
        assert_eq!(next.version, log.len());
        assert_eq!(
            tree.lookup(next.root, b"a").expect("lookup"),
            Some(b"1".to_vec())
        );
    }

    #[test]
    fn test_readonly_tree_never_writes() {
        let log = Arc::new(MemoryLog::new());
        let tree = open(&log, &TreeConfig::default().with_readonly(true));
        assert!(matches!(
            tree.flush(Head::default(), vec![put("a", "1")]),
            Err(TreeError::ReadOnlyViolation)
        ));
        assert_eq!(log.len(), 0);
        assert_eq!(tree.header().expect("header"), None);
    }
}
