//! Traversal over committed versions.
//!
//! History does not walk the tree. Each commit block records the changes its
//! flush applied, in ascending key order, and a pointer to the previous
//! commit. Reverse iteration follows those pointers lazily from the newest
//! commit; forward iteration first walks them once to find where to begin.

use std::sync::Arc;

use crate::storage::Offset;
use crate::tree::block::Change;
use crate::tree::engine::{Head, Tree};
use crate::tree::error::TreeError;

/// One applied change and the version that applied it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRecord {
    /// Version created by the commit.
    pub version: u64,
    /// Commit sequence number.
    pub seq: u64,
    pub key: Vec<u8>,
    /// New value, or `None` for a delete.
    pub value: Option<Vec<u8>>,
}

/// Lazy iterator over the changes of commits with `since < version <= head`.
///
/// Forward iteration yields versions oldest first and each commit's changes
/// in ascending key order; reverse iteration reverses both.
pub struct HistoryCursor {
    tree: Arc<Tree>,
    since: u64,
    reverse: bool,
    /// Reverse: the next commit to read.
    next_commit: Option<Offset>,
    /// Forward: commits still to read, newest first (popped from the end).
    forward: Option<Vec<Offset>>,
    /// Changes of the current commit, in pop order.
    pending: Vec<Change>,
    version: u64,
    seq: u64,
    done: bool,
}

impl HistoryCursor {
    /// Create a cursor ending at `head`.
    #[must_use]
    pub const fn new(tree: Arc<Tree>, head: Head, since: u64, reverse: bool) -> Self {
        Self {
            tree,
            since,
            reverse,
            next_commit: head.commit,
            forward: None,
            pending: Vec::new(),
            version: 0,
            seq: 0,
            done: false,
        }
    }

    /// Offsets of every commit in range, newest first.
    fn collect_commits(&self) -> Result<Vec<Offset>, TreeError> {
        let mut offsets = Vec::new();
        let mut next = self.next_commit;
        while let Some(offset) = next {
            if offset < self.since {
                break;
            }
            offsets.push(offset);
            next = self.tree.store().read_commit(offset)?.prev;
        }
        Ok(offsets)
    }

    /// Load the next commit in iteration order. Returns `false` when none is left.
    fn load_commit(&mut self) -> Result<bool, TreeError> {
        let offset = if self.reverse {
            match self.next_commit {
                // A commit at `offset` creates version `offset + 1`.
                Some(offset) if offset >= self.since => offset,
                _ => return Ok(false),
            }
        } else {
            if self.forward.is_none() {
                self.forward = Some(self.collect_commits()?);
            }
            match self.forward.as_mut().and_then(Vec::pop) {
                Some(offset) => offset,
                None => return Ok(false),
            }
        };

        let commit = self.tree.store().read_commit(offset)?;
        self.next_commit = commit.prev;
        self.version = offset + 1;
        self.seq = commit.seq;
        self.pending = commit.changes;
        if !self.reverse {
            self.pending.reverse();
        }
        Ok(true)
    }

    fn advance(&mut self) -> Result<Option<HistoryRecord>, TreeError> {
        loop {
            if let Some(change) = self.pending.pop() {
                return Ok(Some(HistoryRecord {
                    version: self.version,
                    seq: self.seq,
                    key: change.key,
                    value: change.value,
                }));
            }
            if !self.load_commit()? {
                return Ok(None);
            }
        }
    }
}

impl Iterator for HistoryCursor {
    type Item = Result<HistoryRecord, TreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
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
    use crate::tree::engine::CodecIds;

    fn put(key: &str) -> Change {
        Change {
            key: key.as_bytes().to_vec(),
            value: Some(key.to_uppercase().into_bytes()),
        }
    }

    fn setup() -> (Arc<Tree>, Vec<Head>) {
        let tree = Tree::open(
            Arc::new(MemoryLog::new()),
            &TreeConfig::default(),
            Arc::new(ByteOrder),
            CodecIds {
                key: "binary",
                value: "binary",
            },
        )
        .expect("open");

        let mut heads = Vec::new();
        let mut head = Head::default();
        head = tree.flush(head, vec![put("b"), put("a")]).expect("flush");
        heads.push(head);
        head = tree.flush(head, vec![put("c")]).expect("flush");
        heads.push(head);
        head = tree
            .flush(
                head,
                vec![Change {
                    key: b"a".to_vec(),
                    value: None,
                }],
            )
            .expect("flush");
        heads.push(head);
        (Arc::new(tree), heads)
    }

    fn keys(cursor: HistoryCursor) -> Vec<(u64, String, bool)> {
        cursor
            .map(|record| {
                let record = record.expect("record");
                (
                    record.seq,
                    String::from_utf8(record.key).expect("utf8"),
                    record.value.is_some(),
                )
            })
            .collect()
    }

    #[test]
    fn test_forward_history() {
        let (tree, heads) = setup();
        let cursor = HistoryCursor::new(tree, heads[2], 0, false);
        assert_eq!(
            keys(cursor),
            vec![
                (1, "a".to_string(), true),
                (1, "b".to_string(), true),
                (2, "c".to_string(), true),
                (3, "a".to_string(), false),
            ]
        );
    }

    #[test]
    fn test_reverse_history() {
        let (tree, heads) = setup();
        let cursor = HistoryCursor::new(tree, heads[2], 0, true);
        assert_eq!(
            keys(cursor),
            vec![
                (3, "a".to_string(), false),
                (2, "c".to_string(), true),
                (1, "b".to_string(), true),
                (1, "a".to_string(), true),
            ]
        );
    }

    #[test]
    fn test_history_window() {
        let (tree, heads) = setup();

        // Only the second commit.
        let cursor = HistoryCursor::new(tree.clone(), heads[1], heads[0].version, false);
        assert_eq!(keys(cursor), vec![(2, "c".to_string(), true)]);

        let cursor = HistoryCursor::new(tree, heads[1], heads[0].version, true);
        assert_eq!(keys(cursor), vec![(2, "c".to_string(), true)]);
    }

    #[test]
    fn test_records_carry_versions() {
        let (tree, heads) = setup();
        let versions: Vec<u64> = HistoryCursor::new(tree, heads[2], 0, false)
            .map(|r| r.expect("record").version)
            .collect();
        assert_eq!(
            versions,
            vec![
                heads[0].version,
                heads[0].version,
                heads[1].version,
                heads[2].version
            ]
        );
    }
}
