//! View layers.
//!
//! A view is a chain of layers ending in the tree:
//!
//! - `Base`: the tree itself, reading at whatever head it is given
//! - `Namespaced`: prepends a prefix to every key going down and strips it
//!   from every key coming back
//! - `Pinned`: fixes the head to one committed version and forbids writes
//!
//! The head a read uses is resolved once per operation: the outermost pin in
//! the chain, else the tree's latest version. Every layer then forwards the
//! read to its inner layer with that head.

use std::ops::Bound;
use std::sync::Arc;

use crate::tree::{
    Change, Head, HistoryCursor, HistoryRecord, KeyRange, LeafEntry, RangeCursor, Tree, TreeError,
};

pub(crate) type Entries = Box<dyn Iterator<Item = Result<LeafEntry, TreeError>> + Send>;
pub(crate) type Records = Box<dyn Iterator<Item = Result<HistoryRecord, TreeError>> + Send>;

#[derive(Debug, Clone)]
pub(crate) enum Scope {
    Base(Arc<Tree>),
    Namespaced { inner: Box<Scope>, prefix: Vec<u8> },
    Pinned { inner: Box<Scope>, head: Head },
}

impl Scope {
    pub(crate) fn tree(&self) -> &Arc<Tree> {
        match self {
            Self::Base(tree) => tree,
            Self::Namespaced { inner, .. } | Self::Pinned { inner, .. } => inner.tree(),
        }
    }

    /// The outermost pinned head, if any.
    pub(crate) fn pin(&self) -> Option<Head> {
        match self {
            Self::Base(_) => None,
            Self::Namespaced { inner, .. } => inner.pin(),
            Self::Pinned { head, .. } => Some(*head),
        }
    }

    /// The head reads through this view use.
    pub(crate) fn head(&self) -> Result<Head, TreeError> {
        match self.pin() {
            Some(head) => Ok(head),
            None => self.tree().head(),
        }
    }

    /// The full key prefix of this view.
    pub(crate) fn prefix(&self) -> Vec<u8> {
        match self {
            Self::Base(_) => Vec::new(),
            Self::Namespaced { inner, prefix } => {
                let mut full = inner.prefix();
                full.extend_from_slice(prefix);
                full
            }
            Self::Pinned { inner, .. } => inner.prefix(),
        }
    }

    pub(crate) fn is_writable(&self) -> bool {
        self.pin().is_none() && !self.tree().is_readonly()
    }

    pub(crate) fn lookup(&self, head: Head, key: Vec<u8>) -> Result<Option<Vec<u8>>, TreeError> {
        match self {
            Self::Base(tree) => tree.lookup(head.root, &key),
            Self::Namespaced { inner, prefix } => inner.lookup(head, prefixed(prefix, &key)),
            Self::Pinned { inner, .. } => inner.lookup(head, key),
        }
    }

    pub(crate) fn range(&self, head: Head, range: KeyRange) -> Entries {
        match self {
            Self::Base(tree) => Box::new(RangeCursor::new(tree.clone(), head.root, range)),
            Self::Namespaced { inner, prefix } => {
                let entries = inner.range(head, namespace_range(prefix, range));
                let prefix = prefix.clone();
                Box::new(entries.filter_map(move |entry| match entry {
                    Ok(mut entry) => {
                        let key = strip(&prefix, &entry.key)?;
                        entry.key = key;
                        Some(Ok(entry))
                    }
                    Err(e) => Some(Err(e)),
                }))
            }
            Self::Pinned { inner, .. } => inner.range(head, range),
        }
    }

    pub(crate) fn history(&self, head: Head, since: u64, reverse: bool) -> Records {
        match self {
            Self::Base(tree) => Box::new(HistoryCursor::new(tree.clone(), head, since, reverse)),
            Self::Namespaced { inner, prefix } => {
                let records = inner.history(head, since, reverse);
                let prefix = prefix.clone();
                Box::new(records.filter_map(move |record| match record {
                    Ok(mut record) => {
                        let key = strip(&prefix, &record.key)?;
                        record.key = key;
                        Some(Ok(record))
                    }
                    Err(e) => Some(Err(e)),
                }))
            }
            Self::Pinned { inner, .. } => inner.history(head, since, reverse),
        }
    }

    /// Commit `changes` on top of `base`.
    pub(crate) fn write(&self, base: Head, changes: Vec<Change>) -> Result<Head, TreeError> {
        match self {
            Self::Base(tree) => tree.flush(base, changes),
            Self::Namespaced { inner, prefix } => inner.write(
                base,
                changes
                    .into_iter()
                    .map(|change| Change {
                        key: prefixed(prefix, &change.key),
                        value: change.value,
                    })
                    .collect(),
            ),
            Self::Pinned { .. } => Err(TreeError::ReadOnlyViolation),
        }
    }
}

fn prefixed(prefix: &[u8], key: &[u8]) -> Vec<u8> {
    let mut full = Vec::with_capacity(prefix.len() + key.len());
    full.extend_from_slice(prefix);
    full.extend_from_slice(key);
    full
}

fn strip(prefix: &[u8], key: &[u8]) -> Option<Vec<u8>> {
    key.strip_prefix(prefix).map(<[u8]>::to_vec)
}

/// Smallest byte string greater than every string starting with `prefix`,
/// or `None` if the prefix is all `0xff`.
pub(crate) fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let end = prefix.iter().rposition(|&b| b != 0xff)?;
    let mut successor = prefix[..=end].to_vec();
    successor[end] += 1;
    Some(successor)
}

/// Translate bounds relative to a namespace into absolute bounds that stay
/// inside the namespace.
fn namespace_range(prefix: &[u8], range: KeyRange) -> KeyRange {
    let lower = match range.lower {
        Bound::Included(key) => Bound::Included(prefixed(prefix, &key)),
        Bound::Excluded(key) => Bound::Excluded(prefixed(prefix, &key)),
        Bound::Unbounded => Bound::Included(prefix.to_vec()),
    };
    let upper = match range.upper {
        Bound::Included(key) => Bound::Included(prefixed(prefix, &key)),
        Bound::Excluded(key) => Bound::Excluded(prefixed(prefix, &key)),
        Bound::Unbounded => prefix_successor(prefix).map_or(Bound::Unbounded, Bound::Excluded),
    };
    KeyRange {
        lower,
        upper,
        reverse: range.reverse,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_successor() {
        assert_eq!(prefix_successor(b"sub\x00"), Some(b"sub\x01".to_vec()));
        assert_eq!(prefix_successor(b"a!"), Some(b"a\"".to_vec()));
        assert_eq!(prefix_successor(&[0x01, 0xff, 0xff]), Some(vec![0x02]));
        assert_eq!(prefix_successor(&[0xff, 0xff]), None);
        assert_eq!(prefix_successor(&[]), None);
    }

    #[test]
    fn test_namespace_range_clamps_to_prefix() {
        let range = namespace_range(b"p!", KeyRange::default());
        assert_eq!(range.lower, Bound::Included(b"p!".to_vec()));
        assert_eq!(range.upper, Bound::Excluded(b"p\"".to_vec()));

        let range = namespace_range(
            b"p!",
            KeyRange {
                lower: Bound::Excluded(b"a".to_vec()),
                upper: Bound::Included(vec![0xff, 0x01]),
                reverse: true,
            },
        );
        assert_eq!(range.lower, Bound::Excluded(b"p!a".to_vec()));
        assert_eq!(range.upper, Bound::Included(vec![b'p', b'!', 0xff, 0x01]));
        assert!(range.reverse);
    }
}
