//! Typed read and history streams.

use std::ops::Bound;
use std::sync::Arc;

use crate::codec::{Codec, Owned};
use crate::tree::{HistoryRecord, KeyRange, TreeError};
use crate::view::scope::{Entries, Records};

/// A decoded key-value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry<K, V> {
    pub key: K,
    pub value: V,
}

/// A decoded change from the history of a view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry<K, V> {
    /// Version created by the commit that applied the change.
    pub version: u64,
    /// Commit sequence number.
    pub seq: u64,
    pub key: K,
    /// New value, or `None` for a delete.
    pub value: Option<V>,
}

/// Bounds, direction and limit of a range read.
///
/// If both an inclusive and an exclusive bound are set on the same side, the
/// exclusive one is used.
#[derive(Debug)]
pub struct ReadOptions<'a, T: ?Sized> {
    pub gt: Option<&'a T>,
    pub gte: Option<&'a T>,
    pub lt: Option<&'a T>,
    pub lte: Option<&'a T>,
    pub reverse: bool,
    pub limit: Option<usize>,
}

impl<T: ?Sized> Default for ReadOptions<'_, T> {
    fn default() -> Self {
        Self {
            gt: None,
            gte: None,
            lt: None,
            lte: None,
            reverse: false,
            limit: None,
        }
    }
}

impl<'a, T: ?Sized> ReadOptions<'a, T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn gt(mut self, key: &'a T) -> Self {
        self.gt = Some(key);
        self
    }

    #[must_use]
    pub const fn gte(mut self, key: &'a T) -> Self {
        self.gte = Some(key);
        self
    }

    #[must_use]
    pub const fn lt(mut self, key: &'a T) -> Self {
        self.lt = Some(key);
        self
    }

    #[must_use]
    pub const fn lte(mut self, key: &'a T) -> Self {
        self.lte = Some(key);
        self
    }

    #[must_use]
    pub const fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Encode the bounds with `codec`.
    pub(crate) fn to_range<C: Codec<Item = T>>(&self, codec: &C) -> KeyRange
    where
        T: ToOwned,
    {
        let bound = |exclusive: Option<&T>, inclusive: Option<&T>| match (exclusive, inclusive) {
            (Some(key), _) => Bound::Excluded(codec.encode(key)),
            (None, Some(key)) => Bound::Included(codec.encode(key)),
            (None, None) => Bound::Unbounded,
        };
        KeyRange {
            lower: bound(self.gt, self.gte),
            upper: bound(self.lt, self.lte),
            reverse: self.reverse,
        }
    }
}

/// Version window, direction and limit of a history read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryOptions {
    /// Only changes from versions greater than this.
    pub since: Option<u64>,
    /// Only changes from versions up to and including this.
    pub until: Option<u64>,
    pub reverse: bool,
    pub limit: Option<usize>,
}

impl HistoryOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn since(mut self, version: u64) -> Self {
        self.since = Some(version);
        self
    }

    #[must_use]
    pub const fn until(mut self, version: u64) -> Self {
        self.until = Some(version);
        self
    }

    #[must_use]
    pub const fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Lazy stream of decoded entries from a range read.
pub struct ReadStream<K: Codec, V: Codec> {
    entries: Entries,
    keys: Arc<K>,
    values: Arc<V>,
    remaining: Option<usize>,
}

impl<K: Codec, V: Codec> ReadStream<K, V> {
    pub(crate) fn new(
        entries: Entries,
        keys: Arc<K>,
        values: Arc<V>,
        limit: Option<usize>,
    ) -> Self {
        Self {
            entries,
            keys,
            values,
            remaining: limit,
        }
    }
}

impl<K: Codec, V: Codec> Iterator for ReadStream<K, V> {
    type Item = Result<Entry<Owned<K>, Owned<V>>, TreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return None;
            }
            *remaining -= 1;
        }
        let entry = match self.entries.next()? {
            Ok(entry) => entry,
            Err(e) => return Some(Err(e)),
        };
        Some(decode_entry(&*self.keys, &*self.values, &entry.key, &entry.value))
    }
}

/// Lazy stream of decoded history entries.
pub struct HistoryStream<K: Codec, V: Codec> {
    records: Records,
    keys: Arc<K>,
    values: Arc<V>,
    remaining: Option<usize>,
}

impl<K: Codec, V: Codec> HistoryStream<K, V> {
    pub(crate) fn new(
        records: Records,
        keys: Arc<K>,
        values: Arc<V>,
        limit: Option<usize>,
    ) -> Self {
        Self {
            records,
            keys,
            values,
            remaining: limit,
        }
    }
}

impl<K: Codec, V: Codec> Iterator for HistoryStream<K, V> {
    type Item = Result<HistoryEntry<Owned<K>, Owned<V>>, TreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return None;
            }
            *remaining -= 1;
        }
        let record = match self.records.next()? {
            Ok(record) => record,
            Err(e) => return Some(Err(e)),
        };
        Some(decode_record(&*self.keys, &*self.values, record))
    }
}

fn decode_record<K: Codec, V: Codec>(
    keys: &K,
    values: &V,
    record: HistoryRecord,
) -> Result<HistoryEntry<Owned<K>, Owned<V>>, TreeError> {
    Ok(HistoryEntry {
        version: record.version,
        seq: record.seq,
        key: keys.decode(&record.key)?,
        value: record
            .value
            .as_deref()
            .map(|value| values.decode(value))
            .transpose()?,
    })
}

pub(crate) fn decode_entry<K: Codec, V: Codec>(
    keys: &K,
    values: &V,
    key: &[u8],
    value: &[u8],
) -> Result<Entry<Owned<K>, Owned<V>>, TreeError> {
    Ok(Entry {
        key: keys.decode(key)?,
        value: values.decode(value)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Utf8;

    #[test]
    fn test_exclusive_bound_wins() {
        let options = ReadOptions::<str>::new().gt("a").gte("b").lte("z");
        let range = options.to_range(&Utf8);
        assert_eq!(range.lower, Bound::Excluded(b"a".to_vec()));
        assert_eq!(range.upper, Bound::Included(b"z".to_vec()));
        assert!(!range.reverse);
    }

    #[test]
    fn test_default_options_are_unbounded() {
        let range = ReadOptions::<str>::new().reverse(true).to_range(&Utf8);
        assert_eq!(range.lower, Bound::Unbounded);
        assert_eq!(range.upper, Bound::Unbounded);
        assert!(range.reverse);
    }
}
