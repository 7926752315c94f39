//! Typed views over a tree.
//!
//! [`Bee`] is the public handle. It pairs a chain of view layers with a key
//! codec and a value codec. Every view over the same log shares one [`Tree`],
//! so a sub database and its parent see each other's commits.
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//!
//! use beetree::codec::Utf8;
//! use beetree::config::TreeConfig;
//! use beetree::storage::MemoryLog;
//! use beetree::view::{Bee, ReadOptions};
//!
//! let db = Bee::with_codecs(Arc::new(MemoryLog::new()), &TreeConfig::default(), Utf8, Utf8)
//!     .unwrap();
//! db.put("a", "1").unwrap();
//! db.put("b", "2").unwrap();
//!
//! let users = db.sub("users");
//! users.put("a", "alice").unwrap();
//!
//! let keys: Vec<String> = users
//!     .read_stream(&ReadOptions::new())
//!     .map(|entry| entry.unwrap().key)
//!     .collect();
//! assert_eq!(keys, vec!["a".to_string()]);
//! ```

mod batch;
mod scope;
mod stream;

use std::sync::Arc;

use crate::codec::{Binary, ByteOrder, Codec, CodecError, KeyOrder, Owned};
use crate::config::TreeConfig;
use crate::storage::Log;
use crate::tree::{CodecIds, Head, Header, Tree, TreeError};

pub use batch::Batch;
pub use stream::{Entry, HistoryEntry, HistoryOptions, HistoryStream, ReadOptions, ReadStream};

use scope::{Entries, Records, Scope};
use stream::decode_entry;

/// A typed view over a persistent B-tree.
///
/// Views are cheap to clone and to derive: [`Bee::sub`] narrows to a key
/// namespace, [`Bee::snapshot`] and [`Bee::checkout`] pin a version. Derived
/// views compose in any order.
pub struct Bee<K: Codec = Binary, V: Codec = Binary> {
    scope: Scope,
    keys: Arc<K>,
    values: Arc<V>,
    separator: Arc<[u8]>,
}

impl<K: Codec, V: Codec> Clone for Bee<K, V> {
    fn clone(&self) -> Self {
        Self {
            scope: self.scope.clone(),
            keys: self.keys.clone(),
            values: self.values.clone(),
            separator: self.separator.clone(),
        }
    }
}

impl<K: Codec, V: Codec> std::fmt::Debug for Bee<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bee")
            .field("scope", &self.scope)
            .field("key_codec", &self.keys.id())
            .field("value_codec", &self.values.id())
            .finish_non_exhaustive()
    }
}

impl Bee {
    /// Open a binary-keyed, binary-valued view over `log`.
    pub fn open(log: Arc<dyn Log>, config: &TreeConfig) -> Result<Self, TreeError> {
        Self::with_codecs(log, config, Binary, Binary)
    }
}

impl<K: Codec, V: Codec> Bee<K, V> {
    /// Open a view over `log` with the given codecs and byte-order keys.
    pub fn with_codecs(
        log: Arc<dyn Log>,
        config: &TreeConfig,
        keys: K,
        values: V,
    ) -> Result<Self, TreeError> {
        Self::with_key_order(log, config, keys, values, Arc::new(ByteOrder))
    }

    /// Open a view over `log` with the given codecs and key order.
    pub fn with_key_order(
        log: Arc<dyn Log>,
        config: &TreeConfig,
        keys: K,
        values: V,
        key_order: Arc<dyn KeyOrder>,
    ) -> Result<Self, TreeError> {
        let codecs = CodecIds {
            key: keys.id(),
            value: values.id(),
        };
        let tree = Tree::open(log, config, key_order, codecs)?;
        Ok(Self {
            scope: Scope::Base(Arc::new(tree)),
            keys: Arc::new(keys),
            values: Arc::new(values),
            separator: Arc::from(config.separator.as_slice()),
        })
    }

    /// Look up `key`. Absent keys are `Ok(None)`.
    pub fn get(&self, key: &K::Item) -> Result<Option<Entry<Owned<K>, Owned<V>>>, TreeError> {
        let encoded = self.keys.encode(key);
        let head = self.scope.head()?;
        self.scope
            .lookup(head, encoded.clone())?
            .map(|value| decode_entry(&*self.keys, &*self.values, &encoded, &value))
            .transpose()
    }

    /// Put `key` as a single-operation batch.
    pub fn put(&self, key: &K::Item, value: &V::Item) -> Result<(), TreeError> {
        let mut batch = self.batch()?;
        batch.put(key, value);
        batch.flush().map(|_| ())
    }

    /// Delete `key` as a single-operation batch. Deleting an absent key
    /// commits nothing.
    pub fn del(&self, key: &K::Item) -> Result<(), TreeError> {
        let mut batch = self.batch()?;
        batch.del(key);
        batch.flush().map(|_| ())
    }

    /// Start a batch against the current version.
    pub fn batch(&self) -> Result<Batch<K, V>, TreeError> {
        Batch::new(self.scope.clone(), self.keys.clone(), self.values.clone())
    }

    /// Stream entries within the bounds of `options`.
    pub fn read_stream(&self, options: &ReadOptions<'_, K::Item>) -> ReadStream<K, V> {
        let range = options.to_range(&*self.keys);
        let entries: Entries = match self.scope.head() {
            Ok(head) => self.scope.range(head, range),
            Err(e) => Box::new(std::iter::once(Err(e))),
        };
        ReadStream::new(entries, self.keys.clone(), self.values.clone(), options.limit)
    }

    /// Stream the changes committed through this view.
    pub fn history_stream(&self, options: HistoryOptions) -> HistoryStream<K, V> {
        let records: Records = match self.history_head(options.until) {
            Ok(head) => self
                .scope
                .history(head, options.since.unwrap_or(0), options.reverse),
            Err(e) => Box::new(std::iter::once(Err(e))),
        };
        HistoryStream::new(records, self.keys.clone(), self.values.clone(), options.limit)
    }

    fn history_head(&self, until: Option<u64>) -> Result<Head, TreeError> {
        let head = self.scope.head()?;
        match until {
            Some(until) if until < head.version => self.scope.tree().checkout(until),
            _ => Ok(head),
        }
    }

    /// A view of the namespace `segment` under this one, with the same codecs.
    #[must_use]
    pub fn sub(&self, segment: impl AsRef<[u8]>) -> Self {
        Self {
            scope: self.namespaced(segment.as_ref()),
            keys: self.keys.clone(),
            values: self.values.clone(),
            separator: self.separator.clone(),
        }
    }

    /// A view of the namespace `segment` under this one, with its own codecs.
    #[must_use]
    pub fn sub_with<K2: Codec, V2: Codec>(
        &self,
        segment: impl AsRef<[u8]>,
        keys: K2,
        values: V2,
    ) -> Bee<K2, V2> {
        Bee {
            scope: self.namespaced(segment.as_ref()),
            keys: Arc::new(keys),
            values: Arc::new(values),
            separator: self.separator.clone(),
        }
    }

    fn namespaced(&self, segment: &[u8]) -> Scope {
        let mut prefix = segment.to_vec();
        prefix.extend_from_slice(&self.separator);
        Scope::Namespaced {
            inner: Box::new(self.scope.clone()),
            prefix,
        }
    }

    /// A read-only view pinned to the current version. Snapshotting a
    /// snapshot returns an equivalent view.
    pub fn snapshot(&self) -> Result<Self, TreeError> {
        if self.scope.pin().is_some() {
            return Ok(self.clone());
        }
        let head = self.scope.head()?;
        Ok(self.pinned(head))
    }

    /// A read-only view of the tree as it was when the log was `length`
    /// blocks long.
    pub fn checkout(&self, length: u64) -> Result<Self, TreeError> {
        let head = self.scope.tree().checkout(length)?;
        Ok(self.pinned(head))
    }

    fn pinned(&self, head: Head) -> Self {
        Self {
            scope: Scope::Pinned {
                inner: Box::new(self.scope.clone()),
                head,
            },
            keys: self.keys.clone(),
            values: self.values.clone(),
            separator: self.separator.clone(),
        }
    }

    /// Version reads through this view observe.
    pub fn version(&self) -> Result<u64, TreeError> {
        Ok(self.scope.head()?.version)
    }

    /// The tree header, or `None` before the first commit.
    pub fn header(&self) -> Result<Option<Header>, TreeError> {
        self.scope.tree().header()
    }

    /// Whether writes through this view are rejected.
    #[must_use]
    pub fn is_readonly(&self) -> bool {
        !self.scope.is_writable()
    }

    /// The underlying log.
    #[must_use]
    pub fn log(&self) -> &Arc<dyn Log> {
        self.scope.tree().log()
    }

    /// Bytes placed between namespace segments.
    #[must_use]
    pub fn separator(&self) -> &[u8] {
        &self.separator
    }

    /// Full key prefix of this view (empty for the top level).
    #[must_use]
    pub fn prefix(&self) -> Vec<u8> {
        self.scope.prefix()
    }

    /// The absolute stored key for `key`: this view's prefix followed by the
    /// encoded key. A parent view can address the entry with it.
    #[must_use]
    pub fn encode_key(&self, key: &K::Item) -> Vec<u8> {
        let mut encoded = self.scope.prefix();
        encoded.extend_from_slice(&self.keys.encode(key));
        encoded
    }

    /// Decode a key this view's codec produced.
    pub fn decode_key(&self, bytes: &[u8]) -> Result<Owned<K>, CodecError> {
        self.keys.decode(bytes)
    }
}
