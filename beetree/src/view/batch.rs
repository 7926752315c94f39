//! Staged writes committed as one version.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::codec::{Codec, Owned};
use crate::tree::{Change, Head, TreeError};
use crate::view::scope::Scope;
use crate::view::stream::{Entry, decode_entry};

/// A staging buffer of puts and deletes against one base version.
///
/// Nothing touches the log until [`Batch::flush`], which commits every
/// staged operation as a single new version. Staging the same key twice
/// keeps the last operation. Reads through the batch see its own staged
/// writes on top of the base version.
///
/// A batch can only be created on a writable view, and its flush fails with
/// [`TreeError::StaleBase`] if another commit landed after it was created.
pub struct Batch<K: Codec, V: Codec> {
    scope: Scope,
    keys: Arc<K>,
    values: Arc<V>,
    base: Head,
    staged: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<K: Codec, V: Codec> Batch<K, V> {
    pub(crate) fn new(scope: Scope, keys: Arc<K>, values: Arc<V>) -> Result<Self, TreeError> {
        if !scope.is_writable() {
            return Err(TreeError::ReadOnlyViolation);
        }
        let base = scope.head()?;
        Ok(Self {
            scope,
            keys,
            values,
            base,
            staged: BTreeMap::new(),
        })
    }

    /// The version this batch applies on top of.
    #[must_use]
    pub const fn base_version(&self) -> u64 {
        self.base.version
    }

    /// Number of staged operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Stage a put.
    pub fn put(&mut self, key: &K::Item, value: &V::Item) {
        self.staged
            .insert(self.keys.encode(key), Some(self.values.encode(value)));
    }

    /// Stage a delete.
    pub fn del(&mut self, key: &K::Item) {
        self.staged.insert(self.keys.encode(key), None);
    }

    /// Read `key`, seeing staged operations first.
    pub fn get(&self, key: &K::Item) -> Result<Option<Entry<Owned<K>, Owned<V>>>, TreeError> {
        let encoded = self.keys.encode(key);
        let value = match self.staged.get(&encoded) {
            Some(staged) => staged.clone(),
            None => self.scope.lookup(self.base, encoded.clone())?,
        };
        value
            .map(|value| decode_entry(&*self.keys, &*self.values, &encoded, &value))
            .transpose()
    }

    /// Commit every staged operation as one version, returning that version.
    ///
    /// If every operation turns out to be a no-op (deletes of absent keys),
    /// no version is created and the base version is returned.
    pub fn flush(self) -> Result<u64, TreeError> {
        let changes: Vec<Change> = self
            .staged
            .into_iter()
            .map(|(key, value)| Change { key, value })
            .collect();
        if changes.is_empty() {
            return Ok(self.base.version);
        }
        Ok(self.scope.write(self.base, changes)?.version)
    }
}
