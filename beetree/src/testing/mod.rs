use std::sync::Arc;

use crate::codec::{Binary, Codec, Utf8};
use crate::config::TreeConfig;
use crate::storage::MemoryLog;
use crate::view::{Bee, ReadOptions};

/// Open a string-keyed, string-valued view over a fresh in-memory log.
///
/// The log is returned too so tests can inspect its length and read counts.
pub fn memory_bee(config: &TreeConfig) -> (Arc<MemoryLog>, Bee<Utf8, Utf8>) {
    memory_bee_with(config, Utf8, Utf8)
}

/// Open a binary view over a fresh in-memory log.
pub fn memory_binary_bee(config: &TreeConfig) -> (Arc<MemoryLog>, Bee<Binary, Binary>) {
    memory_bee_with(config, Binary, Binary)
}

/// Open a view with the given codecs over a fresh in-memory log.
pub fn memory_bee_with<K: Codec, V: Codec>(
    config: &TreeConfig,
    keys: K,
    values: V,
) -> (Arc<MemoryLog>, Bee<K, V>) {
    let log = Arc::new(MemoryLog::new());
    let bee = Bee::with_codecs(log.clone(), config, keys, values).expect("open memory bee");
    (log, bee)
}

/// Collect the keys of a range read, panicking on any error.
pub fn read_keys<K: Codec, V: Codec>(
    bee: &Bee<K, V>,
    options: &ReadOptions<'_, K::Item>,
) -> Vec<<K::Item as ToOwned>::Owned> {
    bee.read_stream(options)
        .map(|entry| entry.expect("read entry").key)
        .collect()
}
