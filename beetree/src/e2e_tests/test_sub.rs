//! Sub databases: prefixing, nesting, isolation and custom key codecs.

use crate::codec::{Binary, Codec, CodecError, Utf8};
use crate::config::TreeConfig;
use crate::testing::{memory_bee, memory_bee_with, read_keys};
use crate::view::{Entry, ReadOptions};

fn bang() -> TreeConfig {
    TreeConfig::default().with_separator(b"!".to_vec())
}

#[test]
fn test_simple_sub_put_get() {
    let (_log, db) = memory_bee(&TreeConfig::default());
    let sub = db.sub("hello");

    sub.put("world", "hello world").expect("put");

    let entry = sub.get("world").expect("get").expect("entry exists");
    assert_eq!(entry.key, "world");
    assert_eq!(entry.value, "hello world");

    // The parent does not see the entry under its relative key.
    assert!(db.get("world").expect("get").is_none());
}

#[test]
fn test_multiple_levels_of_sub() {
    let (_log, db) = memory_bee(&bang());
    let sub = db.sub("hello").sub("world");
    sub.put("a", "b").expect("put");

    let encoded = sub.encode_key("a");

    let entry = sub.get("a").expect("get").expect("entry exists");
    assert_eq!(entry.key, "a");
    assert_eq!(entry.value, "b");

    let absolute = std::str::from_utf8(&encoded).expect("utf-8 key");
    let entry = db.get(absolute).expect("get").expect("entry exists");
    assert_eq!(entry.key, absolute);
    assert_eq!(entry.value, "b");

    let key = format!("hello{sep}world{sep}a", sep = "!");
    assert_eq!(key, absolute);
    let entry = db.get(&key).expect("get").expect("entry exists");
    assert_eq!(entry.key, key);
    assert_eq!(entry.value, "b");
}

#[test]
fn test_multiple_levels_of_sub_entries_outside_sub() {
    let (_log, db) = memory_bee(&bang());
    let hello = db.sub("hello");
    let world = hello.sub("world");

    hello.put("a", "b").expect("put");
    world.put("b", "c").expect("put");

    let entries: Vec<Entry<String, String>> = world
        .read_stream(&ReadOptions::new())
        .map(|entry| entry.expect("entry"))
        .collect();
    assert_eq!(
        entries,
        vec![Entry {
            key: "b".to_string(),
            value: "c".to_string(),
        }]
    );

    // The parent sees both, the nested one under its relative prefix.
    assert_eq!(
        read_keys(&hello, &ReadOptions::new()),
        vec!["a".to_string(), "world!b".to_string()]
    );
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Named {
    key: String,
}

/// Stores a `Named` as its bare key.
struct NamedCodec;

impl Codec for NamedCodec {
    type Item = Named;

    fn id(&self) -> &str {
        "named"
    }

    fn encode(&self, item: &Named) -> Vec<u8> {
        item.key.as_bytes().to_vec()
    }

    fn decode(&self, bytes: &[u8]) -> Result<Named, CodecError> {
        Ok(Named {
            key: Utf8.decode(bytes)?,
        })
    }
}

#[test]
fn test_sub_respects_key_codec() {
    let (_log, db) = memory_bee(&bang());
    let hello = db.sub_with("hello", NamedCodec, Utf8);
    let key = Named {
        key: "hello".to_string(),
    };

    hello.put(&key, "val").expect("put");

    let keys = read_keys(&hello, &ReadOptions::new());
    assert_eq!(keys, vec![key.clone()]);
    assert!(hello.get(&key).expect("get").is_some());

    // The parent codec reads the same entry as a plain string.
    assert!(db.get("hello!hello").expect("get").is_some());
}

#[test]
fn test_sub_with_key_starting_with_0xff() {
    let (_log, db) = memory_bee_with(&bang(), Binary, Utf8);
    let hello = db.sub("hello");
    let key = [0xff, 0x01, 0x02];

    hello.put(&key, "val").expect("put");
    // Neighbours just outside the namespace on both sides.
    db.put(b"hello", "before").expect("put");
    db.put(b"hello\"", "after").expect("put");

    let keys = read_keys(&hello, &ReadOptions::new());
    assert_eq!(keys, vec![key.to_vec()]);

    let reversed = read_keys(&hello, &ReadOptions::new().reverse(true));
    assert_eq!(reversed, vec![key.to_vec()]);

    assert!(hello.get(&key).expect("get").is_some());
}

#[test]
fn test_sub_range_bounds_are_relative() {
    let (_log, db) = memory_bee(&bang());
    let sub = db.sub("s");
    for key in ["a", "b", "c", "d"] {
        sub.put(key, key).expect("put");
        db.put(key, key).expect("put");
    }

    let keys = read_keys(&sub, &ReadOptions::new().gt("a").lte("c"));
    assert_eq!(keys, vec!["b".to_string(), "c".to_string()]);

    let keys = read_keys(&sub, &ReadOptions::new().reverse(true).limit(3));
    assert_eq!(
        keys,
        vec!["d".to_string(), "c".to_string(), "b".to_string()]
    );
}

#[test]
fn test_sub_prefix_and_separator() {
    let (_log, db) = memory_bee(&bang());
    let nested = db.sub("a").sub("b");
    assert_eq!(db.prefix(), Vec::<u8>::new());
    assert_eq!(nested.prefix(), b"a!b!".to_vec());
    assert_eq!(nested.separator(), b"!");
}
