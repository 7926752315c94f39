//! Trees opened with a custom key order keep keys in that order.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::codec::{KeyOrder, Utf8};
use crate::config::TreeConfig;
use crate::storage::{Log, MemoryLog};
use crate::testing::read_keys;
use crate::tree::TreeError;
use crate::view::{Bee, ReadOptions};

/// Byte order, reversed.
struct Descending;

impl KeyOrder for Descending {
    fn id(&self) -> &str {
        "descending"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        b.cmp(a)
    }
}

fn descending_bee(log: Arc<MemoryLog>, order: usize) -> Bee<Utf8, Utf8> {
    let config = TreeConfig::default().with_order(order);
    Bee::with_key_order(log, &config, Utf8, Utf8, Arc::new(Descending)).expect("open")
}

/// Keys `00..60` with every third one deleted again.
fn populated(order: usize) -> (Arc<MemoryLog>, Bee<Utf8, Utf8>, Vec<String>) {
    let log = Arc::new(MemoryLog::new());
    let db = descending_bee(log.clone(), order);
    for i in 0..60 {
        db.put(&format!("{i:02}"), &format!("v{i}")).expect("put");
    }
    for i in (0..60).step_by(3) {
        db.del(&format!("{i:02}")).expect("del");
    }
    let mut expected: Vec<String> = (0..60)
        .filter(|i| i % 3 != 0)
        .map(|i| format!("{i:02}"))
        .collect();
    expected.reverse();
    (log, db, expected)
}

#[test]
fn test_descending_order_put_get_delete() {
    for order in [3, 4, 5] {
        let (_log, db, _) = populated(order);
        for i in 0..60 {
            let entry = db.get(&format!("{i:02}")).expect("get");
            if i % 3 == 0 {
                assert!(entry.is_none(), "order {order}: {i:02} was deleted");
            } else {
                assert_eq!(entry.expect("present").value, format!("v{i}"));
            }
        }
    }
}

#[test]
fn test_descending_order_full_scan() {
    for order in [3, 4, 5] {
        let (_log, db, expected) = populated(order);
        assert_eq!(read_keys(&db, &ReadOptions::new()), expected, "order {order}");

        let mut reversed = expected.clone();
        reversed.reverse();
        assert_eq!(
            read_keys(&db, &ReadOptions::new().reverse(true)),
            reversed,
            "order {order}"
        );
    }
}

#[test]
fn test_descending_order_bounded_scan() {
    for order in [3, 4, 5] {
        let (_log, db, expected) = populated(order);

        // "40" sorts before "10" in this order.
        let bounded: Vec<String> = expected
            .iter()
            .filter(|key| key.as_str() <= "40" && key.as_str() > "10")
            .cloned()
            .collect();
        let options = ReadOptions::<str>::new().gte("40").lt("10");
        assert_eq!(read_keys(&db, &options), bounded, "order {order}");

        let mut reversed = bounded.clone();
        reversed.reverse();
        let options = ReadOptions::<str>::new().gte("40").lt("10").reverse(true);
        assert_eq!(read_keys(&db, &options), reversed, "order {order}");

        // Bounds that are empty under this order read nothing.
        let options = ReadOptions::<str>::new().gte("10").lt("40");
        assert!(read_keys(&db, &options).is_empty(), "order {order}");
    }
}

#[test]
fn test_stored_key_order_must_match() {
    let (log, _db, _) = populated(4);
    let length = log.len();

    let reopened = descending_bee(log.clone(), 8);
    assert_eq!(reopened.get("59").expect("get").expect("present").value, "v59");

    let result = Bee::with_codecs(log.clone(), &TreeConfig::default(), Utf8, Utf8);
    assert!(matches!(
        result,
        Err(TreeError::HeaderMismatch {
            field: "key order",
            ..
        })
    ));
    assert_eq!(log.len(), length);
}
