//! Range reads whose bounds lie past every key read nothing.

use crate::config::TreeConfig;
use crate::testing::{memory_bee, memory_binary_bee, read_keys};
use crate::view::ReadOptions;

#[test]
fn test_out_of_bounds_iterator() {
    let (_log, db) = memory_binary_bee(&TreeConfig::default());

    let mut batch = db.batch().expect("batch");
    batch.put(b"a", b"");
    batch.put(b"b", b"");
    batch.put(b"c", b"");
    batch.flush().expect("flush");

    let keys = read_keys(&db, &ReadOptions::<[u8]>::new().gt(b"c"));
    assert_eq!(keys.len(), 0, "no out of bounds reads");
}

#[test]
fn test_out_of_bounds_iterator_string_encoding() {
    let (_log, db) = memory_bee(&TreeConfig::default());

    let mut batch = db.batch().expect("batch");
    batch.put("a", "");
    batch.put("b", "");
    batch.put("c", "");
    batch.flush().expect("flush");

    let keys = read_keys(&db, &ReadOptions::new().gte("f"));
    assert_eq!(keys.len(), 0, "no out of bounds reads");
}

#[test]
fn test_out_of_bounds_iterator_larger_db() {
    let (log, db) = memory_bee(&TreeConfig::default().with_order(4));

    for i in 0..8 {
        db.put(&i.to_string(), "hello world").expect("put");
    }

    log.reset_stats();
    let keys = read_keys(&db, &ReadOptions::new().gte("a"));
    assert_eq!(keys.len(), 0, "no out of bounds reads");

    // One root-to-leaf descent and no sibling fetches.
    assert!(log.stats().reads <= 2, "read {} blocks", log.stats().reads);
}

#[test]
fn test_contradictory_bounds_read_no_blocks() {
    let (log, db) = memory_bee(&TreeConfig::default().with_order(4));
    for i in 0..50 {
        db.put(&format!("{i:02}"), "v").expect("put");
    }

    log.reset_stats();
    let keys = read_keys(&db, &ReadOptions::new().gt("30").lt("20"));
    assert!(keys.is_empty());
    assert_eq!(log.stats().reads, 0);
}
