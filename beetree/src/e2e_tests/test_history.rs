//! History streams over committed batches.

use crate::config::TreeConfig;
use crate::testing::{memory_bee, memory_binary_bee};
use crate::view::HistoryOptions;

#[test]
fn test_history_stream_reverse() {
    let (_log, db) = memory_binary_bee(&TreeConfig::default());

    let mut batch = db.batch().expect("batch");
    batch.put(b"a", b"");
    batch.put(b"b", b"");
    batch.put(b"c", b"");
    batch.flush().expect("flush");

    let keys: Vec<u8> = db
        .history_stream(HistoryOptions::new().reverse(true))
        .flat_map(|entry| entry.expect("history entry").key)
        .collect();
    assert_eq!(keys, b"cba".to_vec(), "reversed correctly");
}

#[test]
fn test_history_records_puts_and_deletes_in_commit_order() {
    let (_log, db) = memory_bee(&TreeConfig::default());

    db.put("a", "1").expect("put");
    db.put("b", "2").expect("put");
    db.del("a").expect("del");
    // Deleting an absent key commits nothing.
    db.del("zzz").expect("del");

    let entries: Vec<(String, Option<String>)> = db
        .history_stream(HistoryOptions::new())
        .map(|entry| {
            let entry = entry.expect("history entry");
            (entry.key, entry.value)
        })
        .collect();
    assert_eq!(
        entries,
        vec![
            ("a".to_string(), Some("1".to_string())),
            ("b".to_string(), Some("2".to_string())),
            ("a".to_string(), None),
        ]
    );
}

#[test]
fn test_history_window_and_limit() {
    let (_log, db) = memory_bee(&TreeConfig::default());

    let mut versions = Vec::new();
    for key in ["a", "b", "c", "d"] {
        db.put(key, "v").expect("put");
        versions.push(db.version().expect("version"));
    }

    let keys: Vec<String> = db
        .history_stream(HistoryOptions::new().since(versions[0]).until(versions[2]))
        .map(|entry| entry.expect("history entry").key)
        .collect();
    assert_eq!(keys, vec!["b".to_string(), "c".to_string()]);

    let newest: Vec<u64> = db
        .history_stream(HistoryOptions::new().reverse(true).limit(2))
        .map(|entry| entry.expect("history entry").version)
        .collect();
    assert_eq!(newest, vec![versions[3], versions[2]]);
}

#[test]
fn test_sub_history_only_shows_sub_keys() {
    let (_log, db) = memory_bee(&TreeConfig::default());
    let sub = db.sub("sub");

    db.put("a", "1").expect("put");
    sub.put("x", "2").expect("put");
    db.put("b", "3").expect("put");

    let keys: Vec<String> = sub
        .history_stream(HistoryOptions::new())
        .map(|entry| entry.expect("history entry").key)
        .collect();
    assert_eq!(keys, vec!["x".to_string()]);
}
