//! Snapshots and checkouts: pinned, read-only views of older versions.

use crate::config::TreeConfig;
use crate::testing::{memory_bee, read_keys};
use crate::tree::{NotFound, TreeError};
use crate::view::ReadOptions;

fn bang() -> TreeConfig {
    TreeConfig::default().with_separator(b"!".to_vec())
}

#[test]
fn test_read_stream_on_sub_snapshot_returns_only_sub_keys() {
    let (_log, db) = memory_bee(&bang());
    let sub = db.sub("sub");

    db.put("a", "a").expect("put");
    sub.put("sa", "sa").expect("put");
    sub.put("sb", "sb").expect("put");

    let snapshot = sub.snapshot().expect("snapshot");

    db.put("b", "b").expect("put");

    let keys = read_keys(&snapshot, &ReadOptions::new());
    assert_eq!(keys, vec!["sa".to_string(), "sb".to_string()]);
}

#[test]
fn test_read_stream_on_double_sub_snapshot() {
    let (_log, db) = memory_bee(&bang());
    let sub = db.sub("sub");

    db.put("a", "a").expect("put");
    sub.put("sa", "sa").expect("put");
    sub.put("sb", "sb").expect("put");

    let snapshot = sub.snapshot().expect("snapshot").snapshot().expect("snapshot");

    db.put("b", "b").expect("put");
    sub.put("sc", "sc").expect("put");

    let keys = read_keys(&snapshot, &ReadOptions::new());
    assert_eq!(keys, vec!["sa".to_string(), "sb".to_string()]);
}

#[test]
fn test_snapshot_is_stable_across_overwrites_and_deletes() {
    let (_log, db) = memory_bee(&TreeConfig::default().with_order(3));
    for i in 0..40 {
        db.put(&format!("{i:02}"), "old").expect("put");
    }
    let snapshot = db.snapshot().expect("snapshot");
    let version = snapshot.version().expect("version");

    for i in 0..40 {
        if i % 2 == 0 {
            db.del(&format!("{i:02}")).expect("del");
        } else {
            db.put(&format!("{i:02}"), "new").expect("put");
        }
    }

    assert_eq!(snapshot.version().expect("version"), version);
    let values: Vec<String> = snapshot
        .read_stream(&ReadOptions::new())
        .map(|entry| entry.expect("entry").value)
        .collect();
    assert_eq!(values.len(), 40);
    assert!(values.iter().all(|value| value == "old"));

    assert_eq!(read_keys(&db, &ReadOptions::new()).len(), 20);
}

#[test]
fn test_snapshot_rejects_writes() {
    let (_log, db) = memory_bee(&TreeConfig::default());
    db.put("a", "1").expect("put");

    let snapshot = db.snapshot().expect("snapshot");
    assert!(snapshot.is_readonly());
    assert!(matches!(
        snapshot.put("b", "2"),
        Err(TreeError::ReadOnlyViolation)
    ));
    assert!(matches!(snapshot.batch(), Err(TreeError::ReadOnlyViolation)));
    assert!(!db.is_readonly());
}

#[test]
fn test_checkout_by_log_length() {
    let (log, db) = memory_bee(&TreeConfig::default());
    db.put("a", "1").expect("put");
    let first = db.version().expect("version");
    db.put("b", "2").expect("put");
    db.put("a", "3").expect("put");

    let checkout = db.checkout(first).expect("checkout");
    assert_eq!(checkout.version().expect("version"), first);
    assert_eq!(
        checkout.get("a").expect("get").expect("entry").value,
        "1".to_string()
    );
    assert!(checkout.get("b").expect("get").is_none());

    // Any length between two commits resolves to the earlier one.
    let between = db.checkout(first + 1).expect("checkout");
    assert_eq!(between.version().expect("version"), first);

    // The empty tree.
    let empty = db.checkout(0).expect("checkout");
    assert!(read_keys(&empty, &ReadOptions::new()).is_empty());

    let length = crate::storage::Log::len(log.as_ref());
    assert!(matches!(
        db.checkout(length + 1),
        Err(TreeError::NotFound(NotFound::Version { .. }))
    ));
}

#[test]
fn test_sub_of_checkout_and_checkout_of_sub_agree() {
    let (_log, db) = memory_bee(&bang());
    db.sub("s").put("x", "1").expect("put");
    let version = db.version().expect("version");
    db.sub("s").put("y", "2").expect("put");

    let a = db.checkout(version).expect("checkout").sub("s");
    let b = db.sub("s").checkout(version).expect("checkout");
    assert_eq!(read_keys(&a, &ReadOptions::new()), vec!["x".to_string()]);
    assert_eq!(read_keys(&b, &ReadOptions::new()), vec!["x".to_string()]);
}

#[test]
fn test_snapshot_reads_stay_stable_while_another_thread_commits() {
    let (_log, db) = memory_bee(&TreeConfig::default().with_order(4));
    for i in 0..50 {
        db.put(&format!("{i:02}"), "old").expect("put");
    }
    let snapshot = db.snapshot().expect("snapshot");
    let expected: Vec<String> = (0..50).map(|i| format!("{i:02}")).collect();

    let writer = {
        let db = db.clone();
        std::thread::spawn(move || {
            for round in 0..20 {
                for i in (round % 5..50).step_by(5) {
                    if round % 2 == 0 {
                        db.del(&format!("{i:02}")).expect("del");
                    } else {
                        db.put(&format!("{i:02}"), &format!("new{round}")).expect("put");
                    }
                }
                db.put(&format!("extra{round}"), "x").expect("put");
            }
        })
    };

    while !writer.is_finished() {
        let entries: Vec<(String, String)> = snapshot
            .read_stream(&ReadOptions::new())
            .map(|entry| entry.expect("entry"))
            .map(|entry| (entry.key, entry.value))
            .collect();
        assert_eq!(entries.len(), expected.len());
        assert!(entries.iter().map(|(key, _)| key).eq(expected.iter()));
        assert!(entries.iter().all(|(_, value)| value == "old"));
        assert_eq!(
            snapshot.get("07").expect("get").expect("present").value,
            "old".to_string()
        );
    }
    writer.join().expect("writer thread");

    assert_eq!(read_keys(&snapshot, &ReadOptions::new()), expected);
    assert!(db.version().expect("version") > snapshot.version().expect("version"));
    // The last round touching each residue of 5 decides it: 0, 2 and 4 end on a put.
    assert_eq!(read_keys(&db, &ReadOptions::new()).len(), 30 + 20);
}
