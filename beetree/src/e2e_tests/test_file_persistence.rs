//! Trees over a file log survive reopening.

use std::sync::Arc;

use crate::codec::Utf8;
use crate::config::TreeConfig;
use crate::storage::FileLog;
use crate::testing::read_keys;
use crate::view::{Bee, HistoryOptions, ReadOptions};

fn open(path: &std::path::Path, config: &TreeConfig) -> Bee<Utf8, Utf8> {
    let log = FileLog::open(path).expect("open file log");
    Bee::with_codecs(Arc::new(log), config, Utf8, Utf8).expect("open bee")
}

#[test]
fn test_reopen_restores_latest_version() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("tree.log");

    let version = {
        let db = open(&path, &TreeConfig::default().with_order(4));
        for i in 0..30 {
            db.put(&format!("{i:02}"), &i.to_string()).expect("put");
        }
        db.del("05").expect("del");
        db.sub("users").put("alice", "admin").expect("put");
        db.version().expect("version")
    };

    // The stored order wins over the configured one.
    let db = open(&path, &TreeConfig::default().with_order(16));
    assert_eq!(db.version().expect("version"), version);
    assert_eq!(db.header().expect("header").expect("header").order, 4);

    let entry = db.get("17").expect("get").expect("entry");
    assert_eq!(entry.value, "17");
    assert!(db.get("05").expect("get").is_none());
    assert_eq!(
        read_keys(&db.sub("users"), &ReadOptions::new()),
        vec!["alice".to_string()]
    );

    let history = db.history_stream(HistoryOptions::new()).count();
    assert_eq!(history, 32);

    db.put("30", "30").expect("put after reopen");
    assert!(db.version().expect("version") > version);
}
