//! Read-only trees never write, not even a header.

use crate::config::TreeConfig;
use crate::storage::Log;
use crate::testing::{memory_bee, read_keys};
use crate::tree::TreeError;
use crate::view::{Bee, ReadOptions};

#[test]
fn test_readonly_disables_header_write() {
    let (log, db) = memory_bee(&TreeConfig::default().with_readonly(true));
    assert_eq!(log.len(), 0);
    assert!(db.is_readonly());
    assert!(db.header().expect("header").is_none());
    assert_eq!(db.version().expect("version"), 0);
}

#[test]
fn test_cannot_append_to_readonly_db() {
    let (log, db) = memory_bee(&TreeConfig::default().with_readonly(true));
    assert!(matches!(
        db.put("hello", "world"),
        Err(TreeError::ReadOnlyViolation)
    ));
    assert!(matches!(db.del("hello"), Err(TreeError::ReadOnlyViolation)));
    assert_eq!(log.len(), 0);
}

#[test]
fn test_readonly_reader_over_written_log() {
    let (log, writer) = memory_bee(&TreeConfig::default());
    writer.put("a", "1").expect("put");
    writer.put("b", "2").expect("put");
    let length = log.len();

    let reader = Bee::with_codecs(
        log.clone(),
        &TreeConfig::default().with_readonly(true),
        crate::codec::Utf8,
        crate::codec::Utf8,
    )
    .expect("open reader");
    assert_eq!(
        read_keys(&reader, &ReadOptions::new()),
        vec!["a".to_string(), "b".to_string()]
    );
    assert!(reader.put("c", "3").is_err());
    assert_eq!(log.len(), length);
}
