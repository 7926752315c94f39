//! The header block written by the first commit.

use crate::codec::ByteOrder;
use crate::config::TreeConfig;
use crate::storage::Log;
use crate::testing::memory_bee;
use crate::tree::{HEADER_FORMAT, TreeError};
use crate::view::Bee;

#[test]
fn test_get_header_out() {
    let (_log, db) = memory_bee(&TreeConfig::default());
    db.put("hi", "ho").expect("put");

    let header = db.header().expect("header").expect("header written");
    assert_eq!(header.protocol, "beetree");
    assert_eq!(header.format, HEADER_FORMAT);
    assert_eq!(header.key_codec, "utf-8");
    assert_eq!(header.value_codec, "utf-8");
    assert_eq!(header.order, 8);
}

#[test]
fn test_header_written_only_by_first_commit() {
    let (log, db) = memory_bee(&TreeConfig::default());
    assert!(db.header().expect("header").is_none());
    assert_eq!(log.len(), 0);

    db.put("a", "1").expect("put");
    let after_first = log.len();
    db.put("b", "2").expect("put");
    assert!(db.header().expect("header").is_some());

    // The second commit appends only its nodes and commit record.
    let header_blocks = (0..log.len())
        .filter(|&offset| {
            log.read(offset)
                .is_ok_and(|bytes| bytes.first() == Some(&0x01))
        })
        .count();
    assert_eq!(header_blocks, 1);
    assert!(log.len() > after_first);
}

#[test]
fn test_protocol_mismatch_on_reopen() {
    let (log, db) = memory_bee(&TreeConfig::default());
    db.put("a", "1").expect("put");

    let result = Bee::with_key_order(
        log,
        &TreeConfig::default().with_protocol("other"),
        crate::codec::Utf8,
        crate::codec::Utf8,
        std::sync::Arc::new(ByteOrder),
    );
    assert!(matches!(
        result,
        Err(TreeError::HeaderMismatch {
            field: "protocol",
            ..
        })
    ));
}
