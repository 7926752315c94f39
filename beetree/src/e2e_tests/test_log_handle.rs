//! The log a view was opened over is exposed unchanged.

use std::sync::Arc;

use crate::config::TreeConfig;
use crate::storage::{Log, MemoryLog};
use crate::view::Bee;

#[test]
fn test_log_is_exposed() {
    let log: Arc<dyn Log> = Arc::new(MemoryLog::new());
    let db = Bee::open(log.clone(), &TreeConfig::default()).expect("open");
    assert!(Arc::ptr_eq(db.log(), &log));

    // Derived views share the same log.
    let sub = db.sub(b"sub");
    assert!(Arc::ptr_eq(sub.log(), &log));
}
