//! Every bound combination over every small tree, plain and inside a sub.

use crate::codec::Utf8;
use crate::config::TreeConfig;
use crate::e2e_tests::helpers::{Sweep, sorted_reference};
use crate::testing::{memory_bee, read_keys};
use crate::view::Bee;

const MAX: usize = 25;

/// Check all eight gt/gte × lt/lte × reverse reads for every `j <= i`.
fn sweep(db: &Bee<Utf8, Utf8>, size: usize) {
    let reference = sorted_reference(size);
    for i in 0..size {
        for j in 0..=i {
            let (lower, upper) = (j.to_string(), i.to_string());
            for k in 0..8 {
                let sweep = Sweep::new(&lower, &upper, k);
                let actual = read_keys(db, &sweep.options());
                assert_eq!(
                    actual,
                    sweep.expected(&reference),
                    "size {size}, lower {lower} (inclusive: {}), upper {upper} (inclusive: {}), reverse {}",
                    sweep.lower_inclusive,
                    sweep.upper_inclusive,
                    sweep.reverse
                );
            }
        }
    }
}

#[test]
fn test_all_short_iterators() {
    let (_log, db) = memory_bee(&TreeConfig::default());

    for size in 1..=MAX {
        for i in 0..size {
            db.put(&i.to_string(), "hello world").expect("put");
        }
        sweep(&db, size);
    }
}

#[test]
fn test_all_short_iterators_sub_database() {
    let (_log, parent) = memory_bee(&TreeConfig::default());
    let db = parent.sub("sub1");

    for size in 1..=MAX {
        for i in 0..size {
            let key = i.to_string();
            db.put(&key, "hello world").expect("put");
            parent.put(&key, "parent hello world").expect("put");
        }
        sweep(&db, size);
    }
}

#[test]
fn test_all_short_iterators_small_order() {
    let (_log, db) = memory_bee(&TreeConfig::default().with_order(3));

    for i in 0..MAX {
        db.put(&i.to_string(), "hello world").expect("put");
    }
    sweep(&db, MAX);
}
