// Life of a write:
// 1. Caller stages puts/deletes in a Batch (typed keys encoded by a Codec)
// 2. Namespaced views prepend their prefix to every key
// 3. The tree applies the batch copy-on-write against the batch's base version:
//     - Load the root-to-leaf paths the keys touch
//     - Insert/delete, splitting, borrowing and merging as needed
// 4. Under the commit lock:
//     - Reject the batch if another commit landed since its base
//     - Append the rewritten nodes (leaves first), then a commit record
//     - Publish the new head
//
// Life of a read:
//  - Resolve the head once (the outermost pinned version, else the latest)
//  - Walk immutable blocks from that head's root; nothing is locked
//
// System components:
//  - Append-only log (memory, file, simulated)
//  - Copy-on-write B+tree engine
//  - Typed views: sub databases, snapshots, checkouts
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod codec;
pub mod config;
mod e2e_tests;
pub mod simulation;
pub mod storage;
#[cfg(test)]
mod testing;
pub mod tree;
pub mod view;

pub use view::{Batch, Bee, Entry, HistoryEntry, HistoryOptions, ReadOptions};
