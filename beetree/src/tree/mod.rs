//! Persistent copy-on-write B+tree over an append-only log.
//!
//! - `node`: leaf/internal node types and their search/split logic
//! - `block`: byte encoding of nodes, the header and commit records
//! - `store`: typed block reads and appends
//! - `mutate`: copy-on-write insert/delete with split, borrow and merge
//! - `engine`: the [`Tree`] handle (head version, lookup, flush, checkout)
//! - `cursor`: bounded range iteration
//! - `history`: iteration over committed changes

mod block;
mod cursor;
mod engine;
mod error;
mod history;
mod mutate;
pub mod node;
mod store;
mod wire;

pub use block::{Block, Change, CommitRecord, HEADER_FORMAT, Header};
pub use cursor::{KeyRange, RangeCursor};
pub use engine::{CodecIds, Head, Tree};
pub use error::{NotFound, TreeError};
pub use history::{HistoryCursor, HistoryRecord};
pub use mutate::{Mutation, Written};
pub use node::{InternalNode, Layout, LeafEntry, LeafNode, Node, NodeError};
pub use store::NodeStore;
