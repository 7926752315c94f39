//! Log substrate for the tree.
//!
//! The tree stores every node, header and commit record as an immutable block
//! in an append-only log. This module defines the [`Log`] contract and two
//! implementations:
//!
//! - [`MemoryLog`]: blocks in memory, with read/append counters
//! - [`FileLog`]: blocks framed with a length and CRC32 in a single file
//!
//! # Usage
//!
//! ```
//! use beetree::storage::{Log, MemoryLog};
//!
//! let log = MemoryLog::new();
//! let offset = log.append(b"hello").unwrap();
//! assert_eq!(offset, 0);
//! assert_eq!(log.read(offset).unwrap(), b"hello".to_vec());
//! assert_eq!(log.len(), 1);
//! ```

mod file;
mod log;
mod memory;

pub use file::FileLog;
pub use log::{Log, LogError, Offset};
pub use memory::{LogStats, MemoryLog};
