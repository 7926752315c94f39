//! Node store: typed access to blocks in the log.
//!
//! Reads decode a block at an offset; writes encode a block and append it.
//! The store never rewrites an existing block. A read-only store rejects every
//! write before touching the log.

use std::sync::Arc;

use crate::storage::{Log, Offset};
use crate::tree::block::{Block, CommitRecord, Header};
use crate::tree::error::TreeError;
use crate::tree::node::{Node, NodeError};

/// Block reader/writer over a shared log.
#[derive(Clone)]
pub struct NodeStore {
    log: Arc<dyn Log>,
    readonly: bool,
}

impl NodeStore {
    /// Create a store over `log`.
    #[must_use]
    pub fn new(log: Arc<dyn Log>, readonly: bool) -> Self {
        Self { log, readonly }
    }

    /// The underlying log.
    #[must_use]
    pub const fn log(&self) -> &Arc<dyn Log> {
        &self.log
    }

    /// Whether writes are rejected.
    #[must_use]
    pub const fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Current log length in blocks.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.log.len()
    }

    /// Whether the log holds no blocks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// Read and decode any block.
    pub fn read_block(&self, offset: Offset) -> Result<Block, TreeError> {
        let bytes = self.log.read(offset)?;
        Block::decode(&bytes).map_err(|source| TreeError::CorruptNode { offset, source })
    }

    /// Read a tree node.
    pub fn read_node(&self, offset: Offset) -> Result<Node, TreeError> {
        tracing::trace!("fetching node at offset {offset}");
        self.read_as(offset, Block::into_node)
    }

    /// Read a commit record.
    pub fn read_commit(&self, offset: Offset) -> Result<CommitRecord, TreeError> {
        self.read_as(offset, Block::into_commit)
    }

    /// Read a header block.
    pub fn read_header(&self, offset: Offset) -> Result<Header, TreeError> {
        self.read_as(offset, Block::into_header)
    }

    fn read_as<T>(
        &self,
        offset: Offset,
        unwrap: impl FnOnce(Block) -> Result<T, NodeError>,
    ) -> Result<T, TreeError> {
        unwrap(self.read_block(offset)?).map_err(|source| TreeError::CorruptNode { offset, source })
    }

    /// Encode and append a block.
    pub fn write_block(&self, block: &Block) -> Result<Offset, TreeError> {
        if self.readonly {
            return Err(TreeError::ReadOnlyViolation);
        }
        Ok(self.log.append(&block.encode())?)
    }

    /// Encode and append a tree node.
    pub fn write_node(&self, node: Node) -> Result<Offset, TreeError> {
        self.write_block(&Block::Node(node))
    }

    /// Make appended blocks durable.
    pub fn sync(&self) -> Result<(), TreeError> {
        Ok(self.log.sync()?)
    }
}

impl std::fmt::Debug for NodeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeStore")
            .field("len", &self.log.len())
            .field("readonly", &self.readonly)
            .finish()
    }
}
