//! Block encoding.
//!
//! Every block in the log starts with a one-byte tag:
//!
//! ```text
//! 0x01 Header    format u8 | order u32 | protocol | key codec | value codec | key order
//! 0x02 Leaf      count u32 | (key, value) * count
//! 0x03 Internal  count u32 | child0 u64 | (key, child u64) * count
//! 0x04 Commit    root opt u64 | prev opt u64 | seq u64 | count u32 | change * count
//! ```
//!
//! Keys and values are u32-length-prefixed byte strings; identifiers in the
//! header are u16-length-prefixed UTF-8. A change is `key | flag u8 | value?`
//! where flag 1 means the key was put and 0 means it was deleted.
//!
//! Decoding never panics: any malformed block yields a [`NodeError`].

// Entry counts are bounded by the tree order.
#![allow(clippy::cast_possible_truncation)]

use crate::storage::Offset;
use crate::tree::node::{InternalNode, LeafEntry, LeafNode, Node, NodeError};
use crate::tree::wire::{Reader, Writer};

const TAG_HEADER: u8 = 0x01;
const TAG_LEAF: u8 = 0x02;
const TAG_INTERNAL: u8 = 0x03;
const TAG_COMMIT: u8 = 0x04;

/// Current header format.
pub const HEADER_FORMAT: u8 = 1;

/// Tree metadata, written once as the first block of a log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Header format version.
    pub format: u8,
    /// Protocol identifier.
    pub protocol: String,
    /// Tree order `M`.
    pub order: u32,
    /// Identifier of the key codec used by the top-level view.
    pub key_codec: String,
    /// Identifier of the value codec used by the top-level view.
    pub value_codec: String,
    /// Identifier of the key order the tree is sorted by.
    pub key_order: String,
}

/// A single applied mutation, as recorded in a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub key: Vec<u8>,
    /// New value, or `None` for a delete.
    pub value: Option<Vec<u8>>,
}

/// The record that seals one flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    /// Root of the tree after this commit; `None` if the tree is empty.
    pub root: Option<Offset>,
    /// Offset of the previous commit block.
    pub prev: Option<Offset>,
    /// Commit sequence number, starting at 1.
    pub seq: u64,
    /// Applied changes in ascending key order.
    pub changes: Vec<Change>,
}

/// Any block that can appear in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Header(Header),
    Node(Node),
    Commit(CommitRecord),
}

impl Block {
    /// Encode to bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Header(header) => encode_header(header),
            Self::Node(Node::Leaf(leaf)) => encode_leaf(leaf),
            Self::Node(Node::Internal(internal)) => encode_internal(internal),
            Self::Commit(commit) => encode_commit(commit),
        }
    }

    /// Decode from bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, NodeError> {
        let mut reader = Reader::new(bytes);
        let block = match reader.u8()? {
            TAG_HEADER => Self::Header(decode_header(&mut reader)?),
            TAG_LEAF => Self::Node(Node::Leaf(decode_leaf(&mut reader)?)),
            TAG_INTERNAL => Self::Node(Node::Internal(decode_internal(&mut reader)?)),
            TAG_COMMIT => Self::Commit(decode_commit(&mut reader)?),
            tag => return Err(NodeError::UnknownTag(tag)),
        };
        reader.finish()?;
        Ok(block)
    }

    /// Short name of the block type, for error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Header(_) => "header",
            Self::Node(Node::Leaf(_)) => "leaf",
            Self::Node(Node::Internal(_)) => "internal",
            Self::Commit(_) => "commit",
        }
    }

    /// Unwrap a node block.
    pub fn into_node(self) -> Result<Node, NodeError> {
        match self {
            Self::Node(node) => Ok(node),
            other => Err(NodeError::WrongBlockType {
                expected: "node",
                found: other.kind(),
            }),
        }
    }

    /// Unwrap a commit block.
    pub fn into_commit(self) -> Result<CommitRecord, NodeError> {
        match self {
            Self::Commit(commit) => Ok(commit),
            other => Err(NodeError::WrongBlockType {
                expected: "commit",
                found: other.kind(),
            }),
        }
    }

    /// Unwrap a header block.
    pub fn into_header(self) -> Result<Header, NodeError> {
        match self {
            Self::Header(header) => Ok(header),
            other => Err(NodeError::WrongBlockType {
                expected: "header",
                found: other.kind(),
            }),
        }
    }
}

fn encode_header(header: &Header) -> Vec<u8> {
    let mut w = Writer::with_tag(TAG_HEADER);
    w.u8(header.format);
    w.u32(header.order);
    w.short_str(&header.protocol);
    w.short_str(&header.key_codec);
    w.short_str(&header.value_codec);
    w.short_str(&header.key_order);
    w.finish()
}

fn decode_header(r: &mut Reader<'_>) -> Result<Header, NodeError> {
    Ok(Header {
        format: r.u8()?,
        order: r.u32()?,
        protocol: r.short_str()?,
        key_codec: r.short_str()?,
        value_codec: r.short_str()?,
        key_order: r.short_str()?,
    })
}

fn encode_leaf(leaf: &LeafNode) -> Vec<u8> {
    let mut w = Writer::with_tag(TAG_LEAF);
    w.u32(leaf.entries.len() as u32);
    for entry in &leaf.entries {
        w.bytes(&entry.key);
        w.bytes(&entry.value);
    }
    w.finish()
}

fn decode_leaf(r: &mut Reader<'_>) -> Result<LeafNode, NodeError> {
    // Two u32 length prefixes per entry.
    let count = r.count(8)?;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let key = r.bytes()?;
        let value = r.bytes()?;
        entries.push(LeafEntry { key, value });
    }
    Ok(LeafNode { entries })
}

fn encode_internal(internal: &InternalNode) -> Vec<u8> {
    let mut w = Writer::with_tag(TAG_INTERNAL);
    w.u32(internal.keys.len() as u32);
    let mut children = internal.children.iter();
    if let Some(&first) = children.next() {
        w.u64(first);
    }
    for (key, &child) in internal.keys.iter().zip(children) {
        w.bytes(key);
        w.u64(child);
    }
    w.finish()
}

fn decode_internal(r: &mut Reader<'_>) -> Result<InternalNode, NodeError> {
    // Key length prefix + child offset per separator.
    let count = r.count(12)?;
    if r.remaining() < 8 {
        return Err(NodeError::EmptyInternal);
    }
    let mut keys = Vec::with_capacity(count);
    let mut children = Vec::with_capacity(count + 1);
    children.push(r.u64()?);
    for _ in 0..count {
        keys.push(r.bytes()?);
        children.push(r.u64()?);
    }
    Ok(InternalNode { keys, children })
}

fn encode_commit(commit: &CommitRecord) -> Vec<u8> {
    let mut w = Writer::with_tag(TAG_COMMIT);
    w.optional_u64(commit.root);
    w.optional_u64(commit.prev);
    w.u64(commit.seq);
    w.u32(commit.changes.len() as u32);
    for change in &commit.changes {
        w.bytes(&change.key);
        match &change.value {
            Some(value) => {
                w.u8(1);
                w.bytes(value);
            }
            None => w.u8(0),
        }
    }
    w.finish()
}

fn decode_commit(r: &mut Reader<'_>) -> Result<CommitRecord, NodeError> {
    let root = r.optional_u64()?;
    let prev = r.optional_u64()?;
    let seq = r.u64()?;
    // Key length prefix + flag per change.
    let count = r.count(5)?;
    let mut changes = Vec::with_capacity(count);
    for _ in 0..count {
        let key = r.bytes()?;
        let value = match r.u8()? {
            0 => None,
            1 => Some(r.bytes()?),
            flag => return Err(NodeError::InvalidFlag(flag)),
        };
        changes.push(Change { key, value });
    }
    Ok(CommitRecord {
        root,
        prev,
        seq,
        changes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(size: usize) -> Node {
        Node::Leaf(LeafNode {
            entries: (0..size)
                .map(|i| LeafEntry {
                    key: format!("key-{i:04}").into_bytes(),
                    value: vec![0xff; i % 7],
                })
                .collect(),
        })
    }

    fn internal(children: usize) -> Node {
        Node::Internal(InternalNode {
            keys: (1..children).map(|i| vec![0x00, i as u8, 0xff]).collect(),
            children: (0..children as u64).map(|c| c * 1000 + 7).collect(),
        })
    }

    fn round_trip(block: &Block) {
        let bytes = block.encode();
        assert_eq!(&Block::decode(&bytes).expect("decode"), block);
    }

    #[test]
    fn test_leaf_round_trip_min_mid_max() {
        // Empty root leaf, minimum, mid-range and maximum fan-out for order 8.
        for size in [0, 1, 4, 6, 8] {
            round_trip(&Block::Node(leaf(size)));
        }
    }

    #[test]
    fn test_internal_round_trip_min_mid_max() {
        for children in [2, 4, 6, 8, 1024] {
            round_trip(&Block::Node(internal(children)));
        }
    }

    #[test]
    fn test_header_and_commit_round_trip() {
        round_trip(&Block::Header(Header {
            format: HEADER_FORMAT,
            protocol: "beetree".to_string(),
            order: 8,
            key_codec: "utf-8".to_string(),
            value_codec: "binary".to_string(),
            key_order: "bytes".to_string(),
        }));

        round_trip(&Block::Commit(CommitRecord {
            root: Some(42),
            prev: None,
            seq: 1,
            changes: vec![
                Change {
                    key: b"a".to_vec(),
                    value: Some(b"1".to_vec()),
                },
                Change {
                    key: b"b".to_vec(),
                    value: None,
                },
            ],
        }));

        round_trip(&Block::Commit(CommitRecord {
            root: None,
            prev: Some(3),
            seq: 9,
            changes: Vec::new(),
        }));
    }

    #[test]
    fn test_decode_rejects_malformed_blocks() {
        assert_eq!(Block::decode(&[]), Err(NodeError::Truncated));
        assert_eq!(Block::decode(&[0x7f]), Err(NodeError::UnknownTag(0x7f)));

        let mut bytes = Block::Node(leaf(3)).encode();
        bytes.push(0);
        assert_eq!(Block::decode(&bytes), Err(NodeError::TrailingBytes(1)));

        let bytes = Block::Node(leaf(3)).encode();
        assert_eq!(
            Block::decode(&bytes[..bytes.len() - 2]),
            Err(NodeError::Truncated)
        );

        // Internal node without its first child.
        assert_eq!(
            Block::decode(&[TAG_INTERNAL, 0, 0, 0, 0]),
            Err(NodeError::EmptyInternal)
        );
    }

    #[test]
    fn test_block_type_mismatch() {
        let commit = Block::Commit(CommitRecord {
            root: None,
            prev: None,
            seq: 1,
            changes: Vec::new(),
        });
        assert_eq!(
            commit.into_node(),
            Err(NodeError::WrongBlockType {
                expected: "node",
                found: "commit",
            })
        );
    }
}
