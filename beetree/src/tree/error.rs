//! Errors raised by the tree engine and the views built on it.

use crate::codec::CodecError;
use crate::storage::{LogError, Offset};
use crate::tree::node::NodeError;

/// What could not be found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFound {
    /// A block offset past the end of the log.
    Block { offset: Offset, length: u64 },
    /// A version (log length) past the end of the log.
    Version { version: u64, length: u64 },
}

impl std::fmt::Display for NotFound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Block { offset, length } => {
                write!(f, "block {offset} not found (log length: {length})")
            }
            Self::Version { version, length } => {
                write!(f, "version {version} not found (log length: {length})")
            }
        }
    }
}

/// Errors that can occur in tree operations.
#[derive(Debug)]
pub enum TreeError {
    /// A block failed to decode as the expected structure.
    CorruptNode { offset: Offset, source: NodeError },
    /// An offset or version does not exist in the log.
    NotFound(NotFound),
    /// A mutation was attempted on a read-only tree or snapshot view.
    ReadOnlyViolation,
    /// A flush was based on a version that is no longer the latest.
    StaleBase { base: u64, latest: u64 },
    /// Error from the log substrate.
    Log(LogError),
    /// Stored bytes could not be decoded by a view's codec.
    Codec(CodecError),
    /// The stored header disagrees with the configuration used to open it.
    HeaderMismatch {
        field: &'static str,
        stored: String,
        configured: String,
    },
    /// The configured tree order is out of range.
    InvalidOrder(usize),
    /// An internal lock was poisoned by a panicking thread.
    LockPoisoned,
}

impl std::fmt::Display for TreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CorruptNode { offset, source } => {
                write!(f, "corrupt block at offset {offset}: {source}")
            }
            Self::NotFound(what) => write!(f, "{what}"),
            Self::ReadOnlyViolation => write!(f, "cannot write to a read-only view"),
            Self::StaleBase { base, latest } => write!(
                f,
                "batch based on version {base} but latest version is {latest}"
            ),
            Self::Log(e) => write!(f, "log error: {e}"),
            Self::Codec(e) => write!(f, "codec error: {e}"),
            Self::HeaderMismatch {
                field,
                stored,
                configured,
            } => write!(
                f,
                "header {field} mismatch: stored {stored:?}, configured {configured:?}"
            ),
            Self::InvalidOrder(order) => write!(f, "invalid tree order: {order}"),
            Self::LockPoisoned => write!(f, "tree lock poisoned"),
        }
    }
}

impl std::error::Error for TreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CorruptNode { source, .. } => Some(source),
            Self::Log(e) => Some(e),
            Self::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<LogError> for TreeError {
    fn from(e: LogError) -> Self {
        match e {
            LogError::OutOfBounds { offset, length } => {
                Self::NotFound(NotFound::Block { offset, length })
            }
            other => Self::Log(other),
        }
    }
}

impl From<CodecError> for TreeError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_bounds_becomes_not_found() {
        let e = TreeError::from(LogError::OutOfBounds {
            offset: 9,
            length: 3,
        });
        assert!(matches!(
            e,
            TreeError::NotFound(NotFound::Block {
                offset: 9,
                length: 3
            })
        ));
        assert_eq!(e.to_string(), "block 9 not found (log length: 3)");
    }

    #[test]
    fn test_corrupt_node_chains_source() {
        let e = TreeError::CorruptNode {
            offset: 4,
            source: NodeError::Truncated,
        };
        assert!(e.to_string().contains("offset 4"));
        let source = std::error::Error::source(&e).expect("has source");
        assert_eq!(source.to_string(), "block truncated");
    }
}
