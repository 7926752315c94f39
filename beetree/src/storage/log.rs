//! Append-only log abstraction.
//!
//! The tree never rewrites a block: it only appends new ones and reads old
//! ones back by offset. This trait is the whole contract between the tree and
//! whatever keeps the bytes, so the engine can run against an in-memory log in
//! tests, a file in production, or a fault-injecting log in simulation.
//!
//! # Invariants
//!
//! - Offsets are dense: the n-th appended block has offset `n - 1`.
//! - A block is immutable once `append` has returned its offset.
//! - `read(offset)` succeeds for every `offset < len()`.

/// Position of a block in the log (0-indexed block number).
pub type Offset = u64;

/// Errors that can occur in the log substrate.
#[derive(Debug)]
pub enum LogError {
    /// I/O error from the backing file.
    Io(std::io::Error),
    /// The requested block does not exist.
    OutOfBounds { offset: Offset, length: u64 },
    /// A stored block failed its checksum.
    ChecksumMismatch {
        offset: Offset,
        expected: u32,
        actual: u32,
    },
    /// Injected fault for simulation.
    Injected(String),
    /// An internal lock was poisoned by a panicking thread.
    LockPoisoned,
}

impl std::fmt::Display for LogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::OutOfBounds { offset, length } => {
                write!(f, "block {offset} out of bounds (log length: {length})")
            }
            Self::ChecksumMismatch {
                offset,
                expected,
                actual,
            } => write!(
                f,
                "checksum mismatch in block {offset}: expected {expected:#010x}, got {actual:#010x}"
            ),
            Self::Injected(msg) => write!(f, "injected fault: {msg}"),
            Self::LockPoisoned => write!(f, "log lock poisoned"),
        }
    }
}

impl std::error::Error for LogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for LogError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// An append-only sequence of immutable, offset-addressed blocks.
///
/// Implementations must be safe to share between one writer and any number
/// of concurrent readers. No method may hold an internal lock after it
/// returns.
pub trait Log: Send + Sync {
    /// Append a block, returning its offset.
    fn append(&self, block: &[u8]) -> Result<Offset, LogError>;

    /// Read the block at `offset`.
    fn read(&self, offset: Offset) -> Result<Vec<u8>, LogError>;

    /// Number of blocks in the log.
    fn len(&self) -> u64;

    /// Whether the log holds no blocks.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make all appended blocks durable.
    fn sync(&self) -> Result<(), LogError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_error_display() {
        let e = LogError::OutOfBounds {
            offset: 10,
            length: 5,
        };
        assert!(e.to_string().contains("block 10"));
        assert!(e.to_string().contains("log length: 5"));

        let e = LogError::Injected("test fault".to_string());
        assert!(e.to_string().contains("test fault"));
    }
}
