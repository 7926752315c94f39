//! In-memory log.
//!
//! Blocks live in a `Vec` behind an `RwLock`. Readers take the read lock only
//! long enough to copy a block out, so a reader never waits on a writer for
//! longer than one `Vec::push`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::storage::log::{Log, LogError, Offset};

/// Counters describing how a log has been used.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LogStats {
    /// Number of block reads.
    pub reads: u64,
    /// Number of block appends.
    pub appends: u64,
}

/// An append-only log held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryLog {
    blocks: RwLock<Vec<Arc<[u8]>>>,
    reads: AtomicU64,
    appends: AtomicU64,
}

impl MemoryLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the read/append counters.
    #[must_use]
    pub fn stats(&self) -> LogStats {
        LogStats {
            reads: self.reads.load(Ordering::Relaxed),
            appends: self.appends.load(Ordering::Relaxed),
        }
    }

    /// Reset the read/append counters.
    pub fn reset_stats(&self) {
        self.reads.store(0, Ordering::Relaxed);
        self.appends.store(0, Ordering::Relaxed);
    }
}

impl Log for MemoryLog {
    fn append(&self, block: &[u8]) -> Result<Offset, LogError> {
        let mut blocks = self.blocks.write().map_err(|_| LogError::LockPoisoned)?;
        let offset = blocks.len() as Offset;
        blocks.push(Arc::from(block));
        self.appends.fetch_add(1, Ordering::Relaxed);
        Ok(offset)
    }

    fn read(&self, offset: Offset) -> Result<Vec<u8>, LogError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let block = {
            let blocks = self.blocks.read().map_err(|_| LogError::LockPoisoned)?;
            let length = blocks.len() as u64;
            usize::try_from(offset)
                .ok()
                .and_then(|i| blocks.get(i))
                .map(Arc::clone)
                .ok_or(LogError::OutOfBounds { offset, length })?
        };
        Ok(block.to_vec())
    }

    fn len(&self) -> u64 {
        self.blocks.read().map_or(0, |blocks| blocks.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_assigns_dense_offsets() {
        let log = MemoryLog::new();
        assert!(log.is_empty());
        assert_eq!(log.append(b"zero").expect("append"), 0);
        assert_eq!(log.append(b"one").expect("append"), 1);
        assert_eq!(log.len(), 2);
        assert_eq!(log.read(1).expect("read"), b"one".to_vec());
    }

    #[test]
    fn test_read_out_of_bounds() {
        let log = MemoryLog::new();
        log.append(b"only").expect("append");
        let err = log.read(3).expect_err("should fail");
        assert!(matches!(
            err,
            LogError::OutOfBounds {
                offset: 3,
                length: 1
            }
        ));
    }

    #[test]
    fn test_stats_count_reads_and_appends() {
        let log = MemoryLog::new();
        log.append(b"a").expect("append");
        log.read(0).expect("read");
        log.read(0).expect("read");
        assert_eq!(
            log.stats(),
            LogStats {
                reads: 2,
                appends: 1
            }
        );
        log.reset_stats();
        assert_eq!(log.stats(), LogStats::default());
    }
}
