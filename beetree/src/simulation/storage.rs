//! Fault-injecting log for deterministic testing.
//!
//! [`SimulatedLog`] keeps its blocks in a [`MemoryLog`] and, driven by a
//! seeded RNG, fails a configurable share of reads and appends with
//! [`LogError::Injected`]. A failed append writes nothing, so the log never
//! holds a partial block. Faults can be paused while the harness verifies
//! the tree.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::storage::{Log, LogError, MemoryLog, Offset};

/// Configuration for fault injection.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FaultConfig {
    /// Probability of a read error (0.0 - 1.0).
    pub read_error_rate: f64,
    /// Probability of an append error (0.0 - 1.0).
    pub append_error_rate: f64,
}

impl FaultConfig {
    /// No faults (for baseline testing).
    #[must_use]
    pub fn no_faults() -> Self {
        Self::default()
    }

    /// Low fault rates (for stress testing).
    #[must_use]
    pub const fn low_faults() -> Self {
        Self {
            read_error_rate: 0.001,
            append_error_rate: 0.001,
        }
    }

    /// High fault rates (for extreme testing).
    #[must_use]
    pub const fn high_faults() -> Self {
        Self {
            read_error_rate: 0.05,
            append_error_rate: 0.05,
        }
    }
}

/// Statistics about simulated log operations.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedLogStats {
    /// Number of block reads attempted.
    pub reads: u64,
    /// Number of block appends attempted.
    pub appends: u64,
    /// Number of injected read errors.
    pub injected_read_errors: u64,
    /// Number of injected append errors.
    pub injected_append_errors: u64,
}

struct FaultState {
    config: FaultConfig,
    rng: StdRng,
    stats: SimulatedLogStats,
}

/// An in-memory log that injects faults deterministically.
///
/// The same seed and the same sequence of calls produce the same faults.
pub struct SimulatedLog {
    inner: Arc<MemoryLog>,
    state: Mutex<FaultState>,
    paused: AtomicBool,
}

impl SimulatedLog {
    /// Create a fault-free simulated log with the given seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_config(seed, FaultConfig::default())
    }

    /// Create a simulated log with custom fault configuration.
    #[must_use]
    pub fn with_config(seed: u64, config: FaultConfig) -> Self {
        Self {
            inner: Arc::new(MemoryLog::new()),
            state: Mutex::new(FaultState {
                config,
                rng: StdRng::seed_from_u64(seed),
                stats: SimulatedLogStats::default(),
            }),
            paused: AtomicBool::new(false),
        }
    }

    /// The fault-free log holding the blocks.
    #[must_use]
    pub const fn inner(&self) -> &Arc<MemoryLog> {
        &self.inner
    }

    /// Get the current statistics.
    pub fn stats(&self) -> Result<SimulatedLogStats, LogError> {
        Ok(self.lock()?.stats)
    }

    /// Update the fault configuration.
    pub fn set_fault_config(&self, config: FaultConfig) -> Result<(), LogError> {
        self.lock()?.config = config;
        Ok(())
    }

    /// Stop injecting faults until [`SimulatedLog::resume`].
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Resume injecting faults.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, FaultState>, LogError> {
        self.state.lock().map_err(|_| LogError::LockPoisoned)
    }

    /// Count an operation and decide whether it fails.
    fn inject(&self, op: Op) -> Result<(), LogError> {
        let paused = self.paused.load(Ordering::SeqCst);
        let mut state = self.lock()?;
        let rate = match op {
            Op::Read => {
                state.stats.reads += 1;
                state.config.read_error_rate
            }
            Op::Append => {
                state.stats.appends += 1;
                state.config.append_error_rate
            }
        };
        if paused || rate <= 0.0 || state.rng.random::<f64>() >= rate {
            return Ok(());
        }
        match op {
            Op::Read => {
                state.stats.injected_read_errors += 1;
                Err(LogError::Injected("simulated read error".to_string()))
            }
            Op::Append => {
                state.stats.injected_append_errors += 1;
                Err(LogError::Injected("simulated append error".to_string()))
            }
        }
    }
}

#[derive(Clone, Copy)]
enum Op {
    Read,
    Append,
}

impl Log for SimulatedLog {
    fn append(&self, block: &[u8]) -> Result<Offset, LogError> {
        self.inject(Op::Append)?;
        self.inner.append(block)
    }

    fn read(&self, offset: Offset) -> Result<Vec<u8>, LogError> {
        self.inject(Op::Read)?;
        self.inner.read(offset)
    }

    fn len(&self) -> u64 {
        self.inner.len()
    }
}

impl std::fmt::Debug for SimulatedLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedLog")
            .field("len", &self.inner.len())
            .field("paused", &self.paused.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_faults_behaves_like_memory_log() {
        let log = SimulatedLog::new(1);
        for i in 0..100u8 {
            assert_eq!(log.append(&[i]).expect("append"), u64::from(i));
        }
        for i in 0..100u8 {
            assert_eq!(log.read(u64::from(i)).expect("read"), vec![i]);
        }
        let stats = log.stats().expect("stats");
        assert_eq!(stats.appends, 100);
        assert_eq!(stats.reads, 100);
        assert_eq!(stats.injected_read_errors, 0);
        assert_eq!(stats.injected_append_errors, 0);
    }

    #[test]
    fn test_failed_append_writes_nothing() {
        let log = SimulatedLog::with_config(
            7,
            FaultConfig {
                read_error_rate: 0.0,
                append_error_rate: 1.0,
            },
        );
        assert!(matches!(log.append(b"x"), Err(LogError::Injected(_))));
        assert_eq!(log.len(), 0);
        assert_eq!(log.stats().expect("stats").injected_append_errors, 1);
    }

    #[test]
    fn test_pause_suspends_faults() {
        let log = SimulatedLog::with_config(
            7,
            FaultConfig {
                read_error_rate: 1.0,
                append_error_rate: 1.0,
            },
        );
        log.pause();
        log.append(b"x").expect("append while paused");
        log.read(0).expect("read while paused");
        log.resume();
        assert!(log.read(0).is_err());
    }

    #[test]
    fn test_same_seed_same_faults() {
        let run = |seed| {
            let log = SimulatedLog::with_config(seed, FaultConfig::high_faults());
            (0..500)
                .map(|i: u32| log.append(&i.to_le_bytes()).is_ok())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(42), run(42));
        assert!(run(42).iter().any(|ok| !ok));
    }
}
