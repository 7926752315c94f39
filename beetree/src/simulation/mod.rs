//! Deterministic Simulation Testing (DST) infrastructure.
//!
//! This module provides tools for testing the tree with:
//! - An in-memory log with fault injection
//! - Reproducible random batches of puts and deletes
//! - Structural invariant checks after every batch
//! - Snapshot checks of older versions against recorded models
//!
//! # Design Principles
//!
//! 1. All I/O goes through the [`Log`](crate::storage::Log) trait and can be simulated
//! 2. All randomness is seeded for reproducibility
//! 3. Faults can be injected at any block read or append
//! 4. Given the same seed, execution is identical
//!
//! # Usage
//!
//! ```
//! use beetree::simulation::{FaultConfig, Simulator, SimulatorConfig};
//!
//! let config = SimulatorConfig::new(12345) // seed
//!     .with_fault_config(FaultConfig::low_faults());
//!
//! let mut sim = Simulator::new(config);
//! let result = sim.run(50); // Run 50 batches
//!
//! assert!(result.passed());
//! ```

mod invariants;
mod simulator;
mod storage;

pub use invariants::{InvariantChecker, InvariantViolation};
pub use simulator::{SimulationResult, Simulator, SimulatorConfig, WorkloadConfig};
pub use storage::{FaultConfig, SimulatedLog, SimulatedLogStats};
