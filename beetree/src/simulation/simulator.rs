//! Main simulator harness for deterministic simulation testing.
//!
//! The simulator drives a [`Tree`] over a [`SimulatedLog`] with random
//! batches of puts and deletes, mirrors every successful commit in a
//! `BTreeMap` model, and after each batch checks the latest version and one
//! older version against the models recorded for them.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::codec::ByteOrder;
use crate::config::TreeConfig;
use crate::storage::{Log, LogError};
use crate::tree::{Change, CodecIds, Head, HistoryCursor, Tree, TreeError};

use super::invariants::{InvariantChecker, InvariantViolation};
use super::storage::{FaultConfig, SimulatedLog};

type Model = BTreeMap<Vec<u8>, Vec<u8>>;

/// Shape of the random workload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkloadConfig {
    /// Tree order.
    pub order: usize,
    /// Number of distinct keys operations draw from.
    pub key_space: u32,
    /// Largest number of operations in one batch.
    pub max_batch_size: usize,
    /// Probability that an operation is a delete (0.0 - 1.0).
    pub delete_rate: f64,
    /// Number of old versions kept for snapshot checks.
    pub snapshot_capacity: usize,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            order: 4,
            key_space: 256,
            max_batch_size: 16,
            delete_rate: 0.3,
            snapshot_capacity: 16,
        }
    }
}

/// Configuration for the simulator.
#[derive(Debug, Clone, Copy)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility.
    pub seed: u64,
    /// Fault injection configuration.
    pub fault_config: FaultConfig,
    /// Workload configuration.
    pub workload: WorkloadConfig,
}

impl SimulatorConfig {
    /// Create a new simulator config with the given seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            fault_config: FaultConfig::default(),
            workload: WorkloadConfig::default(),
        }
    }

    /// Set the fault configuration.
    #[must_use]
    pub const fn with_fault_config(mut self, config: FaultConfig) -> Self {
        self.fault_config = config;
        self
    }

    /// Set the workload configuration.
    #[must_use]
    pub const fn with_workload(mut self, workload: WorkloadConfig) -> Self {
        self.workload = workload;
        self
    }

    /// Set the tree order.
    #[must_use]
    pub const fn with_order(mut self, order: usize) -> Self {
        self.workload.order = order;
        self
    }
}

/// Results from a simulation run.
#[derive(Debug)]
pub struct SimulationResult {
    /// The seed used for this simulation.
    pub seed: u64,
    /// Number of batches attempted.
    pub batches_run: u64,
    /// Number of batches that created a version.
    pub successful_commits: u64,
    /// Number of batches with no effective change.
    pub noop_batches: u64,
    /// Number of batches that failed on an injected fault.
    pub failed_commits: u64,
    /// Number of faults the log injected.
    pub injected_faults: u64,
    /// Invariant violations detected.
    pub invariant_violations: Vec<InvariantViolation>,
    /// Whether the simulation ran to the end.
    pub completed_successfully: bool,
    /// Error message if simulation failed.
    pub error: Option<String>,
}

impl SimulationResult {
    /// Check if the simulation passed (no invariant violations).
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.completed_successfully && self.invariant_violations.is_empty()
    }
}

/// The main simulator harness.
pub struct Simulator {
    config: SimulatorConfig,
    rng: StdRng,
    checker: InvariantChecker,
    model: Model,
    snapshots: Vec<(Head, Model)>,
    batches_run: u64,
    successful_commits: u64,
    noop_batches: u64,
    failed_commits: u64,
}

impl Simulator {
    /// Create a new simulator with the given configuration.
    #[must_use]
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            checker: InvariantChecker::new(),
            model: Model::new(),
            snapshots: Vec::new(),
            batches_run: 0,
            successful_commits: 0,
            noop_batches: 0,
            failed_commits: 0,
        }
    }

    /// Run the simulation for a given number of batches on a fresh log.
    pub fn run(&mut self, batch_count: usize) -> SimulationResult {
        let log = Arc::new(SimulatedLog::with_config(
            self.config.seed.wrapping_add(1),
            self.config.fault_config,
        ));
        let config = TreeConfig::default().with_order(self.config.workload.order);
        let tree = match open_tree(log.clone(), &config) {
            Ok(tree) => Arc::new(tree),
            Err(e) => return self.result(&log, Some(format!("failed to open tree: {e}"))),
        };
        self.model.clear();
        self.snapshots.clear();
        self.snapshots.push((Head::default(), Model::new()));

        for _ in 0..batch_count {
            if let Err(e) = self.step(&tree, &log) {
                log.resume();
                return self.result(&log, Some(format!("batch {}: {e}", self.batches_run)));
            }
        }

        let error = self.check_reopen(&tree, &log).err().map(|e| e.to_string());
        self.result(&log, error)
    }

    /// Apply one random batch, then verify.
    fn step(&mut self, tree: &Arc<Tree>, log: &SimulatedLog) -> Result<(), TreeError> {
        self.batches_run += 1;
        let batch = self.next_batch();
        let base = tree.head()?;
        let effective = batch
            .iter()
            .filter(|(key, value)| value.is_some() || self.model.contains_key(*key))
            .count();
        let changes = batch
            .iter()
            .map(|(key, value)| Change {
                key: key.clone(),
                value: value.clone(),
            })
            .collect();

        match tree.flush(base, changes) {
            Ok(head) if head.version == base.version => {
                self.noop_batches += 1;
                if effective > 0 {
                    self.violation(head, "Effective batch created no version", effective);
                }
            }
            Ok(head) => {
                self.successful_commits += 1;
                for (key, value) in batch {
                    match value {
                        Some(value) => self.model.insert(key, value),
                        None => self.model.remove(&key),
                    };
                }
                log.pause();
                let recorded = HistoryCursor::new(tree.clone(), head, base.version, true).count();
                log.resume();
                if recorded != effective {
                    self.violation(head, "Commit recorded wrong number of changes", recorded);
                }
                self.remember(head);
            }
            Err(TreeError::Log(LogError::Injected(_))) => self.failed_commits += 1,
            Err(e) => return Err(e),
        }

        log.pause();
        let verified = self.verify(tree);
        log.resume();
        verified
    }

    /// Check the latest version and one random older version.
    fn verify(&mut self, tree: &Tree) -> Result<(), TreeError> {
        let head = tree.head()?;
        self.checker.check_version(tree, head, &self.model)?;

        if !self.snapshots.is_empty() {
            let index = self.rng.random_range(0..self.snapshots.len());
            let (old, model) = &self.snapshots[index];
            self.checker.check_version(tree, *old, model)?;
        }
        Ok(())
    }

    /// A reopened tree over the same blocks must resolve the same head.
    fn check_reopen(&mut self, tree: &Tree, log: &SimulatedLog) -> Result<(), TreeError> {
        let inner: Arc<dyn Log> = log.inner().clone();
        let config = TreeConfig::default().with_order(self.config.workload.order);
        let reopened = open_tree(inner, &config)?;
        let (expected, actual) = (tree.head()?, reopened.head()?);
        if expected != actual {
            self.checker.add_violation(InvariantViolation {
                description: "Reopened tree resolved a different head".to_string(),
                version: expected.version,
                context: format!("reopened at version {}", actual.version),
            });
        }
        Ok(())
    }

    /// Record `head` for later snapshot checks, evicting a random old one
    /// when full.
    fn remember(&mut self, head: Head) {
        let snapshot = (head, self.model.clone());
        if self.snapshots.len() < self.config.workload.snapshot_capacity {
            self.snapshots.push(snapshot);
        } else if !self.snapshots.is_empty() {
            let index = self.rng.random_range(0..self.snapshots.len());
            self.snapshots[index] = snapshot;
        }
    }

    fn next_batch(&mut self) -> BTreeMap<Vec<u8>, Option<Vec<u8>>> {
        let workload = self.config.workload;
        let size = self.rng.random_range(1..=workload.max_batch_size.max(1));
        let mut batch = BTreeMap::new();
        for _ in 0..size {
            let key = format!("key-{:06}", self.rng.random_range(0..workload.key_space.max(1)));
            let value = if self.rng.random_bool(workload.delete_rate) {
                None
            } else {
                Some(self.rng.random::<u64>().to_le_bytes().to_vec())
            };
            batch.insert(key.into_bytes(), value);
        }
        batch
    }

    fn violation(&mut self, head: Head, description: &str, count: usize) {
        self.checker.add_violation(InvariantViolation {
            description: description.to_string(),
            version: head.version,
            context: format!("count {count}"),
        });
    }

    fn result(&mut self, log: &SimulatedLog, error: Option<String>) -> SimulationResult {
        let injected_faults = log
            .stats()
            .map_or(0, |s| s.injected_read_errors + s.injected_append_errors);
        SimulationResult {
            seed: self.config.seed,
            batches_run: self.batches_run,
            successful_commits: self.successful_commits,
            noop_batches: self.noop_batches,
            failed_commits: self.failed_commits,
            injected_faults,
            invariant_violations: self.checker.take_violations(),
            completed_successfully: error.is_none(),
            error,
        }
    }

    /// Get the invariant checker.
    #[must_use]
    pub const fn checker(&self) -> &InvariantChecker {
        &self.checker
    }
}

fn open_tree(log: Arc<dyn Log>, config: &TreeConfig) -> Result<Tree, TreeError> {
    Tree::open(
        log,
        config,
        Arc::new(ByteOrder),
        CodecIds {
            key: "binary",
            value: "binary",
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulator_basic() {
        let mut simulator = Simulator::new(SimulatorConfig::new(12345));

        let result = simulator.run(100);

        assert!(result.passed(), "{:?}", result.invariant_violations);
        assert_eq!(result.batches_run, 100);
        assert_eq!(result.successful_commits + result.noop_batches, 100);
        assert_eq!(result.failed_commits, 0);
        assert_eq!(result.injected_faults, 0);
    }

    #[test]
    fn test_simulator_deterministic() {
        let config = SimulatorConfig::new(12345).with_fault_config(FaultConfig::high_faults());
        let result1 = Simulator::new(config).run(50);
        let result2 = Simulator::new(config).run(50);

        assert_eq!(result1.successful_commits, result2.successful_commits);
        assert_eq!(result1.failed_commits, result2.failed_commits);
        assert_eq!(result1.injected_faults, result2.injected_faults);
    }

    #[test]
    fn test_faults_do_not_break_invariants() {
        let config = SimulatorConfig::new(777).with_fault_config(FaultConfig::high_faults());
        let mut simulator = Simulator::new(config);

        let result = simulator.run(200);

        assert!(result.passed(), "{result:?}");
        assert!(result.failed_commits > 0);
        assert!(result.successful_commits > 0);
    }

    #[test]
    fn test_smallest_order_with_heavy_deletes() {
        let workload = WorkloadConfig {
            order: 3,
            key_space: 64,
            delete_rate: 0.6,
            ..WorkloadConfig::default()
        };
        let config = SimulatorConfig::new(4242).with_workload(workload);
        let mut simulator = Simulator::new(config);

        let result = simulator.run(300);

        assert!(result.passed(), "{:?}", result.invariant_violations);
    }

    #[test]
    fn test_simulator_no_invariant_violations_across_orders() {
        for order in [3, 4, 5, 8, 32] {
            let config = SimulatorConfig::new(54321).with_order(order);
            let result = Simulator::new(config).run(150);
            assert!(
                result.passed(),
                "order {order}: {:?}",
                result.invariant_violations
            );
        }
    }

    #[test]
    #[ignore] // Long running test
    fn test_simulator_stress() {
        let config = SimulatorConfig::new(99999).with_fault_config(FaultConfig::low_faults());
        let mut simulator = Simulator::new(config);

        let result = simulator.run(10_000);

        assert!(result.passed(), "{result:?}");
    }
}
