//! End-to-end tests at the typed view level.
//!
//! Each test file covers a specific scenario, driving a [`crate::Bee`]
//! over a real log and checking what callers observe.

#![cfg(test)]

mod helpers;

mod test_file_persistence;
mod test_header;
mod test_history;
mod test_key_order;
mod test_log_handle;
mod test_out_of_bounds;
mod test_readonly;
mod test_short_iterators;
mod test_snapshots;
mod test_sub;
