//! Common helpers for end-to-end tests.

use crate::view::ReadOptions;

/// Bounds of one combination of the short-iterator sweep.
pub struct Sweep<'a> {
    pub lower: &'a str,
    pub lower_inclusive: bool,
    pub upper: &'a str,
    pub upper_inclusive: bool,
    pub reverse: bool,
}

impl<'a> Sweep<'a> {
    /// Decode combination `k` of the eight gt/gte × lt/lte × reverse choices.
    pub const fn new(lower: &'a str, upper: &'a str, k: u8) -> Self {
        Self {
            lower,
            lower_inclusive: k & 1 == 1,
            upper,
            upper_inclusive: (k >> 1) & 1 == 1,
            reverse: (k >> 2) & 1 == 1,
        }
    }

    pub fn options(&self) -> ReadOptions<'a, str> {
        let options = ReadOptions::new().reverse(self.reverse);
        let options = if self.lower_inclusive {
            options.gte(self.lower)
        } else {
            options.gt(self.lower)
        };
        if self.upper_inclusive {
            options.lte(self.upper)
        } else {
            options.lt(self.upper)
        }
    }

    /// Keys of `reference` inside the bounds, in read order.
    pub fn expected(&self, reference: &[String]) -> Vec<String> {
        let above = |key: &str| {
            if self.lower_inclusive {
                key >= self.lower
            } else {
                key > self.lower
            }
        };
        let below = |key: &str| {
            if self.upper_inclusive {
                key <= self.upper
            } else {
                key < self.upper
            }
        };
        let mut keys: Vec<String> = reference
            .iter()
            .filter(|key| above(key.as_str()) && below(key.as_str()))
            .cloned()
            .collect();
        if self.reverse {
            keys.reverse();
        }
        keys
    }
}

/// The keys `"0"..size` in byte order.
pub fn sorted_reference(size: usize) -> Vec<String> {
    let mut reference: Vec<String> = (0..size).map(|i| i.to_string()).collect();
    reference.sort();
    reference
}
