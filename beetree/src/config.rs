//! Tree configuration module.
//!
//! This module provides the settings a tree is opened with, loadable from
//! environment variables.
//!
//! # Environment Variables
//!
//! - `BEETREE_ORDER`: Tree order `M` (default: `8`)
//! - `BEETREE_PROTOCOL`: Protocol identifier written to the header (default: `beetree`)
//! - `BEETREE_SEPARATOR`: Namespace separator as hex bytes (default: `00`)
//! - `BEETREE_READONLY`: Open without ever writing (`true`/`false`, `1`/`0`; default: `false`)
//!
//! # Invariants
//!
//! After `validate()` succeeds:
//! - `order` is in `3..=1024`
//! - `protocol` and `separator` are non-empty

use crate::tree::node::{MAX_ORDER, MIN_ORDER};

/// Tree configuration.
///
/// The order only applies to a new log: a log that already has a header keeps
/// the order it was created with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeConfig {
    /// Maximum entries per leaf / children per internal node.
    pub order: usize,
    /// Protocol identifier. Must match the header of an existing log.
    pub protocol: String,
    /// Bytes placed between namespace segments.
    pub separator: Vec<u8>,
    /// Reject every write and never append a header.
    pub readonly: bool,
}

/// Error returned when loading or validating configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A setting has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            order: Self::DEFAULT_ORDER,
            protocol: Self::DEFAULT_PROTOCOL.to_string(),
            separator: vec![0x00],
            readonly: false,
        }
    }
}

impl TreeConfig {
    /// Default tree order.
    pub const DEFAULT_ORDER: usize = 8;
    /// Default protocol identifier.
    pub const DEFAULT_PROTOCOL: &'static str = "beetree";

    #[must_use]
    pub const fn with_order(mut self, order: usize) -> Self {
        self.order = order;
        self
    }

    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    #[must_use]
    pub fn with_separator(mut self, separator: impl Into<Vec<u8>>) -> Self {
        self.separator = separator.into();
        self
    }

    #[must_use]
    pub const fn with_readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    /// Check the invariants listed in the module docs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_ORDER..=MAX_ORDER).contains(&self.order) {
            return Err(invalid(
                "order",
                format!("{} is outside {MIN_ORDER}..={MAX_ORDER}", self.order),
            ));
        }
        if self.protocol.is_empty() {
            return Err(invalid("protocol", "must not be empty".to_string()));
        }
        if self.separator.is_empty() {
            return Err(invalid("separator", "must not be empty".to_string()));
        }
        Ok(())
    }

    /// Load configuration from environment variables.
    ///
    /// Unset variables fall back to the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to a malformed value, or the
    /// result fails `validate()`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup("BEETREE_ORDER") {
            config.order = value.parse().map_err(|_| {
                invalid("BEETREE_ORDER", format!("'{value}' is not a valid number"))
            })?;
        }
        if let Some(value) = lookup("BEETREE_PROTOCOL") {
            config.protocol = value;
        }
        if let Some(value) = lookup("BEETREE_SEPARATOR") {
            config.separator = parse_hex(&value).ok_or_else(|| {
                invalid("BEETREE_SEPARATOR", format!("'{value}' is not a hex byte string"))
            })?;
        }
        if let Some(value) = lookup("BEETREE_READONLY") {
            config.readonly = match value.as_str() {
                "true" | "1" => true,
                "false" | "0" => false,
                _ => {
                    return Err(invalid(
                        "BEETREE_READONLY",
                        format!("'{value}' is not a boolean"),
                    ));
                }
            };
        }

        config.validate()?;
        Ok(config)
    }
}

fn invalid(name: &str, message: String) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        message,
    }
}

/// Parse an even-length string of hex digits.
fn parse_hex(value: &str) -> Option<Vec<u8>> {
    if !value.len().is_multiple_of(2) || !value.is_ascii() {
        return None;
    }
    (0..value.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&value[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = TreeConfig::from_vars(vars(&[])).expect("defaults are valid");
        assert_eq!(config, TreeConfig::default());
        assert_eq!(config.order, 8);
        assert_eq!(config.protocol, "beetree");
        assert_eq!(config.separator, vec![0x00]);
        assert!(!config.readonly);
    }

    #[test]
    fn test_values_from_vars() {
        let config = TreeConfig::from_vars(vars(&[
            ("BEETREE_ORDER", "32"),
            ("BEETREE_PROTOCOL", "custom"),
            ("BEETREE_SEPARATOR", "2f2f"),
            ("BEETREE_READONLY", "1"),
        ]))
        .expect("valid config");

        assert_eq!(config.order, 32);
        assert_eq!(config.protocol, "custom");
        assert_eq!(config.separator, b"//".to_vec());
        assert!(config.readonly);
    }

    #[test]
    fn test_malformed_values_are_rejected() {
        let err = TreeConfig::from_vars(vars(&[("BEETREE_ORDER", "eight")])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value for BEETREE_ORDER: 'eight' is not a valid number"
        );

        assert!(TreeConfig::from_vars(vars(&[("BEETREE_ORDER", "2")])).is_err());
        assert!(TreeConfig::from_vars(vars(&[("BEETREE_SEPARATOR", "0")])).is_err());
        assert!(TreeConfig::from_vars(vars(&[("BEETREE_SEPARATOR", "zz")])).is_err());
        assert!(TreeConfig::from_vars(vars(&[("BEETREE_READONLY", "yes")])).is_err());
    }

    #[test]
    fn test_validate() {
        assert!(TreeConfig::default().with_order(1024).validate().is_ok());
        assert!(TreeConfig::default().with_order(1025).validate().is_err());
        assert!(TreeConfig::default().with_protocol("").validate().is_err());
        assert!(TreeConfig::default().with_separator(Vec::new()).validate().is_err());
    }
}
