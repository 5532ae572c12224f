//! Site configuration via `mdbc.toml`
//!
//! A default `mdbc.toml` is written next to the site's data on first start.
//! To change settings, edit the file and restart.

use mdbc_core::error::{MdbcError, MdbcResult};
use mdbc_core::types::Range;
use mdbc_ownership::DEFAULT_WARMUP_MAX_RESTARTS;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

/// Config file name placed in the site's data directory.
pub const CONFIG_FILE_NAME: &str = "mdbc.toml";

/// Default ownership timeout: five hours.
pub const DEFAULT_OWNERSHIP_TIMEOUT_MS: u64 = 5 * 60 * 60 * 1000;

/// Default sleep between digest daemon flushes.
pub const DEFAULT_TX_DAEMON_SLEEP_S: u64 = 10;

/// Site configuration loaded from `mdbc.toml`.
///
/// # Example
///
/// ```toml
/// ownership_timeout_ms = 18000000
/// tx_daemon_sleep_s = 10
/// write_locks_only = false
/// warmup_ranges = ["shop.orders", "shop.customers"]
/// eventual_ranges = ["shop.audit_log"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MdbcConfig {
    /// How long one ownership operation may spend replaying before giving up.
    pub ownership_timeout_ms: u64,
    /// Seconds the digest daemon sleeps between flushes.
    pub tx_daemon_sleep_s: u64,
    /// Request a write lock for every statement, regardless of classification.
    pub write_locks_only: bool,
    /// Fixed set of ranges to warm up. When absent, every local range except
    /// the eventually-consistent ones is warmed up.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warmup_ranges: Option<Vec<String>>,
    /// Ranges whose replay order is not safety-critical.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eventual_ranges: Option<Vec<String>>,
    /// Database used to qualify unqualified table names.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_database: Option<String>,
    /// Graph rebuilds a single warm-up may go through before giving up.
    pub warmup_max_restarts: usize,
}

impl Default for MdbcConfig {
    fn default() -> Self {
        Self {
            ownership_timeout_ms: DEFAULT_OWNERSHIP_TIMEOUT_MS,
            tx_daemon_sleep_s: DEFAULT_TX_DAEMON_SLEEP_S,
            write_locks_only: false,
            warmup_ranges: None,
            eventual_ranges: None,
            default_database: None,
            warmup_max_restarts: DEFAULT_WARMUP_MAX_RESTARTS,
        }
    }
}

impl MdbcConfig {
    /// Ownership timeout as a `Duration`.
    pub fn ownership_timeout(&self) -> Duration {
        Duration::from_millis(self.ownership_timeout_ms)
    }

    /// Digest daemon interval as a `Duration`.
    pub fn tx_daemon_sleep(&self) -> Duration {
        Duration::from_secs(self.tx_daemon_sleep_s)
    }

    /// Parsed `warmup_ranges`, if configured.
    ///
    /// # Errors
    ///
    /// Returns `MdbcError::Config` if an entry is not a valid range.
    pub fn warmup_range_set(&self) -> MdbcResult<Option<BTreeSet<Range>>> {
        self.warmup_ranges
            .as_deref()
            .map(|names| parse_ranges("warmup_ranges", names))
            .transpose()
    }

    /// Parsed `eventual_ranges`; empty when not configured.
    ///
    /// # Errors
    ///
    /// Returns `MdbcError::Config` if an entry is not a valid range.
    pub fn eventual_range_set(&self) -> MdbcResult<BTreeSet<Range>> {
        match self.eventual_ranges.as_deref() {
            Some(names) => parse_ranges("eventual_ranges", names),
            None => Ok(BTreeSet::new()),
        }
    }

    /// Check every value, the way `from_file` does.
    ///
    /// # Errors
    ///
    /// Returns `MdbcError::Config` describing the first invalid value.
    pub fn validate(&self) -> MdbcResult<()> {
        if self.ownership_timeout_ms == 0 {
            return Err(MdbcError::Config(
                "ownership_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.tx_daemon_sleep_s == 0 {
            return Err(MdbcError::Config(
                "tx_daemon_sleep_s must be greater than zero".to_string(),
            ));
        }
        if let Some(db) = &self.default_database {
            if db.trim().is_empty() || db.contains('.') {
                return Err(MdbcError::Config(format!(
                    "Invalid default_database '{}'",
                    db
                )));
            }
        }
        self.warmup_range_set()?;
        self.eventual_range_set()?;
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# mdbc site configuration
#
# How long one ownership operation may spend replaying digests before it
# gives up (milliseconds, default: 5 hours).
ownership_timeout_ms = 18000000

# Seconds between digest daemon flushes (default: 10).
tx_daemon_sleep_s = 10

# Request a write lock for every statement, even reads (default: false).
write_locks_only = false

# Graph rebuilds one warm-up may go through before giving up (default: 64).
warmup_max_restarts = 64

# Fixed set of ranges to warm up. When unset, every table known to the local
# store is warmed up except the eventually-consistent ones.
# warmup_ranges = ["shop.orders", "shop.customers"]

# Ranges whose replay order is not safety-critical.
# eventual_ranges = ["shop.audit_log"]

# Database used to qualify unqualified table names.
# default_database = "shop"
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> MdbcResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MdbcError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: MdbcConfig = toml::from_str(&content).map_err(|e| {
            MdbcError::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> MdbcResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                MdbcError::Config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> MdbcResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| MdbcError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            MdbcError::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}

fn parse_ranges(key: &str, names: &[String]) -> MdbcResult<BTreeSet<Range>> {
    names
        .iter()
        .map(|name| {
            Range::parse(name)
                .map_err(|e| MdbcError::Config(format!("Invalid entry in {}: {}", key, e)))
        })
        .collect()
}
