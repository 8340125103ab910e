//! Configuration structures for the adwatchd daemon.
//!
//! - [`WatchConfig`] - root directories and debounce grace period
//! - [`Config`] - root configuration loaded from a JSON file
//!
//! All configuration types implement [`Default`]; missing fields in a
//! configuration file fall back to these defaults.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default quiet period before a counter is bumped, in milliseconds.
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 10_000;

/// Configuration for the watch engine.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use wd_core::WatchConfig;
///
/// let config = WatchConfig::default();
/// assert!(config.dirs.is_empty());
/// assert_eq!(config.grace_period(), Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Root directories to monitor, in priority order.
    pub dirs: Vec<Utf8PathBuf>,

    /// Quiet period after the last change before bumping, in milliseconds.
    ///
    /// Bursts of changes closer together than this are coalesced into a
    /// single version increment.
    pub grace_period_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            dirs: Vec::new(),
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
        }
    }
}

impl WatchConfig {
    /// Returns the grace period as a [`Duration`].
    #[inline]
    #[must_use]
    pub const fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Returns the configured directories with duplicates removed.
    ///
    /// The first occurrence of each directory keeps its position.
    #[must_use]
    pub fn unique_dirs(&self) -> Vec<Utf8PathBuf> {
        dedup_dirs(&self.dirs)
    }

    /// Validates the directory list and grace period.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::NoDirectories`] if no directory is configured
    /// - [`ConfigError::MissingDirectory`] if a directory does not exist
    /// - [`ConfigError::InvalidPath`] if a path is not a directory
    /// - [`ConfigError::InvalidOption`] if the grace period is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_dirs(&self.dirs)?;
        if self.grace_period_ms == 0 {
            return Err(ConfigError::invalid_option(
                "grace_period_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Root configuration for the daemon.
///
/// # Examples
///
/// ```
/// use wd_core::Config;
///
/// let config: Config = serde_json::from_str(r#"{"watch": {"dirs": ["/srv/sysvol"]}}"#).unwrap();
/// assert_eq!(config.watch.dirs.len(), 1);
/// assert_eq!(config.verbose, 0);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Watch engine configuration.
    pub watch: WatchConfig,

    /// Verbosity level (0 = info, 1 = debug, 2+ = trace).
    pub verbose: u8,
}

impl Config {
    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read and
    /// [`ConfigError::Parse`] if it is not valid configuration JSON.
    pub fn from_file(path: &Utf8Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_json(&contents)
    }

    /// Parses a configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the string is not valid configuration JSON.
    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Validates the whole configuration.
    ///
    /// # Errors
    ///
    /// See [`WatchConfig::validate`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.watch.validate()
    }
}

/// Checks that `dirs` is non-empty and that every entry is an existing directory.
///
/// # Errors
///
/// Returns the first failure found, in list order.
pub fn validate_dirs(dirs: &[Utf8PathBuf]) -> Result<(), ConfigError> {
    if dirs.is_empty() {
        return Err(ConfigError::NoDirectories);
    }
    for dir in dirs {
        if !dir.exists() {
            return Err(ConfigError::MissingDirectory(dir.clone()));
        }
        if !dir.is_dir() {
            return Err(ConfigError::invalid_path(dir.clone(), "not a directory"));
        }
    }
    Ok(())
}

/// Removes duplicate directories, keeping the first occurrence of each.
#[must_use]
pub fn dedup_dirs(dirs: &[Utf8PathBuf]) -> Vec<Utf8PathBuf> {
    let mut unique: Vec<Utf8PathBuf> = Vec::with_capacity(dirs.len());
    for dir in dirs {
        if !unique.contains(dir) {
            unique.push(dir.clone());
        }
    }
    unique
}
