//! Core configuration types and errors for the adwatchd workspace.
//!
//! This crate provides the pieces shared by the watch engine and the
//! command-line front end:
//!
//! - [`Config`] / [`WatchConfig`] - root directories and grace period
//! - [`ConfigError`] - loading and validation failures
//! - Constants describing the per-root counter file

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod error;

pub use config::{dedup_dirs, validate_dirs, Config, WatchConfig, DEFAULT_GRACE_PERIOD_MS};
pub use error::ConfigError;

/// Basename of the per-root version counter file.
///
/// Matched case-insensitively when filtering events, so an existing
/// `GPT.ini` is recognised as the counter file too.
pub const COUNTER_FILE_NAME: &str = "gpt.ini";

/// Section of the counter file holding the version key.
pub const COUNTER_SECTION: &str = "General";

/// Key of the counter file holding the version number.
pub const COUNTER_KEY: &str = "Version";
