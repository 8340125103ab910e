//! Error types for the wd-watcher crate.
//!
//! This module provides the [`WatchError`] type for errors that can occur
//! while starting, running, or reconfiguring a watch session.

use camino::Utf8PathBuf;
use wd_core::ConfigError;

/// Errors that can occur during watch operations.
///
/// # Error Recovery Strategy
///
/// - **Notify errors** ([`WatchError::Notify`]): Fatal at start, logged at runtime
/// - **Walk errors** ([`WatchError::Walk`]): Fatal during initial registration,
///   logged when registering a directory created later
/// - **Session aborted** ([`WatchError::SessionAborted`]): Fatal
/// - **Invalid directories** ([`WatchError::Config`]): Rejected before any state change
/// - **Lifecycle misuse** ([`WatchError::NotRunning`], [`WatchError::AlreadyRunning`]):
///   Reported to the caller, no state change
/// - **I/O, counter and non-UTF-8 errors**: Recoverable - logged, watching continues
///
/// # Examples
///
/// ```
/// use wd_watcher::WatchError;
///
/// fn handle_error(err: WatchError) {
///     if err.is_fatal() {
///         eprintln!("Fatal watcher error: {err}");
///     } else {
///         eprintln!("Warning: {err}");
///     }
/// }
/// ```
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Failed to create the notification engine or subscribe a path.
    #[error("notify watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// Failed to walk a directory tree while subscribing it.
    #[error("can't watch directory and children of {path}: {source}")]
    Walk {
        /// The directory being registered.
        path: Utf8PathBuf,
        /// The underlying traversal error.
        #[source]
        source: ignore::Error,
    },

    /// The requested directories are not usable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A lifecycle operation needed an active session and there is none.
    #[error("the watcher is already stopping or not running")]
    NotRunning,

    /// `start` was called while a session is already active.
    #[error("the watcher is already running")]
    AlreadyRunning,

    /// The session task ended before reporting readiness, or panicked.
    #[error("watch session aborted: {0}")]
    SessionAborted(String),

    /// The counter file exists but its contents are not usable.
    #[error("malformed counter file {path}: {reason}")]
    Counter {
        /// The counter file path.
        path: Utf8PathBuf,
        /// What is wrong with the contents.
        reason: String,
    },

    /// An I/O error occurred on a specific path.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// The path being read or written.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A path is not valid UTF-8.
    ///
    /// Such paths are logged and skipped.
    #[error("path is not valid UTF-8: {}", _0.display())]
    NonUtf8Path(std::path::PathBuf),
}

impl WatchError {
    /// Creates a new [`WatchError::Walk`] error.
    #[inline]
    pub fn walk(path: impl Into<Utf8PathBuf>, source: ignore::Error) -> Self {
        Self::Walk {
            path: path.into(),
            source,
        }
    }

    /// Creates a new [`WatchError::Io`] error.
    #[inline]
    pub fn io(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a new [`WatchError::Counter`] error.
    #[inline]
    pub fn counter(path: impl Into<Utf8PathBuf>, reason: impl Into<String>) -> Self {
        Self::Counter {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error is recoverable (watching can continue).
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Counter { .. } | Self::NonUtf8Path(_)
        )
    }

    /// Returns `true` if this error is fatal (the operation was aborted).
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }

    /// Returns the path associated with this error, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Utf8PathBuf> {
        match self {
            Self::Walk { path, .. } | Self::Counter { path, .. } | Self::Io { path, .. } => {
                Some(path)
            }
            Self::Config(err) => err.path(),
            Self::Notify(_)
            | Self::NotRunning
            | Self::AlreadyRunning
            | Self::SessionAborted(_)
            | Self::NonUtf8Path(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::path::PathBuf;

    #[test]
    fn test_watch_error_not_running() {
        let err = WatchError::NotRunning;
        assert!(err.is_fatal());
        assert!(err.path().is_none());
        insta::assert_snapshot!(err.to_string(), @"the watcher is already stopping or not running");
    }

    #[test]
    fn test_watch_error_config_is_transparent() {
        let err = WatchError::from(ConfigError::MissingDirectory(Utf8PathBuf::from("/gone")));
        assert!(err.is_fatal());
        assert_eq!(err.path().map(|p| p.as_str()), Some("/gone"));
        insta::assert_snapshot!(err.to_string(), @"directory /gone does not exist");
    }

    #[test]
    fn test_watch_error_counter() {
        let err = WatchError::counter("/srv/a/gpt.ini", "missing [General] Version");
        assert!(err.is_recoverable());
        assert_eq!(err.path().map(|p| p.as_str()), Some("/srv/a/gpt.ini"));
        assert!(err.to_string().contains("missing [General] Version"));
    }

    #[test]
    fn test_watch_error_io() {
        let err = WatchError::io(
            "/srv/a/gpt.ini",
            io::Error::new(io::ErrorKind::PermissionDenied, "access denied"),
        );
        assert!(err.is_recoverable());
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("access denied"));
    }

    #[test]
    fn test_watch_error_non_utf8() {
        let err = WatchError::NonUtf8Path(PathBuf::from("test"));
        assert!(err.is_recoverable());
        assert!(err.path().is_none());
        assert!(err.to_string().contains("not valid UTF-8"));
    }

    #[test]
    fn test_watch_error_session_aborted() {
        let err = WatchError::SessionAborted("task panicked".to_owned());
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "watch session aborted: task panicked");
    }
}
