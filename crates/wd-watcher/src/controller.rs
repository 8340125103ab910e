//! Lifecycle controller owning at most one watch session.
//!
//! State machine:
//!
//! ```text
//!            start()                 ready
//!  Stopped ──────────► Starting ──────────────► Running
//!     ▲                   │ init error             │ stop() / update_dirs()
//!     │                   ▼                        ▼
//!     └─────────────── Stopped ◄──── joined ─── Stopping
//! ```
//!
//! Lifecycle operations are serialised by an async mutex, so a new session is
//! never started before the previous one has finished its final flush.
//! [`WatchController::dirs`] and [`WatchController::state`] read a snapshot
//! and never wait on a running operation.

use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{info, warn, Instrument, Span};
use wd_core::{dedup_dirs, validate_dirs, ConfigError};

use crate::error::WatchError;
use crate::session::{Backend, NotifyBackend, Session};

/// Where the controller is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LifecycleState {
    /// No session.
    #[default]
    Stopped,
    /// A session is being created and registered.
    Starting,
    /// A session is watching.
    Running,
    /// The session is flushing and winding down.
    Stopping,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        })
    }
}

#[derive(Debug, Default)]
struct Status {
    state: LifecycleState,
    dirs: Vec<Utf8PathBuf>,
    grace_period: Option<Duration>,
}

/// Starts, stops, and reconfigures the watch engine.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use camino::Utf8PathBuf;
/// use wd_watcher::WatchController;
///
/// # async fn example() -> Result<(), wd_watcher::WatchError> {
/// let controller = WatchController::new(tracing::info_span!("adwatchd"));
/// controller
///     .start(&[Utf8PathBuf::from("/srv/sysvol")], Duration::from_secs(10))
///     .await?;
///
/// controller
///     .update_dirs(&[Utf8PathBuf::from("/srv/sysvol"), Utf8PathBuf::from("/srv/other")])
///     .await?;
///
/// controller.stop().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct WatchController {
    span: Span,
    backend: Arc<dyn Backend>,
    session: Mutex<Option<Session>>,
    status: RwLock<Status>,
}

impl Default for WatchController {
    fn default() -> Self {
        Self::new(Span::none())
    }
}

impl WatchController {
    /// Creates a stopped controller. Sessions log inside a child span of `span`.
    #[must_use]
    pub fn new(span: Span) -> Self {
        Self::with_backend(span, Arc::new(NotifyBackend))
    }

    pub(crate) fn with_backend(span: Span, backend: Arc<dyn Backend>) -> Self {
        Self {
            span,
            backend,
            session: Mutex::new(None),
            status: RwLock::new(Status::default()),
        }
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.status.read().state
    }

    /// Returns `true` if a session is watching.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    /// Returns the directories of the active session, or an empty list.
    #[must_use]
    pub fn dirs(&self) -> Vec<Utf8PathBuf> {
        self.status.read().dirs.clone()
    }

    /// Returns the grace period of the active session.
    #[must_use]
    pub fn grace_period(&self) -> Option<Duration> {
        self.status.read().grace_period
    }

    /// Starts watching `dirs`, returning once the session is ready.
    ///
    /// Duplicate directories are dropped, keeping the first occurrence.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::AlreadyRunning`] if a session is active,
    /// [`ConfigError::NoDirectories`] if `dirs` is empty, and any
    /// initialization error of the session. No session is left behind on
    /// error.
    pub async fn start(&self, dirs: &[Utf8PathBuf], grace_period: Duration) -> Result<(), WatchError> {
        let mut slot = self.session.lock().await;
        if slot.is_some() {
            return Err(WatchError::AlreadyRunning);
        }
        self.start_locked(&mut slot, dedup_dirs(dirs), grace_period)
            .instrument(self.span.clone())
            .await
    }

    /// Stops the active session, returning once its final flush is done.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::NotRunning`] if there is no session and
    /// [`WatchError::SessionAborted`] if the session task panicked.
    pub async fn stop(&self) -> Result<(), WatchError> {
        let mut slot = self.session.lock().await;
        self.stop_locked(&mut slot)
            .instrument(self.span.clone())
            .await
    }

    /// Replaces the watched directories by stopping and restarting the session.
    ///
    /// The new list is validated before the running session is touched. If
    /// the new session fails to start, the previous directory list is
    /// restarted once and the start error is returned.
    ///
    /// # Errors
    ///
    /// Returns a [`WatchError::Config`] error if a directory is missing or
    /// not a directory, [`WatchError::NotRunning`] if there is no session,
    /// or the error that prevented the new session from starting.
    pub async fn update_dirs(&self, dirs: &[Utf8PathBuf]) -> Result<(), WatchError> {
        validate_dirs(dirs)?;

        let mut slot = self.session.lock().await;
        let (previous, grace_period) = match slot.as_ref() {
            Some(session) => (session.dirs().to_vec(), session.grace_period()),
            None => return Err(WatchError::NotRunning),
        };

        self.replace_locked(&mut slot, previous, dedup_dirs(dirs), grace_period)
            .instrument(self.span.clone())
            .await
    }

    async fn replace_locked(
        &self,
        slot: &mut Option<Session>,
        previous: Vec<Utf8PathBuf>,
        dirs: Vec<Utf8PathBuf>,
        grace_period: Duration,
    ) -> Result<(), WatchError> {
        info!(from = ?previous, to = ?dirs, "Updating watched directories");
        self.stop_locked(slot).await?;

        let Err(err) = self.start_locked(slot, dirs, grace_period).await else {
            return Ok(());
        };

        warn!(error = %err, "New directories failed to start, restoring previous list");
        match self.start_locked(slot, previous, grace_period).await {
            Ok(()) => info!("Previous directories restored"),
            Err(rollback) => warn!(error = %rollback, "Failed to restore previous directories"),
        }
        Err(err)
    }

    async fn start_locked(
        &self,
        slot: &mut Option<Session>,
        dirs: Vec<Utf8PathBuf>,
        grace_period: Duration,
    ) -> Result<(), WatchError> {
        if dirs.is_empty() {
            return Err(ConfigError::NoDirectories.into());
        }

        self.set_state(LifecycleState::Starting);
        info!(dirs = ?dirs, ?grace_period, "Starting watcher");

        match Session::start(dirs, grace_period, Arc::clone(&self.backend), &self.span).await {
            Ok(session) => {
                let mut status = self.status.write();
                status.state = LifecycleState::Running;
                status.dirs = session.dirs().to_vec();
                status.grace_period = Some(grace_period);
                drop(status);

                *slot = Some(session);
                info!("Watcher started");
                Ok(())
            }
            Err(err) => {
                self.set_stopped();
                Err(err)
            }
        }
    }

    async fn stop_locked(&self, slot: &mut Option<Session>) -> Result<(), WatchError> {
        let Some(session) = slot.take() else {
            return Err(WatchError::NotRunning);
        };

        self.set_state(LifecycleState::Stopping);
        info!("Stopping watcher");
        let result = session.stop().await;
        self.set_stopped();

        if result.is_ok() {
            info!("Watcher stopped");
        }
        result
    }

    fn set_state(&self, state: LifecycleState) {
        self.status.write().state = state;
    }

    fn set_stopped(&self) {
        *self.status.write() = Status::default();
    }
}
