//! The event loop of a watch session.
//!
//! A [`Coalescer`] consumes raw notifications, keeps the subscription set in
//! step with the tree, and collects the roots that changed. Every qualifying
//! change pushes the debounce deadline to `now + grace period`; once the
//! deadline passes without further changes, every dirty root has its counter
//! bumped exactly once.
//!
//! ```text
//!            ┌──────────── tokio::select! (biased) ────────────┐
//!            │ cancelled │ notify event / error │ deadline hit │
//!            └─────┬─────┴──────────┬───────────┴──────┬───────┘
//!                  │                │                  │
//!       flush if armed, exit   handle_event()        flush()
//! ```
//!
//! The loop is the only owner of the subscription set and the dirty-root
//! set, so neither needs a lock.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use smallvec::SmallVec;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn, Span};

use crate::counter;
use crate::error::WatchError;
use crate::events::{classify, ChangeKind, FileEvent};
use crate::registrar::{Registrar, Subscriber};
use crate::resolver::resolve_root;

/// Debounce state machine and per-session event loop.
pub struct Coalescer<S> {
    registrar: Registrar<S>,
    roots: Vec<Utf8PathBuf>,
    grace_period: Duration,
    dirty: SmallVec<[Utf8PathBuf; 4]>,
    deadline: Option<Instant>,
}

impl<S> std::fmt::Debug for Coalescer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coalescer")
            .field("roots", &self.roots)
            .field("grace_period", &self.grace_period)
            .field("dirty", &self.dirty)
            .field("deadline", &self.deadline)
            .field("registrar", &self.registrar)
            .finish()
    }
}

impl<S: Subscriber> Coalescer<S> {
    /// Creates a coalescer over `roots`. Nothing is subscribed yet.
    #[must_use]
    pub fn new(registrar: Registrar<S>, roots: Vec<Utf8PathBuf>, grace_period: Duration) -> Self {
        Self {
            registrar,
            roots,
            grace_period,
            dirty: SmallVec::new(),
            deadline: None,
        }
    }

    /// Performs the initial recursive subscription of every root.
    ///
    /// # Errors
    ///
    /// Returns the first registration failure; the session must not start.
    pub fn register_roots(&mut self) -> Result<(), WatchError> {
        for root in &self.roots {
            let added = self.registrar.register_tree(root)?;
            debug!(root = %root, added, "Root registered");
        }
        Ok(())
    }

    /// Returns the armed debounce deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the roots with unflushed changes, in the order they became dirty.
    #[must_use]
    pub fn dirty_roots(&self) -> &[Utf8PathBuf] {
        &self.dirty
    }

    /// Returns the registrar (for inspection).
    #[must_use]
    pub const fn registrar(&self) -> &Registrar<S> {
        &self.registrar
    }

    /// Applies one raw notification.
    pub fn handle_event(&mut self, event: &notify::Event) {
        for change in classify(event) {
            self.handle_change(&change);
        }
    }

    fn handle_change(&mut self, change: &FileEvent) {
        let path = change.path.as_path();

        if counter::is_counter_artifact(path) {
            trace!(path = %path, "Ignoring counter file event");
            return;
        }

        match change.kind {
            ChangeKind::Created => {
                if !self.track_created(path) {
                    return;
                }
            }
            ChangeKind::Removed => {
                self.registrar.unregister(path);
            }
            ChangeKind::Modified | ChangeKind::Ignored => {}
        }

        if change.kind.qualifies() {
            self.mark_dirty(path);
        }
    }

    /// Subscribes a newly created path. Returns `false` if it could not be stat'ed.
    fn track_created(&mut self, path: &Utf8Path) -> bool {
        let metadata = match path.symlink_metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(path = %path, error = %err, "Failed to stat");
                return false;
            }
        };

        if metadata.is_dir() {
            if let Err(err) = self.registrar.register_tree(path) {
                warn!(path = %path, error = %err, "Failed to watch new directory");
            }
        } else if metadata.is_file() {
            if let Err(err) = self.registrar.subscribe(path) {
                warn!(path = %path, error = %err, "Failed to watch new file");
            }
        }
        true
    }

    fn mark_dirty(&mut self, path: &Utf8Path) {
        let Some(root) = resolve_root(path, &self.roots) else {
            warn!(path = %path, "No root directory matching path found");
            return;
        };

        if !self.dirty.contains(root) {
            debug!(root = %root, "Root marked dirty");
            self.dirty.push(root.clone());
        }
        self.deadline = Some(Instant::now() + self.grace_period);
    }

    /// Bumps the counter of every dirty root and disarms the deadline.
    ///
    /// The writes run on the blocking pool; the loop waits for them before
    /// handling the next event. A failure on one root is logged and does not
    /// prevent the others. Returns the number of roots bumped successfully.
    pub async fn flush(&mut self) -> usize {
        self.deadline = None;
        let dirty = std::mem::take(&mut self.dirty);
        if dirty.is_empty() {
            return 0;
        }

        let span = Span::current();
        match tokio::task::spawn_blocking(move || span.in_scope(|| bump_all(&dirty))).await {
            Ok(bumped) => bumped,
            Err(err) => {
                warn!(error = %err, "Version bump task failed");
                0
            }
        }
    }

    /// Runs the loop until `cancel` fires or the notification channel closes.
    ///
    /// Pending changes are flushed before returning if a deadline is armed.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
        cancel: CancellationToken,
    ) {
        info!(roots = ?self.roots, grace_period = ?self.grace_period, "Watching");

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    if self.deadline.is_some() {
                        debug!("Flushing pending changes before exit");
                        self.flush().await;
                    }
                    break;
                }

                received = events.recv() => match received {
                    Some(Ok(event)) => {
                        debug!(?event, "Got event");
                        self.handle_event(&event);
                    }
                    Some(Err(err)) => warn!(error = %err, "Got event error"),
                    None => {
                        warn!("Notification channel closed");
                        if self.deadline.is_some() {
                            self.flush().await;
                        }
                        break;
                    }
                },

                () = wait_until(self.deadline) => {
                    self.flush().await;
                }
            }
        }

        info!("Watcher stopped");
    }
}

fn bump_all(roots: &[Utf8PathBuf]) -> usize {
    let mut bumped = 0;
    for root in roots {
        match counter::bump(root) {
            Ok(version) => {
                info!(root = %root, version, "Version bumped");
                bumped += 1;
            }
            Err(err) => warn!(root = %root, error = %err, "Failed to bump version"),
        }
    }
    bumped
}

/// Sleeps until `deadline`, or forever when none is armed.
async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
