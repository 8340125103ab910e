//! A single running watch over a fixed directory list.
//!
//! [`Session::start`] spawns the event loop on the tokio runtime and waits on
//! a oneshot handshake: the task reports either that the notification engine
//! is up and every root is registered, or the error that prevented it. The
//! caller therefore never holds a session that might still fail to start.
//!
//! ```text
//!  Session::start ──spawn──► run_session
//!        │                     ├─ Backend::connect
//!        │                     ├─ register every root (blocking pool)
//!        ◄──── ready (Ok/Err) ─┤
//!        │                     └─ Coalescer::run  ◄── cancel
//!  Session::stop ──cancel──────────────► final flush, exit
//!        ◄────────── join ─────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info_span, Instrument, Span};

use crate::coalescer::Coalescer;
use crate::error::WatchError;
use crate::registrar::{Registrar, Subscriber};

/// Handshake result sent by the session task exactly once.
type Ready = oneshot::Sender<Result<(), WatchError>>;

/// Channel end the notification engine delivers raw events into.
pub(crate) type EventSink = mpsc::UnboundedSender<notify::Result<notify::Event>>;

/// Creates the notification engine of a session.
pub(crate) trait Backend: std::fmt::Debug + Send + Sync + 'static {
    /// Connects a new engine delivering into `sink`.
    fn connect(&self, sink: EventSink) -> Result<Box<dyn Subscriber>, WatchError>;
}

/// The platform's recommended `notify` watcher.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct NotifyBackend;

impl Backend for NotifyBackend {
    fn connect(&self, sink: EventSink) -> Result<Box<dyn Subscriber>, WatchError> {
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            // The receiver is gone once the loop has exited.
            let _ = sink.send(res);
        })?;
        Ok(Box::new(watcher))
    }
}

/// A running watch session.
///
/// Dropping a session cancels it without waiting; use [`Session::stop`] to
/// wait for the final flush.
pub(crate) struct Session {
    dirs: Vec<Utf8PathBuf>,
    grace_period: Duration,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    _cancel_on_drop: DropGuard,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("dirs", &self.dirs)
            .field("grace_period", &self.grace_period)
            .field("finished", &self.task.is_finished())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Starts watching `dirs` through `backend` and waits until the session
    /// is ready.
    ///
    /// The session task runs inside a child span of `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Notify`] if the notification engine cannot be
    /// created, [`WatchError::Walk`] or [`WatchError::Notify`] if a root
    /// cannot be registered, and [`WatchError::SessionAborted`] if the task
    /// ended without answering.
    pub(crate) async fn start(
        dirs: Vec<Utf8PathBuf>,
        grace_period: Duration,
        backend: Arc<dyn Backend>,
        parent: &Span,
    ) -> Result<Self, WatchError> {
        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();

        let span = info_span!(parent: parent, "session", roots = ?dirs);
        let task = tokio::spawn(
            run_session(dirs.clone(), grace_period, backend, ready_tx, cancel.clone())
                .instrument(span),
        );

        match ready_rx.await {
            Ok(Ok(())) => Ok(Self {
                dirs,
                grace_period,
                _cancel_on_drop: cancel.clone().drop_guard(),
                cancel,
                task,
            }),
            Ok(Err(err)) => {
                // The task returns right after reporting the failure.
                if let Err(join) = task.await {
                    debug!(error = %join, "Failed session task did not exit cleanly");
                }
                Err(err)
            }
            Err(_) => {
                let reason = match task.await {
                    Err(join) => join.to_string(),
                    Ok(()) => "session ended before reporting readiness".to_owned(),
                };
                Err(WatchError::SessionAborted(reason))
            }
        }
    }

    /// Cancels the session and waits until it has fully wound down.
    ///
    /// Pending changes are flushed before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::SessionAborted`] if the session task panicked.
    pub(crate) async fn stop(self) -> Result<(), WatchError> {
        self.cancel.cancel();
        self.task
            .await
            .map_err(|join| WatchError::SessionAborted(join.to_string()))
    }

    /// Returns the watched root directories.
    #[must_use]
    pub(crate) fn dirs(&self) -> &[Utf8PathBuf] {
        &self.dirs
    }

    /// Returns the grace period of this session.
    #[must_use]
    pub(crate) const fn grace_period(&self) -> Duration {
        self.grace_period
    }
}

/// Body of the session task.
async fn run_session(
    dirs: Vec<Utf8PathBuf>,
    grace_period: Duration,
    backend: Arc<dyn Backend>,
    ready: Ready,
    cancel: CancellationToken,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let subscriber = match backend.connect(event_tx) {
        Ok(subscriber) => subscriber,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };

    // Walking a large tree blocks; the loop only starts once it is done.
    let mut coalescer = Coalescer::new(Registrar::new(subscriber), dirs, grace_period);
    let span = Span::current();
    let registered = tokio::task::spawn_blocking(move || {
        let result = span.in_scope(|| coalescer.register_roots());
        result.map(|()| coalescer)
    })
    .await;

    let coalescer = match registered {
        Ok(Ok(coalescer)) => coalescer,
        Ok(Err(err)) => {
            let _ = ready.send(Err(err));
            return;
        }
        Err(join) => {
            let _ = ready.send(Err(WatchError::SessionAborted(join.to_string())));
            return;
        }
    };

    if ready.send(Ok(())).is_err() {
        debug!("Start was abandoned before the session became ready");
        return;
    }

    coalescer.run(event_rx, cancel).await;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::registrar::tests::{temp_tree, FakeSubscriber};
    use camino::Utf8Path;
    use wd_core::COUNTER_FILE_NAME;

    const GRACE: Duration = Duration::from_millis(200);

    /// Backend handing out clones of one [`FakeSubscriber`].
    ///
    /// No events are ever delivered; the sink is kept open for as long as the
    /// session holds the subscriber.
    #[derive(Debug, Default)]
    pub(crate) struct FakeBackend {
        pub(crate) subscriber: FakeSubscriber,
    }

    #[derive(Debug)]
    struct Connected {
        subscriber: FakeSubscriber,
        _sink: EventSink,
    }

    impl Subscriber for Connected {
        fn subscribe(&mut self, path: &Utf8Path) -> Result<(), WatchError> {
            self.subscriber.subscribe(path)
        }

        fn unsubscribe(&mut self, path: &Utf8Path) -> Result<(), WatchError> {
            self.subscriber.unsubscribe(path)
        }
    }

    impl Backend for FakeBackend {
        fn connect(&self, sink: EventSink) -> Result<Box<dyn Subscriber>, WatchError> {
            Ok(Box::new(Connected {
                subscriber: self.subscriber.clone(),
                _sink: sink,
            }))
        }
    }

    fn notify_backend() -> Arc<dyn Backend> {
        Arc::new(NotifyBackend)
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let (_temp, root) = temp_tree();

        let session = Session::start(vec![root.clone()], GRACE, notify_backend(), &Span::none())
            .await
            .unwrap();
        assert_eq!(session.dirs(), &[root.clone()]);
        assert_eq!(session.grace_period(), GRACE);
        assert!(!session.task.is_finished());

        session.stop().await.unwrap();
        assert!(!root.join(COUNTER_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn test_start_registers_through_backend() {
        let (_temp, root) = temp_tree();
        let backend = Arc::new(FakeBackend::default());
        let active = Arc::clone(&backend.subscriber.active);

        let session = Session::start(vec![root.clone()], GRACE, backend, &Span::none())
            .await
            .unwrap();

        assert_eq!(active.lock().len(), 6);
        assert!(active.lock().contains(&root.join("sub/deeper/leaf.txt")));
        session.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_reports_backend_failure() {
        let (_temp, root) = temp_tree();
        let backend = Arc::new(FakeBackend {
            subscriber: FakeSubscriber::failing_on(root.join("sub")),
        });

        let err = Session::start(vec![root], GRACE, backend, &Span::none())
            .await
            .unwrap_err();

        assert!(matches!(err, WatchError::Notify(_)));
    }

    #[tokio::test]
    async fn test_start_missing_root_fails() {
        let (_temp, root) = temp_tree();
        let missing = root.join("does-not-exist");

        let err = Session::start(vec![root, missing], GRACE, notify_backend(), &Span::none())
            .await
            .unwrap_err();

        assert!(matches!(err, WatchError::Walk { .. } | WatchError::Notify(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_stop_flushes_pending_change() {
        let (_temp, root) = temp_tree();
        let session = Session::start(
            vec![root.clone()],
            Duration::from_secs(60),
            notify_backend(),
            &Span::none(),
        )
        .await
        .unwrap();

        std::fs::write(root.join("top.txt"), "changed").unwrap();
        // Give the backend time to deliver the event; the grace period is far away.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!root.join(COUNTER_FILE_NAME).exists());

        session.stop().await.unwrap();
        assert!(root.join(COUNTER_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn test_drop_cancels_session() {
        let (_temp, root) = temp_tree();
        let session = Session::start(vec![root], GRACE, notify_backend(), &Span::none())
            .await
            .unwrap();
        let cancel = session.cancel.clone();

        drop(session);

        assert!(cancel.is_cancelled());
    }
}
