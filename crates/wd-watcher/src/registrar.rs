//! Live subscription set for every directory and file under the roots.
//!
//! Notification backends are driven through the [`Subscriber`] trait, which
//! only knows how to add or drop a single non-recursive subscription. The
//! [`Registrar`] owns the set of subscribed paths and keeps it in step with
//! the tree: new directories are walked and subscribed as they appear,
//! removed paths are dropped together with everything below them.

use std::collections::BTreeSet;
use std::ops::Bound;

use camino::{Utf8Path, Utf8PathBuf};
use ignore::WalkBuilder;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, trace, warn};

use crate::error::WatchError;

/// A backend able to subscribe single paths for change notification.
///
/// Implemented for [`RecommendedWatcher`]; tests substitute an in-memory fake.
pub trait Subscriber: Send + 'static {
    /// Starts delivering events for `path` (non-recursively).
    fn subscribe(&mut self, path: &Utf8Path) -> Result<(), WatchError>;

    /// Stops delivering events for `path`.
    fn unsubscribe(&mut self, path: &Utf8Path) -> Result<(), WatchError>;
}

impl Subscriber for RecommendedWatcher {
    fn subscribe(&mut self, path: &Utf8Path) -> Result<(), WatchError> {
        self.watch(path.as_std_path(), RecursiveMode::NonRecursive)?;
        Ok(())
    }

    fn unsubscribe(&mut self, path: &Utf8Path) -> Result<(), WatchError> {
        self.unwatch(path.as_std_path())?;
        Ok(())
    }
}

impl Subscriber for Box<dyn Subscriber> {
    fn subscribe(&mut self, path: &Utf8Path) -> Result<(), WatchError> {
        (**self).subscribe(path)
    }

    fn unsubscribe(&mut self, path: &Utf8Path) -> Result<(), WatchError> {
        (**self).unsubscribe(path)
    }
}

/// Owner of the subscription set.
///
/// Subscribing an already-subscribed path is a no-op, and unregistering a
/// path that was never subscribed is not an error.
///
/// Paths are kept ordered by component, so everything below a directory
/// forms one contiguous run starting at the directory itself.
pub struct Registrar<S> {
    subscriber: S,
    subscribed: BTreeSet<Utf8PathBuf>,
}

impl<S> std::fmt::Debug for Registrar<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registrar")
            .field("subscribed", &self.subscribed.len())
            .finish_non_exhaustive()
    }
}

impl<S: Subscriber> Registrar<S> {
    /// Creates an empty registrar on top of `subscriber`.
    #[must_use]
    pub fn new(subscriber: S) -> Self {
        Self {
            subscriber,
            subscribed: BTreeSet::new(),
        }
    }

    /// Subscribes `root` and every directory and regular file below it.
    ///
    /// Hidden and git-ignored entries are included; symbolic links are not
    /// followed. Returns the number of newly subscribed paths.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Walk`] if traversal fails and
    /// [`WatchError::Notify`] if the backend refuses a subscription. Paths
    /// subscribed before the failure stay subscribed.
    pub fn register_tree(&mut self, root: &Utf8Path) -> Result<usize, WatchError> {
        debug!(path = %root, "Watching directory and children");

        let walker = WalkBuilder::new(root)
            .standard_filters(false)
            .follow_links(false)
            .build();

        let mut added = 0;
        for result in walker {
            let entry = result.map_err(|source| WatchError::walk(root, source))?;
            if !entry
                .file_type()
                .is_some_and(|ft| ft.is_dir() || ft.is_file())
            {
                continue;
            }

            let Some(path) = Utf8Path::from_path(entry.path()) else {
                let err = WatchError::NonUtf8Path(entry.path().to_path_buf());
                warn!(error = %err, "Skipping path");
                continue;
            };

            if self.subscribe(path)? {
                added += 1;
            }
        }

        Ok(added)
    }

    /// Subscribes a single path. Returns `false` if it was already subscribed.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the subscription fails.
    pub fn subscribe(&mut self, path: &Utf8Path) -> Result<bool, WatchError> {
        if self.subscribed.contains(path) {
            return Ok(false);
        }
        self.subscriber.subscribe(path)?;
        trace!(path = %path, "Watching");
        self.subscribed.insert(path.to_owned());
        Ok(true)
    }

    /// Drops `path` and every subscribed path below it.
    ///
    /// Returns the number of subscriptions removed.
    pub fn unregister(&mut self, path: &Utf8Path) -> usize {
        let doomed: Vec<Utf8PathBuf> = self
            .subscribed
            .range::<Utf8Path, _>((Bound::Included(path), Bound::Unbounded))
            .take_while(|candidate| candidate.starts_with(path))
            .cloned()
            .collect();

        for candidate in &doomed {
            self.subscribed.remove(candidate);
            // The backend usually dropped the watch already when the path vanished.
            if let Err(err) = self.subscriber.unsubscribe(candidate) {
                trace!(path = %candidate, error = %err, "Unsubscribe skipped");
            }
        }

        if !doomed.is_empty() {
            debug!(path = %path, removed = doomed.len(), "Stopped watching");
        }
        doomed.len()
    }

    /// Returns `true` if `path` is currently subscribed.
    #[must_use]
    pub fn is_subscribed(&self, path: &Utf8Path) -> bool {
        self.subscribed.contains(path)
    }

    /// Returns the number of subscribed paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribed.len()
    }

    /// Returns `true` if nothing is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribed.is_empty()
    }
}
