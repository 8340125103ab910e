//! Classification of raw `notify` events.
//!
//! The event loop only cares about four outcomes per path: something was
//! created (or renamed into place), removed (or renamed away), had its
//! contents modified, or changed in a way that does not affect tree
//! contents (metadata, access).
//!
//! # Event Flow
//!
//! ```text
//! notify::Event (kind + paths)
//!        │
//!        ▼
//!   classify()  ──► FileEvent { path, kind } per path
//!        │
//!        ▼
//!   Coalescer (subscribe / unsubscribe / mark root dirty)
//! ```

use camino::Utf8PathBuf;
use notify::event::{EventKind, ModifyKind, RenameMode};
use smallvec::SmallVec;
use tracing::warn;

use crate::error::WatchError;

/// What a filesystem event means for the watched tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// The path appeared (created, or renamed into place).
    Created,
    /// The path disappeared (deleted, or renamed away).
    Removed,
    /// The contents of the path changed.
    Modified,
    /// Metadata or access only; tree contents are unchanged.
    Ignored,
}

impl ChangeKind {
    /// Returns `true` if this change should trigger a version bump.
    #[inline]
    #[must_use]
    pub const fn qualifies(self) -> bool {
        !matches!(self, Self::Ignored)
    }
}

/// A single classified change with a UTF-8 path.
///
/// # Examples
///
/// ```
/// use wd_watcher::{ChangeKind, FileEvent};
/// use camino::Utf8PathBuf;
///
/// let event = FileEvent::new(Utf8PathBuf::from("/srv/a/file"), ChangeKind::Modified);
/// assert!(event.kind.qualifies());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// The path that changed.
    pub path: Utf8PathBuf,

    /// How it changed.
    pub kind: ChangeKind,
}

impl FileEvent {
    /// Creates a new file event.
    #[inline]
    #[must_use]
    pub const fn new(path: Utf8PathBuf, kind: ChangeKind) -> Self {
        Self { path, kind }
    }
}

/// Splits a raw `notify` event into per-path [`FileEvent`]s.
///
/// Non-UTF-8 paths are logged and skipped. A `Both` rename yields a removal
/// for the source path followed by a creation for the target path. Renames
/// whose direction the backend could not tell are resolved by checking
/// whether the path still exists.
#[must_use]
pub fn classify(event: &notify::Event) -> SmallVec<[FileEvent; 2]> {
    let mut out = SmallVec::new();

    for (index, path) in event.paths.iter().enumerate() {
        let path = match Utf8PathBuf::try_from(path.clone()) {
            Ok(path) => path,
            Err(err) => {
                let err = WatchError::NonUtf8Path(err.into_path_buf());
                warn!(error = %err, "Skipping path in file event");
                continue;
            }
        };
        let kind = kind_for(event.kind, index, &path);
        out.push(FileEvent::new(path, kind));
    }

    out
}

fn kind_for(kind: EventKind, index: usize, path: &Utf8PathBuf) -> ChangeKind {
    match kind {
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            ChangeKind::Created
        }
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            ChangeKind::Removed
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if index == 0 {
                ChangeKind::Removed
            } else {
                ChangeKind::Created
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Any | RenameMode::Other)) => {
            if path.symlink_metadata().is_ok() {
                ChangeKind::Created
            } else {
                ChangeKind::Removed
            }
        }
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any | ModifyKind::Other) => {
            ChangeKind::Modified
        }
        EventKind::Modify(ModifyKind::Metadata(_))
        | EventKind::Access(_)
        | EventKind::Any
        | EventKind::Other => ChangeKind::Ignored,
    }
}
