//! Attribution of changed paths to configured root directories.

use camino::{Utf8Path, Utf8PathBuf};

/// Returns the configured root that contains `path`.
///
/// Matching is done per path component, so `/srv/ab` is not under `/srv/a`.
/// With nested roots the most specific (deepest) one wins. Returns `None`
/// when no root contains the path.
///
/// # Examples
///
/// ```
/// use camino::{Utf8Path, Utf8PathBuf};
/// use wd_watcher::resolve_root;
///
/// let roots = vec![Utf8PathBuf::from("/a"), Utf8PathBuf::from("/a/b")];
/// assert_eq!(resolve_root(Utf8Path::new("/a/b/file"), &roots), Some(&roots[1]));
/// assert_eq!(resolve_root(Utf8Path::new("/a/c"), &roots), Some(&roots[0]));
/// assert_eq!(resolve_root(Utf8Path::new("/z"), &roots), None);
/// ```
#[must_use]
pub fn resolve_root<'a>(path: &Utf8Path, roots: &'a [Utf8PathBuf]) -> Option<&'a Utf8PathBuf> {
    roots
        .iter()
        .filter(|root| path.starts_with(root))
        .max_by_key(|root| root.components().count())
}
