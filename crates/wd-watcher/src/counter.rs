//! Per-root version counter persistence.
//!
//! Each watched root holds a small INI file (`gpt.ini`) whose
//! `[General] Version` key is incremented once per flush. External
//! replication clients compare this number to decide whether a tree changed.
//!
//! ```text
//! [General]
//! Version=42
//! ```
//!
//! Rewrites go through a sibling `<name>.tmp` file that is synced and then
//! renamed over the counter file, so a crash never leaves a truncated file.
//! Lines other than the version key are kept as they were.

use std::fs::{self, File};
use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{info, warn};
use wd_core::{COUNTER_FILE_NAME, COUNTER_KEY, COUNTER_SECTION};

use crate::error::WatchError;

/// Suffix of the temporary file used while rewriting a counter file.
const TEMP_SUFFIX: &str = ".tmp";

#[cfg(windows)]
const LINE_ENDING: &str = "\r\n";
#[cfg(not(windows))]
const LINE_ENDING: &str = "\n";

/// Returns `true` if `path` names the counter file or its temporary sibling.
///
/// The comparison ignores ASCII case, so `GPT.INI` and `gpt.ini.tmp` both match.
/// Events on these paths are produced by the engine itself and must not
/// mark a root dirty.
///
/// # Examples
///
/// ```
/// use camino::Utf8Path;
/// use wd_watcher::counter::is_counter_artifact;
///
/// assert!(is_counter_artifact(Utf8Path::new("/srv/a/GPT.INI")));
/// assert!(is_counter_artifact(Utf8Path::new("/srv/a/gpt.ini.tmp")));
/// assert!(!is_counter_artifact(Utf8Path::new("/srv/a/gpt.ini.bak")));
/// ```
#[must_use]
pub fn is_counter_artifact(path: &Utf8Path) -> bool {
    let Some(name) = path.file_name() else {
        return false;
    };
    let name = name.to_ascii_lowercase();
    let name = name.strip_suffix(TEMP_SUFFIX).unwrap_or(name.as_str());
    name == COUNTER_FILE_NAME
}

/// Returns the counter file path for `root`.
///
/// An existing file whose name matches [`COUNTER_FILE_NAME`] case-insensitively
/// is reused; otherwise the canonical lowercase name is used.
#[must_use]
pub fn counter_path(root: &Utf8Path) -> Utf8PathBuf {
    if let Ok(entries) = root.read_dir_utf8() {
        for entry in entries.flatten() {
            let is_file = entry.file_type().is_ok_and(|ft| ft.is_file());
            if is_file && entry.file_name().eq_ignore_ascii_case(COUNTER_FILE_NAME) {
                return entry.into_path();
            }
        }
    }
    root.join(COUNTER_FILE_NAME)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LineKind {
    Section(String),
    Entry { key: String, value: String },
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Line {
    raw: String,
    kind: LineKind,
}

/// In-memory form of a counter file.
///
/// Only the `[General] Version` key is interpreted; every other line is kept
/// verbatim so rewriting a richer file does not lose its content.
///
/// # Examples
///
/// ```
/// use wd_watcher::counter::CounterFile;
///
/// let mut file = CounterFile::parse("[General]\nVersion=4\n").unwrap();
/// assert_eq!(file.version(), Ok(4));
/// file.set_version(5);
/// assert!(file.render().contains("Version=5"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterFile {
    lines: Vec<Line>,
}

impl CounterFile {
    /// Parses INI contents.
    ///
    /// Blank lines and `;` / `#` comments are accepted anywhere.
    ///
    /// # Errors
    ///
    /// Returns a description of the first line that is neither a section
    /// header, a `key=value` entry, a comment, nor blank.
    pub fn parse(contents: &str) -> Result<Self, String> {
        let contents = contents.strip_prefix('\u{feff}').unwrap_or(contents);
        let mut lines = Vec::new();

        for (index, raw) in contents.lines().enumerate() {
            let trimmed = raw.trim();
            let kind = if trimmed.is_empty() || trimmed.starts_with(';') || trimmed.starts_with('#')
            {
                LineKind::Other
            } else if let Some(name) = trimmed
                .strip_prefix('[')
                .and_then(|rest| rest.strip_suffix(']'))
            {
                LineKind::Section(name.trim().to_owned())
            } else if let Some((key, value)) = trimmed.split_once('=') {
                let key = key.trim();
                if key.is_empty() {
                    return Err(format!("line {}: entry without a key", index + 1));
                }
                LineKind::Entry {
                    key: key.to_owned(),
                    value: value.trim().to_owned(),
                }
            } else {
                return Err(format!("line {}: unrecognised content {trimmed:?}", index + 1));
            };
            lines.push(Line {
                raw: raw.to_owned(),
                kind,
            });
        }

        Ok(Self { lines })
    }

    /// Returns the `[General] Version` value.
    ///
    /// # Errors
    ///
    /// Returns a description if the key is absent or is not a non-negative integer.
    pub fn version(&self) -> Result<u64, String> {
        let index = self
            .version_line()
            .ok_or_else(|| format!("missing [{COUNTER_SECTION}] {COUNTER_KEY} key"))?;
        match &self.lines[index].kind {
            LineKind::Entry { value, .. } => value
                .parse::<u64>()
                .map_err(|err| format!("invalid {COUNTER_KEY} value {value:?}: {err}")),
            LineKind::Section(_) | LineKind::Other => {
                Err(format!("missing [{COUNTER_SECTION}] {COUNTER_KEY} key"))
            }
        }
    }

    /// Sets the `[General] Version` value, adding the section or key if needed.
    pub fn set_version(&mut self, version: u64) {
        if let Some(index) = self.version_line() {
            let line = &mut self.lines[index];
            if let LineKind::Entry { key, value } = &mut line.kind {
                line.raw = format!("{key}={version}");
                *value = version.to_string();
            }
            return;
        }

        let entry = Line {
            raw: format!("{COUNTER_KEY}={version}"),
            kind: LineKind::Entry {
                key: COUNTER_KEY.to_owned(),
                value: version.to_string(),
            },
        };

        if let Some(header) = self.section_line(COUNTER_SECTION) {
            self.lines.insert(header + 1, entry);
        } else {
            self.lines.push(Line {
                raw: format!("[{COUNTER_SECTION}]"),
                kind: LineKind::Section(COUNTER_SECTION.to_owned()),
            });
            self.lines.push(entry);
        }
    }

    /// Renders the file contents, one line per entry, ending with a newline.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(&line.raw);
            out.push_str(LINE_ENDING);
        }
        out
    }

    fn section_line(&self, section: &str) -> Option<usize> {
        self.lines.iter().position(
            |line| matches!(&line.kind, LineKind::Section(name) if name.eq_ignore_ascii_case(section)),
        )
    }

    fn version_line(&self) -> Option<usize> {
        let mut in_section = false;
        for (index, line) in self.lines.iter().enumerate() {
            match &line.kind {
                LineKind::Section(name) => in_section = name.eq_ignore_ascii_case(COUNTER_SECTION),
                LineKind::Entry { key, .. } if in_section && key.eq_ignore_ascii_case(COUNTER_KEY) => {
                    return Some(index);
                }
                LineKind::Entry { .. } | LineKind::Other => {}
            }
        }
        None
    }
}

/// Loads the counter file at `path`.
///
/// # Errors
///
/// Returns [`WatchError::Io`] if the file cannot be read and
/// [`WatchError::Counter`] if its contents are not INI.
pub fn load(path: &Utf8Path) -> Result<CounterFile, WatchError> {
    let contents = fs::read_to_string(path).map_err(|err| WatchError::io(path, err))?;
    CounterFile::parse(&contents).map_err(|reason| WatchError::counter(path, reason))
}

/// Increments the version counter of `root` by exactly one.
///
/// A missing or unreadable counter file is replaced by a fresh one starting
/// at 0, so the first bump always writes `Version=1`. Returns the new value.
///
/// # Errors
///
/// Returns [`WatchError::Io`] if the new contents cannot be written.
pub fn bump(root: &Utf8Path) -> Result<u64, WatchError> {
    let path = counter_path(root);
    info!(path = %path, "Bumping version");

    let mut record = match load(&path) {
        Ok(record) => record,
        Err(err) => {
            warn!(path = %path, error = %err, "Error loading counter contents, creating a new file");
            CounterFile::default()
        }
    };

    let current = match record.version() {
        Ok(version) => version,
        Err(reason) => {
            warn!(path = %path, %reason, "Resetting version to 0");
            0
        }
    };
    let next = current.checked_add(1).unwrap_or_else(|| {
        warn!(path = %path, "Version counter overflowed, restarting from 0");
        1
    });

    record.set_version(next);
    write_atomic(&path, &record.render())?;
    Ok(next)
}

/// Writes `contents` to a sibling temporary file, syncs it, and renames it over `path`.
fn write_atomic(path: &Utf8Path, contents: &str) -> Result<(), WatchError> {
    let temp = temp_path(path);

    let written = File::create(&temp).and_then(|mut file| {
        file.write_all(contents.as_bytes())?;
        file.sync_all()
    });
    if let Err(err) = written.and_then(|()| fs::rename(&temp, path)) {
        if let Err(cleanup) = fs::remove_file(&temp) {
            if cleanup.kind() != io::ErrorKind::NotFound {
                warn!(path = %temp, error = %cleanup, "Failed to remove temporary counter file");
            }
        }
        return Err(WatchError::io(path, err));
    }
    Ok(())
}

fn temp_path(path: &Utf8Path) -> Utf8PathBuf {
    let name = path.file_name().unwrap_or(COUNTER_FILE_NAME);
    path.with_file_name(format!("{name}{TEMP_SUFFIX}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_root() -> (TempDir, Utf8PathBuf) {
        let temp = TempDir::new().expect("Failed to create temp directory");
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("Invalid path");
        (temp, root)
    }

    fn read_version(path: &Utf8Path) -> u64 {
        load(path)
            .and_then(|file| file.version().map_err(|reason| WatchError::counter(path, reason)))
            .expect("Counter file should be readable")
    }

    #[test]
    fn test_is_counter_artifact() {
        assert!(is_counter_artifact(Utf8Path::new("gpt.ini")));
        assert!(is_counter_artifact(Utf8Path::new("/srv/Policies/x/GPT.ini")));
        assert!(is_counter_artifact(Utf8Path::new("/srv/GPT.INI.TMP")));
        assert!(!is_counter_artifact(Utf8Path::new("/srv/gpt.ini/child")));
        assert!(!is_counter_artifact(Utf8Path::new("/srv/notgpt.ini")));
        assert!(!is_counter_artifact(Utf8Path::new("/")));
    }

    #[test]
    fn test_parse_and_version() {
        let file = CounterFile::parse("[General]\r\nVersion = 12\r\n").unwrap();
        assert_eq!(file.version(), Ok(12));
    }

    #[test]
    fn test_version_key_is_case_insensitive() {
        let file = CounterFile::parse("[general]\nversion=3\n").unwrap();
        assert_eq!(file.version(), Ok(3));
    }

    #[test]
    fn test_version_outside_general_is_ignored() {
        let file = CounterFile::parse("[Other]\nVersion=3\n").unwrap();
        assert!(file.version().is_err());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(CounterFile::parse("this is not ini").is_err());
        assert!(CounterFile::parse("[General]\n=5\n").is_err());
    }

    #[test]
    fn test_version_rejects_negative() {
        let file = CounterFile::parse("[General]\nVersion=-1\n").unwrap();
        assert!(file.version().is_err());
    }

    #[test]
    fn test_set_version_on_empty_file() {
        let mut file = CounterFile::default();
        file.set_version(1);
        assert_eq!(file.render(), format!("[General]{LINE_ENDING}Version=1{LINE_ENDING}"));
    }

    #[test]
    fn test_set_version_preserves_other_lines() {
        let mut file =
            CounterFile::parse("; managed\n[General]\ndisplayName=Default Policy\n").unwrap();
        file.set_version(7);
        let rendered = file.render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(
            lines,
            vec!["; managed", "[General]", "Version=7", "displayName=Default Policy"]
        );
    }

    #[test]
    fn test_bump_creates_missing_file() {
        let (_temp, root) = temp_root();

        assert_eq!(bump(&root).unwrap(), 1);
        assert_eq!(read_version(&root.join(COUNTER_FILE_NAME)), 1);
        assert!(!root.join("gpt.ini.tmp").exists());
    }

    #[test]
    fn test_bump_increments_by_one() {
        let (_temp, root) = temp_root();
        fs::write(root.join(COUNTER_FILE_NAME), "[General]\nVersion=41\n").unwrap();

        assert_eq!(bump(&root).unwrap(), 42);
        assert_eq!(bump(&root).unwrap(), 43);
        assert_eq!(read_version(&root.join(COUNTER_FILE_NAME)), 43);
    }

    #[test]
    fn test_bump_replaces_malformed_file() {
        let (_temp, root) = temp_root();
        fs::write(root.join(COUNTER_FILE_NAME), "garbage without structure").unwrap();

        assert_eq!(bump(&root).unwrap(), 1);
        let contents = fs::read_to_string(root.join(COUNTER_FILE_NAME)).unwrap();
        assert!(!contents.contains("garbage"));
    }

    #[test]
    fn test_bump_resets_invalid_version_value() {
        let (_temp, root) = temp_root();
        fs::write(
            root.join(COUNTER_FILE_NAME),
            "[General]\nVersion=abc\ndisplayName=Keep\n",
        )
        .unwrap();

        assert_eq!(bump(&root).unwrap(), 1);
        let contents = fs::read_to_string(root.join(COUNTER_FILE_NAME)).unwrap();
        assert!(contents.contains("displayName=Keep"));
    }

    #[test]
    fn test_bump_reuses_existing_casing() {
        let (_temp, root) = temp_root();
        fs::write(root.join("GPT.INI"), "[General]\nVersion=9\n").unwrap();

        assert_eq!(counter_path(&root), root.join("GPT.INI"));
        assert_eq!(bump(&root).unwrap(), 10);
        assert_eq!(read_version(&root.join("GPT.INI")), 10);
    }

    #[test]
    fn test_bump_overflow_restarts() {
        let (_temp, root) = temp_root();
        fs::write(
            root.join(COUNTER_FILE_NAME),
            format!("[General]\nVersion={}\n", u64::MAX),
        )
        .unwrap();

        assert_eq!(bump(&root).unwrap(), 1);
    }

    #[test]
    fn test_bump_fails_for_missing_root() {
        let err = bump(Utf8Path::new("/nonexistent/root/for/counter")).unwrap_err();
        assert!(matches!(err, WatchError::Io { .. }));
        assert!(err.is_recoverable());
    }
}
