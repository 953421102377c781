//! Core data model for sync jobs.
//!
//! This module defines the value types threaded through a batch:
//! - SyncOptions / SyncOverrides: layered configuration
//! - SyncState: shared batch counters
//! - EntryStats: resolved per-entry metadata
//! - PathConvention: POSIX vs Windows path handling per endpoint

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::error::SyncError;
use crate::filter::FilterSpec;
use crate::strategy::TransferStrategy;

/// Default bound on concurrent operations within one directory.
pub const DEFAULT_LIMIT: usize = 64;

/// Permission bits considered by mode handling.
pub const FULL_ACCESS: u32 = 0o777;

const REGULAR_MODE_MASK: u32 = 0o775;
const HIDDEN_MODE_MASK: u32 = 0o755;

/// Path convention of an endpoint, detected once per batch by probing
/// the endpoint's canonical working directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathConvention {
    Posix,
    Windows,
}

impl PathConvention {
    /// Classify a canonical path returned by `realpath(".")`. A leading
    /// drive-letter shape (`C:`, `/C:/`, `C:\`) means Windows.
    pub fn from_probe(cwd: &str) -> Self {
        if looks_like_windows(cwd) {
            Self::Windows
        } else {
            Self::Posix
        }
    }

    pub fn separator(self) -> char {
        match self {
            Self::Posix => '/',
            Self::Windows => '\\',
        }
    }

    /// True if the last path segment starts with a dot.
    pub fn is_dot_entry(self, path: &str) -> bool {
        self.basename(path).starts_with('.')
    }

    pub fn basename(self, path: &str) -> &str {
        let trimmed = path.trim_end_matches(self.separator());
        match trimmed.rfind(self.separator()) {
            Some(idx) => &trimmed[idx + 1..],
            None => trimmed,
        }
    }

    /// Parent directory of `path`. Returns `.` for bare names and keeps
    /// the root (`/`, `C:\`) intact.
    pub fn dirname(self, path: &str) -> String {
        let sep = self.separator();
        let trimmed = path.trim_end_matches(sep);
        match trimmed.rfind(sep) {
            None => ".".to_string(),
            Some(0) => sep.to_string(),
            Some(idx) => {
                let parent = &trimmed[..idx];
                if parent.ends_with(':') {
                    format!("{parent}{sep}")
                } else {
                    parent.to_string()
                }
            }
        }
    }

    pub fn join(self, base: &str, name: &str) -> String {
        let sep = self.separator();
        let trimmed = base.trim_end_matches(sep);
        format!("{trimmed}{sep}{name}")
    }
}

/// Drive-letter probe shared by convention detection and the CLI.
pub fn looks_like_windows(path: &str) -> bool {
    let rest = path.strip_prefix('/').unwrap_or(path);
    let Some(colon) = rest.find(':') else {
        return false;
    };
    if colon == 0 || !rest[..colon].chars().all(|c| c.is_alphanumeric() || c == '_') {
        return false;
    }
    matches!(rest[colon + 1..].chars().next(), None | Some('/') | Some('\\'))
}

/// Kind of a filesystem entry after (optional) symlink resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

/// Resolved metadata for one entry. Times are whole epoch seconds;
/// sub-second precision never takes part in comparisons.
#[derive(Debug, Clone)]
pub struct EntryStats {
    pub kind: EntryKind,
    pub size: u64,
    pub mtime: i64,
    pub atime: i64,
    pub mode: Option<u32>,
}

impl EntryStats {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == EntryKind::Symlink
    }
}

/// Configuration for a batch, merged from defaults, batch options and
/// per-job overrides (later layers win).
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Include dotfiles (default true).
    pub dot: bool,
    /// Create directories that end up with no surviving children
    /// (default true).
    pub empty_dirs: bool,
    /// Only transfer files that already exist at the destination.
    pub existing: bool,
    /// Never touch files that already exist at the destination.
    pub ignore_existing: bool,
    /// Skip files whose source mtime is not strictly newer.
    pub check_new: bool,
    /// Skip on equal size alone.
    pub size_only: bool,
    /// Transfer even when size and mtime match.
    pub ignore_times: bool,
    /// Tolerance in seconds for mtime comparison (0 = exact second).
    pub modify_window: i64,
    /// Remove destination entries absent from the source.
    pub delete: bool,
    /// Allow deleting non-empty extraneous directories.
    pub force: bool,
    /// Use the destination path literally instead of nesting under the
    /// source basename. `None` = auto (a trailing separator on the
    /// source path implies strip).
    pub strip: Option<bool>,
    /// Explicit permission override for created entries.
    pub mode: Option<u32>,
    /// Minimum depth for transferred files (segments below the root).
    pub mindepth: usize,
    /// Maximum descent depth; directories deeper are never created.
    pub maxdepth: Option<usize>,
    /// Predicate over every relative path.
    pub filter: Option<FilterSpec>,
    /// Predicate applied to files only.
    pub files: Option<FilterSpec>,
    /// Predicate applied to directories only.
    pub dirs: Option<FilterSpec>,
    /// Bound on concurrent per-directory operations.
    pub limit: usize,
    /// Suppress trace/summary logging.
    pub silent: bool,
    /// Re-resolve local paths through `cygpath -w` when a plain stat
    /// fails (cygwin terminals on Windows).
    pub cygpath: bool,
    /// Force a transfer strategy instead of capability detection.
    pub protocol: Option<TransferStrategy>,
}

impl SyncOptions {
    pub fn new() -> Self {
        Self {
            dot: true,
            empty_dirs: true,
            existing: false,
            ignore_existing: false,
            check_new: false,
            size_only: false,
            ignore_times: false,
            modify_window: 0,
            delete: false,
            force: false,
            strip: None,
            mode: None,
            mindepth: 0,
            maxdepth: None,
            filter: None,
            files: None,
            dirs: None,
            limit: DEFAULT_LIMIT,
            silent: false,
            cygpath: false,
            protocol: None,
        }
    }

    /// Apply a per-job override layer on top of this configuration.
    pub fn merged(&self, overrides: &SyncOverrides) -> Self {
        let mut merged = self.clone();
        overrides.apply(&mut merged);
        if merged.limit == 0 {
            merged.limit = DEFAULT_LIMIT;
        }
        merged
    }
}

/// Per-job option patch; only set fields replace the batch value.
#[derive(Debug, Clone, Default)]
pub struct SyncOverrides {
    pub dot: Option<bool>,
    pub empty_dirs: Option<bool>,
    pub existing: Option<bool>,
    pub ignore_existing: Option<bool>,
    pub check_new: Option<bool>,
    pub size_only: Option<bool>,
    pub ignore_times: Option<bool>,
    pub modify_window: Option<i64>,
    pub delete: Option<bool>,
    pub force: Option<bool>,
    pub strip: Option<bool>,
    pub mode: Option<u32>,
    pub mindepth: Option<usize>,
    pub maxdepth: Option<usize>,
    pub filter: Option<FilterSpec>,
    pub files: Option<FilterSpec>,
    pub dirs: Option<FilterSpec>,
    pub limit: Option<usize>,
    pub silent: Option<bool>,
    pub protocol: Option<TransferStrategy>,
}

impl SyncOverrides {
    fn apply(&self, target: &mut SyncOptions) {
        if let Some(v) = self.dot {
            target.dot = v;
        }
        if let Some(v) = self.empty_dirs {
            target.empty_dirs = v;
        }
        if let Some(v) = self.existing {
            target.existing = v;
        }
        if let Some(v) = self.ignore_existing {
            target.ignore_existing = v;
        }
        if let Some(v) = self.check_new {
            target.check_new = v;
        }
        if let Some(v) = self.size_only {
            target.size_only = v;
        }
        if let Some(v) = self.ignore_times {
            target.ignore_times = v;
        }
        if let Some(v) = self.modify_window {
            target.modify_window = v;
        }
        if let Some(v) = self.delete {
            target.delete = v;
        }
        if let Some(v) = self.force {
            target.force = v;
        }
        if let Some(v) = self.strip {
            target.strip = Some(v);
        }
        if let Some(v) = self.mode {
            target.mode = Some(v);
        }
        if let Some(v) = self.mindepth {
            target.mindepth = v;
        }
        if let Some(v) = self.maxdepth {
            target.maxdepth = Some(v);
        }
        if let Some(v) = &self.filter {
            target.filter = Some(v.clone());
        }
        if let Some(v) = &self.files {
            target.files = Some(v.clone());
        }
        if let Some(v) = &self.dirs {
            target.dirs = Some(v.clone());
        }
        if let Some(v) = self.limit {
            target.limit = v;
        }
        if let Some(v) = self.silent {
            target.silent = v;
        }
        if let Some(v) = self.protocol {
            target.protocol = Some(v);
        }
    }
}

/// One sync job inside a batch.
#[derive(Debug, Clone, Default)]
pub struct SyncJob {
    pub source: String,
    pub dest: String,
    pub recursive: bool,
    pub overrides: Option<SyncOverrides>,
}

impl SyncJob {
    pub fn new(source: impl Into<String>, dest: impl Into<String>, recursive: bool) -> Self {
        Self {
            source: source.into(),
            dest: dest.into(),
            recursive,
            overrides: None,
        }
    }
}

/// Counters shared by reference across an entire batch. Files count
/// every visited file (skipped ones included); folders count every
/// visited directory except the job roots.
#[derive(Debug)]
pub struct SyncState {
    files: AtomicU64,
    folders: AtomicU64,
    start: Instant,
}

impl SyncState {
    pub fn new() -> Self {
        Self {
            files: AtomicU64::new(0),
            folders: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    pub fn add_file(&self) {
        self.files.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_folder(&self) {
        self.folders.fetch_add(1, Ordering::Relaxed);
    }

    pub fn files(&self) -> u64 {
        self.files.load(Ordering::Relaxed)
    }

    pub fn folders(&self) -> u64 {
        self.folders.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a permission specification: octal digits (`"755"`) or a
/// 9-character `rwxr-xr-x` string. The result is masked to the low
/// nine bits.
pub fn parse_mode(spec: &str) -> Result<u32, SyncError> {
    if spec.chars().all(|c| ('0'..='7').contains(&c)) && !spec.is_empty() {
        let mode = u32::from_str_radix(spec, 8).map_err(|e| SyncError::Pattern {
            pattern: spec.to_string(),
            message: e.to_string(),
        })?;
        return Ok(mode & FULL_ACCESS);
    }

    if spec.len() != 9 {
        return Err(SyncError::Pattern {
            pattern: spec.to_string(),
            message: "expected octal digits or a 9-character rwx string".to_string(),
        });
    }

    let mut mode = 0u32;
    for (i, ch) in spec.chars().enumerate() {
        let pos = 8 - i as u32;
        let expected = match pos % 3 {
            2 => 'r',
            1 => 'w',
            _ => 'x',
        };
        if ch == expected {
            mode |= 1 << pos;
        } else if ch != '-' {
            return Err(SyncError::Pattern {
                pattern: spec.to_string(),
                message: format!("invalid character '{ch}' at position {i}"),
            });
        }
    }
    Ok(mode)
}

/// Default permission policy for created entries.
///
/// Returns `None` when the destination already has a mode to preserve.
/// Otherwise the source mode is masked by a table indexed on hidden vs
/// regular destination names, with execute bits forced for directories
/// and, on Windows destinations, for `.sh` files (Windows only reports
/// the execute bit for its own executable extensions).
pub fn umask_mode(
    dest_path: &str,
    dest_convention: PathConvention,
    source_mode: u32,
    dest_mode: Option<u32>,
    is_directory: bool,
) -> Option<u32> {
    if dest_mode.is_some() {
        return None;
    }

    let mask = if dest_convention.is_dot_entry(dest_path) {
        HIDDEN_MODE_MASK
    } else {
        REGULAR_MODE_MASK
    };

    let mut mode = source_mode;
    if is_directory || (dest_convention == PathConvention::Windows && dest_path.ends_with(".sh")) {
        mode |= 0o111;
    }

    Some(mode & mask)
}

/// Render an elapsed duration with its largest non-zero unit, in the
/// style of the summary line (`3s`, `120ms`, `2m`).
pub fn format_elapsed(elapsed: Duration) -> String {
    const SCALE: &[(&str, u128)] = &[
        ("w", 604_800_000_000_000),
        ("d", 86_400_000_000_000),
        ("h", 3_600_000_000_000),
        ("m", 60_000_000_000),
        ("s", 1_000_000_000),
        ("ms", 1_000_000),
        ("\u{b5}s", 1_000),
        ("ns", 1),
    ];

    let nanos = elapsed.as_nanos();
    for (unit, step) in SCALE {
        if nanos >= *step {
            let value = (nanos as f64 / *step as f64).round() as u128;
            return format!("{value}{unit}");
        }
    }
    "0s".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convention_from_probe() {
        assert_eq!(PathConvention::from_probe("/home/user"), PathConvention::Posix);
        assert_eq!(PathConvention::from_probe("C:\\Users\\u"), PathConvention::Windows);
        assert_eq!(PathConvention::from_probe("/C:/Users/u"), PathConvention::Windows);
        assert_eq!(PathConvention::from_probe("C:"), PathConvention::Windows);
        assert_eq!(PathConvention::from_probe("./relative"), PathConvention::Posix);
    }

    #[test]
    fn test_posix_path_helpers() {
        let conv = PathConvention::Posix;
        assert_eq!(conv.basename("/a/b/c.txt"), "c.txt");
        assert_eq!(conv.basename("/a/b/"), "b");
        assert_eq!(conv.dirname("/a/b/c.txt"), "/a/b");
        assert_eq!(conv.dirname("/a"), "/");
        assert_eq!(conv.dirname("name"), ".");
        assert_eq!(conv.join("/a/b", "c"), "/a/b/c");
        assert_eq!(conv.join("/a/b/", "c"), "/a/b/c");
    }

    #[test]
    fn test_windows_dirname_keeps_drive() {
        let conv = PathConvention::Windows;
        assert_eq!(conv.dirname("C:\\x"), "C:\\");
        assert_eq!(conv.dirname("C:\\a\\b"), "C:\\a");
    }

    #[test]
    fn test_dot_entry_detection() {
        let conv = PathConvention::Posix;
        assert!(conv.is_dot_entry(".git"));
        assert!(conv.is_dot_entry("a/b/.hidden"));
        assert!(!conv.is_dot_entry("a/.b/visible"));
        assert!(!conv.is_dot_entry("plain.txt"));
    }

    #[test]
    fn test_parse_mode_octal() {
        assert_eq!(parse_mode("755").expect("octal"), 0o755);
        assert_eq!(parse_mode("0644").expect("octal"), 0o644);
    }

    #[test]
    fn test_parse_mode_rwx_string() {
        assert_eq!(parse_mode("rwxr-xr-x").expect("rwx"), 0o755);
        assert_eq!(parse_mode("rw-rw-r--").expect("rwx"), 0o664);
        assert_eq!(parse_mode("---------").expect("rwx"), 0);
        assert!(parse_mode("rwxrwxrw").is_err());
        assert!(parse_mode("rwxrwxrwz").is_err());
    }

    #[test]
    fn test_umask_respects_existing_dest_mode() {
        assert_eq!(
            umask_mode("/d/file", PathConvention::Posix, 0o666, Some(0o600), false),
            None
        );
    }

    #[test]
    fn test_umask_hidden_vs_regular() {
        let regular = umask_mode("/d/file", PathConvention::Posix, 0o777, None, false);
        let hidden = umask_mode("/d/.file", PathConvention::Posix, 0o777, None, false);
        assert_eq!(regular, Some(0o775));
        assert_eq!(hidden, Some(0o755));
    }

    #[test]
    fn test_umask_directory_gains_execute() {
        let dir = umask_mode("/d/sub", PathConvention::Posix, 0o664, None, true);
        assert_eq!(dir, Some(0o775 & (0o664 | 0o111)));
    }

    #[test]
    fn test_umask_windows_shell_script() {
        let sh = umask_mode("C:\\d\\run.sh", PathConvention::Windows, 0o644, None, false);
        assert_eq!(sh, Some(0o775 & (0o644 | 0o111)));
    }

    #[test]
    fn test_overrides_layering() {
        let base = SyncOptions::new();
        let overrides = SyncOverrides {
            delete: Some(true),
            modify_window: Some(2),
            limit: Some(8),
            ..Default::default()
        };
        let merged = base.merged(&overrides);
        assert!(merged.delete);
        assert_eq!(merged.modify_window, 2);
        assert_eq!(merged.limit, 8);
        // untouched fields keep their defaults
        assert!(merged.dot);
        assert!(merged.empty_dirs);
    }

    #[test]
    fn test_format_elapsed_units() {
        assert_eq!(format_elapsed(Duration::from_secs(3)), "3s");
        assert_eq!(format_elapsed(Duration::from_millis(120)), "120ms");
        assert_eq!(format_elapsed(Duration::from_secs(120)), "2m");
    }
}
