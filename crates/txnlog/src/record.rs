//! Log records.
//!
//! One record per line, in the textual form
//!
//! ```text
//! <kind>:[<relpath>,<update_time>,<num_files>]
//! ```
//!
//! followed by the running CRC appended by [`LogFile`](crate::LogFile).
//! ADD records name a new table to keep on commit; REMOVE records name an
//! old table to keep on abort and also capture the last update time and
//! file count of the table so recovery can detect disk mutation underneath
//! a live log. COMMIT and ABORT terminate the transaction.

use std::fmt;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// New files, retained on commit.
    Add,
    /// Old files, retained on abort.
    Remove,
    Commit,
    Abort,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Add => "add",
            RecordKind::Remove => "remove",
            RecordKind::Commit => "commit",
            RecordKind::Abort => "abort",
        }
    }

    fn has_path(self) -> bool {
        matches!(self, RecordKind::Add | RecordKind::Remove)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed log line. Equality and hashing use (kind, relpath) only:
/// update time, file count, and checksum may legitimately differ between a
/// record and its re-derivation from disk, and there must be exactly one
/// terminator regardless of its timestamp.
#[derive(Debug, Clone)]
pub struct Record {
    pub kind: RecordKind,
    /// Base filename of the tracked table, relative to the log's directory.
    /// Empty for terminators.
    pub relpath: String,
    /// REMOVE: max mtime (ms since epoch) of the tracked files at record
    /// creation. COMMIT/ABORT: wall-clock termination time. ADD: zero.
    pub update_time: u64,
    /// REMOVE: number of tracked files at record creation. Otherwise zero.
    pub num_files: usize,
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.relpath == other.relpath
    }
}

impl Eq for Record {}

impl Hash for Record {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.relpath.hash(state);
    }
}

fn record_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?i)(add|remove|commit|abort):\[([^,]*),(\d*),(\d*)\]$").unwrap()
    })
}

impl Record {
    fn new(kind: RecordKind, relpath: String, update_time: u64, num_files: usize) -> Self {
        // only some fields are meaningful per kind; zero out the rest so
        // that re-serialisation is canonical
        Record {
            kind,
            relpath: if kind.has_path() { relpath } else { String::new() },
            update_time: if kind == RecordKind::Add { 0 } else { update_time },
            num_files: if kind == RecordKind::Remove { num_files } else { 0 },
        }
    }

    pub fn add(relpath: impl Into<String>) -> Self {
        Record::new(RecordKind::Add, relpath.into(), 0, 0)
    }

    pub fn commit(update_time: u64) -> Self {
        Record::new(RecordKind::Commit, String::new(), update_time, 0)
    }

    pub fn abort(update_time: u64) -> Self {
        Record::new(RecordKind::Abort, String::new(), update_time, 0)
    }

    /// A REMOVE record snapshotting the given files as they are right now.
    pub fn remove(files: &[PathBuf], relpath: impl Into<String>) -> Self {
        let last_modified = files.iter().map(|f| mtime_millis(f)).max().unwrap_or(0);
        Record::new(RecordKind::Remove, relpath.into(), last_modified, files.len())
    }

    /// A REMOVE record for the files currently on disk under `relpath`.
    pub fn remove_in(dir: &Path, relpath: &str) -> Self {
        Record::remove(&tracked_files(dir, relpath), relpath)
    }

    /// A lookup key for membership tests and removal; equality ignores the
    /// filesystem-derived fields, so no directory scan is needed.
    pub(crate) fn probe(kind: RecordKind, relpath: impl Into<String>) -> Self {
        Record::new(kind, relpath.into(), 0, 0)
    }

    /// Parses the record prefix of one line (the part before the trailing
    /// `[<crc>]`). Returns `None` if it does not match the record grammar.
    pub fn parse(prefix: &str) -> Option<Record> {
        let caps = record_re().captures(prefix)?;
        let kind = match caps[1].to_ascii_lowercase().as_str() {
            "add" => RecordKind::Add,
            "remove" => RecordKind::Remove,
            "commit" => RecordKind::Commit,
            "abort" => RecordKind::Abort,
            _ => return None,
        };
        let update_time = caps[3].parse().ok()?;
        let num_files = caps[4].parse().ok()?;
        Some(Record::new(kind, caps[2].to_string(), update_time, num_files))
    }

    /// Re-derives this record from the files on disk and cross-checks the
    /// recorded state. Only REMOVE records carry verifiable state.
    ///
    /// A REMOVE whose tracked files are all gone passes: deletion already
    /// ran to completion for it, so there is nothing left to cross-check and
    /// a repeated recovery must not fail on it.
    pub fn verify(&self, dir: &Path, last_record_corrupt: bool) -> bool {
        if self.kind != RecordKind::Remove {
            return true;
        }

        let files = tracked_files(dir, &self.relpath);
        if files.is_empty() {
            return true;
        }

        let current = Record::remove(&files, self.relpath.clone());
        if self.update_time != current.update_time {
            error!(
                "possible disk corruption for table [{}], record [{}]: last update time {} should have been {}",
                self.relpath, self, current.update_time, self.update_time
            );
            return false;
        }

        // a torn final record is only recoverable if every earlier REMOVE
        // still matches the disk exactly, file count included
        if last_record_corrupt && current.num_files != self.num_files {
            error!(
                "possible disk corruption for table [{}], record [{}]: number of files {} should have been {}",
                self.relpath, self, current.num_files, self.num_files
            );
            return false;
        }

        true
    }

    /// The files this record tracks, as currently present in `dir`.
    pub fn tracked_files(&self, dir: &Path) -> Vec<PathBuf> {
        if !self.kind.has_path() {
            return Vec::new();
        }
        tracked_files(dir, &self.relpath)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:[{},{},{}]",
            self.kind, self.relpath, self.update_time, self.num_files
        )
    }
}

/// Directory entries whose names start with `relpath`.
pub(crate) fn tracked_files(dir: &Path, relpath: &str) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            if entry.file_name().to_string_lossy().starts_with(relpath) {
                files.push(entry.path());
            }
        }
    }
    files
}

/// Modification time in ms since epoch, zero when unavailable.
pub(crate) fn mtime_millis(path: &Path) -> u64 {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Wall-clock time in ms since epoch, for terminator records.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
