//! The append-only transaction log file.
//!
//! ## Line format
//!
//! ```text
//! add:[tbl-0002,0,0][3915388680]
//! remove:[tbl-0001,1708600000000,5][2600258195]
//! commit:[,1708600001000,0][483792989]
//! ```
//!
//! The bracketed trailing number is a CRC-32 computed cumulatively over the
//! record prefixes of the file in order, so each line certifies the entire
//! file up to and including itself. A torn write of the final line is
//! recoverable; corruption anywhere else, or a REMOVE record whose files
//! changed on disk behind the log, is not.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crc32fast::Hasher as Crc32;
use regex::Regex;
use tracing::{debug, error, warn};

use table::TableDescriptor;

use crate::data::DirectoryFd;
use crate::error::{Result, TxnLogError};
use crate::record::{mtime_millis, now_millis, Record, RecordKind};

fn line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.*)\[(\d+)\]$").unwrap())
}

/// In-memory view of one transaction log file: the deduplicated record set
/// plus the running checksum over everything appended so far.
pub struct LogFile {
    path: PathBuf,
    folder: PathBuf,
    records: HashSet<Record>,
    crc: Crc32,
    last_record_corrupt: bool,
}

impl LogFile {
    pub fn new(folder: impl Into<PathBuf>, path: impl Into<PathBuf>) -> Self {
        LogFile {
            path: path.into(),
            folder: folder.into(),
            records: HashSet::new(),
            crc: Crc32::new(),
            last_record_corrupt: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// True if the final line of the file failed to parse or checksum during
    /// the last [`read`](Self::read) but the rest of the log verified.
    pub fn last_record_corrupt(&self) -> bool {
        self.last_record_corrupt
    }

    /// Parses the existing file contents into the record set, verifying the
    /// cumulative checksum line by line and every REMOVE record against the
    /// current filesystem state.
    pub fn read(&mut self) -> Result<()> {
        self.records.clear();
        self.crc = Crc32::new();
        self.last_record_corrupt = false;

        let file = File::open(&self.path)?;
        let lines: Vec<String> = BufReader::new(file).lines().collect::<io::Result<_>>()?;

        let count = lines.len();
        for (i, line) in lines.iter().enumerate() {
            match self.read_record(line) {
                Ok(record) => {
                    self.records.insert(record);
                }
                Err(reason) => self.handle_corrupt_line(&reason, i + 1 == count)?,
            }
        }

        for record in &self.records {
            if !record.verify(&self.folder, false) {
                return Err(self.corrupt(format!(
                    "record [{record}] does not match the state on disk"
                )));
            }
        }

        Ok(())
    }

    fn read_record(&mut self, line: &str) -> std::result::Result<Record, String> {
        let caps = line_re()
            .captures(line)
            .ok_or_else(|| format!("cannot parse line \"{line}\""))?;

        // the checksum covers the record prefixes only, never the checksums
        // themselves
        let prefix = caps.get(1).unwrap().as_str();
        self.crc.update(prefix.as_bytes());

        let expected: u32 = caps
            .get(2)
            .unwrap()
            .as_str()
            .parse()
            .map_err(|_| format!("unparseable checksum in \"{line}\""))?;
        if self.crc.clone().finalize() != expected {
            return Err(format!("invalid checksum {expected} for \"{line}\""));
        }

        Record::parse(prefix).ok_or_else(|| format!("cannot parse record \"{prefix}\""))
    }

    /// A corrupt final line means the process died while serialising it: the
    /// record never took effect, and the log is still usable provided every
    /// earlier REMOVE matches the disk exactly. Corruption anywhere else is
    /// fatal for the log.
    fn handle_corrupt_line(&mut self, reason: &str, is_last: bool) -> Result<()> {
        if !is_last {
            return Err(self.corrupt(format!("non-last record is corrupt [{reason}]")));
        }

        for record in &self.records {
            if !record.verify(&self.folder, true) {
                return Err(self.corrupt(format!(
                    "last record is corrupt [{reason}] and at least one previous record \
                     does not match the state on disk"
                )));
            }
        }

        warn!(
            "last record of {} is corrupt or incomplete [{}], but all previous records \
             match the state on disk; continuing",
            self.path.display(),
            reason
        );
        self.last_record_corrupt = true;
        Ok(())
    }

    fn corrupt(&self, reason: String) -> TxnLogError {
        TxnLogError::Corrupt {
            path: self.path.clone(),
            reason,
        }
    }

    /// Records `table` under `kind` and appends the line. Returns `false`
    /// without touching the file if an equal record is already present.
    pub fn add(&mut self, kind: RecordKind, table: &TableDescriptor, dir: &DirectoryFd) -> Result<bool> {
        let record = self.make_record(kind, table);
        if self.records.contains(&record) {
            return Ok(false);
        }
        self.append(record, dir)?;
        Ok(true)
    }

    fn make_record(&self, kind: RecordKind, table: &TableDescriptor) -> Record {
        assert_eq!(
            table.directory(),
            self.folder.as_path(),
            "table {table} is not in the log's directory"
        );
        match kind {
            RecordKind::Add => Record::add(table.base()),
            RecordKind::Remove => Record::remove_in(&self.folder, table.base()),
            _ => unreachable!("terminators are appended via commit/abort"),
        }
    }

    fn append(&mut self, record: Record, dir: &DirectoryFd) -> Result<()> {
        let prefix = record.to_string();
        self.crc.update(prefix.as_bytes());
        let line = format!("{}[{}]\n", prefix, self.crc.clone().finalize());

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.sync_all()?;

        self.records.insert(record);
        dir.sync();
        Ok(())
    }

    /// Appends the COMMIT terminator. The transaction must not already have
    /// terminated.
    pub fn commit(&mut self, dir: &DirectoryFd) -> Result<()> {
        assert!(!self.has_abort(), "already aborted");
        assert!(!self.has_commit(), "already committed");
        self.append(Record::commit(now_millis()), dir)
    }

    /// Appends the ABORT terminator. The transaction must not already have
    /// terminated.
    pub fn abort(&mut self, dir: &DirectoryFd) -> Result<()> {
        assert!(!self.has_abort(), "already aborted");
        assert!(!self.has_commit(), "already committed");
        self.append(Record::abort(now_millis()), dir)
    }

    pub fn has_commit(&self) -> bool {
        self.records.contains(&Record::commit(0))
    }

    pub fn has_abort(&self) -> bool {
        self.records.contains(&Record::abort(0))
    }

    pub fn completed(&self) -> bool {
        self.has_commit() || self.has_abort()
    }

    pub fn contains(&self, kind: RecordKind, table: &TableDescriptor) -> bool {
        self.records.contains(&Record::probe(kind, table.base()))
    }

    /// Stops tracking `table` under `kind` and deletes its files. The record
    /// must be present. The on-disk line is left behind; replay tolerates
    /// tracked files that no longer exist.
    pub fn remove(&mut self, kind: RecordKind, table: &TableDescriptor) -> Result<()> {
        let probe = Record::probe(kind, table.base());
        let record = self
            .records
            .take(&probe)
            .unwrap_or_else(|| panic!("[{}] is not tracked by {}", probe, self.path.display()));
        self.delete_record_files(&record)
    }

    /// Deletes the tracked files of every record of `kind`, then forgets all
    /// records.
    pub fn delete_records(&mut self, kind: RecordKind) -> Result<()> {
        assert!(self.exists(), "expected {} to exist", self.path.display());
        for record in self.records.iter().filter(|r| r.kind == kind) {
            Self::delete_files_of(&self.folder, record)?;
        }
        self.records.clear();
        Ok(())
    }

    fn delete_record_files(&self, record: &Record) -> Result<()> {
        Self::delete_files_of(&self.folder, record)
    }

    fn delete_files_of(folder: &Path, record: &Record) -> Result<()> {
        let mut files = record.tracked_files(folder);
        if files.is_empty() {
            return Ok(()); // files no longer exist, nothing to do
        }

        // ascending mtime, so a partial failure leaves the surviving files'
        // max mtime unchanged and the REMOVE record still verifies on retry
        files.sort_by_key(|f| mtime_millis(f));

        for file in &files {
            delete_file(file)?;
        }
        Ok(())
    }

    /// All files currently on disk tracked by records of `kind`.
    pub fn tracked_files(&self, kind: RecordKind) -> HashSet<PathBuf> {
        self.records
            .iter()
            .filter(|r| r.kind == kind)
            .flat_map(|r| r.tracked_files(&self.folder))
            .collect()
    }

    /// Deletes the log file itself.
    pub fn delete(&self) -> Result<()> {
        delete_file(&self.path)
    }

    #[cfg(test)]
    pub(crate) fn records(&self) -> &HashSet<Record> {
        &self.records
    }
}

/// Deletes one file. A file that is already gone is logged and tolerated;
/// any other failure propagates.
pub(crate) fn delete_file(path: &Path) -> Result<()> {
    debug!("deleting {}", path.display());
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            error!("unable to delete {} as it does not exist", path.display());
            Ok(())
        }
        Err(e) => {
            error!("unable to delete {}: {}", path.display(), e);
            Err(e.into())
        }
    }
}
