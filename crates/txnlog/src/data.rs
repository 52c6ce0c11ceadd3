//! Filesystem-level handle to one transaction.
//!
//! [`TransactionData`] is split from the live [`Transaction`](crate::Transaction)
//! façade because recovery needs to reconstruct leftovers and work out which
//! files are temporary without any of the live transactional behaviour, and
//! the tidier needs exactly the same primitives after the façade is gone.

use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{error, warn};
use uuid::Uuid;

use table::{TableDescriptor, FORMAT_VERSION};

use crate::error::{merge, Result, TxnLogError};
use crate::logfile::LogFile;
use crate::record::RecordKind;

/// The operation that opened a transaction, encoded into the log file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    Flush,
    Compaction,
    Cleanup,
    Upgrade,
}

impl OperationType {
    pub fn file_name(self) -> &'static str {
        match self {
            OperationType::Flush => "flush",
            OperationType::Compaction => "compaction",
            OperationType::Cleanup => "cleanup",
            OperationType::Upgrade => "upgrade",
        }
    }

    pub fn from_file_name(name: &str) -> Option<Self> {
        match name {
            "flush" => Some(OperationType::Flush),
            "compaction" => Some(OperationType::Compaction),
            "cleanup" => Some(OperationType::Cleanup),
            "upgrade" => Some(OperationType::Upgrade),
            _ => None,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

const LOG_EXT: &str = ".log";

fn log_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"^{FORMAT_VERSION}_txn_([a-z]+)_([0-9a-f\-]+)\.log$"
        ))
        .unwrap()
    })
}

/// Best-effort handle on a directory, used to fsync directory metadata
/// between a log append and the corresponding physical file operation.
///
/// On platforms where opening or fsyncing a directory is unsupported the
/// handle is empty and every sync is a no-op; crash recovery then only
/// holds up to the filesystem's own metadata flushing schedule.
pub struct DirectoryFd(Option<File>);

impl DirectoryFd {
    pub fn open(dir: &Path) -> Self {
        match File::open(dir) {
            Ok(f) => DirectoryFd(Some(f)),
            Err(e) => {
                warn!(
                    "cannot open directory {} for fsync, proceeding without: {}",
                    dir.display(),
                    e
                );
                DirectoryFd(None)
            }
        }
    }

    pub fn sync(&self) {
        if let Some(f) = &self.0 {
            if let Err(e) = f.sync_all() {
                warn!("directory fsync failed: {}", e);
            }
        }
    }

    pub fn close(&mut self) {
        self.0 = None;
    }
}

/// Owns the log file and the directory descriptor of one transaction, and
/// exposes the recovery primitives: read the residual log, delete whichever
/// leftover files the outcome dictates, report the temporary set.
pub struct TransactionData {
    op_type: OperationType,
    id: Uuid,
    folder: PathBuf,
    file: LogFile,
    dir_fd: DirectoryFd,
}

impl TransactionData {
    pub fn new(op_type: OperationType, folder: &Path, id: Uuid) -> Self {
        let path = folder.join(format!(
            "{FORMAT_VERSION}_txn_{}_{}{LOG_EXT}",
            op_type.file_name(),
            id
        ));
        TransactionData {
            op_type,
            id,
            folder: folder.to_path_buf(),
            file: LogFile::new(folder, path),
            dir_fd: DirectoryFd::open(folder),
        }
    }

    /// Reconstructs the handle from an existing log file path, decomposing
    /// the name into operation type and id.
    pub fn from_log_path(log: &Path) -> Result<Self> {
        let name = log
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TxnLogError::BadLogName(log.display().to_string()))?;
        let caps = log_name_re()
            .captures(name)
            .ok_or_else(|| TxnLogError::BadLogName(name.to_string()))?;
        let op_type = OperationType::from_file_name(&caps[1])
            .ok_or_else(|| TxnLogError::BadLogName(name.to_string()))?;
        let id = Uuid::parse_str(&caps[2]).map_err(|_| TxnLogError::BadLogName(name.to_string()))?;
        let folder = log.parent().unwrap_or_else(|| Path::new("."));
        Ok(TransactionData::new(op_type, folder, id))
    }

    /// Whether `name` matches the transaction-log naming convention.
    pub fn is_log_file(name: &str) -> bool {
        log_name_re().is_match(name)
    }

    pub fn op_type(&self) -> OperationType {
        self.op_type
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn log_path(&self) -> &Path {
        self.file.path()
    }

    pub fn completed(&self) -> bool {
        self.file.completed()
    }

    /// Parses the residual log, folding any failure into `accumulate`
    /// instead of returning early.
    pub fn read_log_file(&mut self, accumulate: Option<TxnLogError>) -> Option<TxnLogError> {
        match self.file.read() {
            Ok(()) => accumulate,
            Err(e) => {
                if matches!(e, TxnLogError::Corrupt { .. }) {
                    error!(
                        "possible disk corruption: failed to read transaction log {}: {}",
                        self.file.path().display(),
                        e
                    );
                }
                merge(accumulate, e)
            }
        }
    }

    /// Deletes the files the transaction outcome obsoleted, then the log
    /// file itself: the REMOVE set if committed, the ADD set if aborted or
    /// never terminated. The directory fsync in between guarantees a crash
    /// cannot leave the log claiming completion for files that still exist.
    pub fn remove_leftovers(&mut self, accumulate: Option<TxnLogError>) -> Option<TxnLogError> {
        let outcome = if self.file.has_commit() {
            self.file.delete_records(RecordKind::Remove)
        } else {
            self.file.delete_records(RecordKind::Add)
        };

        match outcome.and_then(|()| {
            self.dir_fd.sync();
            self.file.delete()
        }) {
            Ok(()) => accumulate,
            Err(e) => merge(accumulate, e),
        }
    }

    /// The files whose fate this transaction still owns: the REMOVE set
    /// once committed, the ADD set otherwise.
    pub fn temporary_files(&self) -> HashSet<PathBuf> {
        self.dir_fd.sync();

        if !self.file.exists() {
            return HashSet::new();
        }

        if self.file.has_commit() {
            self.file.tracked_files(RecordKind::Remove)
        } else {
            self.file.tracked_files(RecordKind::Add)
        }
    }

    pub fn close(&mut self) {
        self.dir_fd.close();
    }

    pub(crate) fn add(&mut self, kind: RecordKind, table: &TableDescriptor) -> Result<bool> {
        self.file.add(kind, table, &self.dir_fd)
    }

    pub(crate) fn remove(&mut self, kind: RecordKind, table: &TableDescriptor) -> Result<()> {
        self.file.remove(kind, table)
    }

    pub(crate) fn contains(&self, kind: RecordKind, table: &TableDescriptor) -> bool {
        self.file.contains(kind, table)
    }

    pub(crate) fn commit(&mut self) -> Result<()> {
        self.file.commit(&self.dir_fd)
    }

    pub(crate) fn abort(&mut self) -> Result<()> {
        self.file.abort(&self.dir_fd)
    }
}

impl fmt::Display for TransactionData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.file.path().display())
    }
}
