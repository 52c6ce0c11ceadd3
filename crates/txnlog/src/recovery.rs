//! Startup recovery and directory listing.
//!
//! At startup every storage directory is scanned for residual transaction
//! logs; each one is replayed and its leftovers removed, leaving the
//! directory equivalent to either the completed transaction or its
//! cancellation. One corrupt log never blocks recovery of the others.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{error, warn};

use crate::data::TransactionData;
use crate::error::{merge, TxnLogError};

/// How many times a directory scan is restarted when a listed log file
/// vanishes before it can be read (a concurrent transaction finished and
/// its tidier deleted the log).
const LIST_RETRIES: usize = 3;

/// Replays every residual transaction log in `dir` and removes the
/// leftover files its outcome dictates, then the log itself.
///
/// Errors are logged and recovery continues with the remaining logs; a
/// corrupt log keeps all of its files in place for inspection.
pub fn remove_unfinished_leftovers(dir: &Path) {
    let mut accumulate = None;

    for log in list_logs(dir) {
        let mut data = match TransactionData::from_log_path(&log) {
            Ok(data) => data,
            Err(e) => {
                accumulate = merge(accumulate, e);
                continue;
            }
        };

        match data.read_log_file(None) {
            None => accumulate = data.remove_leftovers(accumulate),
            Some(e) => accumulate = merge(accumulate, e),
        }
        data.close();
    }

    if let Some(e) = accumulate {
        error!(
            "failed to remove unfinished transaction leftovers in {}: {}",
            dir.display(),
            e
        );
    }
}

/// The union of every residual or live log's temporary set in `dir`: files
/// not yet owned by a completed transaction, or owned by a completed one
/// and about to disappear.
///
/// A log file that vanishes between the directory listing and the read is
/// a transaction that finished concurrently; the scan re-lists and retries
/// rather than reporting an error.
pub fn temporary_files(dir: &Path) -> HashSet<PathBuf> {
    for _ in 0..LIST_RETRIES {
        if let Some(files) = try_temporary_files(dir) {
            return files;
        }
    }

    warn!(
        "a transaction log in {} kept vanishing mid-scan; giving up after {} attempts",
        dir.display(),
        LIST_RETRIES
    );
    HashSet::new()
}

fn try_temporary_files(dir: &Path) -> Option<HashSet<PathBuf>> {
    let mut ret = HashSet::new();

    for log in list_logs(dir) {
        let mut data = match TransactionData::from_log_path(&log) {
            Ok(data) => data,
            Err(e) => {
                warn!("skipping {}: {}", log.display(), e);
                continue;
            }
        };

        let err = data.read_log_file(None);
        let temp = match err {
            None => Some(data.temporary_files()),
            Some(TxnLogError::Io(ref e)) if e.kind() == io::ErrorKind::NotFound => {
                // the log was deleted under us; the whole listing is stale
                data.close();
                return None;
            }
            Some(e) => {
                warn!("failed to read transaction log {}: {}", log.display(), e);
                None
            }
        };
        data.close();

        if let Some(files) = temp {
            ret.extend(files);
        }
    }

    Some(ret)
}

/// The transaction log files currently present in `dir`.
pub fn log_files(dir: &Path) -> HashSet<PathBuf> {
    list_logs(dir).into_iter().collect()
}

fn list_logs(dir: &Path) -> Vec<PathBuf> {
    let mut logs = Vec::new();
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            if let Some(name) = entry.file_name().to_str() {
                if TransactionData::is_log_file(name) {
                    logs.push(entry.path());
                }
            }
        }
    }
    logs
}
