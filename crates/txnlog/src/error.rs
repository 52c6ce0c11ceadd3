use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reading, writing, or recovering a
/// transaction log.
#[derive(Debug, Error)]
pub enum TxnLogError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A non-terminal record is unparseable, a checksum does not match, or a
    /// REMOVE record no longer matches the filesystem. Fatal for this log;
    /// recovery logs it and continues with other logs.
    #[error("corrupt transaction log {}: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// A file matched the log-name pattern but its name does not decompose
    /// into a known operation type and a valid id.
    #[error("malformed transaction log name: {0}")]
    BadLogName(String),

    /// Several failures accumulated over a bulk operation (recovery,
    /// leftover removal). No failure is dropped.
    #[error("{} suppressed failures, first: {}", .0.len(), .0[0])]
    Multiple(Vec<TxnLogError>),
}

pub type Result<T> = std::result::Result<T, TxnLogError>;

/// Folds `err` into `accumulate` without losing either: bulk operations
/// carry every failure to the boundary instead of stopping at the first.
pub fn merge(accumulate: Option<TxnLogError>, err: TxnLogError) -> Option<TxnLogError> {
    match accumulate {
        None => Some(err),
        Some(TxnLogError::Multiple(mut suppressed)) => {
            suppressed.push(err);
            Some(TxnLogError::Multiple(suppressed))
        }
        Some(first) => Some(TxnLogError::Multiple(vec![first, err])),
    }
}
