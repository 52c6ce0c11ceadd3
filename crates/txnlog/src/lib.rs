//! # TxnLog — crash-safe file transactions for table replacement
//!
//! Makes the replacement of immutable on-disk tables atomic across process
//! crashes. A flush or compaction produces new tables and obsoletes old
//! ones; whatever happens, startup recovery leaves the directory equivalent
//! to either the completed transaction or its cancellation, never a
//! half-applied mix.
//!
//! ## Protocol
//!
//! ```text
//! engine ─ track_new(t_new) ─► Transaction ─► log: add:[t_new,0,0][CRC]
//! engine ─ obsolete(t_old)  ─► Transaction ─► log: remove:[t_old,mtime,n][CRC]
//! engine ─ commit()         ─► Transaction ─► log: commit:[,ts,0][CRC]
//!                                             └► readers released
//!                                                └► tidier deletes t_old,
//!                                                   then the log itself
//! ```
//!
//! Every line carries a CRC-32 computed cumulatively over the file, and
//! every append is followed by an fsync of the enclosing directory. REMOVE
//! records additionally snapshot the max mtime and file count of the table
//! they obsolete, so recovery can tell a torn final append (benign) apart
//! from disk corruption underneath an older record (fatal for the log).
//!
//! ## Module responsibilities
//!
//! | Module          | Purpose                                            |
//! |-----------------|----------------------------------------------------|
//! | [`record`]      | record grammar, per-record filesystem verification |
//! | [`logfile`]     | the append-only file: parse, checksum, append      |
//! | [`data`]        | log naming, directory fsync, recovery primitives   |
//! | [`transaction`] | engine-facing façade and its state machine         |
//! | [`tidier`]      | ref-counted cleanup, retry queue, delete executor  |
//! | [`recovery`]    | startup scan and temporary-file listing            |

mod data;
mod error;
mod logfile;
mod record;
mod recovery;
mod tidier;
mod transaction;

pub use data::{DirectoryFd, OperationType, TransactionData};
pub use error::{merge, Result, TxnLogError};
pub use logfile::LogFile;
pub use record::{Record, RecordKind};
pub use recovery::{log_files, remove_unfinished_leftovers, temporary_files};
pub use tidier::{reschedule_failed_deletions, wait_for_deletions, Obsoletion};
pub use transaction::Transaction;

#[cfg(test)]
mod tests;
