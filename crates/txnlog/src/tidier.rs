//! End-of-life cleanup.
//!
//! Two tidiers cooperate. The per-table tidier runs when the engine
//! releases the last in-memory reference to an obsoleted reader: it deletes
//! the table's component files, data component first, and then releases its
//! reference on the parent transaction. The transaction tidier runs when
//! the last such reference is gone: it removes whatever leftovers the
//! outcome dictates and finally the log file itself.
//!
//! Deleting table files is tricky because the engine may still hold memory
//! maps that pin the files on some platforms. Any failed deletion is pushed
//! onto a process-wide retry queue and reattempted on demand, after the
//! engine signals that maps were dropped, and implicitly at the next
//! startup via recovery.

use std::sync::{Arc, OnceLock};
use std::thread;

use crossbeam::channel::{self, Sender};
use crossbeam::queue::SegQueue;
use tracing::{debug, error, info};

use table::{Component, TableDescriptor, TableReader};

use crate::data::TransactionData;
use crate::logfile::delete_file;
use crate::transaction::TxnShared;

/// Cleanup handle for one obsoleted reader, returned by
/// [`Transaction::obsolete`](crate::Transaction::obsolete).
///
/// The engine calls [`run`](Obsoletion::run) once the last in-memory
/// reference to the reader is released, or [`abort`](Obsoletion::abort) to
/// cancel the pending obsoletion. Dropping the handle without running it is
/// equivalent to aborting it: the reference on the parent transaction is
/// released and nothing is deleted.
pub struct Obsoletion {
    tidier: TableTidier,
}

impl Obsoletion {
    pub(crate) fn new(reader: &TableReader, was_new: bool, parent: Arc<TxnShared>) -> Self {
        Obsoletion {
            tidier: TableTidier {
                desc: reader.descriptor().clone(),
                bytes_on_disk: reader.bytes_on_disk(),
                was_new,
                parent,
            },
        }
    }

    /// True if the obsoleted table was created within the same transaction.
    pub fn was_new(&self) -> bool {
        self.tidier.was_new
    }

    /// Deletes the reader's files and releases the reference on the parent
    /// transaction. Failed deletions land on the retry queue; the parent
    /// reference is then retained so the transaction's own cleanup waits
    /// for the retry to succeed.
    pub fn run(self) {
        self.tidier.run();
    }

    /// Releases the reference on the parent transaction without deleting
    /// anything.
    pub fn abort(self) {}
}

/// Per-reader cleanup. Holds the descriptor only, never the reader itself,
/// so the reader's lifetime stays under the engine's control.
pub(crate) struct TableTidier {
    desc: TableDescriptor,
    bytes_on_disk: u64,
    was_new: bool,
    parent: Arc<TxnShared>,
}

impl TableTidier {
    fn run(self) {
        if let Some(tracker) = &self.parent.tracker {
            tracker.clear_read_stats(&self.desc);
        }

        // data component first: if the process dies partway the table is
        // still recognised as deletable on restart because its principal
        // component is gone
        let deleted = (|| -> crate::error::Result<()> {
            delete_file(&self.desc.component_path(Component::Data))?;
            for file in self.desc.component_files()? {
                delete_file(&file)?;
            }
            Ok(())
        })();

        if let Err(e) = deleted {
            error!(
                "failed deletion for {}: {}; will retry after gc hints and on restart",
                self.desc, e
            );
            failed_deletions().push(RetryTask::Table(self));
            return;
        }

        if !self.was_new {
            if let Some(tracker) = &self.parent.tracker {
                tracker.dec_disk_usage(self.bytes_on_disk);
            }
        }

        // dropping self releases the reference on the parent transaction
    }
}

/// Transaction-level cleanup, run when the last reference on the shared
/// core is dropped after a terminator reached disk.
pub(crate) struct TransactionTidier {
    data: TransactionData,
}

impl TransactionTidier {
    fn run(mut self) {
        debug!("removing files for transaction {}", self.data);
        assert!(
            self.data.completed(),
            "expected a completed transaction: {}",
            self.data
        );

        match self.data.remove_leftovers(None) {
            None => {
                debug!("closing file transaction {}", self.data);
                self.data.close();
            }
            Some(e) => {
                info!(
                    "failed deleting files for transaction {}: {}; will retry after gc hints \
                     and on restart",
                    self.data, e
                );
                failed_deletions().push(RetryTask::Parent(self));
            }
        }
    }
}

pub(crate) fn run_transaction_tidier(data: TransactionData) {
    TransactionTidier { data }.run();
}

/// A deletion that failed and was parked for retry.
pub(crate) enum RetryTask {
    Table(TableTidier),
    Parent(TransactionTidier),
}

impl RetryTask {
    fn run(self) {
        match self {
            RetryTask::Table(t) => t.run(),
            RetryTask::Parent(t) => t.run(),
        }
    }
}

fn failed_deletions() -> &'static SegQueue<RetryTask> {
    static QUEUE: OnceLock<SegQueue<RetryTask>> = OnceLock::new();
    QUEUE.get_or_init(SegQueue::new)
}

enum Job {
    Run(RetryTask),
    Barrier(Sender<()>),
}

/// Deletions run on a single dedicated thread so that
/// [`wait_for_deletions`] can drain them by queueing a barrier job and
/// joining it.
fn deletion_executor() -> &'static Sender<Job> {
    static EXECUTOR: OnceLock<Sender<Job>> = OnceLock::new();
    EXECUTOR.get_or_init(|| {
        let (tx, rx) = channel::unbounded::<Job>();
        thread::Builder::new()
            .name("txnlog-deletions".into())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    match job {
                        Job::Run(task) => task.run(),
                        Job::Barrier(ack) => {
                            let _ = ack.send(());
                        }
                    }
                }
            })
            .expect("failed to spawn deletion executor");
        tx
    })
}

/// Resubmits every deletion that failed the first time around, e.g. after
/// the engine dropped memory maps that were pinning the files.
pub fn reschedule_failed_deletions() {
    let queue = failed_deletions();
    while let Some(task) = queue.pop() {
        let _ = deletion_executor().send(Job::Run(task));
    }
}

/// Blocks until every deletion submitted to the executor so far has run.
pub fn wait_for_deletions() {
    let (ack_tx, ack_rx) = channel::bounded(1);
    if deletion_executor().send(Job::Barrier(ack_tx)).is_ok() {
        let _ = ack_rx.recv();
    }
}

#[cfg(test)]
pub(crate) fn failed_deletions_len() -> usize {
    failed_deletions().len()
}
