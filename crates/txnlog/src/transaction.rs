//! The live transaction façade.
//!
//! One `Transaction` is written from one thread at a time; transactions on
//! distinct log files may proceed in parallel. The shared core is reference
//! counted: the transaction itself holds one reference and every
//! [`Obsoletion`](crate::Obsoletion) holds another, so physical cleanup
//! only fires once the transaction terminated *and* the engine released
//! every in-memory reader of an obsoleted table.
//!
//! ```text
//!           track_new / obsolete*
//!   OPEN ──────────────────────────► OPEN
//!     ├── commit ──► COMMITTED ──┐
//!     ├── abort  ──► ABORTED  ───┤──► tidier scheduled
//!     └── drop (no terminator) ──► leftover, cleaned at next startup
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use table::{TableDescriptor, TableReader, Tracker};

use crate::data::{OperationType, TransactionData};
use crate::error::Result;
use crate::record::RecordKind;
use crate::tidier::{self, Obsoletion};

/// Reference-counted core shared between a [`Transaction`] and its
/// obsoletions. The drop of the last reference runs the transaction tidier
/// (when the transaction terminated) or leaves the log in place for the
/// startup scan (when it did not).
pub(crate) struct TxnShared {
    pub(crate) data: Mutex<Option<TransactionData>>,
    pub(crate) tracker: Option<Arc<dyn Tracker>>,
}

impl Drop for TxnShared {
    fn drop(&mut self) {
        if let Some(mut data) = self.data.get_mut().take() {
            if data.completed() {
                tidier::run_transaction_tidier(data);
            } else {
                debug!(
                    "transaction {} dropped without a terminator; leftovers remain until the \
                     next startup scan",
                    data
                );
                data.close();
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    InProgress,
    Committed,
    Aborted,
}

/// Tracks the table files involved in one transaction: if the transaction
/// commits the old files are deleted and the new ones kept, vice-versa if
/// it aborts or never terminates.
///
/// When this transaction participates in a composite commit, its `commit`
/// must run before any other fallible commit action, since the log append
/// is the only step that may legitimately fail during the prepare phase.
pub struct Transaction {
    shared: Option<Arc<TxnShared>>,
    state: State,
    id: Uuid,
    op_type: OperationType,
}

impl Transaction {
    pub fn new(op_type: OperationType, folder: &Path, tracker: Option<Arc<dyn Tracker>>) -> Self {
        let id = Uuid::now_v7();
        let data = TransactionData::new(op_type, folder, id);
        debug!("created transaction log {}", data);

        Transaction {
            shared: Some(Arc::new(TxnShared {
                data: Mutex::new(Some(data)),
                tracker,
            })),
            state: State::InProgress,
            id,
            op_type,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn op_type(&self) -> OperationType {
        self.op_type
    }

    pub fn log_path(&self) -> PathBuf {
        self.with_data(|data| data.log_path().to_path_buf())
    }

    fn shared(&self) -> &Arc<TxnShared> {
        self.shared
            .as_ref()
            .expect("transaction already terminated")
    }

    fn with_data<R>(&self, f: impl FnOnce(&mut TransactionData) -> R) -> R {
        let mut guard = self.shared().data.lock();
        f(guard.as_mut().expect("transaction data already tidied"))
    }

    fn assert_in_progress(&self) {
        assert!(
            self.state == State::InProgress,
            "transaction is already {:?}",
            self.state
        );
    }

    /// Records a new table. Panics if `table` is already tracked as new.
    pub fn track_new(&mut self, table: &TableDescriptor) -> Result<()> {
        self.assert_in_progress();
        let added = self.with_data(|data| data.add(RecordKind::Add, table))?;
        assert!(added, "{table} is already tracked as new");
        Ok(())
    }

    /// Stops tracking a table as new and deletes its files, for when a
    /// pre-commit step decides not to install a freshly written table.
    /// Must not be called after the transaction terminated.
    pub fn untrack_new(&mut self, table: &TableDescriptor) -> Result<()> {
        self.assert_in_progress();
        self.with_data(|data| data.remove(RecordKind::Add, table))
    }

    /// Records an existing table for removal and returns the cleanup handle
    /// the engine binds to the reader's end of life.
    ///
    /// A table that this very transaction created (tracked as ADD) gets no
    /// REMOVE record: the returned obsoletion is flagged `was_new` so the
    /// tidier deletes the files without decrementing the disk-usage metric
    /// that was never incremented for them.
    pub fn obsolete(&mut self, reader: &TableReader) -> Result<Obsoletion> {
        self.assert_in_progress();
        let desc = reader.descriptor();

        if self.with_data(|data| data.contains(RecordKind::Add, desc)) {
            assert!(
                !self.with_data(|data| data.contains(RecordKind::Remove, desc)),
                "{desc} is tracked both as new and as obsolete"
            );
            return Ok(Obsoletion::new(reader, true, self.shared().clone()));
        }

        let added = self.with_data(|data| data.add(RecordKind::Remove, desc))?;
        assert!(added, "{desc} is already tracked as obsolete");

        if let Some(tracker) = &self.shared().tracker {
            tracker.notify_deleting(reader);
        }

        Ok(Obsoletion::new(reader, false, self.shared().clone()))
    }

    /// Appends the COMMIT terminator and releases the self-reference that
    /// guards the tidier. Physical deletion happens later, once every
    /// obsoleted reader is released.
    ///
    /// On failure the transaction stays open; the engine must abort it.
    pub fn commit(&mut self) -> Result<()> {
        self.assert_in_progress();
        self.with_data(|data| data.commit())?;
        self.state = State::Committed;
        self.complete();
        Ok(())
    }

    /// Appends the ABORT terminator and releases the self-reference. The
    /// ADD-referenced files are deleted by the tidier.
    pub fn abort(&mut self) -> Result<()> {
        self.assert_in_progress();
        self.with_data(|data| data.abort())?;
        self.state = State::Aborted;
        self.complete();
        Ok(())
    }

    fn complete(&mut self) {
        // dropping the self-reference arms the tidier; it fires when the
        // last obsoletion releases its reference
        self.shared = None;
    }
}
