use std::sync::atomic::Ordering;
use std::sync::Arc;

use tempfile::tempdir;

use crate::data::OperationType;
use crate::tests::helpers::*;
use crate::Transaction;
use table::{Component, Tracker};

// -------------------- Happy paths --------------------

#[test]
fn committed_compaction_keeps_new_and_deletes_old() {
    let dir = tempdir().unwrap();
    let old = new_table(dir.path(), "tbl-0001", &[Component::Data, Component::Index]);
    let new = new_table(dir.path(), "tbl-0002", &[Component::Data, Component::Index]);

    let mut txn = Transaction::new(OperationType::Compaction, dir.path(), None);
    let log_path = txn.log_path();

    txn.track_new(&new).unwrap();
    let obsoletion = txn.obsolete(&reader(&old)).unwrap();
    assert!(!obsoletion.was_new());

    let lines = read_log_lines(&log_path);
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("add:[tbl-0002,"), "{}", lines[0]);
    assert!(lines[1].starts_with("remove:[tbl-0001,"), "{}", lines[1]);

    txn.commit().unwrap();
    let lines = read_log_lines(&log_path);
    assert_eq!(lines.len(), 3);
    assert!(lines[2].starts_with("commit:[,"), "{}", lines[2]);

    // engine releases the last reference to the obsoleted reader
    obsoletion.run();

    assert!(!old.component_path(Component::Data).exists());
    assert!(!old.component_path(Component::Index).exists());
    assert!(new.component_path(Component::Data).exists());
    assert!(new.component_path(Component::Index).exists());
    assert!(!log_path.exists());
}

#[test]
fn aborted_compaction_keeps_old_and_deletes_new() {
    let dir = tempdir().unwrap();
    let old = new_table(dir.path(), "tbl-0001", &[Component::Data, Component::Index]);
    let new = new_table(dir.path(), "tbl-0002", &[Component::Data]);

    let mut txn = Transaction::new(OperationType::Compaction, dir.path(), None);
    let log_path = txn.log_path();

    txn.track_new(&new).unwrap();
    let obsoletion = txn.obsolete(&reader(&old)).unwrap();

    txn.abort().unwrap();
    // the obsoletion is cancelled, releasing its reference without deleting
    obsoletion.abort();

    assert!(old.component_path(Component::Data).exists());
    assert!(old.component_path(Component::Index).exists());
    assert!(!new.component_path(Component::Data).exists());
    assert!(!log_path.exists());
}

#[test]
fn commit_with_no_obsoletions_tidies_immediately() {
    let dir = tempdir().unwrap();
    let new = new_table(dir.path(), "tbl-0002", &[Component::Data]);

    let mut txn = Transaction::new(OperationType::Flush, dir.path(), None);
    let log_path = txn.log_path();
    txn.track_new(&new).unwrap();
    txn.commit().unwrap();

    assert!(new.component_path(Component::Data).exists());
    assert!(!log_path.exists());
}

// -------------------- Crash outcomes --------------------

#[test]
fn dropped_transaction_leaves_log_for_recovery() {
    let dir = tempdir().unwrap();
    let new = new_table(dir.path(), "tbl-0002", &[Component::Data]);

    let log_path = {
        let mut txn = Transaction::new(OperationType::Flush, dir.path(), None);
        txn.track_new(&new).unwrap();
        txn.log_path()
        // dropped without a terminator, like a crash
    };

    assert!(log_path.exists());
    assert!(new.component_path(Component::Data).exists());

    crate::remove_unfinished_leftovers(dir.path());

    assert!(!log_path.exists());
    assert!(!new.component_path(Component::Data).exists());
}

// -------------------- Obsolete of a freshly added table --------------------

#[test]
fn obsolete_of_tracked_new_table_skips_remove_record_and_metric() {
    let dir = tempdir().unwrap();
    let new = new_table(dir.path(), "tbl-0002", &[Component::Data, Component::Index]);

    let tracker = Arc::new(CountingTracker::default());
    let hook: Arc<dyn Tracker> = tracker.clone();
    let mut txn = Transaction::new(OperationType::Compaction, dir.path(), Some(hook));
    let log_path = txn.log_path();

    txn.track_new(&new).unwrap();
    let obsoletion = txn.obsolete(&reader(&new)).unwrap();
    assert!(obsoletion.was_new());

    // no remove record was written, and the tracker was not notified
    let lines = read_log_lines(&log_path);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("add:[tbl-0002,"));
    assert_eq!(tracker.deleting.load(Ordering::SeqCst), 0);

    txn.commit().unwrap();
    obsoletion.run();

    assert!(!new.component_path(Component::Data).exists());
    assert!(!log_path.exists());
    // the disk-usage metric was never incremented for this table, so the
    // tidier must not decrement it either
    assert_eq!(tracker.disk_dec.load(Ordering::SeqCst), 0);
    assert_eq!(tracker.cleared.load(Ordering::SeqCst), 1);
}

#[test]
fn obsolete_notifies_tracker_and_decrements_disk_usage() {
    let dir = tempdir().unwrap();
    let old = new_table(dir.path(), "tbl-0001", &[Component::Data, Component::Index]);
    let size = old.bytes_on_disk().unwrap();
    assert!(size > 0);

    let tracker = Arc::new(CountingTracker::default());
    let hook: Arc<dyn Tracker> = tracker.clone();
    let mut txn = Transaction::new(OperationType::Compaction, dir.path(), Some(hook));

    let obsoletion = txn.obsolete(&reader(&old)).unwrap();
    assert_eq!(tracker.deleting.load(Ordering::SeqCst), 1);

    txn.commit().unwrap();
    obsoletion.run();

    assert_eq!(tracker.disk_dec.load(Ordering::SeqCst), size);
    assert_eq!(tracker.cleared.load(Ordering::SeqCst), 1);
}

// -------------------- Untrack --------------------

#[test]
fn untrack_new_deletes_the_files() {
    let dir = tempdir().unwrap();
    let old = new_table(dir.path(), "tbl-0001", &[Component::Data]);
    let new = new_table(dir.path(), "tbl-0002", &[Component::Data, Component::Index]);

    let mut txn = Transaction::new(OperationType::Compaction, dir.path(), None);
    let log_path = txn.log_path();

    txn.track_new(&new).unwrap();
    let obsoletion = txn.obsolete(&reader(&old)).unwrap();

    // a pre-commit step decided not to install the freshly written table
    txn.untrack_new(&new).unwrap();
    assert!(!new.component_path(Component::Data).exists());
    assert!(!new.component_path(Component::Index).exists());

    txn.commit().unwrap();
    obsoletion.run();

    assert!(!old.component_path(Component::Data).exists());
    assert!(!log_path.exists());
}

// -------------------- Invariant violations --------------------

#[test]
#[should_panic(expected = "already tracked as new")]
fn double_track_new_panics() {
    let dir = tempdir().unwrap();
    let new = new_table(dir.path(), "tbl-0002", &[Component::Data]);

    let mut txn = Transaction::new(OperationType::Flush, dir.path(), None);
    txn.track_new(&new).unwrap();
    let _ = txn.track_new(&new);
}

#[test]
#[should_panic(expected = "already tracked as obsolete")]
fn double_obsolete_panics() {
    let dir = tempdir().unwrap();
    let old = new_table(dir.path(), "tbl-0001", &[Component::Data]);

    let mut txn = Transaction::new(OperationType::Compaction, dir.path(), None);
    let first = txn.obsolete(&reader(&old)).unwrap();
    let second = txn.obsolete(&reader(&old));
    drop(second);
    first.abort();
}

#[test]
#[should_panic(expected = "transaction is already Committed")]
fn track_new_after_commit_panics() {
    let dir = tempdir().unwrap();
    let new = new_table(dir.path(), "tbl-0002", &[Component::Data]);

    let mut txn = Transaction::new(OperationType::Flush, dir.path(), None);
    txn.commit().unwrap();
    let _ = txn.track_new(&new);
}

#[test]
#[should_panic(expected = "transaction is already Committed")]
fn commit_twice_panics() {
    let dir = tempdir().unwrap();
    let mut txn = Transaction::new(OperationType::Flush, dir.path(), None);
    txn.commit().unwrap();
    let _ = txn.commit();
}
