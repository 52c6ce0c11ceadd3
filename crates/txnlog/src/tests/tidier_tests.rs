use std::fs;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tempfile::tempdir;

use crate::data::OperationType;
use crate::tests::helpers::*;
use crate::tidier::failed_deletions_len;
use crate::{reschedule_failed_deletions, wait_for_deletions, Transaction};
use table::{Component, Tracker};

#[test]
fn wait_for_deletions_returns_when_idle() {
    wait_for_deletions();
    wait_for_deletions();
}

#[test]
fn failed_deletion_is_parked_and_retried() {
    let dir = tempdir().unwrap();
    let old = new_table(dir.path(), "tbl-0001", &[Component::Data]);

    // an undeletable sibling component: remove_file fails on a non-empty
    // directory, after the data component was already deleted
    let blocker = old.component_path(Component::Index);
    fs::create_dir(&blocker).unwrap();
    fs::write(blocker.join("pin"), b"x").unwrap();

    let parked_before = failed_deletions_len();

    let mut txn = Transaction::new(OperationType::Compaction, dir.path(), None);
    let log_path = txn.log_path();
    let obsoletion = txn.obsolete(&reader(&old)).unwrap();
    txn.commit().unwrap();

    obsoletion.run();

    // the data component went first, the sibling failure parked the tidier,
    // and the parent cleanup is deferred with it
    assert!(!old.component_path(Component::Data).exists());
    assert!(blocker.exists());
    assert!(log_path.exists());
    assert_eq!(failed_deletions_len(), parked_before + 1);

    // unpin and drain the retry queue
    fs::remove_file(blocker.join("pin")).unwrap();
    fs::remove_dir(&blocker).unwrap();
    reschedule_failed_deletions();
    wait_for_deletions();

    assert!(!log_path.exists());
    assert_eq!(failed_deletions_len(), parked_before);
}

#[test]
fn tidier_clears_read_stats_before_deleting() {
    let dir = tempdir().unwrap();
    let old = new_table(dir.path(), "tbl-0001", &[Component::Data, Component::Summary]);

    let tracker = Arc::new(CountingTracker::default());
    let hook: Arc<dyn Tracker> = tracker.clone();
    let mut txn = Transaction::new(OperationType::Cleanup, dir.path(), Some(hook));
    let obsoletion = txn.obsolete(&reader(&old)).unwrap();
    txn.commit().unwrap();
    obsoletion.run();

    assert_eq!(tracker.cleared.load(Ordering::SeqCst), 1);
    assert!(!old.component_path(Component::Data).exists());
    assert!(!old.component_path(Component::Summary).exists());
}

#[test]
fn dropping_an_obsoletion_releases_without_deleting() {
    let dir = tempdir().unwrap();
    let old = new_table(dir.path(), "tbl-0001", &[Component::Data]);

    let mut txn = Transaction::new(OperationType::Compaction, dir.path(), None);
    let log_path = txn.log_path();
    let obsoletion = txn.obsolete(&reader(&old)).unwrap();
    txn.abort().unwrap();

    drop(obsoletion);

    assert!(old.component_path(Component::Data).exists());
    assert!(!log_path.exists());
}
