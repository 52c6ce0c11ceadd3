use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use table::{Component, TableDescriptor, TableReader, Tracker};

/// Creates a table on disk with the given components, each holding a little
/// content so sizes are non-zero.
pub fn new_table(dir: &Path, base: &str, components: &[Component]) -> TableDescriptor {
    let desc = TableDescriptor::new(dir, base);
    for c in components {
        fs::write(desc.component_path(*c), format!("{base}-{c}")).unwrap();
    }
    desc
}

pub fn reader(desc: &TableDescriptor) -> TableReader {
    TableReader::open(desc.clone()).unwrap()
}

/// Pushes a file's mtime forward, simulating an out-of-band mutation.
pub fn bump_mtime(path: &Path, forward: Duration) {
    let file = OpenOptions::new().append(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + forward).unwrap();
}

/// Pins a file's mtime to an exact instant.
pub fn set_mtime(path: &Path, at: SystemTime) {
    let file = OpenOptions::new().append(true).open(path).unwrap();
    file.set_modified(at).unwrap();
}

pub fn read_log_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| l.to_string())
        .collect()
}

/// A tracker that counts its callbacks.
#[derive(Default)]
pub struct CountingTracker {
    pub deleting: AtomicUsize,
    pub disk_dec: AtomicU64,
    pub cleared: AtomicUsize,
}

impl Tracker for CountingTracker {
    fn notify_deleting(&self, _reader: &TableReader) {
        self.deleting.fetch_add(1, Ordering::SeqCst);
    }

    fn dec_disk_usage(&self, bytes: u64) {
        self.disk_dec.fetch_add(bytes, Ordering::SeqCst);
    }

    fn clear_read_stats(&self, _table: &TableDescriptor) {
        self.cleared.fetch_add(1, Ordering::SeqCst);
    }
}
