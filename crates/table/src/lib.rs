//! # Table — on-disk table descriptors
//!
//! A *table* is an immutable, multi-file unit produced by a flush or a
//! compaction. All of its component files share a common base filename:
//!
//! ```text
//! tbl-000000000000000005-Data.db
//! tbl-000000000000000005-Index.db
//! tbl-000000000000000005-Filter.db
//! ...
//! ```
//!
//! This crate holds the descriptor and component-naming logic plus the two
//! narrow callback surfaces the transaction log needs from the engine's
//! live-set tracker. It knows nothing about transactions.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Current table format version. The first segment of every transaction log
/// file name; bumped on incompatible layout changes.
pub const FORMAT_VERSION: &str = "aa";

/// One physical file belonging to a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    /// The principal component holding row data. Always deleted first so
    /// that a half-deleted table is still recognised as garbage on restart.
    Data,
    Index,
    Filter,
    Summary,
    Stats,
}

impl Component {
    pub const ALL: [Component; 5] = [
        Component::Data,
        Component::Index,
        Component::Filter,
        Component::Summary,
        Component::Stats,
    ];

    pub fn file_suffix(self) -> &'static str {
        match self {
            Component::Data => "Data.db",
            Component::Index => "Index.db",
            Component::Filter => "Filter.db",
            Component::Summary => "Summary.db",
            Component::Stats => "Stats.db",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_suffix())
    }
}

/// Identifies one table on disk: the enclosing directory plus the base
/// filename shared by all of the table's component files.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableDescriptor {
    directory: PathBuf,
    base: String,
}

impl TableDescriptor {
    pub fn new(directory: impl Into<PathBuf>, base: impl Into<String>) -> Self {
        TableDescriptor {
            directory: directory.into(),
            base: base.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// The base filename, relative to the directory.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Full path of one component file: `<dir>/<base>-<suffix>`.
    pub fn component_path(&self, component: Component) -> PathBuf {
        self.directory
            .join(format!("{}-{}", self.base, component.file_suffix()))
    }

    /// Lists the component files currently present on disk, by base-filename
    /// prefix match against the directory contents.
    pub fn component_files(&self) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with(&self.base) {
                files.push(entry.path());
            }
        }
        Ok(files)
    }

    /// Sum of the sizes of all component files currently on disk.
    pub fn bytes_on_disk(&self) -> io::Result<u64> {
        let mut total = 0;
        for file in self.component_files()? {
            total += fs::metadata(&file)?.len();
        }
        Ok(total)
    }
}

impl fmt::Display for TableDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.directory.join(&self.base).display())
    }
}

/// The narrow slice of an in-memory table reader the transaction log needs:
/// which table it reads and how many bytes it occupied on disk when opened.
///
/// The engine's reader cache owns the real reader; this handle deliberately
/// carries no file handles and no data access.
#[derive(Debug, Clone)]
pub struct TableReader {
    descriptor: TableDescriptor,
    bytes_on_disk: u64,
}

impl TableReader {
    pub fn new(descriptor: TableDescriptor, bytes_on_disk: u64) -> Self {
        TableReader {
            descriptor,
            bytes_on_disk,
        }
    }

    /// Opens a handle on an existing table, snapshotting its on-disk size.
    pub fn open(descriptor: TableDescriptor) -> io::Result<Self> {
        let bytes_on_disk = descriptor.bytes_on_disk()?;
        Ok(TableReader {
            descriptor,
            bytes_on_disk,
        })
    }

    pub fn descriptor(&self) -> &TableDescriptor {
        &self.descriptor
    }

    pub fn bytes_on_disk(&self) -> u64 {
        self.bytes_on_disk
    }
}

/// Callbacks into the engine's live-set tracker consumed by the transaction
/// log. All methods must be cheap and non-blocking.
pub trait Tracker: Send + Sync {
    /// Invoked once, synchronously, when a table is recorded for removal.
    fn notify_deleting(&self, reader: &TableReader);

    /// Decrement the directory's disk-usage metric after physical deletion.
    fn dec_disk_usage(&self, bytes: u64);

    /// Drop any per-table read-statistics metadata. Best-effort.
    fn clear_read_stats(&self, table: &TableDescriptor) {
        let _ = table;
    }
}

#[cfg(test)]
mod tests;
